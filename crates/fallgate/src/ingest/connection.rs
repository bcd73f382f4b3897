//! Per-connection read loop
//!
//! Lines are processed strictly in arrival order. Each read waits at most the
//! registry's stale threshold; a silent socket is torn down and its slot
//! released.

use fallgate_types::{
    alerts_topic, parse_sensor_line, sensors_topic, AlertPayload, BoardId, Handshake,
    ProtocolError, SocketRole,
};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::{Ingest, OUTBOUND_QUEUE_DEPTH};
use crate::session::{ConnectionHandle, Registration};

/// Outcome of one bounded line read
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line(String),
    TooLong,
    Eof,
}

/// Read up to and including the next `\n`, refusing lines whose content
/// (without `\n` or `\r\n`) is over `max` bytes
async fn read_bounded_line<R>(reader: &mut R, max: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    // Room for a full-length line plus `\r\n`
    let limit = max as u64 + 2;
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;

    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    if buf.len() > max {
        return Ok(LineRead::TooLong);
    }

    Ok(LineRead::Line(String::from_utf8_lossy(&buf).into_owned()))
}

/// Drain queued outbound lines onto the socket until the handle closes
async fn run_writer<W>(mut writer: W, mut rx: mpsc::Receiver<String>, handle: ConnectionHandle)
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = handle.closed() => break,

            line = rx.recv() => {
                let Some(line) = line else { break };
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    tracing::debug!(peer = %handle.peer(), error = %e, "Control write failed");
                    handle.close();
                    break;
                }
            }
        }
    }
}

impl Ingest {
    /// Run one device connection to completion
    pub async fn handle_connection<S>(&self, stream: S, peer: String)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.inner.stats.connection_accepted();
        let registry = &self.inner.registry;
        let stale_after = registry.stale_after();
        let max_line_bytes = self.inner.settings.max_line_bytes;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        // Handshake
        let handshake = match timeout(stale_after, read_bounded_line(&mut reader, max_line_bytes)).await {
            Ok(Ok(LineRead::Line(line))) => match Handshake::parse(&line) {
                Ok(handshake) => handshake,
                Err(e) => {
                    self.inner.stats.protocol_error();
                    tracing::warn!(peer = %peer, error = %e, "Rejected connection");
                    return;
                }
            },
            Ok(Ok(LineRead::TooLong)) => {
                self.inner.stats.protocol_error();
                let e = ProtocolError::LineTooLong(max_line_bytes);
                tracing::warn!(peer = %peer, error = %e, "Rejected connection");
                return;
            }
            Ok(Ok(LineRead::Eof)) => {
                tracing::debug!(peer = %peer, "Connection closed before handshake");
                return;
            }
            Ok(Err(e)) => {
                tracing::debug!(peer = %peer, error = %e, "Read failed before handshake");
                return;
            }
            Err(_) => {
                tracing::debug!(peer = %peer, "Handshake timed out");
                return;
            }
        };

        let Handshake { role, board_id } = handshake;

        let (handle, writer) = match role {
            SocketRole::Control => {
                let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
                let handle = ConnectionHandle::with_outbound(peer.clone(), tx);
                let writer = tokio::spawn(run_writer(write_half, rx, handle.clone()));
                (handle, Some(writer))
            }
            SocketRole::Data => {
                drop(write_half);
                (ConnectionHandle::new(peer.clone()), None)
            }
        };

        match registry.register(&board_id, role, handle.clone()) {
            Registration::Accepted => {}
            Registration::Evicted { .. } => self.inner.stats.stale_evicted(),
            Registration::Rejected => {
                self.inner.stats.duplicate_rejected();
                handle.close();
                if let Some(writer) = writer {
                    let _ = writer.await;
                }
                return;
            }
        }

        tracing::info!(board_id = %board_id, role = %role, peer = %peer, "Device connected");

        let reason = loop {
            let read = tokio::select! {
                _ = handle.closed() => break "closed by gateway",
                read = timeout(stale_after, read_bounded_line(&mut reader, max_line_bytes)) => read,
            };

            let line = match read {
                Ok(Ok(LineRead::Line(line))) => line,
                Ok(Ok(LineRead::Eof)) => break "closed by device",
                Ok(Ok(LineRead::TooLong)) => {
                    // Cannot resynchronise on a line boundary
                    self.inner.stats.protocol_error();
                    tracing::warn!(
                        board_id = %board_id,
                        error = %ProtocolError::LineTooLong(max_line_bytes),
                        "Dropping connection"
                    );
                    break "line too long";
                }
                Ok(Err(e)) => {
                    tracing::debug!(board_id = %board_id, error = %e, "Read failed");
                    break "read error";
                }
                Err(_) => break "silent past stale threshold",
            };

            // Liveness tracks socket activity, not payload validity
            registry.touch(&board_id);
            self.inner.stats.line_received();

            if line.trim().is_empty() {
                continue;
            }

            match role {
                SocketRole::Data => self.process_data_line(&board_id, &line).await,
                SocketRole::Control => {
                    tracing::debug!(board_id = %board_id, line = %line.trim(), "Control line");
                }
            }
        };

        registry.unregister(&board_id, role, &handle);
        handle.close();
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        tracing::info!(board_id = %board_id, role = %role, peer = %peer, reason, "Device disconnected");
    }

    /// Parse one telemetry line and publish it, plus an alert on a rising edge
    async fn process_data_line(&self, board_id: &BoardId, line: &str) {
        let reading = match parse_sensor_line(line) {
            Ok(reading) if &reading.board_id == board_id => reading,
            Ok(reading) => {
                self.report_protocol_error(
                    board_id,
                    ProtocolError::BoardMismatch {
                        expected: board_id.clone(),
                        found: reading.board_id,
                    },
                );
                return;
            }
            Err(e) => {
                self.report_protocol_error(board_id, e);
                return;
            }
        };

        let bus = &self.inner.bus;
        match bus.publish(&sensors_topic(board_id), &reading.raw).await {
            Ok(()) => self.inner.stats.reading_published(),
            Err(e) => {
                self.inner.stats.publish_failed();
                tracing::warn!(board_id = %board_id, error = %e, "Failed to publish reading");
            }
        }

        if !self.inner.registry.observe_fall_flag(board_id, reading.fall_flag) {
            return;
        }

        let payload = AlertPayload::Fall {
            raw: reading.raw.clone(),
        };
        match bus.publish(&alerts_topic(board_id), &payload.encode()).await {
            Ok(()) => {
                self.inner.stats.alert_published();
                tracing::info!(
                    board_id = %board_id,
                    stage = reading.stage.map(|s| s.label()).unwrap_or("unknown"),
                    "Fall flag raised, alert published"
                );
            }
            Err(e) => {
                self.inner.stats.publish_failed();
                tracing::warn!(board_id = %board_id, error = %e, "Failed to publish alert");
            }
        }
    }

    fn report_protocol_error(&self, board_id: &BoardId, error: ProtocolError) {
        self.inner.stats.protocol_error();
        tracing::warn!(board_id = %board_id, error = %error, "Dropped malformed line");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestSettings;
    use crate::session::{BoardSessionRegistry, SessionError};
    use fallgate_runtime::{handler_fn, Bus, BusMessage, LocalBus, ManualClock, SystemClock};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    struct Harness {
        ingest: Ingest,
        bus: LocalBus,
        received: Arc<Mutex<Vec<BusMessage>>>,
        _sub: fallgate_runtime::Subscription,
    }

    async fn harness(registry: BoardSessionRegistry) -> Harness {
        let bus = LocalBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let sub = bus
            .subscribe(
                "boards/#",
                handler_fn(move |msg| {
                    let sink = Arc::clone(&sink);
                    async move { sink.lock().push(msg) }
                }),
            )
            .await
            .unwrap();

        let ingest = Ingest::new(
            Arc::new(registry),
            Arc::new(bus.clone()),
            IngestSettings { max_line_bytes: 64 },
        );
        Harness {
            ingest,
            bus,
            received,
            _sub: sub,
        }
    }

    fn registry(stale_after: Duration) -> BoardSessionRegistry {
        BoardSessionRegistry::new(stale_after, SystemClock::shared())
    }

    fn topics(received: &Mutex<Vec<BusMessage>>) -> Vec<String> {
        received.lock().iter().map(|m| m.topic.clone()).collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn spawn_device(h: &Harness, peer: &str) -> (DuplexStream, tokio::task::JoinHandle<()>) {
        let (device, gateway) = tokio::io::duplex(1024);
        let ingest = h.ingest.clone();
        let peer = peer.to_string();
        let task = tokio::spawn(async move { ingest.handle_connection(gateway, peer).await });
        (device, task)
    }

    #[tokio::test]
    async fn test_read_bounded_line() {
        let data: &[u8] = b"short\r\nthis line is far too long\nnext\npartial";
        let mut reader = BufReader::new(data);

        assert_eq!(
            read_bounded_line(&mut reader, 10).await.unwrap(),
            LineRead::Line("short".into())
        );
        assert_eq!(read_bounded_line(&mut reader, 10).await.unwrap(), LineRead::TooLong);
    }

    #[tokio::test]
    async fn test_read_bounded_line_terminator_not_counted() {
        let data: &[u8] = b"0123456789\r\nabcdefghij\n0123456789a\r\n";
        let mut reader = BufReader::new(data);

        assert_eq!(
            read_bounded_line(&mut reader, 10).await.unwrap(),
            LineRead::Line("0123456789".into())
        );
        assert_eq!(
            read_bounded_line(&mut reader, 10).await.unwrap(),
            LineRead::Line("abcdefghij".into())
        );
        assert_eq!(read_bounded_line(&mut reader, 10).await.unwrap(), LineRead::TooLong);
    }

    #[tokio::test]
    async fn test_read_bounded_line_eof() {
        let data: &[u8] = b"last";
        let mut reader = BufReader::new(data);
        assert_eq!(
            read_bounded_line(&mut reader, 10).await.unwrap(),
            LineRead::Line("last".into())
        );
        assert_eq!(read_bounded_line(&mut reader, 10).await.unwrap(), LineRead::Eof);
    }

    #[tokio::test]
    async fn test_reading_published_to_sensors_only() {
        let h = harness(registry(Duration::from_secs(5))).await;
        let (mut device, task) = spawn_device(&h, "peer-a");

        device
            .write_all(b"TYPE:DATA:7\n0.1,0.2,0.3,0,0,0,0,7\n")
            .await
            .unwrap();
        settle().await;

        assert_eq!(topics(&h.received), vec!["boards/7/sensors"]);
        assert_eq!(h.received.lock()[0].payload, "0.1,0.2,0.3,0,0,0,0,7");

        drop(device);
        task.await.unwrap();
        assert_eq!(h.ingest.stats().readings_published, 1);
        assert_eq!(h.ingest.stats().alerts_published, 0);
    }

    #[tokio::test]
    async fn test_alerts_only_on_rising_edge() {
        let h = harness(registry(Duration::from_secs(5))).await;
        let (mut device, task) = spawn_device(&h, "peer-a");

        device.write_all(b"TYPE:DATA:7\n").await.unwrap();
        for flag in [0, 1, 1, 0, 1] {
            let line = format!("0,0,0,0,0,0,{flag},7\n");
            device.write_all(line.as_bytes()).await.unwrap();
        }
        settle().await;
        drop(device);
        task.await.unwrap();

        let received = h.received.lock();
        let mut readings = 0;
        let mut alert_after = Vec::new();
        for msg in received.iter() {
            if msg.topic == "boards/7/sensors" {
                readings += 1;
            } else if msg.topic == "boards/7/alerts" {
                alert_after.push(readings);
            }
        }
        assert_eq!(readings, 5);
        assert_eq!(alert_after, vec![2, 5]);
    }

    #[tokio::test]
    async fn test_malformed_lines_keep_connection() {
        let h = harness(registry(Duration::from_secs(5))).await;
        let (mut device, task) = spawn_device(&h, "peer-a");

        device
            .write_all(b"TYPE:DATA:7\n1,2,3\n\n0,0,0,0,0,0,0,8\n0,0,0,0,0,0,0,7\n")
            .await
            .unwrap();
        settle().await;

        assert_eq!(topics(&h.received), vec!["boards/7/sensors"]);
        assert!(!task.is_finished());

        drop(device);
        task.await.unwrap();
        let stats = h.ingest.stats();
        assert_eq!(stats.protocol_errors, 2);
        assert_eq!(stats.lines_received, 4);
    }

    #[tokio::test]
    async fn test_invalid_handshake_closes() {
        let h = harness(registry(Duration::from_secs(5))).await;
        let (mut device, task) = spawn_device(&h, "peer-a");

        device.write_all(b"HELLO 7\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("connection should close")
            .unwrap();

        assert_eq!(h.ingest.stats().protocol_errors, 1);
        assert!(h.ingest.registry().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_handshake_rejected() {
        let h = harness(registry(Duration::from_secs(5))).await;
        let mock = tokio_test::io::Builder::new().read(&[b'T'; 100]).build();

        h.ingest.handle_connection(mock, "peer-a".into()).await;

        assert_eq!(h.ingest.stats().protocol_errors, 1);
        assert!(h.ingest.registry().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_data_line_drops_connection() {
        let h = harness(registry(Duration::from_secs(5))).await;
        let (mut device, task) = spawn_device(&h, "peer-a");

        device.write_all(b"TYPE:DATA:7\n").await.unwrap();
        device.write_all(&[b'1'; 200]).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("connection should close")
            .unwrap();

        assert_eq!(h.ingest.stats().protocol_errors, 1);
    }

    #[tokio::test]
    async fn test_duplicate_rejected_and_closed() {
        let h = harness(registry(Duration::from_secs(5))).await;
        let (mut first, first_task) = spawn_device(&h, "peer-a");
        first.write_all(b"TYPE:DATA:7\n").await.unwrap();
        settle().await;

        let (mut second, second_task) = spawn_device(&h, "peer-b");
        second.write_all(b"TYPE:DATA:7\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), second_task)
            .await
            .expect("duplicate should be closed")
            .unwrap();
        assert_eq!(h.ingest.stats().duplicate_rejections, 1);

        // The original connection still publishes
        first.write_all(b"0,0,0,0,0,0,0,7\n").await.unwrap();
        settle().await;
        assert_eq!(topics(&h.received), vec!["boards/7/sensors"]);

        drop(first);
        first_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_session_evicted() {
        let clock = ManualClock::starting_now();
        let registry = BoardSessionRegistry::new(Duration::from_secs(5), clock.clone());
        let h = harness(registry).await;

        let (mut first, first_task) = spawn_device(&h, "peer-a");
        first.write_all(b"TYPE:DATA:7\n").await.unwrap();
        settle().await;

        clock.advance(Duration::from_secs(6));
        let (mut second, second_task) = spawn_device(&h, "peer-b");
        second.write_all(b"TYPE:DATA:7\n").await.unwrap();

        // Evicted connection's loop ends
        tokio::time::timeout(Duration::from_secs(1), first_task)
            .await
            .expect("evicted connection should close")
            .unwrap();
        assert_eq!(h.ingest.stats().stale_evictions, 1);

        second.write_all(b"0,0,0,0,0,0,0,7\n").await.unwrap();
        settle().await;
        assert_eq!(topics(&h.received), vec!["boards/7/sensors"]);

        // Teardown of the old connection did not clear the new slot
        let snapshot = h.ingest.registry().snapshot(Duration::from_secs(60));
        assert!(snapshot[0].data_connected);

        drop(first);
        drop(second);
        second_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_connection_times_out() {
        let h = harness(registry(Duration::from_millis(100))).await;
        let (mut device, task) = spawn_device(&h, "peer-a");

        device.write_all(b"TYPE:DATA:7\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("silent connection should be torn down")
            .unwrap();

        let snapshot = h.ingest.registry().snapshot(Duration::from_secs(60));
        assert!(!snapshot[0].data_connected);
        drop(device);
    }

    #[tokio::test]
    async fn test_publish_failure_is_counted() {
        let h = harness(registry(Duration::from_secs(5))).await;
        h.bus.set_connected(false);
        let (mut device, task) = spawn_device(&h, "peer-a");

        device
            .write_all(b"TYPE:DATA:7\n0,0,0,0,0,0,1,7\n")
            .await
            .unwrap();
        settle().await;
        drop(device);
        task.await.unwrap();

        let stats = h.ingest.stats();
        assert_eq!(stats.publish_failures, 2);
        assert_eq!(stats.readings_published, 0);
    }

    #[tokio::test]
    async fn test_control_socket_receives_commands() {
        let h = harness(registry(Duration::from_secs(5))).await;
        let b7 = BoardId::new("7").unwrap();
        let (mut device, task) = spawn_device(&h, "peer-c");

        device.write_all(b"TYPE:CMD:7\n").await.unwrap();
        settle().await;
        tokio_test::assert_ok!(h.ingest.registry().send_command(&b7, "RESOLVED\n"));

        let mut buf = [0u8; 9];
        tokio::time::timeout(Duration::from_secs(1), device.read_exact(&mut buf))
            .await
            .expect("command should be written")
            .unwrap();
        assert_eq!(&buf, b"RESOLVED\n");

        drop(device);
        task.await.unwrap();
        assert!(matches!(
            h.ingest.registry().send_command(&b7, "RESOLVED\n"),
            Err(SessionError::NoControlSocket(_) | SessionError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_handshake_with_wildcard_board_closes() {
        let h = harness(registry(Duration::from_secs(5))).await;
        let (mut device, task) = spawn_device(&h, "peer-a");

        device
            .write_all(b"TYPE:DATA:a+b\n0,0,0,0,0,0,1,a+b\n")
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("connection should close")
            .unwrap();

        let stats = h.ingest.stats();
        assert_eq!(stats.protocol_errors, 1);
        assert_eq!(stats.publish_failures, 0);
        assert!(h.ingest.registry().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_line_refreshes_liveness() {
        let clock = ManualClock::starting_now();
        let registry = BoardSessionRegistry::new(Duration::from_secs(5), clock.clone());
        let h = harness(registry).await;

        let (mut first, first_task) = spawn_device(&h, "peer-a");
        first.write_all(b"TYPE:DATA:7\n").await.unwrap();
        settle().await;

        clock.advance(Duration::from_secs(4));
        first.write_all(b"not,a,reading\n").await.unwrap();
        settle().await;

        // 8s since registration, 4s since the malformed line
        clock.advance(Duration::from_secs(4));
        let (mut second, second_task) = spawn_device(&h, "peer-b");
        second.write_all(b"TYPE:DATA:7\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), second_task)
            .await
            .expect("duplicate should be closed")
            .unwrap();

        let stats = h.ingest.stats();
        assert_eq!(stats.protocol_errors, 1);
        assert_eq!(stats.duplicate_rejections, 1);
        assert_eq!(stats.stale_evictions, 0);
        assert!(!first_task.is_finished());

        drop(first);
        first_task.await.unwrap();
    }
}
