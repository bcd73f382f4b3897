//! Accept loop

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpListener;

use super::Ingest;

impl Ingest {
    /// Accept device connections until `shutdown` resolves, then close every
    /// registered connection
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Listening for devices");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Device listener stopping");
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        let ingest = self.clone();
                        tokio::spawn(async move {
                            ingest.handle_connection(stream, peer.to_string()).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        // Back off on resource exhaustion (e.g. out of file descriptors)
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        self.inner.registry.close_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestSettings;
    use crate::session::BoardSessionRegistry;
    use fallgate_runtime::{handler_fn, Bus, BusMessage, LocalBus, SystemClock};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_serve_publishes_and_shuts_down() {
        let bus = LocalBus::new();
        let received = Arc::new(Mutex::new(Vec::<BusMessage>::new()));
        let sink = Arc::clone(&received);
        let _sub = bus
            .subscribe(
                "boards/#",
                handler_fn(move |msg| {
                    let sink = Arc::clone(&sink);
                    async move { sink.lock().push(msg) }
                }),
            )
            .await
            .unwrap();

        let registry = Arc::new(BoardSessionRegistry::new(
            Duration::from_secs(5),
            SystemClock::shared(),
        ));
        let ingest = Ingest::new(registry, Arc::new(bus), IngestSettings::default());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = {
            let ingest = ingest.clone();
            tokio::spawn(async move {
                ingest
                    .serve(listener, async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        let mut device = TcpStream::connect(addr).await.unwrap();
        device
            .write_all(b"TYPE:DATA:7\n0.1,0.2,0.3,0,0,0,0,7\n")
            .await
            .unwrap();

        let published = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if !received.lock().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(published.is_ok());
        assert_eq!(received.lock()[0].topic, "boards/7/sensors");
        assert_eq!(ingest.stats().connections_accepted, 1);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();

        // Shutdown closes the registered connection
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), device.read(&mut buf))
            .await
            .expect("connection should close");
        assert_eq!(read.unwrap(), 0);
    }
}
