//! Topic Filters
//!
//! MQTT-style matching on `/`-separated topics:
//! - `boards/7/alerts` matches only itself
//! - `boards/+/alerts` matches exactly one segment in place of `+`
//! - `boards/#` matches everything below `boards/` (only as the last segment)

use std::fmt;

use super::{BusError, BusResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    SingleLevel,
    MultiLevel,
}

/// A parsed subscription pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pattern: String,
    segments: Vec<Segment>,
}

impl TopicFilter {
    /// Parse and validate a pattern
    pub fn parse(pattern: &str) -> BusResult<Self> {
        if pattern.is_empty() {
            return Err(BusError::InvalidPattern("empty pattern".to_string()));
        }

        let parts: Vec<&str> = pattern.split('/').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "+" => Segment::SingleLevel,
                "#" if i == last => Segment::MultiLevel,
                "#" => {
                    return Err(BusError::InvalidPattern(format!(
                        "'#' must be the last segment: {}",
                        pattern
                    )));
                }
                p if p.contains('+') || p.contains('#') => {
                    return Err(BusError::InvalidPattern(format!(
                        "wildcards must occupy a whole segment: {}",
                        pattern
                    )));
                }
                p => Segment::Literal(p.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    /// Check whether a concrete topic matches this filter
    pub fn matches(&self, topic: &str) -> bool {
        let mut levels = topic.split('/');

        for segment in &self.segments {
            match segment {
                Segment::MultiLevel => return true,
                Segment::SingleLevel => {
                    if levels.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(expected) => match levels.next() {
                    Some(level) if level == expected => {}
                    _ => return false,
                },
            }
        }

        levels.next().is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// Reject topics containing wildcard characters
pub fn validate_topic(topic: &str) -> BusResult<()> {
    if topic.is_empty() || topic.contains('+') || topic.contains('#') {
        return Err(BusError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}
