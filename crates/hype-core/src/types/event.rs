//! Events emitted by the hype detector to downstream consumers.
//!
//! The `Display` impl renders the human-readable summary that is handed to a
//! [`NotificationSink`](crate::notify::NotificationSink).

use std::fmt;
use std::time::Duration;

use crate::time_util::{date_string, format_duration};
use crate::types::StreamId;

/// A hype state transition for one stream.
#[derive(Debug, Clone, PartialEq)]
pub enum HypeEvent {
    /// Activity crossed the threshold (`idle -> hype`).
    Started {
        stream: StreamId,
        /// Start of the rate window that produced the crossing sample (epoch ms).
        start_time_ms: u64,
        /// Threshold that was crossed.
        threshold: f64,
    },

    /// Activity fell back below the threshold (`hype -> idle`).
    Ended {
        stream: StreamId,
        /// Time spent in the hype state.
        duration: Duration,
        min: f64,
        avg: f64,
        max: f64,
    },
}

impl HypeEvent {
    pub fn stream(&self) -> &StreamId {
        match self {
            Self::Started { stream, .. } | Self::Ended { stream, .. } => stream,
        }
    }

    /// Summary text with the stream shown as `name`.
    pub fn summary(&self, name: &str) -> String {
        match self {
            Self::Started { start_time_ms, threshold, .. } => format!(
                "Hype Detected-{name} | Time: {} | Current hype threshold: {threshold:05.2}",
                date_string(*start_time_ms),
            ),
            Self::Ended { duration, min, avg, max, .. } => format!(
                "Hype Ended-{name} | Lasted: {} | Min-Hype: {min:05.2} | Avg-Hype: {avg:05.2} | Max-Hype: {max:05.2}",
                format_duration(*duration),
            ),
        }
    }
}

impl fmt::Display for HypeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary(self.stream().as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_summary() {
        let ev = HypeEvent::Started { stream: StreamId::new("buddha").unwrap(), start_time_ms: 0, threshold: 2.5 };
        assert_eq!(ev.to_string(), "Hype Detected-buddha | Time: 1970-01-01 00:00:00 | Current hype threshold: 02.50");
    }

    #[test]
    fn ended_summary() {
        let ev = HypeEvent::Ended {
            stream: StreamId::new("buddha").unwrap(),
            duration: Duration::from_secs(65),
            min: 6.0,
            avg: 6.5,
            max: 7.0,
        };
        assert_eq!(
            ev.to_string(),
            "Hype Ended-buddha | Lasted: 1m 05s | Min-Hype: 06.00 | Avg-Hype: 06.50 | Max-Hype: 07.00"
        );
    }

    #[test]
    fn summary_uses_given_name() {
        let ev = HypeEvent::Started { stream: StreamId::new("buddha").unwrap(), start_time_ms: 0, threshold: 2.5 };
        assert!(ev.summary("Buddha").starts_with("Hype Detected-Buddha | "));
    }
}
