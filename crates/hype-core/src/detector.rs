//! Two-state hype detector (`Idle` / `Hype`).
//!
//! Each evaluation compares one activity sample against the threshold held by
//! the caller. Crossing upward opens a [`HypeEpisode`]; falling below closes it
//! and emits a summary over the samples recorded while in hype.

use std::time::Duration;

use crate::types::{HypeEvent, StreamId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HypePhase {
    #[default]
    Idle,
    Hype,
}

/// Samples observed during one hype period.
#[derive(Debug, Clone, PartialEq)]
pub struct HypeEpisode {
    /// Start of the rate window that opened the episode (epoch ms).
    pub start_time_ms: u64,
    /// Evaluation time that opened the episode (epoch ms); duration is measured from here.
    pub opened_at_ms: u64,
    pub samples: Vec<f64>,
}

impl HypeEpisode {
    /// `(min, avg, max)` over the recorded samples.
    pub fn summary(&self) -> Option<(f64, f64, f64)> {
        if self.samples.is_empty() {
            return None;
        }
        let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
        for &s in &self.samples {
            min = min.min(s);
            max = max.max(s);
            sum += s;
        }
        Some((min, sum / self.samples.len() as f64, max))
    }
}

/// Hype state machine for one stream. Not thread-safe.
#[derive(Debug, Clone)]
pub struct HypeDetector {
    stream: StreamId,
    window_ms: u64,
    episode: Option<HypeEpisode>,
}

impl HypeDetector {
    /// `window_ms` is the rate window length, used to back-date episode starts.
    pub fn new(stream: StreamId, window_ms: u64) -> Self {
        Self { stream, window_ms, episode: None }
    }

    pub fn phase(&self) -> HypePhase {
        if self.episode.is_some() { HypePhase::Hype } else { HypePhase::Idle }
    }

    pub fn episode(&self) -> Option<&HypeEpisode> {
        self.episode.as_ref()
    }

    /// Feed one sample taken at `now` (epoch ms).
    ///
    /// Without a threshold no transition happens; a sample taken while
    /// already in hype is still recorded.
    pub fn evaluate(&mut self, threshold: Option<f64>, sample: f64, now: u64) -> Option<HypeEvent> {
        let Some(threshold) = threshold else {
            if let Some(ep) = self.episode.as_mut() {
                ep.samples.push(sample);
            }
            return None;
        };

        match self.episode.as_mut() {
            None if sample >= threshold => {
                let start_time_ms = now.saturating_sub(self.window_ms);
                self.episode = Some(HypeEpisode { start_time_ms, opened_at_ms: now, samples: vec![sample] });
                Some(HypeEvent::Started { stream: self.stream.clone(), start_time_ms, threshold })
            }
            None => None,
            Some(_) if sample < threshold => {
                let ep = self.episode.take()?;
                let (min, avg, max) = ep.summary().unwrap_or((sample, sample, sample));
                Some(HypeEvent::Ended {
                    stream: self.stream.clone(),
                    duration: Duration::from_millis(now.saturating_sub(ep.opened_at_ms)),
                    min,
                    avg,
                    max,
                })
            }
            Some(ep) => {
                ep.samples.push(sample);
                None
            }
        }
    }

    /// Drop any open episode without emitting an event.
    pub fn reset(&mut self) {
        self.episode = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> HypeDetector {
        HypeDetector::new(StreamId::new("buddha").unwrap(), 10_000)
    }

    #[test]
    fn enters_and_leaves_hype() {
        let mut d = detector();
        let samples = [3.0, 4.0, 6.0, 7.0, 4.0, 3.0];
        let mut events = Vec::new();
        for (i, s) in samples.iter().enumerate() {
            let now = 100_000 + i as u64 * 2_000;
            if let Some(ev) = d.evaluate(Some(5.0), *s, now) {
                events.push((i, ev));
            }
        }
        assert_eq!(events.len(), 2);

        let (i, started) = &events[0];
        assert_eq!(*i, 2);
        assert_eq!(
            *started,
            HypeEvent::Started { stream: StreamId::new("buddha").unwrap(), start_time_ms: 94_000, threshold: 5.0 }
        );

        let (i, ended) = &events[1];
        assert_eq!(*i, 4);
        match ended {
            HypeEvent::Ended { duration, min, avg, max, .. } => {
                assert_eq!(*min, 6.0);
                assert_eq!(*max, 7.0);
                assert_eq!(*avg, 6.5);
                assert_eq!(*duration, Duration::from_millis(4_000));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(d.phase(), HypePhase::Idle);
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut d = detector();
        assert!(d.evaluate(Some(5.0), 5.0, 20_000).is_some());
        assert_eq!(d.phase(), HypePhase::Hype);
    }

    #[test]
    fn missing_threshold_never_transitions() {
        let mut d = detector();
        assert!(d.evaluate(None, 100.0, 1).is_none());
        assert_eq!(d.phase(), HypePhase::Idle);

        d.evaluate(Some(1.0), 2.0, 2);
        assert!(d.evaluate(None, 0.0, 3).is_none());
        assert_eq!(d.phase(), HypePhase::Hype);
        assert_eq!(d.episode().unwrap().samples, vec![2.0, 0.0]);
    }

    #[test]
    fn reset_discards_episode() {
        let mut d = detector();
        d.evaluate(Some(1.0), 2.0, 2);
        d.reset();
        assert_eq!(d.phase(), HypePhase::Idle);
        assert!(d.episode().is_none());
    }
}
