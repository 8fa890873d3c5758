//! Display-side smoothing of polled frequencies.
//!
//! The engine publishes raw per-cycle readings. For display they are
//! averaged over the last few detections, and silence is handled in two
//! stages: the average is forgotten after a short pause, the display itself
//! is blanked after a long one.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Number of detections averaged for display.
pub const AVERAGE_READINGS: usize = 20;

/// Silence after which the average starts over.
pub const CLEAR_AFTER: Duration = Duration::from_secs(1);

/// Silence after which nothing is displayed.
pub const RESET_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Smoothed {
    /// A pitch was detected in this poll.
    Pitch { latest: f32, average: f32 },
    /// No pitch right now; keep showing the last average.
    Holding { average: f32 },
    /// Nothing to display.
    Silent,
}

#[derive(Debug, Clone)]
pub struct ReadingSmoother {
    readings: VecDeque<f32>,
    last_pitch: Option<Instant>,
    displayed: Option<f32>,
}

impl Default for ReadingSmoother {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingSmoother {
    pub fn new() -> Self {
        Self {
            readings: VecDeque::with_capacity(AVERAGE_READINGS),
            last_pitch: None,
            displayed: None,
        }
    }

    /// Feeds one polled frequency (0 = nothing detected) observed at `now`.
    pub fn update(&mut self, frequency: f32, now: Instant) -> Smoothed {
        if frequency > 0.0 && frequency.is_finite() {
            if self.readings.len() == AVERAGE_READINGS {
                self.readings.pop_front();
            }
            self.readings.push_back(frequency);
            self.last_pitch = Some(now);

            let average = self.readings.iter().sum::<f32>() / self.readings.len() as f32;
            self.displayed = Some(average);
            return Smoothed::Pitch {
                latest: frequency,
                average,
            };
        }

        let Some(since) = self.last_pitch else {
            return Smoothed::Silent;
        };
        let silent_for = now.saturating_duration_since(since);
        if silent_for >= RESET_AFTER {
            self.readings.clear();
            self.last_pitch = None;
            self.displayed = None;
            return Smoothed::Silent;
        }
        if silent_for >= CLEAR_AFTER {
            self.readings.clear();
        }
        match self.displayed {
            Some(average) => Smoothed::Holding { average },
            None => Smoothed::Silent,
        }
    }

    /// Number of detections currently in the average.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
