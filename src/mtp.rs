//! Median-time-past window.

use crate::error::{Result, VersionBitsError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of block timestamps the median is taken over.
pub const TIME_WINDOW: usize = 11;

/// Bounded queue of the most recent block timestamps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedianTimeWindow {
    timestamps: VecDeque<u32>,
}

impl MedianTimeWindow {
    pub fn new() -> Self {
        Self {
            timestamps: VecDeque::with_capacity(TIME_WINDOW + 1),
        }
    }

    /// Append a timestamp, evicting the oldest once the window is full.
    pub fn push(&mut self, timestamp: u32) {
        self.timestamps.push_back(timestamp);
        while self.timestamps.len() > TIME_WINDOW {
            self.timestamps.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// True once `TIME_WINDOW` timestamps are buffered.
    pub fn is_full(&self) -> bool {
        self.timestamps.len() == TIME_WINDOW
    }

    /// Buffered timestamps, oldest first.
    pub fn timestamps(&self) -> impl Iterator<Item = u32> + '_ {
        self.timestamps.iter().copied()
    }

    /// Median of the buffered timestamps (sorted index `TIME_WINDOW / 2`).
    pub fn median_time_past(&self) -> Result<u32> {
        if !self.is_full() {
            return Err(VersionBitsError::InsufficientData {
                have: self.timestamps.len(),
                need: TIME_WINDOW,
            });
        }
        let mut sorted: Vec<u32> = self.timestamps.iter().copied().collect();
        sorted.sort_unstable();
        Ok(sorted[TIME_WINDOW / 2])
    }
}
