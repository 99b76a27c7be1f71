use std::collections::VecDeque;

pub const DEFAULT_STALL_WINDOW: usize = 3;

/// Pure repetition detection over recent failure signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTracker {
    capacity: usize,
    signatures: VecDeque<String>,
}

impl ProgressTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            signatures: VecDeque::new(),
        }
    }

    pub fn from_window(capacity: usize, window: &[String]) -> Self {
        let mut tracker = Self::new(capacity);
        for signature in window {
            tracker.record(signature.clone());
        }
        tracker
    }

    pub fn record(&mut self, error_signature: impl Into<String>) {
        self.signatures.push_back(error_signature.into());
        while self.signatures.len() > self.capacity {
            self.signatures.pop_front();
        }
    }

    /// Forward progress clears the window.
    pub fn reset(&mut self) {
        self.signatures.clear();
    }

    pub fn is_stalled(&self, window: usize) -> bool {
        if window == 0 || self.signatures.len() < window {
            return false;
        }
        let mut recent = self.signatures.iter().rev().take(window);
        let Some(first) = recent.next() else {
            return false;
        };
        recent.all(|signature| signature == first)
    }

    pub fn latest(&self) -> Option<&str> {
        self.signatures.back().map(String::as_str)
    }

    pub fn window(&self) -> Vec<String> {
        self.signatures.iter().cloned().collect()
    }
}
