use std::collections::VecDeque;

/// Rolling fetch outcomes for one tile source.
///
/// Only the last `window` outcomes count, so a source that recovers is
/// reported healthy again once enough successes have pushed the failures out.
#[derive(Debug, Clone)]
pub struct SourceStats {
    outcomes: VecDeque<bool>,
    window: usize,
    failures: usize,
}

impl SourceStats {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            outcomes: VecDeque::with_capacity(window),
            window,
            failures: 0,
        }
    }

    /// Record the outcome of one finished fetch
    pub fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.window {
            if let Some(false) = self.outcomes.pop_front() {
                self.failures -= 1;
            }
        }
        self.outcomes.push_back(success);
        if !success {
            self.failures += 1;
        }
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> usize {
        self.failures
    }

    /// Share of failed fetches in the window, 0 when nothing was attempted
    pub fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.failures as f64 / self.outcomes.len() as f64
        }
    }
}
