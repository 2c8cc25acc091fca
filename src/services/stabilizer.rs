//! Debounced boolean stabilizer
//!
//! Turns a noisy per-tick boolean into a hysteretic stable value using
//! asymmetric run-length thresholds. A longer off threshold keeps a granted
//! signal alive through brief occlusions.

/// Run-length hysteresis filter for one boolean signal
#[derive(Debug, Clone)]
pub struct Stabilizer {
    on_threshold: u32,
    off_threshold: u32,
    on_run: u32,
    off_run: u32,
    stable: bool,
}

impl Stabilizer {
    /// Thresholds below 1 are clamped to 1 (flip on the first observation).
    pub fn new(on_threshold: u32, off_threshold: u32) -> Self {
        Self {
            on_threshold: on_threshold.max(1),
            off_threshold: off_threshold.max(1),
            on_run: 0,
            off_run: 0,
            stable: false,
        }
    }

    /// Fold one raw observation and return the stable value
    pub fn update(&mut self, raw: bool) -> bool {
        if raw {
            self.on_run = self.on_run.saturating_add(1);
            self.off_run = 0;
        } else {
            self.off_run = self.off_run.saturating_add(1);
            self.on_run = 0;
        }

        if !self.stable && self.on_run >= self.on_threshold {
            self.stable = true;
            self.on_run = 0;
            self.off_run = 0;
        } else if self.stable && self.off_run >= self.off_threshold {
            self.stable = false;
            self.on_run = 0;
            self.off_run = 0;
        }

        self.stable
    }

    /// Force the stable value to false and clear both runs, bypassing hysteresis
    pub fn reset(&mut self) {
        self.stable = false;
        self.on_run = 0;
        self.off_run = 0;
    }

    pub fn value(&self) -> bool {
        self.stable
    }

    /// Current (on, off) run counters
    pub fn runs(&self) -> (u32, u32) {
        (self.on_run, self.off_run)
    }
}
