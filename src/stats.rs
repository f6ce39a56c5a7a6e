use std::time::{Duration, Instant};

/// Sample counters for one poll phase.
#[derive(Debug, Clone)]
pub struct PollStats {
    /// MSS values read successfully
    pub samples: u64,
    /// no matching session yet
    pub not_found: u64,
    /// CLI errors or unparsable output
    pub errors: u64,
    pub first_mss: Option<u32>,
    pub last_mss: Option<u32>,
    /// time since the phase started, per successful sample
    pub sample_offsets: Vec<Duration>,
    t0: Instant,
}

impl PollStats {
    pub fn new() -> Self {
        Self {
            samples: 0,
            not_found: 0,
            errors: 0,
            first_mss: None,
            last_mss: None,
            sample_offsets: Vec::new(),
            t0: Instant::now(),
        }
    }

    pub fn add_sample(&mut self, mss: u32) {
        self.samples += 1;
        self.first_mss.get_or_insert(mss);
        self.last_mss = Some(mss);
        self.sample_offsets.push(self.t0.elapsed());
    }

    pub fn inc_not_found(&mut self) {
        self.not_found += 1;
    }

    pub fn inc_errors(&mut self) {
        self.errors += 1;
    }

    pub fn attempts(&self) -> u64 {
        self.samples + self.not_found + self.errors
    }

    pub fn elapsed(&self) -> Duration {
        self.t0.elapsed()
    }
}

impl Default for PollStats {
    fn default() -> Self {
        Self::new()
    }
}
