use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    High,
    Low,
    HighRestored,
}

impl PhaseKind {
    pub fn label(self) -> &'static str {
        match self {
            PhaseKind::High => "reached hi mss",
            PhaseKind::Low => "reached lo mss",
            PhaseKind::HighRestored => "reached restored hi mss",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhaseKind::High => "high",
            PhaseKind::Low => "low",
            PhaseKind::HighRestored => "high-restored",
        })
    }
}

/// When a sampled MSS counts as converged for a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    /// `mss >= mtu - margin`; the margin covers header overhead.
    Rising { mtu: u32, margin: u32 },
    /// `mss <= mtu`
    Falling { mtu: u32 },
}

impl Threshold {
    pub fn reached(self, mss: u32) -> bool {
        match self {
            Threshold::Rising { mtu, margin } => mss >= mtu.saturating_sub(margin),
            Threshold::Falling { mtu } => mss <= mtu,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Rising { mtu, margin } => {
                write!(f, "mss >= {}", mtu.saturating_sub(*margin))
            }
            Threshold::Falling { mtu } => write!(f, "mss <= {mtu}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MtuPhase {
    pub kind: PhaseKind,
    /// MTU set on the middle router's server-facing interface
    pub mtu: u32,
    pub threshold: Threshold,
    pub timeout: Duration,
}

impl MtuPhase {
    pub fn high(mtu: u32, margin: u32, timeout: Duration) -> Self {
        Self {
            kind: PhaseKind::High,
            mtu,
            threshold: Threshold::Rising { mtu, margin },
            timeout,
        }
    }

    pub fn low(mtu: u32, timeout: Duration) -> Self {
        Self {
            kind: PhaseKind::Low,
            mtu,
            threshold: Threshold::Falling { mtu },
            timeout,
        }
    }

    pub fn high_restored(mtu: u32, margin: u32, timeout: Duration) -> Self {
        Self {
            kind: PhaseKind::HighRestored,
            ..Self::high(mtu, margin, timeout)
        }
    }
}

/// The fixed up/down/up sequence.
pub fn standard_phases(
    hi_mtu: u32,
    lo_mtu: u32,
    margin: u32,
    timeouts: [Duration; 3],
) -> Vec<MtuPhase> {
    vec![
        MtuPhase::high(hi_mtu, margin, timeouts[0]),
        MtuPhase::low(lo_mtu, timeouts[1]),
        MtuPhase::high_restored(hi_mtu, margin, timeouts[2]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rising_threshold_uses_margin() {
        let t = Threshold::Rising {
            mtu: 9100,
            margin: 100,
        };
        assert!(t.reached(9000));
        assert!(t.reached(9100));
        assert!(!t.reached(8999));
    }

    #[test]
    fn falling_threshold_is_inclusive() {
        let t = Threshold::Falling { mtu: 2000 };
        assert!(t.reached(2000));
        assert!(t.reached(1460));
        assert!(!t.reached(2001));
    }

    #[test]
    fn margin_larger_than_mtu_saturates() {
        let t = Threshold::Rising { mtu: 50, margin: 100 };
        assert!(t.reached(0));
    }

    #[test]
    fn standard_sequence_order() {
        let secs = Duration::from_secs;
        let phases = standard_phases(9100, 2000, 100, [secs(30), secs(30), secs(300)]);
        let kinds: Vec<_> = phases.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            [PhaseKind::High, PhaseKind::Low, PhaseKind::HighRestored]
        );
        assert_eq!(phases[1].mtu, 2000);
        assert_eq!(phases[2].timeout, secs(300));
        assert_eq!(phases[2].threshold.to_string(), "mss >= 9000");
    }
}
