//! Wall-clock pacing of the polling loops.
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Sleep before every status poll
    pub poll_interval: Duration,
    /// Budget for LOCKSTATUS to clear after a reset pulse
    pub unlock_timeout: Duration,
    /// Budget for the NVM controller to become ready. Chip erase is slow.
    pub flash_ready_timeout: Duration,
    /// Settle time after the double break
    pub break_settle: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            poll_interval: Duration::from_millis(1),
            unlock_timeout: Duration::from_millis(100),
            flash_ready_timeout: Duration::from_secs(10),
            break_settle: Duration::from_secs(1),
        }
    }
}

impl Timing {
    /// No sleeping at all, the poll budgets stay the same number of polls
    pub fn immediate() -> Self {
        Timing {
            poll_interval: Duration::ZERO,
            break_settle: Duration::ZERO,
            ..Timing::default()
        }
    }

    /// Number of polls that fit in `timeout`, at least one
    pub fn polls(&self, timeout: Duration) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        (timeout.as_millis() / interval).clamp(1, u128::from(u32::MAX)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budgets() {
        let timing = Timing::default();
        assert_eq!(timing.polls(timing.unlock_timeout), 100);
        assert_eq!(timing.polls(timing.flash_ready_timeout), 10_000);
        assert_eq!(Timing::immediate().polls(Duration::from_secs(10)), 10_000);
        assert_eq!(timing.polls(Duration::ZERO), 1);
    }
}
