//! Wraparound-safe software deadline timer.
//!
//! # Why circular arithmetic? (for beginners)
//!
//! The link is driven by a free-running 32-bit millisecond counter.  Such a
//! counter overflows back to 0 roughly every 49.7 days, and a wearable that
//! stays powered for months will cross that boundary.  A naive deadline check
//! like `now > start + duration` breaks the moment `start + duration`
//! overflows: the target becomes a small number and the timer appears to have
//! expired immediately.
//!
//! Instead we measure how far `now` is *past* `start`, using wrapping
//! subtraction.  `now.wrapping_sub(start)` is the number of milliseconds that
//! elapsed since the timer was started, as long as fewer than 2³² ms have
//! passed, regardless of where on the number circle `start` sits.  The timer
//! has expired exactly when that elapsed value exceeds the duration, i.e. when
//! `now` lies outside the closed arc `[start, start + duration]`.

/// Milliseconds on the free-running link clock.
pub type Millis = u32;

/// A single-shot deadline on the wrapping millisecond clock.
///
/// # Examples
///
/// ```rust
/// use alarmlink_core::timer::SoftwareTimer;
///
/// let mut timer = SoftwareTimer::new();
/// timer.start(0xFFFF_FF00, 0x1000);
/// assert_eq!(timer.target(), 0x0000_0F00);
/// assert!(!timer.is_timed_out(0x0000_0000));
/// assert!(timer.is_timed_out(0x0000_0F01));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareTimer {
    start: Millis,
    duration: Millis,
    target: Millis,
    active: bool,
}

impl SoftwareTimer {
    /// Creates an inactive timer with zero duration.
    pub const fn new() -> Self {
        Self {
            start: 0,
            duration: 0,
            target: 0,
            active: false,
        }
    }

    /// Arms the timer to expire `duration` ms after `now`.
    pub fn start(&mut self, now: Millis, duration: Millis) {
        self.start = now;
        self.duration = duration;
        self.target = now.wrapping_add(duration);
        self.active = true;
    }

    /// Re-arms the timer from `now` using the most recent duration.
    pub fn restart(&mut self, now: Millis) {
        self.start(now, self.duration);
    }

    /// Deactivates the timer.  The duration is kept for a later [`restart`](Self::restart).
    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns `true` once `now` has left the arc `[start, start + duration]`.
    ///
    /// An inactive timer never times out.
    pub fn is_timed_out(&self, now: Millis) -> bool {
        self.active && now.wrapping_sub(self.start) > self.duration
    }

    /// Milliseconds left before expiry; 0 when inactive or already expired.
    pub fn remaining(&self, now: Millis) -> Millis {
        if !self.active {
            return 0;
        }
        let elapsed = now.wrapping_sub(self.start);
        self.duration.saturating_sub(elapsed)
    }

    /// The deadline, `start + duration` modulo 2³².
    pub fn target(&self) -> Millis {
        self.target
    }

    pub fn duration(&self) -> Millis {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_timer_never_times_out() {
        let timer = SoftwareTimer::new();
        assert!(!timer.is_active());
        assert!(!timer.is_timed_out(0));
        assert!(!timer.is_timed_out(u32::MAX));
    }

    #[test]
    fn test_timer_not_timed_out_inside_closed_interval() {
        // Arrange
        let mut timer = SoftwareTimer::new();
        timer.start(1_000, 100);

        // Assert – both interval ends are inclusive
        for now in 1_000..=1_100 {
            assert!(!timer.is_timed_out(now), "now={now} must be inside the window");
        }
        assert!(timer.is_timed_out(1_101));
    }

    #[test]
    fn test_timer_times_out_before_start() {
        // A "now" behind the start lies outside the arc.
        let mut timer = SoftwareTimer::new();
        timer.start(1_000, 100);
        assert!(timer.is_timed_out(999));
    }

    #[test]
    fn test_timer_handles_counter_wraparound() {
        // Arrange
        let mut timer = SoftwareTimer::new();

        // Act
        timer.start(0xFFFF_FF00, 0x1000);

        // Assert
        assert_eq!(timer.target(), 0x0000_0F00);
        assert!(!timer.is_timed_out(0xFFFF_FF00));
        assert!(!timer.is_timed_out(0xFFFF_FFFF));
        assert!(!timer.is_timed_out(0x0000_0000));
        assert!(!timer.is_timed_out(0x0000_0F00));
        assert!(timer.is_timed_out(0x0000_0F01));
        assert!(timer.is_timed_out(0xFFFF_FEFF));
    }

    #[test]
    fn test_stop_then_restart_reuses_duration() {
        // Arrange
        let mut timer = SoftwareTimer::new();
        timer.start(0, 50);

        // Act
        timer.stop();
        assert!(!timer.is_timed_out(1_000));
        timer.restart(2_000);

        // Assert
        assert!(timer.is_active());
        assert_eq!(timer.duration(), 50);
        assert_eq!(timer.target(), 2_050);
        assert!(!timer.is_timed_out(2_050));
        assert!(timer.is_timed_out(2_051));
    }

    #[test]
    fn test_remaining_counts_down_to_zero() {
        let mut timer = SoftwareTimer::new();
        assert_eq!(timer.remaining(10), 0);

        timer.start(u32::MAX - 9, 20);
        assert_eq!(timer.remaining(u32::MAX - 9), 20);
        assert_eq!(timer.remaining(4), 6);
        assert_eq!(timer.remaining(100), 0);
    }

    #[test]
    fn test_zero_duration_expires_one_tick_later() {
        let mut timer = SoftwareTimer::new();
        timer.start(500, 0);
        assert!(!timer.is_timed_out(500));
        assert!(timer.is_timed_out(501));
    }
}
