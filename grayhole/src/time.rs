//! Millisecond time types.
//!
//! The engine never reads a wall clock itself: every handler receives time
//! through the [`Clock`](crate::traits::Clock) collaborator, which keeps
//! simulation runs deterministic.

use core::ops::{Add, AddAssign, Sub};

/// Monotonic milliseconds since the node started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Process start.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Latest representable instant.
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1000))
    }

    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }

    /// The 32-bit millisecond value carried on the wire.
    ///
    /// Wraps after roughly 49.7 days, like the 32-bit clock readings the
    /// data packet was designed around. Differences between two wire values
    /// must be taken with `wrapping_sub`.
    #[inline]
    pub const fn wire_millis(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub const fn saturating_add(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.0))
    }

    #[inline]
    pub const fn saturating_sub(self, other: Timestamp) -> Duration {
        Duration(self.0.saturating_sub(other.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    /// Saturates at [`Timestamp::MAX`] so a deadline never wraps into the past.
    #[inline]
    fn add(self, rhs: Duration) -> Timestamp {
        self.saturating_add(rhs)
    }
}

impl AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Duration {
        self.saturating_sub(rhs)
    }
}

/// A span of milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Duration(ms)
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Duration(secs.saturating_mul(1000))
    }

    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn saturating_add(self, other: Duration) -> Self {
        Duration(self.0.saturating_add(other.0))
    }
}

impl Add for Duration {
    type Output = Duration;

    #[inline]
    fn add(self, rhs: Duration) -> Duration {
        self.saturating_add(rhs)
    }
}
