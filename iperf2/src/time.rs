/*! Time structures.

The `time` module contains structures used to represent both
absolute and relative time.

 - [Instant] is the clock of the hosting stack, used for all scheduling decisions.
 - [Timestamp] is the seconds and microseconds pair carried inside datagrams.
 - [Duration] is used to represent relative time.

[Instant]: struct.Instant.html
[Timestamp]: struct.Timestamp.html
[Duration]: struct.Duration.html
*/
use core::{fmt, ops};
pub use core::time::Duration;

/// A representation of an absolute time value.
///
/// The `Instant` type is a wrapper around a `i64` value that
/// represents a number of microseconds, monotonically increasing
/// since an arbitrary moment in time, such as system startup.
///
/// * A value of `0` is inherently arbitrary.
/// * A value less than `0` indicates a time before the starting
///   point.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    micros: i64,
}

/// The wall clock pair sent in the header of each test datagram.
///
/// Only differences of two timestamps are ever meaningful, they serve for pacing and transit time
/// estimation. The seconds wrap around like the 32-bit field they are transmitted in.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Timestamp {
    /// Whole seconds.
    pub secs: u32,
    /// Microseconds within the second, always below one million.
    pub micros: u32,
}

impl Instant {
    /// Create a new `Instant` from a number of microseconds.
    pub fn from_micros<T: Into<i64>>(micros: T) -> Instant {
        Instant { micros: micros.into() }
    }

    /// Create a new `Instant` from a number of milliseconds.
    pub fn from_millis<T: Into<i64>>(millis: T) -> Instant {
        Instant { micros: millis.into() * 1000 }
    }

    /// Create a new `Instant` from a number of seconds.
    pub fn from_secs<T: Into<i64>>(secs: T) -> Instant {
        Instant { micros: secs.into() * 1_000_000 }
    }

    /// The fractional number of milliseconds that have passed
    /// since the beginning of time.
    pub fn millis(&self) -> i64 {
        self.total_millis() % 1000
    }

    /// The number of whole seconds that have passed since the
    /// beginning of time.
    pub fn secs(&self) -> i64 {
        self.micros / 1_000_000
    }

    /// The total number of milliseconds that have passed since
    /// the beginning of time.
    pub fn total_millis(&self) -> i64 {
        self.micros / 1000
    }

    /// The total number of microseconds that have passed since
    /// the beginning of time.
    pub fn total_micros(&self) -> i64 {
        self.micros
    }
}

impl Timestamp {
    /// Signed number of microseconds from `earlier` to `self`.
    ///
    /// Wrapping of the seconds counter is handled as long as both points are less than half the
    /// range of the counter apart.
    pub fn micros_since(self, earlier: Timestamp) -> i64 {
        let secs = self.secs.wrapping_sub(earlier.secs) as i32;
        i64::from(secs) * 1_000_000 + i64::from(self.micros) - i64::from(earlier.micros)
    }

    /// The timestamp as a wrapping count of microseconds.
    pub fn as_micros_wrapping(self) -> u32 {
        self.secs.wrapping_mul(1_000_000).wrapping_add(self.micros)
    }
}

impl From<Instant> for Timestamp {
    fn from(instant: Instant) -> Timestamp {
        let micros = instant.micros.rem_euclid(1_000_000);
        let secs = instant.micros.div_euclid(1_000_000);
        Timestamp {
            secs: secs as u32,
            micros: micros as u32,
        }
    }
}

impl From<Duration> for Timestamp {
    fn from(duration: Duration) -> Timestamp {
        Timestamp {
            secs: duration.as_secs() as u32,
            micros: duration.subsec_micros(),
        }
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}s", self.secs(), self.millis().abs())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_micros(self.micros + rhs.as_micros() as i64)
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.micros += rhs.as_micros() as i64;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant::from_micros(self.micros - rhs.as_micros() as i64)
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        Duration::from_micros((self.micros - rhs.micros).unsigned_abs())
    }
}
