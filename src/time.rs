use std::time::{SystemTime, UNIX_EPOCH};

use crate::MetricsError;

/// Earliest accepted reading timestamp: 2000-01-01T00:00:00Z.
pub const MIN_TIMESTAMP_MS: u64 = 946_684_800_000;

/// Latest accepted reading timestamp: 2250-01-01T00:00:00Z.
pub const MAX_TIMESTAMP_MS: u64 = 8_835_955_200_000;

/// A UTC instant with millisecond precision, stored as milliseconds since
/// the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        Self(millis)
    }

    /// Builds a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_unix_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_unix_millis(self) -> u64 {
        self.0
    }

    /// Whole seconds since the Unix epoch.
    #[must_use]
    pub const fn as_unix_seconds(self) -> u64 {
        self.0 / 1000
    }

    /// Checks that this instant falls inside the supported serialization
    /// range.
    ///
    /// # Errors
    /// Returns [`MetricsError::TimestampOutOfRange`] outside the closed
    /// interval [2000-01-01, 2250-01-01] UTC.
    pub fn check_range(self) -> Result<Self, MetricsError> {
        if self.0 < MIN_TIMESTAMP_MS || self.0 > MAX_TIMESTAMP_MS {
            return Err(MetricsError::TimestampOutOfRange { millis: self.0 });
        }
        Ok(self)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let millis = t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64);
        Self(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_first_millisecond_of_2000() {
        assert!(Timestamp::from_unix_millis(MIN_TIMESTAMP_MS).check_range().is_ok());
    }

    #[test]
    fn rejects_last_millisecond_of_1999() {
        let err = Timestamp::from_unix_millis(MIN_TIMESTAMP_MS - 1)
            .check_range()
            .unwrap_err();
        assert!(matches!(
            err,
            MetricsError::TimestampOutOfRange { millis } if millis == MIN_TIMESTAMP_MS - 1
        ));
    }

    #[test]
    fn accepts_upper_bound_and_rejects_past_it() {
        assert!(Timestamp::from_unix_millis(MAX_TIMESTAMP_MS).check_range().is_ok());
        assert!(Timestamp::from_unix_millis(MAX_TIMESTAMP_MS + 1).check_range().is_err());
    }

    #[test]
    fn now_is_in_range() {
        assert!(Timestamp::now().check_range().is_ok());
    }
}
