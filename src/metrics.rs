use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const NANOS_PER_MILLI: u64 = 1_000_000;

/// One sample of a rolling series.
///
/// `used` is the raw value (ticks, bytes). `percent` is normalized against a
/// capacity; both are `None` for pause markers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub used: Option<f64>,
    pub percent: Option<f64>,
}

impl TimeSeriesPoint {
    pub fn new(timestamp: DateTime<Utc>, used: Option<f64>, percent: Option<f64>) -> Self {
        Self {
            timestamp,
            used,
            percent,
        }
    }

    /// Marker for a gap in polling.
    pub fn gap(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, None, None)
    }

    pub fn is_gap(&self) -> bool {
        self.used.is_none() && self.percent.is_none()
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Truncates a nanosecond epoch timestamp to millisecond resolution.
///
/// `u64::MAX` nanoseconds is around the year 2554, well inside chrono's range.
pub fn instant_from_nanos(nanos: u64) -> DateTime<Utc> {
    let millis = (nanos / NANOS_PER_MILLI) as i64;
    DateTime::UNIX_EPOCH + Duration::milliseconds(millis)
}
