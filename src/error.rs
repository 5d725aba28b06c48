use chrono::NaiveDate;
use thiserror::Error;

/// Fatal at load time: a profile that fails here must abort initialization.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown profile '{name}' (available: {available})")]
    UnknownProfile { name: String, available: String },

    #[error("profile {profile}: mega layer sums to {total:.4}, expected 1.0 +/- 0.01")]
    MegaLayerSum { profile: String, total: f64 },

    #[error("profile {profile}: sector weights sum to {total:.4}, expected 1.0 +/- 0.01")]
    SectorSum { profile: String, total: f64 },

    #[error("profile {profile}: {field} target {target:.4} outside [{min:.4}, {max:.4}]")]
    BandViolation {
        profile: String,
        field: String,
        target: f64,
        min: f64,
        max: f64,
    },

    #[error("failed to read profile store {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse profile store {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("dates must be strictly increasing: {previous} followed by {next}")]
    UnorderedDates { previous: NaiveDate, next: NaiveDate },

    #[error("price table has no instrument columns")]
    NoColumns,

    #[error("malformed row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
