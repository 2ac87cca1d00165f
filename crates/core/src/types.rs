/// Server-assigned identifiers (`simID`, `stateID`, `gateID`) are integer keys.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
