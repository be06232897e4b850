//! Wall-clock timestamp helper shared by every record-producing binary.

use chrono::Utc;

/// Current time as whole seconds since the Unix epoch, the unit every
/// [`crate::model::Record`] and journal frame timestamps in.
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}
