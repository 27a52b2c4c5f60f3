//! Deterministic classification of finished Servo runs.

use crate::core::types::TaskStatus;

/// Classify a finished unit into a terminal status.
///
/// - `Complete` only if the unit exited with code 0 **and** wrote its
///   completion marker.
/// - Everything else is `Incomplete`, including a crash after the marker was
///   written.
pub fn classify_outcome(exit_code: i64, marker_present: bool) -> TaskStatus {
    if exit_code == 0 && marker_present {
        TaskStatus::Complete
    } else {
        TaskStatus::Incomplete
    }
}
