//! Foundational utilities shared across the Miau crates.
//!
//! Provides atomic state-file writes, size-rotated log files with age-based
//! retention, and the timestamp helpers used by pairing expiry and session ids.

pub mod atomic_io;
pub mod log_rotation;
pub mod time_utils;

pub use atomic_io::{read_text_if_exists, write_text_atomic};
pub use log_rotation::{prune_stale_logs, LogRotationPolicy, RotatingLogWriter};
pub use time_utils::{compact_utc_stamp, duration_to_millis};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn functional_state_file_round_trips_through_atomic_write() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("state/instances.json");
        assert_eq!(read_text_if_exists(&path).expect("read missing"), None);
        write_text_atomic(&path, "[]").expect("write");
        assert_eq!(
            read_text_if_exists(&path).expect("read written").as_deref(),
            Some("[]")
        );
    }
}
