//! Command implementations

pub mod init;
pub mod kill;
pub mod rm;
pub mod status;
pub mod tidy;

use chrono::{DateTime, Utc};

/// "Now" for classification and relative timestamps. COPSE_NOW (RFC3339)
/// overrides the clock so transcript tests are reproducible.
pub fn current_time() -> DateTime<Utc> {
    if let Ok(raw) = std::env::var("COPSE_NOW") {
        if let Ok(t) = DateTime::parse_from_rfc3339(&raw) {
            return t.with_timezone(&Utc);
        }
    }
    Utc::now()
}
