//! # Certificate Line Composer
//!
//! One line per destroyed, certificate-eligible record:
//!
//! ```text
//! WD-123456 | Shred | 2024-03-01
//! ```
//!
//! Anything not yet destroyed produces no line at all.

use crate::domain::{SerialRecord, Timestamp};
use chrono::{DateTime, Utc};
use std::fmt::Write;

const FALLBACK_DATE_FORMAT: &str = "%Y-%m-%d";

/// Renders destruction certificate lines.
pub struct CertificateLineComposer;

impl CertificateLineComposer {
    /// Line for one record, or `None` when it is not eligible.
    pub fn compose_line(record: &SerialRecord, date_format: &str) -> Option<String> {
        if !record.include_in_certificate()
            || record.is_cancelled()
            || !record.lifecycle_state().is_terminal()
        {
            return None;
        }
        let method = record.destruction().method?;
        let date = render_date(record.destruction().at?, date_format)?;
        Some(format!("{} | {} | {}", record.serial_number(), method.label(), date))
    }

    /// Lines for every eligible record, sorted by serial.
    pub fn compose_lines(records: &[SerialRecord], date_format: &str) -> Vec<String> {
        let mut eligible: Vec<&SerialRecord> = records.iter().collect();
        eligible.sort_by(|a, b| a.serial_number().cmp(b.serial_number()));
        eligible
            .into_iter()
            .filter_map(|r| Self::compose_line(r, date_format))
            .collect()
    }
}

fn render_date(at: Timestamp, format: &str) -> Option<String> {
    let secs = i64::try_from(at).ok()?;
    let dt: DateTime<Utc> = DateTime::from_timestamp(secs, 0)?;
    let mut out = String::new();
    // invalid strftime specifiers surface as fmt::Error
    if write!(out, "{}", dt.format(format)).is_ok() {
        return Some(out);
    }
    Some(dt.format(FALLBACK_DATE_FORMAT).to_string())
}
