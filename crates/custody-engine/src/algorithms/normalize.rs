//! # Serial Normalisation
//!
//! Turns raw scanner or keyboard input into the canonical serial that gets
//! fingerprinted, and splits pasted multi-line input into numbered lines.

use crate::domain::{CustodyResult, IngestionConfig, ValidationError};

/// Trim, case-fold and bound a raw serial.
pub fn normalize_serial(raw: &str, config: &IngestionConfig) -> CustodyResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptySerial.into());
    }
    let serial = config.case_policy.apply(trimmed);
    let len = serial.chars().count();
    if len > config.max_serial_length {
        return Err(ValidationError::SerialTooLong {
            len,
            max: config.max_serial_length,
        }
        .into());
    }
    Ok(serial)
}

/// One non-blank line of bulk input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkLine {
    /// 1-based position in the submitted text.
    pub line_no: usize,
    /// Line as submitted, without the line terminator.
    pub raw: String,
    /// Serial part, before the first tab or comma.
    pub serial: String,
    /// Notes after the first tab or comma, if any.
    pub notes: Option<String>,
}

/// Split bulk input into serial lines.
///
/// `SN123, scratched casing` and `SN123\tscratched casing` both carry notes.
/// Blank lines are skipped but still counted for numbering.
pub fn split_bulk(text: &str) -> Vec<BulkLine> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            let (serial, notes) = match line.find(['\t', ',']) {
                Some(pos) => {
                    let notes = line[pos + 1..].trim();
                    (&line[..pos], (!notes.is_empty()).then(|| notes.to_string()))
                }
                None => (line, None),
            };
            BulkLine {
                line_no: idx + 1,
                raw: line.to_string(),
                serial: serial.trim().to_string(),
                notes,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CustodyError, SerialCase};

    #[test]
    fn test_normalize_trims_and_folds() {
        let config = IngestionConfig::default();
        assert_eq!(normalize_serial("  wd-abc1 \r", &config).unwrap(), "WD-ABC1");

        let config = IngestionConfig {
            case_policy: SerialCase::Preserve,
            ..IngestionConfig::default()
        };
        assert_eq!(normalize_serial(" wd-Abc1", &config).unwrap(), "wd-Abc1");
    }

    #[test]
    fn test_normalize_rejects_empty_and_oversized() {
        let config = IngestionConfig {
            max_serial_length: 4,
            ..IngestionConfig::default()
        };
        assert_eq!(
            normalize_serial(" \t ", &config),
            Err(CustodyError::Validation(ValidationError::EmptySerial))
        );
        assert_eq!(
            normalize_serial("ABCDE", &config),
            Err(CustodyError::Validation(ValidationError::SerialTooLong { len: 5, max: 4 }))
        );
        assert!(normalize_serial("ABCD", &config).is_ok());
    }

    #[test]
    fn test_split_bulk_numbers_lines_and_skips_blanks() {
        let lines = split_bulk("A\n\n  \nB\r\nC");
        let numbered: Vec<_> = lines.iter().map(|l| (l.line_no, l.serial.as_str())).collect();
        assert_eq!(numbered, vec![(1, "A"), (4, "B"), (5, "C")]);
    }

    #[test]
    fn test_split_bulk_extracts_notes() {
        let lines = split_bulk("SN1, scratched casing\nSN2\tcracked, bent\nSN3,\n");
        assert_eq!(lines[0].serial, "SN1");
        assert_eq!(lines[0].notes.as_deref(), Some("scratched casing"));
        assert_eq!(lines[1].serial, "SN2");
        assert_eq!(lines[1].notes.as_deref(), Some("cracked, bent"));
        assert_eq!(lines[2].serial, "SN3");
        assert_eq!(lines[2].notes, None);
    }
}
