//! One-block file naming.
//!
//! The filename is the primary key of a staged block and carries all of its
//! metadata:
//!
//! ```text
//! <num:011d>-<timestamp:%Y%m%dT%H%M%S.cc>-<id>-<previous_id>-<lib_num>-<suffix>
//! ```
//!
//! Parsing and formatting round-trip exactly. Two files with the same `num`
//! but different `id` are a fork and both are legal. The suffix tags the
//! writer so concurrent producers never collide on a name.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};

use common::Block;

use crate::error::{Error, Result};

/// A staged block, keyed by its canonical filename.
///
/// `payload` memoizes the encoded block record when the file was built from
/// a live block; files reconstructed from a directory walk carry `None`
/// until the record is downloaded from the mergeable lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneBlockFile {
    pub canonical_name: String,
    pub num: u64,
    pub id: String,
    pub previous_id: String,
    pub block_time: DateTime<Utc>,
    pub lib_num: u64,
    pub suffix: String,
    pub payload: Option<Bytes>,
}

impl OneBlockFile {
    /// Parses a canonical filename. Strict: every field must match the
    /// grammar or the whole name is rejected.
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidFileName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = name.splitn(6, '-');
        let num_part = parts.next().ok_or_else(|| invalid("missing block number"))?;
        let time_part = parts.next().ok_or_else(|| invalid("missing timestamp"))?;
        let id_part = parts.next().ok_or_else(|| invalid("missing id"))?;
        let previous_part = parts.next().ok_or_else(|| invalid("missing previous id"))?;
        let lib_part = parts.next().ok_or_else(|| invalid("missing lib num"))?;
        let suffix_part = parts.next().ok_or_else(|| invalid("missing suffix"))?;

        if num_part.len() != 11 || !num_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("block number must be 11 digits"));
        }
        let num: u64 = num_part.parse().map_err(|_| invalid("block number out of range"))?;

        let block_time = parse_block_time(time_part).ok_or_else(|| invalid("malformed timestamp"))?;

        if !is_hex(id_part) {
            return Err(invalid("id must be lowercase hex"));
        }
        if !is_hex(previous_part) {
            return Err(invalid("previous id must be lowercase hex"));
        }

        if lib_part.is_empty() || !lib_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("lib num must be digits"));
        }
        let lib_num: u64 = lib_part.parse().map_err(|_| invalid("lib num out of range"))?;

        validate_one_block_suffix(suffix_part)
            .map_err(|_| invalid("suffix must match [\\w-]+"))?;

        Ok(Self {
            canonical_name: name.to_string(),
            num,
            id: id_part.to_string(),
            previous_id: previous_part.to_string(),
            block_time,
            lib_num,
            suffix: suffix_part.to_string(),
            payload: None,
        })
    }

    /// Builds the file for a live block, memoizing its encoded record.
    ///
    /// The block time is truncated to centiseconds so the name and the
    /// in-memory state agree.
    pub fn from_block(block: &Block, suffix: &str) -> Self {
        let block_time = truncate_to_centis(block.timestamp);
        let canonical_name = format!(
            "{:011}-{}-{}-{}-{}-{}",
            block.num,
            format_block_time(block_time),
            block.id,
            block.previous_id,
            block.lib_num,
            suffix,
        );
        Self {
            canonical_name,
            num: block.num,
            id: block.id.clone(),
            previous_id: block.previous_id.clone(),
            block_time,
            lib_num: block.lib_num,
            suffix: suffix.to_string(),
            payload: Some(common::codec::encode_block(block)),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.canonical_name
    }
}

/// A writer-identity tag: non-empty, `[0-9A-Za-z_-]` only.
pub fn validate_one_block_suffix(suffix: &str) -> Result<()> {
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
        return Err(Error::InvalidSuffix(suffix.to_string()));
    }
    Ok(())
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn truncate_to_centis(time: DateTime<Utc>) -> DateTime<Utc> {
    let millis = time.timestamp_millis();
    DateTime::<Utc>::from_timestamp_millis(millis - millis.rem_euclid(10))
        .unwrap_or(time)
}

fn format_block_time(time: DateTime<Utc>) -> String {
    let centis = time.timestamp_subsec_millis() / 10;
    format!("{}.{:02}", time.format("%Y%m%dT%H%M%S"), centis)
}

fn parse_block_time(s: &str) -> Option<DateTime<Utc>> {
    // %Y%m%dT%H%M%S.cc with exactly two fractional digits
    let bytes = s.as_bytes();
    if bytes.len() != 18 || bytes[8] != b'T' || bytes[15] != b'.' {
        return None;
    }
    if !bytes[16].is_ascii_digit() || !bytes[17].is_ascii_digit() {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(&s[..15], "%Y%m%dT%H%M%S").ok()?;
    let centis: i64 = s[16..18].parse().ok()?;
    DateTime::<Utc>::from_timestamp_millis(naive.and_utc().timestamp_millis() + centis * 10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn should_round_trip_canonical_name() {
        let name = "00000000001-20210728T105016.01-00000001a-00000000a-0-suffix";
        let file = OneBlockFile::parse(name).unwrap();
        assert_eq!(file.num, 1);
        assert_eq!(file.id, "00000001a");
        assert_eq!(file.previous_id, "00000000a");
        assert_eq!(file.lib_num, 0);
        assert_eq!(file.suffix, "suffix");
        assert_eq!(file.canonical_name, name);

        let rebuilt = OneBlockFile::from_block(
            &common::Block {
                num: file.num,
                id: file.id.clone(),
                previous_id: file.previous_id.clone(),
                timestamp: file.block_time,
                lib_num: file.lib_num,
                payload: bytes::Bytes::new(),
            },
            &file.suffix,
        );
        assert_eq!(rebuilt.canonical_name, name);
    }

    #[test]
    fn should_keep_dashes_in_suffix() {
        let name = "00000000002-20210728T105016.02-00000002a-00000001a-1-read-01";
        let file = OneBlockFile::parse(name).unwrap();
        assert_eq!(file.suffix, "read-01");
    }

    #[test]
    fn should_parse_timestamp_centiseconds() {
        let name = "00000000003-20210728T105016.25-00000003a-00000002a-1-x";
        let file = OneBlockFile::parse(name).unwrap();
        let expected = Utc
            .with_ymd_and_hms(2021, 7, 28, 10, 50, 16)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(250))
            .unwrap();
        assert_eq!(file.block_time, expected);
    }

    #[test]
    fn should_reject_malformed_names() {
        let bad = [
            "0000000001-20210728T105016.01-00000001a-00000000a-0-suffix", // 10-digit num
            "00000000001-20210728T105016.1-00000001a-00000000a-0-suffix", // 1-digit fraction
            "00000000001-20210728T105016.01-0000000XA-00000000a-0-suffix", // non-hex id
            "00000000001-20210728T105016.01-00000001a-00000000a-x-suffix", // non-numeric lib
            "00000000001-20210728T105016.01-00000001a-00000000a-0-",       // empty suffix
            "00000000001-20210728T105016.01-00000001a-00000000a-0",        // missing suffix
        ];
        for name in bad {
            assert!(OneBlockFile::parse(name).is_err(), "accepted {:?}", name);
        }
    }

    #[test]
    fn should_truncate_block_time_when_formatting() {
        let timestamp = Utc
            .with_ymd_and_hms(2021, 7, 28, 10, 50, 16)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(257))
            .unwrap();
        let block = common::Block {
            num: 42,
            id: "2a".to_string(),
            previous_id: "29".to_string(),
            timestamp,
            lib_num: 40,
            payload: bytes::Bytes::new(),
        };
        let file = OneBlockFile::from_block(&block, "x");
        assert_eq!(file.canonical_name, "00000000042-20210728T105016.25-2a-29-40-x");

        let parsed = OneBlockFile::parse(&file.canonical_name).unwrap();
        assert_eq!(parsed.block_time, file.block_time);
    }

    #[test]
    fn should_validate_suffix() {
        assert!(validate_one_block_suffix("reader-01_a").is_ok());
        assert!(validate_one_block_suffix("").is_err());
        assert!(validate_one_block_suffix("has space").is_err());
        assert!(validate_one_block_suffix("dot.dot").is_err());
    }
}
