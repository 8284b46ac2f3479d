//! Claim-date formatting and the reverse-time key encoding.
//!
//! Claim dates are RFC-3339 UTC at second precision, a fixed-width form, so
//! that a digit-wise complement of the string sorts in reverse
//! chronological order within an index key prefix.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::TypeError;

/// Format a claim date: RFC-3339 UTC, second precision, `Z` suffix.
pub fn format_claim_date(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a claim date produced by [`format_claim_date`] (or any RFC-3339).
pub fn parse_claim_date(s: &str) -> Result<DateTime<Utc>, TypeError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TypeError::InvalidDate(format!("{s}: {e}")))
}

/// Encode a fixed-width timestamp so lexicographic order is reverse
/// chronological: prefix `rt`, every ASCII digit replaced by its nines
/// complement, all other bytes unchanged.
pub fn reverse_time(date: &str) -> String {
    let mut out = String::with_capacity(date.len() + 2);
    out.push_str("rt");
    for b in date.bytes() {
        out.push(reverse_byte(b) as char);
    }
    out
}

/// Invert [`reverse_time`]. Returns the input unchanged if it does not
/// carry the `rt` prefix.
pub fn unreverse_time(s: &str) -> String {
    let Some(body) = s.strip_prefix("rt") else {
        return s.to_string();
    };
    body.bytes().map(|b| reverse_byte(b) as char).collect()
}

fn reverse_byte(b: u8) -> u8 {
    if b.is_ascii_digit() {
        b'0' + (b'9' - b)
    } else {
        b
    }
}
