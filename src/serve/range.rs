//! Range and date header helpers

use chrono::{DateTime, Utc};

/// One satisfiable byte range of a representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub length: u64,
}

impl ByteRange {
    /// Value for the `Content-Range` header.
    pub fn content_range(&self, size: u64) -> String {
        format!(
            "bytes {}-{}/{}",
            self.start,
            self.start + self.length - 1,
            size
        )
    }
}

/// Why a `Range` header could not be honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// Malformed header
    Invalid,
    /// Well formed, but no range overlaps the content
    NoOverlap,
}

/// Parses a `Range: bytes=...` header against a representation of `size` bytes.
///
/// Ranges starting past the end are skipped; if nothing is left the result is
/// `NoOverlap`. Ends past the last byte are clamped.
pub fn parse_range(header: &str, size: u64) -> Result<Vec<ByteRange>, RangeError> {
    let specs = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Invalid)?;

    let mut ranges = Vec::new();
    let mut no_overlap = false;
    for spec in specs.split(',') {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }
        let (start, end) = spec.split_once('-').ok_or(RangeError::Invalid)?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            // Suffix form: the last `end` bytes.
            let suffix: u64 = end.parse().map_err(|_| RangeError::Invalid)?;
            if suffix == 0 || size == 0 {
                no_overlap = true;
                continue;
            }
            let length = suffix.min(size);
            ranges.push(ByteRange {
                start: size - length,
                length,
            });
            continue;
        }

        let first: u64 = start.parse().map_err(|_| RangeError::Invalid)?;
        if first >= size {
            no_overlap = true;
            continue;
        }
        let last = if end.is_empty() {
            size - 1
        } else {
            let last: u64 = end.parse().map_err(|_| RangeError::Invalid)?;
            if first > last {
                return Err(RangeError::Invalid);
            }
            last.min(size - 1)
        };
        ranges.push(ByteRange {
            start: first,
            length: last - first + 1,
        });
    }

    if no_overlap && ranges.is_empty() {
        return Err(RangeError::NoOverlap);
    }
    Ok(ranges)
}

// == HTTP Dates ==
/// Formats a timestamp as an IMF-fixdate.
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an IMF-fixdate such as `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn range(start: u64, length: u64) -> ByteRange {
        ByteRange { start, length }
    }

    #[test]
    fn test_parse_simple_range() {
        assert_eq!(parse_range("bytes=0-4", 10), Ok(vec![range(0, 5)]));
        assert_eq!(parse_range("bytes=5-", 10), Ok(vec![range(5, 5)]));
        assert_eq!(parse_range("bytes=-3", 10), Ok(vec![range(7, 3)]));
    }

    #[test]
    fn test_parse_clamps_end() {
        assert_eq!(parse_range("bytes=8-100", 10), Ok(vec![range(8, 2)]));
        assert_eq!(parse_range("bytes=-100", 10), Ok(vec![range(0, 10)]));
    }

    #[test]
    fn test_parse_multiple() {
        assert_eq!(
            parse_range("bytes=0-1, 4-5", 10),
            Ok(vec![range(0, 2), range(4, 2)])
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_range("items=0-1", 10), Err(RangeError::Invalid));
        assert_eq!(parse_range("bytes=5-2", 10), Err(RangeError::Invalid));
        assert_eq!(parse_range("bytes=a-b", 10), Err(RangeError::Invalid));
        assert_eq!(parse_range("bytes=4", 10), Err(RangeError::Invalid));
    }

    #[test]
    fn test_parse_no_overlap() {
        assert_eq!(parse_range("bytes=10-20", 10), Err(RangeError::NoOverlap));
        assert_eq!(parse_range("bytes=-0", 10), Err(RangeError::NoOverlap));
        // A skipped range next to a good one is fine.
        assert_eq!(parse_range("bytes=50-60,0-0", 10), Ok(vec![range(0, 1)]));
    }

    #[test]
    fn test_content_range() {
        assert_eq!(range(2, 3).content_range(10), "bytes 2-4/10");
    }

    #[test]
    fn test_http_date_roundtrip() {
        let time = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        let text = format_http_date(time);
        assert_eq!(text, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&text), Some(time));
        assert_eq!(parse_http_date("not a date"), None);
    }
}
