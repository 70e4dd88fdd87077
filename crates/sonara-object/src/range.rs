//! Byte-range parsing and resolution for the signed GET path.
//!
//! Only single ranges are handled; multipart range requests are rare in
//! audio players and callers treat an unparseable header as "no range",
//! falling back to the full body.

/// A single byte range as requested, before resolution against the object
/// size. Offsets follow RFC 9110: inclusive, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-`: from an offset to the end.
    From(u64),
    /// `bytes=start-end`: an inclusive span.
    Span(u64, u64),
    /// `bytes=-n`: the final `n` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Parse a `Range` header value. Returns `None` for anything other
    /// than a well-formed single `bytes=` range.
    #[must_use]
    pub fn parse_header(raw: &str) -> Option<Self> {
        let spec = raw.trim().strip_prefix("bytes=")?;
        if spec.contains(',') {
            return None;
        }
        let (start, end) = spec.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());
        match (start.is_empty(), end.is_empty()) {
            (true, false) => end.parse().ok().map(Self::Suffix),
            (false, true) => start.parse().ok().map(Self::From),
            (false, false) => {
                let start: u64 = start.parse().ok()?;
                let end: u64 = end.parse().ok()?;
                (start <= end).then_some(Self::Span(start, end))
            }
            (true, true) => None,
        }
    }

    /// Resolve against an object of `total_size` bytes into inclusive
    /// `(first, last)` offsets. `None` means the range is unsatisfiable.
    #[must_use]
    pub fn resolve(self, total_size: u64) -> Option<(u64, u64)> {
        if total_size == 0 {
            return None;
        }
        let last = total_size - 1;
        match self {
            Self::From(start) if start <= last => Some((start, last)),
            Self::Span(start, end) if start <= last => Some((start, end.min(last))),
            Self::Suffix(n) if n > 0 => Some((total_size.saturating_sub(n), last)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_three_single_range_forms() {
        assert_eq!(ByteRange::parse_header("bytes=0-499"), Some(ByteRange::Span(0, 499)));
        assert_eq!(ByteRange::parse_header("bytes=500-"), Some(ByteRange::From(500)));
        assert_eq!(ByteRange::parse_header("bytes=-500"), Some(ByteRange::Suffix(500)));
        assert_eq!(ByteRange::parse_header(" bytes=4-8 "), Some(ByteRange::Span(4, 8)));
    }

    #[test]
    fn rejects_multipart_other_units_and_garbage() {
        assert_eq!(ByteRange::parse_header("bytes=0-1,5-6"), None);
        assert_eq!(ByteRange::parse_header("items=0-5"), None);
        assert_eq!(ByteRange::parse_header("bytes=-"), None);
        assert_eq!(ByteRange::parse_header("bytes=9-4"), None);
        assert_eq!(ByteRange::parse_header("bytes=a-b"), None);
    }

    #[test]
    fn resolution_clamps_to_the_object() {
        assert_eq!(ByteRange::Span(4, 8).resolve(9), Some((4, 8)));
        assert_eq!(ByteRange::Span(4, 100).resolve(9), Some((4, 8)));
        assert_eq!(ByteRange::From(5).resolve(9), Some((5, 8)));
        assert_eq!(ByteRange::Suffix(4).resolve(9), Some((5, 8)));
        assert_eq!(ByteRange::Suffix(100).resolve(9), Some((0, 8)));
    }

    #[test]
    fn out_of_bounds_ranges_are_unsatisfiable() {
        assert_eq!(ByteRange::From(9).resolve(9), None);
        assert_eq!(ByteRange::Span(9, 20).resolve(9), None);
        assert_eq!(ByteRange::Suffix(0).resolve(9), None);
        assert_eq!(ByteRange::Span(0, 0).resolve(0), None);
    }
}
