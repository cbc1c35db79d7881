//! `Range` header parsing for the stream handler.
//!
//! Supports the three single-range forms browsers send: `bytes=N-`,
//! `bytes=N-M` and `bytes=-N`. Multipart ranges are not served.

/// Inclusive byte range resolved against a concrete file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
}

impl ResolvedRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// Syntactically invalid header: reply 400.
    Malformed,
    /// Valid syntax but no satisfiable byte: reply 416.
    Unsatisfiable,
}

/// Resolve an optional `Range` header against `size`. `Ok(None)` means the
/// whole file (no header present).
pub fn resolve_range(header: Option<&str>, size: u64) -> Result<Option<ResolvedRange>, RangeError> {
    let Some(header) = header else {
        return Ok(None);
    };

    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Malformed)?
        .trim();
    if spec.contains(',') {
        // Single-range only; a multipart request is out of contract.
        return Err(RangeError::Malformed);
    }

    let (raw_start, raw_end) = spec.split_once('-').ok_or(RangeError::Malformed)?;
    let raw_start = raw_start.trim();
    let raw_end = raw_end.trim();

    let range = match (raw_start.is_empty(), raw_end.is_empty()) {
        // bytes=-N : last N bytes.
        (true, false) => {
            let suffix: u64 = raw_end.parse().map_err(|_| RangeError::Malformed)?;
            if suffix == 0 || size == 0 {
                return Err(RangeError::Unsatisfiable);
            }
            ResolvedRange {
                start: size.saturating_sub(suffix),
                end: size - 1,
            }
        }
        // bytes=N- : from N to the end.
        (false, true) => {
            let start: u64 = raw_start.parse().map_err(|_| RangeError::Malformed)?;
            if start >= size {
                return Err(RangeError::Unsatisfiable);
            }
            ResolvedRange {
                start,
                end: size - 1,
            }
        }
        // bytes=N-M : inclusive, end clamped to the file.
        (false, false) => {
            let start: u64 = raw_start.parse().map_err(|_| RangeError::Malformed)?;
            let end: u64 = raw_end.parse().map_err(|_| RangeError::Malformed)?;
            if start > end || start >= size {
                return Err(RangeError::Unsatisfiable);
            }
            ResolvedRange {
                start,
                end: end.min(size - 1),
            }
        }
        (true, true) => return Err(RangeError::Malformed),
    };

    Ok(Some(range))
}
