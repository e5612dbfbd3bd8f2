//! A1-notation helpers shared by the endpoint backends and the propagators.

use crate::EndpointError;

/// Name of the zero-based column `index` ("A", "B", ..., "Z", "AA", ...).
pub fn column_name(index: usize) -> String {
    let mut n = index + 1;
    let mut name = String::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        name.insert(0, (b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    name
}

/// One corner of a range. Either coordinate may be unbounded, as in the
/// column range `A:C` (no rows) or the row range `1:1` (no columns).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    /// Zero-based column, if bounded.
    pub col: Option<usize>,
    /// Zero-based row, if bounded.
    pub row: Option<usize>,
}

/// A parsed A1 range: `sheet!start:end`. A single-cell range has equal
/// corners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRef {
    pub sheet: String,
    pub start: CellRef,
    pub end: CellRef,
}

/// Parse an A1 range of the forms `Sheet1!A1:C5`, `Sheet1!A:C`, `Sheet1!1:1`
/// or `Sheet1!B2`.
pub fn parse_range(range: &str) -> Result<RangeRef, EndpointError> {
    let (sheet, cells) = range
        .split_once('!')
        .ok_or_else(|| EndpointError::InvalidRange(range.to_string()))?;
    if sheet.is_empty() || cells.is_empty() {
        return Err(EndpointError::InvalidRange(range.to_string()));
    }

    let (start, end) = match cells.split_once(':') {
        Some((a, b)) => (parse_cell(a, range)?, parse_cell(b, range)?),
        None => {
            let cell = parse_cell(cells, range)?;
            (cell, cell)
        }
    };

    Ok(RangeRef {
        sheet: sheet.to_string(),
        start,
        end,
    })
}

fn parse_cell(token: &str, range: &str) -> Result<CellRef, EndpointError> {
    let letters: String = token.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let digits = &token[letters.len()..];

    if token.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(EndpointError::InvalidRange(range.to_string()));
    }

    let col = if letters.is_empty() {
        None
    } else {
        let mut n = 0usize;
        for c in letters.chars() {
            n = n * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
        }
        Some(n - 1)
    };

    let row = if digits.is_empty() {
        None
    } else {
        let n: usize = digits
            .parse()
            .map_err(|_| EndpointError::InvalidRange(range.to_string()))?;
        if n == 0 {
            return Err(EndpointError::InvalidRange(range.to_string()));
        }
        Some(n - 1)
    };

    if col.is_none() && row.is_none() {
        return Err(EndpointError::InvalidRange(range.to_string()));
    }

    Ok(CellRef { col, row })
}
