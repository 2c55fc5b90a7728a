//! Parsing of the textual box produced by the data store's extent query,
//! e.g. `BOX(8155154.57 1865495.57,15038985.68 7087842.63)`.

use std::fmt;

use crate::bounds::Extent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input is not wrapped in `BOX( ... )`.
    NotABox { input: String },
    /// The box does not hold exactly four coordinates.
    TokenCount { found: usize },
    InvalidNumber { token: String },
    /// Minimum corner lies above or right of the maximum corner.
    Inverted,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::NotABox { input } => write!(f, "expected BOX(...), got {input:?}"),
            ParseError::TokenCount { found } => {
                write!(f, "expected 4 coordinates in box, found {found}")
            }
            ParseError::InvalidNumber { token } => write!(f, "invalid coordinate {token:?}"),
            ParseError::Inverted => write!(f, "box minimum exceeds its maximum"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses `BOX(x_min y_min,x_max y_max)` into an [`Extent`].
///
/// Never substitutes defaults: any missing or non-finite coordinate is an error.
pub fn parse_box(text: &str) -> Result<Extent, ParseError> {
    let trimmed = text.trim();
    let inner = strip_box(trimmed).ok_or_else(|| ParseError::NotABox {
        input: trimmed.to_string(),
    })?;

    let tokens: Vec<&str> = inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() != 4 {
        return Err(ParseError::TokenCount {
            found: tokens.len(),
        });
    }

    let mut coords = [0.0f64; 4];
    for (slot, token) in coords.iter_mut().zip(&tokens) {
        *slot = token
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ParseError::InvalidNumber {
                token: token.to_string(),
            })?;
    }

    let extent = Extent::new(coords[0], coords[1], coords[2], coords[3]);
    if !extent.is_well_formed() {
        return Err(ParseError::Inverted);
    }
    Ok(extent)
}

fn strip_box(text: &str) -> Option<&str> {
    let prefix = text.get(..4)?;
    if !prefix.eq_ignore_ascii_case("BOX(") {
        return None;
    }
    text[4..].strip_suffix(')')
}
