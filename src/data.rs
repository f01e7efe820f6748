//! Dataset loading and preprocessing.
//!
//! Datasets are plain-text matrices: one example per line, values separated
//! by commas or whitespace. Blank lines and lines starting with `#` are
//! skipped.

use crate::core::{RbmError, RbmResult};
use ndarray::Array2;
use std::path::Path;

/// Load a dataset file into an `(examples, features)` matrix.
pub fn load_matrix(path: &Path) -> RbmResult<Array2<f32>> {
    let text = std::fs::read_to_string(path)?;
    parse_matrix(&text)
}

/// Parse the text format described in the module docs.
///
/// # Errors
/// - `Parse` for a value that is not a number
/// - `IncompatibleShape` when rows have different lengths
pub fn parse_matrix(text: &str) -> RbmResult<Array2<f32>> {
    let mut values = Vec::new();
    let mut n_cols: Option<usize> = None;
    let mut n_rows = 0;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let before = values.len();
        for token in line
            .split(|ch: char| ch == ',' || ch.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let value: f32 = token.parse().map_err(|_| {
                RbmError::Parse(format!("line {}: invalid value {:?}", line_no + 1, token))
            })?;
            values.push(value);
        }

        let width = values.len() - before;
        match n_cols {
            None => n_cols = Some(width),
            Some(expected) if expected != width => {
                return Err(RbmError::IncompatibleShape(format!(
                    "line {}: expected {} values, got {}",
                    line_no + 1,
                    expected,
                    width
                )));
            }
            Some(_) => {}
        }
        n_rows += 1;
    }

    let n_cols = n_cols.unwrap_or(0);
    Array2::from_shape_vec((n_rows, n_cols), values)
        .map_err(|e| RbmError::IncompatibleShape(e.to_string()))
}

/// Map every value to 1 if it is strictly above `threshold`, else 0.
pub fn binarize(data: &Array2<f32>, threshold: f32) -> Array2<f32> {
    data.mapv(|x| if x > threshold { 1.0 } else { 0.0 })
}

/// Largest grid side accepted by [`bars_and_stripes`] (65534 images).
pub const MAX_BARS_SIDE: usize = 15;

/// Every distinct bars-and-stripes image on a `side × side` grid.
///
/// A bar image fills whole rows, a stripe image fills whole columns. Each
/// subset of rows (or columns) gives one image; the blank and full images
/// appear in both families and are kept once, giving `2^(side+1) - 2` rows.
///
/// # Errors
/// `InvalidConfig` unless `1 <= side <= MAX_BARS_SIDE`.
pub fn bars_and_stripes(side: usize) -> RbmResult<Array2<f32>> {
    if side == 0 || side > MAX_BARS_SIDE {
        return Err(RbmError::InvalidConfig(format!(
            "bars-and-stripes side must be in 1..={MAX_BARS_SIDE}, got {side}"
        )));
    }

    let n_pixels = side * side;
    let mut rows: Vec<Vec<f32>> = Vec::new();

    for mask in 0..(1usize << side) {
        let bars: Vec<f32> = (0..n_pixels)
            .map(|p| if mask & (1 << (p / side)) != 0 { 1.0 } else { 0.0 })
            .collect();
        let stripes: Vec<f32> = (0..n_pixels)
            .map(|p| if mask & (1 << (p % side)) != 0 { 1.0 } else { 0.0 })
            .collect();

        let uniform = mask == 0 || mask == (1 << side) - 1;
        rows.push(bars);
        if !uniform {
            rows.push(stripes);
        }
    }

    let n_rows = rows.len();
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n_rows, n_pixels), flat)
        .map_err(|e| RbmError::IncompatibleShape(e.to_string()))
}
