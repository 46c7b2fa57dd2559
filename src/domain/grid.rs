//! Grid and example-pair types.
//!
//! A grid is a rectangular matrix of color cells in `0..=9`. A puzzle's
//! examples are ordered input/output pairs; some are held out as test cases.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Largest legal cell value.
pub const MAX_CELL: u8 = 9;

/// A rectangular matrix of cells.
pub type Grid = Vec<Vec<u8>>;

/// One input/output example of a puzzle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub input: Grid,
    pub output: Grid,
    /// Position within the puzzle, ascending.
    pub order: u32,
    /// Held out from the solver and used for scoring.
    #[serde(default)]
    pub is_test_case: bool,
}

impl Pair {
    pub fn new(input: Grid, output: Grid, order: u32) -> Self {
        Self {
            input,
            output,
            order,
            is_test_case: false,
        }
    }

    pub fn test_case(mut self) -> Self {
        self.is_test_case = true;
        self
    }
}

/// Exact cell-by-cell equality, including shape.
pub fn grids_equal(a: &Grid, b: &Grid) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(ra, rb)| ra == rb)
}

/// Check that a grid is non-empty, rectangular and uses legal cells.
pub fn validate_grid(grid: &Grid) -> Result<(), String> {
    let Some(first) = grid.first() else {
        return Err("grid has no rows".to_string());
    };
    if first.is_empty() {
        return Err("grid has no columns".to_string());
    }
    let width = first.len();
    for (i, row) in grid.iter().enumerate() {
        if row.len() != width {
            return Err(format!("row {} has width {}, expected {}", i, row.len(), width));
        }
        if let Some(cell) = row.iter().find(|c| **c > MAX_CELL) {
            return Err(format!("row {} contains illegal cell {}", i, cell));
        }
    }
    Ok(())
}

/// Interpret an arbitrary JSON value as a grid.
///
/// Returns `None` for anything that is not an array of arrays of small
/// non-negative integers. Shape is not checked here.
pub fn grid_from_value(value: &Value) -> Option<Grid> {
    value
        .as_array()?
        .iter()
        .map(|row| {
            row.as_array()?
                .iter()
                .map(|cell| cell.as_u64().and_then(|c| u8::try_from(c).ok()))
                .collect::<Option<Vec<u8>>>()
        })
        .collect()
}
