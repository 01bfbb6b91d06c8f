//! Matrix layout and cell placement.
//!
//! A matrix spreads one logical instance over a `rows × cols` grid. Every
//! non-excluded cell gets its own module instance.

use serde::Serialize;
use serde_json::Value;

use vismod_protocol::{MethodCall, MethodSpec};

pub const MIN_DIMENSION: u32 = 1;
pub const MAX_DIMENSION: u32 = 5;

/// Border style applied to cells when the layout asks for one.
pub const CELL_BORDER: &str = "1px solid white";

/// Name of the constructor call that carries the layout.
pub const MATRIX_METHOD: &str = "matrix";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixLayout {
    pub rows: u32,
    pub cols: u32,
    pub border: bool,
    /// 0-indexed row-major positions that get no instance.
    pub excluded_cells: Vec<usize>,
}

impl Default for MatrixLayout {
    fn default() -> Self {
        Self {
            rows: 1,
            cols: 1,
            border: false,
            excluded_cells: Vec::new(),
        }
    }
}

/// Where one cell sits inside the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellPlacement {
    pub index: usize,
    pub row: u32,
    pub col: u32,
    pub top: String,
    pub left: String,
    pub width: String,
    pub height: String,
    pub z_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border: Option<String>,
}

impl MatrixLayout {
    pub fn new(rows: u32, cols: u32) -> Self {
        Self {
            rows: clamp_dimension(rows),
            cols: clamp_dimension(cols),
            ..Self::default()
        }
    }

    /// Build a layout from a `matrix` value.
    ///
    /// Accepts `[rows, cols]` or `{rows, cols, border, excludedCells}`.
    /// Anything else yields the 1×1 default.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Array(items) => {
                let rows = items.first().and_then(as_dimension).unwrap_or(1);
                let cols = items.get(1).and_then(as_dimension).unwrap_or(1);
                Self::new(rows, cols)
            }
            Value::Object(map) => {
                let mut layout = Self::new(
                    map.get("rows").and_then(as_dimension).unwrap_or(1),
                    map.get("cols").and_then(as_dimension).unwrap_or(1),
                );
                layout.border = map.get("border").and_then(Value::as_bool).unwrap_or(false);
                layout.excluded_cells = map
                    .get("excludedCells")
                    .and_then(Value::as_array)
                    .map(|cells| {
                        cells
                            .iter()
                            .filter_map(Value::as_u64)
                            .map(|c| c as usize)
                            .collect()
                    })
                    .unwrap_or_default();
                layout
            }
            _ => Self::default(),
        }
    }

    /// Resolve the layout from a track's constructor calls.
    ///
    /// The last `matrix` call wins. A bare value and named options are both
    /// accepted.
    pub fn from_constructor(calls: &[MethodCall]) -> Self {
        let Some(call) = calls.iter().rev().find(|c| c.name == MATRIX_METHOD) else {
            return Self::default();
        };
        match &call.value {
            Some(value) if call.options.is_empty() => Self::from_value(value),
            _ => Self::from_value(&call.options_value(Some(&matrix_spec()))),
        }
    }

    pub fn cell_count(&self) -> usize {
        (self.rows * self.cols) as usize
    }

    fn is_excluded(&self, index: usize) -> bool {
        self.excluded_cells.contains(&index)
    }

    /// Placements for every non-excluded cell, in row-major order.
    pub fn cells(&self, z_index: u32) -> Vec<CellPlacement> {
        let width = 100.0 / f64::from(self.cols);
        let height = 100.0 / f64::from(self.rows);

        (0..self.cell_count())
            .filter(|index| !self.is_excluded(*index))
            .map(|index| {
                let row = index as u32 / self.cols;
                let col = index as u32 % self.cols;
                CellPlacement {
                    index,
                    row,
                    col,
                    top: format_percent(height * f64::from(row)),
                    left: format_percent(width * f64::from(col)),
                    width: format_percent(width),
                    height: format_percent(height),
                    z_index,
                    border: self.border.then(|| CELL_BORDER.to_string()),
                }
            })
            .collect()
    }
}

/// Declared options of the built-in `matrix` method.
pub fn matrix_spec() -> MethodSpec {
    use serde_json::json;
    use vismod_protocol::OptionSpec;

    MethodSpec::new(MATRIX_METHOD)
        .with_option(OptionSpec::new("rows", "number", json!(1)))
        .with_option(OptionSpec::new("cols", "number", json!(1)))
        .with_option(OptionSpec::new("border", "boolean", json!(false)))
        .with_option(OptionSpec::new("excludedCells", "array", json!([])))
}

fn clamp_dimension(value: u32) -> u32 {
    value.clamp(MIN_DIMENSION, MAX_DIMENSION)
}

fn as_dimension(value: &Value) -> Option<u32> {
    value
        .as_u64()
        .map(|v| v.min(u64::from(u32::MAX)) as u32)
        .or_else(|| value.as_f64().map(|v| v.max(0.0).round() as u32))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Format a percentage with at most two decimals, trailing zeros trimmed.
pub fn format_percent(value: f64) -> String {
    let fixed = format!("{value:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}%")
}
