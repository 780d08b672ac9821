//! Comparison predicates applied during scans.
//!
//! Filters are conjunctive: a row survives when every filter accepts it.
//! Comparisons against `Null` cells are always false (SQL-style), except
//! explicit equality with [`Scalar::Null`].

use crate::table::{compare_cells, Cell, Table};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use stowage_core::{Error, Result};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn parse(s: &str) -> Result<CmpOp> {
        match s {
            "=" | "==" => Ok(CmpOp::Eq),
            "!=" | "<>" => Ok(CmpOp::Ne),
            "<" => Ok(CmpOp::Lt),
            "<=" => Ok(CmpOp::Le),
            ">" => Ok(CmpOp::Gt),
            ">=" => Ok(CmpOp::Ge),
            other => Err(Error::InvalidArgument(format!(
                "unknown comparison operator: {other}"
            ))),
        }
    }

    fn accepts(&self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Literal comparison value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl Scalar {
    fn as_cell(&self) -> Cell {
        match self {
            Scalar::Null => Cell::Null,
            Scalar::Bool(v) => Cell::Bool(*v),
            Scalar::Int64(v) => Cell::Int64(*v),
            Scalar::Float64(v) => Cell::Float64(*v),
            Scalar::Utf8(v) => Cell::Utf8(v.clone()),
        }
    }
}

/// One column comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: CmpOp,
    pub value: Scalar,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: CmpOp, value: Scalar) -> Filter {
        Filter {
            column: column.into(),
            op,
            value,
        }
    }

    /// Evaluate against one cell.
    pub fn accepts_cell(&self, cell: &Cell) -> bool {
        match (&self.value, cell) {
            // IS NULL / IS NOT NULL style checks
            (Scalar::Null, Cell::Null) => self.op == CmpOp::Eq,
            (Scalar::Null, _) => self.op == CmpOp::Ne,
            (_, Cell::Null) => false,
            (value, cell) => self.op.accepts(compare_cells(cell, &value.as_cell())),
        }
    }
}

/// Row indices of `table` that satisfy every filter.
///
/// Columns named by filters must exist; a missing column is an error rather
/// than an empty result, so typos fail loudly.
pub fn matching_rows(table: &Table, filters: &[Filter]) -> Result<Vec<usize>> {
    for f in filters {
        if table.column(&f.column).is_none() {
            return Err(Error::NotFound(format!(
                "filter column not found: {}",
                f.column
            )));
        }
    }
    let mut rows = Vec::new();
    'rows: for row in 0..table.row_count() {
        for f in filters {
            let cell = table
                .cell(&f.column, row)
                .expect("filter columns verified above");
            if !f.accepts_cell(&cell) {
                continue 'rows;
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Apply filters, returning the surviving rows as a new table.
pub fn apply_filters(table: &Table, filters: &[Filter]) -> Result<Table> {
    if filters.is_empty() {
        return Ok(table.clone());
    }
    let rows = matching_rows(table, filters)?;
    Ok(table.take_rows(&rows))
}
