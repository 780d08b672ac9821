//! In-memory columnar table.
//!
//! A [`Table`] is a set of equally-long typed columns with per-cell
//! nullability. It is the canonical representation every write normalizes
//! into and every read materializes out of; determinism of the content
//! digest (CID derivation) rests on its canonical row rendering.

use crate::schema::{ColumnType, Field, Schema};
use stowage_core::{Error, Result};

/// Typed cell value used at the table boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Utf8(String),
    Int64(i64),
    Float64(f64),
    Bool(bool),
}

impl Cell {
    /// Canonical text used in the content digest. `Null` renders as `∅` so
    /// it cannot collide with a literal empty string.
    pub fn canonical(&self) -> String {
        match self {
            Cell::Null => "\u{2205}".to_string(),
            Cell::Utf8(s) => s.clone(),
            Cell::Int64(v) => v.to_string(),
            // {:?} keeps the fractional part ("1.0", not "1")
            Cell::Float64(v) => format!("{v:?}"),
            Cell::Bool(v) => v.to_string(),
        }
    }
}

/// Column storage, one vector per logical type.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Utf8(Vec<Option<String>>),
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Utf8(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Utf8(_) => ColumnType::Utf8,
            ColumnData::Int64(_) => ColumnType::Int64,
            ColumnData::Float64(_) => ColumnType::Float64,
            ColumnData::Bool(_) => ColumnType::Bool,
        }
    }

    /// Empty storage of the given type.
    pub fn empty(ty: ColumnType) -> ColumnData {
        match ty {
            ColumnType::Utf8 => ColumnData::Utf8(Vec::new()),
            ColumnType::Int64 => ColumnData::Int64(Vec::new()),
            ColumnType::Float64 => ColumnData::Float64(Vec::new()),
            ColumnType::Bool => ColumnData::Bool(Vec::new()),
        }
    }

    pub fn cell(&self, row: usize) -> Cell {
        match self {
            ColumnData::Utf8(v) => v[row].clone().map_or(Cell::Null, Cell::Utf8),
            ColumnData::Int64(v) => v[row].map_or(Cell::Null, Cell::Int64),
            ColumnData::Float64(v) => v[row].map_or(Cell::Null, Cell::Float64),
            ColumnData::Bool(v) => v[row].map_or(Cell::Null, Cell::Bool),
        }
    }

    fn push_cell(&mut self, cell: Cell) -> Result<()> {
        match (self, cell) {
            (ColumnData::Utf8(v), Cell::Utf8(s)) => v.push(Some(s)),
            (ColumnData::Utf8(v), Cell::Null) => v.push(None),
            (ColumnData::Int64(v), Cell::Int64(x)) => v.push(Some(x)),
            (ColumnData::Int64(v), Cell::Null) => v.push(None),
            (ColumnData::Float64(v), Cell::Float64(x)) => v.push(Some(x)),
            // integers widen into float columns
            (ColumnData::Float64(v), Cell::Int64(x)) => v.push(Some(x as f64)),
            (ColumnData::Float64(v), Cell::Null) => v.push(None),
            (ColumnData::Bool(v), Cell::Bool(x)) => v.push(Some(x)),
            (ColumnData::Bool(v), Cell::Null) => v.push(None),
            (data, cell) => {
                return Err(Error::SchemaMismatch(format!(
                    "cannot store {cell:?} in {} column",
                    data.column_type().as_str()
                )))
            }
        }
        Ok(())
    }

    fn take_rows(&self, rows: &[usize]) -> ColumnData {
        match self {
            ColumnData::Utf8(v) => ColumnData::Utf8(rows.iter().map(|&r| v[r].clone()).collect()),
            ColumnData::Int64(v) => ColumnData::Int64(rows.iter().map(|&r| v[r]).collect()),
            ColumnData::Float64(v) => ColumnData::Float64(rows.iter().map(|&r| v[r]).collect()),
            ColumnData::Bool(v) => ColumnData::Bool(rows.iter().map(|&r| v[r]).collect()),
        }
    }

    /// Rough in-memory footprint, used for size-bounded chunking.
    fn estimated_bytes(&self) -> u64 {
        match self {
            ColumnData::Utf8(v) => v
                .iter()
                .map(|s| s.as_ref().map_or(1, |s| s.len() as u64 + 1))
                .sum(),
            ColumnData::Int64(v) => v.len() as u64 * 8,
            ColumnData::Float64(v) => v.len() as u64 * 8,
            ColumnData::Bool(v) => v.len() as u64,
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Column {
        Column {
            name: name.into(),
            data,
        }
    }

    pub fn field(&self) -> Field {
        Field::new(self.name.clone(), self.data.column_type())
    }
}

/// A set of equally-long columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    row_count: usize,
}

impl Table {
    pub fn new() -> Table {
        Table::default()
    }

    /// Build a table from complete columns. All columns must share a length
    /// and names must be unique.
    pub fn from_columns(columns: Vec<Column>) -> Result<Table> {
        let row_count = columns.first().map_or(0, |c| c.data.len());
        for col in &columns {
            if col.data.len() != row_count {
                return Err(Error::SchemaMismatch(format!(
                    "column {} has {} rows, expected {}",
                    col.name,
                    col.data.len(),
                    row_count
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate column name: {}",
                    col.name
                )));
            }
        }
        Ok(Table { columns, row_count })
    }

    /// Empty table with the given schema.
    pub fn with_schema(schema: &Schema) -> Table {
        let columns = schema
            .fields
            .iter()
            .map(|f| Column::new(f.name.clone(), ColumnData::empty(f.ty)))
            .collect();
        Table {
            columns,
            row_count: 0,
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn schema(&self) -> Schema {
        Schema::new(self.columns.iter().map(Column::field).collect())
    }

    pub fn cell(&self, column: &str, row: usize) -> Option<Cell> {
        if row >= self.row_count {
            return None;
        }
        self.column(column).map(|c| c.data.cell(row))
    }

    /// Append one row of cells, in schema order.
    pub fn push_row(&mut self, cells: Vec<Cell>) -> Result<()> {
        if cells.len() != self.columns.len() {
            return Err(Error::SchemaMismatch(format!(
                "row has {} cells, table has {} columns",
                cells.len(),
                self.columns.len()
            )));
        }
        for (col, cell) in self.columns.iter_mut().zip(cells) {
            col.data.push_cell(cell)?;
        }
        self.row_count += 1;
        Ok(())
    }

    /// Project onto the named columns, preserving request order.
    pub fn project(&self, columns: &[String]) -> Result<Table> {
        let mut selected = Vec::with_capacity(columns.len());
        for name in columns {
            match self.column(name) {
                Some(col) => selected.push(col.clone()),
                None => return Err(Error::NotFound(format!("column not found: {name}"))),
            }
        }
        Ok(Table {
            columns: selected,
            row_count: self.row_count,
        })
    }

    /// New table containing the given row indices, in order.
    pub fn take_rows(&self, rows: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.data.take_rows(rows)))
            .collect();
        Table {
            columns,
            row_count: rows.len(),
        }
    }

    /// Contiguous row slice `[start, start+len)`, clamped to the table.
    pub fn slice(&self, start: usize, len: usize) -> Table {
        let end = (start + len).min(self.row_count);
        let rows: Vec<usize> = (start.min(end)..end).collect();
        self.take_rows(&rows)
    }

    /// Stable sort by one column. Nulls order first ascending, last
    /// descending.
    pub fn sort_by(&self, column: &str, descending: bool) -> Result<Table> {
        let col = self
            .column(column)
            .ok_or_else(|| Error::NotFound(format!("column not found: {column}")))?;
        let mut rows: Vec<usize> = (0..self.row_count).collect();
        rows.sort_by(|&a, &b| {
            let ord = compare_cells(&col.data.cell(a), &col.data.cell(b));
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(self.take_rows(&rows))
    }

    /// Canonical rendering of the first `limit` rows, used for the content
    /// digest. Deterministic: schema order, one line per row, unit separator
    /// between cells.
    pub fn canonical_prefix(&self, limit: usize) -> String {
        let rows = limit.min(self.row_count);
        let mut out = String::new();
        for row in 0..rows {
            for (i, col) in self.columns.iter().enumerate() {
                if i > 0 {
                    out.push('\u{1f}');
                }
                out.push_str(&col.data.cell(row).canonical());
            }
            out.push('\n');
        }
        out
    }

    /// Rough in-memory footprint in bytes.
    pub fn estimated_bytes(&self) -> u64 {
        self.columns.iter().map(|c| c.data.estimated_bytes()).sum()
    }

    /// Append all rows of `other`; schemas must match exactly.
    pub fn append(&mut self, other: &Table) -> Result<()> {
        if self.schema() != other.schema() {
            return Err(Error::SchemaMismatch(
                "cannot append table with different schema".into(),
            ));
        }
        for row in 0..other.row_count {
            let cells = other.columns.iter().map(|c| c.data.cell(row)).collect();
            self.push_row(cells)?;
        }
        Ok(())
    }

}

/// Total order over cells of one column. Mixed numeric types compare by
/// value; otherwise ordering falls back to the canonical rendering.
pub(crate) fn compare_cells(a: &Cell, b: &Cell) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Cell::Null, Cell::Null) => Ordering::Equal,
        (Cell::Null, _) => Ordering::Less,
        (_, Cell::Null) => Ordering::Greater,
        (Cell::Int64(x), Cell::Int64(y)) => x.cmp(y),
        (Cell::Float64(x), Cell::Float64(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Cell::Int64(x), Cell::Float64(y)) => {
            (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (Cell::Float64(x), Cell::Int64(y)) => {
            x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
        }
        (Cell::Utf8(x), Cell::Utf8(y)) => x.cmp(y),
        (Cell::Bool(x), Cell::Bool(y)) => x.cmp(y),
        (x, y) => x.canonical().cmp(&y.canonical()),
    }
}
