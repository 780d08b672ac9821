//! Parquet reading with projection pushdown.
//!
//! Columns are projected at the Parquet reader so unrequested data is never
//! decoded; filters are applied row-by-row during the scan, before rows are
//! materialized into the output table. Partitioned datasets are read by
//! walking their hive-style directory tree and restoring partition columns
//! from the directory names.

use crate::filter::Filter;
use crate::pq_err;
use crate::schema::{ColumnType, Field, Schema};
use crate::table::{Cell, Table};
use crate::write::NULL_PARTITION_TOKEN;
use parquet::basic::Type as PhysicalType;
use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::schema::types::{Type as SchemaType, TypePtr};
use serde_json::Value;
use std::fs::File;
use std::path::Path;
use stowage_core::{Error, Result};
use tracing::debug;

/// Options for a table read.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Columns to materialize; `None` means all.
    pub columns: Option<Vec<String>>,
    /// Conjunctive row filters, applied during the scan.
    pub filters: Vec<Filter>,
}

impl ReadOptions {
    pub fn all() -> ReadOptions {
        ReadOptions::default()
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> ReadOptions {
        self.columns = Some(columns);
        self
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> ReadOptions {
        self.filters = filters;
        self
    }
}

/// Infer the logical schema of a Parquet file written by this crate.
pub fn file_schema(path: impl AsRef<Path>) -> Result<Schema> {
    let file = File::open(path.as_ref())?;
    let reader = SerializedFileReader::new(file).map_err(pq_err)?;
    Ok(logical_schema(reader.metadata().file_metadata().schema()))
}

fn logical_schema(root: &SchemaType) -> Schema {
    let mut fields = Vec::new();
    for child in root.get_fields() {
        if let SchemaType::PrimitiveType { physical_type, .. } = child.as_ref() {
            let ty = match physical_type {
                PhysicalType::BYTE_ARRAY => ColumnType::Utf8,
                PhysicalType::INT64 => ColumnType::Int64,
                PhysicalType::DOUBLE => ColumnType::Float64,
                PhysicalType::BOOLEAN => ColumnType::Bool,
                // unsupported physical types are not materialized
                _ => continue,
            };
            fields.push(Field::new(child.name().to_string(), ty));
        }
    }
    Schema::new(fields)
}

/// Read one Parquet file into a table, with projection and filters.
pub fn read_table(path: impl AsRef<Path>, options: &ReadOptions) -> Result<Table> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(format!("{}", path.display())),
        _ => Error::Io(e),
    })?;
    let reader = SerializedFileReader::new(file).map_err(pq_err)?;
    let available = logical_schema(reader.metadata().file_metadata().schema());

    // Scan columns = requested ∪ filter columns, so filters can be applied
    // during the scan even when their column is not in the output.
    let requested: Vec<String> = match &options.columns {
        Some(cols) => cols.clone(),
        None => available.fields.iter().map(|f| f.name.clone()).collect(),
    };
    let mut scan_cols = requested.clone();
    for f in &options.filters {
        if !scan_cols.contains(&f.column) {
            scan_cols.push(f.column.clone());
        }
    }
    let scan_schema = available.project(&scan_cols)?;

    let projection = projection_type(reader.metadata().file_metadata().schema(), &scan_cols)?;
    let rows = reader.get_row_iter(Some(projection)).map_err(pq_err)?;

    let mut table = Table::with_schema(&scan_schema);
    'rows: for row in rows {
        let row = row.map_err(pq_err)?;
        let json = row.to_json_value();
        let mut cells = Vec::with_capacity(scan_schema.fields.len());
        for field in &scan_schema.fields {
            cells.push(cell_from_json(json.get(&field.name), field.ty)?);
        }
        for filter in &options.filters {
            let idx = scan_schema
                .index_of(&filter.column)
                .expect("filter column included in scan");
            if !filter.accepts_cell(&cells[idx]) {
                continue 'rows;
            }
        }
        table.push_row(cells)?;
    }

    let result = if scan_cols.len() != requested.len() {
        table.project(&requested)?
    } else {
        table
    };
    debug!(path = %path.display(), rows = result.row_count(), "read parquet file");
    Ok(result)
}

/// Build the Parquet projection group for the scan columns.
fn projection_type(root: &SchemaType, columns: &[String]) -> Result<SchemaType> {
    let mut selected: Vec<TypePtr> = Vec::with_capacity(columns.len());
    for name in columns {
        let field = root
            .get_fields()
            .iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| Error::NotFound(format!("column not found: {name}")))?;
        selected.push(field.clone());
    }
    SchemaType::group_type_builder(root.name())
        .with_fields(selected)
        .build()
        .map_err(pq_err)
}

pub(crate) fn cell_from_json(value: Option<&Value>, ty: ColumnType) -> Result<Cell> {
    let value = match value {
        None | Some(Value::Null) => return Ok(Cell::Null),
        Some(v) => v,
    };
    let cell = match (ty, value) {
        (ColumnType::Utf8, Value::String(s)) => Cell::Utf8(s.clone()),
        (ColumnType::Int64, Value::Number(n)) => {
            Cell::Int64(n.as_i64().ok_or_else(|| {
                Error::SchemaMismatch(format!("non-integer value in int64 column: {n}"))
            })?)
        }
        (ColumnType::Float64, Value::Number(n)) => Cell::Float64(
            n.as_f64()
                .ok_or_else(|| Error::SchemaMismatch(format!("bad float value: {n}")))?,
        ),
        (ColumnType::Bool, Value::Bool(b)) => Cell::Bool(*b),
        (ty, other) => {
            return Err(Error::SchemaMismatch(format!(
                "value {other} does not fit column type {}",
                ty.as_str()
            )))
        }
    };
    Ok(cell)
}

/// Read every chunk file of a directory-backed artifact and concatenate.
///
/// Files are visited in name order so chunked artifacts reassemble in their
/// original row order.
pub fn read_table_dir(dir: impl AsRef<Path>, options: &ReadOptions) -> Result<Table> {
    let dir = dir.as_ref();
    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |e| e == "parquet"))
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(Error::NotFound(format!(
            "no parquet files under {}",
            dir.display()
        )));
    }
    let mut out: Option<Table> = None;
    for file in files {
        let part = read_table(&file, options)?;
        match &mut out {
            Some(table) => table.append(&part)?,
            None => out = Some(part),
        }
    }
    Ok(out.expect("at least one file read"))
}

/// Read a hive-partitioned dataset directory, restoring partition columns.
///
/// `full_schema` is the logical schema including partition columns (as
/// recorded in the dataset sidecar); partition values are parsed back from
/// the `<col>=<value>` directory names.
pub fn read_table_partitioned(
    dir: impl AsRef<Path>,
    partition_cols: &[String],
    full_schema: &Schema,
    options: &ReadOptions,
) -> Result<Table> {
    let dir = dir.as_ref();
    let requested: Vec<String> = match &options.columns {
        Some(cols) => cols.clone(),
        None => full_schema.fields.iter().map(|f| f.name.clone()).collect(),
    };

    // Partition columns come from directory names, everything else from files.
    let file_cols: Vec<String> = requested
        .iter()
        .chain(options.filters.iter().map(|f| &f.column))
        .filter(|c| !partition_cols.contains(c))
        .cloned()
        .collect();
    let mut file_cols_dedup = Vec::new();
    for c in file_cols {
        if !file_cols_dedup.contains(&c) {
            file_cols_dedup.push(c);
        }
    }
    // A projection of partition columns only still needs per-leaf row
    // counts; scan one data column to drive them.
    if file_cols_dedup.is_empty() {
        let filler = full_schema
            .fields
            .iter()
            .find(|f| !partition_cols.contains(&f.name))
            .ok_or_else(|| Error::SchemaMismatch("dataset has no data columns".into()))?;
        file_cols_dedup.push(filler.name.clone());
    }

    let mut leaves = Vec::new();
    collect_partition_leaves(dir, partition_cols, &mut Vec::new(), &mut leaves)?;
    if leaves.is_empty() {
        return Err(Error::NotFound(format!(
            "no partitions under {}",
            dir.display()
        )));
    }

    // File-level filters only reference file columns; partition-column
    // filters are applied after the partition values are restored.
    let file_filters: Vec<Filter> = options
        .filters
        .iter()
        .filter(|f| !partition_cols.contains(&f.column))
        .cloned()
        .collect();

    let out_schema = full_schema.project(&requested)?;
    let mut out = Table::with_schema(&out_schema);
    for (values, leaf_dir) in leaves {
        let part = read_table_dir(
            &leaf_dir,
            &ReadOptions::default()
                .with_columns(file_cols_dedup.clone())
                .with_filters(file_filters.clone()),
        )?;
        // Restore partition cells for this leaf.
        let mut partition_cells = Vec::new();
        for (col, raw) in partition_cols.iter().zip(&values) {
            let ty = full_schema
                .field(col)
                .ok_or_else(|| Error::SchemaMismatch(format!("partition column {col} missing from schema")))?
                .ty;
            partition_cells.push((col.clone(), parse_partition_value(raw, ty)?));
        }
        'rows: for row in 0..part.row_count() {
            let mut cells = Vec::with_capacity(requested.len());
            for name in &requested {
                if let Some((_, cell)) = partition_cells.iter().find(|(c, _)| c == name) {
                    cells.push(cell.clone());
                } else {
                    cells.push(
                        part.cell(name, row)
                            .ok_or_else(|| Error::NotFound(format!("column not found: {name}")))?,
                    );
                }
            }
            // Partition-column filters evaluate against restored cells.
            for filter in &options.filters {
                if partition_cols.contains(&filter.column) {
                    if let Some((_, cell)) =
                        partition_cells.iter().find(|(c, _)| *c == filter.column)
                    {
                        if !filter.accepts_cell(cell) {
                            continue 'rows;
                        }
                    }
                }
            }
            out.push_row(cells)?;
        }
    }
    Ok(out)
}

fn collect_partition_leaves(
    dir: &Path,
    remaining: &[String],
    values: &mut Vec<String>,
    out: &mut Vec<(Vec<String>, std::path::PathBuf)>,
) -> Result<()> {
    if remaining.is_empty() {
        out.push((values.clone(), dir.to_path_buf()));
        return Ok(());
    }
    let expected_col = &remaining[0];
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let Some((col, value)) = name.split_once('=') else {
            continue;
        };
        if col != expected_col {
            continue;
        }
        values.push(value.to_string());
        collect_partition_leaves(&entry.path(), &remaining[1..], values, out)?;
        values.pop();
    }
    Ok(())
}

fn parse_partition_value(raw: &str, ty: ColumnType) -> Result<Cell> {
    if raw == NULL_PARTITION_TOKEN {
        return Ok(Cell::Null);
    }
    let cell = match ty {
        ColumnType::Utf8 => Cell::Utf8(raw.to_string()),
        ColumnType::Int64 => Cell::Int64(raw.parse().map_err(|_| {
            Error::SchemaMismatch(format!("bad int64 partition value: {raw}"))
        })?),
        ColumnType::Float64 => Cell::Float64(raw.parse().map_err(|_| {
            Error::SchemaMismatch(format!("bad float64 partition value: {raw}"))
        })?),
        ColumnType::Bool => match raw {
            "true" => Cell::Bool(true),
            "false" => Cell::Bool(false),
            other => {
                return Err(Error::SchemaMismatch(format!(
                    "bad bool partition value: {other}"
                )))
            }
        },
    };
    Ok(cell)
}
