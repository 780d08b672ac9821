//! Low-level Parquet writing.
//!
//! Tables are written with dictionary encoding, a configurable compression
//! codec, and bounded row groups. Three physical layouts are supported:
//! a single file, a hive-style partition directory (one subdirectory per
//! distinct partition value), and a size-bounded chunk directory for
//! artifacts that exceed `max_partition_size`.

use crate::pq_err;
use crate::schema::{ColumnType, Schema};
use crate::table::{Cell, ColumnData, Table};
use parquet::basic::{Compression, ConvertedType, GzipLevel, Repetition, Type as PhysicalType, ZstdLevel};
use parquet::data_type::{BoolType, ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::{Type as SchemaType, TypePtr};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use stowage_core::{CompressionCodec, Error, Result};
use tracing::debug;

/// Directory-name token for a null partition value, hive convention.
pub const NULL_PARTITION_TOKEN: &str = "__NULL_PARTITION__";

/// Tuning knobs for Parquet output.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub compression: CompressionCodec,
    pub row_group_size: usize,
    pub dictionary: bool,
}

impl Default for WriteOptions {
    fn default() -> WriteOptions {
        WriteOptions {
            compression: CompressionCodec::Zstd,
            row_group_size: 1024,
            dictionary: true,
        }
    }
}

impl WriteOptions {
    pub(crate) fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(parquet_compression(self.compression))
            .set_dictionary_enabled(self.dictionary)
            .set_max_row_group_size(self.row_group_size.max(1))
            .build()
    }
}

pub(crate) fn parquet_compression(codec: CompressionCodec) -> Compression {
    match codec {
        CompressionCodec::None => Compression::UNCOMPRESSED,
        CompressionCodec::Snappy => Compression::SNAPPY,
        CompressionCodec::Gzip => Compression::GZIP(GzipLevel::default()),
        CompressionCodec::Zstd => Compression::ZSTD(ZstdLevel::default()),
    }
}

/// Parquet schema for a table: every column an optional primitive leaf.
pub(crate) fn parquet_schema(schema: &Schema) -> Result<TypePtr> {
    let mut fields = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let builder = match field.ty {
            ColumnType::Utf8 => {
                SchemaType::primitive_type_builder(&field.name, PhysicalType::BYTE_ARRAY)
                    .with_converted_type(ConvertedType::UTF8)
            }
            ColumnType::Int64 => {
                SchemaType::primitive_type_builder(&field.name, PhysicalType::INT64)
            }
            ColumnType::Float64 => {
                SchemaType::primitive_type_builder(&field.name, PhysicalType::DOUBLE)
            }
            ColumnType::Bool => {
                SchemaType::primitive_type_builder(&field.name, PhysicalType::BOOLEAN)
            }
        };
        let ty = builder
            .with_repetition(Repetition::OPTIONAL)
            .build()
            .map_err(pq_err)?;
        fields.push(Arc::new(ty));
    }
    let root = SchemaType::group_type_builder("table")
        .with_fields(fields)
        .build()
        .map_err(pq_err)?;
    Ok(Arc::new(root))
}

/// Write `table` to a single Parquet file. Returns the file size in bytes.
pub fn write_table(path: impl AsRef<Path>, table: &Table, options: &WriteOptions) -> Result<u64> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    write_table_to(file, table, options)?;
    let size = std::fs::metadata(path)?.len();
    debug!(path = %path.display(), rows = table.row_count(), size, "wrote parquet file");
    Ok(size)
}

/// Serialize `table` as a single in-memory Parquet byte sequence.
///
/// Used to materialize directory-backed artifacts on the fly (e.g. for
/// byte-range reads through the filesystem facade).
pub fn write_table_to_vec(table: &Table, options: &WriteOptions) -> Result<Vec<u8>> {
    write_table_to(Vec::new(), table, options)
}

fn write_table_to<W: std::io::Write + Send>(
    sink: W,
    table: &Table,
    options: &WriteOptions,
) -> Result<W> {
    let schema = parquet_schema(&table.schema())?;
    let mut writer =
        SerializedFileWriter::new(sink, schema, Arc::new(options.properties())).map_err(pq_err)?;

    let chunk = options.row_group_size.max(1);
    let mut start = 0;
    while start < table.row_count() {
        let len = chunk.min(table.row_count() - start);
        let slice = table.slice(start, len);
        write_row_group(&mut writer, &slice)?;
        start += len;
    }

    writer.into_inner().map_err(pq_err)
}

fn write_row_group<W: std::io::Write + Send>(
    writer: &mut SerializedFileWriter<W>,
    slice: &Table,
) -> Result<()> {
    let mut row_group = writer.next_row_group().map_err(pq_err)?;
    for column in slice.columns() {
        let mut col_writer = row_group
            .next_column()
            .map_err(pq_err)?
            .ok_or_else(|| Error::Serialization("parquet column count mismatch".into()))?;
        match &column.data {
            ColumnData::Utf8(values) => {
                let (present, def): (Vec<ByteArray>, Vec<i16>) = split_optionals(
                    values.iter().map(|v| v.as_ref().map(|s| ByteArray::from(s.as_str()))),
                );
                col_writer
                    .typed::<ByteArrayType>()
                    .write_batch(&present, Some(&def), None)
                    .map_err(pq_err)?;
            }
            ColumnData::Int64(values) => {
                let (present, def): (Vec<i64>, Vec<i16>) =
                    split_optionals(values.iter().copied());
                col_writer
                    .typed::<Int64Type>()
                    .write_batch(&present, Some(&def), None)
                    .map_err(pq_err)?;
            }
            ColumnData::Float64(values) => {
                let (present, def): (Vec<f64>, Vec<i16>) =
                    split_optionals(values.iter().copied());
                col_writer
                    .typed::<DoubleType>()
                    .write_batch(&present, Some(&def), None)
                    .map_err(pq_err)?;
            }
            ColumnData::Bool(values) => {
                let (present, def): (Vec<bool>, Vec<i16>) =
                    split_optionals(values.iter().copied());
                col_writer
                    .typed::<BoolType>()
                    .write_batch(&present, Some(&def), None)
                    .map_err(pq_err)?;
            }
        }
        col_writer.close().map_err(pq_err)?;
    }
    row_group.close().map_err(pq_err)?;
    Ok(())
}

/// Split an iterator of optionals into (present values, definition levels).
fn split_optionals<T>(values: impl Iterator<Item = Option<T>>) -> (Vec<T>, Vec<i16>) {
    let mut present = Vec::new();
    let mut def = Vec::new();
    for value in values {
        match value {
            Some(v) => {
                present.push(v);
                def.push(1);
            }
            None => def.push(0),
        }
    }
    (present, def)
}

/// Render a partition cell as a filesystem-safe directory component.
pub fn partition_value_component(cell: &Cell) -> String {
    match cell {
        Cell::Null => NULL_PARTITION_TOKEN.to_string(),
        other => sanitize_component(&other.canonical()),
    }
}

fn sanitize_component(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Write `table` as a hive-style partition directory under `dir`.
///
/// One subdirectory per distinct value tuple of `partition_cols`
/// (`<col>=<value>/...`), each holding a `part-00000.parquet` with the
/// remaining columns. Returns total bytes written.
pub fn write_table_partitioned(
    dir: impl AsRef<Path>,
    table: &Table,
    partition_cols: &[String],
    options: &WriteOptions,
) -> Result<u64> {
    let dir = dir.as_ref();
    if partition_cols.is_empty() {
        return Err(Error::InvalidArgument(
            "write_table_partitioned requires at least one partition column".into(),
        ));
    }
    for col in partition_cols {
        if table.column(col).is_none() {
            return Err(Error::NotFound(format!("partition column not found: {col}")));
        }
    }
    let data_cols: Vec<String> = table
        .schema()
        .fields
        .iter()
        .map(|f| f.name.clone())
        .filter(|name| !partition_cols.contains(name))
        .collect();
    if data_cols.is_empty() {
        return Err(Error::InvalidArgument(
            "partitioning by every column leaves no data columns".into(),
        ));
    }

    // Group rows by partition tuple, first-seen order.
    let mut groups: Vec<(Vec<String>, Vec<usize>)> = Vec::new();
    for row in 0..table.row_count() {
        let key: Vec<String> = partition_cols
            .iter()
            .map(|col| {
                let cell = table.cell(col, row).expect("partition column verified");
                partition_value_component(&cell)
            })
            .collect();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, rows)) => rows.push(row),
            None => groups.push((key, vec![row])),
        }
    }

    std::fs::create_dir_all(dir)?;
    let mut total = 0;
    for (key, rows) in groups {
        let mut part_dir = dir.to_path_buf();
        for (col, value) in partition_cols.iter().zip(&key) {
            part_dir.push(format!("{}={}", sanitize_component(col), value));
        }
        std::fs::create_dir_all(&part_dir)?;
        let part = table.take_rows(&rows).project(&data_cols)?;
        total += write_table(part_dir.join("part-00000.parquet"), &part, options)?;
    }
    debug!(dir = %dir.display(), rows = table.row_count(), total, "wrote partitioned dataset");
    Ok(total)
}

/// Write `table` as a directory of size-bounded chunk files.
///
/// Chunk row counts are derived from the table's estimated bytes-per-row so
/// each `chunk-NNNNN.parquet` stays near `max_bytes`. Returns total bytes.
pub fn write_table_chunked(
    dir: impl AsRef<Path>,
    table: &Table,
    max_bytes: u64,
    options: &WriteOptions,
) -> Result<u64> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let rows = table.row_count().max(1) as u64;
    let bytes_per_row = (table.estimated_bytes() / rows).max(1);
    let rows_per_chunk = (max_bytes / bytes_per_row).max(1) as usize;

    let mut total = 0;
    let mut start = 0;
    let mut index = 0;
    while start < table.row_count() {
        let len = rows_per_chunk.min(table.row_count() - start);
        let chunk = table.slice(start, len);
        total += write_table(
            dir.join(format!("chunk-{index:05}.parquet")),
            &chunk,
            options,
        )?;
        start += len;
        index += 1;
    }
    // an empty table still gets one (empty) chunk so the artifact exists
    if index == 0 {
        total += write_table(dir.join("chunk-00000.parquet"), table, options)?;
    }
    Ok(total)
}
