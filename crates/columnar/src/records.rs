//! Operation record codec.
//!
//! WAL partitions and archives are Parquet files with a fixed schema:
//! string identity/status columns, int64 millisecond timestamps, a
//! `map<string,string>` parameters column, and a
//! `struct<cid,size,destination>` result column. Unknown fields are dropped
//! on read and missing fields are filled with defaults, so partitions
//! written by older or newer builds remain readable.
//!
//! A line-delimited JSON codec implements the same contract for
//! deployments that opt out of the columnar engine; undecodable trailing
//! lines (torn writes) are skipped, not fatal.

use crate::pq_err;
use crate::write::{parquet_compression, WriteOptions};
use parquet::basic::{ConvertedType, Repetition, Type as PhysicalType};
use parquet::data_type::{ByteArray, ByteArrayType, Int32Type, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::FileReader;
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::{Type as SchemaType, TypePtr};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use stowage_core::{
    CompressionCodec, Error, Operation, OperationResult, OperationStatus, OperationType, Result,
};
use stowage_core::types::Backend;
use tracing::warn;

/// Encoding used for a WAL partition or archive file.
#[derive(Debug, Clone)]
pub enum RecordCodec {
    Parquet {
        compression: CompressionCodec,
        row_group_size: usize,
    },
    Json,
}

impl RecordCodec {
    /// File extension for partition and archive files.
    pub fn extension(&self) -> &'static str {
        match self {
            RecordCodec::Parquet { .. } => "parquet",
            RecordCodec::Json => "json",
        }
    }

    /// Write `operations` to `path`, replacing any existing file.
    pub fn write(&self, path: impl AsRef<Path>, operations: &[Operation]) -> Result<()> {
        match self {
            RecordCodec::Parquet {
                compression,
                row_group_size,
            } => write_operations_parquet(path, operations, *compression, *row_group_size),
            RecordCodec::Json => write_operations_json(path, operations),
        }
    }

    /// Read every operation record in `path`.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Vec<Operation>> {
        match self {
            RecordCodec::Parquet { .. } => read_operations_parquet(path),
            RecordCodec::Json => read_operations_json(path),
        }
    }
}

// ============================================================================
// Parquet encoding
// ============================================================================

fn string_field(name: &str, repetition: Repetition) -> Result<TypePtr> {
    SchemaType::primitive_type_builder(name, PhysicalType::BYTE_ARRAY)
        .with_converted_type(ConvertedType::UTF8)
        .with_repetition(repetition)
        .build()
        .map(Arc::new)
        .map_err(pq_err)
}

fn int64_field(name: &str, repetition: Repetition) -> Result<TypePtr> {
    SchemaType::primitive_type_builder(name, PhysicalType::INT64)
        .with_repetition(repetition)
        .build()
        .map(Arc::new)
        .map_err(pq_err)
}

fn int32_field(name: &str, repetition: Repetition) -> Result<TypePtr> {
    SchemaType::primitive_type_builder(name, PhysicalType::INT32)
        .with_repetition(repetition)
        .build()
        .map(Arc::new)
        .map_err(pq_err)
}

/// The fixed operation record schema.
fn operation_schema() -> Result<TypePtr> {
    let key_value = SchemaType::group_type_builder("key_value")
        .with_repetition(Repetition::REPEATED)
        .with_fields(vec![
            string_field("key", Repetition::REQUIRED)?,
            string_field("value", Repetition::OPTIONAL)?,
        ])
        .build()
        .map(Arc::new)
        .map_err(pq_err)?;
    let parameters = SchemaType::group_type_builder("parameters")
        .with_repetition(Repetition::OPTIONAL)
        .with_converted_type(ConvertedType::MAP)
        .with_fields(vec![key_value])
        .build()
        .map(Arc::new)
        .map_err(pq_err)?;
    let result = SchemaType::group_type_builder("result")
        .with_repetition(Repetition::OPTIONAL)
        .with_fields(vec![
            string_field("cid", Repetition::OPTIONAL)?,
            int64_field("size", Repetition::OPTIONAL)?,
            string_field("destination", Repetition::OPTIONAL)?,
        ])
        .build()
        .map(Arc::new)
        .map_err(pq_err)?;

    let root = SchemaType::group_type_builder("operation")
        .with_fields(vec![
            string_field("operation_id", Repetition::REQUIRED)?,
            string_field("operation_type", Repetition::REQUIRED)?,
            string_field("status", Repetition::REQUIRED)?,
            int64_field("timestamp", Repetition::REQUIRED)?,
            int64_field("updated_at", Repetition::REQUIRED)?,
            int64_field("completed_at", Repetition::OPTIONAL)?,
            int64_field("next_retry_at", Repetition::OPTIONAL)?,
            string_field("backend", Repetition::REQUIRED)?,
            parameters,
            result,
            string_field("error", Repetition::OPTIONAL)?,
            string_field("error_type", Repetition::OPTIONAL)?,
            int32_field("retry_count", Repetition::REQUIRED)?,
            int32_field("max_retries", Repetition::REQUIRED)?,
        ])
        .build()
        .map_err(pq_err)?;
    Ok(Arc::new(root))
}

fn write_operations_parquet(
    path: impl AsRef<Path>,
    operations: &[Operation],
    compression: CompressionCodec,
    row_group_size: usize,
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let properties = WriterProperties::builder()
        .set_compression(parquet_compression(compression))
        .set_dictionary_enabled(true)
        .set_max_row_group_size(row_group_size.max(1))
        .build();
    let file = File::create(path)?;
    let mut writer =
        SerializedFileWriter::new(file, operation_schema()?, Arc::new(properties))
            .map_err(pq_err)?;

    for chunk in operations.chunks(row_group_size.max(1)) {
        write_operation_row_group(&mut writer, chunk)?;
    }
    writer.close().map_err(pq_err)?;
    Ok(())
}

/// Column writes must follow leaf order of [`operation_schema`].
fn write_operation_row_group(
    writer: &mut SerializedFileWriter<File>,
    ops: &[Operation],
) -> Result<()> {
    let mut rg = writer.next_row_group().map_err(pq_err)?;

    let mut next = |values: ColumnBatch| -> Result<()> {
        let mut col = rg
            .next_column()
            .map_err(pq_err)?
            .ok_or_else(|| Error::Serialization("operation schema column mismatch".into()))?;
        match values {
            ColumnBatch::Str {
                values,
                def,
                rep,
            } => col
                .typed::<ByteArrayType>()
                .write_batch(&values, def.as_deref(), rep.as_deref())
                .map(|_| ())
                .map_err(pq_err)?,
            ColumnBatch::I64 { values, def } => col
                .typed::<Int64Type>()
                .write_batch(&values, def.as_deref(), None)
                .map(|_| ())
                .map_err(pq_err)?,
            ColumnBatch::I32 { values } => col
                .typed::<Int32Type>()
                .write_batch(&values, None, None)
                .map(|_| ())
                .map_err(pq_err)?,
        }
        col.close().map_err(pq_err)
    };

    // identity and status
    next(ColumnBatch::required_str(
        ops.iter().map(|op| op.operation_id.as_str()),
    ))?;
    next(ColumnBatch::required_str(
        ops.iter().map(|op| op.operation_type.as_str()),
    ))?;
    next(ColumnBatch::required_str(
        ops.iter().map(|op| op.status.as_str()),
    ))?;

    // timestamps
    next(ColumnBatch::required_i64(ops.iter().map(|op| op.timestamp)))?;
    next(ColumnBatch::required_i64(ops.iter().map(|op| op.updated_at)))?;
    next(ColumnBatch::optional_i64(
        ops.iter().map(|op| op.completed_at),
    ))?;
    next(ColumnBatch::optional_i64(
        ops.iter().map(|op| op.next_retry_at),
    ))?;

    next(ColumnBatch::required_str(
        ops.iter().map(|op| op.backend.as_str()),
    ))?;

    // parameters map: key leaf (max def 2), value leaf (max def 3)
    {
        let mut keys = Vec::new();
        let mut key_def = Vec::new();
        let mut vals = Vec::new();
        let mut val_def = Vec::new();
        let mut rep = Vec::new();
        for op in ops {
            if op.parameters.is_empty() {
                key_def.push(1);
                val_def.push(1);
                rep.push(0);
            } else {
                for (i, (k, v)) in op.parameters.iter().enumerate() {
                    keys.push(ByteArray::from(k.as_str()));
                    key_def.push(2);
                    vals.push(ByteArray::from(v.as_str()));
                    val_def.push(3);
                    rep.push(if i == 0 { 0 } else { 1 });
                }
            }
        }
        next(ColumnBatch::Str {
            values: keys,
            def: Some(key_def),
            rep: Some(rep.clone()),
        })?;
        next(ColumnBatch::Str {
            values: vals,
            def: Some(val_def),
            rep: Some(rep),
        })?;
    }

    // result struct: each leaf has max def 2 (optional group, optional field)
    {
        let mut cid = Vec::new();
        let mut cid_def = Vec::new();
        let mut size = Vec::new();
        let mut size_def = Vec::new();
        let mut dest = Vec::new();
        let mut dest_def = Vec::new();
        for op in ops {
            match &op.result {
                None => {
                    cid_def.push(0);
                    size_def.push(0);
                    dest_def.push(0);
                }
                Some(r) => {
                    match &r.cid {
                        Some(c) => {
                            cid.push(ByteArray::from(c.as_str()));
                            cid_def.push(2);
                        }
                        None => cid_def.push(1),
                    }
                    match r.size {
                        Some(s) => {
                            size.push(s);
                            size_def.push(2);
                        }
                        None => size_def.push(1),
                    }
                    match &r.destination {
                        Some(d) => {
                            dest.push(ByteArray::from(d.as_str()));
                            dest_def.push(2);
                        }
                        None => dest_def.push(1),
                    }
                }
            }
        }
        next(ColumnBatch::Str {
            values: cid,
            def: Some(cid_def),
            rep: None,
        })?;
        next(ColumnBatch::I64 {
            values: size,
            def: Some(size_def),
        })?;
        next(ColumnBatch::Str {
            values: dest,
            def: Some(dest_def),
            rep: None,
        })?;
    }

    next(ColumnBatch::optional_str(
        ops.iter().map(|op| op.error.as_deref()),
    ))?;
    next(ColumnBatch::optional_str(
        ops.iter().map(|op| op.error_type.as_deref()),
    ))?;
    next(ColumnBatch::I32 {
        values: ops.iter().map(|op| op.retry_count as i32).collect(),
    })?;
    next(ColumnBatch::I32 {
        values: ops.iter().map(|op| op.max_retries as i32).collect(),
    })?;

    drop(next);
    rg.close().map_err(pq_err)?;
    Ok(())
}

enum ColumnBatch {
    Str {
        values: Vec<ByteArray>,
        def: Option<Vec<i16>>,
        rep: Option<Vec<i16>>,
    },
    I64 {
        values: Vec<i64>,
        def: Option<Vec<i16>>,
    },
    I32 {
        values: Vec<i32>,
    },
}

impl ColumnBatch {
    fn required_str<'a>(values: impl Iterator<Item = &'a str>) -> ColumnBatch {
        ColumnBatch::Str {
            values: values.map(ByteArray::from).collect(),
            def: None,
            rep: None,
        }
    }

    fn optional_str<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ColumnBatch {
        let mut out = Vec::new();
        let mut def = Vec::new();
        for v in values {
            match v {
                Some(s) => {
                    out.push(ByteArray::from(s));
                    def.push(1);
                }
                None => def.push(0),
            }
        }
        ColumnBatch::Str {
            values: out,
            def: Some(def),
            rep: None,
        }
    }

    fn required_i64(values: impl Iterator<Item = i64>) -> ColumnBatch {
        ColumnBatch::I64 {
            values: values.collect(),
            def: None,
        }
    }

    fn optional_i64(values: impl Iterator<Item = Option<i64>>) -> ColumnBatch {
        let mut out = Vec::new();
        let mut def = Vec::new();
        for v in values {
            match v {
                Some(x) => {
                    out.push(x);
                    def.push(1);
                }
                None => def.push(0),
            }
        }
        ColumnBatch::I64 {
            values: out,
            def: Some(def),
        }
    }
}

fn read_operations_parquet(path: impl AsRef<Path>) -> Result<Vec<Operation>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(format!("{}", path.display())),
        _ => Error::Io(e),
    })?;
    let reader = SerializedFileReader::new(file).map_err(pq_err)?;
    let rows = reader.get_row_iter(None).map_err(pq_err)?;
    let mut operations = Vec::new();
    for row in rows {
        let row = row.map_err(pq_err)?;
        operations.push(operation_from_json(&row.to_json_value())?);
    }
    Ok(operations)
}

// ============================================================================
// JSON fallback encoding
// ============================================================================

fn write_operations_json(path: impl AsRef<Path>, operations: &[Operation]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for op in operations {
        serde_json::to_writer(&mut writer, op)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

fn read_operations_json(path: impl AsRef<Path>) -> Result<Vec<Operation>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(format!("{}", path.display())),
        _ => Error::Io(e),
    })?;
    let reader = BufReader::new(file);
    let mut operations = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Operation>(&line) {
            Ok(op) => operations.push(op),
            // torn tail after a crash: skip, do not fail the whole partition
            Err(e) => warn!(path = %path.display(), error = %e, "skipping undecodable record line"),
        }
    }
    Ok(operations)
}

// ============================================================================
// JSON value -> Operation (schema-evolution tolerant)
// ============================================================================

/// Decode one record from its JSON rendering.
///
/// Missing fields take defaults; unknown fields are ignored. Only a missing
/// `operation_id` is fatal, since a record without identity cannot be
/// updated or deduplicated.
pub fn operation_from_json(value: &Value) -> Result<Operation> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::Serialization("operation record is not an object".into()))?;

    let operation_id = obj
        .get("operation_id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Serialization("operation record missing operation_id".into()))?
        .to_string();

    let status = match obj.get("status").and_then(Value::as_str) {
        Some(s) => OperationStatus::parse(s)?,
        None => OperationStatus::Pending,
    };

    let mut parameters = BTreeMap::new();
    if let Some(Value::Object(map)) = obj.get("parameters") {
        for (k, v) in map {
            let rendered = match v {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            parameters.insert(k.clone(), rendered);
        }
    }

    let result = match obj.get("result") {
        Some(Value::Object(map)) => Some(OperationResult {
            cid: map.get("cid").and_then(Value::as_str).map(str::to_string),
            size: map.get("size").and_then(Value::as_i64),
            destination: map
                .get("destination")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        _ => None,
    };

    Ok(Operation {
        operation_id,
        operation_type: OperationType::parse(
            obj.get("operation_type")
                .and_then(Value::as_str)
                .unwrap_or("custom"),
        ),
        backend: Backend::parse(obj.get("backend").and_then(Value::as_str).unwrap_or("custom")),
        status,
        timestamp: obj.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
        updated_at: obj.get("updated_at").and_then(Value::as_i64).unwrap_or(0),
        completed_at: obj.get("completed_at").and_then(Value::as_i64),
        next_retry_at: obj.get("next_retry_at").and_then(Value::as_i64),
        parameters,
        result,
        error: obj.get("error").and_then(Value::as_str).map(str::to_string),
        error_type: obj
            .get("error_type")
            .and_then(Value::as_str)
            .map(str::to_string),
        retry_count: obj
            .get("retry_count")
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .max(0) as u32,
        max_retries: obj
            .get("max_retries")
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .max(0) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stowage_core::types::Backend;

    fn codec() -> RecordCodec {
        RecordCodec::Parquet {
            compression: CompressionCodec::Zstd,
            row_group_size: 2,
        }
    }

    fn sample_ops() -> Vec<Operation> {
        let mut a = Operation::new(OperationType::Add, Backend::Ipfs)
            .with_parameter("path", "/tmp/file.bin")
            .with_parameter("recursive", "true")
            .with_max_retries(5);
        a.result = Some(OperationResult {
            cid: Some("bafyexample".into()),
            size: Some(2048),
            destination: None,
        });
        a.status = OperationStatus::Pending;

        let mut b = Operation::new(OperationType::Pin, Backend::S3).with_max_retries(3);
        b.status = OperationStatus::Pending;
        b.error = Some("transient".into());
        b.error_type = Some("backend_unavailable".into());

        // empty parameters, no result
        let c = Operation::new(OperationType::Cat, Backend::Local);
        vec![a, b, c]
    }

    #[test]
    fn parquet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal_0_0.parquet");
        let ops = sample_ops();
        codec().write(&path, &ops).unwrap();
        let back = codec().read(&path).unwrap();
        assert_eq!(back, ops);
    }

    #[test]
    fn parquet_empty_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal_empty.parquet");
        codec().write(&path, &[]).unwrap();
        assert_eq!(codec().read(&path).unwrap(), Vec::new());
    }

    #[test]
    fn json_round_trip_skips_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal_0_0.json");
        let ops = sample_ops();
        RecordCodec::Json.write(&path, &ops).unwrap();
        // simulate a torn write
        use std::io::Write as _;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"operation_id\": \"trunc").unwrap();
        let back = RecordCodec::Json.read(&path).unwrap();
        assert_eq!(back, ops);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let op = operation_from_json(&json!({
            "operation_id": "op-1",
            "operation_type": "add",
            "backend": "ipfs",
            "some_future_field": 42
        }))
        .unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert!(op.parameters.is_empty());
        assert!(op.result.is_none());
    }

    #[test]
    fn record_without_identity_is_rejected() {
        assert!(operation_from_json(&json!({"status": "pending"})).is_err());
    }

    #[test]
    fn unknown_enum_names_degrade_to_custom() {
        let op = operation_from_json(&json!({
            "operation_id": "op-2",
            "operation_type": "frobnicate",
            "backend": "tape-robot"
        }))
        .unwrap();
        assert_eq!(op.operation_type, OperationType::Custom);
        assert_eq!(op.backend, Backend::Custom);
    }
}
