//! Logical schema for tables and its stable fingerprint.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stowage_core::{Error, Result};

/// Logical column types supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Utf8,
    Int64,
    Float64,
    Bool,
}

impl ColumnType {
    /// Stable wire name, used in sidecars and the canonical schema text.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Utf8 => "utf8",
            ColumnType::Int64 => "int64",
            ColumnType::Float64 => "float64",
            ColumnType::Bool => "bool",
        }
    }

    pub fn parse(s: &str) -> Result<ColumnType> {
        match s {
            "utf8" => Ok(ColumnType::Utf8),
            "int64" => Ok(ColumnType::Int64),
            "float64" => Ok(ColumnType::Float64),
            "bool" => Ok(ColumnType::Bool),
            other => Err(Error::SchemaMismatch(format!(
                "unknown column type: {other}"
            ))),
        }
    }
}

/// One named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Field {
        Field {
            name: name.into(),
            ty,
        }
    }
}

/// Ordered field list describing a table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Schema {
        Schema { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Canonical text rendering: `name:type` pairs joined by `,`.
    ///
    /// Field order is significant; two schemas with the same fields in a
    /// different order are different schemas.
    pub fn canonical_string(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}:{}", f.name, f.ty.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Stable fingerprint: first 16 hex chars of sha256 over the canonical
    /// rendering. Recorded in dataset sidecars and folded into CIDs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.canonical_string().as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    /// Project onto a subset of columns, preserving request order.
    pub fn project(&self, columns: &[String]) -> Result<Schema> {
        let mut fields = Vec::with_capacity(columns.len());
        for name in columns {
            match self.field(name) {
                Some(field) => fields.push(field.clone()),
                None => {
                    return Err(Error::NotFound(format!("column not found: {name}")));
                }
            }
        }
        Ok(Schema::new(fields))
    }
}
