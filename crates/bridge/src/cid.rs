//! Deterministic content identifiers.
//!
//! Two stores of the same canonical table with the same metadata must
//! produce the same CID. The content digest covers the canonical schema
//! text and the canonical rendering of the first 1,000 rows; the CID folds
//! that digest together with the schema fingerprint, dataset name, row
//! count, and compression codec. Wall-clock time deliberately takes no
//! part. This rule is fixed for the lifetime of a deployment; changing
//! it silently re-addresses every dataset.

use sha2::{Digest, Sha256};
use stowage_columnar::Table;

/// Rows of the canonical prefix covered by the content digest.
pub const CONTENT_HASH_PREFIX_ROWS: usize = 1000;

/// Digest over schema text and the canonical row prefix, 16 hex chars.
pub fn content_hash(table: &Table) -> String {
    let schema = table.schema().canonical_string();
    let sample = table.canonical_prefix(CONTENT_HASH_PREFIX_ROWS);
    let digest = Sha256::digest(format!("{schema}:{sample}").as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Derive the artifact CID from its identifying metadata.
///
/// The metadata is rendered as sorted-key JSON before hashing so field
/// order can never perturb the identifier. Caller-supplied attributes are
/// part of the identity: the same table stored under different attributes
/// is a different artifact. The result is an opaque `bafy`-prefixed
/// string, 56 chars total.
pub fn derive_cid(
    content_hash: &str,
    schema_fingerprint: &str,
    name: Option<&str>,
    row_count: usize,
    compression: &str,
    metadata: &std::collections::BTreeMap<String, String>,
) -> String {
    // serde_json maps are sorted by key, giving a canonical rendering
    let identity = serde_json::json!({
        "content_hash": content_hash,
        "schema_fingerprint": schema_fingerprint,
        "name": name,
        "row_count": row_count,
        "compression": compression,
        "metadata": metadata,
    });
    let digest = Sha256::digest(identity.to_string().as_bytes());
    format!("bafy{}", &hex::encode(digest)[..52])
}
