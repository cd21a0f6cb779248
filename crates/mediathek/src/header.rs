//! The database header.
//!
//! `db.yaml` belongs to the table-format collaborator; this module reads
//! just enough of it to run the pipelines — the database name, the table
//! ids, and the attachment id/path pairs — and keeps everything else as
//! an opaque YAML value for the header-level info queries.

use crate::error::{ErrorKind, Result};
use serde_yaml::Value;
use std::path::Path;

/// A parsed database header.
#[derive(Debug, Clone)]
pub struct DatabaseHeader {
    name: String,
    raw: Value,
}

impl DatabaseHeader {
    /// Read and parse `db.yaml` from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(ErrorKind::Io)?;
        Self::from_str(&contents)
    }

    /// Parse a header from its YAML text.
    ///
    /// # Errors
    /// [`ErrorKind::Corrupt`] for unparsable YAML or a missing/empty
    /// `name` field.
    pub fn from_str(contents: &str) -> Result<Self> {
        let raw: Value =
            serde_yaml::from_str(contents).map_err(|e| ErrorKind::Corrupt(format!("invalid header: {e}")))?;
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| exn::Exn::from(ErrorKind::Corrupt("header has no 'name' field".to_string())))?;
        Ok(Self { name, raw })
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table ids: the keys of `tables` and `misc_tables`.
    pub fn tables(&self) -> Vec<String> {
        let mut ids = self.mapping_keys("tables");
        ids.extend(self.mapping_keys("misc_tables"));
        ids
    }

    /// Attachment `(id, path)` pairs from the `attachments` mapping.
    pub fn attachments(&self) -> Vec<(String, String)> {
        let Some(Value::Mapping(mapping)) = self.raw.get("attachments") else {
            return Vec::new();
        };
        mapping
            .iter()
            .filter_map(|(id, body)| {
                let id = id.as_str()?.to_string();
                let path = body.get("path")?.as_str()?.to_string();
                Some((id, path))
            })
            .collect()
    }

    /// Keys of a top-level mapping field (`schemes`, `splits`, ...).
    pub fn mapping_keys(&self, field: &str) -> Vec<String> {
        let Some(Value::Mapping(mapping)) = self.raw.get(field) else {
            return Vec::new();
        };
        mapping.iter().filter_map(|(key, _)| key.as_str().map(str::to_string)).collect()
    }

    /// A top-level string field (`description`, `license`, ...).
    pub fn string_field(&self, field: &str) -> Option<String> {
        self.raw.get(field).and_then(Value::as_str).map(str::to_string)
    }

    /// A top-level list of strings (`languages`).
    pub fn string_list(&self, field: &str) -> Vec<String> {
        match self.raw.get(field) {
            Some(Value::Sequence(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }

    /// The whole header as YAML.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}
