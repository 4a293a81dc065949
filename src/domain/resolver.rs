use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use serde_yaml::{value::TaggedValue, Mapping, Value};

use super::error::KlusterError;

pub const SECRET_REFERENCE: &str = "$secret";

/// Substitutes reference objects (`{$secret: path}`) with the base64 content of the
/// referenced file, paths being relative to `base_path`.
pub struct Resolver {
    base_path: PathBuf,
}

impl Resolver {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn for_manifest(manifest: &Path) -> Self {
        Self::new(
            manifest
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new(".")),
        )
    }

    pub fn resolve_refs(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let documents = parse_documents(data).context("unmarshal yaml")?;
        let resolved = documents
            .into_iter()
            .map(|document| self.resolve_value(document))
            .collect::<Result<Vec<Value>, Error>>()
            .context("resolve reference")?;
        marshal_documents(&resolved)
    }

    pub fn resolve_value(&self, value: Value) -> Result<Value, Error> {
        match value {
            Value::Mapping(mapping) => match reference_path(&mapping)? {
                Some(path) => self.read_encoded(path).map(Value::String),
                None => mapping
                    .into_iter()
                    .map(|(key, value)| self.resolve_value(value).map(|value| (key, value)))
                    .collect::<Result<Mapping, Error>>()
                    .map(Value::Mapping),
            },
            Value::Sequence(sequence) => sequence
                .into_iter()
                .map(|value| self.resolve_value(value))
                .collect::<Result<Vec<Value>, Error>>()
                .map(Value::Sequence),
            Value::Tagged(tagged) => {
                let TaggedValue { tag, value } = *tagged;
                self.resolve_value(value)
                    .map(|value| Value::Tagged(Box::new(TaggedValue { tag, value })))
            }
            scalar => Ok(scalar),
        }
    }

    fn read_encoded(&self, path: &str) -> Result<String, Error> {
        let full_path = self.base_path.join(path);
        let content = std::fs::read(&full_path)
            .with_context(|| KlusterError::ReferenceFile { path: full_path })?;
        Ok(STANDARD.encode(content))
    }
}

/// Reads a manifest and resolves its references against the manifest's directory.
pub fn resolve_file(path: &Path) -> Result<Vec<u8>, Error> {
    let data = std::fs::read(path).with_context(|| format!("read file {}", path.display()))?;
    Resolver::for_manifest(path).resolve_refs(&data)
}

// A reference object is a mapping holding the reference key and nothing else.
fn reference_path(mapping: &Mapping) -> Result<Option<&str>, Error> {
    if mapping.len() != 1 {
        return Ok(None);
    }
    match mapping.get(SECRET_REFERENCE) {
        None => Ok(None),
        Some(Value::String(path)) => Ok(Some(path.as_str())),
        Some(_) => Err(KlusterError::InvalidReference {
            key: SECRET_REFERENCE.to_string(),
        }
        .into()),
    }
}

/// Splits a YAML stream into its non-empty documents.
pub fn parse_documents(data: &[u8]) -> Result<Vec<Value>, serde_yaml::Error> {
    serde_yaml::Deserializer::from_slice(data)
        .map(Value::deserialize)
        .filter(|document| !matches!(document, Ok(Value::Null)))
        .collect()
}

pub fn marshal_documents(documents: &[Value]) -> Result<Vec<u8>, Error> {
    let documents = documents
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<String>, serde_yaml::Error>>()
        .context("marshal yaml")?;
    Ok(documents.join("---\n").into_bytes())
}
