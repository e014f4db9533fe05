//! The output contract schema of a capsule.

use crate::error::SchemaError;
use crate::semver::SemVer;
use serde_json::{Map, Value};

/// Key under `properties` holding the concurrency tuple.
pub const CONCURRENCY_TARGETS_KEY: &str = "concurrency_targets";

#[derive(Debug, Clone, PartialEq)]
pub struct OutputContractSchema {
    pub version: SemVer,
    pub required: Vec<String>,
    pub raw: Value,
}

impl OutputContractSchema {
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let raw: Value = serde_json::from_str(text)?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: Value) -> Result<Self, SchemaError> {
        let object = raw.as_object().ok_or(SchemaError::NotAnObject)?;
        let version = read_version(object)?;
        let required = match object.get("required") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(SchemaError::InvalidRequired)?,
            Some(_) => return Err(SchemaError::InvalidRequired),
        };
        Ok(Self {
            version,
            required,
            raw,
        })
    }

    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.raw.get("properties").and_then(Value::as_object)
    }

    pub fn concurrency_targets(&self) -> Option<&Value> {
        self.properties()
            .and_then(|properties| properties.get(CONCURRENCY_TARGETS_KEY))
    }

    /// Replace `version`, keeping every other key as written.
    pub fn with_version(&self, version: SemVer) -> Self {
        let mut raw = self.raw.clone();
        if let Value::Object(object) = &mut raw {
            object.insert("version".to_string(), Value::String(version.to_string()));
        }
        Self {
            version,
            required: self.required.clone(),
            raw,
        }
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_pretty_string(&self) -> Result<String, SchemaError> {
        let mut text = serde_json::to_string_pretty(&self.raw)?;
        text.push('\n');
        Ok(text)
    }
}

fn read_version(object: &Map<String, Value>) -> Result<SemVer, SchemaError> {
    let raw = object
        .get("version")
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingVersion)?;
    raw.parse()
        .map_err(|_| SchemaError::InvalidVersion(raw.to_string()))
}
