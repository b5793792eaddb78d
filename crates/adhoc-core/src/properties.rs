//! Request-scoped client properties
//!
//! Flight servers read per-call settings such as workload routing or the
//! default schema path from request headers. [`CallProperties`] is an
//! ordered bag of those headers; keys are validated once on insert so the
//! transport layer can attach them without further checks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AdhocError, Result};

/// Workload-management tag applied at authentication time
pub const ROUTING_TAG: &str = "routing-tag";
/// Workload-management queue applied at authentication time
pub const ROUTING_QUEUE: &str = "routing-queue";
/// Default schema path for unqualified table names
pub const SCHEMA: &str = "schema";
/// Engine that should execute the query
pub const ENGINE: &str = "engine";

/// A single `key: value` call property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: String,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let key = normalize_key(&key.into())?;
        let value = value.into();
        validate_value(&key, &value)?;
        Ok(Self { key, value })
    }
}

impl FromStr for Property {
    type Err = AdhocError;

    /// Parse `key:value` or `key=value`, splitting on the first separator
    fn from_str(s: &str) -> Result<Self> {
        let (key, value) = s
            .split_once(|c| c == ':' || c == '=')
            .ok_or_else(|| {
                AdhocError::InvalidProperty(format!(
                    "expected key:value or key=value, got '{}'",
                    s
                ))
            })?;
        Property::new(key.trim(), value.trim())
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.value)
    }
}

/// Ordered collection of call properties.
///
/// Inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Property>", into = "Vec<Property>")]
pub struct CallProperties {
    entries: Vec<Property>,
}

impl CallProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a property
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.push(Property::new(key, value)?);
        Ok(())
    }

    /// Builder-style [`CallProperties::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    /// Properties for workload routing, sent during authentication
    pub fn routing(tag: &str, queue: &str) -> Result<Self> {
        Self::new().with(ROUTING_TAG, tag)?.with(ROUTING_QUEUE, queue)
    }

    /// Properties setting the default schema path for one call
    pub fn schema(path: &str) -> Result<Self> {
        Self::new().with(SCHEMA, path)
    }

    /// Parse a list of `key:value` / `key=value` pairs
    pub fn parse_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut properties = Self::new();
        for pair in pairs {
            properties.push(pair.as_ref().parse()?);
        }
        Ok(properties)
    }

    /// Overlay `other` on top of `self`; keys in `other` win
    pub fn merge(&mut self, other: &CallProperties) {
        for property in &other.entries {
            self.push(property.clone());
        }
    }

    /// Return a merged copy, leaving both inputs untouched
    pub fn merged(&self, other: &CallProperties) -> CallProperties {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, property: Property) {
        match self.entries.iter_mut().find(|p| p.key == property.key) {
            Some(existing) => existing.value = property.value,
            None => self.entries.push(property),
        }
    }
}

impl TryFrom<Vec<Property>> for CallProperties {
    type Error = AdhocError;

    fn try_from(entries: Vec<Property>) -> Result<Self> {
        let mut properties = Self::new();
        for entry in entries {
            properties.insert(entry.key, entry.value)?;
        }
        Ok(properties)
    }
}

impl From<CallProperties> for Vec<Property> {
    fn from(properties: CallProperties) -> Self {
        properties.entries
    }
}

impl<'a> IntoIterator for &'a CallProperties {
    type Item = &'a Property;
    type IntoIter = std::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// gRPC metadata keys must be lowercase ASCII; keys ending in `-bin`
/// denote binary values, which properties never carry.
fn normalize_key(key: &str) -> Result<String> {
    let key = key.trim().to_ascii_lowercase();
    if key.is_empty() {
        return Err(AdhocError::InvalidProperty("empty property key".into()));
    }
    if key.starts_with("grpc-") || key.ends_with("-bin") {
        return Err(AdhocError::InvalidProperty(format!(
            "reserved property key '{}'",
            key
        )));
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'))
    {
        return Err(AdhocError::InvalidProperty(format!(
            "property key '{}' may only contain a-z, 0-9, '-', '_' and '.'",
            key
        )));
    }
    Ok(key)
}

fn validate_value(key: &str, value: &str) -> Result<()> {
    if value.bytes().all(|b| (0x20..0x7f).contains(&b) || b == b'\t') {
        Ok(())
    } else {
        Err(AdhocError::InvalidProperty(format!(
            "value for '{}' must be printable ASCII",
            key
        )))
    }
}
