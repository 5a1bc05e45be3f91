//! Product records as stored in the search index.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Name of the creation timestamp field.
pub const CREATED: &str = "created";

/// Normalized attributes: every value is a non-empty list of scalars.
pub type Attributes = BTreeMap<String, Vec<Value>>;

/// A catalog product.
///
/// The search index owns products; a `Product` is a view rebuilt on read.
/// On disk `created` is stored like any other attribute, as a singleton list
/// holding an RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    /// Product id.
    pub id: Uuid,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Normalized attributes, without `created`.
    pub attributes: Attributes,
}

impl Product {
    /// Creates a product without attributes.
    pub fn new(id: Uuid, created: DateTime<Utc>) -> Self {
        Self {
            id,
            created,
            attributes: Attributes::new(),
        }
    }

    /// Sets the attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Values of one attribute.
    pub fn attribute(&self, name: &str) -> Option<&[Value]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    /// Builds the document body stored in the index.
    pub fn to_document(&self) -> Value {
        let mut body = Map::new();
        for (name, values) in &self.attributes {
            body.insert(name.clone(), Value::Array(values.clone()));
        }
        body.insert(
            CREATED.to_string(),
            Value::Array(vec![Value::String(
                self.created.to_rfc3339_opts(SecondsFormat::Millis, true),
            )]),
        );
        Value::Object(body)
    }

    /// Rebuilds a product from its stored document.
    pub fn from_document(id: Uuid, document: &Value) -> CoreResult<Self> {
        let body = document
            .as_object()
            .ok_or_else(|| CoreError::validation(format!("document {id} is not an object")))?;

        let created = created_from(body.get(CREATED))
            .ok_or_else(|| CoreError::validation(format!("document {id} has no valid created")))?;

        let attributes = body
            .iter()
            .filter(|(name, _)| name.as_str() != CREATED)
            .map(|(name, value)| {
                let values = match value {
                    Value::Array(values) => values.clone(),
                    scalar => vec![scalar.clone()],
                };
                (name.clone(), values)
            })
            .collect();

        Ok(Self {
            id,
            created,
            attributes,
        })
    }
}

/// Reads a stored creation time, either `["<rfc3339>"]` or a bare string.
pub(crate) fn created_from(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = match value? {
        Value::Array(values) => values.first()?.as_str()?,
        Value::String(s) => s.as_str(),
        _ => return None,
    };
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
