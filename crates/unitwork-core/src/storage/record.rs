//! Record type for stored entities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use unitwork_proto::Value;

use crate::error::Error;
use crate::tracking::ReadFault;

/// The stored state of one entity: a map of property name to value.
///
/// Fields are kept in their encoded form and decoded one at a time, so a
/// single field written by a foreign producer in an unexpected shape makes
/// only that property unreadable instead of the whole entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: BTreeMap<String, serde_json::Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from property/value pairs.
    pub fn from_fields<I, K>(fields: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut record = Self::new();
        for (name, value) in fields {
            record.set(name, &value)?;
        }
        Ok(record)
    }

    /// Read a property. Missing properties read as [`Value::Null`].
    pub fn get(&self, property: &str) -> Result<Value, ReadFault> {
        match self.fields.get(property) {
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                ReadFault::new(format!("cannot decode stored value: {}", e))
            }),
            None => Ok(Value::Null),
        }
    }

    /// Write a property.
    ///
    /// Values that would not decode back unchanged, such as NaN, are rejected.
    pub fn set(&mut self, property: impl Into<String>, value: &Value) -> Result<(), Error> {
        let property = property.into();
        if !value.is_encodable() {
            return Err(Error::Serialization(format!(
                "{}: non-finite float cannot be stored",
                property
            )));
        }
        let raw = serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.fields.insert(property, raw);
        Ok(())
    }

    /// Write an already-encoded property without validating its shape.
    ///
    /// Used when importing data produced outside this crate.
    pub fn set_raw(&mut self, property: impl Into<String>, raw: serde_json::Value) {
        self.fields.insert(property.into(), raw);
    }

    /// Whether the property is present.
    pub fn contains(&self, property: &str) -> bool {
        self.fields.contains_key(property)
    }

    /// Property names in sorted order.
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no properties.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }
}
