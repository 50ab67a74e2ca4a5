//! JSON workload scripts.
//!
//! A script is a list of transactions run one after another:
//!
//! ```json
//! {
//!   "transactions": [
//!     {
//!       "user": "clerk",
//!       "operations": [
//!         { "op": "create", "type": "Customer", "alias": "ann", "fields": { "name": "Ann" } },
//!         { "op": "set", "target": "ann", "property": "name", "value": "Anne" }
//!       ]
//!     },
//!     {
//!       "user": "clerk",
//!       "rollback": true,
//!       "operations": [ { "op": "delete", "target": "ann" } ]
//!     }
//!   ]
//! }
//! ```
//!
//! A `target` is either an alias bound by an earlier `create` or an entity
//! reference in `Type#<hex id>` form.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use unitwork_core::proto::{EntityRef, Value};
use unitwork_core::Record;

/// Script loading and execution errors.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script file could not be read.
    #[error("cannot read script: {0}")]
    Io(#[from] std::io::Error),

    /// The script is not valid JSON for this format.
    #[error("invalid script: {0}")]
    Parse(#[from] serde_json::Error),

    /// A target is neither a known alias nor an entity reference.
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    /// A JSON value has no scalar counterpart.
    #[error("unsupported value for '{property}': {value}")]
    UnsupportedValue {
        /// Property being written.
        property: String,
        /// Offending JSON.
        value: serde_json::Value,
    },

    /// Core failure outside a single transaction.
    #[error(transparent)]
    Core(#[from] unitwork_core::Error),
}

/// A workload script.
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    /// Transactions in execution order.
    pub transactions: Vec<ScriptTransaction>,
}

/// One transaction of a script.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptTransaction {
    /// User the transaction runs for.
    pub user: String,
    /// Roll back instead of committing.
    #[serde(default)]
    pub rollback: bool,
    /// Operations in order.
    pub operations: Vec<Operation>,
}

/// One entity operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create an entity, optionally binding an alias to it.
    Create {
        /// Entity type.
        #[serde(rename = "type")]
        entity_type: String,
        /// Alias for later operations.
        #[serde(default)]
        alias: Option<String>,
        /// Initial field values.
        #[serde(default)]
        fields: serde_json::Map<String, serde_json::Value>,
    },
    /// Assign a property.
    Set {
        /// Alias or entity reference.
        target: String,
        /// Property name.
        property: String,
        /// New value.
        value: serde_json::Value,
    },
    /// Delete an entity.
    Delete {
        /// Alias or entity reference.
        target: String,
    },
}

impl Script {
    /// Load a script from a file.
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse a script from JSON text.
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Alias bindings shared by all transactions of a script run.
#[derive(Debug, Default)]
pub struct Aliases {
    bound: HashMap<String, EntityRef>,
}

impl Aliases {
    /// Bind `alias` to `entity`, replacing any earlier binding.
    pub fn bind(&mut self, alias: impl Into<String>, entity: EntityRef) {
        self.bound.insert(alias.into(), entity);
    }

    /// Resolve an alias or a `Type#<hex id>` reference.
    pub fn resolve(&self, target: &str) -> Result<EntityRef, ScriptError> {
        if let Some(entity) = self.bound.get(target) {
            return Ok(entity.clone());
        }
        EntityRef::parse(target).map_err(|_| ScriptError::UnknownTarget(target.to_string()))
    }
}

/// Convert a plain JSON scalar into a value.
///
/// Integers become `Int64`, other numbers `Float64`. Arrays and objects are
/// rejected.
pub fn to_value(property: &str, json: &serde_json::Value) -> Result<Value, ScriptError> {
    let unsupported = || ScriptError::UnsupportedValue {
        property: property.to_string(),
        value: json.clone(),
    };
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Int64(i)),
            None => n.as_f64().map(Value::Float64).ok_or_else(unsupported),
        },
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(unsupported()),
    }
}

/// Build a record from a JSON object of scalars.
pub fn to_record(fields: &serde_json::Map<String, serde_json::Value>) -> Result<Record, ScriptError> {
    let mut record = Record::new();
    for (name, json) in fields {
        record.set(name.as_str(), &to_value(name, json)?)?;
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"{
        "transactions": [
            {
                "user": "clerk",
                "operations": [
                    { "op": "create", "type": "Customer", "alias": "ann", "fields": { "name": "Ann", "age": 41 } },
                    { "op": "set", "target": "ann", "property": "vip", "value": true }
                ]
            },
            {
                "user": "clerk",
                "rollback": true,
                "operations": [ { "op": "delete", "target": "ann" } ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_script() {
        let script = Script::parse(SCRIPT).unwrap();
        assert_eq!(script.transactions.len(), 2);
        assert!(!script.transactions[0].rollback);
        assert!(script.transactions[1].rollback);
        assert!(matches!(
            &script.transactions[0].operations[0],
            Operation::Create { entity_type, alias: Some(alias), .. }
                if entity_type == "Customer" && alias == "ann"
        ));
        assert!(matches!(
            script.transactions[1].operations[0],
            Operation::Delete { .. }
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_op() {
        let text = r#"{ "transactions": [ { "user": "u", "operations": [ { "op": "merge" } ] } ] }"#;
        assert!(matches!(Script::parse(text), Err(ScriptError::Parse(_))));
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(to_value("a", &serde_json::json!(3)).unwrap(), Value::Int64(3));
        assert_eq!(to_value("a", &serde_json::json!(1.5)).unwrap(), Value::Float64(1.5));
        assert_eq!(to_value("a", &serde_json::json!("x")).unwrap(), Value::from("x"));
        assert_eq!(to_value("a", &serde_json::json!(null)).unwrap(), Value::Null);
        assert!(to_value("a", &serde_json::json!([1])).is_err());
    }

    #[test]
    fn test_alias_resolution() {
        let mut aliases = Aliases::default();
        let entity = EntityRef::new("Customer", [7; 16]);
        aliases.bind("ann", entity.clone());

        assert_eq!(aliases.resolve("ann").unwrap(), entity);
        assert_eq!(aliases.resolve(&entity.to_string()).unwrap(), entity);
        assert!(matches!(
            aliases.resolve("bob"),
            Err(ScriptError::UnknownTarget(_))
        ));
    }
}
