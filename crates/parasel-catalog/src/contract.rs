use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use parasel_core::error::{ParaselError, Result};

/// JSON type a contract field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    /// Any JSON number, integers included.
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldType {
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        };
        f.write_str(name)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool { true }

/// Declared shape of a task's input or output map.
///
/// Keys not declared are allowed. A `null` value counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub fields: Vec<FieldSpec>,
}

impl Contract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required field.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type,
            required: false,
        });
        self
    }

    /// Every violation as a readable line.
    pub fn violations(&self, data: &HashMap<String, Value>) -> Vec<String> {
        let mut problems = Vec::new();
        for spec in &self.fields {
            match data.get(&spec.name).filter(|v| !v.is_null()) {
                None if spec.required => {
                    problems.push(format!("missing field '{}'", spec.name));
                }
                None => {}
                Some(value) if !spec.field_type.accepts(value) => {
                    problems.push(format!(
                        "field '{}' expected {}, got {}",
                        spec.name,
                        spec.field_type,
                        json_type(value)
                    ));
                }
                Some(_) => {}
            }
        }
        problems
    }

    /// Fail with one [`ParaselError::Contract`] listing every violation.
    pub fn validate(&self, label: &str, data: &HashMap<String, Value>) -> Result<()> {
        let problems = self.violations(data);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ParaselError::Contract(format!("{}: {}", label, problems.join("; "))))
        }
    }
}

/// Check that every key in `keys` is present and not `null`.
pub fn check_keys(label: &str, keys: &[String], data: &HashMap<String, Value>) -> Result<()> {
    let missing: Vec<&str> = keys
        .iter()
        .filter(|k| data.get(k.as_str()).map_or(true, Value::is_null))
        .map(|k| k.as_str())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ParaselError::Contract(format!(
            "{}: missing keys [{}]",
            label,
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_valid_input() {
        let contract = Contract::new()
            .field("query", FieldType::String)
            .optional("limit", FieldType::Integer);

        assert!(contract.validate("input", &data(json!({"query": "rust"}))).is_ok());
        assert!(contract
            .validate("input", &data(json!({"query": "rust", "limit": 5, "extra": true})))
            .is_ok());
    }

    #[test]
    fn test_reports_every_violation() {
        let contract = Contract::new()
            .field("query", FieldType::String)
            .field("limit", FieldType::Integer)
            .optional("lang", FieldType::String);

        let err = contract
            .validate("input", &data(json!({"limit": 2.5, "lang": 3})))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("missing field 'query'"));
        assert!(message.contains("field 'limit' expected integer, got number"));
        assert!(message.contains("field 'lang' expected string, got integer"));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let contract = Contract::new().field("query", FieldType::Any);
        assert!(contract.validate("input", &data(json!({"query": null}))).is_err());
        assert!(check_keys("requires", &["x".into()], &data(json!({"x": null}))).is_err());
    }

    #[test]
    fn test_number_accepts_integers() {
        assert!(FieldType::Number.accepts(&json!(3)));
        assert!(FieldType::Number.accepts(&json!(3.5)));
        assert!(!FieldType::Integer.accepts(&json!(3.5)));
    }

    #[test]
    fn test_contract_from_json() {
        let contract: Contract = serde_json::from_value(json!({
            "fields": [
                {"name": "query", "type": "string"},
                {"name": "page", "type": "integer", "required": false}
            ]
        }))
        .unwrap();
        assert_eq!(contract.fields.len(), 2);
        assert!(!contract.fields[1].required);
        assert_eq!(contract.fields[1].field_type, FieldType::Integer);
    }

    #[test]
    fn test_check_keys() {
        let map = data(json!({"a": 1, "b": 2}));
        assert!(check_keys("produces", &["a".into(), "b".into()], &map).is_ok());
        let err = check_keys("produces", &["a".into(), "c".into(), "d".into()], &map).unwrap_err();
        assert_eq!(err.to_string(), "Contract violation: produces: missing keys [c, d]");
    }
}
