//! Declarative parameter schemas and the generic check/coerce engine behind
//! every per-kind validator.

use serde::Serialize;
use serde_json::{Map, Number, Value};

/// Type and constraints of one schema field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    Bool,
    Integer { min: i64, max: i64 },
    String,
    Enum { values: &'static [&'static str] },
    StringList,
    Object,
}

/// Default value of a field, kept `const`-constructible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldDefault {
    Bool(bool),
    Int(i64),
    Str(&'static str),
    StrList(&'static [&'static str]),
}

impl FieldDefault {
    pub fn to_value(self) -> Value {
        match self {
            FieldDefault::Bool(b) => Value::Bool(b),
            FieldDefault::Int(i) => Value::Number(i.into()),
            FieldDefault::Str(s) => Value::String(s.to_string()),
            FieldDefault::StrList(items) => {
                Value::Array(items.iter().map(|s| Value::String(s.to_string())).collect())
            }
        }
    }
}

impl Serialize for FieldDefault {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    #[serde(flatten)]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<FieldDefault>,
    pub description: &'static str,
}

impl FieldSpec {
    pub const fn new(name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        Self {
            name,
            field_type,
            required: false,
            default: None,
            description,
        }
    }

    pub const fn boolean(name: &'static str, default: bool, description: &'static str) -> Self {
        Self::new(name, FieldType::Bool, description).with_default(FieldDefault::Bool(default))
    }

    pub const fn integer(
        name: &'static str,
        min: i64,
        max: i64,
        description: &'static str,
    ) -> Self {
        Self::new(name, FieldType::Integer { min, max }, description)
    }

    pub const fn string(name: &'static str, description: &'static str) -> Self {
        Self::new(name, FieldType::String, description)
    }

    pub const fn one_of(
        name: &'static str,
        values: &'static [&'static str],
        description: &'static str,
    ) -> Self {
        Self::new(name, FieldType::Enum { values }, description)
    }

    pub const fn string_list(name: &'static str, description: &'static str) -> Self {
        Self::new(name, FieldType::StringList, description)
    }

    pub const fn object(name: &'static str, description: &'static str) -> Self {
        Self::new(name, FieldType::Object, description)
    }

    pub const fn with_default(mut self, default: FieldDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Coerce a raw value to this field's type, without range checks.
    ///
    /// Accepts `"true"`/`"false"` for booleans, numeric strings and whole or
    /// fractional floats for integers (floats are rounded), and a comma
    /// separated string for string lists.
    fn coerce(&self, raw: &Value) -> Result<Value, String> {
        let mismatch = |expected: &str| {
            format!(
                "{}: expected {expected}, got {}",
                self.name,
                type_name(raw)
            )
        };
        match &self.field_type {
            FieldType::Bool => match raw {
                Value::Bool(_) => Ok(raw.clone()),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(mismatch("boolean")),
                },
                _ => Err(mismatch("boolean")),
            },
            FieldType::Integer { .. } => {
                let parsed = match raw {
                    Value::Number(n) => n
                        .as_i64()
                        .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64)),
                    Value::String(s) => {
                        let s = s.trim();
                        s.parse::<i64>().ok().or_else(|| {
                            s.parse::<f64>()
                                .ok()
                                .filter(|f| f.is_finite())
                                .map(|f| f.round() as i64)
                        })
                    }
                    _ => None,
                };
                parsed
                    .map(|i| Value::Number(i.into()))
                    .ok_or_else(|| mismatch("integer"))
            }
            FieldType::String => match raw {
                Value::String(_) => Ok(raw.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(mismatch("string")),
            },
            FieldType::Enum { .. } => match raw {
                Value::String(s) => Ok(Value::String(s.trim().to_ascii_lowercase())),
                _ => Err(mismatch("string")),
            },
            FieldType::StringList => match raw {
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(Value::String(s.clone())),
                        _ => Err(mismatch("list of strings")),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                Value::String(s) => Ok(Value::Array(
                    s.split(',')
                        .map(str::trim)
                        .filter(|part| !part.is_empty())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                )),
                _ => Err(mismatch("list of strings")),
            },
            FieldType::Object => match raw {
                Value::Object(_) => Ok(raw.clone()),
                _ => Err(mismatch("object")),
            },
        }
    }

    /// Range or enum violation of an already coerced value.
    fn constraint_error(&self, value: &Value) -> Option<String> {
        match (&self.field_type, value) {
            (FieldType::Integer { min, max }, Value::Number(n)) => {
                let i = n.as_i64()?;
                (i < *min || i > *max).then(|| {
                    format!("{}: {i} is out of range [{min}, {max}]", self.name)
                })
            }
            (FieldType::Enum { values }, Value::String(s)) => {
                (!values.contains(&s.as_str())).then(|| {
                    format!(
                        "{}: '{s}' is not one of {}",
                        self.name,
                        values.join(", ")
                    )
                })
            }
            _ => None,
        }
    }

    /// Clamp integers into range. Enum violations fall back to the default.
    fn clamp(&self, value: Value) -> Option<Value> {
        match (&self.field_type, &value) {
            (FieldType::Integer { min, max }, Value::Number(n)) => {
                let i = n.as_i64()?.clamp(*min, *max);
                Some(Value::Number(Number::from(i)))
            }
            (FieldType::Enum { values }, Value::String(s)) if !values.contains(&s.as_str()) => {
                self.default.map(FieldDefault::to_value)
            }
            _ => Some(value),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Outcome of validating a raw parameter bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn from_messages(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Field set of one provider kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSchema {
    pub kind: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl ParameterSchema {
    pub fn new(kind: &'static str, fields: Vec<FieldSpec>) -> Self {
        Self { kind, fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Every field that carries a default, with that default.
    pub fn defaults(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter_map(|f| f.default.map(|d| (f.name.to_string(), d.to_value())))
            .collect()
    }

    /// Per-field checks. Returns the report plus the successfully coerced
    /// values (defaults filled) for cross-field rules to inspect.
    pub fn check(&self, raw: &Map<String, Value>) -> (ValidationReport, Map<String, Value>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut coerced = self.defaults();

        for key in raw.keys() {
            if self.field(key).is_none() {
                warnings.push(format!("{key}: unknown parameter will be ignored"));
            }
        }

        for field in &self.fields {
            match raw.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        errors.push(format!("{}: required parameter is missing", field.name));
                    }
                }
                Some(value) => match field.coerce(value) {
                    Ok(value) => {
                        if let Some(err) = field.constraint_error(&value) {
                            errors.push(err);
                        } else {
                            coerced.insert(field.name.to_string(), value);
                        }
                    }
                    Err(err) => errors.push(err),
                },
            }
        }

        (ValidationReport::from_messages(errors, warnings), coerced)
    }

    /// Coerce, clamp, fill defaults and drop unknown fields.
    ///
    /// Values that cannot be coerced at all are replaced by the default, or
    /// dropped when the field has none.
    pub fn normalize(&self, raw: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for field in &self.fields {
            let value = raw
                .get(field.name)
                .filter(|v| !v.is_null())
                .and_then(|v| field.coerce(v).ok())
                .and_then(|v| field.clamp(v))
                .or_else(|| field.default.map(FieldDefault::to_value));
            if let Some(value) = value {
                out.insert(field.name.to_string(), value);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ParameterSchema {
        ParameterSchema::new(
            "test",
            vec![
                FieldSpec::integer("timeout_ms", 1000, 5000, "timeout")
                    .with_default(FieldDefault::Int(2000)),
                FieldSpec::boolean("enabled", true, "flag"),
                FieldSpec::one_of("mode", &["fast", "slow"], "mode")
                    .with_default(FieldDefault::Str("fast")),
                FieldSpec::string_list("tags", "tags"),
                FieldSpec::string("token", "token").required(),
            ],
        )
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn check_reports_every_field_error() {
        let (report, _) = schema().check(&map(json!({
            "timeout_ms": 99999,
            "enabled": "maybe",
            "mode": "warp",
            "extra": 1
        })));

        assert!(!report.valid);
        assert_eq!(report.errors.len(), 4, "{:?}", report.errors);
        assert!(report.errors.iter().any(|e| e.contains("out of range")));
        assert!(report.errors.iter().any(|e| e.contains("expected boolean")));
        assert!(report.errors.iter().any(|e| e.contains("not one of")));
        assert!(report.errors.iter().any(|e| e.starts_with("token")));
        assert_eq!(report.warnings, vec!["extra: unknown parameter will be ignored"]);
    }

    #[test]
    fn check_coerces_strings_and_floats() {
        let (report, coerced) = schema().check(&map(json!({
            "timeout_ms": "1500",
            "enabled": "FALSE",
            "tags": "a, b,,c",
            "token": 42
        })));

        assert!(report.valid, "{:?}", report.errors);
        assert_eq!(coerced["timeout_ms"], json!(1500));
        assert_eq!(coerced["enabled"], json!(false));
        assert_eq!(coerced["tags"], json!(["a", "b", "c"]));
        assert_eq!(coerced["token"], json!("42"));
        assert_eq!(coerced["mode"], json!("fast"));
    }

    #[test]
    fn normalize_clamps_fills_and_drops() {
        let out = schema().normalize(&map(json!({
            "timeout_ms": 1.0e9,
            "mode": "warp",
            "enabled": "nonsense",
            "extra": true
        })));

        assert_eq!(out["timeout_ms"], json!(5000));
        assert_eq!(out["mode"], json!("fast"));
        assert_eq!(out["enabled"], json!(true));
        assert!(!out.contains_key("extra"));
        assert!(!out.contains_key("token"));
    }
}
