//! Declarative argument schemas and their validator
//!
//! A schema maps field names to a primitive type plus optional constraints. Validation turns a
//! raw JSON payload into [`ValidatedArgs`], a record a handler can consume without re-checking.

use std::{collections::BTreeMap, fmt};

use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    Integer,
    String,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Integer => "integer",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Number => value.is_number(),
            Self::Integer => as_integer(value).is_some(),
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, Self::Number | Self::Integer)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub required: bool,
    pub description: Option<String>,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub allowed: Option<Vec<Value>>,
    pub pattern: Option<Regex>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            description: None,
            default: None,
            min: None,
            max: None,
            allowed: None,
            pattern: None,
        }
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn one_of(mut self, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Result<Self, SchemaError> {
        let compiled = Regex::new(pattern).map_err(|_| SchemaError::InvalidPattern {
            pattern: pattern.to_string(),
        })?;
        self.pattern = Some(compiled);
        Ok(self)
    }

    /// Whole floats given for an integer field are stored as integers, so `3.0` reaches the
    /// handler as `3`.
    fn normalize(&self, value: &Value) -> Value {
        match (self.field_type, as_integer(value)) {
            (FieldType::Integer, Some(integer)) => Value::from(integer),
            _ => value.clone(),
        }
    }

    /// Checks a present value against type and constraints.
    fn check(&self, field: &str, value: &Value) -> Result<(), ValidationError> {
        if !self.field_type.accepts(value) {
            return Err(ValidationError::new(
                ValidationErrorKind::TypeMismatch,
                field,
                format!("expected {}, got {}", self.field_type, json_type_name(value)),
            ));
        }

        if self.field_type.is_numeric() {
            let number = value.as_f64().unwrap_or(f64::NAN);
            if let Some(min) = self.min {
                if number < min {
                    return Err(ValidationError::new(
                        ValidationErrorKind::ConstraintViolation,
                        field,
                        format!("must be >= {min}"),
                    ));
                }
            }
            if let Some(max) = self.max {
                if number > max {
                    return Err(ValidationError::new(
                        ValidationErrorKind::ConstraintViolation,
                        field,
                        format!("must be <= {max}"),
                    ));
                }
            }
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|candidate| values_equal(candidate, value)) {
                return Err(ValidationError::new(
                    ValidationErrorKind::ConstraintViolation,
                    field,
                    "value is not one of the allowed values",
                ));
            }
        }

        if let (Some(pattern), Some(text)) = (&self.pattern, value.as_str()) {
            if !pattern.is_match(text) {
                return Err(ValidationError::new(
                    ValidationErrorKind::ConstraintViolation,
                    field,
                    format!("must match pattern {}", pattern.as_str()),
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("schema must be a JSON object mapping field names to field specs")]
    NotAnObject,
    #[error("field `{field}` has an invalid spec: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("invalid regular expression `{pattern}`")]
    InvalidPattern { pattern: String },
    #[error("schema option `{option}` {reason}")]
    InvalidOption { option: String, reason: &'static str },
}

/// Wire form of one field, as found in the declarative description format.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFieldSpec {
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default, rename = "enum")]
    allowed: Option<Vec<Value>>,
    #[serde(default)]
    pattern: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: BTreeMap<String, FieldSpec>,
    strict: bool,
}

impl Schema {
    pub fn new<N>(fields: impl IntoIterator<Item = (N, FieldSpec)>) -> Result<Self, SchemaError>
    where
        N: Into<String>,
    {
        let mut schema = Self::default();
        for (name, spec) in fields {
            let name = name.into();
            check_spec(&name, &spec)?;
            schema.fields.insert(name, spec);
        }
        Ok(schema)
    }

    /// Schema that accepts no arguments besides ignored extras.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Parses the declarative description format.
    ///
    /// Accepts either a flat `{field: spec}` map or `{"strict": bool, "fields": {field: spec}}`.
    pub fn from_json(description: &Value) -> Result<Self, SchemaError> {
        let object = description.as_object().ok_or(SchemaError::NotAnObject)?;

        let (fields, strict) = match object.get("fields") {
            Some(Value::Object(fields)) if !fields.contains_key("type") => {
                let unknown = object
                    .keys()
                    .find(|key| !matches!(key.as_str(), "fields" | "strict"));
                if let Some(option) = unknown {
                    return Err(SchemaError::InvalidOption {
                        option: option.clone(),
                        reason: "is not recognised",
                    });
                }
                let strict = match object.get("strict") {
                    None => false,
                    Some(Value::Bool(strict)) => *strict,
                    Some(_) => {
                        return Err(SchemaError::InvalidOption {
                            option: "strict".to_string(),
                            reason: "must be a boolean",
                        })
                    }
                };
                (fields, strict)
            }
            _ => (object, false),
        };

        let mut parsed = Vec::with_capacity(fields.len());
        for (name, raw) in fields {
            let raw: RawFieldSpec =
                serde_json::from_value(raw.clone()).map_err(|err| SchemaError::InvalidField {
                    field: name.clone(),
                    reason: err.to_string(),
                })?;

            let mut spec = FieldSpec::new(raw.field_type);
            spec.required = raw.required;
            spec.description = raw.description;
            spec.default = raw.default;
            spec.min = raw.min;
            spec.max = raw.max;
            spec.allowed = raw.allowed;
            if let Some(pattern) = raw.pattern.as_deref() {
                spec = spec.pattern(pattern)?;
            }
            parsed.push((name.clone(), spec));
        }

        let schema = Self::new(parsed)?;
        Ok(if strict { schema.strict() } else { schema })
    }

    pub fn validate(&self, payload: &Value) -> Result<ValidatedArgs, ValidationError> {
        let empty = Map::new();
        let object = match payload {
            Value::Null => &empty,
            Value::Object(object) => object,
            other => {
                return Err(ValidationError::new(
                    ValidationErrorKind::TypeMismatch,
                    "arguments",
                    format!("expected object, got {}", json_type_name(other)),
                ))
            }
        };

        let mut validated = Map::new();
        for (name, spec) in &self.fields {
            match object.get(name) {
                // explicit null counts as absent
                Some(value) if !value.is_null() => {
                    spec.check(name, value)?;
                    validated.insert(name.clone(), spec.normalize(value));
                }
                _ => {
                    if let Some(default) = &spec.default {
                        validated.insert(name.clone(), spec.normalize(default));
                    } else if spec.required {
                        return Err(ValidationError::new(
                            ValidationErrorKind::MissingField,
                            name,
                            "required field is missing",
                        ));
                    }
                }
            }
        }

        if self.strict {
            if let Some(unexpected) = object.keys().find(|key| !self.fields.contains_key(*key)) {
                return Err(ValidationError::new(
                    ValidationErrorKind::UnexpectedField,
                    unexpected,
                    "field is not declared by the schema",
                ));
            }
        }

        Ok(ValidatedArgs(validated))
    }
}

pub fn validate(schema: &Schema, payload: &Value) -> Result<ValidatedArgs, ValidationError> {
    schema.validate(payload)
}

fn check_spec(name: &str, spec: &FieldSpec) -> Result<(), SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidField {
        field: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("field name must not be empty"));
    }
    if (spec.min.is_some() || spec.max.is_some()) && !spec.field_type.is_numeric() {
        return Err(invalid("min/max only apply to number and integer fields"));
    }
    if let (Some(min), Some(max)) = (spec.min, spec.max) {
        if min > max {
            return Err(invalid("min must not exceed max"));
        }
    }
    if spec.pattern.is_some() && spec.field_type != FieldType::String {
        return Err(invalid("pattern only applies to string fields"));
    }
    if let Some(default) = &spec.default {
        spec.check(name, default)
            .map_err(|err| invalid(&format!("default value is invalid: {}", err.message)))?;
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    MissingField,
    TypeMismatch,
    ConstraintViolation,
    UnexpectedField,
}

impl ValidationErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::TypeMismatch => "type_mismatch",
            Self::ConstraintViolation => "constraint_violation",
            Self::UnexpectedField => "unexpected_field",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} on `{field}`: {message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, field: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Arguments that passed validation, with defaults filled and undeclared fields dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs(Map<String, Value>);

impl ValidatedArgs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(as_integer)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn object(&self, name: &str) -> Option<&Map<String, Value>> {
        self.get(name).and_then(Value::as_object)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    if let Some(integer) = value.as_i64() {
        return Some(integer);
    }
    value
        .as_f64()
        .filter(|float| float.is_finite() && float.fract() == 0.0)
        // 2^63 itself is out of range
        .filter(|float| float.abs() < i64::MAX as f64)
        .map(|float| float as i64)
}

// 2 and 2.0 compare equal for enum membership
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
