//! JSON-schema-like validation and sanitization for URL Metric payloads.
//!
//! Schemas are plain values assembled by the caller; there is no global
//! registry. Validation walks the payload once and returns the sanitized
//! value, or the first violation found.

use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::LazyLock;

static DISALLOWED_URL_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9\-~+_.?#=!&;,/:%@$|*'()\[\]\x{80}-\x{10FFFF}]")
        .expect("url character class is valid")
});

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct DataValidationError {
    path: String,
    message: String,
}

impl DataValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Path of the offending field, e.g. `UrlMetric[elements][0][xpath]`.
    pub fn field_path(&self) -> &str {
        &self.path
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid schema pattern {source_pattern}: {error}")]
pub struct PatternError {
    source_pattern: String,
    error: regex::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl SchemaType {
    pub fn name(self) -> &'static str {
        match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Null => "null",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Null => value.is_null(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Uri,
    Uuid,
}

/// A compiled regex that remembers the source it was built from, so
/// violations can quote it.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, PatternError> {
        let regex = Regex::new(source).map_err(|error| PatternError {
            source_pattern: source.to_string(),
            error,
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub(crate) fn from_regex(regex: &Regex) -> Self {
        Self {
            source: regex.as_str().to_string(),
            regex: regex.clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    types: Vec<SchemaType>,
    required: bool,
    properties: Vec<(String, Schema)>,
    additional_properties: bool,
    items: Option<Box<Schema>>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    max_length: Option<usize>,
    pattern: Option<Pattern>,
    format: Option<Format>,
}

impl Schema {
    fn of(kind: SchemaType) -> Self {
        Self {
            types: vec![kind],
            required: false,
            properties: Vec::new(),
            additional_properties: true,
            items: None,
            minimum: None,
            maximum: None,
            max_length: None,
            pattern: None,
            format: None,
        }
    }

    pub fn object() -> Self {
        Self::of(SchemaType::Object)
    }

    pub fn array(items: Schema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(SchemaType::Array)
        }
    }

    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    pub fn number() -> Self {
        Self::of(SchemaType::Number)
    }

    pub fn integer() -> Self {
        Self::of(SchemaType::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(SchemaType::Boolean)
    }

    pub fn nullable(mut self) -> Self {
        if !self.types.contains(&SchemaType::Null) {
            self.types.push(SchemaType::Null);
        }
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Adds or replaces a property, keeping declaration order.
    pub fn property(mut self, name: &str, schema: Schema) -> Self {
        self.insert_property(name, schema);
        self
    }

    pub(crate) fn insert_property(&mut self, name: &str, schema: Schema) {
        match self.properties.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = schema,
            None => self.properties.push((name.to_string(), schema)),
        }
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|(n, _)| n == name)
    }

    pub fn property_schema(&self, name: &str) -> Option<&Schema> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    pub fn additional_properties(mut self, allowed: bool) -> Self {
        self.additional_properties = allowed;
        self
    }

    pub fn minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    fn type_list(&self) -> String {
        self.types
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Validates `value` at `path` and returns its sanitized form.
    pub fn validate(&self, value: &Value, path: &str) -> Result<Value, DataValidationError> {
        let Some(kind) = self.types.iter().copied().find(|t| t.accepts(value)) else {
            return Err(DataValidationError::new(
                path,
                format!("{} is not of type {}.", path, self.type_list()),
            ));
        };

        match kind {
            SchemaType::Null => Ok(Value::Null),
            SchemaType::Boolean => Ok(value.clone()),
            SchemaType::Object => self.validate_object(value, path),
            SchemaType::Array => self.validate_array(value, path),
            SchemaType::String => self.validate_string(value, path),
            SchemaType::Number => {
                let n = value.as_f64().unwrap_or_default();
                self.check_bounds(n, path)?;
                Ok(Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null))
            }
            SchemaType::Integer => {
                let n = value
                    .as_i64()
                    .or_else(|| value.as_f64().map(|f| f as i64))
                    .unwrap_or_default();
                self.check_bounds(n as f64, path)?;
                Ok(Value::from(n))
            }
        }
    }

    fn validate_object(&self, value: &Value, path: &str) -> Result<Value, DataValidationError> {
        let empty = Map::new();
        let object = value.as_object().unwrap_or(&empty);

        for (name, schema) in &self.properties {
            if schema.required && !object.contains_key(name) {
                return Err(DataValidationError::new(
                    format!("{}[{}]", path, name),
                    format!("{} is a required property of {}.", name, path),
                ));
            }
        }

        let mut sanitized = Map::new();
        for (key, item) in object {
            let child_path = format!("{}[{}]", path, key);
            match self.property_schema(key) {
                Some(schema) => {
                    sanitized.insert(key.clone(), schema.validate(item, &child_path)?);
                }
                None if self.additional_properties => {
                    sanitized.insert(key.clone(), item.clone());
                }
                None => {
                    return Err(DataValidationError::new(
                        child_path,
                        format!("{} is not a valid property of Object.", key),
                    ));
                }
            }
        }
        Ok(Value::Object(sanitized))
    }

    fn validate_array(&self, value: &Value, path: &str) -> Result<Value, DataValidationError> {
        let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
        let Some(item_schema) = self.items.as_deref() else {
            return Ok(value.clone());
        };
        items
            .iter()
            .enumerate()
            .map(|(i, item)| item_schema.validate(item, &format!("{}[{}]", path, i)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    fn validate_string(&self, value: &Value, path: &str) -> Result<Value, DataValidationError> {
        let s = value.as_str().unwrap_or_default();

        if let Some(max) = self.max_length {
            if s.chars().count() > max {
                return Err(DataValidationError::new(
                    path,
                    format!("{} must be at most {} characters long.", path, max),
                ));
            }
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(s) {
                return Err(DataValidationError::new(
                    path,
                    format!("{} does not match pattern {}.", path, pattern.as_str()),
                ));
            }
        }

        match self.format {
            Some(Format::Uri) => {
                let sanitized = sanitize_url(s);
                if sanitized.is_empty() {
                    return Err(DataValidationError::new(
                        path,
                        format!("{} is not a valid URL.", path),
                    ));
                }
                Ok(Value::String(sanitized))
            }
            Some(Format::Uuid) => {
                if uuid::Uuid::parse_str(s).is_err() {
                    return Err(DataValidationError::new(
                        path,
                        format!("{} is not a valid UUID.", path),
                    ));
                }
                Ok(Value::String(s.to_string()))
            }
            None => Ok(Value::String(s.to_string())),
        }
    }

    fn check_bounds(&self, n: f64, path: &str) -> Result<(), DataValidationError> {
        if let Some(min) = self.minimum {
            if n < min {
                return Err(DataValidationError::new(
                    path,
                    format!("{} must be greater than or equal to {}.", path, min),
                ));
            }
        }
        if let Some(max) = self.maximum {
            if n > max {
                return Err(DataValidationError::new(
                    path,
                    format!("{} must be less than or equal to {}.", path, max),
                ));
            }
        }
        Ok(())
    }
}

/// Percent-encodes spaces and strips characters that cannot appear in a URL.
pub fn sanitize_url(raw: &str) -> String {
    let spaced = raw.trim().replace(' ', "%20");
    DISALLOWED_URL_CHARS.replace_all(&spaced, "").into_owned()
}
