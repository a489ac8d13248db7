//! Engine-facing descriptions of the structured output a task expects.
//!
//! Three shapes exist because backends disagree on how output is described:
//! classifier backends take a plain label list, structured-generation backends take a
//! schema, and reasoning backends take a declarative signature with named input and output
//! fields.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Result, SieveError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    List { item: Box<FieldKind> },
    Object { fields: Vec<FieldSpec> },
    /// An object holding one numeric score per listed label.
    Scores { labels: Vec<String> },
}

impl FieldKind {
    pub fn list(item: FieldKind) -> Self {
        Self::List {
            item: Box::new(item),
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            Self::String => json!({ "type": "string" }),
            Self::Integer => json!({ "type": "integer" }),
            Self::Float => json!({ "type": "number" }),
            Self::Boolean => json!({ "type": "boolean" }),
            Self::List { item } => json!({ "type": "array", "items": item.json_schema() }),
            Self::Object { fields } => object_schema(fields, None),
            Self::Scores { labels } => {
                let properties: Map<String, Value> = labels
                    .iter()
                    .map(|l| (l.clone(), json!({ "type": "number", "minimum": 0, "maximum": 1 })))
                    .collect();
                json!({ "type": "object", "properties": properties, "required": labels })
            }
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::String, Value::String(_)) => true,
            (Self::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Float, Value::Number(_)) => true,
            (Self::Boolean, Value::Bool(_)) => true,
            (Self::List { item }, Value::Array(items)) => items.iter().all(|v| item.matches(v)),
            (Self::Object { fields }, Value::Object(map)) => {
                check_fields(fields, map).is_ok()
            }
            (Self::Scores { .. }, Value::Object(map)) => map.values().all(Value::is_number),
            _ => false,
        }
    }

    /// Whether values of this kind can be compared for equality reliably. Floats can't.
    pub fn is_comparable(&self) -> bool {
        match self {
            Self::String | Self::Integer | Self::Boolean => true,
            Self::Float | Self::Scores { .. } => false,
            Self::List { item } => item.is_comparable(),
            Self::Object { fields } => fields.iter().all(|f| f.kind.is_comparable()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional fields may be absent from model output; when present they must still fit.
    #[serde(default = "default_required", skip_serializing_if = "is_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

fn is_required(required: &bool) -> bool {
    *required
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Schema of the JSON object a structured-generation engine must produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<FieldSpec>,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: Option<&str>) -> Self {
        self.description = description.map(str::to_string);
        self
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn is_comparable(&self) -> bool {
        self.fields.iter().all(|f| f.kind.is_comparable())
    }

    pub fn to_json_schema(&self) -> Value {
        let mut schema = object_schema(&self.fields, self.description.as_deref());
        schema["title"] = Value::String(self.name.clone());
        schema
    }

    /// Checks that `value` is an object carrying every required field, and that every
    /// declared field present has a fitting type.
    pub fn validate(&self, value: &Value) -> Result<()> {
        let map = value.as_object().ok_or_else(|| {
            SieveError::ContractViolation(format!(
                "{} output is not a JSON object: {value}",
                self.name
            ))
        })?;
        check_fields(&self.fields, map).map_err(|field| {
            SieveError::ContractViolation(format!(
                "{} output has missing or mistyped field '{field}'",
                self.name
            ))
        })
    }

    /// Parses raw model text into a validated JSON object.
    pub fn parse_output(&self, raw: &str) -> Result<Value> {
        let cleaned = strip_code_fences(raw);
        let value: Value = serde_json::from_str(cleaned).map_err(|e| {
            tracing::debug!(schema = %self.name, raw = %cleaned, error = %e, "Model output is not valid JSON");
            SieveError::ContractViolation(format!("{} output is not valid JSON: {e}", self.name))
        })?;
        self.validate(&value)?;
        Ok(value)
    }
}

fn object_schema(fields: &[FieldSpec], description: Option<&str>) -> Value {
    let mut properties = Map::new();
    for field in fields {
        let mut schema = field.kind.json_schema();
        if let Some(desc) = &field.description {
            schema["description"] = Value::String(desc.clone());
        }
        properties.insert(field.name.clone(), schema);
    }
    let required: Vec<&str> = fields
        .iter()
        .filter(|f| f.required)
        .map(|f| f.name.as_str())
        .collect();
    let mut schema = json!({
        "type": "object",
        "properties": properties,
        "required": required,
    });
    if let Some(desc) = description {
        schema["description"] = Value::String(desc.to_string());
    }
    schema
}

fn check_fields<'a>(fields: &'a [FieldSpec], map: &Map<String, Value>) -> std::result::Result<(), &'a str> {
    for field in fields {
        match map.get(&field.name) {
            Some(value) if field.kind.matches(value) => {}
            None if !field.required => {}
            _ => return Err(field.name.as_str()),
        }
    }
    Ok(())
}

/// A named-field signature for engines that build their own prompts around instructions,
/// inputs and outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclarativeSignature {
    pub name: String,
    pub instructions: String,
    pub inputs: Vec<FieldSpec>,
    pub outputs: Vec<FieldSpec>,
}

impl DeclarativeSignature {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, field: FieldSpec) -> Self {
        self.inputs.push(field);
        self
    }

    pub fn output(mut self, field: FieldSpec) -> Self {
        self.outputs.push(field);
        self
    }

    /// Output schema the engine parses responses against. With `reasoning`, a leading
    /// optional free-text `reasoning` field is added.
    pub fn output_schema(&self, reasoning: bool) -> OutputSchema {
        let mut schema = OutputSchema::new(&self.name);
        if reasoning {
            schema = schema.field(
                FieldSpec::new("reasoning", FieldKind::String)
                    .describe("Step-by-step reasoning leading to the answer.")
                    .optional(),
            );
        }
        self.outputs
            .iter()
            .cloned()
            .fold(schema, |schema, field| schema.field(field))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptSignature {
    Labels { labels: Vec<String> },
    Schema(OutputSchema),
    Declarative(DeclarativeSignature),
}

impl PromptSignature {
    pub fn labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Labels {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Labels { .. } => "labels",
            Self::Schema(_) => "schema",
            Self::Declarative(_) => "declarative",
        }
    }

    pub fn as_labels(&self) -> Result<&[String]> {
        match self {
            Self::Labels { labels } => Ok(labels),
            other => Err(unexpected("labels", other)),
        }
    }

    pub fn as_schema(&self) -> Result<&OutputSchema> {
        match self {
            Self::Schema(schema) => Ok(schema),
            other => Err(unexpected("schema", other)),
        }
    }

    pub fn as_declarative(&self) -> Result<&DeclarativeSignature> {
        match self {
            Self::Declarative(sig) => Ok(sig),
            other => Err(unexpected("declarative", other)),
        }
    }
}

fn unexpected(expected: &str, got: &PromptSignature) -> SieveError {
    SieveError::InvalidSignature(format!(
        "expected a {expected} signature, got {}",
        got.variant_name()
    ))
}

/// Strips markdown code fences models tend to wrap JSON in despite instructions.
pub fn strip_code_fences(raw: &str) -> &str {
    let cleaned = raw.trim();
    if cleaned.starts_with("```") {
        let start = cleaned.find('{').unwrap_or(0);
        let end = cleaned.rfind('}').map(|i| i + 1).unwrap_or(cleaned.len());
        if start < end {
            return &cleaned[start..end];
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary_schema() -> OutputSchema {
        OutputSchema::new("Summary").field(FieldSpec::new("summary", FieldKind::String))
    }

    #[test]
    fn test_parse_output_valid() {
        let value = summary_schema().parse_output(r#"{"summary": "Short."}"#).unwrap();
        assert_eq!(value["summary"], "Short.");
    }

    #[test]
    fn test_parse_output_with_code_fences() {
        let raw = "```json\n{\"summary\": \"Fenced.\"}\n```";
        let value = summary_schema().parse_output(raw).unwrap();
        assert_eq!(value["summary"], "Fenced.");
    }

    #[test]
    fn test_parse_output_missing_field() {
        let err = summary_schema().parse_output(r#"{"other": 1}"#).unwrap_err();
        assert!(matches!(err, SieveError::ContractViolation(_)));
        assert!(err.to_string().contains("summary"));
    }

    #[test]
    fn test_parse_output_invalid_json() {
        assert!(summary_schema().parse_output("not json at all").is_err());
    }

    #[test]
    fn test_json_schema_lists_required_fields() {
        let schema = OutputSchema::new("Prediction")
            .with_description(Some("Multi-label classification."))
            .field(FieldSpec::new("reasoning", FieldKind::String))
            .field(FieldSpec::new("science", FieldKind::Float));
        let json = schema.to_json_schema();

        assert_eq!(json["title"], "Prediction");
        assert_eq!(json["description"], "Multi-label classification.");
        assert_eq!(json["required"], serde_json::json!(["reasoning", "science"]));
        assert_eq!(json["properties"]["science"]["type"], "number");
    }

    #[test]
    fn test_integer_field_rejects_float() {
        let schema = OutputSchema::new("Person").field(FieldSpec::new("age", FieldKind::Integer));
        assert!(schema.validate(&serde_json::json!({"age": 79})).is_ok());
        assert!(schema.validate(&serde_json::json!({"age": 79.5})).is_err());
    }

    #[test]
    fn test_comparability() {
        let comparable = OutputSchema::new("Person")
            .field(FieldSpec::new("name", FieldKind::String))
            .field(FieldSpec::new("age", FieldKind::Integer));
        assert!(comparable.is_comparable());

        let not_comparable = comparable.field(FieldSpec::new("height", FieldKind::Float));
        assert!(!not_comparable.is_comparable());
    }

    #[test]
    fn test_declarative_output_schema_with_reasoning() {
        let sig = DeclarativeSignature::new("Summary", "Summarize.")
            .input(FieldSpec::new("text", FieldKind::String))
            .output(FieldSpec::new("summary", FieldKind::String));
        let schema = sig.output_schema(true);
        let names: Vec<&str> = schema.field_names().collect();
        assert_eq!(names, vec!["reasoning", "summary"]);
        assert_eq!(sig.output_schema(false).fields.len(), 1);
        assert!(schema
            .validate(&serde_json::json!({"summary": "No reasoning given."}))
            .is_ok());
    }

    #[test]
    fn test_optional_field_may_be_absent_but_not_mistyped() {
        let schema = OutputSchema::new("Prediction")
            .field(FieldSpec::new("reasoning", FieldKind::String).optional())
            .field(FieldSpec::new("science", FieldKind::Float));

        assert!(schema.validate(&serde_json::json!({"science": 0.4})).is_ok());
        assert!(schema
            .validate(&serde_json::json!({"reasoning": 3, "science": 0.4}))
            .is_err());
        assert!(schema.validate(&serde_json::json!({"reasoning": "r"})).is_err());
        assert_eq!(schema.to_json_schema()["required"], serde_json::json!(["science"]));
    }

    #[test]
    fn test_required_flag_defaults_when_deserializing() {
        let field: FieldSpec =
            serde_json::from_value(serde_json::json!({"name": "age", "kind": {"type": "integer"}}))
                .unwrap();
        assert!(field.required);
        let optional = serde_json::to_value(FieldSpec::new("r", FieldKind::String).optional()).unwrap();
        assert_eq!(optional["required"], false);
    }

    #[test]
    fn test_signature_accessors() {
        let sig = PromptSignature::labels(["a", "b"]);
        assert_eq!(sig.as_labels().unwrap(), &["a".to_string(), "b".to_string()]);
        assert!(matches!(sig.as_schema(), Err(SieveError::InvalidSignature(_))));
    }
}
