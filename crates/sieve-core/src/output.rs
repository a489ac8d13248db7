use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
}

/// A labelled text span as reported by tagger backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub label: String,
    pub text: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Sorted by score, descending.
    pub labels: Vec<LabelScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Classification {
    pub fn top(&self) -> Option<&LabelScore> {
        self.labels.first()
    }
}

/// Per-document result of a predictive task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TaskOutput {
    Classification(Classification),
    Entities(Vec<serde_json::Value>),
    Answers(Vec<Answer>),
    Text(String),
}

impl TaskOutput {
    pub fn as_classification(&self) -> Option<&Classification> {
        match self {
            Self::Classification(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_entities(&self) -> Option<&[serde_json::Value]> {
        match self {
            Self::Entities(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_answers(&self) -> Option<&[Answer]> {
        match self {
            Self::Answers(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            _ => None,
        }
    }
}
