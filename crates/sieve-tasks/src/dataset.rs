use std::io::Write;

use serde::Serialize;
use serde_json::{Map, Value};

use sieve_core::document::Document;
use sieve_core::error::{Result, SieveError};
use sieve_core::output::TaskOutput;

/// Task results in tabular form, one row per document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub task_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn new(task_id: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            task_id: task_id.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(SieveError::ContractViolation(format!(
                "row has {} values for {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Rows as column-keyed objects.
    pub fn records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| self.columns.iter().cloned().zip(row.iter().cloned()).collect())
            .collect()
    }

    /// Writes one JSON object per line.
    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> Result<()> {
        for record in self.records() {
            serde_json::to_writer(&mut writer, &record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Pairs every document with its result for `task_id`.
pub(crate) fn task_results<'a>(
    task_id: &str,
    docs: &'a [Document],
) -> Result<Vec<(&'a Document, &'a TaskOutput)>> {
    docs.iter()
        .map(|doc| {
            doc.result(task_id)
                .map(|result| (doc, result))
                .ok_or_else(|| SieveError::MissingResult {
                    task_id: task_id.to_string(),
                })
        })
        .collect()
}

pub(crate) fn text_value(doc: &Document) -> Value {
    doc.text.clone().map(Value::String).unwrap_or(Value::Null)
}

pub(crate) fn unexpected_output(task_id: &str, output: &TaskOutput) -> SieveError {
    SieveError::ContractViolation(format!(
        "result for task {task_id} has unexpected shape: {output:?}"
    ))
}
