//! Conversation history: an append-only log of question/answer pairs.
//!
//! Turns always arrive in pairs, Question then Answer, sharing the model
//! name and source documents of the exchange. [`History::undo_last_pair`]
//! is the exact inverse of [`History::append`]. The log can be exported as
//! rows or as CSV with the columns
//! `role, text, model_name, timestamp, source_documents`.

use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::Result;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Question,
    Answer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Question => f.write_str("Question"),
            Role::Answer => f.write_str("Answer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub model_name: String,
    pub timestamp: DateTime<Local>,
    pub source_documents: Vec<String>,
}

/// One exported row; every field already rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub role: String,
    pub text: String,
    pub model_name: String,
    pub timestamp: String,
    pub source_documents: String,
}

#[derive(Debug, Clone, Default)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a Question turn and its Answer turn, stamped with the current time.
    pub fn append(
        &mut self,
        question: &str,
        answer: &str,
        model_name: &str,
        source_documents: &[String],
    ) {
        let now = Local::now();
        for (role, text) in [(Role::Question, question), (Role::Answer, answer)] {
            self.turns.push(Turn {
                role,
                text: text.to_string(),
                model_name: model_name.to_string(),
                timestamp: now,
                source_documents: source_documents.to_vec(),
            });
        }
    }

    /// Remove the most recent Answer and the Question right before it.
    ///
    /// Returns whether a pair was removed. Fewer than two turns, or a tail
    /// that is not Question followed by Answer, is left unchanged.
    pub fn undo_last_pair(&mut self) -> bool {
        let n = self.turns.len();
        if n < 2 {
            return false;
        }
        if self.turns[n - 1].role != Role::Answer || self.turns[n - 2].role != Role::Question {
            return false;
        }
        self.turns.truncate(n - 2);
        true
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }

    /// One row per turn, in append order.
    pub fn export(&self) -> Vec<ExportRow> {
        self.turns
            .iter()
            .map(|t| ExportRow {
                role: t.role.to_string(),
                text: t.text.clone(),
                model_name: t.model_name.clone(),
                timestamp: t.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                source_documents: t.source_documents.join(", "),
            })
            .collect()
    }

    /// Write [`export`](Self::export) as CSV with a header row.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        // An empty history still gets a header.
        if self.turns.is_empty() {
            wtr.write_record(["role", "text", "model_name", "timestamp", "source_documents"])
                .map_err(csv_error)?;
        }
        for row in self.export() {
            wtr.serialize(row).map_err(csv_error)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

fn csv_error(e: csv::Error) -> crate::Error {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => crate::Error::Io(io),
        other => crate::Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{:?}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<String> {
        vec!["a.pdf".to_string(), "b.pdf".to_string()]
    }

    #[test]
    fn append_adds_question_then_answer() {
        let mut h = History::new();
        h.append("What color is the sky?", "Blue.", "gemini", &docs());
        assert_eq!(h.len(), 2);
        assert_eq!(h.turns()[0].role, Role::Question);
        assert_eq!(h.turns()[1].role, Role::Answer);
        assert_eq!(h.turns()[1].text, "Blue.");
        assert_eq!(h.turns()[0].model_name, h.turns()[1].model_name);
        assert_eq!(h.turns()[0].source_documents, docs());
    }

    #[test]
    fn undo_is_inverse_of_append() {
        let mut h = History::new();
        h.append("q1", "a1", "m", &docs());
        let before: Vec<Turn> = h.turns().to_vec();
        h.append("q2", "a2", "m", &docs());
        assert!(h.undo_last_pair());
        assert_eq!(h.turns(), before.as_slice());
    }

    #[test]
    fn undo_on_short_history_is_noop() {
        let mut h = History::new();
        assert!(!h.undo_last_pair());
        h.append("q", "a", "m", &[]);
        h.turns.pop();
        assert!(!h.undo_last_pair());
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn export_rows_in_append_order() {
        let mut h = History::new();
        h.append("q1", "a1", "m", &docs());
        h.append("q2", "a2", "m", &docs());
        let rows = h.export();
        let texts: Vec<&str> = rows.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["q1", "a1", "q2", "a2"]);
        assert_eq!(rows[0].role, "Question");
        assert_eq!(rows[0].source_documents, "a.pdf, b.pdf");
        assert_eq!(rows[0].timestamp.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn csv_has_header_and_quotes_commas() {
        let mut h = History::new();
        h.append("Is it blue, or green?", "Blue", "m", &docs());
        let csv = h.to_csv().unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "role,text,model_name,timestamp,source_documents"
        );
        let first = lines.next().unwrap();
        assert!(first.starts_with("Question,\"Is it blue, or green?\",m,"));
        assert!(first.ends_with("\"a.pdf, b.pdf\""));
        assert_eq!(csv.lines().count(), 3);
    }

    #[test]
    fn empty_history_exports_header_only() {
        let csv = History::new().to_csv().unwrap();
        assert_eq!(csv.trim_end(), "role,text,model_name,timestamp,source_documents");
    }

    #[test]
    fn reset_clears() {
        let mut h = History::new();
        h.append("q", "a", "m", &[]);
        h.reset();
        assert!(h.is_empty());
    }
}
