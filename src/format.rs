//! Machine-readable export of the annotation set.
//!
//! These writers materialize the query surface (leaves in address order
//! with their metadata, plus the run summary) for downstream tooling.
//! Human-oriented listing layout is a consumer concern and lives outside
//! this crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::Engine;

/// Errors raised while writing an export
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// One JSON document: leaves plus run summary
    Json,
    /// One JSON object per leaf, one per line
    JsonLines,
    /// One CSV row per leaf
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::JsonLines => write!(f, "jsonl"),
            ExportFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "jsonl" | "jsonlines" => Ok(ExportFormat::JsonLines),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(format!("Unknown export format: {}", s)),
        }
    }
}

impl ExportFormat {
    /// Get all available export formats
    pub fn available_formats() -> &'static [Self] {
        &[ExportFormat::Json, ExportFormat::JsonLines, ExportFormat::Csv]
    }

    /// Get a writer for this export format
    pub fn get_formatter(&self) -> Box<dyn AnnotationFormatter> {
        match self {
            ExportFormat::Json => Box::new(JsonFormatter),
            ExportFormat::JsonLines => Box::new(JsonLinesFormatter),
            ExportFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Formatter trait for annotation export
pub trait AnnotationFormatter {
    /// Render the engine's annotation set
    fn format(&self, engine: &Engine) -> Result<String, FormatError>;
}

/// Export annotations as one JSON document
pub struct JsonFormatter;

/// Export annotations as JSON Lines
pub struct JsonLinesFormatter;

/// Export annotations as CSV
pub struct CsvFormatter;

/// Serializable view of one leaf
#[derive(Serialize, Deserialize)]
struct LeafRecord {
    /// Start address as hex string
    lo: String,
    /// End address (exclusive) as hex string
    hi: String,
    /// Interpretation tag ("code", "text", ...)
    kind: String,
    /// Rendered body (links resolve their target)
    text: String,
    compact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    line_comments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_comment: Option<String>,
}

fn leaf_records(engine: &Engine) -> Vec<LeafRecord> {
    let tree = engine.tree();
    tree.leaves()
        .map(|leaf| LeafRecord {
            lo: format!("0x{:x}", leaf.lo),
            hi: format!("0x{:x}", leaf.hi),
            kind: leaf.kind.tag().to_string(),
            text: tree.render(leaf),
            compact: leaf.compact,
            label: tree.label(leaf.lo).map(str::to_string),
            line_comments: tree.line_comments(leaf.lo).to_vec(),
            block_comment: tree.block_comment(leaf.lo).map(str::to_string),
        })
        .collect()
}

impl AnnotationFormatter for JsonFormatter {
    fn format(&self, engine: &Engine) -> Result<String, FormatError> {
        #[derive(Serialize)]
        struct Document {
            leaves: Vec<LeafRecord>,
            summary: crate::engine::RunSummary,
        }
        let doc = Document {
            leaves: leaf_records(engine),
            summary: engine.summary(),
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }
}

impl AnnotationFormatter for JsonLinesFormatter {
    fn format(&self, engine: &Engine) -> Result<String, FormatError> {
        let mut output = String::new();
        for record in leaf_records(engine) {
            output.push_str(&serde_json::to_string(&record)?);
            output.push('\n');
        }
        Ok(output)
    }
}

impl AnnotationFormatter for CsvFormatter {
    fn format(&self, engine: &Engine) -> Result<String, FormatError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["lo", "hi", "kind", "text", "label", "line_comments"])?;
        for record in leaf_records(engine) {
            let comments = record.line_comments.join("; ");
            writer.write_record([
                record.lo.as_str(),
                record.hi.as_str(),
                record.kind.as_str(),
                record.text.as_str(),
                record.label.as_deref().unwrap_or(""),
                comments.as_str(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| FormatError::Generic(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| FormatError::Generic(e.to_string()))
    }
}
