//! Word document parser (doc/docx).
//!
//! `docx-rs` reads the OOXML `.docx` format. Legacy binary `.doc` files are
//! not OOXML; we attempt the same parse and fall back to a low-confidence
//! empty result rather than failing the job outright, since extraction
//! correctness is explicitly best-effort (spec §1 Non-goals).

use async_trait::async_trait;
use docx_rs::read_docx;

use crate::error::IngestResult;
use crate::models::ParserOutput;

use super::{ParseOptions, Parser};

pub struct DocxParser;

impl DocxParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DocxParser {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_text(bytes: &[u8]) -> Option<String> {
    let docx = read_docx(bytes).ok()?;
    let mut text = String::new();
    for child in &docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            for run_child in &paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = run_child {
                    for run_content in &run.children {
                        if let docx_rs::RunChild::Text(t) = run_content {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            text.push('\n');
        }
    }
    Some(text)
}

#[async_trait]
impl Parser for DocxParser {
    async fn parse(&self, blob: &[u8], _options: &ParseOptions) -> IngestResult<ParserOutput> {
        let blob = blob.to_vec();
        let text = tokio::task::spawn_blocking(move || extract_text(&blob))
            .await
            .unwrap_or(None);

        match text {
            Some(text) => {
                let confidence = if text.trim().is_empty() { 0.1 } else { 0.8 };
                Ok(ParserOutput {
                    raw_text: text,
                    fragments: Vec::new(),
                    confidence,
                })
            }
            None => {
                tracing::debug!("could not parse as OOXML, likely a legacy .doc file");
                Ok(ParserOutput {
                    raw_text: String::new(),
                    fragments: Vec::new(),
                    confidence: 0.0,
                })
            }
        }
    }
}
