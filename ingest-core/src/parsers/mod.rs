//! Parser Registry (spec §4.1, C1): maps declared Kind to a parsing
//! capability and runs extraction, producing raw text + structured
//! fragments + a confidence score.
//!
//! Parsers are a capability, not a class hierarchy (spec §9): a table of
//! `{kind -> impl Parser}` suffices. Each concrete parser below wraps one
//! real crate, grounded in the teacher's `pdf/extractor.rs` (kept and
//! generalized for `PdfParser`) and, for the other declared kinds, the
//! crates the wider retrieval pack reaches for.

mod docx;
mod image_ocr;
mod pdf;
mod spreadsheet;

pub use docx::DocxParser;
pub use image_ocr::{ImageOcrParser, NullOcrEngine, OcrEngine};
pub use pdf::PdfParser;
pub use spreadsheet::{CsvParser, SpreadsheetParser};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{IngestError, IngestResult};
use crate::models::{Kind, ParserOutput};

/// Options passed to a parser invocation (placeholder for future per-job
/// tuning; empty today but kept as an explicit seam per spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub min_text_length_for_ocr_fallback: usize,
}

impl ParseOptions {
    pub const DEFAULT_OCR_THRESHOLD: usize = 64;
}

/// A unit of capability that turns a blob of a given kind into a
/// `ParserOutput` (spec glossary).
///
/// Implementors must not mutate the input and should stream large blobs
/// when the underlying library allows it (spec §4.1's memory bound).
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, blob: &[u8], options: &ParseOptions) -> IngestResult<ParserOutput>;
}

/// Default per-parser timeout before the pipeline cancels the call and
/// reports a transient (retryable) error (spec §4.1).
pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Maps declared `Kind` to a `Parser`, with documented precedence for
/// kinds that can be served by more than one parser (spec §4.1).
pub struct ParserRegistry {
    parsers: HashMap<Kind, Arc<dyn Parser>>,
    ocr_fallback_threshold: usize,
}

impl ParserRegistry {
    /// Build the default registry: `PdfParser` for PDFs (falling back to
    /// OCR when extracted text is too short), `SpreadsheetParser` for
    /// xls/xlsx, `CsvParser` for csv, `DocxParser` for doc/docx, and
    /// `ImageOcrParser` for every image kind.
    pub fn default_registry(ocr: Arc<dyn OcrEngine>) -> Self {
        let mut parsers: HashMap<Kind, Arc<dyn Parser>> = HashMap::new();
        parsers.insert(Kind::Pdf, Arc::new(PdfParser::new()));
        parsers.insert(Kind::Xls, Arc::new(SpreadsheetParser::new()));
        parsers.insert(Kind::Xlsx, Arc::new(SpreadsheetParser::new()));
        parsers.insert(Kind::Csv, Arc::new(CsvParser::new()));
        parsers.insert(Kind::Doc, Arc::new(DocxParser::new()));
        parsers.insert(Kind::Docx, Arc::new(DocxParser::new()));
        for kind in [Kind::Jpg, Kind::Jpeg, Kind::Png, Kind::Tiff, Kind::Bmp] {
            parsers.insert(kind, Arc::new(ImageOcrParser::new(ocr.clone())));
        }
        Self {
            parsers,
            ocr_fallback_threshold: ParseOptions::DEFAULT_OCR_THRESHOLD,
        }
    }

    pub fn with_parser(mut self, kind: Kind, parser: Arc<dyn Parser>) -> Self {
        self.parsers.insert(kind, parser);
        self
    }

    /// Select a parser by declared kind and run it with the configured
    /// timeout. An unrecognized kind is rejected without invoking any
    /// parser (spec §4.1's edge policy).
    pub async fn parse(
        &self,
        blob: &[u8],
        kind: Kind,
        ocr: Arc<dyn OcrEngine>,
    ) -> IngestResult<ParserOutput> {
        let parser = self
            .parsers
            .get(&kind)
            .ok_or_else(|| IngestError::unsupported_kind(format!("{kind:?}")))?;

        let options = ParseOptions {
            min_text_length_for_ocr_fallback: self.ocr_fallback_threshold,
        };

        let output = tokio::time::timeout(DEFAULT_PARSE_TIMEOUT, parser.parse(blob, &options))
            .await
            .map_err(|_| IngestError::ParseTimeout {
                message: format!("parser for {kind:?} timed out"),
            })??;

        // OCR fallback: image-heavy PDFs whose extracted text is below the
        // threshold get a second pass through OCR, merging fragments by
        // preferring the higher-confidence value per field (spec §4.1).
        if kind == Kind::Pdf && output.raw_text.trim().len() < self.ocr_fallback_threshold {
            tracing::debug!(
                chars = output.raw_text.trim().len(),
                "PDF text below OCR fallback threshold, re-parsing with OCR"
            );
            let ocr_parser = ImageOcrParser::new(ocr);
            if let Ok(ocr_output) =
                tokio::time::timeout(DEFAULT_PARSE_TIMEOUT, ocr_parser.parse(blob, &options)).await
            {
                if let Ok(ocr_output) = ocr_output {
                    return Ok(merge_outputs(output, ocr_output));
                }
            }
        }

        Ok(output)
    }
}

/// Merge two `ParserOutput`s (the primary pass and an OCR fallback pass),
/// preferring the higher-confidence fragment per field (spec §4.1).
fn merge_outputs(primary: ParserOutput, fallback: ParserOutput) -> ParserOutput {
    let raw_text = if fallback.confidence > primary.confidence {
        fallback.raw_text.clone()
    } else {
        primary.raw_text.clone()
    };

    let mut by_name: HashMap<String, crate::models::Fragment> = HashMap::new();
    for fragment in primary.fragments.into_iter().chain(fallback.fragments) {
        by_name
            .entry(fragment.name.clone())
            .and_modify(|existing| {
                if fragment.confidence > existing.confidence {
                    *existing = fragment.clone();
                }
            })
            .or_insert(fragment);
    }

    ParserOutput {
        raw_text,
        fragments: by_name.into_values().collect(),
        confidence: primary.confidence.max(fallback.confidence),
    }
}
