//! Image parser with a pluggable OCR backend.
//!
//! OCR is modeled as a capability (`OcrEngine`), not a class hierarchy
//! (spec §9) — `ImageOcrParser` decodes the image with the `image` crate
//! and hands the pixels to whichever engine was configured.

use async_trait::async_trait;

use crate::error::{IngestError, IngestResult};
use crate::models::ParserOutput;

use super::{ParseOptions, Parser};

/// A pluggable OCR backend.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &image::DynamicImage) -> anyhow::Result<(String, f32)>;
}

/// An OCR backend that recognizes nothing. Useful as the default when no
/// real OCR engine (e.g. a `tesseract` binding) has been wired up, so the
/// pipeline can still run end-to-end with a documented zero-confidence
/// result rather than failing every image job.
pub struct NullOcrEngine;

#[async_trait]
impl OcrEngine for NullOcrEngine {
    async fn recognize(&self, _image: &image::DynamicImage) -> anyhow::Result<(String, f32)> {
        Ok((String::new(), 0.0))
    }
}

/// Real OCR backend wrapping `tesseract`, built behind the crate's `ocr`
/// feature since it links against the system `libtesseract`.
#[cfg(feature = "ocr")]
pub struct TesseractOcrEngine;

#[cfg(feature = "ocr")]
#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    async fn recognize(&self, image: &image::DynamicImage) -> anyhow::Result<(String, f32)> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let bytes = rgb.into_raw();
        tokio::task::spawn_blocking(move || {
            let text = tesseract::ocr_from_frame(&bytes, width as i32, height as i32, 3, width as i32 * 3, "eng")?;
            Ok((text, 0.6))
        })
        .await?
    }
}

pub struct ImageOcrParser {
    engine: std::sync::Arc<dyn OcrEngine>,
}

impl ImageOcrParser {
    pub fn new(engine: std::sync::Arc<dyn OcrEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Parser for ImageOcrParser {
    async fn parse(&self, blob: &[u8], _options: &ParseOptions) -> IngestResult<ParserOutput> {
        let image = image::load_from_memory(blob).map_err(|e| IngestError::ParserIo {
            message: format!("failed to decode image: {e}"),
        })?;

        let (text, confidence) =
            self.engine
                .recognize(&image)
                .await
                .map_err(|e| IngestError::ParserIo {
                    message: format!("OCR failed: {e}"),
                })?;

        Ok(ParserOutput {
            raw_text: text,
            fragments: Vec::new(),
            confidence,
        })
    }
}
