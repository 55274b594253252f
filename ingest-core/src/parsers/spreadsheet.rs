//! Spreadsheet (xls/xlsx) and CSV parsers.

use std::io::Cursor;

use async_trait::async_trait;
use calamine::Reader;

use crate::error::{IngestError, IngestResult};
use crate::models::{Fragment, ParserOutput};

use super::{ParseOptions, Parser};

/// Parses xls/xlsx workbooks with `calamine`, emitting one fragment per
/// sheet and a concatenated raw-text view across all sheets.
pub struct SpreadsheetParser;

impl SpreadsheetParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SpreadsheetParser {
    fn default() -> Self {
        Self::new()
    }
}

fn sheet_to_text(sheet: &calamine::Range<calamine::Data>) -> String {
    let mut text = String::new();
    for row in sheet.rows() {
        let cells: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
        text.push_str(&cells.join("\t"));
        text.push('\n');
    }
    text
}

#[async_trait]
impl Parser for SpreadsheetParser {
    async fn parse(&self, blob: &[u8], _options: &ParseOptions) -> IngestResult<ParserOutput> {
        let blob = blob.to_vec();
        tokio::task::spawn_blocking(move || {
            let cursor = Cursor::new(blob);
            let mut workbook: calamine::Xlsx<_> = calamine::open_workbook_from_rs(cursor)
                .map_err(|e| IngestError::ParserIo {
                    message: format!("failed to open workbook: {e}"),
                })?;

            let mut raw_text = String::new();
            let mut fragments = Vec::new();

            for sheet_name in workbook.sheet_names().to_vec() {
                if let Ok(sheet) = workbook.worksheet_range(&sheet_name) {
                    let text = sheet_to_text(&sheet);
                    raw_text.push_str(&text);
                    fragments.push(Fragment {
                        name: sheet_name,
                        text,
                        confidence: 0.9,
                    });
                }
            }

            Ok(ParserOutput {
                raw_text,
                fragments,
                confidence: 0.9,
            })
        })
        .await
        .map_err(|e| IngestError::ParserIo {
            message: format!("spreadsheet extraction task panicked: {e}"),
        })?
    }
}

/// Parses CSV with the `csv` crate, one sub-fragment per batch of rows.
pub struct CsvParser {
    rows_per_fragment: usize,
}

impl CsvParser {
    pub fn new() -> Self {
        Self {
            rows_per_fragment: 100,
        }
    }
}

impl Default for CsvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Parser for CsvParser {
    async fn parse(&self, blob: &[u8], _options: &ParseOptions) -> IngestResult<ParserOutput> {
        let blob = blob.to_vec();
        let rows_per_fragment = self.rows_per_fragment;
        tokio::task::spawn_blocking(move || {
            let mut reader = csv::ReaderBuilder::new()
                .flexible(true)
                .from_reader(Cursor::new(blob));

            let mut raw_text = String::new();
            let mut fragments = Vec::new();
            let mut batch = String::new();
            let mut batch_rows = 0usize;
            let mut batch_index = 0usize;

            for record in reader.records() {
                let record = record.map_err(|e| IngestError::ParserIo {
                    message: format!("failed to read CSV row: {e}"),
                })?;
                let line = record.iter().collect::<Vec<_>>().join(",");
                raw_text.push_str(&line);
                raw_text.push('\n');
                batch.push_str(&line);
                batch.push('\n');
                batch_rows += 1;

                if batch_rows >= rows_per_fragment {
                    fragments.push(Fragment {
                        name: format!("rows_{batch_index}"),
                        text: std::mem::take(&mut batch),
                        confidence: 1.0,
                    });
                    batch_index += 1;
                    batch_rows = 0;
                }
            }
            if batch_rows > 0 {
                fragments.push(Fragment {
                    name: format!("rows_{batch_index}"),
                    text: batch,
                    confidence: 1.0,
                });
            }

            Ok(ParserOutput {
                raw_text,
                fragments,
                confidence: 1.0,
            })
        })
        .await
        .map_err(|e| IngestError::ParserIo {
            message: format!("csv extraction task panicked: {e}"),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_simple_csv() {
        let data = b"a,b,c\n1,2,3\n4,5,6\n".to_vec();
        let parser = CsvParser::new();
        let output = parser.parse(&data, &ParseOptions::default()).await.unwrap();
        assert!(output.raw_text.contains("1,2,3"));
        assert_eq!(output.confidence, 1.0);
    }
}
