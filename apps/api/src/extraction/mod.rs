//! Text extraction: turns a `JobSource` into plain text for analysis.
//!
//! Every extraction failure is permanent: a corrupt or unsupported file does not
//! get better on retry, so the batch core never re-runs a failed extraction.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::debug;

use crate::batch::job::JobSource;

pub const SUPPORTED_EXTENSIONS: &[&str] = &[".pdf", ".docx", ".txt"];

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Unsupported file format '{0}'. Please upload PDF, DOCX or plain-text files.")]
    UnsupportedFormat(String),

    #[error("File size {size_mb:.2}MB exceeds maximum limit of {limit_mb}MB")]
    TooLarge { size_mb: f64, limit_mb: u64 },

    #[error("No text could be extracted from the file")]
    Empty,

    #[error("Error reading file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error extracting text from file: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, source: &JobSource) -> Result<String, ExtractionError>;
}

/// Reads files from disk. PDF and DOCX files are decoded on the blocking pool.
#[derive(Debug, Clone)]
pub struct FileExtractor {
    max_file_size_mb: u64,
}

impl FileExtractor {
    pub fn new(max_file_size_mb: u64) -> Self {
        Self { max_file_size_mb }
    }

    /// Format and size checks that need no I/O.
    pub fn validate(&self, source: &JobSource) -> Result<(), ExtractionError> {
        let extension = source.extension();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ExtractionError::UnsupportedFormat(extension));
        }
        let size_mb = source.size_bytes as f64 / (1024.0 * 1024.0);
        if size_mb > self.max_file_size_mb as f64 {
            return Err(ExtractionError::TooLarge {
                size_mb,
                limit_mb: self.max_file_size_mb,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Extractor for FileExtractor {
    async fn extract(&self, source: &JobSource) -> Result<String, ExtractionError> {
        self.validate(source)?;

        let text = match source.extension().as_str() {
            ".pdf" => {
                let path = source.path.clone();
                tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
                    .await
                    .map_err(|e| ExtractionError::Decode(e.to_string()))?
                    .map_err(|e| ExtractionError::Decode(e.to_string()))?
            }
            ".docx" => {
                let path = source.path.clone();
                tokio::task::spawn_blocking(move || docx_text(&path))
                    .await
                    .map_err(|e| ExtractionError::Decode(e.to_string()))??
            }
            _ => tokio::fs::read_to_string(&source.path).await?,
        };

        let text = normalize_whitespace(&text);
        if text.is_empty() {
            return Err(ExtractionError::Empty);
        }
        debug!(file = %source.name, chars = text.len(), "Extracted text");
        Ok(text)
    }
}

const DOCX_BODY: &str = "word/document.xml";

/// Pulls the text runs (`<w:t>`) out of a DOCX body, one line per paragraph.
fn docx_text(path: &Path) -> Result<String, ExtractionError> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)
        .map_err(|e| ExtractionError::Decode(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name(DOCX_BODY)
        .map_err(|e| ExtractionError::Decode(format!("{DOCX_BODY}: {e}")))?
        .read_to_string(&mut xml)?;

    let mut reader = Reader::from_str(&xml);
    let mut text = String::new();
    let mut in_run = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_run = true,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_run = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" | b"w:cr" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) if in_run => {
                let run = e
                    .unescape()
                    .map_err(|e| ExtractionError::Decode(e.to_string()))?;
                text.push_str(&run);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractionError::Decode(format!(
                    "malformed {DOCX_BODY} at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
    }
    Ok(text)
}

/// Collapses runs of blank lines and trailing spaces left behind by PDF decoding.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
