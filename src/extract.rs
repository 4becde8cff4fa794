//! Document-to-text extraction for uploaded knowledge files.
//!
//! | Format | MIME type | Extension |
//! |--------|-----------|-----------|
//! | Plain text / Markdown / CSV | `text/*` | `.txt`, `.md`, `.csv` |
//! | PDF | `application/pdf` | `.pdf` |
//! | Word | `…wordprocessingml.document` | `.docx` |
//! | PowerPoint | `…presentationml.presentation` | `.pptx` |
//!
//! When the declared MIME type is missing or generic
//! (`application/octet-stream`), the file extension decides.

use std::io::{Cursor, Read};

use parley_core::knowledge::Extractor;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Maximum decompressed bytes read from one archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    InvalidUtf8,
    Pdf(String),
    Ooxml(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::InvalidUtf8 => write!(f, "text file is not valid UTF-8"),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Pdf,
    Docx,
    Pptx,
}

fn detect_format(mime_type: &str, file_name: &str) -> Option<Format> {
    let mime = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        MIME_PDF => return Some(Format::Pdf),
        MIME_DOCX => return Some(Format::Docx),
        MIME_PPTX => return Some(Format::Pptx),
        m if m.starts_with("text/") => return Some(Format::Text),
        "" | "application/octet-stream" => {}
        _ => return None,
    }

    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())?;
    match extension.as_str() {
        "txt" | "md" | "markdown" | "csv" => Some(Format::Text),
        "pdf" => Some(Format::Pdf),
        "docx" => Some(Format::Docx),
        "pptx" => Some(Format::Pptx),
        _ => None,
    }
}

/// Extract plain text from an uploaded file.
pub fn extract_text(bytes: &[u8], mime_type: &str, file_name: &str) -> Result<String, ExtractError> {
    match detect_format(mime_type, file_name) {
        Some(Format::Text) => String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::InvalidUtf8),
        Some(Format::Pdf) => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        Some(Format::Docx) => extract_docx(bytes),
        Some(Format::Pptx) => extract_pptx(bytes),
        None => Err(ExtractError::UnsupportedContentType(if mime_type.is_empty() {
            file_name.to_string()
        } else {
            mime_type.to_string()
        })),
    }
}

/// [`Extractor`] over [`extract_text`].
pub struct DocumentExtractor;

impl Extractor for DocumentExtractor {
    fn extract(&self, bytes: &[u8], mime_type: &str, file_name: &str) -> anyhow::Result<String> {
        Ok(extract_text(bytes, mime_type, file_name)?)
    }
}

// ============ OOXML ============

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "{} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    text_elements(&xml, b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort();

    let mut pages = Vec::with_capacity(slides.len());
    for (_, name) in slides {
        let xml = read_entry(&mut archive, &name)?;
        let text = text_elements(&xml, b"p")?;
        if !text.is_empty() {
            pages.push(text);
        }
    }
    Ok(pages.join("\n"))
}

/// Concatenate the text of every `<*:t>` element. A newline is emitted at
/// the end of each `paragraph` element so sentences from separate
/// paragraphs stay apart.
fn text_elements(xml: &[u8], paragraph: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}
