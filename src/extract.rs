//! Multi-format text extraction for uploaded documents.
//!
//! Sources supply a filename plus raw bytes; this module returns zero or one
//! [`Document`]s of plain UTF-8 text. Binary formats (PDF, DOCX) are parsed
//! structurally; everything else goes through a text decode with a GBK
//! fallback for legacy regional encodings. A file that yields no text at all
//! is not an error, it simply produces no documents.

use std::io::Read;

use thiserror::Error;

use crate::models::{Document, META_ENCODING};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Parse a file into documents based on its filename extension.
///
/// A structured format that parses but yields no text falls back to a raw
/// text decode of the bytes; a malformed structured file is an error.
pub fn parse_bytes(filename: &str, bytes: &[u8]) -> Result<Vec<Document>, ExtractError> {
    let text = match extension(filename).as_deref() {
        Some("pdf") => structured_or_fallback(extract_pdf(bytes)?, bytes),
        Some("docx") => structured_or_fallback(extract_docx(bytes)?, bytes),
        _ => decode_text(bytes),
    };

    let Some(extracted) = text else {
        return Ok(Vec::new());
    };
    if extracted.text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut doc = Document::new(extracted.text);
    if let Some(encoding) = extracted.encoding {
        doc = doc.with_metadata(META_ENCODING, encoding);
    }
    Ok(vec![doc])
}

struct ExtractedText {
    text: String,
    encoding: Option<&'static str>,
}

/// Keep structured extraction output when it carries text, otherwise retry
/// the raw bytes as plain text.
fn structured_or_fallback(text: String, bytes: &[u8]) -> Option<ExtractedText> {
    if text.trim().is_empty() {
        decode_text(bytes)
    } else {
        Some(ExtractedText {
            text,
            encoding: None,
        })
    }
}

fn extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// Decode raw bytes as text: UTF-8 first, GBK when the UTF-8 result is empty
/// or carries replacement characters. Returns None when neither decodes.
fn decode_text(bytes: &[u8]) -> Option<ExtractedText> {
    let (utf8, _, utf8_errors) = encoding_rs::UTF_8.decode(bytes);
    if !utf8_errors && !utf8.trim().is_empty() {
        return Some(ExtractedText {
            text: utf8.into_owned(),
            encoding: Some("utf-8"),
        });
    }

    let (gbk, _, gbk_errors) = encoding_rs::GBK.decode(bytes);
    if !gbk_errors && !gbk.trim().is_empty() {
        return Some(ExtractedText {
            text: gbk.into_owned(),
            encoding: Some("gbk"),
        });
    }
    None
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_w_t_elements(&doc_xml)
}

/// Walk the document XML and collect the text of every `w:t` run, inserting
/// newlines at paragraph ends so the chunker sees natural boundaries.
fn extract_w_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a single-entry ZIP archive with stored (uncompressed) data,
    /// so every byte of the fixture is known.
    fn stored_zip(name: &str, body: &str, crc: u32) -> Vec<u8> {
        let name_b = name.as_bytes();
        let body_b = body.as_bytes();
        let len = body_b.len() as u32;

        let mut out = Vec::new();
        // local file header
        out.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
        out.extend_from_slice(&[10, 0]); // version needed
        out.extend_from_slice(&[0, 0]); // flags
        out.extend_from_slice(&[0, 0]); // method: stored
        out.extend_from_slice(&[0, 0, 0, 0]); // mod time/date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(name_b.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0, 0]); // extra len
        out.extend_from_slice(name_b);
        out.extend_from_slice(body_b);
        let cd_offset = out.len() as u32;
        // central directory
        out.extend_from_slice(&[0x50, 0x4b, 0x01, 0x02]);
        out.extend_from_slice(&[20, 0]); // version made by
        out.extend_from_slice(&[10, 0]); // version needed
        out.extend_from_slice(&[0, 0]); // flags
        out.extend_from_slice(&[0, 0]); // method
        out.extend_from_slice(&[0, 0, 0, 0]); // mod time/date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(name_b.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0, 0]); // extra len
        out.extend_from_slice(&[0, 0]); // comment len
        out.extend_from_slice(&[0, 0]); // disk start
        out.extend_from_slice(&[0, 0]); // internal attrs
        out.extend_from_slice(&[0, 0, 0, 0]); // external attrs
        out.extend_from_slice(&[0, 0, 0, 0]); // local header offset
        out.extend_from_slice(name_b);
        let cd_size = out.len() as u32 - cd_offset;
        // end of central directory
        out.extend_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
        out.extend_from_slice(&[0, 0, 0, 0]); // disk numbers
        out.extend_from_slice(&[1, 0, 1, 0]); // entry counts
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&[0, 0]); // comment len
        out
    }

    // One trailing space keeps the CRC bytes in the ASCII range
    // (0x151c3c75), so the whole archive decodes cleanly as UTF-8.
    const TEXTLESS_DOCX_XML: &str = "<w:document><w:body><w:p/></w:body></w:document> ";

    #[test]
    fn plain_text_decodes_as_utf8() {
        let docs = parse_bytes("notes.md", "# heading\nbody".as_bytes()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "# heading\nbody");
        assert_eq!(docs[0].metadata[META_ENCODING], "utf-8");
    }

    #[test]
    fn gbk_bytes_fall_back() {
        // "你好" encoded as GBK, invalid as UTF-8
        let gbk: &[u8] = &[0xc4, 0xe3, 0xba, 0xc3];
        let docs = parse_bytes("legacy.txt", gbk).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "你好");
        assert_eq!(docs[0].metadata[META_ENCODING], "gbk");
    }

    #[test]
    fn whitespace_only_file_yields_no_documents() {
        let docs = parse_bytes("blank.txt", b"  \n\t ").unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = parse_bytes("broken.pdf", b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = parse_bytes("broken.docx", b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn textless_docx_falls_back_to_raw_decode() {
        let archive = stored_zip(
            "word/document.xml",
            TEXTLESS_DOCX_XML,
            crc32(TEXTLESS_DOCX_XML.as_bytes()),
        );
        let docs = parse_bytes("empty.docx", &archive).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].metadata[META_ENCODING], "utf-8");
        assert!(docs[0].text.contains("<w:body>"));
    }

    #[test]
    fn docx_with_text_does_not_fall_back() {
        let body = "<w:document><w:body><w:p><w:t>hello from docx</w:t></w:p></w:body></w:document>";
        let crc = crc32(body.as_bytes());
        let archive = stored_zip("word/document.xml", body, crc);
        let docs = parse_bytes("real.docx", &archive).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "hello from docx\n");
        assert!(!docs[0].metadata.contains_key(META_ENCODING));
    }

    /// Plain CRC-32 (IEEE), enough to build valid test archives.
    fn crc32(data: &[u8]) -> u32 {
        let mut crc = !0u32;
        for &b in data {
            crc ^= u32::from(b);
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xedb8_8320 & mask);
            }
        }
        !crc
    }

    #[test]
    fn extension_is_case_insensitive() {
        let err = parse_bytes("REPORT.PDF", b"junk").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }
}
