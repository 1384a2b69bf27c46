use lopdf::{Document, Object};

use crate::error::ProcessError;
use crate::processor::{normalize_title, TitleExtractor};

/// How far past `/Title` the raw scan looks for a hex string.
const HEX_SCAN_WINDOW: usize = 500;

/// Reads the `/Title` entry of a PDF's document information dictionary.
///
/// Documents lopdf cannot parse are scanned for the first raw `/Title`
/// token instead, which covers PDFs with damaged cross-reference tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTitleExtractor;

impl PdfTitleExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TitleExtractor for PdfTitleExtractor {
    fn extract_title(&self, bytes: &[u8]) -> Result<Option<String>, ProcessError> {
        let _span = tracing::info_span!("processor.pdf_title", size = bytes.len()).entered();

        if !bytes.starts_with(b"%PDF") {
            return Err(ProcessError::PdfProcessing(
                "missing %PDF header".to_string(),
            ));
        }

        match Document::load_mem(bytes) {
            Ok(doc) => {
                if let Some(title) = info_title(&doc) {
                    return Ok(Some(title));
                }
                Ok(scan_raw_title(bytes))
            }
            Err(e) => {
                log::warn!("lopdf failed to parse document: {}. Scanning raw bytes.", e);
                Ok(scan_raw_title(bytes))
            }
        }
    }
}

fn info_title(doc: &Document) -> Option<String> {
    let info = resolve(doc, doc.trailer.get(b"Info").ok()?)?;
    let title = resolve(doc, info.as_dict().ok()?.get(b"Title").ok()?)?;
    match title {
        Object::String(raw, _) => normalize_title(&decode_text_string(raw)),
        _ => None,
    }
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Decodes a PDF text string: UTF-16BE with a byte-order mark, otherwise
/// treated as Latin-1.
fn decode_text_string(raw: &[u8]) -> String {
    if let Some(body) = raw.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    raw.iter().map(|&b| b as char).collect()
}

/// Finds the first `/Title` in the raw bytes and decodes the literal or hex
/// string that follows it.
fn scan_raw_title(bytes: &[u8]) -> Option<String> {
    let start = find(bytes, b"/Title")? + b"/Title".len();
    let rest = &bytes[start..];

    if let Some(literal) = read_literal(rest) {
        if let Some(title) = normalize_title(&decode_text_string(&literal)) {
            return Some(title);
        }
    }

    let window = &rest[..rest.len().min(HEX_SCAN_WINDOW)];
    let trimmed = window
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|i| &window[i..])?;
    let hex = trimmed.strip_prefix(b"<")?;
    let end = hex.iter().position(|&b| b == b'>')?;
    let decoded = decode_hex(&hex[..end]);
    normalize_title(&decode_text_string(&decoded))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Reads a `( … )` literal string starting at the first `(`, applying the
/// PDF escape rules. Returns `None` if the literal is unterminated.
fn read_literal(input: &[u8]) -> Option<Vec<u8>> {
    let open = input.iter().position(|&b| b == b'(')?;
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut i = open + 1;

    while i < input.len() {
        let b = input[i];
        match b {
            b'\\' => {
                let next = *input.get(i + 1)?;
                i += 2;
                match next {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0C),
                    b'\r' => {
                        if input.get(i) == Some(&b'\n') {
                            i += 1;
                        }
                    }
                    b'\n' => {}
                    b'0'..=b'7' => {
                        let mut value = u32::from(next - b'0');
                        let mut digits = 1;
                        while digits < 3 {
                            match input.get(i) {
                                Some(d @ b'0'..=b'7') => {
                                    value = value * 8 + u32::from(d - b'0');
                                    i += 1;
                                    digits += 1;
                                }
                                _ => break,
                            }
                        }
                        out.push((value & 0xFF) as u8);
                    }
                    other => out.push(other),
                }
                continue;
            }
            b'(' => depth += 1,
            b')' if depth == 0 => return Some(out),
            b')' => depth -= 1,
            _ => {}
        }
        out.push(b);
        i += 1;
    }
    None
}

fn decode_hex(hex: &[u8]) -> Vec<u8> {
    let digits: Vec<u8> = hex
        .iter()
        .filter(|b| !b.is_ascii_whitespace())
        .filter_map(|&b| (b as char).to_digit(16).map(|d| d as u8))
        .collect();
    digits
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}
