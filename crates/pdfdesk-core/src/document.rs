//! Loading and inspecting PDF documents
//!
//! Every transformation goes through [`load_document`], which refuses
//! encrypted input. Depending on the file, lopdf either parses it, fails on
//! its encrypted streams, or decrypts it with the empty password and drops
//! the trailer entry, so the raw trailer and cross-reference stream
//! dictionaries are checked for `/Encrypt` as well.

use crate::error::PdfDeskError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE_KEYS: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Guard against malformed page trees with `Parent` cycles.
const MAX_TREE_DEPTH: usize = 64;

/// A named PDF held in memory. The name is only used in error messages.
#[derive(Debug, Clone)]
pub struct PdfInput {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl PdfInput {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Summary of a PDF used by the validate and info endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PdfInfo {
    pub pages: u32,
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
}

/// Parse a PDF, failing with [`PdfDeskError::Encrypted`] for protected files.
pub fn load_document(name: &str, bytes: &[u8]) -> Result<Document, PdfDeskError> {
    match Document::load_mem(bytes) {
        Ok(doc) if doc.trailer.has(b"Encrypt") || has_encrypt_marker(bytes) => {
            Err(PdfDeskError::Encrypted(name.to_string()))
        }
        Ok(doc) => Ok(doc),
        Err(_) if has_encrypt_marker(bytes) => Err(PdfDeskError::Encrypted(name.to_string())),
        Err(e) => Err(PdfDeskError::ParseError(format!("{}: {}", name, e))),
    }
}

/// Inspect a PDF without transforming it.
///
/// Encrypted files are reported with `encrypted: true` instead of failing,
/// since the caller only wants to know whether an operation can proceed.
pub fn inspect(bytes: &[u8]) -> Result<PdfInfo, PdfDeskError> {
    let doc = match Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(_) if has_encrypt_marker(bytes) => {
            return Ok(PdfInfo {
                encrypted: true,
                ..PdfInfo::default()
            })
        }
        Err(e) => return Err(PdfDeskError::ParseError(e.to_string())),
    };

    let mut info = PdfInfo {
        pages: doc.get_pages().len() as u32,
        encrypted: doc.trailer.has(b"Encrypt") || has_encrypt_marker(bytes),
        ..PdfInfo::default()
    };

    if let Some(meta) = info_dictionary(&doc) {
        info.title = text_entry(meta, b"Title");
        info.author = text_entry(meta, b"Author");
        info.subject = text_entry(meta, b"Subject");
        info.creator = text_entry(meta, b"Creator");
        info.producer = text_entry(meta, b"Producer");
    }

    Ok(info)
}

/// Whether a trailer dictionary or a cross-reference stream dictionary
/// carries an `/Encrypt` entry. Page content and other objects are not
/// searched, so text mentioning `/Encrypt` does not count.
fn has_encrypt_marker(bytes: &[u8]) -> bool {
    let trailers = find_all(bytes, b"trailer")
        .filter(|&at| at == 0 || matches!(bytes[at - 1], b'\n' | b'\r'))
        .filter_map(|at| dictionary_at(bytes, at + b"trailer".len()));

    let xref_streams = find_all(bytes, b"obj")
        .filter(|&at| at > 0 && bytes[at - 1].is_ascii_whitespace())
        .filter_map(|at| dictionary_at(bytes, at + b"obj".len()))
        .filter(|dict| is_xref_stream(dict));

    trailers
        .chain(xref_streams)
        .any(|dict| find_all(dict, b"/Encrypt").next().is_some())
}

fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, window)| *window == needle)
        .map(|(at, _)| at)
}

/// The `<< ... >>` dictionary starting at `from`, after optional whitespace.
fn dictionary_at(bytes: &[u8], from: usize) -> Option<&[u8]> {
    let rest = bytes.get(from..)?;
    let start = from + rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
    if !bytes.get(start..)?.starts_with(b"<<") {
        return None;
    }

    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match &bytes[i..i + 2] {
            b"<<" => {
                depth += 1;
                i += 2;
            }
            b">>" => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return Some(&bytes[start..i]);
                }
            }
            _ => i += 1,
        }
    }
    None
}

/// `/Type /XRef`, with or without whitespace between the names.
fn is_xref_stream(dict: &[u8]) -> bool {
    find_all(dict, b"/Type").any(|at| {
        let value = &dict[at + b"/Type".len()..];
        let skip = value.iter().take_while(|b| b.is_ascii_whitespace()).count();
        value[skip..].starts_with(b"/XRef")
    })
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn text_entry(dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok()? {
        Object::String(bytes, _) => {
            let text = decode_text_string(bytes);
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        _ => None,
    }
}

/// Decode a PDF text string (UTF-16BE with BOM, otherwise byte text).
fn decode_text_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Look up a page attribute, walking up the page tree when the page itself
/// does not define it.
pub(crate) fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value.clone());
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Copy inherited attributes onto the page so it survives being re-parented.
pub(crate) fn materialize_inherited(doc: &mut Document, page_id: ObjectId) -> Result<(), PdfDeskError> {
    let mut missing = Vec::new();
    {
        let page = doc
            .get_dictionary(page_id)
            .map_err(|e| PdfDeskError::OperationError(format!("Invalid page object: {}", e)))?;
        for key in INHERITABLE_KEYS {
            if !page.has(key) {
                missing.push(key);
            }
        }
    }

    let values: Vec<(&[u8], Object)> = missing
        .into_iter()
        .filter_map(|key| inherited_attribute(doc, page_id, key).map(|v| (key, v)))
        .collect();

    if values.is_empty() {
        return Ok(());
    }

    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| PdfDeskError::OperationError(format!("Invalid page object: {}", e)))?;
    for (key, value) in values {
        page.set(key.to_vec(), value);
    }
    Ok(())
}

/// Serialize a document after dropping unreachable objects.
pub(crate) fn save_document(mut doc: Document) -> Result<Vec<u8>, PdfDeskError> {
    doc.prune_objects();
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| PdfDeskError::OperationError(format!("Failed to save PDF: {}", e)))?;
    Ok(buffer)
}
