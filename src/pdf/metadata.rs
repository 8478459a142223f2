//! PDF metadata extraction

use std::path::Path;

use lopdf::{Dictionary, Document, Object};

use crate::error::{Error, Result};
use crate::layout::PageBox;
use crate::pdf::template::media_box;

/// Count pages by reading the Count field from the Pages dictionary
/// This is more reliable than get_pages() which doesn't handle nested page trees
fn count_pages_from_catalog(doc: &Document) -> Result<usize> {
    let catalog = match doc.trailer.get(b"Root") {
        Ok(Object::Reference(id)) => dictionary(doc, *id, "Catalog")?,
        _ => return Err(Error::Document("No Root reference in trailer".to_string())),
    };

    let pages = match catalog.get(b"Pages") {
        Ok(Object::Reference(id)) => dictionary(doc, *id, "Pages")?,
        _ => return Err(Error::Document("No Pages reference in catalog".to_string())),
    };

    match pages.get(b"Count") {
        Ok(Object::Integer(n)) if *n >= 0 => Ok(*n as usize),
        _ => Err(Error::Document("Pages has no valid Count".to_string())),
    }
}

fn dictionary<'a>(doc: &'a Document, id: lopdf::ObjectId, what: &str) -> Result<&'a Dictionary> {
    match doc.get_object(id)? {
        Object::Dictionary(dict) => Ok(dict),
        _ => Err(Error::Document(format!("{} is not a dictionary", what))),
    }
}

/// PDF metadata
#[derive(Debug, Clone)]
pub struct PdfMetadata {
    /// Number of pages in the PDF
    pub page_count: usize,
    /// Visible area of the first page
    pub page_box: PageBox,
    /// Document title (if present)
    pub title: Option<String>,
    /// Document author (if present)
    pub author: Option<String>,
}

/// Extract metadata from a PDF file
pub fn extract_metadata(path: &Path) -> Result<PdfMetadata> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    let doc = Document::load(path)?;
    metadata_of(&doc, path)
}

/// Extract metadata from an already loaded document
pub fn metadata_of(doc: &Document, path: &Path) -> Result<PdfMetadata> {
    let page_count = count_pages_from_catalog(doc)?;

    if page_count == 0 {
        return Err(Error::EmptyPdf(path.to_path_buf()));
    }

    let page_box = doc
        .get_pages()
        .values()
        .next()
        .map(|id| media_box(doc, *id))
        .unwrap_or_else(PageBox::letter);

    let info = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => dictionary(doc, *id, "Info").ok(),
        Ok(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };

    Ok(PdfMetadata {
        page_count,
        page_box,
        title: info.and_then(|dict| info_string(dict, b"Title")),
        author: info.and_then(|dict| info_string(dict, b"Author")),
    })
}

fn info_string(info: &Dictionary, key: &[u8]) -> Option<String> {
    let bytes = info.get(key).ok()?.as_str().ok()?;
    String::from_utf8(bytes.to_vec()).ok()
}

/// Count the number of pages in a PDF file
///
/// This is a quick operation that reads the Count field from the Pages dictionary.
pub fn count_pages(path: &Path) -> Result<usize> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }

    let doc = Document::load(path)?;
    let page_count = count_pages_from_catalog(&doc)?;

    if page_count == 0 {
        return Err(Error::EmptyPdf(path.to_path_buf()));
    }

    Ok(page_count)
}
