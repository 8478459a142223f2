//! Template loading and page expansion using lopdf
//!
//! A [`Template`] is a single-page PDF. Expanding it produces a
//! [`WorkingDocument`] whose page tree holds `count` copies of that page, all
//! sharing the template's content streams and resources. Nothing is copied
//! deeply: each copy is a new page dictionary pointing at the same objects,
//! which keeps the output small no matter how many pages are requested.

use std::io::Write;
use std::path::{Path, PathBuf};

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::error::{Error, Result};
use crate::layout::PageBox;

/// Page attributes a page may inherit from its ancestors in the page tree
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Page tree depth beyond which inheritance lookups give up
const MAX_TREE_DEPTH: usize = 32;

/// An opened single-page template
#[derive(Debug)]
pub struct Template {
    path: PathBuf,
    doc: Document,
    page_id: ObjectId,
}

impl Template {
    /// Open a template PDF from disk
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }

        let doc = Document::load(path)?;
        Self::from_document(doc, path)
    }

    /// Wrap an already loaded document; `path` is only used in messages
    pub fn from_document(doc: Document, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let pages = doc.get_pages();

        let page_id = match pages.len() {
            0 => return Err(Error::EmptyPdf(path)),
            1 => pages
                .values()
                .next()
                .copied()
                .ok_or_else(|| Error::EmptyPdf(path.clone()))?,
            n => return Err(Error::TemplatePageCount { path, pages: n }),
        };

        Ok(Self { path, doc, page_id })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Visible area of the template page
    pub fn page_box(&self) -> PageBox {
        media_box(&self.doc, self.page_id)
    }

    /// Duplicate the template page `count` times, in page order
    pub fn expand(self, count: u32) -> Result<WorkingDocument> {
        let Template { mut doc, page_id, path } = self;

        let template_page = flatten_page(&doc, page_id)?;
        let contents = content_references(&doc, &template_page);

        // Wrap the template content in q/Q so a transformation it leaves
        // behind cannot move anything composited after it.
        let save_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let restore_id = doc.add_object(Stream::new(Dictionary::new(), b"Q\n".to_vec()));

        let mut wrapped = Vec::with_capacity(contents.len() + 2);
        wrapped.push(Object::Reference(save_id));
        wrapped.extend(contents);
        wrapped.push(Object::Reference(restore_id));

        let pages_id = doc.new_object_id();

        let mut page_ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut page = template_page.clone();
            page.set("Parent", Object::Reference(pages_id));
            page.set("Contents", Object::Array(wrapped.clone()));
            page_ids.push(doc.add_object(Object::Dictionary(page)));
        }

        let kids: Vec<Object> = page_ids.iter().map(|&id| Object::Reference(id)).collect();

        let mut pages_object = Dictionary::new();
        pages_object.set("Type", Object::Name(b"Pages".to_vec()));
        pages_object.set("Count", Object::Integer(page_ids.len() as i64));
        pages_object.set("Kids", Object::Array(kids));
        doc.objects.insert(pages_id, Object::Dictionary(pages_object));

        let catalog_id = catalog_id(&doc)?;
        match doc.get_object_mut(catalog_id)? {
            Object::Dictionary(catalog) => {
                catalog.set("Pages", Object::Reference(pages_id));
                // Both point into the template's page tree, which is about to go
                catalog.remove(b"Outlines");
                catalog.remove(b"StructTreeRoot");
            }
            _ => return Err(Error::Document("Catalog is not a dictionary".to_string())),
        }

        let pruned = doc.prune_objects();
        tracing::debug!(
            template = %path.display(),
            pages = count,
            pruned = pruned.len(),
            "expanded template"
        );

        Ok(WorkingDocument { doc, page_ids })
    }
}

/// Multi-page document being stamped
///
/// Pages are addressed by their 1-based index in the final document.
#[derive(Debug)]
pub struct WorkingDocument {
    doc: Document,
    page_ids: Vec<ObjectId>,
}

impl WorkingDocument {
    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Object id of page `page` (1-based)
    pub fn page_id(&self, page: u32) -> Result<ObjectId> {
        page.checked_sub(1)
            .and_then(|i| self.page_ids.get(i as usize))
            .copied()
            .ok_or_else(|| {
                Error::Document(format!(
                    "page {} is out of range, document has {} pages",
                    page,
                    self.page_ids.len()
                ))
            })
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub(crate) fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    /// Compress and serialize the document
    pub fn finalize<W: Write>(mut self, writer: &mut W) -> Result<()> {
        self.doc.compress();
        self.doc.save_to(writer)?;
        Ok(())
    }
}

fn catalog_id(doc: &Document) -> Result<ObjectId> {
    match doc.trailer.get(b"Root") {
        Ok(Object::Reference(id)) => Ok(*id),
        Ok(_) => Err(Error::Document("Root is not a reference".to_string())),
        Err(_) => Err(Error::Document("No Root in trailer".to_string())),
    }
}

/// Copy of a page dictionary with inherited attributes made explicit
///
/// The copy has no Parent, and drops entries that would be wrong if shared
/// between several pages (annotations, structure and thread links).
fn flatten_page(doc: &Document, page_id: ObjectId) -> Result<Dictionary> {
    let mut page = match doc.get_object(page_id)? {
        Object::Dictionary(dict) => dict.clone(),
        _ => return Err(Error::Document("Template page is not a dictionary".to_string())),
    };

    for key in INHERITABLE {
        if !page.has(key) {
            if let Some(value) = inherited_attribute(doc, &page, key, MAX_TREE_DEPTH) {
                page.set(key.to_vec(), value.clone());
            }
        }
    }

    if page.remove(b"Annots").is_some() {
        tracing::warn!("template page annotations are not copied to generated pages");
    }
    page.remove(b"Parent");
    page.remove(b"StructParents");
    page.remove(b"B");

    Ok(page)
}

/// Look `key` up in the ancestors of `dict`
fn inherited_attribute<'a>(
    doc: &'a Document,
    dict: &Dictionary,
    key: &[u8],
    depth: usize,
) -> Option<&'a Object> {
    if depth == 0 {
        return None;
    }

    let parent_id = match dict.get(b"Parent") {
        Ok(Object::Reference(id)) => *id,
        _ => return None,
    };

    match doc.get_object(parent_id) {
        Ok(Object::Dictionary(parent)) => match parent.get(key) {
            Ok(value) => Some(value),
            Err(_) => inherited_attribute(doc, parent, key, depth - 1),
        },
        _ => None,
    }
}

/// Content stream references of a page, as a flat list
fn content_references(doc: &Document, page: &Dictionary) -> Vec<Object> {
    match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(streams)) => streams.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(streams)) => streams.clone(),
        _ => Vec::new(),
    }
}

/// MediaBox of a page, following inheritance; US Letter when absent
pub(crate) fn media_box(doc: &Document, page_id: ObjectId) -> PageBox {
    let page = match doc.get_object(page_id) {
        Ok(Object::Dictionary(page)) => page,
        _ => return PageBox::letter(),
    };

    let value = match page.get(b"MediaBox") {
        Ok(value) => Some(value),
        Err(_) => inherited_attribute(doc, page, b"MediaBox", MAX_TREE_DEPTH),
    };

    let array = match value {
        Some(Object::Array(array)) => Some(array),
        Some(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(array)) => Some(array),
            _ => None,
        },
        _ => None,
    };

    let numbers: Vec<f32> = array
        .map(|array| {
            array
                .iter()
                .filter_map(|o| match o {
                    Object::Integer(i) => Some(*i as f32),
                    Object::Real(r) => Some(*r),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    match numbers.as_slice() {
        [a, b, c, d] => PageBox::from_array([*a, *b, *c, *d]),
        _ => PageBox::letter(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::template_document;

    fn stream_content(doc: &Document, object: &Object) -> Vec<u8> {
        match object {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(Object::Stream(stream)) => stream.content.clone(),
                other => panic!("expected stream, got {:?}", other),
            },
            other => panic!("expected reference, got {:?}", other),
        }
    }

    #[test]
    fn test_open_nonexistent_file() {
        let result = Template::open(Path::new("nonexistent.pdf"));
        assert!(matches!(result.unwrap_err(), Error::FileNotFound(_)));
    }

    #[test]
    fn test_multi_page_template_rejected() {
        let err = Template::from_document(template_document(2), "two.pdf").unwrap_err();
        assert!(matches!(err, Error::TemplatePageCount { pages: 2, .. }));
    }

    #[test]
    fn test_empty_template_rejected() {
        let err = Template::from_document(template_document(0), "none.pdf").unwrap_err();
        assert!(matches!(err, Error::EmptyPdf(_)));
    }

    #[test]
    fn test_page_box_is_inherited() {
        let template = Template::from_document(template_document(1), "a4.pdf").unwrap();
        assert_eq!(template.page_box(), PageBox::from_array([0.0, 0.0, 595.0, 842.0]));
    }

    #[test]
    fn test_expand_produces_identical_pages_in_order() {
        let template = Template::from_document(template_document(1), "t.pdf").unwrap();
        let work = template.expand(3).expect("expansion should succeed");

        assert_eq!(work.page_count(), 3);

        let doc = work.document();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 3);

        let mut first_contents = None;
        for (number, page_id) in &pages {
            assert_eq!(work.page_id(*number).unwrap(), *page_id);

            let page = match doc.get_object(*page_id).unwrap() {
                Object::Dictionary(dict) => dict,
                other => panic!("page is not a dictionary: {:?}", other),
            };
            assert!(page.has(b"Resources"), "Resources should be flattened onto the page");
            assert!(page.has(b"MediaBox"), "MediaBox should be flattened onto the page");

            let contents = page.get(b"Contents").unwrap().as_array().unwrap().clone();
            assert_eq!(contents.len(), 3);
            let ids: Vec<ObjectId> = contents.iter().map(|o| o.as_reference().unwrap()).collect();
            assert_eq!(stream_content(doc, &contents[0]), b"q\n");
            assert_eq!(stream_content(doc, &contents[2]), b"Q\n");

            match &first_contents {
                None => first_contents = Some(ids),
                Some(first) => assert_eq!(first, &ids),
            }
        }
    }

    #[test]
    fn test_page_id_out_of_range() {
        let work = Template::from_document(template_document(1), "t.pdf")
            .unwrap()
            .expand(2)
            .unwrap();
        assert!(work.page_id(0).is_err());
        assert!(work.page_id(3).is_err());
        assert!(work.page_id(2).is_ok());
    }

    #[test]
    fn test_finalize_round_trips_page_count() {
        let work = Template::from_document(template_document(1), "t.pdf")
            .unwrap()
            .expand(4)
            .unwrap();

        let mut bytes = Vec::new();
        work.finalize(&mut bytes).expect("finalize should succeed");

        let reloaded = Document::load_mem(&bytes).expect("output should parse");
        assert_eq!(reloaded.get_pages().len(), 4);
    }
}
