//! Marker compositing
//!
//! Stamps a [`MarkerImage`] onto one page of a [`WorkingDocument`] as an image
//! XObject drawn by an extra content stream appended after the page's own
//! content. Nothing else on the page is touched.

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

use crate::error::{Error, Result};
use crate::layout::MarkerBox;
use crate::marker::{MarkerImage, PixelFormat};
use crate::pdf::template::WorkingDocument;

/// Resource name used for markers, suffixed when the page already uses it
const MARKER_RESOURCE: &str = "Marker";

/// Draw `image` on page `page` (1-based) inside `marker`
pub fn composite_marker(
    work: &mut WorkingDocument,
    page: u32,
    image: &MarkerImage,
    marker: &MarkerBox,
) -> Result<()> {
    let page_id = work.page_id(page)?;
    let doc = work.document_mut();

    let image_id = doc.add_object(image_xobject(image));
    let name = add_xobject_to_page_resources(doc, page_id, image_id)?;

    let content = format!("q\n{} cm\n/{} Do\nQ\n", marker.image_matrix(), name);
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));

    append_content_to_page(doc, page_id, content_id)
}

/// Image XObject holding the marker pixels, compressed when the document is saved
fn image_xobject(image: &MarkerImage) -> Stream {
    let color_space = match image.format {
        PixelFormat::Gray => "DeviceGray",
        PixelFormat::Rgb => "DeviceRGB",
    };

    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(image.width as i64));
    dict.set("Height", Object::Integer(image.height as i64));
    dict.set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));

    Stream::new(dict, image.pixels.clone())
}

/// Register an XObject in the page's own Resources and return its name
///
/// Shared or inherited Resources are copied onto the page first, so the new
/// entry never leaks onto other pages.
fn add_xobject_to_page_resources(
    doc: &mut Document,
    page_id: ObjectId,
    xobject_id: ObjectId,
) -> Result<String> {
    let mut resources = {
        let page_dict = match doc.get_object(page_id)? {
            Object::Dictionary(dict) => dict,
            _ => return Err(Error::Document("Page is not a dictionary".to_string())),
        };
        match page_dict.get(b"Resources") {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            Ok(Object::Reference(res_id)) => match doc.get_object(*res_id) {
                Ok(Object::Dictionary(dict)) => dict.clone(),
                _ => Dictionary::new(),
            },
            _ => Dictionary::new(),
        }
    };

    let mut xobjects = match resources.get(b"XObject") {
        Ok(Object::Dictionary(dict)) => dict.clone(),
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        },
        _ => Dictionary::new(),
    };

    let name = unused_name(&xobjects);
    xobjects.set(name.as_bytes().to_vec(), Object::Reference(xobject_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    match doc.get_object_mut(page_id)? {
        Object::Dictionary(page_dict) => page_dict.set("Resources", Object::Dictionary(resources)),
        _ => return Err(Error::Document("Page is not a dictionary".to_string())),
    }

    Ok(name)
}

fn unused_name(xobjects: &Dictionary) -> String {
    if !xobjects.has(MARKER_RESOURCE.as_bytes()) {
        return MARKER_RESOURCE.to_string();
    }
    (1..)
        .map(|n| format!("{}{}", MARKER_RESOURCE, n))
        .find(|candidate| !xobjects.has(candidate.as_bytes()))
        .unwrap_or_else(|| MARKER_RESOURCE.to_string())
}

/// Append a content stream to a page's Contents
///
/// Appended content is drawn on top of everything the page already shows.
fn append_content_to_page(doc: &mut Document, page_id: ObjectId, new_content_id: ObjectId) -> Result<()> {
    let page_obj = doc.get_object_mut(page_id)?;

    if let Object::Dictionary(ref mut page_dict) = page_obj {
        let existing_content = page_dict.get(b"Contents").ok().cloned();

        match existing_content {
            Some(Object::Reference(content_id)) => {
                page_dict.set(
                    "Contents",
                    Object::Array(vec![Object::Reference(content_id), Object::Reference(new_content_id)]),
                );
            }
            Some(Object::Array(mut content_array)) => {
                content_array.push(Object::Reference(new_content_id));
                page_dict.set("Contents", Object::Array(content_array));
            }
            _ => {
                page_dict.set("Contents", Object::Array(vec![Object::Reference(new_content_id)]));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::template_document;
    use crate::pdf::template::Template;

    fn gray_marker() -> MarkerImage {
        MarkerImage::new(2, 2, PixelFormat::Gray, vec![0, 255, 255, 0]).unwrap()
    }

    fn page_dict(doc: &Document, page_id: ObjectId) -> &Dictionary {
        match doc.get_object(page_id).unwrap() {
            Object::Dictionary(dict) => dict,
            other => panic!("page is not a dictionary: {:?}", other),
        }
    }

    fn xobjects(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
        let resources = match page_dict(doc, page_id).get(b"Resources").ok()? {
            Object::Dictionary(dict) => dict.clone(),
            Object::Reference(id) => match doc.get_object(*id).ok()? {
                Object::Dictionary(dict) => dict.clone(),
                _ => return None,
            },
            _ => return None,
        };
        match resources.get(b"XObject").ok()? {
            Object::Dictionary(dict) => Some(dict.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_composite_stamps_only_target_page() {
        let mut work = Template::from_document(template_document(1), "t.pdf")
            .unwrap()
            .expand(2)
            .unwrap();
        let marker = MarkerBox::new(10.0, 5.0, 6.0).unwrap();

        composite_marker(&mut work, 2, &gray_marker(), &marker).expect("composite should succeed");

        let doc = work.document();
        let first = work.page_id(1).unwrap();
        let second = work.page_id(2).unwrap();

        assert!(xobjects(doc, first).is_none(), "page 1 must not receive the marker");

        let image_id = xobjects(doc, second)
            .expect("page 2 should have XObjects")
            .get(b"Marker")
            .unwrap()
            .as_reference()
            .unwrap();
        match doc.get_object(image_id).unwrap() {
            Object::Stream(stream) => {
                assert_eq!(stream.dict.get(b"Width").unwrap().as_i64().unwrap(), 2);
                assert_eq!(stream.dict.get(b"ColorSpace").unwrap().as_name().unwrap(), b"DeviceGray");
                assert_eq!(stream.content, vec![0, 255, 255, 0]);
            }
            other => panic!("marker is not a stream: {:?}", other),
        }

        let contents = page_dict(doc, second).get(b"Contents").unwrap().as_array().unwrap();
        assert_eq!(contents.len(), 4);
        let stamp_id = contents[3].as_reference().unwrap();
        match doc.get_object(stamp_id).unwrap() {
            Object::Stream(stream) => {
                assert_eq!(stream.content, b"q\n10 0 0 10 5 6 cm\n/Marker Do\nQ\n".to_vec());
            }
            other => panic!("stamp is not a stream: {:?}", other),
        }

        let untouched = page_dict(doc, first).get(b"Contents").unwrap().as_array().unwrap();
        assert_eq!(untouched.len(), 3);
    }

    #[test]
    fn test_existing_marker_name_is_not_overwritten() {
        let mut existing = Dictionary::new();
        existing.set("Marker", Object::Reference((900, 0)));
        existing.set("Marker1", Object::Reference((901, 0)));
        assert_eq!(unused_name(&existing), "Marker2");
        assert_eq!(unused_name(&Dictionary::new()), "Marker");
    }

    #[test]
    fn test_out_of_range_page_fails() {
        let mut work = Template::from_document(template_document(1), "t.pdf")
            .unwrap()
            .expand(1)
            .unwrap();
        let marker = MarkerBox::new(10.0, 0.0, 0.0).unwrap();
        let err = composite_marker(&mut work, 2, &gray_marker(), &marker).unwrap_err();
        assert!(matches!(err, Error::Document(_)));
    }
}
