//! Embedded image extraction from PDF documents
//!
//! Walks every page's XObject resources and pulls out the image streams.
//! Uncompressed or Flate-compressed 8-bit gray and RGB rasters are
//! re-encoded as PNG. Streams in a self-contained image encoding (JPEG,
//! JPEG 2000, JBIG2, CCITT fax) are written out as-is. Anything else is
//! skipped.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use inbound_durable::capability::{CapabilityError, ExtractedArtifact, PdfImageExtractor};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, warn};

/// Extractor backed by lopdf
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfImageExtractor;

impl LopdfImageExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl PdfImageExtractor for LopdfImageExtractor {
    fn extract(&self, pdf: &[u8]) -> Result<Vec<ExtractedArtifact>, CapabilityError> {
        let doc = Document::load_mem(pdf)
            .map_err(|e| CapabilityError::UnsupportedInput(format!("unreadable PDF: {e}")))?;

        let mut artifacts = Vec::new();
        for (page, page_id) in doc.get_pages() {
            let mut index = 0;
            for (name, stream) in page_images(&doc, page_id) {
                match encode_image(stream) {
                    Some((data, content_type, extension)) => {
                        artifacts.push(ExtractedArtifact {
                            data,
                            page,
                            index,
                            content_type: content_type.to_string(),
                            extension: extension.to_string(),
                        });
                        index += 1;
                    }
                    None => debug!(page, image = %name, "skipping image in unsupported encoding"),
                }
            }
        }

        debug!(images = artifacts.len(), "extracted images from PDF");
        Ok(artifacts)
    }
}

/// Follow a reference, or return the object itself
fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

/// Resources of a page, inherited from the page tree when absent
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_object(page_id).ok()?.as_dict().ok()?;
    // Page trees are shallow; the bound guards against reference cycles.
    for _ in 0..32 {
        if let Ok(resources) = node.get(b"Resources") {
            return resolve(doc, resources)?.as_dict().ok();
        }
        let parent = node.get(b"Parent").ok()?;
        node = resolve(doc, parent)?.as_dict().ok()?;
    }
    None
}

/// Image XObjects of a page in resource order
fn page_images(doc: &Document, page_id: ObjectId) -> Vec<(String, &Stream)> {
    let Some(xobjects) = page_resources(doc, page_id)
        .and_then(|r| r.get(b"XObject").ok())
        .and_then(|x| resolve(doc, x))
        .and_then(|x| x.as_dict().ok())
    else {
        return Vec::new();
    };

    xobjects
        .iter()
        .filter_map(|(name, object)| {
            let stream = resolve(doc, object)?.as_stream().ok()?;
            let is_image = stream
                .dict
                .get(b"Subtype")
                .and_then(Object::as_name)
                .map(|s| s == b"Image")
                .unwrap_or(false);
            is_image.then(|| (String::from_utf8_lossy(name).into_owned(), stream))
        })
        .collect()
}

/// Filter names of a stream, outermost first
fn filters(stream: &Stream) -> Vec<String> {
    let name = |o: &Object| {
        o.as_name()
            .ok()
            .map(|n| String::from_utf8_lossy(n).into_owned())
    };
    match stream.dict.get(b"Filter") {
        Ok(Object::Array(items)) => items.iter().filter_map(name).collect(),
        Ok(other) => name(other).into_iter().collect(),
        Err(_) => Vec::new(),
    }
}

/// Bytes, content type and extension of one image stream
fn encode_image(stream: &Stream) -> Option<(Vec<u8>, &'static str, &'static str)> {
    let filters = filters(stream);

    let raster = match filters.as_slice() {
        [] => Some(stream.content.clone()),
        [only] if only == "FlateDecode" => match stream.decompressed_content() {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(error = %e, "could not inflate image stream");
                None
            }
        },
        _ => None,
    };
    if let Some(png) = raster.and_then(|pixels| raster_to_png(&stream.dict, pixels)) {
        return Some((png, "image/png", "png"));
    }

    match filters.last().map(String::as_str) {
        Some("DCTDecode") => Some((stream.content.clone(), "image/jpeg", "jpg")),
        Some("JPXDecode") => Some((stream.content.clone(), "image/jp2", "jp2")),
        Some("JBIG2Decode") => Some((stream.content.clone(), "image/jbig2", "jbig2")),
        Some("CCITTFaxDecode") => Some((stream.content.clone(), "image/tiff", "tiff")),
        _ => None,
    }
}

/// Re-encode raw 8-bit gray or RGB samples as PNG
fn raster_to_png(dict: &Dictionary, pixels: Vec<u8>) -> Option<Vec<u8>> {
    let width = dict.get(b"Width").ok()?.as_i64().ok()?;
    let width = u32::try_from(width).ok()?;
    let height = dict.get(b"Height").ok()?.as_i64().ok()?;
    let height = u32::try_from(height).ok()?;
    let bits = dict
        .get(b"BitsPerComponent")
        .and_then(Object::as_i64)
        .unwrap_or(8);
    if bits != 8 {
        return None;
    }

    let image = match dict.get(b"ColorSpace").and_then(Object::as_name).ok()? {
        b"DeviceRGB" => DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, pixels)?),
        b"DeviceGray" => DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, pixels)?),
        _ => return None,
    };

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .ok()?;
    Some(png)
}
