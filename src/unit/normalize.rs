use std::io::Cursor;

use image::{ImageFormat, ImageOutputFormat};

use crate::Result;

/// Normalizes file content by its content type before staging.
///
/// JPEG and PNG images are decoded and re-encoded, which strips metadata
/// and recompresses JPEGs at `jpeg_quality`. Content of any other type is
/// returned unchanged. A recognized image that fails to decode is an
/// error, not a pass-through.
pub fn normalize(
    content_type: &str,
    bytes: Vec<u8>,
    jpeg_quality: u8,
) -> Result<Vec<u8>> {
    let (input, output) = match content_type {
        "image/jpeg" => {
            (ImageFormat::Jpeg, ImageOutputFormat::Jpeg(jpeg_quality))
        }
        "image/png" => (ImageFormat::Png, ImageOutputFormat::Png),
        _ => return Ok(bytes),
    };

    let image = image::load_from_memory_with_format(&bytes, input)?;
    let mut encoded = Cursor::new(Vec::with_capacity(bytes.len()));
    image.write_to(&mut encoded, output)?;

    log::trace!(
        "normalized {} from {} to {} bytes",
        content_type,
        bytes.len(),
        encoded.get_ref().len()
    );
    Ok(encoded.into_inner())
}
