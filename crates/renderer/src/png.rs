//! Minimal PNG support.
//!
//! The render engine never decodes pixels; it only needs to confirm that a
//! capture is a PNG and read its dimensions from the IHDR chunk. Encoding is
//! kept for producing reference images (RGBA, color type 6).

use std::io::Write;

/// PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Header fields read from an encoded PNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngInfo {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
}

/// Whether the buffer starts with the PNG signature.
pub fn is_png(bytes: &[u8]) -> bool {
    bytes.len() >= PNG_SIGNATURE.len() && bytes[..PNG_SIGNATURE.len()] == PNG_SIGNATURE
}

/// Read the signature and IHDR chunk.
pub fn inspect(bytes: &[u8]) -> Result<PngInfo, String> {
    if !is_png(bytes) {
        return Err("missing PNG signature".to_string());
    }

    // signature, length (4), type (4), 13 data bytes, crc (4)
    let ihdr = bytes
        .get(8..33)
        .ok_or_else(|| format!("truncated PNG header ({} bytes)", bytes.len()))?;

    let length = u32::from_be_bytes([ihdr[0], ihdr[1], ihdr[2], ihdr[3]]);
    if &ihdr[4..8] != b"IHDR" || length != 13 {
        return Err("first chunk is not IHDR".to_string());
    }

    let crc = u32::from_be_bytes([ihdr[21], ihdr[22], ihdr[23], ihdr[24]]);
    if crc32_checksum(&ihdr[4..21]) != crc {
        return Err("IHDR checksum mismatch".to_string());
    }

    let width = u32::from_be_bytes([ihdr[8], ihdr[9], ihdr[10], ihdr[11]]);
    let height = u32::from_be_bytes([ihdr[12], ihdr[13], ihdr[14], ihdr[15]]);
    if width == 0 || height == 0 {
        return Err(format!("invalid PNG dimensions {}x{}", width, height));
    }

    Ok(PngInfo {
        width,
        height,
        bit_depth: ihdr[16],
        color_type: ihdr[17],
    })
}

/// Create a PNG image from RGBA pixel data (color type 6).
///
/// # Arguments
/// - `pixels`: RGBA pixel data (4 bytes per pixel)
/// - `width`: Image width in pixels
/// - `height`: Image height in pixels
pub fn create_png(pixels: &[u8], width: usize, height: usize) -> Result<Vec<u8>, String> {
    let expected = width * height * 4;
    if pixels.len() != expected {
        return Err(format!(
            "pixel buffer is {} bytes, expected {} for {}x{}",
            pixels.len(),
            expected,
            width,
            height
        ));
    }

    let mut png = Vec::new();
    png.extend_from_slice(&PNG_SIGNATURE);

    let mut ihdr_data = Vec::with_capacity(13);
    ihdr_data.extend_from_slice(&(width as u32).to_be_bytes());
    ihdr_data.extend_from_slice(&(height as u32).to_be_bytes());
    ihdr_data.push(8); // bit depth
    ihdr_data.push(6); // color type (RGBA)
    ihdr_data.push(0); // compression method
    ihdr_data.push(0); // filter method
    ihdr_data.push(0); // interlace method
    write_chunk(&mut png, b"IHDR", &ihdr_data);

    let idat_data = deflate_idat_rgba(pixels, width, height)
        .map_err(|e| format!("IDAT compression failed: {}", e))?;
    write_chunk(&mut png, b"IDAT", &idat_data);

    write_chunk(&mut png, b"IEND", &[]);

    Ok(png)
}

/// Solid-color RGBA image.
pub fn solid_png(width: usize, height: usize, rgba: [u8; 4]) -> Result<Vec<u8>, String> {
    let pixels: Vec<u8> = rgba.iter().copied().cycle().take(width * height * 4).collect();
    create_png(&pixels, width, height)
}

fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);

    let crc_data = [chunk_type.as_slice(), data].concat();
    png.extend_from_slice(&crc32_checksum(&crc_data).to_be_bytes());
}

fn deflate_idat_rgba(
    pixels: &[u8],
    width: usize,
    height: usize,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    // filter byte 0 (none) before each scanline
    let stride = width * 4;
    let mut uncompressed = Vec::with_capacity(height * (1 + stride));
    for row in pixels.chunks(stride.max(1)).take(height) {
        uncompressed.push(0);
        uncompressed.extend_from_slice(row);
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(&uncompressed)?;
    Ok(encoder.finish()?)
}

fn crc32_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_inspect() {
        let png = solid_png(3, 2, [255, 255, 255, 255]).unwrap();
        assert!(is_png(&png));

        let info = inspect(&png).unwrap();
        assert_eq!(
            info,
            PngInfo {
                width: 3,
                height: 2,
                bit_depth: 8,
                color_type: 6
            }
        );
        assert_eq!(&png[png.len() - 8..png.len() - 4], b"IEND");
    }

    #[test]
    fn test_create_rejects_short_buffer() {
        assert!(create_png(&[0; 15], 2, 2).is_err());
    }

    #[test]
    fn test_inspect_rejects_non_png() {
        assert!(inspect(b"<html></html>").is_err());
        assert!(inspect(&[]).is_err());
        assert!(inspect(&PNG_SIGNATURE).is_err());
    }

    #[test]
    fn test_inspect_detects_corrupt_header() {
        let mut png = solid_png(4, 4, [0, 0, 0, 255]).unwrap();
        png[17] ^= 0xff; // width byte
        assert_eq!(inspect(&png).unwrap_err(), "IHDR checksum mismatch");
    }
}
