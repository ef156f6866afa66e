use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("file is empty")]
    Empty,
    #[error("file is not an image ({0})")]
    NotAnImage(String),
    #[error("image is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
}

/// Reads an image file and returns it as a `data:` URL.
pub fn encode_file(path: &Path, max_size_bytes: u64) -> Result<String> {
    let meta = fs::metadata(path)
        .with_context(|| format!("acquire: stat {}", path.display()))?;
    if max_size_bytes > 0 && meta.len() > max_size_bytes {
        return Err(AcquireError::TooLarge {
            size: meta.len(),
            limit: max_size_bytes,
        }
        .into());
    }
    let bytes = fs::read(path).with_context(|| format!("acquire: read {}", path.display()))?;
    Ok(encode_bytes(&bytes)?)
}

pub fn encode_bytes(bytes: &[u8]) -> Result<String, AcquireError> {
    if bytes.is_empty() {
        return Err(AcquireError::Empty);
    }
    let mime = detect_mime(bytes);
    if !mime.starts_with("image/") {
        return Err(AcquireError::NotAnImage(mime));
    }
    let payload = general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{mime};base64,{payload}"))
}

/// Decodes a `data:` URL produced by [`encode_bytes`].
pub fn decode_data_url(src: &str) -> Option<Vec<u8>> {
    let rest = src.strip_prefix("data:")?;
    let (_, payload) = rest.split_once(";base64,")?;
    general_purpose::STANDARD.decode(payload).ok()
}

pub fn mime_of(src: &str) -> Option<&str> {
    src.strip_prefix("data:")?.split_once(';').map(|(mime, _)| mime)
}

fn detect_mime(bytes: &[u8]) -> String {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(ImageFormat::Png) => "image/png".into(),
        Ok(ImageFormat::Gif) => "image/gif".into(),
        Ok(ImageFormat::WebP) => "image/webp".into(),
        _ => {
            let mut buffer = [0u8; 512];
            let mut cursor = std::io::Cursor::new(bytes);
            let read = cursor.read(&mut buffer).unwrap_or(0);
            tree_magic_mini::from_u8(&buffer[..read]).to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PNG_1X1: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0xF8,
        0xCF, 0xC0, 0xF0, 0x1F, 0x00, 0x05, 0x00, 0x01, 0xFF, 0x89, 0x99, 0x3D, 0x1D, 0x00, 0x00,
        0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    #[test]
    fn png_becomes_data_url() {
        let src = encode_bytes(PNG_1X1).unwrap();
        assert!(src.starts_with("data:image/png;base64,"));
        assert_eq!(mime_of(&src), Some("image/png"));
        assert_eq!(decode_data_url(&src).unwrap(), PNG_1X1);
    }

    #[test]
    fn text_is_rejected() {
        let err = encode_bytes(b"just some words, not a picture").unwrap_err();
        assert!(matches!(err, AcquireError::NotAnImage(_)));
    }

    #[test]
    fn empty_is_rejected() {
        assert!(matches!(encode_bytes(&[]), Err(AcquireError::Empty)));
    }

    #[test]
    fn oversized_file_is_rejected_before_reading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pic.png");
        fs::write(&path, PNG_1X1).unwrap();
        let err = encode_file(&path, 10).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AcquireError>(),
            Some(AcquireError::TooLarge { .. })
        ));
        assert!(encode_file(&path, 0).is_ok());
    }

    #[test]
    fn malformed_data_url_decodes_to_nothing() {
        assert_eq!(decode_data_url(""), None);
        assert_eq!(decode_data_url("data:image/png,raw"), None);
    }
}
