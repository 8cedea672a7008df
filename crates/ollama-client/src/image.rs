use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::errors::OllamaError;

/// Base64-encoded image attached to a generate or chat request.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Image(String);

impl Image {
    /// Encodes raw image bytes.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self(STANDARD.encode(bytes.as_ref()))
    }

    /// Reads and encodes an image file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OllamaError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(OllamaError::Image(format!(
                "image path does not exist: {}",
                path.display()
            )));
        }
        let bytes = std::fs::read(path).map_err(|e| {
            OllamaError::Image(format!("failed to read image {}: {e}", path.display()))
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Wraps an already-encoded string after checking it is valid base64.
    pub fn from_base64(encoded: impl Into<String>) -> Result<Self, OllamaError> {
        let encoded = encoded.into();
        let trimmed = encoded.trim();
        STANDARD
            .decode(trimmed)
            .map_err(|e| OllamaError::Image(format!("invalid base64 image data: {e}")))?;
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_base64(&self) -> &str {
        &self.0
    }
}

/// Any of the accepted ways to supply an image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Base64(String),
}

impl From<Vec<u8>> for ImageSource {
    fn from(value: Vec<u8>) -> Self {
        ImageSource::Bytes(value)
    }
}

impl From<PathBuf> for ImageSource {
    fn from(value: PathBuf) -> Self {
        ImageSource::Path(value)
    }
}

impl From<&Path> for ImageSource {
    fn from(value: &Path) -> Self {
        ImageSource::Path(value.to_path_buf())
    }
}

/// Encodes an image source into the wire representation.
pub fn encode_image(source: ImageSource) -> Result<Image, OllamaError> {
    match source {
        ImageSource::Bytes(bytes) => Ok(Image::from_bytes(bytes)),
        ImageSource::Path(path) => Image::from_path(path),
        ImageSource::Base64(encoded) => Image::from_base64(encoded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn bytes_are_base64_encoded() {
        assert_eq!(Image::from_bytes(b"hello").as_base64(), "aGVsbG8=");
    }

    #[test]
    fn path_is_read_and_encoded() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"hello").expect("write");
        let image = encode_image(ImageSource::from(file.path())).expect("encode");
        assert_eq!(image.as_base64(), "aGVsbG8=");
    }

    #[test]
    fn missing_path_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = Image::from_path(dir.path().join("missing.png")).expect_err("missing");
        assert!(matches!(err, OllamaError::Image(msg) if msg.contains("does not exist")));
    }

    #[test]
    fn base64_input_is_validated_and_kept() {
        let image = encode_image(ImageSource::Base64(" aGVsbG8= ".into())).expect("valid");
        assert_eq!(image.as_base64(), "aGVsbG8=");
        assert!(Image::from_base64("not base64!").is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let value = serde_json::to_value(Image::from_bytes(b"hello")).expect("json");
        assert_eq!(value, serde_json::json!("aGVsbG8="));
    }
}
