//! Image attachments sent to model backends.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;

/// Mime type used when neither the file header nor the extension is recognized.
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// Binary image content plus its mime type.
///
/// The bytes are shared, so cloning an attachment into a request is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Image identifier (file name).
    pub name: String,

    /// Encoded image bytes.
    pub bytes: Arc<[u8]>,

    /// Mime type, e.g. `image/png`.
    pub mime_type: String,
}

impl ImageAttachment {
    /// Create an attachment from in-memory bytes, sniffing the mime type.
    #[must_use]
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let name = name.into();
        let bytes = bytes.into();
        let mime_type = sniff_mime_type(&bytes)
            .or_else(|| mime_from_extension(Path::new(&name)))
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();
        Self { name, bytes, mime_type }
    }

    /// Read an attachment from disk. The name is the file name without directories.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();
        Ok(Self::new(name, bytes))
    }

    /// Override the detected mime type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Size of the encoded image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the attachment holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ImageAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAttachment")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Detect the mime type from the file signature.
fn sniff_mime_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    None
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" | "heif" => Some("image/heif"),
        _ => None,
    }
}
