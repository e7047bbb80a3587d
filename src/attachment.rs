use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::ImageFormat;
use std::path::{Path, PathBuf};

use crate::error::UploadError;

/// Largest image accepted for a query, in bytes.
pub const MAX_IMAGE_BYTES: u64 = 5 * 1024 * 1024;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "heic", "heif"];

/// MIME type implied by a file extension, for image extensions only.
pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        other => ImageFormat::from_extension(other).map(|f| f.to_mime_type()),
    }
}

/// An image held as a `data:<mime>;base64,<payload>` URL plus its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    data_url: String,
    mime_type: String,
}

impl ImageAttachment {
    /// Encodes raw file bytes. `declared_mime` wins over the sniffed format when it names an image type,
    /// and stands in for it when the bytes are in a format `image` cannot sniff (HEIC, for one).
    pub fn from_bytes(bytes: &[u8], declared_mime: Option<&str>) -> Result<Self, UploadError> {
        let size = bytes.len() as u64;
        if size > MAX_IMAGE_BYTES {
            return Err(UploadError::TooLarge { size });
        }

        let declared = declared_mime.filter(|m| m.starts_with("image/"));
        let sniffed = image::guess_format(bytes).ok().map(|f| f.to_mime_type());
        let mime_type = declared.or(sniffed).ok_or(UploadError::NotAnImage)?.to_string();

        let data_url = format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes));
        Ok(ImageAttachment { data_url, mime_type })
    }

    /// Restores an image kept in history. Anything [`ImageAttachment::from_data_url`] cannot parse is
    /// kept verbatim, with the MIME type sniffed from the decoded payload.
    pub fn from_stored(stored: &str) -> Self {
        if let Some(attachment) = Self::from_data_url(stored) {
            return attachment;
        }

        let mut attachment = ImageAttachment {
            data_url: stored.to_string(),
            mime_type: String::new(),
        };
        attachment.mime_type = attachment
            .decode()
            .and_then(|bytes| image::guess_format(&bytes).ok())
            .map(|f| f.to_mime_type())
            .unwrap_or("application/octet-stream")
            .to_string();
        attachment
    }

    /// Rebuilds an attachment from a stored data URL, recovering the MIME type from its header.
    pub fn from_data_url(data_url: &str) -> Option<Self> {
        let rest = data_url.strip_prefix("data:")?;
        let (header, _) = rest.split_once(',')?;
        let mime_type = header.split(';').next().filter(|m| !m.is_empty())?;
        Some(ImageAttachment {
            data_url: data_url.to_string(),
            mime_type: mime_type.to_string(),
        })
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The base64 payload with the `data:...,` prefix stripped. A bare payload is returned as is.
    pub fn payload(&self) -> &str {
        match self.data_url.split_once(',') {
            Some((_, payload)) => payload,
            None => &self.data_url,
        }
    }

    pub fn decode(&self) -> Option<Vec<u8>> {
        STANDARD.decode(self.payload()).ok()
    }
}

/// Reads an image file for attachment. The size is checked before the file is read.
pub async fn load_image(path: &Path) -> Result<ImageAttachment, UploadError> {
    let size = tokio::fs::metadata(path).await?.len();
    if size > MAX_IMAGE_BYTES {
        tracing::info!("Rejected {} ({} bytes)", path.display(), size);
        return Err(UploadError::TooLarge { size });
    }

    let bytes = tokio::fs::read(path).await?;
    let declared = mime_for_path(path);
    let attachment = ImageAttachment::from_bytes(&bytes, declared)?;

    tracing::debug!(
        "Attached {} as {} ({} bytes)",
        path.display(),
        attachment.mime_type(),
        bytes.len()
    );
    Ok(attachment)
}

pub async fn pick_image_file() -> Option<PathBuf> {
    rfd::AsyncFileDialog::new()
        .set_title("Attach image")
        .add_filter("Images", IMAGE_EXTENSIONS)
        .pick_file()
        .await
        .map(|handle| handle.path().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn png_bytes() -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 24]);
        bytes
    }

    #[test]
    fn test_from_bytes_builds_data_url() {
        let attachment = ImageAttachment::from_bytes(&png_bytes(), None).unwrap();
        assert_eq!(attachment.mime_type(), "image/png");
        assert!(attachment.data_url().starts_with("data:image/png;base64,"));
        assert_eq!(attachment.decode().unwrap(), png_bytes());
    }

    #[test]
    fn test_declared_mime_wins() {
        let attachment = ImageAttachment::from_bytes(&png_bytes(), Some("image/x-custom")).unwrap();
        assert_eq!(attachment.mime_type(), "image/x-custom");

        let attachment = ImageAttachment::from_bytes(&png_bytes(), Some("text/plain")).unwrap();
        assert_eq!(attachment.mime_type(), "image/png");
    }

    #[test]
    fn test_rejects_non_image() {
        let err = ImageAttachment::from_bytes(b"just some notes", None).unwrap_err();
        assert!(matches!(err, UploadError::NotAnImage));
    }

    #[test]
    fn test_rejects_oversized_bytes() {
        let mut bytes = png_bytes();
        bytes.resize(MAX_IMAGE_BYTES as usize + 1, 0);
        let err = ImageAttachment::from_bytes(&bytes, None).unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { size } if size == MAX_IMAGE_BYTES + 1));
    }

    #[test]
    fn test_payload_strips_prefix() {
        let attachment = ImageAttachment::from_data_url("data:image/jpeg;base64,QUJD").unwrap();
        assert_eq!(attachment.mime_type(), "image/jpeg");
        assert_eq!(attachment.payload(), "QUJD");
    }

    #[test]
    fn test_from_data_url_rejects_garbage() {
        assert!(ImageAttachment::from_data_url("QUJD").is_none());
        assert!(ImageAttachment::from_data_url("data:;base64,QUJD").is_none());
        assert!(ImageAttachment::from_data_url("data:image/png;base64").is_none());
    }

    #[tokio::test]
    async fn test_load_image_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diagram.png");
        std::fs::write(&path, png_bytes()).unwrap();

        let attachment = load_image(&path).await.unwrap();
        assert_eq!(attachment.mime_type(), "image/png");
    }

    #[tokio::test]
    async fn test_load_image_rejects_six_megabytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.png");
        let mut bytes = png_bytes();
        bytes.resize(6 * 1024 * 1024, 0);
        std::fs::write(&path, bytes).unwrap();

        let err = load_image(&path).await.unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { size } if size == 6 * 1024 * 1024));
    }

    fn heic_bytes() -> Vec<u8> {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x18];
        bytes.extend_from_slice(b"ftypheic");
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        bytes.extend_from_slice(b"mif1heic");
        bytes.extend_from_slice(&[0u8; 32]);
        bytes
    }

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("IMG_0001.HEIC")), Some("image/heic"));
        assert_eq!(mime_for_path(Path::new("scan.heif")), Some("image/heif"));
        assert_eq!(mime_for_path(Path::new("photo.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("notes.txt")), None);
        assert_eq!(mime_for_path(Path::new("no_extension")), None);
    }

    #[test]
    fn test_unsniffable_bytes_use_declared_type() {
        let attachment = ImageAttachment::from_bytes(&heic_bytes(), Some("image/heic")).unwrap();
        assert_eq!(attachment.mime_type(), "image/heic");
        assert!(attachment.data_url().starts_with("data:image/heic;base64,"));

        let err = ImageAttachment::from_bytes(&heic_bytes(), None).unwrap_err();
        assert!(matches!(err, UploadError::NotAnImage));
    }

    #[tokio::test]
    async fn test_load_image_accepts_heic_photo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMG_0001.HEIC");
        std::fs::write(&path, heic_bytes()).unwrap();

        let attachment = load_image(&path).await.unwrap();
        assert_eq!(attachment.mime_type(), "image/heic");
        assert_eq!(attachment.decode().unwrap(), heic_bytes());
        assert!(IMAGE_EXTENSIONS.contains(&"heic"));
        assert!(IMAGE_EXTENSIONS.contains(&"heif"));
    }

    #[tokio::test]
    async fn test_load_image_rejects_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "just some notes").unwrap();

        let err = load_image(&path).await.unwrap_err();
        assert!(matches!(err, UploadError::NotAnImage));
    }

    #[test]
    fn test_from_stored_keeps_unparseable_value() {
        let stored = "iVBORw0KGgo=";
        let attachment = ImageAttachment::from_stored(stored);
        assert_eq!(attachment.data_url(), stored);
        assert_eq!(attachment.mime_type(), "image/png");
        assert_eq!(attachment.payload(), stored);

        let parsed = ImageAttachment::from_stored("data:image/jpeg;base64,QUJD");
        assert_eq!(parsed.mime_type(), "image/jpeg");

        let opaque = ImageAttachment::from_stored("not base64 at all!");
        assert_eq!(opaque.data_url(), "not base64 at all!");
        assert_eq!(opaque.mime_type(), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_load_image_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_image(&dir.path().join("nope.png")).await.unwrap_err();
        assert!(matches!(err, UploadError::Io(_)));
    }
}
