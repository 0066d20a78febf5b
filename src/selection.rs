//! # Image Selection
//!
//! The user's chosen photo and its on-screen preview.
//!
//! A [`SelectedImage`] is the raw file: bytes plus declared MIME type. A
//! [`PreviewHandle`] is a temporary file holding a displayable copy; it is
//! revocable and must be released when superseded so temp files do not pile
//! up. [`ImageSelection`] ties the two together and enforces "at most one of
//! each": selecting again releases the previous preview.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{AvatarError, AvatarResult};

pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";

/// Declared types the HEIC normalizer handles.
pub const HEIC_MIME_TYPES: [&str; 4] = [
    "image/heic",
    "image/heif",
    "image/heic-sequence",
    "image/heif-sequence",
];

/// ISO-BMFF brands that identify HEIC/HEIF content.
const HEIF_BRANDS: [&[u8; 4]; 8] = [
    b"heic", b"heix", b"heim", b"heis", b"hevc", b"hevx", b"mif1", b"msf1",
];

/// True for any HEIC/HEIF variant, ignoring case and parameters.
pub fn is_heic_mime(mime: &str) -> bool {
    let essence = mime_essence(mime);
    HEIC_MIME_TYPES.iter().any(|m| essence.eq_ignore_ascii_case(m))
}

/// True if uploads of this declared type are accepted.
pub fn is_accepted_mime(mime: &str) -> bool {
    let essence = mime_essence(mime);
    essence.eq_ignore_ascii_case(MIME_JPEG) || essence.eq_ignore_ascii_case(MIME_PNG) || is_heic_mime(mime)
}

fn mime_essence(mime: &str) -> &str {
    mime.split(';').next().unwrap_or("").trim()
}

/// MIME type implied by a file extension, if known.
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" | "jfif" => Some(MIME_JPEG),
        "png" => Some(MIME_PNG),
        "heic" => Some("image/heic"),
        "heif" | "hif" => Some("image/heif"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// MIME type sniffed from the file header.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        let brand = &bytes[8..12];
        if HEIF_BRANDS.iter().any(|b| b.as_slice() == brand) {
            return Some("image/heic");
        }
    }
    image::guess_format(bytes).ok().map(|f| f.to_mime_type())
}

fn extension_for_mime(mime: &str) -> &'static str {
    let essence = mime_essence(mime).to_ascii_lowercase();
    match essence.as_str() {
        MIME_JPEG => ".jpg",
        MIME_PNG => ".png",
        m if is_heic_mime(m) => ".heic",
        _ => ".img",
    }
}

/// A user-selected image file.
#[derive(Clone, PartialEq, Eq)]
pub struct SelectedImage {
    bytes: Vec<u8>,
    mime: String,
    name: Option<String>,
}

impl fmt::Debug for SelectedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedImage")
            .field("mime", &self.mime)
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl SelectedImage {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Read a file from disk. The declared type comes from the extension,
    /// falling back to the file header.
    pub fn from_path(path: impl AsRef<Path>) -> AvatarResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| AvatarError::io_at("read image", path, e))?;
        let mime = mime_from_extension(path)
            .or_else(|| sniff_mime(&bytes))
            .ok_or_else(|| {
                AvatarError::validation("image", format!("Unrecognised image type: {}", path.display()))
            })?;
        let mut image = Self::new(bytes, mime);
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            image = image.with_name(name);
        }
        Ok(image)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_heic(&self) -> bool {
        is_heic_mime(&self.mime)
    }

    /// Same name with the extension swapped, used after format changes.
    pub fn renamed_for(&self, extension: &str) -> Option<String> {
        let name = self.name.as_deref()?;
        let stem = Path::new(name).file_stem()?.to_str()?;
        Some(format!("{}.{}", stem, extension))
    }

    /// Base64 body for the `image` field of a run request (no `data:` prefix).
    pub fn to_transfer_string(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// Temporary displayable copy of an image. Deleted on [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct PreviewHandle {
    file: NamedTempFile,
}

impl PreviewHandle {
    pub fn create(image: &SelectedImage) -> AvatarResult<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("avatar-preview-")
            .suffix(extension_for_mime(image.mime()))
            .tempfile()
            .map_err(|e| AvatarError::io("create preview", e))?;
        std::io::Write::write_all(&mut file, image.bytes())
            .map_err(|e| AvatarError::io_at("write preview", file.path(), e))?;
        debug!(path = %file.path().display(), "Created preview handle");
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Revoke the handle and delete its backing file.
    pub fn release(self) -> AvatarResult<()> {
        let path: PathBuf = self.file.path().to_path_buf();
        self.file
            .close()
            .map_err(|e| AvatarError::io_at("release preview", &path, e))?;
        debug!(path = %path.display(), "Released preview handle");
        Ok(())
    }
}

/// The current selection: at most one image and one preview.
#[derive(Debug, Default)]
pub struct ImageSelection {
    image: Option<SelectedImage>,
    preview: Option<PreviewHandle>,
}

impl ImageSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the selected image. The previous preview is released.
    pub fn select(&mut self, image: SelectedImage) -> AvatarResult<&PreviewHandle> {
        if !is_accepted_mime(image.mime()) {
            return Err(AvatarError::validation(
                "image",
                format!("Unsupported image type '{}'. Use JPEG, PNG or HEIC.", image.mime()),
            ));
        }
        if image.is_empty() {
            return Err(AvatarError::validation("image", "The selected file is empty."));
        }
        let preview = PreviewHandle::create(&image)?;
        self.image = Some(image);
        Ok(self.swap_preview(preview))
    }

    /// Show a different rendition (e.g. the cropped square) without changing
    /// the selected image.
    pub fn replace_preview(&mut self, rendition: &SelectedImage) -> AvatarResult<&PreviewHandle> {
        let preview = PreviewHandle::create(rendition)?;
        Ok(self.swap_preview(preview))
    }

    /// Install `preview` first; a superseded handle that fails to release
    /// is only logged.
    fn swap_preview(&mut self, preview: PreviewHandle) -> &PreviewHandle {
        let old = self.preview.take();
        let preview: &PreviewHandle = self.preview.insert(preview);
        if let Some(old) = old {
            if let Err(e) = old.release() {
                warn!(error = %e, "Could not release superseded preview");
            }
        }
        preview
    }

    pub fn image(&self) -> Option<&SelectedImage> {
        self.image.as_ref()
    }

    pub fn preview(&self) -> Option<&PreviewHandle> {
        self.preview.as_ref()
    }

    /// Drop the selection and release its preview.
    pub fn clear(&mut self) -> AvatarResult<()> {
        self.image = None;
        match self.preview.take() {
            Some(preview) => preview.release(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    fn heic_header() -> Vec<u8> {
        let mut bytes = vec![0, 0, 0, 24];
        bytes.extend_from_slice(b"ftypheic");
        bytes.extend_from_slice(&[0; 12]);
        bytes
    }

    #[test]
    fn heic_variants_are_detected() {
        assert!(is_heic_mime("image/heic"));
        assert!(is_heic_mime("IMAGE/HEIF"));
        assert!(is_heic_mime("image/heic-sequence"));
        assert!(is_heic_mime("image/heif; codecs=hvc1"));
        assert!(!is_heic_mime("image/jpeg"));
    }

    #[test]
    fn accepted_types() {
        assert!(is_accepted_mime("image/jpeg"));
        assert!(is_accepted_mime("image/png"));
        assert!(is_accepted_mime("image/heif"));
        assert!(!is_accepted_mime("image/gif"));
        assert!(!is_accepted_mime("application/pdf"));
    }

    #[test]
    fn sniffs_png_and_heic() {
        let mut png = PNG_MAGIC.to_vec();
        png.extend_from_slice(&[0; 16]);
        assert_eq!(sniff_mime(&png), Some("image/png"));
        assert_eq!(sniff_mime(&heic_header()), Some("image/heic"));
        assert_eq!(sniff_mime(b"hello"), None);
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(mime_from_extension(Path::new("a/b/IMG_0001.HEIC")), Some("image/heic"));
        assert_eq!(mime_from_extension(Path::new("me.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_from_extension(Path::new("noext")), None);
    }

    #[test]
    fn from_path_sniffs_when_extension_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload");
        std::fs::write(&path, heic_header()).unwrap();
        let image = SelectedImage::from_path(&path).unwrap();
        assert!(image.is_heic());
        assert_eq!(image.name(), Some("upload"));
    }

    #[test]
    fn renamed_for_swaps_extension() {
        let image = SelectedImage::new(vec![1], "image/heic").with_name("IMG_42.heic");
        assert_eq!(image.renamed_for("jpg").as_deref(), Some("IMG_42.jpg"));
    }

    #[test]
    fn transfer_string_is_plain_base64() {
        let image = SelectedImage::new(vec![0xff, 0xd8, 0xff], MIME_JPEG);
        assert_eq!(image.to_transfer_string(), "/9j/");
    }

    #[test]
    fn reselect_releases_previous_preview() {
        let mut selection = ImageSelection::new();
        let first = selection
            .select(SelectedImage::new(vec![1, 2, 3], MIME_PNG))
            .unwrap()
            .path()
            .to_path_buf();
        assert!(first.exists());

        let second = selection
            .select(SelectedImage::new(vec![4, 5, 6], MIME_JPEG))
            .unwrap()
            .path()
            .to_path_buf();
        assert!(!first.exists(), "superseded preview must be released");
        assert!(second.exists());
        assert_eq!(selection.image().unwrap().bytes(), &[4, 5, 6]);

        selection.clear().unwrap();
        assert!(!second.exists());
        assert!(selection.image().is_none());
    }

    #[test]
    fn failed_release_keeps_new_preview() {
        let mut selection = ImageSelection::new();
        let first = selection
            .select(SelectedImage::new(vec![1, 2, 3], MIME_PNG))
            .unwrap()
            .path()
            .to_path_buf();
        // Someone else already deleted the old backing file.
        std::fs::remove_file(&first).unwrap();

        let second = selection
            .select(SelectedImage::new(vec![4, 5, 6], MIME_JPEG))
            .unwrap()
            .path()
            .to_path_buf();
        assert!(second.exists());
        assert_eq!(selection.preview().map(PreviewHandle::path), Some(second.as_path()));
        assert_eq!(selection.image().unwrap().bytes(), &[4, 5, 6]);
        assert_eq!(std::fs::read(&second).unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn replace_preview_keeps_selected_image() {
        let mut selection = ImageSelection::new();
        selection.select(SelectedImage::new(vec![1], MIME_PNG)).unwrap();
        let old = selection.preview().unwrap().path().to_path_buf();
        let cropped = SelectedImage::new(vec![9, 9], MIME_PNG);
        let new = selection.replace_preview(&cropped).unwrap().path().to_path_buf();
        assert!(!old.exists());
        assert_eq!(std::fs::read(new).unwrap(), vec![9, 9]);
        assert_eq!(selection.image().unwrap().bytes(), &[1]);
    }

    #[test]
    fn unsupported_type_is_rejected_without_touching_selection() {
        let mut selection = ImageSelection::new();
        let err = selection
            .select(SelectedImage::new(vec![1], "image/gif"))
            .unwrap_err();
        assert_eq!(err.category(), "validation");
        assert!(selection.image().is_none());
        assert!(selection.preview().is_none());
    }
}
