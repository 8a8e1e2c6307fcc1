use std::fmt;
use std::path::Path;

use magic_link::MediaBlob;
use uuid::Uuid;

use super::screen::GeneratedImageResult;

/// Opaque handle to an image the client can show again without re-sending it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Relative paths are resolved against the working directory first.
    pub fn for_path(path: &Path) -> Self {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self(format!("file://{}", path.display()))
    }

    /// Fresh `blob:` reference for bytes that only live in memory.
    pub fn new_blob() -> Self {
        Self(format!("blob:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// A picked image: its displayable reference plus the bytes to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalImage {
    pub reference: ImageRef,
    pub blob: MediaBlob,
}

impl LocalImage {
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        Self {
            reference: ImageRef::for_path(path),
            blob: MediaBlob::from_file(path).with_mime(mime.essence_str()),
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>, mime: impl Into<String>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            reference: ImageRef::new_blob(),
            blob: MediaBlob::from_bytes(bytes).with_mime(mime),
        }
    }
}

/// Scratch data that ties a multi-message exchange to its eventual result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationContext {
    pub original_prompt: Option<String>,
    pub magic_prompt: Option<String>,
    pub base_image: Option<ImageRef>,
}

impl OperationContext {
    pub fn for_prompt(prompt: impl Into<String>) -> Self {
        Self {
            original_prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn for_image(prompt: Option<String>, base_image: ImageRef) -> Self {
        Self {
            original_prompt: prompt,
            magic_prompt: None,
            base_image: Some(base_image),
        }
    }

    /// Seeds an edit from the result on screen. Prompts carry over; the shown image
    /// becomes the base.
    pub fn continue_from(result: &GeneratedImageResult) -> Self {
        Self {
            original_prompt: result.original_prompt.clone(),
            magic_prompt: result.magic_prompt.clone(),
            base_image: Some(ImageRef::new(result.image_url.clone())),
        }
    }

    pub fn record_transcription(&mut self, text: impl Into<String>) {
        self.original_prompt = Some(text.into());
    }

    pub fn record_magic_prompt(&mut self, magic_prompt: impl Into<String>) {
        self.magic_prompt = Some(magic_prompt.into());
    }

    pub fn generated_result(&self, image_url: impl Into<String>) -> GeneratedImageResult {
        GeneratedImageResult {
            original_prompt: self.original_prompt.clone(),
            magic_prompt: self.magic_prompt.clone(),
            image_url: image_url.into(),
            base_image_url: None,
        }
    }

    pub fn edited_result(&self, image_url: impl Into<String>) -> GeneratedImageResult {
        GeneratedImageResult {
            original_prompt: self.original_prompt.clone(),
            magic_prompt: self.magic_prompt.clone(),
            image_url: image_url.into(),
            base_image_url: self.base_image.as_ref().map(|image| image.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_file_images_get_file_references_and_guessed_mime() {
        let image = LocalImage::from_file("/photos/beach.png");

        assert_eq!(image.reference.as_str(), "file:///photos/beach.png");
        assert_eq!(image.blob.mime, "image/png");
        assert_eq!(image.blob.path(), Some(Path::new("/photos/beach.png")));
    }

    #[test]
    fn relative_paths_become_absolute_file_references() {
        let reference = ImageRef::for_path(Path::new("photo.png"));
        let expected = std::env::current_dir().unwrap().join("photo.png");

        assert!(reference.as_str().starts_with("file:///"));
        assert_eq!(reference.as_str(), format!("file://{}", expected.display()));
    }

    #[test]
    fn in_memory_images_get_distinct_blob_references() {
        let first = LocalImage::from_bytes(vec![1, 2, 3], "image/jpeg");
        let second = LocalImage::from_bytes(vec![1, 2, 3], "image/jpeg");

        assert!(first.reference.as_str().starts_with("blob:"));
        assert_ne!(first.reference, second.reference);
    }

    #[test]
    fn edit_continuation_keeps_prompts_and_uses_shown_image_as_base() {
        let shown = GeneratedImageResult {
            original_prompt: Some("a cat".to_string()),
            magic_prompt: Some("a fluffy cat, studio lighting".to_string()),
            image_url: "data:image/png;base64,XYZ".to_string(),
            base_image_url: None,
        };

        let context = OperationContext::continue_from(&shown);
        let edited = context.edited_result("data:image/png;base64,NEW");

        assert_eq!(edited.original_prompt.as_deref(), Some("a cat"));
        assert_eq!(
            edited.magic_prompt.as_deref(),
            Some("a fluffy cat, studio lighting")
        );
        assert_eq!(
            edited.base_image_url.as_deref(),
            Some("data:image/png;base64,XYZ")
        );
        assert_eq!(context.generated_result("x").base_image_url, None);
    }
}
