use magic_link::MediaBlob;

use super::context::LocalImage;

/// Input for editing the image currently on the Display screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditRequest {
    pub audio: Option<MediaBlob>,
    pub text: Option<String>,
    pub images: Vec<LocalImage>,
}

impl EditRequest {
    pub fn with_audio(mut self, audio: MediaBlob) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_images(mut self, images: Vec<LocalImage>) -> Self {
        self.images = images;
        self
    }

    /// Blank text does not count as input.
    pub fn text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.text().is_none() && self.images.is_empty()
    }
}

/// Every way the presentation layer can drive a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    SubmitVoice {
        audio: MediaBlob,
    },
    SubmitText {
        text: String,
    },
    SubmitImagePrompt {
        prompt: String,
        images: Vec<LocalImage>,
    },
    SubmitVoiceWithImage {
        audio: MediaBlob,
        images: Vec<LocalImage>,
    },
    SubmitEdit(EditRequest),
    UploadImages(Vec<LocalImage>),
    RemoveImage(usize),
    OpenPromptIdeas,
    Reset,
}

impl UserAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmitVoice { .. } => "submit_voice",
            Self::SubmitText { .. } => "submit_text",
            Self::SubmitImagePrompt { .. } => "submit_image_prompt",
            Self::SubmitVoiceWithImage { .. } => "submit_voice_with_image",
            Self::SubmitEdit(_) => "submit_edit",
            Self::UploadImages(_) => "upload_images",
            Self::RemoveImage(_) => "remove_image",
            Self::OpenPromptIdeas => "open_prompt_ideas",
            Self::Reset => "reset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_edit_text_counts_as_no_input() {
        assert!(EditRequest::default().is_empty());
        assert!(EditRequest::default().with_text("   ").is_empty());

        let request = EditRequest::default().with_text("  add snow  ");
        assert!(!request.is_empty());
        assert_eq!(request.text(), Some("add snow"));

        let request = EditRequest::default().with_images(vec![LocalImage::from_file("/a.png")]);
        assert!(!request.is_empty());
    }
}
