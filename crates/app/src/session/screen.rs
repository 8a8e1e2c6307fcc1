use super::context::LocalImage;

pub const MAX_UPLOADED_IMAGES: usize = 7;

/// Sub-state of `Generating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Prompt enhancement; thought chunks accumulate here.
    Enhance,
    /// Image synthesis.
    Image,
}

/// Immutable snapshot rendered by the Display screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImageResult {
    pub original_prompt: Option<String>,
    pub magic_prompt: Option<String>,
    pub image_url: String,
    pub base_image_url: Option<String>,
}

/// Images picked on the Home screen and not yet submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadedImageSet {
    images: Vec<LocalImage>,
}

impl UploadedImageSet {
    /// Appends in order and returns how many images were dropped over the cap.
    pub fn extend(&mut self, images: impl IntoIterator<Item = LocalImage>) -> usize {
        let mut dropped = 0;
        for image in images {
            if self.images.len() < MAX_UPLOADED_IMAGES {
                self.images.push(image);
            } else {
                dropped += 1;
            }
        }
        dropped
    }

    /// Out-of-range indices leave the set untouched.
    pub fn remove(&mut self, index: usize) -> Option<LocalImage> {
        (index < self.images.len()).then(|| self.images.remove(index))
    }

    pub fn as_slice(&self) -> &[LocalImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// The one screen currently active. Each variant carries only what it renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Home { uploaded_images: UploadedImageSet },
    PromptIdeas,
    Generating { phase: Phase, thought: String },
    Display(GeneratedImageResult),
    Error { message: String },
}

impl Default for Screen {
    fn default() -> Self {
        Self::home()
    }
}

impl Screen {
    pub fn home() -> Self {
        Self::Home {
            uploaded_images: UploadedImageSet::default(),
        }
    }

    pub fn generating(phase: Phase) -> Self {
        Self::Generating {
            phase,
            thought: String::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Home { .. } => "home",
            Self::PromptIdeas => "prompt-ideas",
            Self::Generating { .. } => "generating",
            Self::Display(_) => "display",
            Self::Error { .. } => "error",
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Generating { phase, .. } => Some(*phase),
            Self::Home { .. } | Self::PromptIdeas | Self::Display(_) | Self::Error { .. } => None,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.phase().is_some()
    }

    /// True on the screens a new top-level submission may start from.
    pub fn accepts_submission(&self) -> bool {
        matches!(self, Self::Home { .. } | Self::PromptIdeas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(count: usize) -> Vec<LocalImage> {
        (0..count)
            .map(|index| LocalImage::from_file(format!("/photos/{index}.png")))
            .collect()
    }

    #[test]
    fn upload_caps_at_seven_and_drops_overflow() {
        let mut set = UploadedImageSet::default();
        assert_eq!(set.extend(images(5)), 0);
        assert_eq!(set.extend(images(4)), 2);
        assert_eq!(set.len(), MAX_UPLOADED_IMAGES);

        assert_eq!(set.extend(images(3)), 3);
        assert_eq!(set.len(), MAX_UPLOADED_IMAGES);
        assert_eq!(
            set.as_slice()[6].reference.as_str(),
            "file:///photos/1.png"
        );
    }

    #[test]
    fn remove_by_index_and_ignore_out_of_range() {
        let mut set = UploadedImageSet::default();
        set.extend(images(3));

        let removed = set.remove(1).unwrap();
        assert_eq!(removed.reference.as_str(), "file:///photos/1.png");
        assert_eq!(set.len(), 2);
        assert_eq!(set.as_slice()[1].reference.as_str(), "file:///photos/2.png");

        assert!(set.remove(2).is_none());
        assert!(set.remove(usize::MAX).is_none());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn only_home_and_prompt_ideas_accept_submissions() {
        assert!(Screen::home().accepts_submission());
        assert!(Screen::PromptIdeas.accepts_submission());
        assert!(!Screen::generating(Phase::Enhance).accepts_submission());
        assert!(
            !Screen::Error {
                message: "boom".to_string()
            }
            .accepts_submission()
        );
        assert_eq!(Screen::generating(Phase::Image).phase(), Some(Phase::Image));
    }
}
