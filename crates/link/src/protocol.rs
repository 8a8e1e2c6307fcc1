//! Wire contracts exchanged with the remote agent.
//!
//! Outbound records select their schema with an `action` field, inbound records with a
//! `type` field. Both travel as JSON text frames.

use serde::{Deserialize, Deserializer, Serialize};
use snafu::ResultExt;

use super::error::{LinkResult, MalformedFrameSnafu};

/// Aspect ratios the agent is instructed to pick from.
pub const ASPECT_RATIOS: [&str; 5] = ["1:1", "3:4", "4:3", "9:16", "16:9"];
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

/// Requests sent from the client to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundMessage {
    Transcribe {
        #[serde(rename = "audioData")]
        audio_data: String,
    },
    EnhancePrompt {
        #[serde(rename = "originalPrompt")]
        original_prompt: String,
    },
    GenerateImage {
        prompt: String,
        #[serde(rename = "aspectRatio")]
        aspect_ratio: String,
    },
    EditImage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<String>,
        #[serde(rename = "audioData", default, skip_serializing_if = "Option::is_none")]
        audio_data: Option<String>,
        #[serde(rename = "baseImage")]
        base_image: String,
        #[serde(
            rename = "additionalImages",
            default,
            skip_serializing_if = "Vec::is_empty"
        )]
        additional_images: Vec<String>,
    },
}

impl OutboundMessage {
    /// Wire name of the action, used for log fields.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Transcribe { .. } => "transcribe",
            Self::EnhancePrompt { .. } => "enhance_prompt",
            Self::GenerateImage { .. } => "generate_image",
            Self::EditImage { .. } => "edit_image",
        }
    }
}

/// Events pushed by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    TranscriptionComplete {
        #[serde(rename = "transcribedText")]
        transcribed_text: String,
    },
    PromptEnhanced {
        #[serde(rename = "magicPrompt")]
        magic_prompt: String,
        #[serde(
            rename = "aspectRatio",
            default = "default_aspect_ratio",
            deserialize_with = "aspect_ratio_or_default"
        )]
        aspect_ratio: String,
    },
    ThoughtUpdate {
        chunk: String,
    },
    ImageGenerated {
        #[serde(rename = "imageData")]
        image_data: String,
    },
    ImageEdited {
        #[serde(rename = "imageData")]
        image_data: String,
    },
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TranscriptionComplete { .. } => "transcription_complete",
            Self::PromptEnhanced { .. } => "prompt_enhanced",
            Self::ThoughtUpdate { .. } => "thought_update",
            Self::ImageGenerated { .. } => "image_generated",
            Self::ImageEdited { .. } => "image_edited",
        }
    }
}

/// Parses one inbound text frame.
///
/// Invalid JSON, an unknown `type` and missing fields are all reported as
/// [`LinkError::MalformedFrame`](super::LinkError::MalformedFrame).
pub fn parse_inbound_frame(text: &str) -> LinkResult<InboundEvent> {
    serde_json::from_str(text).context(MalformedFrameSnafu {
        stage: "parse-inbound-frame",
    })
}

fn default_aspect_ratio() -> String {
    DEFAULT_ASPECT_RATIO.to_string()
}

/// A missing or `null` ratio means the agent's default.
fn aspect_ratio_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_aspect_ratio))
}
