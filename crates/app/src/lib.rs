#![deny(unsafe_code)]

//! Client session for the prompt-to-image workflow.
//!
//! A `Session` turns user actions into agent requests over a `magic_link::AgentLink`
//! and folds the agent's replies back into the current `Screen`.

pub mod error;
/// Screens, user actions and the session state machine.
pub mod session;
/// Layered client settings persisted as JSON.
pub mod settings;

pub use error::{ErrorKind, SessionError, SessionResult};
pub use session::{
    DefaultImageFetcher, EditRequest, GeneratedImageResult, ImageFetcher, ImageRef, LocalImage,
    OperationContext, OperationId, Phase, Screen, Session, SessionOptions, UserAction,
};
pub use settings::{ClientSettings, SettingsError, SettingsStore};
