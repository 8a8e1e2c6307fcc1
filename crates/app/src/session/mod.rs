/// Per-operation scratch data and image references.
pub mod context;
pub mod events;
pub mod fetch;
/// The session state machine and its event loop.
pub mod machine;
/// Screen variants rendered by the presentation layer.
pub mod screen;

pub use context::{ImageRef, LocalImage, OperationContext};
pub use events::{EditRequest, UserAction};
pub use fetch::{BoxFuture, DefaultImageFetcher, ImageFetcher};
pub use machine::{OperationId, Session, SessionOptions};
pub use screen::{GeneratedImageResult, MAX_UPLOADED_IMAGES, Phase, Screen, UploadedImageSet};
