use std::time::Duration;

use magic_link::LinkError;
use snafu::Snafu;

/// Coarse failure classes the presentation layer reacts to.
///
/// Malformed inbound frames never get this far: the link drops them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    InvalidEditRequest,
    Encoding,
    Rejected,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("edit request carries no audio, text or images"))]
    InvalidEditRequest { stage: &'static str },
    #[snafu(display("image submission on `{stage}` has no image attached"))]
    NoImageSelected { stage: &'static str },
    #[snafu(display("action '{action}' is not allowed on the {screen} screen"))]
    ActionNotAllowed {
        stage: &'static str,
        action: &'static str,
        screen: &'static str,
    },
    #[snafu(display("failed to encode media on `{stage}`, {source}"))]
    Encoding {
        stage: &'static str,
        source: LinkError,
    },
    #[snafu(display("failed to fetch displayed image '{reference}' on `{stage}`: {details}"))]
    FetchImage {
        stage: &'static str,
        reference: String,
        details: String,
    },
    #[snafu(display("agent transport failed on `{stage}`, {source}"))]
    Transport {
        stage: &'static str,
        source: LinkError,
    },
    #[snafu(display("agent connection dropped: {message}"))]
    LinkDropped {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("no agent response within {timeout:?}"))]
    WatchdogExpired {
        stage: &'static str,
        timeout: Duration,
    },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidEditRequest { .. } => ErrorKind::InvalidEditRequest,
            Self::NoImageSelected { .. } | Self::ActionNotAllowed { .. } => ErrorKind::Rejected,
            Self::Encoding { .. } | Self::FetchImage { .. } => ErrorKind::Encoding,
            Self::Transport { .. } | Self::LinkDropped { .. } | Self::WatchdogExpired { .. } => {
                ErrorKind::Transport
            }
        }
    }

    /// Copy shown on the Error screen.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Transport => match self {
                Self::WatchdogExpired { .. } => {
                    "The agent took too long to respond. Please try again.".to_string()
                }
                _ => "Lost connection to the agent. Please try again.".to_string(),
            },
            ErrorKind::InvalidEditRequest => "No input provided for editing.".to_string(),
            ErrorKind::Encoding => "Failed to prepare your media for upload.".to_string(),
            ErrorKind::Rejected => self.to_string(),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_failure_taxonomy() {
        let invalid = SessionError::InvalidEditRequest { stage: "test" };
        assert_eq!(invalid.kind(), ErrorKind::InvalidEditRequest);
        assert_eq!(invalid.user_message(), "No input provided for editing.");

        let dropped = SessionError::LinkDropped {
            stage: "test",
            message: "reset by peer".to_string(),
        };
        assert_eq!(dropped.kind(), ErrorKind::Transport);
        assert!(!dropped.user_message().contains("reset by peer"));

        let closed = SessionError::Transport {
            stage: "test",
            source: LinkError::ChannelClosed { stage: "test" },
        };
        assert_eq!(closed.kind(), ErrorKind::Transport);

        let rejected = SessionError::ActionNotAllowed {
            stage: "test",
            action: "submit_text",
            screen: "generating",
        };
        assert_eq!(rejected.kind(), ErrorKind::Rejected);
        assert!(rejected.user_message().contains("submit_text"));
    }
}
