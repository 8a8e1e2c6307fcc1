use std::path::PathBuf;
use std::time::Duration;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LinkError {
    #[snafu(display("failed to connect to agent at '{url}' on `{stage}`, {source}"))]
    Connect {
        stage: &'static str,
        url: String,
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[snafu(display("connecting to agent at '{url}' timed out after {timeout:?}"))]
    ConnectTimeout {
        stage: &'static str,
        url: String,
        timeout: Duration,
    },
    #[snafu(display("agent socket failed on `{stage}`, {source}"))]
    Socket {
        stage: &'static str,
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[snafu(display("failed to serialize outbound '{action}' message: {source}"))]
    SerializeMessage {
        stage: &'static str,
        action: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("malformed inbound frame: {source}"))]
    MalformedFrame {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("agent link is closed; cannot deliver on `{stage}`"))]
    ChannelClosed { stage: &'static str },
    #[snafu(display("failed to read media from {path:?} on `{stage}`: {source}"))]
    ReadMedia {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("invalid base64 payload on `{stage}`: {source}"))]
    DecodeBase64 {
        stage: &'static str,
        source: base64::DecodeError,
    },
    #[snafu(display("media encoding task failed on `{stage}`: {source}"))]
    EncodeTask {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
}

pub type LinkResult<T> = Result<T, LinkError>;
