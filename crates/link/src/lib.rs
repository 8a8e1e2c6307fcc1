#![deny(unsafe_code)]

//! Remote agent plumbing: wire protocol, media transcoding and the persistent link.

mod error;
mod media;
mod protocol;
mod transport;

pub use error::{LinkError, LinkResult};
pub use media::{
    DEFAULT_MIME, MediaBlob, MediaSource, decode, encode, encode_pair, split_data_uri,
    to_data_uri,
};
pub use protocol::{
    ASPECT_RATIOS, DEFAULT_ASPECT_RATIO, InboundEvent, OutboundMessage, parse_inbound_frame,
};
pub use transport::{
    AgentLink, DEFAULT_AGENT_URL, DEFAULT_CONNECT_TIMEOUT, LinkConfig, LinkEvent, LinkHandle,
    LinkSender, LinkWorker, LoopbackPeer,
};
