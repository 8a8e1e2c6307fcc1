use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use snafu::ResultExt;

use super::error::{DecodeBase64Snafu, EncodeTaskSnafu, LinkResult, ReadMediaSnafu};

pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Where the bytes of a blob live until they are encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Bytes(Arc<[u8]>),
    File(PathBuf),
}

/// A binary payload (recorded audio, picked image) waiting to be transcoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub source: MediaSource,
    pub mime: String,
}

impl MediaBlob {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            source: MediaSource::Bytes(bytes.into()),
            mime: DEFAULT_MIME.to_string(),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: MediaSource::File(path.into()),
            mime: DEFAULT_MIME.to_string(),
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = mime.into();
        self
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            MediaSource::File(path) => Some(path.as_path()),
            MediaSource::Bytes(_) => None,
        }
    }

    async fn read(&self) -> LinkResult<Arc<[u8]>> {
        match &self.source {
            MediaSource::Bytes(bytes) => Ok(bytes.clone()),
            MediaSource::File(path) => {
                let bytes = tokio::fs::read(path).await.context(ReadMediaSnafu {
                    stage: "read-media-file",
                    path: path.clone(),
                })?;
                Ok(bytes.into())
            }
        }
    }
}

/// Encodes a blob as standard padded base64.
///
/// The file read suspends; transcoding runs on the blocking pool.
pub async fn encode(blob: &MediaBlob) -> LinkResult<String> {
    let bytes = blob.read().await?;
    let byte_count = bytes.len();

    let encoded = tokio::task::spawn_blocking(move || BASE64_STANDARD.encode(&bytes[..]))
        .await
        .context(EncodeTaskSnafu {
            stage: "encode-media-blocking",
        })?;

    tracing::debug!(
        mime = %blob.mime,
        byte_count,
        encoded_len = encoded.len(),
        "encoded media blob"
    );
    Ok(encoded)
}

/// Encodes two blobs concurrently and yields both payloads, or the first failure.
pub async fn encode_pair(first: &MediaBlob, second: &MediaBlob) -> LinkResult<(String, String)> {
    tokio::try_join!(encode(first), encode(second))
}

pub fn decode(encoded: &str) -> LinkResult<Vec<u8>> {
    BASE64_STANDARD.decode(encoded).context(DecodeBase64Snafu {
        stage: "decode-base64",
    })
}

/// Splits `data:<mime>;base64,<payload>` into its mime type and payload.
///
/// Returns `None` for anything that is not a base64 data URI.
pub fn split_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };
    Some((mime, payload))
}

pub fn to_data_uri(mime: &str, encoded: &str) -> String {
    format!("data:{mime};base64,{encoded}")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[tokio::test]
    async fn round_trip_preserves_arbitrary_bytes() {
        let large = (0..256 * 1024)
            .map(|index| (index * 31 % 251) as u8)
            .collect::<Vec<_>>();

        for original in [Vec::new(), vec![0u8], vec![0xff, 0x00, 0x7f], large] {
            let blob = MediaBlob::from_bytes(original.clone());
            let encoded = encode(&blob).await.unwrap();
            assert_eq!(decode(&encoded).unwrap(), original);
        }
    }

    #[tokio::test]
    async fn file_blobs_are_read_before_encoding() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"RIFF-fake-audio").unwrap();

        let blob = MediaBlob::from_file(file.path()).with_mime("audio/webm");
        assert_eq!(blob.path(), Some(file.path()));

        let encoded = encode(&blob).await.unwrap();
        assert_eq!(decode(&encoded).unwrap(), b"RIFF-fake-audio");
    }

    #[tokio::test]
    async fn missing_file_reports_read_failure() {
        let blob = MediaBlob::from_file("/definitely/not/here.webm");
        let error = encode(&blob).await.unwrap_err();
        assert!(matches!(error, crate::LinkError::ReadMedia { .. }));
    }

    #[tokio::test]
    async fn encode_pair_waits_for_both_payloads() {
        let audio = MediaBlob::from_bytes(b"audio".to_vec());
        let image = MediaBlob::from_bytes(b"image".to_vec());

        let (audio_b64, image_b64) = encode_pair(&audio, &image).await.unwrap();
        assert_eq!(decode(&audio_b64).unwrap(), b"audio");
        assert_eq!(decode(&image_b64).unwrap(), b"image");

        let missing = MediaBlob::from_file("/definitely/not/here.png");
        assert!(encode_pair(&audio, &missing).await.is_err());
    }

    #[test]
    fn data_uri_helpers_split_and_join() {
        let uri = to_data_uri("image/png", "iVBORw0KGgo=");
        assert_eq!(uri, "data:image/png;base64,iVBORw0KGgo=");
        assert_eq!(split_data_uri(&uri), Some(("image/png", "iVBORw0KGgo=")));
        assert_eq!(
            split_data_uri("data:;base64,AAAA"),
            Some((DEFAULT_MIME, "AAAA"))
        );
        assert_eq!(split_data_uri("https://example.com/cat.png"), None);
        assert_eq!(split_data_uri("data:text/plain,hello"), None);
    }
}
