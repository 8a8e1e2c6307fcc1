use std::future::Future;
use std::pin::Pin;

use magic_link::{MediaBlob, decode, split_data_uri};

use crate::error::{SessionError, SessionResult};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Loads the bytes behind a displayed image so it can be sent back for editing.
pub trait ImageFetcher: Send + Sync {
    fn fetch<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, SessionResult<MediaBlob>>;
}

/// Resolves `data:` URIs in place, local files through `tokio::fs`, and HTTP URLs
/// through `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct DefaultImageFetcher {
    http: reqwest::Client,
}

impl DefaultImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn fetch_data_uri(reference: &str, mime: &str, payload: &str) -> SessionResult<MediaBlob> {
        let bytes =
            decode(payload).map_err(|source| fetch_failed("decode-data-uri", reference, source))?;
        Ok(MediaBlob::from_bytes(bytes).with_mime(mime))
    }

    async fn fetch_http(&self, reference: &str) -> SessionResult<MediaBlob> {
        let response = self
            .http
            .get(reference)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|source| fetch_failed("request-image", reference, source))?;

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .map_err(|source| fetch_failed("read-image-body", reference, source))?;

        let blob = MediaBlob::from_bytes(bytes.to_vec());
        Ok(match mime {
            Some(mime) => blob.with_mime(mime),
            None => blob,
        })
    }

    async fn fetch_file(reference: &str) -> SessionResult<MediaBlob> {
        let path = reference.strip_prefix("file://").unwrap_or(reference);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| fetch_failed("read-image-file", reference, source))?;

        let mime = mime_guess::from_path(path).first_or_octet_stream();
        Ok(MediaBlob::from_bytes(bytes).with_mime(mime.essence_str()))
    }
}

impl ImageFetcher for DefaultImageFetcher {
    fn fetch<'a>(&'a self, reference: &'a str) -> BoxFuture<'a, SessionResult<MediaBlob>> {
        Box::pin(async move {
            if let Some((mime, payload)) = split_data_uri(reference) {
                return Self::fetch_data_uri(reference, mime, payload);
            }

            if reference.starts_with("http://") || reference.starts_with("https://") {
                return self.fetch_http(reference).await;
            }

            if reference.starts_with("blob:") {
                // Object-style references only name bytes held by whoever minted them.
                return Err(SessionError::FetchImage {
                    stage: "resolve-image-reference",
                    reference: reference.to_string(),
                    details: "in-memory references cannot be fetched".to_string(),
                });
            }

            Self::fetch_file(reference).await
        })
    }
}

fn fetch_failed(
    stage: &'static str,
    reference: &str,
    source: impl std::fmt::Display,
) -> SessionError {
    SessionError::FetchImage {
        stage,
        reference: abbreviate(reference),
        details: source.to_string(),
    }
}

/// Data URIs can be megabytes long; keep error text readable.
fn abbreviate(reference: &str) -> String {
    const LIMIT: usize = 64;
    match reference.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &reference[..cut]),
        None => reference.to_string(),
    }
}
