//! Two-stage content resolution.
//!
//! Transcripts and summaries are not returned inline. The detail record lists signed,
//! short-lived URLs; those are fetched directly (not through the desktop session) and
//! may come back gzip-compressed regardless of headers.

use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::model::{ContentKind, FileDetail};
use crate::session::SessionApi;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub async fn fetch_detail<A>(api: &A, file_id: &str) -> BridgeResult<FileDetail>
where
    A: SessionApi + ?Sized,
{
    let response = api.call(&format!("file/detail/{file_id}"), None).await?;
    let data = response.get("data").cloned().unwrap_or(Value::Null);
    if data.is_null() {
        return Ok(FileDetail::default());
    }
    serde_json::from_value(data).map_err(|err| BridgeError::Malformed {
        what: format!("detail of {file_id}"),
        reason: err.to_string(),
    })
}

/// Signed URL for `kind`, or `NotFound` when the content has not been generated.
pub fn select_link(detail: &FileDetail, kind: ContentKind, file_id: &str) -> BridgeResult<String> {
    detail
        .reference(kind)
        .and_then(|reference| reference.data_link.clone())
        .ok_or_else(|| BridgeError::NotFound {
            kind,
            file_id: file_id.to_string(),
        })
}

/// Plain HTTP client for signed URLs.
#[derive(Clone)]
pub struct ContentFetcher {
    http: Client,
    timeout: Duration,
}

impl ContentFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            timeout,
        }
    }

    pub async fn fetch_json(&self, url: &str) -> BridgeResult<Value> {
        let content_error = |reason: String| BridgeError::Content {
            url: redact(url),
            reason,
        };
        let res = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| content_error(err.to_string()))?;
        if !res.status().is_success() {
            return Err(content_error(format!("unexpected status {}", res.status())));
        }
        let body = res
            .bytes()
            .await
            .map_err(|err| content_error(err.to_string()))?;
        debug!(
            bytes = body.len(),
            gzip = is_gzip(&body),
            "fetched signed content"
        );
        decode_content(&body).map_err(content_error)
    }

    /// Detail call, reference selection, the direct fetch, then decoding into `T`.
    pub async fn resolve<A, T>(&self, api: &A, file_id: &str, kind: ContentKind) -> BridgeResult<T>
    where
        A: SessionApi + ?Sized,
        T: DeserializeOwned,
    {
        let detail = fetch_detail(api, file_id).await?;
        let link = select_link(&detail, kind, file_id)?;
        let content = self.fetch_json(&link).await?;
        serde_json::from_value(content).map_err(|err| BridgeError::Malformed {
            what: format!("{kind} for {file_id} from {}", redact(&link)),
            reason: err.to_string(),
        })
    }
}

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Parses JSON, gunzipping first when the body starts with the gzip magic bytes.
pub fn decode_content(bytes: &[u8]) -> Result<Value, String> {
    if is_gzip(bytes) {
        let mut inflated = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut inflated)
            .map_err(|err| format!("gzip decode failed: {err}"))?;
        serde_json::from_slice(&inflated).map_err(|err| format!("invalid JSON: {err}"))
    } else {
        serde_json::from_slice(bytes).map_err(|err| format!("invalid JSON: {err}"))
    }
}

// signed query strings are credentials; keep them out of errors and logs
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}
