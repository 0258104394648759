use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::content::{fetch_detail, ContentFetcher};
use crate::error::{BridgeError, BridgeResult};
use crate::model::{
    ContentKind, FileDetail, FileMeta, ListFilesParams, SearchMatch, Segment, Summary,
};
use crate::search::{self, within_window, TranscriptSource};
use crate::session::{SessionApi, SessionProxy};

const LIST_ENDPOINT: &str = "file/simple/web";
// single-file lookups scan one page this large
const LOOKUP_PAGE: u32 = 1000;

/// Outcome of [`PlaudClient::check_connection`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected { total_files: u64 },
    Unavailable { message: String },
    Error {
        message: String,
        /// API or HTTP status of the failed call, when it carried one.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i64>,
    },
}

/// Typed operations over the Plaud API.
pub struct PlaudClient<A: SessionApi = SessionProxy> {
    api: A,
    fetcher: ContentFetcher,
    search_concurrency: usize,
    search_candidate_limit: u32,
}

impl PlaudClient<SessionProxy> {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            SessionProxy::from_config(config),
            ContentFetcher::new(config.content_timeout()),
        )
        .with_search_limits(config.search_concurrency, config.search_candidate_limit)
    }
}

impl<A: SessionApi> PlaudClient<A> {
    pub fn new(api: A, fetcher: ContentFetcher) -> Self {
        Self {
            api,
            fetcher,
            search_concurrency: 5,
            search_candidate_limit: 100,
        }
    }

    pub fn with_search_limits(mut self, concurrency: usize, candidate_limit: u32) -> Self {
        self.search_concurrency = concurrency.max(1);
        self.search_candidate_limit = candidate_limit;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub async fn is_available(&self) -> bool {
        self.api.is_available().await
    }

    /// Availability plus one cheap authenticated call. Never fails.
    pub async fn check_connection(&self) -> ConnectionStatus {
        if !self.api.is_available().await {
            return ConnectionStatus::Unavailable {
                message: "Plaud Desktop is not running or its debug channel is closed".to_string(),
            };
        }
        match self.file_count().await {
            Ok(total_files) => ConnectionStatus::Connected { total_files },
            Err(err) => ConnectionStatus::Error {
                code: err.status(),
                message: err.to_string(),
            },
        }
    }

    pub async fn list_files(&self, params: &ListFilesParams) -> BridgeResult<Vec<FileMeta>> {
        let query = params.to_query();
        let response = self.api.call(LIST_ENDPOINT, Some(&query)).await?;
        let files = match response.get("data_file_list") {
            None | Some(Value::Null) => Vec::new(),
            Some(list) => {
                serde_json::from_value(list.clone()).map_err(|err| BridgeError::Malformed {
                    what: "file listing".to_string(),
                    reason: err.to_string(),
                })?
            }
        };
        debug!(count = files.len(), skip = params.skip, "listed files");
        Ok(files)
    }

    pub async fn file_count(&self) -> BridgeResult<u64> {
        let params = ListFilesParams::with_limit(1);
        let response = self
            .api
            .call(LIST_ENDPOINT, Some(&params.to_query()))
            .await?;
        Ok(response
            .get("data_file_total")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    pub async fn file(&self, file_id: &str) -> BridgeResult<FileMeta> {
        self.list_files(&ListFilesParams::with_limit(LOOKUP_PAGE))
            .await?
            .into_iter()
            .find(|file| file.id == file_id)
            .ok_or_else(|| BridgeError::FileNotFound(file_id.to_string()))
    }

    pub async fn file_detail(&self, file_id: &str) -> BridgeResult<FileDetail> {
        fetch_detail(&self.api, file_id).await
    }

    pub async fn transcript(&self, file_id: &str) -> BridgeResult<Vec<Segment>> {
        self.fetcher
            .resolve(&self.api, file_id, ContentKind::Transcript)
            .await
    }

    pub async fn summary(&self, file_id: &str) -> BridgeResult<Summary> {
        self.fetcher
            .resolve(&self.api, file_id, ContentKind::Summary)
            .await
    }

    /// Files started within the last `days` days, newest first.
    pub async fn recent_files(&self, days: u32) -> BridgeResult<Vec<FileMeta>> {
        self.recent_files_at(days, now_millis()).await
    }

    pub async fn recent_files_at(&self, days: u32, now_ms: i64) -> BridgeResult<Vec<FileMeta>> {
        let files = self
            .list_files(&ListFilesParams::with_limit(self.search_candidate_limit))
            .await?;
        Ok(within_window(files, now_ms, days))
    }

    pub async fn search(&self, query: &str, days: u32) -> BridgeResult<Vec<SearchMatch>> {
        let matches = search::search(self, query, days, self.search_concurrency)
            .await?;
        info!(
            query,
            days,
            matches = matches.len(),
            "transcript search complete"
        );
        Ok(matches)
    }
}

#[async_trait]
impl<A: SessionApi> TranscriptSource for PlaudClient<A> {
    async fn candidates(&self, window_days: u32) -> BridgeResult<Vec<FileMeta>> {
        self.recent_files(window_days).await
    }

    async fn transcript(&self, file_id: &str) -> BridgeResult<Vec<Segment>> {
        PlaudClient::transcript(self, file_id).await
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
