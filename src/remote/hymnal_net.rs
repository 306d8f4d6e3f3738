//! Hymnal catalog HTTP client / 诗歌目录HTTP客户端

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{HymnalNetJson, RemoteClient, SongResultsPage};
use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::HymnIdentifier;

/// HTTP client for the hymnal catalog API / 目录接口客户端
pub struct HymnalNetClient {
    http: Client,
    base_url: String,
}

impl HymnalNetClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, String> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// 按标识符构造请求地址
    fn hymn_url(&self, id: &HymnIdentifier) -> String {
        let mut url = format!(
            "{}/v2/hymn/{}/{}",
            self.base_url,
            id.hymn_type.prefix(),
            urlencoding::encode(&id.number)
        );
        let mut sep = '?';
        for (k, v) in &id.query_params {
            url.push(sep);
            url.push_str(&format!(
                "{}={}",
                urlencoding::encode(k),
                urlencoding::encode(v)
            ));
            sep = '&';
        }
        url
    }

    fn search_url(&self, query: &str, page: Option<u32>) -> String {
        match page {
            Some(page) => format!(
                "{}/v2/search/{}/{}",
                self.base_url,
                urlencoding::encode(query),
                page
            ),
            None => format!("{}/v2/search/{}", self.base_url, urlencoding::encode(query)),
        }
    }
}

#[async_trait]
impl RemoteClient for HymnalNetClient {
    async fn fetch_hymn(&self, id: &HymnIdentifier) -> SyncResult<HymnalNetJson> {
        let url = self.hymn_url(id);
        tracing::debug!("Fetching hymn {} from {}", id, url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Transport(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json::<HymnalNetJson>()
            .await
            .map_err(|e| SyncError::Conversion(e.to_string()))
    }

    async fn search(&self, query: &str, page: Option<u32>) -> SyncResult<SongResultsPage> {
        let url = self.search_url(query, page);
        tracing::debug!("Searching remote catalog: {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::Transport(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        response
            .json::<SongResultsPage>()
            .await
            .map_err(|e| SyncError::Conversion(e.to_string()))
    }
}
