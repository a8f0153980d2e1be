//! 交易索引服務客戶端
//!
//! 索引服務提供合約方法的完整歷史調用數據（Tenderly 風格的 API）。
//! 服務是可選的：未配置或不可用時，掃描器退化為只使用本地緩存。

use crate::error::{AuditorError, Result};
use crate::types::{
    Address, BlockNumber, DecodedArgument, IndexerConfig, TransactionRecord, TransactionStatus,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// 單次歷史查詢最多拉取的頁數
pub const MAX_PAGES: u32 = 1_000;

/// 索引服務返回的單筆調用
#[derive(Debug, Clone, Deserialize)]
pub struct IndexedCall {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub block_number: BlockNumber,
    pub method: String,
    /// 部分交易（例如解碼失敗的）沒有解碼參數
    #[serde(default)]
    pub decoded_input: Option<Vec<DecodedArgument>>,
    /// `true` 表示交易執行成功
    pub status: bool,
}

impl From<IndexedCall> for TransactionRecord {
    fn from(call: IndexedCall) -> Self {
        TransactionRecord {
            hash: call.hash,
            from: call.from,
            to: call.to,
            block_number: call.block_number,
            method: call.method,
            decoded_input: call.decoded_input.unwrap_or_default(),
            status: if call.status {
                TransactionStatus::Success
            } else {
                TransactionStatus::Failure
            },
        }
    }
}

/// 交易索引服務接口
#[async_trait]
pub trait TransactionIndexer: Send + Sync {
    /// 獲取合約方法的全部歷史調用（不限區塊範圍）
    async fn fetch_call_history(
        &self,
        contract: &Address,
        method_signature: &str,
    ) -> Result<Vec<IndexedCall>>;
}

/// 索引服務能力
///
/// 缺省路徑是類型上的一個分支，而不是可空字段
#[derive(Clone)]
pub enum IndexerSource {
    Available(Arc<dyn TransactionIndexer>),
    Unavailable,
}

impl IndexerSource {
    /// 根據配置構造 HTTP 索引客戶端
    pub fn from_config(config: Option<&IndexerConfig>, timeout_secs: u64) -> Result<Self> {
        match config {
            Some(config) => Ok(IndexerSource::Available(Arc::new(TenderlyClient::new(
                config.clone(),
                timeout_secs,
            )?))),
            None => Ok(IndexerSource::Unavailable),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, IndexerSource::Available(_))
    }
}

/// Tenderly 風格的 HTTP 索引客戶端
pub struct TenderlyClient {
    http_client: Client,
    config: IndexerConfig,
}

impl TenderlyClient {
    pub fn new(config: IndexerConfig, timeout_secs: u64) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        info!(
            "Created TenderlyClient for {} ({}/{})",
            config.api_url, config.account, config.project
        );

        Ok(Self {
            http_client,
            config,
        })
    }

    fn calls_url(&self, contract: &Address) -> String {
        format!(
            "{}/api/v1/account/{}/project/{}/contract/{}/calls",
            self.config.api_url.trim_end_matches('/'),
            self.config.account,
            self.config.project,
            contract
        )
    }

    async fn fetch_page(
        &self,
        url: &str,
        method_signature: &str,
        page: u32,
    ) -> Result<Vec<IndexedCall>> {
        let page_param = page.to_string();
        let per_page_param = self.config.page_size.to_string();

        let response = self
            .http_client
            .get(url)
            .header("X-Access-Key", &self.config.access_key)
            .query(&[
                ("method", method_signature),
                ("page", page_param.as_str()),
                ("per_page", per_page_param.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuditorError::IndexerUnavailable(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            return Err(AuditorError::IndexerUnavailable(format!(
                "HTTP {}: {}",
                status, error_body
            )));
        }

        response.json::<Vec<IndexedCall>>().await.map_err(|e| {
            AuditorError::IndexerUnavailable(format!("Failed to parse call history: {}", e))
        })
    }
}

/// 逐頁拉取直到出現空頁或不滿頁
///
/// 服務忽略 `page` 參數時會反復返回同一頁，此時以及超過 `max_pages` 時
/// 返回 `IndexerUnavailable`，而不是無限循環。
pub async fn collect_pages<F, Fut>(
    page_size: usize,
    max_pages: u32,
    mut fetch_page: F,
) -> Result<Vec<IndexedCall>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<IndexedCall>>>,
{
    let mut calls = Vec::new();
    let mut previous_hashes: Option<Vec<String>> = None;

    for page in 1..=max_pages {
        let batch = fetch_page(page).await?;
        let batch_len = batch.len();
        debug!("Fetched page {} with {} call(s)", page, batch_len);

        if batch_len == 0 {
            return Ok(calls);
        }

        let hashes: Vec<String> = batch.iter().map(|c| c.hash.to_ascii_lowercase()).collect();
        if previous_hashes.as_ref() == Some(&hashes) {
            return Err(AuditorError::IndexerUnavailable(format!(
                "page {} repeats page {}, the service ignores pagination",
                page,
                page - 1
            )));
        }

        calls.extend(batch);

        if batch_len < page_size {
            return Ok(calls);
        }
        previous_hashes = Some(hashes);
    }

    Err(AuditorError::IndexerUnavailable(format!(
        "call history exceeds {} page(s)",
        max_pages
    )))
}

#[async_trait]
impl TransactionIndexer for TenderlyClient {
    async fn fetch_call_history(
        &self,
        contract: &Address,
        method_signature: &str,
    ) -> Result<Vec<IndexedCall>> {
        let url = self.calls_url(contract);

        let calls = collect_pages(self.config.page_size as usize, MAX_PAGES, |page| {
            self.fetch_page(&url, method_signature, page)
        })
        .await?;

        info!(
            "Fetched {} historical call(s) of {} on {}",
            calls.len(),
            method_signature,
            contract
        );

        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> IndexerConfig {
        IndexerConfig {
            api_url: "https://api.tenderly.co/".to_string(),
            account: "keep".to_string(),
            project: "rewards".to_string(),
            access_key: "secret".to_string(),
            page_size: 100,
        }
    }

    #[test]
    fn test_indexed_call_conversion() {
        let call: IndexedCall = serde_json::from_value(json!({
            "hash": "0xabc",
            "from": "0x1111111111111111111111111111111111111111",
            "to": "0x2222222222222222222222222222222222222222",
            "block_number": 150,
            "method": "deauthorizeSortitionPoolContract",
            "decoded_input": [
                { "name": "_operator", "value": "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA" },
                { "name": "_poolAddress", "value": "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB" }
            ],
            "status": true
        }))
        .unwrap();

        let record: TransactionRecord = call.into();
        assert!(record.is_success());
        assert_eq!(record.block_number, 150);
        assert_eq!(record.decoded_input.len(), 2);
    }

    #[test]
    fn test_failed_call_without_decoded_input() {
        let call: IndexedCall = serde_json::from_value(json!({
            "hash": "0xdef",
            "from": "0x1111111111111111111111111111111111111111",
            "to": "0x2222222222222222222222222222222222222222",
            "block_number": 151,
            "method": "deauthorizeSortitionPoolContract",
            "decoded_input": null,
            "status": false
        }))
        .unwrap();

        let record: TransactionRecord = call.into();
        assert_eq!(record.status, TransactionStatus::Failure);
        assert!(record.decoded_input.is_empty());
    }

    #[test]
    fn test_calls_url() {
        let client = TenderlyClient::new(test_config(), 10).unwrap();
        let contract = Address::parse("0x27321f84704a599ab740281e285cc4463d89a3d5").unwrap();
        assert_eq!(
            client.calls_url(&contract),
            "https://api.tenderly.co/api/v1/account/keep/project/rewards/contract/0x27321f84704a599ab740281e285cc4463d89a3d5/calls"
        );
    }

    fn call(hash: &str) -> IndexedCall {
        IndexedCall {
            hash: hash.to_string(),
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: "0x2222222222222222222222222222222222222222".to_string(),
            block_number: 150,
            method: "deauthorizeSortitionPoolContract".to_string(),
            decoded_input: None,
            status: true,
        }
    }

    #[tokio::test]
    async fn test_collect_pages_stops_on_short_page() {
        let calls = collect_pages(2, MAX_PAGES, |page| async move {
            Ok(match page {
                1 => vec![call("0x01"), call("0x02")],
                2 => vec![call("0x03")],
                _ => panic!("page {} should not be requested", page),
            })
        })
        .await
        .unwrap();

        assert_eq!(calls.len(), 3);
    }

    #[tokio::test]
    async fn test_collect_pages_detects_ignored_page_parameter() {
        let mut requested = 0;
        let result = collect_pages(2, MAX_PAGES, |_| {
            requested += 1;
            async { Ok(vec![call("0x01"), call("0x02")]) }
        })
        .await;

        assert!(matches!(result, Err(AuditorError::IndexerUnavailable(_))));
        assert_eq!(requested, 2);
    }

    #[tokio::test]
    async fn test_collect_pages_is_bounded() {
        let result = collect_pages(1, 3, |page| async move {
            Ok(vec![call(&format!("0x{:02x}", page))])
        })
        .await;

        assert!(matches!(result, Err(AuditorError::IndexerUnavailable(_))));
    }

    #[test]
    fn test_source_from_config() {
        assert!(!IndexerSource::from_config(None, 10).unwrap().is_available());
        assert!(IndexerSource::from_config(Some(&test_config()), 10)
            .unwrap()
            .is_available());
    }
}
