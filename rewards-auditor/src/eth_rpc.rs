//! 以太坊帳本客戶端（alloy）
//!
//! 通過 `sol!` 生成的合約綁定執行只讀調用，支持按區塊高度查詢歷史狀態
//! （需要 archive 節點）。
//!
//! # 錯誤分類
//!
//! - 請求超時 → `Timeout`（重試）
//! - 連接失敗、HTTP 5xx → `NodeUnavailable`（重試）
//! - HTTP 429、JSON-RPC `-32005` → `RateLimited`（重試）
//! - 節點已裁剪歷史狀態 → `HistoryUnavailable`（不重試）
//! - 合約 revert → `Reverted`（不重試）
//! - 非法請求 → `Malformed`（不重試）

use crate::contracts::{IBondedECDSAKeepFactory, IKeepBonding};
use crate::error::{AuditorError, Result};
use crate::ledger::{CallOutput, ContractCall, LedgerClient, LedgerError};
use crate::types::BlockNumber;
use alloy::eips::BlockId;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::transports::http::reqwest::Url;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// 表示歷史狀態已被裁剪的節點錯誤消息片段
const HISTORY_UNAVAILABLE_MARKERS: &[&str] = &[
    "missing trie node",
    "header not found",
    "historical state",
    "state is not available",
    "pruned",
];

/// 基於 alloy provider 的帳本客戶端
pub struct EthereumLedgerClient {
    /// HTTP provider
    provider: DynProvider,

    /// 節點 RPC URL
    rpc_url: String,

    /// 單次調用超時時間
    timeout: Duration,
}

impl EthereumLedgerClient {
    /// 創建新的帳本客戶端
    pub fn new(rpc_url: String, timeout_secs: u64) -> Result<Self> {
        let url = rpc_url
            .parse::<Url>()
            .map_err(|e| AuditorError::Config(format!("Invalid ledger RPC URL {}: {}", rpc_url, e)))?;

        let provider = ProviderBuilder::new().connect_http(url).erased();

        info!(
            "Created EthereumLedgerClient for {} (timeout: {}s)",
            rpc_url, timeout_secs
        );

        Ok(Self {
            provider,
            rpc_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn with_timeout<T, F>(&self, request: F) -> std::result::Result<T, LedgerError>
    where
        F: Future<Output = std::result::Result<T, LedgerError>>,
    {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                LedgerError::Timeout(format!(
                    "{}: request timeout after {}s",
                    self.rpc_url,
                    self.timeout.as_secs()
                ))
            })?
    }
}

/// 區塊標籤：`0x<hex>` 或 `latest`
pub fn block_tag(block: Option<BlockNumber>) -> String {
    match block {
        Some(number) => format!("0x{:x}", number),
        None => "latest".to_string(),
    }
}

fn block_id(block: Option<BlockNumber>) -> BlockId {
    block.map(BlockId::number).unwrap_or_else(BlockId::latest)
}

/// HTTP 狀態碼分類
pub fn classify_http_status(status: u16, body: &str) -> LedgerError {
    let detail = format!("HTTP {} - {}", status, body);

    match status {
        429 => LedgerError::RateLimited(detail),
        408 | 504 => LedgerError::Timeout(detail),
        500..=599 => LedgerError::NodeUnavailable(detail),
        _ => LedgerError::Malformed(detail),
    }
}

/// JSON-RPC 錯誤分類
pub fn classify_rpc_error(code: i64, message: &str, block: Option<BlockNumber>) -> LedgerError {
    let lowered = message.to_ascii_lowercase();

    if let Some(block) = block {
        if HISTORY_UNAVAILABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
            return LedgerError::HistoryUnavailable {
                block,
                message: message.to_string(),
            };
        }
    }

    if code == -32005 || lowered.contains("rate limit") || lowered.contains("limit exceeded") {
        return LedgerError::RateLimited(format!("{}: {}", code, message));
    }

    if code == 3 || lowered.contains("revert") {
        return LedgerError::Reverted(message.to_string());
    }

    match code {
        -32700 | -32600 | -32601 | -32602 => {
            LedgerError::Malformed(format!("{}: {}", code, message))
        }
        _ => LedgerError::NodeUnavailable(format!("{}: {}", code, message)),
    }
}

/// 傳輸層錯誤分類
pub fn classify_transport_error(
    error: RpcError<TransportErrorKind>,
    block: Option<BlockNumber>,
) -> LedgerError {
    match error {
        RpcError::ErrorResp(payload) => classify_rpc_error(payload.code, &payload.message, block),
        RpcError::Transport(TransportErrorKind::HttpError(http)) => {
            classify_http_status(http.status, &http.body)
        }
        RpcError::Transport(kind) => LedgerError::NodeUnavailable(kind.to_string()),
        RpcError::NullResp => {
            LedgerError::NodeUnavailable("node returned an empty response".to_string())
        }
        other => LedgerError::Malformed(other.to_string()),
    }
}

/// 合約調用錯誤分類
pub fn classify_contract_error(
    error: alloy::contract::Error,
    block: Option<BlockNumber>,
) -> LedgerError {
    match error {
        alloy::contract::Error::TransportError(e) => classify_transport_error(e, block),
        other => LedgerError::Malformed(other.to_string()),
    }
}

#[async_trait]
impl LedgerClient for EthereumLedgerClient {
    async fn read_at(
        &self,
        call: &ContractCall,
        block: Option<BlockNumber>,
    ) -> std::result::Result<CallOutput, LedgerError> {
        debug!(
            "eth_call {} on {} at {}",
            call.signature(),
            call.contract(),
            block_tag(block)
        );

        let at = block_id(block);
        let provider = self.provider.clone();

        self.with_timeout(async move {
            let result = match call {
                ContractCall::GetSortitionPool {
                    factory,
                    application,
                } => IBondedECDSAKeepFactory::new(factory.to_alloy(), provider)
                    .getSortitionPool(application.to_alloy())
                    .call()
                    .block(at)
                    .await
                    .map(|pool| CallOutput::Address(pool.into())),
                ContractCall::IsOperatorAuthorized { factory, operator } => {
                    IBondedECDSAKeepFactory::new(factory.to_alloy(), provider)
                        .isOperatorAuthorized(operator.to_alloy())
                        .call()
                        .block(at)
                        .await
                        .map(CallOutput::Bool)
                }
                ContractCall::HasSecondaryAuthorization {
                    bonding,
                    operator,
                    pool,
                } => IKeepBonding::new(bonding.to_alloy(), provider)
                    .hasSecondaryAuthorization(operator.to_alloy(), pool.to_alloy())
                    .call()
                    .block(at)
                    .await
                    .map(CallOutput::Bool),
            };
            result.map_err(|e| classify_contract_error(e, block))
        })
        .await
    }
}
