//! 帳本讀取模塊
//!
//! 所有只讀合約調用都經過 [`RetryingLedgerReader`]：
//! - 可選地固定到歷史區塊（point-in-time 讀取）
//! - 瞬時錯誤（超時、限流、節點暫時不可用）按 [`RetryPolicy`] 重試
//! - 非瞬時錯誤（revert、格式錯誤、歷史狀態缺失）立即失敗
//!
//! 實際的網絡傳輸由 [`LedgerClient`] 實現，見 `eth_rpc` 模塊。

use crate::contracts::{GET_SORTITION_POOL, HAS_SECONDARY_AUTHORIZATION, IS_OPERATOR_AUTHORIZED};
use crate::error::{AuditorError, Result};
use crate::retry::{retry_with_exponential_backoff, RetryConfig, RetryError};
use crate::types::{Address, BlockNumber};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// 帳本客戶端錯誤
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("node unavailable: {0}")]
    NodeUnavailable(String),

    #[error("state at block {block} is not available: {message}")]
    HistoryUnavailable { block: BlockNumber, message: String },

    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("malformed call: {0}")]
    Malformed(String),
}

impl LedgerError {
    /// 默認的瞬時錯誤分類
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Timeout(_) | LedgerError::RateLimited(_) | LedgerError::NodeUnavailable(_)
        )
    }
}

/// 單個只讀合約調用
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    /// `BondedECDSAKeepFactory.getSortitionPool(application)`
    GetSortitionPool { factory: Address, application: Address },

    /// `BondedECDSAKeepFactory.isOperatorAuthorized(operator)`
    IsOperatorAuthorized { factory: Address, operator: Address },

    /// `KeepBonding.hasSecondaryAuthorization(operator, pool)`
    HasSecondaryAuthorization {
        bonding: Address,
        operator: Address,
        pool: Address,
    },
}

impl ContractCall {
    /// 目標合約
    pub fn contract(&self) -> &Address {
        match self {
            ContractCall::GetSortitionPool { factory, .. }
            | ContractCall::IsOperatorAuthorized { factory, .. } => factory,
            ContractCall::HasSecondaryAuthorization { bonding, .. } => bonding,
        }
    }

    /// Solidity 函數簽名
    pub fn signature(&self) -> &'static str {
        match self {
            ContractCall::GetSortitionPool { .. } => GET_SORTITION_POOL,
            ContractCall::IsOperatorAuthorized { .. } => IS_OPERATOR_AUTHORIZED,
            ContractCall::HasSecondaryAuthorization { .. } => HAS_SECONDARY_AUTHORIZATION,
        }
    }
}

/// 解碼後的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutput {
    Bool(bool),
    Address(Address),
}

/// 帳本讀取接口
///
/// 實現必須支持按區塊高度查詢歷史狀態；`block` 為 `None` 時讀取最新狀態。
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn read_at(
        &self,
        call: &ContractCall,
        block: Option<BlockNumber>,
    ) -> std::result::Result<CallOutput, LedgerError>;
}

/// 瞬時錯誤分類器
pub type TransientClassifier = fn(&LedgerError) -> bool;

/// 重試策略：退避參數 + 分類器
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
    pub classifier: TransientClassifier,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            classifier: LedgerError::is_transient,
        }
    }

    pub fn with_classifier(mut self, classifier: TransientClassifier) -> Self {
        self.classifier = classifier;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

/// 帶重試的帳本讀取器
#[derive(Clone)]
pub struct RetryingLedgerReader {
    client: Arc<dyn LedgerClient>,
    policy: RetryPolicy,
}

impl RetryingLedgerReader {
    pub fn new(client: Arc<dyn LedgerClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 執行只讀調用，返回解碼後的值
    ///
    /// # 錯誤
    /// - `LedgerUnreachable`: 瞬時錯誤重試耗盡或超過截止時間
    /// - `HistoryUnavailable`: 節點沒有請求區塊的狀態
    /// - `LedgerCall`: 其他非瞬時錯誤
    pub async fn call(
        &self,
        call: &ContractCall,
        at_block: Option<BlockNumber>,
    ) -> Result<CallOutput> {
        let operation = match at_block {
            Some(block) => format!("{}@{}", call.signature(), block),
            None => format!("{}@latest", call.signature()),
        };

        debug!(contract = %call.contract(), operation = %operation, "Reading ledger state");

        let client = &self.client;
        retry_with_exponential_backoff(
            &operation,
            &self.policy.config,
            self.policy.classifier,
            || client.read_at(call, at_block),
        )
        .await
        .map_err(|err| match err {
            RetryError::Permanent(LedgerError::HistoryUnavailable { block, message }) => {
                AuditorError::HistoryUnavailable {
                    block,
                    reason: message,
                }
            }
            RetryError::Permanent(e) => {
                AuditorError::LedgerCall(format!("{} on {}: {}", operation, call.contract(), e))
            }
            other => AuditorError::LedgerUnreachable {
                attempts: other.attempts(),
                reason: other.reason(),
                operation: operation.clone(),
            },
        })
    }

    /// 讀取 `bool` 返回值
    pub async fn call_bool(&self, call: &ContractCall, at_block: Option<BlockNumber>) -> Result<bool> {
        match self.call(call, at_block).await? {
            CallOutput::Bool(value) => Ok(value),
            other => Err(unexpected_output(call, other)),
        }
    }

    /// 讀取 `address` 返回值
    pub async fn call_address(
        &self,
        call: &ContractCall,
        at_block: Option<BlockNumber>,
    ) -> Result<Address> {
        match self.call(call, at_block).await? {
            CallOutput::Address(value) => Ok(value),
            other => Err(unexpected_output(call, other)),
        }
    }
}

fn unexpected_output(call: &ContractCall, output: CallOutput) -> AuditorError {
    AuditorError::LedgerCall(format!(
        "{} returned unexpected value {:?}",
        call.signature(),
        output
    ))
}
