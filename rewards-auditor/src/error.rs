//! 授權審計引擎統一錯誤類型定義
//!
//! 本模塊定義了審計運行過程中可能遇到的所有錯誤類型，
//! 使用 thiserror crate 提供良好的錯誤鏈和上下文信息。
//!
//! # 傳播策略
//!
//! - 帳本讀取失敗（`LedgerUnreachable`、`HistoryUnavailable`、`LedgerCall`）
//!   會傳播給單個運營者的審計調用，不會默認為 `false`
//! - `InitializationFailed` 終止整個審計運行
//! - `IndexerUnavailable` 與 `MalformedRecord` 屬於軟失敗，
//!   由掃描器吸收並記錄為警告

use crate::types::BlockNumber;
use thiserror::Error;

/// 審計引擎錯誤類型
#[derive(Error, Debug)]
pub enum AuditorError {
    /// 帳本不可達
    ///
    /// 瞬時錯誤重試耗盡或超過整體截止時間
    #[error("Ledger unreachable for {operation} after {attempts} attempt(s): {reason}")]
    LedgerUnreachable {
        operation: String,
        attempts: u32,
        reason: String,
    },

    /// 帳本未保留請求區塊的歷史狀態
    #[error("Ledger history unavailable at block {block}: {reason}")]
    HistoryUnavailable { block: BlockNumber, reason: String },

    /// 非瞬時的讀取失敗（例如合約 revert、調用格式錯誤），不重試
    #[error("Ledger call failed: {0}")]
    LedgerCall(String),

    /// 無法解析 sortition pool 地址，整個審計運行無法繼續
    #[error("Audit initialization failed: {0}")]
    InitializationFailed(String),

    /// 交易索引服務不可用（軟失敗）
    #[error("Transaction indexer unavailable: {0}")]
    IndexerUnavailable(String),

    /// 緩存中的交易記錄無法解碼（軟失敗）
    #[error("Malformed transaction record {hash}: {reason}")]
    MalformedRecord { hash: String, reason: String },

    /// 無效的審計區間（startBlock > endBlock）
    #[error("Invalid interval: start block {start} is after end block {end}")]
    InvalidInterval {
        start: BlockNumber,
        end: BlockNumber,
    },

    /// 不是有效的帳本地址
    #[error("Not a valid ethereum address: {0}")]
    InvalidAddress(String),

    /// 本地交易緩存讀寫失敗
    #[error("Transaction cache error: {0}")]
    Cache(String),

    /// 配置錯誤
    ///
    /// 當配置文件格式錯誤或缺少必要參數時返回此錯誤
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP 請求錯誤
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// 序列化/反序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O 錯誤
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result 類型別名
pub type Result<T> = std::result::Result<T, AuditorError>;

/// 從 JSON 錯誤轉換
impl From<serde_json::Error> for AuditorError {
    fn from(err: serde_json::Error) -> Self {
        AuditorError::Serialization(err.to_string())
    }
}

impl AuditorError {
    /// 是否屬於軟失敗（只記錄警告，不向調用者拋出）
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            AuditorError::IndexerUnavailable(_) | AuditorError::MalformedRecord { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_failures() {
        assert!(AuditorError::IndexerUnavailable("down".to_string()).is_soft());
        assert!(AuditorError::MalformedRecord {
            hash: "0x01".to_string(),
            reason: "missing input".to_string(),
        }
        .is_soft());
        assert!(!AuditorError::InitializationFailed("no pool".to_string()).is_soft());
        assert!(!AuditorError::LedgerUnreachable {
            operation: "isOperatorAuthorized(address)@100".to_string(),
            attempts: 3,
            reason: "timeout".to_string(),
        }
        .is_soft());
    }

    #[test]
    fn test_error_messages() {
        let err = AuditorError::InvalidInterval { start: 200, end: 100 };
        assert_eq!(
            err.to_string(),
            "Invalid interval: start block 200 is after end block 100"
        );

        let err = AuditorError::HistoryUnavailable {
            block: 42,
            reason: "missing trie node".to_string(),
        };
        assert!(err.to_string().contains("block 42"));
    }
}
