//! Keep ECDSA 質押獎勵授權審計引擎
//!
//! 對給定的區塊區間和一組運營者地址，回答三個問題：
//! 1. 區間起點時，運營者是否已授權 sanctioned application（工廠合約）
//! 2. 區間起點時，運營者是否已授權其 sortition pool（bonding 合約）
//! 3. 區間內，運營者是否撤銷過對該 sortition pool 的授權
//!
//! # 架構
//!
//! ```text
//! ┌────────────────────────┐
//! │ AuthorizationAuditor   │  ← 核心審計邏輯
//! └──────┬──────────┬──────┘
//!        │          │
//!        ▼          ▼
//! RetryingLedger  DeauthorizationScanner
//!   Reader          │            │
//!        │          ▼            ▼
//!        ▼   TransactionCache  TransactionIndexer
//!  LedgerClient  (Memory/File)   (Tenderly, 可選)
//!  (alloy)
//! ```
//!
//! # 示例用法
//!
//! ```no_run
//! use rewards_auditor::{config::load_config, AuditContext, AuthorizationAuditor, Interval};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("auditor.toml")?;
//!     let context = AuditContext::from_config(&config)?;
//!     let auditor = AuthorizationAuditor::initialize(context, Interval::new(100, 200)?).await?;
//!
//!     let operator = "0x00000000000000000000000000000000000000aa".parse()?;
//!     let verdict = auditor.audit_operator(&operator).await?;
//!     println!("{}", serde_json::to_string(&verdict)?);
//!
//!     Ok(())
//! }
//! ```

pub mod auditor;
pub mod cache;
pub mod config;
pub mod contracts;
pub mod error;
pub mod eth_rpc;
pub mod indexer;
pub mod ledger;
pub mod retry;
pub mod scanner;
pub mod types;

// Re-export 常用類型
pub use auditor::{AuditContext, AuthorizationAuditor};
pub use error::{AuditorError, Result};
pub use types::{Address, AuditorConfig, BlockNumber, Interval, OperatorAuthorizationVerdict};
