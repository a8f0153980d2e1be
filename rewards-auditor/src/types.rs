//! 共享數據類型定義
//!
//! 本模塊定義審計引擎中各個子系統共享的數據結構

use crate::error::{AuditorError, Result};
use crate::retry::RetryConfig;
use alloy::primitives::{self, hex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 區塊高度
pub type BlockNumber = u64;

/// 帳本地址
///
/// 包裝 `alloy` 的 20 字節地址，相等比較與哈希都基於字節，
/// 因此與輸入的大小寫無關；輸出統一為小寫 `0x` 十六進制。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(primitives::Address);

impl Address {
    /// 零地址
    pub fn zero() -> Self {
        Address(primitives::Address::ZERO)
    }

    /// 解析地址，要求 `0x` 前綴和 40 位十六進制，不校驗 checksum
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if !trimmed.starts_with("0x") && !trimmed.starts_with("0X") {
            return Err(AuditorError::InvalidAddress(value.to_string()));
        }

        trimmed[2..]
            .parse::<primitives::Address>()
            .map(Address)
            .map_err(|_| AuditorError::InvalidAddress(value.to_string()))
    }

    /// 從 20 字節構造地址
    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        Address(primitives::Address::from(*bytes))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == primitives::Address::ZERO
    }

    /// 底層 `alloy` 地址，用於合約調用
    pub fn to_alloy(&self) -> primitives::Address {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = AuditorError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AuditorError;

    fn try_from(value: String) -> Result<Self> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl From<primitives::Address> for Address {
    fn from(address: primitives::Address) -> Self {
        Address(address)
    }
}

/// 審計區間 `[start_block, end_block]`（兩端包含）
///
/// 構造後不可變，對應一個獎勵計算週期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Interval {
    start_block: BlockNumber,
    end_block: BlockNumber,
}

impl Interval {
    /// 創建審計區間，`start_block > end_block` 時返回 `InvalidInterval`
    pub fn new(start_block: BlockNumber, end_block: BlockNumber) -> Result<Self> {
        if start_block > end_block {
            return Err(AuditorError::InvalidInterval {
                start: start_block,
                end: end_block,
            });
        }

        Ok(Self {
            start_block,
            end_block,
        })
    }

    pub fn start_block(&self) -> BlockNumber {
        self.start_block
    }

    pub fn end_block(&self) -> BlockNumber {
        self.end_block
    }

    /// 區塊是否落在區間內（兩端包含）
    pub fn contains(&self, block: BlockNumber) -> bool {
        self.start_block <= block && block <= self.end_block
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start_block, self.end_block)
    }
}

/// 交易執行狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Failure,
}

/// 解碼後的調用參數
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedArgument {
    /// 參數名稱（來自合約 ABI）
    pub name: String,

    /// 參數值（索引服務給出的 JSON 值）
    pub value: serde_json::Value,
}

/// 歷史交易記錄
///
/// 從交易索引服務獲取並保存在本地緩存中的單筆合約調用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// 交易哈希（緩存主鍵）
    pub hash: String,

    /// 發送方地址
    pub from: String,

    /// 目標合約地址
    pub to: String,

    /// 交易所在區塊
    pub block_number: BlockNumber,

    /// 方法名稱（不含參數列表）
    pub method: String,

    /// 按順序排列的解碼參數
    #[serde(default)]
    pub decoded_input: Vec<DecodedArgument>,

    /// 執行狀態
    pub status: TransactionStatus,
}

impl TransactionRecord {
    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Success
    }

    /// 將第 `index` 個解碼參數解析為地址
    pub fn address_argument(&self, index: usize) -> Result<Address> {
        let argument = self.decoded_input.get(index).ok_or_else(|| {
            AuditorError::MalformedRecord {
                hash: self.hash.clone(),
                reason: format!(
                    "expected at least {} decoded argument(s), found {}",
                    index + 1,
                    self.decoded_input.len()
                ),
            }
        })?;

        let raw = argument
            .value
            .as_str()
            .ok_or_else(|| AuditorError::MalformedRecord {
                hash: self.hash.clone(),
                reason: format!("argument `{}` is not a string", argument.name),
            })?;

        Address::parse(raw).map_err(|_| AuditorError::MalformedRecord {
            hash: self.hash.clone(),
            reason: format!("argument `{}` is not an address: {}", argument.name, raw),
        })
    }
}

/// 單個運營者的授權審計結果
///
/// 構造後不可變；是否有資格獲得獎勵由下游策略判斷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorAuthorizationVerdict {
    /// 運營者地址
    pub address: Address,

    /// 區間起點時 keep factory 是否已授權該運營者
    pub factory_authorized_at_start: bool,

    /// 區間起點時 sortition pool 是否已獲得二級授權
    pub pool_authorized_at_start: bool,

    /// 區間內是否撤銷了 sortition pool 授權
    pub pool_deauthorized_in_interval: bool,
}

/// 審計所需的合約地址
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractAddresses {
    /// BondedECDSAKeepFactory 合約地址（一級授權門）
    pub keep_factory: Address,

    /// KeepBonding 合約地址（二級授權門）
    pub keep_bonding: Address,

    /// 被認可的應用合約地址，用於解析 sortition pool
    pub sanctioned_application: Address,
}

/// 交易索引服務配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// 索引服務 API 基礎 URL
    pub api_url: String,

    /// 帳戶名稱
    pub account: String,

    /// 項目名稱
    pub project: String,

    /// 訪問密鑰
    pub access_key: String,

    /// 每頁記錄數
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    100
}

/// 審計引擎運行時配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
    /// 以太坊 JSON-RPC 端點（必須支持歷史狀態查詢）
    pub eth_rpc_url: String,

    /// HTTP 請求超時（秒）
    pub http_timeout_secs: u64,

    /// 合約地址
    pub contracts: ContractAddresses,

    /// 交易索引服務（可選，缺省時只使用本地緩存）
    pub indexer: Option<IndexerConfig>,

    /// 本地交易緩存文件路徑
    pub cache_path: PathBuf,

    /// 並發審計的運營者數量上限
    pub concurrency: usize,

    /// 帳本讀取重試策略
    pub retry: RetryConfig,
}

impl Default for ContractAddresses {
    fn default() -> Self {
        Self {
            keep_factory: Address::zero(),
            keep_bonding: Address::zero(),
            sanctioned_application: Address::zero(),
        }
    }
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            eth_rpc_url: std::env::var("ETH_RPC_URL")
                .unwrap_or_else(|_| "http://localhost:8545".to_string()),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            contracts: ContractAddresses::default(),
            indexer: None,
            cache_path: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rewards-auditor")
                .join("transactions.json"),
            concurrency: 8,
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(decoded_input: Vec<DecodedArgument>) -> TransactionRecord {
        TransactionRecord {
            hash: "0xfeed".to_string(),
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: "0x2222222222222222222222222222222222222222".to_string(),
            block_number: 150,
            method: "deauthorizeSortitionPoolContract".to_string(),
            decoded_input,
            status: TransactionStatus::Success,
        }
    }

    #[test]
    fn test_address_is_case_insensitive() {
        let upper = Address::parse("0xABCDEF0123456789ABCDEF0123456789ABCDEF01").unwrap();
        let lower = Address::parse("0xabcdef0123456789abcdef0123456789abcdef01").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.to_string(), "0xabcdef0123456789abcdef0123456789abcdef01");
    }

    #[test]
    fn test_address_rejects_invalid_input() {
        assert!(Address::parse("abcdef0123456789abcdef0123456789abcdef01").is_err());
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzzcdef0123456789abcdef0123456789abcdef01").is_err());
    }

    #[test]
    fn test_address_bytes() {
        let address = Address::parse("0x00000000000000000000000000000000000000ff").unwrap();
        let mut bytes = [0u8; 20];
        bytes[19] = 0xff;
        assert_eq!(Address::from_bytes(&bytes), address);
        assert_eq!(address.to_alloy().as_slice(), &bytes[..]);
        assert!(Address::zero().is_zero());
        assert!(!address.is_zero());
    }

    #[test]
    fn test_address_serde_normalizes() {
        let address: Address =
            serde_json::from_value(json!("0xABCDEF0123456789ABCDEF0123456789ABCDEF01")).unwrap();
        assert_eq!(
            serde_json::to_value(&address).unwrap(),
            json!("0xabcdef0123456789abcdef0123456789abcdef01")
        );
        assert!(serde_json::from_value::<Address>(json!("not-an-address")).is_err());
    }

    #[test]
    fn test_interval_rejects_inverted_range() {
        assert!(matches!(
            Interval::new(200, 100),
            Err(AuditorError::InvalidInterval { start: 200, end: 100 })
        ));
        assert!(Interval::new(100, 100).is_ok());
    }

    #[test]
    fn test_interval_contains_is_inclusive() {
        let interval = Interval::new(100, 200).unwrap();
        assert!(interval.contains(100));
        assert!(interval.contains(150));
        assert!(interval.contains(200));
        assert!(!interval.contains(99));
        assert!(!interval.contains(201));
    }

    #[test]
    fn test_address_argument() {
        let tx = record(vec![
            DecodedArgument {
                name: "_operator".to_string(),
                value: json!("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"),
            },
            DecodedArgument {
                name: "_poolAddress".to_string(),
                value: json!(42),
            },
        ]);

        assert_eq!(
            tx.address_argument(0).unwrap().to_string(),
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
        assert!(matches!(
            tx.address_argument(1),
            Err(AuditorError::MalformedRecord { .. })
        ));
        assert!(matches!(
            tx.address_argument(2),
            Err(AuditorError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_verdict_serialization() {
        let verdict = OperatorAuthorizationVerdict {
            address: Address::parse("0xabcdef0123456789abcdef0123456789abcdef01").unwrap(),
            factory_authorized_at_start: true,
            pool_authorized_at_start: true,
            pool_deauthorized_in_interval: false,
        };

        let value = serde_json::to_value(&verdict).unwrap();
        assert_eq!(value["factoryAuthorizedAtStart"], json!(true));
        assert_eq!(value["poolDeauthorizedInInterval"], json!(false));
        assert_eq!(
            value["address"],
            json!("0xabcdef0123456789abcdef0123456789abcdef01")
        );
    }
}
