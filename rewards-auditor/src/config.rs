//! 配置管理模塊
//!
//! 負責加載和驗證審計引擎配置

use crate::error::{AuditorError, Result};
use crate::types::{Address, AuditorConfig};
use config::{Config, Environment, File};
use std::path::Path;

/// 環境變量前綴
const ENV_PREFIX: &str = "AUDITOR";

/// 從配置文件加載配置
///
/// # 參數
/// - `config_path`: 配置文件路徑（支持 TOML、JSON、YAML）
///
/// 環境變量（`AUDITOR_` 前綴，嵌套字段用 `__` 分隔）會覆蓋文件中的值。
///
/// # 示例
/// ```no_run
/// use rewards_auditor::config::load_config;
///
/// let config = load_config("auditor.toml").expect("Failed to load config");
/// println!("RPC: {}", config.eth_rpc_url);
/// ```
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<AuditorConfig> {
    let config = Config::builder()
        .add_source(File::from(config_path.as_ref()))
        .add_source(environment())
        .build()
        .map_err(|e| AuditorError::Config(format!("Failed to load config file: {}", e)))?;

    let auditor_config: AuditorConfig = config
        .try_deserialize()
        .map_err(|e| AuditorError::Config(format!("Failed to parse config: {}", e)))?;

    validate_config(&auditor_config)?;

    Ok(auditor_config)
}

/// 只從環境變量加載配置（用於容器化部署）
///
/// 示例: `AUDITOR_ETH_RPC_URL`, `AUDITOR_CONTRACTS__KEEP_FACTORY`,
/// `AUDITOR_RETRY__MAX_RETRIES`
pub fn load_config_from_env() -> Result<AuditorConfig> {
    let config = Config::builder()
        .add_source(environment())
        .build()
        .map_err(|e| AuditorError::Config(format!("Failed to load env vars: {}", e)))?;

    let auditor_config: AuditorConfig = config
        .try_deserialize()
        .map_err(|e| AuditorError::Config(format!("Failed to parse env config: {}", e)))?;

    validate_config(&auditor_config)?;

    Ok(auditor_config)
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn validate_url(name: &str, url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(AuditorError::Config(format!("Invalid {}: {}", name, url)));
    }
    Ok(())
}

fn validate_contract(name: &str, address: &Address) -> Result<()> {
    if address.is_zero() {
        return Err(AuditorError::Config(format!(
            "contracts.{} must be configured",
            name
        )));
    }
    Ok(())
}

/// 驗證配置的有效性
///
/// 檢查:
/// - URL 格式是否正確
/// - 合約地址是否已配置
/// - 並發數和重試參數是否合理
pub fn validate_config(config: &AuditorConfig) -> Result<()> {
    validate_url("Ethereum RPC URL", &config.eth_rpc_url)?;

    validate_contract("keep_factory", &config.contracts.keep_factory)?;
    validate_contract("keep_bonding", &config.contracts.keep_bonding)?;
    validate_contract(
        "sanctioned_application",
        &config.contracts.sanctioned_application,
    )?;

    if config.concurrency == 0 {
        return Err(AuditorError::Config(
            "concurrency must be greater than 0".to_string(),
        ));
    }

    if config.retry.deadline_ms == 0 {
        return Err(AuditorError::Config(
            "retry.deadline_ms must be greater than 0".to_string(),
        ));
    }

    if config.retry.multiplier < 1.0 {
        return Err(AuditorError::Config(
            "retry.multiplier must be >= 1.0".to_string(),
        ));
    }

    if let Some(indexer) = &config.indexer {
        validate_url("indexer API URL", &indexer.api_url)?;

        if indexer.page_size == 0 {
            return Err(AuditorError::Config(
                "indexer.page_size must be greater than 0".to_string(),
            ));
        }
    }

    Ok(())
}
