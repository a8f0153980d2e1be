//! 核心審計邏輯模塊
//!
//! [`AuthorizationAuditor`] 綁定一個審計區間和一個已解析的 sortition pool 地址：
//! - 初始化時通過一次最新狀態讀取解析 sortition pool
//! - 每個運營者兩次固定在區間起點的歷史讀取
//! - 撤銷授權掃描每次運行只計算一次，所有運營者共享結果

use crate::cache::{FileTransactionCache, TransactionCache};
use crate::contracts::Contracts;
use crate::error::{AuditorError, Result};
use crate::eth_rpc::EthereumLedgerClient;
use crate::indexer::IndexerSource;
use crate::ledger::{RetryPolicy, RetryingLedgerReader};
use crate::scanner::{DeauthorizationScanner, ScanOutcome};
use crate::types::{Address, AuditorConfig, Interval, OperatorAuthorizationVerdict};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// 審計依賴
pub struct AuditContext {
    pub ledger: RetryingLedgerReader,
    pub contracts: Contracts,
    pub cache: Arc<dyn TransactionCache>,
    pub indexer: IndexerSource,
}

impl AuditContext {
    /// 根據配置構造帳本客戶端、文件緩存和索引客戶端
    pub fn from_config(config: &AuditorConfig) -> Result<Self> {
        let client = EthereumLedgerClient::new(config.eth_rpc_url.clone(), config.http_timeout_secs)?;
        let cache = FileTransactionCache::open(&config.cache_path)?;
        let indexer = IndexerSource::from_config(config.indexer.as_ref(), config.http_timeout_secs)?;

        if !indexer.is_available() {
            info!("No transaction indexer configured, deauthorizations come from the local cache only");
        }

        Ok(Self {
            ledger: RetryingLedgerReader::new(Arc::new(client), RetryPolicy::new(config.retry.clone())),
            contracts: Contracts::from(&config.contracts),
            cache: Arc::new(cache),
            indexer,
        })
    }
}

/// 運營者授權審計器
pub struct AuthorizationAuditor {
    reader: RetryingLedgerReader,
    contracts: Contracts,
    interval: Interval,
    sortition_pool: Address,
    scanner: DeauthorizationScanner,
    deauthorizations: OnceCell<ScanOutcome>,
}

impl AuthorizationAuditor {
    /// 解析 sortition pool 地址並創建審計器
    ///
    /// # 錯誤
    /// - `InitializationFailed`: 解析讀取失敗（包括重試耗盡）或應用沒有 sortition pool
    pub async fn initialize(context: AuditContext, interval: Interval) -> Result<Self> {
        let AuditContext {
            ledger,
            contracts,
            cache,
            indexer,
        } = context;

        info!("Initializing authorization audit for interval {}", interval);

        let call = contracts
            .factory
            .get_sortition_pool(&contracts.sanctioned_application);

        let sortition_pool = ledger.call_address(&call, None).await.map_err(|e| {
            AuditorError::InitializationFailed(format!(
                "cannot resolve sortition pool for application {}: {}",
                contracts.sanctioned_application, e
            ))
        })?;

        if sortition_pool.is_zero() {
            return Err(AuditorError::InitializationFailed(format!(
                "no sortition pool for application {}",
                contracts.sanctioned_application
            )));
        }

        info!("Resolved sortition pool: {}", sortition_pool);

        let scanner = DeauthorizationScanner::new(cache, indexer, *contracts.bonding.address());

        Ok(Self {
            reader: ledger,
            contracts,
            interval,
            sortition_pool,
            scanner,
            deauthorizations: OnceCell::new(),
        })
    }

    pub fn interval(&self) -> &Interval {
        &self.interval
    }

    pub fn sortition_pool(&self) -> &Address {
        &self.sortition_pool
    }

    /// 本次運行的撤銷授權掃描結果
    ///
    /// 首次調用時計算，之後直接返回；計算失敗不會被緩存。
    pub async fn deauthorization_scan(&self) -> Result<&ScanOutcome> {
        self.deauthorizations
            .get_or_try_init(|| async {
                let start = Instant::now();
                let outcome = self.scanner.scan(&self.interval, &self.sortition_pool).await?;
                debug!(
                    "Deauthorization scan finished in {:?}: {} operator(s), degraded={}",
                    start.elapsed(),
                    outcome.operators.len(),
                    outcome.degraded
                );
                Ok(outcome)
            })
            .await
    }

    /// 審計單個運營者
    ///
    /// 兩次歷史讀取任一失敗時整個審計失敗，不返回部分結果。
    pub async fn audit_operator(&self, operator: &Address) -> Result<OperatorAuthorizationVerdict> {
        debug!("Checking authorizations for operator {}", operator);

        let at_start = Some(self.interval.start_block());
        let factory_call = self.contracts.factory.is_operator_authorized(operator);
        let pool_call = self
            .contracts
            .bonding
            .has_secondary_authorization(operator, &self.sortition_pool);

        let (factory_authorized_at_start, pool_authorized_at_start) = tokio::try_join!(
            self.reader.call_bool(&factory_call, at_start),
            self.reader.call_bool(&pool_call, at_start),
        )?;

        let deauthorizations = self.deauthorization_scan().await?;

        Ok(OperatorAuthorizationVerdict {
            address: *operator,
            factory_authorized_at_start,
            pool_authorized_at_start,
            pool_deauthorized_in_interval: deauthorizations.operators.contains(operator),
        })
    }

    /// 並發審計多個運營者
    ///
    /// 最多 `concurrency` 個審計同時進行；單個運營者失敗不影響其他運營者。
    /// 結果順序與完成順序一致，不保證與輸入順序相同。
    pub async fn audit_operators(
        &self,
        operators: &[Address],
        concurrency: usize,
    ) -> Vec<(Address, Result<OperatorAuthorizationVerdict>)> {
        info!(
            "Auditing {} operator(s) with concurrency {}",
            operators.len(),
            concurrency
        );

        let results: Vec<(Address, Result<OperatorAuthorizationVerdict>)> =
            stream::iter(operators.iter().copied())
                .map(|operator| async move {
                    let result = self.audit_operator(&operator).await;
                    if let Err(e) = &result {
                        warn!("Audit failed for operator {}: {}", operator, e);
                    }
                    (operator, result)
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        info!(
            "Audit completed: {} succeeded, {} failed",
            results.len() - failed,
            failed
        );

        results
    }
}
