//! Sortition pool 撤銷授權掃描
//!
//! 每次審計運行執行一次：
//! 1. 索引服務可用時刷新本地緩存（失敗則退化為只使用已有緩存）
//! 2. 從緩存讀取 `deauthorizeSortitionPoolContract` 調用
//! 3. 保留區塊落在審計區間內、且目標 pool 與當前 sortition pool 一致的記錄
//!
//! 緩存中只有成功的交易，合約在調用時已經檢查過 authorizer 與運營者的關係，
//! 這裡不需要再次驗證。

use crate::cache::TransactionCache;
use crate::contracts::{method_name, DEAUTHORIZE_SORTITION_POOL_CONTRACT};
use crate::error::{AuditorError, Result};
use crate::indexer::IndexerSource;
use crate::types::{Address, Interval, TransactionRecord};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 撤銷參數位置：`deauthorizeSortitionPoolContract(operator, pool)`
const OPERATOR_ARGUMENT: usize = 0;
const POOL_ARGUMENT: usize = 1;

/// 區間內被撤銷 sortition pool 授權的運營者集合
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeauthorizedOperatorSet {
    operators: HashSet<Address>,
}

impl DeauthorizedOperatorSet {
    pub fn contains(&self, operator: &Address) -> bool {
        self.operators.contains(operator)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.operators.iter()
    }

    fn insert(&mut self, operator: Address) -> bool {
        self.operators.insert(operator)
    }
}

/// 純計算結果
#[derive(Debug, Clone, Default)]
pub struct DeauthorizationScan {
    pub operators: DeauthorizedOperatorSet,
    /// 因解碼失敗被跳過的記錄數
    pub skipped_records: usize,
}

/// 從候選記錄計算區間內的撤銷集合
///
/// 記錄被計入當且僅當 `start_block <= block_number <= end_block`
/// 並且解碼出的目標 pool 等於 `pool`。無法解碼的記錄被跳過並記錄警告。
pub fn compute_deauthorized_set(
    records: &[TransactionRecord],
    interval: &Interval,
    pool: &Address,
) -> DeauthorizationScan {
    let mut scan = DeauthorizationScan::default();

    for transaction in records {
        debug!("Checking transaction {}", transaction.hash);

        if !interval.contains(transaction.block_number) {
            debug!(
                "Skipping transaction made in block {}",
                transaction.block_number
            );
            continue;
        }

        let decoded = transaction
            .address_argument(OPERATOR_ARGUMENT)
            .and_then(|operator| {
                transaction
                    .address_argument(POOL_ARGUMENT)
                    .map(|pool| (operator, pool))
            });

        let (operator, input_pool) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Skipping undecodable deauthorization: {}", e);
                scan.skipped_records += 1;
                continue;
            }
        };

        if input_pool != *pool {
            debug!("Skipping transaction for sortition pool {}", input_pool);
            continue;
        }

        scan.operators.insert(operator);
    }

    scan
}

/// 一次審計運行的掃描結果
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub operators: DeauthorizedOperatorSet,
    /// 是否只使用了已有緩存（索引服務缺省或失敗）
    pub degraded: bool,
    /// 緩存中的候選記錄數
    pub cached_records: usize,
    /// 因解碼失敗被跳過的記錄數
    pub skipped_records: usize,
}

/// 撤銷授權掃描器
pub struct DeauthorizationScanner {
    cache: Arc<dyn TransactionCache>,
    indexer: IndexerSource,
    bonding_contract: Address,
}

impl DeauthorizationScanner {
    pub fn new(
        cache: Arc<dyn TransactionCache>,
        indexer: IndexerSource,
        bonding_contract: Address,
    ) -> Self {
        Self {
            cache,
            indexer,
            bonding_contract,
        }
    }

    /// 執行掃描
    ///
    /// 索引服務的失敗被吸收為 `degraded = true`；緩存讀寫失敗則返回錯誤，
    /// 因為此時無法判斷是否存在撤銷記錄。
    pub async fn scan(&self, interval: &Interval, pool: &Address) -> Result<ScanOutcome> {
        let degraded = match self.refresh_cache().await {
            Ok(()) => false,
            Err(e) if e.is_soft() => {
                warn!(
                    "Deauthorization data may be incomplete, using cached transactions only: {}",
                    e
                );
                true
            }
            Err(e) => return Err(e),
        };

        let deauthorizations = self.cache.get_transactions_for_method(
            &self.bonding_contract,
            method_name(DEAUTHORIZE_SORTITION_POOL_CONTRACT),
        )?;

        debug!(
            "Found {} sortition pool contract deauthorizations",
            deauthorizations.len()
        );

        let scan = compute_deauthorized_set(&deauthorizations, interval, pool);

        if !scan.operators.is_empty() {
            let mut operators: Vec<String> =
                scan.operators.iter().map(Address::to_string).collect();
            operators.sort_unstable();
            info!(
                "Discovered deauthorizations in the current interval for operators [{}]",
                operators.join(", ")
            );
        }

        Ok(ScanOutcome {
            operators: scan.operators,
            degraded,
            cached_records: deauthorizations.len(),
            skipped_records: scan.skipped_records,
        })
    }

    /// 從索引服務刷新緩存中的撤銷交易
    async fn refresh_cache(&self) -> Result<()> {
        let indexer = match &self.indexer {
            IndexerSource::Available(indexer) => indexer,
            IndexerSource::Unavailable => {
                return Err(AuditorError::IndexerUnavailable(
                    "no transaction indexer configured".to_string(),
                ))
            }
        };

        info!("Refreshing cached sortition pool deauthorization transactions");

        let calls = indexer
            .fetch_call_history(&self.bonding_contract, DEAUTHORIZE_SORTITION_POOL_CONTRACT)
            .await?;

        let transactions: Vec<TransactionRecord> = calls
            .into_iter()
            .filter(|call| call.status)
            .map(TransactionRecord::from)
            .collect();

        let added = self.cache.store(&transactions)?;
        debug!(
            "Refreshed deauthorization cache: {} successful call(s), {} new",
            transactions.len(),
            added
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryTransactionCache;
    use crate::indexer::{IndexedCall, TransactionIndexer};
    use crate::types::{DecodedArgument, TransactionStatus};
    use async_trait::async_trait;
    use serde_json::json;

    const POOL: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const OTHER_POOL: &str = "0xcccccccccccccccccccccccccccccccccccccccc";
    const BONDING: &str = "0x27321f84704a599ab740281e285cc4463d89a3d5";

    fn deauthorization(hash: &str, block: u64, operator: &str, pool: &str) -> TransactionRecord {
        TransactionRecord {
            hash: hash.to_string(),
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: BONDING.to_string(),
            block_number: block,
            method: "deauthorizeSortitionPoolContract".to_string(),
            decoded_input: vec![
                DecodedArgument {
                    name: "_operator".to_string(),
                    value: json!(operator),
                },
                DecodedArgument {
                    name: "_poolAddress".to_string(),
                    value: json!(pool),
                },
            ],
            status: TransactionStatus::Success,
        }
    }

    fn address(value: &str) -> Address {
        Address::parse(value).unwrap()
    }

    fn interval() -> Interval {
        Interval::new(100, 200).unwrap()
    }

    #[test]
    fn test_in_range_deauthorization_is_included() {
        let records = vec![deauthorization(
            "0x01",
            150,
            "0xABCDEF0123456789ABCDEF0123456789ABCDEF01",
            POOL,
        )];

        let scan = compute_deauthorized_set(&records, &interval(), &address(POOL));
        assert!(scan
            .operators
            .contains(&address("0xabcdef0123456789abcdef0123456789abcdef01")));
        assert_eq!(scan.skipped_records, 0);
    }

    #[test]
    fn test_interval_bounds_are_inclusive() {
        let records = vec![
            deauthorization("0x01", 99, "0x00000000000000000000000000000000000000a1", POOL),
            deauthorization("0x02", 100, "0x00000000000000000000000000000000000000a2", POOL),
            deauthorization("0x03", 200, "0x00000000000000000000000000000000000000a3", POOL),
            deauthorization("0x04", 201, "0x00000000000000000000000000000000000000a4", POOL),
            deauthorization("0x05", 250, "0x00000000000000000000000000000000000000a5", POOL),
        ];

        let scan = compute_deauthorized_set(&records, &interval(), &address(POOL));
        assert_eq!(scan.operators.len(), 2);
        assert!(scan
            .operators
            .contains(&address("0x00000000000000000000000000000000000000a2")));
        assert!(scan
            .operators
            .contains(&address("0x00000000000000000000000000000000000000a3")));
    }

    #[test]
    fn test_other_pool_is_ignored() {
        let records = vec![deauthorization(
            "0x01",
            150,
            "0x00000000000000000000000000000000000000a1",
            OTHER_POOL,
        )];

        let scan = compute_deauthorized_set(&records, &interval(), &address(POOL));
        assert!(scan.operators.is_empty());
    }

    #[test]
    fn test_pool_comparison_ignores_case() {
        let records = vec![deauthorization(
            "0x01",
            150,
            "0x00000000000000000000000000000000000000a1",
            "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB",
        )];

        let scan = compute_deauthorized_set(&records, &interval(), &address(POOL));
        assert_eq!(scan.operators.len(), 1);
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let mut missing_pool =
            deauthorization("0x01", 150, "0x00000000000000000000000000000000000000a1", POOL);
        missing_pool.decoded_input.truncate(1);
        let bad_operator = deauthorization("0x02", 150, "not-an-address", POOL);
        let good = deauthorization("0x03", 150, "0x00000000000000000000000000000000000000a3", POOL);

        let records = [missing_pool, bad_operator, good];
        let scan = compute_deauthorized_set(&records, &interval(), &address(POOL));
        assert_eq!(scan.skipped_records, 2);
        assert_eq!(scan.operators.len(), 1);
    }

    #[test]
    fn test_empty_input_yields_empty_set() {
        let scan = compute_deauthorized_set(&[], &interval(), &address(POOL));
        assert!(scan.operators.is_empty());
        assert_eq!(scan.skipped_records, 0);
    }

    struct FailingIndexer;

    #[async_trait]
    impl TransactionIndexer for FailingIndexer {
        async fn fetch_call_history(
            &self,
            _contract: &Address,
            _method_signature: &str,
        ) -> Result<Vec<IndexedCall>> {
            Err(AuditorError::IndexerUnavailable("HTTP 503".to_string()))
        }
    }

    struct StaticIndexer(Vec<IndexedCall>);

    #[async_trait]
    impl TransactionIndexer for StaticIndexer {
        async fn fetch_call_history(
            &self,
            _contract: &Address,
            _method_signature: &str,
        ) -> Result<Vec<IndexedCall>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_scan_degrades_to_cache_when_indexer_fails() {
        let cache = Arc::new(MemoryTransactionCache::new());
        cache
            .store(&[deauthorization(
                "0x01",
                150,
                "0x00000000000000000000000000000000000000a1",
                POOL,
            )])
            .unwrap();

        let scanner = DeauthorizationScanner::new(
            cache,
            IndexerSource::Available(Arc::new(FailingIndexer)),
            address(BONDING),
        );

        let outcome = scanner.scan(&interval(), &address(POOL)).await.unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.cached_records, 1);
        assert_eq!(outcome.operators.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_without_indexer_uses_cache_only() {
        let scanner = DeauthorizationScanner::new(
            Arc::new(MemoryTransactionCache::new()),
            IndexerSource::Unavailable,
            address(BONDING),
        );

        let outcome = scanner.scan(&interval(), &address(POOL)).await.unwrap();
        assert!(outcome.degraded);
        assert!(outcome.operators.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_stores_only_successful_calls() {
        let calls: Vec<IndexedCall> = serde_json::from_value(json!([
            {
                "hash": "0x01",
                "from": "0x1111111111111111111111111111111111111111",
                "to": BONDING,
                "block_number": 150,
                "method": "deauthorizeSortitionPoolContract",
                "decoded_input": [
                    { "name": "_operator", "value": "0x00000000000000000000000000000000000000a1" },
                    { "name": "_poolAddress", "value": POOL }
                ],
                "status": true
            },
            {
                "hash": "0x02",
                "from": "0x1111111111111111111111111111111111111111",
                "to": BONDING,
                "block_number": 160,
                "method": "deauthorizeSortitionPoolContract",
                "decoded_input": [
                    { "name": "_operator", "value": "0x00000000000000000000000000000000000000a2" },
                    { "name": "_poolAddress", "value": POOL }
                ],
                "status": false
            }
        ]))
        .unwrap();

        let cache = Arc::new(MemoryTransactionCache::new());
        let scanner = DeauthorizationScanner::new(
            cache.clone(),
            IndexerSource::Available(Arc::new(StaticIndexer(calls))),
            address(BONDING),
        );

        let outcome = scanner.scan(&interval(), &address(POOL)).await.unwrap();
        assert!(!outcome.degraded);
        assert_eq!(cache.len(), 1);
        assert!(outcome
            .operators
            .contains(&address("0x00000000000000000000000000000000000000a1")));
        assert!(!outcome
            .operators
            .contains(&address("0x00000000000000000000000000000000000000a2")));
    }
}
