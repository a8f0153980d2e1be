//! 本地交易緩存模塊
//!
//! 保存從索引服務獲取的成功交易記錄，避免每次審計都重新拉取完整歷史。
//!
//! # 語義
//!
//! - 以交易哈希為鍵的冪等 upsert；重複存儲同一記錄不產生副本
//! - 只增不減：刷新永遠不會刪除已有記錄
//! - 失敗狀態的交易不會被保存
//! - 按（合約地址，方法名）查詢，合約地址比較不區分大小寫
//! - 同一文件的多個句柄（或多個進程）寫入時，在文件鎖內先合併磁盤內容再寫回
//! - 寫入失敗不改變內存狀態，重試時會再次寫入
//!
//! # 文件格式
//!
//! ```text
//! {
//!   "version": 1,
//!   "updated_at": 1700000000,
//!   "transactions": [ TransactionRecord, ... ]
//! }
//! ```

use crate::error::{AuditorError, Result};
use crate::types::{Address, TransactionRecord};
use chrono::Utc;
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const CACHE_FORMAT_VERSION: u32 = 1;

/// 交易緩存接口
pub trait TransactionCache: Send + Sync {
    /// 返回指定合約上指定方法的全部已保存調用（順序不保證）
    fn get_transactions_for_method(
        &self,
        contract: &Address,
        method: &str,
    ) -> Result<Vec<TransactionRecord>>;

    /// 保存記錄，返回新增的記錄數
    fn store(&self, records: &[TransactionRecord]) -> Result<usize>;
}

fn cache_key(hash: &str) -> String {
    hash.to_ascii_lowercase()
}

fn matches_method(record: &TransactionRecord, contract: &Address, method: &str) -> bool {
    record.method == method && record.to.eq_ignore_ascii_case(&contract.to_string())
}

/// 合併記錄到索引中，返回新增數量
fn merge_records(
    index: &mut HashMap<String, TransactionRecord>,
    records: &[TransactionRecord],
) -> usize {
    let mut added = 0;
    for record in records {
        if !record.is_success() {
            debug!("Ignoring failed transaction {}", record.hash);
            continue;
        }
        let key = cache_key(&record.hash);
        if !index.contains_key(&key) {
            index.insert(key, record.clone());
            added += 1;
        }
    }
    added
}

/// 內存交易緩存
#[derive(Default)]
pub struct MemoryTransactionCache {
    records: RwLock<HashMap<String, TransactionRecord>>,
}

impl MemoryTransactionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl TransactionCache for MemoryTransactionCache {
    fn get_transactions_for_method(
        &self,
        contract: &Address,
        method: &str,
    ) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|record| matches_method(record, contract, method))
            .cloned()
            .collect())
    }

    fn store(&self, records: &[TransactionRecord]) -> Result<usize> {
        Ok(merge_records(&mut self.records.write(), records))
    }
}

#[derive(Serialize, Deserialize)]
struct CacheDocument {
    version: u32,
    updated_at: i64,
    transactions: Vec<TransactionRecord>,
}

/// 讀取並校驗緩存文件，文件不存在時返回 `None`
fn read_document(path: &Path) -> Result<Option<HashMap<String, TransactionRecord>>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)?;
    let document: CacheDocument = serde_json::from_str(&content).map_err(|e| {
        AuditorError::Cache(format!("Failed to parse {}: {}", path.display(), e))
    })?;

    if document.version != CACHE_FORMAT_VERSION {
        return Err(AuditorError::Cache(format!(
            "Unsupported cache format version {} in {}",
            document.version,
            path.display()
        )));
    }

    let mut records = HashMap::new();
    merge_records(&mut records, &document.transactions);
    Ok(Some(records))
}

/// JSON 文件交易緩存
///
/// 打開時整體加載到內存。寫入時持有 `<name>.lock` 的排他文件鎖，
/// 重新讀取磁盤內容與本句柄的記錄合併，經同目錄臨時文件原子替換，
/// 成功後才更新內存。
pub struct FileTransactionCache {
    path: PathBuf,
    records: RwLock<HashMap<String, TransactionRecord>>,
    /// 串行化本進程內的寫入
    write_lock: Mutex<()>,
}

impl FileTransactionCache {
    /// 打開緩存文件，文件不存在時視為空緩存
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let records = match read_document(&path)? {
            Some(records) => {
                info!(
                    "Loaded {} cached transaction(s) from {}",
                    records.len(),
                    path.display()
                );
                records
            }
            None => {
                info!("Transaction cache {} does not exist yet", path.display());
                HashMap::new()
            }
        };

        Ok(Self {
            path,
            records: RwLock::new(records),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// 在文件鎖內合併磁盤內容並寫回，返回合併後的完整記錄
    fn persist_merged(
        &self,
        mut merged: HashMap<String, TransactionRecord>,
    ) -> Result<HashMap<String, TransactionRecord>> {
        let directory = self.directory();
        fs::create_dir_all(directory)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;
        lock_file.lock_exclusive()?;

        let on_disk = read_document(&self.path)?.unwrap_or_default();
        let disk_count = on_disk.len();
        for (key, record) in on_disk {
            merged.entry(key).or_insert(record);
        }

        if merged.len() == disk_count {
            debug!("{} already holds every record", self.path.display());
            return Ok(merged);
        }

        let mut transactions: Vec<TransactionRecord> = merged.values().cloned().collect();
        transactions.sort_by(|a, b| {
            a.block_number
                .cmp(&b.block_number)
                .then_with(|| a.hash.cmp(&b.hash))
        });

        let document = CacheDocument {
            version: CACHE_FORMAT_VERSION,
            updated_at: Utc::now().timestamp(),
            transactions,
        };

        let mut tmp = NamedTempFile::new_in(directory)?;
        serde_json::to_writer_pretty(&mut tmp, &document)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| AuditorError::Io(e.error))?;

        debug!(
            "Persisted {} transaction(s) to {}",
            document.transactions.len(),
            self.path.display()
        );

        // 鎖隨 lock_file 關閉釋放
        Ok(merged)
    }
}

impl TransactionCache for FileTransactionCache {
    fn get_transactions_for_method(
        &self,
        contract: &Address,
        method: &str,
    ) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|record| matches_method(record, contract, method))
            .cloned()
            .collect())
    }

    fn store(&self, records: &[TransactionRecord]) -> Result<usize> {
        let _guard = self.write_lock.lock();

        let mut merged = self.records.read().clone();
        let added = merge_records(&mut merged, records);
        if added == 0 {
            return Ok(0);
        }

        let merged = self.persist_merged(merged)?;
        *self.records.write() = merged;

        info!("Stored {} new transaction(s) in {}", added, self.path.display());
        Ok(added)
    }
}
