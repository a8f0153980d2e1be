//! 網絡請求重試機制模組
//!
//! 實現指數退避（Exponential Backoff）策略，用於處理臨時網絡故障。
//! 重試與否由調用方提供的分類器決定，整個重試過程受總截止時間約束。

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

/// 重試配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 最大重試次數（不含首次嘗試）
    pub max_retries: u32,
    /// 初始延遲時間（毫秒）
    pub initial_delay_ms: u64,
    /// 延遲增長倍數
    pub multiplier: f64,
    /// 最大延遲時間（毫秒）
    pub max_delay_ms: u64,
    /// 每次延遲附加的隨機抖動上限（毫秒）
    pub jitter_ms: u64,
    /// 整個重試過程的截止時間（毫秒）
    pub deadline_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 10000,
            jitter_ms: 25,
            deadline_ms: 60000,
        }
    }
}

impl RetryConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    fn next_delay_ms(&self, delay_ms: u64) -> u64 {
        (((delay_ms as f64) * self.multiplier) as u64).min(self.max_delay_ms)
    }

    fn jittered(&self, delay_ms: u64) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(delay_ms + jitter)
    }
}

/// 重試失敗的原因
#[derive(Debug)]
pub enum RetryError<E> {
    /// 分類器判定為非瞬時錯誤，未重試
    Permanent(E),
    /// 重試次數耗盡
    Exhausted { attempts: u32, last_error: E },
    /// 超過總截止時間；如果首次嘗試就超時則沒有錯誤值
    DeadlineExceeded { attempts: u32, last_error: Option<E> },
}

impl<E: Display> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent(_) => 1,
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }

    /// 用於日誌和錯誤消息的原因描述
    pub fn reason(&self) -> String {
        match self {
            RetryError::Permanent(e) => e.to_string(),
            RetryError::Exhausted { last_error, .. } => last_error.to_string(),
            RetryError::DeadlineExceeded {
                last_error: Some(e),
                ..
            } => format!("deadline exceeded, last error: {}", e),
            RetryError::DeadlineExceeded {
                last_error: None, ..
            } => "deadline exceeded".to_string(),
        }
    }
}

/// 使用指數退避策略重試操作
///
/// # 參數
///
/// * `operation_name` - 操作名稱（用於日誌）
/// * `config` - 重試配置
/// * `is_transient` - 錯誤分類器，返回 `true` 的錯誤才會重試
/// * `operation` - 要重試的異步操作
///
/// # 重試策略
///
/// 1. 初始延遲：`initial_delay_ms`
/// 2. 每次失敗後延遲增長：`delay = delay * multiplier`，上限 `max_delay_ms`
/// 3. 最大重試次數：`max_retries`
/// 4. 嘗試和等待都計入 `deadline_ms`，超時即放棄
///
/// # 範例
///
/// ```no_run
/// use rewards_auditor::retry::{retry_with_exponential_backoff, RetryConfig};
///
/// # async fn example() {
/// let config = RetryConfig::default();
///
/// let result = retry_with_exponential_backoff(
///     "fetch_data",
///     &config,
///     |_e: &std::io::Error| true,
///     || async { Ok::<_, std::io::Error>(42) },
/// )
/// .await;
/// assert!(result.is_ok());
/// # }
/// ```
pub async fn retry_with_exponential_backoff<F, Fut, T, E, C>(
    operation_name: &str,
    config: &RetryConfig,
    is_transient: C,
    operation: F,
) -> std::result::Result<T, RetryError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let deadline = Instant::now() + config.deadline();
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;
    let mut last_error: Option<E> = None;

    loop {
        attempt += 1;

        debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = config.max_retries + 1,
            "Executing operation"
        );

        let remaining = deadline.saturating_duration_since(Instant::now());
        let outcome = match timeout(remaining, operation()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    deadline_ms = config.deadline_ms,
                    "Operation exceeded its deadline"
                );
                return Err(RetryError::DeadlineExceeded {
                    attempts: attempt,
                    last_error,
                });
            }
        };

        match outcome {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if !is_transient(&e) => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %e,
                    "Operation failed with non-retryable error"
                );
                return Err(RetryError::Permanent(e));
            }
            Err(e) => {
                if attempt > config.max_retries {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after all retries"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }

                let wait = config.jittered(delay_ms);
                if Instant::now() + wait >= deadline {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %e,
                        "Next retry would exceed the deadline"
                    );
                    return Err(RetryError::DeadlineExceeded {
                        attempts: attempt,
                        last_error: Some(e),
                    });
                }

                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    delay_ms = wait.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying..."
                );
                last_error = Some(e);

                sleep(wait).await;

                delay_ms = config.next_delay_ms(delay_ms);
            }
        }
    }
}
