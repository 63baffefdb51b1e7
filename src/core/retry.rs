//! 重试策略：全抖动指数退避 + 预算（次数 / 累计耗时）
//!
//! 只对 RetryableTransient 且幂等的操作自动重试；Terminal 零重试；
//! MalformedOutput 交给反思流程（见 SessionLoop），不在此处盲目重发。
//!
//! 退避：delay = uniform(0, min(max_delay, base_delay * 2^attempt))；
//! 若失败携带的 Retry-After 大于该值则用 Retry-After，整体不超过 max_sleep。

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::classifier::{classify, Classification, Failure};
use crate::core::AgentError;

/// 重试预算
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryBudget {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,
    pub max_elapsed: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 任何一次等待的绝对上限（含 Retry-After）
    pub max_sleep: Duration,
}

/// 重试与反思配置（会话构造时传入，不可变）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    pub budget: RetryBudget,
    pub backoff: BackoffConfig,
    pub reflection_attempts: u32,
    pub reflection_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: RetryBudget {
                max_attempts: 3,
                max_elapsed: Duration::from_secs(60),
            },
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(8),
                max_sleep: Duration::from_secs(30),
            },
            reflection_attempts: 2,
            reflection_delay: Duration::from_millis(500),
        }
    }
}

/// 抖动采样源；测试中用 Fixed 得到确定的延迟
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Jitter {
    Random,
    /// [0, 1] 内的固定采样
    Fixed(f64),
}

impl Jitter {
    fn sample(&self) -> f64 {
        match self {
            Jitter::Random => rand::random::<f64>(),
            Jitter::Fixed(v) => v.clamp(0.0, 1.0),
        }
    }
}

/// 一次「调用 + 重试」序列的状态；到达终态后丢弃
#[derive(Clone, Debug)]
pub struct RetryState {
    /// 已发起的尝试次数
    pub attempt: u32,
    /// 已执行的自动重试次数
    pub retries: u32,
    pub classification: Option<Classification>,
    pub budget: RetryBudget,
    started: Instant,
}

impl RetryState {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// 放弃重试的原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GiveUp {
    Terminal,
    Malformed,
    /// 可重试的失败，但操作会改变状态，交给模型 / 用户显式重新调用
    NotIdempotent,
    AttemptsExhausted,
    ElapsedExhausted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp(GiveUp),
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    jitter: Jitter,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            jitter: Jitter::Random,
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 开始一个新的尝试序列（首次尝试计为 attempt = 1）
    pub fn begin(&self) -> RetryState {
        RetryState {
            attempt: 1,
            retries: 0,
            classification: None,
            budget: self.config.budget,
            started: Instant::now(),
        }
    }

    /// 第 retry_index 次重试（从 0 开始）前的等待时间
    pub fn backoff_delay(&self, retry_index: u32, hint: Option<Duration>) -> Duration {
        let backoff = &self.config.backoff;
        let exp = 2f64.powi(retry_index.min(30) as i32);
        let cap = (backoff.base_delay.as_secs_f64() * exp).min(backoff.max_delay.as_secs_f64());
        let jittered = Duration::from_secs_f64(cap * self.jitter.sample());
        let delay = match hint {
            Some(h) if h > jittered => h,
            _ => jittered,
        };
        delay.min(backoff.max_sleep)
    }

    /// 根据失败分类决定是否重试；Retry 时已计入本次重试
    pub fn decide(&self, state: &mut RetryState, failure: &Failure, idempotent: bool) -> RetryDecision {
        let classified = classify(failure);
        state.classification = Some(classified.class);
        match classified.class {
            Classification::Terminal => RetryDecision::GiveUp(GiveUp::Terminal),
            Classification::MalformedOutput => RetryDecision::GiveUp(GiveUp::Malformed),
            Classification::RetryableTransient => {
                if !idempotent {
                    return RetryDecision::GiveUp(GiveUp::NotIdempotent);
                }
                if state.attempt >= state.budget.max_attempts {
                    return RetryDecision::GiveUp(GiveUp::AttemptsExhausted);
                }
                let delay = self.backoff_delay(state.retries, classified.suggested_delay);
                if state.elapsed() + delay > state.budget.max_elapsed {
                    return RetryDecision::GiveUp(GiveUp::ElapsedExhausted);
                }
                state.attempt += 1;
                state.retries += 1;
                RetryDecision::Retry { delay }
            }
        }
    }

    /// 等待退避时间；期间用户中断则返回 Cancelled
    pub async fn wait(&self, delay: Duration, cancel: &CancellationToken) -> Result<(), AgentError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// 单次 submit() 内的反思预算；每次 MalformedOutput 消耗一次，用尽后的下一次为终态失败
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReflectionBudget {
    limit: u32,
    used: u32,
    exhausted: Option<String>,
}

impl ReflectionBudget {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: 0,
            exhausted: None,
        }
    }

    /// 还有预算则消耗一次并返回 true
    pub fn try_consume(&mut self) -> bool {
        if self.used < self.limit {
            self.used += 1;
            true
        } else {
            false
        }
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn mark_exhausted(&mut self, detail: impl Into<String>) {
        self.exhausted.get_or_insert_with(|| detail.into());
    }

    pub fn exhausted(&self) -> Option<&str> {
        self.exhausted.as_deref()
    }
}

/// 放弃时给模型 / 用户看的说明
pub fn give_up_message(failure: &Failure, reason: GiveUp, attempts: u32) -> String {
    match reason {
        GiveUp::Terminal => format!("{failure} (not retryable)"),
        GiveUp::Malformed => format!("{failure}"),
        GiveUp::NotIdempotent => format!(
            "{failure}; not retried automatically because the call may have side effects, re-invoke it explicitly if still needed"
        ),
        GiveUp::AttemptsExhausted | GiveUp::ElapsedExhausted => {
            let hint = if failure.status() == Some(429) {
                "rate limited, try again later"
            } else {
                "service unavailable, try again later"
            };
            format!("{failure}; gave up after {attempts} attempts ({hint})")
        }
    }
}
