use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::utils::{TocError, TocResult};

/// 一次状态查询的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState<T> {
    Pending,
    Done(T),
    Failed(String),
}

/// 轮询间隔的等待方式，测试时用假时钟替换
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

pub struct TokioClock;

impl Clock for TokioClock {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// 有上限的轮询：每次查询前先等待一个间隔
pub struct Poller<C = TokioClock> {
    interval: Duration,
    max_attempts: u32,
    clock: C,
}

impl Poller<TokioClock> {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self::with_clock(interval, max_attempts, TokioClock)
    }
}

impl<C: Clock> Poller<C> {
    pub fn with_clock(interval: Duration, max_attempts: u32, clock: C) -> Self {
        Self {
            interval,
            max_attempts,
            clock,
        }
    }

    /// 总等待上限
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// `check` 收到从 0 开始的尝试序号
    pub async fn run<T, F, Fut>(&self, mut check: F) -> TocResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = TocResult<PollState<T>>>,
    {
        for attempt in 0..self.max_attempts {
            self.clock.sleep(self.interval).await;
            match check(attempt).await? {
                PollState::Pending => debug!("轮询第 {} 次：未完成", attempt + 1),
                PollState::Done(value) => return Ok(value),
                PollState::Failed(reason) => return Err(TocError::ServiceError(reason)),
            }
        }
        Err(TocError::Timeout(format!(
            "轮询 {} 次仍未完成（{} 秒）",
            self.max_attempts,
            self.budget().as_secs()
        )))
    }
}
