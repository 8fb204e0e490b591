//! 流式回复完成检测
//!
//! 聊天页面没有"完成"事件。先等待一段起始延迟，然后轮询；每一轮只采样一次
//! 三个信号，同一次采样里三者都成立才算完成：
//!
//! 1. 页面上没有"正在生成"的控件
//! 2. 至少存在一个回复容器
//! 3. 最后一个回复容器里有渲染好的文本节点
//!
//! 完成后再等一小段时间，让最后一块内容渲染完。没有超时

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::AutomationError;

/// 单次采样看到的页面状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSignals {
    /// 停止/生成中控件可见
    pub generating: bool,
    pub response_count: usize,
    /// 最后一个容器至少有一个文本节点
    pub last_has_text: bool,
}

impl CompletionSignals {
    pub fn is_complete(&self) -> bool {
        !self.generating && self.response_count > 0 && self.last_has_text
    }
}

/// 采样完成信号
#[async_trait]
pub trait ResponseSampler: Send + Sync {
    async fn sample(&self) -> Result<CompletionSignals, AutomationError>;
}

/// 等待节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPolicy {
    /// 第一轮之前，等生成开始
    pub settle: Duration,
    pub poll_interval: Duration,
    /// 判定完成之后
    pub grace: Duration,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionDetector {
    policy: CompletionPolicy,
}

impl CompletionDetector {
    pub fn new(policy: CompletionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    /// 阻塞直到某一轮三个信号同时成立，返回轮数
    ///
    /// 采样失败按未完成处理
    pub async fn wait<P>(&self, sampler: &P) -> usize
    where
        P: ResponseSampler + ?Sized,
    {
        sleep(self.policy.settle).await;

        let mut ticks = 0usize;
        loop {
            sleep(self.policy.poll_interval).await;
            ticks += 1;

            match sampler.sample().await {
                Ok(signals) if signals.is_complete() => break,
                Ok(signals) => {
                    debug!("等待回复结束...（第 {} 轮, {:?}）", ticks, signals);
                }
                Err(e) => {
                    warn!("第 {} 轮完成采样失败: {}", ticks, e);
                }
            }
        }

        info!("✓ 回复结束，共 {} 轮", ticks);
        sleep(self.policy.grace).await;
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn signals(generating: bool, response_count: usize, last_has_text: bool) -> CompletionSignals {
        CompletionSignals {
            generating,
            response_count,
            last_has_text,
        }
    }

    struct Scripted {
        samples: Mutex<Vec<Result<CompletionSignals, AutomationError>>>,
        taken: Mutex<usize>,
    }

    impl Scripted {
        fn new(mut samples: Vec<Result<CompletionSignals, AutomationError>>) -> Self {
            samples.reverse();
            Self {
                samples: Mutex::new(samples),
                taken: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ResponseSampler for Scripted {
        async fn sample(&self) -> Result<CompletionSignals, AutomationError> {
            *self.taken.lock().unwrap() += 1;
            self.samples
                .lock()
                .unwrap()
                .pop()
                .expect("sampled after completion")
        }
    }

    fn instant() -> CompletionDetector {
        CompletionDetector::new(CompletionPolicy {
            settle: Duration::ZERO,
            poll_interval: Duration::ZERO,
            grace: Duration::ZERO,
        })
    }

    #[test]
    fn any_false_signal_blocks_completion() {
        for generating in [false, true] {
            for response_count in [0usize, 1, 3] {
                for last_has_text in [false, true] {
                    let s = signals(generating, response_count, last_has_text);
                    let all_hold = !generating && response_count > 0 && last_has_text;
                    assert_eq!(s.is_complete(), all_hold, "{s:?}");
                }
            }
        }
    }

    #[tokio::test]
    async fn completes_on_first_tick_with_all_signals() {
        let sampler = Scripted::new(vec![
            Ok(signals(true, 1, true)),
            Ok(signals(false, 0, false)),
            Ok(signals(false, 2, true)),
        ]);
        assert_eq!(instant().wait(&sampler).await, 3);
        assert_eq!(*sampler.taken.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn signals_on_separate_ticks_do_not_accumulate() {
        // 每个信号都在某一轮成立过，但从没同时成立
        let sampler = Scripted::new(vec![
            Ok(signals(false, 0, false)),
            Ok(signals(true, 1, false)),
            Ok(signals(true, 1, true)),
            Ok(signals(false, 1, false)),
            Ok(signals(false, 1, true)),
        ]);
        assert_eq!(instant().wait(&sampler).await, 5);
    }

    #[tokio::test]
    async fn failed_samples_count_as_incomplete() {
        let sampler = Scripted::new(vec![
            Err(AutomationError::Script("page gone".into())),
            Ok(signals(false, 1, true)),
        ]);
        assert_eq!(instant().wait(&sampler).await, 2);
    }

    #[test]
    fn decodes_page_sample() {
        let s: CompletionSignals =
            serde_json::from_str(r#"{"generating":false,"responseCount":2,"lastHasText":true}"#)
                .unwrap();
        assert!(s.is_complete());
    }
}
