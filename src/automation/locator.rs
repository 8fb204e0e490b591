//! 按顺序回退的元素定位
//!
//! 聊天页面常同时存在多套 DOM 结构（新旧标记并存或改版进行中），
//! 所以"输入框"这样的角色用一组定位表达式描述，最稳定的排在前面。
//! 每一轮遍历所有定位表达式及其匹配到的元素，返回第一个通过能力检查的；
//! 没通过的候选跳过，下一轮从头重新求值

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::AutomationError;

/// 元素要具备什么能力才算找到
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// 可见且可用
    Clickable,
    /// 可见、可用，并且能接收一次试探输入（之后清空）
    Typeable,
}

/// 能把定位表达式解析成页面元素的来源
#[async_trait]
pub trait ElementSource: Send + Sync {
    type Element: Send + Sync;

    /// 当前匹配 `locator` 的所有元素，按文档顺序
    async fn find_all(&self, locator: &str) -> Result<Vec<Self::Element>, AutomationError>;

    /// `element` 当前是否具备 `capability`，检查出错一律视为 `false`
    async fn check(&self, element: &Self::Element, capability: Capability) -> bool;
}

/// 找到的元素及来源
#[derive(Debug)]
pub struct Located<E> {
    pub element: E,
    pub locator: String,
    /// 在第几轮找到（从 1 开始）
    pub attempt: usize,
}

/// 为某个角色查找一个可交互元素
#[derive(Debug, Clone)]
pub struct ElementLocator {
    role: String,
    locators: Vec<String>,
    capability: Capability,
    max_attempts: usize,
    backoff: Duration,
}

impl ElementLocator {
    /// 默认 30 轮，每轮间隔 2 秒
    pub fn new<I, S>(role: impl Into<String>, locators: I, capability: Capability) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            role: role.into(),
            locators: locators.into_iter().map(Into::into).collect(),
            capability,
            max_attempts: 30,
            backoff: Duration::from_secs(2),
        }
    }

    pub fn with_attempts(mut self, max_attempts: usize, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// 反复整轮查找，直到有元素通过检查或次数用完
    pub async fn locate<S>(&self, source: &S) -> Result<Located<S::Element>, AutomationError>
    where
        S: ElementSource + ?Sized,
    {
        for attempt in 1..=self.max_attempts {
            debug!(
                "查找 {}（第 {}/{} 次）",
                self.role, attempt, self.max_attempts
            );

            if let Some((element, locator)) = self.pass(source).await {
                info!("✓ 找到 {}，定位器: {}", self.role, locator);
                return Ok(Located {
                    element,
                    locator,
                    attempt,
                });
            }

            if attempt < self.max_attempts {
                sleep(self.backoff).await;
            }
        }

        warn!(
            "⚠️ 没有可交互的 {}（已尝试 {} 次）",
            self.role, self.max_attempts
        );
        Err(AutomationError::ElementNotFound {
            role: self.role.clone(),
            attempts: self.max_attempts,
        })
    }

    /// 只查一轮，不重试
    pub async fn find_once<S>(&self, source: &S) -> Option<Located<S::Element>>
    where
        S: ElementSource + ?Sized,
    {
        self.pass(source).await.map(|(element, locator)| Located {
            element,
            locator,
            attempt: 1,
        })
    }

    async fn pass<S>(&self, source: &S) -> Option<(S::Element, String)>
    where
        S: ElementSource + ?Sized,
    {
        for locator in &self.locators {
            let candidates = match source.find_all(locator).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    debug!("定位器 {} 执行失败: {}", locator, e);
                    continue;
                }
            };

            for candidate in candidates {
                if source.check(&candidate, self.capability).await {
                    return Some((candidate, locator.clone()));
                }
            }
        }
        None
    }
}
