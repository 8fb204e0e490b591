//! 聊天自动化
//!
//! 把 prompt 变成回复所需的全部能力：带回退的元素定位、完成检测、
//! 人工验证闸门以及两种会话后端

pub mod api_session;
pub mod completion;
pub mod driver;
pub mod gate;
pub mod locator;
pub mod selectors;

use async_trait::async_trait;

use crate::error::AutomationError;

pub use api_session::ApiChatSession;
pub use completion::{CompletionDetector, CompletionPolicy, CompletionSignals, ResponseSampler};
pub use driver::{BrowserChatSession, BrowserSessionOptions};
pub use gate::{StdinGate, VerificationGate};
pub use locator::{Capability, ElementLocator, ElementSource, Located};
pub use selectors::ChatSelectors;

/// 提交一个 prompt，拿回完整回复文本
///
/// 会话同一时间只被一个调用方使用，prompt 不会交错
#[async_trait]
pub trait ChatSession: Send {
    async fn submit_prompt(&mut self, text: &str) -> Result<String, AutomationError>;

    /// 释放会话持有的资源
    async fn close(&mut self) {}
}
