//! 人工验证闸门
//!
//! 登录和反自动化验证无法由程序完成。没有保存的会话凭据时，
//! 驱动在这里停下，直到操作员确认已在浏览器窗口中完成

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::AutomationError;

#[async_trait]
pub trait VerificationGate: Send + Sync {
    /// 操作员确认浏览器就绪后返回
    async fn wait_for_operator(&self) -> Result<(), AutomationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAnswer {
    Continue,
    Wait,
    Invalid,
}

pub fn parse_gate_answer(line: &str) -> GateAnswer {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" => GateAnswer::Continue,
        "n" => GateAnswer::Wait,
        _ => GateAnswer::Invalid,
    }
}

/// 终端询问：`y` 继续，`n` 等待后再问
pub struct StdinGate {
    recheck_delay: Duration,
}

impl StdinGate {
    pub fn new(recheck_delay: Duration) -> Self {
        Self { recheck_delay }
    }
}

impl Default for StdinGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl VerificationGate for StdinGate {
    async fn wait_for_operator(&self) -> Result<(), AutomationError> {
        info!("🔐 如有需要，请在浏览器窗口中完成登录或人机验证");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            stdout
                .write_all("完成登录/验证后输入 'y'，输入 'n' 稍后再检查: ".as_bytes())
                .await
                .map_err(|e| AutomationError::Gate(e.to_string()))?;
            stdout
                .flush()
                .await
                .map_err(|e| AutomationError::Gate(e.to_string()))?;

            let line = lines
                .next_line()
                .await
                .map_err(|e| AutomationError::Gate(e.to_string()))?
                .ok_or_else(|| AutomationError::Gate("标准输入已关闭".to_string()))?;

            match parse_gate_answer(&line) {
                GateAnswer::Continue => {
                    info!("✓ 继续自动化流程");
                    return Ok(());
                }
                GateAnswer::Wait => {
                    info!("等待完成验证...");
                    sleep(self.recheck_delay).await;
                }
                GateAnswer::Invalid => warn!("输入无效，请输入 'y' 或 'n'"),
            }
        }
    }
}
