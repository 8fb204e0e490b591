//! 应用装配
//!
//! 根据 [`Config`] 创建存储、客户端和聊天会话，然后运行评分循环
//! 和审核监听，直到 Ctrl-C

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::automation::{
    ApiChatSession, BrowserChatSession, BrowserSessionOptions, ChatSession, StdinGate,
};
use crate::clients::{CanvasConnector, TelegramClient};
use crate::config::{ChatBackend, Config};
use crate::models::load_seed;
use crate::orchestrator::approval::{listen_for_actions, ApprovalHandler};
use crate::orchestrator::GradingOrchestrator;
use crate::services::{PlatformConnector, SqliteStore};
use crate::utils::logging::log_startup;

/// 主应用
pub struct App {
    orchestrator: GradingOrchestrator,
    bot: Arc<TelegramClient>,
    approvals: Arc<ApprovalHandler>,
}

impl App {
    /// 打开存储、写入种子并启动聊天会话
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(config.chat_backend.as_str(), config.cycle_interval.as_secs());

        let store = Arc::new(
            SqliteStore::open(&config.store_path)
                .with_context(|| format!("打开存储失败: {}", config.store_path.display()))?,
        );
        if let Some(seed_path) = &config.seed_path {
            let seed = load_seed(seed_path).await?;
            store.apply_seed(&seed).await?;
        }

        let bot = Arc::new(TelegramClient::from_config(&config)?);
        let connector: Arc<dyn PlatformConnector> = Arc::new(CanvasConnector);

        let chat: Box<dyn ChatSession> = match config.chat_backend {
            ChatBackend::Browser => {
                let options = BrowserSessionOptions::from_config(&config);
                Box::new(BrowserChatSession::open(options, &StdinGate::default()).await?)
            }
            ChatBackend::Api => Box::new(ApiChatSession::new(&config)),
        };

        let orchestrator = GradingOrchestrator::new(
            store.clone(),
            connector.clone(),
            bot.clone(),
            chat,
            config.cycle_interval,
        );
        let missing = orchestrator.verify_assignments().await?;
        if missing > 0 {
            warn!("⚠️ {} 个种子作业在平台上不可见", missing);
        }
        let approvals = Arc::new(ApprovalHandler::new(store, connector));

        Ok(Self {
            orchestrator,
            bot,
            approvals,
        })
    }

    /// 运行到 Ctrl-C 或非法状态迁移，然后清理
    pub async fn run(mut self) -> Result<()> {
        let listener = tokio::spawn(listen_for_actions(self.bot.clone(), self.approvals.clone()));

        let outcome = tokio::select! {
            result = self.orchestrator.run_forever() => result.map_err(anyhow::Error::from),
            signal = tokio::signal::ctrl_c() => {
                info!("🛑 收到退出信号");
                signal.context("无法监听 Ctrl-C")
            }
        };

        listener.abort();
        self.orchestrator.close().await;
        info!("👋 自动评分已停止");
        outcome
    }
}
