//! # Chat Auto Grader
//!
//! 从课程平台拉取学生提交，通过浏览器驱动的网页聊天助手评分，
//! 再由审核人确认后把成绩回传平台。
//!
//! ## 架构分层
//!
//! ### ① 基础设施层
//! - `browser/` - 启动浏览器进程，建立 CDP 连接
//! - `infrastructure/` - `JsExecutor`，聊天 `Page` 的唯一持有者
//!
//! ### ② 业务能力层
//! - `automation/` - `ChatSession` 抽象：带回退的元素定位、完成检测、
//!   人工验证，以及浏览器和 API 两种后端
//! - `services/` - `Store`、`PlatformClient`、`Notifier`
//! - `clients/` - Canvas REST 和 Telegram Bot API 实现
//!
//! ### ③ 流程层
//! - `workflow/` - 提交状态机、prompt 组装、回复解析
//!
//! ### ④ 编排层
//! - `orchestrator/` - 定时评分循环、审核监听、应用装配
//!
//! ## 模块结构

pub mod automation;
pub mod browser;
pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

pub use automation::ChatSession;
pub use config::Config;
pub use error::{GraderError, GraderResult};
pub use models::{Status, Submission};
pub use orchestrator::{App, GradingOrchestrator};
pub use workflow::{transition, Event};
