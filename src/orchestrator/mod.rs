//! 编排层
//!
//! ```text
//! app（装配、退出）
//!   ├── grading_loop  拉取 → 评分 → 通知，按间隔循环
//!   └── approval      机器人传来的审核动作
//!         ↓
//! workflow（状态机、prompt）
//!         ↓
//! services（存储、平台、通知）  +  automation（聊天会话）
//! ```
//!
//! 只有这一层持有聊天会话并决定各阶段何时运行

pub mod app;
pub mod approval;
pub mod grading_loop;

pub use app::App;
pub use approval::{listen_for_actions, ApprovalHandler, ApprovalOutcome};
pub use grading_loop::{CycleReport, GradingOrchestrator};
