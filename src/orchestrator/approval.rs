//! 审核决定 - 事件驱动路径
//!
//! 与评分循环并行运行，共用存储。选中的成绩先回写平台再写本地，
//! 回写失败时提交保持原样

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::clients::telegram_client::{CallbackQuery, Message, TelegramClient, LONG_POLL_SECS};
use crate::error::{GraderError, GraderResult, StoreError};
use crate::models::Submission;
use crate::services::{ActionEvent, PlatformConnector, Store};
use crate::utils::escape_html;
use crate::workflow::{transition, Event};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    GradePosted {
        submission_id: u64,
        grade: String,
        student_name: String,
    },
    RegenerationQueued {
        submission_id: u64,
    },
}

impl ApprovalOutcome {
    /// 显示给审核人的确认文字
    pub fn reply_text(&self) -> String {
        match self {
            ApprovalOutcome::GradePosted {
                grade,
                student_name,
                ..
            } => format!(
                "You selected {} for {}. Grade posted successfully.",
                grade, student_name
            ),
            ApprovalOutcome::RegenerationQueued { submission_id } => format!(
                "Regenerating feedback for submission {}...",
                submission_id
            ),
        }
    }
}

pub struct ApprovalHandler {
    store: Arc<dyn Store>,
    connector: Arc<dyn PlatformConnector>,
}

impl ApprovalHandler {
    pub fn new(store: Arc<dyn Store>, connector: Arc<dyn PlatformConnector>) -> Self {
        Self { store, connector }
    }

    pub async fn handle(&self, event: ActionEvent) -> GraderResult<ApprovalOutcome> {
        match event {
            ActionEvent::GradeSelected {
                submission_id,
                grade_token,
            } => self.approve(submission_id, grade_token).await,
            ActionEvent::RegenerateRequested { submission_id } => {
                self.regenerate(submission_id).await
            }
        }
    }

    async fn load(&self, submission_id: u64) -> GraderResult<Submission> {
        self.store
            .submission(submission_id)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound {
                    entity: "submission",
                    id: submission_id,
                }
                .into()
            })
    }

    async fn approve(&self, submission_id: u64, grade: String) -> GraderResult<ApprovalOutcome> {
        let mut submission = self.load(submission_id).await?;
        // 回写之前先拒绝
        transition(Some(submission.status), Event::HumanApproved)?;

        let orphaned = GraderError::Orphaned { submission_id };
        let assignment_id = submission.assignment_id.ok_or(orphaned)?;
        let assignment = self
            .store
            .assignment(assignment_id)
            .await?
            .ok_or(GraderError::Orphaned { submission_id })?;
        let platform = match assignment.platform_id {
            Some(platform_id) => self.store.platform(platform_id).await?,
            None => None,
        }
        .ok_or(GraderError::MissingField {
            submission_id,
            field: "platform",
        })?;
        let student_nid = submission.student_nid.ok_or(GraderError::MissingField {
            submission_id,
            field: "student_nid",
        })?;

        let client = self.connector.connect(&platform)?;
        client
            .post_grade(
                assignment.course_id,
                assignment.assignment_id,
                student_nid,
                &grade,
                &submission.feedback,
            )
            .await?;

        submission.grade = Some(grade.clone());
        submission.apply(Event::HumanApproved)?;
        self.store.update_submission(&submission).await?;
        info!(
            "✅ 成绩 {} 已回写: {}（提交 {}）",
            grade, submission.student_name, submission_id
        );

        Ok(ApprovalOutcome::GradePosted {
            submission_id,
            grade,
            student_name: submission.student_name,
        })
    }

    async fn regenerate(&self, submission_id: u64) -> GraderResult<ApprovalOutcome> {
        let mut submission = self.load(submission_id).await?;
        submission.apply(Event::HumanRequestedRegeneration)?;
        self.store.update_submission(&submission).await?;
        info!("🔄 提交 {} 已重新排队评分", submission_id);
        Ok(ApprovalOutcome::RegenerationQueued { submission_id })
    }
}

/// 长轮询机器人获取审核动作，直到任务被中止
pub async fn listen_for_actions(bot: Arc<TelegramClient>, handler: Arc<ApprovalHandler>) {
    info!("👂 开始监听审核动作");
    let mut offset = 0i64;

    loop {
        let updates = match bot.get_updates(offset, LONG_POLL_SECS).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!("轮询 updates 失败: {}", e);
                sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            if let Some(query) = update.callback_query {
                handle_callback(&bot, &handler, query).await;
            } else if let Some(message) = update.message {
                handle_message(&bot, message).await;
            }
        }
    }
}

async fn handle_callback(bot: &TelegramClient, handler: &ApprovalHandler, query: CallbackQuery) {
    let data = query.data.as_deref().unwrap_or_default();
    debug!("回调 {} 来自 {}: {}", query.id, query.from.id, data);

    let reply = match ActionEvent::parse(data) {
        Err(e) => {
            warn!("{}", e);
            "Unknown action.".to_string()
        }
        Ok(event) => match handler.handle(event).await {
            Ok(outcome) => {
                if let Some(message) = &query.message {
                    if let Err(e) = bot.clear_keyboard(message.chat.id, message.message_id).await {
                        warn!("移除按钮失败: {}", e);
                    }
                }
                outcome.reply_text()
            }
            Err(e) if e.is_contract_violation() => {
                error!("❌ 审核动作被拒绝: {}", e);
                "This submission can no longer be changed.".to_string()
            }
            Err(e) => {
                error!("❌ 审核动作执行失败: {}", e);
                "Something went wrong, the grade was not posted.".to_string()
            }
        },
    };

    if let Err(e) = bot.answer_callback_query(&query.id, &reply).await {
        warn!("回应回调 {} 失败: {}", query.id, e);
    }
}

/// `/start` 告诉审核人要写进种子文件的 chat id
async fn handle_message(bot: &TelegramClient, message: Message) {
    let Some(text) = message.text.as_deref() else {
        return;
    };
    if !text.starts_with("/start") {
        return;
    }

    let name = message
        .from
        .as_ref()
        .map(|u| u.first_name.as_str())
        .unwrap_or("there");
    let reply = format!(
        "Hello {}!\nYour chat ID is <code>{}</code>.",
        escape_html(name),
        message.chat.id
    );
    if let Err(e) = bot.send_text(message.chat.id, &reply).await {
        warn!("回应 /start 失败: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_name_the_decision() {
        let posted = ApprovalOutcome::GradePosted {
            submission_id: 3,
            grade: "2".to_string(),
            student_name: "Ann Lee".to_string(),
        };
        assert_eq!(
            posted.reply_text(),
            "You selected 2 for Ann Lee. Grade posted successfully."
        );
        assert!(ApprovalOutcome::RegenerationQueued { submission_id: 3 }
            .reply_text()
            .contains("submission 3"));
    }
}
