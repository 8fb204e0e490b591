//! 评分循环 - 编排层
//!
//! 每一轮按顺序执行三个阶段，每个阶段内逐条处理：
//!
//! 1. **拉取**：从每个平台拉取新提交，然后推进各作业的水位线
//! 2. **评分**：把每条 `New` 提交发给聊天会话评分
//! 3. **通知**：把每条 `Graded` 提交发给负责的审核人
//!
//! 单个平台、单条提交失败只记日志，本轮继续。
//! 只有非法状态迁移会中断整轮。

use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::automation::ChatSession;
use crate::error::{GraderError, GraderResult, StoreError};
use crate::models::{Assignment, RubricGrade, Status, Submission};
use crate::services::{
    quick_actions, GradingNotice, Notifier, PlatformClient, PlatformConnector, Store,
};
use crate::utils::logging::{log_cycle_report, log_phase, truncate_text};
use crate::workflow::{
    compose_prompt, is_declared_token, parse_grading_response, rubric_listing, transition, Event,
    ParsedGrade,
};

/// 单轮统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub retrieved: usize,
    pub duplicates: usize,
    pub platform_failures: usize,
    pub graded: usize,
    pub grade_failures: usize,
    pub notified: usize,
    pub notify_failures: usize,
    /// 作业没有审核人的已评分提交
    pub notify_skipped: usize,
}

/// 评分编排器
///
/// 职责：
/// - 持有唯一的聊天会话
/// - 按阶段调度平台、存储和通知
/// - 不处理页面细节
pub struct GradingOrchestrator {
    store: Arc<dyn Store>,
    connector: Arc<dyn PlatformConnector>,
    notifier: Arc<dyn Notifier>,
    chat: Box<dyn ChatSession>,
    interval: Duration,
    cycles: u64,
}

impl GradingOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        connector: Arc<dyn PlatformConnector>,
        notifier: Arc<dyn Notifier>,
        chat: Box<dyn ChatSession>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            connector,
            notifier,
            chat,
            interval,
            cycles: 0,
        }
    }

    /// 持续循环，每轮之间休眠 `interval`
    ///
    /// 只有遇到非法状态迁移才返回。
    pub async fn run_forever(&mut self) -> GraderResult<()> {
        loop {
            self.cycles += 1;
            let report = self.run_cycle().await.map_err(|e| {
                error!("❌ 第 {} 轮中止: {}", self.cycles, e);
                e
            })?;
            log_cycle_report(self.cycles, &report);

            info!("💤 {} 秒后开始下一轮", self.interval.as_secs());
            sleep(self.interval).await;
        }
    }

    /// 执行一轮三个阶段
    pub async fn run_cycle(&mut self) -> GraderResult<CycleReport> {
        let mut report = CycleReport::default();

        log_phase(1, "拉取新提交");
        let result = self.retrieve(&mut report).await;
        isolate("拉取", result)?;

        log_phase(2, "评分");
        let result = self.grade(&mut report).await;
        isolate("评分", result)?;

        log_phase(3, "发送评分通知");
        let result = self.notify(&mut report).await;
        isolate("通知", result)?;

        Ok(report)
    }

    /// 检查种子里的作业在平台上是否可见
    ///
    /// 顺便用平台上的描述补全缺失的描述。返回平台上找不到的作业数；
    /// 连不上的平台只记日志后跳过。
    pub async fn verify_assignments(&self) -> GraderResult<usize> {
        let assignments = self.store.assignments().await?;
        let mut missing = 0;

        for platform in self.store.platforms().await? {
            let seeded: Vec<&Assignment> = assignments
                .iter()
                .filter(|a| a.platform_id == Some(platform.id))
                .collect();
            if seeded.is_empty() {
                continue;
            }

            let client = match self.connector.connect(&platform) {
                Ok(client) => client,
                Err(e) => {
                    warn!("⚠️ 无法检查平台 {}: {}", platform.name, e);
                    continue;
                }
            };
            match self.verify_on(client.as_ref(), &seeded).await {
                Ok(count) => missing += count,
                Err(GraderError::Platform(e)) => {
                    warn!("⚠️ 无法检查平台 {}: {}", platform.name, e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(missing)
    }

    async fn verify_on(
        &self,
        client: &dyn PlatformClient,
        assignments: &[&Assignment],
    ) -> GraderResult<usize> {
        let courses = client.list_courses().await?;
        let mut listings = HashMap::new();
        let mut missing = 0;

        for assignment in assignments {
            if !courses.iter().any(|c| c.id == assignment.course_id) {
                warn!(
                    "⚠️ 作业 {}: 当前 API key 看不到课程 {}",
                    assignment.id, assignment.course_id
                );
                missing += 1;
                continue;
            }

            if !listings.contains_key(&assignment.course_id) {
                let listed = client.list_assignments(assignment.course_id).await?;
                listings.insert(assignment.course_id, listed);
            }
            let found = listings
                .get(&assignment.course_id)
                .and_then(|listed| listed.iter().find(|s| s.id == assignment.assignment_id));

            match found {
                None => {
                    warn!(
                        "⚠️ 作业 {}: 课程 {} 中没有平台作业 {}",
                        assignment.id, assignment.course_id, assignment.assignment_id
                    );
                    missing += 1;
                }
                Some(summary) => {
                    debug!("作业 {} 对应 \"{}\"", assignment.id, summary.name);
                    if !assignment.has_description() {
                        if let Some(description) = summary.description.clone() {
                            self.store
                                .set_assignment_description(assignment.id, description)
                                .await?;
                        }
                    }
                }
            }
        }
        Ok(missing)
    }

    /// 释放聊天会话
    pub async fn close(&mut self) {
        self.chat.close().await;
    }

    async fn retrieve(&self, report: &mut CycleReport) -> GraderResult<()> {
        let assignments = self.store.assignments().await?;

        for platform in self.store.platforms().await? {
            let owned: Vec<&Assignment> = assignments
                .iter()
                .filter(|a| a.platform_id == Some(platform.id) && a.user_id.is_some())
                .collect();
            if owned.is_empty() {
                debug!("平台 {} 没有已分配的作业", platform.name);
                continue;
            }

            info!("🔍 检查平台 {}（{} 个作业）", platform.name, owned.len());
            let client = match self.connector.connect(&platform) {
                Ok(client) => client,
                Err(e) => {
                    warn!("⚠️ 跳过平台 {}: {}", platform.name, e);
                    report.platform_failures += 1;
                    continue;
                }
            };

            match self.retrieve_from(client.as_ref(), &owned, report).await {
                Ok(()) => {}
                Err(GraderError::Platform(e)) => {
                    warn!("⚠️ 平台 {} 出错，本轮跳过: {}", platform.name, e);
                    report.platform_failures += 1;
                }
                Err(e) => return Err(e),
            }
        }

        for assignment in &assignments {
            if let Some(latest) = self.store.latest_submission_time(assignment.id).await? {
                let candidate = latest + ChronoDuration::seconds(1);
                self.store.advance_watermark(assignment.id, candidate).await?;
            }
        }
        Ok(())
    }

    async fn retrieve_from(
        &self,
        client: &dyn PlatformClient,
        assignments: &[&Assignment],
        report: &mut CycleReport,
    ) -> GraderResult<()> {
        for assignment in assignments {
            let raws = client
                .list_submissions_since(
                    assignment.course_id,
                    &[assignment.assignment_id],
                    assignment.last_retrieved,
                )
                .await?;
            debug!(
                "作业 {}: {} 之后有 {} 条提交",
                assignment.id,
                assignment.last_retrieved,
                raws.len()
            );

            let mut has_description = assignment.has_description();
            for raw in raws {
                if !has_description {
                    if let Some(description) = raw.assignment_description.clone() {
                        self.store
                            .set_assignment_description(assignment.id, description)
                            .await?;
                        has_description = true;
                    }
                }

                let new = raw.into_new(assignment.id);
                if self.store.find_submission(&new.natural_key()).await?.is_some() {
                    report.duplicates += 1;
                    continue;
                }

                transition(None, Event::RetrieveCreate)?;
                match self.store.insert_submission(new).await {
                    Ok(stored) => {
                        info!("📥 新提交 {}，学生 {}", stored.id, stored.student_name);
                        report.retrieved += 1;
                    }
                    Err(StoreError::DuplicateNaturalKey { .. }) => report.duplicates += 1,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    async fn grade(&mut self, report: &mut CycleReport) -> GraderResult<()> {
        let pending = self.store.submissions_with_status(Status::New).await?;
        info!("找到 {} 条待评分提交", pending.len());

        for submission in pending {
            let id = submission.id;
            let result = self.grade_submission(submission, report).await;
            if matches!(&result, Err(e) if !e.is_contract_violation()) {
                report.grade_failures += 1;
            }
            isolate(&format!("提交 {} 评分", id), result)?;
        }
        Ok(())
    }

    /// 评分失败时提交保持 `New`，下一轮重试；只有写库失败才返回 Err
    async fn grade_submission(
        &mut self,
        mut submission: Submission,
        report: &mut CycleReport,
    ) -> GraderResult<()> {
        info!("📝 评分提交 {}（{}）", submission.id, submission.student_name);
        match self.grade_one(&submission).await {
            Ok((parsed, grades)) => {
                if !is_declared_token(&grades, &parsed.grade) {
                    warn!(
                        "提交 {}: 等级 {:?} 不在评分标准中，留给审核人修改",
                        submission.id, parsed.grade
                    );
                }
                submission.record_grade(parsed)?;
                self.store.update_submission(&submission).await?;
                info!(
                    "✓ 提交 {} 评分完成: {}",
                    submission.id,
                    submission.grade.as_deref().unwrap_or_default()
                );
                report.graded += 1;
            }
            Err(e) if e.is_contract_violation() => return Err(e),
            Err(e) => {
                warn!("⚠️ 提交 {} 评分失败，保持 new: {}", submission.id, e);
                submission.apply(Event::GradeFailed)?;
                report.grade_failures += 1;
            }
        }
        Ok(())
    }

    async fn grade_one(
        &mut self,
        submission: &Submission,
    ) -> GraderResult<(ParsedGrade, Vec<RubricGrade>)> {
        let assignment = self.owning_assignment(submission).await?;
        let grades = self.store.rubric_grades(assignment.id).await?;
        let rubric = rubric_listing(&grades, assignment.rubric.as_deref());
        let prompt = compose_prompt(
            assignment.description.as_deref().unwrap_or_default(),
            &rubric,
            &submission.content,
        );

        let response = self.chat.submit_prompt(&prompt).await?;
        debug!("提交 {} 的回复: {}", submission.id, truncate_text(&response, 200));
        Ok((parse_grading_response(&response)?, grades))
    }

    async fn notify(&self, report: &mut CycleReport) -> GraderResult<()> {
        let graded = self.store.submissions_with_status(Status::Graded).await?;
        info!("找到 {} 条待通知提交", graded.len());

        for submission in graded {
            let id = submission.id;
            let result = self.notify_submission(submission, report).await;
            if matches!(&result, Err(e) if !e.is_contract_violation()) {
                report.notify_failures += 1;
            }
            isolate(&format!("提交 {} 通知", id), result)?;
        }
        Ok(())
    }

    async fn notify_submission(
        &self,
        mut submission: Submission,
        report: &mut CycleReport,
    ) -> GraderResult<()> {
        let assignment = match self.owning_assignment(&submission).await {
            Ok(assignment) => assignment,
            Err(GraderError::Orphaned { submission_id }) => {
                info!("提交 {} 没有所属作业，不发送", submission_id);
                report.notify_skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let owner = match assignment.user_id {
            Some(user_id) => self.store.user(user_id).await?,
            None => None,
        };
        let Some(owner) = owner else {
            info!(
                "作业 {} 没有审核人，提交 {} 不发送",
                assignment.id, submission.id
            );
            report.notify_skipped += 1;
            return Ok(());
        };

        let grades = self.store.rubric_grades(assignment.id).await?;
        let platform_url = match assignment.platform_id {
            Some(platform_id) => self.store.platform(platform_id).await?.map(|p| p.api_url),
            None => None,
        };
        let text = GradingNotice {
            submission: &submission,
            assignment: &assignment,
            platform_url: platform_url.as_deref(),
        }
        .render();
        let actions = quick_actions(submission.id, &grades);

        match self
            .notifier
            .send_interactive_message(owner.chat_id, &text, &actions)
            .await
        {
            Ok(()) => {
                submission.apply(Event::NotifySucceeded)?;
                self.store.update_submission(&submission).await?;
                info!("📨 提交 {} 已发送到 chat {}", submission.id, owner.chat_id);
                report.notified += 1;
            }
            Err(e) => {
                warn!("⚠️ 提交 {} 通知失败，保持 graded: {}", submission.id, e);
                submission.apply(Event::NotifyFailed)?;
                report.notify_failures += 1;
            }
        }
        Ok(())
    }

    async fn owning_assignment(&self, submission: &Submission) -> GraderResult<Assignment> {
        let orphaned = GraderError::Orphaned {
            submission_id: submission.id,
        };
        let Some(assignment_id) = submission.assignment_id else {
            return Err(orphaned);
        };
        self.store.assignment(assignment_id).await?.ok_or(orphaned)
    }
}

/// 普通失败只记日志；非法状态迁移继续向上抛
fn isolate(scope: &str, result: GraderResult<()>) -> GraderResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_contract_violation() => {
            error!("❌ {} 出现非法状态迁移: {}", scope, e);
            Err(e)
        }
        Err(e) => {
            error!("❌ {} 失败: {}", scope, e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvalidTransition;

    #[test]
    fn isolate_swallows_ordinary_failures_only() {
        let ordinary: GraderResult<()> = Err(GraderError::Orphaned { submission_id: 1 });
        assert!(isolate("评分", ordinary).is_ok());

        let violation: GraderResult<()> = Err(InvalidTransition {
            from: Some(Status::GradePosted),
            event: Event::GradeFailed,
        }
        .into());
        assert!(isolate("评分", violation).is_err());
    }
}
