//! 课程平台能力
//!
//! 提交从这里来，审核通过的成绩回写到这里。具体 REST 客户端在 `clients/`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::PlatformApiError;
use crate::models::{NewSubmission, Platform};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseSummary {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentSummary {
    pub id: i64,
    pub course_id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// 平台返回的提交，HTML 已清理
#[derive(Debug, Clone, PartialEq)]
pub struct RawSubmission {
    /// 平台作业 id
    pub assignment_id: i64,
    pub student_id: String,
    pub student_name: String,
    pub student_uid: Option<String>,
    pub student_nid: Option<i64>,
    pub submitted_at: DateTime<Utc>,
    pub preview_url: Option<String>,
    pub similarity_score: Option<f64>,
    pub body: String,
    /// 平台带回的作业描述（已清理）
    pub assignment_description: Option<String>,
}

impl RawSubmission {
    /// 绑定到本地作业，用于入库
    pub fn into_new(self, local_assignment_id: u64) -> NewSubmission {
        NewSubmission {
            assignment_id: local_assignment_id,
            student_id: self.student_id,
            student_name: self.student_name,
            student_uid: self.student_uid,
            student_nid: self.student_nid,
            submission_time: self.submitted_at,
            preview_url: self.preview_url,
            similarity_score: self.similarity_score,
            content: self.body,
        }
    }
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn list_courses(&self) -> Result<Vec<CourseSummary>, PlatformApiError>;

    async fn list_assignments(
        &self,
        course_id: i64,
    ) -> Result<Vec<AssignmentSummary>, PlatformApiError>;

    /// 一门课中指定作业在 `since` 之后的提交
    async fn list_submissions_since(
        &self,
        course_id: i64,
        assignment_ids: &[i64],
        since: DateTime<Utc>,
    ) -> Result<Vec<RawSubmission>, PlatformApiError>;

    /// 回写成绩，`feedback` 非空时作为评论一起提交
    async fn post_grade(
        &self,
        course_id: i64,
        assignment_id: i64,
        student_nid: i64,
        grade: &str,
        feedback: &str,
    ) -> Result<(), PlatformApiError>;
}

/// 为已存储的平台记录创建客户端
pub trait PlatformConnector: Send + Sync {
    /// 没有客户端的平台类型返回 [`PlatformApiError::Unsupported`]
    fn connect(&self, platform: &Platform) -> Result<Arc<dyn PlatformClient>, PlatformApiError>;
}
