use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Status;

/// 去重键：`(作业, 学生, 提交时间)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub assignment_id: Option<u64>,
    pub student_id: String,
    pub submission_time: DateTime<Utc>,
}

/// 学生提交
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: u64,
    /// 作业被删除后为 `None`
    pub assignment_id: Option<u64>,
    pub student_id: String,
    pub student_name: String,
    /// 学校学号（SIS）
    pub student_uid: Option<String>,
    /// 平台数字用户 id，回传成绩需要
    pub student_nid: Option<i64>,
    pub submission_time: DateTime<Utc>,
    pub preview_url: Option<String>,
    pub similarity_score: Option<f64>,
    pub grade: Option<String>,
    pub content: String,
    #[serde(default)]
    pub feedback: String,
    pub status: Status,
}

impl Submission {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            assignment_id: self.assignment_id,
            student_id: self.student_id.clone(),
            submission_time: self.submission_time,
        }
    }
}

/// 新拉取提交的插入数据
///
/// id 由存储分配，状态总是从 [`Status::New`] 开始。
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubmission {
    pub assignment_id: u64,
    pub student_id: String,
    pub student_name: String,
    pub student_uid: Option<String>,
    pub student_nid: Option<i64>,
    pub submission_time: DateTime<Utc>,
    pub preview_url: Option<String>,
    pub similarity_score: Option<f64>,
    pub content: String,
}

impl NewSubmission {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            assignment_id: Some(self.assignment_id),
            student_id: self.student_id.clone(),
            submission_time: self.submission_time,
        }
    }

    pub fn into_submission(self, id: u64) -> Submission {
        Submission {
            id,
            assignment_id: Some(self.assignment_id),
            student_id: self.student_id,
            student_name: self.student_name,
            student_uid: self.student_uid,
            student_nid: self.student_nid,
            submission_time: self.submission_time,
            preview_url: self.preview_url,
            similarity_score: self.similarity_score,
            grade: None,
            content: self.content,
            feedback: String::new(),
            status: Status::New,
        }
    }
}
