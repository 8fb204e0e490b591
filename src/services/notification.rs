//! 审核通知能力
//!
//! 通知包含建议成绩、每个等级一个快捷按钮以及一个重新生成按钮。
//! 按钮动作以短字符串编码，解析回 [`ActionEvent`]

use async_trait::async_trait;

use crate::error::NotificationError;
use crate::models::{Assignment, RubricGrade, Submission};
use crate::utils::escape_html;

/// 审核人的决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEvent {
    GradeSelected {
        submission_id: u64,
        grade_token: String,
    },
    RegenerateRequested {
        submission_id: u64,
    },
}

impl ActionEvent {
    pub fn submission_id(&self) -> u64 {
        match self {
            ActionEvent::GradeSelected { submission_id, .. }
            | ActionEvent::RegenerateRequested { submission_id } => *submission_id,
        }
    }

    /// `grade_<submissionId>_<gradeToken>` 或 `regen_<submissionId>`
    pub fn encode(&self) -> String {
        match self {
            ActionEvent::GradeSelected {
                submission_id,
                grade_token,
            } => format!("grade_{}_{}", submission_id, grade_token),
            ActionEvent::RegenerateRequested { submission_id } => {
                format!("regen_{}", submission_id)
            }
        }
    }

    pub fn parse(data: &str) -> Result<Self, NotificationError> {
        let invalid = || NotificationError::InvalidAction(data.to_string());

        if let Some(rest) = data.strip_prefix("grade_") {
            let (id, token) = rest.split_once('_').ok_or_else(invalid)?;
            if token.is_empty() {
                return Err(invalid());
            }
            return Ok(ActionEvent::GradeSelected {
                submission_id: id.parse().map_err(|_| invalid())?,
                grade_token: token.to_string(),
            });
        }
        if let Some(id) = data.strip_prefix("regen_") {
            return Ok(ActionEvent::RegenerateRequested {
                submission_id: id.parse().map_err(|_| invalid())?,
            });
        }
        Err(invalid())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickAction {
    pub label: String,
    pub event: ActionEvent,
}

const LABEL_LIMIT: usize = 10;

/// 每个等级一个动作（升序），最后是重新生成
pub fn quick_actions(submission_id: u64, grades: &[RubricGrade]) -> Vec<QuickAction> {
    let mut ordered: Vec<&RubricGrade> = grades.iter().collect();
    ordered.sort_by_key(|g| g.grade_number);

    let mut actions: Vec<QuickAction> = ordered
        .into_iter()
        .map(|g| QuickAction {
            label: grade_label(g),
            event: ActionEvent::GradeSelected {
                submission_id,
                grade_token: g.token(),
            },
        })
        .collect();

    actions.push(QuickAction {
        label: "🔄 Regenerate".to_string(),
        event: ActionEvent::RegenerateRequested { submission_id },
    });
    actions
}

fn grade_label(grade: &RubricGrade) -> String {
    let short: String = grade.short_description.chars().take(LABEL_LIMIT).collect();
    let ellipsis = if grade.short_description.chars().count() > LABEL_LIMIT {
        "..."
    } else {
        ""
    };
    format!("{}: {}{}", grade.grade_number, short, ellipsis)
}

/// 评分通知的 HTML 正文
#[derive(Debug, Clone)]
pub struct GradingNotice<'a> {
    pub submission: &'a Submission,
    pub assignment: &'a Assignment,
    pub platform_url: Option<&'a str>,
}

impl GradingNotice<'_> {
    /// 平台上该学生提交的批改页面
    pub fn speed_grader_url(&self) -> Option<String> {
        let base = self.platform_url?;
        let nid = self.submission.student_nid?;
        Some(format!(
            "{}/courses/{}/gradebook/speed_grader?assignment_id={}&student_id={}",
            base.trim_end_matches('/'),
            self.assignment.course_id,
            self.assignment.assignment_id,
            nid
        ))
    }

    pub fn render(&self) -> String {
        let s = self.submission;
        let mut text = format!(
            "<strong>{}</strong> ({})",
            escape_html(&s.student_name),
            escape_html(&s.student_id)
        );
        if let Some(url) = self.speed_grader_url() {
            let url = escape_html(&url);
            text.push_str(&format!("\n<a href=\"{url}\">{url}</a>"));
        }

        let similarity = s
            .similarity_score
            .map(|score| score.to_string())
            .unwrap_or_else(|| "n/a".to_string());
        text.push_str(&format!(
            "\n\n<strong>Similarity Score:</strong> {}\n<strong>Grade:</strong> {}\n<strong>Feedback:</strong> {}",
            similarity,
            escape_html(s.grade.as_deref().unwrap_or("")),
            escape_html(&s.feedback)
        ));
        text
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// 把带 `actions` 的 `text` 发给 `recipient`
    async fn send_interactive_message(
        &self,
        recipient: i64,
        text: &str,
        actions: &[QuickAction],
    ) -> Result<(), NotificationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{initial_watermark, Status};

    fn grade(number: i64, label: &str) -> RubricGrade {
        RubricGrade {
            id: number as u64,
            assignment_id: 1,
            grade_number: number,
            short_description: label.to_string(),
            detailed_description: None,
        }
    }

    #[test]
    fn action_wire_format() {
        let pick = ActionEvent::GradeSelected {
            submission_id: 17,
            grade_token: "2".to_string(),
        };
        assert_eq!(pick.encode(), "grade_17_2");
        assert_eq!(ActionEvent::parse("grade_17_2").unwrap(), pick);

        let regen = ActionEvent::RegenerateRequested { submission_id: 17 };
        assert_eq!(regen.encode(), "regen_17");
        assert_eq!(ActionEvent::parse("regen_17").unwrap(), regen);
    }

    #[test]
    fn malformed_actions_are_rejected() {
        for data in ["grade_17", "grade_x_1", "grade_17_", "regen_", "regen_abc", "approve_1", ""] {
            assert!(
                matches!(ActionEvent::parse(data), Err(NotificationError::InvalidAction(_))),
                "{data:?} should not parse"
            );
        }
    }

    #[test]
    fn actions_follow_grade_order_and_end_with_regenerate() {
        let grades = [grade(2, "Minor issues in logic"), grade(1, "Excellent")];
        let actions = quick_actions(5, &grades);

        let labels: Vec<&str> = actions.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, vec!["1: Excellent", "2: Minor issu...", "🔄 Regenerate"]);
        assert_eq!(
            actions.last().unwrap().event,
            ActionEvent::RegenerateRequested { submission_id: 5 }
        );
    }

    #[test]
    fn notice_links_to_speed_grader_and_escapes() {
        let assignment = Assignment {
            id: 1,
            user_id: Some(1),
            platform_id: Some(1),
            course_id: 100,
            assignment_id: 2000,
            last_retrieved: initial_watermark(),
            description: None,
            rubric: None,
        };
        let submission = Submission {
            id: 5,
            assignment_id: Some(1),
            student_id: "ann".to_string(),
            student_name: "Ann <Lee>".to_string(),
            student_uid: None,
            student_nid: Some(77),
            submission_time: initial_watermark(),
            preview_url: None,
            similarity_score: Some(0.25),
            grade: Some("1".to_string()),
            content: String::new(),
            feedback: "Well done.".to_string(),
            status: Status::Graded,
        };
        let notice = GradingNotice {
            submission: &submission,
            assignment: &assignment,
            platform_url: Some("https://canvas.example.edu/"),
        };

        let text = notice.render();
        assert!(text.starts_with("<strong>Ann &lt;Lee&gt;</strong> (ann)"));
        assert!(text.contains(
            "https://canvas.example.edu/courses/100/gradebook/speed_grader?assignment_id=2000&amp;student_id=77"
        ));
        assert!(text.contains("<strong>Similarity Score:</strong> 0.25"));
        assert!(text.contains("<strong>Grade:</strong> 1"));
        assert!(text.ends_with("<strong>Feedback:</strong> Well done."));
    }
}
