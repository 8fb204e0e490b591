use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 尚未拉取过时的水位线（2000-01-01T00:00:00Z）
pub fn initial_watermark() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(946_684_800, 0).unwrap_or_default()
}

/// 课程平台上的一个作业
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: u64,
    /// 负责审核的用户，通知发给他们
    pub user_id: Option<u64>,
    pub platform_id: Option<u64>,
    /// 平台课程 id
    pub course_id: i64,
    /// 平台作业 id
    pub assignment_id: i64,
    /// 最后一条已入库提交的时间 +1s，只进不退
    #[serde(default = "initial_watermark")]
    pub last_retrieved: DateTime<Utc>,
    /// 题目描述，写进评分 prompt
    pub description: Option<String>,
    /// 没有结构化评分等级时使用的文本评分标准
    pub rubric: Option<String>,
}

impl Assignment {
    /// 推进水位线；`candidate` 不更新时返回 `false`
    pub fn advance_watermark(&mut self, candidate: DateTime<Utc>) -> bool {
        if candidate > self.last_retrieved {
            self.last_retrieved = candidate;
            true
        } else {
            false
        }
    }

    pub fn has_description(&self) -> bool {
        self.description
            .as_deref()
            .map(|d| !d.trim().is_empty())
            .unwrap_or(false)
    }
}

/// 评分标准中的一个等级
///
/// `(assignment_id, grade_number)` 唯一。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricGrade {
    pub id: u64,
    pub assignment_id: u64,
    pub grade_number: i64,
    pub short_description: String,
    #[serde(default)]
    pub detailed_description: Option<String>,
}

impl RubricGrade {
    /// `"<number>: <short label>"`
    pub fn rubric_line(&self) -> String {
        format!("{}: {}", self.grade_number, self.short_description)
    }

    /// 要求聊天服务回答的等级标记
    pub fn token(&self) -> String {
        self.grade_number.to_string()
    }
}

/// 每个等级一行 `"<n>: <label>"`，按等级升序
pub fn format_rubric(grades: &[RubricGrade]) -> String {
    let mut ordered: Vec<&RubricGrade> = grades.iter().collect();
    ordered.sort_by_key(|g| g.grade_number);
    ordered
        .iter()
        .map(|g| g.rubric_line())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn formats_rubric_lines_in_grade_order() {
        let grades = vec![grade(2, "Minor issues"), grade(1, "Excellent")];
        assert_eq!(format_rubric(&grades), "1: Excellent\n2: Minor issues");
    }

    #[test]
    fn empty_rubric_formats_to_empty_string() {
        assert_eq!(format_rubric(&[]), "");
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let mut assignment = Assignment {
            id: 1,
            user_id: None,
            platform_id: None,
            course_id: 10,
            assignment_id: 20,
            last_retrieved: initial_watermark(),
            description: None,
            rubric: None,
        };
        let later = initial_watermark() + chrono::Duration::days(1);
        assert!(assignment.advance_watermark(later));
        assert!(!assignment.advance_watermark(later));
        assert!(!assignment.advance_watermark(initial_watermark()));
        assert_eq!(assignment.last_retrieved, later);
    }

    #[test]
    fn initial_watermark_is_year_2000() {
        assert_eq!(
            initial_watermark().to_rfc3339(),
            "2000-01-01T00:00:00+00:00"
        );
    }
}
