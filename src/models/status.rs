use std::fmt;

use serde::{Deserialize, Serialize};

/// 提交状态
///
/// `New → Graded → VerificationSent → GradePosted`，另有回退边
/// `Graded → New` 和 `VerificationSent → New`，都经由
/// [`crate::workflow::transition`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// 已拉取，待评分
    New,
    /// 已评分，待通知
    Graded,
    /// 已发给审核人
    VerificationSent,
    /// 成绩已回传平台
    GradePosted,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::New,
        Status::Graded,
        Status::VerificationSent,
        Status::GradePosted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Graded => "graded",
            Status::VerificationSent => "verification_sent",
            Status::GradePosted => "grade_posted",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Status::GradePosted
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&Status::VerificationSent).unwrap();
        assert_eq!(json, "\"verification_sent\"");
        let back: Status = serde_json::from_str("\"grade_posted\"").unwrap();
        assert_eq!(back, Status::GradePosted);
    }

    #[test]
    fn only_grade_posted_is_terminal() {
        let terminal: Vec<Status> = Status::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![Status::GradePosted]);
    }
}
