//! 提交生命周期状态机
//!
//! | from              | event                      | to                |
//! |-------------------|----------------------------|-------------------|
//! | (absent)          | RetrieveCreate             | New               |
//! | New               | GradeSucceeded             | Graded            |
//! | New               | GradeFailed                | New               |
//! | Graded            | NotifySucceeded            | VerificationSent  |
//! | Graded            | NotifyFailed               | Graded            |
//! | VerificationSent  | HumanApproved              | GradePosted       |
//! | VerificationSent  | HumanRequestedRegeneration | New               |
//!
//! 其余组合都是 [`InvalidTransition`]

use crate::error::InvalidTransition;
use crate::models::{Status, Submission};
use crate::workflow::grading_prompt::ParsedGrade;

/// 提交上发生的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    RetrieveCreate,
    GradeSucceeded,
    GradeFailed,
    NotifySucceeded,
    NotifyFailed,
    HumanApproved,
    HumanRequestedRegeneration,
}

impl Event {
    pub const ALL: [Event; 7] = [
        Event::RetrieveCreate,
        Event::GradeSucceeded,
        Event::GradeFailed,
        Event::NotifySucceeded,
        Event::NotifyFailed,
        Event::HumanApproved,
        Event::HumanRequestedRegeneration,
    ];
}

/// 计算 `event` 之后的状态；`current == None` 表示提交尚不存在
pub fn transition(current: Option<Status>, event: Event) -> Result<Status, InvalidTransition> {
    use Event::*;
    use Status::*;

    match (current, event) {
        (None, RetrieveCreate) => Ok(New),
        (Some(New), GradeSucceeded) => Ok(Graded),
        (Some(New), GradeFailed) => Ok(New),
        (Some(Graded), NotifySucceeded) => Ok(VerificationSent),
        (Some(Graded), NotifyFailed) => Ok(Graded),
        (Some(VerificationSent), HumanApproved) => Ok(GradePosted),
        (Some(VerificationSent), HumanRequestedRegeneration) => Ok(New),
        (from, event) => Err(InvalidTransition { from, event }),
    }
}

impl Submission {
    /// 应用 `event`，包括对成绩和评语的修改
    pub fn apply(&mut self, event: Event) -> Result<Status, InvalidTransition> {
        let next = transition(Some(self.status), event)?;
        if event == Event::HumanRequestedRegeneration {
            self.grade = None;
            self.feedback.clear();
        }
        self.status = next;
        Ok(next)
    }

    /// 带着解析结果的 `GradeSucceeded`
    pub fn record_grade(&mut self, parsed: ParsedGrade) -> Result<Status, InvalidTransition> {
        let next = transition(Some(self.status), Event::GradeSucceeded)?;
        self.grade = Some(parsed.grade);
        self.feedback = parsed.feedback;
        self.status = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const VALID: [(Option<Status>, Event, Status); 7] = [
        (None, Event::RetrieveCreate, Status::New),
        (Some(Status::New), Event::GradeSucceeded, Status::Graded),
        (Some(Status::New), Event::GradeFailed, Status::New),
        (Some(Status::Graded), Event::NotifySucceeded, Status::VerificationSent),
        (Some(Status::Graded), Event::NotifyFailed, Status::Graded),
        (Some(Status::VerificationSent), Event::HumanApproved, Status::GradePosted),
        (
            Some(Status::VerificationSent),
            Event::HumanRequestedRegeneration,
            Status::New,
        ),
    ];

    fn submission(status: Status) -> Submission {
        Submission {
            id: 1,
            assignment_id: Some(1),
            student_id: "s1".into(),
            student_name: "Ada".into(),
            student_uid: None,
            student_nid: Some(11),
            submission_time: Utc::now(),
            preview_url: None,
            similarity_score: None,
            grade: Some("2".into()),
            content: "answer".into(),
            feedback: "Needs tests.".into(),
            status,
        }
    }

    #[test]
    fn valid_pairs_match_the_table() {
        for (from, event, to) in VALID {
            assert_eq!(transition(from, event), Ok(to), "{from:?} + {event:?}");
        }
    }

    #[test]
    fn every_other_pair_is_rejected() {
        let states = std::iter::once(None).chain(Status::ALL.into_iter().map(Some));
        let mut rejected = 0;
        for from in states {
            for event in Event::ALL {
                let listed = VALID.iter().any(|(f, e, _)| *f == from && *e == event);
                if listed {
                    continue;
                }
                assert_eq!(
                    transition(from, event),
                    Err(InvalidTransition { from, event }),
                    "{from:?} + {event:?} must be rejected"
                );
                rejected += 1;
            }
        }
        // 5 个状态 x 7 个事件，减去 7 个合法组合
        assert_eq!(rejected, 28);
    }

    #[test]
    fn grade_posted_is_terminal() {
        for event in Event::ALL {
            assert!(transition(Some(Status::GradePosted), event).is_err());
        }
    }

    #[test]
    fn regeneration_clears_grade_and_feedback() {
        let mut s = submission(Status::VerificationSent);
        assert_eq!(s.apply(Event::HumanRequestedRegeneration), Ok(Status::New));
        assert_eq!(s.status, Status::New);
        assert_eq!(s.grade, None);
        assert_eq!(s.feedback, "");
    }

    #[test]
    fn grade_failed_leaves_fields_untouched() {
        let mut s = submission(Status::New);
        let before = s.clone();
        assert_eq!(s.apply(Event::GradeFailed), Ok(Status::New));
        assert_eq!(s, before);
    }

    #[test]
    fn record_grade_stores_grade_and_feedback() {
        let mut s = submission(Status::New);
        s.record_grade(ParsedGrade {
            grade: "1".into(),
            feedback: "Well done.".into(),
        })
        .unwrap();
        assert_eq!(s.status, Status::Graded);
        assert_eq!(s.grade.as_deref(), Some("1"));
        assert_eq!(s.feedback, "Well done.");
    }

    #[test]
    fn rejected_apply_does_not_mutate() {
        let mut s = submission(Status::Graded);
        let before = s.clone();
        assert!(s.apply(Event::HumanRequestedRegeneration).is_err());
        assert!(s
            .record_grade(ParsedGrade {
                grade: "1".into(),
                feedback: String::new(),
            })
            .is_err());
        assert_eq!(s, before);
    }
}
