//! 评分 prompt 组装与回复解析

use crate::error::ParseError;
use crate::models::{format_rubric, RubricGrade};

/// 从 `<grade>: <feedback>` 格式回复中解析出的成绩和评语
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedGrade {
    pub grade: String,
    pub feedback: String,
}

/// prompt 中的评分标准：有结构化等级时用等级，否则用作业的文字标准
pub fn rubric_listing(grades: &[RubricGrade], fallback: Option<&str>) -> String {
    if grades.is_empty() {
        fallback.unwrap_or_default().to_string()
    } else {
        format_rubric(grades)
    }
}

/// 填充固定的评分模板
pub fn compose_prompt(problem: &str, rubric: &str, solution: &str) -> String {
    format!(
        r#"Grade the following solution for the given problem using the rubric provided.

Problem: {problem}

Rubric: {rubric}

Solution: {solution}

Instructions:
- You must assign one of the EXACT grade options listed in the rubric above
- Use only the grade identifiers/numbers specified in the rubric (e.g., if rubric shows "1: E - Excellent", use "1")
- For higher grades: provide minimal or no feedback
- For lower grades: provide brief technical feedback (1-2 sentences max) on how to improve
- Use simple, formal language
- Focus only on technical aspects

OUTPUT FORMAT (single line):
<GRADE_FROM_RUBRIC>: <FEEDBACK>

Important: The GRADE must exactly match one of the grade numbers/identifiers from the rubric provided above.
"#
    )
}

/// 按第一个 `:` 把回复拆成成绩和评语
pub fn parse_grading_response(response: &str) -> Result<ParsedGrade, ParseError> {
    let trimmed = response.trim();
    let (grade, feedback) = trimmed
        .split_once(':')
        .ok_or_else(|| ParseError::MissingSeparator {
            response: trimmed.to_string(),
        })?;

    let grade = grade.trim();
    if grade.is_empty() {
        return Err(ParseError::EmptyGrade {
            response: trimmed.to_string(),
        });
    }

    Ok(ParsedGrade {
        grade: grade.to_string(),
        feedback: feedback.trim().to_string(),
    })
}

/// `token` 是否为声明过的等级编号；没有结构化等级时总是 true
pub fn is_declared_token(grades: &[RubricGrade], token: &str) -> bool {
    grades.is_empty() || grades.iter().any(|g| g.token() == token)
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
    fn parses_grade_and_feedback() {
        let parsed = parse_grading_response("1: Well done.").unwrap();
        assert_eq!(parsed.grade, "1");
        assert_eq!(parsed.feedback, "Well done.");
    }

    #[test]
    fn splits_on_first_colon_only() {
        let parsed = parse_grading_response("  3: Fix this: the loop never ends.\n").unwrap();
        assert_eq!(parsed.grade, "3");
        assert_eq!(parsed.feedback, "Fix this: the loop never ends.");
    }

    #[test]
    fn missing_colon_is_a_parse_error() {
        assert_eq!(
            parse_grading_response("see me"),
            Err(ParseError::MissingSeparator {
                response: "see me".into()
            })
        );
    }

    #[test]
    fn empty_grade_is_a_parse_error() {
        assert!(matches!(
            parse_grading_response(": nothing"),
            Err(ParseError::EmptyGrade { .. })
        ));
    }

    #[test]
    fn feedback_may_be_empty() {
        let parsed = parse_grading_response("1:").unwrap();
        assert_eq!(parsed.feedback, "");
    }

    #[test]
    fn structured_rubric_wins_over_free_text() {
        let grades = vec![grade(1, "Excellent"), grade(2, "Minor issues")];
        assert_eq!(
            rubric_listing(&grades, Some("A/B/C")),
            "1: Excellent\n2: Minor issues"
        );
        assert_eq!(rubric_listing(&[], Some("A/B/C")), "A/B/C");
        assert_eq!(rubric_listing(&[], None), "");
    }

    #[test]
    fn prompt_embeds_all_three_parts() {
        let prompt = compose_prompt("Sum two numbers", "1: Excellent", "a + b");
        assert!(prompt.contains("Problem: Sum two numbers"));
        assert!(prompt.contains("Rubric: 1: Excellent"));
        assert!(prompt.contains("Solution: a + b"));
        assert!(prompt.contains("<GRADE_FROM_RUBRIC>: <FEEDBACK>"));
    }

    #[test]
    fn declared_token_check() {
        let grades = vec![grade(1, "Excellent"), grade(2, "Minor issues")];
        assert!(is_declared_token(&grades, "2"));
        assert!(!is_declared_token(&grades, "A"));
        assert!(is_declared_token(&[], "A"));
    }
}
