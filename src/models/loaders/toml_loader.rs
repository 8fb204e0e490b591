//! 种子数据加载器
//!
//! 用户、平台、作业和评分等级写在 TOML 文件里，启动时 upsert 进存储。
//! 水位线和提交不属于种子数据。

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;

use crate::models::{Platform, User};

/// 种子文件内容
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub platforms: Vec<Platform>,
    #[serde(default)]
    pub assignments: Vec<SeedAssignment>,
}

/// 种子文件中声明的作业
#[derive(Debug, Clone, Deserialize)]
pub struct SeedAssignment {
    pub id: u64,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub platform_id: Option<u64>,
    pub course_id: i64,
    pub assignment_id: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rubric: Option<String>,
    #[serde(default)]
    pub rubric_grades: Vec<SeedRubricGrade>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRubricGrade {
    pub grade_number: i64,
    pub short_description: String,
    #[serde(default)]
    pub detailed_description: Option<String>,
}

impl Seed {
    /// 解析种子 TOML 并检查唯一性约束
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let seed: Seed = toml::from_str(content).context("种子 TOML 格式错误")?;
        seed.validate()?;
        Ok(seed)
    }

    /// id 唯一；同一作业内等级编号唯一
    pub fn validate(&self) -> Result<()> {
        let mut user_ids = HashSet::new();
        for user in &self.users {
            if !user_ids.insert(user.id) {
                anyhow::bail!("用户 id {} 重复", user.id);
            }
        }

        let mut platform_ids = HashSet::new();
        for platform in &self.platforms {
            if !platform_ids.insert(platform.id) {
                anyhow::bail!("平台 id {} 重复", platform.id);
            }
        }

        let mut assignment_ids = HashSet::new();
        for assignment in &self.assignments {
            if !assignment_ids.insert(assignment.id) {
                anyhow::bail!("作业 id {} 重复", assignment.id);
            }
            let mut numbers = HashSet::new();
            for grade in &assignment.rubric_grades {
                if !numbers.insert(grade.grade_number) {
                    anyhow::bail!(
                        "作业 {} 重复声明了等级 {}",
                        assignment.id,
                        grade.grade_number
                    );
                }
            }
        }

        Ok(())
    }
}

/// 加载并校验种子文件
pub async fn load_seed(path: &Path) -> Result<Seed> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("读取种子文件失败: {}", path.display()))?;

    let seed = Seed::from_toml_str(&content)
        .with_context(|| format!("解析种子文件失败: {}", path.display()))?;

    tracing::info!(
        "✓ 已加载种子: {} 个用户, {} 个平台, {} 个作业",
        seed.users.len(),
        seed.platforms.len(),
        seed.assignments.len()
    );

    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlatformKind;

    const SEED: &str = r#"
[[users]]
id = 1
chat_id = 424242
username = "reviewer"

[[platforms]]
id = 1
name = "Canvas"
kind = "canvas"
api_url = "https://canvas.example.edu"
api_key = "secret"

[[assignments]]
id = 7
user_id = 1
platform_id = 1
course_id = 101
assignment_id = 2002
description = "Implement a stack."

[[assignments.rubric_grades]]
grade_number = 2
short_description = "Minor issues"

[[assignments.rubric_grades]]
grade_number = 1
short_description = "Excellent"
detailed_description = "Everything works."
"#;

    #[test]
    fn parses_nested_rubric_grades() {
        let seed = Seed::from_toml_str(SEED).unwrap();
        assert_eq!(seed.users[0].chat_id, 424242);
        assert_eq!(seed.platforms[0].kind, PlatformKind::Canvas);
        let assignment = &seed.assignments[0];
        assert_eq!(assignment.user_id, Some(1));
        assert_eq!(assignment.rubric_grades.len(), 2);
        assert_eq!(
            assignment.rubric_grades[1].detailed_description.as_deref(),
            Some("Everything works.")
        );
    }

    #[test]
    fn unknown_platform_kind_is_unsupported() {
        let seed = Seed::from_toml_str(
            r#"
[[platforms]]
id = 3
name = "Moodle"
kind = "moodle"
api_url = "https://moodle.example.edu"
"#,
        )
        .unwrap();
        assert_eq!(seed.platforms[0].kind, PlatformKind::Unsupported);
    }

    #[test]
    fn rejects_duplicate_grade_numbers() {
        let err = Seed::from_toml_str(
            r#"
[[assignments]]
id = 1
course_id = 1
assignment_id = 1

[[assignments.rubric_grades]]
grade_number = 1
short_description = "A"

[[assignments.rubric_grades]]
grade_number = 1
short_description = "B"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("重复声明了等级 1"));
    }
}
