//! Canvas LMS REST 客户端
//!
//! 读接口通过 `Link` 头分页，一直跟到没有 `rel="next"` 为止

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use reqwest::header::LINK;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::PlatformApiError;
use crate::models::{Platform, PlatformKind};
use crate::services::{
    AssignmentSummary, CourseSummary, PlatformClient, PlatformConnector, RawSubmission,
};
use crate::utils::clean_html_text;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct CanvasCourse {
    id: i64,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CanvasAssignment {
    id: i64,
    course_id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CanvasUser {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    login_id: Option<String>,
    #[serde(default)]
    sis_user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CanvasSubmission {
    assignment_id: i64,
    user_id: i64,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
    #[serde(default)]
    turnitin_data: Option<Map<String, JsonValue>>,
    #[serde(default)]
    user: Option<CanvasUser>,
    #[serde(default)]
    assignment: Option<CanvasAssignment>,
}

impl CanvasSubmission {
    /// 从未真正提交的记录为 `None`
    fn into_raw(self) -> Option<RawSubmission> {
        let submitted_at = self.submitted_at?;
        let similarity_score = self
            .turnitin_data
            .as_ref()
            .and_then(|data| data.values().next())
            .and_then(|entry| entry.get("similarity_score"))
            .and_then(JsonValue::as_f64);
        let user = self.user.unwrap_or_default();

        Some(RawSubmission {
            assignment_id: self.assignment_id,
            student_id: user
                .login_id
                .unwrap_or_else(|| self.user_id.to_string()),
            student_name: user.name.unwrap_or_default(),
            student_uid: user.sis_user_id,
            student_nid: Some(self.user_id),
            submitted_at,
            preview_url: self.preview_url,
            similarity_score,
            body: clean_html_text(self.body.as_deref().unwrap_or("")),
            assignment_description: self
                .assignment
                .and_then(|a| a.description)
                .map(|d| clean_html_text(&d))
                .filter(|d| !d.is_empty()),
        })
    }
}

/// 从 `Link` 头取出 `rel="next"` 的地址
pub fn next_page_url(link_header: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="next""#).expect("static regex"));
    re.captures(link_header).map(|c| c[1].to_string())
}

pub struct CanvasClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CanvasClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, PlatformApiError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PlatformApiError::Request {
                endpoint: base_url.to_string(),
                source: e,
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// 拉取列表接口的所有分页
    async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Vec<T>, PlatformApiError> {
        let endpoint = self.url(path);
        let mut items = Vec::new();
        let mut request = self.authorized(self.client.get(&endpoint).query(query));
        let mut page = 1;

        loop {
            let response = request.send().await.map_err(|e| PlatformApiError::Request {
                endpoint: endpoint.clone(),
                source: e,
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(PlatformApiError::BadStatus {
                    endpoint,
                    status: status.as_u16(),
                    body,
                });
            }

            let next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_page_url);

            let batch: Vec<T> = response.json().await.map_err(|e| PlatformApiError::Decode {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
            debug!("{} 第 {} 页: {} 条", endpoint, page, batch.len());
            items.extend(batch);

            match next {
                Some(url) => {
                    request = self.authorized(self.client.get(url));
                    page += 1;
                }
                None => break,
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl PlatformClient for CanvasClient {
    async fn list_courses(&self) -> Result<Vec<CourseSummary>, PlatformApiError> {
        let courses: Vec<CanvasCourse> = self.get_all("/courses", &[]).await?;
        Ok(courses
            .into_iter()
            .filter_map(|c| {
                c.name.map(|name| CourseSummary { id: c.id, name })
            })
            .collect())
    }

    async fn list_assignments(
        &self,
        course_id: i64,
    ) -> Result<Vec<AssignmentSummary>, PlatformApiError> {
        let path = format!("/courses/{}/assignments", course_id);
        let assignments: Vec<CanvasAssignment> = self.get_all(&path, &[]).await?;
        Ok(assignments
            .into_iter()
            .filter_map(|a| {
                a.name.map(|name| AssignmentSummary {
                    id: a.id,
                    course_id: a.course_id,
                    name,
                    description: a.description.map(|d| clean_html_text(&d)),
                })
            })
            .collect())
    }

    async fn list_submissions_since(
        &self,
        course_id: i64,
        assignment_ids: &[i64],
        since: DateTime<Utc>,
    ) -> Result<Vec<RawSubmission>, PlatformApiError> {
        let mut query: Vec<(String, String)> = vec![
            ("student_ids[]".into(), "all".into()),
            ("workflow_state".into(), "submitted".into()),
            (
                "submitted_since".into(),
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("include[]".into(), "user".into()),
            ("include[]".into(), "assignment".into()),
        ];
        query.extend(
            assignment_ids
                .iter()
                .map(|id| ("assignment_ids[]".to_string(), id.to_string())),
        );

        let path = format!("/courses/{}/students/submissions", course_id);
        let submissions: Vec<CanvasSubmission> = self.get_all(&path, &query).await?;
        let total = submissions.len();
        let raw: Vec<RawSubmission> = submissions
            .into_iter()
            .filter_map(CanvasSubmission::into_raw)
            .collect();
        if raw.len() < total {
            debug!("丢弃 {} 条没有提交时间的记录", total - raw.len());
        }
        Ok(raw)
    }

    async fn post_grade(
        &self,
        course_id: i64,
        assignment_id: i64,
        student_nid: i64,
        grade: &str,
        feedback: &str,
    ) -> Result<(), PlatformApiError> {
        let endpoint = self.url(&format!(
            "/courses/{}/assignments/{}/submissions/{}",
            course_id, assignment_id, student_nid
        ));

        let mut form = vec![("submission[posted_grade]", grade)];
        if !feedback.is_empty() {
            form.push(("comment[text_comment]", feedback));
        }

        let response = self
            .authorized(self.client.put(&endpoint).form(&form))
            .send()
            .await
            .map_err(|e| PlatformApiError::Request {
                endpoint: endpoint.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("回写成绩失败: HTTP {}", status);
            return Err(PlatformApiError::BadStatus {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        info!(
            "✓ 成绩 {} 已回写（课程 {}, 作业 {}, 学生 {}）",
            grade, course_id, assignment_id, student_nid
        );
        Ok(())
    }
}

/// 为已存储的平台记录创建 REST 客户端
#[derive(Debug, Default, Clone, Copy)]
pub struct CanvasConnector;

impl PlatformConnector for CanvasConnector {
    fn connect(&self, platform: &Platform) -> Result<Arc<dyn PlatformClient>, PlatformApiError> {
        match platform.kind {
            PlatformKind::Canvas => Ok(Arc::new(CanvasClient::new(
                &platform.api_url,
                platform.api_key.clone(),
            )?)),
            PlatformKind::Unsupported => Err(PlatformApiError::Unsupported(platform.name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_next_link_among_others() {
        let header = r#"<https://c.example/api/v1/courses?page=1>; rel="current", <https://c.example/api/v1/courses?page=2&per_page=10>; rel="next", <https://c.example/api/v1/courses?page=5>; rel="last""#;
        assert_eq!(
            next_page_url(header).as_deref(),
            Some("https://c.example/api/v1/courses?page=2&per_page=10")
        );
        assert_eq!(next_page_url(r#"<https://c.example/x>; rel="last""#), None);
    }

    #[test]
    fn converts_submission_payload() {
        let payload = r#"{
            "assignment_id": 2000,
            "user_id": 77,
            "submitted_at": "2024-03-01T12:00:00Z",
            "body": "<p>My answer</p><script>x()</script>",
            "preview_url": "https://c.example/preview",
            "turnitin_data": { "submission_1": { "similarity_score": 12.5 } },
            "user": { "name": "Ann Lee", "login_id": "ann", "sis_user_id": "S123" },
            "assignment": { "id": 2000, "course_id": 100, "name": "HW1", "description": "<p>Add numbers</p>" }
        }"#;
        let submission: CanvasSubmission = serde_json::from_str(payload).unwrap();
        let raw = submission.into_raw().unwrap();

        assert_eq!(raw.student_id, "ann");
        assert_eq!(raw.student_name, "Ann Lee");
        assert_eq!(raw.student_uid.as_deref(), Some("S123"));
        assert_eq!(raw.student_nid, Some(77));
        assert_eq!(raw.similarity_score, Some(12.5));
        assert_eq!(raw.body, "My answer");
        assert_eq!(raw.assignment_description.as_deref(), Some("Add numbers"));
    }

    #[test]
    fn unsubmitted_records_are_dropped() {
        let payload = r#"{ "assignment_id": 1, "user_id": 2, "submitted_at": null }"#;
        let submission: CanvasSubmission = serde_json::from_str(payload).unwrap();
        assert!(submission.into_raw().is_none());
    }

    #[test]
    fn connector_refuses_unknown_kinds() {
        let platform = Platform {
            id: 1,
            name: "Moodle".to_string(),
            kind: PlatformKind::Unsupported,
            api_url: "https://m.example".to_string(),
            api_key: None,
        };
        assert!(matches!(
            CanvasConnector.connect(&platform),
            Err(PlatformApiError::Unsupported(name)) if name == "Moodle"
        ));
    }
}
