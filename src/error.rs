use thiserror::Error;

use crate::models::Status;
use crate::workflow::Event;

/// 浏览器 / 聊天自动化错误
///
/// 回复慢不算错误；只有找不到输入框或所有发送方式都失败才会提前结束。
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("启动浏览器失败 ({executable}): {reason}")]
    Launch { executable: String, reason: String },

    /// 调试端口一直不接受 CDP 连接
    #[error("无法连接端口 {port} 上的浏览器: {reason}")]
    Connection { port: u16, reason: String },

    #[error("CDP 错误: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    /// 脚本返回值无法解析
    #[error("脚本错误: {0}")]
    Script(String),

    #[error("尝试 {attempts} 次后仍未找到可交互的 {role}")]
    ElementNotFound { role: String, attempts: usize },

    /// 键入和 DOM 注入都失败
    #[error("所有发送方式都失败: {0}")]
    SendFailed(String),

    /// 已判定完成，但读不到回复文本
    #[error("没有渲染出回复文本")]
    NoResponse,

    #[error("人工验证: {0}")]
    Gate(String),

    #[error("聊天后端错误: {0}")]
    Backend(String),
}

/// 课程平台错误，按平台隔离
#[derive(Debug, Error)]
pub enum PlatformApiError {
    #[error("请求 {endpoint} 失败: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} 返回 HTTP {status}: {body}")]
    BadStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("无法解析 {endpoint} 的响应: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("平台 '{0}' 没有可用的客户端")]
    Unsupported(String),
}

/// 评分回复不符合 `<grade>: <feedback>` 格式
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("回复中没有 ':' 分隔符: {response:?}")]
    MissingSeparator { response: String },

    #[error("回复中的等级为空: {response:?}")]
    EmptyGrade { response: String },
}

/// 消息服务错误
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("消息请求失败: {0}")]
    Request(#[from] reqwest::Error),

    #[error("消息服务拒绝了 {method}: {description}")]
    Rejected { method: String, description: String },

    #[error("无法识别的操作数据: {0:?}")]
    InvalidAction(String),
}

/// 在不允许的状态上应用了事件
///
/// 属于逻辑缺陷，不是临时故障。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("非法状态迁移: {} 状态下不允许 {event:?}", state_label(.from))]
pub struct InvalidTransition {
    pub from: Option<Status>,
    pub event: Event,
}

fn state_label(from: &Option<Status>) -> String {
    match from {
        Some(status) => status.to_string(),
        None => "<absent>".to_string(),
    }
}

/// 持久化错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("提交已存在: 作业 {assignment_id:?}, 学生 {student_id}, 时间 {submission_time}")]
    DuplicateNaturalKey {
        assignment_id: Option<u64>,
        student_id: String,
        submission_time: String,
    },

    #[error("找不到 {entity} {id}")]
    NotFound { entity: &'static str, id: u64 },

    #[error("存储文件错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite 错误: {0}")]
    Sql(#[from] rusqlite::Error),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name}: 值 '{value}' 不是合法的 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    /// 缺少必需的环境变量
    #[error("缺少环境变量 {var_name}")]
    EnvVarNotFound { var_name: String },
}

/// 评分核心的统一错误类型
#[derive(Debug, Error)]
pub enum GraderError {
    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error(transparent)]
    Platform(#[from] PlatformApiError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("提交 {submission_id} 没有所属作业")]
    Orphaned { submission_id: u64 },

    #[error("提交 {submission_id} 缺少 {field}")]
    MissingField {
        submission_id: u64,
        field: &'static str,
    },
}

impl GraderError {
    /// 违反状态契约，必须中断所在阶段
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, GraderError::InvalidTransition(_))
    }
}

pub type GraderResult<T> = Result<T, GraderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_both_sides() {
        let err = InvalidTransition {
            from: Some(Status::GradePosted),
            event: Event::GradeSucceeded,
        };
        let text = err.to_string();
        assert!(text.contains("GradeSucceeded"));
        assert!(text.contains("grade_posted"));

        let absent = InvalidTransition {
            from: None,
            event: Event::HumanApproved,
        };
        assert!(absent.to_string().contains("<absent>"));
    }

    #[test]
    fn only_invalid_transition_is_a_contract_violation() {
        let violation: GraderError = InvalidTransition {
            from: Some(Status::New),
            event: Event::HumanApproved,
        }
        .into();
        assert!(violation.is_contract_violation());

        let parse: GraderError = ParseError::MissingSeparator {
            response: "see me".into(),
        }
        .into();
        assert!(!parse.is_contract_violation());
    }
}
