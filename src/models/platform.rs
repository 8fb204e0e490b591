use serde::{Deserialize, Serialize};

/// 平台类型，决定使用哪个客户端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Canvas,
    /// 数据里声明了但没有客户端，拉取时跳过
    #[serde(other)]
    Unsupported,
}

/// 课程平台实例
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub id: u64,
    pub name: String,
    pub kind: PlatformKind,
    /// 根地址，例如 `https://canvas.example.edu`
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// 审核人
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    /// 接收通知的 chat id
    pub chat_id: i64,
    #[serde(default)]
    pub username: Option<String>,
}
