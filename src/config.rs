use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// 由谁回答评分 prompt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatBackend {
    /// 通过浏览器驱动网页聊天界面
    Browser,
    /// OpenAI 兼容的 HTTP API
    Api,
}

impl FromStr for ChatBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "browser" => Ok(ChatBackend::Browser),
            "api" => Ok(ChatBackend::Api),
            other => Err(format!("未知的聊天后端 '{}'", other)),
        }
    }
}

impl ChatBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatBackend::Browser => "browser",
            ChatBackend::Api => "api",
        }
    }
}

/// 应用配置
#[derive(Clone, Debug)]
pub struct Config {
    // --- 浏览器会话 ---
    /// 以远程调试方式启动的浏览器
    pub chrome_path: PathBuf,
    pub chrome_profile_dir: PathBuf,
    pub chat_url: String,
    /// 会话 cookie；没有时由操作员手动登录
    pub chat_session_cookie: Option<String>,
    pub chat_cookie_name: String,
    pub chat_cookie_domain: String,
    pub chat_backend: ChatBackend,
    // --- 自动化时序 ---
    pub input_locate_attempts: usize,
    pub input_locate_backoff: Duration,
    pub response_settle: Duration,
    pub response_poll: Duration,
    pub response_grace: Duration,
    // --- 编排 ---
    pub cycle_interval: Duration,
    /// SQLite 数据库文件
    pub store_path: PathBuf,
    /// 可选的 TOML 种子文件（用户、平台、作业）
    pub seed_path: Option<PathBuf>,
    // --- 消息 ---
    pub telegram_bot_token: String,
    pub telegram_api_base: String,
    // --- LLM API 后端 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 详细日志（RUST_LOG 优先）
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chrome_path: PathBuf::from("google-chrome"),
            chrome_profile_dir: PathBuf::from("remote-profile"),
            chat_url: "https://chatgpt.com".to_string(),
            chat_session_cookie: None,
            chat_cookie_name: "__Secure-next-auth.session-token".to_string(),
            chat_cookie_domain: "chatgpt.com".to_string(),
            chat_backend: ChatBackend::Browser,
            input_locate_attempts: 30,
            input_locate_backoff: Duration::from_secs(2),
            response_settle: Duration::from_secs(10),
            response_poll: Duration::from_millis(500),
            response_grace: Duration::from_secs(10),
            cycle_interval: Duration::from_secs(3600),
            store_path: PathBuf::from("grader_store.db"),
            seed_path: None,
            telegram_bot_token: String::new(),
            telegram_api_base: "https://api.telegram.org".to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 从环境变量加载配置，未设置的使用默认值
    ///
    /// `TELEGRAM_BOT_TOKEN` 必填；数字格式错误直接报错，不回退默认值。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 同 [`Config::from_env`]，变量来源可替换（测试用）
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default = Self::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let millis = |name: &str, fallback: Duration| -> Result<Duration, ConfigError> {
            parse_var(name, get(name), "milliseconds")
                .map(|v: Option<u64>| v.map(Duration::from_millis).unwrap_or(fallback))
        };

        let telegram_bot_token =
            get("TELEGRAM_BOT_TOKEN").ok_or_else(|| ConfigError::EnvVarNotFound {
                var_name: "TELEGRAM_BOT_TOKEN".to_string(),
            })?;

        Ok(Self {
            chrome_path: get("CHROME_PATH").map(PathBuf::from).unwrap_or(default.chrome_path),
            chrome_profile_dir: get("CHROME_PROFILE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.chrome_profile_dir),
            chat_url: get("CHAT_URL").unwrap_or(default.chat_url),
            chat_session_cookie: get("CHAT_SESSION_COOKIE"),
            chat_cookie_name: get("CHAT_COOKIE_NAME").unwrap_or(default.chat_cookie_name),
            chat_cookie_domain: get("CHAT_COOKIE_DOMAIN").unwrap_or(default.chat_cookie_domain),
            chat_backend: parse_var("CHAT_BACKEND", get("CHAT_BACKEND"), "browser|api")?
                .unwrap_or(default.chat_backend),
            input_locate_attempts: parse_var(
                "INPUT_LOCATE_ATTEMPTS",
                get("INPUT_LOCATE_ATTEMPTS"),
                "integer",
            )?
            .unwrap_or(default.input_locate_attempts),
            input_locate_backoff: millis("INPUT_LOCATE_BACKOFF_MS", default.input_locate_backoff)?,
            response_settle: millis("RESPONSE_SETTLE_MS", default.response_settle)?,
            response_poll: millis("RESPONSE_POLL_MS", default.response_poll)?,
            response_grace: millis("RESPONSE_GRACE_MS", default.response_grace)?,
            cycle_interval: parse_var("CYCLE_INTERVAL_SECS", get("CYCLE_INTERVAL_SECS"), "seconds")?
                .map(Duration::from_secs)
                .unwrap_or(default.cycle_interval),
            store_path: get("STORE_PATH").map(PathBuf::from).unwrap_or(default.store_path),
            seed_path: get("SEED_PATH").map(PathBuf::from),
            telegram_bot_token,
            telegram_api_base: get("TELEGRAM_API_BASE").unwrap_or(default.telegram_api_base),
            llm_api_key: get("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: get("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: get("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            verbose_logging: parse_var("VERBOSE_LOGGING", get("VERBOSE_LOGGING"), "bool")?
                .unwrap_or(default.verbose_logging),
        })
    }
}

fn parse_var<T: FromStr>(
    name: &str,
    value: Option<String>,
    expected_type: &str,
) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: name.to_string(),
                value: raw,
                expected_type: expected_type.to_string(),
            }),
    }
}
