//! 浏览器聊天会话
//!
//! 持有浏览器进程、CDP 连接和聊天页面。同一时间只处理一个 prompt，
//! 会话由编排层独占

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::element::Element;
use chromiumoxide::Browser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::automation::completion::{
    CompletionDetector, CompletionPolicy, CompletionSignals, ResponseSampler,
};
use crate::automation::gate::VerificationGate;
use crate::automation::locator::{Capability, ElementLocator};
use crate::automation::selectors::ChatSelectors;
use crate::automation::ChatSession;
use crate::browser::{self, ChromeProcess};
use crate::config::Config;
use crate::error::AutomationError;
use crate::infrastructure::JsExecutor;
use crate::utils::logging::truncate_text;

const SHIFT_MODIFIER: i64 = 8;
const ENTER_KEY_CODE: i64 = 13;

/// 打开浏览器聊天会话所需的全部参数
#[derive(Debug, Clone)]
pub struct BrowserSessionOptions {
    pub executable: PathBuf,
    pub profile_dir: PathBuf,
    pub chat_url: String,
    pub session_cookie: Option<String>,
    pub cookie_name: String,
    pub cookie_domain: String,
    pub selectors: ChatSelectors,
    pub input_attempts: usize,
    pub input_backoff: Duration,
    pub completion: CompletionPolicy,
    /// 导航后页面就绪检查次数，每秒一次
    pub load_checks: usize,
    /// `close()` 强制结束进程前的等待时间
    pub shutdown_grace: Duration,
}

impl BrowserSessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            executable: config.chrome_path.clone(),
            profile_dir: config.chrome_profile_dir.clone(),
            chat_url: config.chat_url.clone(),
            session_cookie: config.chat_session_cookie.clone(),
            cookie_name: config.chat_cookie_name.clone(),
            cookie_domain: config.chat_cookie_domain.clone(),
            selectors: ChatSelectors::default(),
            input_attempts: config.input_locate_attempts,
            input_backoff: config.input_locate_backoff,
            completion: CompletionPolicy {
                settle: config.response_settle,
                poll_interval: config.response_poll,
                grace: config.response_grace,
            },
            load_checks: 60,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// 在一次脚本执行里采样三个完成信号，保证它们来自同一时刻
pub struct PageResponseSampler<'a> {
    executor: &'a JsExecutor,
    script: String,
}

impl<'a> PageResponseSampler<'a> {
    pub fn new(executor: &'a JsExecutor, selectors: &ChatSelectors) -> Self {
        let script = format!(
            r#"(() => {{
                const stop = document.evaluate({stop}, document, null,
                    XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotLength;
                const containers = document.querySelectorAll({container});
                const last = containers.length ? containers[containers.length - 1] : null;
                return {{
                    generating: stop > 0,
                    responseCount: containers.length,
                    lastHasText: !!(last && last.querySelector({text}))
                }};
            }})()"#,
            stop = js_string(&selectors.stop_button),
            container = js_string(&selectors.response_container),
            text = js_string(&selectors.response_text),
        );
        Self { executor, script }
    }
}

#[async_trait]
impl ResponseSampler for PageResponseSampler<'_> {
    async fn sample(&self) -> Result<CompletionSignals, AutomationError> {
        self.executor.eval_as(self.script.as_str()).await
    }
}

/// 自动化浏览器中的聊天会话
pub struct BrowserChatSession {
    options: BrowserSessionOptions,
    process: Option<ChromeProcess>,
    browser: Option<Browser>,
    handler_task: Option<JoinHandle<()>>,
    executor: JsExecutor,
    input_locator: ElementLocator,
    send_locator: ElementLocator,
    detector: CompletionDetector,
}

impl BrowserChatSession {
    /// 启动浏览器，恢复登录态或等待人工登录，然后加载聊天页面
    ///
    /// 进程启动后的任何失败都会 drop 句柄，进程随之被结束
    pub async fn open(
        options: BrowserSessionOptions,
        gate: &dyn VerificationGate,
    ) -> Result<Self, AutomationError> {
        let port = browser::find_available_port().map_err(|e| AutomationError::Launch {
            executable: options.executable.display().to_string(),
            reason: format!("no free port: {}", e),
        })?;

        let process = ChromeProcess::spawn(
            &options.executable,
            &options.profile_dir,
            port,
            &options.chat_url,
        )?;
        // 等待浏览器启动
        sleep(Duration::from_secs(3)).await;

        if options.session_cookie.is_none() {
            gate.wait_for_operator().await?;
        }

        let connection = browser::connect_to_browser_and_page(
            process.port(),
            &options.chat_url,
            10,
            Duration::from_secs(1),
        )
        .await?;

        let input_locator = ElementLocator::new(
            "prompt input",
            options.selectors.input.clone(),
            Capability::Typeable,
        )
        .with_attempts(options.input_attempts, options.input_backoff);
        let send_locator = ElementLocator::new(
            "send button",
            options.selectors.send_button.clone(),
            Capability::Clickable,
        )
        .with_attempts(1, Duration::ZERO);
        let detector = CompletionDetector::new(options.completion);

        let session = Self {
            executor: JsExecutor::new(connection.page),
            browser: Some(connection.browser),
            handler_task: Some(connection.handler_task),
            process: Some(process),
            input_locator,
            send_locator,
            detector,
            options,
        };

        if let Some(cookie) = session.options.session_cookie.clone() {
            session.restore_session(&cookie).await?;
        }
        session.wait_for_chat_ready().await;

        info!("✓ 聊天会话已就绪");
        Ok(session)
    }

    async fn restore_session(&self, cookie: &str) -> Result<(), AutomationError> {
        info!("🍪 恢复已保存的聊天会话");
        let param = CookieParam::builder()
            .name(self.options.cookie_name.clone())
            .value(cookie)
            .domain(self.options.cookie_domain.clone())
            .path("/")
            .http_only(true)
            .secure(true)
            .build()
            .map_err(AutomationError::Script)?;

        let page = self.executor.page();
        page.set_cookie(param).await?;
        page.reload().await?;
        Ok(())
    }

    /// 等待文档加载完成并出现任一输入框候选，超时只记警告
    async fn wait_for_chat_ready(&self) {
        let candidates = serde_json::to_string(&self.options.selectors.input)
            .unwrap_or_else(|_| "[]".to_string());
        let script = format!(
            r#"(() => {{
                if (document.readyState !== 'complete') return false;
                return {candidates}.some(x => document.evaluate(x, document, null,
                    XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotLength > 0);
            }})()"#
        );

        for check in 1..=self.options.load_checks {
            debug!("等待聊天页面加载（第 {} 次检查）", check);
            match self.executor.eval_as::<bool>(script.as_str()).await {
                Ok(true) => {
                    debug!("聊天页面已加载");
                    return;
                }
                Ok(false) => {}
                Err(e) => debug!("就绪检查失败: {}", e),
            }
            sleep(Duration::from_secs(1)).await;
        }
        warn!("⚠️ 聊天页面可能没有完全加载");
    }

    /// 软换行：Shift+Enter，不会触发发送
    async fn soft_newline(&self) -> Result<(), AutomationError> {
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let mut builder = DispatchKeyEventParams::builder()
                .r#type(kind.clone())
                .key("Enter")
                .code("Enter")
                .windows_virtual_key_code(ENTER_KEY_CODE)
                .native_virtual_key_code(ENTER_KEY_CODE)
                .modifiers(SHIFT_MODIFIER);
            if kind == DispatchKeyEventType::KeyDown {
                builder = builder.text("\r");
            }
            let params = builder.build().map_err(AutomationError::Script)?;
            self.executor.page().execute(params).await?;
        }
        Ok(())
    }

    /// 交互路径：逐行输入，然后点击发送或按回车
    async fn type_and_send(&self, input: &Element, text: &str) -> Result<(), AutomationError> {
        input.click().await?;
        sleep(Duration::from_millis(500)).await;
        self.executor.clear(input).await?;
        sleep(Duration::from_millis(500)).await;

        for line in text.lines() {
            if !line.is_empty() {
                input.type_str(line).await?;
            }
            self.soft_newline().await?;
            sleep(Duration::from_millis(10)).await;
        }
        sleep(Duration::from_secs(1)).await;

        match self.send_locator.find_once(&self.executor).await {
            Some(button) => {
                info!("点击发送按钮 ({})", button.locator);
                button.element.click().await?;
            }
            None => {
                info!("没找到发送按钮，按回车发送");
                input.press_key("Enter").await?;
            }
        }
        Ok(())
    }

    /// 兜底路径：直接赋值并触发 input/change 事件
    async fn inject_and_send(&self, input: &Element, text: &str) -> Result<(), AutomationError> {
        let inject = format!(
            r#"function() {{
                const text = {text};
                this.focus();
                if ('value' in this) {{ this.value = text; }} else {{ this.innerText = text; }}
                this.dispatchEvent(new Event('input', {{ bubbles: true }}));
                this.dispatchEvent(new Event('change', {{ bubbles: true }}));
            }}"#,
            text = js_string(text)
        );
        self.executor.call_on(input, inject).await?;
        sleep(Duration::from_secs(1)).await;

        let selectors = serde_json::to_string(&self.options.selectors.send_button_css)
            .map_err(|e| AutomationError::Script(e.to_string()))?;
        let click = format!(
            r#"(() => {{
                for (const selector of {selectors}) {{
                    const btn = document.querySelector(selector);
                    if (btn && btn.offsetParent !== null) {{ btn.click(); return true; }}
                }}
                return false;
            }})()"#
        );

        if self.executor.eval_as::<bool>(click).await? {
            info!("已通过 DOM 点击发送按钮");
        } else {
            info!("兜底：按回车发送");
            input.press_key("Enter").await?;
        }
        Ok(())
    }

    async fn last_response(&self) -> Result<String, AutomationError> {
        let script = format!(
            r#"(() => {{
                const containers = document.querySelectorAll({container});
                if (!containers.length) return '';
                const last = containers[containers.length - 1];
                const node = last.querySelector({text});
                return (node ? node.innerText : last.innerText) || '';
            }})()"#,
            container = js_string(&self.options.selectors.response_container),
            text = js_string(&self.options.selectors.response_text),
        );

        sleep(Duration::from_millis(500)).await;
        let text: String = self.executor.eval_as(script).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(AutomationError::NoResponse);
        }
        Ok(text)
    }

    /// 回到聊天首页，下一个 prompt 从新对话开始
    async fn start_new_conversation(&self) -> Result<(), AutomationError> {
        self.executor.page().goto(self.options.chat_url.as_str()).await?;
        self.wait_for_chat_ready().await;
        Ok(())
    }
}

#[async_trait]
impl ChatSession for BrowserChatSession {
    async fn submit_prompt(&mut self, text: &str) -> Result<String, AutomationError> {
        let input = self.input_locator.locate(&self.executor).await?.element;

        info!("✍️ 发送 prompt（{} 字符）", text.chars().count());
        if let Err(e) = self.type_and_send(&input, text).await {
            warn!("直接输入失败，改用 DOM 注入: {}", e);
            self.inject_and_send(&input, text).await.map_err(|e2| {
                error!("DOM 注入也失败了: {}", e2);
                AutomationError::SendFailed(format!("typing: {}; injection: {}", e, e2))
            })?;
        }
        info!("✓ prompt 已发送，等待回复");

        let sampler = PageResponseSampler::new(&self.executor, &self.options.selectors);
        self.detector.wait(&sampler).await;

        let response = self.last_response().await?;
        debug!("回复: {}", truncate_text(&response, 120));

        if let Err(e) = self.start_new_conversation().await {
            warn!("无法打开新对话: {}", e);
        }
        Ok(response)
    }

    async fn close(&mut self) {
        info!("关闭浏览器...");
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("关闭浏览器会话出错: {}", e);
            }
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        if let Some(process) = self.process.take() {
            process.shutdown(self.options.shutdown_grace).await;
        }
    }
}

/// 把 `value` 转成 JS 字符串字面量
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}
