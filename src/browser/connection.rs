use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::AutomationError;

/// CDP 连接以及驱动其事件处理的后台任务
pub struct BrowserConnection {
    pub browser: Browser,
    pub page: Page,
    pub handler_task: JoinHandle<()>,
}

/// 连接浏览器调试端口并选出聊天页面
///
/// 职责：
/// - 连接最多重试 `attempts` 次（刚启动的浏览器需要一点时间）
/// - 复用 URL 以 `target_url` 开头的已有标签页
/// - 没有则新开一个
pub async fn connect_to_browser_and_page(
    port: u16,
    target_url: &str,
    attempts: usize,
    retry_delay: Duration,
) -> Result<BrowserConnection, AutomationError> {
    let browser_url = format!("http://127.0.0.1:{}", port);
    info!("连接浏览器: {}", browser_url);

    let mut last_error = String::new();
    let mut connected = None;
    for attempt in 1..=attempts.max(1) {
        match Browser::connect(&browser_url).await {
            Ok(pair) => {
                connected = Some(pair);
                break;
            }
            Err(e) => {
                debug!("第 {} 次连接失败: {}", attempt, e);
                last_error = e.to_string();
                sleep(retry_delay).await;
            }
        }
    }
    let (browser, mut handler) = connected.ok_or_else(|| {
        error!("无法连接浏览器: {}", last_error);
        AutomationError::Connection {
            port,
            reason: last_error,
        }
    })?;
    debug!("浏览器已连接");

    // 后台处理浏览器事件
    let handler_task = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 等浏览器上报 targets
    sleep(Duration::from_millis(300)).await;

    let pages = browser.pages().await?;
    debug!("找到 {} 个页面", pages.len());

    for p in pages.iter() {
        if let Ok(Some(url)) = p.url().await {
            debug!("检查页面: {}", url);
            if url.starts_with(target_url) {
                info!("✓ 复用聊天页面: {}", url);
                return Ok(BrowserConnection {
                    browser,
                    page: p.clone(),
                    handler_task,
                });
            }
        }
    }

    debug!("没有打开的聊天页面，新建一个");
    let page = browser.new_page(target_url).await.map_err(|e| {
        error!("打开 {} 失败: {}", target_url, e);
        e
    })?;
    info!("已导航到: {}", target_url);

    Ok(BrowserConnection {
        browser,
        page,
        handler_task,
    })
}
