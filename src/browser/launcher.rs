use std::net::TcpListener;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::AutomationError;

/// 向系统要一个当前空闲的本地端口
pub fn find_available_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// 开启远程调试的浏览器进程
///
/// 没有调用 [`shutdown`](Self::shutdown) 就 drop 时，子进程会被结束
pub struct ChromeProcess {
    child: Child,
    port: u16,
}

impl ChromeProcess {
    /// 用独立的 profile 目录启动 `executable` 并打开 `url`
    pub fn spawn(
        executable: &Path,
        profile_dir: &Path,
        port: u16,
        url: &str,
    ) -> Result<Self, AutomationError> {
        info!(
            "🚀 启动浏览器，调试端口 {}（profile: {}）",
            port,
            profile_dir.display()
        );

        let child = Command::new(executable)
            .arg(format!("--remote-debugging-port={}", port))
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(url)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!("启动浏览器失败: {}", e);
                AutomationError::Launch {
                    executable: executable.display().to_string(),
                    reason: e.to_string(),
                }
            })?;

        debug!("浏览器 pid: {:?}", child.id());
        Ok(Self { child, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 最多等 `grace` 让进程自行退出，然后强制结束；失败只记日志
    pub async fn shutdown(mut self, grace: Duration) {
        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => info!("浏览器进程已退出: {}", status),
            Ok(Err(e)) => warn!("等待浏览器进程出错: {}", e),
            Err(_) => {
                warn!("浏览器 {:?} 内没有退出，强制结束", grace);
                if let Err(e) = self.child.kill().await {
                    error!("强制结束浏览器进程出错: {}", e);
                } else {
                    info!("浏览器进程已强制结束");
                }
            }
        }
    }
}
