/// 日志工具
///
/// 日志初始化以及每轮评分前后打印的横幅
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::orchestrator::CycleReport;

/// 初始化全局日志
///
/// 设置了 `RUST_LOG` 时以它为准，否则 `verbose` 决定 debug 还是 info
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 重复初始化时保留已有的 subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 打印启动横幅
///
/// # Arguments
/// - `backend`: 使用的聊天后端
/// - `interval_secs`: 两轮之间的间隔
pub fn log_startup(backend: &str, interval_secs: u64) {
    info!("{}", "=".repeat(60));
    info!("🚀 自动评分启动");
    info!("🤖 聊天后端: {}", backend);
    info!("⏱️ 循环间隔: {}秒", interval_secs);
    info!("{}", "=".repeat(60));
}

/// 打印阶段横幅
pub fn log_phase(number: usize, name: &str) {
    info!("\n{}", "=".repeat(60));
    info!("=== 阶段 {}: {} ===", number, name);
    info!("{}", "=".repeat(60));
}

/// 打印本轮汇总
pub fn log_cycle_report(cycle: u64, report: &CycleReport) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 第 {} 轮完成于 {}",
        cycle,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!(
        "📥 拉取: 新增 {}, 已存在 {}, 平台失败 {}",
        report.retrieved, report.duplicates, report.platform_failures
    );
    info!(
        "📝 评分: 成功 {}, 失败 {}",
        report.graded, report.grade_failures
    );
    info!(
        "📨 通知: 成功 {}, 失败 {}, 跳过 {}",
        report.notified, report.notify_failures, report.notify_skipped
    );
    info!("{}", "─".repeat(60));
}

/// 截断长文本用于日志输出
///
/// # Arguments
/// - `text`: 原始文本
/// - `max_len`: 最多保留的字符数
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_text("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_text("short", 10), "short");
    }
}
