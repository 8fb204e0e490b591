/// 聊天页面的定位表达式
///
/// XPath 列表按精确度排序；CSS 列表给页面内运行的 DOM 注入兜底使用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSelectors {
    pub input: Vec<String>,
    pub send_button: Vec<String>,
    pub send_button_css: Vec<String>,
    /// "停止生成"控件的 XPath
    pub stop_button: String,
    /// 回复容器的 CSS 选择器
    pub response_container: String,
    /// 回复容器内文本节点的标签
    pub response_text: String,
}

impl Default for ChatSelectors {
    fn default() -> Self {
        Self {
            input: strings(&[
                r#"//textarea[@placeholder and not(@disabled)]"#,
                r#"//div[@contenteditable="true" and not(@aria-disabled="true")]"#,
                r#"//textarea[contains(@id, "prompt") and not(@disabled)]"#,
                r#"//div[contains(@data-testid, "composer-text-input")]"#,
                r#"//*[@role="textbox" and not(@disabled) and not(@aria-disabled="true")]"#,
            ]),
            send_button: strings(&[
                r#"//button[contains(@data-testid, "send-button")]"#,
                r#"//button[contains(@aria-label, "Send")]"#,
                r#"//button[contains(@title, "Send")]"#,
                r#"//button[contains(text(), "Send")]"#,
                r#"//button[@type="submit"]"#,
                r#"//button[.//*[name()="svg"]]"#,
            ]),
            send_button_css: strings(&[
                r#"button[data-testid*="send"]"#,
                r#"button[aria-label*="Send"]"#,
                r#"button[title*="Send"]"#,
                r#"button[type="submit"]"#,
                "button:has(svg)",
            ]),
            stop_button: r#"//button[contains(@data-testid, "stop-button")]"#.to_string(),
            response_container: "div.text-message".to_string(),
            response_text: "p".to_string(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
