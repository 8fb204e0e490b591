//! 平台内容和外发消息的 HTML 工具

use regex::Regex;
use std::sync::OnceLock;

fn link_and_script() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)<link.*?>|<script.*?</script>").expect("static regex")
    })
}

fn blank_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("static regex"))
}

/// 把平台 HTML（提交正文、作业描述）转成纯文本
pub fn clean_html_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = link_and_script().replace_all(text, "");
    let text = text
        .replace("<p>", "\n")
        .replace("</p>", "\n")
        .replace("<span>", "")
        .replace("</span>", "")
        .replace("<ol>", "")
        .replace("</ol>", "\n")
        .replace("<ul>", "")
        .replace("</ul>", "\n")
        .replace("<li>", "\n- ")
        .replace("</li>", "");

    blank_runs().replace_all(&text, "\n\n").trim().to_string()
}

/// 转义 HTML 格式消息中的文本
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_and_links() {
        let html = r#"<link rel="stylesheet" href="x.css"><p>Hi</p><script>alert(1)</script>"#;
        assert_eq!(clean_html_text(html), "Hi");
    }

    #[test]
    fn turns_list_items_into_dashes() {
        let html = "<p>Steps:</p><ul><li>one</li><li>two</li></ul>";
        assert_eq!(clean_html_text(html), "Steps:\n\n- one\n- two");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(clean_html_text("<p>a</p>\n\n\n<p>b</p>"), "a\n\nb");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("a < b && c > d"), "a &lt; b &amp;&amp; c &gt; d");
    }
}
