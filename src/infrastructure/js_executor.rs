//! JS 执行器 - 基础设施层
//!
//! 持有唯一的聊天 page，暴露"执行 JS"以及元素定位需要的 DOM 能力

use async_trait::async_trait;
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::automation::locator::{Capability, ElementSource};
use crate::error::AutomationError;

/// 试探输入用的文本
const TRIAL_TEXT: &str = "test";

/// 可见、有尺寸、没有被禁用
const INTERACTABLE_FN: &str = r#"function() {
    const style = window.getComputedStyle(this);
    const rect = this.getBoundingClientRect();
    const visible = style.visibility !== 'hidden' && style.display !== 'none'
        && rect.width > 0 && rect.height > 0;
    const disabled = this.disabled === true || this.getAttribute('aria-disabled') === 'true';
    return visible && !disabled;
}"#;

const READ_FN: &str = r#"function() {
    if ('value' in this) { return String(this.value); }
    return this.innerText || this.textContent || '';
}"#;

const CLEAR_FN: &str = r#"function() {
    if ('value' in this) { this.value = ''; } else { this.textContent = ''; }
    this.dispatchEvent(new Event('input', { bubbles: true }));
}"#;

/// 试探按键之后内容确实变了，并且包含试探文本
fn trial_input_landed(before: &str, after: &str) -> bool {
    after != before && after.contains(TRIAL_TEXT)
}

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 eval() 能力
/// - 不认识 Submission / 评分
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（用于其他操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue, AutomationError> {
        let result = self.page.evaluate(js_code.into()).await?;
        result
            .into_value()
            .map_err(|e| AutomationError::Script(e.to_string()))
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(
        &self,
        js_code: impl Into<String>,
    ) -> Result<T, AutomationError> {
        let json_value = self.eval(js_code).await?;
        serde_json::from_value(json_value).map_err(|e| AutomationError::Script(e.to_string()))
    }

    /// 以 `element` 为 `this` 调用 `function() { ... }`
    pub async fn call_on(
        &self,
        element: &Element,
        function_declaration: impl Into<String>,
    ) -> Result<Option<JsonValue>, AutomationError> {
        let returns = element.call_js_fn(function_declaration, false).await?;
        Ok(returns.result.value)
    }

    async fn read_text(&self, element: &Element) -> Result<String, AutomationError> {
        Ok(self
            .call_on(element, READ_FN)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default())
    }

    async fn try_check(
        &self,
        element: &Element,
        capability: Capability,
    ) -> Result<bool, AutomationError> {
        let interactable = self
            .call_on(element, INTERACTABLE_FN)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !interactable {
            return Ok(false);
        }

        if capability == Capability::Typeable {
            let before = self.read_text(element).await?;
            element.scroll_into_view().await?;
            element.click().await?;
            element.type_str(TRIAL_TEXT).await?;
            let after = self.read_text(element).await?;
            self.call_on(element, CLEAR_FN).await?;

            if !trial_input_landed(&before, &after) {
                debug!("试探输入没有写进元素: {:?} -> {:?}", before, after);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// 清空输入框或 contenteditable 元素
    pub async fn clear(&self, element: &Element) -> Result<(), AutomationError> {
        self.call_on(element, CLEAR_FN).await?;
        Ok(())
    }
}

#[async_trait]
impl ElementSource for JsExecutor {
    type Element = Element;

    async fn find_all(&self, locator: &str) -> Result<Vec<Element>, AutomationError> {
        Ok(self.page.find_xpaths(locator).await?)
    }

    async fn check(&self, element: &Element, capability: Capability) -> bool {
        match self.try_check(element, capability).await {
            Ok(passed) => passed,
            Err(e) => {
                debug!("元素未通过 {:?} 检查: {}", capability, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_input_must_change_the_field() {
        assert!(trial_input_landed("", "test"));
        assert!(trial_input_landed("draft", "drafttest"));
        // 只读或吞掉按键的元素
        assert!(!trial_input_landed("", ""));
        assert!(!trial_input_landed("draft", "draft"));
        // 内容变了但不是我们输入的
        assert!(!trial_input_landed("", "placeholder"));
    }
}
