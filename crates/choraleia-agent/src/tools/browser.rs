//! Browser tools, all taking a `browser_id` and delegating to the browser
//! controller.

use std::sync::Arc;

use async_trait::async_trait;
use choraleia_browser::BrowserController;
use choraleia_core::types::BrowserId;
use serde_json::{json, Value};

use super::{Tool, ToolResult};

/// One browser action; the declarative table below stamps out the tool set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Navigate,
    Click,
    Input,
    Scroll,
    Screenshot,
    Extract,
    Wait,
    OpenTab,
    SwitchTab,
    CloseTab,
    WebSearch,
    GetScrollInfo,
}

pub struct BrowserTool {
    controller: Arc<BrowserController>,
    action: Action,
}

impl BrowserTool {
    fn new(controller: Arc<BrowserController>, action: Action) -> Arc<Self> {
        Arc::new(Self { controller, action })
    }

    /// Build the whole browser tool set.
    pub fn all(controller: Arc<BrowserController>) -> Vec<Arc<dyn Tool>> {
        use Action::*;
        [
            Navigate, Click, Input, Scroll, Screenshot, Extract, Wait, OpenTab, SwitchTab,
            CloseTab, WebSearch, GetScrollInfo,
        ]
        .into_iter()
        .map(|action| Self::new(Arc::clone(&controller), action) as Arc<dyn Tool>)
        .collect()
    }
}

fn browser_id(args: &Value) -> Result<BrowserId, ToolResult> {
    args.get("browser_id")
        .and_then(|v| v.as_str())
        .map(BrowserId::from)
        .ok_or_else(|| ToolResult::error("missing required parameter: browser_id"))
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolResult> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolResult::error(format!("missing required parameter: {key}")))
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        match self.action {
            Action::Navigate => "browser_navigate",
            Action::Click => "browser_click",
            Action::Input => "browser_input",
            Action::Scroll => "browser_scroll",
            Action::Screenshot => "browser_screenshot",
            Action::Extract => "browser_extract",
            Action::Wait => "browser_wait",
            Action::OpenTab => "browser_open_tab",
            Action::SwitchTab => "browser_switch_tab",
            Action::CloseTab => "browser_close_tab",
            Action::WebSearch => "browser_web_search",
            Action::GetScrollInfo => "browser_get_scroll_info",
        }
    }

    fn description(&self) -> &str {
        match self.action {
            Action::Navigate => "Navigate the active tab to a URL.",
            Action::Click => "Click the first element matching a CSS selector.",
            Action::Input => "Type text into the element matching a CSS selector.",
            Action::Scroll => "Scroll the page by pixel deltas.",
            Action::Screenshot => "Capture the viewport as a base64 PNG.",
            Action::Extract => {
                "Extract visible text from the page, or from a CSS selector when given."
            }
            Action::Wait => "Wait for the given number of milliseconds.",
            Action::OpenTab => "Open a new tab at a URL and make it active.",
            Action::SwitchTab => "Switch the active tab.",
            Action::CloseTab => "Close a tab.",
            Action::WebSearch => "Run a web search and return the results page text.",
            Action::GetScrollInfo => "Report scroll position and page dimensions.",
        }
    }

    fn input_schema(&self) -> Value {
        let base = json!({ "browser_id": { "type": "string" } });
        let (mut properties, required): (serde_json::Map<String, Value>, Vec<&str>) =
            match self.action {
                Action::Navigate | Action::OpenTab => (
                    json!({ "url": { "type": "string" } }).as_object().cloned().unwrap_or_default(),
                    vec!["browser_id", "url"],
                ),
                Action::Click => (
                    json!({ "selector": { "type": "string" } })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    vec!["browser_id", "selector"],
                ),
                Action::Input => (
                    json!({ "selector": { "type": "string" }, "text": { "type": "string" } })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    vec!["browser_id", "selector", "text"],
                ),
                Action::Scroll => (
                    json!({ "dx": { "type": "integer", "default": 0 },
                            "dy": { "type": "integer", "default": 600 } })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    vec!["browser_id"],
                ),
                Action::Wait => (
                    json!({ "ms": { "type": "integer", "default": 1000 } })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    vec!["browser_id"],
                ),
                Action::SwitchTab | Action::CloseTab => (
                    json!({ "tab_id": { "type": "string" } })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    vec!["browser_id", "tab_id"],
                ),
                Action::WebSearch => (
                    json!({ "query": { "type": "string" } })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    vec!["browser_id", "query"],
                ),
                Action::Extract => (
                    json!({ "selector": { "type": "string" } })
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                    vec!["browser_id"],
                ),
                Action::Screenshot | Action::GetScrollInfo => {
                    (serde_json::Map::new(), vec!["browser_id"])
                }
            };
        for (k, v) in base.as_object().cloned().unwrap_or_default() {
            properties.insert(k, v);
        }
        json!({ "type": "object", "properties": properties, "required": required })
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let id = match browser_id(&args) {
            Ok(id) => id,
            Err(e) => return e,
        };

        let outcome = match self.action {
            Action::Navigate => match required_str(&args, "url") {
                Ok(url) => self
                    .controller
                    .navigate(&id, url)
                    .await
                    .map(|_| format!("Navigated to {url}")),
                Err(e) => return e,
            },
            Action::Click => match required_str(&args, "selector") {
                Ok(selector) => self
                    .controller
                    .click(&id, selector)
                    .await
                    .map(|_| format!("Clicked {selector}")),
                Err(e) => return e,
            },
            Action::Input => {
                let selector = match required_str(&args, "selector") {
                    Ok(s) => s,
                    Err(e) => return e,
                };
                let text = match required_str(&args, "text") {
                    Ok(t) => t,
                    Err(e) => return e,
                };
                self.controller
                    .input(&id, selector, text)
                    .await
                    .map(|_| format!("Typed into {selector}"))
            }
            Action::Scroll => {
                let dx = args.get("dx").and_then(|v| v.as_i64()).unwrap_or(0);
                let dy = args.get("dy").and_then(|v| v.as_i64()).unwrap_or(600);
                self.controller
                    .scroll(&id, dx, dy)
                    .await
                    .map(|_| format!("Scrolled by ({dx}, {dy})"))
            }
            Action::Screenshot => self.controller.screenshot(&id).await,
            Action::Extract => {
                let selector = args.get("selector").and_then(|v| v.as_str());
                self.controller.extract(&id, selector).await
            }
            Action::Wait => {
                let ms = args.get("ms").and_then(|v| v.as_u64()).unwrap_or(1000);
                self.controller
                    .wait_ms(&id, ms)
                    .await
                    .map(|_| format!("Waited {ms}ms"))
            }
            Action::OpenTab => match required_str(&args, "url") {
                Ok(url) => self
                    .controller
                    .open_tab(&id, url)
                    .await
                    .map(|tab| format!("Opened tab {} at {url}", tab.id)),
                Err(e) => return e,
            },
            Action::SwitchTab => match required_str(&args, "tab_id") {
                Ok(tab_id) => self
                    .controller
                    .switch_tab(&id, tab_id)
                    .await
                    .map(|_| format!("Switched to tab {tab_id}")),
                Err(e) => return e,
            },
            Action::CloseTab => match required_str(&args, "tab_id") {
                Ok(tab_id) => self
                    .controller
                    .close_tab(&id, tab_id)
                    .await
                    .map(|_| format!("Closed tab {tab_id}")),
                Err(e) => return e,
            },
            Action::WebSearch => match required_str(&args, "query") {
                Ok(query) => self.controller.web_search(&id, query).await,
                Err(e) => return e,
            },
            Action::GetScrollInfo => self
                .controller
                .scroll_info(&id)
                .await
                .map(|v| v.to_string()),
        };

        match outcome {
            Ok(content) => ToolResult::success(content),
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use choraleia_core::config::BrowserConfig;
    use choraleia_core::config::SshDefaults;
    use choraleia_ssh::{SshPool, TunnelManager};
    use choraleia_store::Store;

    fn controller() -> Arc<BrowserController> {
        Arc::new(BrowserController::new(
            Arc::new(Store::open_in_memory().unwrap()),
            Arc::new(SshPool::new(&SshDefaults::default())),
            Arc::new(TunnelManager::new()),
            BrowserConfig::default(),
        ))
    }

    #[test]
    fn tool_set_carries_the_full_protocol_names() {
        let tools = BrowserTool::all(controller());
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "browser_navigate",
                "browser_click",
                "browser_input",
                "browser_scroll",
                "browser_screenshot",
                "browser_extract",
                "browser_wait",
                "browser_open_tab",
                "browser_switch_tab",
                "browser_close_tab",
                "browser_web_search",
                "browser_get_scroll_info",
            ]
        );
    }

    #[test]
    fn every_schema_requires_browser_id() {
        for tool in BrowserTool::all(controller()) {
            let schema = tool.input_schema();
            let required: Vec<String> = schema["required"]
                .as_array()
                .unwrap()
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect();
            assert!(
                required.contains(&"browser_id".to_string()),
                "{} schema misses browser_id",
                tool.name()
            );
        }
    }

    #[tokio::test]
    async fn missing_browser_id_is_an_error_result() {
        let tools = BrowserTool::all(controller());
        let result = tools[0].invoke(serde_json::json!({})).await;
        assert!(result.is_error);
        assert!(result.content.contains("browser_id"));
    }
}
