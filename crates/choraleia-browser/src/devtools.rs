//! Chrome DevTools protocol client: the HTTP target endpoints plus a
//! command/response WebSocket per page target.

use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{BrowserError, Result};
use crate::types::Tab;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Command connection to one page target.
pub struct DevToolsClient {
    ws: Mutex<WsStream>,
    next_id: AtomicU64,
}

impl DevToolsClient {
    /// Connect to a target's `webSocketDebuggerUrl` and enable the Page
    /// domain.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (ws, _) = connect_async(ws_url)
            .await
            .map_err(|e| BrowserError::WebSocket(e.to_string()))?;
        let client = Self {
            ws: Mutex::new(ws),
            next_id: AtomicU64::new(1),
        };
        client.call("Page.enable", json!({})).await?;
        Ok(client)
    }

    /// Send one CDP command and wait for its response, skipping interleaved
    /// event notifications.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({ "id": id, "method": method, "params": params });
        debug!(method, id, "devtools call");

        let mut ws = self.ws.lock().await;
        ws.send(Message::Text(payload.to_string().into()))
            .await
            .map_err(|e| BrowserError::WebSocket(e.to_string()))?;

        loop {
            let msg = ws
                .next()
                .await
                .ok_or_else(|| BrowserError::WebSocket("connection closed".into()))?
                .map_err(|e| BrowserError::WebSocket(e.to_string()))?;
            let Message::Text(text) = msg else { continue };
            let value: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "unparseable devtools frame");
                    continue;
                }
            };
            if value["id"].as_u64() != Some(id) {
                // Event or a response to someone else's command; skip.
                continue;
            }
            if let Some(error) = value.get("error") {
                return Err(BrowserError::DevTools(error.to_string()));
            }
            return Ok(value["result"].clone());
        }
    }

    // -----------------------------------------------------------------------
    // Page actions
    // -----------------------------------------------------------------------

    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.call("Page.navigate", json!({ "url": url })).await?;
        Ok(())
    }

    /// Evaluate JS in the page and return the value (returnByValue).
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        if let Some(exception) = result.get("exceptionDetails") {
            return Err(BrowserError::DevTools(exception.to_string()));
        }
        Ok(result["result"]["value"].clone())
    }

    /// Click the first element matching `selector`.
    pub async fn click(&self, selector: &str) -> Result<()> {
        let expr = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             el.click(); return true; }})()",
            sel = serde_json::to_string(selector).unwrap_or_default()
        );
        match self.evaluate(&expr).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(BrowserError::DevTools(format!(
                "no element matches selector {selector}"
            ))),
        }
    }

    /// Set the value of an input element and fire input/change events.
    pub async fn input(&self, selector: &str, text: &str) -> Result<()> {
        let expr = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             el.focus(); el.value = {val}; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); return true; }})()",
            sel = serde_json::to_string(selector).unwrap_or_default(),
            val = serde_json::to_string(text).unwrap_or_default()
        );
        match self.evaluate(&expr).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(BrowserError::DevTools(format!(
                "no element matches selector {selector}"
            ))),
        }
    }

    pub async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()> {
        self.evaluate(&format!("window.scrollBy({dx}, {dy}); true"))
            .await?;
        Ok(())
    }

    /// Page scroll geometry for the `get_scroll_info` tool.
    pub async fn scroll_info(&self) -> Result<Value> {
        self.evaluate(
            "({ x: window.scrollX, y: window.scrollY, \
               pageHeight: document.documentElement.scrollHeight, \
               viewportHeight: window.innerHeight })",
        )
        .await
    }

    /// Base64 PNG of the viewport.
    pub async fn screenshot(&self) -> Result<String> {
        let result = self
            .call("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        result["data"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| BrowserError::DevTools("screenshot returned no data".into()))
    }

    /// Visible text content of the page (or of `selector` when given).
    pub async fn extract_text(&self, selector: Option<&str>) -> Result<String> {
        let expr = match selector {
            Some(sel) => format!(
                "(document.querySelector({s})?.innerText) ?? ''",
                s = serde_json::to_string(sel).unwrap_or_default()
            ),
            None => "document.body.innerText".to_string(),
        };
        Ok(self
            .evaluate(&expr)
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

// ---------------------------------------------------------------------------
// HTTP target endpoints
// ---------------------------------------------------------------------------

/// `GET /json/version` — used as the readiness probe.
pub async fn probe(devtools_url: &str) -> Result<bool> {
    let url = format!("{devtools_url}/json/version");
    match reqwest::get(&url).await {
        Ok(resp) => Ok(resp.status().is_success()),
        Err(_) => Ok(false),
    }
}

/// `GET /json/list` — enumerate page targets.
pub async fn list_tabs(devtools_url: &str) -> Result<Vec<(Tab, String)>> {
    let url = format!("{devtools_url}/json/list");
    let targets: Vec<Value> = reqwest::get(&url).await?.json().await?;
    Ok(targets
        .into_iter()
        .filter(|t| t["type"].as_str() == Some("page"))
        .filter_map(|t| {
            let ws_url = t["webSocketDebuggerUrl"].as_str()?.to_string();
            Some((
                Tab {
                    id: t["id"].as_str()?.to_string(),
                    url: t["url"].as_str().unwrap_or_default().to_string(),
                    title: t["title"].as_str().unwrap_or_default().to_string(),
                },
                ws_url,
            ))
        })
        .collect())
}

/// `PUT /json/new?url=…` — open a tab, returning it with its ws url.
pub async fn open_tab(devtools_url: &str, url: &str) -> Result<(Tab, String)> {
    let endpoint = format!("{devtools_url}/json/new?{}", url_encode(url));
    let client = reqwest::Client::new();
    let target: Value = client.put(&endpoint).send().await?.json().await?;
    let ws_url = target["webSocketDebuggerUrl"]
        .as_str()
        .ok_or_else(|| BrowserError::DevTools("new tab has no debugger url".into()))?
        .to_string();
    Ok((
        Tab {
            id: target["id"].as_str().unwrap_or_default().to_string(),
            url: target["url"].as_str().unwrap_or_default().to_string(),
            title: target["title"].as_str().unwrap_or_default().to_string(),
        },
        ws_url,
    ))
}

/// `GET /json/close/<id>`.
pub async fn close_tab(devtools_url: &str, tab_id: &str) -> Result<()> {
    let url = format!("{devtools_url}/json/close/{tab_id}");
    let resp = reqwest::get(&url).await?;
    if !resp.status().is_success() {
        return Err(BrowserError::TabNotFound(tab_id.to_string()));
    }
    Ok(())
}

/// `GET /json/activate/<id>`.
pub async fn activate_tab(devtools_url: &str, tab_id: &str) -> Result<()> {
    let url = format!("{devtools_url}/json/activate/{tab_id}");
    let resp = reqwest::get(&url).await?;
    if !resp.status().is_success() {
        return Err(BrowserError::TabNotFound(tab_id.to_string()));
    }
    Ok(())
}

fn url_encode(s: &str) -> String {
    // Minimal query-component encoding for the /json/new target URL.
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' | b'/' => {
                out.push(b as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_encoding_keeps_scheme_and_path() {
        assert_eq!(
            url_encode("https://example.com/a b?q=1"),
            "https://example.com/a%20b%3Fq%3D1"
        );
    }
}
