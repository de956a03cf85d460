//! Minimal W3C WebDriver client.
//!
//! Speaks the JSON wire protocol to a chromedriver/geckodriver endpoint. Only
//! the commands [`BrowserDriver`] needs are implemented.

use super::{BrowserDriver, BrowserLauncher};
use crate::error::{SessionTransportError, TransportResult};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a4d6-4c5c6b9f1c4";

/// Launches browsers through a WebDriver endpoint.
pub struct WebDriverLauncher {
    client: Client,
    endpoint: String,
    browser_name: String,
    headless: bool,
}

impl WebDriverLauncher {
    pub fn new(
        endpoint: impl Into<String>,
        browser_name: impl Into<String>,
        headless: bool,
        command_timeout: Duration,
    ) -> TransportResult<Self> {
        let client = Client::builder()
            .timeout(command_timeout)
            .build()
            .map_err(|e| SessionTransportError::Launch(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            browser_name: browser_name.into(),
            headless,
        })
    }

    fn capabilities(&self) -> Value {
        let mut args = vec!["--window-size=1600,1000".to_string()];
        if self.headless {
            args.push("--headless".to_string());
        }

        let mut always_match = json!({ "browserName": self.browser_name });
        let options_key = match self.browser_name.as_str() {
            "firefox" => "moz:firefoxOptions",
            _ => "goog:chromeOptions",
        };
        always_match[options_key] = json!({ "args": args });

        json!({ "capabilities": { "alwaysMatch": always_match } })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> TransportResult<Box<dyn BrowserDriver>> {
        let response = self
            .client
            .post(format!("{}/session", self.endpoint))
            .json(&self.capabilities())
            .send()
            .await
            .map_err(|e| SessionTransportError::Launch(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| SessionTransportError::Launch(e.to_string()))?;
        if let Some(err) = protocol_error(&body) {
            return Err(SessionTransportError::Launch(err.to_string()));
        }

        let session_id = body["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| SessionTransportError::Launch("response missing sessionId".to_string()))?
            .to_string();
        debug!(session_id = %session_id, "Started WebDriver session");

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.endpoint, session_id),
            session_id,
        }))
    }
}

/// One remote browser session.
pub struct WebDriverSession {
    client: Client,
    base: String,
    session_id: String,
}

impl WebDriverSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> TransportResult<Value> {
        let url = if path.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{}", self.base, path)
        };

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SessionTransportError::Timeout(format!("{path}: {e}"))
            } else {
                SessionTransportError::Crashed(e.to_string())
            }
        })?;

        let value: Value = response
            .json()
            .await
            .map_err(|e| SessionTransportError::Protocol(e.to_string()))?;

        match protocol_error(&value) {
            Some(err) => Err(err),
            None => Ok(value["value"].clone()),
        }
    }

    async fn find(&self, selector: &str) -> TransportResult<String> {
        let value = self
            .command(
                Method::POST,
                "element",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await
            .map_err(|err| match err {
                SessionTransportError::ElementNotFound { .. } => {
                    SessionTransportError::ElementNotFound {
                        selector: selector.to_string(),
                    }
                }
                other => other,
            })?;
        element_id(&value)
    }

    async fn find_all(&self, selector: &str) -> TransportResult<Vec<String>> {
        let value = self
            .command(
                Method::POST,
                "elements",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;

        value
            .as_array()
            .map(|elements| elements.iter().map(element_id).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn element_text(&self, element: &str) -> TransportResult<String> {
        let value = self
            .command(Method::GET, &format!("element/{element}/text"), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl BrowserDriver for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> TransportResult<()> {
        self.command(Method::POST, "url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn current_url(&mut self) -> TransportResult<String> {
        let value = self.command(Method::GET, "url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SessionTransportError::Protocol("url is not a string".to_string()))
    }

    async fn is_present(&mut self, selector: &str) -> TransportResult<bool> {
        Ok(!self.find_all(selector).await?.is_empty())
    }

    async fn read_text(&mut self, selector: &str) -> TransportResult<String> {
        let element = self.find(selector).await?;
        self.element_text(&element).await
    }

    async fn read_all_text(&mut self, selector: &str) -> TransportResult<Vec<String>> {
        let mut texts = Vec::new();
        for element in self.find_all(selector).await? {
            texts.push(self.element_text(&element).await?);
        }
        Ok(texts)
    }

    async fn click(&mut self, selector: &str) -> TransportResult<()> {
        let element = self.find(selector).await?;
        self.command(Method::POST, &format!("element/{element}/click"), Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> TransportResult<()> {
        let element = self.find(selector).await?;
        self.command(Method::POST, &format!("element/{element}/clear"), Some(json!({})))
            .await?;
        self.command(
            Method::POST,
            &format!("element/{element}/value"),
            Some(json!({ "text": text })),
        )
        .await
        .map(|_| ())
    }

    async fn screenshot(&mut self) -> TransportResult<Vec<u8>> {
        let value = self.command(Method::GET, "screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| SessionTransportError::Protocol("screenshot is not a string".to_string()))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| SessionTransportError::Protocol(format!("screenshot decode: {e}")))
    }

    async fn quit(&mut self) -> TransportResult<()> {
        debug!(session_id = %self.session_id, "Deleting WebDriver session");
        self.command(Method::DELETE, "", None).await.map(|_| ())
    }
}

/// Extracts a W3C error object from a response body, if present.
fn protocol_error(body: &Value) -> Option<SessionTransportError> {
    let error = body["value"]["error"].as_str()?;
    let message = body["value"]["message"].as_str().unwrap_or_default();

    Some(match error {
        "no such element" => SessionTransportError::ElementNotFound {
            selector: message.to_string(),
        },
        "timeout" | "script timeout" => SessionTransportError::Timeout(message.to_string()),
        "invalid session id" | "session not created" => {
            SessionTransportError::Crashed(format!("{error}: {message}"))
        }
        _ => SessionTransportError::Protocol(format!("{error}: {message}")),
    })
}

fn element_id(value: &Value) -> TransportResult<String> {
    value[ELEMENT_KEY]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SessionTransportError::Protocol("missing element reference".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launcher(browser: &str, headless: bool) -> WebDriverLauncher {
        WebDriverLauncher::new("http://localhost:4444/", browser, headless, Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_chrome_capabilities_include_headless_flag() {
        let caps = launcher("chrome", true).capabilities();
        let args = &caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"];
        assert!(args.as_array().unwrap().iter().any(|a| a == "--headless"));
    }

    #[test]
    fn test_firefox_capabilities_use_moz_options() {
        let caps = launcher("firefox", false).capabilities();
        let always = &caps["capabilities"]["alwaysMatch"];
        assert_eq!(always["browserName"], "firefox");
        let args = always["moz:firefoxOptions"]["args"].as_array().unwrap();
        assert!(!args.iter().any(|a| a == "--headless"));
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        assert_eq!(launcher("chrome", true).endpoint, "http://localhost:4444");
    }

    #[test]
    fn test_protocol_error_classification() {
        let missing = json!({ "value": { "error": "no such element", "message": "#x" } });
        assert!(matches!(
            protocol_error(&missing),
            Some(SessionTransportError::ElementNotFound { .. })
        ));

        let gone = json!({ "value": { "error": "invalid session id", "message": "" } });
        assert!(matches!(protocol_error(&gone), Some(SessionTransportError::Crashed(_))));

        let ok = json!({ "value": null });
        assert!(protocol_error(&ok).is_none());
    }

    #[test]
    fn test_element_id_extraction() {
        let value = json!({ ELEMENT_KEY: "abc-123" });
        assert_eq!(element_id(&value).unwrap(), "abc-123");
        assert!(element_id(&json!({})).is_err());
    }
}
