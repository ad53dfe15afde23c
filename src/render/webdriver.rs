//! Minimal W3C WebDriver client (chromedriver, geckodriver) over reqwest

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::PageRenderer;
use crate::config::{Config, WaitConfig};
use crate::errors::{Result, ScraperError};

const CHROME_ARGS: &[&str] = &[
    "--headless",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-software-rasterizer",
    "--disable-background-timer-throttling",
    "--disable-renderer-backgrounding",
    "--disable-backgrounding-occluded-windows",
    "--disable-extensions",
    "--disable-default-apps",
    "--mute-audio",
    "--window-size=1920,1080",
];

/// XPath probes tried in order until one matches
const CONTENT_PROBES: &[(&str, &str)] = &[
    ("table", "//table"),
    (
        "filing text",
        "//*[contains(text(), 'ATTACHMENT') or contains(text(), 'Annual') or contains(text(), 'Report')]",
    ),
    ("links", "//a[@href]"),
];

const SCROLL_SCRIPTS: &[&str] = &[
    "window.scrollTo(0, document.body.scrollHeight);",
    "window.scrollTo(0, 0);",
    "window.scrollTo(0, document.body.scrollHeight / 2);",
    "window.scrollTo(0, document.body.scrollHeight);",
    "window.scrollTo(0, 0);",
];

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct WebDriverRenderer {
    client: Client,
    endpoint: String,
    user_agent: String,
    waits: WaitConfig,
    element_timeout: Duration,
}

impl WebDriverRenderer {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.element_timeout() * 4)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.render.webdriver_url.trim_end_matches('/').to_string(),
            user_agent: config.http.user_agent.clone(),
            waits: config.waits.clone(),
            element_timeout: config.element_timeout(),
        })
    }

    /// New-session payload for a headless Chrome
    fn capabilities(&self) -> Value {
        let mut args: Vec<String> = CHROME_ARGS.iter().map(|a| a.to_string()).collect();
        args.push(format!("--user-agent={}", self.user_agent));

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "excludeSwitches": ["enable-logging", "enable-automation"],
                    },
                },
            },
        })
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{}", self.endpoint, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let ok = response.status().is_success();
        let payload: Value = response.json().await?;
        command_value(path, ok, payload)
    }

    async fn open_session(&self) -> Result<String> {
        let value = self
            .command(Method::POST, "/session", Some(self.capabilities()))
            .await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| ScraperError::webdriver("/session", "response carried no sessionId"))?
            .to_string();

        // Element waits are polled here, so the driver must not block on its own.
        let timeouts = json!({ "implicit": 0, "pageLoad": self.element_timeout.as_millis() as u64 * 3 });
        if let Err(e) = self
            .command(Method::POST, &format!("/session/{}/timeouts", id), Some(timeouts))
            .await
        {
            self.close_session(&id).await;
            return Err(e);
        }

        debug!("Opened WebDriver session {}", id);
        Ok(id)
    }

    async fn close_session(&self, id: &str) {
        if let Err(e) = self
            .command(Method::DELETE, &format!("/session/{}", id), None)
            .await
        {
            warn!("Failed to close WebDriver session {}: {}", id, e);
        }
    }

    async fn has_elements(&self, id: &str, xpath: &str) -> Result<bool> {
        let value = self
            .command(
                Method::POST,
                &format!("/session/{}/elements", id),
                Some(json!({ "using": "xpath", "value": xpath })),
            )
            .await?;
        Ok(value.as_array().map_or(false, |found| !found.is_empty()))
    }

    /// Poll until `xpath` matches or the element timeout runs out
    async fn wait_for(&self, id: &str, xpath: &str) -> Result<bool> {
        let deadline = Instant::now() + self.element_timeout;
        loop {
            if self.has_elements(id, xpath).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn execute(&self, id: &str, script: &str) -> Result<Value> {
        self.command(
            Method::POST,
            &format!("/session/{}/execute/sync", id),
            Some(json!({ "script": script, "args": [] })),
        )
        .await
    }

    async fn scroll_through(&self, id: &str) -> Result<()> {
        for script in SCROLL_SCRIPTS {
            self.execute(id, script).await?;
            tokio::time::sleep(self.waits.scroll_pause()).await;
        }
        Ok(())
    }

    async fn load(&self, id: &str, url: &str, attempt: u32) -> Result<String> {
        self.command(
            Method::POST,
            &format!("/session/{}/url", id),
            Some(json!({ "url": url })),
        )
        .await?;

        let initial = self.waits.initial_wait(attempt);
        debug!("Initial wait: {:?} for attempt {}", initial, attempt + 1);
        tokio::time::sleep(initial).await;

        let mut content_seen = false;
        for (label, xpath) in CONTENT_PROBES {
            if self.wait_for(id, xpath).await? {
                debug!("Detected {} on {}", label, url);
                content_seen = true;
                break;
            }
        }
        if !content_seen {
            debug!("No content probe matched on {}", url);
        }

        let content = self.waits.content_wait(attempt);
        debug!("Content wait: {:?} for attempt {}", content, attempt + 1);
        tokio::time::sleep(content).await;

        if let Err(e) = self.scroll_through(id).await {
            debug!("Scroll error on {}: {}", url, e);
        }

        let settle = self.waits.settle_wait(attempt);
        debug!("Additional dynamic content wait: {:?}", settle);
        tokio::time::sleep(settle).await;

        let source = self
            .command(Method::GET, &format!("/session/{}/source", id), None)
            .await?;
        source
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ScraperError::webdriver("source", "page source was not a string"))
    }
}

/// Unwrap the `value` member of a WebDriver response, turning error
/// payloads into `ScraperError::WebDriver`.
fn command_value(command: &str, ok: bool, payload: Value) -> Result<Value> {
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(ScraperError::webdriver(command, format!("{}: {}", error, message)));
    }
    if !ok {
        return Err(ScraperError::webdriver(command, payload.to_string()));
    }
    Ok(value)
}

#[async_trait]
impl PageRenderer for WebDriverRenderer {
    async fn render(&self, url: &str, attempt: u32) -> Result<String> {
        let id = self.open_session().await?;
        let result = self.load(&id, url, attempt).await;
        self.close_session(&id).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Read one HTTP request and return its request line as "METHOD /path"
    async fn read_request(socket: &mut TcpStream) -> Option<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let mut parts = head.lines().next()?.split_whitespace();
        Some(format!("{} {}", parts.next()?, parts.next()?))
    }

    /// Local chromedriver stand-in that logs every command it receives
    async fn fake_driver(reject_timeouts: bool) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let Some(request) = read_request(&mut socket).await else {
                    continue;
                };
                seen.lock().unwrap().push(request.clone());

                let (status, body) = if request == "POST /session" {
                    ("200 OK", json!({ "value": { "sessionId": "S1", "capabilities": {} } }))
                } else if request.ends_with("/timeouts") && reject_timeouts {
                    (
                        "500 Internal Server Error",
                        json!({ "value": { "error": "unknown error", "message": "timeouts rejected" } }),
                    )
                } else if request.ends_with("/elements") {
                    ("200 OK", json!({ "value": [{ "element-6066-11e4-a52e-4f735466cecf": "E1" }] }))
                } else if request.ends_with("/source") {
                    ("200 OK", json!({ "value": "<html><body><table></table></body></html>" }))
                } else {
                    ("200 OK", json!({ "value": null }))
                };

                let body = body.to_string();
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (endpoint, log)
    }

    fn driver_config(endpoint: &str) -> Config {
        let mut config = Config::default();
        config.render.webdriver_url = endpoint.to_string();
        config.waits = WaitConfig::instant();
        config
    }

    #[tokio::test]
    async fn test_session_closed_when_timeouts_rejected() {
        let (endpoint, log) = fake_driver(true).await;
        let renderer = WebDriverRenderer::new(&driver_config(&endpoint)).unwrap();

        assert!(renderer.render("https://www.nseindia.com/", 0).await.is_err());

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec!["POST /session", "POST /session/S1/timeouts", "DELETE /session/S1"]
        );
    }

    #[tokio::test]
    async fn test_render_returns_source_and_closes_session() {
        let (endpoint, log) = fake_driver(false).await;
        let renderer = WebDriverRenderer::new(&driver_config(&endpoint)).unwrap();

        let html = renderer.render("https://www.nseindia.com/", 0).await.unwrap();
        assert!(html.contains("<table>"));

        let log = log.lock().unwrap().clone();
        assert_eq!(log.first().map(String::as_str), Some("POST /session"));
        assert!(log.contains(&"POST /session/S1/url".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("DELETE /session/S1"));
    }

    #[test]
    fn test_command_value_unwraps_value() {
        let payload = json!({ "value": { "sessionId": "abc", "capabilities": {} } });
        let value = command_value("/session", true, payload).unwrap();
        assert_eq!(value["sessionId"], "abc");
    }

    #[test]
    fn test_command_value_reports_driver_errors() {
        let payload = json!({
            "value": { "error": "no such window", "message": "target window already closed" }
        });
        let err = command_value("/session/1/source", false, payload).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("no such window"));
        assert!(text.contains("/session/1/source"));
    }

    #[test]
    fn test_capabilities_request_headless_chrome() {
        let renderer = WebDriverRenderer::new(&Config::default()).unwrap();
        let caps = renderer.capabilities();
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(args.iter().any(|a| a == "--headless"));
        assert!(args.iter().any(|a| a.as_str().unwrap().starts_with("--user-agent=")));
        assert_eq!(renderer.endpoint, "http://localhost:9515");
    }
}
