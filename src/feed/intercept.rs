//! Response interception.
//!
//! A hook script wraps `fetch` and `XMLHttpRequest` inside the page and keeps
//! every completed response in an in-page buffer. The capture pump drains that
//! buffer on a fixed interval, keeps the responses that belong to the data feed,
//! and forwards them over a channel to whoever is waiting for the next page.

use crate::error::Warning;
use crate::feed::FeedParser;
use crate::filter::FeedFilter;
use crate::results::ResultPage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Installs the capture hook. Safe to evaluate more than once per document.
pub const HOOK_SCRIPT: &str = r#"
(function () {
  if (window.__yieldCaptureHooked) { return; }
  window.__yieldCaptureHooked = true;
  window.__yieldCapture = window.__yieldCapture || [];

  const textual = (ct) => !ct || /json|text|javascript/i.test(ct);
  const push = (url, status, contentType, body) => {
    window.__yieldCapture.push({ url: String(url), status: status, contentType: contentType || '', body: body });
  };

  const origFetch = window.fetch;
  window.fetch = async function (...args) {
    const response = await origFetch.apply(this, args);
    try {
      const contentType = response.headers.get('content-type') || '';
      if (textual(contentType)) {
        const url = response.url || (typeof args[0] === 'string' ? args[0] : (args[0] && args[0].url) || '');
        response.clone().text().then(
          (body) => push(url, response.status, contentType, body),
          () => push(url, response.status, contentType, null)
        );
      }
    } catch (e) {}
    return response;
  };

  const origOpen = XMLHttpRequest.prototype.open;
  const origSend = XMLHttpRequest.prototype.send;
  XMLHttpRequest.prototype.open = function (method, url, ...rest) {
    this.__yieldUrl = url;
    return origOpen.apply(this, [method, url, ...rest]);
  };
  XMLHttpRequest.prototype.send = function (...args) {
    this.addEventListener('loadend', function () {
      try {
        const contentType = this.getResponseHeader('content-type') || '';
        if (!textual(contentType)) { return; }
        let body = null;
        if (this.responseType === '' || this.responseType === 'text') {
          body = this.responseText;
        } else if (this.responseType === 'json') {
          body = JSON.stringify(this.response);
        }
        push(this.responseURL || this.__yieldUrl || '', this.status, contentType, body);
      } catch (e) {}
    });
    return origSend.apply(this, args);
  };
})();
"#;

/// Takes everything captured so far and empties the buffer.
pub const DRAIN_SCRIPT: &str = r#"
const captured = window.__yieldCapture || [];
window.__yieldCapture = [];
return captured;
"#;

/// One response as recorded by the hook script
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapturedResponse {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub body: Option<String>,
}

impl CapturedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// JSON by content type, or untyped with a body that opens like JSON
    pub fn is_json(&self) -> bool {
        if self.content_type.is_empty() {
            let body = self.body.as_deref().unwrap_or_default().trim_start();
            return body.starts_with('{') || body.starts_with('[');
        }
        self.content_type.to_ascii_lowercase().contains("json")
    }
}

/// What the interceptor forwards to the pagination driver
#[derive(Debug, Clone, PartialEq)]
pub enum Intercepted {
    Page(ResultPage),
    Malformed(Warning),
}

/// What was seen of one response on a feed URL, kept for diagnosing a feed
/// that was never recognized
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSummary {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    /// Top-level keys of a JSON object body, or a short shape description
    pub data_keys: Value,
}

impl ResponseSummary {
    fn new(response: &CapturedResponse, body: Option<&Value>) -> Self {
        let data_keys = match body {
            Some(Value::Object(map)) => Value::from(map.keys().cloned().collect::<Vec<_>>()),
            Some(Value::Array(items)) => Value::from(format!("array of {}", items.len())),
            Some(_) => Value::from("scalar"),
            None => Value::Null,
        };
        Self {
            url: response.url.clone(),
            status: response.status,
            content_type: response.content_type.clone(),
            data_keys,
        }
    }
}

/// Shared record of every response that matched the feed filter
#[derive(Debug, Clone, Default)]
pub struct ResponseLog {
    entries: Arc<Mutex<Vec<ResponseSummary>>>,
}

impl ResponseLog {
    fn push(&self, summary: ResponseSummary) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(summary);
        }
    }

    pub fn snapshot(&self) -> Vec<ResponseSummary> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

/// Classifies captured responses into feed pages
#[derive(Debug, Clone)]
pub struct ResponseInterceptor {
    filter: FeedFilter,
    log: ResponseLog,
}

impl ResponseInterceptor {
    pub fn new(filter: FeedFilter) -> Self {
        Self {
            filter,
            log: ResponseLog::default(),
        }
    }

    /// Log of the responses this interceptor (and its clones) matched
    pub fn log(&self) -> &ResponseLog {
        &self.log
    }

    /// Inspect one captured response.
    ///
    /// Non-matching URLs, failed statuses, non-JSON content and empty bodies
    /// yield `None`, as does JSON that is not a feed page. A JSON response
    /// whose body does not parse yields a malformed-response warning, which
    /// is logged here.
    pub fn inspect(&self, response: CapturedResponse) -> Option<Intercepted> {
        if !self.filter.matches(&response.url) {
            ::log::trace!("Ignoring response from {}", response.url);
            return None;
        }
        if !response.is_success() {
            ::log::debug!("Ignoring HTTP {} from {}", response.status, response.url);
            self.log.push(ResponseSummary::new(&response, None));
            return None;
        }

        let body = response.body.as_deref().unwrap_or_default();
        if body.trim().is_empty() || !response.is_json() {
            ::log::debug!(
                "Ignoring non-JSON response ({:?}) from {}",
                response.content_type,
                response.url
            );
            self.log.push(ResponseSummary::new(&response, None));
            return None;
        }

        match serde_json::from_str::<Value>(body) {
            Ok(value) => {
                self.log.push(ResponseSummary::new(&response, Some(&value)));
                FeedParser::parse(&response.url, &value).map(Intercepted::Page)
            }
            Err(e) => {
                self.log.push(ResponseSummary::new(&response, None));
                let warning = Warning::MalformedResponse {
                    url: response.url,
                    reason: e.to_string(),
                };
                ::log::warn!("{}", warning);
                Some(Intercepted::Malformed(warning))
            }
        }
    }
}

/// Source of captured responses (the live page, or a fake in tests)
pub trait CaptureSource {
    fn drain(
        &mut self,
    ) -> impl Future<Output = Result<Vec<CapturedResponse>, fantoccini::error::CmdError>> + Send;
}

/// Handle on the running capture pump
pub struct CapturePump {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CapturePump {
    /// Starts draining `source` every `interval` and returns the receiving end
    /// of the event channel together with the pump handle.
    pub fn spawn<S>(
        mut source: S,
        interceptor: ResponseInterceptor,
        interval: Duration,
    ) -> (mpsc::Receiver<Intercepted>, Self)
    where
        S: CaptureSource + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel::<Intercepted>(1000);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            ::log::debug!("Capture pump started");
            loop {
                match source.drain().await {
                    Ok(batch) => {
                        for response in batch {
                            if let Some(event) = interceptor.inspect(response) {
                                if event_tx.send(event).await.is_err() {
                                    ::log::debug!("Capture receiver dropped, stopping pump");
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        ::log::warn!("Failed to drain captured responses: {}", e);
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => break,
                }
            }
            ::log::debug!("Capture pump stopped");
        });

        (event_rx, Self { stop_tx, handle })
    }

    /// Stops the pump and waits for it to finish
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            ::log::warn!("Capture pump ended abnormally: {}", e);
        }
    }
}
