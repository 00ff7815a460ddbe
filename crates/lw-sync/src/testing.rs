//! Scripted transport and host doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lw_core::{
    ContentBlockerHost, ExtensionRequestHandler, FetchResponse, HostError, ListCache, Settings,
    Transport, TransportError,
};
use parking_lot::Mutex;
use tokio::time::Instant;

/// A small valid rule list blocking `filter`.
pub fn rule_list(filter: &str) -> String {
    format!(r#"[{{"trigger":{{"url-filter":"{}"}},"action":{{"type":"block"}}}}]"#, filter)
}

pub fn list_url(name: &str) -> String {
    format!("https://lists.example/{}.json", name)
}

pub enum Reply {
    Ok(FetchResponse),
    Err(TransportError),
    /// Never answers.
    Hang,
}

#[derive(Default)]
pub struct MockTransport {
    scripted: Mutex<HashMap<String, VecDeque<(Duration, Reply)>>>,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue the next answer for `url`, delivered after `delay`.
    pub fn reply(&self, url: &str, delay: Duration, reply: Reply) {
        self.scripted
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back((delay, reply));
    }

    pub fn ok(&self, url: &str, delay: Duration, body: &str) {
        self.reply(url, delay, Reply::Ok(FetchResponse::new(body)));
    }

    pub fn fail(&self, url: &str, delay: Duration) {
        self.reply(url, delay, Reply::Err(TransportError::Status(503)));
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError> {
        self.calls.lock().push(url.to_string());
        let next = self.scripted.lock().get_mut(url).and_then(VecDeque::pop_front);
        let Some((delay, reply)) = next else {
            return Err(TransportError::Network(format!("unscripted fetch of {}", url)));
        };

        tokio::time::sleep(delay).await;
        match reply {
            Reply::Ok(response) => Ok(response),
            Reply::Err(e) => Err(e),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Content-blocker host double. Scripted results are consumed first; after
/// that it either answers like the extension process (when built with
/// [`MockHost::extension`]) or succeeds.
pub struct MockHost {
    script: Mutex<VecDeque<Result<(), HostError>>>,
    started: Mutex<Vec<Instant>>,
    extension: Option<ExtensionRequestHandler>,
    delay: Duration,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            started: Mutex::new(Vec::new()),
            extension: None,
            delay: Duration::ZERO,
        })
    }

    pub fn extension(settings: Settings, cache: Arc<dyn ListCache>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            started: Mutex::new(Vec::new()),
            extension: Some(ExtensionRequestHandler::new(settings, cache)),
            delay,
        })
    }

    pub fn push(&self, result: Result<(), HostError>) {
        self.script.lock().push_back(result);
    }

    pub fn reloads(&self) -> usize {
        self.started.lock().len()
    }

    /// Start time of every reload, in call order.
    pub fn started(&self) -> Vec<Instant> {
        self.started.lock().clone()
    }
}

#[async_trait]
impl ContentBlockerHost for MockHost {
    async fn reload(&self, _identifier: &str) -> Result<(), HostError> {
        self.started.lock().push(Instant::now());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.script.lock().pop_front();
        if let Some(result) = scripted {
            return result;
        }
        match &self.extension {
            Some(handler) => handler.begin_request().map(|_| ()),
            None => Ok(()),
        }
    }
}
