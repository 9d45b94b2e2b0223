//! Scripted upstream for unit tests. Runs under tokio's paused clock.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use wikipipe_core::{Error, Result, UpstreamBackend, UpstreamResponse};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Response {
        status: u16,
        headers: BTreeMap<String, String>,
        body: String,
    },
    Transport(String),
}

impl Reply {
    pub(crate) fn status(status: u16) -> Self {
        Self::text(status, "")
    }

    pub(crate) fn text(status: u16, body: &str) -> Self {
        Self::Response {
            status,
            headers: BTreeMap::new(),
            body: body.to_string(),
        }
    }

    pub(crate) fn json(status: u16, body: serde_json::Value) -> Self {
        Self::text(status, &body.to_string())
    }

    pub(crate) fn transport(msg: &str) -> Self {
        Self::Transport(msg.to_string())
    }

    pub(crate) fn with_header(mut self, name: &str, value: &str) -> Self {
        if let Self::Response { headers, .. } = &mut self {
            headers.insert(name.to_ascii_lowercase(), value.to_string());
        }
        self
    }
}

struct Route {
    needle: String,
    // The last reply repeats once the script runs out.
    script: VecDeque<Reply>,
}

#[derive(Default)]
pub(crate) struct FakeUpstream {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<(String, Instant)>>,
    latency: Duration,
}

impl FakeUpstream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// First route whose needle is a substring of the URL answers it.
    pub(crate) fn route(self, needle: &str, script: Vec<Reply>) -> Self {
        self.routes.lock().unwrap().push(Route {
            needle: needle.to_string(),
            script: script.into(),
        });
        self
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u.contains(needle))
            .count()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(u, _)| u.clone())
            .collect()
    }

    pub(crate) fn call_offsets(&self, t0: Instant) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| at.duration_since(t0))
            .collect()
    }

    fn next_reply(&self, url: &str) -> Reply {
        let mut routes = self.routes.lock().unwrap();
        let Some(route) = routes.iter_mut().find(|r| url.contains(&r.needle)) else {
            return Reply::text(404, "no route");
        };
        if route.script.len() > 1 {
            route.script.pop_front().unwrap_or_else(|| Reply::status(500))
        } else {
            route
                .script
                .front()
                .cloned()
                .unwrap_or_else(|| Reply::status(500))
        }
    }
}

#[async_trait::async_trait]
impl UpstreamBackend for FakeUpstream {
    async fn get(&self, url: &str) -> Result<UpstreamResponse> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.next_reply(url) {
            Reply::Response {
                status,
                headers,
                body,
            } => Ok(UpstreamResponse {
                url: url.to_string(),
                status,
                headers,
                body: body.into_bytes(),
            }),
            Reply::Transport(msg) => Err(Error::Fetch(msg)),
        }
    }
}
