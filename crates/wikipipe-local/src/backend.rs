use std::collections::BTreeMap;
use std::time::Duration;
use wikipipe_core::{Error, Result, UpstreamBackend, UpstreamResponse};

pub const DEFAULT_USER_AGENT: &str =
    "wikipipe/0.1 (+https://github.com/wikipipe/wikipipe; contact: GitHub Issues)";
pub const ACCEPT_ENCODING_HINT: &str = "gzip, br";

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// reqwest-backed upstream. Sends the client identifier both as `User-Agent`
/// and `Api-User-Agent` (the header browsers cannot override).
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: reqwest::Client,
    user_agent: String,
}

impl ReqwestBackend {
    pub fn new(cfg: BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(cfg.connect_timeout)
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| Error::Fetch(e.to_string()))?;
        Ok(Self {
            client,
            user_agent: cfg.user_agent,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

#[async_trait::async_trait]
impl UpstreamBackend for ReqwestBackend {
    async fn get(&self, url: &str) -> Result<UpstreamResponse> {
        let parsed = url::Url::parse(url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let resp = self
            .client
            .get(parsed)
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str())
            .header("Api-User-Agent", self.user_agent.as_str())
            .header(reqwest::header::ACCEPT_ENCODING, ACCEPT_ENCODING_HINT)
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;

        let status = resp.status().as_u16();
        let mut headers = BTreeMap::new();
        for (k, v) in resp.headers().iter() {
            if let Ok(s) = v.to_str() {
                headers.insert(k.as_str().to_string(), s.to_string());
            }
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?
            .to_vec();

        Ok(UpstreamResponse {
            url: url.to_string(),
            status,
            headers,
            body,
        })
    }
}
