use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::Config;
use crate::error::{Result, ScoutError};
use crate::models::{
    AskRequest, AskResponse, BasicRecommendRequest, ChatRequest, ChatResponse, FeedbackRequest,
    FeedbackResponse, GraphRecommendRequest, RecommendResponse,
};

pub const GRAPH: &str = "graph";
pub const BASIC: &str = "basic";
pub const ASK: &str = "ask";
pub const FEEDBACK: &str = "feedback";
pub const CHAT: &str = "chat";
pub const HEALTH: &str = "health";

/// Network seam between the orchestration core and the recommendation service.
///
/// Every call is bounded by the timeout it is given; an expired call surfaces
/// as `ScoutError::Timeout`, indistinguishable from any other transient failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecommendTransport: Send + Sync {
    async fn recommend_graph(
        &self,
        req: &GraphRecommendRequest,
        timeout: Duration,
    ) -> Result<RecommendResponse>;

    async fn recommend_basic(
        &self,
        req: &BasicRecommendRequest,
        timeout: Duration,
    ) -> Result<RecommendResponse>;

    async fn ask(&self, req: &AskRequest, timeout: Duration) -> Result<AskResponse>;

    async fn feedback(&self, req: &FeedbackRequest, timeout: Duration)
    -> Result<FeedbackResponse>;

    async fn chat(&self, req: &ChatRequest, timeout: Duration) -> Result<ChatResponse>;

    async fn health(&self) -> Result<()>;
}

pub struct HttpTransport {
    client: Client,
    graph_url: String,
    basic_url: String,
    ask_url: String,
    feedback_url: String,
    chat_url: String,
    health_url: String,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ScoutError::Config(format!("Failed to build HTTP client: {e}")))?;
        let api = &config.api;
        Ok(Self {
            client,
            graph_url: api.url(&api.graph_path),
            basic_url: api.url(&api.basic_path),
            ask_url: api.url(&api.ask_path),
            feedback_url: api.url(&api.feedback_path),
            chat_url: api.url(&api.chat_path),
            health_url: api.url(&api.health_path),
        })
    }

    async fn post<Req, Resp>(
        &self,
        endpoint: &'static str,
        url: &str,
        body: &Req,
        timeout: Duration,
    ) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        tracing::debug!("POST {} ({})", url, endpoint);
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(endpoint, timeout, e))?;

        decode(endpoint, timeout, response).await
    }
}

fn send_error(endpoint: &'static str, timeout: Duration, e: reqwest::Error) -> ScoutError {
    if e.is_timeout() {
        ScoutError::Timeout {
            endpoint,
            secs: timeout.as_secs(),
        }
    } else {
        ScoutError::Network {
            endpoint,
            message: e.to_string(),
        }
    }
}

async fn decode<Resp: DeserializeOwned>(
    endpoint: &'static str,
    timeout: Duration,
    response: Response,
) -> Result<Resp> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| send_error(endpoint, timeout, e))?;

    if !status.is_success() {
        return Err(ScoutError::Http {
            endpoint,
            status: status.as_u16(),
            body: error_detail(&body),
        });
    }

    serde_json::from_str(&body).map_err(|e| ScoutError::Decode {
        endpoint,
        message: e.to_string(),
    })
}

/// Prefer the service's own `error`/`detail` text over the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["error", "detail", "message"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|d| d.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.chars().take(300).collect())
}

#[async_trait]
impl RecommendTransport for HttpTransport {
    async fn recommend_graph(
        &self,
        req: &GraphRecommendRequest,
        timeout: Duration,
    ) -> Result<RecommendResponse> {
        self.post(GRAPH, &self.graph_url, req, timeout).await
    }

    async fn recommend_basic(
        &self,
        req: &BasicRecommendRequest,
        timeout: Duration,
    ) -> Result<RecommendResponse> {
        self.post(BASIC, &self.basic_url, req, timeout).await
    }

    async fn ask(&self, req: &AskRequest, timeout: Duration) -> Result<AskResponse> {
        self.post(ASK, &self.ask_url, req, timeout).await
    }

    async fn feedback(
        &self,
        req: &FeedbackRequest,
        timeout: Duration,
    ) -> Result<FeedbackResponse> {
        self.post(FEEDBACK, &self.feedback_url, req, timeout).await
    }

    async fn chat(&self, req: &ChatRequest, timeout: Duration) -> Result<ChatResponse> {
        self.post(CHAT, &self.chat_url, req, timeout).await
    }

    async fn health(&self) -> Result<()> {
        let timeout = Duration::from_secs(5);
        let response = self
            .client
            .get(&self.health_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| send_error(HEALTH, timeout, e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ScoutError::Http {
                endpoint: HEALTH,
                status: response.status().as_u16(),
                body: String::new(),
            })
        }
    }
}
