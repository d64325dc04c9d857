//! Thin HTTP client for the daemon's API.
//!
//! Every call attaches the token (when given) as `Authorization: Bearer`.
//! Non-2xx answers become errors carrying the daemon's `{error, kind}` body.

use anyhow::{anyhow, bail, Context, Result};
use mtb_schemas::{
    AckResponse, CommandEnvelope, PendingResponse, PostResponseReply, PostResponseRequest,
    SetCallbackRequest, SetTokenRequest,
};
use reqwest::{header::AUTHORIZATION, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

/// What `take` got back.
pub enum Taken {
    Empty,
    Json(CommandEnvelope),
    Line(String),
}

impl BridgeClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `{base}/commands/{name}` with the name as one percent-encoded segment.
    fn command_url(&self, name: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url("/commands"))
            .with_context(|| format!("invalid base url '{}'", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("base url '{}' cannot carry a path", self.base_url))?
            .push(name);
        Ok(url)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => req.header(AUTHORIZATION, format!("Bearer {t}")),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<Response> {
        let resp = self
            .authed(req)
            .send()
            .await
            .with_context(|| format!("{what}: daemon unreachable at {}", self.base_url))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        bail!("{what} failed: http {} {}", status.as_u16(), detail)
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
        self.send(req, what)
            .await?
            .json::<T>()
            .await
            .with_context(|| format!("{what}: unexpected response body"))
    }

    pub async fn status(&self) -> Result<Value> {
        self.json(self.http.get(self.url("/status")), "status").await
    }

    /// Queue a command and wait for its response text.
    pub async fn send_command(&self, name: &str, payload: &str) -> Result<String> {
        let req = self
            .http
            .post(self.command_url(name)?)
            .body(payload.to_string());
        let resp = self.send(req, "send").await?;
        resp.text().await.context("send: unreadable response body")
    }

    pub async fn pending(&self, wait_ms: Option<u64>) -> Result<PendingResponse> {
        let mut req = self.http.get(self.url("/poll/pending"));
        if let Some(ms) = wait_ms {
            req = req.query(&[("wait_ms", ms)]);
        }
        self.json(req, "pending").await
    }

    pub async fn take(&self, text: bool) -> Result<Taken> {
        let mut req = self.http.post(self.url("/poll/take"));
        if text {
            req = req.query(&[("format", "text")]);
        }
        let resp = self.send(req, "take").await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(Taken::Empty);
        }
        if text {
            return Ok(Taken::Line(resp.text().await.context("take: unreadable body")?));
        }
        Ok(Taken::Json(
            resp.json().await.context("take: unexpected response body")?,
        ))
    }

    pub async fn respond(&self, command: &str, response: &str) -> Result<PostResponseReply> {
        let body = PostResponseRequest {
            command: command.to_string(),
            response: response.to_string(),
        };
        self.json(self.http.post(self.url("/poll/response")).json(&body), "respond")
            .await
    }

    pub async fn set_callback(&self, url: &str, format: &str) -> Result<Value> {
        let body = SetCallbackRequest {
            url: url.to_string(),
            format: format.to_string(),
        };
        self.json(self.http.post(self.url("/poll/callback")).json(&body), "set-callback")
            .await
    }

    pub async fn raise_event(&self, payload: &str) -> Result<Value> {
        let req = self
            .http
            .post(self.url("/poll/event"))
            .body(payload.to_string());
        self.json(req, "raise-event").await
    }

    pub async fn set_token(&self, token: &str) -> Result<AckResponse> {
        let body = SetTokenRequest {
            token: token.to_string(),
        };
        self.json(self.http.post(self.url("/poll/auth-token")).json(&body), "set-token")
            .await
    }
}
