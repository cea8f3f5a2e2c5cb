//! [`SlackApi`] over the real Slack Web API.
//!
//! `team.info` and `users.list` go through `slack-morphism`. The
//! `conversations.*` methods and file bodies are fetched with `reqwest` and
//! read as raw JSON, so channel and message fields that slack-morphism does
//! not model survive into the export. Both paths use the same token (and
//! session cookies, when present).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{COOKIE, RETRY_AFTER};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use slack_morphism::errors::SlackClientError;
use slack_morphism::prelude::*;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;
use url::Url;

use crate::auth::AuthProvider;
use crate::client::SlackApi;
use crate::types::{
    ChannelType, ChannelsPage, MessagesPage, TeamInfo, TimeWindow, UsersPage,
};
use crate::{AppError, Result};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const API_BASE: &str = "https://slack.com/api";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SlackWebApi {
    client: SlackHyperClient,
    token: SlackApiToken,
    http: reqwest::Client,
    bearer: String,
    cookie_header: Option<String>,
}

impl SlackWebApi {
    pub fn new(auth: &dyn AuthProvider) -> Result<Self> {
        auth.validate()?;

        let connector =
            SlackClientHyperConnector::new().map_err(|e| AppError::SlackApi(e.to_string()))?;
        let token = SlackApiToken::new(SlackApiTokenValue(auth.token().to_string()))
            .opt_cookie(auth.session_cookie().map(|c| SlackApiCookieValue(c.to_string())));
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AppError::SlackApi(e.to_string()))?;

        Ok(Self {
            client: SlackClient::new(connector),
            token,
            http,
            bearer: auth.token().to_string(),
            cookie_header: auth.cookie_header(),
        })
    }
}

#[async_trait]
impl SlackApi for SlackWebApi {
    async fn team_info(&self) -> Result<TeamInfo> {
        let session = self.client.open_session(&self.token);
        let response = session
            .team_info(&SlackApiTeamInfoRequest::new())
            .await
            .map_err(api_error)?;
        convert(&response.team)
    }

    async fn users_page(&self, cursor: Option<&str>, limit: u16) -> Result<UsersPage> {
        let session = self.client.open_session(&self.token);
        let request = SlackApiUsersListRequest::new()
            .with_limit(limit)
            .opt_cursor(cursor.map(|c| SlackCursorId(c.to_string())));

        let response = session.users_list(&request).await.map_err(api_error)?;

        Ok(UsersPage {
            users: convert(&response.members)?,
            next_cursor: next_cursor(response.response_metadata),
        })
    }

    async fn conversations_page(
        &self,
        types: &[ChannelType],
        cursor: Option<&str>,
        limit: u16,
    ) -> Result<ChannelsPage> {
        let mut params = vec![
            ("types", types_param(types)),
            ("limit", limit.to_string()),
        ];
        params.extend(cursor.map(|c| ("cursor", c.to_string())));

        let body = self.call("conversations.list", &params).await?;
        channels_page(body)
    }

    async fn history_page(
        &self,
        channel_id: &str,
        window: &TimeWindow,
        cursor: Option<&str>,
        limit: u16,
    ) -> Result<MessagesPage> {
        let mut params = vec![
            ("channel", channel_id.to_string()),
            ("limit", limit.to_string()),
        ];
        params.extend(window_params(window));
        params.extend(cursor.map(|c| ("cursor", c.to_string())));

        let body = self.call("conversations.history", &params).await?;
        messages_page(body)
    }

    async fn replies_page(
        &self,
        channel_id: &str,
        thread_ts: &str,
        window: &TimeWindow,
        cursor: Option<&str>,
        limit: u16,
    ) -> Result<MessagesPage> {
        let mut params = vec![
            ("channel", channel_id.to_string()),
            ("ts", thread_ts.to_string()),
            ("limit", limit.to_string()),
        ];
        params.extend(window_params(window));
        params.extend(cursor.map(|c| ("cursor", c.to_string())));

        let body = self.call("conversations.replies", &params).await?;
        messages_page(body)
    }

    async fn get_file(&self, url: &str, writer: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<()> {
        let mut response = self.send(self.http.get(url)).await?;

        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
            writer.write_all(&chunk).await?;
            written += chunk.len();
        }
        debug!(url, bytes = written, "file body received");
        Ok(())
    }
}

impl SlackWebApi {
    /// Calls a Web API method and returns the raw body once `ok` is true.
    /// Conversations are read this way so that fields slack-morphism does not
    /// model (the IM peer `user`, for one) reach the export.
    async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = Url::parse_with_params(&format!("{API_BASE}/{method}"), params)
            .map_err(|e| AppError::SlackApi(format!("{method}: {e}")))?;
        let response = self.send(self.http.get(url)).await?;
        let body = response.json::<Value>().await.map_err(transport_error)?;
        parse_envelope(body)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut request = request.bearer_auth(&self.bearer);
        if let Some(cookie) = &self.cookie_header {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await.map_err(transport_error)?;
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok());
        if let Some(err) = status_error(response.status(), retry_after) {
            return Err(err);
        }
        Ok(response)
    }
}

fn types_param(types: &[ChannelType]) -> String {
    types
        .iter()
        .map(|t| match t {
            ChannelType::Mpim => "mpim",
            ChannelType::Im => "im",
            ChannelType::Public => "public_channel",
            ChannelType::Private => "private_channel",
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn window_params(window: &TimeWindow) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    params.extend(window.oldest.clone().map(|ts| ("oldest", ts)));
    params.extend(window.latest.clone().map(|ts| ("latest", ts)));
    params
}

/// Unwraps the `{"ok": ..}` envelope every Web API method answers with.
fn parse_envelope(body: Value) -> Result<Value> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let error = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    if error == "ratelimited" {
        return Err(AppError::SlackRateLimit { retry_after: None });
    }
    Err(AppError::SlackApi(error.to_string()))
}

fn body_cursor(body: &Value) -> Option<String> {
    body.pointer("/response_metadata/next_cursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn records<T: DeserializeOwned>(body: &mut Value, key: &str) -> Result<Vec<T>> {
    match body.get_mut(key).map(Value::take) {
        Some(records) => serde_json::from_value(records).map_err(|e| AppError::JsonParse(e.to_string())),
        None => Ok(Vec::new()),
    }
}

fn channels_page(mut body: Value) -> Result<ChannelsPage> {
    Ok(ChannelsPage {
        channels: records(&mut body, "channels")?,
        next_cursor: body_cursor(&body),
    })
}

fn messages_page(mut body: Value) -> Result<MessagesPage> {
    let next_cursor = body_cursor(&body);
    Ok(MessagesPage {
        messages: records(&mut body, "messages")?,
        has_more: body
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(next_cursor.is_some()),
        next_cursor,
    })
}

fn next_cursor(meta: Option<SlackResponseMetadata>) -> Option<String> {
    meta.and_then(|m| m.next_cursor)
        .map(|c| c.0)
        .filter(|c| !c.is_empty())
}

fn convert<S: Serialize + ?Sized, T: DeserializeOwned>(value: &S) -> Result<T> {
    serde_json::to_value(value)
        .and_then(serde_json::from_value)
        .map_err(|e| AppError::JsonParse(e.to_string()))
}

fn api_error(e: SlackClientError) -> AppError {
    let message = e.to_string();
    match e {
        SlackClientError::RateLimitError(limit) => AppError::SlackRateLimit {
            retry_after: limit.retry_after,
        },
        SlackClientError::HttpError(http) if http.status_code.is_server_error() => {
            AppError::Transient(message)
        }
        SlackClientError::HttpProtocolError(_) => AppError::Transient(message),
        _ => AppError::SlackApi(message),
    }
}

fn transport_error(e: reqwest::Error) -> AppError {
    AppError::Transient(e.to_string())
}

/// Classifies the HTTP status of a Web API or file response.
fn status_error(status: StatusCode, retry_after: Option<&str>) -> Option<AppError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Some(AppError::SlackRateLimit { retry_after });
    }
    if status.is_server_error() {
        return Some(AppError::Transient(format!("HTTP {status}")));
    }
    if !status.is_success() {
        return Some(AppError::SlackApi(format!("HTTP {status}")));
    }
    None
}
