//! Thin HTTP client for the Conductor API

use std::fmt;
use std::time::Duration;

use reqwest::header;

use crate::classify_status;

/// CLI failures, mapped onto the documented exit codes.
#[derive(Debug)]
pub enum CliError {
    Generic(String),
    Auth(String),
    Validation(String),
    Deployment(String),
    Timeout(String),
}

impl CliError {
    /// 0 success, 1 generic, 2 auth, 3 validation, 4 deployment, 5 timeout.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Generic(_) => 1,
            Self::Auth(_) => 2,
            Self::Validation(_) => 3,
            Self::Deployment(_) => 4,
            Self::Timeout(_) => 5,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generic(message)
            | Self::Auth(message)
            | Self::Validation(message)
            | Self::Deployment(message)
            | Self::Timeout(message) => write!(f, "{message}"),
        }
    }
}

/// API client with bearer authentication.
pub struct ApiClient {
    base: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: &str, token: Option<&str>) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base));
        if let Some(token) = &self.token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
    }

    pub async fn get(&self, path: &str) -> Result<serde_json::Value, CliError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| CliError::Generic(e.to_string()))?;
        Self::json(response).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, CliError> {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(|e| CliError::Generic(e.to_string()))?;
        Self::json(response).await
    }

    pub async fn post_yaml(&self, path: &str, yaml: String) -> Result<serde_json::Value, CliError> {
        let response = self
            .request(reqwest::Method::POST, path)
            .header(header::CONTENT_TYPE, "application/yaml")
            .body(yaml)
            .send()
            .await
            .map_err(|e| CliError::Generic(e.to_string()))?;
        Self::json(response).await
    }

    /// Stream `/api/events/stream` and print each event line.
    pub async fn watch_events(&self, app: &str) -> Result<(), CliError> {
        let mut response = self
            .http
            .get(format!("{}/api/events/stream?app={app}", self.base))
            .headers(self.auth_headers())
            .timeout(Duration::from_secs(24 * 60 * 60))
            .send()
            .await
            .map_err(|e| CliError::Generic(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        println!("watching events for {app} (ctrl-c to stop)");
        let mut buffer = String::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CliError::Generic(e.to_string()))?
        {
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            // SSE frames are separated by blank lines.
            while let Some(boundary) = buffer.find("\n\n") {
                let frame = buffer[..boundary].to_string();
                buffer.drain(..boundary + 2);
                for line in frame.lines() {
                    if let Some(data) = line.strip_prefix("data: ") {
                        print_event(data);
                    }
                }
            }
        }
        Ok(())
    }

    fn auth_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = &self.token {
            if let Ok(value) = header::HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(header::AUTHORIZATION, value);
            }
        }
        headers
    }

    async fn json(response: reqwest::Response) -> Result<serde_json::Value, CliError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }
        response
            .json()
            .await
            .map_err(|e| CliError::Generic(e.to_string()))
    }
}

fn print_event(data: &str) {
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(event) => println!(
            "{}  {}  {}",
            event["timestamp"].as_str().unwrap_or("-"),
            event["type"].as_str().unwrap_or("?"),
            event["data"]
        ),
        Err(_) => println!("{data}"),
    }
}
