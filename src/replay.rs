//! Newline-delimited JSON replay of captured requests.
//!
//! Each input line is a [`RequestRecord`]; each output line the matching
//! [`DispositionRecord`]. Blank lines and lines starting with `#` are skipped.

use crate::request::MockedRequest;
use crate::response::MockedResponse;
use crate::service::MockInterceptor;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestRecord {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestRecord {
    pub fn into_request(self) -> anyhow::Result<MockedRequest> {
        let mut request =
            MockedRequest::new(&self.method, &self.url).with_context(|| format!("invalid url {:?}", self.url))?;
        for (name, value) in self.headers {
            request = request
                .with_header(name.as_str(), value)
                .with_context(|| format!("invalid header {name:?}"))?;
        }
        if let Some(body) = self.body {
            request = request.with_body(body);
        }
        Ok(request)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispositionKind {
    Mocked,
    Passthrough,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispositionRecord {
    pub request_id: String,
    pub method: String,
    pub url: String,
    pub disposition: DispositionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispositionRecord {
    fn base(request: &MockedRequest, disposition: DispositionKind) -> Self {
        Self {
            request_id: request.id().to_string(),
            method: request.method().to_string(),
            url: request.url().to_string(),
            disposition,
            status: None,
            headers: BTreeMap::new(),
            body: None,
            error: None,
        }
    }

    pub fn mocked(request: &MockedRequest, response: &MockedResponse) -> Self {
        Self {
            status: Some(response.status),
            headers: response
                .headers
                .iter()
                .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
                .collect(),
            body: Some(response.body_text()),
            ..Self::base(request, DispositionKind::Mocked)
        }
    }

    pub fn passthrough(request: &MockedRequest) -> Self {
        Self::base(request, DispositionKind::Passthrough)
    }

    pub fn error(request: &MockedRequest, error: &dyn std::error::Error) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::base(request, DispositionKind::Error)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub mocked: usize,
    pub passthrough: usize,
    pub errors: usize,
}

/// Dispatch every record from `input`, writing one disposition per line.
///
/// Malformed input lines abort the replay; dispatch failures are reported
/// as `error` dispositions and the replay continues.
pub async fn replay<R, W>(interceptor: &MockInterceptor, input: R, mut output: W) -> anyhow::Result<ReplaySummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut summary = ReplaySummary::default();
    let mut lines = input.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let record: RequestRecord =
            serde_json::from_str(trimmed).with_context(|| format!("line {line_no}: invalid request record"))?;
        let request = record
            .into_request()
            .with_context(|| format!("line {line_no}: invalid request"))?;
        let snapshot = request.clone();

        let disposition = match interceptor.dispatch(request).await {
            Ok(Some(response)) => {
                summary.mocked += 1;
                DispositionRecord::mocked(&snapshot, &response)
            }
            Ok(None) => {
                summary.passthrough += 1;
                DispositionRecord::passthrough(&snapshot)
            }
            Err(err) => {
                warn!(line = line_no, error = %err, "Dispatch failed");
                summary.errors += 1;
                DispositionRecord::error(&snapshot, &err)
            }
        };

        let mut encoded = serde_json::to_vec(&disposition)?;
        encoded.push(b'\n');
        output.write_all(&encoded).await?;
    }

    output.flush().await?;
    Ok(summary)
}
