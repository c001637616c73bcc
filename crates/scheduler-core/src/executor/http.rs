//! HTTP executor: runs a task whose config is [`crate::model::TaskConfig::Http`].

use async_trait::async_trait;
use reqwest::{Client, Method};
use std::str::FromStr;
use std::time::Instant;

use crate::error::{SchedulerError, SchedulerResult};
use crate::model::{Task, TaskConfig, TaskResult};

use super::{ExecutionContext, Executor};

/// Sent when the task's own `headers` config doesn't set one.
const DEFAULT_USER_AGENT: &str = "falcon-scheduler/1.0";

pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, ctx: ExecutionContext, task: &Task) -> SchedulerResult<TaskResult> {
        let TaskConfig::Http { url, method, headers, body, expected_code, timeout, follow_redirect, validate_ssl } =
            &task.config
        else {
            return Err(SchedulerError::Executor("http executor received non-http config".into()));
        };

        let method = Method::from_str(method)
            .map_err(|_| SchedulerError::Executor(format!("invalid http method: {}", method)))?;

        let client = if !*follow_redirect || !*validate_ssl {
            Client::builder()
                .redirect(if *follow_redirect { reqwest::redirect::Policy::default() } else { reqwest::redirect::Policy::none() })
                .danger_accept_invalid_certs(!*validate_ssl)
                .build()
                .map_err(SchedulerError::Http)?
        } else {
            self.client.clone()
        };

        let mut request = client.request(method, url);
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("user-agent")) {
            request = request.header("User-Agent", DEFAULT_USER_AGENT);
        }
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body.clone());
        }

        let request_timeout = timeout.unwrap_or(task.timeout);
        let started = Instant::now();

        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(SchedulerError::Cancelled),
            result = tokio::time::timeout(request_timeout, request.send()) => {
                result.map_err(|_| SchedulerError::Timeout)?.map_err(SchedulerError::Http)?
            }
        };

        let status = response.status();
        let status_code = status.as_u16();
        // expected_code == 0 means "any 2xx counts as success"; otherwise
        // the response must match it exactly.
        let success = if *expected_code == 0 { status.is_success() } else { status_code == *expected_code };
        let body_text = response.text().await.unwrap_or_default();
        let duration = started.elapsed();
        let response_size = body_text.len();

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("status_code".to_string(), status_code.to_string());
        metadata.insert("response_size".to_string(), response_size.to_string());
        metadata.insert("response_time".to_string(), format!("{:?}", duration));

        if success {
            Ok(TaskResult { success: true, output: body_text, error: None, duration, metadata })
        } else {
            let expected_desc = if *expected_code == 0 { "2xx".to_string() } else { expected_code.to_string() };
            Ok(TaskResult {
                success: false,
                output: body_text,
                error: Some(format!("expected status {}, got {}", expected_desc, status_code)),
                duration,
                metadata,
            })
        }
    }
}
