use std::time::Duration;

use log::debug;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use crate::error::FetchError;
use crate::request::RequestExecutor;

/// Thin REST client shared by all adapters.
///
/// Every call goes through the exchange's `RequestExecutor`, so
/// retry, backoff and health reporting apply uniformly.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    executor: RequestExecutor,
}

impl HttpClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        executor: RequestExecutor,
    ) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
            executor,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends the request produced by `build` and decodes a JSON body.
    ///
    /// `build` runs once per attempt, so signed requests get a
    /// fresh timestamp and signature on every retry.
    pub async fn get_json<F>(&self, what: &str, build: F) -> Result<Value, FetchError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let client = &self.client;
        let build = &build;
        let timeout = self.timeout;

        self.executor
            .execute(what, move || async move {
                let response = build(client)
                    .send()
                    .await
                    .map_err(|e| classify(e, timeout))?;

                let status = response.status();
                let body = response.text().await.map_err(|e| classify(e, timeout))?;

                if !status.is_success() {
                    return Err(FetchError::Status {
                        status: status.as_u16(),
                        body,
                    });
                }

                debug!("http: op={} status={} bytes={}", what, status, body.len());
                Ok(serde_json::from_str(&body)?)
            })
            .await
    }

    /// Plain unsigned GET on `path`.
    pub async fn get(&self, what: &str, path: &str) -> Result<Value, FetchError> {
        let url = self.url(path);
        self.get_json(what, |c| c.get(&url)).await
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        err.into()
    }
}
