//! Resource fetcher backed by the provider's HTTP API.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::Quota;
use governor::RateLimiter;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use log::debug;
use log::info;
use serde_json::Value;
use wreq::Client;
use wreq::header::HeaderMap;
use wreq::header::HeaderName;
use wreq::header::HeaderValue;
use wreq::header::USER_AGENT;

use crate::config::Config;
use crate::fetcher::Document;
use crate::fetcher::ResourceFetcher;
use crate::fetcher::error::FetchError;

const API_KEY_HEADER: &str = "x-api-key";
const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;

/// Provider connection settings.
#[derive(Clone, Debug)]
pub struct ProviderInfo {
    /// https://provider.tld
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub requests_per_second: u32,
}

impl ProviderInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_url: config.provider_url.clone(),
            api_key: config.provider_api_key.clone(),
            timeout: config.request_timeout,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
        }
    }
}

/// Fetches accounts and timelines over HTTP.
///
/// A single client is shared by every subscription, so requests from
/// different poll cycles run concurrently and share one rate limit.
pub struct HttpResourceFetcher {
    pub info: ProviderInfo,
    client: Client,
    limiter: RateLimiter<NotKeyed, InMemoryState, QuantaClock>,
}

impl HttpResourceFetcher {
    pub fn new(info: ProviderInfo) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("timeline-trigger/0.1"));
        if let Some(key) = &info.api_key {
            let value = HeaderValue::from_str(key).map_err(|e| FetchError::RequestFailed(Box::new(e)))?;
            headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(info.timeout)
            .build()?;

        let rate = NonZeroU32::new(info.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            info,
            client,
            limiter,
        })
    }

    /// Probes the provider with a cheap lookup to check connectivity and credentials.
    pub async fn verify(&self, probe_handle: &str) -> Result<Document, FetchError> {
        self.lookup_account(probe_handle).await
    }

    async fn send(&self, request: wreq::RequestBuilder) -> Result<wreq::Response, wreq::Error> {
        if self.limiter.check().is_err() {
            info!("Provider {} is ratelimited. Waiting...", self.info.api_url);
            self.limiter.until_ready().await;
        }

        let req = request.build()?;
        debug!("Making request to: {}", req.url());
        self.client.execute(req).await
    }

    async fn send_get_json(
        &self,
        request: wreq::RequestBuilder,
        handle: Option<&str>,
    ) -> Result<Value, FetchError> {
        let response = self.send(request).await?;
        let status = response.status();
        let body = response.text().await?;

        if status.as_u16() == 404
            && let Some(handle) = handle
        {
            return Err(FetchError::AccountNotFound {
                handle: handle.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::ApiError {
                status: status.as_u16(),
                message: Self::error_message(&body),
            });
        }

        let resp: Value = serde_json::from_str(&body)?;
        Self::check_resp_errors(&resp, status.as_u16())?;
        Ok(resp)
    }

    fn check_resp_errors(resp: &Value, status: u16) -> Result<(), FetchError> {
        if let Some(first_error) = resp
            .get("errors")
            .and_then(|v| v.as_array())
            .and_then(|errors| errors.first())
        {
            let message = first_error
                .get("message")
                .or_else(|| first_error.get("detail"))
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown API error")
                .to_string();
            return Err(FetchError::ApiError { status, message });
        }
        Ok(())
    }

    fn error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| body.chars().take(200).collect())
    }

    /// Accepts `{ "items": [...] }`, `{ "data": [...] }` or a bare array.
    fn get_items_from_resp(resp: Value) -> Result<Vec<Document>, FetchError> {
        let items = match resp {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("items").or_else(|| map.remove("data")) {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(FetchError::MissingField {
                        field: "items".to_string(),
                    });
                }
            },
            _ => {
                return Err(FetchError::MissingField {
                    field: "items".to_string(),
                });
            }
        };
        Ok(items.into_iter().map(Document::new).collect())
    }
}

#[async_trait]
impl ResourceFetcher for HttpResourceFetcher {
    async fn lookup_account(&self, handle: &str) -> Result<Document, FetchError> {
        debug!("Looking up account with handle: {handle}");
        let request = self
            .client
            .get(format!(
                "{}/users/by/username/{}",
                self.info.api_url,
                urlencoding::encode(handle)
            ));

        let resp = self.send_get_json(request, Some(handle)).await?;
        let account = match resp {
            Value::Object(mut map) if map.get("data").is_some_and(Value::is_object) => {
                map.remove("data").unwrap_or_default()
            }
            other => other,
        };
        Ok(Document::new(account))
    }

    async fn fetch_recent_items(
        &self,
        account_id: &str,
        count: usize,
    ) -> Result<Vec<Document>, FetchError> {
        debug!("Fetching {count} recent items for account: {account_id}");
        let request = self
            .client
            .get(format!(
                "{}/users/{}/timeline",
                self.info.api_url,
                urlencoding::encode(account_id)
            ))
            .query(&[("count", count.to_string())]);

        let resp = self.send_get_json(request, None).await?;
        let mut items = Self::get_items_from_resp(resp)?;
        items.truncate(count);
        Ok(items)
    }
}
