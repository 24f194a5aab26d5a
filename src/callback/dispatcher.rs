//! Signed JSON POSTs to callback endpoints.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use log::error;
use log::warn;
use serde::Serialize;
use wreq::Client;
use wreq::header::CONTENT_TYPE;
use wreq::header::HeaderMap;
use wreq::header::HeaderName;
use wreq::header::HeaderValue;
use wreq::header::USER_AGENT;

use crate::callback::CallbackSink;
use crate::callback::DeliveryStatus;
use crate::callback::error::DeliveryError;
use crate::callback::signing::SIGNATURE_HEADER;
use crate::callback::signing::sign_payload;
use crate::event::TweetCreatedEvent;
use crate::model::CallbackTarget;

/// Posts events to callback URLs, fire-and-forget.
pub struct CallbackDispatcher {
    client: Client,
    secret: Option<String>,
}

impl CallbackDispatcher {
    pub fn new(secret: Option<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("timeline-trigger/0.1"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, secret })
    }

    /// Serializes, signs and posts `payload`.
    ///
    /// Never fails: a non-success status is logged as a warning and a
    /// transport failure as an error.
    pub async fn deliver<T>(
        &self,
        url: &str,
        payload: &T,
        headers: &BTreeMap<String, String>,
    ) -> DeliveryStatus
    where
        T: Serialize + ?Sized + Sync,
    {
        match self.try_deliver(url, payload, headers).await {
            Ok(()) => {
                debug!("Delivered callback to {url}");
                DeliveryStatus::Delivered
            }
            Err(DeliveryError::Rejected { status, body }) => {
                warn!("Callback {url} returned non-OK status {status}: {body}");
                DeliveryStatus::Rejected { status }
            }
            Err(e) => {
                error!("Callback POST to {url} failed: {e}");
                DeliveryStatus::Failed
            }
        }
    }

    async fn try_deliver<T>(
        &self,
        url: &str,
        payload: &T,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), DeliveryError>
    where
        T: Serialize + ?Sized + Sync,
    {
        let body = serde_json::to_vec(payload)?;
        let headers = self.build_headers(&body, headers)?;

        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Caller headers first, then the content type and signature, which cannot
    /// be overridden. A caller's signature header is never forwarded.
    fn build_headers(
        &self,
        body: &[u8],
        extra: &BTreeMap<String, String>,
    ) -> Result<HeaderMap, DeliveryError> {
        let mut headers = HeaderMap::new();
        for (name, value) in extra {
            if name.eq_ignore_ascii_case(SIGNATURE_HEADER) {
                warn!("Dropping caller-supplied `{name}` header");
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Skipping invalid callback header `{name}`"),
            }
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(secret) = &self.secret {
            let signature = sign_payload(secret, body)?;
            let value = HeaderValue::from_str(&signature).map_err(|e| {
                DeliveryError::InvalidSecret {
                    msg: e.to_string(),
                }
            })?;
            headers.insert(HeaderName::from_static(SIGNATURE_HEADER), value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl CallbackSink for CallbackDispatcher {
    async fn deliver(&self, target: &CallbackTarget, event: &TweetCreatedEvent) -> DeliveryStatus {
        CallbackDispatcher::deliver(self, &target.url, event, &target.headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(secret: Option<&str>) -> CallbackDispatcher {
        CallbackDispatcher::new(secret.map(str::to_string), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_caller_headers_cannot_replace_reserved_ones() {
        let extra = BTreeMap::from([
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("X-Signature-Sha256".to_string(), "forged".to_string()),
            ("Authorization".to_string(), "Bearer abc".to_string()),
        ]);
        let headers = dispatcher(Some("s3cret"))
            .build_headers(br#"{"a":1}"#, &extra)
            .unwrap();

        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(
            headers[SIGNATURE_HEADER],
            sign_payload("s3cret", br#"{"a":1}"#).unwrap().as_str()
        );
        assert_eq!(headers["authorization"], "Bearer abc");
    }

    #[test]
    fn test_no_signature_without_secret() {
        let extra = BTreeMap::from([
            ("bad header".to_string(), "x".to_string()),
            ("X-Signature-SHA256".to_string(), "forged".to_string()),
        ]);
        let headers = dispatcher(None).build_headers(b"{}", &extra).unwrap();

        assert!(!headers.contains_key(SIGNATURE_HEADER));
        assert_eq!(headers.len(), 1);
    }
}
