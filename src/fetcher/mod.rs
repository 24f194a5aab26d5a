//! Access to the external data provider.

pub mod error;
pub mod http_fetcher;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::fetcher::error::FetchError;

/// Candidate locations of an item or account identifier, in precedence order.
const ID_FIELDS: [&[&str]; 4] = [&["id"], &["rest_id"], &["raw", "tweet_id"], &["legacy", "id_str"]];

/// Candidate locations of an account's display handle, in precedence order.
const HANDLE_FIELDS: [&[&str]; 4] = [
    &["username"],
    &["handle"],
    &["screen_name"],
    &["legacy", "screen_name"],
];

/// An opaque record returned by the provider.
///
/// Upstream shapes change without notice, so the record is passed through
/// untouched. Only the identifier and handle are ever read from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Value);

impl Document {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Extracts the identifier, trying each of the known id fields in order.
    pub fn id(&self) -> Option<String> {
        ID_FIELDS.iter().find_map(|path| self.scalar_at(path))
    }

    pub fn handle(&self) -> Option<String> {
        HANDLE_FIELDS.iter().find_map(|path| self.scalar_at(path))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    fn scalar_at(&self, path: &[&str]) -> Option<String> {
        let value = path.iter().try_fold(&self.0, |v, key| v.get(key))?;
        match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// The external provider the poll cycles read from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Looks up an account by its handle.
    async fn lookup_account(&self, handle: &str) -> Result<Document, FetchError>;

    /// Returns up to `count` of the account's most recent items, newest first.
    async fn fetch_recent_items(
        &self,
        account_id: &str,
        count: usize,
    ) -> Result<Vec<Document>, FetchError>;
}
