//! Common test utilities and mock implementations.

use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use timeline_trigger::callback::CallbackSink;
use timeline_trigger::callback::DeliveryStatus;
use timeline_trigger::event::TweetCreatedEvent;
use timeline_trigger::fetcher::Document;
use timeline_trigger::fetcher::ResourceFetcher;
use timeline_trigger::fetcher::error::FetchError;
use timeline_trigger::model::CallbackTarget;
use timeline_trigger::service::subscription_registry::RegistryConfig;
use timeline_trigger::service::subscription_registry::SubscriptionRegistry;
use tokio::time::sleep;

/// Poll interval used by tests that wait for cycles.
#[allow(dead_code)]
pub const FAST_INTERVAL: Duration = Duration::from_millis(50);

#[allow(dead_code)]
pub fn fast_config() -> RegistryConfig {
    RegistryConfig {
        default_interval: FAST_INTERVAL,
        min_interval: FAST_INTERVAL,
        page_size: 5,
    }
}

/// Builds a registry over the given fetcher and sink.
#[allow(dead_code)]
pub fn setup_registry(
    fetcher: Arc<MockFetcher>,
    sink: Arc<dyn CallbackSink>,
    config: RegistryConfig,
) -> SubscriptionRegistry {
    SubscriptionRegistry::new(fetcher, sink, config)
}

/// Retries `condition` until it holds or about five seconds have passed.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    false
}

// MOCK FETCHER

/// State for the mock fetcher.
#[derive(Default)]
#[allow(dead_code)]
pub struct MockFetcherState {
    pub pages: HashMap<String, Vec<Document>>,
    pub accounts: HashMap<String, Document>,
    pub failing: HashSet<String>,
    pub fetches: HashMap<String, usize>,
}

/// In-memory provider whose timelines tests can rewrite between cycles.
#[derive(Default)]
#[allow(dead_code)]
pub struct MockFetcher {
    pub state: RwLock<MockFetcherState>,
}

#[allow(dead_code)]
impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sets a user's timeline, newest id first.
    pub fn set_page(&self, user_id: &str, ids: &[&str]) {
        let page = ids.iter().map(|id| item(id)).collect();
        self.state
            .write()
            .unwrap()
            .pages
            .insert(user_id.to_string(), page);
    }

    pub fn set_account(&self, handle: &str, account: Value) {
        self.state
            .write()
            .unwrap()
            .accounts
            .insert(handle.to_string(), Document::new(account));
    }

    pub fn set_failing(&self, user_id: &str, failing: bool) {
        let mut state = self.state.write().unwrap();
        if failing {
            state.failing.insert(user_id.to_string());
        } else {
            state.failing.remove(user_id);
        }
    }

    pub fn fetch_count(&self, user_id: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .fetches
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ResourceFetcher for MockFetcher {
    async fn lookup_account(&self, handle: &str) -> Result<Document, FetchError> {
        self.state
            .read()
            .unwrap()
            .accounts
            .get(handle)
            .cloned()
            .ok_or_else(|| FetchError::AccountNotFound {
                handle: handle.to_string(),
            })
    }

    async fn fetch_recent_items(
        &self,
        account_id: &str,
        count: usize,
    ) -> Result<Vec<Document>, FetchError> {
        let mut state = self.state.write().unwrap();
        *state.fetches.entry(account_id.to_string()).or_default() += 1;
        if state.failing.contains(account_id) {
            return Err(FetchError::ApiError {
                status: 503,
                message: "upstream unavailable".to_string(),
            });
        }
        let mut page = state.pages.get(account_id).cloned().unwrap_or_default();
        page.truncate(count);
        Ok(page)
    }
}

/// A timeline item with the given id.
#[allow(dead_code)]
pub fn item(id: &str) -> Document {
    Document::new(json!({ "id": id, "text": format!("tweet {id}") }))
}

// RECORDING SINK

/// Callback sink that keeps every delivered event in order.
#[derive(Default)]
#[allow(dead_code)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(CallbackTarget, TweetCreatedEvent)>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Ids of the items delivered for `user_id`, in delivery order.
    pub fn item_ids(&self, user_id: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, event)| event.user.id == user_id)
            .filter_map(|(_, event)| event.item.id())
            .collect()
    }
}

#[async_trait]
impl CallbackSink for RecordingSink {
    async fn deliver(&self, target: &CallbackTarget, event: &TweetCreatedEvent) -> DeliveryStatus {
        self.events
            .lock()
            .unwrap()
            .push((target.clone(), event.clone()));
        DeliveryStatus::Delivered
    }
}
