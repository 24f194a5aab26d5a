//! Registry of timeline subscriptions and their poll cycles.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use log::debug;
use log::info;
use log::warn;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::callback::CallbackSink;
use crate::config::Config;
use crate::config::DEFAULT_PAGE_SIZE;
use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::config::MIN_POLL_INTERVAL_MS;
use crate::delta;
use crate::delta::Delta;
use crate::event::TweetCreatedEvent;
use crate::fetcher::ResourceFetcher;
use crate::model::AddUsersResult;
use crate::model::CallbackTarget;
use crate::model::CreateSubscription;
use crate::model::RemoveUsersResult;
use crate::model::SubscriptionSnapshot;
use crate::model::TrackedUser;
use crate::model::UserIdentifier;
use crate::service::error::ServiceError;
use crate::service::user_resolver::UserResolver;
use crate::task::poll_scheduler::PollScheduler;
use crate::task::poll_scheduler::PollTarget;

/// Polling limits applied to every subscription of a registry.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Interval used when a subscription does not request one.
    pub default_interval: Duration,
    /// Floor every subscription interval is raised to.
    pub min_interval: Duration,
    /// Items fetched per tracked user and cycle.
    pub page_size: usize,
}

impl RegistryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_interval: config.default_interval,
            min_interval: config.min_interval,
            page_size: config.page_size,
        }
    }

    pub fn clamp_interval(&self, requested_ms: Option<u64>) -> Duration {
        requested_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_interval)
            .max(self.min_interval)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            min_interval: Duration::from_millis(MIN_POLL_INTERVAL_MS),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Live state of a subscription. Only the registry holds these.
struct SubscriptionRecord {
    id: String,
    callback: CallbackTarget,
    deliver_backlog: bool,
    created_at: DateTime<Utc>,
    users: BTreeMap<String, TrackedUser>,
    scheduler: PollScheduler,
}

impl SubscriptionRecord {
    fn snapshot(&self) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            id: self.id.clone(),
            callback: self.callback.clone(),
            interval_ms: self.scheduler.interval().as_millis() as u64,
            deliver_backlog: self.deliver_backlog,
            active: self.scheduler.is_running(),
            created_at: self.created_at,
            users: self.users.values().cloned().collect(),
        }
    }
}

/// What a poll cycle needs, copied out so no lock is held across upstream calls.
struct CyclePlan {
    subscription_id: String,
    callback: CallbackTarget,
    deliver_backlog: bool,
    users: Vec<TrackedUser>,
}

struct RegistryInner {
    subscriptions: RwLock<HashMap<String, SubscriptionRecord>>,
    fetcher: Arc<dyn ResourceFetcher>,
    sink: Arc<dyn CallbackSink>,
    resolver: UserResolver,
    config: RegistryConfig,
}

/// Owns every subscription and the poll loop of each.
///
/// Reads hand out snapshots; the live records never leave the registry.
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        sink: Arc<dyn CallbackSink>,
        config: RegistryConfig,
    ) -> Self {
        info!(
            "Initializing SubscriptionRegistry (default interval {:?}, floor {:?}, page size {})",
            config.default_interval, config.min_interval, config.page_size
        );
        Self {
            inner: Arc::new(RegistryInner {
                subscriptions: RwLock::new(HashMap::new()),
                resolver: UserResolver::new(fetcher.clone()),
                fetcher,
                sink,
                config,
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Creates a subscription and starts polling it right away.
    pub async fn create_subscription(
        &self,
        params: CreateSubscription,
    ) -> Result<SubscriptionSnapshot, ServiceError> {
        validate_callback_url(&params.callback_url)?;

        let id = format!("sub_{}", Uuid::new_v4().simple());
        let interval = self.inner.config.clamp_interval(params.interval_ms);
        let mut record = SubscriptionRecord {
            id: id.clone(),
            callback: CallbackTarget {
                url: params.callback_url,
                headers: params.callback_headers,
            },
            deliver_backlog: params.deliver_backlog,
            created_at: Utc::now(),
            users: BTreeMap::new(),
            scheduler: PollScheduler::new(id.clone(), interval),
        };

        let mut subscriptions = self.inner.subscriptions.write().await;
        record.scheduler.start(self.poll_target());
        let snapshot = record.snapshot();
        subscriptions.insert(id.clone(), record);

        info!(
            "Created subscription {id} for {} (interval {:?})",
            snapshot.callback.url, interval
        );
        Ok(snapshot)
    }

    /// Creates a subscription and adds its initial users.
    ///
    /// When any user fails to resolve, the new subscription is removed again.
    pub async fn subscribe(
        &self,
        mut params: CreateSubscription,
    ) -> Result<SubscriptionSnapshot, ServiceError> {
        let users = std::mem::take(&mut params.users);
        let snapshot = self.create_subscription(params).await?;
        if users.is_empty() {
            return Ok(snapshot);
        }

        if let Err(e) = self.add_users(&snapshot.id, &users).await {
            self.remove_subscription(&snapshot.id).await;
            return Err(e);
        }
        self.get_subscription(&snapshot.id)
            .await
            .ok_or_else(|| ServiceError::not_found(&snapshot.id))
    }

    /// Stops and deletes a subscription. Returns `false` if it did not exist.
    pub async fn remove_subscription(&self, id: &str) -> bool {
        let removed = self.inner.subscriptions.write().await.remove(id);
        match removed {
            Some(mut record) => {
                record.scheduler.stop();
                info!("Removed subscription {id}");
                true
            }
            None => false,
        }
    }

    pub async fn list_subscriptions(&self) -> Vec<SubscriptionSnapshot> {
        let subscriptions = self.inner.subscriptions.read().await;
        let mut snapshots: Vec<_> = subscriptions.values().map(SubscriptionRecord::snapshot).collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        snapshots
    }

    pub async fn get_subscription(&self, id: &str) -> Option<SubscriptionSnapshot> {
        self.inner
            .subscriptions
            .read()
            .await
            .get(id)
            .map(SubscriptionRecord::snapshot)
    }

    /// Resolves and adds users. Users already tracked are skipped.
    ///
    /// All identifiers are resolved before any is added, so a resolution
    /// failure leaves the subscription unchanged.
    pub async fn add_users(
        &self,
        id: &str,
        identifiers: &[UserIdentifier],
    ) -> Result<AddUsersResult, ServiceError> {
        if !self.inner.subscriptions.read().await.contains_key(id) {
            return Err(ServiceError::not_found(id));
        }

        let mut resolved = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            resolved.push(self.inner.resolver.resolve(identifier).await?);
        }

        let mut subscriptions = self.inner.subscriptions.write().await;
        let record = subscriptions
            .get_mut(id)
            .ok_or_else(|| ServiceError::not_found(id))?;

        let mut details = Vec::new();
        for user in resolved {
            if let Entry::Vacant(entry) = record.users.entry(user.user_id.clone()) {
                entry.insert(user.clone());
                details.push(user);
            }
        }

        info!("Added {} user(s) to subscription {id}", details.len());
        Ok(AddUsersResult {
            added: details.len(),
            details,
        })
    }

    pub async fn remove_users(
        &self,
        id: &str,
        user_ids: &[String],
    ) -> Result<RemoveUsersResult, ServiceError> {
        let mut subscriptions = self.inner.subscriptions.write().await;
        let record = subscriptions
            .get_mut(id)
            .ok_or_else(|| ServiceError::not_found(id))?;

        let removed = user_ids
            .iter()
            .filter(|user_id| record.users.remove(user_id.as_str()).is_some())
            .count();

        info!("Removed {removed} user(s) from subscription {id}");
        Ok(RemoveUsersResult { removed })
    }

    /// Stops every poll loop and waits for in-flight cycles to finish.
    pub async fn shutdown(&self) {
        let records: Vec<SubscriptionRecord> = self
            .inner
            .subscriptions
            .write()
            .await
            .drain()
            .map(|(_, record)| record)
            .collect();

        let count = records.len();
        let handles: Vec<_> = records
            .into_iter()
            .filter_map(|mut record| record.scheduler.stop())
            .collect();
        futures::future::join_all(handles).await;

        info!("SubscriptionRegistry shut down ({count} subscription(s) stopped).");
    }

    fn poll_target(&self) -> Weak<dyn PollTarget> {
        let target: Arc<dyn PollTarget> = self.inner.clone();
        Arc::downgrade(&target)
    }
}

impl RegistryInner {
    async fn cycle_plan(&self, subscription_id: &str) -> Option<CyclePlan> {
        let subscriptions = self.subscriptions.read().await;
        let record = subscriptions.get(subscription_id)?;
        Some(CyclePlan {
            subscription_id: record.id.clone(),
            callback: record.callback.clone(),
            deliver_backlog: record.deliver_backlog,
            users: record.users.values().cloned().collect(),
        })
    }

    /// Stores a new mark if the live user still has the mark the cycle started from.
    ///
    /// Returns `false` if the user or subscription is gone, or the user was
    /// re-added while the cycle ran.
    async fn advance_mark(
        &self,
        subscription_id: &str,
        user_id: &str,
        previous: Option<&str>,
        mark: &str,
    ) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions
            .get_mut(subscription_id)
            .and_then(|record| record.users.get_mut(user_id))
        {
            Some(user) if user.high_water_mark.as_deref() == previous => {
                user.high_water_mark = Some(mark.to_string());
                true
            }
            _ => false,
        }
    }

    async fn poll_user(&self, plan: &CyclePlan, user: TrackedUser, cancel: &CancellationToken) {
        let page = match self
            .fetcher
            .fetch_recent_items(&user.user_id, self.config.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    "Timeline fetch failed for user {} in subscription {}: {e}",
                    user.user_id, plan.subscription_id
                );
                return;
            }
        };

        let delta = delta::detect(page, user.high_water_mark.as_deref(), plan.deliver_backlog);
        if let Some(mark) = delta.mark()
            && !self
                .advance_mark(
                    &plan.subscription_id,
                    &user.user_id,
                    user.high_water_mark.as_deref(),
                    mark,
                )
                .await
        {
            debug!(
                "User {} left or was replaced in subscription {} during the cycle.",
                user.user_id, plan.subscription_id
            );
            return;
        }

        match &delta {
            Delta::Unchanged => {
                debug!("No new items for user {}.", user.user_id);
            }
            Delta::Baseline { mark } => {
                debug!("Baseline for user {} set at {mark}.", user.user_id);
            }
            Delta::Gap { mark } => {
                warn!(
                    "Previous mark for user {} is no longer in the page; skipping ahead to {mark}.",
                    user.user_id
                );
            }
            Delta::Backlog { items, .. } | Delta::New { items, .. } => {
                info!(
                    "Found {} new item(s) for user {} in subscription {}.",
                    items.len(),
                    user.user_id,
                    plan.subscription_id
                );
            }
        }

        for item in delta.into_items() {
            if cancel.is_cancelled() {
                return;
            }
            let event = TweetCreatedEvent::new(&plan.subscription_id, &user, item);
            self.sink.deliver(&plan.callback, &event).await;
        }
    }
}

#[async_trait]
impl PollTarget for RegistryInner {
    async fn poll(&self, subscription_id: &str, cancel: &CancellationToken) -> anyhow::Result<()> {
        let plan = self
            .cycle_plan(subscription_id)
            .await
            .ok_or_else(|| ServiceError::not_found(subscription_id))?;

        debug!(
            "Polling {} user(s) for subscription {subscription_id}.",
            plan.users.len()
        );
        for user in plan.users.clone() {
            if cancel.is_cancelled() {
                break;
            }
            self.poll_user(&plan, user, cancel).await;
        }
        Ok(())
    }
}

fn validate_callback_url(raw: &str) -> Result<(), ServiceError> {
    let invalid = |reason: String| ServiceError::InvalidCallbackUrl {
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}
