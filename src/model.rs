//! Subscription and tracked-user records.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use derive_builder::Builder;
use serde::Deserialize;
use serde::Serialize;

/// Caller-supplied reference to an account, by numeric id or by handle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserIdentifier {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "username")]
    pub handle: Option<String>,
}

impl UserIdentifier {
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            handle: None,
        }
    }

    pub fn from_handle(handle: impl Into<String>) -> Self {
        Self {
            id: None,
            handle: Some(handle.into()),
        }
    }

    /// Treats all-digit input as an account id and anything else as a handle.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if is_numeric_id(raw) {
            Self::from_id(raw)
        } else {
            Self::from_handle(raw.trim_start_matches('@'))
        }
    }
}

pub fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// An account watched by a subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedUser {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Id of the newest item emitted (or baselined) for this user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_water_mark: Option<String>,
}

impl TrackedUser {
    pub fn new(user_id: impl Into<String>, handle: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            handle,
            high_water_mark: None,
        }
    }
}

/// Where events of a subscription are posted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackTarget {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// Parameters of a new subscription.
#[derive(Builder, Clone, Debug, Deserialize)]
#[builder(pattern = "immutable")]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscription {
    #[builder(setter(into))]
    pub callback_url: String,
    #[builder(default)]
    #[serde(default)]
    pub callback_headers: BTreeMap<String, String>,
    /// Requested poll interval; raised to the registry's floor when lower.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[builder(default)]
    #[serde(default)]
    pub deliver_backlog: bool,
    /// Accounts to track right away.
    #[builder(default)]
    #[serde(default)]
    pub users: Vec<UserIdentifier>,
}

/// Point-in-time copy of a subscription, detached from the live record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSnapshot {
    pub id: String,
    pub callback: CallbackTarget,
    pub interval_ms: u64,
    pub deliver_backlog: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub users: Vec<TrackedUser>,
}

impl SubscriptionSnapshot {
    pub fn user(&self, user_id: &str) -> Option<&TrackedUser> {
        self.users.iter().find(|u| u.user_id == user_id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AddUsersResult {
    pub added: usize,
    pub details: Vec<TrackedUser>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RemoveUsersResult {
    pub removed: usize,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_identifier() {
        assert_eq!(UserIdentifier::parse(" 12345 "), UserIdentifier::from_id("12345"));
        assert_eq!(UserIdentifier::parse("@jack"), UserIdentifier::from_handle("jack"));
        assert_eq!(UserIdentifier::parse("12a"), UserIdentifier::from_handle("12a"));
    }

    #[test]
    fn test_create_subscription_builder_defaults() {
        let params = CreateSubscriptionBuilder::default()
            .callback_url("https://hooks.test/in")
            .build()
            .unwrap();

        assert_eq!(params.callback_url, "https://hooks.test/in");
        assert_eq!(params.interval_ms, None);
        assert!(!params.deliver_backlog);
        assert!(params.users.is_empty());

        assert!(CreateSubscriptionBuilder::default().build().is_err());
    }

    #[test]
    fn test_create_subscription_from_json() {
        let params: CreateSubscription = serde_json::from_value(json!({
            "callbackUrl": "https://hooks.test/in",
            "intervalMs": 5000,
            "users": [{ "id": "1" }, { "username": "jack" }]
        }))
        .unwrap();

        assert_eq!(params.interval_ms, Some(5000));
        assert_eq!(params.users[1].handle.as_deref(), Some("jack"));
    }

    #[test]
    fn test_tracked_user_serialization() {
        let mut user = TrackedUser::new("42", Some("jack".to_string()));
        assert_eq!(
            serde_json::to_value(&user).unwrap(),
            json!({ "userId": "42", "handle": "jack" })
        );

        user.high_water_mark = Some("900".to_string());
        assert_eq!(
            serde_json::to_value(&user).unwrap()["highWaterMark"],
            json!("900")
        );
    }
}
