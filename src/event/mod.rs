//! Events delivered to subscription callbacks.

use serde::Serialize;

use crate::fetcher::Document;
use crate::model::TrackedUser;

pub const TWEET_CREATED: &str = "user.tweet.created";

/// Account reference embedded in an event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventUser {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

/// Fired once per item newly seen on a tracked user's timeline.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetCreatedEvent {
    pub event: &'static str,
    pub subscription_id: String,
    pub user: EventUser,
    pub item: Document,
}

impl TweetCreatedEvent {
    pub fn new(subscription_id: &str, user: &TrackedUser, item: Document) -> Self {
        Self {
            event: TWEET_CREATED,
            subscription_id: subscription_id.to_string(),
            user: EventUser {
                id: user.user_id.clone(),
                handle: user.handle.clone(),
            },
            item,
        }
    }
}
