//! Turns caller-supplied identifiers into tracked users.

use std::sync::Arc;

use log::debug;

use crate::fetcher::ResourceFetcher;
use crate::model::TrackedUser;
use crate::model::UserIdentifier;
use crate::model::is_numeric_id;
use crate::service::error::ResolutionError;

pub struct UserResolver {
    fetcher: Arc<dyn ResourceFetcher>,
}

impl UserResolver {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self { fetcher }
    }

    /// Numeric ids are taken as-is; handles are looked up with the provider.
    pub async fn resolve(&self, identifier: &UserIdentifier) -> Result<TrackedUser, ResolutionError> {
        if let Some(id) = identifier.id.as_deref().map(str::trim)
            && is_numeric_id(id)
        {
            return Ok(TrackedUser::new(id, identifier.handle.clone()));
        }

        let handle = identifier
            .handle
            .as_deref()
            .map(|h| h.trim().trim_start_matches('@'))
            .filter(|h| !h.is_empty())
            .ok_or(ResolutionError::MissingIdentifier)?;

        debug!("Resolving handle `{handle}` with the provider.");
        let account = self
            .fetcher
            .lookup_account(handle)
            .await
            .map_err(|source| ResolutionError::LookupFailed {
                handle: handle.to_string(),
                source,
            })?;

        let user_id = account
            .id()
            .filter(|id| is_numeric_id(id))
            .ok_or_else(|| ResolutionError::UnresolvedId {
                handle: handle.to_string(),
            })?;

        Ok(TrackedUser::new(
            user_id,
            Some(account.handle().unwrap_or_else(|| handle.to_string())),
        ))
    }
}
