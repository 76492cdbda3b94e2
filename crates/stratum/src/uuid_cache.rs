//! Identity cache: external-facing uuid ↔ internal stable uuid, plus a
//! bounded username lookup cache.
//!
//! The external id is whatever the platform hands us on connect; the internal
//! id is the primary key user records are stored under and is never
//! reassigned. Entries are created on first lookup and persisted; they are
//! never deleted while the user record exists. This state is explicitly
//! owned: constructed once, handed around, and torn down with
//! [`UuidCache::clear`].

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use stratum_types::store_adapter::{StoreAdapter, UuidEntry};

use crate::mutation::{with_retry, RetryPolicy};
use crate::prelude::*;
use crate::settings::Settings;

#[derive(Debug, Default)]
struct Maps {
	external_to_internal: HashMap<Uuid, Uuid>,
	internal_to_external: HashMap<Uuid, Uuid>,
}

pub struct UuidCache {
	store: Arc<dyn StoreAdapter>,
	maps: parking_lot::RwLock<Maps>,
	/// lowercase username → internal uuid
	usernames: parking_lot::RwLock<LruCache<Box<str>, Uuid>>,
	timeout: Duration,
	retry: RetryPolicy,
}

impl std::fmt::Debug for UuidCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UuidCache")
			.field("mappings", &self.maps.read().external_to_internal.len())
			.finish_non_exhaustive()
	}
}

impl UuidCache {
	pub(crate) fn new(store: Arc<dyn StoreAdapter>, settings: &Settings) -> Self {
		let capacity = NonZeroUsize::new(settings.username_cache_size.max(1))
			.unwrap_or(NonZeroUsize::MIN);
		Self {
			store,
			maps: parking_lot::RwLock::new(Maps::default()),
			usernames: parking_lot::RwLock::new(LruCache::new(capacity)),
			timeout: settings.store_timeout(),
			retry: settings.retry_policy(),
		}
	}

	/// Resolve an external id to the internal stable id, creating and
	/// persisting an identity mapping on first contact.
	pub async fn internal_id(&self, external_id: Uuid) -> StResult<Uuid> {
		if let Some(internal) = self.maps.read().external_to_internal.get(&external_id) {
			return Ok(*internal);
		}

		let store = self.store.clone();
		let op = move || {
			let store = store.clone();
			async move { store.load_uuid_entry(external_id).await }
		};
		let entry = match with_retry(&op, self.timeout, &self.retry).await? {
			Some(entry) => entry,
			None => {
				// first contact: external and internal identity coincide
				let entry = UuidEntry { external_id, internal_id: external_id };
				let store = self.store.clone();
				let op = move || {
					let store = store.clone();
					async move { store.save_uuid_entry(&entry).await }
				};
				with_retry(&op, self.timeout, &self.retry).await?;
				debug!("Created uuid mapping for {}", external_id);
				entry
			}
		};

		self.record(entry);
		Ok(entry.internal_id)
	}

	/// Forward lookup without touching the store.
	pub fn cached_internal_id(&self, external_id: Uuid) -> Option<Uuid> {
		self.maps.read().external_to_internal.get(&external_id).copied()
	}

	/// Reverse lookup; in-memory only.
	pub fn external_id(&self, internal_id: Uuid) -> Option<Uuid> {
		self.maps.read().internal_to_external.get(&internal_id).copied()
	}

	/// Point an external id at a different internal id (identity migration).
	pub async fn remap(&self, external_id: Uuid, internal_id: Uuid) -> StResult<()> {
		let entry = UuidEntry { external_id, internal_id };
		let store = self.store.clone();
		let op = move || {
			let store = store.clone();
			async move { store.save_uuid_entry(&entry).await }
		};
		with_retry(&op, self.timeout, &self.retry).await?;

		let mut maps = self.maps.write();
		if let Some(old) = maps.external_to_internal.insert(external_id, internal_id) {
			maps.internal_to_external.remove(&old);
		}
		maps.internal_to_external.insert(internal_id, external_id);
		info!("Remapped external id {} to internal id {}", external_id, internal_id);
		Ok(())
	}

	/// Record the last seen username for an internal id (login/rename).
	pub fn cache_username(&self, username: &str, internal_id: Uuid) {
		self.usernames.write().put(username.to_lowercase().into(), internal_id);
	}

	pub fn lookup_username(&self, username: &str) -> Option<Uuid> {
		self.usernames.write().get(username.to_lowercase().as_str()).copied()
	}

	fn record(&self, entry: UuidEntry) {
		let mut maps = self.maps.write();
		maps.external_to_internal.insert(entry.external_id, entry.internal_id);
		maps.internal_to_external.insert(entry.internal_id, entry.external_id);
	}

	/// Teardown: drop all cached mappings (mappings are already durable, so
	/// there is nothing to flush beyond what `remap`/`internal_id` wrote).
	pub(crate) fn clear(&self) {
		self.maps.write().external_to_internal.clear();
		self.maps.write().internal_to_external.clear();
		self.usernames.write().clear();
	}
}


// vim: ts=4
