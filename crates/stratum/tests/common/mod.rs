//! Shared test fixtures: an in-memory store adapter with failure injection,
//! and helpers for building engine instances over it.

// not every test binary uses every helper
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use stratum::app::{App, AppState};
use stratum::settings::Settings;
use stratum_types::error::{Error, StResult};
use stratum_types::messaging_adapter::{LoopbackMessaging, MessagingAdapter};
use stratum_types::store_adapter::{
	GroupData, StoreAdapter, TrackData, UserData, UuidEntry,
};

/// In-memory store shared between engine instances to model several
/// processes over one backing database.
#[derive(Debug, Default)]
pub struct MemoryStore {
	users: Mutex<HashMap<Uuid, UserData>>,
	groups: Mutex<HashMap<Box<str>, GroupData>>,
	tracks: Mutex<HashMap<Box<str>, TrackData>>,
	uuid_entries: Mutex<HashMap<Uuid, UuidEntry>>,
	/// When set, every write fails with a persistent error.
	fail_writes: AtomicBool,
	/// Artificial latency applied to writes, for in-flight save tests.
	write_delay_ms: AtomicU64,
}

impl MemoryStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn fail_writes(&self, fail: bool) {
		self.fail_writes.store(fail, Ordering::SeqCst);
	}

	pub fn set_write_delay(&self, delay: Duration) {
		self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
	}

	pub fn stored_group(&self, name: &str) -> Option<GroupData> {
		lock(&self.groups).get(name).cloned()
	}

	pub fn stored_user(&self, uuid: Uuid) -> Option<UserData> {
		lock(&self.users).get(&uuid).cloned()
	}

	pub fn stored_track(&self, name: &str) -> Option<TrackData> {
		lock(&self.tracks).get(name).cloned()
	}

	async fn write_gate(&self) -> StResult<()> {
		let delay = self.write_delay_ms.load(Ordering::SeqCst);
		if delay > 0 {
			tokio::time::sleep(Duration::from_millis(delay)).await;
		}
		if self.fail_writes.load(Ordering::SeqCst) {
			return Err(Error::Loading("memory store: writes disabled".into()));
		}
		Ok(())
	}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl StoreAdapter for MemoryStore {
	async fn load_user(&self, uuid: Uuid) -> StResult<Option<UserData>> {
		Ok(lock(&self.users).get(&uuid).cloned())
	}

	async fn save_user(&self, user: &UserData) -> StResult<()> {
		self.write_gate().await?;
		lock(&self.users).insert(user.uuid, user.clone());
		Ok(())
	}

	async fn load_group(&self, name: &str) -> StResult<Option<GroupData>> {
		Ok(lock(&self.groups).get(name).cloned())
	}

	async fn create_and_load_group(&self, name: &str) -> StResult<GroupData> {
		self.write_gate().await?;
		let mut groups = lock(&self.groups);
		let data = groups.entry(name.into()).or_insert_with(|| GroupData {
			name: name.into(),
			nodes: vec![],
			inherits: vec![],
		});
		Ok(data.clone())
	}

	async fn save_group(&self, group: &GroupData) -> StResult<()> {
		self.write_gate().await?;
		lock(&self.groups).insert(group.name.clone(), group.clone());
		Ok(())
	}

	async fn delete_group(&self, name: &str) -> StResult<()> {
		self.write_gate().await?;
		lock(&self.groups).remove(name);
		Ok(())
	}

	async fn list_groups(&self) -> StResult<Vec<Box<str>>> {
		Ok(lock(&self.groups).keys().cloned().collect())
	}

	async fn load_track(&self, name: &str) -> StResult<Option<TrackData>> {
		Ok(lock(&self.tracks).get(name).cloned())
	}

	async fn create_and_load_track(&self, name: &str) -> StResult<TrackData> {
		self.write_gate().await?;
		let mut tracks = lock(&self.tracks);
		let data = tracks
			.entry(name.into())
			.or_insert_with(|| TrackData { name: name.into(), groups: vec![] });
		Ok(data.clone())
	}

	async fn save_track(&self, track: &TrackData) -> StResult<()> {
		self.write_gate().await?;
		lock(&self.tracks).insert(track.name.clone(), track.clone());
		Ok(())
	}

	async fn delete_track(&self, name: &str) -> StResult<()> {
		self.write_gate().await?;
		lock(&self.tracks).remove(name);
		Ok(())
	}

	async fn list_tracks(&self) -> StResult<Vec<Box<str>>> {
		Ok(lock(&self.tracks).keys().cloned().collect())
	}

	async fn load_uuid_entry(&self, external_id: Uuid) -> StResult<Option<UuidEntry>> {
		Ok(lock(&self.uuid_entries).get(&external_id).copied())
	}

	async fn save_uuid_entry(&self, entry: &UuidEntry) -> StResult<()> {
		self.write_gate().await?;
		lock(&self.uuid_entries).insert(entry.external_id, *entry);
		Ok(())
	}
}

pub fn test_settings() -> Settings {
	Settings {
		// keep retries fast so failure tests stay quick
		store_timeout_ms: 500,
		store_retry_min_ms: 10,
		store_retry_max_ms: 50,
		store_retry_times: 2,
		sync_interval_secs: 1,
		..Settings::default()
	}
}

pub async fn build_app(
	store: Arc<MemoryStore>,
	messaging: Arc<dyn MessagingAdapter>,
) -> App {
	let app = AppState::build(store, messaging, test_settings())
		.await
		.unwrap_or_else(|err| panic!("failed to build engine: {}", err));
	AppState::start(&app);
	app
}

pub async fn build_single_app(store: Arc<MemoryStore>) -> App {
	build_app(store, Arc::new(LoopbackMessaging::default())).await
}

pub fn setup_test_logging() {
	let _ = tracing_subscriber::fmt()
		.with_test_writer()
		.with_max_level(tracing::Level::DEBUG)
		.try_init();
}

/// Poll `predicate` until it holds or the deadline passes.
pub async fn eventually<F: Fn() -> bool>(deadline: Duration, predicate: F) -> bool {
	let start = tokio::time::Instant::now();
	loop {
		if predicate() {
			return true;
		}
		if start.elapsed() > deadline {
			return false;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
}

// vim: ts=4
