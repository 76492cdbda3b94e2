//! Tracks: ordered group sequences driving promotion and demotion.
//!
//! A promotion moves a user from the track's group at position i to i+1 as a
//! single atomic holder mutation (old membership removed, new one added, both
//! in one snapshot swap). When a user belongs to several of the track's
//! groups, the first one in the track's declared order counts as current.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use stratum_types::action_log::LogEntry;
use stratum_types::context::Context;
use stratum_types::messaging_adapter::UpdateKind;
use stratum_types::node::Node;
use stratum_types::store_adapter::{StoreAdapter, TrackData};
use stratum_types::utils::check_name;

use crate::holder::PermissionHolder;
use crate::mutation::{spawn_save, with_retry, MutationLocks, RetryPolicy, SaveHandle};
use crate::prelude::*;
use crate::settings::Settings;
use crate::sync::SyncHandle;
use crate::user::{User, UserManager};

/// An immutable snapshot of one track.
#[derive(Clone, Debug)]
pub struct Track {
	name: Box<str>,
	groups: Box<[Box<str>]>,
}

impl Track {
	pub fn from_data(data: TrackData) -> Self {
		Self { name: data.name, groups: data.groups.into() }
	}

	pub fn to_data(&self) -> TrackData {
		TrackData { name: self.name.clone(), groups: self.groups.to_vec() }
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn groups(&self) -> &[Box<str>] {
		&self.groups
	}

	pub fn contains(&self, group: &str) -> bool {
		self.groups.iter().any(|g| g.as_ref() == group)
	}
}

/// Result of a promote/demote call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromotionOutcome {
	/// The user belonged to no track group and was placed at the first one.
	Started { group: Box<str> },
	/// The user moved from one track group to an adjacent one.
	Moved { from: Box<str>, to: Box<str> },
}

/// Registry and mutation surface for tracks.
#[derive(Debug)]
pub struct TrackManager {
	store: Arc<dyn StoreAdapter>,
	sync: SyncHandle,
	tracks: Arc<parking_lot::RwLock<HashMap<Box<str>, Arc<Track>>>>,
	locks: MutationLocks<Box<str>>,
	timeout: Duration,
	retry: RetryPolicy,
}

impl TrackManager {
	pub(crate) fn new(
		store: Arc<dyn StoreAdapter>,
		sync: SyncHandle,
		settings: &Settings,
	) -> Self {
		Self {
			store,
			sync,
			tracks: Arc::new(parking_lot::RwLock::new(HashMap::new())),
			locks: MutationLocks::new(),
			timeout: settings.store_timeout(),
			retry: settings.retry_policy(),
		}
	}

	pub fn get(&self, name: &str) -> Option<Arc<Track>> {
		self.tracks.read().get(name).cloned()
	}

	pub fn loaded(&self) -> Vec<Box<str>> {
		self.tracks.read().keys().cloned().collect()
	}

	/// Get a track, loading it from the store on first reference.
	pub async fn load(&self, name: &str) -> StResult<Arc<Track>> {
		let name = name.to_lowercase();
		if let Some(track) = self.get(&name) {
			return Ok(track);
		}

		let store = self.store.clone();
		let key: Box<str> = name.as_str().into();
		let op = move || {
			let store = store.clone();
			let key = key.clone();
			async move { store.load_track(&key).await }
		};
		let data = with_retry(&op, self.timeout, &self.retry).await?.ok_or(Error::NotFound)?;

		let track = Arc::new(Track::from_data(data));
		self.tracks.write().insert(name.into(), track.clone());
		Ok(track)
	}

	/// Create a track (idempotent: loads the existing record if present).
	pub async fn create(&self, name: &str, actor: Option<&str>) -> StResult<Arc<Track>> {
		let name = name.to_lowercase();
		check_name(&name)?;

		if let Some(track) = self.get(&name) {
			return Ok(track);
		}

		let key: Box<str> = name.as_str().into();
		let _guard = self.locks.entry(&key).lock_owned().await;

		let store = self.store.clone();
		let key2 = key.clone();
		let op = move || {
			let store = store.clone();
			let key = key2.clone();
			async move { store.create_and_load_track(&key).await }
		};
		let data = with_retry(&op, self.timeout, &self.retry).await?;

		let track = Arc::new(Track::from_data(data));
		self.tracks.write().insert(key.clone(), track.clone());
		self.sync.queue_update(UpdateKind::Track(key.clone()));
		self.sync.queue_log(track_log(actor, &key, "create")?);
		info!("Created track '{}'", key);
		Ok(track)
	}

	pub async fn delete(&self, name: &str, actor: Option<&str>) -> StResult<()> {
		let name = name.to_lowercase();
		let key: Box<str> = name.as_str().into();
		let _guard = self.locks.entry(&key).lock_owned().await;

		let store = self.store.clone();
		let key2 = key.clone();
		let op = move || {
			let store = store.clone();
			let key = key2.clone();
			async move { store.delete_track(&key).await }
		};
		with_retry(&op, self.timeout, &self.retry).await?;

		self.tracks.write().remove(&key);
		self.sync.queue_update(UpdateKind::Track(key.clone()));
		self.sync.queue_log(track_log(actor, &key, "delete")?);
		info!("Deleted track '{}'", key);
		drop(_guard);
		self.locks.forget_if_idle(&key);
		Ok(())
	}

	/// Append a group to the end of the track.
	pub async fn append_group(
		&self,
		name: &str,
		group: &str,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		let group = group.to_lowercase();
		check_name(&group)?;
		let entry = track_log(actor, &name.to_lowercase(), &format!("append {}", group))?;
		self.mutate(name, Some(entry), move |track| {
			if track.contains(&group) {
				return Err(Error::AlreadyContains);
			}
			let mut groups = track.groups.to_vec();
			groups.push(group.as_str().into());
			Ok(Track { name: track.name.clone(), groups: groups.into() })
		})
		.await
	}

	pub async fn remove_group(
		&self,
		name: &str,
		group: &str,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		let group = group.to_lowercase();
		let entry = track_log(actor, &name.to_lowercase(), &format!("remove {}", group))?;
		self.mutate(name, Some(entry), move |track| {
			if !track.contains(&group) {
				return Err(Error::DoesNotHave);
			}
			let mut groups = track.groups.to_vec();
			groups.retain(|g| g.as_ref() != group.as_str());
			Ok(Track { name: track.name.clone(), groups: groups.into() })
		})
		.await
	}

	/// Move a user one step up the track.
	///
	/// The user's current position is the first track group they belong to in
	/// the track's declared order. With no membership at all they are placed
	/// at the track's first group; at the last group the call fails with
	/// [`Error::EndOfTrack`] and membership is unchanged.
	pub async fn promote(
		&self,
		users: &UserManager,
		uuid: Uuid,
		track_name: &str,
		ctx: &Context,
		actor: Option<&str>,
	) -> StResult<(PromotionOutcome, SaveHandle)> {
		let track = self.load(track_name).await?;
		if track.groups().is_empty() {
			return Err(Error::EndOfTrack);
		}

		let user = users.load(uuid).await?;
		let now = Timestamp::now();
		match current_position(&track, &user, ctx, now) {
			None => {
				let first = track.groups()[0].clone();
				let entry = user_log(
					actor,
					uuid,
					&format!("promote {} (joined {})", track.name(), first),
				)?;
				let node = Node::group_membership(&first, ctx);
				let handle = users
					.mutate(uuid, Some(entry), move |user| {
						let mut updated = user.clone();
						updated.nodes_mut().set_node(node.clone())?;
						Ok(updated)
					})
					.await?;
				Ok((PromotionOutcome::Started { group: first }, handle))
			}
			Some(pos) if pos + 1 == track.groups().len() => Err(Error::EndOfTrack),
			Some(pos) => {
				let from = track.groups()[pos].clone();
				let to = track.groups()[pos + 1].clone();
				let entry = user_log(
					actor,
					uuid,
					&format!("promote {} ({} -> {})", track.name(), from, to),
				)?;
				let handle = self
					.move_membership(users, uuid, entry, from.clone(), to.clone(), ctx, now)
					.await?;
				Ok((PromotionOutcome::Moved { from, to }, handle))
			}
		}
	}

	/// Move a user one step down the track. Fails with
	/// [`Error::EndOfTrack`] at the first group, or when the user belongs to
	/// no track group at all.
	pub async fn demote(
		&self,
		users: &UserManager,
		uuid: Uuid,
		track_name: &str,
		ctx: &Context,
		actor: Option<&str>,
	) -> StResult<(PromotionOutcome, SaveHandle)> {
		let track = self.load(track_name).await?;
		if track.groups().is_empty() {
			return Err(Error::EndOfTrack);
		}

		let user = users.load(uuid).await?;
		let now = Timestamp::now();
		match current_position(&track, &user, ctx, now) {
			None | Some(0) => Err(Error::EndOfTrack),
			Some(pos) => {
				let from = track.groups()[pos].clone();
				let to = track.groups()[pos - 1].clone();
				let entry = user_log(
					actor,
					uuid,
					&format!("demote {} ({} -> {})", track.name(), from, to),
				)?;
				let handle = self
					.move_membership(users, uuid, entry, from.clone(), to.clone(), ctx, now)
					.await?;
				Ok((PromotionOutcome::Moved { from, to }, handle))
			}
		}
	}

	/// Swap one membership for an adjacent one as a single holder mutation.
	async fn move_membership(
		&self,
		users: &UserManager,
		uuid: Uuid,
		entry: LogEntry,
		from: Box<str>,
		to: Box<str>,
		ctx: &Context,
		now: Timestamp,
	) -> StResult<SaveHandle> {
		let ctx = ctx.clone();
		users
			.mutate(uuid, Some(entry), move |user| {
				let key = user
					.nodes()
					.iter()
					.find(|n| {
						n.membership_group() == Some(from.as_ref())
							&& n.matches_context(&ctx)
							&& !n.is_expired(now)
					})
					.map(|n| n.key())
					.ok_or(Error::DoesNotHave)?;

				let mut updated = user.clone();
				updated.nodes_mut().unset_node(&key)?;
				updated.nodes_mut().set_node(Node::group_membership(&to, &ctx))?;
				if updated.primary_group() == from.as_ref() {
					updated.set_primary_group(to.clone());
				}
				Ok(updated)
			})
			.await
	}

	async fn mutate<F>(&self, name: &str, entry: Option<LogEntry>, f: F) -> StResult<SaveHandle>
	where
		F: FnOnce(&Track) -> StResult<Track>,
	{
		let key: Box<str> = name.to_lowercase().into();
		let guard = self.locks.entry(&key).lock_owned().await;

		let current = self.load(&key).await?;
		let updated = Arc::new(f(&current)?);
		self.tracks.write().insert(key.clone(), updated.clone());

		let store = self.store.clone();
		let data = updated.to_data();
		let op = move || {
			let store = store.clone();
			let data = data.clone();
			async move { store.save_track(&data).await }
		};

		let registry = self.tracks.clone();
		let sync = self.sync.clone();
		let rollback_key = key.clone();
		Ok(spawn_save(op, self.timeout, self.retry.clone(), guard, move |res| match res {
			Ok(()) => {
				sync.queue_update(UpdateKind::Track(rollback_key));
				if let Some(entry) = entry {
					sync.queue_log(entry);
				}
			}
			Err(err) => {
				error!("Failed to persist track '{}', rolling back: {}", rollback_key, err);
				registry.write().insert(rollback_key, current);
			}
		}))
	}

	/// Replace the in-memory copy with the store's current state (remote
	/// update handling). A track the store no longer knows is evicted.
	pub(crate) async fn reload(&self, name: &str) -> StResult<()> {
		let key: Box<str> = name.to_lowercase().into();

		let store = self.store.clone();
		let key2 = key.clone();
		let op = move || {
			let store = store.clone();
			let key = key2.clone();
			async move { store.load_track(&key).await }
		};
		match with_retry(&op, self.timeout, &self.retry).await? {
			Some(data) => {
				self.tracks.write().insert(key, Arc::new(Track::from_data(data)));
			}
			None => {
				self.tracks.write().remove(&key);
			}
		}
		Ok(())
	}

	/// Load every track the store knows, evicting unlisted ones.
	pub(crate) async fn load_all(&self) -> StResult<()> {
		let store = self.store.clone();
		let op = move || {
			let store = store.clone();
			async move { store.list_tracks().await }
		};
		let names = with_retry(&op, self.timeout, &self.retry).await?;

		for name in &names {
			self.reload(name).await?;
		}
		let known: std::collections::HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
		self.tracks.write().retain(|name, _| known.contains(name.as_ref()));
		Ok(())
	}

	pub(crate) async fn quiesce(&self) {
		for lock in self.locks.all() {
			drop(lock.lock().await);
		}
	}

	pub(crate) fn clear(&self) {
		self.tracks.write().clear();
	}
}

fn current_position(track: &Track, user: &User, ctx: &Context, now: Timestamp) -> Option<usize> {
	let memberships = user.membership_groups(ctx, now);
	track.groups().iter().position(|g| memberships.iter().any(|m| m == g))
}

fn track_log(actor: Option<&str>, track: &str, action: &str) -> StResult<LogEntry> {
	let mut builder = LogEntry::build().track(track).action(action);
	if let Some(actor) = actor {
		builder = builder.actor(actor);
	}
	builder.finish()
}

fn user_log(actor: Option<&str>, uuid: Uuid, action: &str) -> StResult<LogEntry> {
	let mut builder = LogEntry::build().user(uuid).action(action);
	if let Some(actor) = actor {
		builder = builder.actor(actor);
	}
	builder.finish()
}


// vim: ts=4
