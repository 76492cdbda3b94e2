//! Users and the loaded-user registry.
//!
//! Users are loaded on demand (typically on connect) and may be unloaded
//! again once no save is outstanding. Group membership is carried as regular
//! permission nodes of the form `group.<name>`, scoped like any other node,
//! with a distinguished primary group marker beside them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use stratum_types::action_log::LogEntry;
use stratum_types::context::Context;
use stratum_types::messaging_adapter::UpdateKind;
use stratum_types::node::{Node, NodeKey, GROUP_NODE_PREFIX};
use stratum_types::store_adapter::{StoreAdapter, UserData};
use stratum_types::utils::{check_name, check_permission};

use crate::holder::{NodeSet, PermissionHolder};
use crate::mutation::{spawn_save, with_retry, MutationLocks, RetryPolicy, SaveHandle};
use crate::prelude::*;
use crate::settings::Settings;
use crate::sync::SyncHandle;

/// An immutable snapshot of one user.
#[derive(Clone, Debug)]
pub struct User {
	uuid: Uuid,
	uuid_str: Box<str>,
	username: Option<Box<str>>,
	primary_group: Box<str>,
	nodes: NodeSet,
}

impl User {
	/// Fresh record for a uuid the store has never seen. Not persisted until
	/// the first mutation; resolution falls back to the default group anyway.
	pub fn new(uuid: Uuid, default_group: &str) -> Self {
		Self {
			uuid,
			uuid_str: uuid.to_string().into(),
			username: None,
			primary_group: default_group.into(),
			nodes: NodeSet::default(),
		}
	}

	pub fn from_data(data: UserData) -> Self {
		Self {
			uuid: data.uuid,
			uuid_str: data.uuid.to_string().into(),
			username: data.username,
			primary_group: data.primary_group,
			nodes: NodeSet::from_nodes(data.nodes),
		}
	}

	/// Stored form; expired nodes are dropped here (lazy removal on save).
	pub fn to_data(&self, now: Timestamp) -> UserData {
		UserData {
			uuid: self.uuid,
			username: self.username.clone(),
			primary_group: self.primary_group.clone(),
			nodes: self.nodes.persistable_nodes(now),
		}
	}

	pub fn uuid(&self) -> Uuid {
		self.uuid
	}

	pub fn username(&self) -> Option<&str> {
		self.username.as_deref()
	}

	pub fn primary_group(&self) -> &str {
		&self.primary_group
	}

	/// Groups this user is a member of in `ctx`, primary group first, then
	/// the remaining memberships in node order.
	pub fn membership_groups(&self, ctx: &Context, now: Timestamp) -> Vec<Box<str>> {
		let mut list: Vec<Box<str>> = Vec::new();
		for node in self.nodes.iter_context(ctx, now) {
			if let Some(group) = node.membership_group() {
				if !list.iter().any(|g| g.as_ref() == group) {
					list.push(group.into());
				}
			}
		}
		if let Some(pos) = list.iter().position(|g| *g == self.primary_group) {
			if pos > 0 {
				let primary = list.remove(pos);
				list.insert(0, primary);
			}
		}
		list
	}

	pub(crate) fn nodes_mut(&mut self) -> &mut NodeSet {
		&mut self.nodes
	}

	pub(crate) fn set_primary_group(&mut self, group: Box<str>) {
		self.primary_group = group;
	}

	pub(crate) fn set_username(&mut self, username: Box<str>) {
		self.username = Some(username);
	}
}

impl PermissionHolder for User {
	fn identifier(&self) -> &str {
		&self.uuid_str
	}

	fn nodes(&self) -> &NodeSet {
		&self.nodes
	}

	fn inherited_groups(&self, ctx: &Context, now: Timestamp) -> Vec<Box<str>> {
		self.membership_groups(ctx, now)
	}
}

/// Registry and mutation surface for users.
#[derive(Debug)]
pub struct UserManager {
	store: Arc<dyn StoreAdapter>,
	sync: SyncHandle,
	users: Arc<parking_lot::RwLock<HashMap<Uuid, Arc<User>>>>,
	locks: MutationLocks<Uuid>,
	timeout: Duration,
	retry: RetryPolicy,
	default_group: Box<str>,
}

impl UserManager {
	pub(crate) fn new(
		store: Arc<dyn StoreAdapter>,
		sync: SyncHandle,
		settings: &Settings,
	) -> Self {
		Self {
			store,
			sync,
			users: Arc::new(parking_lot::RwLock::new(HashMap::new())),
			locks: MutationLocks::new(),
			timeout: settings.store_timeout(),
			retry: settings.retry_policy(),
			default_group: settings.default_group.clone(),
		}
	}

	pub fn get(&self, uuid: Uuid) -> Option<Arc<User>> {
		self.users.read().get(&uuid).cloned()
	}

	pub fn loaded(&self) -> Vec<Uuid> {
		self.users.read().keys().copied().collect()
	}

	/// Get a user, loading from the store on first reference. Unknown uuids
	/// yield a fresh record with the default primary group.
	pub async fn load(&self, uuid: Uuid) -> StResult<Arc<User>> {
		if let Some(user) = self.get(uuid) {
			return Ok(user);
		}

		let store = self.store.clone();
		let op = move || {
			let store = store.clone();
			async move { store.load_user(uuid).await }
		};
		let user = match with_retry(&op, self.timeout, &self.retry).await? {
			Some(data) => User::from_data(data),
			None => User::new(uuid, &self.default_group),
		};

		let user = Arc::new(user);
		self.users.write().insert(uuid, user.clone());
		Ok(user)
	}

	/// Evict a user from memory. Refused while a save is outstanding.
	pub fn unload(&self, uuid: Uuid) -> bool {
		if !self.locks.is_idle(&uuid) {
			debug!("Not unloading user {} (save pending)", uuid);
			return false;
		}
		let removed = self.users.write().remove(&uuid).is_some();
		self.locks.forget_if_idle(&uuid);
		removed
	}

	pub async fn set_node(
		&self,
		uuid: Uuid,
		node: Node,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		check_permission(&node.permission)?;
		let entry = log_entry(actor, uuid, &format!("set {}", node))?;
		self.mutate(uuid, Some(entry), move |user| {
			let mut updated = user.clone();
			updated.nodes_mut().set_node(node.clone())?;
			Ok(updated)
		})
		.await
	}

	/// Like [`UserManager::set_node`], but an explicit overwrite: an existing
	/// node of the same scope is replaced instead of rejected.
	pub async fn set_node_forced(
		&self,
		uuid: Uuid,
		node: Node,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		check_permission(&node.permission)?;
		let entry = log_entry(actor, uuid, &format!("set -f {}", node))?;
		self.mutate(uuid, Some(entry), move |user| {
			let mut updated = user.clone();
			updated.nodes_mut().set_node_forced(node.clone());
			Ok(updated)
		})
		.await
	}

	pub async fn unset_node(
		&self,
		uuid: Uuid,
		key: &NodeKey,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		let entry = log_entry(actor, uuid, &format!("unset {}", key))?;
		let key = key.clone();
		self.mutate(uuid, Some(entry), move |user| {
			let mut updated = user.clone();
			updated.nodes_mut().unset_node(&key)?;
			Ok(updated)
		})
		.await
	}

	/// Add a group membership in `ctx`.
	pub async fn add_group(
		&self,
		uuid: Uuid,
		group: &str,
		ctx: &Context,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		let group = group.to_lowercase();
		check_name(&group)?;
		let entry = log_entry(actor, uuid, &format!("addgroup {} ({})", group, ctx))?;
		let node = Node::group_membership(&group, ctx);
		self.mutate(uuid, Some(entry), move |user| {
			let mut updated = user.clone();
			updated.nodes_mut().set_node(node.clone())?;
			Ok(updated)
		})
		.await
	}

	/// Remove the group membership with exactly this scope.
	pub async fn remove_group(
		&self,
		uuid: Uuid,
		group: &str,
		ctx: &Context,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		let group = group.to_lowercase();
		let entry = log_entry(actor, uuid, &format!("removegroup {} ({})", group, ctx))?;
		let key = NodeKey {
			permission: format!("{}{}", GROUP_NODE_PREFIX, group).into(),
			server: ctx.server.clone(),
			world: ctx.world.clone(),
		};
		self.mutate(uuid, Some(entry), move |user| {
			let mut updated = user.clone();
			updated.nodes_mut().unset_node(&key)?;
			Ok(updated)
		})
		.await
	}

	/// Mark one of the user's member groups as primary.
	pub async fn set_primary_group(
		&self,
		uuid: Uuid,
		group: &str,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		let group = group.to_lowercase();
		let entry = log_entry(actor, uuid, &format!("setprimarygroup {}", group))?;
		let now = Timestamp::now();
		self.mutate(uuid, Some(entry), move |user| {
			let member = user
				.nodes()
				.iter()
				.any(|n| n.membership_group() == Some(group.as_str()) && !n.is_expired(now));
			if !member {
				return Err(Error::DoesNotHave);
			}
			let mut updated = user.clone();
			updated.set_primary_group(group.as_str().into());
			Ok(updated)
		})
		.await
	}

	/// Record the last known display name (login/rename).
	pub async fn update_username(&self, uuid: Uuid, username: &str) -> StResult<SaveHandle> {
		let username: Box<str> = username.into();
		self.mutate(uuid, None, move |user| {
			let mut updated = user.clone();
			updated.set_username(username.clone());
			Ok(updated)
		})
		.await
	}

	/// Apply `f` to the current snapshot, swap the result in optimistically
	/// and persist in the background. Fails fast (registry untouched) when
	/// `f` rejects the mutation. Used for every user mutation, including
	/// track promotion (which removes and adds a membership in one call).
	pub(crate) async fn mutate<F>(
		&self,
		uuid: Uuid,
		entry: Option<LogEntry>,
		f: F,
	) -> StResult<SaveHandle>
	where
		F: FnOnce(&User) -> StResult<User>,
	{
		let guard = self.locks.entry(&uuid).lock_owned().await;

		let current = self.load(uuid).await?;
		let updated = Arc::new(f(&current)?);
		self.users.write().insert(uuid, updated.clone());

		let store = self.store.clone();
		let data = updated.to_data(Timestamp::now());
		let op = move || {
			let store = store.clone();
			let data = data.clone();
			async move { store.save_user(&data).await }
		};

		let registry = self.users.clone();
		let sync = self.sync.clone();
		Ok(spawn_save(op, self.timeout, self.retry.clone(), guard, move |res| match res {
			Ok(()) => {
				sync.queue_update(UpdateKind::User(uuid));
				if let Some(entry) = entry {
					sync.queue_log(entry);
				}
			}
			Err(err) => {
				error!("Failed to persist user {}, rolling back: {}", uuid, err);
				registry.write().insert(uuid, current);
			}
		}))
	}

	/// Replace the in-memory copy with the store's current state (remote
	/// update handling). Only applies to users that are actually loaded.
	pub(crate) async fn reload(&self, uuid: Uuid) -> StResult<()> {
		if self.get(uuid).is_none() {
			return Ok(());
		}

		let store = self.store.clone();
		let op = move || {
			let store = store.clone();
			async move { store.load_user(uuid).await }
		};
		let user = match with_retry(&op, self.timeout, &self.retry).await? {
			Some(data) => User::from_data(data),
			// record gone from the store: reset to a fresh default record
			None => User::new(uuid, &self.default_group),
		};
		self.users.write().insert(uuid, Arc::new(user));
		Ok(())
	}

	pub(crate) async fn reload_all(&self) -> StResult<()> {
		for uuid in self.loaded() {
			self.reload(uuid).await?;
		}
		Ok(())
	}

	pub(crate) async fn quiesce(&self) {
		for lock in self.locks.all() {
			drop(lock.lock().await);
		}
	}

	pub(crate) fn clear(&self) {
		self.users.write().clear();
	}
}

fn log_entry(actor: Option<&str>, uuid: Uuid, action: &str) -> StResult<LogEntry> {
	let mut builder = LogEntry::build().user(uuid).action(action);
	if let Some(actor) = actor {
		builder = builder.actor(actor);
	}
	builder.finish()
}


// vim: ts=4
