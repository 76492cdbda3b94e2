//! Groups and the loaded-group registry.
//!
//! A [`Group`] is an immutable snapshot; the [`GroupManager`] owns the
//! registry of loaded groups and performs all mutations by building a new
//! snapshot, swapping it in optimistically, and persisting on a background
//! task (see [`crate::mutation`]). Inherit-edge creation runs the acyclicity
//! check atomically under a dedicated graph lock, so a cycle can never be
//! committed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use stratum_types::action_log::LogEntry;
use stratum_types::context::Context;
use stratum_types::messaging_adapter::UpdateKind;
use stratum_types::node::{Node, NodeKey};
use stratum_types::store_adapter::{GroupData, InheritEdge, StoreAdapter};
use stratum_types::utils::{check_name, check_permission};

use crate::holder::{NodeSet, PermissionHolder};
use crate::mutation::{spawn_save, with_retry, MutationLocks, RetryPolicy, SaveHandle};
use crate::prelude::*;
use crate::resolver::GroupMap;
use crate::settings::Settings;
use crate::sync::SyncHandle;

/// An immutable snapshot of one group.
#[derive(Clone, Debug)]
pub struct Group {
	name: Box<str>,
	nodes: NodeSet,
	inherits: Box<[InheritEdge]>,
}

impl Group {
	pub fn from_data(data: GroupData) -> Self {
		Self {
			name: data.name,
			nodes: NodeSet::from_nodes(data.nodes),
			inherits: data.inherits.into(),
		}
	}

	/// Stored form; expired nodes are dropped here (lazy removal on save).
	pub fn to_data(&self, now: Timestamp) -> GroupData {
		GroupData {
			name: self.name.clone(),
			nodes: self.nodes.persistable_nodes(now),
			inherits: self.inherits.to_vec(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn inherit_edges(&self) -> &[InheritEdge] {
		&self.inherits
	}

	/// New snapshot with the node set transformed by `f`.
	fn modified<F: FnOnce(&mut NodeSet) -> StResult<()>>(&self, f: F) -> StResult<Group> {
		let mut updated = self.clone();
		f(&mut updated.nodes)?;
		Ok(updated)
	}

	fn with_edge(&self, edge: InheritEdge) -> Group {
		let mut inherits = self.inherits.to_vec();
		inherits.push(edge);
		Group { name: self.name.clone(), nodes: self.nodes.clone(), inherits: inherits.into() }
	}

	fn without_edge(&self, target: &str, ctx: &Context) -> StResult<Group> {
		let mut inherits = self.inherits.to_vec();
		let before = inherits.len();
		inherits.retain(|e| {
			!(e.group.as_ref() == target && e.server == ctx.server && e.world == ctx.world)
		});
		if inherits.len() == before {
			return Err(Error::DoesNotHave);
		}
		Ok(Group { name: self.name.clone(), nodes: self.nodes.clone(), inherits: inherits.into() })
	}
}

fn edge_matches(edge: &InheritEdge, ctx: &Context) -> bool {
	let server_ok = edge.server.is_none() || edge.server == ctx.server;
	let world_ok = edge.world.is_none() || edge.world == ctx.world;
	server_ok && world_ok
}

impl PermissionHolder for Group {
	fn identifier(&self) -> &str {
		&self.name
	}

	fn nodes(&self) -> &NodeSet {
		&self.nodes
	}

	fn inherited_groups(&self, ctx: &Context, _now: Timestamp) -> Vec<Box<str>> {
		let mut edges: Vec<&InheritEdge> =
			self.inherits.iter().filter(|e| edge_matches(e, ctx)).collect();
		// stable sort keeps declaration order within one weight tier
		edges.sort_by_key(|e| std::cmp::Reverse(e.weight));
		edges.iter().map(|e| e.group.clone()).collect()
	}
}

/// Registry and mutation surface for groups.
#[derive(Debug)]
pub struct GroupManager {
	store: Arc<dyn StoreAdapter>,
	sync: SyncHandle,
	groups: Arc<parking_lot::RwLock<HashMap<Box<str>, Arc<Group>>>>,
	locks: MutationLocks<Box<str>>,
	/// Serializes inherit-edge creation so the acyclicity check and the edge
	/// commit form one transaction.
	graph_lock: tokio::sync::Mutex<()>,
	timeout: Duration,
	retry: RetryPolicy,
	default_group: Box<str>,
}

impl GroupManager {
	pub(crate) fn new(
		store: Arc<dyn StoreAdapter>,
		sync: SyncHandle,
		settings: &Settings,
	) -> Self {
		Self {
			store,
			sync,
			groups: Arc::new(parking_lot::RwLock::new(HashMap::new())),
			locks: MutationLocks::new(),
			graph_lock: tokio::sync::Mutex::new(()),
			timeout: settings.store_timeout(),
			retry: settings.retry_policy(),
			default_group: settings.default_group.clone(),
		}
	}

	pub fn get(&self, name: &str) -> Option<Arc<Group>> {
		self.groups.read().get(name).cloned()
	}

	pub fn loaded(&self) -> Vec<Box<str>> {
		self.groups.read().keys().cloned().collect()
	}

	/// Cheap snapshot of the registry for resolution.
	pub fn snapshot(&self) -> GroupMap {
		self.groups.read().clone()
	}

	/// Get a group, loading it from the store on first reference.
	pub async fn load(&self, name: &str) -> StResult<Arc<Group>> {
		let name = name.to_lowercase();
		if let Some(group) = self.get(&name) {
			return Ok(group);
		}

		let store = self.store.clone();
		let key: Box<str> = name.as_str().into();
		let op = move || {
			let store = store.clone();
			let key = key.clone();
			async move { store.load_group(&key).await }
		};
		let data = with_retry(&op, self.timeout, &self.retry).await?.ok_or(Error::NotFound)?;

		let group = Arc::new(Group::from_data(data));
		self.groups.write().insert(name.into(), group.clone());
		Ok(group)
	}

	/// Create a group (idempotent: loads the existing record if present).
	pub async fn create(&self, name: &str, actor: Option<&str>) -> StResult<Arc<Group>> {
		let name = name.to_lowercase();
		check_name(&name)?;

		if let Some(group) = self.get(&name) {
			return Ok(group);
		}

		let key: Box<str> = name.as_str().into();
		let _guard = self.locks.entry(&key).lock_owned().await;

		let store = self.store.clone();
		let key2 = key.clone();
		let op = move || {
			let store = store.clone();
			let key = key2.clone();
			async move { store.create_and_load_group(&key).await }
		};
		let data = with_retry(&op, self.timeout, &self.retry).await?;

		let group = Arc::new(Group::from_data(data));
		self.groups.write().insert(key.clone(), group.clone());
		self.sync.queue_update(UpdateKind::Group(key.clone()));
		self.sync.queue_log(log_entry(actor, &key, "create")?);
		info!("Created group '{}'", key);
		Ok(group)
	}

	pub async fn delete(&self, name: &str, actor: Option<&str>) -> StResult<()> {
		let name = name.to_lowercase();
		if name == self.default_group.as_ref() {
			return Err(Error::InvalidEntry("the default group cannot be deleted".into()));
		}

		let key: Box<str> = name.as_str().into();
		let _guard = self.locks.entry(&key).lock_owned().await;

		let store = self.store.clone();
		let key2 = key.clone();
		let op = move || {
			let store = store.clone();
			let key = key2.clone();
			async move { store.delete_group(&key).await }
		};
		with_retry(&op, self.timeout, &self.retry).await?;

		self.groups.write().remove(&key);
		self.sync.queue_update(UpdateKind::Group(key.clone()));
		self.sync.queue_log(log_entry(actor, &key, "delete")?);
		info!("Deleted group '{}'", key);
		drop(_guard);
		self.locks.forget_if_idle(&key);
		Ok(())
	}

	pub async fn set_node(
		&self,
		name: &str,
		node: Node,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		check_permission(&node.permission)?;
		let action = format!("set {}", node);
		let entry = log_entry(actor, &name.to_lowercase(), &action)?;
		self.mutate(name, Some(entry), move |group| {
			group.modified(|nodes| nodes.set_node(node.clone()))
		})
		.await
	}

	/// Like [`GroupManager::set_node`], but an explicit overwrite: an existing
	/// node of the same scope is replaced instead of rejected.
	pub async fn set_node_forced(
		&self,
		name: &str,
		node: Node,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		check_permission(&node.permission)?;
		let action = format!("set -f {}", node);
		let entry = log_entry(actor, &name.to_lowercase(), &action)?;
		self.mutate(name, Some(entry), move |group| {
			group.modified(|nodes| {
				nodes.set_node_forced(node.clone());
				Ok(())
			})
		})
		.await
	}

	pub async fn unset_node(
		&self,
		name: &str,
		key: &NodeKey,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		let action = format!("unset {}", key);
		let entry = log_entry(actor, &name.to_lowercase(), &action)?;
		let key = key.clone();
		self.mutate(name, Some(entry), move |group| {
			group.modified(|nodes| nodes.unset_node(&key))
		})
		.await
	}

	/// Add an inherit edge. The acyclicity check runs atomically with the
	/// edge commit: a cycle is rejected here and can never be discovered at
	/// resolution time.
	pub async fn set_inherit(
		&self,
		name: &str,
		target: &str,
		ctx: &Context,
		weight: i32,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		let name = name.to_lowercase();
		let target = target.to_lowercase();

		let _graph = self.graph_lock.lock().await;

		if name == target {
			return Err(Error::InvalidEntry("a group may not inherit itself".into()));
		}
		// the target must exist before it can be inherited
		self.load(&target).await?;
		let group = self.load(&name).await?;

		let duplicate = group.inherit_edges().iter().any(|e| {
			e.group.as_ref() == target && e.server == ctx.server && e.world == ctx.world
		});
		if duplicate {
			return Err(Error::AlreadyInherits);
		}
		if self.reaches(&target, &name).await? {
			return Err(Error::InvalidEntry(format!(
				"inheriting '{}' would create a cycle",
				target
			)));
		}

		let edge = InheritEdge {
			group: target.as_str().into(),
			server: ctx.server.clone(),
			world: ctx.world.clone(),
			weight,
		};
		let action = format!("setinherit {} ({})", target, ctx);
		let entry = log_entry(actor, &name, &action)?;
		self.mutate(&name, Some(entry), move |group| Ok(group.with_edge(edge))).await
	}

	pub async fn unset_inherit(
		&self,
		name: &str,
		target: &str,
		ctx: &Context,
		actor: Option<&str>,
	) -> StResult<SaveHandle> {
		let name = name.to_lowercase();
		let target = target.to_lowercase();
		let action = format!("unsetinherit {} ({})", target, ctx);
		let entry = log_entry(actor, &name, &action)?;
		let ctx = ctx.clone();
		self.mutate(&name, Some(entry), move |group| group.without_edge(&target, &ctx)).await
	}

	/// True if `from` transitively inherits `needle`, loading groups from the
	/// store as the walk needs them. Context scoping is deliberately ignored:
	/// the graph must be acyclic for every context.
	async fn reaches(&self, from: &str, needle: &str) -> StResult<bool> {
		let mut stack: Vec<Box<str>> = vec![from.into()];
		let mut visited: HashSet<Box<str>> = HashSet::new();

		while let Some(name) = stack.pop() {
			if name.as_ref() == needle {
				return Ok(true);
			}
			if !visited.insert(name.clone()) {
				continue;
			}
			let group = match self.load(&name).await {
				Ok(group) => group,
				// an edge to a vanished group cannot complete a cycle
				Err(Error::NotFound) => continue,
				Err(err) => return Err(err),
			};
			for edge in group.inherit_edges() {
				if !visited.contains(&edge.group) {
					stack.push(edge.group.clone());
				}
			}
		}
		Ok(false)
	}

	/// Apply `f` to the current snapshot, swap the result in optimistically
	/// and persist in the background. Fails fast (registry untouched) when
	/// `f` rejects the mutation.
	async fn mutate<F>(
		&self,
		name: &str,
		entry: Option<LogEntry>,
		f: F,
	) -> StResult<SaveHandle>
	where
		F: FnOnce(&Group) -> StResult<Group>,
	{
		let key: Box<str> = name.to_lowercase().into();
		let guard = self.locks.entry(&key).lock_owned().await;

		let current = self.load(&key).await?;
		let updated = Arc::new(f(&current)?);
		self.groups.write().insert(key.clone(), updated.clone());

		let store = self.store.clone();
		let data = updated.to_data(Timestamp::now());
		let op = move || {
			let store = store.clone();
			let data = data.clone();
			async move { store.save_group(&data).await }
		};

		let registry = self.groups.clone();
		let sync = self.sync.clone();
		let rollback_key = key.clone();
		Ok(spawn_save(op, self.timeout, self.retry.clone(), guard, move |res| match res {
			Ok(()) => {
				sync.queue_update(UpdateKind::Group(rollback_key));
				if let Some(entry) = entry {
					sync.queue_log(entry);
				}
			}
			Err(err) => {
				error!("Failed to persist group '{}', rolling back: {}", rollback_key, err);
				registry.write().insert(rollback_key, current);
			}
		}))
	}

	/// Replace the in-memory copy with the store's current state (remote
	/// update handling). A group the store no longer knows is evicted.
	pub(crate) async fn reload(&self, name: &str) -> StResult<()> {
		let key: Box<str> = name.to_lowercase().into();

		let store = self.store.clone();
		let key2 = key.clone();
		let op = move || {
			let store = store.clone();
			let key = key2.clone();
			async move { store.load_group(&key).await }
		};
		match with_retry(&op, self.timeout, &self.retry).await? {
			Some(data) => {
				self.groups.write().insert(key, Arc::new(Group::from_data(data)));
			}
			None => {
				self.groups.write().remove(&key);
			}
		}
		Ok(())
	}

	/// Load every group the store knows, evicting the ones it no longer
	/// lists. The group graph must be complete in memory for resolution.
	pub(crate) async fn load_all(&self) -> StResult<()> {
		let store = self.store.clone();
		let op = move || {
			let store = store.clone();
			async move { store.list_groups().await }
		};
		let names = with_retry(&op, self.timeout, &self.retry).await?;

		for name in &names {
			self.reload(name).await?;
		}
		let known: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
		self.groups.write().retain(|name, _| known.contains(name.as_ref()));
		Ok(())
	}

	pub(crate) async fn quiesce(&self) {
		for lock in self.locks.all() {
			drop(lock.lock().await);
		}
	}

	pub(crate) fn clear(&self) {
		self.groups.write().clear();
	}
}

fn log_entry(actor: Option<&str>, group: &str, action: &str) -> StResult<LogEntry> {
	let mut builder = LogEntry::build().group(group).action(action);
	if let Some(actor) = actor {
		builder = builder.actor(actor);
	}
	builder.finish()
}


// vim: ts=4
