//! App state: the engine's wired-together components and the host-facing
//! surface.
//!
//! The host constructs one [`AppState`] per process from its adapters, calls
//! [`AppState::start`] to bring up the update coordinator, and talks to the
//! managers directly (`app.groups`, `app.users`, `app.tracks`) or through the
//! cross-component operations here. All state is explicitly owned by this
//! struct — there are no process-wide globals — and torn down with
//! [`AppState::shutdown`].

use std::sync::Arc;
use uuid::Uuid;

use stratum_types::context::Context;
use stratum_types::messaging_adapter::MessagingAdapter;
use stratum_types::node::Node;
use stratum_types::store_adapter::StoreAdapter;

use crate::group::GroupManager;
use crate::mutation::SaveHandle;
use crate::prelude::*;
use crate::resolver;
use crate::settings::Settings;
use crate::sync::UpdateCoordinator;
use crate::track::{PromotionOutcome, TrackManager};
use crate::user::{User, UserManager};
use crate::uuid_cache::UuidCache;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
	pub settings: Settings,
	pub store: Arc<dyn StoreAdapter>,

	pub groups: GroupManager,
	pub users: UserManager,
	pub tracks: TrackManager,
	pub uuid_cache: UuidCache,
	pub sync: UpdateCoordinator,
}

pub type App = Arc<AppState>;

impl AppState {
	/// Wire up the engine over the host's adapters.
	///
	/// Loads all groups and tracks into memory (the group graph must be
	/// complete for resolution) and creates the configured default group if
	/// the store does not know it yet.
	pub async fn build(
		store: Arc<dyn StoreAdapter>,
		messaging: Arc<dyn MessagingAdapter>,
		settings: Settings,
	) -> StResult<App> {
		let sync = UpdateCoordinator::new(messaging, &settings)?;
		let handle = sync.handle();

		let groups = GroupManager::new(store.clone(), handle.clone(), &settings);
		let users = UserManager::new(store.clone(), handle.clone(), &settings);
		let tracks = TrackManager::new(store.clone(), handle, &settings);
		let uuid_cache = UuidCache::new(store.clone(), &settings);

		let app =
			Arc::new(AppState { settings, store, groups, users, tracks, uuid_cache, sync });

		let default_group = app.settings.default_group.clone();
		match app.groups.load(&default_group).await {
			Ok(_) => {}
			Err(Error::NotFound) => {
				app.groups.create(&default_group, None).await?;
			}
			Err(err) => return Err(err),
		}
		app.groups.load_all().await?;
		app.tracks.load_all().await?;

		info!("Stratum {} ready (origin {})", VERSION, app.sync.origin());
		Ok(app)
	}

	/// Start the background loops of the update coordinator.
	pub fn start(app: &App) {
		app.sync.start(app.clone());
	}

	// Queries //
	//*********//

	/// Permission check for a loaded user: granted, denied, or no opinion.
	///
	/// Pure computation over the in-memory snapshot — never blocks on I/O.
	/// The user must be loaded ([`Error::NotFound`] otherwise); load-on-connect
	/// is the host's responsibility via [`AppState::connect`].
	pub fn has_permission(
		&self,
		uuid: Uuid,
		permission: &str,
		ctx: &Context,
	) -> StResult<Tristate> {
		let effective = self.effective_permissions(uuid, ctx)?;
		Ok(resolver::check(&effective, permission))
	}

	/// The full effective node set of a loaded user, highest precedence
	/// first.
	pub fn effective_permissions(&self, uuid: Uuid, ctx: &Context) -> StResult<Vec<Node>> {
		let user = self.users.get(uuid).ok_or(Error::NotFound)?;
		let groups = self.groups.snapshot();
		Ok(resolver::effective_nodes_for_user(
			&user,
			&groups,
			ctx,
			Timestamp::now(),
			&self.settings.default_group,
		))
	}

	/// Permission check against a loaded group.
	pub fn group_has_permission(
		&self,
		name: &str,
		permission: &str,
		ctx: &Context,
	) -> StResult<Tristate> {
		let group = self.groups.get(&name.to_lowercase()).ok_or(Error::NotFound)?;
		let groups = self.groups.snapshot();
		let effective =
			resolver::effective_nodes(group.as_ref(), &groups, ctx, Timestamp::now());
		Ok(resolver::check(&effective, permission))
	}

	// Principal lifecycle //
	//*********************//

	/// Handle a principal connecting: resolve their stable identity, load the
	/// user record, and refresh the cached username.
	pub async fn connect(&self, external_id: Uuid, username: &str) -> StResult<Arc<User>> {
		let internal = self.uuid_cache.internal_id(external_id).await?;
		let user = self.users.load(internal).await?;
		self.uuid_cache.cache_username(username, internal);

		if user.username() != Some(username) {
			// fire-and-forget; the rename is not worth blocking a login on
			let _ = self.users.update_username(internal, username).await?;
		}
		Ok(self.users.get(internal).unwrap_or(user))
	}

	/// Handle a principal disconnecting: evict their record unless a save is
	/// still outstanding.
	pub fn disconnect(&self, external_id: Uuid) {
		let Some(internal) = self.uuid_cache.cached_internal_id(external_id) else {
			return;
		};
		self.users.unload(internal);
	}

	// Tracks //
	//********//

	pub async fn promote(
		&self,
		uuid: Uuid,
		track: &str,
		ctx: &Context,
		actor: Option<&str>,
	) -> StResult<(PromotionOutcome, SaveHandle)> {
		self.tracks.promote(&self.users, uuid, track, ctx, actor).await
	}

	pub async fn demote(
		&self,
		uuid: Uuid,
		track: &str,
		ctx: &Context,
		actor: Option<&str>,
	) -> StResult<(PromotionOutcome, SaveHandle)> {
		self.tracks.demote(&self.users, uuid, track, ctx, actor).await
	}

	// Maintenance //
	//*************//

	/// Full refresh from the store: all groups, all tracks, every loaded
	/// user. Remote processes' writes become visible here at the latest.
	pub async fn refresh_all(&self) -> StResult<()> {
		self.groups.load_all().await?;
		self.tracks.load_all().await?;
		self.users.reload_all().await
	}

	/// Flush-then-clear teardown: wait for in-flight saves, push the
	/// remaining notifications, then drop all cached state.
	pub async fn shutdown(&self) {
		self.users.quiesce().await;
		self.groups.quiesce().await;
		self.tracks.quiesce().await;
		self.sync.shutdown().await;

		self.users.clear();
		self.groups.clear();
		self.tracks.clear();
		self.uuid_cache.clear();
		info!("Stratum engine stopped");
	}
}

// vim: ts=4
