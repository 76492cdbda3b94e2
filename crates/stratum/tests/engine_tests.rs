//! End-to-end engine tests over the in-memory store: mutation semantics,
//! inheritance resolution, track movement, and persistence behavior.

mod common;

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use common::{build_single_app, eventually, setup_test_logging, MemoryStore};
use stratum::holder::PermissionHolder;
use stratum::track::PromotionOutcome;
use stratum_types::context::Context;
use stratum_types::error::Error;
use stratum_types::node::Node;
use stratum_types::types::Tristate;

#[tokio::test]
async fn test_default_group_created_on_build() {
	let store = MemoryStore::new();
	let app = build_single_app(store.clone()).await;

	assert!(store.stored_group("default").is_some());
	assert!(app.groups.get("default").is_some());
	app.shutdown().await;
}

#[tokio::test]
async fn test_group_node_mutation_persists() {
	let store = MemoryStore::new();
	let app = build_single_app(store.clone()).await;

	let handle = app
		.groups
		.set_node("default", Node::new("essentials.spawn", true), Some("tests"))
		.await
		.unwrap();
	handle.wait().await.unwrap();

	let stored = store.stored_group("default").unwrap();
	assert_eq!(stored.nodes.len(), 1);
	assert_eq!(stored.nodes[0].permission.as_ref(), "essentials.spawn");
	app.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_scope_add_fails_fast() {
	let store = MemoryStore::new();
	let app = build_single_app(store.clone()).await;

	app.groups
		.set_node("default", Node::new("fly.use", true), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();

	// same scope with the opposite value is a conflicting duplicate
	let res = app.groups.set_node("default", Node::new("fly.use", false), None).await;
	assert!(matches!(res, Err(Error::AlreadyHas)));

	// the holder is unchanged, in memory and in the store
	let group = app.groups.get("default").unwrap();
	assert_eq!(group.nodes().len(), 1);
	assert_eq!(store.stored_group("default").unwrap().nodes.len(), 1);
	app.shutdown().await;
}

#[tokio::test]
async fn test_example_inheritance_scenario() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	app.groups
		.set_node("default", Node::new("essentials.spawn", true), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();
	app.groups.create("admin", None).await.unwrap();
	app.groups
		.set_node("admin", Node::new("server.stop", true), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();
	app.groups
		.set_inherit("admin", "default", &Context::any(), 0, None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();

	let uuid = Uuid::new_v4();
	let user = app.connect(uuid, "alice").await.unwrap();
	assert_eq!(user.uuid(), uuid);
	app.users
		.add_group(uuid, "admin", &Context::any(), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();

	let ctx = Context::server("survival");
	assert_eq!(app.has_permission(uuid, "server.stop", &ctx).unwrap(), Tristate::True);
	assert_eq!(app.has_permission(uuid, "essentials.spawn", &ctx).unwrap(), Tristate::True);
	assert_eq!(app.has_permission(uuid, "server.reload", &ctx).unwrap(), Tristate::Undefined);

	let effective = app.effective_permissions(uuid, &ctx).unwrap();
	let perms: Vec<&str> = effective.iter().map(|n| n.permission.as_ref()).collect();
	assert_eq!(perms, vec!["group.admin", "server.stop", "essentials.spawn"]);
	app.shutdown().await;
}

#[tokio::test]
async fn test_wildcard_precedence_through_app() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	app.groups
		.set_node("default", Node::new("foo.*", true), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();
	app.groups
		.set_node("default", Node::new("foo.bar", false), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();

	let uuid = Uuid::new_v4();
	app.connect(uuid, "carol").await.unwrap();

	// membership-less user falls back to the default group
	let ctx = Context::any();
	assert_eq!(app.has_permission(uuid, "foo.bar", &ctx).unwrap(), Tristate::False);
	assert_eq!(app.has_permission(uuid, "foo.baz", &ctx).unwrap(), Tristate::True);
	app.shutdown().await;
}

#[tokio::test]
async fn test_cycle_rejected_at_edge_creation() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	app.groups.create("a", None).await.unwrap();
	app.groups.create("b", None).await.unwrap();
	app.groups.create("c", None).await.unwrap();

	app.groups
		.set_inherit("a", "b", &Context::any(), 0, None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();
	app.groups
		.set_inherit("b", "c", &Context::any(), 0, None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();

	// c -> a would close the loop a -> b -> c -> a
	let res = app.groups.set_inherit("c", "a", &Context::any(), 0, None).await;
	assert!(matches!(res, Err(Error::InvalidEntry(_))));
	// direct self-inheritance is rejected too
	let res = app.groups.set_inherit("a", "a", &Context::any(), 0, None).await;
	assert!(matches!(res, Err(Error::InvalidEntry(_))));
	// the failed calls committed nothing
	assert!(app.groups.get("c").unwrap().inherit_edges().is_empty());

	// duplicate edges are their own error
	let res = app.groups.set_inherit("a", "b", &Context::any(), 0, None).await;
	assert!(matches!(res, Err(Error::AlreadyInherits)));
	app.shutdown().await;
}

#[tokio::test]
async fn test_track_promotion_walk() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	app.groups.create("mod", None).await.unwrap();
	app.groups.create("admin", None).await.unwrap();
	app.tracks.create("staff", None).await.unwrap();
	for group in ["default", "mod", "admin"] {
		app.tracks.append_group("staff", group, None).await.unwrap().wait().await.unwrap();
	}

	let uuid = Uuid::new_v4();
	app.connect(uuid, "dave").await.unwrap();
	let ctx = Context::any();

	// no membership: placed at the first group
	let (outcome, handle) = app.promote(uuid, "staff", &ctx, Some("tests")).await.unwrap();
	handle.wait().await.unwrap();
	assert_eq!(outcome, PromotionOutcome::Started { group: "default".into() });

	let (outcome, handle) = app.promote(uuid, "staff", &ctx, Some("tests")).await.unwrap();
	handle.wait().await.unwrap();
	assert_eq!(
		outcome,
		PromotionOutcome::Moved { from: "default".into(), to: "mod".into() }
	);

	let (outcome, handle) = app.promote(uuid, "staff", &ctx, Some("tests")).await.unwrap();
	handle.wait().await.unwrap();
	assert_eq!(outcome, PromotionOutcome::Moved { from: "mod".into(), to: "admin".into() });

	// past the end: error, membership unchanged
	let res = app.promote(uuid, "staff", &ctx, Some("tests")).await;
	assert!(matches!(res, Err(Error::EndOfTrack)));
	let user = app.users.get(uuid).unwrap();
	let groups = user.membership_groups(&ctx, stratum_types::types::Timestamp::now());
	assert_eq!(groups.len(), 1);
	assert_eq!(groups[0].as_ref(), "admin");

	// walk back down
	let (outcome, handle) = app.demote(uuid, "staff", &ctx, Some("tests")).await.unwrap();
	handle.wait().await.unwrap();
	assert_eq!(outcome, PromotionOutcome::Moved { from: "admin".into(), to: "mod".into() });

	let (_, handle) = app.demote(uuid, "staff", &ctx, Some("tests")).await.unwrap();
	handle.wait().await.unwrap();

	// at the first group: error
	let res = app.demote(uuid, "staff", &ctx, Some("tests")).await;
	assert!(matches!(res, Err(Error::EndOfTrack)));
	app.shutdown().await;
}

#[tokio::test]
async fn test_demote_requires_membership() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	app.tracks.create("staff", None).await.unwrap();
	app.tracks.append_group("staff", "default", None).await.unwrap().wait().await.unwrap();

	let uuid = Uuid::new_v4();
	app.connect(uuid, "erin").await.unwrap();

	let res = app.demote(uuid, "staff", &Context::any(), None).await;
	assert!(matches!(res, Err(Error::EndOfTrack)));
	app.shutdown().await;
}

#[tokio::test]
async fn test_track_append_rejects_duplicates() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	app.tracks.create("staff", None).await.unwrap();
	app.tracks.append_group("staff", "default", None).await.unwrap().wait().await.unwrap();

	let res = app.tracks.append_group("staff", "default", None).await;
	assert!(matches!(res, Err(Error::AlreadyContains)));
	app.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_set_node_single_winner() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	let uuid = Uuid::new_v4();
	app.connect(uuid, "frank").await.unwrap();

	let mut joins = Vec::new();
	for _ in 0..8 {
		let app = app.clone();
		joins.push(tokio::spawn(async move {
			match app.users.set_node(uuid, Node::new("contested.node", true), None).await {
				Ok(handle) => handle.wait().await.is_ok(),
				Err(_) => false,
			}
		}));
	}

	let mut successes = 0;
	for join in joins {
		if join.await.unwrap() {
			successes += 1;
		}
	}
	assert_eq!(successes, 1);

	// exactly one node with that scope survived
	let user = app.users.get(uuid).unwrap();
	let count = user
		.nodes()
		.iter()
		.filter(|n| n.permission.as_ref() == "contested.node")
		.count();
	assert_eq!(count, 1);
	app.shutdown().await;
}

#[tokio::test]
async fn test_failed_save_rolls_back() {
	setup_test_logging();
	let store = MemoryStore::new();
	let app = build_single_app(store.clone()).await;

	app.groups
		.set_node("default", Node::new("stable.node", true), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();

	store.fail_writes(true);
	let handle =
		app.groups.set_node("default", Node::new("doomed.node", true), None).await.unwrap();
	assert!(matches!(handle.wait().await, Err(Error::Loading(_))));

	// optimistic update was rolled back to the durable snapshot
	let group = app.groups.get("default").unwrap();
	assert_eq!(group.nodes().len(), 1);
	assert!(group.nodes().iter().all(|n| n.permission.as_ref() == "stable.node"));

	// and the store never saw the doomed node
	store.fail_writes(false);
	assert_eq!(store.stored_group("default").unwrap().nodes.len(), 1);
	app.shutdown().await;
}

#[tokio::test]
async fn test_unload_refused_while_save_pending() {
	let store = MemoryStore::new();
	let app = build_single_app(store.clone()).await;

	let uuid = Uuid::new_v4();
	app.connect(uuid, "grace").await.unwrap();

	store.set_write_delay(Duration::from_millis(150));
	let handle = app.users.set_node(uuid, Node::new("slow.save", true), None).await.unwrap();

	assert!(!app.users.unload(uuid));

	handle.wait().await.unwrap();
	store.set_write_delay(Duration::ZERO);
	assert!(
		eventually(Duration::from_secs(1), || app.users.unload(uuid)).await,
		"user still pinned after save settled"
	);
	assert!(app.users.get(uuid).is_none());
	app.shutdown().await;
}

#[tokio::test]
async fn test_expired_nodes_stripped_on_save() {
	let store = MemoryStore::new();
	let app = build_single_app(store.clone()).await;

	let uuid = Uuid::new_v4();
	app.connect(uuid, "heidi").await.unwrap();

	let soon = stratum_types::types::Timestamp::from_now(1);
	app.users
		.set_node(uuid, Node::new("brief.perk", true).with_expiry(soon), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();

	tokio::time::sleep(Duration::from_millis(2100)).await;

	// expired: invisible to resolution
	assert_eq!(
		app.has_permission(uuid, "brief.perk", &Context::any()).unwrap(),
		Tristate::Undefined
	);

	// the next save lazily drops it from the stored record
	app.users
		.set_node(uuid, Node::new("other.perk", true), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();
	let stored = store.stored_user(uuid).unwrap();
	assert!(stored.nodes.iter().all(|n| n.permission.as_ref() != "brief.perk"));
	app.shutdown().await;
}

#[tokio::test]
async fn test_forced_overwrite_and_unset() {
	let store = MemoryStore::new();
	let app = build_single_app(store.clone()).await;

	app.groups
		.set_node("default", Node::new("fly.use", true), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();

	// explicit overwrite flips the value where a plain set would reject
	app.groups
		.set_node_forced("default", Node::new("fly.use", false), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();
	let group = app.groups.get("default").unwrap();
	assert_eq!(group.nodes().len(), 1);
	assert_eq!(group.nodes().iter().next().map(|n| n.value), Some(false));

	app.groups
		.unset_node("default", &Node::new("fly.use", true).key(), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();
	assert!(app.groups.get("default").unwrap().nodes().is_empty());

	// unsetting again is an error, not a no-op
	let res = app.groups.unset_node("default", &Node::new("fly.use", true).key(), None).await;
	assert!(matches!(res, Err(Error::DoesNotHave)));
	app.shutdown().await;
}

#[tokio::test]
async fn test_group_membership_and_primary() {
	let store = MemoryStore::new();
	let app = build_single_app(store.clone()).await;

	app.groups.create("vip", None).await.unwrap();
	app.groups
		.set_node("vip", Node::new("tag.prefix", true), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();
	app.groups
		.set_node("default", Node::new("tag.prefix", false), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();

	let uuid = Uuid::new_v4();
	app.connect(uuid, "judy").await.unwrap();
	let ctx = Context::any();

	app.users.add_group(uuid, "default", &ctx, None).await.unwrap().wait().await.unwrap();
	app.users.add_group(uuid, "vip", &ctx, None).await.unwrap().wait().await.unwrap();

	// primary is "default": its deny wins within the inherited tier
	assert_eq!(app.has_permission(uuid, "tag.prefix", &ctx).unwrap(), Tristate::False);

	// promoting vip to primary flips the order, and with it the verdict
	app.users.set_primary_group(uuid, "vip", None).await.unwrap().wait().await.unwrap();
	assert_eq!(app.has_permission(uuid, "tag.prefix", &ctx).unwrap(), Tristate::True);

	// primary must be an actual membership
	let res = app.users.set_primary_group(uuid, "mod", None).await;
	assert!(matches!(res, Err(Error::DoesNotHave)));

	// membership removal by exact scope
	app.users.remove_group(uuid, "vip", &ctx, None).await.unwrap().wait().await.unwrap();
	assert_eq!(app.has_permission(uuid, "tag.prefix", &ctx).unwrap(), Tristate::False);
	let res = app.users.remove_group(uuid, "vip", &ctx, None).await;
	assert!(matches!(res, Err(Error::DoesNotHave)));
	app.shutdown().await;
}

#[tokio::test]
async fn test_default_group_protected_from_deletion() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	let res = app.groups.delete("default", None).await;
	assert!(matches!(res, Err(Error::InvalidEntry(_))));
	app.shutdown().await;
}

#[tokio::test]
async fn test_invalid_names_rejected() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	assert!(matches!(app.groups.create("Bad Name", None).await, Err(Error::InvalidEntry(_))));
	assert!(matches!(app.groups.create("dotted.name", None).await, Err(Error::InvalidEntry(_))));
	assert!(matches!(app.tracks.create("", None).await, Err(Error::InvalidEntry(_))));

	let res = app.groups.set_node("default", Node::new("bad perm", true), None).await;
	assert!(matches!(res, Err(Error::InvalidEntry(_))));
	app.shutdown().await;
}

#[tokio::test]
async fn test_node_text_round_trip_through_store() {
	// the textual interop form survives serialize → parse for scoped,
	// expiring, wildcard nodes
	let node = Node::new("rank.*", false)
		.with_server("survival")
		.with_world("nether")
		.with_expiry(stratum_types::types::Timestamp::from_now(3600));
	let text = node.to_string();
	let parsed: Node = text.parse().unwrap();
	assert_eq!(parsed, node);
}

#[tokio::test]
async fn test_connect_caches_identity_and_username() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	let external = Uuid::new_v4();
	app.connect(external, "Ivan").await.unwrap();

	let internal = app.uuid_cache.cached_internal_id(external).unwrap();
	assert_eq!(app.uuid_cache.lookup_username("ivan"), Some(internal));

	assert!(
		eventually(Duration::from_secs(1), || {
			app.users.get(internal).is_some_and(|u| u.username() == Some("Ivan"))
		})
		.await,
		"username never recorded on the user"
	);

	// eviction may be briefly refused while the rename save is in flight
	assert!(
		eventually(Duration::from_secs(1), || {
			app.disconnect(external);
			app.users.get(internal).is_none()
		})
		.await,
		"user never evicted after disconnect"
	);
	app.shutdown().await;
}

#[tokio::test]
async fn test_group_has_permission_walks_graph() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	app.groups
		.set_node("default", Node::new("essentials.spawn", true), None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();
	app.groups.create("admin", None).await.unwrap();
	app.groups
		.set_inherit("admin", "default", &Context::any(), 0, None)
		.await
		.unwrap()
		.wait()
		.await
		.unwrap();

	assert_eq!(
		app.group_has_permission("admin", "essentials.spawn", &Context::any()).unwrap(),
		Tristate::True
	);
	assert!(matches!(
		app.group_has_permission("missing", "essentials.spawn", &Context::any()),
		Err(Error::NotFound)
	));
	app.shutdown().await;
}

#[tokio::test]
async fn test_unloaded_user_is_not_found() {
	let store = MemoryStore::new();
	let app = build_single_app(store).await;

	let res = app.has_permission(Uuid::new_v4(), "any.perm", &Context::any());
	assert!(matches!(res, Err(Error::NotFound)));
	app.shutdown().await;
}

// vim: ts=4
