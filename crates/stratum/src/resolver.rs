//! Inheritance resolution: from a holder and a context to the effective,
//! deduplicated, priority-ordered node set.
//!
//! Resolution is pure computation over in-memory snapshots: no locks held, no
//! I/O, no suspension points. The walk is depth-first: a holder's own nodes
//! first, then each inherited group contributing its own nodes followed by
//! its ancestors, higher weight before lower within one group's edges.
//! Structural duplicates resolve to the first node encountered, so the
//! closest holder wins. A visited set breaks cycles silently — cycles are
//! rejected at edge-creation time, this is only the defensive fallback.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use stratum_types::context::Context;
use stratum_types::node::{Node, NodeKey};

use crate::group::Group;
use crate::holder::{NodeSet, PermissionHolder};
use crate::prelude::*;
use crate::user::User;

/// Snapshot of the loaded group registry the resolver walks against.
pub type GroupMap = HashMap<Box<str>, Arc<Group>>;

/// Effective node set for any holder in `ctx`, highest precedence first.
pub fn effective_nodes(
	holder: &dyn PermissionHolder,
	groups: &GroupMap,
	ctx: &Context,
	now: Timestamp,
) -> Vec<Node> {
	resolve(holder.nodes(), &holder.inherited_groups(ctx, now), groups, ctx, now)
}

/// Effective node set for a user, falling back to the configured default
/// group when the user holds no membership in `ctx` (a user always resolves
/// at least one group).
pub fn effective_nodes_for_user(
	user: &User,
	groups: &GroupMap,
	ctx: &Context,
	now: Timestamp,
	default_group: &str,
) -> Vec<Node> {
	let mut refs = user.inherited_groups(ctx, now);
	if refs.is_empty() {
		refs.push(default_group.into());
	}
	resolve(user.nodes(), &refs, groups, ctx, now)
}

fn resolve(
	own: &NodeSet,
	group_refs: &[Box<str>],
	groups: &GroupMap,
	ctx: &Context,
	now: Timestamp,
) -> Vec<Node> {
	let mut out = Vec::new();
	let mut seen: HashSet<NodeKey> = HashSet::new();
	let mut visited: HashSet<Box<str>> = HashSet::new();

	// own nodes take the highest precedence tier
	for node in own.iter_context(ctx, now) {
		push_unique(&mut out, &mut seen, node);
	}
	for name in group_refs {
		descend(name, groups, ctx, now, &mut out, &mut seen, &mut visited);
	}
	out
}

fn descend(
	name: &str,
	groups: &GroupMap,
	ctx: &Context,
	now: Timestamp,
	out: &mut Vec<Node>,
	seen: &mut HashSet<NodeKey>,
	visited: &mut HashSet<Box<str>>,
) {
	if !visited.insert(name.into()) {
		return;
	}
	let Some(group) = groups.get(name) else {
		// referenced but not loaded (deleted remotely, or a stale edge)
		debug!("Skipping unresolvable group '{}' during resolution", name);
		return;
	};

	for node in group.nodes().iter_context(ctx, now) {
		push_unique(out, seen, node);
	}
	for parent in group.inherited_groups(ctx, now) {
		descend(&parent, groups, ctx, now, out, seen, visited);
	}
}

fn push_unique(out: &mut Vec<Node>, seen: &mut HashSet<NodeKey>, node: &Node) {
	if seen.insert(node.key()) {
		out.push(node.clone());
	}
}

/// Boolean check over an effective node set.
///
/// An exact match on the permission string outranks any wildcard regardless
/// of its position in the set; among wildcards the longest matching prefix
/// wins, ties going to the earlier (higher-precedence) node. No match at all
/// is `Undefined` — "no opinion".
pub fn check(effective: &[Node], permission: &str) -> Tristate {
	let mut best_wildcard: Option<(usize, bool)> = None;

	for node in effective {
		if node.permission.as_ref() == permission {
			return node.value.into();
		}
		if let Some(prefix) = node.wildcard_prefix() {
			if permission.starts_with(prefix)
				&& best_wildcard.is_none_or(|(len, _)| prefix.len() > len)
			{
				best_wildcard = Some((prefix.len(), node.value));
			}
		}
	}

	best_wildcard.map(|(_, value)| value).into()
}


// vim: ts=4
