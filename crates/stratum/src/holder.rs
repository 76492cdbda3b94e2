//! Permission holders: anything that directly owns nodes.
//!
//! Users and groups both carry a [`NodeSet`] and expose the shared
//! [`PermissionHolder`] capability; storage and resolution code is written
//! once against it. Holders are immutable snapshots — a mutation builds a new
//! holder and replaces the registry entry wholesale, so resolution never
//! observes a half-applied change.

use stratum_types::context::Context;
use stratum_types::node::{Node, NodeKey};

use crate::prelude::*;

/// The node collection of one holder.
///
/// Invariant: no two nodes share a (permission, server, world) scope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeSet {
	nodes: Vec<Node>,
}

impl NodeSet {
	/// Build from stored nodes, dropping structural duplicates (first wins).
	/// Stores written by this engine never contain any, but data is not
	/// trusted blindly.
	pub fn from_nodes(nodes: Vec<Node>) -> Self {
		let mut set = NodeSet::default();
		for node in nodes {
			if !set.contains_scope(&node.key()) {
				set.nodes.push(node);
			}
		}
		set
	}

	/// Add a node. Fails with [`Error::AlreadyHas`] when a node with the same
	/// scope already exists, whatever its value or expiry.
	pub fn set_node(&mut self, node: Node) -> StResult<()> {
		if self.contains_scope(&node.key()) {
			return Err(Error::AlreadyHas);
		}
		self.nodes.push(node);
		Ok(())
	}

	/// Add a node, replacing any existing node of the same scope.
	pub fn set_node_forced(&mut self, node: Node) {
		self.nodes.retain(|n| !n.same_scope(&node));
		self.nodes.push(node);
	}

	/// Remove the node with the given scope.
	pub fn unset_node(&mut self, key: &NodeKey) -> StResult<()> {
		let before = self.nodes.len();
		self.nodes.retain(|n| n.key() != *key);
		if self.nodes.len() == before {
			return Err(Error::DoesNotHave);
		}
		Ok(())
	}

	pub fn contains_scope(&self, key: &NodeKey) -> bool {
		self.nodes.iter().any(|n| n.key() == *key)
	}

	/// All nodes in insertion order, expired ones included.
	pub fn iter(&self) -> impl Iterator<Item = &Node> {
		self.nodes.iter()
	}

	/// Nodes applying to `ctx`, with expired nodes filtered out.
	pub fn iter_context<'a>(
		&'a self,
		ctx: &'a Context,
		now: Timestamp,
	) -> impl Iterator<Item = &'a Node> + 'a {
		self.nodes.iter().filter(move |n| n.matches_context(ctx) && !n.is_expired(now))
	}

	/// Owned snapshot of the context-matching, non-expired nodes.
	pub fn own_nodes(&self, ctx: &Context, now: Timestamp) -> Vec<Node> {
		self.iter_context(ctx, now).cloned().collect()
	}

	pub fn has_expired(&self, now: Timestamp) -> bool {
		self.nodes.iter().any(|n| n.is_expired(now))
	}

	/// Nodes without the expired ones — what gets persisted (lazy removal on
	/// save).
	pub fn persistable_nodes(&self, now: Timestamp) -> Vec<Node> {
		self.nodes.iter().filter(|n| !n.is_expired(now)).cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}
}

/// Shared capability of users and groups.
pub trait PermissionHolder {
	/// Stable identifier for logs and error reporting (uuid string or name).
	fn identifier(&self) -> &str;

	fn nodes(&self) -> &NodeSet;

	/// Names of the groups this holder inherits from in `ctx`, highest
	/// precedence first. Expired membership nodes contribute nothing.
	fn inherited_groups(&self, ctx: &Context, now: Timestamp) -> Vec<Box<str>>;
}


// vim: ts=4
