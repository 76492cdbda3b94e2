//! Permission nodes: one scoped grant/deny, optionally time-limited.
//!
//! A node is immutable once constructed. Scope identity is the
//! (permission, server, world) triple — see [`NodeKey`]; two nodes with the
//! same key but different value or expiry are conflicting duplicates and may
//! never coexist on one holder.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::context::Context;
use crate::prelude::*;

/// Prefix of the permission string representing a group membership.
pub const GROUP_NODE_PREFIX: &str = "group.";

/// A single scoped permission grant/deny.
///
/// The textual form (used for interop and export) is
/// `permission[.server=<server>][.world=<world>][.expiry=<epoch>]=<true|false>`
/// and round-trips exactly through `Display`/`FromStr`. The `=` character is
/// therefore reserved and rejected in permission strings.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
	pub permission: Box<str>,
	pub value: bool,
	pub server: Option<Box<str>>,
	pub world: Option<Box<str>>,
	pub expiry: Option<Timestamp>,
}

/// Scope identity of a node: everything except value and expiry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeKey {
	pub permission: Box<str>,
	pub server: Option<Box<str>>,
	pub world: Option<Box<str>>,
}

impl Node {
	/// Create an unscoped, non-expiring node.
	pub fn new(permission: impl Into<Box<str>>, value: bool) -> Self {
		Self { permission: permission.into(), value, server: None, world: None, expiry: None }
	}

	pub fn with_server(mut self, server: impl Into<Box<str>>) -> Self {
		self.server = Some(server.into());
		self
	}

	pub fn with_world(mut self, world: impl Into<Box<str>>) -> Self {
		self.world = Some(world.into());
		self
	}

	pub fn with_expiry(mut self, expiry: Timestamp) -> Self {
		self.expiry = Some(expiry);
		self
	}

	/// Create a group-membership node (`group.<name>`) scoped to `ctx`.
	pub fn group_membership(group: &str, ctx: &Context) -> Self {
		Self {
			permission: format!("{}{}", GROUP_NODE_PREFIX, group).into(),
			value: true,
			server: ctx.server.clone(),
			world: ctx.world.clone(),
			expiry: None,
		}
	}

	/// The group name if this is a positive membership node.
	pub fn membership_group(&self) -> Option<&str> {
		if self.value {
			self.permission.strip_prefix(GROUP_NODE_PREFIX).filter(|g| !g.is_empty())
		} else {
			None
		}
	}

	pub fn key(&self) -> NodeKey {
		NodeKey {
			permission: self.permission.clone(),
			server: self.server.clone(),
			world: self.world.clone(),
		}
	}

	/// True if `other` has the same (permission, server, world) scope.
	pub fn same_scope(&self, other: &Node) -> bool {
		self.permission == other.permission
			&& self.server == other.server
			&& self.world == other.world
	}

	/// Context matching: a node applies when each of its scope components is
	/// either unset ("any") or equal to the queried component.
	pub fn matches_context(&self, ctx: &Context) -> bool {
		let server_ok = self.server.is_none() || self.server == ctx.server;
		let world_ok = self.world.is_none() || self.world == ctx.world;
		server_ok && world_ok
	}

	pub fn is_expired(&self, now: Timestamp) -> bool {
		self.expiry.is_some_and(|at| at < now)
	}

	pub fn is_wildcard(&self) -> bool {
		self.wildcard_prefix().is_some()
	}

	/// The dotted prefix this wildcard covers: `"foo.*"` → `"foo."`,
	/// the bare `"*"` → `""` (covers everything). `None` for literals.
	pub fn wildcard_prefix(&self) -> Option<&str> {
		if self.permission.as_ref() == "*" {
			Some("")
		} else {
			self.permission.strip_suffix('*').filter(|p| p.ends_with('.'))
		}
	}
}

impl std::fmt::Display for Node {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.permission)?;
		if let Some(server) = &self.server {
			write!(f, ".server={}", server)?;
		}
		if let Some(world) = &self.world {
			write!(f, ".world={}", world)?;
		}
		if let Some(expiry) = &self.expiry {
			write!(f, ".expiry={}", expiry)?;
		}
		write!(f, "={}", self.value)
	}
}

impl std::str::FromStr for Node {
	type Err = Error;

	fn from_str(s: &str) -> StResult<Self> {
		let (mut head, value) = s.rsplit_once('=').ok_or(Error::Parse)?;
		let value = match value {
			"true" => true,
			"false" => false,
			_ => return Err(Error::Parse),
		};

		let mut expiry = None;
		if let Some(idx) = head.find(".expiry=") {
			let raw = &head[idx + ".expiry=".len()..];
			expiry = Some(Timestamp(raw.parse().map_err(|_| Error::Parse)?));
			head = &head[..idx];
		}
		let mut world = None;
		if let Some(idx) = head.find(".world=") {
			world = Some(head[idx + ".world=".len()..].into());
			head = &head[..idx];
		}
		let mut server = None;
		if let Some(idx) = head.find(".server=") {
			server = Some(head[idx + ".server=".len()..].into());
			head = &head[..idx];
		}
		if head.is_empty() {
			return Err(Error::Parse);
		}

		Ok(Node { permission: head.into(), value, server, world, expiry })
	}
}

impl std::fmt::Display for NodeKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.permission)?;
		if let Some(server) = &self.server {
			write!(f, " server={}", server)?;
		}
		if let Some(world) = &self.world {
			write!(f, " world={}", world)?;
		}
		Ok(())
	}
}


// vim: ts=4
