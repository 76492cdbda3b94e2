//! Query context: the (server, world) pair a permission check runs against.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// The context a permission check is evaluated against.
///
/// `None` components mean "not scoped": a query with `server: None` only
/// matches nodes that are themselves declared for any server.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
	pub server: Option<Box<str>>,
	pub world: Option<Box<str>>,
}

impl Context {
	/// The unscoped context.
	pub fn any() -> Self {
		Self::default()
	}

	pub fn server(server: impl Into<Box<str>>) -> Self {
		Self { server: Some(server.into()), world: None }
	}

	pub fn server_world(server: impl Into<Box<str>>, world: impl Into<Box<str>>) -> Self {
		Self { server: Some(server.into()), world: Some(world.into()) }
	}
}

impl std::fmt::Display for Context {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match (&self.server, &self.world) {
			(Some(s), Some(w)) => write!(f, "server={} world={}", s, w),
			(Some(s), None) => write!(f, "server={}", s),
			(None, Some(w)) => write!(f, "world={}", w),
			(None, None) => write!(f, "global"),
		}
	}
}


// vim: ts=4
