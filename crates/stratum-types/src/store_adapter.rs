//! Adapter trait for the durable store backing users, groups, and tracks.
//!
//! The engine never talks to a concrete database; it consumes this trait
//! only. One row/document per holder keyed by its primary key (user uuid,
//! group/track name), storing the serialized node list or ordered group-name
//! list. Backends signal unavailability with [`Error::Loading`]; the engine
//! handles retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Debug;
use uuid::Uuid;

use crate::node::Node;
use crate::prelude::*;

/// Stored form of a user.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
	pub uuid: Uuid,
	/// Last known display name, updated on login/rename.
	pub username: Option<Box<str>>,
	pub primary_group: Box<str>,
	pub nodes: Vec<Node>,
}

/// Stored form of a group.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupData {
	pub name: Box<str>,
	pub nodes: Vec<Node>,
	/// Inherit edges in declaration order.
	pub inherits: Vec<InheritEdge>,
}

/// One "inherit from" reference of a group, itself context-scoped.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritEdge {
	pub group: Box<str>,
	pub server: Option<Box<str>>,
	pub world: Option<Box<str>>,
	/// Higher weight is considered first within the inherited tier.
	#[serde(default)]
	pub weight: i32,
}

/// Stored form of a track.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackData {
	pub name: Box<str>,
	pub groups: Vec<Box<str>>,
}

/// One uuid-cache mapping: external-facing identity ↔ internal stable
/// identity. Never deleted while the user record exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UuidEntry {
	pub external_id: Uuid,
	pub internal_id: Uuid,
}

/// A Stratum store adapter
///
/// Every backend implementation is required to implement this trait. An
/// adapter is responsible for durably storing all permission data. Per-entity
/// operations must be atomic: a concurrently failing save may never leave a
/// half-written holder behind.
#[async_trait]
pub trait StoreAdapter: Debug + Send + Sync {
	/// Reads a user, `None` if the store has no record for the uuid.
	async fn load_user(&self, uuid: Uuid) -> StResult<Option<UserData>>;

	/// Persists a user, replacing any existing record.
	async fn save_user(&self, user: &UserData) -> StResult<()>;

	/// Reads a group, `None` if unknown.
	async fn load_group(&self, name: &str) -> StResult<Option<GroupData>>;

	/// Reads a group, creating an empty record first if unknown.
	async fn create_and_load_group(&self, name: &str) -> StResult<GroupData>;

	async fn save_group(&self, group: &GroupData) -> StResult<()>;
	async fn delete_group(&self, name: &str) -> StResult<()>;

	/// Lists the names of all stored groups.
	async fn list_groups(&self) -> StResult<Vec<Box<str>>>;

	/// Reads a track, `None` if unknown.
	async fn load_track(&self, name: &str) -> StResult<Option<TrackData>>;

	/// Reads a track, creating an empty record first if unknown.
	async fn create_and_load_track(&self, name: &str) -> StResult<TrackData>;

	async fn save_track(&self, track: &TrackData) -> StResult<()>;
	async fn delete_track(&self, name: &str) -> StResult<()>;

	/// Lists the names of all stored tracks.
	async fn list_tracks(&self) -> StResult<Vec<Box<str>>>;

	// Uuid cache
	async fn load_uuid_entry(&self, external_id: Uuid) -> StResult<Option<UuidEntry>>;
	async fn save_uuid_entry(&self, entry: &UuidEntry) -> StResult<()>;
}


// vim: ts=4
