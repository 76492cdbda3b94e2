//! Adapter trait for the cross-process invalidation channel.
//!
//! Cooperating processes share one store; after a mutation is durably
//! persisted, the mutating process broadcasts a [`SyncMessage`] so siblings
//! reload the affected holder. The transport (pub/sub channel, shared table
//! polling, ...) is the adapter's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::action_log::LogEntry;
use crate::prelude::*;

/// What a remote process should reload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", content = "id", rename_all = "camelCase")]
pub enum UpdateKind {
	/// Full refresh of everything loaded.
	All,
	User(Uuid),
	Group(Box<str>),
	Track(Box<str>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SyncPayload {
	Update { update: UpdateKind },
	Log { entry: LogEntry },
}

/// One message on the invalidation channel.
///
/// `origin` identifies the sending process; receivers drop their own
/// messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
	pub id: Box<str>,
	pub origin: Box<str>,
	pub payload: SyncPayload,
}

impl SyncMessage {
	pub fn update(origin: impl Into<Box<str>>, update: UpdateKind) -> StResult<Self> {
		Ok(Self {
			id: crate::utils::random_id()?.into(),
			origin: origin.into(),
			payload: SyncPayload::Update { update },
		})
	}

	pub fn log(origin: impl Into<Box<str>>, entry: LogEntry) -> StResult<Self> {
		Ok(Self {
			id: crate::utils::random_id()?.into(),
			origin: origin.into(),
			payload: SyncPayload::Log { entry },
		})
	}
}

/// A Stratum messaging adapter
///
/// `broadcast` delivers a message to every cooperating process (the sender
/// included — receivers filter on `origin`). `subscribe` returns a receiver
/// for incoming messages; a lagged receiver may drop messages, which the
/// engine tolerates because the periodic fallback poll converges anyway.
#[async_trait]
pub trait MessagingAdapter: Debug + Send + Sync {
	async fn broadcast(&self, msg: &SyncMessage) -> StResult<()>;
	fn subscribe(&self) -> broadcast::Receiver<SyncMessage>;
}

/// In-process loopback messaging.
///
/// Default for single-node deployments and tests: messages reach every
/// subscriber of this instance, nothing leaves the process. Sharing one
/// instance between several engine instances models a multi-process cluster
/// in tests.
#[derive(Debug)]
pub struct LoopbackMessaging {
	tx: broadcast::Sender<SyncMessage>,
}

impl LoopbackMessaging {
	pub fn new(capacity: usize) -> Self {
		let (tx, _rx) = broadcast::channel(capacity);
		Self { tx }
	}
}

impl Default for LoopbackMessaging {
	fn default() -> Self {
		Self::new(128)
	}
}

#[async_trait]
impl MessagingAdapter for LoopbackMessaging {
	async fn broadcast(&self, msg: &SyncMessage) -> StResult<()> {
		// send only fails with no live receivers, which is not an error here
		let _ = self.tx.send(msg.clone());
		Ok(())
	}

	fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
		self.tx.subscribe()
	}
}


// vim: ts=4
