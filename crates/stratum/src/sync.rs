//! Update coordination: keeping in-memory state coherent across cooperating
//! processes sharing one store.
//!
//! Locally persisted mutations queue a [`SyncMessage`] which the outbound
//! loop broadcasts through the messaging adapter. The inbound loop applies
//! remote messages by reloading the affected holder from the store — always a
//! wholesale replacement, never a partial merge, so memory can not diverge
//! from the source of truth. A periodic fallback poll performs a full refresh
//! in case the push channel is unavailable, trading latency for eventual
//! consistency.

use std::sync::Arc;
use std::time::Duration;

use stratum_types::action_log::LogEntry;
use stratum_types::messaging_adapter::{
	MessagingAdapter, SyncMessage, SyncPayload, UpdateKind,
};
use stratum_types::utils::random_id;

use crate::app::App;
use crate::mutation::{with_retry, RetryPolicy};
use crate::prelude::*;

/// Cheap cloneable handle managers use to queue outbound notifications.
///
/// Queueing is synchronous and non-blocking; the outbound loop picks the
/// message up and pays the messaging latency off the mutation path.
#[derive(Clone, Debug)]
pub struct SyncHandle {
	origin: Arc<str>,
	tx: flume::Sender<SyncMessage>,
}

impl SyncHandle {
	pub fn origin(&self) -> &str {
		&self.origin
	}

	pub fn queue_update(&self, update: UpdateKind) {
		match SyncMessage::update(self.origin.as_ref(), update) {
			Ok(msg) => {
				let _ = self.tx.send(msg);
			}
			Err(err) => warn!("Failed to build sync message: {}", err),
		}
	}

	pub fn queue_log(&self, entry: LogEntry) {
		info!("Action: {}", entry);
		match SyncMessage::log(self.origin.as_ref(), entry) {
			Ok(msg) => {
				let _ = self.tx.send(msg);
			}
			Err(err) => warn!("Failed to build log message: {}", err),
		}
	}
}

/// Propagates "data changed" notifications between processes and triggers
/// local cache refresh.
#[derive(Debug)]
pub struct UpdateCoordinator {
	origin: Arc<str>,
	messaging: Arc<dyn MessagingAdapter>,
	tx_out: flume::Sender<SyncMessage>,
	rx_out: flume::Receiver<SyncMessage>,
	poll_interval: Duration,
	timeout: Duration,
	retry: RetryPolicy,
	shutdown: tokio::sync::watch::Sender<bool>,
	tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl UpdateCoordinator {
	pub(crate) fn new(
		messaging: Arc<dyn MessagingAdapter>,
		settings: &crate::settings::Settings,
	) -> StResult<Self> {
		let (tx_out, rx_out) = flume::unbounded();
		let (shutdown, _) = tokio::sync::watch::channel(false);
		Ok(Self {
			origin: random_id()?.into(),
			messaging,
			tx_out,
			rx_out,
			poll_interval: settings.sync_interval(),
			timeout: settings.store_timeout(),
			retry: settings.retry_policy(),
			shutdown,
			tasks: parking_lot::Mutex::new(Vec::new()),
		})
	}

	/// This process's identity on the message channel.
	pub fn origin(&self) -> &str {
		&self.origin
	}

	pub(crate) fn handle(&self) -> SyncHandle {
		SyncHandle { origin: self.origin.clone(), tx: self.tx_out.clone() }
	}

	/// Start the outbound, inbound, and fallback poll loops.
	pub(crate) fn start(&self, app: App) {
		let mut tasks = self.tasks.lock();

		// Outbound: queued notifications → messaging adapter
		{
			let rx_out = self.rx_out.clone();
			let messaging = self.messaging.clone();
			let timeout = self.timeout;
			let retry = self.retry.clone();
			let mut shutdown = self.shutdown.subscribe();
			tasks.push(tokio::spawn(async move {
				loop {
					tokio::select! {
						_ = shutdown.changed() => break,
						msg = rx_out.recv_async() => {
							let Ok(msg) = msg else { break };
							broadcast_one(&*messaging, &msg, timeout, &retry).await;
						}
					}
				}
			}));
		}

		// Inbound: remote messages → targeted reload
		{
			let mut rx = self.messaging.subscribe();
			let origin = self.origin.clone();
			let app = app.clone();
			let mut shutdown = self.shutdown.subscribe();
			tasks.push(tokio::spawn(async move {
				loop {
					tokio::select! {
						_ = shutdown.changed() => break,
						msg = rx.recv() => match msg {
							Ok(msg) => {
								if msg.origin.as_ref() == origin.as_ref() {
									continue;
								}
								apply(&app, msg).await;
							}
							Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
								warn!("Sync receiver lagged, missed {} messages; full refresh", n);
								if let Err(err) = app.refresh_all().await {
									warn!("Refresh after lag failed: {}", err);
								}
							}
							Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
						}
					}
				}
			}));
		}

		// Fallback poll: full refresh on an interval in case pushes get lost
		{
			let app = app.clone();
			let poll_interval = self.poll_interval;
			let mut shutdown = self.shutdown.subscribe();
			tasks.push(tokio::spawn(async move {
				let mut interval = tokio::time::interval(poll_interval);
				interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
				// the first tick fires immediately; we already start fresh
				interval.tick().await;
				loop {
					tokio::select! {
						_ = shutdown.changed() => break,
						_ = interval.tick() => {
							debug!("Fallback poll: refreshing from store");
							if let Err(err) = app.refresh_all().await {
								warn!("Fallback refresh failed: {}", err);
							}
						}
					}
				}
			}));
		}
	}

	/// Flush-then-stop: drain queued notifications, then end the loops.
	pub async fn shutdown(&self) {
		let _ = self.shutdown.send(true);
		let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
		for task in tasks {
			let _ = task.await;
		}
		// best-effort flush of whatever the outbound loop did not get to
		while let Ok(msg) = self.rx_out.try_recv() {
			broadcast_one(&*self.messaging, &msg, self.timeout, &self.retry).await;
		}
	}
}

async fn broadcast_one(
	messaging: &dyn MessagingAdapter,
	msg: &SyncMessage,
	timeout: Duration,
	retry: &RetryPolicy,
) {
	let op = || async { messaging.broadcast(msg).await };
	if let Err(err) = with_retry(&op, timeout, retry).await {
		// dropped pushes are recovered by the fallback poll on the other side
		warn!("Failed to broadcast sync message {}: {}", msg.id, err);
	}
}

/// Apply one remote message: reload the affected holder wholesale.
async fn apply(app: &App, msg: SyncMessage) {
	match msg.payload {
		SyncPayload::Update { update } => {
			debug!("Remote update from {}: {:?}", msg.origin, update);
			let res = match update {
				UpdateKind::All => app.refresh_all().await,
				UpdateKind::User(uuid) => app.users.reload(uuid).await,
				UpdateKind::Group(name) => app.groups.reload(&name).await,
				UpdateKind::Track(name) => app.tracks.reload(&name).await,
			};
			if let Err(err) = res {
				warn!("Failed to apply remote update: {}", err);
			}
		}
		SyncPayload::Log { entry } => {
			info!("Remote action: {}", entry);
		}
	}
}


// vim: ts=4
