//! Optimistic mutation plumbing: per-holder serialization, save handles,
//! and retry-with-backoff persistence.
//!
//! A mutation applies to the in-memory registry immediately and returns a
//! [`SaveHandle`]; persistence happens on a background task that holds the
//! holder's mutation lock until the store call settles. Callers needing a
//! durability guarantee await the handle; on failure the registry entry has
//! already been rolled back to the last durable snapshot by the time the
//! handle resolves.

use futures::channel::oneshot;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::prelude::*;

/// Future-like handle to a mutation's persistence outcome.
pub struct SaveHandle {
	rx: oneshot::Receiver<StResult<()>>,
}

impl SaveHandle {
	/// Wait for the mutation to become durable (or definitively fail).
	pub async fn wait(self) -> StResult<()> {
		self.rx.await.map_err(|_| Error::Internal("save task dropped its result".into()))?
	}
}

/// One async mutex per holder key, created on demand.
///
/// The guard is held by the save task until persistence settles, so
/// concurrent mutations of one holder are fully ordered while distinct
/// holders proceed independently.
#[derive(Debug, Default)]
pub(crate) struct MutationLocks<K> {
	locks: parking_lot::Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> MutationLocks<K> {
	pub fn new() -> Self {
		Self { locks: parking_lot::Mutex::new(HashMap::new()) }
	}

	pub fn entry(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
		self.locks.lock().entry(key.clone()).or_default().clone()
	}

	/// True when no mutation on `key` is in flight or pending.
	pub fn is_idle(&self, key: &K) -> bool {
		match self.locks.lock().get(key) {
			Some(lock) => lock.try_lock().is_ok(),
			None => true,
		}
	}

	/// All known locks — acquiring each in turn drains in-flight saves.
	pub fn all(&self) -> Vec<Arc<tokio::sync::Mutex<()>>> {
		self.locks.lock().values().cloned().collect()
	}

	/// Drop the lock entry if idle (holder eviction cleanup).
	pub fn forget_if_idle(&self, key: &K) {
		let mut locks = self.locks.lock();
		let idle = match locks.get(key) {
			Some(lock) => lock.try_lock().is_ok(),
			None => false,
		};
		if idle {
			locks.remove(key);
		}
	}
}

/// Exponential backoff policy for store and messaging operations.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
	wait_min_max_ms: (u64, u64),
	times: u16,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { wait_min_max_ms: (50, 2000), times: 3 }
	}
}

impl RetryPolicy {
	pub fn new(wait_min_max_ms: (u64, u64), times: u16) -> Self {
		Self { wait_min_max_ms, times }
	}

	/// Backoff for the given attempt: min * 2^attempt, capped at max.
	pub fn backoff_ms(&self, attempt: u16) -> u64 {
		let (min, max) = self.wait_min_max_ms;
		min.saturating_mul(1u64 << u64::from(attempt.min(32))).min(max)
	}

	pub fn should_retry(&self, attempt: u16) -> bool {
		attempt < self.times
	}
}

/// Run `op` against its deadline, retrying timeouts with backoff.
///
/// Timeouts are treated as transient and retried; any other error is
/// persistent and surfaces immediately. Exhausted retries surface as
/// [`Error::Loading`].
pub(crate) async fn with_retry<F, Fut, T>(
	op: &F,
	timeout: Duration,
	retry: &RetryPolicy,
) -> StResult<T>
where
	F: Fn() -> Fut,
	Fut: Future<Output = StResult<T>>,
{
	let mut attempt: u16 = 0;
	loop {
		let outcome = match tokio::time::timeout(timeout, op()).await {
			Ok(res) => res,
			Err(_elapsed) => Err(Error::Timeout),
		};
		match outcome {
			Ok(value) => return Ok(value),
			Err(Error::Timeout) => {
				if !retry.should_retry(attempt) {
					return Err(Error::Loading(format!(
						"store unavailable after {} attempts",
						attempt + 1
					)));
				}
				let backoff = retry.backoff_ms(attempt);
				attempt += 1;
				warn!("Store operation timed out, retrying in {}ms (attempt {})", backoff, attempt);
				tokio::time::sleep(Duration::from_millis(backoff)).await;
			}
			Err(err) => return Err(err),
		}
	}
}

/// Spawn the persistence task for an already-applied mutation.
///
/// `on_result` runs on the task while the mutation guard is still held:
/// queue the sync notification on success, roll the registry back on
/// failure. The guard is released before the handle resolves, so a caller
/// awaiting the handle may immediately mutate again.
pub(crate) fn spawn_save<F, Fut>(
	op: F,
	timeout: Duration,
	retry: RetryPolicy,
	guard: tokio::sync::OwnedMutexGuard<()>,
	on_result: impl FnOnce(&StResult<()>) + Send + 'static,
) -> SaveHandle
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = StResult<()>> + Send,
{
	let (tx, rx) = oneshot::channel();
	tokio::spawn(async move {
		let res = with_retry(&op, timeout, &retry).await;
		on_result(&res);
		drop(guard);
		let _ = tx.send(res);
	});
	SaveHandle { rx }
}


// vim: ts=4
