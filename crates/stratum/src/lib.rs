//! Stratum: a permission resolution and inheritance engine for multi-server
//! networks.
//!
//! For a given principal and context (server, world) the engine answers
//! whether a named permission is granted, denied, or unset, by resolving a
//! graph of inheriting groups and ordered promotion tracks. Mutations apply
//! optimistically in memory and persist asynchronously through a
//! [`StoreAdapter`](stratum_types::store_adapter::StoreAdapter); cooperating
//! processes sharing one store converge through a
//! [`MessagingAdapter`](stratum_types::messaging_adapter::MessagingAdapter)
//! invalidation channel plus a periodic fallback poll.

pub mod app;
pub mod group;
pub mod holder;
pub mod mutation;
pub mod prelude;
pub mod resolver;
pub mod settings;
pub mod sync;
pub mod track;
pub mod user;
pub mod uuid_cache;

pub use stratum_types as types;

// vim: ts=4
