//! Action log entries: who changed what.
//!
//! Every successful mutation produces one entry. Entries are emitted through
//! structured logging locally and travel to sibling processes on the
//! invalidation channel.

use serde::{Deserialize, Serialize};

use crate::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
	User,
	Group,
	Track,
}

/// One audit record of a mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
	/// Acting principal; `"console"` when no principal is attached.
	pub actor: Box<str>,
	pub kind: TargetKind,
	/// Primary key of the mutated object (uuid string or name).
	pub target: Box<str>,
	/// Free-form action description, e.g. `"set essentials.fly=true"`.
	pub action: Box<str>,
	pub at: Timestamp,
}

impl LogEntry {
	pub fn build() -> LogEntryBuilder {
		LogEntryBuilder::default()
	}
}

impl std::fmt::Display for LogEntry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let kind = match self.kind {
			TargetKind::User => "user",
			TargetKind::Group => "group",
			TargetKind::Track => "track",
		};
		write!(f, "{} ({} {}) {}", self.actor, kind, self.target, self.action)
	}
}

#[derive(Debug, Default)]
pub struct LogEntryBuilder {
	actor: Option<Box<str>>,
	kind: Option<TargetKind>,
	target: Option<Box<str>>,
	action: Option<Box<str>>,
}

impl LogEntryBuilder {
	pub fn actor(mut self, actor: impl Into<Box<str>>) -> Self {
		self.actor = Some(actor.into());
		self
	}

	pub fn user(mut self, uuid: uuid::Uuid) -> Self {
		self.kind = Some(TargetKind::User);
		self.target = Some(uuid.to_string().into());
		self
	}

	pub fn group(mut self, name: impl Into<Box<str>>) -> Self {
		self.kind = Some(TargetKind::Group);
		self.target = Some(name.into());
		self
	}

	pub fn track(mut self, name: impl Into<Box<str>>) -> Self {
		self.kind = Some(TargetKind::Track);
		self.target = Some(name.into());
		self
	}

	pub fn action(mut self, action: impl Into<Box<str>>) -> Self {
		self.action = Some(action.into());
		self
	}

	pub fn finish(self) -> StResult<LogEntry> {
		let (Some(kind), Some(target)) = (self.kind, self.target) else {
			return Err(Error::Internal("log entry without target".into()));
		};
		let Some(action) = self.action else {
			return Err(Error::Internal("log entry without action".into()));
		};
		Ok(LogEntry {
			actor: self.actor.unwrap_or_else(|| "console".into()),
			kind,
			target,
			action,
			at: Timestamp::now(),
		})
	}
}


// vim: ts=4
