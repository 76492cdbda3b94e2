//! Common value types used throughout the engine.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

// Timestamp //
//***********//

/// Unix timestamp in seconds.
#[derive(
	Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Self {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_secs() as i64)
	}

	pub fn from_now(seconds: i64) -> Self {
		Self::now().add_seconds(seconds)
	}

	pub fn add_seconds(self, seconds: i64) -> Self {
		Timestamp(self.0 + seconds)
	}

	/// True if this timestamp lies strictly in the past.
	pub fn is_past(self) -> bool {
		self < Self::now()
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

// Tristate //
//**********//

/// Result of a permission check: granted, denied, or no opinion.
///
/// `Undefined` means no node matched; the host decides what that maps to
/// (typically its own default).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tristate {
	True,
	False,
	Undefined,
}

impl Tristate {
	pub fn as_option(self) -> Option<bool> {
		match self {
			Tristate::True => Some(true),
			Tristate::False => Some(false),
			Tristate::Undefined => None,
		}
	}

	/// Collapse to a bool, mapping `Undefined` to the host-supplied default.
	pub fn or_default(self, default: bool) -> bool {
		self.as_option().unwrap_or(default)
	}
}

impl From<Option<bool>> for Tristate {
	fn from(value: Option<bool>) -> Self {
		match value {
			Some(true) => Tristate::True,
			Some(false) => Tristate::False,
			None => Tristate::Undefined,
		}
	}
}

impl From<bool> for Tristate {
	fn from(value: bool) -> Self {
		if value { Tristate::True } else { Tristate::False }
	}
}


// vim: ts=4
