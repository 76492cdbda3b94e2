//! Error type shared across the engine and adapter crates.

pub type StResult<T> = std::result::Result<T, Error>;

/// Engine-wide error type.
///
/// Mutation errors (`AlreadyHas`, `DoesNotHave`, ...) are returned before any
/// state change is applied: a holder that rejects an operation is left
/// exactly as it was.
#[derive(Debug)]
pub enum Error {
	/// The referenced user, group, or track is not loaded / does not exist.
	NotFound,
	/// A node with the same scope (permission, server, world) already exists.
	AlreadyHas,
	/// No node with the requested scope exists.
	DoesNotHave,
	/// The group already inherits from the target group in that scope.
	AlreadyInherits,
	/// The track already contains the group.
	AlreadyContains,
	/// Promotion past the last group, or demotion past the first.
	EndOfTrack,
	/// A name or permission string failed validation.
	InvalidEntry(String),
	/// The backing store failed to load or persist an entity.
	Loading(String),
	/// A store or messaging operation exceeded its deadline.
	Timeout,
	/// Malformed input (node text form, wire message).
	Parse,
	Internal(String),

	// externals
	Io(std::io::Error),
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(_err: serde_json::Error) -> Self {
		Self::Parse
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::NotFound => write!(f, "object not found"),
			Error::AlreadyHas => write!(f, "holder already has a node with this scope"),
			Error::DoesNotHave => write!(f, "holder does not have a node with this scope"),
			Error::AlreadyInherits => write!(f, "group already inherits from this group"),
			Error::AlreadyContains => write!(f, "track already contains this group"),
			Error::EndOfTrack => write!(f, "already at the end of the track"),
			Error::InvalidEntry(msg) => write!(f, "invalid entry: {}", msg),
			Error::Loading(msg) => write!(f, "loading error: {}", msg),
			Error::Timeout => write!(f, "operation timed out"),
			Error::Parse => write!(f, "parse error"),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io(err) => Some(err),
			_ => None,
		}
	}
}


// vim: ts=4
