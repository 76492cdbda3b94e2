//! Utility functions: id generation and entry validation.

use rand::RngExt;

use crate::prelude::*;

pub const ID_LENGTH: usize = 16;
const ID_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Maximum length of group/track/server/world names.
pub const MAX_NAME_LENGTH: usize = 36;
/// Maximum length of a permission string.
pub const MAX_PERMISSION_LENGTH: usize = 200;

/// Random id for processes and wire messages.
pub fn random_id() -> StResult<String> {
	let mut rng = rand::rng();
	let mut result = String::with_capacity(ID_LENGTH);

	for _ in 0..ID_LENGTH {
		result.push(char::from(ID_CHARS[rng.random_range(0..ID_CHARS.len())]));
	}
	Ok(result)
}

/// Validate a group or track name.
///
/// Names are primary keys and appear inside membership permission strings
/// (`group.<name>`), so the character set is tight: lowercase alphanumeric
/// plus `-` and `_`, no dots.
pub fn check_name(name: &str) -> StResult<()> {
	if name.is_empty() {
		return Err(Error::InvalidEntry("name cannot be empty".into()));
	}
	if name.len() > MAX_NAME_LENGTH {
		return Err(Error::InvalidEntry(format!(
			"name too long (max {} characters)",
			MAX_NAME_LENGTH
		)));
	}
	let valid = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_';
	if !name.chars().all(valid) {
		return Err(Error::InvalidEntry(format!(
			"invalid name '{}' (allowed: lowercase alphanumeric, hyphen, underscore)",
			name
		)));
	}
	Ok(())
}

/// Validate a server or world name used to scope a node.
pub fn check_scope_value(value: &str) -> StResult<()> {
	check_name(value)
}

/// Validate a permission string.
///
/// `=` is reserved by the node textual form, whitespace never appears in
/// permissions, and leading/trailing/double dots break wildcard prefix
/// matching.
pub fn check_permission(permission: &str) -> StResult<()> {
	if permission.is_empty() {
		return Err(Error::InvalidEntry("permission cannot be empty".into()));
	}
	if permission.len() > MAX_PERMISSION_LENGTH {
		return Err(Error::InvalidEntry(format!(
			"permission too long (max {} characters)",
			MAX_PERMISSION_LENGTH
		)));
	}
	if permission.chars().any(|c| c.is_whitespace() || c == '=') {
		return Err(Error::InvalidEntry(format!(
			"permission '{}' contains reserved characters",
			permission
		)));
	}
	if permission != "*"
		&& (permission.starts_with('.') || permission.ends_with('.') || permission.contains(".."))
	{
		return Err(Error::InvalidEntry(format!("malformed permission '{}'", permission)));
	}
	Ok(())
}


// vim: ts=4
