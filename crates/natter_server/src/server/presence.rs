#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use natter_domain::{ConnectionHandle, UserId};
use parking_lot::Mutex;
use tracing::debug;

/// Which live connection currently represents each identity.
///
/// Single slot per identity: a newer `register` supersedes the older handle.
/// Created at server start and shared with the gateway and REST layer by `Arc`.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
	inner: Mutex<HashMap<UserId, ConnectionHandle>>,
}

impl PresenceRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Overwrite any prior handle for `user`. Returns the superseded handle, if any.
	pub fn register(&self, user: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
		let prev = self.inner.lock().insert(user.clone(), handle);
		if let Some(prev) = prev
			&& prev != handle
		{
			debug!(user_id = %user, %prev, %handle, "presence: superseded previous connection");
		}
		prev
	}

	/// Remove the entry for `user`. No-op if absent.
	pub fn unregister(&self, user: &UserId) -> Option<ConnectionHandle> {
		self.inner.lock().remove(user)
	}

	/// Remove the entry only while it still points at `handle`.
	///
	/// Returns `false` when a newer connection owns the entry (or none exists).
	pub fn unregister_if(&self, user: &UserId, handle: ConnectionHandle) -> bool {
		let mut inner = self.inner.lock();
		match inner.get(user) {
			Some(current) if *current == handle => {
				inner.remove(user);
				true
			}
			_ => false,
		}
	}

	pub fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
		self.inner.lock().get(user).copied()
	}

	pub fn is_online(&self, user: &UserId) -> bool {
		self.inner.lock().contains_key(user)
	}

	/// Snapshot of the registered identities.
	pub fn all_identities(&self) -> HashSet<UserId> {
		self.inner.lock().keys().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.inner.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.lock().is_empty()
	}
}
