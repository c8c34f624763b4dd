#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use natter_domain::{ConnectionHandle, UserId};
use natter_protocol::ServerEvent;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Outbound fan-out: one bounded queue per live connection plus one room per identity.
#[derive(Debug, Clone)]
pub struct ConnectionHub {
	inner: Arc<Mutex<Inner>>,
	cfg: ConnectionHubConfig,
}

#[derive(Debug, Clone)]
pub struct ConnectionHubConfig {
	/// Maximum number of queued events per connection.
	pub queue_capacity: usize,
}

impl Default for ConnectionHubConfig {
	fn default() -> Self {
		Self { queue_capacity: 256 }
	}
}

impl ConnectionHub {
	pub fn new(cfg: ConnectionHubConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Register `handle`'s outbound queue and join the room of `identity`.
	pub async fn attach(&self, handle: ConnectionHandle, identity: UserId) -> mpsc::Receiver<ServerEvent> {
		let (tx, rx) = mpsc::channel(self.cfg.queue_capacity.max(1));

		let mut inner = self.inner.lock().await;
		inner.prune_closed();

		inner.rooms.entry(identity.clone()).or_default().insert(handle);
		inner.conns.insert(
			handle,
			Subscriber {
				identity: identity.clone(),
				tx,
				dropped: 0,
			},
		);

		debug!(%handle, user_id = %identity, conns = inner.conns.len(), "hub: attached");

		rx
	}

	/// Remove `handle`'s queue and leave its room. No-op if unknown.
	pub async fn detach(&self, handle: ConnectionHandle) {
		let mut inner = self.inner.lock().await;
		let Some(sub) = inner.remove(handle) else {
			return;
		};

		if sub.dropped > 0 {
			debug!(%handle, user_id = %sub.identity, dropped = sub.dropped, "hub: connection dropped events while attached");
		}
	}

	/// Deliver to one connection. Returns whether the event was queued.
	pub async fn send_to(&self, handle: ConnectionHandle, event: ServerEvent) -> bool {
		let mut inner = self.inner.lock().await;
		let Some(sub) = inner.conns.get_mut(&handle) else {
			return false;
		};

		match deliver(sub, event) {
			Delivery::Queued => true,
			Delivery::Dropped => false,
			Delivery::Closed => {
				inner.remove(handle);
				false
			}
		}
	}

	/// Deliver to every connection in `identity`'s room. Returns how many queued it.
	pub async fn send_to_room(&self, identity: &UserId, event: ServerEvent) -> usize {
		let mut inner = self.inner.lock().await;
		let members: Vec<ConnectionHandle> = match inner.rooms.get(identity) {
			Some(m) => m.iter().copied().collect(),
			None => return 0,
		};

		inner.fan_out(members, &event)
	}

	/// Deliver to every connection except `except`. Returns how many queued it.
	pub async fn broadcast_except(&self, except: ConnectionHandle, event: ServerEvent) -> usize {
		let mut inner = self.inner.lock().await;
		let targets: Vec<ConnectionHandle> = inner.conns.keys().copied().filter(|h| *h != except).collect();

		inner.fan_out(targets, &event)
	}

	pub async fn connection_count(&self) -> usize {
		self.inner.lock().await.conns.len()
	}

	/// Snapshot of handles currently in `identity`'s room.
	pub async fn room_members(&self, identity: &UserId) -> HashSet<ConnectionHandle> {
		let inner = self.inner.lock().await;
		inner.rooms.get(identity).cloned().unwrap_or_default()
	}
}

#[derive(Debug)]
struct Subscriber {
	identity: UserId,
	tx: mpsc::Sender<ServerEvent>,
	dropped: u64,
}

#[derive(Debug, Default)]
struct Inner {
	conns: HashMap<ConnectionHandle, Subscriber>,
	rooms: HashMap<UserId, HashSet<ConnectionHandle>>,
}

impl Inner {
	fn remove(&mut self, handle: ConnectionHandle) -> Option<Subscriber> {
		let sub = self.conns.remove(&handle)?;
		if let Some(room) = self.rooms.get_mut(&sub.identity) {
			room.remove(&handle);
			if room.is_empty() {
				self.rooms.remove(&sub.identity);
			}
		}
		Some(sub)
	}

	fn prune_closed(&mut self) {
		let closed: Vec<ConnectionHandle> = self
			.conns
			.iter()
			.filter(|(_, s)| s.tx.is_closed())
			.map(|(h, _)| *h)
			.collect();
		for handle in closed {
			self.remove(handle);
		}
	}

	fn fan_out(&mut self, targets: Vec<ConnectionHandle>, event: &ServerEvent) -> usize {
		let mut delivered = 0usize;
		let mut dropped_total = 0u64;
		let mut closed = Vec::new();

		for handle in targets {
			let Some(sub) = self.conns.get_mut(&handle) else {
				continue;
			};
			match deliver(sub, event.clone()) {
				Delivery::Queued => delivered += 1,
				Delivery::Dropped => dropped_total += 1,
				Delivery::Closed => closed.push(handle),
			}
		}

		for handle in closed {
			self.remove(handle);
		}

		if dropped_total > 0 {
			debug!(
				event = event.name(),
				dropped = dropped_total,
				"hub: dropped due to full connection queues"
			);
		}

		delivered
	}
}

enum Delivery {
	Queued,
	Dropped,
	Closed,
}

fn deliver(sub: &mut Subscriber, event: ServerEvent) -> Delivery {
	match sub.tx.try_send(event) {
		Ok(()) => Delivery::Queued,
		Err(mpsc::error::TrySendError::Full(ev)) => {
			sub.dropped = sub.dropped.saturating_add(1);
			metrics::counter!("natter_server_events_dropped_total", "event" => ev.name()).increment(1);
			Delivery::Dropped
		}
		Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
	}
}
