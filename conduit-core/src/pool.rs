//! C10: generic resource pool — acquire/release checkout over up to `max`
//! members of type `T`, with a FIFO wait queue when exhausted and a
//! background health task that evicts idle/invalid members and tops back
//! up to `min`.
//!
//! Grounded on the teacher's `hbone::pool::PoolState`, generalized from a
//! fixed resource kind and load-balancer-style selection to `T: Poolable`
//! plus a [`PoolFactory`] that dials fresh ones, per the spec's richer
//! acquire/release/drain checkout lifecycle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, timeout};

use crate::error::{Error, Result};

/// What the pool needs to validate and tear down a pooled resource.
#[async_trait]
pub trait Poolable: Send + Sync + 'static {
	async fn validate(&self) -> bool;
	async fn close(&self);
}

/// Dials a fresh `T` when the pool grows toward `max` or tops back up to
/// `min`.
#[async_trait]
pub trait PoolFactory<T: Poolable>: Send + Sync + 'static {
	async fn create(&self) -> Result<T>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
	RoundRobin,
	Random,
	LeastConnections,
	LeastRecentlyUsed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
	pub min: usize,
	pub max: usize,
	pub acquire_timeout: Duration,
	pub idle_timeout: Duration,
	pub max_lifetime: Duration,
	pub validate_on_acquire: bool,
	pub validate_on_release: bool,
	pub health_check_interval: Duration,
	pub health_check_timeout: Duration,
	pub wait_when_full: bool,
	pub selector: SelectionStrategy,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			min: 0,
			max: 8,
			acquire_timeout: Duration::from_secs(5),
			idle_timeout: Duration::from_secs(300),
			max_lifetime: Duration::from_secs(3600),
			validate_on_acquire: true,
			validate_on_release: false,
			health_check_interval: Duration::from_secs(30),
			health_check_timeout: Duration::from_secs(5),
			wait_when_full: true,
			selector: SelectionStrategy::RoundRobin,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
	Active,
	Draining,
	Closed,
}

struct Entry<T> {
	id: u64,
	inner: T,
	created_at: Instant,
	last_used: Instant,
	usage_count: u64,
}

/// A checked-out resource. Returns itself to the pool on drop unless
/// explicitly [`PooledConnection::release`]d first; an explicit release is
/// the only path that honors `validate_on_release`, since `Drop` cannot
/// await.
pub struct PooledConnection<T: Poolable> {
	entry: Option<Entry<T>>,
	pool: Arc<Inner<T>>,
}

impl<T: Poolable> std::ops::Deref for PooledConnection<T> {
	type Target = T;
	fn deref(&self) -> &T {
		&self
			.entry
			.as_ref()
			.expect("PooledConnection used after release")
			.inner
	}
}

impl<T: Poolable> PooledConnection<T> {
	pub fn id(&self) -> u64 {
		self.entry.as_ref().expect("used after release").id
	}

	pub fn usage_count(&self) -> u64 {
		self.entry.as_ref().expect("used after release").usage_count
	}

	pub fn age(&self) -> Duration {
		self.entry.as_ref().expect("used after release").created_at.elapsed()
	}

	pub fn idle_for(&self) -> Duration {
		self.entry.as_ref().expect("used after release").last_used.elapsed()
	}

	/// Returns the connection to the pool, validating it first if
	/// `validate_on_release` is set.
	pub async fn release(mut self) {
		if let Some(entry) = self.entry.take() {
			self.pool.release(entry).await;
		}
	}
}

impl<T: Poolable> Drop for PooledConnection<T> {
	fn drop(&mut self) {
		if let Some(entry) = self.entry.take() {
			self.pool.release_without_validation(entry);
		}
	}
}

struct Inner<T: Poolable> {
	config: PoolConfig,
	factory: Arc<dyn PoolFactory<T>>,
	idle: Mutex<VecDeque<Entry<T>>>,
	waiters: Mutex<VecDeque<oneshot::Sender<Entry<T>>>>,
	next_id: AtomicU64,
	round_robin_cursor: AtomicUsize,
	in_use: watch::Sender<usize>,
	lifecycle: Mutex<Lifecycle>,
}

impl<T: Poolable> Inner<T> {
	fn in_use_count(&self) -> usize {
		*self.in_use.borrow()
	}

	fn total_count(&self) -> usize {
		self.idle.lock().len() + self.in_use_count()
	}

	fn pick_index(&self, entries: &VecDeque<Entry<T>>) -> usize {
		match self.config.selector {
			SelectionStrategy::RoundRobin => self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % entries.len(),
			SelectionStrategy::Random => rand::rng().random_range(0..entries.len()),
			SelectionStrategy::LeastConnections => entries
				.iter()
				.enumerate()
				.min_by_key(|(_, e)| e.usage_count)
				.map(|(i, _)| i)
				.unwrap_or(0),
			SelectionStrategy::LeastRecentlyUsed => entries
				.iter()
				.enumerate()
				.min_by_key(|(_, e)| e.last_used)
				.map(|(i, _)| i)
				.unwrap_or(0),
		}
	}

	/// Returns `entry` to the pool without running `validate_on_release`,
	/// used from [`Drop`] where nothing can be awaited. Hands it straight to
	/// a waiting acquirer if one is queued, otherwise back to idle — unless
	/// the pool is draining or closed, in which case the caller is
	/// responsible for closing it.
	fn release_without_validation(self: &Arc<Self>, mut entry: Entry<T>) -> Option<Entry<T>> {
		self.in_use.send_modify(|n| *n = n.saturating_sub(1));
		if *self.lifecycle.lock() != Lifecycle::Active {
			return Some(entry);
		}
		entry.last_used = Instant::now();
		let mut waiters = self.waiters.lock();
		while let Some(tx) = waiters.pop_front() {
			self.in_use.send_modify(|n| *n += 1);
			match tx.send(entry) {
				Ok(()) => return None,
				Err(returned) => {
					// waiter already gave up; undo the increment and try the
					// next one (or fall through to idle).
					self.in_use.send_modify(|n| *n = n.saturating_sub(1));
					entry = returned;
				},
			}
		}
		drop(waiters);
		self.idle.lock().push_back(entry);
		None
	}

	async fn release(self: &Arc<Self>, entry: Entry<T>) {
		if *self.lifecycle.lock() != Lifecycle::Active {
			self.in_use.send_modify(|n| *n = n.saturating_sub(1));
			entry.inner.close().await;
			return;
		}
		if self.config.validate_on_release && !entry.inner.validate().await {
			self.in_use.send_modify(|n| *n = n.saturating_sub(1));
			entry.inner.close().await;
			return;
		}
		if let Some(leftover) = self.release_without_validation(entry) {
			leftover.inner.close().await;
		}
	}
}

/// Generic checkout pool over resource `T`. Cheap to clone (shares an
/// `Arc`).
pub struct Pool<T: Poolable> {
	inner: Arc<Inner<T>>,
}

impl<T: Poolable> Clone for Pool<T> {
	fn clone(&self) -> Self {
		Self { inner: self.inner.clone() }
	}
}

impl<T: Poolable> Pool<T> {
	pub fn new(config: PoolConfig, factory: Arc<dyn PoolFactory<T>>) -> Self {
		let (in_use, _rx) = watch::channel(0usize);
		Self {
			inner: Arc::new(Inner {
				config,
				factory,
				idle: Mutex::new(VecDeque::new()),
				waiters: Mutex::new(VecDeque::new()),
				next_id: AtomicU64::new(1),
				round_robin_cursor: AtomicUsize::new(0),
				in_use,
				lifecycle: Mutex::new(Lifecycle::Active),
			}),
		}
	}

	fn next_id(&self) -> u64 {
		self.inner.next_id.fetch_add(1, Ordering::Relaxed)
	}

	async fn create_entry(&self) -> Result<Entry<T>> {
		let inner = self.inner.factory.create().await?;
		let now = Instant::now();
		Ok(Entry { id: self.next_id(), inner, created_at: now, last_used: now, usage_count: 0 })
	}

	/// Checks an idle entry out, validating it and its lifetime first;
	/// evicted entries are closed and the caller keeps looking. Returns
	/// `None` once idle is exhausted.
	async fn take_from_idle(&self) -> Option<Entry<T>> {
		loop {
			let maybe_entry = {
				let mut idle = self.inner.idle.lock();
				if idle.is_empty() {
					return None;
				}
				let index = self.inner.pick_index(&idle);
				idle.remove(index)
			};
			let Some(mut entry) = maybe_entry else {
				return None;
			};
			if entry.created_at.elapsed() > self.inner.config.max_lifetime {
				entry.inner.close().await;
				continue;
			}
			if self.inner.config.validate_on_acquire && !entry.inner.validate().await {
				entry.inner.close().await;
				continue;
			}
			entry.usage_count += 1;
			entry.last_used = Instant::now();
			return Some(entry);
		}
	}

	fn into_checked_out(&self, entry: Entry<T>) -> PooledConnection<T> {
		PooledConnection { entry: Some(entry), pool: self.inner.clone() }
	}

	/// Acquires a connection: reuses a validated idle one if available,
	/// creates a fresh one if under `max`, or (per `wait_when_full`) queues
	/// behind existing waiters until `acquire_timeout` elapses.
	pub async fn acquire(&self) -> Result<PooledConnection<T>> {
		match *self.inner.lifecycle.lock() {
			Lifecycle::Draining => return Err(Error::PoolDraining),
			Lifecycle::Closed => return Err(Error::PoolClosed),
			Lifecycle::Active => {},
		}

		if let Some(entry) = self.take_from_idle().await {
			self.inner.in_use.send_modify(|n| *n += 1);
			return Ok(self.into_checked_out(entry));
		}

		if self.inner.total_count() < self.inner.config.max {
			self.inner.in_use.send_modify(|n| *n += 1);
			match self.create_entry().await {
				Ok(entry) => return Ok(self.into_checked_out(entry)),
				Err(err) => {
					self.inner.in_use.send_modify(|n| *n = n.saturating_sub(1));
					return Err(err);
				},
			}
		}

		if !self.inner.config.wait_when_full {
			return Err(Error::PoolExhausted);
		}

		let (tx, rx) = oneshot::channel();
		self.inner.waiters.lock().push_back(tx);
		match timeout(self.inner.config.acquire_timeout, rx).await {
			Ok(Ok(entry)) => Ok(self.into_checked_out(entry)),
			Ok(Err(_)) => Err(Error::PoolClosed),
			Err(_) => Err(Error::Timeout { scope: crate::error::TimeoutScope::Acquire }),
		}
	}

	/// Current idle + checked-out count.
	pub fn size(&self) -> usize {
		self.inner.total_count()
	}

	pub fn in_use(&self) -> usize {
		self.inner.in_use_count()
	}

	/// True once at least `min` connections have been established (idle or
	/// checked out) — a readiness probe for callers that want to wait for
	/// warm-up before serving traffic.
	pub fn is_ready(&self) -> bool {
		self.inner.total_count() >= self.inner.config.min
	}

	pub fn is_draining(&self) -> bool {
		*self.inner.lifecycle.lock() != Lifecycle::Active
	}

	/// Eagerly creates connections up to `min`, e.g. at startup so the
	/// first real `acquire` doesn't pay the dial cost.
	pub async fn warm_up(&self) -> Result<()> {
		while self.inner.total_count() < self.inner.config.min {
			let entry = self.create_entry().await?;
			self.inner.idle.lock().push_back(entry);
		}
		Ok(())
	}

	/// Runs one health-check sweep: evicts idle connections that have
	/// exceeded `idle_timeout` or fail validation, then tops back up to
	/// `min`. Intended to be driven by [`Pool::spawn_health_task`].
	pub async fn health_check(&self) {
		let candidates: Vec<Entry<T>> = self.inner.idle.lock().drain(..).collect();
		let mut keep = Vec::with_capacity(candidates.len());
		for entry in candidates {
			if entry.last_used.elapsed() > self.inner.config.idle_timeout {
				entry.inner.close().await;
				continue;
			}
			let healthy = timeout(self.inner.config.health_check_timeout, entry.inner.validate())
				.await
				.unwrap_or(false);
			if !healthy {
				entry.inner.close().await;
				continue;
			}
			keep.push(entry);
		}
		self.inner.idle.lock().extend(keep);
		if *self.inner.lifecycle.lock() == Lifecycle::Active {
			let _ = self.warm_up().await;
		}
	}

	/// Spawns a background task running [`Pool::health_check`] on
	/// `health_check_interval`, for as long as the returned handle is held.
	pub fn spawn_health_task(&self) -> tokio::task::JoinHandle<()> {
		let pool = self.clone();
		let interval = self.inner.config.health_check_interval;
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			loop {
				ticker.tick().await;
				pool.health_check().await;
			}
		})
	}

	/// Enters `Draining`: rejects new acquires with [`Error::PoolDraining`],
	/// waits for every checked-out connection to be released, closes all
	/// idle connections, then moves to `Closed`.
	pub async fn drain(&self) {
		*self.inner.lifecycle.lock() = Lifecycle::Draining;
		let mut in_use_rx = self.inner.in_use.subscribe();
		let _ = in_use_rx.wait_for(|n| *n == 0).await;
		let idle: Vec<Entry<T>> = self.inner.idle.lock().drain(..).collect();
		for entry in idle {
			entry.inner.close().await;
		}
		self.inner.waiters.lock().clear();
		*self.inner.lifecycle.lock() = Lifecycle::Closed;
	}
}
