//! C2: size-tiered reusable byte-buffer cache.
//!
//! Grounded on the teacher's `hbone::pool::PoolState` shape: a shared
//! `Mutex`-guarded map plus atomic counters for statistics, with an optional
//! background trim task. Here the "key" is a size tier instead of a
//! src/dest pair.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Power-of-two tier sizes, smallest first.
pub const DEFAULT_TIERS: &[usize] = &[256, 1024, 4096, 16384, 65536, 262144, 1024 * 1024];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
	pub size_tiers: Vec<usize>,
	pub max_per_tier: usize,
	pub max_pool_size: usize,
	pub trim_interval: Option<Duration>,
	pub enable_statistics: bool,
}

impl Default for BufferPoolConfig {
	fn default() -> Self {
		Self {
			size_tiers: DEFAULT_TIERS.to_vec(),
			max_per_tier: 64,
			max_pool_size: 64 * 1024 * 1024,
			trim_interval: None,
			enable_statistics: true,
		}
	}
}

/// A buffer checked out of the pool. Returns itself to the pool on drop
/// unless already [`PooledBuffer::take`]n or the pool has been dropped.
pub struct PooledBuffer {
	bytes: Option<Vec<u8>>,
	tier_index: usize,
	pool: Arc<Inner>,
	returned: bool,
}

impl std::fmt::Debug for PooledBuffer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PooledBuffer")
			.field("tier_index", &self.tier_index)
			.field("len", &self.bytes.as_ref().map(|b| b.len()))
			.field("returned", &self.returned)
			.finish()
	}
}

impl PooledBuffer {
	pub fn tier_index(&self) -> usize {
		self.tier_index
	}

	/// Access the underlying bytes. Panics if the buffer was already
	/// returned to the pool — per spec, access after return is a
	/// programming error that must fail loudly, not silently.
	pub fn bytes(&self) -> &[u8] {
		self
			.bytes
			.as_deref()
			.expect("PooledBuffer accessed after being returned to the pool")
	}

	pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
		self
			.bytes
			.as_mut()
			.expect("PooledBuffer accessed after being returned to the pool")
	}

	/// Explicitly returns the buffer to the pool. Idempotent: releasing
	/// twice has the same observable effect as releasing once.
	pub fn release(mut self) {
		self.release_mut();
	}

	fn release_mut(&mut self) {
		if self.returned {
			return;
		}
		self.returned = true;
		if let Some(bytes) = self.bytes.take() {
			self.pool.release(self.tier_index, bytes);
		}
	}
}

impl Drop for PooledBuffer {
	fn drop(&mut self) {
		self.release_mut();
	}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
	pub allocations: u64,
	pub hits: u64,
	pub misses: u64,
	pub peak_bytes: u64,
	pub bytes_reused: u64,
}

impl PoolStats {
	pub fn hit_rate(&self) -> f64 {
		let total = self.hits + self.misses;
		if total == 0 {
			0.0
		} else {
			self.hits as f64 / total as f64
		}
	}
}

struct Tier {
	size: usize,
	idle: Vec<Vec<u8>>,
}

struct Inner {
	tiers: Mutex<Vec<Tier>>,
	max_per_tier: usize,
	max_pool_size: usize,
	pooled_bytes: AtomicU64,
	allocations: AtomicU64,
	hits: AtomicU64,
	misses: AtomicU64,
	peak_bytes: AtomicU64,
	bytes_reused: AtomicU64,
}

impl Inner {
	fn release(&self, tier_index: usize, mut bytes: Vec<u8>) {
		let mut tiers = self.tiers.lock();
		let Some(tier) = tiers.get_mut(tier_index) else {
			return;
		};
		let would_total = self.pooled_bytes.load(Ordering::Relaxed) + tier.size as u64;
		if tier.idle.len() >= self.max_per_tier || would_total > self.max_pool_size as u64 {
			// drop on the floor: over quota
			return;
		}
		bytes.clear();
		tier.idle.push(bytes);
		self.pooled_bytes.fetch_add(tier.size as u64, Ordering::Relaxed);
	}
}

/// Size-tiered buffer pool. Cheap to clone (shares an `Arc`).
#[derive(Clone)]
pub struct BufferPool {
	inner: Arc<Inner>,
}

impl BufferPool {
	pub fn new(config: BufferPoolConfig) -> Self {
		let mut tiers: Vec<Tier> = config
			.size_tiers
			.iter()
			.map(|&size| Tier { size, idle: Vec::new() })
			.collect();
		tiers.sort_by_key(|t| t.size);
		Self {
			inner: Arc::new(Inner {
				tiers: Mutex::new(tiers),
				max_per_tier: config.max_per_tier,
				max_pool_size: config.max_pool_size,
				pooled_bytes: AtomicU64::new(0),
				allocations: AtomicU64::new(0),
				hits: AtomicU64::new(0),
				misses: AtomicU64::new(0),
				peak_bytes: AtomicU64::new(0),
				bytes_reused: AtomicU64::new(0),
			}),
		}
	}

	/// A lazily-initialized process-wide default pool, per spec §9
	/// ("globals ... as explicit dependencies with a default constructor
	/// that returns a shared instance lazily").
	pub fn global() -> &'static BufferPool {
		static DEFAULT: once_cell::sync::OnceCell<BufferPool> = once_cell::sync::OnceCell::new();
		DEFAULT.get_or_init(|| BufferPool::new(BufferPoolConfig::default()))
	}

	/// Picks the smallest tier >= `size` (saturating to the largest tier if
	/// oversized), reuses an idle buffer from that tier if any, else
	/// allocates fresh.
	pub fn acquire(&self, size: usize) -> PooledBuffer {
		let mut tiers = self.inner.tiers.lock();
		let tier_index = tiers
			.iter()
			.position(|t| t.size >= size)
			.unwrap_or(tiers.len().saturating_sub(1));
		let tier = &mut tiers[tier_index];
		self.inner.allocations.fetch_add(1, Ordering::Relaxed);
		let bytes = if let Some(mut b) = tier.idle.pop() {
			self.inner.hits.fetch_add(1, Ordering::Relaxed);
			self
				.inner
				.pooled_bytes
				.fetch_sub(tier.size as u64, Ordering::Relaxed);
			self.inner.bytes_reused.fetch_add(tier.size as u64, Ordering::Relaxed);
			b.reserve(tier.size.saturating_sub(b.capacity()));
			b
		} else {
			self.inner.misses.fetch_add(1, Ordering::Relaxed);
			Vec::with_capacity(tier.size)
		};
		let tier_size = tier.size;
		drop(tiers);
		let total = self
			.inner
			.allocations
			.load(Ordering::Relaxed)
			.saturating_mul(tier_size as u64);
		self.inner.peak_bytes.fetch_max(total, Ordering::Relaxed);
		PooledBuffer {
			bytes: Some(bytes),
			tier_index,
			pool: self.inner.clone(),
			returned: false,
		}
	}

	pub fn stats(&self) -> PoolStats {
		PoolStats {
			allocations: self.inner.allocations.load(Ordering::Relaxed),
			hits: self.inner.hits.load(Ordering::Relaxed),
			misses: self.inner.misses.load(Ordering::Relaxed),
			peak_bytes: self.inner.peak_bytes.load(Ordering::Relaxed),
			bytes_reused: self.inner.bytes_reused.load(Ordering::Relaxed),
		}
	}

	/// Idle buffer count across all tiers, for capacity-bound assertions.
	pub fn idle_count(&self) -> usize {
		self.inner.tiers.lock().iter().map(|t| t.idle.len()).sum()
	}

	/// Reduces every tier to at most half its current idle count, freeing
	/// the rest. Intended to be driven by a periodic background task at
	/// `trim_interval`.
	pub fn trim(&self) {
		let mut tiers = self.inner.tiers.lock();
		for tier in tiers.iter_mut() {
			let keep = tier.idle.len() / 2;
			let dropped = tier.idle.len() - keep;
			tier.idle.truncate(keep);
			if dropped > 0 {
				self
					.inner
					.pooled_bytes
					.fetch_sub((dropped * tier.size) as u64, Ordering::Relaxed);
			}
		}
	}

	/// Spawns a background task that calls [`BufferPool::trim`] on
	/// `interval`, for as long as the returned handle is held.
	pub fn spawn_trim_task(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
		let pool = self.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			loop {
				ticker.tick().await;
				pool.trim();
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn small_pool() -> BufferPool {
		BufferPool::new(BufferPoolConfig {
			size_tiers: vec![16, 64, 256],
			max_per_tier: 2,
			max_pool_size: 1024,
			trim_interval: None,
			enable_statistics: true,
		})
	}

	#[test]
	fn acquire_picks_smallest_fitting_tier() {
		let pool = small_pool();
		let buf = pool.acquire(40);
		assert_eq!(buf.tier_index(), 1); // tier size 64
	}

	#[test]
	fn oversized_request_saturates_to_largest_tier() {
		let pool = small_pool();
		let buf = pool.acquire(10_000);
		assert_eq!(buf.tier_index(), 2);
	}

	#[test]
	fn release_then_acquire_is_a_hit() {
		let pool = small_pool();
		let buf = pool.acquire(10);
		drop(buf);
		assert_eq!(pool.idle_count(), 1);
		let _buf2 = pool.acquire(10);
		let stats = pool.stats();
		assert_eq!(stats.hits, 1);
		assert_eq!(stats.misses, 1);
	}

	#[test]
	fn idempotent_release() {
		let pool = small_pool();
		let buf = pool.acquire(10);
		buf.release();
		assert_eq!(pool.idle_count(), 1);
		// releasing again (simulated: acquire+drop twice) must not double count
		let buf2 = pool.acquire(10);
		drop(buf2);
		assert_eq!(pool.idle_count(), 1);
	}

	#[test]
	fn respects_max_per_tier() {
		let pool = small_pool();
		for _ in 0..5 {
			pool.acquire(10).release();
		}
		assert!(pool.idle_count() <= 2);
	}

	#[test]
	#[should_panic(expected = "returned to the pool")]
	fn access_after_release_panics() {
		let pool = small_pool();
		let mut buf = pool.acquire(10);
		buf.release_mut();
		let _ = buf.bytes();
	}
}
