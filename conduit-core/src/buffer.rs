//! C1: append-and-drain incremental read buffer with compaction and pattern
//! search.
//!
//! `ReadBuffer` is the single-writer, per-connection accumulation point for
//! inbound bytes. It is not `Sync`; callers own it for the life of a
//! connection and never hold a borrow of it across an `.await` (see spec
//! §5).

use tracing::trace;

/// Default byte count after which `read_index` is compacted away on the next
/// `append`.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 64 * 1024;

/// Default maximum buffer size (spec default max frame is 10MiB; the buffer
/// itself defaults somewhat larger to tolerate a few frames in flight).
pub const DEFAULT_MAX_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferStats {
	pub total: usize,
	pub read_index: usize,
	pub available: usize,
	pub usage_ratio: f64,
	pub needs_compact: bool,
}

/// Incremental read buffer: bytes are appended at the tail, consumed from
/// `read_index`, and the already-read prefix is dropped only when it grows
/// past `compaction_threshold` (deferring the memmove cost).
#[derive(Debug)]
pub struct ReadBuffer {
	bytes: Vec<u8>,
	read_index: usize,
	max_size: usize,
	compaction_threshold: usize,
}

impl ReadBuffer {
	pub fn new(max_size: usize, compaction_threshold: usize) -> Self {
		Self {
			bytes: Vec::new(),
			read_index: 0,
			max_size,
			compaction_threshold,
		}
	}

	pub fn with_defaults() -> Self {
		Self::new(DEFAULT_MAX_SIZE, DEFAULT_COMPACTION_THRESHOLD)
	}

	#[inline]
	pub fn available(&self) -> usize {
		self.bytes.len() - self.read_index
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.bytes.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.available() == 0
	}

	#[inline]
	pub fn read_index(&self) -> usize {
		self.read_index
	}

	pub fn stats(&self) -> BufferStats {
		let total = self.bytes.len();
		let available = self.available();
		BufferStats {
			total,
			read_index: self.read_index,
			available,
			usage_ratio: if self.max_size == 0 {
				0.0
			} else {
				total as f64 / self.max_size as f64
			},
			needs_compact: self.read_index > self.compaction_threshold,
		}
	}

	/// Appends `data`, compacting first if the already-read prefix has grown
	/// past the threshold. Fails if the post-append size would exceed
	/// `max_size`.
	pub fn append(&mut self, data: &[u8]) -> crate::error::Result<()> {
		if self.read_index > self.compaction_threshold {
			self.compact();
		}
		let projected = self.bytes.len() + data.len();
		if projected > self.max_size {
			return Err(crate::error::Error::BufferOverflow {
				requested: projected,
				capacity: self.max_size,
			});
		}
		self.bytes.extend_from_slice(data);
		Ok(())
	}

	/// Drops `bytes[0..read_index]` and resets `read_index` to 0.
	///
	/// Note: we log the pre-compaction byte count *before* mutating state.
	/// A prior implementation logged after resetting `read_index`, which
	/// made the reported count always zero (spec §9 open question) — we
	/// decide to report the real, pre-compaction value instead of removing
	/// the log (see DESIGN.md).
	pub fn compact(&mut self) {
		let reclaimed = self.read_index;
		if reclaimed == 0 {
			return;
		}
		trace!(reclaimed, "compacting read buffer");
		self.bytes.drain(0..self.read_index);
		self.read_index = 0;
	}

	/// Returns a copy of the next `n` bytes without consuming them, or
	/// `None` if fewer than `n` bytes are available.
	pub fn peek(&self, n: usize) -> Option<Vec<u8>> {
		if self.available() < n {
			return None;
		}
		Some(self.bytes[self.read_index..self.read_index + n].to_vec())
	}

	/// Returns a copy of the next `n` bytes and advances `read_index`, or
	/// `None` if insufficient bytes are buffered (the buffer is left
	/// untouched in that case).
	pub fn read(&mut self, n: usize) -> Option<Vec<u8>> {
		let out = self.peek(n)?;
		self.read_index += n;
		Some(out)
	}

	/// Reads and consumes everything currently available.
	pub fn read_all(&mut self) -> Vec<u8> {
		let out = self.bytes[self.read_index..].to_vec();
		self.read_index = self.bytes.len();
		out
	}

	/// Advances `read_index` by `n` without copying, clamped to what's
	/// available.
	pub fn skip(&mut self, n: usize) {
		self.read_index = (self.read_index + n).min(self.bytes.len());
	}

	/// Returns the offset of `pattern`'s first occurrence relative to
	/// `read_index`, or `None`.
	pub fn find(&self, pattern: &[u8]) -> Option<usize> {
		if pattern.is_empty() || pattern.len() > self.available() {
			return None;
		}
		let hay = &self.bytes[self.read_index..];
		hay.windows(pattern.len()).position(|w| w == pattern)
	}

	/// Returns the bytes preceding the first occurrence of `delim` and
	/// consumes both the returned bytes and the delimiter itself. Returns
	/// `None` (buffer untouched) if `delim` has not yet arrived.
	pub fn read_until(&mut self, delim: &[u8]) -> Option<Vec<u8>> {
		let offset = self.find(delim)?;
		let start = self.read_index;
		let out = self.bytes[start..start + offset].to_vec();
		self.read_index = start + offset + delim.len();
		Some(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn append_and_read_roundtrip() {
		let mut buf = ReadBuffer::with_defaults();
		buf.append(b"hello world").unwrap();
		assert_eq!(buf.available(), 11);
		assert_eq!(buf.read(5).unwrap(), b"hello");
		assert_eq!(buf.available(), 6);
		assert_eq!(buf.peek(6).unwrap(), b" world");
		assert_eq!(buf.available(), 6, "peek must not consume");
	}

	#[test]
	fn read_insufficient_returns_none_and_leaves_buffer_untouched() {
		let mut buf = ReadBuffer::with_defaults();
		buf.append(b"ab").unwrap();
		assert!(buf.read(5).is_none());
		assert_eq!(buf.available(), 2);
	}

	#[test]
	fn compaction_preserves_contents() {
		let mut buf = ReadBuffer::new(1024, 4);
		buf.append(b"0123456789").unwrap();
		buf.read(6).unwrap();
		assert_eq!(buf.read_index(), 6);
		// next append exceeds the threshold of 4, triggers compaction first
		buf.append(b"X").unwrap();
		assert_eq!(buf.read_index(), 0, "compaction resets read_index");
		assert_eq!(buf.read_all(), b"6789X");
	}

	#[test]
	fn overflow_is_rejected() {
		let mut buf = ReadBuffer::new(4, 2);
		assert!(buf.append(b"hello").is_err());
	}

	#[test]
	fn find_and_read_until() {
		let mut buf = ReadBuffer::with_defaults();
		buf.append(b"GET / HTTP/1.1\r\n\r\nbody").unwrap();
		assert_eq!(buf.find(b"\r\n\r\n"), Some(14));
		let head = buf.read_until(b"\r\n\r\n").unwrap();
		assert_eq!(head, b"GET / HTTP/1.1\r\n");
		assert_eq!(buf.read_all(), b"body");
	}

	#[test]
	fn read_until_missing_delimiter_leaves_buffer_untouched() {
		let mut buf = ReadBuffer::with_defaults();
		buf.append(b"partial").unwrap();
		assert!(buf.read_until(b"\n").is_none());
		assert_eq!(buf.available(), 7);
	}

	proptest::proptest! {
		#[test]
		fn prop_roundtrip(data in proptest::collection::vec(proptest::num::u8::ANY, 0..4096)) {
			let mut buf = ReadBuffer::with_defaults();
			buf.append(&data).unwrap();
			let out = buf.read(data.len()).unwrap();
			proptest::prop_assert_eq!(out, data);
			proptest::prop_assert_eq!(buf.available(), 0);
		}

		#[test]
		fn prop_compaction_preserves_tail(
			prefix in proptest::collection::vec(proptest::num::u8::ANY, 0..200),
			tail in proptest::collection::vec(proptest::num::u8::ANY, 0..200)
		) {
			let mut buf = ReadBuffer::new(1 << 20, 8);
			buf.append(&prefix).unwrap();
			buf.read(prefix.len()).unwrap();
			buf.append(&tail).unwrap();
			proptest::prop_assert_eq!(buf.read_all(), tail);
		}
	}
}
