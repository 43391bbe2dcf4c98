//! Scoped walking of the element tree.
//!
//! Master elements may declare an unknown size, so their extent is only
//! discoverable by reading children until one turns up that belongs to a
//! shallower level. That header has already been consumed from the stream at
//! that point; the cursor parks it and replays it once the walk has
//! unwound to the level it belongs to.

use std::io::{Read, Seek};

use tracing::warn;

use crate::ebml::{ids, EbmlError, EbmlStream, ElementHeader};

struct Scope {
	/// End offset of the scope's payload; `None` for unknown-size masters.
	end: Option<u64>,
}

/// A resumable position in the element tree: the stream, the stack of open
/// master scopes, and at most one header waiting to be replayed.
pub struct ElementCursor<R> {
	stream: EbmlStream<R>,
	scopes: Vec<Scope>,
	parked: Option<ElementHeader>,
	/// Depth at which the parked header is a child.
	parked_depth: usize,
}

impl<R: Read + Seek> ElementCursor<R> {
	pub fn new(stream: EbmlStream<R>) -> Self {
		Self {
			stream,
			scopes: Vec::new(),
			parked: None,
			parked_depth: 0,
		}
	}

	/// Direct access to the underlying stream, for payload reads.
	pub fn stream(&mut self) -> &mut EbmlStream<R> {
		&mut self.stream
	}

	/// Number of master scopes currently open.
	pub fn depth(&self) -> usize {
		self.scopes.len()
	}

	/// Open a master element's payload as the innermost scope.
	pub fn enter(&mut self, header: &ElementHeader) {
		self.scopes.push(Scope { end: header.end() });
	}

	/// Close the innermost scope, skipping any children left unread.
	pub fn exit(&mut self) -> Result<(), EbmlError> {
		let Some(scope) = self.scopes.pop() else {
			return Ok(());
		};

		// A parked header means the stream already sits past this scope.
		if self.parked.is_some() {
			return Ok(());
		}

		if let Some(end) = scope.end {
			if self.stream.position()? < end {
				self.stream.seek_to(end)?;
			}
		}

		Ok(())
	}

	/// Next child of the innermost scope, or `None` when the scope is done.
	///
	/// `None` from an unknown-size scope means a shallower element was met
	/// (now parked) or the stream ended; the caller exits and asks again.
	pub fn next_child(&mut self) -> Result<Option<ElementHeader>, EbmlError> {
		if self.parked.is_some() {
			if self.depth() > self.parked_depth {
				return Ok(None);
			}
			return Ok(self.parked.take());
		}

		match self.scopes.last() {
			Some(scope) => match scope.end {
				Some(end) => {
					let position = self.stream.position()?;
					if position >= end {
						if position > end {
							warn!(position, end, "child overran its parent element");
						}
						return Ok(None);
					}
					self.stream.next_header()
				}
				None => self.next_child_unbounded(),
			},
			// Top level: siblings of the segment.
			None => self.stream.next_header(),
		}
	}

	/// Skip an element entirely, walking children when the size is unknown.
	pub fn skip(&mut self, header: &ElementHeader) -> Result<(), EbmlError> {
		if header.size.is_some() {
			return self.stream.skip(header);
		}

		self.enter(header);
		while let Some(child) = self.next_child()? {
			self.skip(&child)?;
		}
		self.exit()
	}

	/// Read a child inside an unknown-size scope, parking any header that
	/// belongs to a shallower level.
	fn next_child_unbounded(&mut self) -> Result<Option<ElementHeader>, EbmlError> {
		let Some(header) = self.stream.next_header()? else {
			return Ok(None);
		};

		if let Some(level) = ids::level_of(header.id) {
			if level < self.depth() {
				self.parked = Some(header);
				self.parked_depth = level;
				return Ok(None);
			}
		}

		Ok(Some(header))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	fn cursor(data: Vec<u8>) -> ElementCursor<Cursor<Vec<u8>>> {
		ElementCursor::new(EbmlStream::new(Cursor::new(data)))
	}

	#[test]
	fn test_bounded_scope_ends_at_declared_size() {
		// Info { TimecodeScale } followed by a sibling cluster header.
		let data = vec![
			0x15, 0x49, 0xA9, 0x66, 0x85, // Info, size 5
			0x2A, 0xD7, 0xB1, 0x81, 0x01, // TimecodeScale = 1
			0x1F, 0x43, 0xB6, 0x75, 0x80, // Cluster, size 0
		];
		let mut cursor = cursor(data);

		let info = cursor.next_child().unwrap().unwrap();
		assert_eq!(info.id, ids::INFO);
		cursor.enter(&info);

		let scale = cursor.next_child().unwrap().unwrap();
		assert_eq!(scale.id, ids::TIMECODE_SCALE);
		assert_eq!(cursor.stream().read_uint(&scale).unwrap(), 1);

		assert!(cursor.next_child().unwrap().is_none());
		cursor.exit().unwrap();

		let cluster = cursor.next_child().unwrap().unwrap();
		assert_eq!(cluster.id, ids::CLUSTER);
	}

	#[test]
	fn test_unknown_size_scope_parks_shallower_element() {
		// Unknown-size cluster whose end is marked by the next cluster.
		let data = vec![
			0x1F, 0x43, 0xB6, 0x75, 0xFF, // Cluster, unknown size
			0xE7, 0x81, 0x05, // ClusterTimecode = 5
			0x1F, 0x43, 0xB6, 0x75, 0x80, // next Cluster, size 0
		];
		let mut cursor = cursor(data);

		// Pretend we are inside the segment.
		cursor.enter(&ElementHeader {
			id: ids::SEGMENT,
			size: None,
			data_start: 0,
		});

		let first = cursor.next_child().unwrap().unwrap();
		assert_eq!(first.id, ids::CLUSTER);
		cursor.enter(&first);

		let timecode = cursor.next_child().unwrap().unwrap();
		assert_eq!(timecode.id, ids::CLUSTER_TIMECODE);
		assert_eq!(cursor.stream().read_uint(&timecode).unwrap(), 5);

		// The next cluster belongs one level up, so this scope is done.
		assert!(cursor.next_child().unwrap().is_none());
		cursor.exit().unwrap();

		// Back at segment depth the parked header is replayed.
		let second = cursor.next_child().unwrap().unwrap();
		assert_eq!(second.id, ids::CLUSTER);
		assert_eq!(second.size, Some(0));
	}

	#[test]
	fn test_unknown_size_scope_ends_at_eof() {
		let data = vec![
			0x18, 0x53, 0x80, 0x67, 0xFF, // Segment, unknown size
			0x1F, 0x43, 0xB6, 0x75, 0x80, // Cluster, size 0
		];
		let mut cursor = cursor(data);

		let segment = cursor.next_child().unwrap().unwrap();
		cursor.enter(&segment);

		let cluster = cursor.next_child().unwrap().unwrap();
		assert_eq!(cluster.id, ids::CLUSTER);

		assert!(cursor.next_child().unwrap().is_none());
	}

	#[test]
	fn test_exit_skips_unread_children() {
		let data = vec![
			0x15, 0x49, 0xA9, 0x66, 0x85, // Info, size 5
			0x2A, 0xD7, 0xB1, 0x81, 0x01, // TimecodeScale, unread
			0x16, 0x54, 0xAE, 0x6B, 0x80, // Tracks, size 0
		];
		let mut cursor = cursor(data);

		let info = cursor.next_child().unwrap().unwrap();
		cursor.enter(&info);
		cursor.exit().unwrap();

		let tracks = cursor.next_child().unwrap().unwrap();
		assert_eq!(tracks.id, ids::TRACKS);
	}
}
