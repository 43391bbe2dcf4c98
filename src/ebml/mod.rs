//! EBML element reader primitives.
//!
//! This is the tree-walking substrate the demuxer core consumes: reading an
//! element ID, a length, and a typed payload from a seekable byte stream.
//! The core never decodes IDs or lengths itself; it only compares IDs
//! against the catalog in [`ids`] and walks scopes via the cursor.

use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;

pub mod ids;

/// Largest payload we are willing to materialize, to keep malformed length
/// fields from triggering huge allocations.
const MAX_PAYLOAD: u64 = 256 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum EbmlError {
	#[error("i/o error")]
	Io(#[from] std::io::Error),

	#[error("invalid element id at offset {position}")]
	InvalidId { position: u64 },

	#[error("invalid element size at offset {position}")]
	InvalidSize { position: u64 },

	#[error("element at offset {position} exceeds the payload limit")]
	Oversize { position: u64 },

	#[error("payload allocation failed")]
	OutOfMemory,

	#[error("unexpected end of stream")]
	UnexpectedEof,
}

/// One ID/length header of the binary tree format.
///
/// `size == None` means the element declared an unknown size; only master
/// elements do this and their extent is discovered by walking children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
	pub id: u32,
	pub size: Option<u64>,
	/// Stream offset of the first payload byte.
	pub data_start: u64,
}

impl ElementHeader {
	/// Offset one past the last payload byte, when the size is known.
	pub fn end(&self) -> Option<u64> {
		self.size.map(|size| self.data_start + size)
	}
}

/// Sequential element reader over a seekable byte stream.
pub struct EbmlStream<R> {
	reader: R,
}

impl<R: Read + Seek> EbmlStream<R> {
	pub fn new(reader: R) -> Self {
		Self { reader }
	}

	pub fn position(&mut self) -> Result<u64, EbmlError> {
		Ok(self.reader.stream_position()?)
	}

	pub fn seek_to(&mut self, position: u64) -> Result<(), EbmlError> {
		let _ = self.reader.seek(SeekFrom::Start(position))?;
		Ok(())
	}

	/// Read the next element header, or `None` at a clean end of stream.
	pub fn next_header(&mut self) -> Result<Option<ElementHeader>, EbmlError> {
		let position = self.position()?;

		let Some(first) = self.try_read_byte()? else {
			return Ok(None);
		};

		let id = self.read_id(first, position)?;
		let size = self.read_size(position)?;
		let data_start = self.position()?;

		Ok(Some(ElementHeader { id, size, data_start }))
	}

	/// Decode an element ID, length marker included.
	fn read_id(&mut self, first: u8, position: u64) -> Result<u32, EbmlError> {
		let length = first.leading_zeros() as usize + 1;
		if first == 0 || length > 4 {
			return Err(EbmlError::InvalidId { position });
		}

		let mut id = first as u32;
		for _ in 1..length {
			id = (id << 8) | self.read_byte()? as u32;
		}

		Ok(id)
	}

	/// Decode an element size; the all-ones pattern means unknown.
	fn read_size(&mut self, position: u64) -> Result<Option<u64>, EbmlError> {
		let first = self.read_byte()?;
		let length = first.leading_zeros() as usize + 1;
		if first == 0 || length > 8 {
			return Err(EbmlError::InvalidSize { position });
		}

		let mut size = first as u64 & (0xFFu64 >> length);
		for _ in 1..length {
			size = (size << 8) | self.read_byte()? as u64;
		}

		let unknown = (1u64 << (7 * length)) - 1;
		if size == unknown {
			return Ok(None);
		}

		Ok(Some(size))
	}

	/// Read an unsigned integer payload (big-endian, up to 8 bytes).
	pub fn read_uint(&mut self, header: &ElementHeader) -> Result<u64, EbmlError> {
		let size = self.known_size(header)?;
		if size > 8 {
			return Err(EbmlError::InvalidSize {
				position: header.data_start,
			});
		}

		let mut value = 0u64;
		for _ in 0..size {
			value = (value << 8) | self.read_byte()? as u64;
		}

		Ok(value)
	}

	/// Read a float payload (0, 4, or 8 bytes).
	pub fn read_float(&mut self, header: &ElementHeader) -> Result<f64, EbmlError> {
		let size = self.known_size(header)?;
		match size {
			0 => Ok(0.0),
			4 => {
				let mut buf = [0u8; 4];
				self.read_exact(&mut buf)?;
				Ok(f32::from_be_bytes(buf) as f64)
			}
			8 => {
				let mut buf = [0u8; 8];
				self.read_exact(&mut buf)?;
				Ok(f64::from_be_bytes(buf))
			}
			_ => Err(EbmlError::InvalidSize {
				position: header.data_start,
			}),
		}
	}

	/// Read a string payload, dropping trailing NUL padding.
	pub fn read_string(&mut self, header: &ElementHeader) -> Result<String, EbmlError> {
		let raw = self.read_binary(header)?;
		let text = String::from_utf8_lossy(&raw);
		Ok(text.trim_end_matches('\0').to_string())
	}

	/// Read a raw payload into an owned buffer.
	///
	/// Allocation failure is reported, not propagated as a panic, so a
	/// malformed length cannot take down the whole session.
	pub fn read_binary(&mut self, header: &ElementHeader) -> Result<Bytes, EbmlError> {
		let size = self.known_size(header)?;
		if size > MAX_PAYLOAD {
			return Err(EbmlError::Oversize {
				position: header.data_start,
			});
		}

		let mut buf = Vec::new();
		buf.try_reserve_exact(size as usize).map_err(|_| EbmlError::OutOfMemory)?;
		buf.resize(size as usize, 0);
		self.read_exact(&mut buf)?;

		Ok(Bytes::from(buf))
	}

	/// Discard an element's payload without materializing it.
	pub fn skip(&mut self, header: &ElementHeader) -> Result<(), EbmlError> {
		let end = header.end().ok_or(EbmlError::InvalidSize {
			position: header.data_start,
		})?;
		self.seek_to(end)
	}

	fn known_size(&self, header: &ElementHeader) -> Result<u64, EbmlError> {
		header.size.ok_or(EbmlError::InvalidSize {
			position: header.data_start,
		})
	}

	fn read_byte(&mut self) -> Result<u8, EbmlError> {
		let mut buf = [0u8; 1];
		self.read_exact(&mut buf)?;
		Ok(buf[0])
	}

	/// Read one byte, mapping a clean EOF to `None`.
	fn try_read_byte(&mut self) -> Result<Option<u8>, EbmlError> {
		let mut buf = [0u8; 1];
		loop {
			match self.reader.read(&mut buf) {
				Ok(0) => return Ok(None),
				Ok(_) => return Ok(Some(buf[0])),
				Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e.into()),
			}
		}
	}

	fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), EbmlError> {
		self.reader.read_exact(buf).map_err(|e| {
			if e.kind() == std::io::ErrorKind::UnexpectedEof {
				EbmlError::UnexpectedEof
			} else {
				EbmlError::Io(e)
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	fn stream(data: &[u8]) -> EbmlStream<Cursor<Vec<u8>>> {
		EbmlStream::new(Cursor::new(data.to_vec()))
	}

	#[test]
	fn test_header_short_id() {
		// TimecodeScale (3-byte id) with a 1-byte size.
		let mut es = stream(&[0x2A, 0xD7, 0xB1, 0x83, 0x0F, 0x42, 0x40]);
		let header = es.next_header().unwrap().unwrap();
		assert_eq!(header.id, ids::TIMECODE_SCALE);
		assert_eq!(header.size, Some(3));
		assert_eq!(header.data_start, 4);
		assert_eq!(es.read_uint(&header).unwrap(), 1_000_000);
	}

	#[test]
	fn test_header_four_byte_id() {
		let mut es = stream(&[0x1A, 0x45, 0xDF, 0xA3, 0x80]);
		let header = es.next_header().unwrap().unwrap();
		assert_eq!(header.id, ids::EBML_HEAD);
		assert_eq!(header.size, Some(0));
	}

	#[test]
	fn test_unknown_size() {
		// Segment with the 8-byte all-ones size.
		let mut es = stream(&[0x18, 0x53, 0x80, 0x67, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
		let header = es.next_header().unwrap().unwrap();
		assert_eq!(header.id, ids::SEGMENT);
		assert_eq!(header.size, None);
		assert!(header.end().is_none());
	}

	#[test]
	fn test_clean_eof() {
		let mut es = stream(&[]);
		assert!(es.next_header().unwrap().is_none());
	}

	#[test]
	fn test_truncated_header() {
		let mut es = stream(&[0x1A, 0x45]);
		assert!(es.next_header().is_err());
	}

	#[test]
	fn test_invalid_id() {
		let mut es = stream(&[0x00, 0x80]);
		assert!(matches!(es.next_header(), Err(EbmlError::InvalidId { position: 0 })));
	}

	#[test]
	fn test_read_float_sizes() {
		let mut bytes = vec![0xB5, 0x84];
		bytes.extend_from_slice(&48000.0f32.to_be_bytes());
		let mut es = stream(&bytes);
		let header = es.next_header().unwrap().unwrap();
		assert_eq!(es.read_float(&header).unwrap(), 48000.0);
	}

	#[test]
	fn test_skip_advances_past_payload() {
		let mut es = stream(&[0xEC, 0x82, 0xAA, 0xBB, 0xB5, 0x80]);
		let void = es.next_header().unwrap().unwrap();
		assert_eq!(void.id, ids::VOID);
		es.skip(&void).unwrap();
		let next = es.next_header().unwrap().unwrap();
		assert_eq!(next.id, ids::SAMPLING_FREQUENCY);
	}
}
