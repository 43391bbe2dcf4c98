//! Cluster walking and frame forwarding.
//!
//! Clusters are consumed one child element at a time so the walk can pause
//! between frames: whenever every bound track has output waiting, the caller
//! stops pulling and drains packets instead. The walk state lives here, the
//! stream position lives in the cursor, and together they make the position
//! fully resumable.

use std::io::{Read, Seek};

use anyhow::{bail, ensure, Context};
use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::cursor::ElementCursor;
use super::schedule;
use super::track::{TrackKind, TrackTable};
use crate::ebml::{ids, ElementHeader};
use crate::error::Result;

/// One block after stripping the framing: the target track, the timestamp
/// relative to the cluster clock, and the de-laced frame payloads.
struct Block {
	track: u32,
	relative: i16,
	frames: Vec<Bytes>,
}

/// Resumable demux state below the segment level.
pub(crate) struct ClusterWalk {
	/// A cluster header already read but not yet entered.
	pending: Option<ElementHeader>,
	in_cluster: bool,
	/// Base timestamp of the current cluster, in timecode ticks.
	cluster_clock: u64,
	timecode_scale: u64,
}

impl ClusterWalk {
	pub fn new(first_cluster: ElementHeader, timecode_scale: u64) -> Self {
		Self {
			pending: Some(first_cluster),
			in_cluster: false,
			cluster_clock: 0,
			timecode_scale,
		}
	}

	/// Forward frames until every bound track has output or the stream ends.
	///
	/// Returns the number of frames forwarded; zero means the stream is
	/// exhausted.
	pub fn advance<R: Read + Seek>(
		&mut self,
		cursor: &mut ElementCursor<R>,
		tracks: &mut TrackTable,
	) -> Result<u64> {
		let mut forwarded = 0u64;

		loop {
			if forwarded > 0 && schedule::all_ready(tracks) {
				return Ok(forwarded);
			}

			let Some(child) = self.next_cluster_child(cursor)? else {
				return Ok(forwarded);
			};

			match child.id {
				ids::CLUSTER_TIMECODE => {
					self.cluster_clock = cursor.stream().read_uint(&child)?;
					trace!(clock = self.cluster_clock, "cluster timecode");
				}
				ids::SIMPLE_BLOCK => {
					let payload = cursor.stream().read_binary(&child)?;
					forwarded += self.forward(payload, None, tracks);
				}
				ids::BLOCK_GROUP => forwarded += self.read_block_group(cursor, &child, tracks)?,
				ids::VOID | ids::CRC32 => cursor.stream().skip(&child)?,
				other => {
					debug!(id = format_args!("{other:#x}"), "skipping element inside cluster");
					cursor.skip(&child)?;
				}
			}
		}
	}

	/// Next element inside a cluster, crossing cluster boundaries as needed.
	fn next_cluster_child<R: Read + Seek>(
		&mut self,
		cursor: &mut ElementCursor<R>,
	) -> Result<Option<ElementHeader>> {
		loop {
			if !self.in_cluster {
				let cluster = match self.pending.take() {
					Some(header) => header,
					None => loop {
						match cursor.next_child()? {
							Some(header) if header.id == ids::CLUSTER => break header,
							Some(header) => cursor.skip(&header)?,
							None => return Ok(None),
						}
					},
				};

				cursor.enter(&cluster);
				self.in_cluster = true;
				self.cluster_clock = 0;
			}

			match cursor.next_child()? {
				Some(header) => return Ok(Some(header)),
				None => {
					cursor.exit()?;
					self.in_cluster = false;
				}
			}
		}
	}

	/// Parse one block group: the block itself plus its declared duration,
	/// in either order.
	fn read_block_group<R: Read + Seek>(
		&mut self,
		cursor: &mut ElementCursor<R>,
		group: &ElementHeader,
		tracks: &mut TrackTable,
	) -> Result<u64> {
		let mut payload = None;
		let mut duration = None;

		cursor.enter(group);
		while let Some(child) = cursor.next_child()? {
			match child.id {
				ids::BLOCK => payload = Some(cursor.stream().read_binary(&child)?),
				ids::BLOCK_DURATION => {
					let ticks = cursor.stream().read_uint(&child)?;
					duration = Some(ticks * self.timecode_scale / 1_000_000);
				}
				ids::REFERENCE_BLOCK => cursor.stream().skip(&child)?,
				_ => cursor.skip(&child)?,
			}
		}
		cursor.exit()?;

		let Some(payload) = payload else {
			warn!("block group without a block");
			return Ok(0);
		};

		Ok(self.forward(payload, duration, tracks))
	}

	/// De-frame a block and hand its frames to the owning track's sink.
	///
	/// Malformed blocks and frames for unknown, unusable or unselected
	/// tracks are dropped with a diagnostic; they never fail the walk.
	fn forward(&self, payload: Bytes, duration: Option<u64>, tracks: &mut TrackTable) -> u64 {
		let block = match parse_block(&payload) {
			Ok(block) => block,
			Err(e) => {
				warn!(error = format_args!("{e:#}"), "dropping malformed block");
				return 0;
			}
		};

		let Some(index) = tracks.position_by_number(block.track) else {
			warn!(track = block.track, "dropping block for undeclared track");
			return 0;
		};
		let Some(track) = tracks.get_mut(index) else {
			return 0;
		};
		let Some(sink) = track.sink.as_mut() else {
			trace!(track = block.track, "dropping block for unbound track");
			return 0;
		};

		let ticks = self.cluster_clock as i64 + block.relative as i64;
		if ticks < 0 {
			warn!(track = block.track, ticks, "dropping block with negative timestamp");
			return 0;
		}
		let timestamp = ticks as u64 * self.timecode_scale;

		let mut forwarded = 0;
		for frame in block.frames {
			if track.kind == TrackKind::Subtitle {
				let Some((text, entry_duration)) = split_subtitle_entry(&frame) else {
					warn!(track = block.track, "dropping subtitle entry without a duration line");
					continue;
				};
				sink.process(text, timestamp, Some(entry_duration));
			} else {
				sink.process(frame, timestamp, duration);
			}
			forwarded += 1;
		}
		track.frames_emitted += forwarded;

		forwarded
	}
}

/// Strip the block framing: track number, relative timestamp, flags, then
/// the frame payloads according to the declared lacing.
fn parse_block(data: &Bytes) -> anyhow::Result<Block> {
	let mut pos = 0usize;
	let track = read_vint(data, &mut pos).context("track number")?;

	ensure!(data.len() >= pos + 3, "block too short");
	let relative = i16::from_be_bytes([data[pos], data[pos + 1]]);
	let flags = data[pos + 2];
	pos += 3;

	let lacing = (flags >> 1) & 0x03;
	let frames = match lacing {
		0 => vec![data.slice(pos..)],
		1 => delace_xiph(data, pos)?,
		2 => delace_fixed(data, pos)?,
		3 => delace_ebml(data, pos)?,
		_ => unreachable!(),
	};

	Ok(Block {
		track: track as u32,
		relative,
		frames,
	})
}

/// Frame sizes as 255-runs; the last frame takes the remainder.
fn delace_xiph(data: &Bytes, mut pos: usize) -> anyhow::Result<Vec<Bytes>> {
	let count = *data.get(pos).context("missing frame count")? as usize + 1;
	pos += 1;

	let mut sizes = Vec::with_capacity(count - 1);
	for _ in 0..count - 1 {
		let mut size = 0usize;
		loop {
			let byte = *data.get(pos).context("truncated lacing sizes")?;
			pos += 1;
			size += byte as usize;
			if byte != 255 {
				break;
			}
		}
		sizes.push(size);
	}

	collect_frames(data, pos, &sizes)
}

/// All frames share one size derived from the remaining payload.
fn delace_fixed(data: &Bytes, mut pos: usize) -> anyhow::Result<Vec<Bytes>> {
	let count = *data.get(pos).context("missing frame count")? as usize + 1;
	pos += 1;

	let total = data.len().checked_sub(pos).context("truncated payload")?;
	ensure!(total % count == 0, "payload does not divide into {count} equal frames");
	let size = total / count;

	let sizes = vec![size; count - 1];
	collect_frames(data, pos, &sizes)
}

/// First size as a plain variable-width integer, the rest as signed deltas.
fn delace_ebml(data: &Bytes, mut pos: usize) -> anyhow::Result<Vec<Bytes>> {
	let count = *data.get(pos).context("missing frame count")? as usize + 1;
	pos += 1;

	let mut sizes = Vec::with_capacity(count - 1);
	if count > 1 {
		let mut size = read_vint(data, &mut pos).context("first lace size")? as i64;
		sizes.push(usize::try_from(size).context("negative lace size")?);
		for _ in 1..count - 1 {
			size += read_signed_vint(data, &mut pos).context("lace size delta")?;
			sizes.push(usize::try_from(size).context("negative lace size")?);
		}
	}

	collect_frames(data, pos, &sizes)
}

/// Slice out `sizes` frames starting at `pos`, plus the remainder frame.
fn collect_frames(data: &Bytes, mut pos: usize, sizes: &[usize]) -> anyhow::Result<Vec<Bytes>> {
	let mut frames = Vec::with_capacity(sizes.len() + 1);
	for &size in sizes {
		let end = pos.checked_add(size).context("lace size overflow")?;
		ensure!(end <= data.len(), "lace overruns the block payload");
		frames.push(data.slice(pos..end));
		pos = end;
	}
	ensure!(pos <= data.len(), "lacing overruns the block payload");
	frames.push(data.slice(pos..));

	Ok(frames)
}

/// Variable-width unsigned integer, marker stripped.
fn read_vint(data: &Bytes, pos: &mut usize) -> anyhow::Result<u64> {
	let first = *data.get(*pos).context("truncated integer")?;
	let length = first.leading_zeros() as usize + 1;
	if first == 0 || length > 8 {
		bail!("invalid integer marker {first:#x}");
	}

	let mut value = (first & (0xFF >> length)) as u64;
	for i in 1..length {
		value = (value << 8) | *data.get(*pos + i).context("truncated integer")? as u64;
	}
	*pos += length;

	Ok(value)
}

/// Signed variant used by lace size deltas.
fn read_signed_vint(data: &Bytes, pos: &mut usize) -> anyhow::Result<i64> {
	let first = *data.get(*pos).context("truncated integer")?;
	let length = first.leading_zeros() as usize + 1;
	let value = read_vint(data, pos)?;
	let bias = (1i64 << (7 * length - 1)) - 1;

	Ok(value as i64 - bias)
}

/// Split a subtitle entry into its display duration and its text.
///
/// The first line carries the duration in decimal milliseconds; the text is
/// whatever follows the line break.
fn split_subtitle_entry(frame: &Bytes) -> Option<(Bytes, u64)> {
	let break_at = frame.iter().position(|&b| b == b'\n' || b == b'\r')?;

	let duration = std::str::from_utf8(&frame[..break_at])
		.ok()
		.and_then(|line| line.trim().parse::<u64>().ok())
		.unwrap_or(0);

	let mut text_start = break_at;
	while text_start < frame.len() && (frame[text_start] == b'\n' || frame[text_start] == b'\r') {
		text_start += 1;
	}

	Some((frame.slice(text_start..), duration))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn block_bytes(track: u8, relative: i16, flags: u8, rest: &[u8]) -> Bytes {
		let mut data = vec![0x80 | track];
		data.extend_from_slice(&relative.to_be_bytes());
		data.push(flags);
		data.extend_from_slice(rest);
		Bytes::from(data)
	}

	#[test]
	fn test_block_no_lacing() {
		let block = parse_block(&block_bytes(1, -5, 0x00, b"frame")).unwrap();
		assert_eq!(block.track, 1);
		assert_eq!(block.relative, -5);
		assert_eq!(block.frames, vec![Bytes::from_static(b"frame")]);
	}

	#[test]
	fn test_block_xiph_lacing() {
		// Three frames: 2, 3 and 4 bytes.
		let mut rest = vec![2, 2, 3];
		rest.extend_from_slice(b"aabbbcccc");
		let block = parse_block(&block_bytes(1, 0, 0x02, &rest)).unwrap();
		assert_eq!(
			block.frames,
			vec![
				Bytes::from_static(b"aa"),
				Bytes::from_static(b"bbb"),
				Bytes::from_static(b"cccc"),
			]
		);
	}

	#[test]
	fn test_block_xiph_long_size() {
		// One 256-byte frame plus the remainder.
		let mut rest = vec![1, 255, 1];
		rest.extend_from_slice(&vec![0x61; 256]);
		rest.extend_from_slice(b"bb");
		let block = parse_block(&block_bytes(1, 0, 0x02, &rest)).unwrap();
		assert_eq!(block.frames.len(), 2);
		assert_eq!(block.frames[0].len(), 256);
		assert_eq!(block.frames[1], Bytes::from_static(b"bb"));
	}

	#[test]
	fn test_block_fixed_lacing() {
		let mut rest = vec![2];
		rest.extend_from_slice(b"aabbcc");
		let block = parse_block(&block_bytes(1, 0, 0x04, &rest)).unwrap();
		assert_eq!(
			block.frames,
			vec![
				Bytes::from_static(b"aa"),
				Bytes::from_static(b"bb"),
				Bytes::from_static(b"cc"),
			]
		);
	}

	#[test]
	fn test_block_fixed_lacing_uneven_rejected() {
		let mut rest = vec![2];
		rest.extend_from_slice(b"aabbc");
		assert!(parse_block(&block_bytes(1, 0, 0x04, &rest)).is_err());
	}

	#[test]
	fn test_block_ebml_lacing() {
		// Sizes 3, then 3 - 1 = 2, then the remainder.
		let mut rest = vec![2, 0x83];
		// One-byte signed size delta: bias 63, so the value 62 encodes -1.
		rest.push(0x80 | 62);
		rest.extend_from_slice(b"aaabbcccc");
		let block = parse_block(&block_bytes(1, 0, 0x06, &rest)).unwrap();
		assert_eq!(
			block.frames,
			vec![
				Bytes::from_static(b"aaa"),
				Bytes::from_static(b"bb"),
				Bytes::from_static(b"cccc"),
			]
		);
	}

	#[test]
	fn test_block_lace_overrun_rejected() {
		let rest = vec![1, 200, b'x'];
		assert!(parse_block(&block_bytes(1, 0, 0x02, &rest)).is_err());
	}

	#[test]
	fn test_block_two_byte_track_number() {
		let mut data = vec![0x40, 0x81]; // track 0x81 in two bytes
		data.extend_from_slice(&0i16.to_be_bytes());
		data.push(0);
		data.extend_from_slice(b"x");
		let block = parse_block(&Bytes::from(data)).unwrap();
		assert_eq!(block.track, 0x81);
	}

	#[test]
	fn test_subtitle_entry_split() {
		let frame = Bytes::from_static(b"1500\nhello world");
		let (text, duration) = split_subtitle_entry(&frame).unwrap();
		assert_eq!(duration, 1500);
		assert_eq!(text, Bytes::from_static(b"hello world"));
	}

	#[test]
	fn test_subtitle_entry_crlf() {
		let frame = Bytes::from_static(b"250\r\ntwo\nlines");
		let (text, duration) = split_subtitle_entry(&frame).unwrap();
		assert_eq!(duration, 250);
		assert_eq!(text, Bytes::from_static(b"two\nlines"));
	}

	#[test]
	fn test_subtitle_entry_without_break_dropped() {
		assert!(split_subtitle_entry(&Bytes::from_static(b"no duration")).is_none());
	}

	#[test]
	fn test_subtitle_entry_garbage_duration_is_zero() {
		let frame = Bytes::from_static(b"soon\ntext");
		let (_, duration) = split_subtitle_entry(&frame).unwrap();
		assert_eq!(duration, 0);
	}
}
