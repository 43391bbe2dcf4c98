//! The demuxer core: probing, opening, and pulling packets.
//!
//! Opening parses everything up to the first cluster and binds a payload
//! sink to each selected usable track. After that the caller alternates
//! between [`MkvReader::read`], which forwards frames into the sinks, and
//! [`MkvReader::next_packet`], which drains them in global timestamp order.

use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, info};

use crate::ebml::{ids, EbmlStream};
use crate::error::Result;
use crate::packetizer::{self, Packet};

mod cluster;
mod cursor;
mod headers;
mod schedule;
mod track;

pub use track::{Track, TrackKind, TrackTable};

use cluster::ClusterWalk;
use cursor::ElementCursor;

/// Check whether a stream starts with the container signature.
///
/// The stream position is saved and restored, so probing never disturbs a
/// reader that is handed to [`MkvReader::open`] afterwards.
pub fn probe<R: Read + Seek>(reader: &mut R, size: u64) -> bool {
	if size < 4 {
		return false;
	}

	let magic = (|| -> std::io::Result<[u8; 4]> {
		let saved = reader.stream_position()?;
		reader.seek(SeekFrom::Start(0))?;
		let mut magic = [0u8; 4];
		let read = reader.read_exact(&mut magic);
		reader.seek(SeekFrom::Start(saved))?;
		read.map(|_| magic)
	})();

	match magic {
		Ok(magic) => u32::from_be_bytes(magic) == ids::EBML_HEAD,
		Err(_) => false,
	}
}

/// Which tracks to demux, per kind. `None` selects every usable track of
/// that kind; an explicit list selects by declared track number.
#[derive(Debug, Clone, Default)]
pub struct TrackSelection {
	pub video: Option<Vec<u32>>,
	pub audio: Option<Vec<u32>>,
	pub subtitle: Option<Vec<u32>>,
}

impl TrackSelection {
	fn wants(&self, track: &Track) -> bool {
		let list = match track.kind {
			TrackKind::Video => &self.video,
			TrackKind::Audio => &self.audio,
			TrackKind::Subtitle => &self.subtitle,
			TrackKind::Unknown(_) => return false,
		};

		match list {
			None => true,
			Some(numbers) => numbers.contains(&track.number),
		}
	}
}

/// Outcome of one [`MkvReader::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
	/// Frames were forwarded; packets may be available.
	Demuxed,
	/// Every bound track already has output waiting; drain packets first.
	Buffered,
	/// The stream is exhausted. Queued packets can still be drained.
	Finished,
}

/// A demuxing session over one seekable stream.
pub struct MkvReader<R> {
	cursor: ElementCursor<R>,
	tracks: TrackTable,
	timecode_scale: u64,
	walk: ClusterWalk,
	finished: bool,
}

impl<R: Read + Seek> MkvReader<R> {
	/// Parse the headers, validate the tracks and bind sinks for the
	/// selected ones.
	///
	/// Fails if the stream is not this container format, ends before any
	/// cluster, or a selected usable track has no matching sink.
	pub fn open(reader: R, selection: &TrackSelection) -> Result<Self> {
		let mut cursor = ElementCursor::new(EbmlStream::new(reader));
		let mut tracks = TrackTable::new();

		let headers = headers::read_headers(&mut cursor, &mut tracks)?;
		headers::verify_tracks(&mut tracks);

		let mut bound = 0usize;
		for track in tracks.iter_mut() {
			if track.usable && selection.wants(track) {
				track.sink = Some(packetizer::bind(track)?);
				bound += 1;
			}
		}
		info!(
			tracks = tracks.len(),
			bound,
			timecode_scale = headers.timecode_scale,
			"container open"
		);

		Ok(Self {
			cursor,
			tracks,
			timecode_scale: headers.timecode_scale,
			walk: ClusterWalk::new(headers.first_cluster, headers.timecode_scale),
			finished: false,
		})
	}

	/// Demux more frames into the bound sinks.
	///
	/// Stops as soon as every bound track has output waiting, so no track
	/// runs arbitrarily far ahead of the others.
	pub fn read(&mut self) -> Result<ReadStatus> {
		if schedule::all_ready(&self.tracks) {
			return Ok(ReadStatus::Buffered);
		}
		if self.finished {
			return Ok(ReadStatus::Finished);
		}

		let forwarded = self.walk.advance(&mut self.cursor, &mut self.tracks)?;
		if forwarded == 0 {
			debug!("stream exhausted");
			self.finished = true;
			return Ok(ReadStatus::Finished);
		}

		Ok(ReadStatus::Demuxed)
	}

	/// Pop the oldest queued packet across all bound tracks.
	pub fn next_packet(&mut self) -> Option<Packet> {
		schedule::next_packet(&mut self.tracks)
	}

	/// Whether every bound track has output waiting.
	pub fn packets_available(&self) -> bool {
		schedule::all_ready(&self.tracks)
	}

	pub fn tracks(&self) -> &TrackTable {
		&self.tracks
	}

	/// Nanoseconds per timecode tick for this segment.
	pub fn timecode_scale(&self) -> u64 {
		self.timecode_scale
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn test_probe_signature() {
		let mut good = Cursor::new(vec![0x1A, 0x45, 0xDF, 0xA3, 0x80]);
		assert!(probe(&mut good, 5));
		// The position is untouched for the open that follows.
		assert_eq!(good.position(), 0);

		let mut bad = Cursor::new(b"RIFF".to_vec());
		assert!(!probe(&mut bad, 4));

		let mut short = Cursor::new(vec![0x1A]);
		assert!(!probe(&mut short, 1));
	}
}
