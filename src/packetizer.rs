//! Payload sinks bound to demuxed tracks.
//!
//! Each usable, selected track gets exactly one packetizer chosen from its
//! resolved kind and format tag. The demuxer core only talks to the
//! [`Packetizer`] trait: push a timestamped payload in, pull finished
//! packets out, and ask for the smallest pending timestamp so output can be
//! interleaved across tracks.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::demux::{Track, TrackKind};
use crate::error::Error;

/// PCM format tag.
pub const TAG_PCM: u32 = 0x0001;
/// MPEG audio layer 3 format tag.
pub const TAG_MP3: u32 = 0x0055;
/// AC-3 format tag.
pub const TAG_AC3: u32 = 0x2000;
/// Vorbis format tag.
pub const TAG_VORBIS: u32 = 0xFFFE;

/// One demuxed unit handed to the caller.
#[derive(Debug, Clone)]
pub struct Packet {
	/// Declared number of the originating track.
	pub track: u32,
	pub payload: Bytes,
	/// Presentation timestamp in nanoseconds.
	pub timestamp: u64,
	/// Display duration in milliseconds, when the format carries one.
	pub duration: Option<u64>,
}

/// The capability every payload sink exposes to the demuxer.
pub trait Packetizer {
	/// Accept one frame payload with its presentation timestamp.
	fn process(&mut self, payload: Bytes, timestamp: u64, duration: Option<u64>);

	/// Whether at least one finished packet is buffered.
	fn packet_available(&self) -> bool;

	/// Pop the oldest finished packet.
	fn get_packet(&mut self) -> Option<Packet>;

	/// Timestamp of the oldest buffered packet, if any.
	fn smallest_timestamp(&self) -> Option<u64>;
}

/// FIFO shared by every concrete packetizer.
///
/// Frames pass through one-to-one; the codec-specific construction
/// parameters exist for the downstream consumer, not for re-framing.
struct PacketQueue {
	track: u32,
	packets: VecDeque<Packet>,
}

impl PacketQueue {
	fn new(track: u32) -> Self {
		Self {
			track,
			packets: VecDeque::new(),
		}
	}

	fn push(&mut self, payload: Bytes, timestamp: u64, duration: Option<u64>) {
		self.packets.push_back(Packet {
			track: self.track,
			payload,
			timestamp,
			duration,
		});
	}

	fn pop(&mut self) -> Option<Packet> {
		self.packets.pop_front()
	}

	fn smallest_timestamp(&self) -> Option<u64> {
		self.packets.front().map(|p| p.timestamp)
	}
}

macro_rules! delegate_packetizer {
	($type:ty) => {
		impl Packetizer for $type {
			fn process(&mut self, payload: Bytes, timestamp: u64, duration: Option<u64>) {
				self.queue.push(payload, timestamp, duration);
			}

			fn packet_available(&self) -> bool {
				!self.queue.packets.is_empty()
			}

			fn get_packet(&mut self) -> Option<Packet> {
				self.queue.pop()
			}

			fn smallest_timestamp(&self) -> Option<u64> {
				self.queue.smallest_timestamp()
			}
		}
	};
}

/// Generic video sink, parameterized by the reconciled display geometry.
pub struct VideoPacketizer {
	queue: PacketQueue,
	pub frame_rate: f64,
	pub width: u32,
	pub height: u32,
}

impl VideoPacketizer {
	pub fn new(track: u32, frame_rate: f64, width: u32, height: u32) -> Self {
		Self {
			queue: PacketQueue::new(track),
			frame_rate,
			width,
			height,
		}
	}
}

delegate_packetizer!(VideoPacketizer);

pub struct PcmPacketizer {
	queue: PacketQueue,
	pub sample_rate: u32,
	pub channels: u32,
	pub bits_per_sample: u32,
}

impl PcmPacketizer {
	pub fn new(track: u32, sample_rate: u32, channels: u32, bits_per_sample: u32) -> Self {
		Self {
			queue: PacketQueue::new(track),
			sample_rate,
			channels,
			bits_per_sample,
		}
	}
}

delegate_packetizer!(PcmPacketizer);

pub struct Mp3Packetizer {
	queue: PacketQueue,
	pub sample_rate: u32,
	pub channels: u32,
}

impl Mp3Packetizer {
	pub fn new(track: u32, sample_rate: u32, channels: u32) -> Self {
		Self {
			queue: PacketQueue::new(track),
			sample_rate,
			channels,
		}
	}
}

delegate_packetizer!(Mp3Packetizer);

pub struct Ac3Packetizer {
	queue: PacketQueue,
	pub sample_rate: u32,
	pub channels: u32,
}

impl Ac3Packetizer {
	pub fn new(track: u32, sample_rate: u32, channels: u32) -> Self {
		Self {
			queue: PacketQueue::new(track),
			sample_rate,
			channels,
		}
	}
}

delegate_packetizer!(Ac3Packetizer);

/// Vorbis sink, constructed with the three header packets recovered from
/// the track's codec-private data.
pub struct VorbisPacketizer {
	queue: PacketQueue,
	pub headers: [Bytes; 3],
}

impl VorbisPacketizer {
	pub fn new(track: u32, identification: Bytes, comment: Bytes, setup: Bytes) -> Self {
		Self {
			queue: PacketQueue::new(track),
			headers: [identification, comment, setup],
		}
	}
}

delegate_packetizer!(VorbisPacketizer);

/// Text subtitle sink; payloads are UTF-8 text with an explicit duration.
pub struct TextSubsPacketizer {
	queue: PacketQueue,
}

impl TextSubsPacketizer {
	pub fn new(track: u32) -> Self {
		Self {
			queue: PacketQueue::new(track),
		}
	}
}

delegate_packetizer!(TextSubsPacketizer);

/// Construct the packetizer matching a validated track's resolved format.
///
/// A usable track that still has no packetizer here is a configuration
/// error: the caller selected it, so dropping it silently is not an option
/// and the whole open fails instead.
pub(crate) fn bind(track: &Track) -> Result<Box<dyn Packetizer>, Error> {
	match track.kind {
		TrackKind::Video => Ok(Box::new(VideoPacketizer::new(
			track.number,
			track.frame_rate,
			track.pixel_width,
			track.pixel_height,
		))),

		TrackKind::Audio => match track.format_tag {
			TAG_PCM => Ok(Box::new(PcmPacketizer::new(
				track.number,
				track.sample_rate as u32,
				track.channels,
				track.bits_per_sample,
			))),
			TAG_MP3 => Ok(Box::new(Mp3Packetizer::new(
				track.number,
				track.sample_rate as u32,
				track.channels,
			))),
			TAG_AC3 => Ok(Box::new(Ac3Packetizer::new(
				track.number,
				track.sample_rate as u32,
				track.channels,
			))),
			TAG_VORBIS => {
				let private = track.private_data.as_ref().ok_or(Error::UnsupportedTrack {
					track: track.number,
				})?;
				let spans = track.vorbis_headers.ok_or(Error::UnsupportedTrack {
					track: track.number,
				})?;
				let [a, b, c] = spans.map(|(offset, len)| private.slice(offset..offset + len));
				Ok(Box::new(VorbisPacketizer::new(track.number, a, b, c)))
			}
			_ => Err(Error::UnsupportedTrack {
				track: track.number,
			}),
		},

		TrackKind::Subtitle => Ok(Box::new(TextSubsPacketizer::new(track.number))),

		TrackKind::Unknown(_) => Err(Error::UnsupportedTrack {
			track: track.number,
		}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_queue_fifo_order() {
		let mut sink = PcmPacketizer::new(1, 48000, 2, 16);
		assert!(!sink.packet_available());
		assert_eq!(sink.smallest_timestamp(), None);

		sink.process(Bytes::from_static(b"a"), 10, None);
		sink.process(Bytes::from_static(b"b"), 20, None);

		assert!(sink.packet_available());
		assert_eq!(sink.smallest_timestamp(), Some(10));
		assert_eq!(sink.get_packet().unwrap().payload, Bytes::from_static(b"a"));
		assert_eq!(sink.smallest_timestamp(), Some(20));
		assert_eq!(sink.get_packet().unwrap().payload, Bytes::from_static(b"b"));
		assert!(sink.get_packet().is_none());
	}

	#[test]
	fn test_packet_carries_track_number() {
		let mut sink = TextSubsPacketizer::new(7);
		sink.process(Bytes::from_static(b"hello"), 5, Some(1500));
		let packet = sink.get_packet().unwrap();
		assert_eq!(packet.track, 7);
		assert_eq!(packet.duration, Some(1500));
	}
}
