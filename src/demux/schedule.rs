//! Interleaving of output packets across tracks.
//!
//! Each sink queues its packets in decode order; interleaving happens here
//! by always popping the globally oldest one. Ties go to the track that
//! appears first in the table, which keeps the order deterministic.

use super::track::TrackTable;
use crate::packetizer::Packet;

/// Pop the packet with the smallest timestamp across every bound track.
pub(crate) fn next_packet(tracks: &mut TrackTable) -> Option<Packet> {
	let mut best: Option<(usize, u64)> = None;

	for (index, track) in tracks.iter().enumerate() {
		let Some(sink) = track.sink.as_ref() else {
			continue;
		};
		let Some(timestamp) = sink.smallest_timestamp() else {
			continue;
		};
		if best.map_or(true, |(_, oldest)| timestamp < oldest) {
			best = Some((index, timestamp));
		}
	}

	let (index, _) = best?;
	tracks.get_mut(index)?.sink.as_mut()?.get_packet()
}

/// Whether every bound track has at least one packet buffered.
///
/// False when nothing is bound at all, so the demux loop never stalls on
/// an empty selection.
pub(crate) fn all_ready(tracks: &TrackTable) -> bool {
	let mut any = false;

	for track in tracks.iter() {
		let Some(sink) = track.sink.as_ref() else {
			continue;
		};
		if !sink.packet_available() {
			return false;
		}
		any = true;
	}

	any
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::demux::track::{Track, TrackKind};
	use crate::packetizer::{Packetizer, TextSubsPacketizer};
	use bytes::Bytes;

	fn bound_track(number: u32) -> Track {
		Track {
			number,
			kind: TrackKind::Subtitle,
			usable: true,
			sink: Some(Box::new(TextSubsPacketizer::new(number))),
			..Track::default()
		}
	}

	fn push(tracks: &mut TrackTable, index: usize, timestamp: u64) {
		let sink = tracks.get_mut(index).unwrap().sink.as_mut().unwrap();
		sink.process(Bytes::from_static(b"x"), timestamp, None);
	}

	#[test]
	fn test_oldest_packet_wins_across_tracks() {
		let mut tracks = TrackTable::new();
		*tracks.allocate() = bound_track(1);
		*tracks.allocate() = bound_track(2);

		push(&mut tracks, 0, 30);
		push(&mut tracks, 0, 40);
		push(&mut tracks, 1, 10);
		push(&mut tracks, 1, 35);

		let order: Vec<u64> = std::iter::from_fn(|| next_packet(&mut tracks))
			.map(|p| p.timestamp)
			.collect();
		assert_eq!(order, vec![10, 30, 35, 40]);
	}

	#[test]
	fn test_tie_goes_to_first_track() {
		let mut tracks = TrackTable::new();
		*tracks.allocate() = bound_track(1);
		*tracks.allocate() = bound_track(2);

		push(&mut tracks, 0, 20);
		push(&mut tracks, 1, 20);

		assert_eq!(next_packet(&mut tracks).unwrap().track, 1);
		assert_eq!(next_packet(&mut tracks).unwrap().track, 2);
	}

	#[test]
	fn test_all_ready_requires_every_bound_track() {
		let mut tracks = TrackTable::new();
		*tracks.allocate() = bound_track(1);
		*tracks.allocate() = bound_track(2);
		// An unbound track never counts.
		tracks.allocate();

		assert!(!all_ready(&tracks));
		push(&mut tracks, 0, 1);
		assert!(!all_ready(&tracks));
		push(&mut tracks, 1, 2);
		assert!(all_ready(&tracks));
	}

	#[test]
	fn test_all_ready_false_with_no_bound_tracks() {
		let mut tracks = TrackTable::new();
		tracks.allocate();
		assert!(!all_ready(&tracks));
	}
}
