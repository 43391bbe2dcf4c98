use bytes::Bytes;
use num_enum::FromPrimitive;

use crate::packetizer::Packetizer;

/// Declared track type, straight from the track-type byte.
///
/// Unrecognized values are kept, not collapsed, so diagnostics can show what
/// the stream actually declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum TrackKind {
	Video = 1,
	Audio = 2,
	Subtitle = 0x11,
	#[num_enum(catch_all)]
	Unknown(u8),
}

impl Default for TrackKind {
	fn default() -> Self {
		Self::Unknown(0)
	}
}

/// One discovered track: raw metadata from the track entry plus the fields
/// reconciled against embedded legacy structures during validation.
#[derive(Default)]
pub struct Track {
	/// Declared track number. Uniqueness is advisory; duplicates are warned
	/// about but both entries stay in the table.
	pub number: u32,
	pub kind: TrackKind,
	pub codec_id: Option<String>,
	/// Codec-specific side data (legacy format headers, Vorbis headers).
	pub private_data: Option<Bytes>,

	// Video.
	pub pixel_width: u32,
	pub pixel_height: u32,
	pub frame_rate: f64,
	pub four_cc: [u8; 4],
	/// Whether the codec metadata came from an embedded legacy structure.
	pub ms_compat: bool,

	// Audio.
	pub sample_rate: f64,
	pub channels: u32,
	pub bits_per_sample: u32,
	/// Legacy numeric codec tag; 0 means unresolved.
	pub format_tag: u32,
	/// `(offset, len)` spans of the three Vorbis headers inside
	/// `private_data`, once validated.
	pub vorbis_headers: Option<[(usize, usize); 3]>,

	/// Set exclusively by header validation; once false, stays false.
	pub usable: bool,
	/// Bound at most once, only for selected usable tracks.
	pub sink: Option<Box<dyn Packetizer>>,
	/// Frames forwarded into the sink so far. Diagnostic only.
	pub frames_emitted: u64,
}

impl std::fmt::Debug for Track {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Track")
			.field("number", &self.number)
			.field("kind", &self.kind)
			.field("codec_id", &self.codec_id)
			.field("usable", &self.usable)
			.field("bound", &self.sink.is_some())
			.field("frames_emitted", &self.frames_emitted)
			.finish_non_exhaustive()
	}
}

/// Owns every discovered track for one open container.
///
/// Track counts are small, so lookup is a linear scan by design.
#[derive(Default)]
pub struct TrackTable {
	tracks: Vec<Track>,
}

impl TrackTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a zero-initialized track and return it for filling in.
	pub fn allocate(&mut self) -> &mut Track {
		self.tracks.push(Track::default());
		let index = self.tracks.len() - 1;
		&mut self.tracks[index]
	}

	pub fn len(&self) -> usize {
		self.tracks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tracks.is_empty()
	}

	pub fn get(&self, index: usize) -> Option<&Track> {
		self.tracks.get(index)
	}

	pub fn get_mut(&mut self, index: usize) -> Option<&mut Track> {
		self.tracks.get_mut(index)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Track> {
		self.tracks.iter()
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
		self.tracks.iter_mut()
	}

	/// First track declaring `number`, skipping the excluded index.
	///
	/// With duplicate numbers in the table this intentionally returns the
	/// first match; duplicates are never merged or re-keyed.
	pub fn find_by_number(&self, number: u32, exclude: Option<usize>) -> Option<&Track> {
		self.tracks
			.iter()
			.enumerate()
			.find(|(i, t)| t.number == number && Some(*i) != exclude)
			.map(|(_, t)| t)
	}

	/// Index of the first track declaring `number`.
	pub fn position_by_number(&self, number: u32) -> Option<usize> {
		self.tracks.iter().position(|t| t.number == number)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_allocate_appends_zero_initialized() {
		let mut table = TrackTable::new();
		let track = table.allocate();
		assert_eq!(track.number, 0);
		assert_eq!(track.kind, TrackKind::Unknown(0));
		assert!(!track.usable);
		assert_eq!(table.len(), 1);
	}

	#[test]
	fn test_find_by_number_skips_excluded() {
		let mut table = TrackTable::new();
		table.allocate().number = 3;

		// The only match is the excluded entry itself.
		assert!(table.find_by_number(3, Some(0)).is_none());
		assert!(table.find_by_number(3, None).is_some());
	}

	#[test]
	fn test_duplicate_numbers_both_retained() {
		let mut table = TrackTable::new();
		table.allocate().number = 5;
		table.allocate().number = 5;

		assert_eq!(table.len(), 2);
		// First match wins when nothing is excluded.
		assert_eq!(table.position_by_number(5), Some(0));
		// Excluding the first still finds the second.
		assert!(table.find_by_number(5, Some(0)).is_some());
	}

	#[test]
	fn test_track_kind_from_raw_byte() {
		assert_eq!(TrackKind::from(1), TrackKind::Video);
		assert_eq!(TrackKind::from(2), TrackKind::Audio);
		assert_eq!(TrackKind::from(0x11), TrackKind::Subtitle);
		assert_eq!(TrackKind::from(0x20), TrackKind::Unknown(0x20));
	}
}
