//! Catalog of the element identifiers the demuxer knows about.
//!
//! IDs are stored with their length marker intact, the way they appear in
//! the stream. Anything not listed here is skipped with a diagnostic.

/// EBML header (the 4-byte file signature).
pub const EBML_HEAD: u32 = 0x1A45_DFA3;
/// Segment, the root container for all media data.
pub const SEGMENT: u32 = 0x1853_8067;

/// Segment information.
pub const INFO: u32 = 0x1549_A966;
/// Track definitions.
pub const TRACKS: u32 = 0x1654_AE6B;
/// A container of time-grouped frames.
pub const CLUSTER: u32 = 0x1F43_B675;
/// Index of top-level elements.
pub const SEEK_HEAD: u32 = 0x114D_9B74;
/// Seeking index.
pub const CUES: u32 = 0x1C53_BB6B;
/// Tagging metadata.
pub const TAGS: u32 = 0x1254_C367;
/// Chapter definitions.
pub const CHAPTERS: u32 = 0x1043_A770;
/// Attached files.
pub const ATTACHMENTS: u32 = 0x1941_A469;

/// Nanoseconds per timecode tick.
pub const TIMECODE_SCALE: u32 = 0x2AD7B1;
/// One track definition.
pub const TRACK_ENTRY: u32 = 0xAE;
/// Base timestamp shared by a cluster's blocks.
pub const CLUSTER_TIMECODE: u32 = 0xE7;
/// A block plus its side information.
pub const BLOCK_GROUP: u32 = 0xA0;
/// A block without side information, keyframe flag inline.
pub const SIMPLE_BLOCK: u32 = 0xA3;

/// Declared track number.
pub const TRACK_NUMBER: u32 = 0xD7;
/// Declared track type byte.
pub const TRACK_TYPE: u32 = 0x83;
/// Codec identifier string.
pub const CODEC_ID: u32 = 0x86;
/// Codec-specific side data.
pub const CODEC_PRIVATE: u32 = 0x63A2;
/// Audio settings sub-tree.
pub const TRACK_AUDIO: u32 = 0xE1;
/// Video settings sub-tree.
pub const TRACK_VIDEO: u32 = 0xE0;
/// Frame payload plus relative timestamp.
pub const BLOCK: u32 = 0xA1;
/// Duration of a block in timecode ticks.
pub const BLOCK_DURATION: u32 = 0x9B;
/// Timestamp offset to a referenced block.
pub const REFERENCE_BLOCK: u32 = 0xFB;

/// Sampling frequency in Hz.
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
/// Channel count.
pub const CHANNELS: u32 = 0x9F;
/// Bits per sample.
pub const BIT_DEPTH: u32 = 0x6264;
/// Pixel width.
pub const PIXEL_WIDTH: u32 = 0xB0;
/// Pixel height.
pub const PIXEL_HEIGHT: u32 = 0xBA;
/// Frames per second.
pub const FRAME_RATE: u32 = 0x2383E3;

/// Padding, valid anywhere.
pub const VOID: u32 = 0xEC;
/// Checksum, valid anywhere.
pub const CRC32: u32 = 0xBF;

/// The nesting depth at which a known element appears as a child.
///
/// Level 0 elements are siblings of the segment itself. Used to decide how
/// far an element read inside an unknown-size master has to bubble up.
pub fn level_of(id: u32) -> Option<usize> {
	match id {
		EBML_HEAD | SEGMENT => Some(0),
		INFO | TRACKS | CLUSTER | SEEK_HEAD | CUES | TAGS | CHAPTERS | ATTACHMENTS => Some(1),
		TIMECODE_SCALE | TRACK_ENTRY | CLUSTER_TIMECODE | BLOCK_GROUP | SIMPLE_BLOCK => Some(2),
		TRACK_NUMBER | TRACK_TYPE | CODEC_ID | CODEC_PRIVATE | TRACK_AUDIO | TRACK_VIDEO | BLOCK
		| BLOCK_DURATION | REFERENCE_BLOCK => Some(3),
		SAMPLING_FREQUENCY | CHANNELS | BIT_DEPTH | PIXEL_WIDTH | PIXEL_HEIGHT | FRAME_RATE => Some(4),
		_ => None,
	}
}
