//! Header parsing: everything before the first cluster.
//!
//! This walks the EBML head, the segment information and the track
//! definitions, then stops on the first cluster header so demuxing proper
//! can start from there. Track validation happens afterwards against the
//! embedded legacy format structures.

use std::io::{Read, Seek};

use anyhow::{bail, ensure, Context};
use tracing::{debug, warn};

use super::cursor::ElementCursor;
use super::track::{Track, TrackKind, TrackTable};
use crate::ebml::{ids, ElementHeader};
use crate::error::{Error, Result};
use crate::packetizer::{TAG_AC3, TAG_MP3, TAG_PCM, TAG_VORBIS};

/// Nanoseconds per timecode tick when the segment does not say.
pub const DEFAULT_TIMECODE_SCALE: u64 = 1_000_000;

/// Codec identifier for video wrapped in a legacy bitmap header.
const CODEC_VFW_FOURCC: &str = "V_MS/VFW/FOURCC";
/// Codec identifier for audio wrapped in a legacy wave header.
const CODEC_MS_ACM: &str = "A_MS/ACM";
const CODEC_MP3: &str = "A_MPEGLAYER3";
const CODEC_AC3: &str = "A_DOL_AC3";
const CODEC_PCM: &str = "A_PCM16IN";
const CODEC_VORBIS: &str = "A_VORBIS";

/// What header parsing yields: the timing base and the cluster it stopped
/// on, still unentered.
pub(crate) struct Headers {
	pub timecode_scale: u64,
	pub first_cluster: ElementHeader,
}

/// Parse everything up to and excluding the first cluster.
///
/// On success the cursor is inside the segment scope with `first_cluster`
/// read but not entered.
pub(crate) fn read_headers<R: Read + Seek>(
	cursor: &mut ElementCursor<R>,
	tracks: &mut TrackTable,
) -> Result<Headers> {
	let head = cursor.next_child()?.ok_or(Error::MissingEbmlHead)?;
	if head.id != ids::EBML_HEAD {
		return Err(Error::MissingEbmlHead);
	}
	cursor.stream().skip(&head)?;

	let segment = cursor.next_child()?.ok_or(Error::MissingSegment)?;
	if segment.id != ids::SEGMENT {
		return Err(Error::MissingSegment);
	}
	cursor.enter(&segment);

	let mut timecode_scale = DEFAULT_TIMECODE_SCALE;

	loop {
		let Some(child) = cursor.next_child()? else {
			return Err(Error::NoCluster);
		};

		match child.id {
			ids::INFO => timecode_scale = read_info(cursor, &child)?,
			ids::TRACKS => read_tracks(cursor, &child, tracks)?,
			ids::CLUSTER => {
				debug!(timecode_scale, tracks = tracks.len(), "headers parsed");
				return Ok(Headers {
					timecode_scale,
					first_cluster: child,
				});
			}
			ids::SEEK_HEAD | ids::CUES | ids::TAGS | ids::CHAPTERS | ids::ATTACHMENTS
			| ids::VOID | ids::CRC32 => cursor.skip(&child)?,
			other => {
				debug!(id = format_args!("{other:#x}"), "skipping unknown element");
				cursor.skip(&child)?;
			}
		}
	}
}

fn read_info<R: Read + Seek>(
	cursor: &mut ElementCursor<R>,
	info: &ElementHeader,
) -> Result<u64> {
	let mut timecode_scale = DEFAULT_TIMECODE_SCALE;

	cursor.enter(info);
	while let Some(child) = cursor.next_child()? {
		match child.id {
			ids::TIMECODE_SCALE => {
				let value = cursor.stream().read_uint(&child)?;
				if value == 0 {
					warn!("ignoring zero timecode scale");
				} else {
					timecode_scale = value;
				}
			}
			_ => cursor.skip(&child)?,
		}
	}
	cursor.exit()?;

	Ok(timecode_scale)
}

fn read_tracks<R: Read + Seek>(
	cursor: &mut ElementCursor<R>,
	container: &ElementHeader,
	tracks: &mut TrackTable,
) -> Result<()> {
	cursor.enter(container);
	while let Some(child) = cursor.next_child()? {
		match child.id {
			ids::TRACK_ENTRY => read_track_entry(cursor, &child, tracks)?,
			_ => cursor.skip(&child)?,
		}
	}
	cursor.exit()?;

	Ok(())
}

fn read_track_entry<R: Read + Seek>(
	cursor: &mut ElementCursor<R>,
	entry: &ElementHeader,
	tracks: &mut TrackTable,
) -> Result<()> {
	let track = tracks.allocate();

	cursor.enter(entry);
	while let Some(child) = cursor.next_child()? {
		match child.id {
			ids::TRACK_NUMBER => track.number = cursor.stream().read_uint(&child)? as u32,
			ids::TRACK_TYPE => {
				track.kind = TrackKind::from(cursor.stream().read_uint(&child)? as u8)
			}
			ids::CODEC_ID => track.codec_id = Some(cursor.stream().read_string(&child)?),
			ids::CODEC_PRIVATE => track.private_data = Some(cursor.stream().read_binary(&child)?),
			ids::TRACK_VIDEO => read_video_settings(cursor, &child, track)?,
			ids::TRACK_AUDIO => read_audio_settings(cursor, &child, track)?,
			_ => cursor.skip(&child)?,
		}
	}
	cursor.exit()?;

	debug!(
		track = track.number,
		kind = ?track.kind,
		codec = track.codec_id.as_deref().unwrap_or("?"),
		"found track"
	);

	Ok(())
}

fn read_video_settings<R: Read + Seek>(
	cursor: &mut ElementCursor<R>,
	settings: &ElementHeader,
	track: &mut Track,
) -> Result<()> {
	cursor.enter(settings);
	while let Some(child) = cursor.next_child()? {
		match child.id {
			ids::PIXEL_WIDTH => track.pixel_width = cursor.stream().read_uint(&child)? as u32,
			ids::PIXEL_HEIGHT => track.pixel_height = cursor.stream().read_uint(&child)? as u32,
			ids::FRAME_RATE => track.frame_rate = cursor.stream().read_float(&child)?,
			_ => cursor.skip(&child)?,
		}
	}
	cursor.exit()?;

	Ok(())
}

fn read_audio_settings<R: Read + Seek>(
	cursor: &mut ElementCursor<R>,
	settings: &ElementHeader,
	track: &mut Track,
) -> Result<()> {
	cursor.enter(settings);
	while let Some(child) = cursor.next_child()? {
		match child.id {
			ids::SAMPLING_FREQUENCY => track.sample_rate = cursor.stream().read_float(&child)?,
			ids::CHANNELS => track.channels = cursor.stream().read_uint(&child)? as u32,
			ids::BIT_DEPTH => track.bits_per_sample = cursor.stream().read_uint(&child)? as u32,
			_ => cursor.skip(&child)?,
		}
	}
	cursor.exit()?;

	Ok(())
}

/// Decide usability for every discovered track.
///
/// Validation never fails the open: a track that cannot be verified is
/// demoted with a diagnostic and its frames are dropped later.
pub(crate) fn verify_tracks(tracks: &mut TrackTable) {
	for index in 0..tracks.len() {
		let number = match tracks.get(index) {
			Some(track) => track.number,
			None => continue,
		};

		if tracks.find_by_number(number, Some(index)).is_some() {
			warn!(track = number, "duplicate track number, keeping both entries");
		}

		let Some(track) = tracks.get_mut(index) else {
			continue;
		};

		let verdict = match track.kind {
			TrackKind::Video => verify_video(track),
			TrackKind::Audio => verify_audio(track),
			TrackKind::Subtitle => verify_subtitle(track),
			TrackKind::Unknown(raw) => Err(anyhow::anyhow!("unknown track type {raw:#x}")),
		};

		match verdict {
			Ok(()) => track.usable = true,
			Err(e) => {
				track.usable = false;
				warn!(track = number, error = format_args!("{e:#}"), "track is not usable");
			}
		}
	}
}

fn verify_video(track: &mut Track) -> anyhow::Result<()> {
	match track.codec_id.as_deref() {
		Some(CODEC_VFW_FOURCC) => {
			let private = track.private_data.as_ref().context("missing codec private data")?;
			let bih = parse_bitmap_info_header(private)?;
			track.ms_compat = true;
			track.four_cc = bih.compression;
			reconcile_u32(&mut track.pixel_width, bih.width, track.number, "pixel width");
			reconcile_u32(&mut track.pixel_height, bih.height, track.number, "pixel height");
		}
		Some(other) => bail!("unsupported video codec {other}"),
		None => bail!("missing codec id"),
	}

	ensure!(
		track.pixel_width != 0 && track.pixel_height != 0,
		"display dimensions not set"
	);
	ensure!(track.frame_rate > 0.0, "frame rate not set");

	Ok(())
}

fn verify_audio(track: &mut Track) -> anyhow::Result<()> {
	match track.codec_id.as_deref() {
		Some(CODEC_MS_ACM) => {
			let private = track.private_data.as_ref().context("missing codec private data")?;
			let wfe = parse_wave_format(private)?;
			track.ms_compat = true;
			track.format_tag = wfe.format_tag as u32;

			if track.sample_rate == 0.0 {
				track.sample_rate = wfe.samples_per_sec as f64;
			} else if track.sample_rate != wfe.samples_per_sec as f64 {
				warn!(
					track = track.number,
					declared = track.sample_rate,
					embedded = wfe.samples_per_sec,
					"sample rate mismatch, keeping the declared value"
				);
			}
			reconcile_u32(&mut track.channels, wfe.channels as u32, track.number, "channel count");
			reconcile_u32(
				&mut track.bits_per_sample,
				wfe.bits_per_sample as u32,
				track.number,
				"bit depth",
			);
		}
		Some(CODEC_MP3) => track.format_tag = TAG_MP3,
		Some(CODEC_AC3) => track.format_tag = TAG_AC3,
		Some(CODEC_PCM) => track.format_tag = TAG_PCM,
		Some(CODEC_VORBIS) => {
			let private = track.private_data.as_ref().context("missing codec private data")?;
			track.vorbis_headers = Some(parse_vorbis_headers(private)?);
			track.format_tag = TAG_VORBIS;
		}
		Some(other) => bail!("unsupported audio codec {other}"),
		None => bail!("missing codec id"),
	}

	ensure!(track.sample_rate > 0.0, "sampling frequency not set");
	ensure!(track.channels != 0, "channel count not set");
	ensure!(track.format_tag != 0, "no format tag resolved");
	if track.format_tag == TAG_PCM {
		ensure!(track.bits_per_sample != 0, "bit depth not set");
	}

	Ok(())
}

fn verify_subtitle(track: &mut Track) -> anyhow::Result<()> {
	ensure!(track.codec_id.is_some(), "missing codec id");
	Ok(())
}

/// Fill an unset field from the embedded structure, or warn on a mismatch
/// and keep the declared value.
fn reconcile_u32(declared: &mut u32, embedded: u32, track: u32, what: &str) {
	if *declared == 0 {
		*declared = embedded;
	} else if *declared != embedded && embedded != 0 {
		warn!(track, declared, embedded, "{what} mismatch, keeping the declared value");
	}
}

struct BitmapInfo {
	width: u32,
	height: u32,
	compression: [u8; 4],
}

/// The fixed prefix of a legacy BITMAPINFOHEADER, little-endian.
fn parse_bitmap_info_header(data: &[u8]) -> anyhow::Result<BitmapInfo> {
	ensure!(data.len() >= 40, "codec private data too short for a bitmap header");

	let width = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
	let height = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
	let compression = [data[16], data[17], data[18], data[19]];

	Ok(BitmapInfo {
		width,
		height,
		compression,
	})
}

struct WaveFormat {
	format_tag: u16,
	channels: u16,
	samples_per_sec: u32,
	bits_per_sample: u16,
}

/// The fixed prefix of a legacy WAVEFORMATEX, little-endian.
fn parse_wave_format(data: &[u8]) -> anyhow::Result<WaveFormat> {
	ensure!(data.len() >= 18, "codec private data too short for a wave header");

	Ok(WaveFormat {
		format_tag: u16::from_le_bytes([data[0], data[1]]),
		channels: u16::from_le_bytes([data[2], data[3]]),
		samples_per_sec: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
		bits_per_sample: u16::from_le_bytes([data[14], data[15]]),
	})
}

/// Locate the three Vorbis header packets inside codec private data.
///
/// The layout is the marker byte 3, then the first two packets each
/// prefixed by a 255-run encoded length, then the third packet running to
/// the end of the blob.
fn parse_vorbis_headers(data: &[u8]) -> anyhow::Result<[(usize, usize); 3]> {
	ensure!(!data.is_empty(), "empty codec private data");
	ensure!(data[0] == 3, "expected the header marker 3, got {}", data[0]);

	let mut offset = 1;
	let mut spans = [(0usize, 0usize); 2];
	for span in &mut spans {
		let mut length = 0usize;
		loop {
			let byte = *data.get(offset).context("truncated header length")?;
			offset += 1;
			length += byte as usize;
			if byte != 255 {
				break;
			}
		}
		let end = offset.checked_add(length).context("header length overflow")?;
		ensure!(end <= data.len(), "header packet overruns the private data");
		*span = (offset, length);
		offset = end;
	}

	Ok([spans[0], spans[1], (offset, data.len() - offset)])
}
