use crate::ebml::EbmlError;

/// Failures surfaced to the caller.
///
/// Only fatal conditions end up here: either the container cannot be opened
/// at all, or a selected track cannot be bound to a packetizer. Recoverable
/// conditions (unknown elements, rejected tracks, malformed frames) are
/// logged at the point of detection and absorbed.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The stream does not start with an EBML head.
	#[error("no EBML head found")]
	MissingEbmlHead,

	/// The EBML head is not followed by a segment.
	#[error("no segment found")]
	MissingSegment,

	/// The segment ended before any cluster, so there is nothing to demux.
	#[error("no cluster found before end of stream")]
	NoCluster,

	/// A selected, usable track resolved to a format with no packetizer.
	#[error("no packetizer available for track {track}")]
	UnsupportedTrack { track: u32 },

	#[error("i/o error")]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Ebml(#[from] EbmlError),
}

pub type Result<T> = std::result::Result<T, Error>;
