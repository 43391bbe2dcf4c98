//! A pull-based demuxer for EBML-framed media containers.
//!
//! The container is a tree of ID/length-prefixed elements. [`probe`] checks
//! the signature, [`MkvReader::open`] parses the headers and binds a
//! packetizer to every selected usable track, and from there the caller
//! alternates [`MkvReader::read`] with [`MkvReader::next_packet`] to pull
//! demuxed packets in global timestamp order.
//!
//! Everything is synchronous and single-threaded; the only requirement on
//! the input is [`std::io::Read`] + [`std::io::Seek`].

mod error;

pub mod demux;
pub mod ebml;
pub mod packetizer;

pub use demux::{probe, MkvReader, ReadStatus, Track, TrackKind, TrackSelection};
pub use error::{Error, Result};
pub use packetizer::{Packet, Packetizer};
