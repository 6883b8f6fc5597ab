//! Bidirectional MPEG-2 Transport Stream multiplex engine: packet framing,
//! PSI section assembly and serialization (PAT/PMT/SDT/VCT), PES
//! reassembly and authoring, a CBR/VBR muxer scheduling core, and a
//! TR 101 290 first-priority conformance analyzer.
//!
//! # Usage
//! Simply add this crate as a dependency in your `Cargo.toml`.
//!
//! ```toml
//! [dependencies]
//! ts-mux-engine = "0.1"
//! ```
//!
//! Demuxing drives a [`Demuxer`] with arbitrary byte chunks; muxing drives
//! a [`Muxer`] with queued [`AccessUnit`]s and periodic `tick` calls. Both
//! are single-threaded, synchronous, and free of internal I/O: callers own
//! scheduling and supply all timestamps.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod analyzer;
mod bit_reader;
mod continuity;
mod crc;
mod demux;
mod descriptor;
mod error;
mod es_builder;
mod mux;
mod packet;
mod pes;
mod psi;
mod sync;

pub use analyzer::{Context as AnalyzerContext, Tr101290Analyzer, Tr101290Counters};
pub use bit_reader::BitReader;
pub use continuity::{ContinuityResult, ContinuityTracker};
pub use crc::Crc32Mpeg;
pub use demux::{Demuxer, DemuxerCallbacks};
pub use descriptor::{classify, resolve_stream_type, Descriptor, KnownDescriptor, StreamType};
pub use error::{ConfigError, DecodeError};
pub use es_builder::{ElementaryStreamBuilder, EsBuilderStats};
pub use mux::{Muxer, MuxerCallbacks, MuxerSettings};
pub use packet::{
    AdaptationField, AdaptationFieldControl, Packet, PacketCodec, PacketHeader, Pcr,
    TransportScramblingControl, NULL_PID, PACKET_LEN, PACKET_LEN_RS, SYNC_BYTE,
};
pub use pes::{AccessUnit, PesCodec, PesHeaderInfo, MPEGTS_TIMESCALE};
pub use psi::{
    decode_section, table_id, ElementaryStreamInfo, Pat, PatEntry, Pmt, PsiTable, Sdt,
    SdtService, Section, SectionAssembler, SiMode, Vct, VctChannel, ATSC_PSIP_PID, CAT_PID,
    PAT_PID, SDT_PID,
};
pub use sync::{SyncState, SyncTracker, SyncTransition};
