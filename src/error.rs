//! Error types for the two fallible surfaces of the crate: construction-time
//! validation (fatal, per spec.md §7 `ValidationError`) and narrow codec
//! functions (non-fatal on the data path — callers fold these into counters
//! rather than letting them escape `Demuxer::demux`/`Muxer::tick`).

use thiserror::Error;

/// Fatal configuration errors raised only at `Muxer::new`.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ConfigError {
    /// A configured PID falls outside the custom range `16..=8190`.
    #[error("pid {0:#x} is outside the allowed custom range (0x0010..=0x1FFE)")]
    PidOutOfRange(u16),
    /// A reserved PID (DVB SI or ATSC PSIP) was assigned to a custom stream.
    #[error("pid {0:#x} is reserved and cannot be assigned to a custom stream")]
    ReservedPid(u16),
    /// Two settings fields that must be pairwise distinct collided.
    #[error("pid {0:#x} is used for more than one role")]
    PidCollision(u16),
    /// `psi_interval_ms`, `pcr_interval_ms`, or `max_queued_access_units` was non-positive.
    #[error("interval or capacity must be positive, got {0}")]
    NonPositiveInterval(i64),
}

/// Errors surfaced by individual codec functions (`PacketCodec`,
/// `PsiCodec`, `PesCodec`, `BitReader`). None of these ever propagate out
/// of `Demuxer::demux` — see spec.md §7.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum DecodeError {
    /// A read asked for more bytes than remained; carries the requested length.
    #[error("packet overrun reading {0} byte(s)")]
    PacketOverrun(usize),
    /// The first byte of a packet was not the `0x47` sync byte.
    #[error("lost sync: expected 0x47 sync byte")]
    LostSync,
    /// `adaptation_field_length` was inconsistent with the packet size.
    #[error("adaptation field header is internally inconsistent")]
    BadAdaptationField,
    /// A PSI section's `section_length` or syntax flags were invalid.
    #[error("psi section header is internally inconsistent")]
    BadPsiHeader,
    /// A PES header's optional-field lengths were internally inconsistent.
    #[error("pes header is internally inconsistent")]
    BadPesHeader,
    /// The trailing CRC-32/MPEG-2 of a PSI section did not match its body.
    #[error("psi section crc mismatch")]
    CrcMismatch,
    /// A structure was shorter than its own declared length.
    #[error("truncated input")]
    Truncated,
}
