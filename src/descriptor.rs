//! Descriptor tag/length/value triples, and the tag dispatch used to
//! resolve a PMT's raw `stream_type` into a concrete codec/service kind.
//!
//! Per spec.md §1, descriptor *content* is out of scope beyond what's
//! needed to drive stream-type resolution — descriptors are opaque
//! tag/length/value triples except for the handful of tags spec.md §6
//! names. This mirrors the original's `TSDescriptor` base type with one
//! concrete subclass per named descriptor family (§9 "dispatch by
//! descriptor tag"), modeled here as a tagged `enum` rather than a class
//! hierarchy.

use crate::bit_reader::BitReader;
use crate::error::DecodeError;
use smallvec::SmallVec;

/// Registration descriptor tag.
pub const TAG_REGISTRATION: u8 = 0x05;
/// ISO-639 language descriptor tag.
pub const TAG_ISO_639_LANGUAGE: u8 = 0x0A;
/// AC-3 descriptor tag.
pub const TAG_AC3: u8 = 0x6A;
/// Enhanced AC-3 descriptor tag.
pub const TAG_ENHANCED_AC3: u8 = 0x7A;
/// AAC descriptor tag.
pub const TAG_AAC: u8 = 0x7C;
/// Teletext descriptor tag.
pub const TAG_TELETEXT: u8 = 0x56;
/// Subtitling descriptor tag.
pub const TAG_SUBTITLING: u8 = 0x59;
/// Extension descriptor tag (holds a nested extension tag byte).
pub const TAG_EXTENSION: u8 = 0x7F;
/// Extension tag value identifying AC-4 within a [`TAG_EXTENSION`] descriptor.
pub const EXT_TAG_AC4: u8 = 0x15;
/// HEVC video descriptor tag.
pub const TAG_HEVC: u8 = 0x38;
/// Component descriptor tag.
pub const TAG_COMPONENT: u8 = 0x50;
/// SCTE-35 cue identifier descriptor tag.
pub const TAG_SCTE35_CUE_IDENTIFIER: u8 = 0x8A;

/// One raw descriptor: a tag byte, a length byte, and `length` bytes of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: SmallVec<[u8; 8]>,
}

impl Descriptor {
    /// Parses one descriptor from the front of `reader`.
    pub fn parse(reader: &mut BitReader) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        let len = reader.read_u8()? as usize;
        let mut data = SmallVec::<[u8; 8]>::new();
        data.extend_from_slice(reader.read_bytes(len)?);
        Ok(Self { tag, data })
    }

    /// Parses every descriptor remaining in `reader` until it is exhausted.
    pub fn parse_all(reader: &mut BitReader) -> Result<Vec<Descriptor>, DecodeError> {
        let mut out = Vec::new();
        while reader.remaining_bytes() > 0 {
            out.push(Descriptor::parse(reader)?);
        }
        Ok(out)
    }

    /// Serialized length including the tag/length header.
    pub fn encoded_len(&self) -> usize {
        2 + self.data.len()
    }

    /// Appends this descriptor's tag/length/value encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.tag);
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
    }
}

/// Classification of a descriptor used to drive stream-type resolution.
/// Every tag not named here remains `Opaque`, carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnownDescriptor<'a> {
    Registration(&'a Descriptor),
    IsoLanguage(&'a Descriptor),
    Ac3(&'a Descriptor),
    EnhancedAc3(&'a Descriptor),
    Aac(&'a Descriptor),
    Teletext(&'a Descriptor),
    Subtitling(&'a Descriptor),
    Ac4(&'a Descriptor),
    Hevc(&'a Descriptor),
    Component(&'a Descriptor),
    Scte35CueIdentifier(&'a Descriptor),
    Opaque(&'a Descriptor),
}

/// Classifies a single descriptor by tag (and, for the extension tag, by
/// its nested extension-tag byte).
pub fn classify(d: &Descriptor) -> KnownDescriptor<'_> {
    match d.tag {
        TAG_REGISTRATION => KnownDescriptor::Registration(d),
        TAG_ISO_639_LANGUAGE => KnownDescriptor::IsoLanguage(d),
        TAG_AC3 => KnownDescriptor::Ac3(d),
        TAG_ENHANCED_AC3 => KnownDescriptor::EnhancedAc3(d),
        TAG_AAC => KnownDescriptor::Aac(d),
        TAG_TELETEXT => KnownDescriptor::Teletext(d),
        TAG_SUBTITLING => KnownDescriptor::Subtitling(d),
        TAG_EXTENSION if d.data.first() == Some(&EXT_TAG_AC4) => KnownDescriptor::Ac4(d),
        TAG_HEVC => KnownDescriptor::Hevc(d),
        TAG_COMPONENT => KnownDescriptor::Component(d),
        TAG_SCTE35_CUE_IDENTIFIER => KnownDescriptor::Scte35CueIdentifier(d),
        _ => KnownDescriptor::Opaque(d),
    }
}

/// Resolved elementary stream type, per the spec.md §6 stream-type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Mpeg1Audio,
    Mpeg2Audio,
    Ac3,
    EnhancedAc3,
    Ac4,
    Teletext,
    Subtitling,
    Scte35,
    AacAdts,
    AacLatm,
    H264,
    H265,
    Unknown(u8),
}

/// Resolves a PMT entry's raw `stream_type` byte into a [`StreamType`],
/// dispatching on the entry's descriptors for the ambiguous `0x06`
/// (private, DVB-tagged) and ATSC-specific `0x81`/`0x86`/`0x87` cases.
pub fn resolve_stream_type(raw: u8, descriptors: &[Descriptor]) -> StreamType {
    match raw {
        0x03 => StreamType::Mpeg1Audio,
        0x04 => StreamType::Mpeg2Audio,
        0x06 => descriptors
            .iter()
            .map(classify)
            .find_map(|k| match k {
                KnownDescriptor::Ac3(_) => Some(StreamType::Ac3),
                KnownDescriptor::EnhancedAc3(_) => Some(StreamType::EnhancedAc3),
                KnownDescriptor::Ac4(_) => Some(StreamType::Ac4),
                KnownDescriptor::Teletext(_) => Some(StreamType::Teletext),
                KnownDescriptor::Subtitling(_) => Some(StreamType::Subtitling),
                KnownDescriptor::Scte35CueIdentifier(_) => Some(StreamType::Scte35),
                _ => None,
            })
            .unwrap_or(StreamType::Unknown(raw)),
        0x0F => StreamType::AacAdts,
        0x11 => StreamType::AacLatm,
        0x1B => StreamType::H264,
        0x24 => StreamType::H265,
        0x81 => StreamType::Ac3,
        0x86 => StreamType::Scte35,
        0x87 => StreamType::EnhancedAc3,
        other => StreamType::Unknown(other),
    }
}
