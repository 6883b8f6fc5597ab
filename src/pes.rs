//! PES (Packetized Elementary Stream) layer: encodes one [`AccessUnit`]
//! into a PES packet, and parses a PES header from the start of a PES
//! payload. Grounded on the teacher's `pes.rs` (`PESHeader`/
//! `PESOptionalHeader` bitfields and the 33-bit timestamp unpacking in
//! `lib.rs::parse_timestamp`), generalized with the write direction the
//! teacher only sketches.

use crate::bit_reader::BitReader;
use crate::descriptor::{Descriptor, StreamType};
use crate::error::DecodeError;
use modular_bitfield_msb::prelude::*;

/// 90 kHz, the MPEG-TS wire timescale for PTS/DTS and PCR base.
pub const MPEGTS_TIMESCALE: u64 = 90_000;

/// Fixed 6-byte PES packet header.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct PesHeader {
    pub packet_start_code_prefix: B24,
    pub stream_id: B8,
    pub pes_packet_length: B16,
}

/// Optional 3-byte PES header extension (present whenever `stream_id`
/// isn't one of the stream IDs that carry no optional header, e.g.
/// `program_stream_map`).
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct PesOptionalHeader {
    pub marker_bits: B2,
    pub scrambling_control: B2,
    pub priority: bool,
    pub data_alignment_indicator: bool,
    pub copyright: bool,
    pub original_or_copy: bool,
    pub pts_dts_flags: B2,
    pub escr_flag: bool,
    pub es_rate_flag: bool,
    pub dsm_trick_mode_flag: bool,
    pub additional_copy_info_flag: bool,
    pub crc_flag: bool,
    pub extension_flag: bool,
    pub pes_header_data_length: B8,
}

const PTS_DTS_NONE: u8 = 0b00;
const PTS_DTS_ONLY: u8 = 0b10;
const PTS_DTS_BOTH: u8 = 0b11;

/// stream_id for video access units (H.264/H.265).
pub const STREAM_ID_VIDEO: u8 = 0xE0;
/// stream_id for most audio access units (MPEG/AC-3/E-AC-3/AAC).
pub const STREAM_ID_AUDIO: u8 = 0xC0;
/// stream_id for `private_stream_1`, used for SCTE-35 and other non-A/V data.
pub const STREAM_ID_PRIVATE_STREAM_1: u8 = 0xFC;

/// Chooses the PES `stream_id` for a resolved elementary stream type.
pub fn stream_id_for(stream_type: StreamType) -> u8 {
    match stream_type {
        StreamType::H264 | StreamType::H265 => STREAM_ID_VIDEO,
        StreamType::Mpeg1Audio
        | StreamType::Mpeg2Audio
        | StreamType::Ac3
        | StreamType::EnhancedAc3
        | StreamType::Ac4
        | StreamType::AacAdts
        | StreamType::AacLatm => STREAM_ID_AUDIO,
        StreamType::Scte35 => STREAM_ID_PRIVATE_STREAM_1,
        StreamType::Teletext | StreamType::Subtitling | StreamType::Unknown(_) => {
            STREAM_ID_PRIVATE_STREAM_1
        }
    }
}

/// A codec-level frame or audio sample set, carried inside one PES packet.
///
/// Times are in a host timescale of the application's choice; wire
/// serialization converts to the 90 kHz MPEG-TS timescale via an `epoch`
/// and `host_timescale` supplied by the caller (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub pid: u16,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub is_discontinuous: bool,
    pub is_random_access_point: bool,
    pub stream_type: StreamType,
    pub descriptors: Vec<Descriptor>,
    pub payload: Vec<u8>,
}

fn encode_timestamp(ts: u64, leading_nibble: u8) -> [u8; 5] {
    let ts = ts & 0x1_FFFF_FFFF;
    [
        (leading_nibble << 4) | (((ts >> 30) & 0x7) as u8) << 1 | 1,
        ((ts >> 22) & 0xFF) as u8,
        (((ts >> 15) & 0x7F) as u8) << 1 | 1,
        ((ts >> 7) & 0xFF) as u8,
        ((ts & 0x7F) as u8) << 1 | 1,
    ]
}

fn decode_timestamp(bytes: &[u8; 5]) -> u64 {
    let mut ts: u64 = ((bytes[0] & 0x0E) as u64) << 29;
    ts |= (bytes[1] as u64) << 22;
    ts |= ((bytes[2] & 0xFE) as u64) << 14;
    ts |= (bytes[3] as u64) << 7;
    ts |= ((bytes[4] & 0xFE) as u64) >> 1;
    ts
}

/// Converts a host-timescale timestamp to the 90 kHz wire timescale,
/// flooring toward zero, per spec.md §4.4.
pub fn to_wire_timestamp(ts: i64, epoch: Option<i64>, host_timescale: u64) -> u64 {
    let relative = ts - epoch.unwrap_or(0);
    ((relative as i128 * MPEGTS_TIMESCALE as i128) / host_timescale as i128).max(0) as u64
}

/// Encodes and decodes PES packets.
pub struct PesCodec;

/// Result of decoding a PES header: the recovered timestamps and the byte
/// offset at which elementary-stream payload begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeaderInfo {
    pub stream_id: u8,
    pub pes_packet_length: u16,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    pub payload_offset: usize,
}

impl PesCodec {
    /// Encodes one access unit into a complete PES packet (header +
    /// optional header + payload). `pes_packet_length` is 0 for video
    /// (unbounded) and the exact remaining length otherwise.
    pub fn encode(au: &AccessUnit, epoch: Option<i64>, host_timescale: u64) -> Vec<u8> {
        let stream_id = stream_id_for(au.stream_type);
        let is_video = matches!(au.stream_type, StreamType::H264 | StreamType::H265);

        let pts_wire = au.pts.map(|t| to_wire_timestamp(t, epoch, host_timescale));
        let dts_wire = au.dts.map(|t| to_wire_timestamp(t, epoch, host_timescale));

        let (pts_dts_flags, ts_bytes): (u8, Vec<u8>) = match (pts_wire, dts_wire) {
            (Some(pts), Some(dts)) => {
                let mut bytes = Vec::with_capacity(10);
                bytes.extend_from_slice(&encode_timestamp(pts, 0b0011));
                bytes.extend_from_slice(&encode_timestamp(dts, 0b0001));
                (PTS_DTS_BOTH, bytes)
            }
            (Some(pts), None) => (PTS_DTS_ONLY, encode_timestamp(pts, 0b0010).to_vec()),
            _ => (PTS_DTS_NONE, Vec::new()),
        };

        let optional_header = PesOptionalHeader::new()
            .with_marker_bits(0b10)
            .with_scrambling_control(0)
            .with_priority(false)
            .with_data_alignment_indicator(true)
            .with_copyright(false)
            .with_original_or_copy(true)
            .with_pts_dts_flags(pts_dts_flags)
            .with_escr_flag(false)
            .with_es_rate_flag(false)
            .with_dsm_trick_mode_flag(false)
            .with_additional_copy_info_flag(false)
            .with_crc_flag(false)
            .with_extension_flag(false)
            .with_pes_header_data_length(ts_bytes.len() as u8);

        let packet_length_body = 3 + ts_bytes.len() + au.payload.len();
        let pes_packet_length = if is_video {
            0
        } else {
            packet_length_body.min(0xFFFF) as u16
        };

        let header = PesHeader::new()
            .with_packet_start_code_prefix(0x000001)
            .with_stream_id(stream_id)
            .with_pes_packet_length(pes_packet_length);

        let mut out = Vec::with_capacity(6 + 3 + ts_bytes.len() + au.payload.len());
        out.extend_from_slice(&header.into_bytes());
        out.extend_from_slice(&optional_header.into_bytes());
        out.extend_from_slice(&ts_bytes);
        out.extend_from_slice(&au.payload);
        out
    }

    /// Parses a PES header from the start of `data`. Does not copy the
    /// elementary-stream payload; callers slice it from `payload_offset`.
    pub fn decode_header(data: &[u8]) -> Result<PesHeaderInfo, DecodeError> {
        let mut reader = BitReader::new(data);
        let header_bytes = reader.read_bytes(6)?;
        let mut header_arr = [0u8; 6];
        header_arr.copy_from_slice(header_bytes);
        let header = PesHeader::from_bytes(header_arr);
        if header.packet_start_code_prefix() != 0x000001 {
            return Err(DecodeError::BadPesHeader);
        }

        let stream_id = header.stream_id();
        // program_stream_map / padding_stream / private_stream_2 /
        // ECM / EMM / program_stream_directory / DSMCC / type E carry no
        // optional header, per H.222.0 Table 2-21.
        let has_optional_header = !matches!(stream_id, 0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xFF);

        if !has_optional_header {
            return Ok(PesHeaderInfo {
                stream_id,
                pes_packet_length: header.pes_packet_length(),
                pts: None,
                dts: None,
                payload_offset: 6,
            });
        }

        let optional_bytes = reader.read_bytes(3)?;
        let mut optional_arr = [0u8; 3];
        optional_arr.copy_from_slice(optional_bytes);
        let optional = PesOptionalHeader::from_bytes(optional_arr);
        let extra_len = optional.pes_header_data_length() as usize;
        let mut extra_reader = reader.sub_reader(extra_len)?;

        let mut pts = None;
        let mut dts = None;
        match optional.pts_dts_flags() {
            PTS_DTS_ONLY => {
                let bytes = extra_reader.read_bytes(5)?;
                let mut arr = [0u8; 5];
                arr.copy_from_slice(bytes);
                pts = Some(decode_timestamp(&arr));
            }
            PTS_DTS_BOTH => {
                let pts_bytes = extra_reader.read_bytes(5)?;
                let mut pts_arr = [0u8; 5];
                pts_arr.copy_from_slice(pts_bytes);
                pts = Some(decode_timestamp(&pts_arr));
                let dts_bytes = extra_reader.read_bytes(5)?;
                let mut dts_arr = [0u8; 5];
                dts_arr.copy_from_slice(dts_bytes);
                dts = Some(decode_timestamp(&dts_arr));
            }
            _ => {}
        }

        Ok(PesHeaderInfo {
            stream_id,
            pes_packet_length: header.pes_packet_length(),
            pts,
            dts,
            payload_offset: 6 + 3 + extra_len,
        })
    }
}
