//! 188-byte TS packet framing: header, adaptation field, PCR, and the
//! encode/decode/packetize operations that sit directly on top of them.
//!
//! Bitfield layouts follow the teacher crate's approach of declaring the
//! packet header and adaptation field header as `modular_bitfield_msb`
//! structs rather than hand-rolling shift/mask code; this crate adds the
//! `into_bytes()` direction the teacher only sketches ("eventually") so
//! that `PacketCodec::encode` can round-trip through the same types.

use crate::bit_reader::BitReader;
use crate::error::DecodeError;
use modular_bitfield_msb::prelude::*;

/// Size of a standard TS packet.
pub const PACKET_LEN: usize = 188;
/// Size of the Reed-Solomon-protected TS packet variant; the trailing 16
/// bytes of parity are stripped before decoding and never produced on encode.
pub const PACKET_LEN_RS: usize = 204;
/// Sync byte required at the start of every TS packet.
pub const SYNC_BYTE: u8 = 0x47;
/// PID reserved for null (stuffing) packets.
pub const NULL_PID: u16 = 0x1FFF;

/// TSC information used in a packet's payload.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum TransportScramblingControl {
    /// Not scrambled.
    NotScrambled,
    /// Reserved; must not be produced by this crate.
    Reserved,
    /// Scrambled with the even key.
    ScrambledEvenKey,
    /// Scrambled with the odd key.
    ScrambledOddKey,
}

/// `adaptation_field_control` values.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum AdaptationFieldControl {
    /// Reserved; never produced.
    Reserved,
    /// Payload only, no adaptation field.
    PayloadOnly,
    /// Adaptation field only, no payload.
    AdaptationOnly,
    /// Both adaptation field and payload.
    Both,
}

/// Link-layer header found at the start of every TS packet.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sync_byte: B8,
    pub transport_error_indicator: bool,
    pub payload_unit_start_indicator: bool,
    pub transport_priority: bool,
    pub pid: B13,
    pub transport_scrambling_control: TransportScramblingControl,
    pub adaptation_field_control: AdaptationFieldControl,
    pub continuity_counter: B4,
}

/// Flags preamble of an [`AdaptationField`].
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptationFieldHeader {
    pub length: B8,
    pub discontinuity_indicator: bool,
    pub random_access_indicator: bool,
    pub elementary_stream_priority_indicator: bool,
    pub pcr_flag: bool,
    pub opcr_flag: bool,
    pub splicing_point_flag: bool,
    pub transport_private_data_flag: bool,
    pub adaptation_field_extension_flag: bool,
}

/// Program Clock Reference: a 90 kHz base plus a 27 MHz extension modulo 300.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Pcr {
    /// 33-bit count of 90 kHz ticks.
    pub base: u64,
    /// 9-bit count of 27 MHz ticks, 0..=299.
    pub extension: u16,
}

impl Pcr {
    /// Wraparound point of `base`: 2^33 ticks at 90 kHz.
    pub const BASE_WRAP: u64 = 1 << 33;

    /// Builds a `Pcr` from a full 27 MHz tick count.
    pub fn from_27mhz(ticks: u64) -> Self {
        Self {
            base: (ticks / 300) % Self::BASE_WRAP,
            extension: (ticks % 300) as u16,
        }
    }

    /// Full 27 MHz tick value: `base * 300 + extension`.
    pub fn to_27mhz(self) -> u64 {
        self.base * 300 + self.extension as u64
    }

    fn decode(bytes: &[u8; 6]) -> Self {
        let mut base = (bytes[0] as u64) << 25;
        base |= (bytes[1] as u64) << 17;
        base |= (bytes[2] as u64) << 9;
        base |= (bytes[3] as u64) << 1;
        base |= (bytes[4] as u64) >> 7;
        let mut extension = ((bytes[4] & 0x1) as u16) << 8;
        extension |= bytes[5] as u16;
        Self { base, extension }
    }

    fn encode(self) -> [u8; 6] {
        let base = self.base & (Self::BASE_WRAP - 1);
        let mut out = [0u8; 6];
        out[0] = (base >> 25) as u8;
        out[1] = (base >> 17) as u8;
        out[2] = (base >> 9) as u8;
        out[3] = (base >> 1) as u8;
        out[4] = (((base & 0x1) as u8) << 7) | 0x7E | ((self.extension >> 8) as u8 & 0x1);
        out[5] = self.extension as u8;
        out
    }
}

/// Optional per-packet preamble carrying PCR and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationField {
    pub header: AdaptationFieldHeader,
    pub pcr: Option<Pcr>,
    pub opcr: Option<Pcr>,
    /// Bytes of stuffing (`0xFF`) appended to pad the adaptation field.
    pub stuffing_len: usize,
}

impl AdaptationField {
    fn decode(reader: &mut BitReader) -> Result<Self, DecodeError> {
        let header_byte = reader.read_u8()?;
        let length = header_byte as usize;
        if length == 0 {
            return Ok(Self {
                header: AdaptationFieldHeader::from_bytes([0, 0]),
                pcr: None,
                opcr: None,
                stuffing_len: 0,
            });
        }
        if length > 183 {
            return Err(DecodeError::BadAdaptationField);
        }
        let mut body = reader.sub_reader(length)?;
        let flags_byte = body.read_u8()?;
        let header = AdaptationFieldHeader::from_bytes([length as u8, flags_byte]);
        let mut out = Self {
            header,
            pcr: None,
            opcr: None,
            stuffing_len: 0,
        };
        if header.pcr_flag() {
            let bytes = body.read_bytes(6)?;
            let mut arr = [0u8; 6];
            arr.copy_from_slice(bytes);
            out.pcr = Some(Pcr::decode(&arr));
        }
        if header.opcr_flag() {
            let bytes = body.read_bytes(6)?;
            let mut arr = [0u8; 6];
            arr.copy_from_slice(bytes);
            out.opcr = Some(Pcr::decode(&arr));
        }
        if header.splicing_point_flag() {
            body.skip(1)?;
        }
        if header.transport_private_data_flag() {
            let private_len = body.read_u8()? as usize;
            body.skip(private_len)?;
        }
        if header.adaptation_field_extension_flag() {
            let ext_len = body.read_u8()? as usize;
            body.skip(ext_len)?;
        }
        out.stuffing_len = body.remaining_bytes();
        Ok(out)
    }

    fn encoded_len(&self) -> usize {
        let mut len = 1; // flags byte
        if self.pcr.is_some() {
            len += 6;
        }
        if self.opcr.is_some() {
            len += 6;
        }
        len + self.stuffing_len
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.encoded_len() as u8);
        out.push(self.header.into_bytes()[1]);
        if let Some(pcr) = self.pcr {
            out.extend_from_slice(&pcr.encode());
        }
        if let Some(opcr) = self.opcr {
            out.extend_from_slice(&opcr.encode());
        }
        out.resize(out.len() + self.stuffing_len, 0xFF);
    }

    /// Builds a minimal adaptation field carrying only stuffing, `len` bytes total.
    pub fn stuffing_only(len: usize) -> Self {
        Self {
            header: AdaptationFieldHeader::new()
                .with_length(len.saturating_sub(1) as u8)
                .with_discontinuity_indicator(false)
                .with_random_access_indicator(false)
                .with_elementary_stream_priority_indicator(false)
                .with_pcr_flag(false)
                .with_opcr_flag(false)
                .with_splicing_point_flag(false)
                .with_transport_private_data_flag(false)
                .with_adaptation_field_extension_flag(false),
            pcr: None,
            opcr: None,
            stuffing_len: len.saturating_sub(1),
        }
    }

    /// Builds an adaptation field carrying a PCR and nothing else (plus
    /// stuffing). `total_len` is the adaptation field's full wire size,
    /// including its own length byte; the minimal PCR-only field is 8 bytes
    /// (length byte + flags byte + 6-byte PCR), so `total_len == 8` yields
    /// no stuffing.
    pub fn with_pcr(pcr: Pcr, random_access: bool, total_len: usize) -> Self {
        let stuffing_len = total_len.saturating_sub(8);
        Self {
            header: AdaptationFieldHeader::new()
                .with_length((7 + stuffing_len) as u8)
                .with_discontinuity_indicator(false)
                .with_random_access_indicator(random_access)
                .with_elementary_stream_priority_indicator(false)
                .with_pcr_flag(true)
                .with_opcr_flag(false)
                .with_splicing_point_flag(false)
                .with_transport_private_data_flag(false)
                .with_adaptation_field_extension_flag(false),
            pcr: Some(pcr),
            opcr: None,
            stuffing_len,
        }
    }
}

/// One fully-decoded TS packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet<'a> {
    pub header: PacketHeader,
    pub adaptation_field: Option<AdaptationField>,
    pub payload: &'a [u8],
}

/// Encodes and decodes single 188-byte TS packets.
pub struct PacketCodec;

impl PacketCodec {
    /// Decodes a packet from a 188- or 204-byte slice. The 204-byte variant
    /// has its trailing 16-byte Reed-Solomon parity tail stripped first.
    pub fn decode(raw: &[u8]) -> Result<Packet<'_>, DecodeError> {
        let frame = match raw.len() {
            PACKET_LEN => raw,
            PACKET_LEN_RS => &raw[..PACKET_LEN],
            _ => return Err(DecodeError::Truncated),
        };
        if frame[0] != SYNC_BYTE {
            return Err(DecodeError::LostSync);
        }
        let mut reader = BitReader::new(frame);
        let header_bytes = reader.read_bytes(4)?;
        let mut arr = [0u8; 4];
        arr.copy_from_slice(header_bytes);
        let header = PacketHeader::from_bytes(arr);

        let adaptation_field = match header.adaptation_field_control() {
            AdaptationFieldControl::AdaptationOnly | AdaptationFieldControl::Both => {
                Some(AdaptationField::decode(&mut reader)?)
            }
            _ => None,
        };

        let payload = match header.adaptation_field_control() {
            AdaptationFieldControl::PayloadOnly | AdaptationFieldControl::Both => {
                reader.read_to_end()?
            }
            _ => &[],
        };

        Ok(Packet {
            header,
            adaptation_field,
            payload,
        })
    }

    /// Encodes one 188-byte packet from a header, optional adaptation
    /// field, and payload bytes. If `payload` does not fill the remaining
    /// 184 bytes, the difference is made up with adaptation-field stuffing
    /// (never trailing bytes after the payload) — this may synthesize an
    /// adaptation field even if `adaptation_field` was `None`.
    pub fn encode(
        mut header: PacketHeader,
        adaptation_field: Option<AdaptationField>,
        payload: &[u8],
    ) -> [u8; PACKET_LEN] {
        let mut out = Vec::with_capacity(PACKET_LEN);
        let budget = PACKET_LEN - 4;
        let needed_stuffing = budget.saturating_sub(payload.len() + Self::af_len(&adaptation_field));

        let af = match (adaptation_field, needed_stuffing) {
            (Some(mut af), extra) if extra > 0 => {
                af.stuffing_len += extra;
                Some(af)
            }
            (Some(af), _) => Some(af),
            (None, extra) if extra > 0 => Some(AdaptationField::stuffing_only(extra)),
            (None, _) => None,
        };

        header.set_adaptation_field_control(match (&af, payload.is_empty()) {
            (Some(_), true) => AdaptationFieldControl::AdaptationOnly,
            (Some(_), false) => AdaptationFieldControl::Both,
            (None, false) => AdaptationFieldControl::PayloadOnly,
            (None, true) => AdaptationFieldControl::Reserved,
        });

        out.extend_from_slice(&header.into_bytes());
        if let Some(af) = &af {
            af.encode_into(&mut out);
        }
        out.extend_from_slice(payload);
        out.resize(PACKET_LEN, 0xFF);
        let mut frame = [0u8; PACKET_LEN];
        frame.copy_from_slice(&out);
        frame
    }

    fn af_len(af: &Option<AdaptationField>) -> usize {
        af.as_ref().map_or(0, |a| a.encoded_len() + 1)
    }

    /// Splits `payload` (typically a serialized PES packet) into TS packets
    /// for `pid`, advancing `cc` (the track's continuity counter) by one
    /// per emitted packet, per spec.md §4.3.
    ///
    /// * `force_pusi` sets PUSI on the first emitted packet only.
    /// * `pcr`, if given, is placed in the first packet's adaptation field,
    ///   with `random_access` controlling `random_access_indicator`.
    /// * The final packet pads with adaptation-field stuffing if the
    ///   remaining payload is shorter than 184 bytes.
    pub fn packetize_payload(
        payload: &[u8],
        pid: u16,
        cc: &mut u8,
        force_pusi: bool,
        pcr: Option<Pcr>,
        random_access: bool,
    ) -> Vec<[u8; PACKET_LEN]> {
        let mut out = Vec::new();
        let mut remaining = payload;
        let mut first = true;
        while first || !remaining.is_empty() {
            let chunk_budget = if first && pcr.is_some() {
                184 - 8
            } else {
                184
            };
            let take = remaining.len().min(chunk_budget);
            let (chunk, rest) = remaining.split_at(take);
            remaining = rest;

            let header = PacketHeader::new()
                .with_sync_byte(SYNC_BYTE)
                .with_transport_error_indicator(false)
                .with_payload_unit_start_indicator(first && force_pusi)
                .with_transport_priority(false)
                .with_pid(pid)
                .with_transport_scrambling_control(TransportScramblingControl::NotScrambled)
                .with_continuity_counter(*cc);

            let af = if first && pcr.is_some() {
                Some(AdaptationField::with_pcr(pcr.unwrap(), random_access, 8))
            } else {
                None
            };

            out.push(Self::encode(header, af, chunk));
            *cc = (*cc + 1) & 0x0F;
            first = false;
        }
        out
    }

    /// Builds a null-stuffing packet (`PID = 0x1FFF`, payload all `0xFF`).
    /// Null packets do not carry or advance a continuity counter.
    pub fn null_packet() -> [u8; PACKET_LEN] {
        let header = PacketHeader::new()
            .with_sync_byte(SYNC_BYTE)
            .with_pid(NULL_PID)
            .with_transport_scrambling_control(TransportScramblingControl::NotScrambled)
            .with_continuity_counter(0);
        Self::encode(header, None, &[0xFFu8; 184])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_bad_sync() {
        let mut frame = [0u8; PACKET_LEN];
        frame[0] = 0x00;
        assert_eq!(PacketCodec::decode(&frame), Err(DecodeError::LostSync));
    }

    #[test]
    fn strips_rs_parity_tail() {
        let mut frame = [0xFFu8; PACKET_LEN_RS];
        frame[0] = SYNC_BYTE;
        let packet = PacketCodec::decode(&frame).unwrap();
        assert_eq!(packet.header.sync_byte(), SYNC_BYTE);
    }

    #[test]
    fn encode_decode_round_trip_payload_only() {
        let header = PacketHeader::new()
            .with_sync_byte(SYNC_BYTE)
            .with_payload_unit_start_indicator(true)
            .with_pid(0x100)
            .with_continuity_counter(3);
        let mut payload = vec![0xAB; 184];
        payload[0] = 0x00;
        let frame = PacketCodec::encode(header, None, &payload);
        assert_eq!(frame.len(), PACKET_LEN);
        let decoded = PacketCodec::decode(&frame).unwrap();
        assert_eq!(decoded.header.pid(), 0x100);
        assert!(decoded.header.payload_unit_start_indicator());
        assert_eq!(decoded.payload, payload.as_slice());
    }

    #[test]
    fn short_payload_pads_with_adaptation_stuffing() {
        let header = PacketHeader::new().with_sync_byte(SYNC_BYTE).with_pid(0x101);
        let payload = vec![0x11; 20];
        let frame = PacketCodec::encode(header, None, &payload);
        let decoded = PacketCodec::decode(&frame).unwrap();
        assert_eq!(decoded.payload, payload.as_slice());
        let af = decoded.adaptation_field.unwrap();
        assert_eq!(af.stuffing_len, 184 - 20 - 1);
    }

    #[test]
    fn pcr_round_trips_exactly() {
        let pcr = Pcr {
            base: 123_456_789,
            extension: 150,
        };
        let encoded = pcr.encode();
        let decoded = Pcr::decode(&encoded);
        assert_eq!(pcr, decoded);
    }

    #[test]
    fn packetize_payload_advances_cc_and_sets_pusi_once() {
        let mut cc = 0u8;
        let payload = vec![0x42; 400];
        let packets =
            PacketCodec::packetize_payload(&payload, 0x200, &mut cc, true, None, false);
        assert_eq!(packets.len(), 3);
        let first = PacketCodec::decode(&packets[0]).unwrap();
        assert!(first.header.payload_unit_start_indicator());
        let second = PacketCodec::decode(&packets[1]).unwrap();
        assert!(!second.header.payload_unit_start_indicator());
        assert_eq!(cc, 3);
    }

    #[test]
    fn packetize_payload_with_pcr_does_not_truncate_first_packet() {
        let mut cc = 0u8;
        let payload = vec![0x7Au8; 176];
        let pcr = Pcr {
            base: 1,
            extension: 0,
        };
        let packets =
            PacketCodec::packetize_payload(&payload, 0x200, &mut cc, true, Some(pcr), true);
        assert_eq!(packets.len(), 1);
        let decoded = PacketCodec::decode(&packets[0]).unwrap();
        assert_eq!(decoded.payload, payload.as_slice());
        assert_eq!(decoded.adaptation_field.unwrap().pcr, Some(pcr));
    }

    #[test]
    fn null_packet_has_null_pid_and_ff_payload() {
        let packet = PacketCodec::null_packet();
        let decoded = PacketCodec::decode(&packet).unwrap();
        assert_eq!(decoded.header.pid(), NULL_PID);
        assert!(decoded.payload.iter().all(|&b| b == 0xFF));
    }
}
