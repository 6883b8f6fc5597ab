//! Common PSI section framing (pointer field, `table_id`/`section_length`
//! header, long-form table syntax) and the [`SectionAssembler`] that
//! reassembles complete sections out of one or more TS packet payloads.
//!
//! Grounded on the teacher crate's `PsiBuilder`/`start_psi` pair in
//! `psi.rs`, generalized from "one pending section per PID" into the
//! pointer-field-aware multi-section-per-packet behavior spec.md §4.5 and
//! §9's open question require: any byte range before the pointer field
//! completes an in-progress section, and the range after it may start
//! zero or more new sections.

use crate::bit_reader::BitReader;
use crate::crc::Crc32Mpeg;
use crate::error::DecodeError;
use modular_bitfield_msb::prelude::*;

/// Maximum legal `section_length` per ISO/IEC 13818-1.
pub const MAX_SECTION_LENGTH: u16 = 1021;

/// The 3-byte common header present at the start of every PSI section.
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct SectionHeader {
    pub table_id: B8,
    pub section_syntax_indicator: bool,
    pub private_indicator: bool,
    pub reserved: B2,
    pub section_length: B12,
}

/// The 5-byte long-form table syntax following a table-specific 16-bit
/// `byte4_5` field (transport_stream_id / program_number, depending on
/// table).
#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct TableSyntax {
    pub table_id_extension: B16,
    pub reserved: B2,
    pub version_number: B5,
    pub current_next_indicator: bool,
    pub section_number: B8,
    pub last_section_number: B8,
}

/// One fully reassembled, CRC-validated PSI section.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    /// Bytes after the 3-byte common header and before the trailing CRC;
    /// for long-form sections this begins with the `byte4/5` + 5-byte
    /// table syntax.
    pub body: Vec<u8>,
}

impl Section {
    /// Parses one complete, already-assembled section (header + body +
    /// CRC) out of an exact byte buffer. Used by callers that build or
    /// test sections outside of a live [`SectionAssembler`].
    pub fn parse_complete(raw: &[u8]) -> Result<Self, DecodeError> {
        Self::from_raw(raw)?.ok_or(DecodeError::Truncated)
    }

    fn from_raw(raw: &[u8]) -> Result<Option<Self>, DecodeError> {
        if raw.len() < 3 {
            return Ok(None);
        }
        let mut header_bytes = [0u8; 3];
        header_bytes.copy_from_slice(&raw[..3]);
        let header = SectionHeader::from_bytes(header_bytes);
        let section_length = header.section_length();
        if section_length > MAX_SECTION_LENGTH {
            return Err(DecodeError::BadPsiHeader);
        }
        let total = 3 + section_length as usize;
        if raw.len() < total {
            return Ok(None);
        }
        let section = &raw[..total];
        if !Crc32Mpeg::verify_trailer(section) {
            return Err(DecodeError::CrcMismatch);
        }
        let body = section[3..total - 4].to_vec();
        Ok(Some(Section {
            table_id: header.table_id(),
            section_syntax_indicator: header.section_syntax_indicator(),
            body,
        }))
    }

    /// Serializes `body` into a complete section: 3-byte header, body, CRC.
    pub fn encode(table_id: u8, section_syntax_indicator: bool, body: &[u8]) -> Vec<u8> {
        let section_length = (body.len() + 4) as u16;
        debug_assert!(section_length <= MAX_SECTION_LENGTH);
        let header = SectionHeader::new()
            .with_table_id(table_id)
            .with_section_syntax_indicator(section_syntax_indicator)
            .with_private_indicator(false)
            .with_reserved(0b11)
            .with_section_length(section_length);
        let mut out = Vec::with_capacity(3 + body.len() + 4);
        out.extend_from_slice(&header.into_bytes());
        out.extend_from_slice(body);
        Crc32Mpeg::append(&mut out);
        out
    }
}

#[derive(Default)]
struct Pending {
    buf: Vec<u8>,
}

/// Reassembles TS packet payloads on one PSI-bearing PID into complete
/// [`Section`]s. One instance per PID, per spec.md §4.5.
#[derive(Default)]
pub struct SectionAssembler {
    pending: Option<Pending>,
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self { pending: None }
    }

    /// Drains as many complete sections as possible out of `buf`,
    /// appending newly-started (but still incomplete) bytes to `pending`.
    /// Returns one `Result` per section boundary found, so CRC failures on
    /// one section don't prevent later sections in the same packet from
    /// being reported.
    fn drain(buf: &mut Vec<u8>, out: &mut Vec<Result<Section, DecodeError>>) {
        loop {
            // `table_id == 0xFF` marks end-of-sections stuffing, not a
            // section header; the rest of the buffer is padding, not data.
            if buf.first() == Some(&0xFF) {
                buf.clear();
                break;
            }
            match Section::from_raw(buf) {
                Ok(Some(section)) => {
                    let consumed = 3 + (section.body.len() + 4);
                    out.push(Ok(section));
                    buf.drain(..consumed);
                }
                Ok(None) => break,
                Err(e) => {
                    // Can't know the consumed length reliably past a bad
                    // header; drop everything buffered for this PID.
                    out.push(Err(e));
                    buf.clear();
                    break;
                }
            }
        }
    }

    /// Feeds one packet's payload. `pusi` indicates whether this payload
    /// begins with a `pointer_field`.
    pub fn feed(
        &mut self,
        pusi: bool,
        payload: &[u8],
    ) -> Result<Vec<Result<Section, DecodeError>>, DecodeError> {
        let mut completed = Vec::new();
        if pusi {
            let mut reader = BitReader::new(payload);
            let pointer_field = reader.read_u8()? as usize;
            let before = reader.read_bytes(pointer_field)?;
            if let Some(mut pending) = self.pending.take() {
                pending.buf.extend_from_slice(before);
                Self::drain(&mut pending.buf, &mut completed);
                if !pending.buf.is_empty() {
                    self.pending = Some(pending);
                }
            }
            let mut rest = reader.read_to_end()?.to_vec();
            Self::drain(&mut rest, &mut completed);
            if !rest.is_empty() {
                self.pending = Some(Pending { buf: rest });
            }
        } else if let Some(mut pending) = self.pending.take() {
            pending.buf.extend_from_slice(payload);
            Self::drain(&mut pending.buf, &mut completed);
            if !pending.buf.is_empty() {
                self.pending = Some(pending);
            }
        }
        // Payload arriving with pusi=false and no pending section (e.g.
        // after a reset) is silently ignored; there is nothing to append to.
        Ok(completed)
    }

    /// Discards any in-progress section, e.g. on a continuity gap.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_section(table_id: u8, body: &[u8]) -> Vec<u8> {
        Section::encode(table_id, true, body)
    }

    #[test]
    fn single_packet_single_section() {
        let section_bytes = make_section(0x00, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut payload = vec![0u8]; // pointer_field = 0
        payload.extend_from_slice(&section_bytes);

        let mut assembler = SectionAssembler::new();
        let results = assembler.feed(true, &payload).unwrap();
        assert_eq!(results.len(), 1);
        let section = results[0].as_ref().unwrap();
        assert_eq!(section.table_id, 0x00);
        assert_eq!(section.body, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn section_spanning_two_packets() {
        let section_bytes = make_section(0x02, &[9, 9, 9, 9, 9, 9, 9, 9, 9, 9]);
        let (first_half, second_half) = section_bytes.split_at(6);

        let mut assembler = SectionAssembler::new();
        let mut first_payload = vec![0u8];
        first_payload.extend_from_slice(first_half);
        let first_results = assembler.feed(true, &first_payload).unwrap();
        assert!(first_results.is_empty());

        let second_results = assembler.feed(false, second_half).unwrap();
        assert_eq!(second_results.len(), 1);
        assert_eq!(second_results[0].as_ref().unwrap().table_id, 0x02);
    }

    #[test]
    fn two_sections_concatenated_after_pointer_field() {
        let a = make_section(0x00, &[1, 2, 3, 4]);
        let b = make_section(0x02, &[5, 6, 7, 8]);
        let mut payload = vec![0u8];
        payload.extend_from_slice(&a);
        payload.extend_from_slice(&b);

        let mut assembler = SectionAssembler::new();
        let results = assembler.feed(true, &payload).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().table_id, 0x00);
        assert_eq!(results[1].as_ref().unwrap().table_id, 0x02);
    }

    #[test]
    fn trailing_stuffing_after_section_is_not_reported_as_an_error() {
        let section_bytes = make_section(0x00, &[1, 2, 3, 4]);
        let mut payload = vec![0u8]; // pointer_field = 0
        payload.extend_from_slice(&section_bytes);
        payload.extend(std::iter::repeat(0xFFu8).take(20));

        let mut assembler = SectionAssembler::new();
        let results = assembler.feed(true, &payload).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().table_id, 0x00);

        // The stuffing must not linger as a stray pending section either.
        let b = make_section(0x02, &[5, 6, 7, 8]);
        let mut next_payload = vec![0u8];
        next_payload.extend_from_slice(&b);
        let next_results = assembler.feed(true, &next_payload).unwrap();
        assert_eq!(next_results.len(), 1);
        assert_eq!(next_results[0].as_ref().unwrap().table_id, 0x02);
    }

    #[test]
    fn crc_mismatch_is_reported_and_discarded() {
        let mut section_bytes = make_section(0x00, &[1, 2, 3, 4]);
        *section_bytes.last_mut().unwrap() ^= 0xFF;
        let mut payload = vec![0u8];
        payload.extend_from_slice(&section_bytes);

        let mut assembler = SectionAssembler::new();
        let results = assembler.feed(true, &payload).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0], Err(DecodeError::CrcMismatch));
    }

    #[test]
    fn pointer_field_completes_prior_section_before_starting_new_one() {
        let a = make_section(0x00, &[1, 2, 3, 4]);
        let (a_first, a_rest) = a.split_at(5);
        let b = make_section(0x02, &[5, 6, 7, 8]);

        let mut assembler = SectionAssembler::new();
        let mut first_payload = vec![0u8];
        first_payload.extend_from_slice(a_first);
        assembler.feed(true, &first_payload).unwrap();

        let mut second_payload = vec![a_rest.len() as u8];
        second_payload.extend_from_slice(a_rest);
        second_payload.extend_from_slice(&b);
        let results = assembler.feed(true, &second_payload).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().table_id, 0x00);
        assert_eq!(results[1].as_ref().unwrap().table_id, 0x02);
    }
}
