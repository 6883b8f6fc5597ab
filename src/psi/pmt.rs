//! Program Map Table: `table_id` 0x02, one instance per program.

use super::section::{Section, TableSyntax};
use crate::bit_reader::BitReader;
use crate::descriptor::Descriptor;
use crate::error::DecodeError;
use modular_bitfield_msb::prelude::*;

pub const TABLE_ID: u8 = 0x02;

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PmtHeaderBits {
    reserved: B3,
    pcr_pid: B13,
    reserved2: B4,
    program_info_length: B12,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct EsInfoHeaderBits {
    stream_type: B8,
    reserved: B3,
    elementary_pid: B13,
    reserved2: B4,
    es_info_length: B12,
}

/// One elementary stream entry within a PMT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStreamInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

/// A fully decoded Program Map Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub program_number: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub pcr_pid: u16,
    pub program_descriptors: Vec<Descriptor>,
    pub streams: Vec<ElementaryStreamInfo>,
}

impl Pmt {
    pub fn decode(section: &Section) -> Result<Self, DecodeError> {
        if section.table_id != TABLE_ID || !section.section_syntax_indicator {
            return Err(DecodeError::BadPsiHeader);
        }
        let mut reader = BitReader::new(&section.body);
        let syntax_bytes = reader.read_bytes(5)?;
        let mut syntax_arr = [0u8; 5];
        syntax_arr.copy_from_slice(syntax_bytes);
        let syntax = TableSyntax::from_bytes(syntax_arr);

        let header_bytes = reader.read_bytes(4)?;
        let mut header_arr = [0u8; 4];
        header_arr.copy_from_slice(header_bytes);
        let header = PmtHeaderBits::from_bytes(header_arr);

        let mut program_info_reader = reader.sub_reader(header.program_info_length() as usize)?;
        let program_descriptors = Descriptor::parse_all(&mut program_info_reader)?;

        let mut streams = Vec::new();
        while reader.remaining_bytes() >= 5 {
            let es_bytes = reader.read_bytes(5)?;
            let mut es_arr = [0u8; 5];
            es_arr.copy_from_slice(es_bytes);
            let es_header = EsInfoHeaderBits::from_bytes(es_arr);
            let mut es_reader = reader.sub_reader(es_header.es_info_length() as usize)?;
            let descriptors = Descriptor::parse_all(&mut es_reader)?;
            streams.push(ElementaryStreamInfo {
                stream_type: es_header.stream_type(),
                elementary_pid: es_header.elementary_pid(),
                descriptors,
            });
        }

        Ok(Pmt {
            program_number: syntax.table_id_extension(),
            version_number: syntax.version_number(),
            current_next_indicator: syntax.current_next_indicator(),
            pcr_pid: header.pcr_pid(),
            program_descriptors,
            streams,
        })
    }

    /// Serializes into a complete section, with elementary streams in
    /// ascending PID order for deterministic output.
    pub fn encode(&self) -> Vec<u8> {
        let mut sorted = self.streams.clone();
        sorted.sort_by_key(|s| s.elementary_pid);

        let syntax = TableSyntax::new()
            .with_table_id_extension(self.program_number)
            .with_reserved(0b11)
            .with_version_number(self.version_number)
            .with_current_next_indicator(self.current_next_indicator)
            .with_section_number(0)
            .with_last_section_number(0);

        let program_info_length: usize =
            self.program_descriptors.iter().map(|d| d.encoded_len()).sum();
        let pmt_header = PmtHeaderBits::new()
            .with_reserved(0b111)
            .with_pcr_pid(self.pcr_pid)
            .with_reserved2(0b1111)
            .with_program_info_length(program_info_length as u16);

        let mut body = Vec::new();
        body.extend_from_slice(&syntax.into_bytes());
        body.extend_from_slice(&pmt_header.into_bytes());
        for d in &self.program_descriptors {
            d.encode_into(&mut body);
        }

        for stream in &sorted {
            let es_info_length: usize = stream.descriptors.iter().map(|d| d.encoded_len()).sum();
            let es_header = EsInfoHeaderBits::new()
                .with_stream_type(stream.stream_type)
                .with_reserved(0b111)
                .with_elementary_pid(stream.elementary_pid)
                .with_reserved2(0b1111)
                .with_es_info_length(es_info_length as u16);
            body.extend_from_slice(&es_header.into_bytes());
            for d in &stream.descriptors {
                d.encode_into(&mut body);
            }
        }

        Section::encode(TABLE_ID, true, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::StreamType;

    fn h264_aac_pmt() -> Pmt {
        Pmt {
            program_number: 1,
            version_number: 0,
            current_next_indicator: true,
            pcr_pid: 0x0100,
            program_descriptors: vec![],
            streams: vec![
                ElementaryStreamInfo {
                    stream_type: 0x1B,
                    elementary_pid: 0x0100,
                    descriptors: vec![],
                },
                ElementaryStreamInfo {
                    stream_type: 0x0F,
                    elementary_pid: 0x0101,
                    descriptors: vec![],
                },
            ],
        }
    }

    #[test]
    fn round_trips_h264_and_aac_streams() {
        let pmt = h264_aac_pmt();
        let encoded = pmt.encode();
        let section = Section::parse_complete(&encoded).unwrap();
        let decoded = Pmt::decode(&section).unwrap();
        assert_eq!(decoded, pmt);

        let types: Vec<_> = decoded
            .streams
            .iter()
            .map(|s| crate::descriptor::resolve_stream_type(s.stream_type, &s.descriptors))
            .collect();
        assert_eq!(types, vec![StreamType::H264, StreamType::AacAdts]);
    }

    #[test]
    fn elementary_streams_sorted_by_pid_on_encode() {
        let mut pmt = h264_aac_pmt();
        pmt.streams.reverse();
        let encoded = pmt.encode();
        let section = Section::parse_complete(&encoded).unwrap();
        let decoded = Pmt::decode(&section).unwrap();
        assert_eq!(decoded.streams[0].elementary_pid, 0x0100);
        assert_eq!(decoded.streams[1].elementary_pid, 0x0101);
    }

    #[test]
    fn carries_program_and_es_descriptors() {
        use smallvec::SmallVec;
        let mut pmt = h264_aac_pmt();
        let mut data = SmallVec::<[u8; 8]>::new();
        data.extend_from_slice(b"eng");
        pmt.streams[0].descriptors.push(Descriptor {
            tag: crate::descriptor::TAG_ISO_639_LANGUAGE,
            data,
        });
        let encoded = pmt.encode();
        let section = Section::parse_complete(&encoded).unwrap();
        let decoded = Pmt::decode(&section).unwrap();
        assert_eq!(decoded.streams[0].descriptors.len(), 1);
    }
}
