//! DVB Service Description Table: `table_id` 0x42 (actual) / 0x46 (other).

use super::section::{Section, TableSyntax};
use crate::bit_reader::BitReader;
use crate::descriptor::Descriptor;
use crate::error::DecodeError;
use modular_bitfield_msb::prelude::*;

/// `table_id` for the SDT describing the transport stream carrying it.
pub const TABLE_ID_ACTUAL: u8 = 0x42;
/// `table_id` for an SDT describing a different transport stream.
pub const TABLE_ID_OTHER: u8 = 0x46;

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct SdtServiceHeaderBits {
    service_id: B16,
    reserved: B6,
    eit_schedule_flag: bool,
    eit_present_following_flag: bool,
    running_status: B3,
    free_ca_mode: bool,
    descriptors_loop_length: B12,
}

/// One service entry within an SDT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdtService {
    pub service_id: u16,
    pub eit_schedule_flag: bool,
    pub eit_present_following_flag: bool,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub descriptors: Vec<Descriptor>,
}

/// A fully decoded Service Description Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdt {
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub original_network_id: u16,
    pub actual_transport_stream: bool,
    pub services: Vec<SdtService>,
}

impl Sdt {
    pub fn decode(section: &Section) -> Result<Self, DecodeError> {
        let actual_transport_stream = match section.table_id {
            TABLE_ID_ACTUAL => true,
            TABLE_ID_OTHER => false,
            _ => return Err(DecodeError::BadPsiHeader),
        };
        if !section.section_syntax_indicator {
            return Err(DecodeError::BadPsiHeader);
        }
        let mut reader = BitReader::new(&section.body);
        let syntax_bytes = reader.read_bytes(5)?;
        let mut syntax_arr = [0u8; 5];
        syntax_arr.copy_from_slice(syntax_bytes);
        let syntax = TableSyntax::from_bytes(syntax_arr);

        let original_network_id = reader.read_u16be()?;
        reader.skip(1)?; // reserved_future_use byte

        let mut services = Vec::new();
        while reader.remaining_bytes() >= 5 {
            let header_bytes = reader.read_bytes(5)?;
            let mut header_arr = [0u8; 5];
            header_arr.copy_from_slice(header_bytes);
            let header = SdtServiceHeaderBits::from_bytes(header_arr);
            let mut descriptor_reader =
                reader.sub_reader(header.descriptors_loop_length() as usize)?;
            let descriptors = Descriptor::parse_all(&mut descriptor_reader)?;
            services.push(SdtService {
                service_id: header.service_id(),
                eit_schedule_flag: header.eit_schedule_flag(),
                eit_present_following_flag: header.eit_present_following_flag(),
                running_status: header.running_status(),
                free_ca_mode: header.free_ca_mode(),
                descriptors,
            });
        }

        Ok(Sdt {
            transport_stream_id: syntax.table_id_extension(),
            version_number: syntax.version_number(),
            current_next_indicator: syntax.current_next_indicator(),
            original_network_id,
            actual_transport_stream,
            services,
        })
    }

    /// Serializes into a complete section, with services in ascending
    /// `service_id` order for deterministic output.
    pub fn encode(&self) -> Vec<u8> {
        let mut sorted = self.services.clone();
        sorted.sort_by_key(|s| s.service_id);

        let syntax = TableSyntax::new()
            .with_table_id_extension(self.transport_stream_id)
            .with_reserved(0b11)
            .with_version_number(self.version_number)
            .with_current_next_indicator(self.current_next_indicator)
            .with_section_number(0)
            .with_last_section_number(0);

        let mut body = Vec::new();
        body.extend_from_slice(&syntax.into_bytes());
        body.extend_from_slice(&self.original_network_id.to_be_bytes());
        body.push(0xFF); // reserved_future_use

        for service in &sorted {
            let descriptors_loop_length: usize =
                service.descriptors.iter().map(|d| d.encoded_len()).sum();
            let header = SdtServiceHeaderBits::new()
                .with_service_id(service.service_id)
                .with_reserved(0b111111)
                .with_eit_schedule_flag(service.eit_schedule_flag)
                .with_eit_present_following_flag(service.eit_present_following_flag)
                .with_running_status(service.running_status)
                .with_free_ca_mode(service.free_ca_mode)
                .with_descriptors_loop_length(descriptors_loop_length as u16);
            body.extend_from_slice(&header.into_bytes());
            for d in &service.descriptors {
                d.encode_into(&mut body);
            }
        }

        let table_id = if self.actual_transport_stream {
            TABLE_ID_ACTUAL
        } else {
            TABLE_ID_OTHER
        };
        Section::encode(table_id, true, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sdt() -> Sdt {
        Sdt {
            transport_stream_id: 1,
            version_number: 0,
            current_next_indicator: true,
            original_network_id: 0x0001,
            actual_transport_stream: true,
            services: vec![SdtService {
                service_id: 1,
                eit_schedule_flag: false,
                eit_present_following_flag: true,
                running_status: 4,
                free_ca_mode: false,
                descriptors: vec![],
            }],
        }
    }

    #[test]
    fn round_trips_sdt_actual() {
        let sdt = sample_sdt();
        let encoded = sdt.encode();
        assert_eq!(encoded[0], TABLE_ID_ACTUAL);
        let section = Section::parse_complete(&encoded).unwrap();
        let decoded = Sdt::decode(&section).unwrap();
        assert_eq!(decoded, sdt);
    }

    #[test]
    fn round_trips_sdt_other() {
        let mut sdt = sample_sdt();
        sdt.actual_transport_stream = false;
        let encoded = sdt.encode();
        assert_eq!(encoded[0], TABLE_ID_OTHER);
        let section = Section::parse_complete(&encoded).unwrap();
        let decoded = Sdt::decode(&section).unwrap();
        assert!(!decoded.actual_transport_stream);
    }
}
