//! ATSC Virtual Channel Table: `table_id` 0xC8 (TVCT, terrestrial) /
//! 0xC9 (CVCT, cable).

use super::section::{Section, TableSyntax};
use crate::bit_reader::BitReader;
use crate::descriptor::Descriptor;
use crate::error::DecodeError;
use modular_bitfield_msb::prelude::*;

/// `table_id` for a terrestrial Virtual Channel Table.
pub const TABLE_ID_TERRESTRIAL: u8 = 0xC8;
/// `table_id` for a cable Virtual Channel Table.
pub const TABLE_ID_CABLE: u8 = 0xC9;

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct ChannelBitsA {
    reserved: B4,
    major_channel_number: B10,
    minor_channel_number: B10,
    modulation_mode: B8,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct ChannelBitsB {
    etm_location: B2,
    access_controlled: bool,
    hidden: bool,
    reserved: B2,
    hide_guide: bool,
    reserved2: B3,
    service_type: B6,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct ChannelBitsC {
    reserved: B6,
    descriptors_length: B10,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct VctTrailerBits {
    reserved: B6,
    additional_descriptors_length: B10,
}

/// One virtual channel entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VctChannel {
    /// Channel short name, 7 UTF-16BE code units (trailing `0x0000` padding allowed).
    pub short_name: [u16; 7],
    pub major_channel_number: u16,
    pub minor_channel_number: u16,
    pub modulation_mode: u8,
    pub carrier_frequency: u32,
    pub channel_tsid: u16,
    pub program_number: u16,
    pub etm_location: u8,
    pub access_controlled: bool,
    pub hidden: bool,
    pub hide_guide: bool,
    pub service_type: u8,
    pub source_id: u16,
    pub descriptors: Vec<Descriptor>,
}

impl VctChannel {
    /// Decodes the short name, stopping at the first `0x0000` code unit.
    pub fn short_name_string(&self) -> String {
        let len = self
            .short_name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(self.short_name.len());
        String::from_utf16_lossy(&self.short_name[..len])
    }
}

/// A fully decoded Virtual Channel Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vct {
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub protocol_version: u8,
    pub is_cable: bool,
    pub channels: Vec<VctChannel>,
    pub additional_descriptors: Vec<Descriptor>,
}

impl Vct {
    pub fn decode(section: &Section) -> Result<Self, DecodeError> {
        let is_cable = match section.table_id {
            TABLE_ID_TERRESTRIAL => false,
            TABLE_ID_CABLE => true,
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

        let protocol_version = reader.read_u8()?;
        let num_channels = reader.read_u8()? as usize;

        let mut channels = Vec::with_capacity(num_channels);
        for _ in 0..num_channels {
            let mut short_name = [0u16; 7];
            for slot in short_name.iter_mut() {
                *slot = reader.read_u16be()?;
            }

            let a_bytes = reader.read_bytes(4)?;
            let mut a_arr = [0u8; 4];
            a_arr.copy_from_slice(a_bytes);
            let a = ChannelBitsA::from_bytes(a_arr);

            let carrier_frequency = reader.read_u32be()?;
            let channel_tsid = reader.read_u16be()?;
            let program_number = reader.read_u16be()?;

            let b_bytes = reader.read_bytes(2)?;
            let mut b_arr = [0u8; 2];
            b_arr.copy_from_slice(b_bytes);
            let b = ChannelBitsB::from_bytes(b_arr);

            let source_id = reader.read_u16be()?;

            let c_bytes = reader.read_bytes(2)?;
            let mut c_arr = [0u8; 2];
            c_arr.copy_from_slice(c_bytes);
            let c = ChannelBitsC::from_bytes(c_arr);

            let mut descriptor_reader = reader.sub_reader(c.descriptors_length() as usize)?;
            let descriptors = Descriptor::parse_all(&mut descriptor_reader)?;

            channels.push(VctChannel {
                short_name,
                major_channel_number: a.major_channel_number(),
                minor_channel_number: a.minor_channel_number(),
                modulation_mode: a.modulation_mode(),
                carrier_frequency,
                channel_tsid,
                program_number,
                etm_location: b.etm_location(),
                access_controlled: b.access_controlled(),
                hidden: b.hidden(),
                hide_guide: b.hide_guide(),
                service_type: b.service_type(),
                source_id,
                descriptors,
            });
        }

        let trailer_bytes = reader.read_bytes(2)?;
        let mut trailer_arr = [0u8; 2];
        trailer_arr.copy_from_slice(trailer_bytes);
        let trailer = VctTrailerBits::from_bytes(trailer_arr);
        let mut additional_reader =
            reader.sub_reader(trailer.additional_descriptors_length() as usize)?;
        let additional_descriptors = Descriptor::parse_all(&mut additional_reader)?;

        Ok(Vct {
            transport_stream_id: syntax.table_id_extension(),
            version_number: syntax.version_number(),
            current_next_indicator: syntax.current_next_indicator(),
            protocol_version,
            is_cable,
            channels,
            additional_descriptors,
        })
    }

    /// Serializes into a complete section. Channel order is preserved as
    /// given (ATSC does not require a canonical channel ordering the way
    /// DVB/MPEG tables require ascending-ID ordering).
    pub fn encode(&self) -> Vec<u8> {
        let syntax = TableSyntax::new()
            .with_table_id_extension(self.transport_stream_id)
            .with_reserved(0b11)
            .with_version_number(self.version_number)
            .with_current_next_indicator(self.current_next_indicator)
            .with_section_number(0)
            .with_last_section_number(0);

        let mut body = Vec::new();
        body.extend_from_slice(&syntax.into_bytes());
        body.push(self.protocol_version);
        body.push(self.channels.len() as u8);

        for channel in &self.channels {
            for &code_unit in &channel.short_name {
                body.extend_from_slice(&code_unit.to_be_bytes());
            }
            let a = ChannelBitsA::new()
                .with_reserved(0b1111)
                .with_major_channel_number(channel.major_channel_number)
                .with_minor_channel_number(channel.minor_channel_number)
                .with_modulation_mode(channel.modulation_mode);
            body.extend_from_slice(&a.into_bytes());
            body.extend_from_slice(&channel.carrier_frequency.to_be_bytes());
            body.extend_from_slice(&channel.channel_tsid.to_be_bytes());
            body.extend_from_slice(&channel.program_number.to_be_bytes());

            let b = ChannelBitsB::new()
                .with_etm_location(channel.etm_location)
                .with_access_controlled(channel.access_controlled)
                .with_hidden(channel.hidden)
                .with_reserved(0b11)
                .with_hide_guide(channel.hide_guide)
                .with_reserved2(0b111)
                .with_service_type(channel.service_type);
            body.extend_from_slice(&b.into_bytes());
            body.extend_from_slice(&channel.source_id.to_be_bytes());

            let descriptors_length: usize =
                channel.descriptors.iter().map(|d| d.encoded_len()).sum();
            let c = ChannelBitsC::new()
                .with_reserved(0b111111)
                .with_descriptors_length(descriptors_length as u16);
            body.extend_from_slice(&c.into_bytes());
            for d in &channel.descriptors {
                d.encode_into(&mut body);
            }
        }

        let additional_descriptors_length: usize = self
            .additional_descriptors
            .iter()
            .map(|d| d.encoded_len())
            .sum();
        let trailer = VctTrailerBits::new()
            .with_reserved(0b111111)
            .with_additional_descriptors_length(additional_descriptors_length as u16);
        body.extend_from_slice(&trailer.into_bytes());
        for d in &self.additional_descriptors {
            d.encode_into(&mut body);
        }

        let table_id = if self.is_cable {
            TABLE_ID_CABLE
        } else {
            TABLE_ID_TERRESTRIAL
        };
        Section::encode(table_id, true, &body)
    }
}
