//! Program Association Table: PID 0x0000, `table_id` 0x00.

use super::section::{Section, TableSyntax};
use crate::bit_reader::BitReader;
use crate::error::DecodeError;
use modular_bitfield_msb::prelude::*;

pub const TABLE_ID: u8 = 0x00;
/// PID the PAT is always carried on.
pub const PAT_PID: u16 = 0x0000;

#[bitfield]
#[derive(Debug, Clone, Copy)]
struct PatEntryBits {
    program_number: B16,
    reserved: B3,
    pid: B13,
}

/// One PAT entry. `program_number == 0` designates the network PID rather
/// than a program; all other entries map a program to its PMT PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pid: u16,
}

/// A fully decoded Program Association Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pat {
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub entries: Vec<PatEntry>,
}

impl Pat {
    /// The network PID, if present (the entry with `program_number == 0`).
    pub fn network_pid(&self) -> Option<u16> {
        self.entries
            .iter()
            .find(|e| e.program_number == 0)
            .map(|e| e.pid)
    }

    /// PMT PIDs for real programs (`program_number != 0`).
    pub fn pmt_pids(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries
            .iter()
            .filter(|e| e.program_number != 0)
            .map(|e| e.pid)
    }

    pub fn decode(section: &Section) -> Result<Self, DecodeError> {
        if section.table_id != TABLE_ID || !section.section_syntax_indicator {
            return Err(DecodeError::BadPsiHeader);
        }
        let mut reader = BitReader::new(&section.body);
        let syntax_bytes = reader.read_bytes(5)?;
        let mut arr = [0u8; 5];
        arr.copy_from_slice(syntax_bytes);
        let syntax = TableSyntax::from_bytes(arr);

        let mut entries = Vec::with_capacity(reader.remaining_bytes() / 4);
        while reader.remaining_bytes() >= 4 {
            let bytes = reader.read_bytes(4)?;
            let mut entry_arr = [0u8; 4];
            entry_arr.copy_from_slice(bytes);
            let bits = PatEntryBits::from_bytes(entry_arr);
            entries.push(PatEntry {
                program_number: bits.program_number(),
                pid: bits.pid(),
            });
        }

        Ok(Pat {
            transport_stream_id: syntax.table_id_extension(),
            version_number: syntax.version_number(),
            current_next_indicator: syntax.current_next_indicator(),
            entries,
        })
    }

    /// Serializes into a complete section, with entries in ascending
    /// `program_number` order for deterministic output.
    pub fn encode(&self) -> Vec<u8> {
        let mut sorted = self.entries.clone();
        sorted.sort_by_key(|e| e.program_number);

        let syntax = TableSyntax::new()
            .with_table_id_extension(self.transport_stream_id)
            .with_reserved(0b11)
            .with_version_number(self.version_number)
            .with_current_next_indicator(self.current_next_indicator)
            .with_section_number(0)
            .with_last_section_number(0);

        let mut body = Vec::with_capacity(5 + sorted.len() * 4);
        body.extend_from_slice(&syntax.into_bytes());
        for entry in &sorted {
            let bits = PatEntryBits::new()
                .with_program_number(entry.program_number)
                .with_reserved(0b111)
                .with_pid(entry.pid);
            body.extend_from_slice(&bits.into_bytes());
        }

        Section::encode(TABLE_ID, true, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_pat_with_one_program() {
        let pat = Pat {
            transport_stream_id: 0x0001,
            version_number: 0,
            current_next_indicator: true,
            entries: vec![PatEntry {
                program_number: 1,
                pid: 0x1000,
            }],
        };
        let encoded = pat.encode();
        let section = Section::parse_complete(&encoded).unwrap();
        let decoded = Pat::decode(&section).unwrap();
        assert_eq!(decoded, pat);
    }

    #[test]
    fn matches_exact_byte_layout_from_spec_scenario_3() {
        let pat = Pat {
            transport_stream_id: 0x0001,
            version_number: 0,
            current_next_indicator: true,
            entries: vec![PatEntry {
                program_number: 1,
                pid: 0x1000,
            }],
        };
        let encoded = pat.encode();
        assert_eq!(encoded[0], 0x00); // table_id
        assert_eq!(encoded[1], 0xB0); // ssi=1, priv=0, reserved=11, length hi nibble
        assert_eq!(encoded[2], 0x0D); // section_length = 13
        assert_eq!(&encoded[3..5], &[0x00, 0x01]); // transport_stream_id
        assert_eq!(encoded[5], 0xC1); // reserved(11) version(00000) cni(1)
        assert_eq!(encoded[6], 0x00); // section_number
        assert_eq!(encoded[7], 0x00); // last_section_number
        assert_eq!(&encoded[8..10], &[0x00, 0x01]); // program_number
        assert_eq!(&encoded[10..12], &[0xF0, 0x00]); // reserved(111) pid=0x1000
    }

    #[test]
    fn network_pid_and_pmt_pids_split_correctly() {
        let pat = Pat {
            transport_stream_id: 1,
            version_number: 0,
            current_next_indicator: true,
            entries: vec![
                PatEntry {
                    program_number: 0,
                    pid: 0x0010,
                },
                PatEntry {
                    program_number: 1,
                    pid: 0x1000,
                },
            ],
        };
        assert_eq!(pat.network_pid(), Some(0x0010));
        assert_eq!(pat.pmt_pids().collect::<Vec<_>>(), vec![0x1000]);
    }
}
