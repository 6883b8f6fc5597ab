use crc::{Crc, CRC_32_MPEG_2};

/// CRC-32/MPEG-2 (poly `0x04C11DB7`, init `0xFFFFFFFF`, no reflection, no
/// final XOR) over `table_id..end_of_body` of a PSI section, as required
/// by ISO/IEC 13818-1 §2.4.4.
///
/// Thin wrapper around the `crc` crate's `CRC_32_MPEG_2` table, matching
/// how the teacher crate computes PSI hashes (see its `PsiBuilder`).
pub struct Crc32Mpeg;

const ALGORITHM: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

impl Crc32Mpeg {
    /// Computes the CRC-32/MPEG-2 checksum of `data`.
    pub fn compute(data: &[u8]) -> u32 {
        ALGORITHM.checksum(data)
    }

    /// Verifies that `data`'s trailing 4 bytes are the correct big-endian
    /// CRC-32/MPEG-2 of everything preceding them. Returns `false` if
    /// `data` is shorter than 4 bytes.
    pub fn verify_trailer(data: &[u8]) -> bool {
        if data.len() < 4 {
            return false;
        }
        let (body, trailer) = data.split_at(data.len() - 4);
        let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        Self::compute(body) == expected
    }

    /// Appends the big-endian CRC-32/MPEG-2 of `data` to `data` itself.
    pub fn append(data: &mut Vec<u8>) {
        let crc = Self::compute(data);
        data.extend_from_slice(&crc.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_append_and_verify() {
        let mut buf = vec![0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00];
        Crc32Mpeg::append(&mut buf);
        assert!(Crc32Mpeg::verify_trailer(&buf));
        *buf.last_mut().unwrap() ^= 0xFF;
        assert!(!Crc32Mpeg::verify_trailer(&buf));
    }

    #[test]
    fn too_short_is_not_verified() {
        assert!(!Crc32Mpeg::verify_trailer(&[1, 2, 3]));
    }
}
