//! Reassembles PES packets for one elementary PID into [`AccessUnit`]s.
//! State machine per spec.md §4.8 (`Idle`/`Collecting`), grounded on the
//! teacher's span/payload-unit accumulation pattern in `payload_unit.rs`
//! but specialized to PES semantics (declared-length completion, or
//! early completion on the next PUSI for unbounded video PES).

use crate::descriptor::{Descriptor, StreamType};
use crate::error::DecodeError;
use crate::pes::{AccessUnit, PesCodec};

/// Running counters for one builder, supplementing spec.md §4.8's
/// `discarded_packet_count` with the companion counters the original
/// source's `TSElementaryStreamStats` tracks (see `SPEC_FULL.md` §B).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EsBuilderStats {
    pub access_units_built: u64,
    pub bytes_collected: u64,
    pub discontinuities: u64,
    pub discarded_packet_count: u64,
}

enum State {
    Idle,
    Collecting {
        /// Declared ES payload length; 0 means unbounded (video).
        declared_length: usize,
        collected: Vec<u8>,
        pts: Option<u64>,
        dts: Option<u64>,
        is_discontinuous: bool,
        is_random_access_point: bool,
    },
}

/// Reassembles one elementary PID's PES packets into access units,
/// stamping each with the PMT-resolved `stream_type` and descriptor
/// snapshot captured when the builder was (re)created.
pub struct ElementaryStreamBuilder {
    pid: u16,
    stream_type: StreamType,
    descriptors: Vec<Descriptor>,
    state: State,
    stats: EsBuilderStats,
}

impl ElementaryStreamBuilder {
    pub fn new(pid: u16, stream_type: StreamType, descriptors: Vec<Descriptor>) -> Self {
        Self {
            pid,
            stream_type,
            descriptors,
            state: State::Idle,
            stats: EsBuilderStats::default(),
        }
    }

    pub fn stats(&self) -> EsBuilderStats {
        self.stats
    }

    /// Feeds one TS packet's payload bytes. `pusi` indicates the payload
    /// begins with a new PES header. `discontinuity_indicator` and
    /// `random_access_indicator` come from that packet's adaptation
    /// field, if any, and only take effect when `pusi` is set (they stamp
    /// the access unit this PES carries).
    /// Returns every access unit that completed as a result of this call,
    /// in completion order. Usually at most one, but a PUSI that both
    /// flushes an in-progress unbounded unit and immediately completes the
    /// one it starts (e.g. a zero-payload audio ES) yields two.
    pub fn feed(
        &mut self,
        pusi: bool,
        discontinuity_indicator: bool,
        random_access_indicator: bool,
        payload: &[u8],
    ) -> Result<Vec<AccessUnit>, DecodeError> {
        let mut completed = Vec::new();
        if pusi {
            completed.extend(self.emit_in_progress());
            let info = PesCodec::decode_header(payload)?;
            let es_bytes = &payload[info.payload_offset..];
            let header_overhead = info.payload_offset - 6;
            let declared_length = if info.pes_packet_length == 0 {
                0
            } else {
                (info.pes_packet_length as usize).saturating_sub(header_overhead)
            };
            if discontinuity_indicator {
                self.stats.discontinuities += 1;
            }
            self.stats.bytes_collected += es_bytes.len() as u64;
            self.state = State::Collecting {
                declared_length,
                collected: es_bytes.to_vec(),
                pts: info.pts,
                dts: info.dts,
                is_discontinuous: discontinuity_indicator,
                is_random_access_point: random_access_indicator,
            };
            completed.extend(self.complete_if_ready());
        } else {
            match &mut self.state {
                State::Collecting { collected, .. } => {
                    collected.extend_from_slice(payload);
                    self.stats.bytes_collected += payload.len() as u64;
                    completed.extend(self.complete_if_ready());
                }
                State::Idle => {}
            }
        }
        Ok(completed)
    }

    /// Discards an in-progress access unit after a continuity gap on this PID.
    pub fn discard_in_progress(&mut self) {
        if matches!(self.state, State::Collecting { .. }) {
            self.state = State::Idle;
            self.stats.discarded_packet_count += 1;
        }
    }

    fn complete_if_ready(&mut self) -> Option<AccessUnit> {
        let ready = matches!(
            &self.state,
            State::Collecting { declared_length, collected, .. }
                if *declared_length != 0 && collected.len() >= *declared_length
        );
        if ready {
            self.emit_in_progress()
        } else {
            None
        }
    }

    fn emit_in_progress(&mut self) -> Option<AccessUnit> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Collecting {
                collected,
                pts,
                dts,
                is_discontinuous,
                is_random_access_point,
                ..
            } => {
                self.stats.access_units_built += 1;
                Some(AccessUnit {
                    pid: self.pid,
                    pts: pts.map(|p| p as i64),
                    dts: dts.map(|p| p as i64),
                    is_discontinuous,
                    is_random_access_point,
                    stream_type: self.stream_type,
                    descriptors: self.descriptors.clone(),
                    payload: collected,
                })
            }
            State::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pes::PesCodec;

    fn pes_packet(stream_type: StreamType, pts: i64, payload: &[u8]) -> Vec<u8> {
        let au = AccessUnit {
            pid: 0x100,
            pts: Some(pts),
            dts: None,
            is_discontinuous: false,
            is_random_access_point: true,
            stream_type,
            descriptors: vec![],
            payload: payload.to_vec(),
        };
        PesCodec::encode(&au, Some(0), crate::pes::MPEGTS_TIMESCALE)
    }

    #[test]
    fn audio_completes_on_declared_length() {
        let mut builder = ElementaryStreamBuilder::new(0x101, StreamType::AacAdts, vec![]);
        let packet = pes_packet(StreamType::AacAdts, 90_000, &[1, 2, 3, 4]);
        let mut aus = builder.feed(true, false, false, &packet).unwrap();
        assert_eq!(aus.len(), 1);
        let au = aus.remove(0);
        assert_eq!(au.payload, vec![1, 2, 3, 4]);
        assert_eq!(au.pts, Some(90_000));
        assert_eq!(builder.stats().access_units_built, 1);
    }

    #[test]
    fn video_completes_on_next_pusi() {
        let mut builder = ElementaryStreamBuilder::new(0x100, StreamType::H264, vec![]);
        let first = pes_packet(StreamType::H264, 0, &[0xAA; 4]);
        assert!(builder.feed(true, false, true, &first).unwrap().is_empty());
        builder.feed(false, false, false, &[0xAA; 4]).unwrap();

        let second = pes_packet(StreamType::H264, 3000, &[0xBB; 2]);
        let mut aus = builder.feed(true, false, false, &second).unwrap();
        assert_eq!(aus.len(), 1);
        let au = aus.remove(0);
        assert_eq!(au.payload, vec![0xAA; 8]);
        assert!(au.is_random_access_point);
    }

    #[test]
    fn cc_gap_discards_in_progress_unit() {
        let mut builder = ElementaryStreamBuilder::new(0x100, StreamType::H264, vec![]);
        let first = pes_packet(StreamType::H264, 0, &[0xAA; 4]);
        builder.feed(true, false, false, &first).unwrap();
        builder.discard_in_progress();
        assert_eq!(builder.stats().discarded_packet_count, 1);

        let second = pes_packet(StreamType::H264, 3000, &[0xBB; 2]);
        let aus = builder.feed(true, false, false, &second).unwrap();
        assert!(aus.is_empty());
        builder.feed(false, false, false, &[]).unwrap();
        let third = pes_packet(StreamType::H264, 6000, &[0xCC; 2]);
        let mut aus = builder.feed(true, false, false, &third).unwrap();
        assert_eq!(aus.len(), 1);
        let au = aus.remove(0);
        assert_eq!(au.payload, vec![0xBB, 0xBB]);
    }

    #[test]
    fn discontinuity_flag_is_stamped_on_access_unit() {
        let mut builder = ElementaryStreamBuilder::new(0x100, StreamType::H264, vec![]);
        let packet = pes_packet(StreamType::H264, 0, &[0xAA; 4]);
        builder.feed(true, true, false, &packet).unwrap();
        let next = pes_packet(StreamType::H264, 3000, &[0xBB; 4]);
        let mut aus = builder.feed(true, false, false, &next).unwrap();
        assert_eq!(aus.len(), 1);
        let au = aus.remove(0);
        assert!(au.is_discontinuous);
        assert_eq!(builder.stats().discontinuities, 1);
    }

    #[test]
    fn pusi_boundary_flush_and_immediate_completion_both_surface() {
        // An unbounded (video) unit mid-collection, followed by a PUSI that
        // starts a PES whose own declared length is already satisfied by
        // the bytes in that same packet (e.g. a zero-length audio ES) must
        // yield both the flushed predecessor and the new unit, not just one.
        let mut builder = ElementaryStreamBuilder::new(0x100, StreamType::H264, vec![]);
        let first = pes_packet(StreamType::H264, 0, &[0xAA; 4]);
        assert!(builder.feed(true, false, true, &first).unwrap().is_empty());

        let second = pes_packet(StreamType::AacAdts, 3000, &[0xBB; 2]);
        let aus = builder.feed(true, false, false, &second).unwrap();
        assert_eq!(aus.len(), 2);
        assert_eq!(aus[0].payload, vec![0xAA; 4]);
        assert_eq!(aus[1].payload, vec![0xBB; 2]);
    }
}
