//! Muxer scheduling core: bounded access-unit queue, periodic PSI/PCR, CBR
//! pacing or VBR eager drain, null-packet stuffing. Grounded on spec.md
//! §4.10, in the teacher's builder/settings style (`MuxerSettings` mirrors
//! the validate-at-construction shape of `ConfigError`'s doc comment).

use std::collections::VecDeque;

use crate::descriptor::StreamType;
use crate::error::ConfigError;
use crate::packet::{Pcr, PacketCodec, PACKET_LEN};
use crate::pes::{AccessUnit, PesCodec, MPEGTS_TIMESCALE};
use crate::psi::{ElementaryStreamInfo, Pat, PatEntry, Pmt};

/// DVB SI reserved PID range; ATSC PSIP base PID is reserved individually.
const RESERVED_LOW: u16 = 0x0010;
const RESERVED_HIGH: u16 = 0x001F;
const ATSC_PSIP_RESERVED: u16 = 0x1FFB;
/// Custom PID range settings fields are drawn from.
const CUSTOM_PID_MIN: u16 = 0x0010;
const CUSTOM_PID_MAX: u16 = 0x1FFE;

/// Fixed program number the muxer always advertises (single-program output).
const PROGRAM_NUMBER: u16 = 1;
const TRANSPORT_STREAM_ID: u16 = 1;

/// Immutable muxer configuration, validated once at construction.
///
/// `host_timescale_hz` is not named in spec.md's settings list but is
/// required to drive [`PesCodec`]'s epoch-offset conversion (§4.4); AUs
/// produced by this crate's own [`crate::demux::Demuxer`] are already in
/// the 90 kHz wire timescale, so `MPEGTS_TIMESCALE` is the expected value
/// for a demux-to-mux pipeline, with a different value usable for AUs
/// authored in another clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxerSettings {
    pub pmt_pid: u16,
    pub pcr_pid: u16,
    pub video_pid: u16,
    pub audio_pid: u16,
    pub psi_interval_ms: u64,
    pub pcr_interval_ms: u64,
    /// 0 selects VBR; any other value is the CBR target in kbit/s.
    pub target_bitrate_kbps: u64,
    /// 0 means unbounded (never drops).
    pub max_queued_access_units: usize,
    pub host_timescale_hz: u64,
}

impl MuxerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for &pid in &[self.pmt_pid, self.pcr_pid, self.video_pid, self.audio_pid] {
            if !(CUSTOM_PID_MIN..=CUSTOM_PID_MAX).contains(&pid) {
                return Err(ConfigError::PidOutOfRange(pid));
            }
            if (RESERVED_LOW..=RESERVED_HIGH).contains(&pid) || pid == ATSC_PSIP_RESERVED {
                return Err(ConfigError::ReservedPid(pid));
            }
        }
        for &other in &[self.pcr_pid, self.video_pid, self.audio_pid] {
            if other == self.pmt_pid {
                return Err(ConfigError::PidCollision(self.pmt_pid));
            }
        }
        if self.video_pid == self.audio_pid {
            return Err(ConfigError::PidCollision(self.video_pid));
        }
        if self.psi_interval_ms == 0 {
            return Err(ConfigError::NonPositiveInterval(0));
        }
        if self.pcr_interval_ms == 0 {
            return Err(ConfigError::NonPositiveInterval(0));
        }
        if self.host_timescale_hz == 0 {
            return Err(ConfigError::NonPositiveInterval(0));
        }
        Ok(())
    }
}

/// Receives the muxer's output, one 188-byte packet at a time.
pub trait MuxerCallbacks {
    fn on_packet_bytes(&mut self, packet: [u8; PACKET_LEN]);
}

/// Maps a resolved stream type back to the raw PMT `stream_type` byte used
/// to advertise it, per spec.md §6's table (reverse direction of
/// [`crate::descriptor::resolve_stream_type`]).
fn raw_stream_type_for(stream_type: StreamType) -> u8 {
    match stream_type {
        StreamType::Mpeg1Audio => 0x03,
        StreamType::Mpeg2Audio => 0x04,
        StreamType::AacAdts => 0x0F,
        StreamType::AacLatm => 0x11,
        StreamType::H264 => 0x1B,
        StreamType::H265 => 0x24,
        StreamType::Ac3 => 0x81,
        StreamType::EnhancedAc3 => 0x87,
        StreamType::Scte35 => 0x86,
        StreamType::Ac4 | StreamType::Teletext | StreamType::Subtitling | StreamType::Unknown(_) => {
            0x06
        }
    }
}

/// Output pipeline for a single-program transport stream: queues access
/// units, paces output at a configured bitrate (or drains eagerly), and
/// emits periodic PAT/PMT and PCR.
pub struct Muxer<C: MuxerCallbacks> {
    settings: MuxerSettings,
    callbacks: C,

    queue: VecDeque<AccessUnit>,
    dropped_access_units: u64,
    epoch: Option<i64>,

    cc: std::collections::HashMap<u16, u8>,
    pat_version: u8,
    pmt_version: u8,
    video_stream_type: StreamType,
    audio_stream_type: StreamType,

    elapsed_total_ms: u64,
    packets_emitted_total: u64,
    last_psi_emit_ms: Option<u64>,
    last_pcr_emit_ms: u64,
}

impl<C: MuxerCallbacks> Muxer<C> {
    /// Fails with [`ConfigError`] if `settings` doesn't validate.
    pub fn new(settings: MuxerSettings, callbacks: C) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            callbacks,
            queue: VecDeque::new(),
            dropped_access_units: 0,
            epoch: None,
            cc: std::collections::HashMap::new(),
            pat_version: 0,
            pmt_version: 0,
            video_stream_type: StreamType::H264,
            audio_stream_type: StreamType::AacAdts,
            elapsed_total_ms: 0,
            packets_emitted_total: 0,
            last_psi_emit_ms: None,
            last_pcr_emit_ms: 0,
        })
    }

    pub fn settings(&self) -> &MuxerSettings {
        &self.settings
    }

    pub fn dropped_access_units(&self) -> u64 {
        self.dropped_access_units
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    /// Queues one access unit for output. Drops the oldest queued unit if
    /// `max_queued_access_units` is nonzero and already at capacity.
    pub fn enqueue_access_unit(&mut self, au: AccessUnit) {
        if self.epoch.is_none() {
            self.epoch = au.pts;
        }
        if au.pid == self.settings.video_pid {
            self.video_stream_type = au.stream_type;
        } else if au.pid == self.settings.audio_pid {
            self.audio_stream_type = au.stream_type;
        }
        let cap = self.settings.max_queued_access_units;
        if cap != 0 && self.queue.len() >= cap {
            self.queue.pop_front();
            self.dropped_access_units += 1;
            log::warn!("muxer: access-unit queue overflow, dropped oldest");
        }
        self.queue.push_back(au);
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let cc = self.cc.entry(pid).or_insert(0);
        let current = *cc;
        *cc = (*cc + 1) & 0x0F;
        current
    }

    fn virtual_time_ms(&self) -> u64 {
        if self.settings.target_bitrate_kbps == 0 {
            0
        } else {
            self.packets_emitted_total * PACKET_LEN as u64 * 8 / self.settings.target_bitrate_kbps
        }
    }

    fn current_pat(&self) -> Pat {
        Pat {
            transport_stream_id: TRANSPORT_STREAM_ID,
            version_number: self.pat_version,
            current_next_indicator: true,
            entries: vec![PatEntry {
                program_number: PROGRAM_NUMBER,
                pid: self.settings.pmt_pid,
            }],
        }
    }

    fn current_pmt(&self) -> Pmt {
        Pmt {
            program_number: PROGRAM_NUMBER,
            version_number: self.pmt_version,
            current_next_indicator: true,
            pcr_pid: self.settings.pcr_pid,
            program_descriptors: vec![],
            streams: vec![
                ElementaryStreamInfo {
                    stream_type: raw_stream_type_for(self.video_stream_type),
                    elementary_pid: self.settings.video_pid,
                    descriptors: vec![],
                },
                ElementaryStreamInfo {
                    stream_type: raw_stream_type_for(self.audio_stream_type),
                    elementary_pid: self.settings.audio_pid,
                    descriptors: vec![],
                },
            ],
        }
    }

    fn emit_psi(&mut self) {
        let pat = self.current_pat();
        let mut pat_payload = vec![0u8];
        pat_payload.extend_from_slice(&pat.encode());
        let mut pat_cc = self.next_cc(0x0000);
        let pat_frames =
            PacketCodec::packetize_payload(&pat_payload, 0x0000, &mut pat_cc, true, None, false);
        self.cc.insert(0x0000, pat_cc);
        for frame in pat_frames {
            self.emit(frame);
        }

        let pmt = self.current_pmt();
        let mut pmt_payload = vec![0u8];
        pmt_payload.extend_from_slice(&pmt.encode());
        let mut pmt_cc = self.next_cc(self.settings.pmt_pid);
        let pmt_frames = PacketCodec::packetize_payload(
            &pmt_payload,
            self.settings.pmt_pid,
            &mut pmt_cc,
            true,
            None,
            false,
        );
        self.cc.insert(self.settings.pmt_pid, pmt_cc);
        for frame in pmt_frames {
            self.emit(frame);
        }
    }

    fn emit_pcr_packet(&mut self, virtual_or_wall_ms: u64) {
        let ticks = virtual_or_wall_ms * 27_000;
        let pcr = Pcr::from_27mhz(ticks);
        let header = crate::packet::PacketHeader::new()
            .with_sync_byte(crate::packet::SYNC_BYTE)
            .with_pid(self.settings.pcr_pid)
            .with_transport_scrambling_control(crate::packet::TransportScramblingControl::NotScrambled);
        let af = crate::packet::AdaptationField::with_pcr(pcr, false, 8);
        self.emit(PacketCodec::encode(header, Some(af), &[]));
    }

    fn emit_access_unit(&mut self, au: AccessUnit) {
        let pes = PesCodec::encode(&au, self.epoch, self.settings.host_timescale_hz);
        let mut cc = self.next_cc(au.pid);
        let frames = PacketCodec::packetize_payload(&pes, au.pid, &mut cc, true, None, au.is_random_access_point);
        self.cc.insert(au.pid, cc);
        for frame in frames {
            self.emit(frame);
        }
    }

    fn emit_null(&mut self) {
        self.emit(PacketCodec::null_packet());
    }

    fn emit(&mut self, frame: [u8; PACKET_LEN]) {
        self.packets_emitted_total += 1;
        self.callbacks.on_packet_bytes(frame);
    }

    /// Advances the muxer by `elapsed_ms` of wall-clock time. `wall_clock_ms`
    /// is an absolute, monotonically non-decreasing clock reading used for
    /// VBR's PCR derivation and PSI scheduling.
    pub fn tick(&mut self, elapsed_ms: u64, wall_clock_ms: u64) {
        let psi_due = self
            .last_psi_emit_ms
            .map_or(true, |last| wall_clock_ms.saturating_sub(last) > self.settings.psi_interval_ms);

        if self.settings.target_bitrate_kbps == 0 {
            self.tick_vbr(psi_due, wall_clock_ms);
        } else {
            self.tick_cbr(elapsed_ms, psi_due, wall_clock_ms);
        }
    }

    fn tick_vbr(&mut self, psi_due: bool, wall_clock_ms: u64) {
        if psi_due {
            self.emit_psi();
            self.last_psi_emit_ms = Some(wall_clock_ms);
        }
        let pcr_due =
            wall_clock_ms.saturating_sub(self.last_pcr_emit_ms) > self.settings.pcr_interval_ms;
        if pcr_due {
            self.emit_pcr_packet(wall_clock_ms);
            self.last_pcr_emit_ms = wall_clock_ms;
        }
        while let Some(au) = self.queue.pop_front() {
            self.emit_access_unit(au);
        }
    }

    fn tick_cbr(&mut self, elapsed_ms: u64, psi_due: bool, wall_clock_ms: u64) {
        self.elapsed_total_ms += elapsed_ms;
        let total_budget_bytes =
            self.settings.target_bitrate_kbps * self.elapsed_total_ms / 8;
        let total_budget_packets = total_budget_bytes / PACKET_LEN as u64;
        let mut psi_due = psi_due;

        while self.packets_emitted_total < total_budget_packets {
            let virtual_ms = self.virtual_time_ms();
            if psi_due {
                self.emit_psi();
                self.last_psi_emit_ms = Some(wall_clock_ms);
                psi_due = false;
                continue;
            }
            let pcr_due = virtual_ms.saturating_sub(self.last_pcr_emit_ms) > self.settings.pcr_interval_ms;
            if pcr_due {
                self.emit_pcr_packet(virtual_ms);
                self.last_pcr_emit_ms = virtual_ms;
                continue;
            }
            let au_ready = self
                .queue
                .front()
                .map_or(false, |au| au.dts.or(au.pts).unwrap_or(0) <= virtual_ms as i64);
            if au_ready {
                if let Some(au) = self.queue.pop_front() {
                    self.emit_access_unit(au);
                }
                continue;
            }
            self.emit_null();
        }
    }
}
