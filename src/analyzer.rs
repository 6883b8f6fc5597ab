//! TR 101 290 first-priority conformance counters, per spec.md §4.11.
//! Grounded on the teacher's counter-accumulation style in
//! `PayloadUnitObject`'s `AppDetails` hooks, generalized into a standalone
//! tee that the demuxer feeds rather than a parser extension point.

use crate::packet::TransportScramblingControl;
use crate::psi::table_id;
use crate::sync::{SyncTracker, SyncTransition};
use std::collections::HashMap;

const PAT_TIMEOUT_MS: u64 = 500;
const PMT_TIMEOUT_MS: u64 = 500;
const PID_TIMEOUT_MS: u64 = 5_000;

/// Priority-1 TR 101 290 counters. These only ever increase; callers that
/// want a rate take two snapshots and subtract.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tr101290Counters {
    pub ts_sync_loss: u64,
    pub sync_byte_error: u64,
    pub pat_error: u64,
    pub cc_error: u64,
    pub pmt_error: u64,
    pub pid_error: u64,
}

/// Everything the analyzer needs to judge one packet, built by the
/// demuxer from state it already has on hand.
pub struct Context<'a> {
    pub pid: u16,
    pub sync_ok: bool,
    pub scrambling_control: TransportScramblingControl,
    /// Whether this packet's continuity check came back a `Gap`.
    pub cc_gap: bool,
    pub now_ms: u64,
    /// `(pid, table_id)` of every section that completed and CRC-validated
    /// while processing this packet.
    pub completed_sections: &'a [(u16, u8)],
    /// PMT PIDs named by the current PAT.
    pub declared_pmt_pids: &'a [u16],
    /// Elementary PIDs named by the current PMTs.
    pub declared_elementary_pids: &'a [u16],
}

/// Accumulates TR 101 290 first-priority counters from a stream of
/// per-packet [`Context`]s. Never fails: a malformed or out-of-spec
/// stream only ever moves a counter, it cannot make `analyze` return an
/// error or make the demuxer that feeds it stop.
pub struct Tr101290Analyzer {
    counters: Tr101290Counters,
    sync: SyncTracker,
    last_pat_section_ms: Option<u64>,
    last_pmt_section_ms: HashMap<u16, u64>,
    last_packet_ms: HashMap<u16, u64>,
}

impl Tr101290Analyzer {
    pub fn new() -> Self {
        Self {
            counters: Tr101290Counters::default(),
            sync: SyncTracker::new(),
            last_pat_section_ms: None,
            last_pmt_section_ms: HashMap::new(),
            last_packet_ms: HashMap::new(),
        }
    }

    pub fn counters(&self) -> Tr101290Counters {
        self.counters
    }

    /// Zeroes all counters without resetting sync/timeout tracking state.
    pub fn reset_counters(&mut self) {
        self.counters = Tr101290Counters::default();
    }

    pub fn analyze(&mut self, ctx: &Context) {
        let was_synced = self.sync.is_synced();
        if was_synced && !ctx.sync_ok {
            self.counters.sync_byte_error += 1;
        }
        if self.sync.observe(ctx.sync_ok) == Some(SyncTransition::Lost) {
            self.counters.ts_sync_loss += 1;
        }

        self.check_pat(ctx);
        self.check_pmt(ctx);

        if ctx.cc_gap {
            self.counters.cc_error += 1;
        }

        self.check_pid_presence(ctx);
    }

    fn check_pat(&mut self, ctx: &Context) {
        if ctx.pid == crate::psi::pat::PAT_PID {
            if ctx.scrambling_control != TransportScramblingControl::NotScrambled {
                self.counters.pat_error += 1;
            }
            for &(pid, tid) in ctx.completed_sections {
                if pid == crate::psi::pat::PAT_PID {
                    if tid == table_id::PAT {
                        self.last_pat_section_ms = Some(ctx.now_ms);
                    } else {
                        self.counters.pat_error += 1;
                    }
                }
            }
        }
        match self.last_pat_section_ms {
            Some(last) if ctx.now_ms.saturating_sub(last) > PAT_TIMEOUT_MS => {
                self.counters.pat_error += 1;
                self.last_pat_section_ms = Some(ctx.now_ms);
            }
            None if ctx.now_ms > PAT_TIMEOUT_MS => {
                self.counters.pat_error += 1;
                self.last_pat_section_ms = Some(ctx.now_ms);
            }
            _ => {}
        }
    }

    fn check_pmt(&mut self, ctx: &Context) {
        if ctx.declared_pmt_pids.contains(&ctx.pid) {
            if ctx.scrambling_control != TransportScramblingControl::NotScrambled {
                self.counters.pmt_error += 1;
            }
            for &(pid, tid) in ctx.completed_sections {
                if pid == ctx.pid && tid == table_id::PMT {
                    self.last_pmt_section_ms.insert(pid, ctx.now_ms);
                }
            }
        }
        for &pmt_pid in ctx.declared_pmt_pids {
            match self.last_pmt_section_ms.get(&pmt_pid).copied() {
                Some(last) if ctx.now_ms.saturating_sub(last) > PMT_TIMEOUT_MS => {
                    self.counters.pmt_error += 1;
                    self.last_pmt_section_ms.insert(pmt_pid, ctx.now_ms);
                }
                None => {
                    self.last_pmt_section_ms.insert(pmt_pid, ctx.now_ms);
                }
                _ => {}
            }
        }
    }

    fn check_pid_presence(&mut self, ctx: &Context) {
        self.last_packet_ms.insert(ctx.pid, ctx.now_ms);
        for &pid in ctx.declared_elementary_pids {
            match self.last_packet_ms.get(&pid).copied() {
                Some(last) if ctx.now_ms.saturating_sub(last) > PID_TIMEOUT_MS => {
                    self.counters.pid_error += 1;
                    self.last_packet_ms.insert(pid, ctx.now_ms);
                }
                None => {
                    self.last_packet_ms.insert(pid, ctx.now_ms);
                }
                _ => {}
            }
        }
    }
}

impl Default for Tr101290Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pid: u16, now_ms: u64) -> Context<'static> {
        Context {
            pid,
            sync_ok: true,
            scrambling_control: TransportScramblingControl::NotScrambled,
            cc_gap: false,
            now_ms,
            completed_sections: &[],
            declared_pmt_pids: &[],
            declared_elementary_pids: &[],
        }
    }

    #[test]
    fn cc_gap_increments_cc_error() {
        let mut analyzer = Tr101290Analyzer::new();
        let mut c = ctx(0x100, 0);
        c.cc_gap = true;
        analyzer.analyze(&c);
        assert_eq!(analyzer.counters().cc_error, 1);
    }

    #[test]
    fn bad_sync_after_acquisition_counts_sync_byte_error() {
        let mut analyzer = Tr101290Analyzer::new();
        for t in 0..5 {
            analyzer.analyze(&ctx(0x100, t));
        }
        let mut bad = ctx(0x100, 5);
        bad.sync_ok = false;
        analyzer.analyze(&bad);
        assert_eq!(analyzer.counters().sync_byte_error, 1);
    }

    #[test]
    fn pat_missing_past_timeout_increments_pat_error() {
        let mut analyzer = Tr101290Analyzer::new();
        analyzer.analyze(&ctx(0x100, 600));
        assert_eq!(analyzer.counters().pat_error, 1);
    }

    #[test]
    fn pat_section_seen_on_time_avoids_pat_error() {
        let mut analyzer = Tr101290Analyzer::new();
        let mut c = ctx(crate::psi::pat::PAT_PID, 0);
        let sections = [(crate::psi::pat::PAT_PID, table_id::PAT)];
        c.completed_sections = &sections;
        analyzer.analyze(&c);
        analyzer.analyze(&ctx(0x100, 200));
        assert_eq!(analyzer.counters().pat_error, 0);
    }

    #[test]
    fn elementary_pid_absence_past_timeout_increments_pid_error() {
        let mut analyzer = Tr101290Analyzer::new();
        let declared = [0x101u16];
        let mut c0 = ctx(0x101, 0);
        c0.declared_elementary_pids = &declared;
        analyzer.analyze(&c0);

        let mut c1 = ctx(0x999, 6_000);
        c1.declared_elementary_pids = &declared;
        analyzer.analyze(&c1);
        assert_eq!(analyzer.counters().pid_error, 1);
    }
}
