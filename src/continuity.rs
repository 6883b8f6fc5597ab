//! Per-PID continuity-counter validation, per spec.md §4.7.

/// Outcome of checking one packet's continuity counter against the
/// tracker's last-seen value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuityResult {
    /// First packet seen on this PID, or CC advanced by exactly one.
    Ok,
    /// CC repeated the prior value; legal at most once in a row.
    Duplicate,
    /// CC did not advance by one and wasn't a first repeat.
    Gap { expected: u8, received: u8 },
}

/// Tracks the last continuity counter seen on one PID.
#[derive(Debug, Default)]
pub struct ContinuityTracker {
    last_cc: Option<u8>,
    duplicate_pending: bool,
}

impl ContinuityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks one packet's CC (0..=15). Only call this for packets that
    /// carry payload (`adaptation_field_control` 1 or 3) — adaptation-only
    /// packets do not advance CC and must not be passed here.
    pub fn check(&mut self, cc: u8) -> ContinuityResult {
        match self.last_cc {
            None => {
                self.last_cc = Some(cc);
                self.duplicate_pending = false;
                ContinuityResult::Ok
            }
            Some(last) => {
                if cc == last {
                    if self.duplicate_pending {
                        self.duplicate_pending = false;
                        ContinuityResult::Gap {
                            expected: (last + 1) & 0x0F,
                            received: cc,
                        }
                    } else {
                        self.duplicate_pending = true;
                        ContinuityResult::Duplicate
                    }
                } else if cc == (last + 1) & 0x0F {
                    self.last_cc = Some(cc);
                    self.duplicate_pending = false;
                    ContinuityResult::Ok
                } else {
                    self.last_cc = Some(cc);
                    self.duplicate_pending = false;
                    ContinuityResult::Gap {
                        expected: (last + 1) & 0x0F,
                        received: cc,
                    }
                }
            }
        }
    }

    /// Resets state, e.g. when a PID transitions from excluded to
    /// included, to avoid false gaps from stale state.
    pub fn reset(&mut self) {
        self.last_cc = None;
        self.duplicate_pending = false;
    }
}
