use tokio::task::JoinHandle;
use tracing::trace;

/// Tracks the at-most-one in-flight quote call for one field.
///
/// Every call is tagged with a monotonically increasing sequence number; a
/// resolution may only touch shared state while its number is still the
/// latest. Superseding bumps the number and aborts the outstanding task, so
/// a stale call is torn down rather than merely ignored.
#[derive(Debug, Default)]
pub(crate) struct InflightSlot {
    seq: u64,
    handle: Option<JoinHandle<()>>,
}

impl InflightSlot {
    /// Supersedes any outstanding call and reserves the sequence number for
    /// the next one. The caller spawns the call and hands its handle to
    /// [`track`](Self::track).
    pub fn begin(&mut self) -> u64 {
        self.abort_inflight();
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.handle = Some(handle);
    }

    /// Tears down the outstanding call without starting a new one. Used when
    /// a newer raw edit arrives before it has even become a candidate.
    pub fn supersede(&mut self) {
        self.abort_inflight();
        self.seq = self.seq.wrapping_add(1);
    }

    /// Accepts a resolution if `seq` is still current, releasing the slot.
    /// Returns false for stale resolutions, which the caller must discard.
    pub fn resolve(&mut self, seq: u64) -> bool {
        if seq == self.seq {
            self.handle = None;
            true
        } else {
            trace!(seq, current = self.seq, "Stale resolution discarded");
            false
        }
    }

    pub fn has_inflight(&self) -> bool {
        self.handle.is_some()
    }

    fn abort_inflight(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
