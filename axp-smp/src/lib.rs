//! SMP coordinator (spec.md §6, §5 ownership discipline): TLB-shootdown
//! IPI fan-out with ack-counting and a `SMP_BARRIER_TIMEOUT` machine
//! check on timeout.
//!
//! Grounded on `aero-cpu-core`'s tests naming an
//! `InterruptController`/IPI delivery boundary (`tests/interrupts.rs`),
//! generalized here from a single-target x86 IPI into the barrier/ack
//! pattern spec.md §5 describes: "the originating CPU ... sends an IPI
//! ... Target CPUs process the IPI before fetching the next instruction.
//! An ack counter lets the originator wait for completion."

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use axp_types::{Asn, CpuId, Va};

/// The invalidation request carried by a shootdown IPI (spec.md §5's
/// "TBIA/TBIS/IAP + args").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShootdownPayload {
    Tbia,
    Tbiap { asn: Asn },
    Tbis { va: Va, page_shift: u32 },
    Tbisi { va: Va, page_shift: u32 },
    Tbisd { va: Va, page_shift: u32 },
}

struct Mailbox {
    queue: Mutex<VecDeque<ShootdownPayload>>,
    doorbell: Condvar,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self { queue: Mutex::new(VecDeque::new()), doorbell: Condvar::new() }
    }
}

/// One coordinator instance shared by every emulated CPU thread.
pub struct SmpCoordinator {
    mailboxes: Mutex<std::collections::HashMap<CpuId, Arc<Mailbox>>>,
    cpu_count: usize,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SmpError {
    #[error("SMP_BARRIER_TIMEOUT: {acked}/{expected} CPUs acked shootdown within the deadline")]
    BarrierTimeout { acked: usize, expected: usize },
}

impl SmpCoordinator {
    pub fn new(cpu_ids: impl IntoIterator<Item = CpuId>) -> Self {
        let mut mailboxes = std::collections::HashMap::new();
        let mut cpu_count = 0;
        for id in cpu_ids {
            mailboxes.insert(id, Arc::new(Mailbox::default()));
            cpu_count += 1;
        }
        Self { mailboxes: Mutex::new(mailboxes), cpu_count }
    }

    fn mailbox(&self, cpu: CpuId) -> Arc<Mailbox> {
        self.mailboxes
            .lock()
            .expect("smp coordinator mutex poisoned")
            .get(&cpu)
            .expect("post_ipi/pop_ipi on an unregistered CpuId")
            .clone()
    }

    /// Post a single IPI payload to `target`'s mailbox and wake it.
    pub fn post_ipi(&self, target: CpuId, payload: ShootdownPayload) {
        let mb = self.mailbox(target);
        mb.queue.lock().expect("mailbox mutex poisoned").push_back(payload);
        mb.doorbell.notify_all();
    }

    /// Broadcast to every registered CPU except `originator`, then block
    /// until every target has drained and acked its mailbox or `timeout`
    /// elapses, in which case `SMP_BARRIER_TIMEOUT` is returned for the
    /// fault dispatcher to turn into a machine check.
    pub fn shootdown_barrier(
        &self,
        originator: CpuId,
        payload: ShootdownPayload,
        acked: &AckCounter,
        timeout: Duration,
    ) -> Result<(), SmpError> {
        let targets: Vec<CpuId> = self
            .mailboxes
            .lock()
            .expect("smp coordinator mutex poisoned")
            .keys()
            .copied()
            .filter(|&id| id != originator)
            .collect();
        let expected = targets.len();
        tracing::debug!(?originator, ?payload, expected, "broadcasting TLB shootdown");
        for target in &targets {
            self.post_ipi(*target, payload);
        }
        if acked.wait_for(expected, timeout) {
            Ok(())
        } else {
            Err(SmpError::BarrierTimeout { acked: acked.count(), expected })
        }
    }

    /// Drain and process every pending IPI for `cpu`, calling `apply` for
    /// each payload and `on_processed` once per payload so the caller can
    /// bump the originator's ack counter. A target's CPU thread calls
    /// this "before fetching the next instruction" per spec.md §5.
    pub fn drain(&self, cpu: CpuId, mut apply: impl FnMut(ShootdownPayload)) -> usize {
        let mb = self.mailbox(cpu);
        let mut q = mb.queue.lock().expect("mailbox mutex poisoned");
        let mut n = 0;
        while let Some(p) = q.pop_front() {
            apply(p);
            n += 1;
        }
        n
    }

    pub fn cpu_count(&self) -> usize {
        self.cpu_count
    }
}

/// Shared ack counter an originator waits on after a shootdown broadcast.
#[derive(Clone)]
pub struct AckCounter {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl Default for AckCounter {
    fn default() -> Self {
        Self { inner: Arc::new((Mutex::new(0), Condvar::new())) }
    }
}

impl AckCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ack(&self) {
        let (lock, cvar) = &*self.inner;
        let mut n = lock.lock().expect("ack counter mutex poisoned");
        *n += 1;
        cvar.notify_all();
    }

    pub fn count(&self) -> usize {
        *self.inner.0.lock().expect("ack counter mutex poisoned")
    }

    fn wait_for(&self, target: usize, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut n = lock.lock().expect("ack counter mutex poisoned");
        while *n < target {
            let now = Instant::now();
            if now >= deadline {
                return *n >= target;
            }
            let (guard, result) =
                cvar.wait_timeout(n, deadline - now).expect("ack counter mutex poisoned");
            n = guard;
            if result.timed_out() && *n < target {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipi_is_drained_in_order() {
        let coord = SmpCoordinator::new([CpuId(0), CpuId(1)]);
        coord.post_ipi(CpuId(1), ShootdownPayload::Tbia);
        coord.post_ipi(CpuId(1), ShootdownPayload::Tbiap { asn: Asn(4) });
        let mut seen = Vec::new();
        let n = coord.drain(CpuId(1), |p| seen.push(p));
        assert_eq!(n, 2);
        assert_eq!(seen[0], ShootdownPayload::Tbia);
        assert_eq!(seen[1], ShootdownPayload::Tbiap { asn: Asn(4) });
    }

    #[test]
    fn barrier_succeeds_once_every_target_acks() {
        let coord = Arc::new(SmpCoordinator::new([CpuId(0), CpuId(1), CpuId(2)]));
        let acked = AckCounter::new();

        let mut handles = Vec::new();
        for cpu in [CpuId(1), CpuId(2)] {
            let coord = Arc::clone(&coord);
            let acked = acked.clone();
            handles.push(std::thread::spawn(move || {
                // In real use the target CPU thread polls between
                // instructions; here we just wait briefly for the post.
                std::thread::sleep(Duration::from_millis(10));
                coord.drain(cpu, |_| {});
                acked.ack();
            }));
        }

        let result =
            coord.shootdown_barrier(CpuId(0), ShootdownPayload::Tbia, &acked, Duration::from_secs(2));
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn barrier_times_out_when_a_target_never_acks() {
        let coord = SmpCoordinator::new([CpuId(0), CpuId(1)]);
        let acked = AckCounter::new();
        let result = coord.shootdown_barrier(
            CpuId(0),
            ShootdownPayload::Tbia,
            &acked,
            Duration::from_millis(20),
        );
        assert_eq!(result, Err(SmpError::BarrierTimeout { acked: 0, expected: 1 }));
    }
}
