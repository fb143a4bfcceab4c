//! Engine entry point: recursion guard, interpreter
//! dispatch, and the outermost-only deferred-FIFO drain.

use crate::buffer::PacketBuffer;
use crate::collaborators::{Collaborators, RateLimiter};
use crate::config::EngineConfig;
use crate::deferred::{DeferredEntry, DeferredFifo};
use crate::error::{EngineError, Result};
use crate::flow_key::FlowKey;
use crate::interpreter;

/// Per-CPU state: recursion counter and deferred FIFO, modeled as an
/// array slot indexed by `cpu_id` rather than a native per-CPU primitive.
/// Accessed through an exclusive `&mut` borrow for the duration of one
/// engine entry: single writer per CPU, enforced by the borrow checker
/// instead of a lock.
struct CpuSlot {
    level: u32,
    deferred: DeferredFifo,
    loop_warn: RateLimiter,
    recursion_exceeded: u64,
}

impl CpuSlot {
    fn new(fifo_capacity: usize) -> Self {
        Self {
            level: 0,
            deferred: DeferredFifo::with_capacity(fifo_capacity),
            loop_warn: RateLimiter::default(),
            recursion_exceeded: 0,
        }
    }
}

/// Plain operational counters for one CPU slot. Snapshotted, not live —
/// there is no atomics-based sharing to worry about since each slot is
/// only ever touched under its own `&mut` borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuMetrics {
    pub recursion_exceeded: u64,
    pub deferred_dropped: u64,
    pub deferred_high_water_mark: usize,
}

/// Owns the per-CPU state arrays and the tunables they're sized from.
pub struct Engine {
    config: EngineConfig,
    cpus: Vec<CpuSlot>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let cpus = (0..config.cpu_count).map(|_| CpuSlot::new(config.deferred_fifo_capacity)).collect();
        Self { config, cpus }
    }

    /// The only public operation: `execute_actions(datapath,
    /// packet, key, actions)`. `datapath` is represented by `collabs`, the
    /// bundle of external collaborator traits; `cpu_id` stands in for "the
    /// CPU currently executing this packet" since there is no real per-CPU
    /// primitive in userspace.
    pub fn execute_actions(
        &mut self,
        cpu_id: usize,
        packet: PacketBuffer,
        mut key: FlowKey,
        actions: &[u8],
        collabs: &mut dyn Collaborators,
    ) -> Result<()> {
        let max_depth = self.config.max_recursion_depth;
        let slot = self
            .cpus
            .get_mut(cpu_id)
            .ok_or_else(|| EngineError::Collaborator(format!("no per-CPU slot for cpu {cpu_id}")))?;

        if slot.level >= max_depth {
            slot.recursion_exceeded += 1;
            if slot.loop_warn.should_log() {
                tracing::warn!(cpu_id, depth = slot.level, "packet loop detected");
            }
            return Err(EngineError::Loop);
        }

        let outermost = slot.level == 0;
        slot.level += 1;

        let result = interpreter::run(packet, &mut key, actions, collabs, &mut slot.deferred, &mut slot.loop_warn);

        if outermost {
            drain(&mut slot.deferred, &mut slot.loop_warn, collabs);
        }

        slot.level -= 1;
        result
    }

    /// Snapshot the operational counters for one CPU slot.
    pub fn metrics(&self, cpu_id: usize) -> Option<CpuMetrics> {
        self.cpus.get(cpu_id).map(|slot| CpuMetrics {
            recursion_exceeded: slot.recursion_exceeded,
            deferred_dropped: slot.deferred.dropped(),
            deferred_high_water_mark: slot.deferred.high_water_mark(),
        })
    }
}

/// Drain the deferred FIFO until empty, honoring entries enqueued during
/// drain. Errors from deferred execution are swallowed — an acknowledged
/// limitation, not a crash path: one bad recirculation shouldn't take the
/// whole drain down.
fn drain(fifo: &mut DeferredFifo, loop_warn: &mut RateLimiter, collabs: &mut dyn Collaborators) {
    while let Some(DeferredEntry { packet, actions, mut key }) = fifo.pop() {
        let outcome = match actions {
            Some(list) => interpreter::run(packet, &mut key, &list, collabs, fifo, loop_warn),
            None => collabs.classify_and_process(packet, key),
        };
        if let Err(error) = outcome {
            tracing::debug!(%error, "deferred action execution failed (not propagated)");
        }
    }
    fifo.reset();
}
