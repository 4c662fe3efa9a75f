//! Grain registry (spec.md §2 component 3, §4.2): one immutable
//! descriptor per implemented instruction variant, looked up by
//! `(opcode, function-code)`.
//!
//! Grounded on the original's two-level dispatch
//! (`grainFactoryLib/grainDependencies.h`, `iGrain_helper_inl.h`): a
//! primary table indexed by opcode, with per-opcode function tables for
//! opcodes that sub-key on function code (operate/FP-operate/misc/PAL).
//! `serializing`/`dual_issue` survive as a `GrainFlags` bitflags, per
//! SPEC_FULL.md §4.2.

use bitflags::bitflags;

use crate::cpu::Cpu;
use crate::pipeline::{ExecOutcome, PipelineSlot};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct GrainFlags: u8 {
        /// Drains the pipeline before dispatch (MB/WMB/PALcode entry).
        const SERIALIZING = 1 << 0;
        const DUAL_ISSUE  = 1 << 1;
    }
}

/// One immutable instruction-variant descriptor. Process-lifetime;
/// the registry only ever hands out `&'static Grain`.
pub struct Grain {
    pub mnemonic: &'static str,
    pub flags: GrainFlags,
    /// Rough relative cost, carried from the original's latency/throughput
    /// hints but not used for timing (no cycle-accurate Non-goal); kept
    /// only so a host can order dual-issue candidates deterministically.
    pub latency_hint: u8,
    pub execute: fn(&mut PipelineSlot, &mut Cpu) -> ExecOutcome,
}

/// ILLEGAL sentinel grain: every unclassified (opcode, function) pair
/// resolves here and raises `OPCDEC` (spec.md §4.2).
pub static ILLEGAL_GRAIN: Grain = Grain {
    mnemonic: "ILLEGAL",
    flags: GrainFlags::empty(),
    latency_hint: 0,
    execute: |_slot, _cpu| ExecOutcome::Fault,
};

/// The registry: primary table by opcode, secondary function-code tables
/// for sub-keyed opcodes (0x10-0x13 operate, 0x14-0x17 FP, 0x18 misc,
/// 0x00 PAL share a single function table each since the grain behavior
/// only depends on function code within the opcode, not on other format
/// fields).
pub struct GrainRegistry {
    primary: [Option<&'static Grain>; 64],
    by_function: std::collections::HashMap<(u8, u32), &'static Grain>,
}

impl GrainRegistry {
    pub fn lookup(&self, opcode: u8, function: u32) -> &'static Grain {
        if let Some(g) = self.by_function.get(&(opcode, function)) {
            return g;
        }
        self.primary[opcode as usize & 0x3F].unwrap_or(&ILLEGAL_GRAIN)
    }

    pub fn register_function(&mut self, opcode: u8, function: u32, grain: &'static Grain) {
        self.by_function.insert((opcode, function), grain);
    }

    pub fn register_opcode(&mut self, opcode: u8, grain: &'static Grain) {
        self.primary[opcode as usize & 0x3F] = Some(grain);
    }
}

impl Default for GrainRegistry {
    fn default() -> Self {
        Self { primary: [None; 64], by_function: std::collections::HashMap::new() }
    }
}

/// Build the default registry used by [`crate::cpu::Cpu`]. Most grains
/// need no dedicated descriptor beyond what `axp_decode::classify`
/// already resolved (the pipeline executes directly off `Semantics` for
/// ALU/memory ops); this registry exists for the minority of mnemonics
/// whose execute action needs pipeline-level state the decoder's
/// semantics bitmask can't express on its own: MB/WMB (serializing) and
/// CALL_PAL (serializing, enters PAL).
pub fn default_registry() -> GrainRegistry {
    static MB: Grain = Grain {
        mnemonic: "MB",
        flags: GrainFlags::SERIALIZING,
        latency_hint: 1,
        execute: |_slot, cpu| {
            cpu.clear_reservation();
            ExecOutcome::Continue
        },
    };
    static WMB: Grain = Grain {
        mnemonic: "WMB",
        flags: GrainFlags::SERIALIZING,
        latency_hint: 1,
        execute: |_slot, cpu| {
            cpu.clear_reservation();
            ExecOutcome::Continue
        },
    };
    static CALL_PAL: Grain = Grain {
        mnemonic: "CALL_PAL",
        flags: GrainFlags::SERIALIZING,
        latency_hint: 1,
        execute: |_slot, _cpu| ExecOutcome::EnterPal,
    };

    let mut reg = GrainRegistry::default();
    reg.register_function(0x18, 0x4000, &MB);
    reg.register_function(0x18, 0x4400, &WMB);
    reg.register_opcode(0x00, &CALL_PAL);
    reg
}
