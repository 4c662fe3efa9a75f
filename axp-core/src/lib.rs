//! EV6-class Alpha AXP processor core: register/IPR state, the SPAM TLB
//! walker (via `axp-mmu`), the grain registry, fault dispatch, and PAL
//! entry/exit, driven by the per-CPU [`cpu::Cpu`] facade.

pub mod config;
pub mod console;
pub mod cpu;
pub mod exceptions;
pub mod grain;
pub mod hwrpb;
pub mod pal;
pub mod pipeline;
pub mod reservation;
pub mod state;
pub mod va;

pub use config::{Config, ConfigBuilder, ConfigError, PerCpuConfig, VaRanges};
pub use console::{dispatch_cserve, ConsoleService};
pub use cpu::{Cpu, MemAccessError};
pub use exceptions::{DispatchError, EventKind, ExceptionClass, FaultDispatcher, Mces, PendingEvent};
pub use grain::{default_registry, Grain, GrainFlags, GrainRegistry};
pub use hwrpb::{HwrpbParams, HWRPB_BASE};
pub use pal::{build_argument_pack, reset_entry_state, vector_offset, TrapFrame};
pub use pipeline::{calculate_ea, ExecOutcome, PipelineSlot, StageResult};
pub use reservation::Reservation;
pub use state::{CpuState, ProcessorStatus};
pub use va::{classify_address, AddressClass, NullVaObserver, VaObserver};
