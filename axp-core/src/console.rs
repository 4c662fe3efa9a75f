//! Console service boundary (spec.md §6): the `CALL_PAL CSERVE` function
//! family. Console I/O backends are out of scope (spec.md §1); this
//! trait is the contract a host implements to supply them.

use axp_mmu::MemoryBus;

pub const CSERVE_GETC: u64 = 0x01;
pub const CSERVE_PUTC: u64 = 0x02;
pub const CSERVE_PUTS: u64 = 0x04;

/// Implemented by the host; the core only knows the CSERVE function
/// numbers and their register conventions (spec.md §6).
pub trait ConsoleService {
    /// `GETC`: next input byte, or `None` if none available (the core
    /// maps `None` to `u64::MAX` in R0).
    fn getc(&mut self) -> Option<u8>;

    /// `PUTC`: write a single byte.
    fn putc(&mut self, byte: u8);
}

/// Dispatch a `CSERVE` call. `function` and `r16`/`r17` come from the
/// guest's CALL_PAL argument registers; returns the value to place in R0.
pub fn dispatch_cserve(
    console: &mut dyn ConsoleService,
    mem: &mut dyn MemoryBus,
    function: u64,
    r16: u64,
    r17: u64,
) -> u64 {
    match function {
        CSERVE_GETC => console.getc().map(|b| b as u64).unwrap_or(u64::MAX),
        CSERVE_PUTC => {
            console.putc(r16 as u8);
            0
        }
        CSERVE_PUTS => puts(console, mem, r16, r17),
        _ => u64::MAX,
    }
}

/// `PUTS`: write `r17` bytes from guest VA `r16`; returns bytes written,
/// or `u64::MAX` (-1) on a fault reading guest memory. The VA here has
/// already been translated to PA by the caller's normal load path in a
/// complete implementation; this helper takes a PA directly to keep the
/// console boundary free of a dependency on the translation context.
fn puts(console: &mut dyn ConsoleService, mem: &mut dyn MemoryBus, pa: u64, len: u64) -> u64 {
    for i in 0..len {
        match mem.read_u8(pa + i) {
            Ok(b) => console.putc(b),
            Err(_) => return u64::MAX,
        }
    }
    len
}
