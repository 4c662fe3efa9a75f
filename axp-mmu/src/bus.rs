//! Guest physical memory interface (spec.md §6), consumed by the page
//! walker and (indirectly, through the pipeline driver) by ordinary
//! loads/stores. Backend implementations (RAM, MMIO templates, PCI/SCSI
//! device models) live outside this core.

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MemStatus {
    #[error("unaligned guest physical access")]
    Unaligned,
    #[error("access violation at the memory interface")]
    AccessViolation,
    #[error("tlb miss reported by the memory interface")]
    TlbMiss,
    #[error("bus error")]
    BusError,
    #[error("timeout")]
    Timeout,
}

/// The guest-memory boundary contract. `pa` is a guest physical address.
pub trait MemoryBus {
    fn read_u32(&mut self, pa: u64) -> Result<u32, MemStatus>;
    fn read_u64(&mut self, pa: u64) -> Result<u64, MemStatus>;
    fn write_u32(&mut self, pa: u64, val: u32) -> Result<(), MemStatus>;
    fn write_u64(&mut self, pa: u64, val: u64) -> Result<(), MemStatus>;

    fn read_u8(&mut self, pa: u64) -> Result<u8, MemStatus> {
        Ok((self.read_u32(pa & !0x3)? >> ((pa & 0x3) * 8)) as u8)
    }

    fn read_u16(&mut self, pa: u64) -> Result<u16, MemStatus> {
        if pa % 2 != 0 {
            return Err(MemStatus::Unaligned);
        }
        Ok((self.read_u32(pa & !0x3)? >> ((pa & 0x3) * 8)) as u16)
    }
}

/// A flat in-memory `MemoryBus` used by tests and by hosts that haven't
/// wired up a real device bus yet.
#[derive(Debug)]
pub struct FlatMemory {
    data: Vec<u8>,
}

impl FlatMemory {
    pub fn new(size: usize) -> Self {
        Self { data: vec![0u8; size] }
    }

    fn check(&self, pa: u64, len: u64) -> Result<usize, MemStatus> {
        let start = pa as usize;
        let end = start.checked_add(len as usize).ok_or(MemStatus::BusError)?;
        if end > self.data.len() {
            return Err(MemStatus::BusError);
        }
        Ok(start)
    }
}

impl MemoryBus for FlatMemory {
    fn read_u32(&mut self, pa: u64) -> Result<u32, MemStatus> {
        if pa % 4 != 0 {
            return Err(MemStatus::Unaligned);
        }
        let start = self.check(pa, 4)?;
        Ok(u32::from_le_bytes(self.data[start..start + 4].try_into().unwrap()))
    }

    fn read_u64(&mut self, pa: u64) -> Result<u64, MemStatus> {
        if pa % 8 != 0 {
            return Err(MemStatus::Unaligned);
        }
        let start = self.check(pa, 8)?;
        Ok(u64::from_le_bytes(self.data[start..start + 8].try_into().unwrap()))
    }

    fn write_u32(&mut self, pa: u64, val: u32) -> Result<(), MemStatus> {
        if pa % 4 != 0 {
            return Err(MemStatus::Unaligned);
        }
        let start = self.check(pa, 4)?;
        self.data[start..start + 4].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    fn write_u64(&mut self, pa: u64, val: u64) -> Result<(), MemStatus> {
        if pa % 8 != 0 {
            return Err(MemStatus::Unaligned);
        }
        let start = self.check(pa, 8)?;
        self.data[start..start + 8].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }
}
