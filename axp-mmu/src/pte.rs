//! Canonical in-memory Page Table Entry, and the EV6 ITB/DTB hardware
//! adapter formats used only by the MTPR/MFPR IPR handlers.
//!
//! Grounded on `examples/original_source/pteLib/AlphaPTE_Core.h` and
//! `alpha_pte_traits_ev6_dtb.h`: the canonical PTE packs
//! V/FOE/FOW/FOR/ASM/GH and four mode-paired R/W enable bits into the low
//! 16 bits, with PFN in bits 32..60 (28 bits, the EV6 convention). The
//! EV6 hardware-refill IPR image differs (no FOE, different bit
//! positions) and is converted to/from canonical form at the IPR boundary
//! only; the page walker always works with the canonical form.

use axp_types::bits::{extract, insert};

pub const PTE_BIT_V: u32 = 0;
pub const PTE_BIT_FOE: u32 = 1;
pub const PTE_BIT_FOW: u32 = 2;
pub const PTE_BIT_FOR: u32 = 3;
pub const PTE_BIT_ASM: u32 = 4;
pub const PTE_BIT_GH0: u32 = 5;
pub const PTE_BIT_KRE: u32 = 7;
pub const PTE_BIT_ERE: u32 = 8;
pub const PTE_BIT_SRE: u32 = 9;
pub const PTE_BIT_URE: u32 = 10;
pub const PTE_BIT_KWE: u32 = 11;
pub const PTE_BIT_EWE: u32 = 12;
pub const PTE_BIT_SWE: u32 = 13;
pub const PTE_BIT_UWE: u32 = 14;
pub const PTE_BIT_PFN_LSB: u32 = 32;
pub const PTE_PFN_WIDTH: u32 = 28;

/// The canonical (memory) Page Table Entry. `spec.md`'s data-model row
/// "Canonical PTE".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct CanonicalPte(pub u64);

impl CanonicalPte {
    pub const fn zero() -> Self {
        CanonicalPte(0)
    }

    pub fn valid(&self) -> bool {
        extract(self.0, PTE_BIT_V, 1) != 0
    }

    pub fn set_valid(&mut self, v: bool) {
        self.0 = insert(self.0, PTE_BIT_V, 1, v as u64);
    }

    pub fn fault_on_execute(&self) -> bool {
        extract(self.0, PTE_BIT_FOE, 1) != 0
    }
    pub fn fault_on_write(&self) -> bool {
        extract(self.0, PTE_BIT_FOW, 1) != 0
    }
    pub fn fault_on_read(&self) -> bool {
        extract(self.0, PTE_BIT_FOR, 1) != 0
    }

    pub fn asm(&self) -> bool {
        extract(self.0, PTE_BIT_ASM, 1) != 0
    }
    pub fn set_asm(&mut self, global: bool) {
        self.0 = insert(self.0, PTE_BIT_ASM, 1, global as u64);
    }

    /// Granularity Hint, PTE<6:5>: `0..=3`, block size `8**gh` base pages.
    pub fn gh(&self) -> u8 {
        extract(self.0, PTE_BIT_GH0, 2) as u8
    }
    pub fn set_gh(&mut self, gh: u8) {
        self.0 = insert(self.0, PTE_BIT_GH0, 2, (gh & 0x3) as u64);
    }

    pub fn pfn(&self) -> u64 {
        extract(self.0, PTE_BIT_PFN_LSB, PTE_PFN_WIDTH)
    }
    pub fn set_pfn(&mut self, pfn: u64) {
        self.0 = insert(self.0, PTE_BIT_PFN_LSB, PTE_PFN_WIDTH, pfn);
    }

    /// 8-bit {KRE,ERE,SRE,URE,KWE,EWE,SWE,UWE} permission mask as stored
    /// in the TLB tag, each mode's enable bit independently addressable
    /// per `pteLib/AlphaPTE_Core.h`'s eight `AlphaN_S` constants.
    pub fn perm_mask(&self) -> PermMask {
        let kre = extract(self.0, PTE_BIT_KRE, 1) != 0;
        let ere = extract(self.0, PTE_BIT_ERE, 1) != 0;
        let sre = extract(self.0, PTE_BIT_SRE, 1) != 0;
        let ure = extract(self.0, PTE_BIT_URE, 1) != 0;
        let kwe = extract(self.0, PTE_BIT_KWE, 1) != 0;
        let ewe = extract(self.0, PTE_BIT_EWE, 1) != 0;
        let swe = extract(self.0, PTE_BIT_SWE, 1) != 0;
        let uwe = extract(self.0, PTE_BIT_UWE, 1) != 0;
        PermMask::new(kre, ere, sre, ure, kwe, ewe, swe, uwe)
    }

    /// Sets KRE/ERE/SRE/URE independently. Callers wanting the common
    /// "Executive and Supervisor behave like Kernel" shape pass the same
    /// value for `kre`/`ere`/`sre` explicitly; nothing here assumes it.
    pub fn set_read_permissions(&mut self, kre: bool, ere: bool, sre: bool, ure: bool) {
        self.0 = insert(self.0, PTE_BIT_KRE, 1, kre as u64);
        self.0 = insert(self.0, PTE_BIT_ERE, 1, ere as u64);
        self.0 = insert(self.0, PTE_BIT_SRE, 1, sre as u64);
        self.0 = insert(self.0, PTE_BIT_URE, 1, ure as u64);
    }

    pub fn set_write_permissions(&mut self, kwe: bool, ewe: bool, swe: bool, uwe: bool) {
        self.0 = insert(self.0, PTE_BIT_KWE, 1, kwe as u64);
        self.0 = insert(self.0, PTE_BIT_EWE, 1, ewe as u64);
        self.0 = insert(self.0, PTE_BIT_SWE, 1, swe as u64);
        self.0 = insert(self.0, PTE_BIT_UWE, 1, uwe as u64);
    }
}

/// The 8-bit {KRE,ERE,SRE,URE,KWE,EWE,SWE,UWE} mask a TLB entry tags its
/// PFN with (spec.md's "TLB entry (SPAM)" data-model row).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PermMask(u8);

impl PermMask {
    pub const KRE: u8 = 1 << 0;
    pub const ERE: u8 = 1 << 1;
    pub const SRE: u8 = 1 << 2;
    pub const URE: u8 = 1 << 3;
    pub const KWE: u8 = 1 << 4;
    pub const EWE: u8 = 1 << 5;
    pub const SWE: u8 = 1 << 6;
    pub const UWE: u8 = 1 << 7;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kre: bool,
        ere: bool,
        sre: bool,
        ure: bool,
        kwe: bool,
        ewe: bool,
        swe: bool,
        uwe: bool,
    ) -> Self {
        let mut bits = 0u8;
        if kre {
            bits |= Self::KRE;
        }
        if ere {
            bits |= Self::ERE;
        }
        if sre {
            bits |= Self::SRE;
        }
        if ure {
            bits |= Self::URE;
        }
        if kwe {
            bits |= Self::KWE;
        }
        if ewe {
            bits |= Self::EWE;
        }
        if swe {
            bits |= Self::SWE;
        }
        if uwe {
            bits |= Self::UWE;
        }
        PermMask(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Mode-aware read check per spec.md §4.4 step 3: "Executive/Supervisor
    /// read/write subsume Kernel's; User is strict."
    pub fn can_read(self, mode: axp_types::Mode) -> bool {
        use axp_types::Mode::*;
        match mode {
            Kernel => self.0 & Self::KRE != 0,
            Executive => self.0 & (Self::ERE | Self::KRE) != 0,
            Supervisor => self.0 & (Self::SRE | Self::ERE | Self::KRE) != 0,
            User => self.0 & Self::URE != 0,
        }
    }

    pub fn can_write(self, mode: axp_types::Mode) -> bool {
        use axp_types::Mode::*;
        match mode {
            Kernel => self.0 & Self::KWE != 0,
            Executive => self.0 & (Self::EWE | Self::KWE) != 0,
            Supervisor => self.0 & (Self::SWE | Self::EWE | Self::KWE) != 0,
            User => self.0 & Self::UWE != 0,
        }
    }
}

/// EV6 DTB_PTE hardware-refill write-format adapter
/// (`alpha_pte_traits_ev6_dtb.h`). Converts the MTPR DTB_PTE0/1 image into
/// a [`CanonicalPte`] and back for MFPR. FOE is architecturally absent
/// from the DTB write format (only ITB carries fault-on-execute).
pub struct Ev6DtbAdapter;

impl Ev6DtbAdapter {
    const ASM_BIT: u32 = 34;
    const URE: u32 = 12;
    const SRE: u32 = 11;
    const ERE: u32 = 10;
    const KRE: u32 = 9;
    const UWE: u32 = 8;
    const SWE: u32 = 7;
    const EWE: u32 = 6;
    const KWE: u32 = 5;
    const FOW: u32 = 4;
    const FOR_: u32 = 3;
    const PFN_SHIFT: u32 = 32;
    const PFN_WIDTH: u32 = 28;

    pub fn from_write(raw: u64) -> CanonicalPte {
        let mut p = CanonicalPte::zero();
        let pfn = extract(raw, Self::PFN_SHIFT, Self::PFN_WIDTH);
        p.set_pfn(pfn);
        p.set_asm(extract(raw, Self::ASM_BIT, 1) != 0);

        let kre = extract(raw, Self::KRE, 1) != 0;
        let ere = extract(raw, Self::ERE, 1) != 0;
        let sre = extract(raw, Self::SRE, 1) != 0;
        let ure = extract(raw, Self::URE, 1) != 0;
        p.set_read_permissions(kre, ere, sre, ure);

        let kwe = extract(raw, Self::KWE, 1) != 0;
        let ewe = extract(raw, Self::EWE, 1) != 0;
        let swe = extract(raw, Self::SWE, 1) != 0;
        let uwe = extract(raw, Self::UWE, 1) != 0;
        p.set_write_permissions(kwe, ewe, swe, uwe);

        p.0 = insert(p.0, PTE_BIT_FOW, 1, extract(raw, Self::FOW, 1));
        p.0 = insert(p.0, PTE_BIT_FOR, 1, extract(raw, Self::FOR_, 1));

        if pfn != 0 {
            p.set_valid(true);
        }
        p
    }

    pub fn to_read(p: CanonicalPte) -> u64 {
        let mut raw = 0u64;
        raw |= p.pfn() << Self::PFN_SHIFT;
        if p.asm() {
            raw |= 1 << Self::ASM_BIT;
        }
        let perm = p.perm_mask();
        if perm.bits() & PermMask::KRE != 0 {
            raw |= 1 << Self::KRE;
        }
        if perm.bits() & PermMask::ERE != 0 {
            raw |= 1 << Self::ERE;
        }
        if perm.bits() & PermMask::SRE != 0 {
            raw |= 1 << Self::SRE;
        }
        if perm.bits() & PermMask::URE != 0 {
            raw |= 1 << Self::URE;
        }
        if perm.bits() & PermMask::KWE != 0 {
            raw |= 1 << Self::KWE;
        }
        if perm.bits() & PermMask::EWE != 0 {
            raw |= 1 << Self::EWE;
        }
        if perm.bits() & PermMask::SWE != 0 {
            raw |= 1 << Self::SWE;
        }
        if perm.bits() & PermMask::UWE != 0 {
            raw |= 1 << Self::UWE;
        }
        if p.fault_on_write() {
            raw |= 1 << Self::FOW;
        }
        if p.fault_on_read() {
            raw |= 1 << Self::FOR_;
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pte_accessors_roundtrip() {
        let mut pte = CanonicalPte::zero();
        pte.set_pfn(0x80);
        pte.set_valid(true);
        pte.set_gh(2);
        pte.set_read_permissions(true, true, true, false);
        assert_eq!(pte.pfn(), 0x80);
        assert!(pte.valid());
        assert_eq!(pte.gh(), 2);
        assert!(pte.perm_mask().can_read(axp_types::Mode::Kernel));
        assert!(!pte.perm_mask().can_read(axp_types::Mode::User));
    }

    #[test]
    fn dtb_adapter_roundtrips_perm_and_pfn() {
        let mut pte = CanonicalPte::zero();
        pte.set_pfn(0x1234);
        pte.set_read_permissions(true, true, true, true);
        pte.set_write_permissions(true, true, true, false);
        let raw = Ev6DtbAdapter::to_read(pte);
        let back = Ev6DtbAdapter::from_write(raw);
        assert_eq!(back.pfn(), 0x1234);
        assert!(back.perm_mask().can_read(axp_types::Mode::Kernel));
        assert!(back.perm_mask().can_read(axp_types::Mode::User));
        assert!(back.perm_mask().can_write(axp_types::Mode::Kernel));
        assert!(!back.perm_mask().can_write(axp_types::Mode::User));
    }
}
