//! Register access layer for the USBv1 peripheral
//!
//! There's no vendor RAL that covers every chip with this peripheral, so we
//! describe the register block here. The field modules follow the layout that
//! `ral-registers` expects, so the usual `read_reg!`, `write_reg!`, and
//! `modify_reg!` macros work on the block.
//!
//! It also adds some enhancements for endpoint register access, and the
//! [`Registers`] seam that the driver is written against.

#![allow(non_snake_case, non_upper_case_globals)]

use ral_registers::{read_reg, write_reg, RORegister, RWRegister};

use crate::Peripherals;

/// Number of endpoint registers
pub const EPR_COUNT: usize = 8;

/// USBv1 register block
#[repr(C)]
pub struct RegisterBlock {
    pub EPR: [RWRegister<u32>; EPR_COUNT],
    _reserved0: [u32; 8],
    pub CNTR: RWRegister<u32>,
    pub ISTR: RWRegister<u32>,
    pub FNR: RORegister<u32>,
    pub DADDR: RWRegister<u32>,
    pub BTABLE: RWRegister<u32>,
}

const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 0x54) as usize];

/// The RAL API requires us to treat all endpoint registers as unique.
/// We can make it a little easier with this function, the `Epr` type,
/// and the field module.
#[allow(dead_code)]
pub mod endpoint {
    use super::{RWRegister, RegisterBlock};

    pub struct Epr<'a> {
        pub EPR: &'a RWRegister<u32>,
    }

    pub fn register(usb: &RegisterBlock, endpoint: usize) -> Epr<'_> {
        Epr {
            EPR: &usb.EPR[endpoint],
        }
    }

    pub mod EPR {
        pub mod CTR_RX {
            pub const offset: u32 = 15;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod DTOG_RX {
            pub const offset: u32 = 14;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod STAT_RX {
            pub const offset: u32 = 12;
            pub const mask: u32 = 0b11 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {
                pub const Disabled: u32 = 0b00;
                pub const Stall: u32 = 0b01;
                pub const Nak: u32 = 0b10;
                pub const Valid: u32 = 0b11;
            }
        }
        pub mod SETUP {
            pub const offset: u32 = 11;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod EP_TYPE {
            pub const offset: u32 = 9;
            pub const mask: u32 = 0b11 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {
                pub const Bulk: u32 = 0b00;
                pub const Control: u32 = 0b01;
                pub const Iso: u32 = 0b10;
                pub const Interrupt: u32 = 0b11;
            }
        }
        pub mod EP_KIND {
            pub const offset: u32 = 8;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod CTR_TX {
            pub const offset: u32 = 7;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod DTOG_TX {
            pub const offset: u32 = 6;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod STAT_TX {
            pub const offset: u32 = 4;
            pub const mask: u32 = 0b11 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {
                pub const Disabled: u32 = 0b00;
                pub const Stall: u32 = 0b01;
                pub const Nak: u32 = 0b10;
                pub const Valid: u32 = 0b11;
            }
        }
        pub mod EA {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0xF << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }
}

#[allow(dead_code)]
pub mod usb {
    pub mod CNTR {
        pub mod CTRM {
            pub const offset: u32 = 15;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod PMAOVRM {
            pub const offset: u32 = 14;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod ERRM {
            pub const offset: u32 = 13;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod WKUPM {
            pub const offset: u32 = 12;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod SUSPM {
            pub const offset: u32 = 11;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod RESETM {
            pub const offset: u32 = 10;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod SOFM {
            pub const offset: u32 = 9;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod ESOFM {
            pub const offset: u32 = 8;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod RESUME {
            pub const offset: u32 = 4;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod FSUSP {
            pub const offset: u32 = 3;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod LP_MODE {
            pub const offset: u32 = 2;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod PDWN {
            pub const offset: u32 = 1;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod FRES {
            pub const offset: u32 = 0;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod ISTR {
        pub mod CTR {
            pub const offset: u32 = 15;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod PMAOVR {
            pub const offset: u32 = 14;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod ERR {
            pub const offset: u32 = 13;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod WKUP {
            pub const offset: u32 = 12;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod SUSP {
            pub const offset: u32 = 11;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod RESET {
            pub const offset: u32 = 10;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod SOF {
            pub const offset: u32 = 9;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod ESOF {
            pub const offset: u32 = 8;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod DIR {
            pub const offset: u32 = 4;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod EP_ID {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0xF << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod FNR {
        pub mod RXDP {
            pub const offset: u32 = 15;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod RXDM {
            pub const offset: u32 = 14;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod FN {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0x7FF << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod DADDR {
        pub mod EF {
            pub const offset: u32 = 7;
            pub const mask: u32 = 1 << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
        pub mod ADD {
            pub const offset: u32 = 0;
            pub const mask: u32 = 0x7F << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }

    pub mod BTABLE {
        pub mod BTABLE {
            pub const offset: u32 = 3;
            pub const mask: u32 = 0x1FFF << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    }
}

bitflags::bitflags! {
    /// Interrupt events latched in ISTR
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Interrupts : u32 {
        const CTR = usb::ISTR::CTR::mask;
        const PMAOVR = usb::ISTR::PMAOVR::mask;
        const ERR = usb::ISTR::ERR::mask;
        const WKUP = usb::ISTR::WKUP::mask;
        const SUSP = usb::ISTR::SUSP::mask;
        const RESET = usb::ISTR::RESET::mask;
        const SOF = usb::ISTR::SOF::mask;
        const ESOF = usb::ISTR::ESOF::mask;
    }
}

bitflags::bitflags! {
    /// CNTR interrupt masks and power controls
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Control : u32 {
        const CTRM = usb::CNTR::CTRM::mask;
        const PMAOVRM = usb::CNTR::PMAOVRM::mask;
        const ERRM = usb::CNTR::ERRM::mask;
        const WKUPM = usb::CNTR::WKUPM::mask;
        const SUSPM = usb::CNTR::SUSPM::mask;
        const RESETM = usb::CNTR::RESETM::mask;
        const SOFM = usb::CNTR::SOFM::mask;
        const ESOFM = usb::CNTR::ESOFM::mask;
        const RESUME = usb::CNTR::RESUME::mask;
        const FSUSP = usb::CNTR::FSUSP::mask;
        const LP_MODE = usb::CNTR::LP_MODE::mask;
        const PDWN = usb::CNTR::PDWN::mask;
        const FRES = usb::CNTR::FRES::mask;
    }
}

/// How the CPU sees the packet memory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PmaLayout {
    /// Half-words are contiguous ("1x16"), as on F0, L0, L4, and G4 parts.
    #[default]
    Packed,
    /// Each half-word occupies the low half of a 32-bit slot ("2x16"),
    /// as on F1 and F3 parts.
    Sparse,
}

/// Value-level access to a USBv1 peripheral
///
/// The driver performs every hardware access through this trait. The crate
/// implements it for [`Instances`], which talks to the real register block.
/// Implement it yourself to run the driver against a simulated peripheral.
///
/// Register values are handed over exactly as they'll be written. Writes
/// to EPR and ISTR have hardware-defined effects (write-zero-to-clear and
/// write-one-to-toggle bits). An implementation must not mask or
/// interpret the values.
///
/// PMA offsets are byte offsets into the packet memory, as they appear in
/// the buffer descriptor table. They are always even.
pub trait Registers {
    fn epr(&self, endpoint: usize) -> u32;
    fn set_epr(&self, endpoint: usize, value: u32);
    fn istr(&self) -> u32;
    fn set_istr(&self, value: u32);
    fn cntr(&self) -> u32;
    fn set_cntr(&self, value: u32);
    fn fnr(&self) -> u32;
    fn set_daddr(&self, value: u32);
    fn set_btable(&self, value: u32);
    fn read_pma(&self, offset: usize) -> u16;
    fn write_pma(&self, offset: usize, value: u16);

    /// Gate (`false`) or ungate (`true`) the peripheral clock and power
    fn set_power(&self, _on: bool) {}
    /// Enable (`true`) or disable (`false`) the USB interrupt vector(s)
    fn set_vector(&self, _enabled: bool) {}
}

impl<R: Registers + ?Sized> Registers for &R {
    fn epr(&self, endpoint: usize) -> u32 {
        (**self).epr(endpoint)
    }
    fn set_epr(&self, endpoint: usize, value: u32) {
        (**self).set_epr(endpoint, value)
    }
    fn istr(&self) -> u32 {
        (**self).istr()
    }
    fn set_istr(&self, value: u32) {
        (**self).set_istr(value)
    }
    fn cntr(&self) -> u32 {
        (**self).cntr()
    }
    fn set_cntr(&self, value: u32) {
        (**self).set_cntr(value)
    }
    fn fnr(&self) -> u32 {
        (**self).fnr()
    }
    fn set_daddr(&self, value: u32) {
        (**self).set_daddr(value)
    }
    fn set_btable(&self, value: u32) {
        (**self).set_btable(value)
    }
    fn read_pma(&self, offset: usize) -> u16 {
        (**self).read_pma(offset)
    }
    fn write_pma(&self, offset: usize, value: u16) {
        (**self).write_pma(offset, value)
    }
    fn set_power(&self, on: bool) {
        (**self).set_power(on)
    }
    fn set_vector(&self, enabled: bool) {
        (**self).set_vector(enabled)
    }
}

/// Packet memory window
struct Pma {
    base: *mut u8,
    layout: PmaLayout,
}

impl Pma {
    fn read(&self, offset: usize) -> u16 {
        debug_assert!(offset & 1 == 0);
        // Safety: the Peripherals implementation guarantees the window is valid.
        unsafe {
            match self.layout {
                PmaLayout::Packed => (self.base as *const u16).add(offset / 2).read_volatile(),
                PmaLayout::Sparse => (self.base as *const u32).add(offset / 2).read_volatile() as u16,
            }
        }
    }

    fn write(&self, offset: usize, value: u16) {
        debug_assert!(offset & 1 == 0);
        // A regular write can get optimised into a memcpy which wouldn't obey
        // the half-word access rules, so every access is volatile.
        unsafe {
            match self.layout {
                PmaLayout::Packed => (self.base as *mut u16).add(offset / 2).write_volatile(value),
                PmaLayout::Sparse => (self.base as *mut u32)
                    .add(offset / 2)
                    .write_volatile(value as u32),
            }
        }
    }
}

/// The USB register block and packet memory of one peripheral
pub struct Instances<P> {
    peripherals: P,
    usb: &'static RegisterBlock,
    pma: Pma,
}

/// Converts the user's peripherals into the driver's register instances
pub fn instances<P: Peripherals>(peripherals: P) -> Instances<P> {
    // Safety: the Peripherals implementation guarantees that the pointers are
    // valid for the lifetime of the program, and owned by `peripherals`.
    let usb = unsafe { &*(peripherals.usb() as *const RegisterBlock) };
    let pma = Pma {
        base: peripherals.pma() as *mut u8,
        layout: peripherals.pma_layout(),
    };
    Instances {
        peripherals,
        usb,
        pma,
    }
}

impl<P: Peripherals> Instances<P> {
    /// Release the user's peripherals
    pub fn release(self) -> P {
        self.peripherals
    }
}

unsafe impl<P: Send> Send for Instances<P> {}

impl<P: Peripherals> Registers for Instances<P> {
    fn epr(&self, ep: usize) -> u32 {
        let epr = endpoint::register(self.usb, ep);
        read_reg!(endpoint, &epr, EPR)
    }
    fn set_epr(&self, ep: usize, value: u32) {
        let epr = endpoint::register(self.usb, ep);
        write_reg!(endpoint, &epr, EPR, value);
    }
    fn istr(&self) -> u32 {
        read_reg!(usb, self.usb, ISTR)
    }
    fn set_istr(&self, value: u32) {
        write_reg!(usb, self.usb, ISTR, value);
    }
    fn cntr(&self) -> u32 {
        read_reg!(usb, self.usb, CNTR)
    }
    fn set_cntr(&self, value: u32) {
        write_reg!(usb, self.usb, CNTR, value);
    }
    fn fnr(&self) -> u32 {
        read_reg!(usb, self.usb, FNR)
    }
    fn set_daddr(&self, value: u32) {
        write_reg!(usb, self.usb, DADDR, value);
    }
    fn set_btable(&self, value: u32) {
        write_reg!(usb, self.usb, BTABLE, BTABLE: value >> 3);
    }
    fn read_pma(&self, offset: usize) -> u16 {
        self.pma.read(offset)
    }
    fn write_pma(&self, offset: usize, value: u16) {
        self.pma.write(offset, value)
    }
    fn set_power(&self, on: bool) {
        self.peripherals.set_power(on);
    }
    fn set_vector(&self, enabled: bool) {
        self.peripherals.set_vector(enabled);
    }
}
