//! Endpoint register helpers
//!
//! An EPR mixes three kinds of bits:
//!
//! - CTR_RX and CTR_TX are cleared by writing zero, and unchanged by writing one.
//! - STAT_RX, STAT_TX, DTOG_RX and DTOG_TX toggle when written with one.
//! - EP_TYPE, EP_KIND and EA are plain read-write.
//!
//! Every EPR write goes through one of the functions here. Each computes
//! the complete word to write back from the value just read. The CTR bits
//! of the untouched direction are always written as one.

use crate::ral::{endpoint::EPR, Registers};

/// Bits that toggle when written with one, plus the read-only SETUP bit
pub const TOGGLE_MASK: u32 = EPR::STAT_TX::mask
    | EPR::DTOG_TX::mask
    | EPR::STAT_RX::mask
    | EPR::DTOG_RX::mask
    | EPR::SETUP::mask;

const CTR: u32 = EPR::CTR_RX::mask | EPR::CTR_TX::mask;

/// Endpoint handshake state, per direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Stat {
    Disabled = EPR::STAT_TX::RW::Disabled,
    Stall = EPR::STAT_TX::RW::Stall,
    Nak = EPR::STAT_TX::RW::Nak,
    Valid = EPR::STAT_TX::RW::Valid,
}

impl Stat {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Stat::Disabled,
            0b01 => Stat::Stall,
            0b10 => Stat::Nak,
            _ => Stat::Valid,
        }
    }
    /// Returns the STAT_TX field for this handshake
    pub const fn tx(self) -> u32 {
        (self as u32) << EPR::STAT_TX::offset
    }
    /// Returns the STAT_RX field for this handshake
    pub const fn rx(self) -> u32 {
        (self as u32) << EPR::STAT_RX::offset
    }
}

/// Returns the STAT_TX field of an EPR value
pub fn stat_tx(epr: u32) -> Stat {
    Stat::from_bits((epr & EPR::STAT_TX::mask) >> EPR::STAT_TX::offset)
}

/// Returns the STAT_RX field of an EPR value
pub fn stat_rx(epr: u32) -> Stat {
    Stat::from_bits((epr & EPR::STAT_RX::mask) >> EPR::STAT_RX::offset)
}

/// Returns `true` if the EPR describes an isochronous endpoint
pub fn is_iso(epr: u32) -> bool {
    (epr & EPR::EP_TYPE::mask) >> EPR::EP_TYPE::offset == EPR::EP_TYPE::RW::Iso
}

/// The word that moves STAT_TX to `stat`
pub fn with_stat_tx(epr: u32, stat: Stat) -> u32 {
    ((epr & !(TOGGLE_MASK & !EPR::STAT_TX::mask)) ^ stat.tx()) | CTR
}

/// The word that moves STAT_RX to `stat`
pub fn with_stat_rx(epr: u32, stat: Stat) -> u32 {
    ((epr & !(TOGGLE_MASK & !EPR::STAT_RX::mask)) ^ stat.rx()) | CTR
}

/// The word that clears CTR_TX
pub fn without_ctr_tx(epr: u32) -> u32 {
    (epr & !(TOGGLE_MASK | EPR::CTR_TX::mask)) | EPR::CTR_RX::mask
}

/// The word that clears CTR_RX
pub fn without_ctr_rx(epr: u32) -> u32 {
    (epr & !(TOGGLE_MASK | EPR::CTR_RX::mask)) | EPR::CTR_TX::mask
}

/// The word that moves every toggle field to the value found in `target`
pub fn toggled(epr: u32, target: u32) -> u32 {
    (epr ^ (target & TOGGLE_MASK)) | CTR
}

/// The word that sets the read-write fields to `value`, leaving the
/// toggle fields and CTR bits alone
pub fn preserved(value: u32) -> u32 {
    (value & !TOGGLE_MASK) | CTR
}

/// Read-modify-write access to one endpoint register
pub struct Epr<'r, R> {
    regs: &'r R,
    ep: usize,
}

impl<'r, R: Registers> Epr<'r, R> {
    pub fn new(regs: &'r R, ep: usize) -> Self {
        debug_assert!(ep < crate::ENDPOINTS);
        Epr { regs, ep }
    }

    pub fn read(&self) -> u32 {
        self.regs.epr(self.ep)
    }

    pub fn set_stat_tx(&self, stat: Stat) {
        self.regs.set_epr(self.ep, with_stat_tx(self.read(), stat));
    }

    pub fn set_stat_rx(&self, stat: Stat) {
        self.regs.set_epr(self.ep, with_stat_rx(self.read(), stat));
    }

    pub fn clear_ctr_tx(&self) {
        self.regs.set_epr(self.ep, without_ctr_tx(self.read()));
    }

    pub fn clear_ctr_rx(&self) {
        self.regs.set_epr(self.ep, without_ctr_rx(self.read()));
    }

    pub fn toggle(&self, target: u32) {
        self.regs.set_epr(self.ep, toggled(self.read(), target));
    }

    pub fn set(&self, value: u32) {
        self.regs.set_epr(self.ep, preserved(value));
    }
}
