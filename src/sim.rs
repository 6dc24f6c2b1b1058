//! A software model of the USBv1 peripheral, for tests
//!
//! The model honors the EPR and ISTR write semantics, and derives
//! ISTR.CTR and ISTR.EP_ID from the endpoint registers. The `host_*`
//! methods act out bus transactions the way the serial interface engine
//! would: they check STAT, pick the isochronous buffer by DTOG, move the
//! payload through the PMA, then latch CTR and update STAT / DTOG.

use core::cell::Cell;
use std::vec::Vec;

use crate::{
    descriptor::{rx_block_bytes, RXCOUNT_COUNT_MASK},
    epr::{is_iso, stat_rx, stat_tx, Stat},
    ral::{endpoint::EPR, usb, Interrupts, Registers},
    ENDPOINTS,
};

const PMA_SIZE: usize = 512;

const RC_W0: u32 = EPR::CTR_RX::mask | EPR::CTR_TX::mask;
const TOGGLE: u32 = EPR::DTOG_RX::mask
    | EPR::STAT_RX::mask
    | EPR::DTOG_TX::mask
    | EPR::STAT_TX::mask;
const READ_WRITE: u32 = EPR::EP_TYPE::mask | EPR::EP_KIND::mask | EPR::EA::mask;

const EVENTS: u32 = usb::ISTR::PMAOVR::mask
    | usb::ISTR::ERR::mask
    | usb::ISTR::WKUP::mask
    | usb::ISTR::SUSP::mask
    | usb::ISTR::RESET::mask
    | usb::ISTR::SOF::mask
    | usb::ISTR::ESOF::mask;

pub struct Sim {
    epr: [Cell<u32>; ENDPOINTS],
    events: Cell<u32>,
    cntr: Cell<u32>,
    fnr: Cell<u32>,
    daddr: Cell<u32>,
    btable: Cell<u32>,
    pma: [Cell<u16>; PMA_SIZE / 2],
    power: Cell<bool>,
    vector: Cell<bool>,
}

impl Sim {
    pub fn new() -> Self {
        Sim {
            epr: Default::default(),
            events: Cell::new(0),
            // Reset value: powered down, held in reset.
            cntr: Cell::new(usb::CNTR::PDWN::mask | usb::CNTR::FRES::mask),
            fnr: Cell::new(0),
            daddr: Cell::new(0),
            btable: Cell::new(0),
            pma: core::array::from_fn(|_| Cell::new(0)),
            power: Cell::new(false),
            vector: Cell::new(false),
        }
    }

    /// Overwrite an EPR, bypassing the write semantics
    pub fn load_epr(&self, ep: usize, value: u32) {
        self.epr[ep].set(value);
    }

    /// Latch interrupt events
    pub fn raise(&self, events: Interrupts) {
        debug_assert!(!events.contains(Interrupts::CTR));
        self.events.set(self.events.get() | events.bits());
    }

    /// Drive the D+ line level seen in FNR.RXDP
    pub fn set_rxdp(&self, high: bool) {
        let fnr = self.fnr.get() & !usb::FNR::RXDP::mask;
        self.fnr.set(fnr | if high { usb::FNR::RXDP::mask } else { 0 });
    }

    pub fn set_frame_number(&self, frame: u16) {
        let fnr = self.fnr.get() & !usb::FNR::FN::mask;
        self.fnr.set(fnr | (frame as u32 & usb::FNR::FN::mask));
    }

    pub fn daddr(&self) -> u32 {
        self.daddr.get()
    }

    pub fn btable(&self) -> u32 {
        self.btable.get()
    }

    pub fn is_powered(&self) -> bool {
        self.power.get()
    }

    pub fn is_vector_enabled(&self) -> bool {
        self.vector.get()
    }

    pub fn pma_word(&self, offset: usize) -> u16 {
        self.pma[offset / 2].get()
    }

    fn bdt(&self, ep: usize, slot: usize) -> u16 {
        self.pma_word(ep * 8 + slot)
    }

    fn set_bdt(&self, ep: usize, slot: usize, value: u16) {
        self.pma[(ep * 8 + slot) / 2].set(value);
    }

    fn copy_in(&self, addr: usize, data: &[u8]) {
        for (i, pair) in data.chunks(2).enumerate() {
            let lo = pair[0] as u16;
            let hi = pair.get(1).copied().unwrap_or(0) as u16;
            self.pma[addr / 2 + i].set(lo | hi << 8);
        }
    }

    fn copy_out(&self, addr: usize, n: usize) -> Vec<u8> {
        (0..n)
            .map(|i| {
                let word = self.pma[(addr + i) / 2].get();
                if i % 2 == 0 {
                    word as u8
                } else {
                    (word >> 8) as u8
                }
            })
            .collect()
    }

    fn modify_epr(&self, ep: usize, f: impl FnOnce(u32) -> u32) {
        self.epr[ep].set(f(self.epr[ep].get()));
    }

    fn set_hw_stat_tx(&self, ep: usize, stat: Stat) {
        self.modify_epr(ep, |epr| (epr & !EPR::STAT_TX::mask) | stat.tx());
    }

    fn set_hw_stat_rx(&self, ep: usize, stat: Stat) {
        self.modify_epr(ep, |epr| (epr & !EPR::STAT_RX::mask) | stat.rx());
    }

    /// The host sends a SETUP transaction to a control endpoint
    ///
    /// SETUP is always acknowledged. Both directions are NAKed afterwards.
    pub fn host_setup(&self, ep: usize, setup: [u8; 8]) {
        let rx_count = self.bdt(ep, 6);
        self.copy_in(self.bdt(ep, 4) as usize, &setup);
        self.set_bdt(ep, 6, (rx_count & !RXCOUNT_COUNT_MASK) | 8);
        self.set_hw_stat_tx(ep, Stat::Nak);
        self.set_hw_stat_rx(ep, Stat::Nak);
        self.modify_epr(ep, |epr| {
            epr | EPR::SETUP::mask | EPR::CTR_RX::mask | EPR::DTOG_TX::mask | EPR::DTOG_RX::mask
        });
    }

    /// The host sends an OUT data packet
    ///
    /// Returns `false` if the endpoint didn't accept the packet.
    pub fn host_out(&self, ep: usize, data: &[u8]) -> bool {
        let epr = self.epr[ep].get();
        if stat_rx(epr) != Stat::Valid {
            return false;
        }
        let iso = is_iso(epr);
        let (addr_slot, count_slot) = if iso && epr & EPR::DTOG_RX::mask != 0 {
            (0, 2)
        } else {
            (4, 6)
        };
        let rx_count = self.bdt(ep, count_slot);
        assert!(data.len() <= rx_block_bytes(rx_count), "babble on EP{ep}");
        self.copy_in(self.bdt(ep, addr_slot) as usize, data);
        self.set_bdt(ep, count_slot, (rx_count & !RXCOUNT_COUNT_MASK) | data.len() as u16);
        if !iso {
            self.set_hw_stat_rx(ep, Stat::Nak);
        }
        self.modify_epr(ep, |epr| {
            (epr ^ EPR::DTOG_RX::mask | EPR::CTR_RX::mask) & !EPR::SETUP::mask
        });
        true
    }

    /// The host sends an IN token
    ///
    /// Returns the packet, or `None` if the endpoint didn't respond with data.
    pub fn host_in(&self, ep: usize) -> Option<Vec<u8>> {
        let epr = self.epr[ep].get();
        if stat_tx(epr) != Stat::Valid {
            return None;
        }
        let iso = is_iso(epr);
        let (addr_slot, count_slot) = if iso && epr & EPR::DTOG_TX::mask != 0 {
            (4, 6)
        } else {
            (0, 2)
        };
        let count = (self.bdt(ep, count_slot) & RXCOUNT_COUNT_MASK) as usize;
        let packet = self.copy_out(self.bdt(ep, addr_slot) as usize, count);
        if !iso {
            self.set_hw_stat_tx(ep, Stat::Nak);
        }
        self.modify_epr(ep, |epr| epr ^ EPR::DTOG_TX::mask | EPR::CTR_TX::mask);
        Some(packet)
    }
}

impl Registers for Sim {
    fn epr(&self, ep: usize) -> u32 {
        self.epr[ep].get()
    }
    fn set_epr(&self, ep: usize, value: u32) {
        let old = self.epr[ep].get();
        let rc_w0 = old & value & RC_W0;
        let toggle = (old ^ value) & TOGGLE;
        let rw = value & READ_WRITE;
        let setup = old & EPR::SETUP::mask;
        self.epr[ep].set(rc_w0 | toggle | rw | setup);
    }
    fn istr(&self) -> u32 {
        let pending = self.epr.iter().position(|epr| epr.get() & RC_W0 != 0);
        let ctr = pending.map_or(0, |ep| {
            let dir = if self.epr[ep].get() & EPR::CTR_RX::mask != 0 {
                usb::ISTR::DIR::mask
            } else {
                0
            };
            usb::ISTR::CTR::mask | dir | ep as u32
        });
        self.events.get() | ctr
    }
    fn set_istr(&self, value: u32) {
        self.events.set(self.events.get() & value & EVENTS);
    }
    fn cntr(&self) -> u32 {
        self.cntr.get()
    }
    fn set_cntr(&self, value: u32) {
        self.cntr.set(value);
    }
    fn fnr(&self) -> u32 {
        self.fnr.get()
    }
    fn set_daddr(&self, value: u32) {
        self.daddr.set(value);
    }
    fn set_btable(&self, value: u32) {
        self.btable.set(value);
    }
    fn read_pma(&self, offset: usize) -> u16 {
        self.pma[offset / 2].get()
    }
    fn write_pma(&self, offset: usize, value: u16) {
        self.pma[offset / 2].set(value);
    }
    fn set_power(&self, on: bool) {
        self.power.set(on);
    }
    fn set_vector(&self, enabled: bool) {
        self.vector.set(enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::Sim;
    use crate::ral::{endpoint::EPR, usb, Interrupts, Registers};

    #[test]
    fn ctr_is_derived_from_endpoints() {
        let sim = Sim::new();
        assert_eq!(sim.istr() & usb::ISTR::CTR::mask, 0);
        sim.load_epr(3, EPR::CTR_TX::mask | 3);
        assert_eq!(sim.istr(), usb::ISTR::CTR::mask | 3);
        sim.load_epr(2, EPR::CTR_RX::mask | 2);
        assert_eq!(sim.istr(), usb::ISTR::CTR::mask | usb::ISTR::DIR::mask | 2);
    }

    #[test]
    fn istr_events_clear_on_zero() {
        let sim = Sim::new();
        sim.raise(Interrupts::RESET | Interrupts::SUSP);
        sim.set_istr(!Interrupts::RESET.bits());
        assert_eq!(sim.istr(), Interrupts::SUSP.bits());
        sim.set_istr(0);
        assert_eq!(sim.istr(), 0);
    }
}
