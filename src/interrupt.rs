//! Interrupt service, and the upward interface to the USB stack

use crate::{
    descriptor::{Descriptor, RXCOUNT_COUNT_MASK},
    driver::Driver,
    epr::{is_iso, Epr, Stat},
    ral::{endpoint::EPR, usb, Control, Interrupts, Registers},
    ENDPOINTS,
};

/// Callbacks from the driver to your USB stack
///
/// All callbacks run in interrupt context, from
/// [`on_interrupt()`](Driver::on_interrupt). Each receives the driver, so
/// that it can read the SETUP packet, prepare the next transfer, stall an
/// endpoint, and so on.
///
/// `reset`, `suspend` and `wakeup` are required. The rest default to doing
/// nothing.
pub trait Stack<'a, R: Registers> {
    /// The host reset the bus
    ///
    /// By the time this runs, the driver is already back at address zero,
    /// with only EP0 installed.
    fn reset(&mut self, driver: &mut Driver<'a, R>);
    /// The bus went idle
    fn suspend(&mut self, driver: &mut Driver<'a, R>);
    /// The host resumed the bus
    fn wakeup(&mut self, driver: &mut Driver<'a, R>);
    /// Start of frame
    ///
    /// Only called if [`Config::sof`](crate::Config::sof) is set.
    fn sof(&mut self, driver: &mut Driver<'a, R>) {
        let _ = driver;
    }
    /// A SETUP packet arrived on control endpoint `ep`
    ///
    /// Use [`read_setup()`](Driver::read_setup) to get it.
    fn setup(&mut self, driver: &mut Driver<'a, R>, ep: usize) {
        let _ = (driver, ep);
    }
    /// The IN transfer on `ep` is complete
    fn in_complete(&mut self, driver: &mut Driver<'a, R>, ep: usize) {
        let _ = (driver, ep);
    }
    /// The OUT transfer on `ep` is complete
    ///
    /// The transfer ends when all expected packets arrived, or when the
    /// host sent a short packet.
    fn out_complete(&mut self, driver: &mut Driver<'a, R>, ep: usize) {
        let _ = (driver, ep);
    }
}

impl<'a, R: Registers> Driver<'a, R> {
    /// Service the USB interrupt
    ///
    /// Call this from the USB interrupt handler. It handles bus events,
    /// then drains every pending endpoint event before returning.
    pub fn on_interrupt<S: Stack<'a, R> + ?Sized>(&mut self, stack: &mut S) {
        let istr = Interrupts::from_bits_truncate(self.regs.istr());

        if istr.contains(Interrupts::RESET) {
            self.regs.set_istr(!Interrupts::RESET.bits());
            self.on_bus_reset();
            debug!("RESET");
            stack.reset(self);
        }

        if istr.contains(Interrupts::SUSP) {
            let mut cntr = Control::from_bits_retain(self.regs.cntr()) | Control::FSUSP;
            if self.config.low_power_on_suspend {
                cntr |= Control::LP_MODE;
            }
            self.regs.set_cntr(cntr.bits());
            self.regs.set_istr(!Interrupts::SUSP.bits());
            self.on_suspend();
            debug!("SUSPEND");
            stack.suspend(self);
        }

        if istr.contains(Interrupts::WKUP) {
            let cntr = Control::from_bits_retain(self.regs.cntr());
            if self.regs.fnr() & usb::FNR::RXDP::mask == 0 {
                self.regs.set_cntr((cntr - Control::FSUSP).bits());
                self.on_wakeup();
                debug!("WAKEUP");
                stack.wakeup(self);
            } else if self.config.low_power_on_suspend {
                // Noise on the line. Back to sleep.
                self.regs.set_cntr((cntr | Control::LP_MODE).bits());
            }
            self.regs.set_istr(!Interrupts::WKUP.bits());
        }

        if istr.contains(Interrupts::SOF) {
            stack.sof(self);
            self.regs.set_istr(!Interrupts::SOF.bits());
        }

        loop {
            let istr = self.regs.istr();
            if istr & usb::ISTR::CTR::mask == 0 {
                break;
            }
            let ep = ((istr & usb::ISTR::EP_ID::mask) >> usb::ISTR::EP_ID::offset) as usize;
            if ep >= ENDPOINTS {
                warn!("CTR ON EP{}", ep);
                break;
            }

            let epr = self.regs.epr(ep);
            if self.endpoints[ep].is_none() {
                warn!("EP{} CTR WHILE UNCONFIGURED {:#X}", ep, epr);
                self.discard(ep, epr);
                continue;
            }

            if epr & EPR::CTR_TX::mask != 0 {
                Epr::new(&self.regs, ep).clear_ctr_tx();
                self.on_in(stack, ep, epr);
            }
            if epr & EPR::CTR_RX::mask != 0 {
                Epr::new(&self.regs, ep).clear_ctr_rx();
                self.on_out(stack, ep, epr);
            }
        }
    }

    /// An IN transaction finished. Send the next packet, or complete the transfer.
    fn on_in<S: Stack<'a, R> + ?Sized>(&mut self, stack: &mut S, ep: usize, epr: u32) {
        let iso = is_iso(epr);
        let dtog = epr & EPR::DTOG_TX::mask != 0;
        let desc = Descriptor::new(&self.regs, ep);
        // DTOG_TX already moved on, so the buffer just sent is the one it no longer selects.
        let transmitted = (if iso && !dtog {
            desc.tx_count1()
        } else {
            desc.tx_count0()
        }) & RXCOUNT_COUNT_MASK;

        let Some(endpoint) = self.endpoints.get_mut(ep).and_then(Option::as_mut) else {
            return;
        };
        let in_maxsize = endpoint.config().in_maxsize.unwrap_or(0) as usize;
        let Some(state) = endpoint.in_state_mut() else {
            warn!("EP{} IN COMPLETE WITHOUT TRANSFER", ep);
            return;
        };

        state.txcnt += transmitted as usize;
        let remaining = state.txsize.saturating_sub(state.txcnt);
        if remaining > 0 {
            let n = remaining.min(in_maxsize);
            desc.set_tx_count0(n as u16);
            if iso && dtog {
                desc.set_tx_count1(n as u16);
            }
            state.load(&self.regs, desc.tx_addr0(), n);
            Epr::new(&self.regs, ep).set_stat_tx(Stat::Valid);
            trace!("EP{} IN {}/{}", ep, state.txcnt, state.txsize);
        } else {
            stack.in_complete(self, ep);
        }
    }

    /// An OUT or SETUP transaction finished. Store the packet, then
    /// accept the next one, or complete the transfer.
    fn on_out<S: Stack<'a, R> + ?Sized>(&mut self, stack: &mut S, ep: usize, epr: u32) {
        if epr & EPR::SETUP::mask != 0 {
            if let Some(endpoint) = self.endpoints.get_mut(ep).and_then(Option::as_mut) {
                endpoint.on_setup();
            }
            stack.setup(self, ep);
            return;
        }

        let desc = Descriptor::new(&self.regs, ep);
        let n = ((if is_iso(epr) && epr & EPR::DTOG_RX::mask == 0 {
            desc.rx_count1()
        } else {
            desc.rx_count0()
        }) & RXCOUNT_COUNT_MASK) as usize;

        let Some(endpoint) = self.endpoints.get_mut(ep).and_then(Option::as_mut) else {
            return;
        };
        let out_maxsize = endpoint.config().out_maxsize.unwrap_or(0) as usize;
        let Some(state) = endpoint.out_state_mut() else {
            warn!("EP{} OUT COMPLETE WITHOUT TRANSFER", ep);
            return;
        };

        if !state.store(&self.regs, desc.rx_addr0(), n) {
            warn!("EP{} OUT OVERFLOW {}", ep, n);
        }
        state.rxcnt += n;
        state.rxsize = state.rxsize.saturating_sub(n);
        state.rxpkts = state.rxpkts.saturating_sub(1);

        if n < out_maxsize || state.rxpkts == 0 {
            stack.out_complete(self, ep);
        } else {
            Epr::new(&self.regs, ep).set_stat_rx(Stat::Valid);
            trace!("EP{} OUT {}", ep, state.rxcnt);
        }
    }
}
