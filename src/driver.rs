//! USBv1 driver
//!
//! The driver owns the peripheral registers, the packet memory allocator,
//! and the endpoint table. Your USB stack calls into it from thread
//! context to configure endpoints and prepare transfers, and from its
//! interrupt callbacks to continue control transfers.
//!
//! Thread context calls must not race with the interrupt. Wrap the driver
//! in a [`Bus`](crate::Bus) to get that for free.

use usb_device::{endpoint::EndpointType, UsbError};

use crate::{
    buffer::Allocator,
    descriptor::{rx_block_bytes, rx_count_blocks, Descriptor, TABLE_SIZE},
    endpoint::{Endpoint, EndpointConfig, EndpointStatus, InState, OutState, RxSink, TxSource},
    epr::{is_iso, stat_rx, stat_tx, Epr, Stat},
    ral::{endpoint::EPR, usb, Control, Registers},
    state::State,
    ENDPOINTS,
};

/// EP0 is always a 64 byte control endpoint
const EP0: EndpointConfig = EndpointConfig::control(64);

/// Driver configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Size of the packet memory area, in bytes
    pub pma_size: usize,
    /// Put the transceiver in low-power mode while suspended
    pub low_power_on_suspend: bool,
    /// Enable the start-of-frame interrupt, and call [`Stack::sof`](crate::Stack::sof)
    /// every frame
    pub sof: bool,
}

impl Config {
    pub const fn new() -> Self {
        Config {
            pma_size: 512,
            low_power_on_suspend: false,
            sof: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// A USBv1 driver
///
/// After you create a `Driver` with [`new()`](Driver::new), call
/// [`start()`](Driver::start) to power the peripheral. The driver installs
/// EP0 when the host resets the bus. Install the other endpoints once the
/// host selects a configuration.
pub struct Driver<'a, R> {
    pub(crate) regs: R,
    pub(crate) config: Config,
    pub(crate) state: State,
    pub(crate) saved_state: State,
    pub(crate) address: u8,
    allocator: Allocator,
    /// Allocator position after EP0
    ep0_mark: usize,
    pub(crate) endpoints: [Option<Endpoint<'a>>; ENDPOINTS],
}

impl<'a, R: Registers> Driver<'a, R> {
    /// Create a new `Driver`
    ///
    /// Creation doesn't touch the hardware. The driver starts in
    /// [`State::Stopped`].
    pub const fn new(regs: R, config: Config) -> Self {
        debug_assert!(config.pma_size >= TABLE_SIZE);
        Driver {
            regs,
            config,
            state: State::Stopped,
            saved_state: State::Stopped,
            address: 0,
            allocator: Allocator::new(config.pma_size),
            ep0_mark: TABLE_SIZE,
            endpoints: [const { None }; ENDPOINTS],
        }
    }

    /// Release the registers
    pub fn release(self) -> R {
        self.regs
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn epr(&self, ep: usize) -> Epr<'_, R> {
        Epr::new(&self.regs, ep)
    }

    fn endpoint(&self, ep: usize) -> Result<&Endpoint<'a>, UsbError> {
        self.endpoints
            .get(ep)
            .and_then(Option::as_ref)
            .ok_or(UsbError::InvalidEndpoint)
    }

    /// Power up the peripheral, and enable its interrupt
    ///
    /// Does nothing unless the driver is stopped. Afterwards, the driver is
    /// [`Ready`](State::Ready) for a bus reset.
    pub fn start(&mut self) {
        if self.state != State::Stopped {
            return;
        }
        self.regs.set_power(true);
        // Power up the transceiver, but hold the peripheral in reset.
        self.regs.set_cntr(Control::FRES.bits());
        self.regs.set_vector(true);
        self.regs.set_cntr(0);

        self.address = 0;
        self.endpoints = Default::default();
        self.reset();
        self.state = State::Ready;
        debug!("START");
    }

    /// Disable the interrupt, and power down the peripheral
    ///
    /// Does nothing if the driver is already stopped.
    pub fn stop(&mut self) {
        if self.state == State::Stopped {
            return;
        }
        self.regs.set_vector(false);
        self.regs.set_cntr((Control::PDWN | Control::FRES).bits());
        self.regs.set_power(false);

        self.endpoints = Default::default();
        self.state = State::Stopped;
        debug!("STOP");
    }

    /// Reprogram the peripheral after a bus reset
    ///
    /// Clears pending interrupts, enables the default address, unmasks the
    /// interrupts that the driver handles, releases all packet memory,
    /// and installs EP0.
    pub fn reset(&mut self) {
        self.regs.set_btable(0);
        self.regs.set_istr(0);
        self.regs.set_daddr(usb::DADDR::EF::mask);

        // SOF is a high rate interrupt. Only take it when somebody wants it.
        let mut cntr = Control::CTRM | Control::RESETM | Control::SUSPM | Control::WKUPM;
        if self.config.sof {
            cntr |= Control::SOFM;
        }
        self.regs.set_cntr(cntr.bits());

        self.allocator.reset();
        if let Err(_err) = self.init_endpoint(0, EP0) {
            warn!("EP0 INIT {:?}", _err);
        }
        self.ep0_mark = self.allocator.next();
    }

    /// Enable the device address
    pub fn set_address(&mut self, address: u8) {
        self.address = address;
        self.regs
            .set_daddr((address as u32 & usb::DADDR::ADD::mask) | usb::DADDR::EF::mask);
        debug!("ADDRESS {}", address);
    }

    /// The address assigned by [`set_address()`](Driver::set_address)
    ///
    /// Zero after a bus reset.
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Record a state transition made by the USB stack
    ///
    /// Use this to move into [`Selected`](State::Selected) after
    /// SET_ADDRESS, and back into [`Active`](State::Active) after
    /// SET_CONFIGURATION.
    pub fn set_state(&mut self, state: State) {
        self.state = state;
    }

    /// The frame number of the last SOF
    pub fn frame_number(&self) -> u16 {
        ((self.regs.fnr() & usb::FNR::FN::mask) >> usb::FNR::FN::offset) as u16
    }

    /// The offset of the next packet memory allocation
    pub fn pma_next(&self) -> usize {
        self.allocator.next()
    }

    /// The configuration of an installed endpoint
    pub fn endpoint_config(&self, ep: usize) -> Option<&EndpointConfig> {
        self.endpoint(ep).ok().map(Endpoint::config)
    }

    /// Install an endpoint
    ///
    /// Allocates packet memory for each direction, and programs the buffer
    /// descriptor and the endpoint register. Present directions start out
    /// NAKing, except for isochronous endpoints, which are always valid.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the packet memory overflows, or if an
    /// isochronous endpoint has both directions.
    pub fn init_endpoint(&mut self, ep: usize, config: EndpointConfig) -> Result<(), UsbError> {
        if ep >= ENDPOINTS {
            return Err(UsbError::InvalidEndpoint);
        }
        let iso = config.is_iso();
        // The second buffer of each direction reuses the other direction's slots.
        debug_assert!(
            !iso || config.in_maxsize.is_none() || config.out_maxsize.is_none(),
            "isochronous EP cannot be IN and OUT"
        );

        let ep_type = match config.ep_type {
            EndpointType::Control => EPR::EP_TYPE::RW::Control,
            EndpointType::Isochronous { .. } => EPR::EP_TYPE::RW::Iso,
            EndpointType::Bulk => EPR::EP_TYPE::RW::Bulk,
            EndpointType::Interrupt => EPR::EP_TYPE::RW::Interrupt,
        };
        let mut epr = ep_type << EPR::EP_TYPE::offset;

        let out_maxsize = config.out_maxsize.unwrap_or(0);
        let rx_count = rx_count_blocks(out_maxsize);
        debug_assert!(rx_block_bytes(rx_count) >= out_maxsize as usize);
        let (tx_addr, rx_addr) = self
            .allocator
            .allocate_pair(config.in_maxsize.unwrap_or(0) as usize, out_maxsize as usize)
            .ok_or(UsbError::EndpointMemoryOverflow)?;

        let desc = Descriptor::new(&self.regs, ep);
        desc.set_tx_count0(0);
        desc.set_rx_count0(rx_count);
        desc.set_tx_addr0(tx_addr);
        desc.set_rx_addr0(rx_addr);

        if iso {
            // Both buffers overlap.
            if config.in_maxsize.is_some() {
                epr |= Stat::Valid.tx();
                desc.set_tx_count1(0);
                desc.set_tx_addr1(tx_addr);
            }
            if config.out_maxsize.is_some() {
                epr |= Stat::Valid.rx();
                desc.set_rx_count1(rx_count);
                desc.set_rx_addr1(rx_addr);
            }
        } else {
            if config.in_maxsize.is_some() {
                epr |= Stat::Nak.tx();
            }
            if config.out_maxsize.is_some() {
                epr |= Stat::Nak.rx();
            }
        }

        let reg = self.epr(ep);
        reg.set(epr | ep as u32);
        reg.toggle(epr);

        self.endpoints[ep] = Some(Endpoint::new(config));
        debug!(
            "EP{} INIT {:?} TX {:#X} RX {:#X}",
            ep, config.ep_type, tx_addr, rx_addr
        );
        Ok(())
    }

    /// Disable every endpoint except EP0
    ///
    /// Releases the packet memory of the disabled endpoints.
    pub fn disable_endpoints(&mut self) {
        self.allocator.rewind(self.ep0_mark);
        for ep in 1..ENDPOINTS {
            let reg = self.epr(ep);
            reg.toggle(0);
            reg.set(0);
            self.endpoints[ep] = None;
        }
        debug!("DISABLE ENDPOINTS");
    }

    pub fn status_in(&self, ep: usize) -> Result<EndpointStatus, UsbError> {
        if ep >= ENDPOINTS {
            return Err(UsbError::InvalidEndpoint);
        }
        Ok(stat_tx(self.regs.epr(ep)).into())
    }

    pub fn status_out(&self, ep: usize) -> Result<EndpointStatus, UsbError> {
        if ep >= ENDPOINTS {
            return Err(UsbError::InvalidEndpoint);
        }
        Ok(stat_rx(self.regs.epr(ep)).into())
    }

    /// Copy the last SETUP packet out of the endpoint's RX buffer
    ///
    /// Call this from [`Stack::setup`](crate::Stack::setup).
    pub fn read_setup(&self, ep: usize, setup: &mut [u8; 8]) -> Result<(), UsbError> {
        self.endpoint(ep)?;
        let desc = Descriptor::new(&self.regs, ep);
        crate::packet::read_to_buffer(&self.regs, desc.rx_addr0(), setup);
        Ok(())
    }

    /// Prepare an OUT transfer of `rxsize` bytes into `sink`
    ///
    /// An `rxsize` of zero expects a single zero-length packet. The
    /// endpoint stays NAKing until you call [`start_out()`](Driver::start_out).
    pub fn prepare_receive(
        &mut self,
        ep: usize,
        sink: RxSink<'a>,
        rxsize: usize,
    ) -> Result<(), UsbError> {
        let endpoint = self
            .endpoints
            .get_mut(ep)
            .and_then(Option::as_mut)
            .ok_or(UsbError::InvalidEndpoint)?;
        let out_maxsize = endpoint
            .config()
            .out_maxsize
            .filter(|&max| max > 0)
            .ok_or(UsbError::InvalidState)?;

        let rxpkts = if rxsize == 0 {
            1
        } else {
            u16::try_from(rxsize.div_ceil(out_maxsize as usize)).unwrap_or(u16::MAX)
        };
        endpoint.set_out_state(OutState::new(sink, rxsize, rxpkts));
        trace!("EP{} PREPARE OUT {} ({} packets)", ep, rxsize, rxpkts);
        Ok(())
    }

    /// Prepare an IN transfer of `txsize` bytes from `source`
    ///
    /// Loads the first packet into the endpoint's TX buffer. The endpoint
    /// stays NAKing until you call [`start_in()`](Driver::start_in).
    pub fn prepare_transmit(
        &mut self,
        ep: usize,
        source: TxSource<'a>,
        txsize: usize,
    ) -> Result<(), UsbError> {
        let available = match source {
            TxSource::Linear(buffer) => buffer.len(),
            TxSource::Queue(queue) => queue.len(),
        };
        if txsize > available {
            return Err(UsbError::BufferOverflow);
        }
        let endpoint = self
            .endpoints
            .get_mut(ep)
            .and_then(Option::as_mut)
            .ok_or(UsbError::InvalidEndpoint)?;
        let in_maxsize = endpoint
            .config()
            .in_maxsize
            .filter(|&max| max > 0)
            .ok_or(UsbError::InvalidState)?;

        let n = txsize.min(in_maxsize as usize);
        // For isochronous endpoints, DTOG_TX selects the buffer that goes out next.
        let epr = self.regs.epr(ep);
        let desc = Descriptor::new(&self.regs, ep);
        desc.set_tx_count0(n as u16);
        if is_iso(epr) && epr & EPR::DTOG_TX::mask != 0 {
            desc.set_tx_count1(n as u16);
        }

        let state = InState::new(source, txsize);
        state.load(&self.regs, desc.tx_addr0(), n);
        endpoint.set_in_state(state);
        trace!("EP{} PREPARE IN {}", ep, txsize);
        Ok(())
    }

    /// Let the endpoint send the prepared packet
    pub fn start_in(&mut self, ep: usize) -> Result<(), UsbError> {
        self.endpoint(ep)?;
        self.epr(ep).set_stat_tx(Stat::Valid);
        Ok(())
    }

    /// Let the endpoint accept a packet
    pub fn start_out(&mut self, ep: usize) -> Result<(), UsbError> {
        self.endpoint(ep)?;
        self.epr(ep).set_stat_rx(Stat::Valid);
        Ok(())
    }

    pub fn stall_in(&mut self, ep: usize) -> Result<(), UsbError> {
        self.endpoint(ep)?;
        self.epr(ep).set_stat_tx(Stat::Stall);
        Ok(())
    }

    pub fn stall_out(&mut self, ep: usize) -> Result<(), UsbError> {
        self.endpoint(ep)?;
        self.epr(ep).set_stat_rx(Stat::Stall);
        Ok(())
    }

    /// Return the IN direction to NAK, unless it's transferring
    pub fn clear_in(&mut self, ep: usize) -> Result<(), UsbError> {
        self.endpoint(ep)?;
        let reg = self.epr(ep);
        if stat_tx(reg.read()) != Stat::Valid {
            reg.set_stat_tx(Stat::Nak);
        }
        Ok(())
    }

    /// Return the OUT direction to NAK, unless it's transferring
    pub fn clear_out(&mut self, ep: usize) -> Result<(), UsbError> {
        self.endpoint(ep)?;
        let reg = self.epr(ep);
        if stat_rx(reg.read()) != Stat::Valid {
            reg.set_stat_rx(Stat::Nak);
        }
        Ok(())
    }

    /// The state of the last IN transfer prepared on `ep`
    pub fn in_state(&self, ep: usize) -> Option<&InState<'a>> {
        self.endpoint(ep).ok()?.in_state()
    }

    /// The state of the last OUT transfer prepared on `ep`
    pub fn out_state(&self, ep: usize) -> Option<&OutState<'a>> {
        self.endpoint(ep).ok()?.out_state()
    }

    pub(crate) fn on_bus_reset(&mut self) {
        self.address = 0;
        self.endpoints.iter_mut().skip(1).for_each(|ep| *ep = None);
        self.reset();
        self.state = State::Active;
    }

    pub(crate) fn on_suspend(&mut self) {
        if self.state != State::Suspended {
            self.saved_state = self.state;
        }
        self.state = State::Suspended;
    }

    pub(crate) fn on_wakeup(&mut self) {
        if self.state == State::Suspended {
            self.state = self.saved_state;
        }
    }

    /// Clear whatever CTR flags are set on an endpoint nobody owns
    pub(crate) fn discard(&self, ep: usize, epr: u32) {
        let reg = self.epr(ep);
        if epr & EPR::CTR_TX::mask != 0 {
            reg.clear_ctr_tx();
        }
        if epr & EPR::CTR_RX::mask != 0 {
            reg.clear_ctr_rx();
        }
    }
}
