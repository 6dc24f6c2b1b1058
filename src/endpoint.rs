//! Endpoint configuration and transfer state

use usb_device::endpoint::{EndpointType, IsochronousSynchronizationType, IsochronousUsageType};

use crate::{
    epr::Stat,
    packet,
    queue::{InputQueue, OutputQueue},
    ral::Registers,
    state::Ep0Phase,
};

/// Describes an endpoint to [`Driver::init_endpoint`](crate::Driver::init_endpoint)
///
/// A direction with no max packet size is absent. Absent directions are
/// disabled in hardware, and get no packet memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub ep_type: EndpointType,
    /// Max packet size of the IN direction
    pub in_maxsize: Option<u16>,
    /// Max packet size of the OUT direction
    pub out_maxsize: Option<u16>,
}

const ISO: EndpointType = EndpointType::Isochronous {
    synchronization: IsochronousSynchronizationType::NoSynchronization,
    usage: IsochronousUsageType::Data,
};

impl EndpointConfig {
    /// A bidirectional control endpoint
    pub const fn control(max_packet_size: u16) -> Self {
        EndpointConfig {
            ep_type: EndpointType::Control,
            in_maxsize: Some(max_packet_size),
            out_maxsize: Some(max_packet_size),
        }
    }
    pub const fn bulk(in_maxsize: Option<u16>, out_maxsize: Option<u16>) -> Self {
        EndpointConfig {
            ep_type: EndpointType::Bulk,
            in_maxsize,
            out_maxsize,
        }
    }
    pub const fn interrupt(in_maxsize: Option<u16>, out_maxsize: Option<u16>) -> Self {
        EndpointConfig {
            ep_type: EndpointType::Interrupt,
            in_maxsize,
            out_maxsize,
        }
    }
    /// An isochronous IN endpoint
    ///
    /// Isochronous endpoints use both buffer descriptor sets for one direction,
    /// so they can't be bidirectional.
    pub const fn isochronous_in(max_packet_size: u16) -> Self {
        EndpointConfig {
            ep_type: ISO,
            in_maxsize: Some(max_packet_size),
            out_maxsize: None,
        }
    }
    /// An isochronous OUT endpoint
    pub const fn isochronous_out(max_packet_size: u16) -> Self {
        EndpointConfig {
            ep_type: ISO,
            in_maxsize: None,
            out_maxsize: Some(max_packet_size),
        }
    }

    pub fn is_iso(&self) -> bool {
        matches!(self.ep_type, EndpointType::Isochronous { .. })
    }
}

/// Endpoint status, per direction
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointStatus {
    Disabled,
    Stalled,
    /// NAKing or ready for a transaction
    Active,
}

impl From<Stat> for EndpointStatus {
    fn from(stat: Stat) -> Self {
        match stat {
            Stat::Disabled => EndpointStatus::Disabled,
            Stat::Stall => EndpointStatus::Stalled,
            Stat::Nak | Stat::Valid => EndpointStatus::Active,
        }
    }
}

/// Where an IN transfer gets its bytes
pub enum TxSource<'a> {
    Linear(&'a [u8]),
    Queue(&'a OutputQueue<'a>),
}

/// Where an OUT transfer puts its bytes
pub enum RxSink<'a> {
    Linear(&'a mut [u8]),
    Queue(&'a InputQueue<'a>),
}

impl core::fmt::Debug for TxSource<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TxSource::Linear(buffer) => f.debug_tuple("Linear").field(&buffer.len()).finish(),
            TxSource::Queue(_) => f.write_str("Queue"),
        }
    }
}

impl core::fmt::Debug for RxSink<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RxSink::Linear(buffer) => f.debug_tuple("Linear").field(&buffer.len()).finish(),
            RxSink::Queue(_) => f.write_str("Queue"),
        }
    }
}

/// State of an IN transfer
#[derive(Debug)]
pub struct InState<'a> {
    pub(crate) txsize: usize,
    pub(crate) txcnt: usize,
    source: TxSource<'a>,
}

impl<'a> InState<'a> {
    pub(crate) fn new(source: TxSource<'a>, txsize: usize) -> Self {
        InState {
            txsize,
            txcnt: 0,
            source,
        }
    }
    /// Bytes requested
    pub fn txsize(&self) -> usize {
        self.txsize
    }
    /// Bytes already sent
    pub fn txcnt(&self) -> usize {
        self.txcnt
    }

    /// Copy the next `n` bytes of the transfer into the TX buffer at `addr`
    pub(crate) fn load<R: Registers>(&self, regs: &R, addr: usize, n: usize) {
        match self.source {
            TxSource::Linear(buffer) => {
                let rest = buffer.get(self.txcnt..).unwrap_or_default();
                packet::write_from_buffer(regs, addr, &rest[..n.min(rest.len())]);
            }
            TxSource::Queue(queue) => packet::write_from_queue(regs, addr, queue, n),
        }
    }
}

/// State of an OUT transfer
#[derive(Debug)]
pub struct OutState<'a> {
    pub(crate) rxsize: usize,
    pub(crate) rxcnt: usize,
    pub(crate) rxpkts: u16,
    sink: RxSink<'a>,
}

impl<'a> OutState<'a> {
    pub(crate) fn new(sink: RxSink<'a>, rxsize: usize, rxpkts: u16) -> Self {
        OutState {
            rxsize,
            rxcnt: 0,
            rxpkts,
            sink,
        }
    }
    /// Bytes still expected
    pub fn rxsize(&self) -> usize {
        self.rxsize
    }
    /// Bytes received
    pub fn rxcnt(&self) -> usize {
        self.rxcnt
    }
    /// Packets still expected
    pub fn rxpkts(&self) -> u16 {
        self.rxpkts
    }
    /// The bytes received into a linear sink
    ///
    /// Always empty for a queue sink. Read the queue instead.
    pub fn received(&self) -> &[u8] {
        match &self.sink {
            RxSink::Linear(buffer) => &buffer[..self.rxcnt.min(buffer.len())],
            RxSink::Queue(_) => &[],
        }
    }

    /// Copy `n` bytes out of the RX buffer at `addr` into the sink
    ///
    /// Returns `false` if the sink couldn't take every byte.
    pub(crate) fn store<R: Registers>(&mut self, regs: &R, addr: usize, n: usize) -> bool {
        match &mut self.sink {
            RxSink::Linear(buffer) => {
                let rest = buffer.get_mut(self.rxcnt..).unwrap_or_default();
                let fits = n.min(rest.len());
                packet::read_to_buffer(regs, addr, &mut rest[..fits]);
                fits == n
            }
            RxSink::Queue(queue) => packet::read_to_queue(regs, addr, queue, n) == n,
        }
    }
}

/// Transfer state, by endpoint kind
enum Transfers<'a> {
    Duplex {
        tx: Option<InState<'a>>,
        rx: Option<OutState<'a>>,
    },
    Control(Ep0Phase<'a>),
}

/// A configured endpoint
pub struct Endpoint<'a> {
    config: EndpointConfig,
    transfers: Transfers<'a>,
}

impl<'a> Endpoint<'a> {
    pub fn new(config: EndpointConfig) -> Self {
        let transfers = if config.ep_type == EndpointType::Control {
            Transfers::Control(Ep0Phase::Idle)
        } else {
            Transfers::Duplex { tx: None, rx: None }
        };
        Endpoint { config, transfers }
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn in_state(&self) -> Option<&InState<'a>> {
        match &self.transfers {
            Transfers::Duplex { tx, .. } => tx.as_ref(),
            Transfers::Control(phase) => phase.in_state(),
        }
    }

    pub fn in_state_mut(&mut self) -> Option<&mut InState<'a>> {
        match &mut self.transfers {
            Transfers::Duplex { tx, .. } => tx.as_mut(),
            Transfers::Control(phase) => phase.in_state_mut(),
        }
    }

    pub fn out_state(&self) -> Option<&OutState<'a>> {
        match &self.transfers {
            Transfers::Duplex { rx, .. } => rx.as_ref(),
            Transfers::Control(phase) => phase.out_state(),
        }
    }

    pub fn out_state_mut(&mut self) -> Option<&mut OutState<'a>> {
        match &mut self.transfers {
            Transfers::Duplex { rx, .. } => rx.as_mut(),
            Transfers::Control(phase) => phase.out_state_mut(),
        }
    }

    /// The control phase, or `None` for other endpoint types
    #[cfg(test)]
    pub fn phase(&self) -> Option<&Ep0Phase<'a>> {
        match &self.transfers {
            Transfers::Control(phase) => Some(phase),
            Transfers::Duplex { .. } => None,
        }
    }

    pub fn set_in_state(&mut self, state: InState<'a>) {
        match &mut self.transfers {
            Transfers::Duplex { tx, .. } => *tx = Some(state),
            Transfers::Control(phase) => *phase = Ep0Phase::In(state),
        }
    }

    pub fn set_out_state(&mut self, state: OutState<'a>) {
        match &mut self.transfers {
            Transfers::Duplex { rx, .. } => *rx = Some(state),
            Transfers::Control(phase) => *phase = Ep0Phase::Out(state),
        }
    }

    /// A SETUP ends any transfer in progress on a control endpoint
    pub fn on_setup(&mut self) {
        if let Transfers::Control(phase) = &mut self.transfers {
            *phase = Ep0Phase::Idle;
        }
    }
}
