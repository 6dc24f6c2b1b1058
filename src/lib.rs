//! A USB device driver for packet-memory (USBv1) peripherals
//!
//! `usbv1-lld` drives the full-speed USB device peripheral found on many
//! STM32 parts (F0, F1, F3, L0, L1, L4, G4, and friends). That peripheral
//! shares a small packet memory area (PMA) between all endpoints, and controls
//! each endpoint through one register with a mix of write-to-clear,
//! write-to-toggle, and plain read-write bits.
//!
//! The driver is interrupt driven. Your USB stack configures endpoints and
//! prepares transfers through the [`Driver`] API. The peripheral interrupt then
//! runs [`Driver::on_interrupt`], which moves packets between the PMA and your
//! buffers or [byte queues](queue), and calls back into your [`Stack`] when a
//! transfer completes.
//!
//! To interface the library, you must define a safe implementation of [`Peripherals`].
//! See the peripherals documentation for more information.
//!
//! # Example
//!
//! ```no_run
//! use usbv1_lld::{Bus, Config, Driver, Stack, Registers};
//!
//! struct Usb;
//!
//! unsafe impl usbv1_lld::Peripherals for Usb {
//!     fn usb(&self) -> *const () {
//!         0x4000_5C00 as *const ()
//!     }
//!     fn pma(&self) -> *const () {
//!         0x4000_6000 as *const ()
//!     }
//! }
//!
//! struct Enumeration;
//!
//! impl<'a, R: Registers> Stack<'a, R> for Enumeration {
//!     fn reset(&mut self, _: &mut Driver<'a, R>) {}
//!     fn suspend(&mut self, _: &mut Driver<'a, R>) {}
//!     fn wakeup(&mut self, _: &mut Driver<'a, R>) {}
//!     fn setup(&mut self, driver: &mut Driver<'a, R>, ep: usize) {
//!         let mut setup = [0; 8];
//!         driver.read_setup(ep, &mut setup).unwrap();
//!         // Decode the request...
//!     }
//! }
//!
//! let driver = Driver::new(usbv1_lld::instances(Usb), Config::default());
//! let bus = Bus::new(driver);
//! bus.with_driver(|driver| driver.start());
//!
//! // In the USB interrupt handler:
//! bus.on_interrupt(&mut Enumeration);
//! ```

#![no_std]

#[cfg(test)]
extern crate std;

#[macro_use]
mod log;

mod buffer;
mod bus;
mod descriptor;
mod driver;
mod endpoint;
mod epr;
mod interrupt;
mod packet;
mod ral;
mod state;

pub mod queue;

#[cfg(test)]
mod sim;

pub use bus::Bus;
pub use driver::{Config, Driver};
pub use endpoint::{EndpointConfig, EndpointStatus, InState, OutState, RxSink, TxSource};
pub use interrupt::Stack;
pub use queue::{InputQueue, OutputQueue};
pub use ral::{instances, Control, Instances, Interrupts, PmaLayout, Registers};
pub use state::State;

/// Number of endpoints supported by the peripheral
///
/// Each endpoint has an IN and an OUT direction.
pub const ENDPOINTS: usize = 8;

/// A type that owns a USBv1 peripheral
///
/// An implementation of `Peripherals` is expected to own
///
/// - the USB register block
/// - the packet memory area (PMA)
///
/// for one USB peripheral.
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that
/// owns the register block and packet memory required for all USB
/// operation. The pointers returned by the methods are
/// assumed to be valid, and will be cast to a register
/// definition and to the packet memory window.
///
/// # Example
///
/// A safe implementation of `Peripherals` for an STM32F103. The clock
/// gate and interrupt vector hooks are optional. Supply them when you
/// want [`Driver::start`] and [`Driver::stop`] to manage the clock and
/// the NVIC for you.
///
/// ```
/// use usbv1_lld::{Peripherals, PmaLayout};
///
/// struct Usb {
///     _private: (),
/// }
///
/// unsafe impl Peripherals for Usb {
///     fn usb(&self) -> *const () {
///         0x4000_5C00 as *const ()
///     }
///     fn pma(&self) -> *const () {
///         0x4000_6000 as *const ()
///     }
///     fn pma_layout(&self) -> PmaLayout {
///         PmaLayout::Sparse
///     }
/// }
///
/// let usb = Usb { _private: () };
/// assert_eq!(usb.usb(), 0x4000_5C00 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the USB register block
    /// for this peripheral instance
    fn usb(&self) -> *const ();
    /// Returns the address of the packet memory area
    /// for this peripheral instance
    fn pma(&self) -> *const ();
    /// Describes how the CPU sees the packet memory
    ///
    /// The default is [`PmaLayout::Packed`].
    fn pma_layout(&self) -> PmaLayout {
        PmaLayout::Packed
    }
    /// Gate (`false`) or ungate (`true`) the peripheral clock
    ///
    /// The default implementation does nothing.
    fn set_power(&self, _on: bool) {}
    /// Enable (`true`) or disable (`false`) the USB interrupt vector(s),
    /// including their priorities
    ///
    /// The default implementation does nothing.
    fn set_vector(&self, _enabled: bool) {}
}
