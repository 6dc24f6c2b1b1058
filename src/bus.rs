//! Interrupt-safe driver access

use crate::{driver::Driver, interrupt::Stack, ral::Registers};
use core::cell::RefCell;
use critical_section::Mutex;

/// A driver that's shared between thread context and the USB interrupt
///
/// Thread-context calls, made through [`with_driver()`](Bus::with_driver),
/// run in a critical section, so they never interleave with the interrupt
/// handler. Place the `Bus` in a `static`, and call
/// [`on_interrupt()`](Bus::on_interrupt) from the USB vector.
pub struct Bus<'a, R> {
    driver: Mutex<RefCell<Driver<'a, R>>>,
}

impl<'a, R: Registers> Bus<'a, R> {
    /// Create a bus from a `Driver`
    pub const fn new(driver: Driver<'a, R>) -> Self {
        Bus {
            driver: Mutex::new(RefCell::new(driver)),
        }
    }

    /// Interrupt-safe, mutable access to the driver
    ///
    /// # Panics
    ///
    /// Panics if called from within a [`Stack`] callback. Callbacks already
    /// receive the driver.
    pub fn with_driver<T>(&self, func: impl FnOnce(&mut Driver<'a, R>) -> T) -> T {
        critical_section::with(|cs| {
            let driver = self.driver.borrow(cs);
            let mut driver = driver.borrow_mut();
            func(&mut driver)
        })
    }

    /// Service the (low-priority) USB interrupt
    pub fn on_interrupt<S: Stack<'a, R> + ?Sized>(&self, stack: &mut S) {
        self.with_driver(|driver| driver.on_interrupt(stack));
    }

    /// Service the high-priority USB interrupt
    ///
    /// Parts with a separate high-priority vector route isochronous and
    /// double-buffered bulk transfers there. The driver handles every
    /// endpoint event from [`on_interrupt()`](Bus::on_interrupt), so this
    /// only acknowledges the vector.
    pub fn on_high_priority_interrupt(&self) {
        trace!("HP INTERRUPT");
    }

    /// Release the driver
    pub fn into_inner(self) -> Driver<'a, R> {
        self.driver.into_inner().into_inner()
    }
}
