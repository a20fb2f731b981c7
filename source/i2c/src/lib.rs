//! # The I2C service
//!
//! A privileged service that owns the console's three I2C controllers and
//! mediates every transaction against the peripherals behind them. Clients
//! never touch the hardware: they connect to the endpoint for their device
//! category, send command requests, and get result codes back.
//!
//! ## Layers
//!
//! From the hardware up:
//!
//! * [`bus`]: the register block of each controller, a recursive lock per
//!   bus, and the completion signal the bus's interrupt raises.
//! * [`engine`]: single protocol steps (select a device, send a byte, read a
//!   byte, finish, cancel), each of which waits for the completion signal
//!   and reports whether the slave acknowledged.
//! * [`ops`]: whole register operations built from those steps, with
//!   bounded retry. [`I2c`] is the entry point.
//! * [`device`] and [`access`]: the fixed device table, and which
//!   categories may address which devices.
//! * [`dispatch`]: the command table. Decodes requests, checks permissions,
//!   runs operations and encodes replies.
//! * [`session`]: one endpoint per category, one worker thread per session.
//!
//! ## Running the service
//!
//! The platform maps the register blocks (see [`bus::Buses::mmio`]), binds
//! each bus's interrupt to its [`bus::Irq`], calls
//! [`bus::Buses::initialize`], and then runs a [`SessionManager`] until it
//! is sent [`TERMINATE_NOTIFICATION`]:
//!
//! ```rust,ignore
//! let (buses, irqs) = unsafe { Buses::mmio(settings.irq_timeout) }.ok_or(...)?;
//! bind_interrupts(irqs);
//! buses.initialize();
//!
//! let i2c = I2c::new(buses, settings.revision);
//! let manager = SessionManager::new(registry, i2c, settings, notifications)?;
//! manager.run()?;
//! ```
//!
//! Everything above the register blocks is hardware-independent. With the
//! `sim` feature enabled, [`sim`] provides simulated controllers and devices
//! that the whole stack can run against on a host.

pub mod access;
pub mod bus;
pub mod device;
pub mod dispatch;
pub mod engine;
mod error;
pub mod ipc;
pub mod ops;
pub mod port;
pub mod session;
mod settings;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(test)]
pub(crate) mod test_util;

pub use self::{
    error::{Error, Malformed, ResultCode},
    ops::I2c,
    session::{SessionManager, TERMINATE_NOTIFICATION},
    settings::ServiceSettings,
};
