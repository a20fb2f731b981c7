//! # Transaction Engine
//!
//! The individual protocol steps of an I<sup>2</sup>C transaction. Each step
//! programs the controller's `DATA` and `CNT` registers and then blocks until
//! the controller signals completion.
//!
//! A transaction is always some sequence of:
//!
//! ```text
//! select_device -> select_register* -> { begin_read -> read_intermediate* -> finish_read
//!                                      | select_register* -> finish_write }
//! ```
//!
//! with [`Engine::cancel`] issued whenever a step fails partway through.
//!
//! Steps don't take the bus lock themselves; callers must hold it for the
//! whole transaction (see [`crate::ops`]).

use core::fmt;

use crate::{
    bus::{BusState, Cnt},
    device::{DeviceConfig, DeviceId},
};

/// Iterations of the busy-wait between loading an address into `DATA` and
/// issuing `START`.
const SETTLE_SPINS: u32 = 1125;

/// Drives protocol steps against one device.
pub struct Engine<'bus> {
    bus: &'bus BusState,
    device: &'static DeviceConfig,
    id: DeviceId,
}

/// Why a protocol step failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepError {
    /// The slave did not acknowledge.
    Nack,
    /// The controller never signaled completion.
    TimedOut,
}

pub type Step<T = ()> = Result<T, StepError>;

impl<'bus> Engine<'bus> {
    pub fn new(bus: &'bus BusState, id: DeviceId, device: &'static DeviceConfig) -> Self {
        debug_assert_eq!(bus.id(), device.bus);
        Self { bus, device, id }
    }

    pub fn device(&self) -> DeviceId {
        self.id
    }

    /// Address the device for writing.
    pub fn select_device(&self) -> Step {
        tracing::trace!(dev = %self.id, addr = self.device.write_address, "select device");
        self.start(self.device.write_address)
    }

    /// Send one byte in the write direction, with more to follow.
    ///
    /// On the wire, selecting a register and writing an intermediate data
    /// byte are the same step; [`Engine::write_intermediate`] is this step.
    pub fn select_register(&self, byte: u8) -> Step {
        tracing::trace!(dev = %self.id, byte, "write byte");
        let regs = self.bus.regs();
        regs.write_data(byte);
        regs.write_cnt(Cnt::command());
        self.wait()?;
        self.check_ack()
    }

    #[inline]
    pub fn write_intermediate(&self, byte: u8) -> Step {
        self.select_register(byte)
    }

    /// Re-address the device for reading (repeated `START`).
    pub fn begin_read(&self) -> Step {
        tracing::trace!(dev = %self.id, addr = self.device.read_address(), "begin read");
        self.start(self.device.read_address())
    }

    /// Receive a byte and acknowledge it, asking for more.
    ///
    /// The master always acknowledges bytes it receives mid-transfer, so
    /// there is no ack to check.
    pub fn read_intermediate(&self) -> Step<u8> {
        self.bus
            .regs()
            .write_cnt(Cnt::command().with(Cnt::ACK, true).with(Cnt::READ, true));
        self.wait()?;
        let byte = self.bus.regs().read_data();
        tracing::trace!(dev = %self.id, byte, "read intermediate");
        Ok(byte)
    }

    /// Receive the last byte of a read; the master `NACK`s it and sends
    /// `STOP`.
    pub fn finish_read(&self) -> Step<u8> {
        self.bus
            .regs()
            .write_cnt(Cnt::command().with(Cnt::FINISH, true).with(Cnt::READ, true));
        self.wait()?;
        let byte = self.bus.regs().read_data();
        tracing::trace!(dev = %self.id, byte, "finish read");
        Ok(byte)
    }

    /// Send the last byte of a write, followed by `STOP`.
    pub fn finish_write(&self, byte: u8) -> Step {
        tracing::trace!(dev = %self.id, byte, "finish write");
        let regs = self.bus.regs();
        regs.write_data(byte);
        regs.write_cnt(Cnt::command().with(Cnt::FINISH, true));
        self.wait()?;
        self.check_ack()
    }

    /// Abort the transaction and return the bus to idle.
    pub fn cancel(&self) {
        tracing::trace!(dev = %self.id, "cancel transaction");
        self.bus
            .regs()
            .write_cnt(Cnt::command().with(Cnt::FINISH, true).with(Cnt::CANCEL, true));
        if self.wait().is_err() {
            tracing::warn!(dev = %self.id, bus = %self.bus.id(), "bus did not acknowledge cancel");
        }
    }

    fn start(&self, address: u8) -> Step {
        let regs = self.bus.regs();
        regs.write_data(address);
        spin_wait(SETTLE_SPINS);
        // an interrupt that arrived after its step timed out belongs to no one
        self.bus.irq().clear();
        regs.write_cnt(Cnt::command().with(Cnt::START, true));
        self.wait()?;
        self.check_ack()
    }

    fn wait(&self) -> Step {
        self.bus.wait_for_irq().map_err(|_| StepError::TimedOut)
    }

    fn check_ack(&self) -> Step {
        if self.bus.regs().read_cnt().get(Cnt::ACK) {
            Ok(())
        } else {
            Err(StepError::Nack)
        }
    }
}

impl fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("bus", &self.bus.id())
            .field("device", &self.id)
            .finish()
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Nack => f.write_str("not acknowledged"),
            StepError::TimedOut => f.write_str("timed out waiting for bus"),
        }
    }
}

fn spin_wait(n: u32) {
    let mut i = n;
    while i > 2 {
        core::hint::spin_loop();
        i -= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::{BusId, Irq},
        device::Revision,
        sim::{SimBus, SimDevice},
    };
    use std::time::Duration;

    fn bus_with_device() -> (BusState, SimBus) {
        let irq = Irq::new();
        let sim = SimBus::new(irq.clone());
        sim.attach(0x4A, SimDevice::reg8());
        let bus = BusState::new(BusId::Bus0, sim.clone(), irq);
        (bus, sim)
    }

    #[test]
    fn steps_drive_a_write_then_read() {
        let (bus, sim) = bus_with_device();
        let id = DeviceId(0);
        let engine = Engine::new(&bus, id, Revision::Base.device(id).unwrap());

        assert_eq!(engine.select_device(), Ok(()));
        assert_eq!(engine.select_register(0x10), Ok(()));
        assert_eq!(engine.finish_write(0x5A), Ok(()));

        assert_eq!(engine.select_device(), Ok(()));
        assert_eq!(engine.select_register(0x10), Ok(()));
        assert_eq!(engine.begin_read(), Ok(()));
        assert_eq!(engine.finish_read(), Ok(0x5A));

        assert_eq!(sim.device_selects(), 2);
    }

    #[test]
    fn absent_device_is_nacked() {
        let (bus, _sim) = bus_with_device();
        let id = DeviceId(1);
        let engine = Engine::new(&bus, id, Revision::Base.device(id).unwrap());
        assert_eq!(engine.select_device(), Err(StepError::Nack));
        engine.cancel();
    }

    #[test]
    fn silent_controller_times_out() {
        let irq = Irq::new();
        let sim = SimBus::new(irq.clone());
        sim.set_irq_enabled(false);
        let bus = BusState::new(BusId::Bus0, sim, irq)
            .with_irq_timeout(Duration::from_millis(5));
        let id = DeviceId(0);
        let engine = Engine::new(&bus, id, Revision::Base.device(id).unwrap());
        assert_eq!(engine.select_device(), Err(StepError::TimedOut));
    }
}
