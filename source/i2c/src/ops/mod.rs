//! # Retrying Operations
//!
//! Whole register operations, each built from [`Engine`] steps. Every
//! operation:
//!
//! 1. validates the device id against the hardware revision, before touching
//!    anything,
//! 2. takes the device's bus lock for the duration of the operation,
//! 3. runs the addressing phase of the transaction under [`I2c::retry`],
//!    cancelling and starting over on any failed step, up to [`MAX_TRIES`]
//!    times,
//! 4. runs the data phase once, after the addressing phase has succeeded,
//!    cancelling the transaction if it fails.
//!
//! 16-bit register ids and 16-bit values are sent high byte first.

use std::{thread, time::Duration};

use crate::{
    bus::{BusGuard, Buses},
    device::{DeviceId, Revision},
    engine::{Engine, Step},
    error::Malformed,
    Error,
};


/// The maximum number of attempts at a transaction's addressing phase.
pub const MAX_TRIES: usize = 8;

/// Delays around the legacy read's register write.
const LEGACY_SETTLE: Duration = Duration::from_micros(50);
const LEGACY_TURNAROUND: Duration = Duration::from_micros(150);

/// Register-level access to every device on every bus.
#[derive(Clone, Debug)]
pub struct I2c {
    buses: Buses,
    revision: Revision,
    legacy_delays: bool,
}

const EMPTY: Error = Error::MalformedRequest(Malformed::Buffer);

impl I2c {
    pub fn new(buses: Buses, revision: Revision) -> Self {
        Self {
            buses,
            revision,
            legacy_delays: true,
        }
    }

    /// Skip the sleeps in [`I2c::read_registers8_legacy`].
    ///
    /// Only useful against simulated buses, which have nothing to wait for.
    pub fn without_legacy_delays(self) -> Self {
        Self {
            legacy_delays: false,
            ..self
        }
    }

    pub fn buses(&self) -> &Buses {
        &self.buses
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Read one 8-bit register.
    pub fn read8(&self, dev: DeviceId, reg: u8) -> Result<u8, Error> {
        let (engine, _bus) = self.acquire(dev)?;
        self.retry(&engine, || {
            engine.select_device()?;
            engine.select_register(reg)?;
            engine.begin_read()
        })?;
        data_phase(&engine, || engine.finish_read())
    }

    /// Write one 8-bit register.
    pub fn write8(&self, dev: DeviceId, reg: u8, value: u8) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        self.retry(&engine, || {
            engine.select_device()?;
            engine.select_register(reg)?;
            engine.finish_write(value)
        })
    }

    /// Write a single byte to a device, with no register address.
    pub fn write_device8(&self, dev: DeviceId, value: u8) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        self.retry(&engine, || {
            engine.select_device()?;
            engine.finish_write(value)
        })
    }

    /// Read one 16-bit register.
    pub fn read16(&self, dev: DeviceId, reg: u16) -> Result<u16, Error> {
        let (engine, _bus) = self.acquire(dev)?;
        self.retry(&engine, || select_register16(&engine, reg))?;
        data_phase(&engine, || {
            let hi = engine.read_intermediate()?;
            let lo = engine.finish_read()?;
            Ok(u16::from_be_bytes([hi, lo]))
        })
    }

    /// Write one 16-bit register.
    pub fn write16(&self, dev: DeviceId, reg: u16, value: u16) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        let [hi, lo] = value.to_be_bytes();
        self.retry(&engine, || {
            engine.select_device()?;
            let [reg_hi, reg_lo] = reg.to_be_bytes();
            engine.select_register(reg_hi)?;
            engine.select_register(reg_lo)?;
            engine.write_intermediate(hi)?;
            engine.finish_write(lo)
        })
    }

    /// Read-modify-write an 8-bit register: the bits set in `mask` are
    /// replaced by the corresponding bits of `value`.
    ///
    /// The bus stays locked from the read through the write.
    pub fn replace_bits8(
        &self,
        dev: DeviceId,
        reg: u8,
        value: u8,
        mask: u8,
    ) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        let current = self.read8(dev, reg)?;
        let new = (current & !mask) | (value & mask);
        tracing::trace!(dev = %engine.device(), reg, current, new, "replace bits");
        self.write8(dev, reg, new)
    }

    /// Read-modify-write a 16-bit register.
    pub fn replace_bits16(
        &self,
        dev: DeviceId,
        reg: u16,
        value: u16,
        mask: u16,
    ) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        let current = self.read16(dev, reg)?;
        let new = (current & !mask) | (value & mask);
        tracing::trace!(dev = %engine.device(), reg, current, new, "replace bits");
        self.write16(dev, reg, new)
    }

    /// Fill `buf` from consecutive 8-bit registers, starting at `reg`.
    pub fn read_registers8(&self, dev: DeviceId, reg: u8, buf: &mut [u8]) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        let (last, head) = buf.split_last_mut().ok_or(EMPTY)?;
        self.retry(&engine, || {
            engine.select_device()?;
            engine.select_register(reg)?;
            engine.begin_read()
        })?;
        data_phase(&engine, || {
            for byte in head {
                *byte = engine.read_intermediate()?;
            }
            *last = engine.finish_read()?;
            Ok(())
        })
    }

    /// Write `buf` to consecutive 8-bit registers, starting at `reg`.
    pub fn write_registers8(&self, dev: DeviceId, reg: u8, buf: &[u8]) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        let (&last, head) = buf.split_last().ok_or(EMPTY)?;
        self.retry(&engine, || {
            engine.select_device()?;
            engine.select_register(reg)?;
            head.iter()
                .try_for_each(|&byte| engine.write_intermediate(byte))
        })?;
        data_phase(&engine, || engine.finish_write(last))
    }

    /// Fill `buf` from consecutive 16-bit registers, starting at `reg`.
    pub fn read_registers16(
        &self,
        dev: DeviceId,
        reg: u16,
        buf: &mut [u16],
    ) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        let (last, head) = buf.split_last_mut().ok_or(EMPTY)?;
        self.retry(&engine, || select_register16(&engine, reg))?;
        data_phase(&engine, || {
            for word in head {
                let hi = engine.read_intermediate()?;
                let lo = engine.read_intermediate()?;
                *word = u16::from_be_bytes([hi, lo]);
            }
            let hi = engine.read_intermediate()?;
            let lo = engine.finish_read()?;
            *last = u16::from_be_bytes([hi, lo]);
            Ok(())
        })
    }

    /// Write `buf` to consecutive 16-bit registers, starting at `reg`.
    pub fn write_registers16(&self, dev: DeviceId, reg: u16, buf: &[u16]) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        let (&last, head) = buf.split_last().ok_or(EMPTY)?;
        self.retry(&engine, || {
            engine.select_device()?;
            let [reg_hi, reg_lo] = reg.to_be_bytes();
            engine.select_register(reg_hi)?;
            engine.select_register(reg_lo)?;
            head.iter().try_for_each(|word| {
                let [hi, lo] = word.to_be_bytes();
                engine.write_intermediate(hi)?;
                engine.write_intermediate(lo)
            })
        })?;
        let [hi, lo] = last.to_be_bytes();
        data_phase(&engine, || {
            engine.write_intermediate(hi)?;
            engine.finish_write(lo)
        })
    }

    /// Burst read with the timing used by older clients.
    ///
    /// The register address is sent as a complete write transaction, and the
    /// read is started separately, with fixed sleeps around both.
    pub fn read_registers8_legacy(
        &self,
        dev: DeviceId,
        reg: u8,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        let (last, head) = buf.split_last_mut().ok_or(EMPTY)?;
        self.retry(&engine, || {
            self.legacy_delay(LEGACY_SETTLE);
            engine.select_device()?;
            engine.finish_write(reg)?;
            self.legacy_delay(LEGACY_TURNAROUND);
            engine.begin_read()
        })?;
        data_phase(&engine, || {
            for byte in head {
                *byte = engine.read_intermediate()?;
            }
            *last = engine.finish_read()?;
            Ok(())
        })?;
        self.legacy_delay(LEGACY_TURNAROUND);
        Ok(())
    }

    /// Read a single byte from a device, with no register address.
    pub fn read_device_raw(&self, dev: DeviceId) -> Result<u8, Error> {
        let (engine, _bus) = self.acquire(dev)?;
        self.retry(&engine, || engine.begin_read())?;
        data_phase(&engine, || engine.finish_read())
    }

    /// Write `buf` to a device as one transaction, with no register address.
    pub fn write_device_raw_multi(&self, dev: DeviceId, buf: &[u8]) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        let (&last, head) = buf.split_last().ok_or(EMPTY)?;
        self.retry(&engine, || {
            engine.select_device()?;
            head.iter()
                .try_for_each(|&byte| engine.write_intermediate(byte))
        })?;
        data_phase(&engine, || engine.finish_write(last))
    }

    /// Fill `buf` from a device as one transaction, with no register address.
    pub fn read_device_raw_multi(&self, dev: DeviceId, buf: &mut [u8]) -> Result<(), Error> {
        let (engine, _bus) = self.acquire(dev)?;
        let (last, head) = buf.split_last_mut().ok_or(EMPTY)?;
        self.retry(&engine, || engine.begin_read())?;
        data_phase(&engine, || {
            for byte in head {
                *byte = engine.read_intermediate()?;
            }
            *last = engine.finish_read()?;
            Ok(())
        })
    }

    /// Run `attempt` until it succeeds, cancelling the transaction after each
    /// failure. Gives up with [`Error::TransactionFailed`] after
    /// [`MAX_TRIES`] attempts.
    pub fn retry<T>(
        &self,
        engine: &Engine<'_>,
        mut attempt: impl FnMut() -> Step<T>,
    ) -> Result<T, Error> {
        for tries in 1..=MAX_TRIES {
            match attempt() {
                Ok(t) => {
                    if tries > 1 {
                        tracing::debug!(
                            dev = %engine.device(),
                            retries = tries - 1,
                            "succeeded after retrying"
                        );
                    }
                    return Ok(t);
                }
                Err(error) => {
                    tracing::trace!(dev = %engine.device(), %error, tries, "attempt failed");
                    engine.cancel();
                }
            }
        }

        tracing::debug!(dev = %engine.device(), max = MAX_TRIES, "maximum retry limit reached!");
        Err(Error::TransactionFailed)
    }

    /// Look up `dev` and lock its bus.
    ///
    /// Out-of-range ids are rejected here, before any lock is taken.
    fn acquire(&self, dev: DeviceId) -> Result<(Engine<'_>, BusGuard<'_>), Error> {
        let config = self.revision.device(dev)?;
        let bus = self.buses.get(config.bus);
        let guard = bus.lock();
        Ok((Engine::new(bus, dev, config), guard))
    }

    fn legacy_delay(&self, delay: Duration) {
        if self.legacy_delays {
            thread::sleep(delay);
        }
    }
}

/// Run the data phase of a transaction whose addressing phase succeeded.
///
/// The data phase is not retried. If any step of it fails, the transaction
/// is cancelled so the bus is left idle for the next one.
fn data_phase<T>(engine: &Engine<'_>, phase: impl FnOnce() -> Step<T>) -> Result<T, Error> {
    phase().map_err(|error| {
        tracing::debug!(dev = %engine.device(), %error, "data phase failed");
        engine.cancel();
        Error::TransactionFailed
    })
}

fn select_register16(engine: &Engine<'_>, reg: u16) -> Step {
    let [hi, lo] = reg.to_be_bytes();
    engine.select_device()?;
    engine.select_register(hi)?;
    engine.select_register(lo)?;
    engine.begin_read()
}
