//! # Simulated Buses
//!
//! A register-level model of the I<sup>2</sup>C controller and the devices
//! behind it, for running the service without hardware.
//!
//! Devices are plain register files: the first one or two bytes written after
//! a device is selected set its register pointer, and every further byte
//! written or read moves the pointer forward by one. Writing a register and
//! reading it back therefore returns what was written.
//!
//! Every `CNT` write completes immediately, and raises the bus's [`Irq`] if
//! the command asked for an interrupt.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    bus::{BusId, BusState, Buses, Cnt, CntEx, Irq, Registers, Scl},
    device::{DeviceId, Revision},
};

/// A simulated controller. Clones share the same controller.
#[derive(Clone, Debug)]
pub struct SimBus {
    inner: Arc<Inner>,
}

/// A simulated slave device.
#[derive(Clone, Debug)]
pub struct SimDevice {
    pointer_width: u8,
    pointer: u16,
    pointer_bytes: u8,
    regs: Box<[u8]>,
}

#[derive(Debug)]
struct Inner {
    irq: Irq,
    irq_enabled: AtomicBool,
    starts: AtomicUsize,
    device_selects: AtomicUsize,
    register_writes: AtomicUsize,
    cancels: AtomicUsize,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    data: u8,
    cnt: u8,
    cntex: u16,
    scl: u16,
    devices: BTreeMap<u8, SimDevice>,
    txn: Option<Txn>,
    nack_starts: usize,
    nack_bytes: usize,
    lost_irq: Option<usize>,
}

#[derive(Copy, Clone, Debug)]
struct Txn {
    address: u8,
    read: bool,
}

// === impl SimBus ===

impl SimBus {
    pub fn new(irq: Irq) -> Self {
        Self {
            inner: Arc::new(Inner {
                irq,
                irq_enabled: AtomicBool::new(true),
                starts: AtomicUsize::new(0),
                device_selects: AtomicUsize::new(0),
                register_writes: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Attach `device` at the given write address, replacing any device
    /// already there.
    pub fn attach(&self, write_address: u8, device: SimDevice) {
        self.inner
            .state
            .lock()
            .devices
            .insert(write_address & !1, device);
    }

    pub fn detach(&self, write_address: u8) -> Option<SimDevice> {
        self.inner.state.lock().devices.remove(&(write_address & !1))
    }

    /// `NACK` the next `n` address phases (`START` conditions), whether or
    /// not a device is present.
    pub fn nack_starts(&self, n: usize) {
        self.inner.state.lock().nack_starts = n;
    }

    /// `NACK` the next `n` bytes written after a successful address phase.
    pub fn nack_bytes(&self, n: usize) {
        self.inner.state.lock().nack_bytes = n;
    }

    /// Raise the next `n` interrupts as usual, then swallow one.
    pub fn lose_irq_after(&self, n: usize) {
        self.inner.state.lock().lost_irq = Some(n);
    }

    /// Stop raising the interrupt, as if the controller had wedged.
    pub fn set_irq_enabled(&self, enabled: bool) {
        self.inner.irq_enabled.store(enabled, Ordering::Release);
    }

    /// Number of `START` conditions issued, in either direction.
    pub fn starts(&self) -> usize {
        self.inner.starts.load(Ordering::Acquire)
    }

    /// Number of `START` conditions issued in the write direction.
    pub fn device_selects(&self) -> usize {
        self.inner.device_selects.load(Ordering::Acquire)
    }

    /// Number of transactions cancelled.
    pub fn cancels(&self) -> usize {
        self.inner.cancels.load(Ordering::Acquire)
    }

    /// Total number of register writes of any kind.
    pub fn register_writes(&self) -> usize {
        self.inner.register_writes.load(Ordering::Acquire)
    }

    /// Read a device's register file directly, bypassing the bus.
    pub fn peek(&self, write_address: u8, reg: u16) -> Option<u8> {
        let state = self.inner.state.lock();
        let device = state.devices.get(&(write_address & !1))?;
        Some(device.regs[reg as usize])
    }

    /// Write a device's register file directly, bypassing the bus.
    pub fn poke(&self, write_address: u8, reg: u16, value: u8) {
        let mut state = self.inner.state.lock();
        if let Some(device) = state.devices.get_mut(&(write_address & !1)) {
            device.regs[reg as usize] = value;
        }
    }

    /// The last values written to `CNTEX` and `SCL`.
    pub fn timing(&self) -> (CntEx, Scl) {
        let state = self.inner.state.lock();
        (CntEx::from_bits(state.cntex), Scl::from_bits(state.scl))
    }

    fn step(&self, cnt: Cnt) {
        let mut state = self.inner.state.lock();
        let ack = if cnt.get(Cnt::CANCEL) {
            self.inner.cancels.fetch_add(1, Ordering::AcqRel);
            state.txn = None;
            false
        } else if cnt.get(Cnt::START) {
            self.inner.starts.fetch_add(1, Ordering::AcqRel);
            state.start()
        } else if cnt.get(Cnt::READ) {
            state.read_byte();
            cnt.get(Cnt::ACK)
        } else {
            state.write_byte()
        };

        if cnt.get(Cnt::START) && state.data & 1 == 0 {
            self.inner.device_selects.fetch_add(1, Ordering::AcqRel);
        }
        if cnt.get(Cnt::FINISH) {
            state.txn = None;
        }
        state.cnt = cnt
            .with(Cnt::ACK, ack)
            .with(Cnt::START, false)
            .with(Cnt::FINISH, false)
            .with(Cnt::CANCEL, false)
            .bits();
        let raise = cnt.get(Cnt::IRQ_ENABLE) && !state.swallow_irq();
        drop(state);

        if raise && self.inner.irq_enabled.load(Ordering::Acquire) {
            self.inner.irq.signal();
        }
    }
}

impl Registers for SimBus {
    fn read_data(&self) -> u8 {
        self.inner.state.lock().data
    }

    fn write_data(&self, data: u8) {
        self.inner.register_writes.fetch_add(1, Ordering::AcqRel);
        self.inner.state.lock().data = data;
    }

    fn read_cnt(&self) -> Cnt {
        Cnt::from_bits(self.inner.state.lock().cnt)
    }

    fn write_cnt(&self, cnt: Cnt) {
        self.inner.register_writes.fetch_add(1, Ordering::AcqRel);
        if cnt.get(Cnt::ENABLE) {
            self.step(cnt);
        } else {
            self.inner.state.lock().cnt = cnt.bits();
        }
    }

    fn write_cntex(&self, cntex: CntEx) {
        self.inner.register_writes.fetch_add(1, Ordering::AcqRel);
        self.inner.state.lock().cntex = cntex.bits();
    }

    fn write_scl(&self, scl: Scl) {
        self.inner.register_writes.fetch_add(1, Ordering::AcqRel);
        self.inner.state.lock().scl = scl.bits();
    }
}

// === impl State ===

impl State {
    fn start(&mut self) -> bool {
        let address = self.data & !1;
        let read = self.data & 1 == 1;
        if self.nack_starts > 0 {
            self.nack_starts -= 1;
            self.txn = None;
            return false;
        }
        match self.devices.get_mut(&address) {
            Some(device) => {
                if !read {
                    device.pointer_bytes = 0;
                }
                self.txn = Some(Txn { address, read });
                true
            }
            None => {
                self.txn = None;
                false
            }
        }
    }

    fn swallow_irq(&mut self) -> bool {
        match self.lost_irq {
            Some(0) => {
                self.lost_irq = None;
                true
            }
            Some(ref mut n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }

    fn write_byte(&mut self) -> bool {
        let Some(Txn { address, read: false }) = self.txn else {
            return false;
        };
        if self.nack_bytes > 0 {
            self.nack_bytes -= 1;
            return false;
        }
        let byte = self.data;
        match self.devices.get_mut(&address) {
            Some(device) => {
                device.write(byte);
                true
            }
            None => false,
        }
    }

    fn read_byte(&mut self) {
        self.data = match self.txn {
            Some(Txn { address, read: true }) => self
                .devices
                .get_mut(&address)
                .map(SimDevice::read)
                .unwrap_or(0xFF),
            // nobody is driving SDA
            _ => 0xFF,
        };
    }
}

// === impl SimDevice ===

impl SimDevice {
    const REGS: usize = 0x1_0000;

    /// A device with 8-bit register addresses.
    pub fn reg8() -> Self {
        Self::new(1)
    }

    /// A device with 16-bit register addresses, sent high byte first.
    pub fn reg16() -> Self {
        Self::new(2)
    }

    fn new(pointer_width: u8) -> Self {
        Self {
            pointer_width,
            pointer: 0,
            pointer_bytes: 0,
            regs: vec![0; Self::REGS].into_boxed_slice(),
        }
    }

    fn write(&mut self, byte: u8) {
        if self.pointer_bytes < self.pointer_width {
            if self.pointer_bytes == 0 {
                self.pointer = 0;
            }
            self.pointer = (self.pointer << 8) | byte as u16;
            self.pointer_bytes += 1;
        } else {
            self.regs[self.pointer as usize] = byte;
            self.pointer = self.pointer.wrapping_add(1);
        }
    }

    fn read(&mut self) -> u8 {
        let byte = self.regs[self.pointer as usize];
        self.pointer = self.pointer.wrapping_add(1);
        byte
    }
}

/// Build a full set of simulated buses with every device of `revision`
/// attached as an 8-bit-register device.
///
/// Returns the bus set along with a handle to each simulated controller.
pub fn buses(revision: Revision, irq_timeout: Option<Duration>) -> (Buses, [SimBus; 3]) {
    let sims = [
        SimBus::new(Irq::new()),
        SimBus::new(Irq::new()),
        SimBus::new(Irq::new()),
    ];
    for (_, config) in revision.devices() {
        sims[config.bus.index()].attach(config.write_address, SimDevice::reg8());
    }
    let state = |id: BusId| {
        let sim = &sims[id.index()];
        BusState::new(id, sim.clone(), sim.inner.irq.clone()).with_irq_timeout(irq_timeout)
    };
    let buses = Buses::new([state(BusId::Bus0), state(BusId::Bus1), state(BusId::Bus2)]);
    (buses, sims)
}

/// Attach `device` in place of the simulated device currently at `id`'s
/// address.
pub fn replace_device(sims: &[SimBus; 3], revision: Revision, id: DeviceId, device: SimDevice) {
    if let Ok(config) = revision.device(id) {
        sims[config.bus.index()].attach(config.write_address, device);
    }
}
