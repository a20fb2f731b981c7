//! # Buses
//!
//! The console has three independent I<sup>2</sup>C controllers. Each one is
//! represented by a [`BusState`]: its register block, a recursive lock that
//! serializes transactions on it, and the completion signal raised by its
//! interrupt.
//!
//! The three bus states are built once, at startup, and shared by every
//! session for the life of the service.

use core::fmt;
use std::{sync::Arc, time::Duration};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

pub mod irq;
pub mod regs;

pub use self::irq::{Irq, TimedOut};
pub use self::regs::{Cnt, CntEx, Mmio, Registers, Scl};

/// One of the three physical buses.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum BusId {
    Bus0 = 0,
    Bus1 = 1,
    Bus2 = 2,
}

/// A single bus: its registers, its lock, and its completion signal.
pub struct BusState {
    id: BusId,
    regs: Box<dyn Registers>,
    lock: ReentrantMutex<()>,
    irq: Irq,
    irq_timeout: Option<Duration>,
}

/// The set of all three buses.
#[derive(Clone)]
pub struct Buses {
    buses: Arc<[BusState; 3]>,
}

/// Proof that the current thread holds a bus's lock.
#[must_use = "the bus is unlocked as soon as the guard is dropped"]
pub struct BusGuard<'a> {
    _guard: ReentrantMutexGuard<'a, ()>,
}

// === impl BusId ===

impl BusId {
    pub const ALL: [BusId; 3] = [BusId::Bus0, BusId::Bus1, BusId::Bus2];

    /// Physical address of the bus's register block.
    pub const fn base_address(self) -> usize {
        match self {
            BusId::Bus0 => 0x1EC6_1000,
            BusId::Bus1 => 0x1EC4_4000,
            BusId::Bus2 => 0x1EC4_8000,
        }
    }

    /// The interrupt line the bus raises on step completion.
    pub const fn interrupt(self) -> u32 {
        match self {
            BusId::Bus0 => 0x54,
            BusId::Bus1 => 0x55,
            BusId::Bus2 => 0x5C,
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I2C{}", *self as u8)
    }
}

// === impl BusState ===

impl BusState {
    pub fn new(id: BusId, regs: impl Registers, irq: Irq) -> Self {
        Self {
            id,
            regs: Box::new(regs),
            lock: ReentrantMutex::new(()),
            irq,
            irq_timeout: None,
        }
    }

    /// Bound every completion wait on this bus by `timeout`.
    ///
    /// By default waits are unbounded: a wedged bus stalls whoever is using
    /// it, and everyone queued behind them.
    pub fn with_irq_timeout(self, timeout: impl Into<Option<Duration>>) -> Self {
        Self {
            irq_timeout: timeout.into(),
            ..self
        }
    }

    pub fn id(&self) -> BusId {
        self.id
    }

    /// Acquire the bus. The lock is recursive: a thread that already holds
    /// it may lock it again.
    pub fn lock(&self) -> BusGuard<'_> {
        BusGuard {
            _guard: self.lock.lock(),
        }
    }

    pub fn regs(&self) -> &dyn Registers {
        &*self.regs
    }

    pub fn irq(&self) -> &Irq {
        &self.irq
    }

    /// Block until the controller signals completion of the current step.
    pub(crate) fn wait_for_irq(&self) -> Result<(), TimedOut> {
        self.irq.wait(self.irq_timeout)
    }

    fn initialize(&self) {
        let _guard = self.lock();
        self.regs
            .write_cntex(CntEx::new().with(CntEx::WAIT_SCL_IDLE, true));
        self.regs.write_scl(Scl::new().with(Scl::HIGH_DURATION, 5));
        self.irq.clear();
        tracing::debug!(bus = %self.id, irq = self.id.interrupt(), "bus initialized");
    }
}

impl fmt::Debug for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusState")
            .field("id", &self.id)
            .field("irq_timeout", &self.irq_timeout)
            .finish_non_exhaustive()
    }
}

// === impl Buses ===

impl Buses {
    /// Build the bus set from one [`BusState`] per bus, in [`BusId`] order.
    ///
    /// # Panics
    ///
    /// If a state's id does not match its position.
    pub fn new(buses: [BusState; 3]) -> Self {
        for (bus, id) in buses.iter().zip(BusId::ALL) {
            assert_eq!(bus.id, id, "bus states must be in `BusId` order");
        }
        Self {
            buses: Arc::new(buses),
        }
    }

    /// Map the three hardware register blocks.
    ///
    /// Returns the bus set along with the [`Irq`] handle for each bus, which
    /// the platform must signal from the bus's interrupt.
    ///
    /// # Safety
    ///
    /// The register blocks must be mapped at their [`BusId::base_address`],
    /// and nothing else may access them.
    pub unsafe fn mmio(irq_timeout: Option<Duration>) -> Option<(Self, [Irq; 3])> {
        let irqs = [Irq::new(), Irq::new(), Irq::new()];
        let state = |id: BusId| -> Option<BusState> {
            let regs = unsafe { Mmio::new(id.base_address()) }?;
            Some(BusState::new(id, regs, irqs[id.index()].clone()).with_irq_timeout(irq_timeout))
        };
        let buses = [
            state(BusId::Bus0)?,
            state(BusId::Bus1)?,
            state(BusId::Bus2)?,
        ];
        Some((Self::new(buses), irqs))
    }

    /// Put every controller into its idle configuration and discard any
    /// stale completion signal.
    pub fn initialize(&self) {
        for bus in self.buses.iter() {
            bus.initialize();
        }
    }

    pub fn get(&self, id: BusId) -> &BusState {
        &self.buses[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &BusState> {
        self.buses.iter()
    }
}

impl fmt::Debug for Buses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.buses.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::Revision, sim};

    #[test]
    fn initialize_sets_idle_timing_and_drops_stale_irqs() {
        let (buses, sims) = sim::buses(Revision::Base, None);
        for id in BusId::ALL {
            buses.get(id).irq().signal();
        }

        buses.initialize();

        for id in BusId::ALL {
            let (cntex, scl) = sims[id.index()].timing();
            assert_eq!(cntex, CntEx::new().with(CntEx::WAIT_SCL_IDLE, true));
            assert_eq!(cntex.bits(), 0b10);
            assert_eq!(scl.bits(), 0x0500);
            assert_eq!(scl.get(Scl::HIGH_DURATION), 5);
            assert_eq!(scl.get(Scl::LOW_DURATION), 0);
            assert_eq!(
                buses.get(id).irq().wait(Some(Duration::from_millis(1))),
                Err(TimedOut)
            );
        }
    }

    #[test]
    fn interrupt_numbers_are_distinct() {
        assert_eq!(BusId::Bus0.interrupt(), 0x54);
        assert_eq!(BusId::Bus1.interrupt(), 0x55);
        assert_eq!(BusId::Bus2.interrupt(), 0x5C);
    }
}
