use std::time::Duration;

use crate::{
    bus::Buses,
    device::Revision,
    ops::I2c,
    sim::{self, SimBus},
};

/// A service backed by simulated buses, with every device attached.
pub(crate) struct TestBuses {
    pub(crate) i2c: I2c,
    pub(crate) sims: [SimBus; 3],
}

impl TestBuses {
    pub(crate) fn new(revision: Revision) -> Self {
        Self::build(revision, None)
    }

    /// Buses whose steps give up waiting for the interrupt after `timeout`.
    pub(crate) fn with_irq_timeout(revision: Revision, timeout: Duration) -> Self {
        Self::build(revision, Some(timeout))
    }

    fn build(revision: Revision, irq_timeout: Option<Duration>) -> Self {
        trace_init();
        let (buses, sims) = sim::buses(revision, irq_timeout);
        let i2c = I2c::new(buses, revision).without_legacy_delays();
        Self { i2c, sims }
    }

    pub(crate) fn buses(&self) -> &Buses {
        self.i2c.buses()
    }

    /// Total `START` conditions issued across all three buses.
    pub(crate) fn total_starts(&self) -> usize {
        self.sims.iter().map(SimBus::starts).sum()
    }

    /// Total register writes across all three buses.
    pub(crate) fn total_register_writes(&self) -> usize {
        self.sims.iter().map(SimBus::register_writes).sum()
    }
}

pub(crate) fn trace_init() {
    use tracing_subscriber::{
        filter::{EnvFilter, LevelFilter},
        prelude::*,
    };
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    let filter = if env.is_empty() {
        builder.parse("i2c=debug").unwrap()
    } else {
        builder.parse_lossy(env)
    };

    let _res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .without_time()
        .finish()
        .try_init();
}
