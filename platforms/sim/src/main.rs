use std::thread;

use clap::Parser;
use i2c::{
    access::Category,
    port::{self, Registry},
    sim, I2c, SessionManager, TERMINATE_NOTIFICATION,
};
use miette::{IntoDiagnostic, Result};

mod cli;
mod config;
mod script;
mod sim_tracing;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    sim_tracing::setup_tracing();
    let _span = tracing::info_span!("i2c-sim").entered();

    let mut config = config::SimConfig::load(args.config.as_deref())?;
    if args.revised {
        config.service = config.service.revised();
    }
    let settings = config.service;
    let revision = settings.revision;
    tracing::info!(?settings, "Loaded settings");

    let (buses, sims) = sim::buses(revision, settings.irq_timeout);
    config.sim.apply(&sims, revision)?;
    buses.initialize();
    let i2c = I2c::new(buses, revision).without_legacy_delays();

    let registry = Registry::new();
    let (notifier, notifications) = port::notifications();
    let manager = SessionManager::new(registry.clone(), i2c, settings, notifications)
        .into_diagnostic()?;
    let control = thread::Builder::new()
        .name("i2c::control".into())
        .spawn(move || manager.run())
        .into_diagnostic()?;

    println!("========================================");
    let mut tally = script::Tally::default();
    for &category in Category::for_revision(revision) {
        match script::run_session(&registry, category, revision, &config.sim) {
            Ok(session) => tally += session,
            Err(error) => {
                tracing::error!(%category, ?error, "client session failed");
                tally.failed += 1;
            }
        }
    }
    println!("========================================");
    println!("{} checks passed, {} failed", tally.passed, tally.failed);

    notifier.notify(TERMINATE_NOTIFICATION).into_diagnostic()?;
    match control.join() {
        Ok(result) => result.into_diagnostic()?,
        Err(_) => miette::bail!("the I2C service's control thread panicked"),
    }
    tracing::info!("I2C service exited cleanly");
    Ok(())
}
