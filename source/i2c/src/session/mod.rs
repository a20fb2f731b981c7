//! # Sessions
//!
//! The [`SessionManager`] registers one endpoint per [`Category`] and serves
//! at most one client session on each. Every session gets its own worker
//! thread, which receives requests, runs them through a [`Dispatcher`], and
//! sends the replies back.
//!
//! A new connection to an endpoint that already has a session replaces it:
//! the old worker is told to close, finishes the request it is handling (if
//! any), and is joined before the new connection is accepted.
//!
//! The control loop waits on every endpoint and on the service's
//! notification source at once. [`TERMINATE_NOTIFICATION`] shuts the
//! service down.

use core::fmt;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{self as channel, Receiver, Select, Sender};

use crate::{
    access::Category,
    dispatch::Dispatcher,
    ops::I2c,
    port::{Connection, Listener, Notifications, Registry},
    Error, ServiceSettings,
};

#[cfg(test)]
mod tests;

/// The notification id that asks the service to shut down.
pub const TERMINATE_NOTIFICATION: u32 = 0x100;

/// Each endpoint serves at most one session at a time.
const MAX_SESSIONS: usize = 1;

/// Owns the service's endpoints and the workers serving them.
#[must_use = "a `SessionManager` does nothing until it is `run`"]
pub struct SessionManager {
    registry: Registry,
    i2c: I2c,
    settings: ServiceSettings,
    notifications: Notifications,
    listeners: Vec<(Category, Listener)>,
}

/// A running session.
struct Worker {
    category: Category,
    /// Dropping this tells the worker to stop.
    close: Sender<()>,
    thread: JoinHandle<()>,
}

// === impl SessionManager ===

impl SessionManager {
    /// Register an endpoint for every category served on `i2c`'s hardware
    /// revision.
    ///
    /// Clients may start connecting as soon as this returns, but connections
    /// are not accepted until [`SessionManager::run`] is called.
    pub fn new(
        registry: Registry,
        i2c: I2c,
        settings: ServiceSettings,
        notifications: Notifications,
    ) -> Result<Self, Error> {
        let categories = Category::for_revision(i2c.revision());
        let mut listeners = Vec::with_capacity(categories.len());
        for &category in categories {
            let name = category.service_name();
            match registry.register(name, MAX_SESSIONS) {
                Ok(listener) => listeners.push((category, listener)),
                Err(error) => {
                    tracing::error!(%error, "failed to register endpoint");
                    for (_, listener) in &listeners {
                        registry.unregister(listener.name());
                    }
                    return Err(Error::InternalFault("failed to register endpoint"));
                }
            }
        }
        tracing::info!(
            revision = %i2c.revision(),
            endpoints = listeners.len(),
            "I2C service registered"
        );

        Ok(Self {
            registry,
            i2c,
            settings,
            notifications,
            listeners,
        })
    }

    /// Serve sessions until told to terminate.
    ///
    /// The service also stops if every [`Notifier`](crate::port::Notifier)
    /// has been dropped, since nothing could tell it to terminate anymore.
    ///
    /// On return, every worker has been joined and every endpoint has been
    /// unregistered. Returns [`Error::InternalFault`] if a worker could not
    /// be started or did not exit cleanly.
    #[tracing::instrument(
        name = "SessionManager::run",
        level = "info",
        skip(self),
        fields(revision = %self.i2c.revision()),
        err
    )]
    pub fn run(self) -> Result<(), Error> {
        let mut workers = self.listeners.iter().map(|_| None).collect::<Vec<_>>();
        let served = self.serve(&mut workers);

        let mut stopped = Ok(());
        for worker in workers.into_iter().flatten() {
            stopped = stopped.and(worker.stop());
        }
        for (_, listener) in &self.listeners {
            self.registry.unregister(listener.name());
        }
        tracing::info!("I2C service stopped");

        served.and(stopped)
    }

    fn serve(&self, workers: &mut [Option<Worker>]) -> Result<(), Error> {
        let mut select = Select::new();
        let notifications = select.recv(self.notifications.receiver());
        for (_, listener) in &self.listeners {
            select.recv(listener.receiver());
        }

        loop {
            let op = select.select();
            let index = op.index();

            if index == notifications {
                match op.recv(self.notifications.receiver()) {
                    Ok(TERMINATE_NOTIFICATION) => {
                        tracing::info!("received termination notification");
                        return Ok(());
                    }
                    Ok(id) => tracing::debug!(id, "ignoring notification"),
                    Err(_) => {
                        tracing::info!("notification source closed, shutting down");
                        return Ok(());
                    }
                }
                continue;
            }

            let slot = index - 1;
            let (category, listener) = &self.listeners[slot];
            let handshake = op
                .recv(listener.receiver())
                .map_err(|_| Error::InternalFault("endpoint closed while registered"))?;

            if let Some(old) = workers[slot].take() {
                tracing::debug!(%category, "replacing session");
                old.stop()?;
            }

            let conn = match handshake.accept(self.settings.request_capacity) {
                Ok(conn) => conn,
                Err(_) => {
                    tracing::debug!(%category, "client left before being accepted");
                    continue;
                }
            };
            workers[slot] = Some(self.spawn(*category, conn)?);
        }
    }

    fn spawn(&self, category: Category, conn: Connection) -> Result<Worker, Error> {
        let (close, closed) = channel::bounded(0);
        let dispatcher = Dispatcher::new(self.i2c.clone(), category);

        let mut builder = thread::Builder::new().name(category.service_name().to_owned());
        if let Some(size) = self.settings.worker_stack_size {
            builder = builder.stack_size(size);
        }
        let thread = builder
            .spawn(move || serve_session(dispatcher, conn, closed))
            .map_err(|error| {
                tracing::error!(%category, %error, "failed to spawn session worker");
                Error::InternalFault("failed to spawn session worker")
            })?;

        tracing::debug!(%category, "session started");
        Ok(Worker {
            category,
            close,
            thread,
        })
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

// === impl Worker ===

impl Worker {
    /// Tell the worker to close its session, and wait for it to exit.
    fn stop(self) -> Result<(), Error> {
        let Self {
            category,
            close,
            thread,
        } = self;
        drop(close);
        thread.join().map_err(|_| {
            tracing::error!(%category, "session worker panicked");
            Error::InternalFault("session worker panicked")
        })
    }
}

#[tracing::instrument(
    name = "session",
    level = "debug",
    skip_all,
    fields(category = %dispatcher.category())
)]
fn serve_session(dispatcher: Dispatcher, conn: Connection, closed: Receiver<()>) {
    loop {
        channel::select! {
            recv(conn.receiver()) -> msg => {
                let Ok(envelope) = msg else {
                    tracing::debug!("client closed the session");
                    return;
                };
                let incoming = envelope.into_incoming();
                let reply = dispatcher.dispatch(&incoming.request);
                if incoming.respond(reply).is_err() {
                    tracing::debug!("client stopped waiting for a reply");
                }
            }
            recv(closed) -> _ => {
                tracing::debug!("session closed by the service");
                return;
            }
        }
    }
}
