//! # Ports
//!
//! An in-process stand-in for the platform's message-passing substrate:
//! named endpoints, a connection handshake, request/reply sessions, and
//! out-of-band notifications.
//!
//! A service [registers](Registry::register) a name and receives a
//! [`Listener`]. Clients [connect](Registry::connect) by name; the service
//! receives a [`Handshake`] on its listener and [accepts](Handshake::accept)
//! it, producing a [`Connection`] on the service side and a [`Client`] on the
//! client side. Dropping either end closes the session.

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::Arc,
};

use crossbeam_channel::{self as channel, Receiver, Sender};
use parking_lot::Mutex;

use crate::ipc::{Reply, Request};

/// The name service. Clones share the same set of endpoints.
#[derive(Clone, Default)]
pub struct Registry {
    endpoints: Arc<Mutex<HashMap<String, Sender<Handshake>>>>,
}

/// Incoming connection requests to one registered endpoint.
#[must_use = "a `Listener` does nothing if incoming connections are not accepted"]
pub struct Listener {
    name: String,
    rx: Receiver<Handshake>,
}

/// A connection request received from a [`Listener`].
#[must_use = "a `Handshake` does nothing if not `accept`ed"]
pub struct Handshake {
    reply: Sender<Sender<Envelope>>,
}

/// The service's end of an accepted session.
pub struct Connection {
    rx: Receiver<Envelope>,
}

/// A request received on a [`Connection`], along with the means to answer it.
#[must_use = "the client waits until the request is answered"]
pub struct Incoming {
    pub request: Request,
    reply: Sender<Reply>,
}

/// The client's end of an accepted session.
#[derive(Clone)]
pub struct Client {
    tx: Sender<Envelope>,
}

/// Sends out-of-band notifications to a [`Notifications`] receiver.
#[derive(Clone, Debug)]
pub struct Notifier {
    tx: Sender<u32>,
}

/// Out-of-band notifications delivered to a service.
#[derive(Debug)]
pub struct Notifications {
    rx: Receiver<u32>,
}

/// The peer has gone away.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("the other end of the session has closed")]
pub struct ClosedError;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("an endpoint named {0:?} is already registered")]
    AlreadyRegistered(String),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// Nothing is registered under that name.
    #[error("no endpoint named {0:?}")]
    NotFound(String),
    /// The endpoint went away before accepting the connection.
    #[error("endpoint {0:?} closed before accepting")]
    Refused(String),
    /// The endpoint already has as many pending connections as it allows.
    #[error("endpoint {0:?} is busy")]
    Busy(String),
}

pub(crate) struct Envelope {
    request: Request,
    reply: Sender<Reply>,
}

/// Create a notification channel.
pub fn notifications() -> (Notifier, Notifications) {
    let (tx, rx) = channel::unbounded();
    (Notifier { tx }, Notifications { rx })
}

// === impl Registry ===

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint under `name`.
    ///
    /// At most `max_sessions` connection requests may be waiting to be
    /// accepted at once; further [`connect`](Self::connect)s fail with
    /// [`ConnectError::Busy`].
    pub fn register(&self, name: &str, max_sessions: usize) -> Result<Listener, RegistryError> {
        let mut endpoints = self.endpoints.lock();
        match endpoints.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered(name.to_owned())),
            Entry::Vacant(slot) => {
                let (tx, rx) = channel::bounded(max_sessions);
                slot.insert(tx);
                tracing::debug!(name, max_sessions, "registered endpoint");
                Ok(Listener {
                    name: name.to_owned(),
                    rx,
                })
            }
        }
    }

    /// Remove `name`. Connections already accepted are unaffected.
    ///
    /// Returns `false` if nothing was registered under `name`.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.endpoints.lock().remove(name).is_some();
        if removed {
            tracing::debug!(name, "unregistered endpoint");
        }
        removed
    }

    /// Connect to the endpoint registered as `name`, blocking until the
    /// service accepts.
    pub fn connect(&self, name: &str) -> Result<Client, ConnectError> {
        let endpoint = self
            .endpoints
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectError::NotFound(name.to_owned()))?;

        let (reply, accepted) = channel::bounded(1);
        endpoint
            .try_send(Handshake { reply })
            .map_err(|error| match error {
                channel::TrySendError::Full(_) => ConnectError::Busy(name.to_owned()),
                channel::TrySendError::Disconnected(_) => ConnectError::Refused(name.to_owned()),
            })?;

        let tx = accepted
            .recv()
            .map_err(|_| ConnectError::Refused(name.to_owned()))?;
        Ok(Client { tx })
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.endpoints.lock().contains_key(name)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoints = self.endpoints.lock();
        f.debug_set().entries(endpoints.keys()).finish()
    }
}

// === impl Listener ===

impl Listener {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next incoming connection.
    pub fn handshake(&self) -> Result<Handshake, ClosedError> {
        self.rx.recv().map_err(|_| ClosedError)
    }

    /// The underlying channel, for use in a [`channel::Select`].
    pub(crate) fn receiver(&self) -> &Receiver<Handshake> {
        &self.rx
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("name", &self.name)
            .field("pending", &self.rx.len())
            .finish()
    }
}

// === impl Handshake ===

impl Handshake {
    /// Accept the connection, with room for `capacity` requests in flight.
    ///
    /// Fails if the client gave up waiting.
    pub fn accept(self, capacity: usize) -> Result<Connection, ClosedError> {
        let (tx, rx) = channel::bounded(capacity);
        self.reply.send(tx).map_err(|_| ClosedError)?;
        Ok(Connection { rx })
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake").finish_non_exhaustive()
    }
}

// === impl Connection ===

impl Connection {
    /// Wait for the next request. Fails once the client has hung up.
    pub fn recv(&self) -> Result<Incoming, ClosedError> {
        self.rx
            .recv()
            .map(Envelope::into_incoming)
            .map_err(|_| ClosedError)
    }

    pub(crate) fn receiver(&self) -> &Receiver<Envelope> {
        &self.rx
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("pending", &self.rx.len())
            .finish()
    }
}

// === impl Incoming ===

impl Incoming {
    /// Answer the request. Fails if the client stopped waiting for it.
    pub fn respond(self, reply: Reply) -> Result<(), ClosedError> {
        self.reply.send(reply).map_err(|_| ClosedError)
    }
}

impl Envelope {
    pub(crate) fn into_incoming(self) -> Incoming {
        Incoming {
            request: self.request,
            reply: self.reply,
        }
    }
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

// === impl Client ===

impl Client {
    /// Send a request and block until it is answered.
    pub fn request(&self, request: Request) -> Result<Reply, ClosedError> {
        let (reply, rx) = channel::bounded(1);
        self.tx
            .send(Envelope { request, reply })
            .map_err(|_| ClosedError)?;
        rx.recv().map_err(|_| ClosedError)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

// === impl Notifier ===

impl Notifier {
    pub fn notify(&self, id: u32) -> Result<(), ClosedError> {
        self.tx.send(id).map_err(|_| ClosedError)
    }
}

// === impl Notifications ===

impl Notifications {
    pub fn recv(&self) -> Result<u32, ClosedError> {
        self.rx.recv().map_err(|_| ClosedError)
    }

    pub(crate) fn receiver(&self) -> &Receiver<u32> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResultCode;
    use std::thread;

    #[test]
    fn register_connect_request() {
        let registry = Registry::new();
        let listener = registry.register("svc", 1).unwrap();
        assert_eq!(
            registry.register("svc", 1).unwrap_err(),
            RegistryError::AlreadyRegistered("svc".into())
        );

        let server = thread::spawn(move || {
            let conn = listener.handshake().unwrap().accept(1).unwrap();
            while let Ok(incoming) = conn.recv() {
                let id = incoming.request.command_id();
                incoming.respond(Reply::new(id, ResultCode::SUCCESS)).unwrap();
            }
        });

        let client = registry.connect("svc").unwrap();
        let reply = client.request(Request::new(0x0042)).unwrap();
        assert_eq!(reply.header.command_id(), 0x0042);

        // hanging up ends the server's receive loop
        drop(client);
        server.join().unwrap();
    }

    #[test]
    fn connect_errors() {
        let registry = Registry::new();
        assert_eq!(
            registry.connect("nope").unwrap_err(),
            ConnectError::NotFound("nope".into())
        );

        let listener = registry.register("svc", 1).unwrap();
        drop(listener);
        assert_eq!(
            registry.connect("svc").unwrap_err(),
            ConnectError::Refused("svc".into())
        );

        assert!(registry.unregister("svc"));
        assert!(!registry.unregister("svc"));
        assert!(!registry.is_registered("svc"));
    }

    #[test]
    fn requests_fail_after_server_hangs_up() {
        let registry = Registry::new();
        let listener = registry.register("svc", 1).unwrap();
        let server = thread::spawn(move || {
            let conn = listener.handshake().unwrap().accept(1).unwrap();
            drop(conn);
        });
        let client = registry.connect("svc").unwrap();
        server.join().unwrap();
        assert_eq!(client.request(Request::new(1)), Err(ClosedError));
    }

    #[test]
    fn notifications_are_delivered_in_order() {
        let (notifier, notifications) = notifications();
        notifier.notify(1).unwrap();
        notifier.clone().notify(0x100).unwrap();
        assert_eq!(notifications.recv(), Ok(1));
        assert_eq!(notifications.recv(), Ok(0x100));
        drop(notifier);
        assert_eq!(notifications.recv(), Err(ClosedError));
    }
}
