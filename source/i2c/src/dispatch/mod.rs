//! # Command Dispatch
//!
//! Decodes [`Request`]s against the [`COMMANDS`] table, checks them against
//! the session's [`Category`], runs them, and encodes the [`Reply`].
//!
//! Every request goes through the same steps, in order:
//!
//! 1. look the command id up in [`COMMANDS`] (unknown ids are rejected with
//!    [`Error::InvalidCommand`]);
//! 2. check the header against the command's declared word counts
//!    ([`Malformed::Header`]);
//! 3. check that no static buffer exceeds the session's inbound capacity
//!    ([`Malformed::Buffer`]);
//! 4. run the command's handler, which checks its own buffer descriptors,
//!    then permission, then performs the operation.
//!
//! Failures in steps 1 to 3, and buffer descriptor mismatches in step 4,
//! produce a bare error reply and never touch hardware. Permission and
//! operation failures are reported in the command's own reply.

use core::fmt;

use crate::{
    access::Category,
    device::{DeviceId, Revision},
    error::Malformed,
    ipc::{Buffer, Header, Perm, Reply, Request},
    ops::I2c,
    Error,
};

mod handlers;

/// A command handler.
///
/// Returns `Err` only for requests that are malformed; permission and
/// operation failures are carried in the returned [`Reply`]'s result code.
type Handler = fn(&Dispatcher, &Args<'_>) -> Result<Reply, Error>;

/// An entry in the command table.
pub struct Command {
    pub id: u16,
    pub name: &'static str,
    /// Number of normal parameter words the request must carry.
    pub normal: usize,
    /// Number of translate words the request must carry.
    pub translate: usize,
    handler: Handler,
}

/// Every command the service understands.
pub static COMMANDS: [Command; 21] = [
    Command::new(0x0001, "ReplaceRegisterBits8", 4, 0, handlers::replace_bits8),
    Command::new(0x0002, "SetRegisterBits8", 3, 0, handlers::set_bits8),
    Command::new(0x0003, "ClearRegisterBits8", 3, 0, handlers::clear_bits8),
    Command::new(0x0004, "ReplaceRegisterBits16Multi", 4, 2, handlers::replace_bits16_multi),
    Command::new(0x0005, "WriteRegister8", 3, 0, handlers::write8),
    Command::new(0x0006, "WriteDevice8", 2, 0, handlers::write_device8),
    Command::new(0x0007, "WriteRegister16", 3, 0, handlers::write16),
    Command::new(0x0008, "WriteRegister16Multi", 3, 2, handlers::write16_multi),
    Command::new(0x0009, "ReadRegister8", 2, 0, handlers::read8),
    Command::new(0x000A, "ReadRegister16", 2, 0, handlers::read16),
    Command::new(0x000B, "WriteRegisters8", 3, 2, handlers::write_registers8),
    Command::new(0x000C, "WriteRegisters16", 3, 2, handlers::write_registers16),
    Command::new(0x000D, "ReadRegisters8", 3, 0, handlers::read_registers8),
    Command::new(0x000E, "WriteRegisters8", 3, 2, handlers::write_registers8),
    Command::new(0x000F, "ReadRegisters8Legacy", 3, 0, handlers::read_registers8_legacy),
    Command::new(0x0010, "ReadRegisters16", 3, 0, handlers::read_registers16),
    Command::new(0x0011, "WriteRegisters8Mapped", 3, 2, handlers::write_registers8_mapped),
    Command::new(0x0012, "ReadRegisters8Mapped", 3, 2, handlers::read_registers8_mapped),
    Command::new(0x0013, "ReadDeviceRaw", 1, 0, handlers::read_device_raw),
    Command::new(0x0014, "WriteDeviceRawMulti", 2, 2, handlers::write_device_raw_multi),
    Command::new(0x0015, "ReadDeviceRawMulti", 2, 0, handlers::read_device_raw_multi),
];

/// Executes requests on behalf of one session.
pub struct Dispatcher {
    i2c: I2c,
    category: Category,
    input_capacity: usize,
    output_capacity: usize,
}

/// A request's arguments, already checked against the command's header.
pub(crate) struct Args<'req> {
    id: u16,
    params: &'req [u32],
    buffers: &'req [Buffer],
}

// === impl Command ===

impl Command {
    const fn new(
        id: u16,
        name: &'static str,
        normal: usize,
        translate: usize,
        handler: Handler,
    ) -> Self {
        Self {
            id,
            name,
            normal,
            translate,
            handler,
        }
    }

    pub fn lookup(id: u16) -> Option<&'static Command> {
        COMMANDS.iter().find(|cmd| cmd.id == id)
    }

    /// The header a well-formed request for this command carries.
    pub fn request_header(&self) -> Header {
        Header::make(self.id, self.normal, self.translate)
    }

    fn accepts(&self, req: &Request) -> bool {
        req.header == self.request_header()
            && req.params.len() == self.normal
            && req.buffers.len() * 2 == self.translate
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &format_args!("{:#06x}", self.id))
            .field("name", &self.name)
            .field("normal", &self.normal)
            .field("translate", &self.translate)
            .finish()
    }
}

// === impl Dispatcher ===

impl Dispatcher {
    pub fn new(i2c: I2c, category: Category) -> Self {
        let revision = i2c.revision();
        Self {
            i2c,
            category,
            input_capacity: revision.input_buffer_size(),
            output_capacity: revision.output_buffer_size(),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn revision(&self) -> Revision {
        self.i2c.revision()
    }

    /// Handle one request.
    pub fn dispatch(&self, req: &Request) -> Reply {
        let id = req.command_id();
        let Some(cmd) = Command::lookup(id) else {
            tracing::warn!(category = %self.category, id, "unknown command");
            return Reply::error(Error::InvalidCommand(id));
        };

        tracing::debug!(category = %self.category, cmd = cmd.name, id, "dispatch");

        if !cmd.accepts(req) {
            tracing::warn!(
                cmd = cmd.name,
                header = req.header.bits(),
                params = req.params.len(),
                buffers = req.buffers.len(),
                "header does not match command"
            );
            return Reply::error(Error::MalformedRequest(Malformed::Header));
        }

        let oversized = req.buffers.iter().any(|buf| {
            matches!(buf, Buffer::Static { data, .. } if data.len() > self.input_capacity)
        });
        if oversized {
            tracing::warn!(
                cmd = cmd.name,
                capacity = self.input_capacity,
                "static buffer too large"
            );
            return Reply::error(Error::MalformedRequest(Malformed::Buffer));
        }

        let args = Args {
            id,
            params: &req.params,
            buffers: &req.buffers,
        };
        match (cmd.handler)(self, &args) {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!(cmd = cmd.name, %error, "rejected request");
                Reply::error(error)
            }
        }
    }

    /// Run `op` against `dev`, if this session may address it.
    fn authorized<T>(
        &self,
        dev: DeviceId,
        op: impl FnOnce(&I2c) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.check_permission(dev)?;
        op(&self.i2c).map_err(|error| self.operation_failed(dev, error))
    }

    /// Run `op` against every device in `ids`, in order.
    ///
    /// Permission for every id is checked before anything is done. The first
    /// failed operation stops the batch; earlier ones are not undone.
    fn authorized_batch(
        &self,
        ids: &[u8],
        op: impl Fn(&I2c, DeviceId) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let ids = ids.iter().copied().map(DeviceId);
        for dev in ids.clone() {
            self.check_permission(dev)?;
        }
        for dev in ids {
            op(&self.i2c, dev).map_err(|error| self.operation_failed(dev, error))?;
        }
        Ok(())
    }

    /// Clamp a requested element count to what fits in the session's
    /// outbound buffer.
    fn clamp_output(&self, requested: u32, elem_size: usize) -> usize {
        (requested as usize).min(self.output_capacity / elem_size)
    }

    fn check_permission(&self, dev: DeviceId) -> Result<(), Error> {
        if self.category.is_permitted(dev, self.revision()) {
            Ok(())
        } else {
            tracing::warn!(category = %self.category, %dev, "permission denied");
            Err(Error::PermissionDenied(dev))
        }
    }

    fn operation_failed(&self, dev: DeviceId, error: Error) -> Error {
        tracing::warn!(category = %self.category, %dev, %error, "operation failed");
        error
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("category", &self.category)
            .field("revision", &self.revision())
            .field("input_capacity", &self.input_capacity)
            .field("output_capacity", &self.output_capacity)
            .finish()
    }
}

// === impl Args ===

impl<'req> Args<'req> {
    fn word(&self, i: usize) -> u32 {
        self.params[i]
    }

    fn byte(&self, i: usize) -> u8 {
        self.params[i] as u8
    }

    fn half(&self, i: usize) -> u16 {
        self.params[i] as u16
    }

    fn device(&self, i: usize) -> DeviceId {
        DeviceId(self.byte(i))
    }

    /// The `i`th buffer, which must be static buffer slot `slot` holding
    /// exactly `len` bytes.
    fn static_buffer(&self, i: usize, slot: u8, len: usize) -> Result<&'req [u8], Error> {
        self.static_buffer_fitting(i, slot, |actual| actual == len)
    }

    fn static_buffer_fitting(
        &self,
        i: usize,
        slot: u8,
        fits: impl Fn(usize) -> bool,
    ) -> Result<&'req [u8], Error> {
        self.buffers[i]
            .as_static(slot)
            .filter(|data| fits(data.len()))
            .ok_or(Error::MalformedRequest(Malformed::Buffer))
    }

    /// The `i`th buffer, which must be mapped with `perm` and hold exactly
    /// `len` bytes.
    fn mapped_buffer(&self, i: usize, perm: Perm, len: usize) -> Result<&'req [u8], Error> {
        self.buffers[i]
            .as_mapped(perm)
            .filter(|data| data.len() == len)
            .ok_or(Error::MalformedRequest(Malformed::Buffer))
    }
}
