//! Scripted client sessions.
//!
//! Each session connects to one category's endpoint, writes and reads back a
//! register on every device the category may address, and checks that a
//! device it may not address is refused.

use i2c::{
    access::Category,
    device::{DeviceId, Revision},
    ipc::{Reply, Request},
    port::{Client, Registry},
    ResultCode,
};
use miette::{IntoDiagnostic, Result};

use crate::config::{HardwareConfig, RegisterWidth};

/// How many checks in a session came out as expected.
#[derive(Copy, Clone, Debug, Default)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
}

impl Tally {
    fn record(&mut self, ok: bool) -> &'static str {
        if ok {
            self.passed += 1;
            "ok"
        } else {
            self.failed += 1;
            "FAILED"
        }
    }
}

impl core::ops::AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.passed += rhs.passed;
        self.failed += rhs.failed;
    }
}

#[tracing::instrument(level = "info", skip_all, fields(%category, %revision))]
pub fn run_session(
    registry: &Registry,
    category: Category,
    revision: Revision,
    hw: &HardwareConfig,
) -> Result<Tally> {
    let client = registry.connect(category.service_name()).into_diagnostic()?;
    let service = category.service_name();
    let mut tally = Tally::default();

    let (permitted, denied): (Vec<_>, Vec<_>) = revision
        .devices()
        .map(|(id, _)| id)
        .partition(|&id| category.is_permitted(id, revision));

    for id in permitted {
        let (write, read, value, expected) = match hw.width(id) {
            RegisterWidth::Reg8 => {
                let value = 0xA0 | id.0 as u32;
                let (write, read) = round_trip(&client, write8(id, 0x10, value), read8(id, 0x10))?;
                (write, read.result, read.params[0], value)
            }
            RegisterWidth::Reg16 => {
                let value = 0xBE00 | id.0 as u32;
                let (write, read) =
                    round_trip(&client, write16(id, 0x1000, value), read16(id, 0x1000))?;
                (write, read.result, read.params[0], value)
            }
        };

        let ok = if hw.is_absent(id) {
            let failed = ResultCode::I2C_TRANSACTION_FAILED;
            write == failed && read == failed
        } else {
            write.is_success() && read.is_success() && value == expected
        };
        let verdict = tally.record(ok);
        let dev = id.to_string();
        println!("{service:<9} {dev:<4} write {write} read {read} value {value:#06x}  {verdict}");
    }

    if let Some(&id) = denied.first() {
        let reply = client.request(read8(id, 0)).into_diagnostic()?;
        let verdict = tally.record(reply.result == ResultCode::I2C_NOT_AUTHORIZED);
        let dev = id.to_string();
        let read = reply.result;
        println!("{service:<9} {dev:<4} read {read} (not permitted)  {verdict}");
    }

    Ok(tally)
}

fn round_trip(client: &Client, write: Request, read: Request) -> Result<(ResultCode, Reply)> {
    let write = client.request(write).into_diagnostic()?.result;
    let read = client.request(read).into_diagnostic()?;
    Ok((write, read))
}

fn write8(id: DeviceId, reg: u32, value: u32) -> Request {
    Request::new(0x0005)
        .with_param(id.0 as u32)
        .with_param(reg)
        .with_param(value)
}

fn read8(id: DeviceId, reg: u32) -> Request {
    Request::new(0x0009).with_param(id.0 as u32).with_param(reg)
}

fn write16(id: DeviceId, reg: u32, value: u32) -> Request {
    Request::new(0x0007)
        .with_param(id.0 as u32)
        .with_param(reg)
        .with_param(value)
}

fn read16(id: DeviceId, reg: u32) -> Request {
    Request::new(0x000A).with_param(id.0 as u32).with_param(reg)
}
