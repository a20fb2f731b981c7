//! Handlers for each entry in [`COMMANDS`](super::COMMANDS).
//!
//! Argument layouts are fixed by the command table: by the time a handler
//! runs, the request is known to carry exactly the parameter words and
//! buffer descriptors its command declares.

use super::{Args, Dispatcher};
use crate::{
    ipc::{Buffer, Perm, Reply},
    Error,
};

type Handled = Result<Reply, Error>;

pub(super) fn replace_bits8(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg, value, mask) = (a.device(0), a.byte(1), a.byte(2), a.byte(3));
    let res = d.authorized(dev, |i2c| i2c.replace_bits8(dev, reg, value, mask));
    Ok(Reply::new(a.id, &res))
}

pub(super) fn set_bits8(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg, mask) = (a.device(0), a.byte(1), a.byte(2));
    let res = d.authorized(dev, |i2c| i2c.replace_bits8(dev, reg, mask, mask));
    Ok(Reply::new(a.id, &res))
}

pub(super) fn clear_bits8(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg, mask) = (a.device(0), a.byte(1), a.byte(2));
    let res = d.authorized(dev, |i2c| i2c.replace_bits8(dev, reg, 0, mask));
    Ok(Reply::new(a.id, &res))
}

pub(super) fn replace_bits16_multi(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (reg, value, mask, n) = (a.half(0), a.half(1), a.half(2), a.word(3));
    let ids = a.static_buffer(0, 0, n as usize)?;
    let res = d.authorized_batch(ids, |i2c, dev| i2c.replace_bits16(dev, reg, value, mask));
    Ok(Reply::new(a.id, &res))
}

pub(super) fn write8(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg, value) = (a.device(0), a.byte(1), a.byte(2));
    let res = d.authorized(dev, |i2c| i2c.write8(dev, reg, value));
    Ok(Reply::new(a.id, &res))
}

pub(super) fn write_device8(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, value) = (a.device(0), a.byte(1));
    let res = d.authorized(dev, |i2c| i2c.write_device8(dev, value));
    Ok(Reply::new(a.id, &res))
}

pub(super) fn write16(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg, value) = (a.device(0), a.half(1), a.half(2));
    let res = d.authorized(dev, |i2c| i2c.write16(dev, reg, value));
    Ok(Reply::new(a.id, &res))
}

pub(super) fn write16_multi(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (reg, value, n) = (a.half(0), a.half(1), a.word(2));
    let ids = a.static_buffer(0, 0, n as usize)?;
    let res = d.authorized_batch(ids, |i2c, dev| i2c.write16(dev, reg, value));
    Ok(Reply::new(a.id, &res))
}

pub(super) fn read8(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg) = (a.device(0), a.byte(1));
    let res = d.authorized(dev, |i2c| i2c.read8(dev, reg));
    let value = res.as_ref().copied().unwrap_or(0);
    Ok(Reply::new(a.id, &res).with_param(value as u32))
}

pub(super) fn read16(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg) = (a.device(0), a.half(1));
    let res = d.authorized(dev, |i2c| i2c.read16(dev, reg));
    let value = res.as_ref().copied().unwrap_or(0);
    Ok(Reply::new(a.id, &res).with_param(value as u32))
}

pub(super) fn write_registers8(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg, size) = (a.device(0), a.byte(1), a.word(2));
    let buf = a.static_buffer(0, 1, size as usize)?;
    let res = d.authorized(dev, |i2c| i2c.write_registers8(dev, reg, buf));
    Ok(Reply::new(a.id, &res))
}

pub(super) fn write_registers16(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg, count) = (a.device(0), a.half(1), a.word(2) as usize);
    // a trailing odd byte is ignored
    let bytes = a.static_buffer_fitting(0, 1, |len| len / 2 == count)?;
    let words = bytes
        .chunks_exact(2)
        .map(|word| u16::from_le_bytes([word[0], word[1]]))
        .collect::<Vec<_>>();
    let res = d.authorized(dev, |i2c| i2c.write_registers16(dev, reg, &words));
    Ok(Reply::new(a.id, &res))
}

pub(super) fn read_registers8(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg) = (a.device(0), a.byte(1));
    let mut buf = vec![0; d.clamp_output(a.word(2), 1)];
    let res = d.authorized(dev, |i2c| i2c.read_registers8(dev, reg, &mut buf));
    Ok(Reply::new(a.id, &res).with_buffer(Buffer::Static { id: 0, data: buf }))
}

pub(super) fn read_registers8_legacy(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg) = (a.device(0), a.byte(1));
    let mut buf = vec![0; d.clamp_output(a.word(2), 1)];
    let res = d.authorized(dev, |i2c| i2c.read_registers8_legacy(dev, reg, &mut buf));
    Ok(Reply::new(a.id, &res).with_buffer(Buffer::Static { id: 0, data: buf }))
}

pub(super) fn read_registers16(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg) = (a.device(0), a.half(1));
    let mut words = vec![0; d.clamp_output(a.word(2), 2)];
    let res = d.authorized(dev, |i2c| i2c.read_registers16(dev, reg, &mut words));
    let data = words.iter().flat_map(|word| word.to_le_bytes()).collect();
    Ok(Reply::new(a.id, &res).with_buffer(Buffer::Static { id: 0, data }))
}

pub(super) fn write_registers8_mapped(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg, size) = (a.device(0), a.byte(1), a.word(2));
    let buf = a.mapped_buffer(0, Perm::Read, size as usize)?;
    let res = d.authorized(dev, |i2c| i2c.write_registers8(dev, reg, buf));
    let data = buf.to_vec();
    Ok(Reply::new(a.id, &res).with_buffer(Buffer::Mapped { perm: Perm::Read, data }))
}

pub(super) fn read_registers8_mapped(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let (dev, reg, size) = (a.device(0), a.byte(1), a.word(2));
    let mut data = a.mapped_buffer(0, Perm::Write, size as usize)?.to_vec();
    let res = d.authorized(dev, |i2c| i2c.read_registers8(dev, reg, &mut data));
    Ok(Reply::new(a.id, &res).with_buffer(Buffer::Mapped { perm: Perm::Write, data }))
}

pub(super) fn read_device_raw(d: &Dispatcher, a: &Args<'_>) -> Handled {
    let res = if d.revision().has_raw_commands() {
        let dev = a.device(0);
        d.authorized(dev, |i2c| i2c.read_device_raw(dev))
    } else {
        Err(Error::NotImplemented)
    };
    let value = res.as_ref().copied().unwrap_or(0);
    Ok(Reply::new(a.id, &res).with_param(value as u32))
}

pub(super) fn write_device_raw_multi(d: &Dispatcher, a: &Args<'_>) -> Handled {
    if !d.revision().has_raw_commands() {
        return Ok(Reply::new(a.id, Error::NotImplemented));
    }
    let (dev, size) = (a.device(0), a.word(1));
    let buf = a.static_buffer(0, 1, size as usize)?;
    let res = d.authorized(dev, |i2c| i2c.write_device_raw_multi(dev, buf));
    Ok(Reply::new(a.id, &res))
}

pub(super) fn read_device_raw_multi(d: &Dispatcher, a: &Args<'_>) -> Handled {
    if !d.revision().has_raw_commands() {
        let data = Vec::new();
        return Ok(Reply::new(a.id, Error::NotImplemented)
            .with_buffer(Buffer::Static { id: 0, data }));
    }
    let dev = a.device(0);
    let mut buf = vec![0; d.clamp_output(a.word(1), 1)];
    let res = d.authorized(dev, |i2c| i2c.read_device_raw_multi(dev, &mut buf));
    Ok(Reply::new(a.id, &res).with_buffer(Buffer::Static { id: 0, data: buf }))
}
