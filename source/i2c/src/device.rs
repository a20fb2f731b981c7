//! # Device Directory
//!
//! Every peripheral reachable through this service has a fixed id, and each
//! id maps to exactly one bus and one slave address. The table is a hardware
//! constant; nothing here is discovered at run time.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{bus::BusId, Error};

/// Which hardware revision the service is running on.
///
/// The revised hardware adds two devices (NFC and QTM), the matching client
/// categories, raw device commands, and larger IPC buffers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Revision {
    #[default]
    Base,
    Revised,
}

/// A device identifier, as sent by clients.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u8);

/// Where a device lives: the bus it is wired to, and its 8-bit write address
/// (the 7-bit slave address shifted left, direction bit clear).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub bus: BusId,
    pub write_address: u8,
}

const fn dev(bus: BusId, write_address: u8) -> DeviceConfig {
    DeviceConfig { bus, write_address }
}

/// The full device table. Entries past [`Revision::max_device`] only exist on
/// revised hardware.
static DEVICES: [DeviceConfig; 18] = [
    dev(BusId::Bus0, 0x4A),
    dev(BusId::Bus0, 0x7A),
    dev(BusId::Bus0, 0x78),
    dev(BusId::Bus1, 0x4A),
    dev(BusId::Bus1, 0x78),
    dev(BusId::Bus1, 0x2C),
    dev(BusId::Bus1, 0x2E),
    dev(BusId::Bus1, 0x40),
    dev(BusId::Bus1, 0x44),
    dev(BusId::Bus2, 0xD6),
    dev(BusId::Bus2, 0xD0),
    dev(BusId::Bus2, 0xD2),
    dev(BusId::Bus2, 0xA4),
    dev(BusId::Bus2, 0x9A),
    dev(BusId::Bus2, 0xA0),
    dev(BusId::Bus1, 0xEE),
    // revised hardware only
    dev(BusId::Bus0, 0x40),
    dev(BusId::Bus2, 0x54),
];

// === impl Revision ===

impl Revision {
    /// The highest valid device id on this revision.
    pub const fn max_device(self) -> DeviceId {
        match self {
            Revision::Base => DeviceId(15),
            Revision::Revised => DeviceId(17),
        }
    }

    /// Capacity of a session's inbound static buffer, in bytes.
    pub const fn input_buffer_size(self) -> usize {
        match self {
            Revision::Base => 0x10,
            Revision::Revised => 0x200,
        }
    }

    /// Capacity of a session's outbound static buffer, in bytes.
    pub const fn output_buffer_size(self) -> usize {
        match self {
            Revision::Base => 0x20,
            Revision::Revised => 0x200,
        }
    }

    pub const fn has_raw_commands(self) -> bool {
        matches!(self, Revision::Revised)
    }

    /// Look up the configuration for `id`.
    ///
    /// Ids past this revision's last device are rejected with
    /// [`Error::InvalidDevice`].
    pub fn device(self, id: DeviceId) -> Result<&'static DeviceConfig, Error> {
        if id > self.max_device() {
            return Err(Error::InvalidDevice(id));
        }
        Ok(&DEVICES[id.0 as usize])
    }

    /// Iterate over every device that exists on this revision.
    pub fn devices(self) -> impl Iterator<Item = (DeviceId, &'static DeviceConfig)> {
        DEVICES[..=self.max_device().0 as usize]
            .iter()
            .enumerate()
            .map(|(id, config)| (DeviceId(id as u8), config))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Base => f.write_str("base"),
            Revision::Revised => f.write_str("revised"),
        }
    }
}

// === impl DeviceId ===

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u8> for DeviceId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

// === impl DeviceConfig ===

impl DeviceConfig {
    /// The address byte sent to start a read: the write address with the
    /// direction bit set.
    pub const fn read_address(&self) -> u8 {
        self.write_address | 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_ranges() {
        assert_eq!(Revision::Base.devices().count(), 16);
        assert_eq!(Revision::Revised.devices().count(), 18);
        assert_eq!(
            Revision::Base.device(DeviceId(16)),
            Err(Error::InvalidDevice(DeviceId(16)))
        );
        assert_eq!(
            Revision::Revised.device(DeviceId(16)).map(|d| d.write_address),
            Ok(0x40)
        );
        assert!(Revision::Revised.device(DeviceId(18)).is_err());
    }

    #[test]
    fn addresses_leave_room_for_direction_bit() {
        for (id, config) in Revision::Revised.devices() {
            assert_eq!(config.write_address & 1, 0, "device {id} has its read bit set");
            assert_eq!(config.read_address(), config.write_address + 1);
        }
    }
}
