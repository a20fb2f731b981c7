//! # Access Control
//!
//! Clients connect to one endpoint per [`Category`], and the category they
//! connected through decides which devices they may address.

use core::fmt;

use crate::device::{DeviceId, Revision};

/// A client category. Each category has its own endpoint, named by
/// [`Category::service_name`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Category {
    /// Power-management microcontroller.
    Mcu = 0,
    /// Camera modules.
    Cam = 1,
    /// Display controllers.
    Lcd = 2,
    /// Debug board.
    Deb = 3,
    /// Input controller.
    Hid = 4,
    /// Infrared.
    Ir = 5,
    /// EEPROM.
    Eep = 6,
    /// NFC chip, revised hardware only.
    Nfc = 7,
    /// QTM chip, revised hardware only.
    Qtm = 8,
}

// === impl Category ===

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Mcu,
        Category::Cam,
        Category::Lcd,
        Category::Deb,
        Category::Hid,
        Category::Ir,
        Category::Eep,
        Category::Nfc,
        Category::Qtm,
    ];

    /// The categories served on `revision`, in endpoint registration order.
    pub fn for_revision(revision: Revision) -> &'static [Category] {
        match revision {
            Revision::Base => &Self::ALL[..=Category::Eep as usize],
            Revision::Revised => &Self::ALL[..],
        }
    }

    /// The name the category's endpoint is registered under.
    pub const fn service_name(self) -> &'static str {
        match self {
            Category::Mcu => "i2c::MCU",
            Category::Cam => "i2c::CAM",
            Category::Lcd => "i2c::LCD",
            Category::Deb => "i2c::DEB",
            Category::Hid => "i2c::HID",
            Category::Ir => "i2c::IR",
            Category::Eep => "i2c::EEP",
            Category::Nfc => "i2c::NFC",
            Category::Qtm => "i2c::QTM",
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns `true` if a client of this category may address `device`.
    ///
    /// This is a pure table lookup; it never touches hardware, and it is
    /// always evaluated before any bus is locked.
    pub fn is_permitted(self, device: DeviceId, revision: Revision) -> bool {
        let revised = revision == Revision::Revised;
        match (self, device.0) {
            (Category::Mcu, 0 | 3) => true,
            (Category::Cam, 1 | 2 | 4) => true,
            (Category::Lcd, 5 | 6) => true,
            (Category::Deb, 7 | 8) => true,
            (Category::Hid, 9..=12) => true,
            (Category::Ir, 13) => true,
            (Category::Ir, 17) => revised,
            (Category::Eep, 14) => true,
            (Category::Nfc, 15) => revised,
            (Category::Qtm, 16) => revised,
            _ => false,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_matrix() {
        let allowed = |cat: Category, rev| {
            (0..=u8::MAX)
                .filter(|&id| cat.is_permitted(DeviceId(id), rev))
                .collect::<Vec<_>>()
        };

        assert_eq!(allowed(Category::Mcu, Revision::Base), [0, 3]);
        assert_eq!(allowed(Category::Cam, Revision::Base), [1, 2, 4]);
        assert_eq!(allowed(Category::Lcd, Revision::Base), [5, 6]);
        assert_eq!(allowed(Category::Deb, Revision::Base), [7, 8]);
        assert_eq!(allowed(Category::Hid, Revision::Base), [9, 10, 11, 12]);
        assert_eq!(allowed(Category::Ir, Revision::Base), [13]);
        assert_eq!(allowed(Category::Ir, Revision::Revised), [13, 17]);
        assert_eq!(allowed(Category::Eep, Revision::Base), [14]);
        assert!(allowed(Category::Nfc, Revision::Base).is_empty());
        assert_eq!(allowed(Category::Nfc, Revision::Revised), [15]);
        assert_eq!(allowed(Category::Qtm, Revision::Revised), [16]);
    }

    #[test]
    fn categories_per_revision() {
        assert_eq!(Category::for_revision(Revision::Base).len(), 7);
        assert_eq!(Category::for_revision(Revision::Revised).len(), 9);
        assert_eq!(Category::Ir.service_name(), "i2c::IR");
    }
}
