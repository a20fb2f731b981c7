use core::fmt;

use crate::device::DeviceId;

/// Errors returned by the I2C service.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The session's category may not address this device.
    #[error("category may not access device {0}")]
    PermissionDenied(DeviceId),

    /// Every attempt at the transaction failed, or its final step was not
    /// acknowledged.
    #[error("I2C transaction failed")]
    TransactionFailed,

    /// The device id is outside the directory for this hardware revision.
    #[error("no such device {0}")]
    InvalidDevice(DeviceId),

    /// The request's shape does not match its command.
    #[error("malformed request: {0}")]
    MalformedRequest(Malformed),

    /// The command exists, but not on this hardware revision.
    #[error("command not implemented on this hardware")]
    NotImplemented,

    /// The command id is unknown.
    #[error("unknown command {0:#06x}")]
    InvalidCommand(u16),

    /// A platform primitive failed outside the bus protocol. Not recoverable.
    #[error("internal fault: {0}")]
    InternalFault(&'static str),
}

/// How a request was malformed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Malformed {
    /// The header's parameter counts do not match the command.
    Header,
    /// An auxiliary buffer has the wrong kind, slot, permission, or size.
    Buffer,
}

/// A 32-bit result code, as carried in the first word of every reply.
///
/// Codes use the platform's layout: `level << 27 | summary << 21 |
/// module << 10 | description`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

// === impl Error ===

impl Error {
    /// The result code this error is reported to clients as.
    pub const fn code(&self) -> ResultCode {
        match self {
            Error::PermissionDenied(_) => ResultCode::I2C_NOT_AUTHORIZED,
            Error::TransactionFailed => ResultCode::I2C_TRANSACTION_FAILED,
            Error::InvalidDevice(_) => ResultCode::I2C_OUT_OF_RANGE,
            Error::MalformedRequest(Malformed::Header) => ResultCode::OS_INVALID_HEADER,
            Error::MalformedRequest(Malformed::Buffer) => ResultCode::OS_INVALID_IPCARG,
            Error::NotImplemented => ResultCode::I2C_NOT_IMPLEMENTED,
            Error::InvalidCommand(_) => ResultCode::OS_INVALID_IPCARG,
            Error::InternalFault(_) => ResultCode::I2C_INTERNAL_FAULT,
        }
    }

    /// Returns `true` if this error must take the whole service down.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Error::InternalFault(_))
    }
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Malformed::Header => f.write_str("header does not match command"),
            Malformed::Buffer => f.write_str("buffer descriptor does not match command"),
        }
    }
}

// === impl ResultCode ===

impl ResultCode {
    const MODULE_OS: u32 = 6;
    const MODULE_I2C: u32 = 11;

    const LEVEL_STATUS: u32 = 0x19;
    const LEVEL_PERMANENT: u32 = 0x1B;
    const LEVEL_FATAL: u32 = 0x1F;

    const SUMMARY_NOT_SUPPORTED: u32 = 6;
    const SUMMARY_INVALID_ARG: u32 = 7;
    const SUMMARY_WRONG_ARG: u32 = 8;
    const SUMMARY_INTERNAL: u32 = 11;

    pub const SUCCESS: Self = Self(0);

    pub const I2C_NOT_AUTHORIZED: Self = Self::new(
        Self::LEVEL_PERMANENT,
        Self::SUMMARY_NOT_SUPPORTED,
        Self::MODULE_I2C,
        1002,
    );
    pub const I2C_TRANSACTION_FAILED: Self = Self::new(
        Self::LEVEL_STATUS,
        Self::SUMMARY_INTERNAL,
        Self::MODULE_I2C,
        1007,
    );
    pub const I2C_NOT_IMPLEMENTED: Self = Self::new(
        Self::LEVEL_PERMANENT,
        Self::SUMMARY_NOT_SUPPORTED,
        Self::MODULE_I2C,
        1012,
    );
    pub const I2C_OUT_OF_RANGE: Self = Self::new(
        Self::LEVEL_PERMANENT,
        Self::SUMMARY_INVALID_ARG,
        Self::MODULE_I2C,
        1021,
    );
    pub const I2C_INTERNAL_FAULT: Self = Self::new(
        Self::LEVEL_FATAL,
        Self::SUMMARY_INTERNAL,
        Self::MODULE_I2C,
        1023,
    );
    pub const OS_INVALID_HEADER: Self = Self::new(
        Self::LEVEL_PERMANENT,
        Self::SUMMARY_WRONG_ARG,
        Self::MODULE_OS,
        47,
    );
    pub const OS_INVALID_IPCARG: Self = Self::new(
        Self::LEVEL_PERMANENT,
        Self::SUMMARY_WRONG_ARG,
        Self::MODULE_OS,
        48,
    );

    const fn new(level: u32, summary: u32, module: u32, description: u32) -> Self {
        Self(
            (level & 0x1F) << 27
                | (summary & 0x3F) << 21
                | (module & 0xFF) << 10
                | (description & 0x3FF),
        )
    }

    pub const fn is_success(self) -> bool {
        // the level field is zero for success and informational codes
        (self.0 as i32) >= 0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl From<&'_ Error> for ResultCode {
    fn from(error: &Error) -> Self {
        error.code()
    }
}

impl From<Error> for ResultCode {
    fn from(error: Error) -> Self {
        error.code()
    }
}

impl<T> From<&'_ Result<T, Error>> for ResultCode {
    fn from(res: &Result<T, Error>) -> Self {
        match res {
            Ok(_) => ResultCode::SUCCESS,
            Err(error) => error.code(),
        }
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultCode({:#010x})", self.0)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
