//! Service configuration.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::Revision;

/// Settings for a [`SessionManager`](crate::SessionManager) and the buses it
/// drives.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSettings {
    /// The hardware revision to serve.
    #[serde(default)]
    pub revision: Revision,
    /// How long a transaction step waits for the bus's completion signal
    /// before counting as failed. `None` waits forever.
    #[serde(default)]
    pub irq_timeout: Option<Duration>,
    /// Stack size for session worker threads. `None` uses the platform
    /// default.
    #[serde(default)]
    pub worker_stack_size: Option<usize>,
    /// How many requests a session may have queued before clients block.
    #[serde(default = "ServiceSettings::default_request_capacity")]
    pub request_capacity: usize,
}

impl ServiceSettings {
    pub const DEFAULT_REQUEST_CAPACITY: usize = 1;

    const fn default_request_capacity() -> usize {
        Self::DEFAULT_REQUEST_CAPACITY
    }

    pub fn revised(self) -> Self {
        Self {
            revision: Revision::Revised,
            ..self
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            revision: Revision::default(),
            irq_timeout: None,
            worker_stack_size: None,
            request_capacity: Self::DEFAULT_REQUEST_CAPACITY,
        }
    }
}
