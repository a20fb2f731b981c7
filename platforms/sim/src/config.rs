//! Configuration for the simulator, read from a TOML file.

use std::{fs, path::Path};

use i2c::{
    device::{DeviceId, Revision},
    sim::{self, SimBus, SimDevice},
    ServiceSettings,
};
use miette::{Context, IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    /// Settings for the service itself.
    #[serde(default)]
    pub service: ServiceSettings,
    /// The simulated hardware.
    #[serde(default)]
    pub sim: HardwareConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HardwareConfig {
    /// Number of address phases every bus `NACK`s before it starts
    /// behaving.
    #[serde(default)]
    pub flaky_starts: usize,
    /// Overrides for individual devices. Devices not listed here are
    /// present, with 8-bit register addresses.
    #[serde(default)]
    pub devices: Vec<DeviceOverride>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceOverride {
    pub id: u8,
    #[serde(default)]
    pub registers: RegisterWidth,
    /// If set, nothing answers at the device's address.
    #[serde(default)]
    pub absent: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegisterWidth {
    #[default]
    Reg8,
    Reg16,
}

impl SimConfig {
    /// Load the configuration at `path`, or the defaults if there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read config file '{}'", path.display()))?;
        Self::from_toml(&text)
            .wrap_err_with(|| format!("invalid config file '{}'", path.display()))
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).into_diagnostic()
    }
}

impl HardwareConfig {
    /// Apply the overrides to a freshly built set of simulated buses.
    pub fn apply(&self, sims: &[SimBus; 3], revision: Revision) -> Result<()> {
        for sim in sims {
            sim.nack_starts(self.flaky_starts);
        }

        for device in &self.devices {
            let id = DeviceId(device.id);
            let config = revision.device(id).map_err(|_| {
                miette::miette!("device {id} does not exist on {revision} hardware")
            })?;
            if device.absent {
                sims[config.bus.index()].detach(config.write_address);
                tracing::info!(%id, "device removed");
                continue;
            }
            let sim_device = match device.registers {
                RegisterWidth::Reg8 => SimDevice::reg8(),
                RegisterWidth::Reg16 => SimDevice::reg16(),
            };
            sim::replace_device(sims, revision, id, sim_device);
        }
        Ok(())
    }

    /// The register width the simulated device `id` was configured with.
    pub fn width(&self, id: DeviceId) -> RegisterWidth {
        self.devices
            .iter()
            .find(|device| device.id == id.0)
            .map(|device| device.registers)
            .unwrap_or_default()
    }

    pub fn is_absent(&self, id: DeviceId) -> bool {
        self.devices
            .iter()
            .any(|device| device.id == id.0 && device.absent)
    }
}
