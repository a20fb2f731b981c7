use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Args {
    /// Path to a TOML configuration file.
    #[clap(long, short, env = "I2C_SIM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Simulate the revised hardware, whatever the configuration file says.
    #[clap(long)]
    pub revised: bool,
}
