use std::path::PathBuf;

use aps_common::ServerConfigPatch;
use clap::Parser;

#[derive(Parser)]
#[command(name = "aps", version, about)]
pub(crate) struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, short, env = "APS_CONFIG", default_value = "config.json")]
    pub(crate) config: PathBuf,
    #[arg(long, env = "APS_HOST")]
    pub(crate) host: Option<String>,
    #[arg(long, env = "APS_PORT")]
    pub(crate) port: Option<u16>,
    /// Debug-level logging for the proxy crates.
    #[arg(long, short)]
    pub(crate) verbose: bool,
}

impl Cli {
    pub(crate) fn server_patch(&self) -> ServerConfigPatch {
        ServerConfigPatch {
            host: self.host.clone(),
            port: self.port,
            verbose: self.verbose.then_some(true),
        }
    }
}
