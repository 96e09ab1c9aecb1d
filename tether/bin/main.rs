#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use tether::{Tether, TetherConfig, find_config_file};
use tether_common::{internal, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = match find_config_file()? {
        Some(path) => {
            internal!(level = INFO, "Loading configuration from {}", path.display());
            TetherConfig::load(&path)?
        }
        None => {
            internal!(level = WARN, "No configuration file found, using defaults");
            TetherConfig::default()
        }
    };

    Tether::new(config).serve().await
}
