pub mod commands;
pub mod config;
pub mod serial;
pub mod session;
pub mod topology;

use std::sync::Arc;

use config::LinkConfig;
use serial::{SerialLink, SystemPortProvider};
use session::LinkController;

/// Install the `env_logger` backend. `RUST_LOG` overrides `default_level`.
pub fn init_logging(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env).format_timestamp_millis().try_init();
}

/// Build a controller talking to a real serial port
pub fn build_controller(config: LinkConfig) -> Arc<LinkController> {
    let provider = Arc::new(SystemPortProvider::new(config.port_name.clone()));
    let link = Arc::new(SerialLink::new(provider, config));
    Arc::new(LinkController::new(link))
}
