#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use script_relay::{app, config, logging};

fn main() -> anyhow::Result<()> {
    // Guard must outlive the event loop so shutdown logs get flushed
    let _guard = logging::init();

    let config = config::load_config();
    app::run(config)
}
