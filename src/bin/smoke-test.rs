//! Headless smoke test for the script runner.
//!
//! Run with: cargo run --bin smoke-test
//! Pass a discriminator: cargo run --bin smoke-test -- --type backup
//!
//! This exercises the runner without a window:
//! 1. Interpreter and script resolution
//! 2. One spawn with the optional `-type` flag
//! 3. Streaming every relayed message until the terminal status

use clap::Parser;
use script_relay::config::{self, Config};
use script_relay::logging;
use script_relay::runner::ScriptRunner;

#[derive(Parser)]
#[command(name = "smoke-test", about = "Run the configured script headlessly")]
struct Args {
    /// Discriminator passed to the script as `-type <value>`
    #[arg(long = "type")]
    run_type: Option<String>,

    /// Script path override
    #[arg(long)]
    script: Option<String>,

    /// Interpreter override
    #[arg(long)]
    interpreter: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let _guard = logging::init();
    let args = Args::parse();

    let mut config: Config = config::load_config();
    if args.script.is_some() {
        config.script = args.script;
    }
    if args.interpreter.is_some() {
        config.interpreter = args.interpreter;
    }

    let runner = ScriptRunner::new(&config);

    println!("=== Script Relay Smoke Test ===\n");
    println!("1. Resolution");
    println!("   interpreter -> {}", runner.interpreter().display());
    println!("   script      -> {}", runner.script().display());
    println!();

    println!("2. Spawning...");
    let handle = runner.spawn(args.run_type.as_deref())?;
    println!(
        "   request {} -> pid {}",
        handle.request_id(),
        handle.pid()
    );
    println!();

    println!("3. Relayed messages:");
    while let Ok(event) = handle.events().recv_blocking() {
        println!("   {}", event.display_line());
        if event.is_terminal() {
            break;
        }
    }

    Ok(())
}
