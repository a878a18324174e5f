//! Shell host: the window, its lifecycle, and the bridge.
//!
//! Window content gets exactly two capabilities: the `run_python_script`
//! command and the `python-output` event channel. The general
//! process-spawning capability stays on this side of the bridge; no shell
//! plugin is installed and the capability file grants the window
//! `core:default` only.

use std::thread;

use tauri::{AppHandle, Emitter, RunEvent, State};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::process_manager::PROCESS_MANAGER;
use crate::protocol::{Envelope, OUTPUT_CHANNEL};
use crate::runner::{RunHandle, ScriptRunner};

pub const MAIN_WINDOW_LABEL: &str = "main";

#[cfg(target_os = "macos")]
const WINDOW_WIDTH: f64 = 800.0;
#[cfg(target_os = "macos")]
const WINDOW_HEIGHT: f64 = 600.0;

/// State behind the bridge; the runner is the only capability window
/// content can reach.
pub struct ShellState {
    pub runner: ScriptRunner,
}

/// Bridge operation: request a script run.
///
/// Fire-and-forget: returns the generated request id immediately; all
/// output and the terminal status arrive on [`OUTPUT_CHANNEL`], tagged
/// with that id. A spawn-time failure rejects the invoke instead.
#[tauri::command]
pub fn run_python_script(
    app: AppHandle,
    state: State<'_, ShellState>,
    run_type: Option<String>,
) -> std::result::Result<String, String> {
    let handle = state
        .runner
        .spawn(run_type.as_deref())
        .map_err(|e| e.to_string())?;

    let request_id = handle.request_id();
    forward_run_events(app, handle);
    Ok(request_id.to_string())
}

/// Relay one run's events onto the shared window channel.
///
/// Concurrent runs share the channel; their envelopes interleave, each
/// tagged with its own request id.
fn forward_run_events(app: AppHandle, handle: RunHandle) {
    thread::spawn(move || {
        let request_id = handle.request_id();
        while let Ok(event) = handle.events().recv_blocking() {
            let envelope = Envelope::new(event);
            if let Err(e) = app.emit(OUTPUT_CHANNEL, &envelope) {
                warn!(request_id = %request_id, error = %e, "Failed to emit output message");
            }
        }
        debug!(request_id = %request_id, "Run relay exiting");
    });
}

/// Build and run the shell until the platform event loop ends.
pub fn run(config: Config) -> anyhow::Result<()> {
    let runner = ScriptRunner::new(&config);
    info!(
        interpreter = %runner.interpreter().display(),
        script = %runner.script().display(),
        "Starting shell host"
    );

    let app = tauri::Builder::default()
        .manage(ShellState { runner })
        .invoke_handler(tauri::generate_handler![run_python_script])
        .build(tauri::generate_context!())?;

    app.run(handle_run_event);
    Ok(())
}

#[cfg_attr(not(target_os = "macos"), allow(unused_variables))]
fn handle_run_event(app: &AppHandle, event: RunEvent) {
    match event {
        // Last window closed: stay resident on macOS, quit elsewhere.
        // `code` is None exactly when the exit request came from the
        // window-all-closed path, so programmatic exits still go through.
        #[cfg(target_os = "macos")]
        RunEvent::ExitRequested {
            code: None, api, ..
        } => {
            api.prevent_exit();
        }

        #[cfg(target_os = "macos")]
        RunEvent::Reopen {
            has_visible_windows: false,
            ..
        } => {
            use crate::error::ResultExt;
            recreate_main_window(app).log_err();
        }

        RunEvent::Exit => {
            let active = PROCESS_MANAGER.active_count();
            if active > 0 {
                info!(active, "Shutting down with live script processes");
            }
            PROCESS_MANAGER.kill_all();
        }

        _ => {}
    }
}

/// Activation with no open window brings the window back.
#[cfg(target_os = "macos")]
fn recreate_main_window(app: &AppHandle) -> crate::error::Result<()> {
    use crate::error::ShellError;
    use tauri::{Manager, WebviewUrl, WebviewWindowBuilder};

    if app.get_webview_window(MAIN_WINDOW_LABEL).is_some() {
        return Ok(());
    }

    info!("Recreating main window on activate");
    WebviewWindowBuilder::new(app, MAIN_WINDOW_LABEL, WebviewUrl::default())
        .title("Script Relay")
        .inner_size(WINDOW_WIDTH, WINDOW_HEIGHT)
        .build()
        .map(|_| ())
        .map_err(|e| ShellError::Window(e.to_string()))
}
