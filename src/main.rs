//! Runs the update server from the current working directory.
//!
//! The process keeps serving until `stop` (or `s`) is typed on standard
//! input or Ctrl+C is pressed, then exits with code 1. Every startup
//! failure also exits with code 1 after printing a diagnostic.

use std::io::Write;
use std::path::PathBuf;
use std::process;
use log::{error, info, warn, Level};
use tokio::io::BufReader;

use update_httpd::bootstrap::{self, StartupError, YamlConfigFile};
use update_httpd::ShutdownHandle;

fn init_logging() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    )
    .target(env_logger::Target::Stdout)
    .format(|buf, record| {
        if record.level() <= Level::Warn {
            writeln!(buf, "[{}] {}", record.level(), record.args())
        }
        else {
            writeln!(buf, "{}", record.args())
        }
    })
    .init();
}

/// Stops the server on a console stop command or Ctrl+C.
fn spawn_control(shutdown: ShutdownHandle) {
    let console = shutdown.clone();
    tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        match bootstrap::run_command_loop(stdin, console).await {
            Ok(true) => info!("Stop command received"),
            Ok(false) => info!("Standard input closed, use Ctrl+C to stop"),
            Err(err) => warn!("Failed to read commands from standard input: {err}"),
        }
    });

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown");
                shutdown.shutdown();
            }
            Err(err) => error!("Error setting up Ctrl+C handler: {err}"),
        }
    });
}

async fn run() -> Result<(), StartupError> {
    let workdir = std::env::current_dir().map_err(|_| {
        StartupError::MissingWorkdir(PathBuf::from("."))
    })?;

    let server = bootstrap::prepare_server(
        &workdir, &YamlConfigFile::in_dir(&workdir)
    )?;
    let listener = server.bind().await?;
    server.display_server_info(listener.local_addr().map_err(update_httpd::ServerError::from)?);
    info!("");
    info!("Type 'stop' or 's' to exit.");

    spawn_control(server.shutdown_handle());
    server.serve(listener).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    init_logging();
    let code = match run().await {
        // Serving only ends on request, which counts as a stop.
        Ok(()) => 1,
        Err(err) => {
            error!("{err}");
            err.exit_code()
        }
    };
    process::exit(code)
}
