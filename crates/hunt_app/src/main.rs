mod app;

use std::process::ExitCode;

use tracing::{error, info};

use app::bootstrap::{self, AppSettings, StartupError};
use app::console::ConsoleCommandProcessor;
use app::loop_runner;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    bootstrap::init_tracing();
    info!("=== Hunt Console Startup ===");

    let startup = AppSettings::from_env().and_then(|settings| {
        let session = bootstrap::build_session(&settings)?;
        let processor = ConsoleCommandProcessor::new().map_err(StartupError::Console)?;
        Ok((session, processor))
    });
    let (session, processor) = match startup {
        Ok(parts) => parts,
        Err(err) => {
            error!(error = %err, "startup_failed");
            return ExitCode::FAILURE;
        }
    };

    loop_runner::run(session, processor).await;
    ExitCode::SUCCESS
}
