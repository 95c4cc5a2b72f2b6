use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use super::bootstrap::ConsoleSession;
use super::console::{ConsoleCommandProcessor, ConsoleFlow};

/// Mounts the session, then serves stdin commands while the periodic refresh
/// runs alongside. Returns once `quit` is entered or stdin closes.
pub(crate) async fn run(session: ConsoleSession, processor: ConsoleCommandProcessor) {
    let report = session.mount().await;
    info!(source = ?report.source, "initial_reconcile_finished");

    let console = serve_console(&session, &processor);
    tokio::select! {
        result = console => {
            if let Err(err) = result {
                error!(error = %err, "console_io_failed");
            }
        }
        runs = session.run_periodic_refresh() => {
            warn!(runs, "periodic_refresh_stopped_early");
        }
    }

    session.tear_down();
    let flushed = session.flush_audit().await;
    info!(flushed, unpublished = session.audit().unpublished_len(), "shutdown_complete");
}

async fn serve_console(
    session: &ConsoleSession,
    processor: &ConsoleCommandProcessor,
) -> io::Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();
    write_lines(&mut stdout, &["type 'help' for commands".to_string()]).await?;

    while let Some(line) = lines.next_line().await? {
        let (output, flow) = processor.process_line(session, &line).await;
        write_lines(&mut stdout, &output).await?;
        if flow == ConsoleFlow::Quit {
            break;
        }
    }
    Ok(())
}

async fn write_lines(stdout: &mut io::Stdout, lines: &[String]) -> io::Result<()> {
    for line in lines {
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await
}
