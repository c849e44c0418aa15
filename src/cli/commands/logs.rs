//! Logs command - view a job's captured output from the mount.
//!
//! One-shot mode prints the last N lines of `<script>.log`; follow mode
//! keeps polling the file and prints whatever got appended, like tail -f.

use anyhow::Context;
use console::style;

use crate::config::AppConfig;
use crate::error::Result;
use crate::server::Server;

pub async fn execute(config: AppConfig, script: &str, lines: usize, follow: bool) -> Result<()> {
    let server = Server::new(config.server, config.mpi);

    if server.is_local() {
        println!(
            "  {} {}",
            style("○").dim(),
            style("Server is local; no job log to read").dim()
        );
        return Ok(());
    }

    let path = server.job_log_path(script);
    println!(
        "{} {}",
        style("Log:").dim(),
        style(path.display()).dim()
    );
    println!();

    if follow {
        stream_log(&server, script).await
    } else {
        show_log(&server, script, lines).await
    }
}

async fn show_log(server: &Server, script: &str, lines: usize) -> Result<()> {
    match server.job_log(script).await {
        None => {
            println!("  {}", style("No output yet.").dim());
        }
        Some(content) => {
            let all: Vec<&str> = content.lines().collect();
            let start = all.len().saturating_sub(lines);
            for line in &all[start..] {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

async fn stream_log(server: &Server, script: &str) -> Result<()> {
    use std::io::Write as _;

    println!("  {}", style("Following (Ctrl-C to stop)...").dim());
    println!();

    let path = server.job_log_path(script);
    let interval = server.config().poll_interval();
    let mut printed = 0usize;

    loop {
        if tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Cannot watch {}", path.display()))?
        {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Cannot read {}", path.display()))?;

            // the log is append-only; a shrink means it was recreated
            if content.len() < printed {
                printed = 0;
            }
            if content.len() > printed {
                print!("{}", &content[printed..]);
                std::io::stdout().flush().ok();
                printed = content.len();
            }
        }
        tokio::time::sleep(interval).await;
    }
}
