//! Run command
//!
//! Dispatches a job script to the server and optionally blocks until its
//! sentinel reaches a terminal state.

use std::time::Duration;

use console::style;
use indicatif::ProgressBar;

use crate::config::AppConfig;
use crate::error::{Result, SkiffError};
use crate::server::job::JobStatus;
use crate::server::Server;

pub async fn execute(config: AppConfig, script: &str, wait: bool) -> Result<()> {
    let server = Server::new(config.server, config.mpi);

    if server.is_local() {
        println!(
            "  {} {}",
            style("○").dim(),
            style("Server is local; nothing to dispatch").dim()
        );
        return Ok(());
    }

    let remote_shell = server.get_value("remote_shell")?;
    which::which(&remote_shell).map_err(|_| {
        SkiffError::Shell(format!(
            "Remote shell '{}' not found. Install it or change it with 'skiff config set remote_shell <name>'.",
            remote_shell
        ))
    })?;

    server.run_job(script)?;

    println!(
        "  {} Dispatched {} to {}",
        style("→").cyan(),
        style(script).white().bold(),
        style(server.get_value("host")?).white()
    );
    println!(
        "  {}",
        style(format!(
            "Watch it with 'skiff poll {}' or 'skiff logs {} --follow'",
            script, script
        ))
        .dim()
    );

    if !wait {
        return Ok(());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_message(format!("Waiting for {}...", script));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let status = server.wait_for_job(script).await;

    spinner.finish_and_clear();

    match status {
        Ok(JobStatus::Complete) => {
            println!(
                "  {} {} complete",
                style("✓").green().bold(),
                style(script).white().bold()
            );
            Ok(())
        }
        Ok(status) => {
            println!(
                "  {} {} {}",
                style("✗").red().bold(),
                style(script).white().bold(),
                style(&status).red()
            );
            if let Some(log) = server.job_log(script).await {
                println!();
                for line in log.lines().rev().take(10).collect::<Vec<_>>().iter().rev() {
                    println!("  {}", style(line).dim());
                }
            }
            Err(SkiffError::Job(format!("'{}' ended as {}", script, status)))
        }
        Err(e) => Err(e),
    }
}
