//! Poll command
//!
//! One-shot read of a dispatched job's sentinel file.

use console::style;

use crate::config::AppConfig;
use crate::error::Result;
use crate::server::job::JobStatus;
use crate::server::Server;

pub async fn execute(config: AppConfig, script: &str) -> Result<()> {
    let server = Server::new(config.server, config.mpi);

    if server.is_local() {
        println!(
            "  {} {}",
            style("○").dim(),
            style("Server is local; no sentinel to read").dim()
        );
        return Ok(());
    }

    let status = server.check_job_status(script).await;

    let styled = match &status {
        JobStatus::Pending => style("pending").dim(),
        JobStatus::Running => style("running").yellow().bold(),
        JobStatus::Complete => style("complete").green().bold(),
        JobStatus::Failed => style("failed").red().bold(),
        JobStatus::Other(s) => style(s.as_str()).white(),
    };
    println!("  {} {}", style(script).white().bold(), styled);

    if status == JobStatus::Pending {
        println!(
            "  {}",
            style(format!(
                "No sentinel at {} yet.",
                server.job_status_path(script).display()
            ))
            .dim()
        );
    }

    Ok(())
}
