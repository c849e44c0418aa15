//! Status command
//!
//! Runs the mount, ping, and round-trip checks against the configured
//! dispatch target and prints a per-check breakdown.

use std::time::Duration;

use console::style;
use indicatif::ProgressBar;

use crate::config::AppConfig;
use crate::error::Result;
use crate::server::{Server, ServerStatus};

pub async fn execute(config: AppConfig, detailed: bool, json: bool) -> Result<()> {
    let mut server = Server::new(config.server, config.mpi);

    if server.is_local() {
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(server.last_known_status())?
            );
            return Ok(());
        }
        println!(
            "  {} {}",
            style("○").dim(),
            style("Local execution; nothing to check").dim()
        );
        println!(
            "\n  Jobs run on this machine. Set a host with {}.",
            style("skiff config set host <name>").cyan()
        );
        return Ok(());
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Checking server...");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let status = server.check_status_full().await;

    spinner.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let glyph = if status.ok {
        style("●").green().bold()
    } else {
        style("●").red().bold()
    };
    println!(
        "  {} {} {}",
        glyph,
        style(server.get_value("host")?).white().bold(),
        style(format!("({})", server.connection_prefix())).dim()
    );
    println!();
    let mount_dir = server.get_value("mount_dir")?;
    print_check("mount", status.mount, Some(mount_dir.as_str()));
    print_check("ping", status.ping, None);
    print_check("round-trip", status.roundtrip, None);
    println!(
        "  {}        {}",
        style("Engine").dim(),
        style(&status.engine_version).white()
    );

    if detailed {
        println!();
        println!(
            "  {}    {}",
            style("Server dir").dim(),
            server.get_value("server_dir")?
        );
        println!(
            "  {}   {}",
            style("Interpreter").dim(),
            server.get_value("interpreter")?
        );
        println!(
            "  {}  {} / {} / {}",
            style("Cmd/poll/wait").dim(),
            server.get_value("command_timeout")?,
            server.get_value("poll_interval")?,
            server.get_value("poll_timeout")?
        );
        if let Some(mpi) = server.mpi() {
            if !mpi.is_empty() {
                println!("  {}", style("MPI options").dim());
                for (key, value) in mpi.iter() {
                    println!("    {} = {}", style(key).dim(), value);
                }
            }
        }
    }

    if !status.ok {
        println!();
        print_hint(&status);
    }

    Ok(())
}

fn print_check(label: &str, ok: bool, note: Option<&str>) {
    let (icon, styled_label) = if ok {
        (style("[x]").green(), style(label).green())
    } else {
        (style("[!]").red(), style(label).red())
    };
    let note = note
        .map(|n| format!("  {}", style(n).dim()))
        .unwrap_or_default();
    println!("  {} {}{}", icon, styled_label, note);
}

fn print_hint(status: &ServerStatus) {
    if !status.mount {
        println!(
            "  {}",
            style("The mount directory is missing. Is the server directory bind-mounted?").dim()
        );
    } else if !status.ping {
        println!(
            "  {}",
            style("The server did not answer. Check the host and your keys.").dim()
        );
    } else {
        println!(
            "  {}",
            style("Commands reach the server but files do not round-trip through the mount.")
                .dim()
        );
    }
}
