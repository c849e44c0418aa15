use anyhow::Context;
use console::style;

use crate::config::AppConfig;
use crate::error::Result;
use crate::server::Server;

pub async fn show() -> Result<()> {
    let config_path = AppConfig::config_path()?;

    if !config_path.exists() {
        println!("{}", style("No configuration found.").dim());
        println!("Run {} to create one.", style("skiff init").cyan());
        return Ok(());
    }

    let config = AppConfig::load()?;
    let server = &config.server;

    println!("{}", style("Current Configuration").bold().cyan());
    println!();
    print!("  Host:            ");
    match &server.host {
        Some(host) => println!("{}", style(host).white()),
        None => println!("{}", style("(local)").dim()),
    }
    print!("  Username:        ");
    match &server.username {
        Some(user) => println!("{}", style(user).white()),
        None => println!("{}", style("(none)").dim()),
    }
    print!("  Identity file:   ");
    match &server.identity_file {
        Some(identity) => println!("{}", style(identity).dim()),
        None => println!("{}", style("(none)").dim()),
    }
    println!("  Server dir:      {}", style(&server.server_dir).white());
    println!("  Mount dir:       {}", style(&server.mount_dir).white());
    print!("  Setup script:    ");
    match &server.server_script {
        Some(script) => println!("{}", style(script).white()),
        None => println!("{}", style("(none)").dim()),
    }
    println!("  Remote shell:    {}", style(&server.remote_shell).white());
    println!("  Interpreter:     {}", style(&server.interpreter).white());
    println!(
        "  Command timeout: {}",
        style(&server.command_timeout).yellow()
    );
    println!(
        "  Poll interval:   {}",
        style(&server.poll_interval).yellow()
    );
    println!("  Poll timeout:    {}", style(&server.poll_timeout).yellow());

    if let Some(mpi) = &config.mpi {
        if !mpi.is_empty() {
            println!();
            println!("  {}", style("MPI options").bold());
            for (key, value) in mpi.iter() {
                println!("    {} = {}", style(key).cyan(), value);
            }
        }
    }

    println!();
    println!("Config file: {}", style(config_path.display()).dim());

    Ok(())
}

pub async fn set(key: String, value: String) -> Result<()> {
    let config = AppConfig::read().unwrap_or_default();
    let mut server = Server::new(config.server, config.mpi);

    // "mpi.<key>" writes an MPI option even when it does not exist yet;
    // bare keys go through the handle's lookup (MPI first, then server),
    // where an unknown name is a hard error. Validation happens at load
    // time so the config can be built up one key at a time.
    if let Some(mpi_key) = key.strip_prefix("mpi.") {
        let (server_config, mpi) = server.into_parts();
        let mut mpi = mpi.unwrap_or_default();
        mpi.set(mpi_key, &value);
        let app = AppConfig {
            server: server_config,
            mpi: Some(mpi),
        };
        app.save()?;
    } else {
        server.set_value(&key, &value)?;
        let (server_config, mpi) = server.into_parts();
        let app = AppConfig {
            server: server_config,
            mpi,
        };
        app.save()?;
    }

    println!(
        "{} Set {} = {}",
        style("✓").green().bold(),
        style(&key).cyan(),
        style(&value).white()
    );

    Ok(())
}

pub async fn edit() -> Result<()> {
    let config_path = AppConfig::config_path()?;

    if !config_path.exists() {
        println!("{}", style("No configuration found.").dim());
        println!("Run {} to create one.", style("skiff init").cyan());
        return Ok(());
    }

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());

    std::process::Command::new(&editor)
        .arg(&config_path)
        .status()
        .with_context(|| format!("Failed to launch editor '{}'", editor))?;

    Ok(())
}
