use console::style;
use dialoguer::Input;

use crate::config::{normalize_host, AppConfig, ServerConfig};
use crate::error::Result;

pub async fn execute() -> Result<()> {
    println!("{}", style("Welcome to skiff!").bold().cyan());
    println!("Let's configure your dispatch target.\n");

    let host: String = Input::new()
        .with_prompt("Remote host (leave empty to run jobs locally)")
        .allow_empty(true)
        .interact_text()?;
    let host = normalize_host(&host);

    let mut config = ServerConfig {
        host: host.clone(),
        ..Default::default()
    };

    if host.is_some() {
        let username: String = Input::new()
            .with_prompt("Username on the server (optional)")
            .allow_empty(true)
            .interact_text()?;
        if !username.is_empty() {
            config.username = Some(username);
        }

        let default_identity = dirs::home_dir()
            .map(|h| h.join(".ssh").join("id_ed25519").display().to_string())
            .unwrap_or_default();
        let identity_file: String = Input::new()
            .with_prompt("Identity file (optional)")
            .default(default_identity)
            .allow_empty(true)
            .interact_text()?;
        if !identity_file.is_empty() {
            config.identity_file = Some(shellexpand::tilde(&identity_file).to_string());
        }

        config.server_dir = Input::new()
            .with_prompt("Working directory on the server")
            .interact_text()?;

        let mount_dir: String = Input::new()
            .with_prompt("Local mount of the server directory")
            .interact_text()?;
        config.mount_dir = shellexpand::tilde(&mount_dir).to_string();

        let server_script: String = Input::new()
            .with_prompt("Setup script sourced before each job (optional)")
            .allow_empty(true)
            .interact_text()?;
        if !server_script.is_empty() {
            config.server_script = Some(server_script);
        }

        config.interpreter = Input::new()
            .with_prompt("Interpreter for job scripts")
            .default(config.interpreter.clone())
            .interact_text()?;
    }

    config.validate()?;

    let app = AppConfig {
        server: config,
        mpi: None,
    };
    app.save()?;

    println!("\n{}", style("✓ Configuration saved!").green().bold());
    println!(
        "Config file: {}",
        style(AppConfig::config_path()?.display()).dim()
    );
    println!(
        "\nRun {} to verify the connection.",
        style("skiff status").cyan()
    );

    Ok(())
}
