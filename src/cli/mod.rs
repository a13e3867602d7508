//! Command-line interface.
//!
//! Without a subcommand the binary starts the server. Subcommands work
//! directly against the configured database:
//! - `config check` - Validate the configuration file
//! - `admin create` - Create an active admin account
//! - `metrics import <file>` - Upsert daily metrics from a CSV file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::api::auth::create_admin;
use crate::config::Config;
use crate::db;
use crate::import;

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "affiliate-desk")]
#[command(author, version, about = "Affiliate marketing back-office", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "affiliate-desk.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Admin account commands
    #[command(subcommand)]
    Admin(AdminCommands),

    /// Metric data commands
    #[command(subcommand)]
    Metrics(MetricsCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

#[derive(Subcommand, Debug)]
pub enum AdminCommands {
    /// Create an active admin account
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// Password (can also be set via AFFILIATE_DESK_ADMIN_PASSWORD)
        #[arg(long, env = "AFFILIATE_DESK_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum MetricsCommands {
    /// Upsert daily metrics from a CSV file
    Import {
        /// CSV with a header row:
        /// tracking_code,date,clicks,registrations,ftds,qualified_cpa,deposit_amount,commission_cpa,commission_rev
        file: PathBuf,
    },
}

/// Run a CLI command. Returns `Ok(false)` when no subcommand was given and
/// the server should start instead.
pub async fn run_command(cli: &Cli, config: &Config) -> Result<bool> {
    match &cli.command {
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(&cli.config, config)?,
        Some(Commands::Admin(AdminCommands::Create {
            email,
            name,
            password,
        })) => cmd_admin_create(config, email, name, password).await?,
        Some(Commands::Metrics(MetricsCommands::Import { file })) => {
            cmd_metrics_import(config, file).await?
        }
        None => return Ok(false),
    }
    Ok(true)
}

fn cmd_config_check(path: &Path, config: &Config) -> Result<()> {
    println!("Checking configuration file: {}", path.display());
    println!();

    if !path.exists() {
        println!("[!!] Configuration file not found: {}", path.display());
        println!("     Defaults will be used when starting the server.");
        println!();
    }

    println!("Server:");
    println!("  Host:         {}", config.server.host);
    println!("  Port:         {}", config.server.port);
    println!("  Data Dir:     {}", config.server.data_dir.display());
    if config.server.cors_origins.is_empty() {
        println!("  CORS:         Disabled");
    } else {
        println!("  CORS:         {}", config.server.cors_origins.join(", "));
    }
    println!();
    println!("Auth:");
    println!(
        "  JWT Secret:   {}",
        if config.auth.jwt_secret.is_empty() {
            "Not set (random per start, sessions end on restart)"
        } else {
            "Set"
        }
    );
    println!("  Token TTL:    {} days", config.auth.token_ttl_days);
    println!(
        "  Secure Cookies: {}",
        if config.auth.secure_cookies { "Enabled" } else { "Disabled" }
    );
    println!(
        "  Seed Admin:   {}",
        config.auth.admin_email.as_deref().unwrap_or("None")
    );
    println!();

    let problems = config.validate();
    if problems.is_empty() {
        println!("[OK] Configuration is valid");
        return Ok(());
    }

    for problem in &problems {
        println!("[!!] {}", problem);
    }
    anyhow::bail!("Configuration has {} problem(s)", problems.len())
}

async fn cmd_admin_create(config: &Config, email: &str, name: &str, password: &str) -> Result<()> {
    let pool = db::init(&config.server.data_dir, &config.database).await?;

    let user = create_admin(&pool, email, name, password)
        .await
        .context("Failed to create admin account")?;

    println!("[OK] Created admin {} ({})", user.email, user.id);
    Ok(())
}

async fn cmd_metrics_import(config: &Config, file: &Path) -> Result<()> {
    let rows = import::read_metrics_file(file)?;
    println!("Read {} row(s) from {}", rows.len(), file.display());

    let pool = db::init(&config.server.data_dir, &config.database).await?;
    let result = import::import_metrics(&pool, &rows)
        .await
        .with_context(|| format!("Failed to import {}", file.display()))?;

    println!(
        "[OK] Imported metrics: {} created, {} updated",
        result.created, result.updated
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["affiliate-desk"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("affiliate-desk.toml"));

        let cli = Cli::try_parse_from([
            "affiliate-desk",
            "--config",
            "prod.toml",
            "metrics",
            "import",
            "march.csv",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("prod.toml"));
        match cli.command {
            Some(Commands::Metrics(MetricsCommands::Import { file })) => {
                assert_eq!(file, PathBuf::from("march.csv"))
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = Cli::try_parse_from([
            "affiliate-desk",
            "admin",
            "create",
            "--email",
            "root@example.com",
            "--name",
            "Root",
            "--password",
            "password123",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Admin(AdminCommands::Create { .. }))
        ));
    }

    #[test]
    fn test_config_check_fails_on_invalid_config() {
        let mut config = Config::default();
        assert!(cmd_config_check(Path::new("missing.toml"), &config).is_ok());

        config.auth.token_ttl_days = 0;
        assert!(cmd_config_check(Path::new("missing.toml"), &config).is_err());
    }

    #[tokio::test]
    async fn test_admin_create_and_import_against_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.data_dir = dir.path().to_path_buf();

        cmd_admin_create(&config, "root@example.com", "Root", "password123")
            .await
            .unwrap();
        assert!(
            cmd_admin_create(&config, "root@example.com", "Root", "password123")
                .await
                .is_err()
        );

        let csv = dir.path().join("metrics.csv");
        std::fs::write(
            &csv,
            "tracking_code,date,clicks,registrations,ftds,qualified_cpa,deposit_amount,commission_cpa,commission_rev\n\
             unknown-code,2024-01-01,1,1,1,1,1,1,1\n",
        )
        .unwrap();
        assert!(cmd_metrics_import(&config, &csv).await.is_err());
    }
}
