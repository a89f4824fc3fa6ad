#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::Parser;

/// Plugin driven mail transport core
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file, overriding the usual search
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;
    let hermod: hermod::controller::Hermod = ron::from_str(&config_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", config_path.display()))?;

    if args.check {
        hermod.check()?;
        println!("{}: configuration is valid", config_path.display());
        return Ok(());
    }

    hermod.run().await
}

/// Find the configuration file using the following precedence:
/// 1. `HERMOD_CONFIG` environment variable
/// 2. ./hermod.config.ron (current working directory)
/// 3. /etc/hermod/hermod.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("HERMOD_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "HERMOD_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./hermod.config.ron"),
        PathBuf::from("/etc/hermod/hermod.config.ron"),
    ];

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - HERMOD_CONFIG environment variable\n{paths_tried}"
    )
}
