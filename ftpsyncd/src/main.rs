use std::path::Path;

use ftpsyncd::daemon::{DaemonConfig, DaemonRuntime};
use ftpsyncd::dbus_api::AGENT_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Version,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => mode = CliMode::Version,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

fn setup_logging(log_path: Option<&Path>) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Log file when configured and writable, stderr otherwise.
    let file = log_path.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    if let Some(file) = file {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    match parse_cli_mode(std::env::args())? {
        CliMode::Version => {
            println!("ftpsyncd {AGENT_VERSION}");
            return Ok(());
        }
        CliMode::Help => {
            println!("Usage: ftpsyncd [--version]");
            println!("  Configuration is read from FTPSYNC_* environment variables and .env");
            return Ok(());
        }
        CliMode::Run => {}
    }
    let config = DaemonConfig::from_env()?;
    setup_logging(config.log_file.as_deref());
    let daemon = DaemonRuntime::bootstrap(config).await?;
    daemon.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cli_mode_defaults_to_run() {
        let mode = parse_cli_mode(vec!["ftpsyncd".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Run);
    }

    #[test]
    fn parse_cli_mode_supports_version() {
        let mode = parse_cli_mode(vec!["ftpsyncd".to_string(), "--version".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Version);
    }

    #[test]
    fn parse_cli_mode_supports_help() {
        let mode = parse_cli_mode(vec!["ftpsyncd".to_string(), "--help".to_string()]).unwrap();
        assert_eq!(mode, CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_flags() {
        assert!(parse_cli_mode(vec!["ftpsyncd".to_string(), "--daemonize".to_string()]).is_err());
    }
}
