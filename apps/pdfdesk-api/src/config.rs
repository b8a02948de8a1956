//! Command line and environment configuration

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the pdfdesk server
#[derive(Parser, Debug)]
#[command(name = "pdfdesk-api")]
#[command(about = "Temporary file store and PDF processing API")]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Delete expired temporary files and operation records
    Cleanup {
        /// List what would be deleted without deleting anything
        #[arg(long)]
        dry_run: bool,
        /// Delete every temporary file, expired or not
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0", global = true)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8007", global = true)]
    pub port: u16,

    /// SQLite connection string
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Directory holding uploaded and generated files
    #[arg(long, env = "STORAGE_ROOT", global = true)]
    pub storage_root: Option<PathBuf>,

    /// Base URL used when building download links
    #[arg(long, env = "PUBLIC_URL", global = true)]
    pub public_url: Option<String>,

    /// pdfium shared library, or the directory containing it
    #[arg(long, env = "PDFIUM_LIB_PATH", global = true)]
    pub pdfium_lib_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Settings with defaults filled in
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub storage_root: PathBuf,
    pub public_url: String,
    pub pdfium_lib_path: Option<PathBuf>,
    pub verbose: bool,
}

impl Config {
    pub fn resolve(settings: Settings) -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pdfdesk-api");

        let database_url = settings
            .database_url
            .unwrap_or_else(|| format!("sqlite:{}/pdfdesk.db?mode=rwc", data_dir.display()));
        let storage_root = settings
            .storage_root
            .unwrap_or_else(|| data_dir.join("media"));
        let public_url = settings
            .public_url
            .unwrap_or_else(|| format!("http://localhost:{}", settings.port))
            .trim_end_matches('/')
            .to_string();

        Self {
            host: settings.host,
            port: settings.port,
            database_url,
            storage_root,
            public_url,
            pdfium_lib_path: settings.pdfium_lib_path,
            verbose: settings.verbose,
        }
    }

    /// Directory the default SQLite file lives in, when it is a local file
    pub fn database_dir(&self) -> Option<PathBuf> {
        let path = self.database_url.strip_prefix("sqlite:")?;
        let path = path.split('?').next()?.trim_start_matches("//");
        if path.is_empty() || path == ":memory:" {
            return None;
        }
        PathBuf::from(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
    }
}

/// Get platform-specific data directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pdfdesk-api").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_serve_is_default() {
        let cli = parse(&["--port", "9000"]);
        assert_eq!(cli.command, None);
        assert_eq!(cli.settings.port, 9000);
    }

    #[test]
    fn test_cleanup_flags() {
        let cli = parse(&["cleanup", "--dry-run"]);
        assert_eq!(
            cli.command,
            Some(Command::Cleanup {
                dry_run: true,
                force: false
            })
        );
    }

    #[test]
    fn test_public_url_defaults_to_port() {
        let cli = parse(&[
            "--port",
            "8123",
            "--database-url",
            "sqlite:/tmp/x/pdfdesk.db?mode=rwc",
            "--storage-root",
            "/tmp/x/media",
        ]);
        let config = Config::resolve(cli.settings);
        assert_eq!(config.public_url, "http://localhost:8123");
        assert_eq!(config.database_dir(), Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn test_public_url_trailing_slash_trimmed() {
        let cli = parse(&["--public-url", "https://files.example.com/"]);
        assert_eq!(
            Config::resolve(cli.settings).public_url,
            "https://files.example.com"
        );
    }
}
