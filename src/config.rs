//! Command-line parsing and validation.

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// How the child process is connected to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AttachMode {
    /// One pseudo-terminal pair carrying stdin, stdout and stderr combined.
    Pty,
    /// Three independent pipe pairs with distinct stdout and stderr.
    Pipes,
}

/// CLI options for the bridge. Validated values keep the session setup safe.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "ttybridge",
    about = "Run a command behind a pty or pipes, mirror its output under a session \
             directory, and accept injected input through a reopenable FIFO",
    version
)]
pub struct AppConfig {
    /// Directory that receives the capture files and the `in` FIFO
    #[arg(value_name = "SESSION_DIR")]
    pub session_dir: PathBuf,

    /// Command to run under the bridge, with its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,

    /// Attachment mode for the child process
    #[arg(long, value_enum, default_value_t = AttachMode::Pty)]
    pub attach: AttachMode,

    /// Enable the file trace log
    #[arg(long, env = "TTYBRIDGE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "TTYBRIDGE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,
}

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values before any descriptor or file is touched.
    pub fn validate(&self) -> Result<()> {
        match self.command.first() {
            None => bail!("no command given"),
            Some(program) if program.is_empty() => bail!("command must not be empty"),
            Some(_) => {}
        }
        if self.session_dir.as_os_str().is_empty() {
            bail!("session directory must not be empty");
        }
        // The directory need not pre-exist, but an existing non-directory
        // at that path can never hold the capture files.
        if self.session_dir.exists() && !self.session_dir.is_dir() {
            bail!(
                "session directory {} exists and is not a directory",
                self.session_dir.display()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn parse(args: &[&str]) -> AppConfig {
        AppConfig::try_parse_from(args).expect("arguments should parse")
    }

    #[test]
    fn defaults_to_pty_attachment() {
        let config = parse(&["ttybridge", "/tmp/session", "cat"]);
        assert_eq!(config.attach, AttachMode::Pty);
        assert_eq!(config.command, vec!["cat"]);
        assert!(!config.logs);
        config.validate().expect("valid config");
    }

    #[test]
    fn parses_pipes_attachment() {
        let config = parse(&["ttybridge", "--attach", "pipes", "/tmp/session", "true"]);
        assert_eq!(config.attach, AttachMode::Pipes);
    }

    #[test]
    fn command_keeps_hyphen_arguments() {
        let config = parse(&["ttybridge", "/tmp/session", "sh", "-c", "echo hi"]);
        assert_eq!(config.command, vec!["sh", "-c", "echo hi"]);
    }

    #[test]
    fn missing_command_is_a_parse_error() {
        assert!(AppConfig::try_parse_from(["ttybridge", "/tmp/session"]).is_err());
    }

    #[test]
    fn empty_command_word_fails_validation() {
        let config = parse(&["ttybridge", "/tmp/session", ""]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn session_dir_colliding_with_a_file_fails_validation() {
        let path = std::env::temp_dir().join(format!("ttybridge_cfg_{}", std::process::id()));
        fs::write(&path, b"occupied").expect("write marker file");
        let config = parse(&["ttybridge", path.to_str().expect("utf-8 path"), "true"]);
        assert!(config.validate().is_err());
        let _ = fs::remove_file(&path);
    }
}
