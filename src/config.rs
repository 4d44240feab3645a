// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-language server configuration.
//!
//! Layered: built-in defaults, then `~/.config/langiq/config.toml`, then an
//! explicit file, then `LANGIQ_*` environment variables.

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rpc::StderrSink;

/// The only transport servers can be reached over.
pub const STDIO_TRANSPORT: &str = "stdio";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Timeout for blocking requests in milliseconds (default: 2000)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout for the `shutdown` request in milliseconds (default: 100)
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Diagnostics entries held per client before the oldest is evicted (default: 10)
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,

    /// Server definitions keyed by language ID (e.g., "rust", "python")
    #[serde(default)]
    pub server: HashMap<String, ServerConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// The command to execute (e.g., "pylsp")
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// How to reach the server; only "stdio" is supported
    #[serde(default = "default_transport")]
    pub transport: String,

    /// What to do with the server's stderr
    #[serde(default)]
    pub stderr: StderrSink,

    /// File extensions (without the dot) handled by this server
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Initialization options to pass to the LSP server
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,
}

fn default_request_timeout_ms() -> u64 {
    2000
}

fn default_shutdown_timeout_ms() -> u64 {
    100
}

fn default_diagnostics_capacity() -> usize {
    crate::lsp::diagnostics::DEFAULT_CAPACITY
}

fn default_transport() -> String {
    STDIO_TRANSPORT.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            diagnostics_capacity: default_diagnostics_capacity(),
            server: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// A stdio server with no extra settings.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            transport: default_transport(),
            stderr: StderrSink::default(),
            extensions: Vec::new(),
            initialization_options: None,
        }
    }

    /// Rejects transports other than stdio.
    pub fn validate(&self) -> Result<()> {
        if self.transport != STDIO_TRANSPORT {
            bail!(
                "Unsupported transport '{}' for '{}' (only '{STDIO_TRANSPORT}' is supported)",
                self.transport,
                self.command
            );
        }
        if self.command.trim().is_empty() {
            bail!("Server command is empty");
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("request_timeout_ms", default_request_timeout_ms())?
            .set_default("shutdown_timeout_ms", default_shutdown_timeout_ms())?
            .set_default(
                "diagnostics_capacity",
                u64::try_from(default_diagnostics_capacity())?,
            )?;

        // 2. Load from user config directory (~/.config/langiq/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("langiq").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables (LANGIQ_REQUEST_TIMEOUT_MS, etc.)
        builder = builder.add_source(config::Environment::with_prefix("LANGIQ"));

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config.try_deserialize().context("Failed to deserialize configuration")
    }

    /// Adds or replaces a server from a `lang:command arg…` string.
    pub fn add_lsp_spec(&mut self, spec: &str) -> Result<String> {
        let (lang, server) = parse_lsp_spec(spec)?;
        self.server.insert(lang.clone(), server);
        Ok(lang)
    }

    /// Blocking request timeout.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Timeout for the `shutdown` request.
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Picks the language for `path`: first a server that lists the
    /// extension, then the built-in table.
    pub fn language_for(&self, path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?;
        if let Some((lang, _)) = self
            .server
            .iter()
            .find(|(_, s)| s.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        {
            return Some(lang.clone());
        }
        builtin_language(ext).map(str::to_string)
    }
}

/// Parses `lang:command arg…`.
pub fn parse_lsp_spec(spec: &str) -> Result<(String, ServerConfig)> {
    let (lang, command_line) = spec
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid LSP spec '{spec}': expected 'lang:command'"))?;
    let lang = lang.trim();
    if lang.is_empty() {
        bail!("Invalid LSP spec '{spec}': empty language");
    }
    let mut parts = command_line.split_whitespace().map(str::to_string);
    let command = parts
        .next()
        .ok_or_else(|| anyhow!("Invalid LSP spec '{spec}': empty command"))?;
    Ok((lang.to_string(), ServerConfig::new(command, parts.collect())))
}

fn builtin_language(ext: &str) -> Option<&'static str> {
    let lang = match ext.to_ascii_lowercase().as_str() {
        "py" | "pyi" => "python",
        "rs" => "rust",
        "go" => "go",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "mts" => "typescript",
        "sh" | "bash" => "shellscript",
        "lua" => "lua",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        _ => return None,
    };
    Some(lang)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_lsp_spec() -> Result<()> {
        let (lang, server) = parse_lsp_spec("python:pylsp -v --check-parent-process")?;
        assert_eq!(lang, "python");
        assert_eq!(server.command, "pylsp");
        assert_eq!(server.args, ["-v", "--check-parent-process"]);
        assert_eq!(server.transport, STDIO_TRANSPORT);
        server.validate()?;

        assert!(parse_lsp_spec("pylsp").is_err());
        assert!(parse_lsp_spec(":pylsp").is_err());
        assert!(parse_lsp_spec("python:   ").is_err());
        Ok(())
    }

    #[test]
    fn test_load_explicit_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("langiq.toml");
        let mut file = std::fs::File::create(&path)?;
        writeln!(
            file,
            r#"
request_timeout_ms = 750
diagnostics_capacity = 4

[server.python]
command = "pylsp"
extensions = ["py", "pyw"]
stderr = "inherit"
initialization_options = {{ plugins = {{ pyflakes = {{ enabled = true }} }} }}

[server.shell]
command = "bash-language-server"
args = ["start"]
transport = "tcp"
"#
        )?;

        let config = Config::load(Some(path))?;
        assert_eq!(config.request_timeout(), Duration::from_millis(750));
        assert_eq!(config.shutdown_timeout(), Duration::from_millis(100));
        assert_eq!(config.diagnostics_capacity, 4);

        let python = config.server.get("python").context("python missing")?;
        assert_eq!(python.stderr, StderrSink::Inherit);
        assert!(python.initialization_options.is_some());
        python.validate()?;

        let shell = config.server.get("shell").context("shell missing")?;
        assert!(shell.validate().is_err());

        assert_eq!(
            config.language_for(Path::new("/tmp/x.pyw")).as_deref(),
            Some("python")
        );
        Ok(())
    }

    #[test]
    fn test_builtin_language_table() {
        let config = Config::default();
        assert_eq!(config.language_for(Path::new("a.rs")).as_deref(), Some("rust"));
        assert_eq!(config.language_for(Path::new("a.PY")).as_deref(), Some("python"));
        assert_eq!(config.language_for(Path::new("Makefile")), None);
    }
}
