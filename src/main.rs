// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! langiq command-line driver.
//!
//! Opens one file in the matching language server, runs a single query and
//! prints the flattened results as JSON lines on stdout.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use lsp_types::Uri;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use langiq::config::Config;
use langiq::lsp::{ClientManager, LanguageClient, file_uri};

/// Command-line arguments for langiq.
#[derive(Parser, Debug)]
#[command(name = "langiq")]
#[command(about = "Query a language server from the command line")]
#[command(version = env!("LANGIQ_VERSION"))]
struct Args {
    /// The query to run.
    #[command(subcommand)]
    command: Command,

    /// LSP servers to spawn in "lang:command" format (e.g., "python:pylsp").
    /// Can be specified multiple times. These override/append to the config file.
    #[arg(short, long = "lsp", global = true)]
    lsps: Vec<String>,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Workspace root directory (default: current directory).
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Language id to use instead of guessing from the file extension.
    #[arg(long, global = true)]
    language: Option<String>,
}

/// Queries supported by langiq. Positions are zero-based.
#[derive(Subcommand, Debug)]
enum Command {
    /// Where the symbol at a position is defined.
    Definition {
        /// Source file.
        file: PathBuf,
        /// Line number.
        line: u32,
        /// Character offset in the line.
        col: u32,
    },

    /// Every reference to the symbol at a position.
    References {
        /// Source file.
        file: PathBuf,
        /// Line number.
        line: u32,
        /// Character offset in the line.
        col: u32,
        /// Leave the declaration itself out of the results.
        #[arg(long)]
        no_declaration: bool,
    },

    /// Completion candidates at a position.
    Completion {
        /// Source file.
        file: PathBuf,
        /// Line number.
        line: u32,
        /// Character offset in the line.
        col: u32,
    },

    /// Symbols defined in a file.
    Symbols {
        /// Source file.
        file: PathBuf,
    },

    /// Hover text at a position.
    Hover {
        /// Source file.
        file: PathBuf,
        /// Line number.
        line: u32,
        /// Character offset in the line.
        col: u32,
    },

    /// Symbols across the workspace matching a query.
    WorkspaceSymbols {
        /// File whose language server should answer.
        file: PathBuf,
        /// Search string.
        query: String,
    },

    /// Diagnostics the server publishes after opening a file.
    Diagnostics {
        /// Source file.
        file: PathBuf,
        /// How long to wait for diagnostics, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        wait_ms: u64,
    },
}

impl Command {
    fn file(&self) -> &Path {
        match self {
            Self::Definition { file, .. }
            | Self::References { file, .. }
            | Self::Completion { file, .. }
            | Self::Symbols { file }
            | Self::Hover { file, .. }
            | Self::WorkspaceSymbols { file, .. }
            | Self::Diagnostics { file, .. } => file,
        }
    }
}

/// Entry point.
///
/// # Errors
///
/// Returns an error if configuration, server startup or the query fails.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("langiq=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.clone())?;
    for lsp_spec in &args.lsps {
        let lang = config.add_lsp_spec(lsp_spec)?;
        debug!("Server for {} set from the command line", lang);
    }

    let root = args
        .root
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
        .canonicalize()
        .context("Failed to resolve workspace root")?;

    let file = args
        .command
        .file()
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", args.command.file().display()))?;
    let lang = match &args.language {
        Some(lang) => lang.clone(),
        None => config.language_for(&file).ok_or_else(|| {
            anyhow!("Cannot tell the language of {}; use --language", file.display())
        })?,
    };

    info!("Workspace root: {}", root.display());
    let manager = ClientManager::new(config, root);
    let result = run(&manager, &lang, &file, &args.command).await;
    manager.shutdown_all().await;
    result
}

async fn run(manager: &ClientManager, lang: &str, file: &Path, command: &Command) -> Result<()> {
    let client = manager.for_language(lang).await?;

    let uri = file_uri(file).ok_or_else(|| anyhow!("Invalid file path {}", file.display()))?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    client.did_open(&uri, 1, &text).await;

    let outcome = query(client.as_ref(), &uri, command).await;
    client.did_close(&uri).await;
    outcome
}

async fn query(client: &dyn LanguageClient, uri: &Uri, command: &Command) -> Result<()> {
    match *command {
        Command::Definition { line, col, .. } => {
            print_lines(&client.definition(uri, line, col).await?)
        }
        Command::References {
            line,
            col,
            no_declaration,
            ..
        } => print_lines(
            &client
                .references(uri, line, col, !no_declaration)
                .await?,
        ),
        Command::Completion { line, col, .. } => {
            print_lines(&client.completion(uri, line, col).await?)
        }
        Command::Symbols { .. } => print_lines(&client.document_symbols(uri).await?),
        Command::Hover { line, col, .. } => {
            let hover = client.hover(uri, line, col).await?;
            print_lines(hover.as_slice())
        }
        Command::WorkspaceSymbols { ref query, .. } => {
            print_lines(&client.workspace_symbols(query).await?)
        }
        Command::Diagnostics { wait_ms, .. } => {
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            let entries: Vec<_> = client
                .diagnostics()
                .into_iter()
                .filter(|entry| entry.uri == uri.as_str())
                .collect();
            print_lines(&entries)
        }
    }
}

fn print_lines<T: Serialize>(items: &[T]) -> Result<()> {
    for item in items {
        println!("{}", serde_json::to_string(item)?);
    }
    Ok(())
}
