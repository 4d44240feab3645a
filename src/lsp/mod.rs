// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Typed protocol client and the language-neutral client trait.
pub mod client;
/// Bounded queue of published diagnostics.
pub mod diagnostics;
/// High-level manager for lazy-spawning and caching LSP clients.
pub mod manager;
/// Flattened result values.
pub mod types;

pub use client::{ClientOptions, LanguageClient, LspClient, file_uri};
pub use diagnostics::DiagnosticsQueue;
pub use manager::ClientManager;
pub use types::{CompletionItem, DiagnosticItem, DiagnosticsEntry, HoverInfo, Location, Symbol};
