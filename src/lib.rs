// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! langiq is a language-server client engine.
//!
//! It spawns a language server as a child process, speaks JSON-RPC 2.0 over
//! its stdio with Content-Length framing, correlates replies with requests,
//! and exposes typed completion, navigation, symbol and diagnostics queries.

/// Configuration handling for language servers and timeouts.
pub mod config;
/// LSP client implementation and server management.
pub mod lsp;
/// JSON-RPC transport, framing and dispatch.
pub mod rpc;
