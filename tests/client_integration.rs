// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the protocol client against the `mockls` server.
//!
//! Each test spawns a real `mockls` process, so these exercise the whole
//! stack: process pipes, framing, dispatch and result flattening.

use anyhow::{Context, Result, anyhow, bail};
use lsp_types::{DiagnosticSeverity, SymbolKind, Uri};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use langiq::config::ServerConfig;
use langiq::lsp::{ClientOptions, LanguageClient, LspClient, file_uri};
use langiq::rpc::{Dispatcher, ProtocolError, RpcError, StderrSink, Transport};

fn mockls(args: &[&str]) -> ServerConfig {
    ServerConfig::new(
        env!("CARGO_BIN_EXE_mockls"),
        args.iter().map(|s| (*s).to_string()).collect(),
    )
}

fn fixture() -> Result<(PathBuf, Uri, String)> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/assets/greeter.py");
    let uri = file_uri(&path).context("fixture path is not absolute")?;
    let text = std::fs::read_to_string(&path)?;
    Ok((path, uri, text))
}

/// Spawns `mockls`, initializes it and opens the fixture.
async fn open_client(args: &[&str], options: ClientOptions) -> Result<(LspClient, Uri)> {
    let (path, uri, text) = fixture()?;
    let client = LspClient::spawn("python", &mockls(args), options)?;
    let root = path.parent().context("fixture has no parent")?;
    client.initialize(root, None).await?;
    client.did_open(&uri, 1, &text).await;
    Ok((client, uri))
}

async fn wait_for_diagnostics(client: &LspClient) -> Result<Vec<langiq::lsp::DiagnosticsEntry>> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let entries = client.diagnostics();
        if !entries.is_empty() {
            return Ok(entries);
        }
        if Instant::now() > deadline {
            bail!("no diagnostics arrived");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_initialize_and_definition() -> Result<()> {
    let (client, uri) = open_client(&[], ClientOptions::default()).await?;

    assert!(client.is_initialized());
    assert!(client.pid().is_some());
    let caps = client.capabilities().context("no capabilities")?;
    assert!(caps.hover_provider.is_some());

    let locs = client.definition(&uri, 6, 26).await?;
    assert_eq!(locs.len(), 1);
    assert_eq!(locs[0].uri, uri.as_str());
    assert_eq!((locs[0].start_line, locs[0].start_char), (1, 8));

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_references_honor_include_declaration() -> Result<()> {
    let (client, uri) = open_client(&[], ClientOptions::default()).await?;

    let with_decl = client.references(&uri, 6, 15, true).await?;
    assert_eq!(with_decl.len(), 2);

    let without_decl = client.references(&uri, 6, 15, false).await?;
    assert_eq!(without_decl.len(), 1);
    assert_eq!(without_decl[0].start_line, 6);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_completion_symbols_and_hover() -> Result<()> {
    let (client, uri) = open_client(&[], ClientOptions::default()).await?;

    let labels: Vec<String> = client
        .completion(&uri, 6, 27)
        .await?
        .into_iter()
        .map(|item| item.label)
        .collect();
    assert_eq!(labels, ["greet", "greeting"]);

    let symbols = client.document_symbols(&uri).await?;
    let names: Vec<(&str, Option<&str>)> = symbols
        .iter()
        .map(|s| (s.name.as_str(), s.container_name.as_deref()))
        .collect();
    assert_eq!(
        names,
        [("Greeter", None), ("greet", Some("Greeter")), ("main", None)]
    );
    assert_eq!(symbols[0].kind, SymbolKind::CLASS);

    let found = client.workspace_symbols("mai").await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].location.uri, uri.as_str());

    let hover = client.hover(&uri, 0, 8).await?.context("no hover")?;
    assert!(hover.contents.contains("Greeter"));

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unknown_method_is_method_not_found() -> Result<()> {
    let transport = Transport::spawn(env!("CARGO_BIN_EXE_mockls"), &[], StderrSink::Null)?;
    let dispatcher = Dispatcher::start(Arc::new(transport), Duration::from_secs(2))?;

    let reply = dispatcher
        .call("textDocument/rename", Value::Null, Duration::from_secs(2))
        .await;
    match reply {
        Err(RpcError::Protocol(e)) => assert_eq!(e.code, ProtocolError::METHOD_NOT_FOUND),
        other => bail!("expected MethodNotFound, got {other:?}"),
    }
    // The connection survives a protocol error.
    assert!(dispatcher.is_alive());

    dispatcher.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_fail_on_surfaces_protocol_error() -> Result<()> {
    let (client, uri) =
        open_client(&["--fail-on", "textDocument/completion"], ClientOptions::default()).await?;

    let err = client
        .completion(&uri, 6, 27)
        .await
        .err()
        .context("completion should fail")?;
    assert_eq!(err.code, ProtocolError::INTERNAL_ERROR);

    // Other queries are unaffected.
    assert!(!client.definition(&uri, 6, 26).await?.is_empty());
    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_hung_request_times_out_without_poisoning() -> Result<()> {
    let options = ClientOptions {
        request_timeout: Duration::from_millis(300),
        ..ClientOptions::default()
    };
    let (client, uri) = open_client(&["--hang-on", "textDocument/hover"], options).await?;

    let start = Instant::now();
    assert_eq!(client.hover(&uri, 0, 8).await?, None);
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(client.pending_requests(), 0);

    assert!(!client.definition(&uri, 6, 26).await?.is_empty());
    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_server_exit_releases_blocked_call() -> Result<()> {
    let args = vec!["--hang-on".to_string(), "textDocument/hover".to_string()];
    let transport = Transport::spawn(env!("CARGO_BIN_EXE_mockls"), &args, StderrSink::Null)?;
    let dispatcher = Arc::new(Dispatcher::start(Arc::new(transport), Duration::from_secs(30))?);

    let caller = dispatcher.clone();
    let blocked = tokio::spawn(async move {
        caller
            .call("textDocument/hover", Value::Null, Duration::from_secs(30))
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // `exit` makes mockls quit with the hover still unanswered.
    let start = Instant::now();
    dispatcher.notify("exit", Value::Null).await?;
    let reply = tokio::time::timeout(Duration::from_secs(5), blocked).await??;

    let err = reply.err().context("call should fail")?;
    assert!(err.is_terminal(), "unexpected error: {err:?}");
    assert!(start.elapsed() < Duration::from_secs(5));

    tokio::time::timeout(Duration::from_secs(5), dispatcher.closed()).await?;
    assert!(!dispatcher.is_alive());
    assert_eq!(dispatcher.pending_len(), 0);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_killed_server_releases_blocked_call() -> Result<()> {
    let args = vec!["--hang-on".to_string(), "textDocument/hover".to_string()];
    let transport = Transport::spawn(env!("CARGO_BIN_EXE_mockls"), &args, StderrSink::Null)?;
    let pid = transport.pid().context("spawned server has no pid")?;
    let dispatcher = Arc::new(Dispatcher::start(Arc::new(transport), Duration::from_secs(30))?);

    let caller = dispatcher.clone();
    let blocked = tokio::spawn(async move {
        caller
            .call("textDocument/hover", Value::Null, Duration::from_secs(30))
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let start = Instant::now();
    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()?;
    assert!(status.success());
    let reply = tokio::time::timeout(Duration::from_secs(5), blocked).await??;

    let err = reply.err().context("call should fail")?;
    assert!(err.is_terminal(), "unexpected error: {err:?}");
    assert!(start.elapsed() < Duration::from_secs(5));

    tokio::time::timeout(Duration::from_secs(5), dispatcher.closed()).await?;
    assert!(!dispatcher.is_alive());
    assert_eq!(dispatcher.pending_len(), 0);
    assert!(matches!(
        dispatcher.call("shutdown", Value::Null, Duration::from_secs(1)).await,
        Err(RpcError::ConnectionClosed)
    ));
    Ok(())
}

#[tokio::test]
async fn test_crash_degrades_queries_to_empty() -> Result<()> {
    // initialize is response 1, the first definition is response 2.
    let (client, uri) = open_client(&["--drop-after", "2"], ClientOptions::default()).await?;

    assert!(!client.definition(&uri, 6, 26).await?.is_empty());
    tokio::time::timeout(Duration::from_secs(5), client.closed()).await?;

    assert!(!client.is_alive());
    assert!(client.references(&uri, 6, 15, true).await?.is_empty());
    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_diagnostics_flow_into_queue() -> Result<()> {
    let (client, uri) = open_client(&[], ClientOptions::default()).await?;

    let entries = wait_for_diagnostics(&client).await?;
    let entry = entries
        .iter()
        .find(|e| e.uri == uri.as_str())
        .context("no entry for fixture")?;
    assert_eq!(entry.diagnostics.len(), 1);
    let item = &entry.diagnostics[0];
    assert_eq!(item.severity, DiagnosticSeverity::WARNING);
    assert_eq!(item.code, "todo");
    assert_eq!(item.source, "mockls");
    assert_eq!((item.start_line, item.start_char), (5, 6));

    // didChange publishes again, for the new text.
    client.did_change(&uri, 2, "x = 1\n").await;
    let entries = wait_for_diagnostics(&client).await?;
    let item = &entries[0].diagnostics[0];
    assert_eq!(item.severity, DiagnosticSeverity::HINT);
    assert_eq!(item.code, "");

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_diagnostics_on_save_only() -> Result<()> {
    let (client, uri) = open_client(&["--diagnostics-on-save"], ClientOptions::default()).await?;

    // A round trip flushes anything didOpen might have triggered.
    client.hover(&uri, 0, 8).await?;
    assert!(client.diagnostics().is_empty());

    client.did_save(&uri, None).await;
    assert!(!wait_for_diagnostics(&client).await?.is_empty());

    client.did_close(&uri).await;
    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_server_request_does_not_block_connection() -> Result<()> {
    let (client, uri) = open_client(
        &[
            "--server-request",
            "workspace/configuration",
            "--log-message",
            "mockls ready",
        ],
        ClientOptions::default(),
    )
    .await?;

    client
        .did_change_configuration(serde_json::json!({"mockls": {}}))
        .await;
    assert!(!client.definition(&uri, 6, 26).await?.is_empty());
    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_async_definition_and_cancel() -> Result<()> {
    let (client, uri) = open_client(&[], ClientOptions::default()).await?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let id = client
        .definition_async(&uri, 6, 26, move |result| {
            let _ = tx.send(result);
        })
        .await?;
    let locs = tokio::time::timeout(Duration::from_secs(5), rx)
        .await??
        .map_err(|e| anyhow!("protocol error: {e}"))?;
    assert_eq!(locs[0].start_line, 1);

    // Cancelling a finished request is harmless.
    client.cancel(&id).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    client
        .document_symbols_async(&uri, move |result| {
            let _ = tx.send(result);
        })
        .await?;
    let symbols = tokio::time::timeout(Duration::from_secs(5), rx)
        .await??
        .map_err(|e| anyhow!("protocol error: {e}"))?;
    assert_eq!(symbols.len(), 3);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_async_callback_times_out() -> Result<()> {
    let options = ClientOptions {
        request_timeout: Duration::from_millis(200),
        ..ClientOptions::default()
    };
    let (client, uri) =
        open_client(&["--hang-on", "textDocument/references"], options).await?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let id = client
        .references_async(&uri, 6, 15, true, move |result| {
            let _ = tx.send(result);
        })
        .await?;
    client.cancel(&id).await;

    // Timeouts degrade to an empty result, like the blocking variant.
    let locs = tokio::time::timeout(Duration::from_secs(5), rx)
        .await??
        .map_err(|e| anyhow!("protocol error: {e}"))?;
    assert!(locs.is_empty());
    assert_eq!(client.pending_requests(), 0);

    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_server() -> Result<()> {
    let (client, _uri) = open_client(&[], ClientOptions::default()).await?;
    assert!(client.is_alive());

    let start = Instant::now();
    client.shutdown().await;
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!client.is_alive());
    assert!(!client.is_initialized());
    tokio::time::timeout(Duration::from_secs(1), client.closed()).await?;

    // A second shutdown is a no-op.
    client.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unsupported_transport_rejected() -> Result<()> {
    let mut server = mockls(&[]);
    server.transport = "tcp".to_string();
    match LspClient::spawn("python", &server, ClientOptions::default()) {
        Err(RpcError::Transport(msg)) => assert!(msg.contains("tcp")),
        Err(e) => bail!("unexpected error {e}"),
        Ok(_) => bail!("tcp transport should be rejected"),
    }
    Ok(())
}
