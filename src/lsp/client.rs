// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Typed protocol client over a [`Dispatcher`].
//!
//! Query methods degrade gracefully: a dead or slow server yields an empty
//! result (logged), while an `error` object from the server is returned to
//! the caller as a [`ProtocolError`].

use async_trait::async_trait;
use lsp_types::{
    CancelParams, ClientCapabilities, CompletionParams, CompletionResponse,
    DidChangeConfigurationParams, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, DidSaveTextDocumentParams, DocumentSymbolClientCapabilities,
    DocumentSymbolParams, DocumentSymbolResponse, GotoDefinitionParams, GotoDefinitionResponse,
    Hover, HoverParams, InitializeParams, InitializeResult, InitializedParams, NumberOrString,
    PartialResultParams, Position, PublishDiagnosticsClientCapabilities, PublishDiagnosticsParams,
    ReferenceContext, ReferenceParams, ServerCapabilities, TextDocumentClientCapabilities,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentPositionParams, Uri, VersionedTextDocumentIdentifier, WorkDoneProgressParams,
    WorkspaceFolder, WorkspaceSymbolParams, WorkspaceSymbolResponse,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::diagnostics::DiagnosticsQueue;
use super::types::{self, CompletionItem, DiagnosticsEntry, HoverInfo, Location, Symbol};
use crate::config::{Config, STDIO_TRANSPORT, ServerConfig};
use crate::rpc::{Dispatcher, ProtocolError, RequestId, RpcError, Transport};

/// Notification carrying diagnostics for one document.
pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

/// Timeouts and limits for one client.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Deadline for blocking requests and for async callbacks.
    pub request_timeout: Duration,
    /// Deadline for the `shutdown` request.
    pub shutdown_timeout: Duration,
    /// Capacity of the diagnostics queue.
    pub diagnostics_capacity: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ClientOptions {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            diagnostics_capacity: config.diagnostics_capacity,
        }
    }
}

/// What every language client can do, whatever server sits behind it.
#[async_trait]
pub trait LanguageClient: Send + Sync {
    /// Language id this client serves.
    fn language(&self) -> &str;

    /// True while the connection is up.
    fn is_alive(&self) -> bool;

    /// Notifies the server that a document was opened.
    async fn did_open(&self, uri: &Uri, version: i32, text: &str);

    /// Sends the full new text of a document.
    async fn did_change(&self, uri: &Uri, version: i32, text: &str);

    /// Notifies the server that a document was saved.
    async fn did_save(&self, uri: &Uri, text: Option<&str>);

    /// Notifies the server that a document was closed.
    async fn did_close(&self, uri: &Uri);

    /// Completion candidates at a position.
    async fn completion(
        &self,
        uri: &Uri,
        line: u32,
        character: u32,
    ) -> Result<Vec<CompletionItem>, ProtocolError>;

    /// References to the symbol at a position.
    async fn references(
        &self,
        uri: &Uri,
        line: u32,
        character: u32,
        include_declaration: bool,
    ) -> Result<Vec<Location>, ProtocolError>;

    /// Definition(s) of the symbol at a position.
    async fn definition(
        &self,
        uri: &Uri,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, ProtocolError>;

    /// Symbols defined in a document.
    async fn document_symbols(&self, uri: &Uri) -> Result<Vec<Symbol>, ProtocolError>;

    /// Symbols across the workspace matching `query`.
    async fn workspace_symbols(&self, query: &str) -> Result<Vec<Symbol>, ProtocolError>;

    /// Hover information at a position.
    async fn hover(
        &self,
        uri: &Uri,
        line: u32,
        character: u32,
    ) -> Result<Option<HoverInfo>, ProtocolError>;

    /// Drains diagnostics received since the last call, oldest first.
    fn diagnostics(&self) -> Vec<DiagnosticsEntry>;

    /// Sends `shutdown` and `exit`, then stops the server.
    async fn shutdown(&self);
}

/// Client for one language server connection.
pub struct LspClient {
    language: String,
    dispatcher: Dispatcher,
    diagnostics: Arc<DiagnosticsQueue>,
    options: ClientOptions,
    initialized: AtomicBool,
    capabilities: Mutex<Option<ServerCapabilities>>,
}

impl LspClient {
    /// Spawns the configured server and starts its reader task.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the transport kind is unsupported or
    /// the process cannot be spawned.
    pub fn spawn(
        language: &str,
        server: &ServerConfig,
        options: ClientOptions,
    ) -> Result<Self, RpcError> {
        if server.transport != STDIO_TRANSPORT {
            return Err(RpcError::Transport(format!(
                "unsupported transport '{}'",
                server.transport
            )));
        }
        let transport = Transport::spawn(&server.command, &server.args, server.stderr)?;
        Self::connect(language, transport, options)
    }

    /// Builds a client over an existing transport.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the transport's reader was already taken.
    pub fn connect(
        language: &str,
        transport: Transport,
        options: ClientOptions,
    ) -> Result<Self, RpcError> {
        let dispatcher = Dispatcher::start(Arc::new(transport), options.request_timeout)?;
        let diagnostics = Arc::new(DiagnosticsQueue::new(options.diagnostics_capacity));

        let queue = diagnostics.clone();
        dispatcher.on_notification(PUBLISH_DIAGNOSTICS, move |params| {
            match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                Ok(params) => {
                    debug!(
                        "Received {} diagnostics for {}",
                        params.diagnostics.len(),
                        params.uri.as_str()
                    );
                    queue.push(DiagnosticsEntry::from(params));
                }
                Err(e) => warn!("Dropping invalid publishDiagnostics: {}", e),
            }
        });

        let lang = language.to_string();
        dispatcher.on_notification("window/logMessage", move |params| {
            log_server_message(&lang, &params);
        });
        let lang = language.to_string();
        dispatcher.on_notification("window/showMessage", move |params| {
            log_server_message(&lang, &params);
        });

        Ok(Self {
            language: language.to_string(),
            dispatcher,
            diagnostics,
            options,
            initialized: AtomicBool::new(false),
            capabilities: Mutex::new(None),
        })
    }

    /// Sends a request and decodes its result.
    async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<R, RpcError> {
        let params = serde_json::to_value(params)?;
        let value = self.dispatcher.call(method, params, timeout).await?;
        decode(method, value)
    }

    /// Sends a request whose flattened result is handed to `callback` on
    /// the reader task.
    async fn request_async<P, R, T, M, F>(
        &self,
        method: &str,
        params: P,
        map: M,
        callback: F,
    ) -> Result<RequestId, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
        T: Default,
        M: FnOnce(R) -> T + Send + 'static,
        F: FnOnce(Result<T, ProtocolError>) + Send + 'static,
    {
        let params = serde_json::to_value(params)?;
        let name = method.to_string();
        self.dispatcher
            .call_async(method, params, move |reply| {
                let result = reply.and_then(|v| decode::<R>(&name, v)).map(map);
                callback(degrade(&name, result));
            })
            .await
    }

    /// Sends a notification, logging rather than failing on a dead server.
    async fn notify<P: Serialize>(&self, method: &str, params: P) {
        let result = match serde_json::to_value(params) {
            Ok(params) => self.dispatcher.notify(method, params).await,
            Err(e) => Err(RpcError::from(e)),
        };
        if let Err(e) = result {
            warn!("{}: failed to send '{}': {}", self.language, method, e);
        }
    }

    fn ready(&self, method: &str) -> bool {
        let ready = self.initialized.load(Ordering::SeqCst);
        if !ready {
            debug!("{}: skipping '{}' before initialize", self.language, method);
        }
        ready
    }

    /// Performs the `initialize` handshake and sends `initialized`.
    ///
    /// # Errors
    ///
    /// Returns any failure of the `initialize` request, including transport
    /// errors and timeouts.
    pub async fn initialize(
        &self,
        root: &Path,
        initialization_options: Option<Value>,
    ) -> Result<InitializeResult, RpcError> {
        let root_uri = file_uri(root);
        if root_uri.is_none() {
            warn!("{}: root {:?} is not an absolute path", self.language, root);
        }

        #[allow(deprecated, reason = "older servers only read rootUri")]
        let params = InitializeParams {
            process_id: Some(std::process::id()),
            root_uri: root_uri.clone(),
            initialization_options,
            capabilities: ClientCapabilities {
                text_document: Some(TextDocumentClientCapabilities {
                    publish_diagnostics: Some(PublishDiagnosticsClientCapabilities::default()),
                    document_symbol: Some(DocumentSymbolClientCapabilities {
                        hierarchical_document_symbol_support: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            workspace_folders: root_uri.map(|uri| {
                vec![WorkspaceFolder {
                    uri,
                    name: root.file_name().map_or_else(
                        || "workspace".to_string(),
                        |s| s.to_string_lossy().to_string(),
                    ),
                }]
            }),
            ..Default::default()
        };

        let result: InitializeResult = self
            .request("initialize", params, self.options.request_timeout)
            .await?;

        *self
            .capabilities
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(result.capabilities.clone());
        self.initialized.store(true, Ordering::SeqCst);
        info!("{}: server initialized", self.language);

        self.notify("initialized", InitializedParams {}).await;
        Ok(result)
    }

    /// Capabilities the server announced in `initialize`.
    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True once `initialize` succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Asks the server to abandon request `id`. Best effort: the request
    /// still completes or times out on its own.
    pub async fn cancel(&self, id: &RequestId) {
        let id = match id {
            RequestId::Number(n) => match i32::try_from(*n) {
                Ok(n) => NumberOrString::Number(n),
                Err(_) => NumberOrString::String(n.to_string()),
            },
            RequestId::String(s) => NumberOrString::String(s.clone()),
        };
        self.notify("$/cancelRequest", CancelParams { id }).await;
    }

    /// Pushes new workspace settings to the server.
    pub async fn did_change_configuration(&self, settings: Value) {
        if !self.ready("workspace/didChangeConfiguration") {
            return;
        }
        self.notify(
            "workspace/didChangeConfiguration",
            DidChangeConfigurationParams { settings },
        )
        .await;
    }

    /// Like [`LanguageClient::definition`], without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be sent.
    pub async fn definition_async<F>(
        &self,
        uri: &Uri,
        line: u32,
        character: u32,
        callback: F,
    ) -> Result<RequestId, RpcError>
    where
        F: FnOnce(Result<Vec<Location>, ProtocolError>) + Send + 'static,
    {
        self.request_async(
            "textDocument/definition",
            GotoDefinitionParams {
                text_document_position_params: position(uri, line, character),
                work_done_progress_params: WorkDoneProgressParams::default(),
                partial_result_params: PartialResultParams::default(),
            },
            types::definition_locations,
            callback,
        )
        .await
    }

    /// Like [`LanguageClient::references`], without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be sent.
    pub async fn references_async<F>(
        &self,
        uri: &Uri,
        line: u32,
        character: u32,
        include_declaration: bool,
        callback: F,
    ) -> Result<RequestId, RpcError>
    where
        F: FnOnce(Result<Vec<Location>, ProtocolError>) + Send + 'static,
    {
        self.request_async(
            "textDocument/references",
            reference_params(uri, line, character, include_declaration),
            |r: Option<Vec<lsp_types::Location>>| {
                r.unwrap_or_default().iter().map(Location::from).collect()
            },
            callback,
        )
        .await
    }

    /// Like [`LanguageClient::document_symbols`], without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be sent.
    pub async fn document_symbols_async<F>(
        &self,
        uri: &Uri,
        callback: F,
    ) -> Result<RequestId, RpcError>
    where
        F: FnOnce(Result<Vec<Symbol>, ProtocolError>) + Send + 'static,
    {
        let doc = uri.clone();
        self.request_async(
            "textDocument/documentSymbol",
            document_symbol_params(uri),
            move |r: Option<DocumentSymbolResponse>| types::document_symbols(&doc, r),
            callback,
        )
        .await
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.dispatcher.pending_len()
    }

    /// Resolves once the connection has stopped.
    pub async fn closed(&self) {
        self.dispatcher.closed().await;
    }

    /// OS process id of the server.
    pub fn pid(&self) -> Option<u32> {
        self.dispatcher.transport().pid()
    }
}

#[async_trait]
impl LanguageClient for LspClient {
    fn language(&self) -> &str {
        &self.language
    }

    fn is_alive(&self) -> bool {
        self.dispatcher.is_alive()
    }

    async fn did_open(&self, uri: &Uri, version: i32, text: &str) {
        if !self.ready("textDocument/didOpen") {
            return;
        }
        self.notify(
            "textDocument/didOpen",
            DidOpenTextDocumentParams {
                text_document: TextDocumentItem {
                    uri: uri.clone(),
                    language_id: self.language.clone(),
                    version,
                    text: text.to_string(),
                },
            },
        )
        .await;
    }

    async fn did_change(&self, uri: &Uri, version: i32, text: &str) {
        if !self.ready("textDocument/didChange") {
            return;
        }
        self.notify(
            "textDocument/didChange",
            DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier {
                    uri: uri.clone(),
                    version,
                },
                content_changes: vec![TextDocumentContentChangeEvent {
                    range: None,
                    range_length: None,
                    text: text.to_string(),
                }],
            },
        )
        .await;
    }

    async fn did_save(&self, uri: &Uri, text: Option<&str>) {
        if !self.ready("textDocument/didSave") {
            return;
        }
        self.notify(
            "textDocument/didSave",
            DidSaveTextDocumentParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
                text: text.map(str::to_string),
            },
        )
        .await;
    }

    async fn did_close(&self, uri: &Uri) {
        if !self.ready("textDocument/didClose") {
            return;
        }
        self.notify(
            "textDocument/didClose",
            DidCloseTextDocumentParams {
                text_document: TextDocumentIdentifier { uri: uri.clone() },
            },
        )
        .await;
    }

    async fn completion(
        &self,
        uri: &Uri,
        line: u32,
        character: u32,
    ) -> Result<Vec<CompletionItem>, ProtocolError> {
        const METHOD: &str = "textDocument/completion";
        if !self.ready(METHOD) {
            return Ok(Vec::new());
        }
        let params = CompletionParams {
            text_document_position: position(uri, line, character),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: None,
        };
        let result = self
            .request::<_, Option<CompletionResponse>>(METHOD, params, self.options.request_timeout)
            .await
            .map(types::completion_items);
        degrade(METHOD, result)
    }

    async fn references(
        &self,
        uri: &Uri,
        line: u32,
        character: u32,
        include_declaration: bool,
    ) -> Result<Vec<Location>, ProtocolError> {
        const METHOD: &str = "textDocument/references";
        if !self.ready(METHOD) {
            return Ok(Vec::new());
        }
        let params = reference_params(uri, line, character, include_declaration);
        let result = self
            .request::<_, Option<Vec<lsp_types::Location>>>(
                METHOD,
                params,
                self.options.request_timeout,
            )
            .await
            .map(|locs| locs.unwrap_or_default().iter().map(Location::from).collect());
        degrade(METHOD, result)
    }

    async fn definition(
        &self,
        uri: &Uri,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, ProtocolError> {
        const METHOD: &str = "textDocument/definition";
        if !self.ready(METHOD) {
            return Ok(Vec::new());
        }
        let params = GotoDefinitionParams {
            text_document_position_params: position(uri, line, character),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        };
        let result = self
            .request::<_, Option<GotoDefinitionResponse>>(
                METHOD,
                params,
                self.options.request_timeout,
            )
            .await
            .map(types::definition_locations);
        degrade(METHOD, result)
    }

    async fn document_symbols(&self, uri: &Uri) -> Result<Vec<Symbol>, ProtocolError> {
        const METHOD: &str = "textDocument/documentSymbol";
        if !self.ready(METHOD) {
            return Ok(Vec::new());
        }
        let result = self
            .request::<_, Option<DocumentSymbolResponse>>(
                METHOD,
                document_symbol_params(uri),
                self.options.request_timeout,
            )
            .await
            .map(|r| types::document_symbols(uri, r));
        degrade(METHOD, result)
    }

    async fn workspace_symbols(&self, query: &str) -> Result<Vec<Symbol>, ProtocolError> {
        const METHOD: &str = "workspace/symbol";
        if !self.ready(METHOD) {
            return Ok(Vec::new());
        }
        let params = WorkspaceSymbolParams {
            partial_result_params: PartialResultParams::default(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            query: query.to_string(),
        };
        let result = self
            .request::<_, Option<WorkspaceSymbolResponse>>(
                METHOD,
                params,
                self.options.request_timeout,
            )
            .await
            .map(types::workspace_symbols);
        degrade(METHOD, result)
    }

    async fn hover(
        &self,
        uri: &Uri,
        line: u32,
        character: u32,
    ) -> Result<Option<HoverInfo>, ProtocolError> {
        const METHOD: &str = "textDocument/hover";
        if !self.ready(METHOD) {
            return Ok(None);
        }
        let params = HoverParams {
            text_document_position_params: position(uri, line, character),
            work_done_progress_params: WorkDoneProgressParams::default(),
        };
        let result = self
            .request::<_, Option<Hover>>(METHOD, params, self.options.request_timeout)
            .await
            .map(|h| h.map(HoverInfo::from));
        degrade(METHOD, result)
    }

    fn diagnostics(&self) -> Vec<DiagnosticsEntry> {
        self.diagnostics.drain()
    }

    async fn shutdown(&self) {
        // The server may already be gone, so a failed `shutdown` is not fatal.
        match self
            .dispatcher
            .call("shutdown", Value::Null, self.options.shutdown_timeout)
            .await
        {
            Ok(_) => debug!("{}: shutdown acknowledged", self.language),
            Err(RpcError::Protocol(e)) => {
                warn!("{}: server rejected shutdown: {}", self.language, e);
            }
            Err(e) => debug!("{}: no shutdown reply: {}", self.language, e),
        }

        if let Err(e) = self.dispatcher.notify("exit", Value::Null).await {
            debug!("{}: failed to send exit: {}", self.language, e);
        }
        self.dispatcher.stop().await;
        self.initialized.store(false, Ordering::SeqCst);
    }
}

fn decode<R: DeserializeOwned>(method: &str, value: Value) -> Result<R, RpcError> {
    serde_json::from_value(value).map_err(|source| RpcError::Decode {
        method: method.to_string(),
        source,
    })
}

/// Passes protocol errors through; anything else becomes an empty result.
fn degrade<T: Default>(method: &str, result: Result<T, RpcError>) -> Result<T, ProtocolError> {
    match result {
        Ok(value) => Ok(value),
        Err(RpcError::Protocol(e)) => Err(e),
        Err(e) => {
            warn!("'{}' returned no result: {}", method, e);
            Ok(T::default())
        }
    }
}

fn log_server_message(language: &str, params: &Value) {
    if let Some(message) = params.get("message").and_then(Value::as_str) {
        debug!("{} server: {}", language, message);
    }
}

fn position(uri: &Uri, line: u32, character: u32) -> TextDocumentPositionParams {
    TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri: uri.clone() },
        position: Position { line, character },
    }
}

fn reference_params(
    uri: &Uri,
    line: u32,
    character: u32,
    include_declaration: bool,
) -> ReferenceParams {
    ReferenceParams {
        text_document_position: position(uri, line, character),
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        context: ReferenceContext {
            include_declaration,
        },
    }
}

fn document_symbol_params(uri: &Uri) -> DocumentSymbolParams {
    DocumentSymbolParams {
        text_document: TextDocumentIdentifier { uri: uri.clone() },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
    }
}

/// Converts an absolute path into a `file://` URI.
pub fn file_uri(path: &Path) -> Option<Uri> {
    let url = url::Url::from_file_path(path).ok()?;
    url.as_str().parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::rpc::framing;
    use crate::rpc::transport::TransportReader;
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    struct FakeServer {
        reader: TransportReader,
        writer: DuplexStream,
    }

    impl FakeServer {
        async fn recv(&mut self) -> Value {
            let body = framing::decode(&mut self.reader).await.unwrap().unwrap();
            serde_json::from_slice(&body).unwrap()
        }

        async fn send(&mut self, value: &Value) {
            let frame = framing::encode(value.to_string().as_bytes());
            self.writer.write_all(&frame).await.unwrap();
        }

        async fn reply(&mut self, request: &Value, result: Value) {
            self.send(&json!({"jsonrpc":"2.0","id":request["id"],"result":result}))
                .await;
        }
    }

    fn connect(options: ClientOptions) -> (LspClient, FakeServer) {
        let (client_out, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_in) = tokio::io::duplex(64 * 1024);
        let transport = Transport::from_streams("fake", Box::new(client_in), Box::new(client_out));
        let client = LspClient::connect("python", transport, options).unwrap();
        (
            client,
            FakeServer {
                reader: TransportReader::new(Box::new(server_in)),
                writer: server_out,
            },
        )
    }

    async fn initialized(options: ClientOptions) -> (LspClient, FakeServer) {
        let (client, mut server) = connect(options);
        let init = client.initialize(Path::new("/tmp/project"), None);
        let serve = async {
            let req = server.recv().await;
            assert_eq!(req["method"], "initialize");
            assert_eq!(req["params"]["rootUri"], "file:///tmp/project");
            server.reply(&req, json!({"capabilities": {}})).await;
            let note = server.recv().await;
            assert_eq!(note["method"], "initialized");
        };
        let (result, ()) = tokio::join!(init, serve);
        result.unwrap();
        (client, server)
    }

    fn uri() -> Uri {
        "file:///tmp/project/a.py".parse().unwrap()
    }

    #[tokio::test]
    async fn test_queries_skipped_before_initialize() {
        let (client, _server) = connect(ClientOptions::default());
        assert!(!client.is_initialized());
        assert!(client.definition(&uri(), 0, 0).await.unwrap().is_empty());
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_definition_flattens_locations() {
        let (client, mut server) = initialized(ClientOptions::default()).await;

        let doc = uri();
        let query = client.definition(&doc, 4, 2);
        let serve = async {
            let req = server.recv().await;
            assert_eq!(req["method"], "textDocument/definition");
            assert_eq!(req["params"]["position"], json!({"line": 4, "character": 2}));
            server
                .reply(
                    &req,
                    json!({
                        "uri": "file:///tmp/project/b.py",
                        "range": {"start": {"line": 9, "character": 4},
                                  "end": {"line": 9, "character": 7}}
                    }),
                )
                .await;
        };
        let (result, ()) = tokio::join!(query, serve);
        let locs = result.unwrap();
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].uri, "file:///tmp/project/b.py");
        assert_eq!(locs[0].start_line, 9);
    }

    #[tokio::test]
    async fn test_protocol_error_reaches_caller() {
        let (client, mut server) = initialized(ClientOptions::default()).await;

        let doc = uri();
        let query = client.completion(&doc, 0, 0);
        let serve = async {
            let req = server.recv().await;
            server
                .send(&json!({
                    "jsonrpc":"2.0","id":req["id"],
                    "error":{"code":-32601,"message":"method not found","data":"completion"}
                }))
                .await;
        };
        let (result, ()) = tokio::join!(query, serve);
        let err = result.unwrap_err();
        assert_eq!(err.code, ProtocolError::METHOD_NOT_FOUND);
        assert_eq!(err.data, Some(json!("completion")));
    }

    #[tokio::test]
    async fn test_timeout_degrades_to_empty() {
        let options = ClientOptions {
            request_timeout: Duration::from_millis(50),
            ..ClientOptions::default()
        };
        let (client, _server) = initialized(options).await;
        let refs = client.references(&uri(), 1, 1, true).await.unwrap();
        assert!(refs.is_empty());
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_diagnostics_notification_queued() {
        let options = ClientOptions {
            diagnostics_capacity: 2,
            ..ClientOptions::default()
        };
        let (client, mut server) = initialized(options).await;

        for n in 0..3 {
            server
                .send(&json!({
                    "jsonrpc":"2.0","method":PUBLISH_DIAGNOSTICS,
                    "params":{"uri":format!("file:///tmp/{n}.py"),"diagnostics":[{
                        "range":{"start":{"line":n,"character":0},"end":{"line":n,"character":1}},
                        "message":"bad"
                    }]}
                }))
                .await;
        }
        // A round trip guarantees the notifications ahead of it were routed.
        let doc = uri();
        let query = client.hover(&doc, 0, 0);
        let serve = async {
            let req = server.recv().await;
            server.reply(&req, Value::Null).await;
        };
        let (hover, ()) = tokio::join!(query, serve);
        assert_eq!(hover.unwrap(), None);

        let entries = client.diagnostics();
        let uris: Vec<&str> = entries.iter().map(|e| e.uri.as_str()).collect();
        assert_eq!(uris, ["file:///tmp/1.py", "file:///tmp/2.py"]);
        assert_eq!(entries[1].diagnostics[0].start_line, 2);
        assert!(client.diagnostics().is_empty());
    }

    #[tokio::test]
    async fn test_references_async_callback() {
        let (client, mut server) = initialized(ClientOptions::default()).await;
        let (tx, rx) = tokio::sync::oneshot::channel();

        let id = client
            .references_async(&uri(), 3, 3, false, move |result| {
                let _ = tx.send(result);
            })
            .await
            .unwrap();

        let req = server.recv().await;
        assert_eq!(req["params"]["context"]["includeDeclaration"], false);
        server
            .reply(
                &req,
                json!([{
                    "uri":"file:///tmp/project/c.py",
                    "range":{
                        "start":{"line":1,"character":0},
                        "end":{"line":1,"character":3}
                    }
                }]),
            )
            .await;

        let locs = rx.await.unwrap().unwrap();
        assert_eq!(locs[0].uri, "file:///tmp/project/c.py");

        client.cancel(&id).await;
        let cancel = server.recv().await;
        assert_eq!(cancel["method"], "$/cancelRequest");
        assert_eq!(cancel["params"]["id"], json!(id));
    }

    #[tokio::test]
    async fn test_shutdown_tolerates_silent_server() {
        let options = ClientOptions {
            shutdown_timeout: Duration::from_millis(20),
            ..ClientOptions::default()
        };
        let (client, mut server) = initialized(options).await;

        client.shutdown().await;
        let shutdown = server.recv().await;
        assert_eq!(shutdown["method"], "shutdown");
        let exit = server.recv().await;
        assert_eq!(exit["method"], "exit");
        assert!(!client.is_alive());
    }

    #[test]
    fn test_file_uri() {
        let uri = file_uri(Path::new("/tmp/my project/a.py")).unwrap();
        assert_eq!(uri.as_str(), "file:///tmp/my%20project/a.py");
        assert!(file_uri(Path::new("relative.py")).is_none());
    }
}
