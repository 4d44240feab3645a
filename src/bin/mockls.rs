// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A scriptable mock language server for tests.
//!
//! Speaks Content-Length framed JSON-RPC over stdin/stdout. Answers are
//! computed from the text of opened documents with simple keyword scans.
//! Flags inject delays, hangs, errors and crashes. No tokio; deferred
//! notifications use `std::thread`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Mock LSP server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
struct Args {
    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Delay before publishing diagnostics (milliseconds).
    #[arg(long, default_value_t = 0)]
    diagnostics_delay: u64,

    /// Never publish diagnostics.
    #[arg(long)]
    no_diagnostics: bool,

    /// Only publish diagnostics on `didSave`, not `didOpen`/`didChange`.
    #[arg(long)]
    diagnostics_on_save: bool,

    /// Exit after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Send a request with this method to the client after `initialize`
    /// (repeatable).
    #[arg(long)]
    server_request: Vec<String>,

    /// Send `window/logMessage` with this text after `initialized`.
    #[arg(long)]
    log_message: Option<String>,
}

/// Any incoming JSON-RPC message.
#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    error: Option<Value>,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorObject>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

impl Response {
    const fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    const fn err(id: Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ErrorObject { code, message }),
        }
    }
}

/// Thread-safe writer handle. Wraps `std::io::Stdout` for production,
/// or a shared `Vec<u8>` for tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

/// Server state: open documents plus what was observed from the client.
struct MockServer {
    args: Args,
    documents: HashMap<String, String>,
    response_count: u64,
    writer: Writer,
    next_request_id: AtomicU64,
    /// Error codes the client answered our own requests with.
    client_errors: Vec<i64>,
    exited: bool,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            documents: HashMap::new(),
            response_count: 0,
            writer,
            next_request_id: AtomicU64::new(1),
            client_errors: Vec::new(),
            exited: false,
        }
    }

    /// Serve until EOF or `exit`.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];

        while !self.exited {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            }

            while let Some((body, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);
                if let Ok(message) = serde_json::from_str::<Incoming>(&body) {
                    self.handle(message);
                }
                if self.exited {
                    break;
                }
            }
        }
    }

    fn handle(&mut self, message: Incoming) {
        match (message.method.as_deref(), message.id) {
            (Some(method), Some(id)) => self.handle_request(method, id, &message.params),
            (Some(method), None) => self.handle_notification(method, &message.params),
            (None, Some(_)) => {
                // Reply to one of our own requests.
                if let Some(code) = message
                    .error
                    .as_ref()
                    .and_then(|e| e.get("code"))
                    .and_then(Value::as_i64)
                {
                    self.client_errors.push(code);
                }
            }
            (None, None) => {}
        }
    }

    fn handle_request(&mut self, method: &str, id: Value, params: &Value) {
        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        if self.args.fail_on.iter().any(|m| m == method) {
            self.send_response(&Response::err(
                id,
                -32603,
                format!("mockls: configured to fail on {method}"),
            ));
            return;
        }

        let result = match method {
            "initialize" => Some(initialize_result()),
            "shutdown" => Some(Value::Null),
            "textDocument/completion" => self.completion(params),
            "textDocument/hover" => self.hover(params),
            "textDocument/definition" => self.definition(params),
            "textDocument/references" => self.references(params),
            "textDocument/documentSymbol" => self.document_symbols(params),
            "workspace/symbol" => Some(self.workspace_symbols(params)),
            _ => {
                self.send_response(&Response::err(
                    id,
                    -32601,
                    format!("mockls: method not found: {method}"),
                ));
                return;
            }
        };

        self.send_response(&Response::ok(id, result.unwrap_or(Value::Null)));

        if method == "initialize" {
            for request in self.args.server_request.clone() {
                let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
                send_message(
                    &self.writer,
                    &json!({"jsonrpc": "2.0", "id": id, "method": request, "params": {}}),
                );
            }
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        let uri = params
            .pointer("/textDocument/uri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match method {
            "initialized" => {
                if let Some(text) = &self.args.log_message {
                    send_message(
                        &self.writer,
                        &json!({
                            "jsonrpc": "2.0",
                            "method": "window/logMessage",
                            "params": {"type": 3, "message": text}
                        }),
                    );
                }
            }
            "textDocument/didOpen" => {
                let text = params
                    .pointer("/textDocument/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.documents.insert(uri.clone(), text.to_string());
                if !self.args.diagnostics_on_save {
                    self.publish_diagnostics(&uri);
                }
            }
            "textDocument/didChange" => {
                if let Some(text) = params
                    .get("contentChanges")
                    .and_then(Value::as_array)
                    .and_then(|changes| changes.last())
                    .and_then(|c| c.get("text"))
                    .and_then(Value::as_str)
                {
                    self.documents.insert(uri.clone(), text.to_string());
                }
                if !self.args.diagnostics_on_save {
                    self.publish_diagnostics(&uri);
                }
            }
            "textDocument/didSave" => self.publish_diagnostics(&uri),
            "textDocument/didClose" => {
                self.documents.remove(&uri);
            }
            "exit" => self.exited = true,
            _ => {}
        }
    }

    /// Word at the requested position, and the text it was found in.
    fn word_at(&self, params: &Value) -> Option<(&str, &String, String)> {
        let (uri, line, col) = extract_position(params)?;
        let (uri, content) = self.documents.get_key_value(uri)?;
        let word = extract_word(content, line, col)?;
        Some((uri.as_str(), content, word))
    }

    fn completion(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let prefix = word_prefix(content, line, col);

        let mut labels: Vec<&str> = content
            .split(|c: char| !is_word_char(c))
            .filter(|w| !w.is_empty() && w.starts_with(&prefix) && *w != prefix)
            .collect();
        labels.sort_unstable();
        labels.dedup();

        let items: Vec<Value> = labels
            .into_iter()
            .map(|label| json!({"label": label, "kind": 1, "detail": "mockls"}))
            .collect();
        Some(json!({"isIncomplete": false, "items": items}))
    }

    fn hover(&self, params: &Value) -> Option<Value> {
        let (_, _, word) = self.word_at(params)?;
        Some(json!({"contents": {"kind": "markdown", "value": format!("```\n{word}\n```")}}))
    }

    fn definition(&self, params: &Value) -> Option<Value> {
        let (uri, content, word) = self.word_at(params)?;
        let (line, start) = find_definition(content, &word)?;
        Some(location_json(uri, line, start, start + word.len()))
    }

    fn references(&self, params: &Value) -> Option<Value> {
        let (uri, content, word) = self.word_at(params)?;
        let include_declaration = params
            .pointer("/context/includeDeclaration")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let declaration = find_definition(content, &word);

        let mut locations = Vec::new();
        for (line_idx, line_text) in content.lines().enumerate() {
            let mut start = 0;
            while let Some(pos) = line_text[start..].find(&word) {
                let col = start + pos;
                start = col + word.len();
                if !include_declaration && declaration == Some((line_idx, col)) {
                    continue;
                }
                locations.push(location_json(uri, line_idx, col, col + word.len()));
            }
        }
        Some(Value::Array(locations))
    }

    fn document_symbols(&self, params: &Value) -> Option<Value> {
        let uri = params.pointer("/textDocument/uri").and_then(Value::as_str)?;
        let content = self.documents.get(uri)?;
        Some(Value::Array(extract_symbols(content)))
    }

    fn workspace_symbols(&self, params: &Value) -> Value {
        let query = params.get("query").and_then(Value::as_str).unwrap_or("");

        let mut found = Vec::new();
        for (uri, content) in &self.documents {
            for symbol in extract_symbols(content) {
                let name = symbol.get("name").and_then(Value::as_str).unwrap_or("");
                if !query.is_empty() && !name.contains(query) {
                    continue;
                }
                found.push(json!({
                    "name": name,
                    "kind": symbol["kind"],
                    "location": {"uri": uri, "range": symbol["selectionRange"]}
                }));
            }
        }
        Value::Array(found)
    }

    fn publish_diagnostics(&self, uri: &str) {
        if self.args.no_diagnostics {
            return;
        }
        let notification = diagnostics_notification(uri, self.documents.get(uri));
        let delay = self.args.diagnostics_delay;

        if delay > 0 {
            let writer = self.writer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay));
                send_message(&writer, &notification);
            });
        } else {
            send_message(&self.writer, &notification);
        }
    }

    fn send_response(&mut self, response: &Response) {
        let Ok(body) = serde_json::to_string(response) else {
            return;
        };
        write_framed(&self.writer, &body);

        self.response_count += 1;
        if let Some(max) = self.args.drop_after
            && self.response_count >= max
        {
            std::process::exit(1);
        }
    }
}

fn initialize_result() -> Value {
    json!({
        "capabilities": {
            "completionProvider": {},
            "hoverProvider": true,
            "definitionProvider": true,
            "referencesProvider": true,
            "documentSymbolProvider": true,
            "workspaceSymbolProvider": true,
            "textDocumentSync": {"openClose": true, "change": 1, "save": {"includeText": false}}
        },
        "serverInfo": {"name": "mockls"}
    })
}

/// One warning per `TODO` line, or a single hint at 0:0 if there are none.
fn diagnostics_notification(uri: &str, content: Option<&String>) -> Value {
    let mut diagnostics: Vec<Value> = content
        .map(|text| {
            text.lines()
                .enumerate()
                .filter_map(|(line, l)| l.find("TODO").map(|col| (line, col)))
                .map(|(line, col)| {
                    json!({
                        "range": {
                            "start": {"line": line, "character": col},
                            "end": {"line": line, "character": col + 4}
                        },
                        "severity": 2,
                        "code": "todo",
                        "source": "mockls",
                        "message": "mockls: unresolved TODO"
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if diagnostics.is_empty() {
        diagnostics.push(json!({
            "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}},
            "message": "mockls: mock diagnostic"
        }));
    }

    json!({
        "jsonrpc": "2.0",
        "method": "textDocument/publishDiagnostics",
        "params": {"uri": uri, "diagnostics": diagnostics}
    })
}

/// Extract `(uri, line, col)` from a `textDocument/position` params object.
fn extract_position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params.pointer("/textDocument/uri").and_then(Value::as_str)?;
    let line = usize::try_from(params.pointer("/position/line").and_then(Value::as_u64)?).ok()?;
    let col =
        usize::try_from(params.pointer("/position/character").and_then(Value::as_u64)?).ok()?;
    Some((uri, line, col))
}

fn location_json(uri: &str, line: usize, start: usize, end: usize) -> Value {
    json!({
        "uri": uri,
        "range": {
            "start": {"line": line, "character": start},
            "end": {"line": line, "character": end}
        }
    })
}

/// Write a Content-Length framed JSON string.
fn write_framed(writer: &Writer, body: &str) {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(header.as_bytes());
    let _ = w.write_all(body.as_bytes());
    let _ = w.flush();
}

fn send_message(writer: &Writer, value: &Value) {
    if let Ok(body) = serde_json::to_string(value) {
        write_framed(writer, &body);
    }
}

/// Parse a Content-Length framed message from a buffer.
/// Returns the body and the number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let content_length: usize = headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-length")
            .then(|| value.trim().parse().ok())
            .flatten()
    })?;

    let total = header_end + 4 + content_length;
    if buffer.len() < total {
        return None;
    }
    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

const fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// The identifier covering `col` on `line`.
fn extract_word(content: &str, line: usize, col: usize) -> Option<String> {
    let text = content.lines().nth(line)?;
    if col >= text.len() || !text.is_char_boundary(col) {
        return None;
    }
    let start = text[..col]
        .rfind(|c: char| !is_word_char(c))
        .map_or(0, |i| i + 1);
    let end = text[col..]
        .find(|c: char| !is_word_char(c))
        .map_or(text.len(), |i| col + i);
    (start < end).then(|| text[start..end].to_string())
}

/// The identifier characters immediately before `col` on `line`.
fn word_prefix(content: &str, line: usize, col: usize) -> String {
    let Some(text) = content.lines().nth(line) else {
        return String::new();
    };
    let col = col.min(text.len());
    if !text.is_char_boundary(col) {
        return String::new();
    }
    let start = text[..col]
        .rfind(|c: char| !is_word_char(c))
        .map_or(0, |i| i + 1);
    text[start..col].to_string()
}

/// Keyword prefixes that introduce a definition, with their symbol kind.
const DEFINITION_KEYWORDS: &[(&str, u8)] = &[
    ("def ", 12),
    ("fn ", 12),
    ("function ", 12),
    ("class ", 5),
    ("let ", 13),
    ("var ", 13),
    ("const ", 14),
];

/// Line and column of the name `word` is defined with, if any.
fn find_definition(content: &str, word: &str) -> Option<(usize, usize)> {
    content.lines().enumerate().find_map(|(line, text)| {
        DEFINITION_KEYWORDS.iter().find_map(|(keyword, _)| {
            let at = text.find(&format!("{keyword}{word}"))?;
            let end = at + keyword.len() + word.len();
            let whole = text[end..].chars().next().is_none_or(|c| !is_word_char(c));
            whole.then_some((line, at + keyword.len()))
        })
    })
}

/// Hierarchical symbols: definitions indented under a `class` become its
/// children.
fn extract_symbols(content: &str) -> Vec<Value> {
    let mut symbols: Vec<Value> = Vec::new();
    let mut class_indent: Option<usize> = None;

    for (line_idx, text) in content.lines().enumerate() {
        let trimmed = text.trim_start();
        let indent = text.len() - trimmed.len();
        let Some((keyword, kind)) = DEFINITION_KEYWORDS
            .iter()
            .find(|(keyword, _)| trimmed.starts_with(keyword))
        else {
            continue;
        };
        let name: String = trimmed[keyword.len()..]
            .chars()
            .take_while(|c| is_word_char(*c))
            .collect();
        if name.is_empty() {
            continue;
        }

        let name_start = indent + keyword.len();
        let symbol = json!({
            "name": name,
            "kind": kind,
            "range": {
                "start": {"line": line_idx, "character": indent},
                "end": {"line": line_idx, "character": text.len()}
            },
            "selectionRange": {
                "start": {"line": line_idx, "character": name_start},
                "end": {"line": line_idx, "character": name_start + name.len()}
            },
            "children": []
        });

        let parent = class_indent
            .filter(|ci| indent > *ci)
            .and_then(|_| symbols.last_mut())
            .and_then(|s| s.get_mut("children"))
            .and_then(Value::as_array_mut);
        if let Some(children) = parent {
            children.push(symbol);
        } else {
            class_indent = (*keyword == "class ").then_some(indent);
            symbols.push(symbol);
        }
    }

    symbols
}

fn main() {
    let args = Args::parse();
    let writer: Writer = Arc::new(Mutex::new(Box::new(std::io::stdout())));
    let mut server = MockServer::new(args, writer);
    let mut stdin = std::io::stdin().lock();
    server.run(&mut stdin);
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Write adapter for `Arc<Mutex<Vec<u8>>>`.
    struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedVecWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .lock()
                .map_err(|e| std::io::Error::other(e.to_string()))?
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("mockls").chain(extra.iter().copied()))
    }

    fn frame(value: &Value) -> Vec<u8> {
        let body = value.to_string();
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn run(args: Args, input: &[Value]) -> (Vec<Value>, Vec<i64>) {
        let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
        let writer: Writer = Arc::new(Mutex::new(Box::new(SharedVecWriter(buf.clone()))));
        let mut server = MockServer::new(args, writer);
        let bytes: Vec<u8> = input.iter().flat_map(frame).collect();
        server.run(&mut Cursor::new(bytes));

        let mut data = buf.lock().unwrap().clone();
        let mut messages = Vec::new();
        while let Some((body, consumed)) = try_parse_message(&data) {
            messages.push(serde_json::from_str(&body).unwrap());
            data.drain(..consumed);
        }
        (messages, server.client_errors)
    }

    fn reply(messages: &[Value], id: u64) -> &Value {
        messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(id) && m.get("method").is_none())
            .expect("response with id")
    }

    fn request(id: u64, method: &str, params: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
    }

    fn open(uri: &str, text: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": {"textDocument": {"uri": uri, "languageId": "python", "version": 1, "text": text}}
        })
    }

    fn at(uri: &str, line: u64, character: u64) -> Value {
        json!({"textDocument": {"uri": uri}, "position": {"line": line, "character": character}})
    }

    const URI: &str = "file:///tmp/m.py";
    const SOURCE: &str = "class Greeter:\n    def greet(self):\n        pass\n\ngreeting = 1\nGreeter().greet()\n";

    #[test]
    fn test_initialize_capabilities() {
        let (messages, _) = run(args(&[]), &[request(1, "initialize", json!({}))]);
        let caps = &reply(&messages, 1)["result"]["capabilities"];
        assert_eq!(caps["hoverProvider"], true);
        assert!(caps["completionProvider"].is_object());
    }

    #[test]
    fn test_unknown_method_is_method_not_found() {
        let (messages, _) = run(args(&[]), &[request(7, "textDocument/rename", json!({}))]);
        assert_eq!(reply(&messages, 7)["error"]["code"], -32601);
    }

    #[test]
    fn test_fail_on_and_hang_on() {
        let (messages, _) = run(
            args(&["--fail-on", "textDocument/hover", "--hang-on", "textDocument/definition"]),
            &[
                open(URI, SOURCE),
                request(1, "textDocument/hover", at(URI, 0, 6)),
                request(2, "textDocument/definition", at(URI, 5, 0)),
            ],
        );
        assert_eq!(reply(&messages, 1)["error"]["code"], -32603);
        assert!(!messages.iter().any(|m| m["id"] == 2));
    }

    #[test]
    fn test_definition_and_references() {
        let (messages, _) = run(
            args(&[]),
            &[
                open(URI, SOURCE),
                request(1, "textDocument/definition", at(URI, 5, 11)),
                request(
                    2,
                    "textDocument/references",
                    json!({
                        "textDocument": {"uri": URI},
                        "position": {"line": 5, "character": 0},
                        "context": {"includeDeclaration": false}
                    }),
                ),
            ],
        );
        let def = &reply(&messages, 1)["result"];
        assert_eq!(def["range"]["start"], json!({"line": 1, "character": 8}));

        let refs = reply(&messages, 2)["result"].as_array().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0]["range"]["start"]["line"], 5);
    }

    #[test]
    fn test_completion_by_prefix() {
        let (messages, _) = run(
            args(&[]),
            &[
                open(URI, SOURCE),
                request(1, "textDocument/completion", at(URI, 5, 13)),
            ],
        );
        let labels: Vec<&str> = reply(&messages, 1)["result"]["items"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|i| i["label"].as_str())
            .collect();
        assert_eq!(labels, ["greet", "greeting"]);
    }

    #[test]
    fn test_nested_document_symbols() {
        let (messages, _) = run(
            args(&[]),
            &[
                open(URI, SOURCE),
                request(1, "textDocument/documentSymbol", json!({"textDocument": {"uri": URI}})),
            ],
        );
        let symbols = reply(&messages, 1)["result"].as_array().unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0]["name"], "Greeter");
        assert_eq!(symbols[0]["children"][0]["name"], "greet");
    }

    #[test]
    fn test_diagnostics_for_todo_lines() {
        let (messages, _) = run(args(&[]), &[open(URI, "x = 1\n# TODO: fix\n")]);
        let diag = messages
            .iter()
            .find(|m| m["method"] == "textDocument/publishDiagnostics")
            .expect("publishDiagnostics");
        assert_eq!(diag["params"]["diagnostics"][0]["range"]["start"]["line"], 1);
        assert_eq!(diag["params"]["diagnostics"][0]["code"], "todo");

        let (messages, _) = run(args(&["--no-diagnostics"]), &[open(URI, "x = 1\n")]);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_server_request_records_client_error() {
        let (messages, client_errors) = run(
            args(&["--server-request", "workspace/configuration"]),
            &[
                request(1, "initialize", json!({})),
                json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "nope"}}),
            ],
        );
        assert!(
            messages
                .iter()
                .any(|m| m["method"] == "workspace/configuration" && m["id"] == 1)
        );
        assert_eq!(client_errors, [-32601]);
    }

    #[test]
    fn test_exit_stops_reading() {
        let (messages, _) = run(
            args(&[]),
            &[
                json!({"jsonrpc": "2.0", "method": "exit"}),
                request(1, "shutdown", Value::Null),
            ],
        );
        assert!(messages.is_empty());
    }

    #[test]
    fn test_extract_word_and_prefix() {
        assert_eq!(extract_word("foo.bar_baz()", 0, 6).as_deref(), Some("bar_baz"));
        assert_eq!(extract_word("foo", 0, 3), None);
        assert_eq!(word_prefix("x = gre", 0, 7), "gre");
        assert_eq!(word_prefix("x = ", 0, 4), "");
    }
}
