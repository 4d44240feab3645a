// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Flattened result values.
//!
//! Wire results nest ranges inside locations inside symbols. Callers only
//! need a file and a start/end position, so each result is flattened into a
//! single record here.

use lsp_types::{
    CompletionItemKind, CompletionResponse, DiagnosticSeverity, DocumentSymbol,
    DocumentSymbolResponse, Documentation, GotoDefinitionResponse, Hover, HoverContents,
    LocationLink, MarkedString, NumberOrString, OneOf, PublishDiagnosticsParams, Range,
    SymbolInformation, SymbolKind, Uri, WorkspaceSymbolResponse,
};
use serde::Serialize;

/// A span in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    /// Document URI.
    pub uri: String,
    /// Zero-based start line.
    pub start_line: u32,
    /// Zero-based start character.
    pub start_char: u32,
    /// Zero-based end line.
    pub end_line: u32,
    /// Zero-based end character.
    pub end_char: u32,
}

impl Location {
    fn new(uri: &Uri, range: Range) -> Self {
        Self {
            uri: uri.as_str().to_string(),
            start_line: range.start.line,
            start_char: range.start.character,
            end_line: range.end.line,
            end_char: range.end.character,
        }
    }
}

impl From<&lsp_types::Location> for Location {
    fn from(loc: &lsp_types::Location) -> Self {
        Self::new(&loc.uri, loc.range)
    }
}

impl From<&LocationLink> for Location {
    fn from(link: &LocationLink) -> Self {
        Self::new(&link.target_uri, link.target_selection_range)
    }
}

/// One completion candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionItem {
    /// Text shown in the menu and inserted by default.
    pub label: String,
    /// Kind of the item, if the server sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<CompletionItemKind>,
    /// Short detail such as a type signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Documentation as plain text or markdown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

impl From<lsp_types::CompletionItem> for CompletionItem {
    fn from(item: lsp_types::CompletionItem) -> Self {
        Self {
            label: item.label,
            kind: item.kind,
            detail: item.detail,
            documentation: item.documentation.map(|d| match d {
                Documentation::String(s) => s,
                Documentation::MarkupContent(m) => m.value,
            }),
        }
    }
}

/// A named symbol and where it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    /// Symbol name.
    pub name: String,
    /// Symbol kind.
    pub kind: SymbolKind,
    /// Name of the enclosing symbol, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Where the symbol is.
    #[serde(flatten)]
    pub location: Location,
}

impl From<SymbolInformation> for Symbol {
    fn from(info: SymbolInformation) -> Self {
        Self {
            location: Location::from(&info.location),
            name: info.name,
            kind: info.kind,
            container_name: info.container_name,
        }
    }
}

/// One issue reported for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticItem {
    /// Severity; servers that omit it get `HINT`.
    pub severity: DiagnosticSeverity,
    /// Diagnostic code, empty if none.
    pub code: String,
    /// Producer of the diagnostic, empty if none.
    pub source: String,
    /// Message text.
    pub message: String,
    /// Zero-based start line.
    pub start_line: u32,
    /// Zero-based start character.
    pub start_char: u32,
    /// Zero-based end line.
    pub end_line: u32,
    /// Zero-based end character.
    pub end_char: u32,
}

impl From<lsp_types::Diagnostic> for DiagnosticItem {
    fn from(d: lsp_types::Diagnostic) -> Self {
        Self {
            severity: d.severity.unwrap_or(DiagnosticSeverity::HINT),
            code: match d.code {
                Some(NumberOrString::Number(n)) => n.to_string(),
                Some(NumberOrString::String(s)) => s,
                None => String::new(),
            },
            source: d.source.unwrap_or_default(),
            message: d.message,
            start_line: d.range.start.line,
            start_char: d.range.start.character,
            end_line: d.range.end.line,
            end_char: d.range.end.character,
        }
    }
}

/// Everything one `publishDiagnostics` notification said about a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticsEntry {
    /// Document URI.
    pub uri: String,
    /// Diagnostics in the order the server sent them.
    pub diagnostics: Vec<DiagnosticItem>,
}

impl From<PublishDiagnosticsParams> for DiagnosticsEntry {
    fn from(params: PublishDiagnosticsParams) -> Self {
        Self {
            uri: params.uri.as_str().to_string(),
            diagnostics: params
                .diagnostics
                .into_iter()
                .map(DiagnosticItem::from)
                .collect(),
        }
    }
}

/// Hover text with the range it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoverInfo {
    /// Contents joined into one string.
    pub contents: String,
    /// Range the hover applies to, if the server sent one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<(u32, u32, u32, u32)>,
}

fn marked_string(s: MarkedString) -> String {
    match s {
        MarkedString::String(s) => s,
        MarkedString::LanguageString(ls) => format!("```{}\n{}\n```", ls.language, ls.value),
    }
}

impl From<Hover> for HoverInfo {
    fn from(hover: Hover) -> Self {
        let contents = match hover.contents {
            HoverContents::Scalar(s) => marked_string(s),
            HoverContents::Array(parts) => parts
                .into_iter()
                .map(marked_string)
                .collect::<Vec<_>>()
                .join("\n\n"),
            HoverContents::Markup(m) => m.value,
        };
        Self {
            contents,
            range: hover
                .range
                .map(|r| (r.start.line, r.start.character, r.end.line, r.end.character)),
        }
    }
}

/// Flattens any of the three definition result shapes.
pub fn definition_locations(response: Option<GotoDefinitionResponse>) -> Vec<Location> {
    match response {
        None => Vec::new(),
        Some(GotoDefinitionResponse::Scalar(loc)) => vec![Location::from(&loc)],
        Some(GotoDefinitionResponse::Array(locs)) => locs.iter().map(Location::from).collect(),
        Some(GotoDefinitionResponse::Link(links)) => links.iter().map(Location::from).collect(),
    }
}

/// Flattens either a bare item array or a `CompletionList`.
pub fn completion_items(response: Option<CompletionResponse>) -> Vec<CompletionItem> {
    let items = match response {
        None => Vec::new(),
        Some(CompletionResponse::Array(items)) => items,
        Some(CompletionResponse::List(list)) => list.items,
    };
    items.into_iter().map(CompletionItem::from).collect()
}

/// Flattens flat or hierarchical document symbols, depth first.
///
/// Hierarchical symbols carry no URI of their own, so `uri` is the document
/// that was queried.
pub fn document_symbols(uri: &Uri, response: Option<DocumentSymbolResponse>) -> Vec<Symbol> {
    match response {
        None => Vec::new(),
        Some(DocumentSymbolResponse::Flat(infos)) => infos.into_iter().map(Symbol::from).collect(),
        Some(DocumentSymbolResponse::Nested(nested)) => {
            let mut out = Vec::new();
            flatten_nested(uri, nested, None, &mut out);
            out
        }
    }
}

fn flatten_nested(
    uri: &Uri,
    symbols: Vec<DocumentSymbol>,
    container: Option<&str>,
    out: &mut Vec<Symbol>,
) {
    for symbol in symbols {
        out.push(Symbol {
            name: symbol.name.clone(),
            kind: symbol.kind,
            container_name: container.map(str::to_string),
            location: Location::new(uri, symbol.selection_range),
        });
        if let Some(children) = symbol.children {
            flatten_nested(uri, children, Some(&symbol.name), out);
        }
    }
}

/// Flattens workspace symbols. Symbols that only name a file start at 0:0.
pub fn workspace_symbols(response: Option<WorkspaceSymbolResponse>) -> Vec<Symbol> {
    match response {
        None => Vec::new(),
        Some(WorkspaceSymbolResponse::Flat(infos)) => {
            infos.into_iter().map(Symbol::from).collect()
        }
        Some(WorkspaceSymbolResponse::Nested(symbols)) => symbols
            .into_iter()
            .map(|s| {
                let location = match &s.location {
                    OneOf::Left(loc) => Location::from(loc),
                    OneOf::Right(wl) => Location::new(&wl.uri, Range::default()),
                };
                Symbol {
                    name: s.name,
                    kind: s.kind,
                    container_name: s.container_name,
                    location,
                }
            })
            .collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_accepts_all_shapes() {
        let scalar: GotoDefinitionResponse = serde_json::from_value(json!({
            "uri": "file:///a.rs",
            "range": {"start": {"line": 3, "character": 4}, "end": {"line": 3, "character": 9}}
        }))
        .unwrap();
        let locs = definition_locations(Some(scalar));
        assert_eq!(
            locs,
            vec![Location {
                uri: "file:///a.rs".to_string(),
                start_line: 3,
                start_char: 4,
                end_line: 3,
                end_char: 9,
            }]
        );

        let links: GotoDefinitionResponse = serde_json::from_value(json!([{
            "targetUri": "file:///b.rs",
            "targetRange": {"start": {"line": 0, "character": 0}, "end": {"line": 9, "character": 1}},
            "targetSelectionRange": {"start": {"line": 1, "character": 3}, "end": {"line": 1, "character": 7}}
        }]))
        .unwrap();
        let locs = definition_locations(Some(links));
        assert_eq!(locs[0].uri, "file:///b.rs");
        assert_eq!((locs[0].start_line, locs[0].start_char), (1, 3));

        assert!(definition_locations(None).is_empty());
    }

    #[test]
    fn test_completion_list_and_array() {
        let list: CompletionResponse = serde_json::from_value(json!({
            "isIncomplete": false,
            "items": [{"label": "print", "kind": 3, "documentation": {"kind": "markdown", "value": "Prints"}}]
        }))
        .unwrap();
        let items = completion_items(Some(list));
        assert_eq!(items[0].label, "print");
        assert_eq!(items[0].kind, Some(CompletionItemKind::FUNCTION));
        assert_eq!(items[0].documentation.as_deref(), Some("Prints"));

        let array: CompletionResponse =
            serde_json::from_value(json!([{"label": "a"}, {"label": "b", "detail": "int"}]))
                .unwrap();
        let items = completion_items(Some(array));
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].detail.as_deref(), Some("int"));
    }

    #[test]
    fn test_nested_symbols_flatten_with_container() {
        let uri: Uri = "file:///m.py".parse().unwrap();
        let nested: DocumentSymbolResponse = serde_json::from_value(json!([{
            "name": "Foo", "kind": 5,
            "range": {"start": {"line": 0, "character": 0}, "end": {"line": 4, "character": 0}},
            "selectionRange": {"start": {"line": 0, "character": 6}, "end": {"line": 0, "character": 9}},
            "children": [{
                "name": "bar", "kind": 6,
                "range": {"start": {"line": 1, "character": 4}, "end": {"line": 2, "character": 0}},
                "selectionRange": {"start": {"line": 1, "character": 8}, "end": {"line": 1, "character": 11}}
            }]
        }]))
        .unwrap();

        let symbols = document_symbols(&uri, Some(nested));
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "Foo");
        assert_eq!(symbols[0].container_name, None);
        assert_eq!(symbols[1].name, "bar");
        assert_eq!(symbols[1].container_name.as_deref(), Some("Foo"));
        assert_eq!(symbols[1].location.uri, "file:///m.py");
        assert_eq!(symbols[1].location.start_char, 8);
    }

    #[test]
    fn test_diagnostic_defaults() {
        let params: PublishDiagnosticsParams = serde_json::from_value(json!({
            "uri": "file:///a.py",
            "diagnostics": [
                {"range": {"start": {"line": 2, "character": 0}, "end": {"line": 2, "character": 5}},
                 "message": "unused import"},
                {"range": {"start": {"line": 7, "character": 1}, "end": {"line": 7, "character": 2}},
                 "severity": 1, "code": 42, "source": "pyflakes", "message": "undefined name"}
            ]
        }))
        .unwrap();

        let entry = DiagnosticsEntry::from(params);
        assert_eq!(entry.uri, "file:///a.py");
        assert_eq!(entry.diagnostics[0].severity, DiagnosticSeverity::HINT);
        assert_eq!(entry.diagnostics[0].code, "");
        assert_eq!(entry.diagnostics[0].source, "");
        assert_eq!(entry.diagnostics[1].severity, DiagnosticSeverity::ERROR);
        assert_eq!(entry.diagnostics[1].code, "42");
        assert_eq!(entry.diagnostics[1].start_line, 7);
    }

    #[test]
    fn test_hover_contents_joined() {
        let hover: Hover = serde_json::from_value(json!({
            "contents": [{"language": "python", "value": "def f()"}, "Docs here"]
        }))
        .unwrap();
        let info = HoverInfo::from(hover);
        assert_eq!(info.contents, "```python\ndef f()\n```\n\nDocs here");
        assert_eq!(info.range, None);
    }
}
