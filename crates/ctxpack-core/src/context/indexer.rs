//! Symbol indexer — structural outline extraction from source files.
//!
//! Extracts code symbols (functions, structs, types, impls, modules) from
//! source text using line-oriented pattern matching. The tiered context
//! builder uses the symbol lines as structural boundaries: skeletons are made
//! of signature lines, and larger views are cut only where a symbol starts.
//!
//! A symbol is recognised only when its keyword opens the declaration (after
//! visibility and qualifier prefixes), so keywords inside expressions,
//! strings, or comments are not mistaken for declarations.

use serde::{Deserialize, Serialize};

/// A code symbol extracted from a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    /// Symbol name (e.g. "TokenBudget", "assemble").
    pub name: String,
    /// Kind of symbol.
    pub kind: SymbolKind,
    /// Line index (0-based) of the declaration.
    pub line: usize,
    /// The declaration line with its indentation preserved.
    pub signature: String,
    /// Doc comment directly above the declaration, if any.
    pub doc: Option<String>,
}

/// Kind of code symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Struct,
    Enum,
    Trait,
    Impl,
    Type,
    Const,
    Module,
    Macro,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::Function => write!(f, "function"),
            SymbolKind::Struct => write!(f, "struct"),
            SymbolKind::Enum => write!(f, "enum"),
            SymbolKind::Trait => write!(f, "trait"),
            SymbolKind::Impl => write!(f, "impl"),
            SymbolKind::Type => write!(f, "type"),
            SymbolKind::Const => write!(f, "const"),
            SymbolKind::Module => write!(f, "module"),
            SymbolKind::Macro => write!(f, "macro"),
        }
    }
}

/// Source languages the indexer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Rust,
    TypeScript,
    Python,
    Go,
}

impl Language {
    /// Detect the language from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rs" => Some(Language::Rust),
            "ts" | "tsx" | "js" | "jsx" | "mjs" | "cjs" => Some(Language::TypeScript),
            "py" => Some(Language::Python),
            "go" => Some(Language::Go),
            _ => None,
        }
    }
}

/// Extract symbols from `content`, in source order.
pub fn extract_symbols(language: Language, content: &str) -> Vec<Symbol> {
    match language {
        Language::Rust => extract_rust_symbols(content),
        Language::TypeScript => extract_typescript_symbols(content),
        Language::Python => extract_python_symbols(content),
        Language::Go => extract_go_symbols(content),
    }
}

// ── Language-specific symbol extraction ─────────────────────────────────

const RUST_QUALIFIERS: &[&str] = &[
    "pub(crate) ",
    "pub(super) ",
    "pub ",
    "async ",
    "unsafe ",
    "const ",
    "extern \"C\" ",
    "default ",
];

/// Extract symbols from Rust source code.
fn extract_rust_symbols(content: &str) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    let mut doc_comment = String::new();

    for (line_num, line) in content.lines().enumerate() {
        let trimmed = line.trim();

        // Collect doc comments
        if trimmed.starts_with("///") || trimmed.starts_with("//!") {
            doc_comment.push_str(trimmed.trim_start_matches('/').trim_start_matches('!').trim());
            doc_comment.push('\n');
            continue;
        }
        // Attributes sit between docs and the item
        if trimmed.starts_with("#[") || trimmed.starts_with("#![") {
            continue;
        }

        let doc = if doc_comment.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut doc_comment).trim().to_string())
        };

        let decl = strip_qualifiers(trimmed, RUST_QUALIFIERS);
        let found = if let Some(name) = name_after(decl, "fn ") {
            Some((name, SymbolKind::Function))
        } else if let Some(name) = name_after(decl, "struct ") {
            Some((name, SymbolKind::Struct))
        } else if let Some(name) = name_after(decl, "enum ") {
            Some((name, SymbolKind::Enum))
        } else if let Some(name) = name_after(decl, "trait ") {
            Some((name, SymbolKind::Trait))
        } else if decl.starts_with("impl ") || decl.starts_with("impl<") {
            impl_target(decl).map(|name| (name, SymbolKind::Impl))
        } else if let Some(name) = name_after(decl, "type ") {
            Some((name, SymbolKind::Type))
        } else if let Some(name) = name_after(decl, "mod ") {
            Some((name, SymbolKind::Module))
        } else if let Some(name) = name_after(decl, "macro_rules! ") {
            Some((name, SymbolKind::Macro))
        } else if trimmed.starts_with("const ")
            || trimmed.starts_with("pub const ")
            || trimmed.starts_with("static ")
            || trimmed.starts_with("pub static ")
        {
            let rest = trimmed
                .trim_start_matches("pub ")
                .trim_start_matches("const ")
                .trim_start_matches("static ")
                .trim_start_matches("mut ");
            identifier(rest).map(|name| (name, SymbolKind::Const))
        } else {
            None
        };

        match found {
            Some((name, kind)) => symbols.push(symbol(name, kind, line_num, line, doc)),
            // Don't carry doc comments across non-matching lines
            None => doc_comment.clear(),
        }
    }
    symbols
}

/// Extract symbols from TypeScript/JavaScript source code.
fn extract_typescript_symbols(content: &str) -> Vec<Symbol> {
    const QUALIFIERS: &[&str] = &["export ", "default ", "declare ", "abstract ", "async "];
    let mut symbols = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        let decl = strip_qualifiers(line.trim(), QUALIFIERS);

        let found = if let Some(name) = name_after(decl, "function ") {
            Some((name, SymbolKind::Function))
        } else if let Some(name) = name_after(decl, "function* ") {
            Some((name, SymbolKind::Function))
        } else if let Some(name) = name_after(decl, "class ") {
            Some((name, SymbolKind::Struct))
        } else if let Some(name) = name_after(decl, "interface ") {
            Some((name, SymbolKind::Trait))
        } else if let Some(name) = name_after(decl, "enum ") {
            Some((name, SymbolKind::Enum))
        } else if let Some(name) = name_after(decl, "type ") {
            Some((name, SymbolKind::Type))
        } else if let Some(name) = name_after(decl, "namespace ") {
            Some((name, SymbolKind::Module))
        } else if !line.starts_with(char::is_whitespace) {
            top_level_binding(decl)
        } else {
            None
        };

        if let Some((name, kind)) = found {
            symbols.push(symbol(name, kind, line_num, line, None));
        }
    }
    symbols
}

/// Module-level `const|let|var NAME =`; arrow functions and function
/// expressions count as functions.
fn top_level_binding(decl: &str) -> Option<(String, SymbolKind)> {
    let rest = ["const ", "let ", "var "]
        .iter()
        .find_map(|kw| decl.strip_prefix(kw))?;
    let name = identifier(rest)?;
    let (_, value) = rest[name.len()..].split_once('=')?;
    let value = value.trim_start();
    if value.starts_with('=') || value.starts_with('>') {
        return None;
    }
    let is_function = value.contains("=>")
        || value.starts_with("function")
        || value.starts_with("async ");
    let kind = if is_function {
        SymbolKind::Function
    } else {
        SymbolKind::Const
    };
    Some((name, kind))
}

/// Extract symbols from Python source code.
fn extract_python_symbols(content: &str) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        let decl = strip_qualifiers(line.trim(), &["async "]);

        if let Some(name) = name_after(decl, "def ") {
            symbols.push(symbol(name, SymbolKind::Function, line_num, line, None));
        } else if let Some(name) = name_after(decl, "class ") {
            symbols.push(symbol(name, SymbolKind::Struct, line_num, line, None));
        }
    }
    symbols
}

/// Extract symbols from Go source code.
fn extract_go_symbols(content: &str) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("func ") {
            // Methods: `func (r *Recv) Name(`
            let rest = if rest.starts_with('(') {
                rest.split_once(')').map(|(_, tail)| tail.trim_start()).unwrap_or("")
            } else {
                rest
            };
            if let Some(name) = identifier(rest) {
                symbols.push(symbol(name, SymbolKind::Function, line_num, line, None));
            }
        } else if let Some(name) = name_after(trimmed, "type ") {
            let kind = if trimmed.contains(" struct") {
                SymbolKind::Struct
            } else if trimmed.contains(" interface") {
                SymbolKind::Trait
            } else {
                SymbolKind::Type
            };
            symbols.push(symbol(name, kind, line_num, line, None));
        }
    }
    symbols
}

fn symbol(name: String, kind: SymbolKind, line: usize, raw: &str, doc: Option<String>) -> Symbol {
    Symbol {
        name,
        kind,
        line,
        signature: raw.trim_end().to_string(),
        doc,
    }
}

/// Repeatedly strip any of `qualifiers` from the front of `line`.
fn strip_qualifiers<'a>(mut line: &'a str, qualifiers: &[&str]) -> &'a str {
    while let Some(rest) = qualifiers.iter().find_map(|q| line.strip_prefix(q)) {
        line = rest;
    }
    line
}

/// The identifier following `keyword` when the line opens with it.
///
/// e.g. `name_after("fn run(", "fn ")` → `Some("run")`
fn name_after(line: &str, keyword: &str) -> Option<String> {
    identifier(line.strip_prefix(keyword)?)
}

fn identifier(s: &str) -> Option<String> {
    let name: String = s
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        .collect();
    if name.is_empty() { None } else { Some(name) }
}

/// `impl<T> Display for Wrapper<T> {` → `Wrapper`, `impl Budget {` → `Budget`.
fn impl_target(decl: &str) -> Option<String> {
    let mut rest = decl.strip_prefix("impl")?;
    if rest.starts_with('<') {
        let mut depth = 0usize;
        let end = rest.char_indices().find_map(|(i, c)| {
            match c {
                '<' => depth += 1,
                '>' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
            None
        })?;
        rest = &rest[end..];
    }
    let rest = rest.trim_start();
    let target = match rest.split_once(" for ") {
        Some((_, ty)) => ty,
        None => rest,
    };
    identifier(target.trim_start_matches('&').trim_start())
}
