//! Tiered context — a layered view of one artifact, capped per tier.
//!
//! Every artifact is split into structural units (symbols for code, headings
//! for Markdown, top-level keys for JSON, paragraphs for plain text). Each
//! unit renders at three layers:
//!
//! | Layer | Content | Used by |
//! |-------|---------|---------|
//! | 1. Skeleton | signature / heading / key outline | `tier1`, `tier2`, `tier3` |
//! | 2. Excerpt | skeleton + a few body lines | `tier2`, `tier3` |
//! | 3. Full | the unit's complete text | `tier3` |
//!
//! Units are emitted in source order until the next one would overflow the
//! cap, so a cut always falls between units. If the very first unit is too
//! large on its own it is cut at its last whole line.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::indexer::{self, Language};
use super::token::TokenEstimator;
use super::truncate::truncate_to_lines;
use crate::artifact::ArtifactProvider;
use crate::error::ContextError;

/// Lines of body shown under each skeleton line in the excerpt layer.
const EXCERPT_LINES: usize = 3;

/// Longest scalar shown in a JSON excerpt.
const JSON_SCALAR_CHARS: usize = 80;

/// Size class controlling how much structural detail is included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextTier {
    Tier1,
    Tier2,
    Tier3,
}

impl ContextTier {
    /// Nominal token ceiling for the tier.
    pub fn ceiling(self) -> usize {
        match self {
            ContextTier::Tier1 => 1000,
            ContextTier::Tier2 => 5000,
            ContextTier::Tier3 => 20000,
        }
    }

    fn layer(self) -> Layer {
        match self {
            ContextTier::Tier1 => Layer::Skeleton,
            ContextTier::Tier2 => Layer::Excerpt,
            ContextTier::Tier3 => Layer::Full,
        }
    }
}

impl fmt::Display for ContextTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextTier::Tier1 => write!(f, "tier1"),
            ContextTier::Tier2 => write!(f, "tier2"),
            ContextTier::Tier3 => write!(f, "tier3"),
        }
    }
}

impl FromStr for ContextTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tier1" | "1" => Ok(ContextTier::Tier1),
            "tier2" | "2" => Ok(ContextTier::Tier2),
            "tier3" | "3" => Ok(ContextTier::Tier3),
            other => Err(format!("unknown context tier {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Layer {
    Skeleton,
    Excerpt,
    Full,
}

impl Layer {
    fn richer(self) -> Option<Layer> {
        match self {
            Layer::Skeleton => Some(Layer::Excerpt),
            Layer::Excerpt => Some(Layer::Full),
            Layer::Full => None,
        }
    }
}

/// How an artifact was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Code(Language),
    Markdown,
    Json,
    Text,
}

impl ArtifactKind {
    /// Detect from the reference's extension.
    pub fn detect(reference: &str) -> Self {
        let ext = reference
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "md" | "markdown" => ArtifactKind::Markdown,
            "json" => ArtifactKind::Json,
            other => Language::from_extension(other)
                .map(ArtifactKind::Code)
                .unwrap_or(ArtifactKind::Text),
        }
    }
}

/// The tiered view of one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredContext {
    pub reference: String,
    pub tier: ContextTier,
    pub kind: ArtifactKind,
    pub content: String,
    pub tokens: usize,
    /// Whether the cap cut off units (or part of the first unit).
    pub truncated: bool,
    pub units_included: usize,
    pub units_total: usize,
    /// The tier's own layer had nothing to show (no recognised structure),
    /// so a richer layer or the raw text was used instead.
    #[serde(default)]
    pub layer_fallback: bool,
}

/// One structural unit, renderable at each layer.
#[derive(Debug, Clone, Default)]
struct Unit {
    /// Outline line(s); `None` for preamble text before the first boundary.
    skeleton: Option<String>,
    /// Body lines shown in the excerpt layer.
    excerpt: Vec<String>,
    /// Complete text of the unit.
    full: String,
}

impl Unit {
    fn render(&self, layer: Layer) -> Option<String> {
        match layer {
            Layer::Skeleton => self.skeleton.clone(),
            Layer::Excerpt => {
                let mut lines: Vec<&str> = self.skeleton.iter().map(String::as_str).collect();
                lines.extend(self.excerpt.iter().map(String::as_str));
                if lines.is_empty() {
                    None
                } else {
                    Some(lines.join("\n"))
                }
            }
            Layer::Full => {
                if self.full.trim().is_empty() {
                    None
                } else {
                    Some(self.full.clone())
                }
            }
        }
    }
}

/// Builds tiered context for artifacts read through an [`ArtifactProvider`].
#[derive(Clone)]
pub struct TieredContextBuilder {
    provider: Arc<dyn ArtifactProvider>,
    estimator: Arc<dyn TokenEstimator>,
}

impl TieredContextBuilder {
    pub fn new(provider: Arc<dyn ArtifactProvider>, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            provider,
            estimator,
        }
    }

    pub fn provider(&self) -> &Arc<dyn ArtifactProvider> {
        &self.provider
    }

    /// Build the tier's view of `reference`, capped at the tier's ceiling.
    pub async fn build(
        &self,
        reference: &str,
        tier: ContextTier,
    ) -> Result<StructuredContext, ContextError> {
        self.build_capped(reference, tier, tier.ceiling()).await
    }

    /// Like [`build`](Self::build), with the cap lowered to `cap` when that is
    /// below the tier's ceiling.
    pub async fn build_capped(
        &self,
        reference: &str,
        tier: ContextTier,
        cap: usize,
    ) -> Result<StructuredContext, ContextError> {
        let bytes = self.provider.read(reference).await?;
        self.build_from_bytes(reference, &bytes, tier, cap)
    }

    /// Build from bytes already in hand.
    pub fn build_from_bytes(
        &self,
        reference: &str,
        bytes: &[u8],
        tier: ContextTier,
        cap: usize,
    ) -> Result<StructuredContext, ContextError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ContextError::Unreadable {
            reference: reference.to_string(),
            reason: format!("not valid UTF-8: {e}"),
        })?;
        let kind = ArtifactKind::detect(reference);
        let units = split_units(kind, text).map_err(|reason| ContextError::Unreadable {
            reference: reference.to_string(),
            reason,
        })?;
        let cap = cap.min(tier.ceiling());

        let ctx = self.render(reference, tier, kind, text, &units, cap);
        debug!(
            reference,
            tier = %tier,
            tokens = ctx.tokens,
            units = ctx.units_included,
            of = ctx.units_total,
            truncated = ctx.truncated,
            "built tiered context"
        );
        Ok(ctx)
    }

    fn render(
        &self,
        reference: &str,
        tier: ContextTier,
        kind: ArtifactKind,
        text: &str,
        units: &[Unit],
        cap: usize,
    ) -> StructuredContext {
        let mut layer = tier.layer();
        let mut pieces: Vec<String> = units.iter().filter_map(|u| u.render(layer)).collect();
        let has_text = !text.trim().is_empty();
        while pieces.is_empty() && has_text {
            let Some(next) = layer.richer() else { break };
            layer = next;
            pieces = units.iter().filter_map(|u| u.render(layer)).collect();
        }
        if pieces.is_empty() && has_text {
            pieces.push(text.to_string());
        }
        let layer_fallback = layer != tier.layer() || (units.is_empty() && has_text);
        if layer_fallback {
            debug!(reference, tier = %tier, ?layer, "no outline at the tier's layer, using richer view");
        }
        let units_total = pieces.len();

        // Near-complete view: the untouched original when it fits.
        if layer == Layer::Full {
            let tokens = self.estimator.estimate(text);
            if tokens <= cap {
                return StructuredContext {
                    reference: reference.to_string(),
                    tier,
                    kind,
                    content: text.to_string(),
                    tokens,
                    truncated: false,
                    units_included: units_total,
                    units_total,
                    layer_fallback,
                };
            }
        }

        // Code and Markdown units are contiguous line ranges, so joining their
        // full text with "\n" reproduces the source.
        let separator = match (layer, kind) {
            (Layer::Skeleton, _) => "\n",
            (Layer::Full, ArtifactKind::Code(_) | ArtifactKind::Markdown) => "\n",
            _ => "\n\n",
        };
        let mut content = String::new();
        let mut units_included = 0;
        let mut truncated = false;

        for piece in &pieces {
            let candidate = if content.is_empty() {
                piece.clone()
            } else {
                format!("{content}{separator}{piece}")
            };
            if self.estimator.estimate(&candidate) <= cap {
                content = candidate;
                units_included += 1;
                continue;
            }
            truncated = true;
            if content.is_empty() {
                content = truncate_to_lines(piece, cap, self.estimator.as_ref());
            }
            break;
        }
        let content = content.trim_end().to_string();

        StructuredContext {
            reference: reference.to_string(),
            tier,
            kind,
            tokens: self.estimator.estimate(&content),
            content,
            truncated,
            units_included,
            units_total,
            layer_fallback,
        }
    }
}

// ── Unit splitting ──────────────────────────────────────────────────────

fn split_units(kind: ArtifactKind, text: &str) -> Result<Vec<Unit>, String> {
    match kind {
        ArtifactKind::Code(language) => Ok(code_units(language, text)),
        ArtifactKind::Markdown => Ok(markdown_units(text)),
        ArtifactKind::Json => json_units(text),
        ArtifactKind::Text => Ok(text_units(text)),
    }
}

/// Split source at symbol lines.
fn code_units(language: Language, text: &str) -> Vec<Unit> {
    let lines: Vec<&str> = text.lines().collect();
    let symbols = indexer::extract_symbols(language, text);
    let mut units = Vec::with_capacity(symbols.len() + 1);

    let first_symbol_line = symbols.first().map(|s| s.line).unwrap_or(lines.len());
    if first_symbol_line > 0 {
        units.push(Unit {
            skeleton: None,
            excerpt: Vec::new(),
            full: lines[..first_symbol_line].join("\n"),
        });
    }

    for (i, sym) in symbols.iter().enumerate() {
        let end = symbols.get(i + 1).map(|s| s.line).unwrap_or(lines.len());
        let body = &lines[sym.line + 1..end];
        units.push(Unit {
            skeleton: Some(sym.signature.clone()),
            excerpt: first_non_blank(body, EXCERPT_LINES),
            full: lines[sym.line..end].join("\n"),
        });
    }
    units
}

/// Split Markdown at headings, ignoring `#` lines inside fenced code.
fn markdown_units(text: &str) -> Vec<Unit> {
    let lines: Vec<&str> = text.lines().collect();
    let mut starts = Vec::new();
    let mut in_fence = false;
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
        } else if !in_fence && is_heading(trimmed) {
            starts.push(i);
        }
    }

    let mut units = Vec::with_capacity(starts.len() + 1);
    let first = starts.first().copied().unwrap_or(lines.len());
    if first > 0 {
        let preamble = &lines[..first];
        units.push(Unit {
            skeleton: None,
            excerpt: first_paragraph(preamble, EXCERPT_LINES),
            full: preamble.join("\n"),
        });
    }
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(lines.len());
        units.push(Unit {
            skeleton: Some(lines[start].trim_end().to_string()),
            excerpt: first_paragraph(&lines[start + 1..end], EXCERPT_LINES),
            full: lines[start..end].join("\n"),
        });
    }
    units
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

/// One unit per top-level key (object) or element (array).
fn json_units(text: &str) -> Result<Vec<Unit>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;
    let units = match &value {
        Value::Object(map) => map
            .iter()
            .map(|(key, v)| json_unit(&format!("{key:?}"), v))
            .collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| json_unit(&format!("[{i}]"), v))
            .collect(),
        scalar => vec![json_unit("$", scalar)],
    };
    Ok(units)
}

fn json_unit(label: &str, value: &Value) -> Unit {
    let mut skeleton = format!("{label}: {}", json_shape(value));
    if let Value::Object(children) = value {
        for (key, child) in children {
            skeleton.push_str(&format!("\n  {key:?}: {}", json_shape(child)));
        }
    }

    let excerpt = match value {
        Value::Object(children) => children
            .iter()
            .filter(|(_, v)| !v.is_object() && !v.is_array())
            .take(EXCERPT_LINES)
            .map(|(k, v)| format!("  {k} = {}", shorten(&v.to_string(), JSON_SCALAR_CHARS)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .take(EXCERPT_LINES)
            .map(|v| format!("  - {}", shorten(&v.to_string(), JSON_SCALAR_CHARS)))
            .collect(),
        scalar => vec![format!("  = {}", shorten(&scalar.to_string(), JSON_SCALAR_CHARS))],
    };

    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    Unit {
        skeleton: Some(skeleton),
        excerpt,
        full: format!("{label}: {pretty}"),
    }
}

fn json_shape(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(items) => format!("array[{}]", items.len()),
        Value::Object(map) => format!("object{{{}}}", map.len()),
    }
}

/// Paragraph-per-unit for plain text.
fn text_units(text: &str) -> Vec<Unit> {
    text.split("\n\n")
        .map(|p| p.trim_matches(&['\n', '\r'][..]))
        .filter(|p| !p.trim().is_empty())
        .map(|paragraph| {
            let lines: Vec<&str> = paragraph.lines().collect();
            Unit {
                skeleton: lines.first().map(|l| l.trim_end().to_string()),
                excerpt: lines
                    .iter()
                    .skip(1)
                    .take(EXCERPT_LINES - 1)
                    .map(|l| l.trim_end().to_string())
                    .collect(),
                full: paragraph.to_string(),
            }
        })
        .collect()
}

fn first_non_blank(lines: &[&str], n: usize) -> Vec<String> {
    lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .take(n)
        .map(|l| l.trim_end().to_string())
        .collect()
}

/// Leading lines of the first paragraph in `lines`.
fn first_paragraph(lines: &[&str], n: usize) -> Vec<String> {
    lines
        .iter()
        .skip_while(|l| l.trim().is_empty())
        .take_while(|l| !l.trim().is_empty())
        .take(n)
        .map(|l| l.trim_end().to_string())
        .collect()
}

fn shorten(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactProvider;
    use crate::context::token::HeuristicEstimator;
    use pretty_assertions::assert_eq;

    const SAMPLE_RS: &str = "//! Budget module.\nuse std::fmt;\n\n/// A budget.\npub struct Budget {\n    capacity: usize,\n    used: usize,\n}\n\nimpl Budget {\n    pub fn new(capacity: usize) -> Self {\n        Self { capacity, used: 0 }\n    }\n\n    pub fn remaining(&self) -> usize {\n        self.capacity - self.used\n    }\n}\n";

    fn builder(provider: MemoryArtifactProvider) -> TieredContextBuilder {
        TieredContextBuilder::new(Arc::new(provider), Arc::new(HeuristicEstimator::default()))
    }

    #[test]
    fn test_tier_parsing_and_ceilings() {
        assert_eq!("tier1".parse::<ContextTier>().unwrap(), ContextTier::Tier1);
        assert_eq!("TIER3".parse::<ContextTier>().unwrap(), ContextTier::Tier3);
        assert!("tier4".parse::<ContextTier>().is_err());
        assert_eq!(ContextTier::Tier1.ceiling(), 1000);
        assert_eq!(ContextTier::Tier2.ceiling(), 5000);
        assert_eq!(ContextTier::Tier3.ceiling(), 20000);
        assert_eq!(ContextTier::Tier2.to_string(), "tier2");
    }

    #[test]
    fn test_kind_detection() {
        assert_eq!(
            ArtifactKind::detect("src/lib.rs"),
            ArtifactKind::Code(Language::Rust)
        );
        assert_eq!(ArtifactKind::detect("docs/PRD.MD"), ArtifactKind::Markdown);
        assert_eq!(ArtifactKind::detect("package.json"), ArtifactKind::Json);
        assert_eq!(ArtifactKind::detect("NOTES"), ArtifactKind::Text);
    }

    #[tokio::test]
    async fn test_tier1_is_signatures_only() {
        let b = builder(MemoryArtifactProvider::new().with("budget.rs", SAMPLE_RS));
        let ctx = b.build("budget.rs", ContextTier::Tier1).await.unwrap();
        assert_eq!(
            ctx.content,
            "pub struct Budget {\nimpl Budget {\n    pub fn new(capacity: usize) -> Self {\n    pub fn remaining(&self) -> usize {"
        );
        assert!(!ctx.truncated);
        assert_eq!(ctx.units_included, 4);
    }

    #[tokio::test]
    async fn test_tier2_adds_excerpts() {
        let b = builder(MemoryArtifactProvider::new().with("budget.rs", SAMPLE_RS));
        let ctx = b.build("budget.rs", ContextTier::Tier2).await.unwrap();
        assert!(ctx.content.contains("pub struct Budget {\n    capacity: usize,"));
        assert!(ctx.content.contains("self.capacity - self.used"));
        assert!(!ctx.content.contains("use std::fmt"));
    }

    #[tokio::test]
    async fn test_tier3_returns_original_when_it_fits() {
        let b = builder(MemoryArtifactProvider::new().with("budget.rs", SAMPLE_RS));
        let ctx = b.build("budget.rs", ContextTier::Tier3).await.unwrap();
        assert_eq!(ctx.content, SAMPLE_RS);
        assert!(!ctx.truncated);
    }

    #[tokio::test]
    async fn test_cap_cuts_between_units() {
        let b = builder(MemoryArtifactProvider::new().with("budget.rs", SAMPLE_RS));
        let ctx = b
            .build_capped("budget.rs", ContextTier::Tier3, 40)
            .await
            .unwrap();
        assert!(ctx.truncated);
        assert!(ctx.tokens <= 40);
        // Content is a whole-unit prefix of the source
        assert!(SAMPLE_RS.starts_with(&ctx.content));
    }

    #[tokio::test]
    async fn test_missing_target_is_not_found() {
        let b = builder(MemoryArtifactProvider::new());
        let err = b.build("gone.rs", ContextTier::Tier1).await.unwrap_err();
        assert!(matches!(err, ContextError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_unreadable() {
        let b = builder(MemoryArtifactProvider::new().with("blob.rs", vec![0xff, 0xfe, 0x00]));
        let err = b.build("blob.rs", ContextTier::Tier2).await.unwrap_err();
        assert!(matches!(err, ContextError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn test_invalid_json_is_unreadable() {
        let b = builder(MemoryArtifactProvider::new().with("cfg.json", "{ not json"));
        let err = b.build("cfg.json", ContextTier::Tier1).await.unwrap_err();
        assert!(matches!(err, ContextError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn test_json_outline() {
        let json = r#"{"name": "app", "scripts": {"build": "tsc", "test": "vitest"}, "files": [1, 2]}"#;
        let b = builder(MemoryArtifactProvider::new().with("package.json", json));
        let ctx = b.build("package.json", ContextTier::Tier1).await.unwrap();
        assert!(ctx.content.contains("\"scripts\": object{2}"));
        assert!(ctx.content.contains("  \"build\": string"));
        assert!(ctx.content.contains("\"files\": array[2]"));
        assert!(!ctx.content.contains("vitest"));

        let ctx = b.build("package.json", ContextTier::Tier2).await.unwrap();
        assert!(ctx.content.contains("build = \"tsc\""));
    }

    #[tokio::test]
    async fn test_markdown_headings_skip_code_fences() {
        let md = "# Title\n\nIntro text.\n\n```sh\n# not a heading\n```\n\n## Goals\n\n- fast\n- small\n";
        let b = builder(MemoryArtifactProvider::new().with("prd.md", md));
        let ctx = b.build("prd.md", ContextTier::Tier1).await.unwrap();
        assert_eq!(ctx.content, "# Title\n## Goals");

        let ctx = b.build("prd.md", ContextTier::Tier2).await.unwrap();
        assert_eq!(ctx.content, "# Title\nIntro text.\n\n## Goals\n- fast\n- small");
    }

    #[tokio::test]
    async fn test_plain_text_paragraphs() {
        let text = "First line of one.\nmore one.\n\nSecond para.\nmore two.\neven more.\nand more.\n";
        let b = builder(MemoryArtifactProvider::new().with("notes.txt", text));
        let ctx = b.build("notes.txt", ContextTier::Tier1).await.unwrap();
        assert_eq!(ctx.content, "First line of one.\nSecond para.");
        assert_eq!(ctx.units_total, 2);
    }

    const APP_TSX: &str = "import React from 'react';\n\nexport const App = () => {\n  const [n, setN] = React.useState(0);\n  return <div>{n}</div>;\n};\n\nexport const helper = (x: number) => x * 2;\n";

    #[tokio::test]
    async fn test_arrow_function_module_outline() {
        let b = builder(MemoryArtifactProvider::new().with("src/App.tsx", APP_TSX));

        let ctx = b.build("src/App.tsx", ContextTier::Tier1).await.unwrap();
        assert_eq!(
            ctx.content,
            "export const App = () => {\nexport const helper = (x: number) => x * 2;"
        );
        assert_eq!(ctx.units_total, 2);
        assert!(!ctx.layer_fallback);

        let ctx = b.build("src/App.tsx", ContextTier::Tier2).await.unwrap();
        assert!(ctx.content.starts_with("export const App = () => {\n  const [n, setN]"));
        assert!(ctx.content.contains("return <div>{n}</div>;"));
        assert!(ctx.content.ends_with("export const helper = (x: number) => x * 2;"));
        assert!(!ctx.layer_fallback);
    }

    #[tokio::test]
    async fn test_file_without_symbols_falls_back_to_richer_layer() {
        let script = "import sys\n\nprint('hello', sys.argv)\nsys.exit(0)\n";
        let b = builder(MemoryArtifactProvider::new().with("run.py", script));
        for tier in [ContextTier::Tier1, ContextTier::Tier2] {
            let ctx = b.build("run.py", tier).await.unwrap();
            assert_eq!(ctx.content, script);
            assert!(ctx.layer_fallback);
            assert!(!ctx.truncated);
        }
    }

    #[tokio::test]
    async fn test_fallback_still_respects_cap() {
        let script: String = (0..200).map(|i| format!("print({i})\n")).collect();
        let b = builder(MemoryArtifactProvider::new().with("run.py", script));
        let ctx = b.build_capped("run.py", ContextTier::Tier1, 50).await.unwrap();
        assert!(!ctx.content.is_empty());
        assert!(ctx.tokens <= 50);
        assert!(ctx.truncated);
        assert!(ctx.layer_fallback);
        assert!(ctx.content.lines().all(|l| l.starts_with("print(")));
    }

    #[tokio::test]
    async fn test_oversized_first_unit_cut_at_line() {
        let body: String = (0..400).map(|i| format!("    let v{i} = {i};\n")).collect();
        let code = format!("fn huge() {{\n{body}}}\n");
        let b = builder(MemoryArtifactProvider::new().with("huge.rs", code.clone()));
        let ctx = b
            .build_capped("huge.rs", ContextTier::Tier3, 100)
            .await
            .unwrap();
        assert!(ctx.truncated);
        assert_eq!(ctx.units_included, 0);
        assert!(ctx.tokens <= 100);
        assert!(ctx.content.lines().all(|l| l == "fn huge() {" || l.ends_with(';')));
    }
}
