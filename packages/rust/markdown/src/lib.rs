//! Markdown-to-block conversion.
//!
//! Turns generated Markdown into the flat sequence of [`ContentBlock`]s a
//! document sink understands. Parsing goes through a closed [`Node`] tree;
//! only headings, paragraphs, list items and code blocks survive, everything
//! else is dropped. The conversion is pure and deterministic.

mod tree;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use tree::{Node, parse};

/// Upper bound on the characters of any single block's text.
pub const MAX_BLOCK_TEXT_CHARS: usize = 2000;

/// Language used when a code block has none or an unknown one.
pub const PLAIN_TEXT: &str = "plain text";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Bullet style of a list item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStyle {
    Bulleted,
    Numbered,
}

/// One typed unit of structured document output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Level is always within 1..=3.
    Heading { level: u8, text: String },
    Paragraph { text: String },
    ListItem { style: ListStyle, text: String },
    Code { language: String, text: String },
}

impl ContentBlock {
    pub fn text(&self) -> &str {
        match self {
            Self::Heading { text, .. }
            | Self::Paragraph { text }
            | Self::ListItem { text, .. }
            | Self::Code { text, .. } => text,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Convert Markdown into content blocks, in document order.
pub fn markdown_to_blocks(markdown: &str) -> Vec<ContentBlock> {
    let nodes = parse(markdown);
    let mut blocks = Vec::new();

    for node in &nodes {
        match node {
            Node::Heading { level, children } => blocks.push(ContentBlock::Heading {
                level: (*level).clamp(1, 3),
                text: clip(inline_text(children).trim()),
            }),
            Node::Paragraph(children) => {
                let text = inline_text(children);
                let text = text.trim();
                if !text.is_empty() {
                    blocks.push(ContentBlock::Paragraph { text: clip(text) });
                }
            }
            Node::List { ordered, items } => {
                let style = if *ordered {
                    ListStyle::Numbered
                } else {
                    ListStyle::Bulleted
                };
                for item in items {
                    if let Node::Item(children) = item {
                        blocks.push(ContentBlock::ListItem {
                            style,
                            text: clip(&block_text(children)),
                        });
                    }
                }
            }
            Node::CodeBlock { info, text } => blocks.push(ContentBlock::Code {
                language: info
                    .as_deref()
                    .map(normalize_language)
                    .unwrap_or_else(|| PLAIN_TEXT.to_string()),
                text: clip(text),
            }),
            _ => {}
        }
    }

    debug!(blocks = blocks.len(), "markdown converted");
    blocks
}

/// Concatenate every text leaf under `nodes`.
fn inline_text(nodes: &[Node]) -> String {
    let mut out = String::new();
    collect_inline(nodes, &mut out);
    out
}

fn collect_inline(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(t) | Node::Code(t) => out.push_str(t),
            Node::SoftBreak => out.push(' '),
            Node::HardBreak => out.push('\n'),
            Node::CodeBlock { text, .. } => out.push_str(text),
            Node::Heading { children, .. }
            | Node::Paragraph(children)
            | Node::Item(children)
            | Node::BlockQuote(children)
            | Node::Inline(children)
            | Node::Other(children) => collect_inline(children, out),
            Node::List { items, .. } => collect_inline(items, out),
            Node::Rule => {}
        }
    }
}

/// Text of a list item: runs of inline leaves form one line, each block
/// child its own line.
fn block_text(nodes: &[Node]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut run: Vec<Node> = Vec::new();

    for node in nodes {
        if !node.is_block() {
            run.push(node.clone());
            continue;
        }
        flush(&mut run, &mut lines);
        match node {
            Node::List { items, .. } => {
                for item in items {
                    if let Node::Item(children) = item {
                        lines.push(block_text(children));
                    }
                }
            }
            Node::Item(children) => lines.push(block_text(children)),
            other => lines.push(inline_text(std::slice::from_ref(other)).trim().to_string()),
        }
    }
    flush(&mut run, &mut lines);

    lines.retain(|l| !l.is_empty());
    lines.join("\n")
}

fn flush(run: &mut Vec<Node>, lines: &mut Vec<String>) {
    if !run.is_empty() {
        lines.push(inline_text(run).trim().to_string());
        run.clear();
    }
}

/// Truncate to [`MAX_BLOCK_TEXT_CHARS`] without splitting a character.
fn clip(text: &str) -> String {
    match text.char_indices().nth(MAX_BLOCK_TEXT_CHARS) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Code languages
// ---------------------------------------------------------------------------

/// Languages a code block may carry.
const LANGUAGES: &[&str] = &[
    "abap", "arduino", "bash", "basic", "c", "clojure", "coffeescript", "c++", "c#", "css",
    "dart", "diff", "docker", "elixir", "elm", "erlang", "flow", "fortran", "f#", "gherkin",
    "glsl", "go", "graphql", "groovy", "haskell", "html", "java", "javascript", "json", "julia",
    "kotlin", "latex", "less", "lisp", "livescript", "lua", "makefile", "markdown", "markup",
    "matlab", "mermaid", "nix", "objective-c", "ocaml", "pascal", "perl", "php", "plain text",
    "powershell", "prolog", "protobuf", "python", "r", "reason", "ruby", "rust", "sass",
    "scala", "scheme", "scss", "shell", "sql", "swift", "typescript", "vb.net", "verilog",
    "vhdl", "visual basic", "webassembly", "xml", "yaml",
];

const ALIASES: &[(&str, &str)] = &[
    ("py", "python"),
    ("python3", "python"),
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("node", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("sh", "shell"),
    ("zsh", "shell"),
    ("console", "shell"),
    ("shell-session", "shell"),
    ("rs", "rust"),
    ("yml", "yaml"),
    ("cpp", "c++"),
    ("cc", "c++"),
    ("cs", "c#"),
    ("csharp", "c#"),
    ("fsharp", "f#"),
    ("golang", "go"),
    ("dockerfile", "docker"),
    ("md", "markdown"),
    ("rb", "ruby"),
    ("kt", "kotlin"),
    ("ps1", "powershell"),
    ("pwsh", "powershell"),
    ("objc", "objective-c"),
    ("tex", "latex"),
    ("proto", "protobuf"),
    ("wasm", "webassembly"),
    ("make", "makefile"),
    ("htm", "html"),
    ("text", PLAIN_TEXT),
    ("txt", PLAIN_TEXT),
    ("plaintext", PLAIN_TEXT),
    ("plain", PLAIN_TEXT),
];

/// Map a fence info string onto a supported language.
///
/// Only the first word counts; unknown languages become [`PLAIN_TEXT`].
pub fn normalize_language(info: &str) -> String {
    let Some(word) = info.split_whitespace().next() else {
        return PLAIN_TEXT.to_string();
    };
    let word = word
        .trim_matches(|c: char| c == '{' || c == '}' || c == '.')
        .split(',')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    if LANGUAGES.contains(&word.as_str()) {
        return word;
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == word)
        .map(|(_, lang)| lang.to_string())
        .unwrap_or_else(|| PLAIN_TEXT.to_string())
}

// ---------------------------------------------------------------------------
// Title extraction
// ---------------------------------------------------------------------------

static H1_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#[ \t]+(.+?)[ \t#]*$").expect("valid regex"));

/// Text of the first level-1 heading, if any.
pub fn extract_title(markdown: &str) -> Option<String> {
    H1_RE
        .captures(markdown)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}
