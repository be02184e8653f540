//! Common types shared by the decompile workers, the cache and navigation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Flat string-keyed decompiler configuration.
pub type DecompilerOptions = BTreeMap<String, String>;

/// What kind of program element a [`Token`] locates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Class,
    Field,
    Method,
    Parameter,
    Local,
}

/// A named program element located inside generated source text.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character in the source text.
    pub start: usize,
    pub length: usize,
    /// Internal name of the owning class (`pkg/Outer$Inner`).
    pub class_name: String,
    pub declaration: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
}

impl Token {
    pub fn class(start: usize, length: usize, class_name: impl Into<String>, declaration: bool) -> Self {
        Token {
            kind: TokenKind::Class,
            start,
            length,
            class_name: class_name.into(),
            declaration,
            name: None,
            descriptor: None,
        }
    }

    pub fn member(
        kind: TokenKind,
        start: usize,
        length: usize,
        class_name: impl Into<String>,
        declaration: bool,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> Self {
        Token {
            kind,
            start,
            length,
            class_name: class_name.into(),
            declaration,
            name: Some(name.into()),
            descriptor: Some(descriptor.into()),
        }
    }
}

/// Which rendering of a class a result holds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Source,
    Disassembly,
}

impl OutputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputKind::Source => "source",
            OutputKind::Disassembly => "disassembly",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The output of one decompilation (or disassembly) of one class.
///
/// Identity is `(class_name, checksum, kind)`; two results with the same triple
/// are interchangeable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DecompileResult {
    pub class_name: String,
    pub checksum: u32,
    pub source: String,
    pub tokens: Vec<Token>,
    pub kind: OutputKind,
}

impl DecompileResult {
    /// Result for a class the archive does not contain.
    pub fn not_found(class_name: &str, kind: OutputKind) -> Self {
        DecompileResult {
            class_name: class_name.to_string(),
            checksum: 0,
            source: format!("// Class not found: {class_name}"),
            tokens: Vec::new(),
            kind,
        }
    }

    /// Result standing in for a failed engine call.
    pub fn failed(class_name: &str, checksum: u32, kind: OutputKind, message: &str) -> Self {
        let what = match kind {
            OutputKind::Source => "decompilation",
            OutputKind::Disassembly => "bytecode retrieval",
        };
        DecompileResult {
            class_name: class_name.to_string(),
            checksum,
            source: format!("// Error during {what}: {message}"),
            tokens: Vec::new(),
            kind,
        }
    }
}

/// Strip an optional `.class` suffix from an entry or class name.
pub fn strip_class_suffix(name: &str) -> &str {
    name.strip_suffix(".class").unwrap_or(name)
}

/// `true` for inner, local and anonymous classes (`Outer$Inner`).
pub fn is_inner_class(name: &str) -> bool {
    name.contains('$')
}

/// The top-level class that owns `name` (`a/B$C$1` -> `a/B`).
pub fn outer_class(name: &str) -> &str {
    name.split('$').next().unwrap_or(name)
}

// A single path token before `;`, so `import static a.B.c;` never matches.
static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*import[ \t]+([^\s;]+)[ \t]*;").expect("import pattern is valid"));

/// Tokens for non-static, non-wildcard `import` lines of generated Java source.
pub fn import_tokens(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for caps in IMPORT_RE.captures_iter(source) {
        let (Some(line), Some(path)) = (caps.get(0), caps.get(1)) else { continue };
        if path.as_str().ends_with('*') {
            continue;
        }
        let internal = path.as_str().replace('.', "/");
        let simple = internal.rsplit('/').next().unwrap_or(&internal);
        let Some(rel) = line.as_str().rfind(simple) else { continue };
        tokens.push(Token::class(line.start() + rel, simple.len(), internal.clone(), false));
    }
    tokens
}
