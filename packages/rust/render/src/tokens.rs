//! Template tokenizer.
//!
//! A template is split once into literal text and recognised placeholders.
//! Substitution then walks the token list, so replacement text is never
//! scanned for further placeholders.

use std::sync::LazyLock;

use regex::Regex;

/// A placeholder recognised in poster templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Title,
    Authors,
    Affiliations,
    Introduction,
    Methods,
    Results,
    Discussion,
    Conclusion,
    /// Asset path of the figure in the given 1-based slot.
    Figure(usize),
    /// Caption of the figure in the given 1-based slot.
    Caption(usize),
}

impl Placeholder {
    /// Map a token name (the text between `{{` and `}}`) to a placeholder.
    pub fn from_name(name: &str) -> Option<Self> {
        let placeholder = match name {
            "TITLE" => Self::Title,
            "AUTHORS" => Self::Authors,
            "AFFILIATIONS" => Self::Affiliations,
            "INTRODUCTION" => Self::Introduction,
            "METHODS" => Self::Methods,
            "RESULTS" => Self::Results,
            "DISCUSSION" => Self::Discussion,
            "CONCLUSION" => Self::Conclusion,
            "FIGURE_1" => Self::Figure(1),
            "FIGURE_2" => Self::Figure(2),
            "CAPTION_1" => Self::Caption(1),
            "CAPTION_2" => Self::Caption(2),
            _ => return None,
        };
        Some(placeholder)
    }
}

/// One piece of a tokenized template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Literal(&'a str),
    Field(Placeholder),
}

/// Split `source` into literals and recognised placeholders.
///
/// Unknown `{{NAME}}` sequences stay part of the surrounding literal.
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    static PLACEHOLDER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\{\{([A-Z0-9_]+)\}\}").expect("valid regex"));

    let mut tokens = Vec::new();
    let mut literal_start = 0;

    for caps in PLACEHOLDER_RE.captures_iter(source) {
        let Some(placeholder) = Placeholder::from_name(&caps[1]) else {
            continue;
        };
        let whole = caps.get(0).expect("group 0 always matches");
        if whole.start() > literal_start {
            tokens.push(Token::Literal(&source[literal_start..whole.start()]));
        }
        tokens.push(Token::Field(placeholder));
        literal_start = whole.end();
    }

    if literal_start < source.len() {
        tokens.push(Token::Literal(&source[literal_start..]));
    }
    tokens
}
