//! Poster template renderer.
//!
//! [`render`] is a pure function of (template source, input bundle, mode):
//! 1. Declare required packages if the template lacks them
//! 2. For watermarked modes, declare overlay packages and stamp the watermark
//! 3. Substitute placeholders with escaped bundle content
//!
//! Structural edits run before substitution, so user text can never be
//! mistaken for a structural anchor.

pub mod escape;
pub mod preamble;
pub mod tokens;

use posterpress_shared::{InputBundle, RenderMode};

pub use escape::escape_text;
pub use tokens::{Placeholder, Token, tokenize};

/// Directory, relative to the rendered source, holding staged figures.
pub const ASSETS_DIR: &str = "assets";

/// Template integrity failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The template has no `\begin{document}` to anchor the watermark.
    #[error("template has no \\begin{{document}} marker")]
    MissingBodyMarker,

    /// A package must be declared but the template has no `\documentclass` line.
    #[error("template has no \\documentclass line to anchor package declarations")]
    MissingPreambleAnchor,
}

/// Render a template into final document source.
pub fn render(
    template: &str,
    bundle: &InputBundle,
    mode: RenderMode,
) -> Result<String, RenderError> {
    let mut source = preamble::ensure_packages(template, preamble::REQUIRED_PACKAGES)?;

    if mode.is_watermarked() {
        source = preamble::ensure_packages(&source, preamble::WATERMARK_PACKAGES)?;
        source = preamble::inject_watermark(&source)?;
    }

    let mut out = String::with_capacity(source.len() + 1024);
    for token in tokenize(&source) {
        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Field(placeholder) => out.push_str(&field_value(bundle, placeholder)),
        }
    }
    Ok(out)
}

/// The already-escaped text that replaces `placeholder`.
fn field_value(bundle: &InputBundle, placeholder: Placeholder) -> String {
    let sections = &bundle.sections;
    match placeholder {
        Placeholder::Title => escape_text(&bundle.title),
        Placeholder::Authors => escape_list(&bundle.authors),
        Placeholder::Affiliations => escape_list(&bundle.affiliations),
        Placeholder::Introduction => escape_text(&sections.introduction),
        Placeholder::Methods => escape_text(&sections.methods),
        Placeholder::Results => escape_text(&sections.results),
        Placeholder::Discussion => escape_text(&sections.discussion),
        Placeholder::Conclusion => escape_text(&sections.conclusion),
        Placeholder::Figure(slot) => slot_figure(bundle, slot)
            .and_then(|figure| figure.asset_file_name(slot))
            .map(|name| format!("{ASSETS_DIR}/{name}"))
            .unwrap_or_default(),
        Placeholder::Caption(slot) => slot_figure(bundle, slot)
            .map(|figure| escape_text(&figure.caption))
            .unwrap_or_default(),
    }
}

fn slot_figure(bundle: &InputBundle, slot: usize) -> Option<&posterpress_shared::Figure> {
    slot.checked_sub(1)
        .and_then(|idx| bundle.slotted_figures().get(idx))
}

fn escape_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| escape_text(item))
        .collect::<Vec<_>>()
        .join(", ")
}
