//! Structural edits to the template: package declarations and the preview
//! watermark.
//!
//! All edits are idempotent with respect to packages: a package already
//! declared anywhere in the preamble is never declared again.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::RenderError;

/// Packages every poster needs.
pub const REQUIRED_PACKAGES: &[&str] = &["graphicx"];

/// Packages the preview watermark needs.
pub const WATERMARK_PACKAGES: &[&str] = &["tikz"];

/// Text stamped across preview pages.
pub const WATERMARK_TEXT: &str = "PREVIEW";

/// Packages declared by `\usepackage` lines that are not commented out.
pub fn declared_packages(source: &str) -> BTreeSet<String> {
    static USEPACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^[^%\n]*?\\usepackage\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}")
            .expect("valid regex")
    });

    USEPACKAGE_RE
        .captures_iter(source)
        .flat_map(|caps| {
            caps[1]
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Declare each of `packages` that the source does not already declare,
/// right after the `\documentclass` line.
pub fn ensure_packages(source: &str, packages: &[&str]) -> Result<String, RenderError> {
    static DOCUMENTCLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^[^%\n]*\\documentclass\b[^\n]*$").expect("valid regex")
    });

    let declared = declared_packages(source);
    let missing: Vec<&str> = packages
        .iter()
        .copied()
        .filter(|p| !declared.contains(*p))
        .collect();

    if missing.is_empty() {
        return Ok(source.to_string());
    }

    let anchor = DOCUMENTCLASS_RE
        .find(source)
        .ok_or(RenderError::MissingPreambleAnchor)?;

    let mut injected = String::new();
    for package in &missing {
        injected.push_str("\n\\usepackage{");
        injected.push_str(package);
        injected.push('}');
    }
    tracing::debug!(packages = ?missing, "injecting package declarations");

    let mut out = String::with_capacity(source.len() + injected.len());
    out.push_str(&source[..anchor.end()]);
    out.push_str(&injected);
    out.push_str(&source[anchor.end()..]);
    Ok(out)
}

/// Insert the diagonal preview overlay immediately after `\begin{document}`.
pub fn inject_watermark(source: &str) -> Result<String, RenderError> {
    static BEGIN_DOCUMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^[^%\n]*?\\begin\s*\{document\}").expect("valid regex")
    });

    let marker = BEGIN_DOCUMENT_RE
        .find(source)
        .ok_or(RenderError::MissingBodyMarker)?;

    let overlay = format!(
        "\n\\begin{{tikzpicture}}[remember picture,overlay]\n\
         \\node[rotate=45,scale=12,text opacity=0.15,gray] at (current page.center) {{{WATERMARK_TEXT}}};\n\
         \\end{{tikzpicture}}"
    );

    let mut out = String::with_capacity(source.len() + overlay.len());
    out.push_str(&source[..marker.end()]);
    out.push_str(&overlay);
    out.push_str(&source[marker.end()..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARE: &str = "\\documentclass[a0paper]{article}\n\\begin{document}\nBody\n\\end{document}\n";

    #[test]
    fn declared_packages_handles_options_lists_and_comments() {
        let src = "\\usepackage[utf8]{inputenc}\n\\usepackage{amsmath, graphicx}\n% \\usepackage{tikz}\n";
        let declared = declared_packages(src);
        assert!(declared.contains("inputenc"));
        assert!(declared.contains("amsmath"));
        assert!(declared.contains("graphicx"));
        assert!(!declared.contains("tikz"));
    }

    #[test]
    fn missing_package_is_injected_once_after_documentclass() {
        let out = ensure_packages(BARE, REQUIRED_PACKAGES).unwrap();
        assert_eq!(out.matches("\\usepackage{graphicx}").count(), 1);
        assert!(out.starts_with("\\documentclass[a0paper]{article}\n\\usepackage{graphicx}\n"));

        let again = ensure_packages(&out, REQUIRED_PACKAGES).unwrap();
        assert_eq!(again, out);
    }

    #[test]
    fn existing_package_is_not_duplicated() {
        let src = "\\documentclass{article}\n\\usepackage[final]{graphicx}\n\\begin{document}\n\\end{document}\n";
        let out = ensure_packages(src, REQUIRED_PACKAGES).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn missing_anchor_only_matters_when_injecting() {
        let no_class = "\\usepackage{graphicx}\n\\begin{document}\n\\end{document}\n";
        assert_eq!(ensure_packages(no_class, REQUIRED_PACKAGES).unwrap(), no_class);
        assert_eq!(
            ensure_packages("\\begin{document}\n", REQUIRED_PACKAGES),
            Err(RenderError::MissingPreambleAnchor)
        );
    }

    #[test]
    fn watermark_follows_body_marker() {
        let out = inject_watermark(BARE).unwrap();
        let marker = out.find("\\begin{document}").unwrap();
        let overlay = out.find("\\begin{tikzpicture}").unwrap();
        assert!(overlay > marker);
        assert!(out[marker..overlay].trim() == "\\begin{document}");
        assert!(out.contains("{PREVIEW}"));
    }

    #[test]
    fn watermark_without_body_marker_fails() {
        assert_eq!(
            inject_watermark("\\documentclass{article}\n"),
            Err(RenderError::MissingBodyMarker)
        );
    }
}
