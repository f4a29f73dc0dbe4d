//! Escaping of user text for inclusion in document source.

/// Escape `text` so the compiler typesets it literally.
///
/// Every character is mapped exactly once, so the output of one mapping is
/// never re-examined (escaping `\` first and then `{` would otherwise corrupt
/// the `\textbackslash{}` just produced).
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for c in text.chars() {
        match c {
            '\\' => out.push_str(r"\textbackslash{}"),
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\^{}"),
            '%' | '$' | '#' | '&' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}
