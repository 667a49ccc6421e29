use ammonia::Builder;
use pulldown_cmark::{html, Options, Parser};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn code_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[\s\S]*?```").expect("static regex"))
}

fn blank_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t]*\n").expect("static regex"))
}

/// Escapes every HTML tag outside fenced code blocks, which are kept as is.
/// Existing entities are decoded first so re-saving does not double-escape.
pub fn sanitize_markdown_content(markdown_input: &str) -> String {
    let mut code_blocks: Vec<String> = Vec::new();

    let with_placeholders = code_block_regex().replace_all(markdown_input, |caps: &regex::Captures| {
        code_blocks.push(caps[0].to_string());
        format!("__CODE_BLOCK_PLACEHOLDER_{}__", code_blocks.len() - 1)
    });

    let decoded = html_escape::decode_html_entities(&with_placeholders);
    let mut final_output = html_escape::encode_text(&decoded).to_string();

    for (i, block) in code_blocks.iter().enumerate() {
        let placeholder = format!("__CODE_BLOCK_PLACEHOLDER_{}__", i);
        final_output = final_output.replacen(&placeholder, block, 1);
    }
    final_output
}

/// Strips all HTML tags from input (titles, names, short fields).
pub fn strip_all_html(input: &str) -> String {
    Builder::new().tags(HashSet::new()).clean(input).to_string()
}

/// Renders a stored article body to HTML that is safe to embed.
pub fn render_article_html(body: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(body, options);
    let mut unsafe_html = String::new();
    html::push_html(&mut unsafe_html, parser);

    let tags: HashSet<&str> = [
        "h2", "h3", "h4", "b", "strong", "i", "em", "p", "br", "a", "ul", "ol", "li", "blockquote", "code",
        "pre", "hr", "img", "table", "thead", "tbody", "tr", "th", "td", "del",
    ]
    .into_iter()
    .collect();
    let attributes: HashSet<&str> = ["src", "href", "alt", "title"].into_iter().collect();

    Builder::new()
        .tags(tags)
        .generic_attributes(attributes)
        .link_rel(Some("nofollow noopener"))
        .clean(&unsafe_html)
        .to_string()
}

/// Splits a body into trimmed, non-empty paragraphs at blank lines.
pub fn split_paragraphs(body: &str) -> Vec<String> {
    let normalized = body.replace("\r\n", "\n");
    blank_line_regex()
        .split(&normalized)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// First paragraph as plain text, cut at a word boundary to `max_chars`.
pub fn derive_excerpt(body: &str, max_chars: usize) -> String {
    let first = split_paragraphs(body).into_iter().next().unwrap_or_default();
    let plain = strip_all_html(&html_escape::decode_html_entities(&first));
    if plain.chars().count() <= max_chars {
        return plain;
    }
    let cut: String = plain.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(idx) if idx > 0 => format!("{}…", cut[..idx].trim_end()),
        _ => format!("{}…", cut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html_but_keeps_code_blocks() {
        let input = "Hati-hati <script>alert(1)</script>\n```\n<b>kode</b>\n```";
        let out = sanitize_markdown_content(input);
        assert!(out.contains("&lt;script&gt;"));
        assert!(out.contains("```\n<b>kode</b>\n```"));
        assert_eq!(sanitize_markdown_content(&out), out);
    }

    #[test]
    fn strips_tags_from_short_fields() {
        assert_eq!(strip_all_html("<b>Kerja</b> Bakti"), "Kerja Bakti");
    }

    #[test]
    fn rendered_html_drops_scripts() {
        let html = render_article_html("Paragraf **satu**.\n\n<script>x()</script>\n\n[tautan](javascript:alert(1))");
        assert!(html.contains("<strong>satu</strong>"));
        assert!(!html.contains("<script"));
        assert!(!html.contains("javascript:"));
    }

    #[test]
    fn splits_on_blank_lines() {
        let body = "Pertama.\r\n\r\nKedua\nmasih kedua.\n  \n\n Ketiga. ";
        assert_eq!(split_paragraphs(body), vec!["Pertama.", "Kedua\nmasih kedua.", "Ketiga."]);
        assert!(split_paragraphs("  \n\n ").is_empty());
    }

    #[test]
    fn excerpt_cuts_at_word_boundary() {
        assert_eq!(derive_excerpt("Warga desa berkumpul di balai.\n\nLainnya.", 18), "Warga desa…");
        assert_eq!(derive_excerpt("Singkat.", 50), "Singkat.");
    }
}
