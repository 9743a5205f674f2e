use once_cell::sync::Lazy;
use pulldown_cmark::{html, CowStr, Event, Options, Parser};
use regex::Regex;

const WRAPPER_OPEN: &str = r#"<span style="font-family: Helvetica">"#;
const WRAPPER_CLOSE: &str = "</span>";

// Inline styling spans are the only raw HTML allowed through.
static SPAN_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^<span(?:\s+style\s*=\s*"([^"<>]*)")?\s*>$"#).unwrap());
static SPAN_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^</span\s*>$").unwrap());
static ACTIVE_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)url\s*\(|expression\s*\(|javascript:").unwrap());

/// Render message text to the HTML shown in the conversation and written to
/// the transcript.
///
/// Worker output is untrusted, so any raw HTML other than a plain styling
/// `<span>` is escaped and shows up as literal text.
pub fn render(text: &str) -> String {
    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES;
    let parser = Parser::new_ext(text, options).map(|event| match event {
        Event::Html(raw) => neutralize(raw),
        other => other,
    });

    let mut body = String::new();
    html::push_html(&mut body, parser);

    let mut out = String::with_capacity(body.len() + WRAPPER_OPEN.len() + WRAPPER_CLOSE.len());
    out.push_str(WRAPPER_OPEN);
    out.push_str(body.trim_end());
    out.push_str(WRAPPER_CLOSE);
    out
}

fn neutralize(raw: CowStr<'_>) -> Event<'_> {
    if is_permitted(raw.trim()) {
        Event::Html(raw)
    } else {
        Event::Text(raw)
    }
}

fn is_permitted(tag: &str) -> bool {
    if SPAN_CLOSE.is_match(tag) {
        return true;
    }
    match SPAN_OPEN.captures(tag) {
        Some(caps) => caps
            .get(1)
            .map_or(true, |style| !ACTIVE_STYLE.is_match(style.as_str())),
        None => false,
    }
}
