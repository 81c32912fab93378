//! Plain-text extraction from inbound message markup.
//!
//! Inbound PM bodies carry a small HTML-like markup: a `<nCOLOR/>` name tag,
//! `<g ...>` font tags, `<br/>` line breaks and HTML entities. Only the plain
//! text and the two style attributes are kept; everything else is dropped.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static NAME_TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"<n(.*?)/>"));
static FONT_TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"<g(.*?)>"));
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"<([^<>]*)>"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("markup pattern is valid")
}

/// Result of cleaning one message body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CleanMessage {
    /// Text with all markup removed and entities decoded.
    pub text: String,
    /// Contents of the `<n.../>` tag (name colour), empty if absent.
    pub name_color: String,
    /// Contents of the first `<g...>` tag (font spec), empty if absent.
    pub font: String,
}

/// Extract plain text, name colour and font spec from a PM body.
#[must_use]
pub fn clean_message(raw: &str) -> CleanMessage {
    let name_color = first_group(&NAME_TAG, raw);
    let font = first_group(&FONT_TAG, raw);

    let without_fonts = FONT_TAG.replace_all(raw, "");
    let without_names = NAME_TAG.replace_all(&without_fonts, "");
    let stripped = strip_html(&without_names);
    let text = html_escape::decode_html_entities(&stripped).replace('\r', "\n");

    CleanMessage {
        text,
        name_color,
        font,
    }
}

fn first_group(re: &Regex, s: &str) -> String {
    re.captures(s)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Drop all remaining tags; `<br...>` becomes a newline. A stray `<` with
/// no closing `>` is dropped and its text kept.
fn strip_html(s: &str) -> String {
    ANY_TAG
        .replace_all(s, |caps: &Captures<'_>| if caps[1].starts_with("br") { "\n" } else { "" })
        .replace('<', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_text_and_styles() {
        let raw = r#"<n0a0/><m v="1"><g x11s000="0">hello &amp; welcome</g></m>"#;
        let msg = clean_message(raw);
        assert_eq!(msg.text, "hello & welcome");
        assert_eq!(msg.name_color, "0a0");
        assert_eq!(msg.font, r#" x11s000="0""#);
    }

    #[test]
    fn test_plain_body_is_untouched() {
        let msg = clean_message("just text");
        assert_eq!(msg.text, "just text");
        assert!(msg.name_color.is_empty());
        assert!(msg.font.is_empty());
    }

    #[test]
    fn test_line_breaks() {
        assert_eq!(clean_message("a<br/>b\rc").text, "a\nb\nc");
    }

    #[test]
    fn test_entities() {
        assert_eq!(
            clean_message("&lt;b&gt; &#39;x&#x41; &bogus; & done").text,
            "<b> 'xA &bogus; & done"
        );
    }

    #[test]
    fn test_named_entities_beyond_the_basic_set() {
        assert_eq!(clean_message("caf&eacute; &hearts; &copy;").text, "caf\u{e9} \u{2665} \u{a9}");
    }

    #[test]
    fn test_every_font_and_name_tag_is_removed() {
        let raw = r#"<n123/><g x9s111="a">one</g><g x10s222="b">two</g>"#;
        let msg = clean_message(raw);
        assert_eq!(msg.text, "onetwo");
        assert_eq!(msg.font, r#" x9s111="a""#);
        assert_eq!(msg.name_color, "123");
    }

    #[test]
    fn test_unterminated_tag_keeps_text() {
        assert_eq!(strip_html("a <b"), "a b");
        assert_eq!(strip_html("a<b<c>d"), "abd");
    }
}
