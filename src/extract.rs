//! Message extraction from mail page snapshots.
//!
//! Scans a page snapshot for message blocks in document order, takes the
//! newest one, and returns its plain-text body with quoted history and the
//! trailing citation line stripped. The selectors are an external,
//! unversioned contract with the mail client, so extraction degrades to
//! `None` on any structural mismatch — it never fails.

use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

use crate::config::PageConfig;

/// Trailing citation line left on sent messages ("On ... wrote:").
fn citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)On .* wrote:").unwrap())
}

/// Compiled CSS selectors for locating messages inside a snapshot.
#[derive(Debug, Clone)]
pub struct Selectors {
    message: Selector,
    body: Selector,
    quote: Selector,
}

impl Selectors {
    pub fn new(config: &PageConfig) -> Result<Self> {
        Ok(Self {
            message: parse_selector(&config.message_selector)?,
            body: parse_selector(&config.body_selector)?,
            quote: parse_selector(&config.quote_selector)?,
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow!("invalid selector '{}': {}", s, e))
}

/// Plain-text body of the newest message, quoted history removed.
///
/// Used to snapshot the incoming message before a send and as the query
/// text for the suggestion pipeline.
pub fn last_incoming(html: &str, selectors: &Selectors) -> Option<String> {
    last_message_text(html, selectors, false)
}

/// Plain-text body of the newest message with the quoted history and the
/// trailing "On ... wrote:" citation removed. Used when the newest message
/// is the user's own freshly-sent reply.
pub fn last_outgoing(html: &str, selectors: &Selectors) -> Option<String> {
    last_message_text(html, selectors, true)
}

fn last_message_text(html: &str, selectors: &Selectors, strip_citation: bool) -> Option<String> {
    let document = Html::parse_document(html);

    let last = document.select(&selectors.message).last()?;
    let body = last.select(&selectors.body).next()?;

    let mut text = element_text(&body);
    if let Some(quoted) = body.select(&selectors.quote).next() {
        let quoted_text = element_text(&quoted);
        if !quoted_text.is_empty() {
            text = text.replacen(&quoted_text, "", 1).trim().to_string();
        }
    }

    if strip_citation {
        text = citation_re().replace(&text, "").trim().to_string();
    }

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Concatenated text content of an element, trimmed. The analog of the
/// page's rendered inner text for our purposes.
fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors() -> Selectors {
        Selectors::new(&PageConfig::default()).unwrap()
    }

    fn thread(messages: &[&str]) -> String {
        let blocks: String = messages
            .iter()
            .map(|body| format!(r#"<div class="adn ads"><div class="a3s">{}</div></div>"#, body))
            .collect();
        format!("<html><body>{}</body></html>", blocks)
    }

    #[test]
    fn no_message_blocks_returns_none() {
        assert_eq!(last_incoming("<html><body></body></html>", &selectors()), None);
        assert_eq!(last_outgoing("", &selectors()), None);
    }

    #[test]
    fn missing_body_returns_none() {
        let html = r#"<html><body><div class="adn ads"><p>no body node</p></div></body></html>"#;
        assert_eq!(last_incoming(html, &selectors()), None);
    }

    #[test]
    fn empty_body_after_stripping_returns_none() {
        let html = thread(&[r#"<div class="gmail_quote">only quoted text</div>"#]);
        assert_eq!(last_incoming(&html, &selectors()), None);
    }

    #[test]
    fn takes_the_last_message_in_document_order() {
        let html = thread(&["first message", "second message", "third message"]);
        assert_eq!(
            last_incoming(&html, &selectors()).as_deref(),
            Some("third message")
        );
    }

    #[test]
    fn strips_quoted_history_from_body() {
        let html = thread(&[
            "old message",
            r#"new reply text<div class="gmail_quote">old message</div>"#,
        ]);
        assert_eq!(
            last_incoming(&html, &selectors()).as_deref(),
            Some("new reply text")
        );
    }

    #[test]
    fn outgoing_strips_citation_line() {
        let html = thread(&["Thanks, will do!\nOn Mon, Jan 5 someone@example.com wrote:"]);
        assert_eq!(
            last_outgoing(&html, &selectors()).as_deref(),
            Some("Thanks, will do!")
        );
    }

    #[test]
    fn citation_strip_is_idempotent() {
        let once = citation_re()
            .replace("Reply body\nOn Tue someone wrote:", "")
            .trim()
            .to_string();
        let twice = citation_re().replace(&once, "").trim().to_string();
        assert_eq!(once, twice);
        assert_eq!(once, "Reply body");
    }

    #[test]
    fn malformed_html_does_not_panic() {
        let html = "<div class=\"adn ads\"><div class=\"a3s\">unclosed <b>tags";
        assert_eq!(
            last_incoming(html, &selectors()).as_deref(),
            Some("unclosed tags")
        );
    }
}
