//! Web page fetching and content extraction.
//!
//! Fetching walks a ladder of header profiles from full-browser to
//! minimal, each with its own timeout; content extraction prefers
//! structured data over semantic containers over scored paragraphs, with
//! brute-force tag stripping as the last resort.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};

use crate::error::{FetchClass, PipelineError};
use crate::sanitize::{clean_text, collapse_whitespace};

/// Fetch and extraction limits.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Timeout applied to each header-profile attempt.
    pub attempt_timeout: Duration,
    /// Minimum characters before an extraction tier is accepted.
    pub min_content_chars: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(12),
            min_content_chars: 200,
        }
    }
}

/// Extracted page content plus bookkeeping.
#[derive(Debug, Clone)]
pub struct WebPage {
    /// Cleaned page text.
    pub text: String,
    /// Page title when one was found.
    pub title: Option<String>,
    /// Which extraction tier produced the text.
    pub strategy: &'static str,
}

struct Profile {
    name: &'static str,
    client: Client,
}

/// Fetches pages through fallback header profiles and extracts article
/// content from the HTML.
pub struct WebExtractor {
    profiles: Vec<Profile>,
    min_content_chars: usize,
}

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const LEGACY_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) Gecko/20100101 Firefox/115.0";
const MINIMAL_UA: &str = "Mozilla/5.0 (compatible; textmill/0.1)";

impl WebExtractor {
    /// Builds the profile ladder.
    pub fn new(config: &WebConfig) -> Result<Self> {
        let profiles = vec![
            Profile {
                name: "desktop",
                client: build_client(DESKTOP_UA, true, config.attempt_timeout)?,
            },
            Profile {
                name: "legacy",
                client: build_client(LEGACY_UA, true, config.attempt_timeout)?,
            },
            Profile {
                name: "minimal",
                client: build_client(MINIMAL_UA, false, config.attempt_timeout)?,
            },
        ];
        Ok(Self {
            profiles,
            min_content_chars: config.min_content_chars,
        })
    }

    /// Fetches a URL and extracts its main content.
    ///
    /// Profiles are tried in order until one returns a success status;
    /// exhausting the ladder yields one aggregated error classified by
    /// cause, never a pile of separate failures.
    pub fn extract(&self, url: &str) -> Result<WebPage, PipelineError> {
        let mut failures: Vec<(&'static str, FetchClass, String)> = Vec::new();
        for profile in &self.profiles {
            match profile.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let html_like = resp
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|value| value.to_str().ok())
                            .map(|value| value.contains("html"))
                            .unwrap_or(true);
                        let body = resp.text().map_err(|err| PipelineError::Fetch {
                            class: FetchClass::Unknown,
                            attempts: failures.len() + 1,
                            detail: format!("failed to read body: {err}"),
                        })?;
                        if !html_like {
                            return Ok(WebPage {
                                text: clean_text(&body),
                                title: None,
                                strategy: "raw",
                            });
                        }
                        return extract_from_html(&body, self.min_content_chars);
                    }
                    let class = classify_status(status);
                    tracing::debug!(profile = profile.name, %status, url, "fetch attempt rejected");
                    failures.push((profile.name, class, format!("HTTP {status}")));
                }
                Err(err) => {
                    let class = classify_error(&err);
                    tracing::debug!(profile = profile.name, error = %err, url, "fetch attempt failed");
                    failures.push((profile.name, class, err.to_string()));
                }
            }
        }

        let classes: Vec<FetchClass> = failures.iter().map(|(_, class, _)| *class).collect();
        let detail = failures
            .iter()
            .map(|(name, _, detail)| format!("{name}: {detail}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(PipelineError::Fetch {
            class: aggregate(&classes),
            attempts: failures.len(),
            detail,
        })
    }
}

fn build_client(user_agent: &str, browser_headers: bool, timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).context("invalid user agent")?,
    );
    if browser_headers {
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    }
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .context("failed to build fetch client")
}

fn classify_status(status: StatusCode) -> FetchClass {
    match status.as_u16() {
        401 | 403 => FetchClass::Blocked,
        404 | 410 => FetchClass::NotFound,
        500..=599 => FetchClass::Upstream,
        _ => FetchClass::Unknown,
    }
}

fn classify_error(err: &reqwest::Error) -> FetchClass {
    if err.is_timeout() {
        return FetchClass::Timeout;
    }
    let text = err.to_string().to_ascii_lowercase();
    if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
        FetchClass::Tls
    } else {
        FetchClass::Unknown
    }
}

/// Collapses per-attempt causes into one classification: a unanimous
/// cause wins outright, otherwise the most frequent wins with ties broken
/// by severity.
pub(crate) fn aggregate(classes: &[FetchClass]) -> FetchClass {
    const ORDER: [FetchClass; 6] = [
        FetchClass::Blocked,
        FetchClass::Timeout,
        FetchClass::NotFound,
        FetchClass::Tls,
        FetchClass::Upstream,
        FetchClass::Unknown,
    ];
    let mut best = FetchClass::Unknown;
    let mut best_count = 0usize;
    for candidate in ORDER {
        let count = classes.iter().filter(|&&class| class == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

struct PageSelectors {
    json_ld: Selector,
    title: Selector,
    meta_description: Selector,
    og: Selector,
    containers: Vec<Selector>,
    paragraph: Selector,
    anchor: Selector,
    body: Selector,
}

fn selectors() -> &'static PageSelectors {
    static SELECTORS: OnceLock<PageSelectors> = OnceLock::new();
    SELECTORS.get_or_init(|| PageSelectors {
        json_ld: selector(r#"script[type="application/ld+json"]"#),
        title: selector("title"),
        meta_description: selector(r#"meta[name="description"]"#),
        og: selector("meta[property]"),
        containers: vec![
            selector("article"),
            selector("main"),
            selector(r#"[role="main"]"#),
        ],
        paragraph: selector("p"),
        anchor: selector("a"),
        body: selector("body"),
    })
}

fn boilerplate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(nav|menu|footer|header|cookie|banner|advert|\bads?\b|promo|sidebar|share|social|comment|subscribe|related|breadcrumb)",
        )
        .expect("boilerplate regex")
    })
}

/// Extracts article content from raw HTML, walking the tier ladder.
pub(crate) fn extract_from_html(html: &str, min_chars: usize) -> Result<WebPage, PipelineError> {
    let document = Html::parse_document(html);
    let sel = selectors();
    let title = page_title(&document);

    if let Some(body) = json_ld_article_body(&document) {
        let text = clean_text(&body);
        if text.chars().count() >= min_chars {
            return Ok(WebPage {
                text,
                title,
                strategy: "json-ld",
            });
        }
    }

    if let Some(description) = meta_description(&document) {
        let text = clean_text(&description);
        if text.chars().count() >= min_chars {
            return Ok(WebPage {
                text,
                title,
                strategy: "meta-description",
            });
        }
    }

    for container_sel in &sel.containers {
        if let Some(container) = document.select(container_sel).next() {
            let text = collect_blocks(container);
            if text.chars().count() >= min_chars {
                return Ok(WebPage {
                    text,
                    title,
                    strategy: "semantic",
                });
            }
        }
    }

    let scored = scored_paragraphs(&document);
    if scored.chars().count() >= min_chars {
        return Ok(WebPage {
            text: scored,
            title,
            strategy: "scored",
        });
    }

    // Last resort: strip every tag under body.
    if let Some(body) = document.select(&sel.body).next() {
        let text = collapse_whitespace(&body.text().collect::<String>());
        if text.chars().count() >= 50 {
            return Ok(WebPage {
                text,
                title,
                strategy: "stripped",
            });
        }
    }

    Err(PipelineError::ContentQuality {
        detail: "page yielded no usable content in any extraction tier".to_string(),
    })
}

fn page_title(document: &Html) -> Option<String> {
    let sel = selectors();
    if let Some(el) = document.select(&sel.title).next() {
        let title = collapse_whitespace(&el.text().collect::<String>());
        if !title.is_empty() {
            return Some(title);
        }
    }
    document.select(&sel.og).find_map(|el| {
        let value = el.value();
        if value.attr("property") == Some("og:title") {
            value.attr("content").map(|c| collapse_whitespace(c))
        } else {
            None
        }
    })
}

fn meta_description(document: &Html) -> Option<String> {
    let sel = selectors();
    let named = document
        .select(&sel.meta_description)
        .find_map(|el| el.value().attr("content").map(str::to_string));
    if named.is_some() {
        return named;
    }
    document.select(&sel.og).find_map(|el| {
        let value = el.value();
        if value.attr("property") == Some("og:description") {
            value.attr("content").map(str::to_string)
        } else {
            None
        }
    })
}

fn json_ld_article_body(document: &Html) -> Option<String> {
    let sel = selectors();
    for script in document.select(&sel.json_ld) {
        let raw: String = script.text().collect();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        if let Some(body) = find_article_body(&value) {
            return Some(body);
        }
    }
    None
}

fn find_article_body(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(body) = map.get("articleBody").and_then(|v| v.as_str()) {
                if !body.trim().is_empty() {
                    return Some(body.to_string());
                }
            }
            if let Some(graph) = map.get("@graph") {
                return find_article_body(graph);
            }
            None
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_article_body),
        _ => None,
    }
}

const BLOCK_TAGS: [&str; 10] = [
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre",
];
const SKIP_TAGS: [&str; 9] = [
    "script", "style", "template", "noscript", "svg", "nav", "footer", "aside", "form",
];

fn collect_blocks(root: ElementRef<'_>) -> String {
    let mut blocks: Vec<String> = Vec::new();
    for node in root.descendants() {
        let Some(element) = ElementRef::wrap(node) else {
            continue;
        };
        let tag = element.value().name();
        if !BLOCK_TAGS.contains(&tag) {
            continue;
        }
        if has_skipped_ancestor(element, root) {
            continue;
        }
        let text = collapse_whitespace(&element.text().collect::<String>());
        if !text.is_empty() {
            blocks.push(text);
        }
    }
    blocks.join("\n\n")
}

fn has_skipped_ancestor(element: ElementRef<'_>, root: ElementRef<'_>) -> bool {
    for node in element.ancestors() {
        if node.id() == root.id() {
            break;
        }
        if let Some(ancestor) = ElementRef::wrap(node) {
            if SKIP_TAGS.contains(&ancestor.value().name()) {
                return true;
            }
        }
    }
    false
}

/// Paragraph scoring: reward length and sentence structure, discount
/// navigation/ad/cookie boilerplate and link-dense blocks.
fn scored_paragraphs(document: &Html) -> String {
    let sel = selectors();
    let mut kept: Vec<String> = Vec::new();
    for paragraph in document.select(&sel.paragraph) {
        let text = collapse_whitespace(&paragraph.text().collect::<String>());
        let chars = text.chars().count();
        if chars == 0 {
            continue;
        }
        let sentences = text.matches(". ").count() + text.matches("! ").count()
            + text.matches("? ").count()
            + 1;
        let mut score = chars as f32 + 15.0 * sentences as f32;

        if is_boilerplate(paragraph) {
            score /= 4.0;
        }
        let link_chars: usize = paragraph
            .select(&sel.anchor)
            .map(|a| a.text().collect::<String>().chars().count())
            .sum();
        if chars > 0 && link_chars as f32 / chars as f32 > 0.5 {
            score /= 4.0;
        }

        if score >= 120.0 {
            kept.push(text);
        }
    }
    kept.join("\n\n")
}

fn is_boilerplate(element: ElementRef<'_>) -> bool {
    let re = boilerplate_re();
    for node in element.ancestors().chain(std::iter::once(*element)) {
        if let Some(ancestor) = ElementRef::wrap(node) {
            let value = ancestor.value();
            let class = value.attr("class").unwrap_or_default();
            let id = value.attr("id").unwrap_or_default();
            if re.is_match(class) || re.is_match(id) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_forbidden_attempts_aggregate_as_blocked() {
        let classes = [FetchClass::Blocked, FetchClass::Blocked, FetchClass::Blocked];
        assert_eq!(aggregate(&classes), FetchClass::Blocked);
    }

    #[test]
    fn mixed_attempts_pick_the_majority() {
        let classes = [FetchClass::Timeout, FetchClass::Timeout, FetchClass::Upstream];
        assert_eq!(aggregate(&classes), FetchClass::Timeout);
    }

    #[test]
    fn json_ld_wins_over_markup() {
        let body_text = "Structured body content. ".repeat(20);
        let html = format!(
            r#"<html><head><title>T</title>
            <script type="application/ld+json">{{"@type":"Article","articleBody":"{body_text}"}}</script>
            </head><body><article><p>short</p></article></body></html>"#
        );
        let page = extract_from_html(&html, 200).expect("extract");
        assert_eq!(page.strategy, "json-ld");
        assert!(page.text.contains("Structured body content"));
        assert_eq!(page.title.as_deref(), Some("T"));
    }

    #[test]
    fn semantic_container_beats_scoring() {
        let para = "A real paragraph with several sentences. It keeps going for a while. ";
        let html = format!(
            "<html><body><nav><li>Home</li></nav><article><h1>Title</h1><p>{}</p><p>{}</p></article></body></html>",
            para.repeat(3),
            para.repeat(3)
        );
        let page = extract_from_html(&html, 200).expect("extract");
        assert_eq!(page.strategy, "semantic");
        assert!(page.text.contains("real paragraph"));
        assert!(!page.text.contains("Home"), "nav content excluded");
    }

    #[test]
    fn scored_paragraphs_drop_boilerplate() {
        let good = "Substantial article text that runs long enough to be scored well. It has multiple sentences. It is clearly prose. ";
        let banner = "Accept all cookies to continue browsing this website today. ".repeat(3);
        let html = format!(
            r#"<html><body>
            <div class="cookie-banner"><p>{}</p></div>
            <div><p>{}</p></div>
            </body></html>"#,
            banner,
            good.repeat(3)
        );
        let page = extract_from_html(&html, 200).expect("extract");
        assert_eq!(page.strategy, "scored");
        assert!(!page.text.contains("cookies"));
    }

    #[test]
    fn empty_page_is_a_content_quality_error() {
        let err = extract_from_html("<html><body></body></html>", 200).expect_err("no content");
        assert!(matches!(err, PipelineError::ContentQuality { .. }));
    }
}
