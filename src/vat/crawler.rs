// src/vat/crawler.rs
//! Depth-bounded, same-host crawl of a certified website looking for a VAT number

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use super::{find_candidate, is_valid};
use crate::config::CrawlerConfig;
use crate::pipeline::pool::Interrupt;

/// Result of a whole crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    Found(String),
    NotFound,
    /// The scrape pool was interrupted; nothing should be recorded
    Cancelled,
}

/// Text and outgoing links of one fetched page
#[derive(Debug, Clone, Default)]
struct ParsedPage {
    text: String,
    /// Footer links first, then every anchor in the body
    links: Vec<Url>,
}

pub struct VatCrawler {
    http_client: reqwest::Client,
    max_depth: i32,
}

impl VatCrawler {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.page_timeout_secs))
            .gzip(true)
            .build()
            .context("Failed to build crawler HTTP client")?;

        Ok(Self {
            http_client,
            max_depth: config.max_depth,
        })
    }

    pub fn max_depth(&self) -> i32 {
        self.max_depth
    }

    /// Crawl `host` from its home page
    pub async fn crawl(&self, host: &str, interrupt: &Interrupt) -> CrawlOutcome {
        let Some(seed) = seed_url(host) else {
            debug!("{} does not form a URL, nothing to crawl", host);
            return CrawlOutcome::NotFound;
        };

        let mut visited = HashSet::new();
        let outcome = self
            .search_page(seed, self.max_depth, &mut visited, interrupt)
            .await;

        debug!("Crawl of {} visited {} pages: {:?}", host, visited.len(), outcome);
        outcome
    }

    fn search_page<'a>(
        &'a self,
        url: Url,
        depth: i32,
        visited: &'a mut HashSet<Url>,
        interrupt: &'a Interrupt,
    ) -> BoxFuture<'a, CrawlOutcome> {
        Box::pin(async move {
            if interrupt.is_raised() {
                return CrawlOutcome::Cancelled;
            }
            if depth < 0 || visited.contains(&url) {
                return CrawlOutcome::NotFound;
            }
            visited.insert(url.clone());

            let page = tokio::select! {
                _ = interrupt.raised() => return CrawlOutcome::Cancelled,
                page = self.fetch_page(&url) => page,
            };
            let Some(page) = page else {
                return CrawlOutcome::NotFound;
            };

            if let Some(candidate) = find_candidate(&page.text) {
                if is_valid(&candidate) {
                    return CrawlOutcome::Found(candidate);
                }
                trace!("{}: {} fails the checksum", url, candidate);
            }

            for link in page.links {
                match self.search_page(link, depth - 1, visited, interrupt).await {
                    CrawlOutcome::NotFound => continue,
                    outcome => return outcome,
                }
            }

            CrawlOutcome::NotFound
        })
    }

    /// GET one page. Failures of any kind end this branch of the crawl.
    async fn fetch_page(&self, url: &Url) -> Option<ParsedPage> {
        let response = match self.http_client.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("Failed to fetch {}: {}", url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            trace!("{} answered {}", url, response.status());
            return None;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.contains("text/html") {
            trace!("{} is not HTML ({})", url, content_type);
            return None;
        }

        let final_url = response.url().clone();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!("Failed to read {}: {}", url, e);
                return None;
            }
        };

        Some(parse_page(&body, &final_url, url))
    }
}

/// `http://<host>`, with a leading wildcard label replaced by "www"
pub fn seed_url(host: &str) -> Option<Url> {
    let host = match host.trim().strip_prefix("*.") {
        Some(rest) => format!("www.{}", rest),
        None => host.trim().to_string(),
    };
    if host.is_empty() {
        return None;
    }
    Url::parse(&format!("http://{}", host)).ok()
}

/// Relative links resolve against `page_url`, the location after redirects.
/// Only links on the host of `requested` are kept.
fn parse_page(html: &str, page_url: &Url, requested: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    let body = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let text = visible_text(body);

    let mut links = Vec::new();
    for css in ["footer a[href]", "a[href]"] {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for element in body.select(&selector) {
            if let Some(link) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, page_url, requested))
            {
                links.push(link);
            }
        }
    }

    ParsedPage { text, links }
}

/// Elements that break the text flow; inline elements do not
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Whitespace-collapsed text of `root`, without script and style content.
/// Text of inline elements joins its neighbours without a separator.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut text = String::new();
    push_text(root, &mut text);
    text.truncate(text.trim_end().len());
    text
}

fn push_text(element: ElementRef<'_>, text: &mut String) {
    for child in element.children() {
        if let Some(fragment) = child.value().as_text() {
            for c in fragment.chars() {
                if c.is_whitespace() {
                    push_separator(text);
                } else {
                    text.push(c);
                }
            }
            continue;
        }

        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };
        let name = child.value().name();
        if matches!(name, "script" | "style") {
            continue;
        }

        let block = BLOCK_ELEMENTS.contains(&name);
        if block {
            push_separator(text);
        }
        push_text(child, text);
        if block {
            push_separator(text);
        }
    }
}

fn push_separator(text: &mut String) {
    if !text.is_empty() && !text.ends_with(' ') {
        text.push(' ');
    }
}

/// Absolute link for `href` on the host of `requested`, or `None` when it
/// should not be followed
fn resolve_link(href: &str, page_url: &Url, requested: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let mut url = page_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);

    if bare_host(&url)? != bare_host(requested)? {
        return None;
    }

    Some(url)
}

fn bare_host(url: &Url) -> Option<&str> {
    let host = url.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host))
}
