//! Feed fetcher.
//!
//! Retrieves a feed URL once and parses it into a [`ParsedFeed`] with
//! stable item identities. The fetcher never retries; callers decide what a
//! failure means.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::Link;
use feed_rs::parser;
use reqwest::Client;

use crate::config::MonitorConfig;
use crate::error::{FeedwatchError, Result};
use crate::rss::types::{content_hash, Item, ItemId, ParsedFeed, UNTITLED_FEED};

/// Source of parsed feeds.
///
/// The HTTP implementation is [`FeedFetcher`]; tests substitute scripted
/// sources.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Retrieve and parse `url`.
    async fn fetch(&self, url: &str) -> Result<ParsedFeed>;
}

/// HTTP feed fetcher.
pub struct FeedFetcher {
    client: Client,
    max_feed_size: u64,
}

impl FeedFetcher {
    /// Create a fetcher from the monitor configuration.
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(config.fetch_timeout())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| FeedwatchError::Fetch(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
        })
    }

    fn too_large(&self, size: u64) -> FeedwatchError {
        FeedwatchError::Fetch(format!(
            "feed too large: {} bytes (max {} bytes)",
            size, self.max_feed_size
        ))
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FeedwatchError::Fetch(format!("failed to fetch feed: {}", e)))?;

        if !response.status().is_success() {
            return Err(FeedwatchError::Fetch(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_feed_size {
                return Err(self.too_large(content_length));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FeedwatchError::Fetch(format!("failed to read response: {}", e)))?;

        if bytes.len() as u64 > self.max_feed_size {
            return Err(self.too_large(bytes.len() as u64));
        }

        parse_feed(url, &bytes)
    }
}

/// Validate a URL before it is subscribed.
///
/// Requires an absolute http(s) URL with a host, and rejects loopback,
/// private and reserved hosts.
pub fn validate_url(url: &str) -> Result<()> {
    let parsed =
        url::Url::parse(url).map_err(|e| FeedwatchError::Validation(format!("invalid URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(FeedwatchError::Validation(format!(
                "unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| FeedwatchError::Validation("URL has no host".to_string()))?;

    let forbidden = match host {
        url::Host::Domain(domain) if is_forbidden_hostname(domain) => {
            Some(format!("forbidden host: {}", domain))
        }
        url::Host::Domain(_) => None,
        url::Host::Ipv4(ipv4) => Some(IpAddr::V4(ipv4))
            .filter(is_private_ip)
            .map(|ip| format!("private IP address not allowed: {}", ip)),
        url::Host::Ipv6(ipv6) => Some(IpAddr::V6(ipv6))
            .filter(is_private_ip)
            .map(|ip| format!("private IP address not allowed: {}", ip)),
    };

    match forbidden {
        Some(reason) => Err(FeedwatchError::Validation(reason)),
        None => Ok(()),
    }
}

/// Check if a hostname is forbidden.
fn is_forbidden_hostname(host: &str) -> bool {
    const FORBIDDEN_SUFFIXES: &[&str] = &[".local", ".localhost", ".internal", ".lan", ".home"];

    let host = host.to_lowercase();
    host == "localhost" || FORBIDDEN_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}

/// Check if an IP address is loopback, private, link-local or reserved.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                || ipv4.is_documentation()
                // Carrier-grade NAT: 100.64.0.0/10
                || (octets[0] == 100 && (64..=127).contains(&octets[1]))
        }
        IpAddr::V6(ipv6) => {
            let first = ipv6.segments()[0];
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                // Unique local: fc00::/7
                || (first & 0xfe00) == 0xfc00
                // Link-local: fe80::/10
                || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Feed identity: hash of the canonical link, or of the requested URL when
/// the feed publishes none.
pub fn feed_identity(canonical_link: Option<&str>, requested_url: &str) -> String {
    let source = canonical_link
        .filter(|link| !link.is_empty())
        .unwrap_or(requested_url);
    content_hash(source)
}

/// Pick the link that points at the human-readable page.
fn preferred_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}

/// Parse feed bytes fetched from `requested_url`.
pub fn parse_feed(requested_url: &str, bytes: &[u8]) -> Result<ParsedFeed> {
    // Leave entry ids empty when the document has none, so identity can
    // fall back to the item link instead of a parser-generated value.
    let feed = parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| FeedwatchError::Fetch(format!("failed to parse feed: {}", e)))?;

    let title = feed
        .title
        .map(|t| strip_html(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED_FEED.to_string());

    let link = preferred_link(&feed.links);

    let mut items: Vec<Item> = feed
        .entries
        .into_iter()
        .map(|entry| {
            let item_link = preferred_link(&entry.links).unwrap_or_default();
            Item {
                id: ItemId::derive(Some(entry.id.as_str()), Some(item_link.as_str())),
                title: entry
                    .title
                    .map(|t| strip_html(&t.content))
                    .unwrap_or_default(),
                link: item_link,
                published_at: entry.published.or(entry.updated),
            }
        })
        .collect();

    order_items(&mut items);

    Ok(ParsedFeed {
        id: feed_identity(link.as_deref(), requested_url),
        title,
        link,
        items,
    })
}

/// Sort items oldest first when every item has a publish time.
///
/// Otherwise the document order is kept.
fn order_items(items: &mut [Item]) {
    if items.iter().all(|item| item.published_at.is_some()) {
        items.sort_by_key(|item| item.published_at);
    }
}

/// Strip HTML tags from text and decode common entities.
fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut entity: Option<String> = None;

    for ch in html.chars() {
        if let Some(name) = entity.as_mut() {
            if ch == ';' {
                push_entity(&mut result, name);
                entity = None;
            } else {
                name.push(ch);
            }
            continue;
        }

        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            '&' if !in_tag => entity = Some(String::new()),
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    // Unterminated entity, keep as-is
    if let Some(name) = entity {
        result.push('&');
        result.push_str(&name);
    }

    result.split_whitespace().collect::<Vec<&str>>().join(" ")
}

fn push_entity(out: &mut String, name: &str) {
    let decoded = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => parse_numeric_entity(name).and_then(char::from_u32),
    };

    match decoded {
        Some(c) => out.push(c),
        None => {
            out.push('&');
            out.push_str(name);
            out.push(';');
        }
    }
}

/// Parse a numeric HTML entity (e.g., "#123" or "#x7B").
fn parse_numeric_entity(entity: &str) -> Option<u32> {
    let digits = entity.strip_prefix('#')?;
    match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => digits.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED_URL: &str = "https://example.com/feed.xml";

    #[test]
    fn test_validate_url_accepts_http_and_https() {
        assert!(validate_url("https://example.com/feed.xml").is_ok());
        assert!(validate_url("http://example.com/feed.xml").is_ok());
    }

    #[test]
    fn test_validate_url_rejects_relative() {
        let err = validate_url("/feed.xml").unwrap_err();
        assert!(matches!(err, FeedwatchError::Validation(_)));
        assert!(err.to_string().contains("invalid URL"));
    }

    #[test]
    fn test_validate_url_rejects_garbage() {
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("").is_err());
    }

    #[test]
    fn test_validate_url_invalid_scheme() {
        let err = validate_url("ftp://example.com/feed.xml").unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"));
    }

    #[test]
    fn test_validate_url_rejects_hostless() {
        assert!(validate_url("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_validate_url_forbidden_hosts() {
        for url in [
            "http://localhost/feed.xml",
            "http://server.local/feed.xml",
            "http://api.internal/feed.xml",
        ] {
            let err = validate_url(url).unwrap_err();
            assert!(err.to_string().contains("forbidden host"), "{url}");
        }
    }

    #[test]
    fn test_validate_url_private_ips() {
        for url in [
            "http://127.0.0.1/feed.xml",
            "http://10.0.0.1/feed.xml",
            "http://172.16.0.1/feed.xml",
            "http://192.168.1.1/feed.xml",
            "http://169.254.1.1/feed.xml",
            "http://100.64.0.1/feed.xml",
            "http://[::1]/feed.xml",
            "http://[fd00::1]/feed.xml",
        ] {
            let err = validate_url(url).unwrap_err();
            assert!(err.to_string().contains("private IP"), "{url}");
        }

        assert!(validate_url("http://172.32.0.1/feed.xml").is_ok());
        assert!(validate_url("http://93.184.216.34/feed.xml").is_ok());
    }

    #[test]
    fn test_is_forbidden_hostname() {
        assert!(is_forbidden_hostname("localhost"));
        assert!(is_forbidden_hostname("LOCALHOST"));
        assert!(is_forbidden_hostname("printer.lan"));
        assert!(!is_forbidden_hostname("localhost.example.com"));
        assert!(!is_forbidden_hostname("news.ycombinator.com"));
    }

    #[test]
    fn test_feed_identity() {
        assert_eq!(
            feed_identity(Some("https://example.com/"), FEED_URL),
            content_hash("https://example.com/")
        );
        assert_eq!(feed_identity(None, FEED_URL), content_hash(FEED_URL));
        assert_eq!(feed_identity(Some(""), FEED_URL), content_hash(FEED_URL));
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html("<b>Bold</b> text"), "Bold text");
        assert_eq!(strip_html("&amp; &lt;tag&gt; &quot;q&quot;"), "& <tag> \"q\"");
        assert_eq!(strip_html("&#65;&#x41;&#x3042;"), "AAあ");
        assert_eq!(strip_html("&unknown; stays"), "&unknown; stays");
        assert_eq!(strip_html("AT&T"), "AT&T");
        assert_eq!(strip_html("<p>\n\tNewlines\n\tand\ttabs\n</p>"), "Newlines and tabs");
    }

    #[test]
    fn test_parse_numeric_entity() {
        assert_eq!(parse_numeric_entity("#65"), Some(65));
        assert_eq!(parse_numeric_entity("#x41"), Some(65));
        assert_eq!(parse_numeric_entity("#X41"), Some(65));
        assert_eq!(parse_numeric_entity("invalid"), None);
        assert_eq!(parse_numeric_entity("#xZZ"), None);
    }

    #[test]
    fn test_parse_feed_rss_sorted_by_publish_time() {
        let rss = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>https://example.com</link>
    <description>A test feed</description>
    <item>
      <title>Newest</title>
      <link>https://example.com/3</link>
      <guid>guid-3</guid>
      <pubDate>Wed, 03 Jan 2024 00:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Oldest</title>
      <link>https://example.com/1</link>
      <guid>guid-1</guid>
      <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Middle</title>
      <link>https://example.com/2</link>
      <guid>guid-2</guid>
      <pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

        let feed = parse_feed(FEED_URL, rss.as_bytes()).unwrap();
        assert_eq!(feed.title, "Test Feed");
        assert!(feed.link.as_ref().unwrap().starts_with("https://example.com"));
        assert_eq!(feed.id, content_hash(feed.link.as_ref().unwrap()));

        let titles: Vec<&str> = feed.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Oldest", "Middle", "Newest"]);
        assert_eq!(feed.latest_item().unwrap().title, "Newest");
        assert_eq!(feed.items[0].id, ItemId::derive(Some("guid-1"), None));
        assert_eq!(feed.items[0].link, "https://example.com/1");
    }

    #[test]
    fn test_parse_feed_without_dates_keeps_source_order() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Undated</title>
    <item><title>B</title><link>https://example.com/b</link></item>
    <item><title>A</title><link>https://example.com/a</link></item>
  </channel>
</rss>"#;

        let feed = parse_feed(FEED_URL, rss.as_bytes()).unwrap();
        let titles: Vec<&str> = feed.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A"]);
    }

    #[test]
    fn test_parse_feed_identity_falls_back_to_link() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>No guids</title>
    <item><title>A</title><link>https://example.com/a</link></item>
  </channel>
</rss>"#;

        let feed = parse_feed(FEED_URL, rss.as_bytes()).unwrap();
        assert_eq!(
            feed.items[0].id,
            ItemId::derive(None, Some("https://example.com/a"))
        );
    }

    #[test]
    fn test_parse_feed_identity_ignores_title_changes() {
        let make = |title: &str| {
            format!(
                r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title>
<item><title>{title}</title><guid>stable</guid></item>
</channel></rss>"#
            )
        };

        let first = parse_feed(FEED_URL, make("Before").as_bytes()).unwrap();
        let second = parse_feed(FEED_URL, make("After").as_bytes()).unwrap();
        assert_eq!(first.items[0].id, second.items[0].id);
        assert_ne!(first.items[0].title, second.items[0].title);
    }

    #[test]
    fn test_parse_feed_atom() {
        let atom = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <link rel="self" href="https://example.com/atom.xml"/>
  <link href="https://example.com"/>
  <id>urn:feed</id>
  <entry>
    <id>urn:uuid:1</id>
    <title>Atom Entry</title>
    <link href="https://example.com/entry"/>
    <updated>2025-01-01T00:00:00Z</updated>
  </entry>
</feed>"#;

        let feed = parse_feed(FEED_URL, atom.as_bytes()).unwrap();
        assert_eq!(feed.title, "Atom Feed");
        assert!(feed.link.as_ref().unwrap().starts_with("https://example.com"));
        assert!(!feed.link.as_ref().unwrap().contains("atom.xml"));
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].id, ItemId::derive(Some("urn:uuid:1"), None));
        assert!(feed.items[0].published_at.is_some());
    }

    #[test]
    fn test_parse_feed_without_link_uses_requested_url() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <item><guid>1</guid></item>
  </channel>
</rss>"#;

        let feed = parse_feed(FEED_URL, rss.as_bytes()).unwrap();
        assert_eq!(feed.title, UNTITLED_FEED);
        assert_eq!(feed.id, content_hash(FEED_URL));
        assert_eq!(feed.items[0].title, "");
    }

    #[test]
    fn test_parse_feed_invalid() {
        let err = parse_feed(FEED_URL, b"This is not XML").unwrap_err();
        assert!(err.is_fetch());
    }

    #[test]
    fn test_fetcher_builds_from_default_config() {
        assert!(FeedFetcher::new(&MonitorConfig::default()).is_ok());
    }
}
