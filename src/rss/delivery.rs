//! Outgoing notifications.
//!
//! New items are rendered as HTML anchors and packed into messages no longer
//! than the payload limit. The transport itself sits behind [`Delivery`].

use async_trait::async_trait;

use super::types::{Item, SubscriberId};
use crate::error::Result;

/// One message handed to the delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Recipient.
    pub subscriber_id: SubscriberId,
    /// Message body (HTML).
    pub text: String,
    /// Whether the transport should suppress link previews.
    pub disable_link_preview: bool,
    /// Routing topic of the subscription, if set.
    pub topic: Option<i64>,
}

/// Delivery collaborator.
///
/// Errors are reported back but never affect ledger state.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Send one message.
    async fn deliver(&self, message: &OutgoingMessage) -> Result<()>;
}

fn entity(ch: char) -> Option<&'static str> {
    match ch {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        _ => None,
    }
}

/// Escape text for inclusion in HTML.
pub fn escape_html(text: &str) -> String {
    escape_html_within(text, usize::MAX)
}

/// Escape as much of `text` as fits in `budget` characters without
/// splitting an entity.
fn escape_html_within(text: &str, budget: usize) -> String {
    let mut escaped = String::with_capacity(text.len().min(budget));
    let mut used = 0usize;
    for ch in text.chars() {
        let piece = entity(ch);
        let len = piece.map_or(1, str::len);
        if used.saturating_add(len) > budget {
            break;
        }
        match piece {
            Some(piece) => escaped.push_str(piece),
            None => escaped.push(ch),
        }
        used += len;
    }
    escaped
}

/// Render an item as `<a href="LINK">TITLE</a>`.
///
/// Untitled items use their link as the anchor text.
pub fn format_item(item: &Item) -> String {
    let title = item.title.trim();
    let text = if title.is_empty() { item.link.as_str() } else { title };
    format!(
        "<a href=\"{}\">{}</a>",
        escape_html(&item.link),
        escape_html(text)
    )
}

/// Render an item in at most `limit` characters.
///
/// A long title is shortened before escaping so the anchor always closes.
/// When even an empty anchor does not fit, the escaped link is sent as plain
/// text.
pub fn format_item_within(item: &Item, limit: usize) -> String {
    let rendered = format_item(item);
    if rendered.chars().count() <= limit {
        return rendered;
    }

    let href = escape_html(&item.link);
    let overhead = "<a href=\"\"></a>".len() + href.chars().count();
    if overhead >= limit {
        return escape_html_within(&item.link, limit);
    }

    let title = item.title.trim();
    let text = if title.is_empty() { item.link.as_str() } else { title };
    format!(
        "<a href=\"{}\">{}</a>",
        href,
        escape_html_within(text, limit - overhead)
    )
}

/// Truncate to at most `max` characters.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Pack rendered items into newline-joined chunks of at most `limit`
/// characters each, preserving order.
///
/// A single item longer than the limit is truncated to fit.
pub fn chunk_texts<I, S>(texts: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for text in texts {
        let text = truncate_chars(text.as_ref(), limit);
        let len = text.chars().count();

        if current_len > 0 && current_len + 1 + len > limit {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(text);
        current_len += len;
    }

    if current_len > 0 {
        chunks.push(current);
    }
    chunks
}

/// Build the messages announcing `items` to one subscriber.
///
/// Link previews are left enabled on the first message only.
pub fn compose_messages(
    subscriber_id: SubscriberId,
    topic: Option<i64>,
    items: &[Item],
    limit: usize,
) -> Vec<OutgoingMessage> {
    let limit = limit.max(1);
    chunk_texts(items.iter().map(|item| format_item_within(item, limit)), limit)
        .into_iter()
        .enumerate()
        .map(|(index, text)| OutgoingMessage {
            subscriber_id,
            text,
            disable_link_preview: index > 0,
            topic,
        })
        .collect()
}
