//! Line-oriented console transport.
//!
//! Parses commands typed on stdin, runs them against a [`FeedService`] on
//! behalf of a single subscriber, and prints deliveries to stdout.

use async_trait::async_trait;

use crate::error::{FeedwatchError, Result};
use crate::rss::delivery::{format_item, Delivery, OutgoingMessage};
use crate::rss::service::FeedService;
use crate::rss::types::{SubscriberId, Subscription};

/// Number of entries shown by `top`.
pub const TOP_LIMIT: usize = 10;

const HELP: &str = "\
Commands:
  list                      List subscriptions
  add <url>                 Subscribe to a feed (alias: sub)
  del <n>                   Unsubscribe by list number (alias: unsub)
  top                       Most subscribed feeds
  topic <n> <topic|none>    Set or clear the routing topic
  help                      Show this help";

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List subscriptions.
    List,
    /// Subscribe to a URL.
    Add(String),
    /// Unsubscribe by 1-based list index.
    Del(usize),
    /// Show the most subscribed feeds.
    Top,
    /// Set (Some) or clear (None) a subscription's topic.
    Topic(usize, Option<i64>),
    /// Show help.
    Help,
    /// Known command with bad arguments; carries the usage line.
    Usage(&'static str),
    /// Unknown command.
    Unknown(String),
}

/// Parse an input line. Blank lines yield `None`.
pub fn parse_command(input: &str) -> Option<Command> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut parts = trimmed.split_whitespace();
    let cmd = parts.next()?.to_lowercase();
    let args: Vec<&str> = parts.collect();

    let command = match cmd.as_str() {
        "list" | "ls" => Command::List,
        "add" | "sub" => match args.as_slice() {
            [url] => Command::Add((*url).to_string()),
            _ => Command::Usage("add <url>"),
        },
        "del" | "unsub" => match args.as_slice() {
            [index] => parse_index(index)
                .map(Command::Del)
                .unwrap_or(Command::Usage("del <n>")),
            _ => Command::Usage("del <n>"),
        },
        "top" => Command::Top,
        "topic" => match args.as_slice() {
            [index, topic] => match (parse_index(index), parse_topic(topic)) {
                (Some(index), Some(topic)) => Command::Topic(index, topic),
                _ => Command::Usage("topic <n> <topic|none>"),
            },
            _ => Command::Usage("topic <n> <topic|none>"),
        },
        "help" | "?" => Command::Help,
        _ => Command::Unknown(cmd),
    };

    Some(command)
}

fn parse_index(s: &str) -> Option<usize> {
    s.parse().ok().filter(|n| *n > 0)
}

fn parse_topic(s: &str) -> Option<Option<i64>> {
    if s.eq_ignore_ascii_case("none") {
        Some(None)
    } else {
        s.parse().ok().map(Some)
    }
}

/// Console session for one subscriber.
pub struct Console {
    service: FeedService,
    subscriber_id: SubscriberId,
}

impl Console {
    /// Create a console acting as `subscriber_id`.
    pub fn new(service: FeedService, subscriber_id: SubscriberId) -> Self {
        Self {
            service,
            subscriber_id,
        }
    }

    /// Handle one input line and return the reply, if any.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let command = parse_command(line)?;
        Some(match self.execute(command).await {
            Ok(reply) => reply,
            Err(e) => format!("Error: {}", e),
        })
    }

    async fn execute(&self, command: Command) -> Result<String> {
        match command {
            Command::List => self.list().await,
            Command::Add(url) => self.add(&url).await,
            Command::Del(index) => {
                let subscription = self.nth(index).await?;
                let removed = self
                    .service
                    .unsubscribe(self.subscriber_id, &subscription.id)
                    .await?;
                Ok(format!("Unsubscribed from {}", removed.title))
            }
            Command::Top => self.top().await,
            Command::Topic(index, topic) => {
                let subscription = self.nth(index).await?;
                let updated = self
                    .service
                    .set_topic(self.subscriber_id, &subscription.id, topic)
                    .await?;
                Ok(match updated.topic {
                    Some(topic) => format!("Topic for {} set to {}", updated.title, topic),
                    None => format!("Topic for {} cleared", updated.title),
                })
            }
            Command::Help => Ok(HELP.to_string()),
            Command::Usage(usage) => Ok(format!("Usage: {}", usage)),
            Command::Unknown(cmd) => Ok(format!("Unknown command: {} (try help)", cmd)),
        }
    }

    async fn nth(&self, index: usize) -> Result<Subscription> {
        let mut subscriptions = self.service.list_subscriptions(self.subscriber_id).await?;
        if index == 0 || index > subscriptions.len() {
            return Err(FeedwatchError::NotFound(format!(
                "subscription #{}",
                index
            )));
        }
        Ok(subscriptions.swap_remove(index - 1))
    }

    async fn list(&self) -> Result<String> {
        let subscriptions = self.service.list_subscriptions(self.subscriber_id).await?;
        if subscriptions.is_empty() {
            return Ok("No subscriptions.".to_string());
        }

        let lines: Vec<String> = subscriptions
            .iter()
            .enumerate()
            .map(|(i, s)| match s.topic {
                Some(topic) => format!("{}. {} - {} [topic {}]", i + 1, s.title, s.link, topic),
                None => format!("{}. {} - {}", i + 1, s.title, s.link),
            })
            .collect();
        Ok(lines.join("\n"))
    }

    async fn add(&self, url: &str) -> Result<String> {
        let outcome = self.service.subscribe(self.subscriber_id, url).await?;
        let mut reply = format!(
            "Subscribed to {} ({})",
            outcome.subscription.title, outcome.subscription.link
        );
        if let Some(item) = outcome.preview {
            reply.push_str("\nLatest: ");
            reply.push_str(&format_item(&item));
        }
        Ok(reply)
    }

    async fn top(&self) -> Result<String> {
        let stats = self.service.top_subscriptions(TOP_LIMIT).await?;
        if stats.is_empty() {
            return Ok("No subscriptions yet.".to_string());
        }

        let lines: Vec<String> = stats
            .iter()
            .enumerate()
            .map(|(i, stat)| {
                format!(
                    "{}. {} ({}): {} subscriber(s)",
                    i + 1,
                    stat.subscription.title,
                    stat.subscription.link,
                    stat.count
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Delivery collaborator that prints to stdout.
#[derive(Debug, Default)]
pub struct ConsoleDelivery;

impl ConsoleDelivery {
    /// Render a message for the terminal.
    pub fn render(message: &OutgoingMessage) -> String {
        match message.topic {
            Some(topic) => format!("[{}#{}] {}", message.subscriber_id, topic, message.text),
            None => format!("[{}] {}", message.subscriber_id, message.text),
        }
    }
}

#[async_trait]
impl Delivery for ConsoleDelivery {
    async fn deliver(&self, message: &OutgoingMessage) -> Result<()> {
        println!("{}", Self::render(message));
        Ok(())
    }
}
