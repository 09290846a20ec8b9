//! Parses a repository's Atom release feed into flat entries.

use chrono::{DateTime, Utc};

use crate::error::FeedError;

/// One `<entry>` of a release feed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    /// Href of the entry's alternate link, or its first link.
    pub link: String,
    pub updated: Option<DateTime<Utc>>,
    /// Rendered release notes.
    pub content: String,
    pub author: String,
}

pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, FeedError> {
    let feed = feed_rs::parser::parse(xml.as_bytes())
        .map_err(|e| FeedError::InvalidResponseShape(format!("feed parse error: {}", e)))?;

    let entries = feed
        .entries
        .into_iter()
        .map(|e| {
            let link = e
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("alternate"))
                .or_else(|| e.links.first())
                .map(|l| l.href.clone())
                .unwrap_or_default();

            FeedEntry {
                id: e.id,
                title: e.title.map(|t| t.content).unwrap_or_default(),
                link,
                updated: e.updated.or(e.published),
                content: e.content.and_then(|c| c.body).unwrap_or_default(),
                author: e.authors.first().map(|a| a.name.clone()).unwrap_or_default(),
            }
        })
        .collect();

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:media="http://search.yahoo.com/mrss/" xml:lang="en-US">
  <id>tag:github.com,2008:https://github.com/rust-lang/rust/releases</id>
  <link type="text/html" rel="alternate" href="https://github.com/rust-lang/rust/releases"/>
  <title>Release notes from rust</title>
  <updated>2024-05-02T15:00:00Z</updated>
  <entry>
    <id>tag:github.com,2008:Repository/724712/1.78.0</id>
    <updated>2024-05-02T15:00:00Z</updated>
    <link rel="alternate" type="text/html" href="https://github.com/rust-lang/rust/releases/tag/1.78.0"/>
    <title>Rust 1.78.0</title>
    <content type="html">&lt;h2&gt;Language&lt;/h2&gt;</content>
    <author><name>rustbot</name></author>
  </entry>
  <entry>
    <id>tag:github.com,2008:Repository/724712/1.77.2</id>
    <updated>2024-04-09T15:00:00Z</updated>
    <link rel="alternate" type="text/html" href="https://github.com/rust-lang/rust/releases/tag/1.77.2"/>
    <title>Rust 1.77.2</title>
    <content type="html"></content>
    <author><name>rustbot</name></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed_entries() {
        let entries = parse_feed(FEED).unwrap();

        assert_eq!(entries.len(), 2);
        let first = &entries[0];
        assert_eq!(first.title, "Rust 1.78.0");
        assert_eq!(
            first.link,
            "https://github.com/rust-lang/rust/releases/tag/1.78.0"
        );
        assert_eq!(first.author, "rustbot");
        assert_eq!(first.content, "<h2>Language</h2>");
        assert_eq!(
            first.updated.unwrap().to_rfc3339(),
            "2024-05-02T15:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_empty_feed() {
        let xml = r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom"><title>none</title></feed>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn test_parse_garbage_is_invalid_shape() {
        let result = parse_feed("<html><body>Not Found</body></html>");
        assert!(matches!(result, Err(FeedError::InvalidResponseShape(_))));
    }
}
