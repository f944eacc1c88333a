use rss::extension::ExtensionMap;
use rss::Channel;

use super::{dates, Feed, FeedItem};
use crate::errors::{AppError, AppResult};
use crate::util;

pub fn parse(data: &[u8]) -> AppResult<Feed> {
    let channel =
        Channel::read_from(data).map_err(|err| AppError::Parse(format!("rss: {err}")))?;
    Ok(convert(channel))
}

fn convert(channel: Channel) -> Feed {
    let mut feed = Feed {
        title: channel.title().trim().to_string(),
        site_url: channel.link().trim().to_string(),
        items: Vec::with_capacity(channel.items().len()),
    };

    for item in channel.items() {
        let orig_link = extension_value(item.extensions(), "origLink");
        let orig_enclosure_link = extension_value(item.extensions(), "origEnclosureLink");

        let mut audio_url = String::new();
        if let Some(enclosure) = item.enclosure() {
            if enclosure.mime_type().starts_with("audio/") {
                audio_url = enclosure.url().to_string();
                // Feedburner mirrors enclosures; prefer the original
                // when it clearly names the same file.
                if !orig_enclosure_link.is_empty()
                    && audio_url.contains(basename(&orig_enclosure_link))
                {
                    audio_url = orig_enclosure_link.clone();
                }
            }
        }

        let guid = item.guid().map(|g| g.value().trim()).unwrap_or_default();
        let permalink = item
            .guid()
            .filter(|g| g.is_permalink())
            .map(|g| g.value())
            .unwrap_or_default();

        let date_text = util::first_non_empty(&[
            item.pub_date().unwrap_or_default(),
            first_dublin_core_date(item),
            torrent_pub_date(item.extensions()),
        ]);

        let content = util::first_non_empty(&[
            item.content().unwrap_or_default().trim(),
            item.description().unwrap_or_default().trim(),
        ])
        .to_string();

        feed.items.push(FeedItem {
            guid: guid.to_string(),
            date: dates::parse_date(date_text),
            url: util::first_non_empty(&[
                orig_link.as_str(),
                item.link().unwrap_or_default(),
                permalink,
            ])
            .to_string(),
            title: item.title().unwrap_or_default().trim().to_string(),
            content,
            image_url: None,
            audio_url: (!audio_url.is_empty()).then_some(audio_url),
        });
    }
    feed
}

fn first_dublin_core_date(item: &rss::Item) -> &str {
    item.dublin_core_ext()
        .and_then(|ext| ext.dates().first())
        .map(String::as_str)
        .unwrap_or_default()
}

/// Finds the first value for `name` regardless of which namespace
/// prefix the document chose.
fn extension_value(extensions: &ExtensionMap, name: &str) -> String {
    for children in extensions.values() {
        if let Some(found) = children.get(name) {
            if let Some(value) = found.iter().find_map(|ext| ext.value()) {
                return value.to_string();
            }
        }
    }
    String::new()
}

fn torrent_pub_date(extensions: &ExtensionMap) -> &str {
    for children in extensions.values() {
        if let Some(torrents) = children.get("torrent") {
            for torrent in torrents {
                if let Some(dates) = torrent.children().get("pubDate") {
                    if let Some(value) = dates.iter().find_map(|ext| ext.value()) {
                        return value;
                    }
                }
            }
        }
    }
    ""
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_with_permalink_backfills_the_link() {
        let feed = parse(
            br#"<?xml version="1.0"?>
            <rss version="2.0"><channel><title>t</title>
              <item>
                <guid isPermaLink="true">http://example.com/posts/1</guid>
              </item>
            </channel></rss>"#,
        )
        .unwrap();
        assert_eq!(feed.items[0].guid, "http://example.com/posts/1");
        assert_eq!(feed.items[0].url, "http://example.com/posts/1");
    }

    #[test]
    fn audio_enclosures_become_the_podcast_url() {
        let feed = parse(
            br#"<?xml version="1.0"?>
            <rss version="2.0"><channel><title>t</title>
              <item>
                <link>http://example.com/ep1</link>
                <enclosure url="http://example.com/ep1.mp3" type="audio/mpeg" length="1"/>
              </item>
            </channel></rss>"#,
        )
        .unwrap();
        assert_eq!(
            feed.items[0].audio_url.as_deref(),
            Some("http://example.com/ep1.mp3")
        );
    }

    #[test]
    fn content_encoded_wins_over_description() {
        let feed = parse(
            br#"<?xml version="1.0"?>
            <rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
            <channel><title>t</title>
              <item>
                <description>short</description>
                <content:encoded><![CDATA[<p>full</p>]]></content:encoded>
              </item>
            </channel></rss>"#,
        )
        .unwrap();
        assert_eq!(feed.items[0].content, "<p>full</p>");
    }

    #[test]
    fn pub_date_is_parsed() {
        let feed = parse(
            br#"<?xml version="1.0"?>
            <rss version="2.0"><channel><title>t</title>
              <item>
                <link>http://example.com/1</link>
                <pubDate>Sat, 01 Jan 2000 08:00:00 GMT</pubDate>
              </item>
            </channel></rss>"#,
        )
        .unwrap();
        assert_eq!(
            feed.items[0].date.unwrap().timestamp_millis(),
            946713600000
        );
    }
}
