use atom_syndication::extension::ExtensionMap;
use atom_syndication::Link;
use chrono::Utc;

use super::{Feed, FeedItem};
use crate::errors::{AppError, AppResult};
use crate::util;

pub fn parse(data: &[u8]) -> AppResult<Feed> {
    let atom = atom_syndication::Feed::read_from(data)
        .map_err(|err| AppError::Parse(format!("atom: {err}")))?;
    Ok(convert(atom))
}

fn convert(atom: atom_syndication::Feed) -> Feed {
    let mut feed = Feed {
        title: text_of(atom.title()),
        site_url: best_link(atom.links()).to_string(),
        items: Vec::with_capacity(atom.entries().len()),
    };

    for entry in atom.entries() {
        let updated = entry.updated().to_rfc3339();

        // Some feeds carry no <link> but use a URL as the entry id;
        // treat it as a synthetic link with a composite guid so edits
        // that bump `updated` re-ingest.
        let (link_from_id, guid_from_id) = if util::is_a_possible_link(entry.id()) {
            (entry.id(), format!("{}::{}", entry.id(), updated))
        } else {
            ("", String::new())
        };

        let orig_link = extension_value(entry.extensions(), "origLink");
        let url = util::first_non_empty(&[
            orig_link.as_str(),
            best_link(entry.links()),
            link_from_id,
        ])
        .to_string();

        let content = entry
            .content()
            .and_then(|content| content.value())
            .unwrap_or_default()
            .trim()
            .to_string();
        let summary = entry
            .summary()
            .map(|text| text.as_str().trim().to_string())
            .unwrap_or_default();

        feed.items.push(FeedItem {
            guid: util::first_non_empty(&[guid_from_id.as_str(), entry.id()]).to_string(),
            date: entry
                .published()
                .map(|published| published.with_timezone(&Utc))
                .or_else(|| Some(entry.updated().with_timezone(&Utc))),
            url,
            title: text_of(entry.title()),
            content: util::first_non_empty(&[content.as_str(), summary.as_str()]).to_string(),
            image_url: None,
            audio_url: None,
        });
    }
    feed
}

fn text_of(text: &atom_syndication::Text) -> String {
    let value = text.as_str();
    if value.contains('<') {
        util::extract_text(value)
    } else {
        util::collapse_whitespace(value)
    }
}

/// `rel="alternate"` wins, then any link at all.
fn best_link(links: &[Link]) -> &str {
    links
        .iter()
        .find(|link| link.rel() == "alternate")
        .or_else(|| links.first())
        .map(|link| link.href())
        .unwrap_or_default()
}

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
