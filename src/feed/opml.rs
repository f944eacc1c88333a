use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// The OPML 1.1 subset used for import/export: `outline[type=rss]` or
/// leaf outlines carrying `xmlUrl` are feeds, nested outlines are
/// folders.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "opml")]
pub struct Opml {
    #[serde(rename = "@version", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub head: Head,
    #[serde(default)]
    pub body: Body,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Head {
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Body {
    #[serde(rename = "outline", default)]
    pub outlines: Vec<Outline>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Outline {
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "@text", default)]
    pub text: String,
    #[serde(rename = "@title", default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "@xmlUrl", default, skip_serializing_if = "Option::is_none")]
    pub xml_url: Option<String>,
    #[serde(rename = "@htmlUrl", default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    #[serde(rename = "outline", default, skip_serializing_if = "Vec::is_empty")]
    pub outlines: Vec<Outline>,
}

impl Outline {
    pub fn is_folder(&self) -> bool {
        self.kind.as_deref() != Some("rss") && self.xml_url.is_none()
    }

    pub fn title(&self) -> &str {
        if self.text.is_empty() {
            self.title.as_deref().unwrap_or_default()
        } else {
            &self.text
        }
    }

    /// All feed outlines beneath this one, flattening nested folders.
    pub fn all_feeds(&self) -> Vec<&Outline> {
        let mut feeds = Vec::new();
        for outline in &self.outlines {
            if outline.is_folder() {
                feeds.extend(outline.all_feeds());
            } else {
                feeds.push(outline);
            }
        }
        feeds
    }
}

pub fn parse(data: &str) -> AppResult<Opml> {
    quick_xml::de::from_str(data).map_err(|err| AppError::BadRequest(format!("opml: {err}")))
}

pub fn render(opml: &Opml) -> AppResult<String> {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let mut serializer = quick_xml::se::Serializer::new(&mut out);
    serializer.indent(' ', 2);
    opml.serialize(serializer)
        .map_err(|err| AppError::Storage(format!("opml: {err}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <opml version="1.1">
          <head><title>subscriptions</title></head>
          <body>
            <outline text="tech">
              <outline type="rss" text="Example" xmlUrl="https://example.com/rss" htmlUrl="https://example.com"/>
            </outline>
            <outline type="rss" text="Solo" xmlUrl="https://solo.dev/feed.xml"/>
          </body>
        </opml>"#;

    #[test]
    fn it_splits_folders_and_feeds() {
        let opml = parse(SAMPLE).unwrap();
        assert_eq!(opml.body.outlines.len(), 2);

        let folder = &opml.body.outlines[0];
        assert!(folder.is_folder());
        assert_eq!(folder.title(), "tech");
        let feeds = folder.all_feeds();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].xml_url.as_deref(), Some("https://example.com/rss"));

        assert!(!opml.body.outlines[1].is_folder());
    }

    #[test]
    fn it_round_trips() {
        let opml = parse(SAMPLE).unwrap();
        let rendered = render(&opml).unwrap();
        let reparsed = parse(&rendered).unwrap();
        assert_eq!(reparsed.body.outlines.len(), 2);
        assert_eq!(
            reparsed.body.outlines[1].xml_url.as_deref(),
            Some("https://solo.dev/feed.xml")
        );
    }
}
