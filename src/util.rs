use once_cell::sync::Lazy;
use url::Url;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0";

/// Resolves `href` against `base`. An unparsable base keeps absolute
/// hrefs and drops relative ones; an empty href resolves to the base
/// itself.
pub fn absolute_url(href: &str, base: &str) -> String {
    match Url::parse(base) {
        Ok(base) => match base.join(href) {
            Ok(joined) => joined.to_string(),
            Err(_) => String::new(),
        },
        Err(_) => {
            if Url::parse(href).is_ok() {
                href.to_string()
            } else {
                String::new()
            }
        }
    }
}

pub fn url_domain(href: &str) -> String {
    Url::parse(href)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

pub fn is_a_possible_link(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for ch in s.trim().chars() {
        if ch.is_whitespace() {
            in_space = true;
        } else {
            if in_space && !out.is_empty() {
                out.push(' ');
            }
            in_space = false;
            out.push(ch);
        }
    }
    out
}

/// Text content of an HTML fragment with whitespace collapsed.
pub fn extract_text(content: &str) -> String {
    let fragment = scraper::Html::parse_fragment(content);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().concat();
    collapse_whitespace(&text)
}

pub fn first_non_empty<'a>(values: &[&'a str]) -> &'a str {
    values.iter().find(|v| !v.is_empty()).copied().unwrap_or("")
}

static ESCAPES: Lazy<Vec<(char, &'static str)>> = Lazy::new(|| {
    vec![
        ('&', "&amp;"),
        ('<', "&lt;"),
        ('>', "&gt;"),
        ('"', "&#34;"),
        ('\'', "&#39;"),
    ]
});

/// Escapes text for safe inclusion in HTML output.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    'outer: for ch in s.chars() {
        for (from, to) in ESCAPES.iter() {
            if ch == *from {
                out.push_str(to);
                continue 'outer;
            }
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_collapses_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b  c "), "a b c");
        assert_eq!(collapse_whitespace(""), "");
    }

    #[test]
    fn it_resolves_relative_urls() {
        assert_eq!(
            absolute_url("/a/b", "https://example.com/feed.xml"),
            "https://example.com/a/b"
        );
        assert_eq!(
            absolute_url("", "https://example.com/feed.xml"),
            "https://example.com/feed.xml"
        );
        assert_eq!(
            absolute_url("https://other.org/x", "https://example.com/"),
            "https://other.org/x"
        );
        assert_eq!(absolute_url("https://other.org/x", ""), "https://other.org/x");
        assert_eq!(absolute_url("relative", ""), "");
    }

    #[test]
    fn it_extracts_text_from_html() {
        assert_eq!(
            extract_text("<p>Hello <b>world</b></p> <p>again</p>"),
            "Hello world again"
        );
    }
}
