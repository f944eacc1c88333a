//! Item-body cleanup applied during JSON-Feed normalization: drop
//! script subtrees, lift lazy-load sources, strip inline event
//! handlers, resolve relative URLs, and tag embeds with a no-referrer
//! policy.

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};

use crate::util;

const HREF_TAGS: &[&str] = &["a", "area"];
const SRC_TAGS: &[&str] = &["img", "video", "audio", "source", "iframe", "embed", "track"];
const EVENT_ATTRS: &[&str] = &["onclick", "onerror", "onload"];

struct Rewriter {
    out: String,
    base_url: String,
    script_depth: i32,
}

impl Rewriter {
    fn resolve(&self, value: &str) -> String {
        if self.base_url.is_empty() {
            return value.to_string();
        }
        let resolved = util::absolute_url(value, &self.base_url);
        if resolved.is_empty() {
            value.to_string()
        } else {
            resolved
        }
    }

    fn write_tag(&mut self, tag: &Tag) {
        let name = tag.name.as_ref();
        let mut attrs: Vec<(String, String)> = tag
            .attrs
            .iter()
            .map(|attr| {
                (
                    attr.name.local.as_ref().to_string(),
                    attr.value.to_string(),
                )
            })
            .collect();

        attrs.retain(|(key, _)| !EVENT_ATTRS.contains(&key.as_str()));

        if name == "img" && !attrs.iter().any(|(key, _)| key == "src") {
            let lifted = attrs
                .iter()
                .find(|(key, _)| key == "data-src")
                .or_else(|| attrs.iter().find(|(key, _)| key == "data-original"))
                .map(|(_, value)| value.clone());
            if let Some(src) = lifted {
                attrs.push(("src".to_string(), src));
            }
        }

        for (key, value) in attrs.iter_mut() {
            let resolvable = (key == "href" && HREF_TAGS.contains(&name))
                || (key == "src" && SRC_TAGS.contains(&name))
                || (key == "poster" && name == "video");
            if resolvable {
                *value = self.resolve(value);
            }
        }

        if name == "img" || name == "iframe" {
            attrs.retain(|(key, _)| key != "referrerpolicy");
            attrs.push(("referrerpolicy".to_string(), "no-referrer".to_string()));
        }

        self.out.push('<');
        self.out.push_str(name);
        for (key, value) in &attrs {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            self.out.push_str(&util::escape_html(value));
            self.out.push('"');
        }
        if tag.self_closing {
            self.out.push('/');
        }
        self.out.push('>');
    }
}

impl TokenSink for Rewriter {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::TagToken(tag) => {
                let is_script = tag.name.as_ref() == "script";
                match tag.kind {
                    TagKind::StartTag => {
                        if is_script {
                            if !tag.self_closing {
                                self.script_depth += 1;
                                // Let the tokenizer treat the body as
                                // script data rather than markup.
                                return TokenSinkResult::RawData(RawKind::ScriptData);
                            }
                            return TokenSinkResult::Continue;
                        }
                        if self.script_depth > 0 {
                            return TokenSinkResult::Continue;
                        }
                        self.write_tag(&tag);
                    }
                    TagKind::EndTag => {
                        if is_script {
                            self.script_depth -= 1;
                            return TokenSinkResult::Continue;
                        }
                        if self.script_depth > 0 {
                            return TokenSinkResult::Continue;
                        }
                        self.out.push_str("</");
                        self.out.push_str(tag.name.as_ref());
                        self.out.push('>');
                    }
                }
            }
            Token::CharacterTokens(text) => {
                if self.script_depth <= 0 {
                    self.out.push_str(&escape_text(&text));
                }
            }
            Token::CommentToken(text) => {
                if self.script_depth <= 0 {
                    self.out.push_str("<!--");
                    self.out.push_str(&text);
                    self.out.push_str("-->");
                }
            }
            _ => {}
        }
        TokenSinkResult::Continue
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Rewrites an HTML fragment, resolving URLs against `base_url`.
pub fn rewrite_content(html: &str, base_url: &str) -> String {
    let sink = Rewriter {
        out: String::with_capacity(html.len()),
        base_url: base_url.to_string(),
        script_depth: 0,
    };
    let mut tokenizer = Tokenizer::new(sink, TokenizerOpts::default());
    let mut input = BufferQueue::default();
    input.push_back(StrTendril::from(html));
    let _ = tokenizer.feed(&mut input);
    tokenizer.end();
    tokenizer.sink.out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_are_dropped_with_their_subtrees() {
        let out = rewrite_content("<p>keep</p><script>var x = '<b>no</b>';</script>", "");
        assert!(out.contains("keep"));
        assert!(!out.contains("script"));
        assert!(!out.contains("var x"));
    }

    #[test]
    fn lazy_image_sources_are_lifted() {
        let out = rewrite_content(
            r#"<img data-src="/a.png" onclick="x()">"#,
            "https://example.com/post",
        );
        assert!(out.contains(r#"src="https://example.com/a.png""#), "{out}");
        assert!(!out.contains("onclick"), "{out}");
        assert!(out.contains(r#"referrerpolicy="no-referrer""#), "{out}");
    }

    #[test]
    fn relative_links_resolve_against_the_base() {
        let out = rewrite_content(
            r#"<a href="/next">next</a><video poster="p.jpg" src="v.mp4"></video>"#,
            "https://example.com/articles/",
        );
        assert!(out.contains(r#"href="https://example.com/next""#), "{out}");
        assert!(
            out.contains(r#"poster="https://example.com/articles/p.jpg""#),
            "{out}"
        );
        assert!(
            out.contains(r#"src="https://example.com/articles/v.mp4""#),
            "{out}"
        );
    }

    #[test]
    fn no_base_url_keeps_urls_as_is() {
        let out = rewrite_content(r#"<a href="/next">n</a>"#, "");
        assert!(out.contains(r#"href="/next""#), "{out}");
    }
}
