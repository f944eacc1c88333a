//! Strict HTML sanitizer for item detail bodies and scraped rule
//! content: tag and attribute allowlists (HTML, SVG and SVG filter
//! families), required critical attributes, URL scheme checks, a
//! tracker blocklist, and an iframe host whitelist. Script, style and
//! noscript subtrees are dropped entirely.

use std::collections::{HashMap, HashSet};

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use once_cell::sync::Lazy;

use crate::util;

pub fn sanitize(base_url: &str, input: &str) -> String {
    let sink = Sanitizer {
        out: String::with_capacity(input.len()),
        base_url: base_url.to_string(),
        tag_stack: Vec::new(),
        parent_tag: String::new(),
        blocked_depth: 0,
    };
    let mut tokenizer = Tokenizer::new(sink, TokenizerOpts::default());
    let mut input_queue = BufferQueue::default();
    input_queue.push_back(StrTendril::from(input));
    let _ = tokenizer.feed(&mut input_queue);
    tokenizer.end();
    tokenizer.sink.out
}

struct Sanitizer {
    out: String,
    base_url: String,
    tag_stack: Vec<String>,
    parent_tag: String,
    blocked_depth: i32,
}

impl TokenSink for Sanitizer {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::CharacterTokens(text) => {
                if self.blocked_depth > 0 {
                    return TokenSinkResult::Continue;
                }
                // An iframe element never has fallback content.
                if self.parent_tag == "iframe" {
                    return TokenSinkResult::Continue;
                }
                self.out.push_str(&util::escape_html(&text));
            }
            Token::TagToken(tag) => return self.process_tag(tag),
            _ => {}
        }
        TokenSinkResult::Continue
    }
}

impl Sanitizer {
    fn process_tag(&mut self, tag: Tag) -> TokenSinkResult<()> {
        let name = tag.name.as_ref().to_string();

        // Everything inside a blocked subtree is dropped, including
        // markup.
        if self.blocked_depth > 0 {
            if is_blocked_tag(&name) {
                match tag.kind {
                    TagKind::StartTag if !tag.self_closing => self.blocked_depth += 1,
                    TagKind::EndTag => self.blocked_depth -= 1,
                    _ => {}
                }
            }
            return TokenSinkResult::Continue;
        }

        match tag.kind {
            TagKind::StartTag if tag.self_closing => {
                if is_valid_tag(&name) {
                    if let Some(attrs) = self.sanitize_attrs(&name, &tag) {
                        self.out.push('<');
                        self.out.push_str(&name);
                        self.out.push_str(&attrs);
                        self.out.push_str("/>");
                    }
                }
            }
            TagKind::StartTag => {
                self.parent_tag = name.clone();
                if is_valid_tag(&name) {
                    if let Some(attrs) = self.sanitize_attrs(&name, &tag) {
                        let wrap = self.is_known_video_iframe(&tag);
                        if wrap {
                            self.out.push_str(r#"<div class="video-wrapper">"#);
                        }

                        self.out.push('<');
                        self.out.push_str(&name);
                        self.out.push_str(&attrs);
                        self.out.push('>');

                        if name == "iframe" {
                            // iframes are closed on the spot.
                            self.out.push_str("</iframe>");
                            if wrap {
                                self.out.push_str("</div>");
                            }
                        } else {
                            self.tag_stack.push(name);
                        }
                    }
                } else if is_blocked_tag(&name) {
                    self.blocked_depth += 1;
                    return match name.as_str() {
                        "script" => TokenSinkResult::RawData(RawKind::ScriptData),
                        "style" => TokenSinkResult::RawData(RawKind::Rawtext),
                        _ => TokenSinkResult::Continue,
                    };
                }
            }
            TagKind::EndTag => {
                if name == "iframe" {
                    return TokenSinkResult::Continue;
                }
                if is_valid_tag(&name) && self.tag_stack.contains(&name) {
                    self.out.push_str("</");
                    self.out.push_str(&name);
                    self.out.push('>');
                } else if is_blocked_tag(&name) {
                    self.blocked_depth -= 1;
                }
            }
        }
        TokenSinkResult::Continue
    }

    /// Serialized attribute string for a kept element, or `None` when
    /// a required attribute did not survive.
    fn sanitize_attrs(&self, tag_name: &str, tag: &Tag) -> Option<String> {
        let required: &[&str] = match tag_name {
            "a" => &["href"],
            "iframe" => &["src"],
            "img" => &["src"],
            "source" => &["src", "srcset"],
            _ => &[],
        };
        let mut satisfied = required.is_empty();

        let mut out = String::new();
        for attr in &tag.attrs {
            let key = attr.name.local.as_ref();
            if !is_valid_attr(tag_name, key) {
                continue;
            }

            let mut value = attr.value.to_string();
            if (tag_name == "img" || tag_name == "source") && key == "srcset" {
                value = self.sanitize_srcset(&value);
            } else if is_external_resource_attr(key) {
                if tag_name == "iframe" {
                    if !self.is_safe_iframe_source(&value) {
                        continue;
                    }
                } else if !(tag_name == "img" && key == "src" && is_valid_data_attr(&value)) {
                    value = util::absolute_url(&value, &self.base_url);
                    if value.is_empty()
                        || !has_valid_uri_scheme(&value)
                        || is_blocked_resource(&value)
                    {
                        continue;
                    }
                }
            }

            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&util::escape_html(&value));
            out.push('"');
            satisfied = satisfied || required.contains(&key);
        }
        if !satisfied {
            return None;
        }

        match tag_name {
            "a" => out.push_str(r#" rel="noopener noreferrer" target="_blank" referrerpolicy="no-referrer""#),
            "video" | "audio" => out.push_str(" controls"),
            "iframe" => {
                out.push_str(r#" sandbox="allow-scripts allow-same-origin allow-popups" loading="lazy""#)
            }
            "img" => out.push_str(r#" loading="lazy" referrerpolicy="no-referrer""#),
            _ => {}
        }
        Some(out)
    }

    /// One or more comma-separated image candidates, each a URL with
    /// an optional width or density descriptor.
    fn sanitize_srcset(&self, srcset: &str) -> String {
        let mut kept = Vec::new();
        for candidate in srcset.split(", ") {
            let parts: Vec<&str> = candidate.trim().splitn(3, ' ').collect();
            let Some(first) = parts.first() else {
                continue;
            };
            let mut src = first.to_string();
            if !src.starts_with("data:") {
                src = util::absolute_url(&src, &self.base_url);
                if src.is_empty() {
                    continue;
                }
            }
            if parts.len() == 2 && is_valid_width_or_density(parts[1]) {
                src.push(' ');
                src.push_str(parts[1]);
            }
            kept.push(src);
        }
        kept.join(", ")
    }

    fn is_safe_iframe_source(&self, src: &str) -> bool {
        let domain = util::url_domain(src);
        // Same-origin embeds are always allowed.
        if util::url_domain(&self.base_url) == domain {
            return true;
        }
        SAFE_IFRAME_DOMAINS.contains(domain.as_str())
    }

    fn is_known_video_iframe(&self, tag: &Tag) -> bool {
        if tag.name.as_ref() != "iframe" {
            return false;
        }
        tag.attrs.iter().any(|attr| {
            attr.name.local.as_ref() == "src"
                && VIDEO_WHITELIST.contains(util::url_domain(&attr.value).as_str())
        })
    }
}

fn is_valid_tag(name: &str) -> bool {
    ALLOWED_TAGS.contains(name) || SVG_TAGS.contains(name) || SVG_FILTERS.contains(name)
}

fn is_blocked_tag(name: &str) -> bool {
    matches!(name, "script" | "style" | "noscript")
}

fn is_valid_attr(tag_name: &str, attr_name: &str) -> bool {
    if let Some(attrs) = ALLOWED_ATTRS.get(tag_name) {
        return attrs.contains(attr_name);
    }
    if SVG_TAGS.contains(tag_name) || SVG_FILTERS.contains(tag_name) {
        return SVG_ATTRS.contains(attr_name);
    }
    false
}

fn is_external_resource_attr(attr: &str) -> bool {
    matches!(attr, "src" | "href" | "poster" | "cite")
}

fn has_valid_uri_scheme(src: &str) -> bool {
    match src.split_once(':') {
        Some((scheme, _)) => ALLOWED_URI_SCHEMES.contains(scheme),
        None => false,
    }
}

fn is_blocked_resource(src: &str) -> bool {
    BLOCKED_RESOURCES.iter().any(|needle| src.contains(needle))
}

fn is_valid_width_or_density(value: &str) -> bool {
    let Some(last) = value.as_bytes().last() else {
        return false;
    };
    if *last != b'w' && *last != b'x' {
        return false;
    }
    value[..value.len() - 1].parse::<f32>().is_ok()
}

fn is_valid_data_attr(value: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "data:image/avif",
        "data:image/apng",
        "data:image/png",
        "data:image/svg",
        "data:image/svg+xml",
        "data:image/jpg",
        "data:image/jpeg",
        "data:image/gif",
        "data:image/webp",
    ];
    PREFIXES.iter().any(|prefix| value.starts_with(prefix))
}

// Tag set taken from DOMPurify's defaults.
static ALLOWED_TAGS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "abbr", "acronym", "address", "area", "article", "aside", "audio", "b", "bdi",
        "bdo", "big", "blink", "blockquote", "body", "br", "button", "canvas", "caption",
        "center", "cite", "code", "col", "colgroup", "content", "data", "datalist", "dd",
        "del", "details", "dfn", "dialog", "dir", "div", "dl", "dt", "em", "fieldset",
        "figcaption", "figure", "font", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
        "head", "header", "hgroup", "hr", "html", "i", "iframe", "img", "input", "ins", "kbd",
        "label", "legend", "li", "main", "map", "mark", "marquee", "menu", "menuitem", "meter",
        "nav", "nobr", "ol", "optgroup", "option", "output", "p", "picture", "pre", "progress",
        "q", "rp", "rt", "ruby", "s", "samp", "section", "select", "small", "source", "spacer",
        "span", "strike", "strong", "sub", "summary", "sup", "table", "tbody", "td", "template",
        "textarea", "tfoot", "th", "thead", "time", "tr", "track", "tt", "u", "ul", "var",
        "video", "wbr",
    ]
    .into_iter()
    .collect()
});

static SVG_TAGS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "svg", "a", "altglyph", "altglyphdef", "altglyphitem", "animatecolor", "animatemotion",
        "animatetransform", "circle", "clippath", "defs", "desc", "ellipse", "filter", "font",
        "g", "glyph", "glyphref", "hkern", "image", "line", "lineargradient", "marker", "mask",
        "metadata", "mpath", "path", "pattern", "polygon", "polyline", "radialgradient", "rect",
        "stop", "switch", "symbol", "text", "textpath", "title", "tref", "tspan", "view",
        "vkern",
    ]
    .into_iter()
    .collect()
});

// Tokenizers lowercase element names, so the filter family is listed
// lowercased as well.
static SVG_FILTERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "feblend", "fecolormatrix", "fecomponenttransfer", "fecomposite", "feconvolvematrix",
        "fediffuselighting", "fedisplacementmap", "fedistantlight", "feflood", "fefunca",
        "fefuncb", "fefuncg", "fefuncr", "fegaussianblur", "femerge", "femergenode",
        "femorphology", "feoffset", "fepointlight", "fespecularlighting", "fespotlight",
        "fetile", "feturbulence",
    ]
    .into_iter()
    .collect()
});

static ALLOWED_ATTRS: Lazy<HashMap<&'static str, HashSet<&'static str>>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, HashSet<&'static str>> = HashMap::new();
    let mut add = |tag: &'static str, attrs: &[&'static str]| {
        map.insert(tag, attrs.iter().copied().collect());
    };
    add("img", &["alt", "title", "src", "srcset", "sizes"]);
    add("audio", &["src"]);
    add("video", &["poster", "height", "width", "src"]);
    add("source", &["src", "type", "srcset", "sizes", "media"]);
    add("td", &["rowspan", "colspan"]);
    add("th", &["rowspan", "colspan"]);
    add("q", &["cite"]);
    add("a", &["href", "title"]);
    add("time", &["datetime"]);
    add("abbr", &["title"]);
    add("acronym", &["title"]);
    add(
        "iframe",
        &["width", "height", "frameborder", "src", "allowfullscreen"],
    );
    add("progress", &["value", "max"]);
    map
});

static SVG_ATTRS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "accent-height", "accumulate", "additive", "alignment-baseline", "ascent",
        "attributename", "attributetype", "azimuth", "basefrequency", "baseline-shift",
        "begin", "bias", "by", "class", "clip", "clippathunits", "clip-path", "clip-rule",
        "color", "color-interpolation", "color-interpolation-filters", "color-profile",
        "color-rendering", "cx", "cy", "d", "dx", "dy", "diffuseconstant", "direction",
        "display", "divisor", "dur", "edgemode", "elevation", "end", "fill", "fill-opacity",
        "fill-rule", "filter", "filterunits", "flood-color", "flood-opacity", "font-family",
        "font-size", "font-size-adjust", "font-stretch", "font-style", "font-variant",
        "font-weight", "fx", "fy", "g1", "g2", "glyph-name", "glyphref", "gradientunits",
        "gradienttransform", "height", "href", "id", "image-rendering", "in", "in2", "k",
        "k1", "k2", "k3", "k4", "kerning", "keypoints", "keysplines", "keytimes", "lang",
        "lengthadjust", "letter-spacing", "kernelmatrix", "kernelunitlength",
        "lighting-color", "local", "marker-end", "marker-mid", "marker-start", "markerheight",
        "markerunits", "markerwidth", "maskcontentunits", "maskunits", "max", "mask", "media",
        "method", "mode", "min", "name", "numoctaves", "offset", "operator", "opacity",
        "order", "orient", "orientation", "origin", "overflow", "paint-order", "path",
        "pathlength", "patterncontentunits", "patterntransform", "patternunits", "points",
        "preservealpha", "preserveaspectratio", "primitiveunits", "r", "rx", "ry", "radius",
        "refx", "refy", "repeatcount", "repeatdur", "restart", "result", "rotate", "scale",
        "seed", "shape-rendering", "specularconstant", "specularexponent", "spreadmethod",
        "startoffset", "stddeviation", "stitchtiles", "stop-color", "stop-opacity",
        "stroke-dasharray", "stroke-dashoffset", "stroke-linecap", "stroke-linejoin",
        "stroke-miterlimit", "stroke-opacity", "stroke", "stroke-width", "surfacescale",
        "systemlanguage", "tabindex", "targetx", "targety", "transform", "text-anchor",
        "text-decoration", "text-rendering", "textlength", "type", "u1", "u2", "unicode",
        "values", "viewbox", "visibility", "version", "vert-adv-y", "vert-origin-x",
        "vert-origin-y", "width", "word-spacing", "wrap", "writing-mode", "xchannelselector",
        "ychannelselector", "x", "x1", "x2", "xmlns", "y", "y1", "y2", "z", "zoomandpan",
    ]
    .into_iter()
    .collect()
});

static ALLOWED_URI_SCHEMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["http", "https", "ftp", "ftps", "tel", "mailto", "callto", "cid", "xmpp"]
        .into_iter()
        .collect()
});

static BLOCKED_RESOURCES: &[&str] = &[
    "feedsportal.com",
    "api.flattr.com",
    "stats.wordpress.com",
    "plus.google.com/share",
    "twitter.com/share",
    "feeds.feedburner.com",
];

static SAFE_IFRAME_DOMAINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "bandcamp.com",
        "cdn.embedly.com",
        "invidio.us",
        "player.bilibili.com",
        "player.vimeo.com",
        "soundcloud.com",
        "vk.com",
        "w.soundcloud.com",
        "www.dailymotion.com",
        "www.youtube-nocookie.com",
        "www.youtube.com",
    ]
    .into_iter()
    .collect()
});

static VIDEO_WHITELIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "player.bilibili.com",
        "player.vimeo.com",
        "www.dailymotion.com",
        "www.youtube-nocookie.com",
        "www.youtube.com",
    ]
    .into_iter()
    .collect()
});
