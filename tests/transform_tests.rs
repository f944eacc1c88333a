mod common;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedloom::transform::{self, Rule};

const PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Example Blog</title></head>
<body>
  <article class="post">
    <h2><a href="/posts/2">Second</a></h2>
    <div class="body"><p>Later</p></div>
    <time datetime="2024-02-01T00:00:00Z">Feb 1</time>
  </article>
  <article class="post">
    <h2><a href="/posts/1">First</a></h2>
    <div class="body"><p>Earlier</p></div>
    <time datetime="2024-01-01T00:00:00Z">Jan 1</time>
  </article>
</body></html>"#;

#[tokio::test(flavor = "multi_thread")]
async fn html_rule_scrapes_a_page_into_a_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blog"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .mount(&server)
        .await;

    let registry = common::test_registry();
    let url = format!(
        "feedloom://html?url={}&items=article.post&item_title=h2&item_url=h2%20a&item_content=.body&item_date_published=time&item_date_published_attr=datetime",
        urlencode(&format!("{}/blog", server.uri()))
    );
    let Rule::Html(rule) = Rule::from_url(&url).unwrap() else {
        panic!("expected html rule")
    };
    let feed = transform::html::apply(&rule, &registry.fetcher).await.unwrap();

    assert_eq!(feed.title, "Example Blog");
    assert_eq!(feed.items.len(), 2);
    assert_eq!(feed.items[0].title, "Second");
    assert_eq!(feed.items[0].url, format!("{}/posts/2", server.uri()));
    assert!(feed.items[0].date.unwrap() > feed.items[1].date.unwrap());
    assert!(feed.items[1].content.contains("Earlier"));
}

#[tokio::test(flavor = "multi_thread")]
async fn json_rule_projects_an_api_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/posts"))
        .and(header("x-token", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"data": {"posts": [
                {"headline": "One", "slug": "one", "body": "<p>1</p>", "at": "2024-01-01T00:00:00Z"},
                {"headline": "Two", "slug": "two", "body": "<p>2</p>", "at": "2024-02-01T00:00:00Z"}
            ]}}"#,
        ))
        .mount(&server)
        .await;

    let registry = common::test_registry();
    let url = format!(
        "feedloom://json?url={}&home_page_url=https%3A%2F%2Fexample.com&items=data.posts&item_title=headline&item_url=slug&item_url_prefix=https%3A%2F%2Fexample.com%2Fp%2F&item_content=body&item_date_published=at&headers=%7B%22x-token%22%3A%22secret%22%7D",
        urlencode(&format!("{}/api/posts", server.uri()))
    );
    let Rule::Json(rule) = Rule::from_url(&url).unwrap() else {
        panic!("expected json rule")
    };
    let feed = transform::json::apply(&rule, &registry.fetcher).await.unwrap();

    assert_eq!(feed.site_url, "https://example.com");
    assert_eq!(feed.items.len(), 2);
    assert_eq!(feed.items[0].title, "Two");
    assert_eq!(feed.items[0].url, "https://example.com/p/two");
    assert_eq!(feed.items[0].guid, "https://example.com/p/two");
}

#[tokio::test(flavor = "multi_thread")]
async fn script_rule_exports_a_feed() {
    let registry = common::test_registry();
    let script = r#"
        const items = [];
        for (let i = 1; i <= 3; i++) {
            items.push({
                id: `https://example.com/${i}`,
                url: `https://example.com/${i}`,
                title: `post ${i}`,
                date_published: `2024-0${i}-01T00:00:00Z`,
            });
        }
        module.exports = { title: 'Generated', home_page_url: 'https://example.com', items };
    "#;
    let url = format!("feedloom://js?script={}", urlencode(script));
    let Rule::Script(rule) = Rule::from_url(&url).unwrap() else {
        panic!("expected script rule")
    };
    let feed = transform::script::apply(&rule, registry).await.unwrap();

    assert_eq!(feed.title, "Generated");
    assert_eq!(feed.items.len(), 3);
    // Newest first.
    assert_eq!(feed.items[0].title, "post 3");
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
