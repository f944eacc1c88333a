mod common;

use chrono::{Duration, Utc};

use feedloom::models::item::{self, delete_old_items};
use feedloom::models::{Feed, HttpState, Item, ItemFilter, ItemStatus, NewItem};

fn new_item(feed_id: i32, guid: &str, days_ago: i64) -> NewItem {
    let date = Utc::now() - Duration::days(days_ago);
    NewItem {
        guid: guid.to_string(),
        feed_id,
        title: format!("title {guid}"),
        link: format!("https://example.com/{guid}"),
        content: format!("<p>content {guid}</p>"),
        content_text: format!("content {guid}"),
        date,
        date_arrived: date,
        status: ItemStatus::Unread,
        image: None,
        audio_url: None,
    }
}

#[test]
fn create_batch_is_idempotent_on_guid() {
    let (_dir, pool) = common::test_pool();
    let mut conn = pool.get().unwrap();
    let feed = Feed::create(&mut conn, "t", "", "https://example.com/rss", None).unwrap();

    let batch = vec![new_item(feed.id, "a", 1), new_item(feed.id, "b", 2)];
    let date_a = batch[0].date;
    Item::create_batch(&mut conn, feed.id, batch.clone(), Utc::now(), None).unwrap();
    Item::create_batch(&mut conn, feed.id, batch, Utc::now(), None).unwrap();

    let items = Item::list(&mut conn, &ItemFilter::default(), 100).unwrap();
    assert_eq!(items.len(), 2);
    // Stored instants survive the round trip as the same UTC instant.
    let stored_a = items.iter().find(|i| i.guid == "a").unwrap();
    assert_eq!(stored_a.date.timestamp_millis(), date_a.timestamp_millis());

    // Only refresh bookkeeping moved.
    let reloaded = Feed::get(&mut conn, feed.id).unwrap();
    assert!(reloaded.last_refreshed.is_some());
    assert_eq!(reloaded.size, 2);
}

#[test]
fn create_batch_records_http_state() {
    let (_dir, pool) = common::test_pool();
    let mut conn = pool.get().unwrap();
    let feed = Feed::create(&mut conn, "t", "", "https://example.com/rss", None).unwrap();

    let state = HttpState {
        last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".into()),
        etag: Some("\"x\"".into()),
    };
    Item::create_batch(
        &mut conn,
        feed.id,
        vec![new_item(feed.id, "a", 1)],
        Utc::now(),
        Some(&state),
    )
    .unwrap();

    assert_eq!(Feed::get_http_state(&mut conn, feed.id).unwrap(), state);
}

#[test]
fn list_filters_by_status_feed_and_search() {
    let (_dir, pool) = common::test_pool();
    let mut conn = pool.get().unwrap();
    let feed = Feed::create(&mut conn, "t", "", "https://example.com/rss", None).unwrap();
    let other = Feed::create(&mut conn, "o", "", "https://other.com/rss", None).unwrap();

    Item::create_batch(
        &mut conn,
        feed.id,
        vec![
            new_item(feed.id, "apple-pie", 1),
            new_item(feed.id, "banana-bread", 2),
        ],
        Utc::now(),
        None,
    )
    .unwrap();
    Item::create_batch(
        &mut conn,
        other.id,
        vec![new_item(other.id, "apple-cake", 3)],
        Utc::now(),
        None,
    )
    .unwrap();

    let by_feed = Item::list(
        &mut conn,
        &ItemFilter {
            feed_id: Some(feed.id),
            ..Default::default()
        },
        100,
    )
    .unwrap();
    assert_eq!(by_feed.len(), 2);

    // Search words are ANDed across title and extracted text.
    let by_search = Item::list(
        &mut conn,
        &ItemFilter {
            search: Some("content apple".into()),
            ..Default::default()
        },
        100,
    )
    .unwrap();
    assert_eq!(by_search.len(), 2);

    let by_both = Item::list(
        &mut conn,
        &ItemFilter {
            feed_id: Some(feed.id),
            search: Some("apple".into()),
            ..Default::default()
        },
        100,
    )
    .unwrap();
    assert_eq!(by_both.len(), 1);
    assert_eq!(by_both[0].guid, "apple-pie");
}

#[test]
fn cursor_pagination_is_a_half_open_bound() {
    let (_dir, pool) = common::test_pool();
    let mut conn = pool.get().unwrap();
    let feed = Feed::create(&mut conn, "t", "", "https://example.com/rss", None).unwrap();

    let batch: Vec<NewItem> = (0..5)
        .map(|i| new_item(feed.id, &format!("g{i}"), i))
        .collect();
    Item::create_batch(&mut conn, feed.id, batch, Utc::now(), None).unwrap();

    let first_page = Item::list(&mut conn, &ItemFilter::default(), 2).unwrap();
    assert_eq!(first_page.len(), 2);
    assert_eq!(first_page[0].guid, "g0"); // newest first

    let second_page = Item::list(
        &mut conn,
        &ItemFilter {
            after: Some(first_page[1].id),
            ..Default::default()
        },
        2,
    )
    .unwrap();
    assert_eq!(second_page.len(), 2);
    assert_eq!(second_page[0].guid, "g2");

    // Oldest-first walks the other way from the same anchor.
    let upward = Item::list(
        &mut conn,
        &ItemFilter {
            after: Some(second_page[0].id),
            oldest_first: true,
            ..Default::default()
        },
        10,
    )
    .unwrap();
    assert_eq!(upward.len(), 2);
    assert_eq!(upward[0].guid, "g1");
}

#[test]
fn mark_read_never_demotes_starred() {
    let (_dir, pool) = common::test_pool();
    let mut conn = pool.get().unwrap();
    let feed = Feed::create(&mut conn, "t", "", "https://example.com/rss", None).unwrap();

    Item::create_batch(
        &mut conn,
        feed.id,
        vec![
            new_item(feed.id, "a", 1),
            new_item(feed.id, "b", 2),
            new_item(feed.id, "c", 3),
        ],
        Utc::now(),
        None,
    )
    .unwrap();

    let items = Item::list(&mut conn, &ItemFilter::default(), 100).unwrap();
    let starred_id = items.iter().find(|i| i.guid == "b").unwrap().id;
    Item::update_status(&mut conn, starred_id, ItemStatus::Starred).unwrap();

    Item::mark_read(&mut conn, &ItemFilter::default()).unwrap();

    let after = Item::list(&mut conn, &ItemFilter::default(), 100).unwrap();
    for item in &after {
        if item.id == starred_id {
            assert_eq!(item.status, ItemStatus::Starred);
        } else {
            assert_eq!(item.status, ItemStatus::Read);
        }
    }
}

#[test]
fn mark_read_cursor_includes_the_boundary_row() {
    let (_dir, pool) = common::test_pool();
    let mut conn = pool.get().unwrap();
    let feed = Feed::create(&mut conn, "t", "", "https://example.com/rss", None).unwrap();

    let batch: Vec<NewItem> = (0..4)
        .map(|i| new_item(feed.id, &format!("g{i}"), i))
        .collect();
    Item::create_batch(&mut conn, feed.id, batch, Utc::now(), None).unwrap();

    let items = Item::list(&mut conn, &ItemFilter::default(), 100).unwrap();
    let boundary = items[1].id; // g1: mark g1 and everything older

    Item::mark_read(
        &mut conn,
        &ItemFilter {
            after: Some(boundary),
            ..Default::default()
        },
    )
    .unwrap();

    let after = Item::list(&mut conn, &ItemFilter::default(), 100).unwrap();
    let statuses: Vec<(String, ItemStatus)> = after
        .iter()
        .map(|i| (i.guid.clone(), i.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("g0".to_string(), ItemStatus::Unread),
            ("g1".to_string(), ItemStatus::Read),
            ("g2".to_string(), ItemStatus::Read),
            ("g3".to_string(), ItemStatus::Read),
        ]
    );
}

#[test]
fn retention_keeps_the_floor_and_spares_unread_and_starred() {
    let (_dir, pool) = common::test_pool();
    let mut conn = pool.get().unwrap();
    let feed = Feed::create(&mut conn, "t", "", "https://example.com/rss", None).unwrap();

    // 200 read items aged 120 days.
    let mut batch: Vec<NewItem> = (0..200)
        .map(|i| {
            let mut item = new_item(feed.id, &format!("read-{i}"), 120);
            item.date = Utc::now() - Duration::days(120) - Duration::minutes(i);
            item.date_arrived = item.date;
            item.status = ItemStatus::Read;
            item
        })
        .collect();
    // 5 unread aged 200 days, 3 starred aged 400 days.
    batch.extend((0..5).map(|i| {
        let mut item = new_item(feed.id, &format!("unread-{i}"), 200);
        item.date_arrived = item.date;
        item
    }));
    batch.extend((0..3).map(|i| {
        let mut item = new_item(feed.id, &format!("star-{i}"), 400);
        item.date_arrived = item.date;
        item.status = ItemStatus::Starred;
        item
    }));
    Item::create_batch(&mut conn, feed.id, batch, Utc::now(), None).unwrap();

    // The feed historically provides batches of 10.
    diesel::RunQueryDsl::execute(
        diesel::sql_query(format!("update feeds set size = 10 where id = {}", feed.id)),
        &mut conn,
    )
    .unwrap();

    delete_old_items(&mut conn);

    let remaining = Item::list(&mut conn, &ItemFilter::default(), 1000).unwrap();
    let read = remaining
        .iter()
        .filter(|i| i.status == ItemStatus::Read)
        .count();
    let unread = remaining
        .iter()
        .filter(|i| i.status == ItemStatus::Unread)
        .count();
    let starred = remaining
        .iter()
        .filter(|i| i.status == ItemStatus::Starred)
        .count();

    assert_eq!(read, item::ITEMS_KEEP_SIZE as usize); // floor of 50 wins over size=10
    assert_eq!(unread, 5);
    assert_eq!(starred, 3);

    // The 50 newest read items are the ones kept.
    let kept: Vec<&str> = remaining
        .iter()
        .filter(|i| i.status == ItemStatus::Read)
        .map(|i| i.guid.as_str())
        .collect();
    for i in 0..50 {
        assert!(kept.contains(&format!("read-{i}").as_str()));
    }
}

#[test]
fn retention_spares_recent_read_items() {
    let (_dir, pool) = common::test_pool();
    let mut conn = pool.get().unwrap();
    let feed = Feed::create(&mut conn, "t", "", "https://example.com/rss", None).unwrap();

    let batch: Vec<NewItem> = (0..100)
        .map(|i| {
            let mut item = new_item(feed.id, &format!("fresh-{i}"), 1);
            item.status = ItemStatus::Read;
            item
        })
        .collect();
    Item::create_batch(&mut conn, feed.id, batch, Utc::now(), None).unwrap();

    delete_old_items(&mut conn);

    // Nothing arrived more than 90 days ago, so nothing is pruned.
    let remaining = Item::list(&mut conn, &ItemFilter::default(), 1000).unwrap();
    assert_eq!(remaining.len(), 100);
}

#[test]
fn folder_delete_cascades_to_feeds_and_items() {
    let (_dir, pool) = common::test_pool();
    let mut conn = pool.get().unwrap();
    let folder = feedloom::models::Folder::create(&mut conn, "news").unwrap();
    let feed = Feed::create(
        &mut conn,
        "t",
        "",
        "https://example.com/rss",
        Some(folder.id),
    )
    .unwrap();
    Item::create_batch(
        &mut conn,
        feed.id,
        vec![new_item(feed.id, "a", 1)],
        Utc::now(),
        None,
    )
    .unwrap();

    feedloom::models::Folder::delete(&mut conn, folder.id).unwrap();

    assert!(Feed::get(&mut conn, feed.id).is_err());
    assert!(Item::list(&mut conn, &ItemFilter::default(), 10)
        .unwrap()
        .is_empty());
}
