//! Tag and tagged-entity repository tests against PostgreSQL.

use stratum_db::test_fixtures::TestDatabase;
use stratum_db::{
    CreateEventRequest, CreateFileRequest, TagLookup, TagRepository, TaggedEntityRepository,
};

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_get_or_create_is_idempotent() {
    let t = TestDatabase::new().await;

    let a = t
        .db
        .tags
        .get_or_create(t.tenant_id, "color", " red ")
        .await
        .expect("create");
    let b = t
        .db
        .tags
        .get_or_create(t.tenant_id, "color", "red")
        .await
        .expect("get");
    assert_eq!(a.id, b.id);
    assert_eq!(a.name, "red");

    let blank_type = t
        .db
        .tags
        .get_or_create(t.tenant_id, "  ", "misc")
        .await
        .expect("default type");
    assert_eq!(blank_type.tag_type, "default");

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_name_contains_escapes_wildcards() {
    let t = TestDatabase::new().await;
    t.db.tags
        .get_or_create(t.tenant_id, "promo", "50%_off")
        .await
        .expect("create");
    t.db.tags
        .get_or_create(t.tenant_id, "promo", "500 off")
        .await
        .expect("create");

    let lookup = TagLookup {
        name_contains: Some("0%_".to_string()),
        ..Default::default()
    };
    let found = t
        .db
        .tags
        .find_many(t.tenant_id, &lookup, 0, 10)
        .await
        .expect("lookup");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "50%_off");

    t.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_entity_membership_and_cooccurrence() {
    let t = TestDatabase::new().await;
    let red = t.db.tags.get_or_create(t.tenant_id, "color", "red").await.unwrap();
    let blue = t.db.tags.get_or_create(t.tenant_id, "color", "blue").await.unwrap();
    let big = t.db.tags.get_or_create(t.tenant_id, "size", "big").await.unwrap();

    let file = t
        .db
        .files
        .create(
            t.tenant_id,
            CreateFileRequest {
                file_name: "a.png".to_string(),
                object_key: "uploads/a.png".to_string(),
                thumbnail_key: None,
            },
        )
        .await
        .expect("create file");
    t.db.files
        .set_tags(t.tenant_id, file.id, &[red.id, big.id])
        .await
        .expect("set tags");
    // Idempotent add.
    t.db.files.add_tag(t.tenant_id, file.id, red.id).await.unwrap();

    let event = t
        .db
        .events
        .create(
            t.tenant_id,
            CreateEventRequest {
                event_name: "launch".to_string(),
                ..Default::default()
            },
        )
        .await
        .expect("create event");
    t.db.events.add_tag(t.tenant_id, event.id, blue.id).await.unwrap();

    let ids = t
        .db
        .files
        .ids_with_any_tag(t.tenant_id, &[red.id, blue.id])
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    assert!(ids.contains(&file.id));

    let page = t
        .db
        .files
        .fetch_page(t.tenant_id, &[file.id], 0, 10)
        .await
        .unwrap();
    assert_eq!(page[0].tag_ids, vec![red.id, big.id]);

    let co = t
        .db
        .files
        .tag_ids_cooccurring_with_all(t.tenant_id, &[red.id])
        .await
        .unwrap();
    assert!(co.contains(&big.id));
    assert!(!co.contains(&blue.id));

    // Deleting a tag detaches it everywhere.
    t.db.tags.delete(t.tenant_id, big.id).await.unwrap();
    let page = t
        .db
        .files
        .fetch_page(t.tenant_id, &[file.id], 0, 10)
        .await
        .unwrap();
    assert_eq!(page[0].tag_ids, vec![red.id]);

    t.cleanup().await;
}
