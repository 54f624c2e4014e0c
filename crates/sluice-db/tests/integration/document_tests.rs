use sluice_core::models::{ContentType, NewDocument, compute_hash};
use sluice_core::traits::{DocumentStore, UrlTracker};

use crate::integration::common::setup_test_db;

fn document(url: &str, content: &str) -> NewDocument {
    NewDocument {
        url: url.into(),
        title: Some("Title".into()),
        content: content.into(),
        fingerprint: compute_hash(content),
        content_type: ContentType::PlainText,
        provider: "http".into(),
        processor: "plaintext".into(),
    }
}

#[tokio::test]
async fn save_and_retrieve_document() {
    let (db, _container) = setup_test_db().await;
    let repo = db.documents();

    let doc = document("https://example.com", "Hello world");
    let id = repo.save(&doc).await.unwrap();
    assert!(!id.is_nil());

    let latest = repo
        .get_latest("https://example.com")
        .await
        .unwrap()
        .expect("Should find the document");
    assert_eq!(latest.id, id);
    assert_eq!(latest.content, "Hello world");
    assert_eq!(latest.content_type, ContentType::PlainText);
    assert_eq!(latest.fingerprint, compute_hash("Hello world"));
}

#[tokio::test]
async fn fingerprints_are_unique() {
    let (db, _container) = setup_test_db().await;
    let repo = db.documents();

    let fingerprint = compute_hash("same text");
    assert!(!DocumentStore::contains_fingerprint(&repo, &fingerprint).await.unwrap());

    let first = DocumentStore::save(&repo, &document("https://a.com", "same text"))
        .await
        .unwrap();
    let second = DocumentStore::save(&repo, &document("https://b.com", "same text"))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert!(DocumentStore::contains_fingerprint(&repo, &fingerprint).await.unwrap());
    assert!(repo.get_latest("https://b.com").await.unwrap().is_none());
}

#[tokio::test]
async fn tracked_urls_are_deduplicated_and_sorted() {
    let (db, _container) = setup_test_db().await;
    let urls = db.urls();

    for url in ["https://b.com/x", "https://a.com/y", "https://b.com/x"] {
        urls.track(url).await.unwrap();
    }

    assert_eq!(
        urls.known_urls().await.unwrap(),
        vec!["https://a.com/y", "https://b.com/x"]
    );
}
