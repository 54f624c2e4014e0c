use sluice_core::selector::{SelectionRule, Selector};

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn rules_keep_declaration_order() {
    let (db, _container) = setup_test_db().await;
    let repo = db.rules();

    repo.add(&SelectionRule::new("*.pdf", "docling", 15)).await.unwrap();
    repo.add(&SelectionRule::new("news.com", "browser", 10)).await.unwrap();

    let rules = repo.list().await.unwrap();
    assert_eq!(rules[0], SelectionRule::new("*.pdf", "docling", 15));
    assert_eq!(rules[1].pattern, "news.com");

    let selector = Selector::new();
    selector.replace_rules(rules).unwrap();
    assert_eq!(
        selector.resolve("https://news.com/a").unwrap().provider_name,
        "browser"
    );
}

#[tokio::test]
async fn replace_all_swaps_the_rule_set() {
    let (db, _container) = setup_test_db().await;
    let repo = db.rules();

    repo.add(&SelectionRule::new("old.com", "http", 1)).await.unwrap();
    repo.replace_all(&[
        SelectionRule::new("a.com", "browser", 5),
        SelectionRule::new("*.docx", "docling", 15),
    ])
    .await
    .unwrap();

    let patterns: Vec<String> = repo.list().await.unwrap().into_iter().map(|r| r.pattern).collect();
    assert_eq!(patterns, vec!["a.com", "*.docx"]);
}
