use std::sync::Arc;

use serde_json::json;
use sluice_core::config_store::{ConfigManager, ConfigStore};
use sluice_core::models::{CleanerConfig, ProviderConfiguration};
use sluice_core::validation::{ConfigurationRequest, ParameterService};

use crate::integration::common::setup_test_db;

fn request(provider: &str, params: serde_json::Value) -> ConfigurationRequest {
    ConfigurationRequest::new(provider, params.as_object().cloned().unwrap())
}

#[tokio::test]
async fn provider_configs_round_trip_through_postgres() {
    let (db, _container) = setup_test_db().await;
    let store: Arc<dyn ConfigStore<ProviderConfiguration>> = Arc::new(db.provider_configs());
    let service = ParameterService::with_builtin_validators(Arc::new(ConfigManager::new(
        "providers",
        store.clone(),
    )));

    service
        .set_configuration("https://a.com", &request("http", json!({"timeout_ms": "5000"})))
        .await
        .unwrap();

    let stored = store.get("https://a.com", "http").await.unwrap().unwrap();
    assert_eq!(stored.provider_name, "http");
    assert_eq!(stored.parameters.get("timeout_ms"), Some(&json!(5000)));
    assert_eq!(stored.parameters.get("follow_redirects"), Some(&json!(true)));
    assert!(stored.enabled);
}

#[tokio::test]
async fn set_upserts_and_list_is_ordered() {
    let (db, _container) = setup_test_db().await;
    let store = Arc::new(db.provider_configs());
    let service = ParameterService::with_builtin_validators(Arc::new(
        ConfigManager::<ProviderConfiguration>::new("providers", store.clone()),
    ));

    for url in ["https://b.com", "https://a.com"] {
        service
            .set_configuration(url, &request("http", json!({"timeout_ms": 2000})))
            .await
            .unwrap();
    }
    service
        .set_configuration("https://a.com", &request("http", json!({"timeout_ms": 9000})))
        .await
        .unwrap();
    service
        .set_configuration("https://a.com", &request("browser", json!({})))
        .await
        .unwrap();

    let all = store.list_all().await.unwrap();
    let keys: Vec<(&str, &str)> = all
        .iter()
        .map(|e| (e.url.as_str(), e.config.provider_name.as_str()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("https://a.com", "browser"),
            ("https://a.com", "http"),
            ("https://b.com", "http"),
        ]
    );
    assert_eq!(all[1].config.parameters.get("timeout_ms"), Some(&json!(9000)));
    assert_eq!(store.list_for_url("https://a.com").await.unwrap().len(), 2);
}

#[tokio::test]
async fn delete_one_key_or_whole_url() {
    let (db, _container) = setup_test_db().await;
    let store = Arc::new(db.provider_configs());
    let service = ParameterService::with_builtin_validators(Arc::new(
        ConfigManager::<ProviderConfiguration>::new("providers", store.clone()),
    ));
    for provider in ["http", "browser"] {
        service
            .set_configuration("https://a.com", &request(provider, json!({})))
            .await
            .unwrap();
    }
    service
        .set_configuration("https://b.com", &request("http", json!({})))
        .await
        .unwrap();

    store.delete("https://a.com", Some("http")).await.unwrap();
    assert!(store.get("https://a.com", "http").await.unwrap().is_none());
    assert!(store.get("https://a.com", "browser").await.unwrap().is_some());

    store.delete("https://a.com", None).await.unwrap();
    assert!(store.list_for_url("https://a.com").await.unwrap().is_empty());
    assert_eq!(store.list_all().await.unwrap().len(), 1);

    store.clear().await.unwrap();
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn cleaner_configs_live_in_their_own_table() {
    let (db, _container) = setup_test_db().await;
    let cleaners = db.cleaner_configs();
    let providers = db.provider_configs();

    let config = CleanerConfig::new("whitespace", 3)
        .disabled()
        .with_option("collapse_spaces", json!(false));
    cleaners.set("https://a.com", &config).await.unwrap();

    assert_eq!(
        cleaners.get("https://a.com", "whitespace").await.unwrap(),
        Some(config)
    );
    assert!(providers.list_all().await.unwrap().is_empty());
}
