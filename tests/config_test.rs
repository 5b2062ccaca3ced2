// Test configuration loading
use ct_vat::config::Config;
use ct_vat::database::{register_server, MemoryStorage, Storage};
use std::path::Path;

#[test]
fn test_load_test_config() {
    let config_path = Path::new("tests/fixtures/test_config.toml");
    let config = Config::from_file(config_path).expect("Failed to load test config");

    assert_eq!(config.download.slice_size, 100);
    assert_eq!(config.download.page_size, 50);
    assert_eq!(config.download.retry_delay_ms, 20);

    assert_eq!(config.decoder.allowed_suffixes, vec![".be", ".brussels"]);

    assert_eq!(config.crawler.max_depth, 3);
    assert_eq!(config.crawler.page_timeout_secs, 2);
    assert!(config.crawler.user_agent.starts_with("ct-vat/"));

    assert_eq!(config.pipeline.slice_workers, 2);
    assert_eq!(config.pipeline.scrape_workers, 4);

    assert!(!config.database.enabled);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.servers.len(), 2);
}

#[tokio::test]
async fn test_configured_servers_register_once() {
    let config = Config::from_file(Path::new("tests/fixtures/test_config.toml")).unwrap();
    let storage = MemoryStorage::new();

    for entry in &config.servers {
        register_server(&storage, &entry.url, entry.nickname.as_deref())
            .await
            .unwrap();
    }

    let servers = storage.list_servers().await.unwrap();
    assert_eq!(servers.len(), 2);
    assert_eq!(servers[0].url, "https://ct.googleapis.com/logs/argon2024/");
    assert_eq!(servers[0].nickname, "Argon 2024");
    assert_eq!(servers[1].nickname, "https://oak.ct.letsencrypt.org/2024h1/");

    let again = register_server(&storage, &config.servers[0].url, None).await;
    assert!(again.is_err());
}
