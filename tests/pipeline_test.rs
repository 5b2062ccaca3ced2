// End-to-end pipeline tests against a mock CT log
use ct_vat::config::Config;
use ct_vat::database::{register_server, MemoryStorage, SliceOrder, Storage};
use ct_vat::pipeline::{Pipeline, PoolState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const LEAF: &str = include_str!("fixtures/vprmedia_leaf.b64");
const CHAIN: &str = include_str!("fixtures/vprmedia_chain.b64");

/// Answers get-entries with one entry per requested index
struct EntriesResponder {
    leaf: &'static str,
    chain: &'static str,
}

impl Respond for EntriesResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let param = |name: &str| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == name)
                .and_then(|(_, value)| value.parse::<u64>().ok())
                .unwrap_or(0)
        };
        let entries: Vec<_> = (param("start")..=param("end"))
            .map(|_| json!({"leaf_input": self.leaf, "extra_data": self.chain}))
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "entries": entries }))
    }
}

/// Like `EntriesResponder`, but never answers pages starting below `stall_below`
struct StallingResponder {
    stall_below: u64,
}

impl Respond for StallingResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let start = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "start")
            .and_then(|(_, value)| value.parse::<u64>().ok())
            .unwrap_or(0);
        let response = EntriesResponder {
            leaf: LEAF,
            chain: CHAIN,
        }
        .respond(request);
        if start < self.stall_below {
            response.set_delay(Duration::from_secs(60))
        } else {
            response
        }
    }
}

async fn mock_log(tree_size: u64, leaf: &'static str, chain: &'static str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-sth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tree_size": tree_size,
            "timestamp": 1528463612113u64,
            "sha256_root_hash": "",
            "tree_head_signature": ""
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(EntriesResponder { leaf, chain })
        .mount(&server)
        .await;
    server
}

fn test_config() -> Config {
    Config::from_toml(
        r#"
[download]
slice_size = 100
page_size = 50
request_timeout_secs = 5
retry_delay_ms = 20

[decoder]
allowed_suffixes = [".be"]

[crawler]
max_depth = -1

[pipeline]
slice_workers = 3
decode_workers = 4
scrape_workers = 2

[logging]
level = "info"
"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_full_drain_of_small_log() {
    let log = mock_log(300, LEAF, CHAIN).await;
    let storage = Arc::new(MemoryStorage::new());
    let server = register_server(storage.as_ref(), &log.uri(), Some("mock"))
        .await
        .unwrap();

    let pipeline = Pipeline::new(&test_config(), storage.clone()).unwrap();
    pipeline.scan_server(server.clone()).unwrap();
    tokio::time::timeout(Duration::from_secs(60), pipeline.wait_idle())
        .await
        .expect("pipeline did not drain");

    let slices = storage
        .list_slices_by_server(server.id(), SliceOrder::StartAsc)
        .await
        .unwrap();
    let ranges: Vec<(u64, u64)> = slices.iter().map(|s| (s.start, s.end)).collect();
    assert_eq!(ranges, vec![(0, 99), (100, 199), (200, 299)]);
    assert!(slices.iter().all(|s| s.is_consumed()));
    assert_eq!(slices[2].next, 300);

    assert_eq!(storage.count_certificates().await.unwrap(), 300);
    let issuers = storage.count_by_issuer().await.unwrap();
    assert_eq!(
        issuers,
        vec![("COMODO RSA Certification Authority".to_string(), 300)]
    );

    // Crawling is disabled, so every search ends as "not found"
    let summary = storage.vat_summary().await.unwrap();
    assert_eq!(summary.not_found, 300);
    assert_eq!(summary.not_searched, 0);

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.entries_fetched, 300);
    assert_eq!(stats.certificates_saved, 300);
}

#[tokio::test]
async fn test_rescan_keeps_only_the_watermark_slice() {
    let log = mock_log(300, LEAF, CHAIN).await;
    let storage = Arc::new(MemoryStorage::new());
    let server = register_server(storage.as_ref(), &log.uri(), None)
        .await
        .unwrap();

    let pipeline = Pipeline::new(&test_config(), storage.clone()).unwrap();
    pipeline.scan_server(server.clone()).unwrap();
    pipeline.wait_idle().await;

    pipeline.scan_server(server.clone()).unwrap();
    pipeline.wait_idle().await;

    let slices = storage
        .list_slices_by_server(server.id(), SliceOrder::StartAsc)
        .await
        .unwrap();
    assert_eq!(slices.len(), 1);
    assert_eq!((slices[0].start, slices[0].end, slices[0].next), (200, 299, 300));

    // Nothing new to download on the second pass
    assert_eq!(storage.count_certificates().await.unwrap(), 300);
}

#[tokio::test]
async fn test_malformed_log_does_not_affect_other_logs() {
    let good = mock_log(60, LEAF, CHAIN).await;
    let bad = mock_log(60, "AAAAAAAAAAAAAAAAAAAAAAAA", "").await;

    let storage = Arc::new(MemoryStorage::new());
    let good_server = register_server(storage.as_ref(), &good.uri(), Some("good"))
        .await
        .unwrap();
    let bad_server = register_server(storage.as_ref(), &bad.uri(), Some("bad"))
        .await
        .unwrap();

    let pipeline = Pipeline::new(&test_config(), storage.clone()).unwrap();
    pipeline.scan_server(bad_server).unwrap();
    pipeline.scan_server(good_server).unwrap();
    pipeline.wait_idle().await;

    assert_eq!(storage.count_certificates().await.unwrap(), 60);
    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.entries_fetched, 120);
    assert_eq!(stats.certificates_saved, 60);
    assert_eq!(stats.entries_malformed, 60);
}

#[tokio::test]
async fn test_stop_interrupts_slow_downloads() {
    let log = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-sth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tree_size": 1000})))
        .mount(&log)
        .await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"entries": []}))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&log)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let server = register_server(storage.as_ref(), &log.uri(), None)
        .await
        .unwrap();

    let pipeline = Pipeline::new(&test_config(), storage.clone()).unwrap();
    pipeline.scan_server(server.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    pipeline.stop_downloading();
    pipeline.stop_processing();
    tokio::time::timeout(Duration::from_secs(5), pipeline.join())
        .await
        .expect("pools did not stop");

    let status = pipeline.status();
    assert_eq!(status.slice, Some(PoolState::Closed));
    assert_eq!(status.decode, Some(PoolState::Closed));

    let slices = storage
        .list_slices_by_server(server.id(), SliceOrder::StartAsc)
        .await
        .unwrap();
    assert_eq!(slices.len(), 10);
    assert!(slices.iter().all(|s| s.next == s.start));
}

#[tokio::test]
async fn test_stalled_slice_does_not_hold_back_other_slices() {
    let log = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-sth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tree_size": 100})))
        .mount(&log)
        .await;
    Mock::given(method("GET"))
        .and(path("/ct/v1/get-entries"))
        .respond_with(StallingResponder { stall_below: 50 })
        .mount(&log)
        .await;

    let mut config = test_config();
    config.download.slice_size = 50;
    config.download.request_timeout_secs = 120;

    let storage = Arc::new(MemoryStorage::new());
    let server = register_server(storage.as_ref(), &log.uri(), None)
        .await
        .unwrap();

    let pipeline = Pipeline::new(&config, storage.clone()).unwrap();
    pipeline.scan_server(server.clone()).unwrap();

    // The first slice is still waiting on its page while the second one is saved
    tokio::time::timeout(Duration::from_secs(20), async {
        while storage.count_certificates().await.unwrap() < 50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("second slice was not decoded");

    let slices = storage
        .list_slices_by_server(server.id(), SliceOrder::StartAsc)
        .await
        .unwrap();
    assert_eq!((slices[0].start, slices[0].next), (0, 0));

    pipeline.stop_downloading();
    pipeline.stop_processing();
    tokio::time::timeout(Duration::from_secs(5), pipeline.join())
        .await
        .expect("pools did not stop");

    assert_eq!(storage.count_certificates().await.unwrap(), 50);
}
