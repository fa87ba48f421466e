use std::collections::HashMap;
use std::time::Duration;

use httpmock::Method::POST;
use httpmock::{MockServer, Regex};
use tokio::sync::watch;

use syslens_agent::config::{
    AggregatorConnection, AppConfig, CollectionConfig, DiskConfig, NetworkConfig, NodeConfig,
    ServerConnection, SpillConfig,
};
use syslens_agent::reporter::{report_loop, Reporter};
use syslens_agent::sampler::Sampler;
use syslens_common::envelope::SecurityConfig;

fn config_for(server: &MockServer, spill_dir: &std::path::Path) -> AppConfig {
    AppConfig {
        node: NodeConfig {
            id: "node-e2e".into(),
            labels: HashMap::new(),
        },
        collection: CollectionConfig {
            interval: 200,
            disk: DiskConfig {
                mount_points: vec!["/".into()],
            },
            network: NetworkConfig { interfaces: vec![] },
        },
        security: SecurityConfig::default(),
        server: ServerConnection {
            url: server.url(""),
            token: "agg-1".into(),
            timeout: 5,
            retry_count: 0,
            retry_interval: 0,
        },
        aggregator: AggregatorConnection {
            enabled: false,
            url: String::new(),
            auth_token: String::new(),
        },
        spill: SpillConfig {
            dir: spill_dir.to_string_lossy().into_owned(),
        },
    }
}

#[tokio::test]
async fn loop_samples_and_posts_real_snapshots() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/nodes/node-e2e/metrics")
            .header("X-Node-ID", "node-e2e")
            .body_matches(Regex::new(r#""hostname""#).expect("valid regex"));
        then.status(200).json_body(serde_json::json!({"status": "ok"}));
    });

    let spill = tempfile::tempdir().expect("tempdir");
    let cfg = config_for(&server, spill.path());
    let reporter = Reporter::new(&cfg, None).expect("reporter");
    let sampler = Sampler::new(
        cfg.collection.disk.mount_points.clone(),
        cfg.collection.network.interfaces.clone(),
    );

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(report_loop(sampler, reporter, cfg.collection.interval, rx));

    // Two ticks plus the 250 ms CPU observation window per sample.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let _ = tx.send(true);
    handle.await.expect("join").expect("loop result");

    assert!(mock.hits() >= 1, "at least one snapshot must be posted");
    let spilled = std::fs::read_dir(spill.path()).expect("spill dir").count();
    assert_eq!(spilled, 0, "successful posts must not spill");
}

#[tokio::test]
async fn failed_posts_spill_to_disk_and_loop_survives() {
    let server = MockServer::start();
    let _mock = server.mock(|when, then| {
        when.method(POST).path("/api/v1/nodes/node-e2e/metrics");
        then.status(500).body("storage down");
    });

    let spill = tempfile::tempdir().expect("tempdir");
    let cfg = config_for(&server, spill.path());
    let reporter = Reporter::new(&cfg, None).expect("reporter");
    let sampler = Sampler::new(vec!["/".into()], vec![]);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(report_loop(sampler, reporter, cfg.collection.interval, rx));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let _ = tx.send(true);
    handle.await.expect("join").expect("loop result");

    let spilled: Vec<_> = std::fs::read_dir(spill.path())
        .expect("spill dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(!spilled.is_empty(), "failed posts must spill");
    assert!(spilled.iter().all(|name| name.starts_with("metrics_")));
}
