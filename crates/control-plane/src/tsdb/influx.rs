use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

use super::{split_points, FieldValue, MetricsStore, Point};
use crate::config::InfluxConfig;

const QUEUE_DEPTH: usize = 1024;
/// How long a caller waits for the async writer to report a failure
/// before declaring the write queued. Trades a little latency for a
/// chance to signal backpressure upstream.
const ERROR_GRACE: Duration = Duration::from_millis(100);

/// Buffered line-protocol writer against an InfluxDB v2 endpoint. Points
/// are queued to a background task; write failures flow back through an
/// error channel and surface on the next `store_metrics` call within the
/// grace window.
pub struct InfluxStore {
    tx: mpsc::Sender<Vec<Point>>,
    errors: Arc<Mutex<mpsc::Receiver<anyhow::Error>>>,
}

impl InfluxStore {
    pub fn new(cfg: &InfluxConfig) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel::<Vec<Point>>(QUEUE_DEPTH);
        let (err_tx, err_rx) = mpsc::channel::<anyhow::Error>(QUEUE_DEPTH);

        let client = reqwest::Client::builder().build()?;
        let write_url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            cfg.url.trim_end_matches('/'),
            cfg.org,
            cfg.bucket
        );
        let token = cfg.token.clone();

        tokio::spawn(writer_task(client, write_url, token, rx, err_tx));

        Ok(Self {
            tx,
            errors: Arc::new(Mutex::new(err_rx)),
        })
    }
}

#[async_trait]
impl MetricsStore for InfluxStore {
    async fn store_metrics(&self, node_id: &str, metrics: &Value) -> anyhow::Result<()> {
        let points = split_points(node_id, metrics);
        if points.is_empty() {
            return Ok(());
        }

        debug!(node_id, points = points.len(), "queueing tsdb write");
        self.tx
            .send(points)
            .await
            .map_err(|_| anyhow::anyhow!("tsdb writer stopped"))?;

        let mut errors = self.errors.lock().await;
        match tokio::time::timeout(ERROR_GRACE, errors.recv()).await {
            Ok(Some(err)) => Err(err),
            Ok(None) => Err(anyhow::anyhow!("tsdb writer stopped")),
            Err(_) => Ok(()),
        }
    }
}

async fn writer_task(
    client: reqwest::Client,
    write_url: String,
    token: String,
    mut rx: mpsc::Receiver<Vec<Point>>,
    err_tx: mpsc::Sender<anyhow::Error>,
) {
    while let Some(points) = rx.recv().await {
        let body = points
            .iter()
            .map(line_protocol)
            .collect::<Vec<_>>()
            .join("\n");

        let mut request = client
            .post(&write_url)
            .timeout(Duration::from_secs(5))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body);
        if !token.is_empty() {
            request = request.header("Authorization", format!("Token {token}"));
        }

        let outcome = match request.send().await {
            Ok(res) if res.status().is_success() => Ok(()),
            Ok(res) => {
                let status = res.status();
                let body = res.text().await.unwrap_or_default();
                Err(anyhow::anyhow!("tsdb write returned {status}: {body}"))
            }
            Err(err) => Err(anyhow::anyhow!("tsdb write failed: {err}")),
        };

        if let Err(err) = outcome {
            error!(%err, "tsdb write failed");
            metrics::counter!("control_plane_tsdb_write_errors_total").increment(1);
            // Queue full just means nobody is listening for this failure.
            let _ = err_tx.try_send(err);
        } else {
            metrics::counter!("control_plane_tsdb_points_written_total")
                .increment(points.len() as u64);
        }
    }
}

fn line_protocol(point: &Point) -> String {
    let mut line = escape_measurement(&point.measurement);
    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(&escape_tag(key));
        line.push('=');
        line.push_str(&escape_tag(value));
    }

    line.push(' ');
    let fields: Vec<String> = point
        .fields
        .iter()
        .map(|(key, value)| format!("{}={}", escape_tag(key), render_field(value)))
        .collect();
    line.push_str(&fields.join(","));

    line.push(' ');
    line.push_str(
        &point
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string(),
    );
    line
}

fn render_field(value: &FieldValue) -> String {
    match value {
        FieldValue::Float(f) => f.to_string(),
        FieldValue::Int(i) => format!("{i}i"),
        FieldValue::UInt(u) => format!("{u}u"),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Text(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
    }
}

fn escape_measurement(raw: &str) -> String {
    raw.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(raw: &str) -> String {
    raw.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use httpmock::Method::POST;
    use httpmock::{MockServer, Regex};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn store_for(server: &MockServer) -> InfluxStore {
        InfluxStore::new(&InfluxConfig {
            url: server.url(""),
            token: "influx-token".into(),
            org: "syslens".into(),
            bucket: "metrics".into(),
        })
        .expect("store")
    }

    #[test]
    fn line_protocol_renders_tags_fields_and_timestamp() {
        let point = Point {
            measurement: "disk".into(),
            tags: BTreeMap::from([
                ("node_id".into(), "node-A".into()),
                ("mount_point".into(), "/var/log data".into()),
            ]),
            fields: BTreeMap::from([
                ("used_percent".into(), FieldValue::Float(40.5)),
                ("total".into(), FieldValue::UInt(100)),
                ("fstype".into(), FieldValue::Text("ext4".into())),
            ]),
            timestamp: chrono::Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap(),
        };

        let line = line_protocol(&point);
        assert!(line.starts_with("disk,mount_point=/var/log\\ data,node_id=node-A "));
        assert!(line.contains("fstype=\"ext4\""));
        assert!(line.contains("total=100u"));
        assert!(line.contains("used_percent=40.5"));
        assert!(line.ends_with("1772359200000000000"));
    }

    #[tokio::test]
    async fn write_posts_line_protocol_with_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v2/write")
                .query_param("org", "syslens")
                .query_param("bucket", "metrics")
                .header("Authorization", "Token influx-token")
                .body_matches(Regex::new(r"cpu,node_id=node-A usage=42").expect("valid regex"));
            then.status(204);
        });

        let store = store_for(&server);
        store
            .store_metrics("node-A", &json!({"cpu": {"usage": 42.0}}))
            .await
            .expect("write accepted");

        mock.assert();
    }

    #[tokio::test]
    async fn failed_write_surfaces_within_grace_window() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(POST).path("/api/v2/write");
            then.status(500).body("bucket missing");
        });

        let store = store_for(&server);
        let err = store
            .store_metrics("node-A", &json!({"cpu": {"usage": 42.0}}))
            .await
            .expect_err("error should surface");
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn empty_payload_is_a_noop() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST);
            then.status(204);
        });

        let store = store_for(&server);
        store.store_metrics("node-A", &json!({})).await.expect("noop");
        assert_eq!(mock.hits(), 0);
    }
}
