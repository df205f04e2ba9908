use flightq::telemetry::{IntakeEvent, QueueEvent};
use flightq::{DeliveryQueue, DeliveryRequest, DeliveryResponse, QueueConfig, Transport, TransportError};
use flightq_jsonl::{JsonlReporter, JsonlSink};
use serde_json::{json, Value};
use tower::Service;

#[derive(Debug)]
struct Unused;

#[async_trait::async_trait]
impl Transport for Unused {
    async fn send(&self, _: &DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
        Err(TransportError::Request("no endpoint configured".into()))
    }
}

#[tokio::test]
async fn reporter_writes_wire_shaped_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("reports.jsonl");
    let reporter = JsonlReporter::new(&path);

    let config = QueueConfig::builder().buffer_size(2).build().unwrap();
    let queue = DeliveryQueue::builder(config, Unused).reporter(reporter.clone()).build();
    queue.push(json!({"event": "a"}));
    queue.push(json!({"event": "b"}));
    queue.push(json!({"event": "c"}));
    queue.shutdown().await;

    let contents = std::fs::read_to_string(&path).expect("file");
    let lines: Vec<Value> = contents.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], json!({"type": "BUFFER_REACHED", "payload": [{"event": "a"}, {"event": "b"}]}));
    assert_eq!(lines[1]["payload"], json!([{"event": "c"}]));
    assert_eq!(reporter.failed(), 0);
}

#[tokio::test]
async fn reporter_counts_write_failures() {
    let dir = tempfile::tempdir().expect("tempdir");
    // a directory cannot be opened for appending
    let reporter = JsonlReporter::new(dir.path());

    let config = QueueConfig::builder().buffer_size(1).build().unwrap();
    let queue = DeliveryQueue::builder(config, Unused).reporter(reporter.clone()).build();
    queue.push(1);
    queue.shutdown().await;

    assert_eq!(reporter.failed(), 1);
}

#[tokio::test]
async fn sink_writes_event_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("events.jsonl");
    let mut sink = JsonlSink::new(&path);

    sink.call(QueueEvent::Intake(IntakeEvent::Accepted { pending: 3 })).await.unwrap();
    sink.call(QueueEvent::Intake(IntakeEvent::Rejected)).await.unwrap();

    let contents = std::fs::read_to_string(&path).expect("file");
    let kinds: Vec<String> = contents
        .lines()
        .map(|l| serde_json::from_str::<Value>(l).unwrap()["kind"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["event_accepted", "event_rejected"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sink_writes_keep_lines_whole() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("events.jsonl");
    let sink = JsonlSink::new(&path);

    let mut writers = tokio::task::JoinSet::new();
    for pending in 0..500 {
        let mut sink = sink.clone();
        writers.spawn(async move { sink.call(QueueEvent::Intake(IntakeEvent::Accepted { pending })).await });
    }
    while let Some(joined) = writers.join_next().await {
        joined.expect("writer task").expect("write");
    }

    let contents = std::fs::read_to_string(&path).expect("file");
    let mut seen: Vec<u64> = contents
        .lines()
        .map(|l| serde_json::from_str::<Value>(l).expect("whole json line")["pending"].as_u64().unwrap())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..500).collect::<Vec<u64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sink_attached_to_a_queue_writes_every_event_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("events.jsonl");

    let config = QueueConfig::builder().buffer_size(10_000).build().unwrap();
    let queue = DeliveryQueue::builder(config, Unused).telemetry(JsonlSink::new(&path)).build();
    for n in 0..300 {
        queue.push(n);
    }

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    let lines = loop {
        let contents = std::fs::read_to_string(&path).unwrap_or_default();
        let lines: Vec<String> = contents.lines().map(str::to_string).collect();
        if lines.len() >= 300 || tokio::time::Instant::now() > deadline {
            break lines;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    };

    let pending: Vec<u64> = lines
        .iter()
        .map(|l| serde_json::from_str::<Value>(l).expect("whole json line")["pending"].as_u64().unwrap())
        .collect();
    assert_eq!(pending, (1..=300).collect::<Vec<u64>>());
}
