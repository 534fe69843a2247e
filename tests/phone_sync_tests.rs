use bizsync::config::AppConfig;
use bizsync::phone::PhoneSyncClient;
use bizsync::store::SyncStore;
use bizsync::sync::{trigger_openphone_sync, EntitySyncResult, SyncGuard};
use bizsync::test_utils::{create_test_db, FakePhoneApi, MemorySyncStore};
use bizsync::types::{Call, CallDirection, LiveLine, Message, NewClient};
use bizsync::Error;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OUR_LINE: &str = "+15550000000";

fn inbound_call(id: &str, from: &str) -> Value {
    json!({
        "id": id,
        "direction": "incoming",
        "from": from,
        "to": [OUR_LINE],
        "status": "completed",
        "createdAt": "2024-05-01T10:00:00Z",
        "completedAt": "2024-05-01T10:05:00Z",
        "duration": 300
    })
}

fn message(id: &str, direction: &str, counterparty: &str, status: &str) -> Value {
    let (from, to) = if direction == "incoming" {
        (counterparty, OUR_LINE)
    } else {
        (OUR_LINE, counterparty)
    };
    json!({
        "id": id,
        "direction": direction,
        "from": from,
        "to": [to],
        "text": format!("message {}", id),
        "status": status,
        "createdAt": "2024-05-02T09:00:00Z"
    })
}

fn line(id: &str) -> Value {
    json!({"id": id, "number": OUR_LINE, "name": "Main line", "users": [{"id": "US1"}]})
}

/// Memory store that reports every call write to a hook.
struct WatchedStore {
    inner: MemorySyncStore,
    call_writes: AtomicUsize,
    on_call_write: Box<dyn Fn(usize) + Send + Sync>,
}

impl WatchedStore {
    fn new(on_call_write: impl Fn(usize) + Send + Sync + 'static) -> Self {
        Self {
            inner: MemorySyncStore::default(),
            call_writes: AtomicUsize::new(0),
            on_call_write: Box::new(on_call_write),
        }
    }
}

impl SyncStore for WatchedStore {
    fn find_client_id_by_phone(&self, phone: &str) -> anyhow::Result<Option<i64>> {
        self.inner.find_client_id_by_phone(phone)
    }

    fn create_client_if_absent(&self, client: &NewClient) -> anyhow::Result<i64> {
        self.inner.create_client_if_absent(client)
    }

    fn upsert_call(&self, call: &Call) -> anyhow::Result<()> {
        self.inner.upsert_call(call)?;
        let written = self.call_writes.fetch_add(1, Ordering::SeqCst) + 1;
        (self.on_call_write)(written);
        Ok(())
    }

    fn upsert_message(&self, message: &Message) -> anyhow::Result<()> {
        self.inner.upsert_message(message)
    }

    fn upsert_live_line(&self, line: &LiveLine) -> anyhow::Result<()> {
        self.inner.upsert_live_line(line)
    }
}

fn five_calls() -> Vec<Value> {
    (1..=5)
        .map(|i| inbound_call(&format!("AC{}", i), "+15551110001"))
        .collect()
}

#[tokio::test]
async fn calls_resolve_to_existing_and_new_clients() {
    let db = Arc::new(create_test_db());
    let alice = db
        .insert_client("Alice", "alice@example.com", Some("+15551110001"))
        .unwrap();
    let bob = db
        .insert_client("Bob", "bob@example.com", Some("+15551110002"))
        .unwrap();

    let api = Arc::new(FakePhoneApi {
        calls: vec![
            inbound_call("AC1", "+15551110001"),
            inbound_call("AC2", "+15551110002"),
            inbound_call("AC3", "+15551110003"),
        ],
        ..Default::default()
    });
    let client = PhoneSyncClient::new(api, db.clone());

    let summary = client.perform_full_sync().await.unwrap();
    assert_eq!(summary.calls.synced, 3);
    assert!(summary.calls.errors.is_empty());
    assert!(!summary.cancelled);

    assert_eq!(db.count_rows("calls").unwrap(), 3);
    assert_eq!(db.count_rows("clients").unwrap(), 3);
    assert_eq!(db.get_call("AC1").unwrap().unwrap().client_id, alice);
    assert_eq!(db.get_call("AC2").unwrap().unwrap().client_id, bob);

    let new_id = db.find_client_id_by_phone("+15551110003").unwrap().unwrap();
    let created = db.get_client(new_id).unwrap().unwrap();
    assert_eq!(created.name, "Customer +15551110003");
    assert_eq!(created.email, "15551110003@placeholder.local");
    assert_eq!(db.get_call("AC3").unwrap().unwrap().client_id, new_id);
}

#[tokio::test]
async fn full_sync_twice_leaves_identical_tables() {
    let db = Arc::new(create_test_db());
    let api = Arc::new(FakePhoneApi {
        phone_numbers: vec![line("PN1")],
        calls: vec![
            inbound_call("AC1", "+15551110001"),
            inbound_call("AC2", "+15551110001"),
        ],
        messages: vec![
            message("MS1", "incoming", "+15551110001", "received"),
            message("MS2", "outgoing", "+15551110004", "delivered"),
        ],
        ..Default::default()
    });
    let client = PhoneSyncClient::new(api, db.clone());

    let first = client.perform_full_sync().await.unwrap();
    let counts = |db: &bizsync::persistence::Persistence| {
        ["clients", "calls", "messages", "live_calls"]
            .map(|table| db.count_rows(table).unwrap())
    };
    let after_first = counts(db.as_ref());
    let second = client.perform_full_sync().await.unwrap();

    assert_eq!(after_first, [2, 2, 2, 1]);
    assert_eq!(counts(db.as_ref()), after_first);
    assert_eq!(first.total_synced(), 5);
    assert_eq!(second.total_synced(), 5);
    assert!(!second.has_errors());
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn delivered_messages_are_stored_as_sent() {
    let store = Arc::new(MemorySyncStore::default());
    let api = Arc::new(FakePhoneApi {
        messages: vec![
            message("MS1", "outgoing", "+15551110001", "delivered"),
            message("MS2", "incoming", "+15551110001", "received"),
            message("MS3", "outgoing", "+15551110001", "queued"),
        ],
        ..Default::default()
    });
    let client = PhoneSyncClient::new(api, store.clone());

    let result = client.sync_messages(100).await.unwrap();
    assert_eq!(result.synced, 3);
    assert_eq!(store.message("MS1").unwrap().status, "sent");
    assert_eq!(store.message("MS2").unwrap().status, "received");
    assert_eq!(store.message("MS3").unwrap().status, "queued");
    assert_eq!(store.message("MS1").unwrap().direction, CallDirection::Outbound);
    assert_eq!(store.message("MS1").unwrap().content, "message MS1");
    assert_eq!(store.client_count(), 1);
}

#[tokio::test]
async fn one_failing_record_does_not_stop_the_batch() {
    let store = Arc::new(MemorySyncStore::default());
    store.fail_upserts_for("AC2");
    let api = Arc::new(FakePhoneApi {
        calls: vec![
            inbound_call("AC1", "+15551110001"),
            inbound_call("AC2", "+15551110002"),
            inbound_call("AC3", "+15551110003"),
            inbound_call("AC4", "+15551110004"),
        ],
        ..Default::default()
    });
    let client = PhoneSyncClient::new(api, store.clone());

    let result = client.sync_calls(100).await.unwrap();
    assert_eq!(result.synced, 3);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].record_id, "AC2");
    assert!(result.errors[0].error.contains("simulated write failure"));
    assert!(store.call("AC1").is_some());
    assert!(store.call("AC2").is_none());
    assert!(store.call("AC4").is_some());
}

#[tokio::test]
async fn record_without_counterparty_is_reported() {
    let store = Arc::new(MemorySyncStore::default());
    let mut call = inbound_call("AC1", "");
    call["from"] = Value::Null;
    let api = Arc::new(FakePhoneApi {
        calls: vec![call, inbound_call("AC2", "+15551110002")],
        ..Default::default()
    });
    let client = PhoneSyncClient::new(api, store.clone());

    let result = client.sync_calls(100).await.unwrap();
    assert_eq!(result.synced, 1);
    assert_eq!(result.errors[0].record_id, "AC1");
    assert_eq!(store.client_count(), 1);
}

#[tokio::test]
async fn failed_list_fetch_aborts_the_run() {
    let store = Arc::new(MemorySyncStore::default());
    let api = Arc::new(FakePhoneApi {
        phone_numbers: vec![line("PN1")],
        messages: vec![message("MS1", "incoming", "+15551110001", "received")],
        fail_calls: true,
        ..Default::default()
    });
    let client = PhoneSyncClient::new(api.clone(), store.clone());

    match client.perform_full_sync().await {
        Err(Error::BatchFetch { entity, source }) => {
            assert_eq!(entity, "calls");
            assert!(matches!(*source, Error::Api { status: 503, .. }));
        }
        other => panic!("expected batch fetch failure, got {:?}", other),
    }
    // Lines were fetched before the failing phase; messages never were.
    assert!(store.live_line("PN1").is_some());
    assert_eq!(store.message_count(), 0);
    assert_eq!(api.request_count(), 2);
}

#[tokio::test]
async fn limits_are_passed_to_the_provider() {
    let store = Arc::new(MemorySyncStore::default());
    let api = Arc::new(FakePhoneApi {
        calls: (0..5)
            .map(|i| inbound_call(&format!("AC{}", i), "+15551110001"))
            .collect(),
        ..Default::default()
    });
    let client = PhoneSyncClient::new(api, store.clone()).with_limits(2, 2);

    let summary = client.perform_full_sync().await.unwrap();
    assert_eq!(summary.calls.synced, 2);
    assert_eq!(store.call_count(), 2);
}

#[tokio::test]
async fn trigger_without_api_key_is_a_config_error() {
    let store = Arc::new(MemorySyncStore::default());
    let err = trigger_openphone_sync(&AppConfig::default(), store, CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        Error::Config(msg) => assert!(msg.contains("api_key")),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[tokio::test]
async fn trigger_runs_against_provider_http_api() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/phone-numbers"))
        .and(header("authorization", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [line("PN1")]})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calls"))
        .and(query_param("limit", "25"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [inbound_call("AC1", "+15551110001")],
            "totalItems": 1
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [message("MS1", "outgoing", "+15551110001", "delivered")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = AppConfig::default();
    config.phone.api_key = Some("test-key".to_string());
    config.phone.base_url = server.uri();
    config.sync.call_limit = 25;

    let db = Arc::new(create_test_db());
    let summary = trigger_openphone_sync(&config, db.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.total_synced(), 3);
    assert!(!summary.has_errors());
    assert_eq!(db.count_rows("clients").unwrap(), 1);
    assert_eq!(db.get_message("MS1").unwrap().unwrap().status, "sent");
    assert!(!SyncGuard::global().is_running(&format!("openphone:{}", server.uri())));
}

#[tokio::test]
async fn overlapping_trigger_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = AppConfig::default();
    config.phone.api_key = Some("test-key".to_string());
    config.phone.base_url = server.uri();

    let _running = SyncGuard::global()
        .try_acquire(&format!("openphone:{}", server.uri()))
        .unwrap();
    let err = trigger_openphone_sync(
        &config,
        Arc::new(MemorySyncStore::default()),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::SyncInProgress(_)));
}

#[tokio::test]
async fn cancellation_mid_batch_keeps_partial_progress() {
    let cancel = CancellationToken::new();
    let trip = cancel.clone();
    let store = Arc::new(WatchedStore::new(move |written| {
        if written == 2 {
            trip.cancel();
        }
    }));
    let api = Arc::new(FakePhoneApi {
        phone_numbers: vec![line("PN1")],
        calls: five_calls(),
        messages: vec![message("MS1", "incoming", "+15551110001", "received")],
        ..Default::default()
    });
    let client = PhoneSyncClient::new(api.clone(), store.clone()).with_cancellation(cancel);

    let summary = client.perform_full_sync().await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.phone_numbers.synced, 1);
    assert!(!summary.phone_numbers.cancelled);
    assert_eq!(summary.calls.synced, 2);
    assert!(summary.calls.cancelled);
    assert!(summary.calls.errors.is_empty());
    assert_eq!(summary.messages, EntitySyncResult::cancelled());

    assert!(store.inner.call("AC2").is_some());
    assert!(store.inner.call("AC3").is_none());
    assert_eq!(store.inner.message_count(), 0);
    // The messages list is never requested once the run is cancelled.
    assert_eq!(api.request_count(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn sibling_task_can_cancel_a_running_batch() {
    let cancel = CancellationToken::new();
    let first_write = Arc::new(Notify::new());
    let notify = first_write.clone();
    let store = Arc::new(WatchedStore::new(move |_| notify.notify_one()));

    let canceller = {
        let cancel = cancel.clone();
        let first_write = first_write.clone();
        tokio::spawn(async move {
            first_write.notified().await;
            cancel.cancel();
        })
    };

    let api = Arc::new(FakePhoneApi {
        calls: five_calls(),
        ..Default::default()
    });
    let client = PhoneSyncClient::new(api, store.clone()).with_cancellation(cancel);

    let result = client.sync_calls(100).await.unwrap();
    canceller.await.unwrap();

    assert!(result.cancelled);
    assert!(result.synced >= 1);
    assert!(result.synced < 5);
    assert_eq!(store.inner.call_count(), result.synced);
}
