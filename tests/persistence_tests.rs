use bizsync::persistence::Persistence;
use bizsync::store::{SyncStore, TokenStore};
use bizsync::types::{Call, CallDirection, LiveLine, Message, NewClient, OAuthToken};
use chrono::{TimeZone, Utc};
use serde_json::json;
use tempfile::tempdir;

fn temp_db_path() -> std::path::PathBuf {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.duckdb");
    // Keep directory alive by leaking it for test duration to avoid drop before use
    Box::leak(Box::new(dir));
    path
}

fn sample_call(id: &str, client_id: i64, status: &str) -> Call {
    Call {
        id: id.to_string(),
        client_id,
        direction: CallDirection::Inbound,
        start_time: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        end_time: Utc.with_ymd_and_hms(2024, 5, 1, 10, 2, 0).unwrap(),
        duration: 120,
        status: status.to_string(),
        from_number: "+15551112222".to_string(),
        to_number: "+15550000000".to_string(),
        recording_url: None,
    }
}

fn sample_token(realm: &str, access: &str) -> OAuthToken {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    OAuthToken {
        realm_id: realm.to_string(),
        access_token: access.to_string(),
        refresh_token: format!("refresh-{}", access),
        access_expires_at: now + chrono::Duration::hours(1),
        refresh_expires_at: now + chrono::Duration::days(100),
        updated_at: now,
    }
}

#[test]
fn db_initializes_and_tables_exist() {
    let path = temp_db_path();
    let p = Persistence::new(&path).expect("init db");
    for table in ["clients", "calls", "messages", "live_calls", "quickbooks_tokens"] {
        assert_eq!(p.count_rows(table).unwrap(), 0, "table {} should start empty", table);
    }
    assert!(p.count_rows("users; DROP TABLE clients").is_err());
}

#[test]
fn reopening_keeps_data_and_reruns_no_migrations() {
    let path = temp_db_path();
    {
        let p = Persistence::new(&path).unwrap();
        p.insert_client("Acme", "ops@acme.test", Some("+15551112222"))
            .unwrap();
        p.checkpoint().unwrap();
    }
    let p = Persistence::new(&path).unwrap();
    assert_eq!(p.count_rows("clients").unwrap(), 1);
}

#[test]
fn find_or_create_returns_same_id_for_same_phone() {
    let p = Persistence::new(temp_db_path()).unwrap();
    assert!(p.find_client_id_by_phone("+15551112222").unwrap().is_none());

    let first = p
        .create_client_if_absent(&NewClient::placeholder("+15551112222"))
        .unwrap();
    let second = p
        .create_client_if_absent(&NewClient::placeholder("+15551112222"))
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(p.count_rows("clients").unwrap(), 1);

    let client = p.get_client(first).unwrap().unwrap();
    assert_eq!(client.name, "Customer +15551112222");
    assert_eq!(client.email, "15551112222@placeholder.local");
    assert_eq!(client.phone.as_deref(), Some("+15551112222"));
    assert!(client.quickbooks_id.is_none());
}

#[test]
fn concurrent_creators_agree_on_one_client() {
    let p = std::sync::Arc::new(Persistence::new(temp_db_path()).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let p = p.clone();
            std::thread::spawn(move || {
                p.create_client_if_absent(&NewClient::placeholder("+15559998888"))
                    .unwrap()
            })
        })
        .collect();
    let ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(p.count_rows("clients").unwrap(), 1);
}

#[test]
fn call_upsert_is_idempotent_and_overwrites() {
    let p = Persistence::new(temp_db_path()).unwrap();
    let client_id = p.insert_client("Acme", "ops@acme.test", None).unwrap();

    p.upsert_call(&sample_call("AC1", client_id, "ringing")).unwrap();
    p.upsert_call(&sample_call("AC1", client_id, "ringing")).unwrap();
    assert_eq!(p.count_rows("calls").unwrap(), 1);

    p.upsert_call(&sample_call("AC1", client_id, "completed")).unwrap();
    let stored = p.get_call("AC1").unwrap().unwrap();
    assert_eq!(stored, sample_call("AC1", client_id, "completed"));
    assert_eq!(p.list_call_ids_for_client(client_id).unwrap(), vec!["AC1"]);
}

#[test]
fn message_upsert_round_trips_through_sync_store() {
    let p = Persistence::new(temp_db_path()).unwrap();
    let store: &dyn SyncStore = &p;
    let client_id = store
        .create_client_if_absent(&NewClient::placeholder("+15551112222"))
        .unwrap();
    let message = Message {
        id: "MSG1".to_string(),
        client_id,
        direction: CallDirection::Outbound,
        content: "Your invoice is ready".to_string(),
        status: "sent".to_string(),
        from_number: "+15550000000".to_string(),
        to_number: "+15551112222".to_string(),
        sent_at: Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap(),
    };
    store.upsert_message(&message).unwrap();
    store.upsert_message(&message).unwrap();

    assert_eq!(p.count_rows("messages").unwrap(), 1);
    assert_eq!(p.get_message("MSG1").unwrap().unwrap(), message);
}

#[test]
fn live_lines_are_keyed_by_call_id() {
    let p = Persistence::new(temp_db_path()).unwrap();
    let mut line = LiveLine {
        call_id: "PN1".to_string(),
        phone_number: Some("+15550000000".to_string()),
        name: Some("Front desk".to_string()),
        details: json!({"users": [{"id": "US1"}]}),
    };
    p.upsert_live_line(&line).unwrap();
    line.name = Some("Reception".to_string());
    p.upsert_live_line(&line).unwrap();

    let lines = p.list_live_lines().unwrap();
    assert_eq!(lines, vec![line]);
}

#[test]
fn token_upsert_replaces_by_realm() {
    let p = Persistence::new(temp_db_path()).unwrap();
    assert!(p.load_token("123").unwrap().is_none());

    p.save_token(&sample_token("123", "first")).unwrap();
    p.save_token(&sample_token("123", "second")).unwrap();
    p.save_token(&sample_token("456", "other")).unwrap();

    assert_eq!(p.count_rows("quickbooks_tokens").unwrap(), 2);
    assert_eq!(p.load_token("123").unwrap().unwrap(), sample_token("123", "second"));

    assert!(p.delete_token("123").unwrap());
    assert!(!p.delete_token("123").unwrap());
    assert!(p.load_token("123").unwrap().is_none());
    assert!(p.load_token("456").unwrap().is_some());
}

#[test]
fn link_client_to_ledger_sets_quickbooks_id() {
    let p = Persistence::new(temp_db_path()).unwrap();
    let id = p
        .insert_client("Acme", "ops@acme.test", Some("+15551112222"))
        .unwrap();
    assert!(p.link_client_to_ledger(id, "58").unwrap());
    assert!(!p.link_client_to_ledger(id + 100, "59").unwrap());

    let clients = p.list_clients().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].quickbooks_id.as_deref(), Some("58"));
}

#[test]
fn corrupt_stored_details_surface_as_errors() {
    let p = Persistence::new(temp_db_path()).unwrap();
    p.upsert_live_line(&LiveLine {
        call_id: "PN1".to_string(),
        phone_number: None,
        name: None,
        details: json!({}),
    })
    .unwrap();
    p.conn()
        .unwrap()
        .execute("UPDATE live_calls SET details = '{not json' WHERE call_id = 'PN1'", [])
        .unwrap();

    let err = p.list_live_lines().unwrap_err();
    assert!(format!("{:#}", err).contains("invalid stored details for line PN1"));
}
