//! Duplicate-account fan-out through the full ingest path.

mod common;

use common::{options, payload, start_at, RecordingTransport};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tempfile::tempdir;
use tracker_outbox::{ACCOUNT_ID_FIELD, APPLICATION_ID_FIELD};

#[tokio::test]
async fn each_enabled_account_gets_one_stamped_copy() {
    let dir = tempdir().unwrap();
    let transport = RecordingTransport::new();
    let tracker = start_at(
        &dir.path().join("tracker.sqlite"),
        options(Duration::from_secs(60)),
        transport.clone(),
    )
    .await;

    let accounts = [(11, 1), (22, 2), (33, 3), (44, 4)];
    for (account, app) in accounts {
        let disabled: Vec<String> = if account % 2 == 0 {
            vec!["purchase".to_string()]
        } else {
            Vec::new()
        };
        assert!(tracker.add_duplicate_account_with_disabled_events(account, app, disabled));
    }
    tracker.set_duplicate_filter(|event, account| !(event == "login" && account == 33));

    let events = ["login", "purchase", "open"];
    for name in events {
        assert!(tracker.track(name, &payload(json!({ "event": name, "accountId": 1 }))));
    }
    tracker.flush_now().await;

    let delivered: Vec<Value> = transport.requests().concat();
    let mut copies: HashMap<&str, Vec<i64>> = HashMap::new();
    for event in &delivered {
        let name = event["event"].as_str().unwrap();
        if event.get(APPLICATION_ID_FIELD).is_some() {
            let account = event[ACCOUNT_ID_FIELD].as_i64().unwrap();
            let app = event[APPLICATION_ID_FIELD].as_i64().unwrap();
            assert_eq!(account, app * 11);
            copies.entry(name).or_default().push(account);
        } else {
            assert_eq!(event[ACCOUNT_ID_FIELD], json!(1));
        }
    }

    assert_eq!(copies["login"], vec![11, 22, 44]);
    assert_eq!(copies["purchase"], vec![11, 33]);
    assert_eq!(copies["open"], vec![11, 22, 33, 44]);
    assert_eq!(delivered.len(), 3 + 3 + 2 + 4);
}

#[tokio::test]
async fn invalid_accounts_are_rejected() {
    let dir = tempdir().unwrap();
    let tracker = start_at(
        &dir.path().join("tracker.sqlite"),
        options(Duration::from_secs(60)),
        RecordingTransport::new(),
    )
    .await;

    assert!(!tracker.add_duplicate_account(0, 5));
    assert!(!tracker.add_duplicate_account(5, -1));
    assert!(tracker.duplicate_accounts().is_empty());
    assert_eq!(tracker.duplicate_event("open", &payload(json!({}))), 0);
}
