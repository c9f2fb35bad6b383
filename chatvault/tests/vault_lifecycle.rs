use chatvault_lib::persistence::bootstrap::RecordOutcome;
use chatvault_lib::persistence::Collection;
use chatvault_lib::sync::ingest::{RawChat, RawContact, RawMessage};
use chatvault_lib::sync::ProtocolEvent;
use chatvault_lib::types::MessagePayload;
use chatvault_lib::{AppConfig, Vault};

const THREAD: &str = "15550001@s.whatsapp.net";

fn text_message(id: &str, timestamp: i64) -> RawMessage {
    RawMessage {
        id: Some(id.to_string()),
        thread_key: Some(THREAD.to_string()),
        from_me: timestamp % 2 == 0,
        timestamp: Some(timestamp),
        payload: Some(MessagePayload::Text {
            body: format!("message {}", id),
        }),
    }
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = AppConfig::with_data_dir(dir.path());

    let vault = Vault::open(config.clone()).expect("Failed to open vault");
    let ingestor = vault.ingestor();

    ingestor
        .apply(ProtocolEvent::ContactsSet {
            contacts: vec![RawContact {
                id: Some(THREAD.to_string()),
                name: Some("Alice".to_string()),
                ..Default::default()
            }],
        })
        .await;
    ingestor
        .apply(ProtocolEvent::ChatsSet {
            chats: vec![RawChat {
                id: Some("1203@g.us".to_string()),
            }],
        })
        .await;
    ingestor
        .apply(ProtocolEvent::MessagesHistory {
            messages: (1..=250).map(|n| text_message(&format!("m{}", n), n)).collect(),
            is_latest: true,
        })
        .await;

    let before = vault.store().snapshot_collections();
    let metadata_before = vault.store().metadata();
    assert_eq!(before.chats()[THREAD].len(), 200);
    assert_eq!(before.messages().len(), 200);

    let report = vault.shutdown().await;
    assert!(report.is_clean());
    assert_eq!(report.writer.failures(Collection::Messages), 0);

    let vault = Vault::open(config).expect("Failed to reopen vault");
    let load = vault.load_report();
    assert_eq!(load.outcome(Collection::Messages), Some(&RecordOutcome::Loaded(200)));

    let after = vault.store().snapshot_collections();
    assert_eq!(after, before);
    assert_eq!(vault.store().metadata(), metadata_before);

    let ids: Vec<String> = vault
        .store()
        .get_thread(THREAD)
        .expect("thread should exist")
        .message_ids()
        .map(String::from)
        .collect();
    assert_eq!(ids.first().map(String::as_str), Some("m51"));
    assert_eq!(ids.last().map(String::as_str), Some("m250"));

    vault.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_contacts_do_not_block_startup() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = AppConfig::with_data_dir(dir.path());

    let vault = Vault::open(config.clone()).expect("Failed to open vault");
    vault
        .ingestor()
        .apply(ProtocolEvent::MessagesUpsert {
            messages: vec![text_message("m1", 1)],
        })
        .await;
    assert!(vault.shutdown().await.is_clean());

    std::fs::write(dir.path().join("contacts.json"), "[[\"truncated").unwrap();

    let vault = Vault::open(config).expect("Failed to reopen vault");
    assert!(vault.load_report().has_corruption());
    assert!(vault.store().get_message("m1").is_some());
    assert_eq!(vault.store().thread_keys(), vec![THREAD.to_string()]);

    vault.shutdown().await;
}

#[tokio::test]
async fn test_messages_survive_corrupt_chats() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = AppConfig::with_data_dir(dir.path());

    let vault = Vault::open(config.clone()).expect("Failed to open vault");
    vault
        .ingestor()
        .apply(ProtocolEvent::MessagesUpsert {
            messages: vec![text_message("m1", 1), text_message("m2", 2)],
        })
        .await;
    assert!(vault.shutdown().await.is_clean());

    std::fs::write(dir.path().join("chats.json"), "[[\"trunc").unwrap();

    let vault = Vault::open(config).expect("Failed to reopen vault");
    assert!(vault.load_report().has_corruption());

    let ids: Vec<String> = vault
        .store()
        .get_thread(THREAD)
        .expect("thread should be rebuilt")
        .message_ids()
        .map(String::from)
        .collect();
    assert_eq!(ids, vec!["m1", "m2"]);

    let report = vault.store().sweep(100);
    assert_eq!(report.orphans_removed, 0);
    assert_eq!(vault.store().message_ids().len(), 2);

    vault.shutdown().await;
}

#[tokio::test]
async fn test_backup_matches_live_state() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let vault = Vault::open(AppConfig::with_data_dir(dir.path())).expect("Failed to open vault");

    vault
        .ingestor()
        .apply(ProtocolEvent::MessagesUpsert {
            messages: vec![text_message("m1", 1), text_message("m2", 2)],
        })
        .await;

    let path = vault.backup().await.expect("Failed to export backup");
    let (collections, _, _) = chatvault_lib::persistence::bootstrap::load_all(&path);
    assert_eq!(collections, vault.store().snapshot_collections());

    vault.shutdown().await;
}
