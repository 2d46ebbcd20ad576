//! Ring-buffer behavior of the telemetry store.

use teleserver::telemetry::{StoreError, TelemetryStore, MAX_ENTRIES, MAX_ENTRY_SIZE};

#[test]
fn test_add_and_read_back() {
    let mut store = TelemetryStore::new();
    store.add(r#"{"t":1}"#, 100).unwrap();
    store.add(r#"{"t":2}"#, 200).unwrap();

    let entries: Vec<_> = store.entries().collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].json, r#"{"t":1}"#);
    assert_eq!(entries[0].timestamp_ms, 100);
    assert_eq!(entries[1].json, r#"{"t":2}"#);
}

#[test]
fn test_rejects() {
    let mut store = TelemetryStore::new();
    assert_eq!(store.add("", 0), Err(StoreError::Empty));

    let over = "x".repeat(MAX_ENTRY_SIZE + 1);
    assert_eq!(store.add(&over, 0), Err(StoreError::TooLarge));

    let exact = "x".repeat(MAX_ENTRY_SIZE);
    assert_eq!(store.add(&exact, 0), Ok(()));
    assert_eq!(store.len(), 1);
}

#[test]
fn test_ring_evicts_oldest() {
    let mut store = TelemetryStore::new();
    for i in 0..(MAX_ENTRIES + 5) {
        store.add(&format!(r#"{{"seq":{}}}"#, i), i as u64).unwrap();
    }
    assert_eq!(store.len(), MAX_ENTRIES);

    let first = store.entries().next().unwrap();
    assert_eq!(first.json, r#"{"seq":5}"#);
    let last = store.entries().last().unwrap();
    assert_eq!(last.json, format!(r#"{{"seq":{}}}"#, MAX_ENTRIES + 4));
}

#[test]
fn test_stats() {
    let mut store = TelemetryStore::new();
    let stats = store.stats();
    assert_eq!(stats.total_received, 0);
    assert_eq!(stats.current_count, 0);
    assert_eq!(stats.capacity, MAX_ENTRIES);
    assert_eq!(stats.last_received_ms, 0);

    for i in 0..(MAX_ENTRIES + 5) {
        store.add(r#"{"v":0}"#, 1000 + i as u64).unwrap();
    }
    let stats = store.stats();
    assert_eq!(stats.total_received, (MAX_ENTRIES + 5) as u64);
    assert_eq!(stats.current_count, MAX_ENTRIES);
    assert_eq!(stats.last_received_ms, 1000 + (MAX_ENTRIES + 4) as u64);
}

#[test]
fn test_clear() {
    let mut store = TelemetryStore::new();
    store.add(r#"{"v":0}"#, 1).unwrap();
    store.clear();
    assert!(store.is_empty());
    assert_eq!(store.stats().total_received, 0);
}

#[test]
fn test_serialize_format() {
    let mut store = TelemetryStore::new();
    assert_eq!(store.serialize(1024), "[]");

    store.add(r#"{"t":1}"#, 100).unwrap();
    store.add(r#"{"t":2}"#, 200).unwrap();
    assert_eq!(
        store.serialize(1024),
        r#"[{"data":{"t":1},"timestamp":100},{"data":{"t":2},"timestamp":200}]"#
    );
}

#[test]
fn test_serialize_budget_keeps_newest() {
    let mut store = TelemetryStore::new();
    for i in 0..10 {
        store.add(&format!(r#"{{"seq":{}}}"#, i), i).unwrap();
    }
    // one rendered object is 32 bytes; budget for roughly two of them
    let json = store.serialize(70);
    assert!(json.contains(r#"{"seq":9}"#));
    assert!(json.contains(r#"{"seq":8}"#));
    assert!(!json.contains(r#"{"seq":0}"#));
    // chronological order survives the cut
    let pos8 = json.find(r#"{"seq":8}"#).unwrap();
    let pos9 = json.find(r#"{"seq":9}"#).unwrap();
    assert!(pos8 < pos9);
}
