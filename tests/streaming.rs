//! End-to-end tests: store operations through listeners into sinks.

use kvtap::codec::decode_json;
use kvtap::table::bank::{balance_key, supply_key, BankTableDecoder, Coin};
use kvtap::{
    FrameFormat, FrameWriter, KeyFilter, KvStore, ListenStore, Listener, MemStore, MemorySink,
    Operation, SinkRegistry, StateListener, StreamState, StreamingService, TapError,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn memory_service() -> StreamingService {
    let service = StreamingService::new(SinkRegistry::with_defaults());
    service
        .init(&json!({"streamer": {"sinkType": "memory", "channelCapacity": 64}}))
        .unwrap();
    service
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for frames");
        thread::sleep(Duration::from_millis(5));
    }
}

// --- Fan-out ---

#[test]
fn test_two_sinks_receive_every_frame_in_order() {
    init_tracing();
    let service = memory_service();
    let source = StateListener::new();
    let first = MemorySink::new();
    let second = MemorySink::new();

    service.add_source("ledger", &source).unwrap();
    service.add_destination("ledger", Box::new(first.clone())).unwrap();
    service.add_destination("ledger", Box::new(second.clone())).unwrap();
    let handle = service.stream().unwrap();

    let expected: Vec<Vec<u8>> = (0..200).map(|i| format!("frame-{}\n", i).into_bytes()).collect();
    for frame in &expected {
        // Back off while the forwarder drains the listener buffer.
        while source.write_frame(frame).is_err() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    wait_until(|| first.frames().len() == expected.len() && second.frames().len() == expected.len());
    assert_eq!(first.frames(), expected);
    assert_eq!(second.frames(), expected);

    service.close().unwrap();
    handle.wait().unwrap();
    assert!(first.is_closed() && second.is_closed());

    // Nothing reaches the sinks after close; the source says so.
    assert!(matches!(
        source.write_frame(b"after-close\n"),
        Err(TapError::Delivery(_))
    ));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(first.frames().len(), expected.len());
    assert_eq!(second.frames().len(), expected.len());
}

#[test]
fn test_paths_are_isolated() {
    let service = memory_service();
    let bank_source = StateListener::new();
    let staking_source = StateListener::new();
    let bank_sink = MemorySink::new();
    let staking_sink = MemorySink::new();

    service.add_source("bank", &bank_source).unwrap();
    service.add_source("staking", &staking_source).unwrap();
    service.add_destination("bank", Box::new(bank_sink.clone())).unwrap();
    service.add_destination("staking", Box::new(staking_sink.clone())).unwrap();
    assert_eq!(service.paths(), vec!["bank".to_string(), "staking".to_string()]);

    let handle = service.stream().unwrap();
    bank_source.write_frame(b"b1").unwrap();
    staking_source.write_frame(b"s1").unwrap();
    bank_source.write_frame(b"b2").unwrap();

    wait_until(|| bank_sink.frames().len() == 2 && staking_sink.frames().len() == 1);
    assert_eq!(bank_sink.frames(), vec![b"b1".to_vec(), b"b2".to_vec()]);
    assert_eq!(staking_sink.frames(), vec![b"s1".to_vec()]);

    service.close().unwrap();
    handle.wait().unwrap();
}

#[test]
fn test_many_sources_one_path() {
    let service = memory_service();
    let sink = MemorySink::new();
    let sources: Vec<StateListener> = (0..4).map(|_| StateListener::new()).collect();
    for source in &sources {
        service.add_source("merged", source).unwrap();
    }
    service.add_destination("merged", Box::new(sink.clone())).unwrap();
    let handle = service.stream().unwrap();

    for (i, source) in sources.iter().enumerate() {
        for j in 0..10 {
            source.write_frame(format!("{}:{}", i, j).as_bytes()).unwrap();
        }
    }

    wait_until(|| sink.frames().len() == 40);

    // Each source's frames stay in order even though sources interleave.
    for i in 0..4 {
        let prefix = format!("{}:", i);
        let from_source: Vec<String> = sink
            .frames()
            .into_iter()
            .map(|f| String::from_utf8(f).unwrap())
            .filter(|f| f.starts_with(&prefix))
            .collect();
        let expected: Vec<String> = (0..10).map(|j| format!("{}:{}", i, j)).collect();
        assert_eq!(from_source, expected);
    }

    service.close().unwrap();
    handle.wait().unwrap();
}

// --- Store to file ---

#[test]
fn test_store_operations_stream_to_file() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let service = StreamingService::default();
    service
        .init(&json!({"streamer": {"writeDirPath": dir.path().to_str().unwrap()}}))
        .unwrap();

    let output = Arc::new(StateListener::new());
    let mut context = serde_json::Map::new();
    context.insert("store".into(), json!("accounts"));
    let listener = Listener::with_filter(
        output.clone(),
        KeyFilter::with_operations([Operation::Write, Operation::Delete]),
    )
    .with_context(context);
    let store = ListenStore::new(MemStore::new(), vec![Arc::new(listener)]);

    service.add_source("accounts", output.as_ref()).unwrap();
    service.create_destination("accounts").unwrap();
    let handle = service.stream().unwrap();

    store.set(b"acct:alice", b"100").unwrap();
    store.set(b"acct:bob", b"50").unwrap();
    store.get(b"acct:alice").unwrap();
    store.delete(b"acct:bob").unwrap();

    let file = dir.path().join("accounts");
    wait_until(|| {
        std::fs::read(&file)
            .map(|b| b.iter().filter(|c| **c == b'\n').count() == 3)
            .unwrap_or(false)
    });

    service.close().unwrap();
    handle.wait().unwrap();
    assert_eq!(service.state(), StreamState::Closed);

    let contents = std::fs::read(&file).unwrap();
    let traces: Vec<_> = contents
        .split_inclusive(|b| *b == b'\n')
        .map(|line| decode_json(line).unwrap())
        .collect();

    let ops: Vec<Operation> = traces.iter().map(|t| t.operation).collect();
    assert_eq!(ops, vec![Operation::Write, Operation::Write, Operation::Delete]);
    assert_eq!(traces[1].key_bytes().unwrap(), b"acct:bob");
    assert_eq!(traces[1].value_bytes().unwrap(), b"50");
    assert!(traces[2].value_bytes().unwrap().is_empty());
    assert_eq!(traces[0].metadata["store"], "accounts");
}

#[test]
fn test_close_flushes_pending_store_events_to_file() {
    let dir = TempDir::new().unwrap();
    let service = StreamingService::default();
    service
        .init(&json!({"streamer": {"writeDirPath": dir.path().to_str().unwrap()}}))
        .unwrap();

    let output = Arc::new(StateListener::new());
    let store = ListenStore::new(
        MemStore::new(),
        vec![Arc::new(Listener::with_filter(
            output.clone(),
            KeyFilter::with_operations([Operation::Write]),
        ))],
    );
    service.add_source("ledger", output.as_ref()).unwrap();
    service.create_destination("ledger").unwrap();
    let handle = service.stream().unwrap();

    for i in 0..300 {
        store.set(format!("k{:03}", i).as_bytes(), b"v").unwrap();
    }
    // No waiting: close itself must deliver everything already accepted.
    service.close().unwrap();
    handle.wait().unwrap();

    let contents = std::fs::read(dir.path().join("ledger")).unwrap();
    let keys: Vec<Vec<u8>> = contents
        .split_inclusive(|b| *b == b'\n')
        .map(|line| decode_json(line).unwrap().key_bytes().unwrap())
        .collect();
    let expected: Vec<Vec<u8>> = (0..300).map(|i| format!("k{:03}", i).into_bytes()).collect();
    assert_eq!(keys, expected);

    // Writes after close still commit but report the undeliverable event.
    assert!(matches!(store.set(b"late", b"v"), Err(TapError::Delivery(_))));
    assert_eq!(store.parent().get(b"late").unwrap(), Some(b"v".to_vec()));
}

#[test]
fn test_fixed_frames_stream_to_file() {
    let dir = TempDir::new().unwrap();
    let service = StreamingService::default();
    service
        .init(&json!({"streamer.sinkType": "f", "streamer.writeDirPath": dir.path().to_str().unwrap()}))
        .unwrap();

    let output = Arc::new(StateListener::new());
    let listener = Listener::new(output.clone()).with_format(FrameFormat::Fixed);
    let store = ListenStore::new(MemStore::new(), vec![Arc::new(listener)]);

    service.add_source("raw", output.as_ref()).unwrap();
    service.create_destination("raw").unwrap();
    let handle = service.stream().unwrap();

    store.set(b"k1", b"\n\x00binary").unwrap();
    store.set(b"k2", b"").unwrap();

    let file = dir.path().join("raw");
    let expected_len = (6 + 2 + 8) + (6 + 2);
    wait_until(|| std::fs::metadata(&file).map(|m| m.len() == expected_len).unwrap_or(false));
    service.close().unwrap();
    handle.wait().unwrap();

    let contents = std::fs::read(&file).unwrap();
    let (first, used) = kvtap::codec::decode_fixed(&contents).unwrap();
    assert_eq!(first.key, b"k1");
    assert_eq!(first.value, b"\n\x00binary");
    let (second, _) = kvtap::codec::decode_fixed(&contents[used..]).unwrap();
    assert_eq!(second.key, b"k2");
    assert!(second.value.is_empty());
}

#[test]
fn test_table_updates_stream_to_sink() {
    let service = memory_service();
    let output = Arc::new(StateListener::new());
    let mut filter = KeyFilter::with_operations([Operation::Write, Operation::Delete]);
    filter.add_prefix_to_whitelist(vec![0x00]).add_prefix_to_whitelist(vec![0x02]);
    let listener = Listener::with_filter(output.clone(), filter)
        .with_table_decoder(Arc::new(BankTableDecoder::new()));
    let store = ListenStore::new(MemStore::new(), vec![Arc::new(listener)]);

    let sink = MemorySink::new();
    service.add_source("bank", output.as_ref()).unwrap();
    service.add_destination("bank", Box::new(sink.clone())).unwrap();
    let handle = service.stream().unwrap();

    let coin = Coin {
        denom: "uatom".into(),
        amount: "42".into(),
    };
    let key = balance_key(&[0xab; 20], "uatom").unwrap();
    store.set(&key, &rmp_serde::to_vec(&coin).unwrap()).unwrap();
    store.set(&supply_key("uatom"), b"42").unwrap();
    store.delete(&key).unwrap();
    // Outside the whitelist: never decoded or emitted.
    store.set(b"\x01uatom", b"not-metadata").unwrap();

    wait_until(|| sink.frames().len() == 3);
    service.close().unwrap();
    handle.wait().unwrap();

    let records: Vec<serde_json::Value> = sink
        .frames()
        .iter()
        .map(|f| serde_json::from_slice(f).unwrap())
        .collect();
    assert_eq!(records[0]["table"], "Balance");
    assert_eq!(records[0]["mode"], "replace");
    assert_eq!(records[0]["updated"]["balance"]["amount"], "42");
    assert_eq!(records[1]["table"], "Supply");
    assert_eq!(records[2]["operation"], "delete");
    assert_eq!(records[2]["mode"], "patch");
    assert_eq!(records[2]["cleared_fields"], json!(["balance"]));
    assert!(records[2]["updated"].get("balance").is_none());
}

// --- Setup errors ---

#[test]
fn test_unknown_sink_type_fails_setup() {
    let service = StreamingService::default();
    let result = service.init(&json!({"streamer": {"sinkType": "grpc"}}));
    assert!(matches!(result, Err(TapError::UnknownSink(_))));
    assert!(matches!(service.stream(), Err(TapError::NotInitialized)));
}

#[test]
fn test_init_is_idempotent() {
    let service = memory_service();
    service
        .init(&json!({"streamer": {"sinkType": "tcp", "tcpAddress": "127.0.0.1:1"}}))
        .unwrap();

    // The memory configuration stays in effect: no connection is attempted.
    service.create_destination("p").unwrap();
}

#[test]
fn test_slow_stream_surfaces_delivery_failure_to_writer() {
    let output = Arc::new(StateListener::with_capacity(4));
    let store = ListenStore::new(MemStore::new(), vec![Arc::new(Listener::new(output.clone()))]);

    // Nobody drains the listener: the fifth write is reported, not queued.
    for i in 0..4u8 {
        store.set(&[b'k', i], b"v").unwrap();
    }
    let result = store.set(b"k-overflow", b"v");
    assert!(matches!(result, Err(TapError::Delivery(_))));
    assert_eq!(store.parent().get(b"k-overflow").unwrap(), Some(b"v".to_vec()));
}
