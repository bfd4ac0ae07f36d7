// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File lock coordination through the shared lock document.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use workforce::orchestrate::locks::{LOCK_FILE, STATE_DIR};
use workforce::orchestrate::{LockDocument, WorkforceLocks};

#[test]
fn test_two_coordinators_share_one_document() {
    let temp = TempDir::new().unwrap();
    let first = WorkforceLocks::new(temp.path());
    let second = WorkforceLocks::new(temp.path());

    first.register_agent("main");
    second.register_agent("agent-1");

    assert!(first.lock_file("main", "src/lib.rs"));
    assert!(!second.lock_file("agent-1", "src/lib.rs"));
    assert!(!second.lock_file("agent-1", "./src/../src/lib.rs"));

    let status = second.is_locked("src/lib.rs");
    assert!(status.locked);
    assert_eq!(status.holder.as_deref(), Some("main"));

    first.unlock_all("main");
    assert!(second.lock_file("agent-1", "src/lib.rs"));
    assert_eq!(first.is_locked("src/lib.rs").holder.as_deref(), Some("agent-1"));
}

#[test]
fn test_document_location_and_shape() {
    let temp = TempDir::new().unwrap();
    let locks = WorkforceLocks::new(temp.path());
    locks.register_agent("main");
    locks.update_status("main", "active");
    locks.lock_file("main", "README.md");

    let path = temp.path().join(STATE_DIR).join(LOCK_FILE);
    assert_eq!(locks.path(), path.as_path());

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let entry = &raw["agents"]["main"];
    assert_eq!(entry["status"], "active");
    assert_eq!(entry["lockedFiles"].as_array().unwrap().len(), 1);
    assert!(entry["startTime"].as_i64().unwrap() > 0);
    assert!(raw["lastUpdated"].as_i64().unwrap() > 0);

    let doc: LockDocument = serde_json::from_value(raw).unwrap();
    assert_eq!(doc, locks.snapshot());
}

#[test]
fn test_concurrent_claims_grant_exactly_one() {
    let temp = TempDir::new().unwrap();
    let locks = Arc::new(WorkforceLocks::new(temp.path()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let agent = format!("agent-{}", i);
                locks.register_agent(&agent);
                locks.lock_file(&agent, "shared.txt")
            })
        })
        .collect();

    let granted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|granted| *granted)
        .count();
    assert_eq!(granted, 1);
}

#[test]
fn test_corrupt_document_fails_open() {
    let temp = TempDir::new().unwrap();
    let locks = WorkforceLocks::new(temp.path());
    std::fs::create_dir_all(temp.path().join(STATE_DIR)).unwrap();
    std::fs::write(locks.path(), "{ not json").unwrap();

    // Unreadable coordination never blocks an edit.
    assert!(!locks.is_locked("a.txt").locked);
    assert!(locks.locked_files("main").is_empty());
}

#[test]
fn test_unregister_drops_agent_and_its_locks() {
    let temp = TempDir::new().unwrap();
    let locks = WorkforceLocks::new(temp.path());
    locks.register_agent("agent-2");
    locks.lock_file("agent-2", "a.txt");
    locks.lock_file("agent-2", "b.txt");
    locks.unlock_file("agent-2", "a.txt");
    assert_eq!(locks.locked_files("agent-2").len(), 1);

    locks.unregister_agent("agent-2");
    assert!(!locks.snapshot().agents.contains_key("agent-2"));
    assert!(!locks.is_locked("b.txt").locked);
}
