mod support;

use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, Utc};
use drift::event::{EventKind, EvolutionEvent};
use drift::store::EventFilter;
use drift::Error;

use support::TestProject;

const WRITERS: usize = 4;
const EVENTS_PER_WRITER: usize = 25;

#[test]
fn concurrent_appends_from_separate_handles_are_all_kept() {
    let project = Arc::new(TestProject::new());
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let project = Arc::clone(&project);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let store = project.store();
                barrier.wait();
                let mut ids = Vec::new();
                for _ in 0..EVENTS_PER_WRITER {
                    let event = EvolutionEvent::task(format!("T{writer}"), EventKind::TaskStart);
                    ids.push(event.id.clone());
                    store.append(event).expect("append");
                }
                ids
            })
        })
        .collect();

    let mut expected = HashSet::new();
    for handle in handles {
        expected.extend(handle.join().expect("writer thread"));
    }

    let stored: HashSet<String> = project
        .store()
        .query(&EventFilter::default())
        .into_iter()
        .map(|event| event.id)
        .collect();
    assert_eq!(stored.len(), WRITERS * EVENTS_PER_WRITER);
    assert_eq!(stored, expected);
}

#[test]
fn retention_bounds_the_index() {
    let project = TestProject::new();
    project
        .write_config("[evolution]\nmax_records = 10\nmax_age = \"1d\"\n")
        .unwrap();
    let store = project.store();

    let now = Utc::now();
    let old: Vec<EvolutionEvent> = (0..5)
        .map(|i| {
            EvolutionEvent::task("old", EventKind::TaskStart)
                .with_timestamp(now - Duration::days(3) + Duration::minutes(i))
        })
        .collect();
    store.append_all(old).unwrap();

    for _ in 0..12 {
        store
            .append(EvolutionEvent::task("new", EventKind::TaskStart))
            .unwrap();
    }

    let records = store.query(&EventFilter::default());
    assert_eq!(records.len(), 10);
    assert!(records.iter().all(|event| event.task_id == "new"));
    assert!(store.task_history("old").is_empty());
}

#[test]
fn interrupted_write_does_not_block_tracking() {
    let project = TestProject::new();
    let store = project.store();
    store
        .append(EvolutionEvent::task("T1", EventKind::TaskStart))
        .unwrap();

    // Simulates a write cut off mid-document.
    let index = project.storage().index_file().to_path_buf();
    fs::write(&index, "{\"version\":\"1.0.0\",\"rec").unwrap();

    assert!(store.query(&EventFilter::default()).is_empty());
    assert!(matches!(store.verify(), Err(Error::CorruptStore { .. })));

    store
        .append(EvolutionEvent::task("T2", EventKind::TaskStart))
        .unwrap();
    let events = store.query(&EventFilter::default());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].task_id, "T2");

    let preserved = store.quarantined();
    assert_eq!(preserved.len(), 1);
    assert_eq!(
        fs::read_to_string(&preserved[0]).unwrap(),
        "{\"version\":\"1.0.0\",\"rec"
    );

    store.reset().unwrap();
    assert!(store.query(&EventFilter::default()).is_empty());
    assert_eq!(store.quarantined().len(), 1);
}
