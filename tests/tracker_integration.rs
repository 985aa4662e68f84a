//! History tracker behaviour across save and load

use aria_lib::tracker::{
    manager, ColumnType, KeyedBuckets, Schema, Tracker, TrackerManager, Value,
    DEFAULT_DEDUP_THRESHOLD,
};
use tempfile::TempDir;

fn hits_schema() -> Schema {
    Schema::new(vec![("name", ColumnType::Str), ("hits", ColumnType::Int)]).unwrap()
}

#[test]
fn test_near_duplicates_merge_toward_later_value() {
    let mut tracker = Tracker::new("hits", hits_schema());
    for hits in [2i64, 4] {
        let item = tracker
            .new_item(vec![Value::from("alpha"), Value::Int(hits)])
            .unwrap();
        tracker.add_item(item).unwrap();
    }

    tracker.remove_near_duplicates(None, DEFAULT_DEDUP_THRESHOLD, None);

    assert_eq!(tracker.len(), 1);
    assert_eq!(tracker.items()[0].get_str("name"), Some("alpha"));
    assert_eq!(tracker.items()[0].get("hits"), Some(&Value::Int(3)));
}

#[test]
fn test_items_survive_save_and_load() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("notes_tracking.csv");

    let mut tracker = Tracker::with_file("notes", hits_schema(), &path);
    tracker.load_data().unwrap();
    tracker.remove_empty_items();
    for (name, hits) in [("groceries, weekly", 3i64), ("say \"hi\"", 1), ("two\nlines", 7)] {
        let item = tracker.new_item(vec![Value::from(name), Value::Int(hits)]).unwrap();
        tracker.add_item(item).unwrap();
    }
    tracker.save_data().unwrap();

    let mut reloaded = Tracker::with_file("notes", hits_schema(), &path);
    reloaded.load_data().unwrap();

    assert_eq!(reloaded.items(), tracker.items());
    assert_eq!(reloaded.get_max_of_column("hits").unwrap(), Some(7.0));
    assert_eq!(reloaded.get_min_of_column("hits").unwrap(), Some(1.0));
}

#[test]
fn test_corrupt_file_is_reset() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("broken_tracking.csv");
    std::fs::write(&path, "\"never closed,1\n").unwrap();

    let mut tracker = Tracker::with_file("broken", hits_schema(), &path);
    tracker.load_data().unwrap();

    assert_eq!(tracker.len(), 1);
    assert!(tracker.items()[0].is_empty());
}

#[test]
fn test_bucketed_dedup_keeps_keys_apart() {
    let mut tracker = Tracker::new("hits", hits_schema())
        .with_dedup_strategy(Box::new(KeyedBuckets::new("name")));
    for (name, hits) in [("alpha", 2i64), ("alphb", 2), ("alpha", 4)] {
        let item = tracker.new_item(vec![Value::from(name), Value::Int(hits)]).unwrap();
        tracker.add_item(item).unwrap();
    }

    tracker.remove_near_duplicates(None, DEFAULT_DEDUP_THRESHOLD, None);

    let names: Vec<_> = tracker.items().iter().filter_map(|i| i.get_str("name")).collect();
    assert_eq!(names, vec!["alpha", "alphb"]);
}

#[test]
fn test_manager_shares_state_between_handles() {
    let temp = TempDir::new().unwrap();
    let trackers = TrackerManager::new(temp.path()).unwrap();

    trackers.run_frequency_tracker("apps", "editor").unwrap();
    let shared = trackers.get("apps").unwrap();
    assert_eq!(manager::lock(&shared).len(), 1);

    trackers.run_frequency_tracker("apps", "editor").unwrap();
    let frequency = manager::lock(&shared).items()[0].get_f64("frequency");
    assert_eq!(frequency, Some(2.0));
}
