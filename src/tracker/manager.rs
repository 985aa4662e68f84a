/// Shared access to named trackers
///
/// Every tracker name maps to one `Arc<Mutex<Tracker>>` for the life of the
/// manager, so two tasks touching the same tracker serialize their
/// load/modify/save cycles on that mutex.

use crate::error::{AriaError, Result};
use crate::tracker::item::TrackerItem;
use crate::tracker::schema::{Schema, Value};
use crate::tracker::store::Tracker;
use chrono::{Local, Timelike};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

pub type SharedTracker = Arc<Mutex<Tracker>>;

pub struct TrackerManager {
    data_dir: PathBuf,
    trackers: Mutex<HashMap<String, SharedTracker>>,
}

impl TrackerManager {
    /// Create a manager rooted at `data_dir`, creating the directory if needed
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        Ok(Self {
            data_dir,
            trackers: Mutex::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Backing file for a tracker name
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}_tracking.csv", name))
    }

    /// Get or create the tracker called `name`
    ///
    /// The first call loads the backing file. Later calls must ask for the
    /// same schema.
    pub fn tracker(&self, name: &str, schema: Schema) -> Result<SharedTracker> {
        self.open(name, schema, |tracker| tracker)
    }

    fn open(
        &self,
        name: &str,
        schema: Schema,
        configure: impl FnOnce(Tracker) -> Tracker,
    ) -> Result<SharedTracker> {
        let mut trackers = self.trackers.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = trackers.get(name) {
            let same_schema = lock(existing).schema() == &schema;
            if !same_schema {
                return Err(AriaError::Schema(format!(
                    "tracker '{}' is already open with a different schema",
                    name
                )));
            }
            return Ok(Arc::clone(existing));
        }

        let mut tracker = configure(Tracker::with_file(name, schema, self.file_path(name)));
        tracker.load_data()?;
        debug!(tracker = name, items = tracker.len(), "opened tracker");

        let shared = Arc::new(Mutex::new(tracker));
        trackers.insert(name.to_string(), Arc::clone(&shared));
        Ok(shared)
    }

    /// Tracker with the start/end/frequency/targets history schema
    ///
    /// Items with the same targets count as duplicates; merging one into
    /// another adds a use.
    pub fn history_tracker(&self, name: &str) -> Result<SharedTracker> {
        self.open(name, Schema::history(), |tracker| {
            tracker
                .with_compare(Arc::new(same_targets))
                .with_merge(Arc::new(count_use))
        })
    }

    /// An already opened tracker
    pub fn get(&self, name: &str) -> Option<SharedTracker> {
        self.trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Names of opened trackers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Record one more use of `target` in a history tracker and save it
    ///
    /// The new use goes through `Tracker::run`, so it folds into the item
    /// already holding `target` if there is one. Returns the target's
    /// frequency after the update.
    pub fn run_frequency_tracker(&self, name: &str, target: &str) -> Result<f64> {
        let shared = self.history_tracker(name)?;
        let mut tracker = lock(&shared);

        let now = seconds_since_midnight();
        let targets = vec![target.to_string()];
        let item = tracker.new_item(vec![
            Value::Float(now),
            Value::Float(now),
            Value::Float(1.0),
            Value::Seq(targets.clone()),
        ])?;
        tracker.run(item)?;

        let frequency = tracker
            .items()
            .iter()
            .find(|item| item.get_seq("targets") == Some(targets.as_slice()))
            .and_then(|item| item.get_f64("frequency"))
            .unwrap_or(1.0);
        Ok(frequency)
    }
}

/// History compare: 0 when both items hold the same targets, 1 otherwise
pub fn same_targets(a: &TrackerItem, b: &TrackerItem) -> f64 {
    if a.get_seq("targets") == b.get_seq("targets") {
        0.0
    } else {
        1.0
    }
}

/// History merge: the earlier item gains a use and takes the later end time
pub fn count_use(earlier: &TrackerItem, later: &TrackerItem) -> TrackerItem {
    let mut merged = earlier.clone();
    let frequency = earlier.get_f64("frequency").unwrap_or(0.0) + 1.0;
    // Both items share the history schema
    let _ = merged.set("frequency", frequency);
    if let Some(end) = later.get_f64("end_time") {
        let _ = merged.set("end_time", end);
    }
    merged
}

/// Lock a tracker, recovering it if another task panicked while holding it
pub fn lock(tracker: &SharedTracker) -> MutexGuard<'_, Tracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Seconds elapsed since local midnight, the time unit of history trackers
pub fn seconds_since_midnight() -> f64 {
    let now = Local::now();
    now.num_seconds_from_midnight() as f64 + f64::from(now.nanosecond() % 1_000_000_000) / 1e9
}
