/// The tracker itself: an ordered, schema-typed record list backed by a
/// comma-delimited file
///
/// Nothing is written until `save_data()` or `run()` is called. Loading a
/// missing file creates it with a single zero-valued seed record.

use crate::error::{AriaError, Result};
use crate::tracker::dedup::{DedupStrategy, PairwiseScan, DEFAULT_DEDUP_THRESHOLD};
use crate::tracker::item::TrackerItem;
use crate::tracker::schema::{ColumnType, Schema, Value};
use crate::tracker::similarity::{closeness, default_compare, default_merge, CompareFn, MergeFn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const FIELD_SEPARATOR: char = ',';
const QUOTE: char = '"';

pub struct Tracker {
    name: String,
    schema: Arc<Schema>,
    items: Vec<TrackerItem>,
    data_file_path: Option<PathBuf>,
    dedup: Box<dyn DedupStrategy>,
    compare: Option<Arc<CompareFn>>,
    merge: Option<Arc<MergeFn>>,
    allow_duplicates: bool,
    allow_near_duplicates: bool,
    dedup_threshold: f64,
}

impl Tracker {
    /// In-memory tracker with no backing file
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            items: Vec::new(),
            data_file_path: None,
            dedup: Box::new(PairwiseScan),
            compare: None,
            merge: None,
            allow_duplicates: false,
            allow_near_duplicates: false,
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
        }
    }

    /// Tracker persisted to `path`
    pub fn with_file(name: impl Into<String>, schema: Schema, path: impl AsRef<Path>) -> Self {
        let mut tracker = Self::new(name, schema);
        tracker.data_file_path = Some(path.as_ref().to_path_buf());
        tracker
    }

    pub fn with_dedup_strategy(mut self, strategy: Box<dyn DedupStrategy>) -> Self {
        self.dedup = strategy;
        self
    }

    /// Replace the compare function used when callers don't pass one
    pub fn with_compare(mut self, compare: Arc<CompareFn>) -> Self {
        self.compare = Some(compare);
        self
    }

    /// Replace the merge function used when callers don't pass one
    pub fn with_merge(mut self, merge: Arc<MergeFn>) -> Self {
        self.merge = Some(merge);
        self
    }

    /// Keep exact duplicates when `run()` records an item
    pub fn allow_duplicates(mut self, allow: bool) -> Self {
        self.allow_duplicates = allow;
        self
    }

    /// Keep near-duplicates when `run()` records an item; exact duplicates
    /// are still merged unless those are allowed too
    pub fn allow_near_duplicates(mut self, allow: bool) -> Self {
        self.allow_near_duplicates = allow;
        self
    }

    pub fn with_dedup_threshold(mut self, threshold: f64) -> Self {
        self.dedup_threshold = threshold;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn data_file_path(&self) -> Option<&Path> {
        self.data_file_path.as_deref()
    }

    pub fn dedup_strategy(&self) -> &dyn DedupStrategy {
        self.dedup.as_ref()
    }

    pub fn items(&self) -> &[TrackerItem] {
        &self.items
    }

    /// Mutable access for callers that rewrite fields of existing items
    pub fn items_mut(&mut self) -> &mut [TrackerItem] {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Most recently added item
    pub fn last(&self) -> Option<&TrackerItem> {
        self.items.last()
    }

    /// Index of the first item equal to `item`
    pub fn position(&self, item: &TrackerItem) -> Option<usize> {
        self.items.iter().position(|candidate| candidate == item)
    }

    /// Create an item from positional values
    pub fn new_item(&self, values: Vec<Value>) -> Result<TrackerItem> {
        TrackerItem::from_values(Arc::clone(&self.schema), values)
    }

    /// Create an item from `(column, value)` pairs; every column must be given once
    pub fn new_item_keyed<I, K, V>(&self, pairs: I) -> Result<TrackerItem>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut slots: Vec<Option<Value>> = vec![None; self.schema.len()];

        for (column, value) in pairs {
            let index = self.schema.require(column.as_ref())?;
            if slots[index].is_some() {
                return Err(AriaError::Schema(format!(
                    "column '{}' given twice",
                    column.as_ref()
                )));
            }
            slots[index] = Some(value.into());
        }

        let mut values = Vec::with_capacity(slots.len());
        for (slot, name) in slots.into_iter().zip(self.schema.names()) {
            match slot {
                Some(value) => values.push(value),
                None => {
                    return Err(AriaError::Schema(format!("missing column '{}'", name)));
                }
            }
        }

        self.new_item(values)
    }

    /// Zero-valued item, used as the seed record of a fresh file
    pub fn new_empty_item(&self) -> TrackerItem {
        TrackerItem::zeroed(Arc::clone(&self.schema))
    }

    /// Append an item; it must have been built against this tracker's schema
    pub fn add_item(&mut self, item: TrackerItem) -> Result<()> {
        if item.schema_arc().as_ref() != self.schema.as_ref() {
            return Err(AriaError::Schema(format!(
                "item does not match the schema of tracker '{}'",
                self.name
            )));
        }
        self.items.push(item);
        Ok(())
    }

    /// Remove the first item equal to `item`
    pub fn remove_item(&mut self, item: &TrackerItem) -> bool {
        match self.position(item) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drop all in-memory items; the backing file is untouched
    pub fn clear_items(&mut self) {
        self.items.clear();
    }

    /// Replace the in-memory items with the backing file's contents
    ///
    /// A missing file is created with a seed record. An unreadable file is
    /// recreated the same way; only if that also fails is an error returned.
    pub fn load_data(&mut self) -> Result<()> {
        if let Some(items) = self.read_data()? {
            self.items = items;
        }
        Ok(())
    }

    /// Like `load_data`, but the file's items go after the in-memory ones
    pub fn append_data(&mut self) -> Result<()> {
        if let Some(items) = self.read_data()? {
            self.items.extend(items);
        }
        Ok(())
    }

    /// Load, add `item`, fold duplicates, save
    ///
    /// Seed records are dropped first. Near-duplicates are merged with this
    /// tracker's compare and merge functions unless they are allowed; if
    /// they are, exact duplicates are still merged unless those are allowed
    /// too.
    pub fn run(&mut self, item: TrackerItem) -> Result<()> {
        self.load_data()?;
        self.remove_empty_items();
        self.add_item(item)?;

        if !self.allow_near_duplicates {
            self.remove_near_duplicates(None, self.dedup_threshold, None);
        } else if !self.allow_duplicates {
            self.remove_duplicates(None);
        }

        self.save_data()
    }

    /// Items in the backing file; `None` for an in-memory tracker
    fn read_data(&mut self) -> Result<Option<Vec<TrackerItem>>> {
        let Some(path) = self.data_file_path.clone() else {
            return Ok(None);
        };

        if !path.exists() {
            debug!(tracker = %self.name, path = %path.display(), "creating tracker file");
            return self.reset_file(&path).map(Some);
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                let failure = AriaError::TrackerPersistence {
                    tracker: self.name.clone(),
                    detail: e.to_string(),
                };
                warn!("{}; recreating {}", failure, path.display());
                return self.reset_file(&path).map(Some);
            }
        };

        let records = match parse_records(&content) {
            Ok(records) => records,
            Err(detail) => {
                let failure = AriaError::TrackerPersistence {
                    tracker: self.name.clone(),
                    detail,
                };
                warn!("{}; recreating {}", failure, path.display());
                return self.reset_file(&path).map(Some);
            }
        };

        let mut items = Vec::with_capacity(records.len());
        for (line, record) in records.into_iter().enumerate() {
            match self.decode_record(record) {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(tracker = %self.name, line = line + 1, "skipping malformed record: {}", e);
                }
            }
        }

        Ok(Some(items))
    }

    /// Write every in-memory item to the backing file
    pub fn save_data(&self) -> Result<()> {
        let Some(path) = self.data_file_path.as_ref() else {
            return Ok(());
        };

        let mut content = String::new();
        for item in &self.items {
            content.push_str(&encode_record(item.values()));
            content.push('\n');
        }

        write_file(path, &content).map_err(|e| AriaError::TrackerPersistence {
            tracker: self.name.clone(),
            detail: e.to_string(),
        })
    }

    /// Rewrite the file with just a seed record and return that record
    fn reset_file(&self, path: &Path) -> Result<Vec<TrackerItem>> {
        let seed = self.new_empty_item();
        let content = format!("{}\n", encode_record(seed.values()));

        write_file(path, &content).map_err(|e| AriaError::TrackerPersistence {
            tracker: self.name.clone(),
            detail: e.to_string(),
        })?;

        Ok(vec![seed])
    }

    fn decode_record(&self, fields: Vec<String>) -> Result<TrackerItem> {
        if fields.len() != self.schema.len() {
            return Err(AriaError::Schema(format!(
                "expected {} fields, found {}",
                self.schema.len(),
                fields.len()
            )));
        }

        let values = fields
            .iter()
            .zip(self.schema.columns())
            .map(|(raw, (_, ty))| Value::parse(raw, *ty))
            .collect::<Result<Vec<_>>>()?;

        self.new_item(values)
    }

    /// Items whose `column` contains every target as a substring
    ///
    /// Matching ignores case. For sequence columns a target may match any
    /// one element.
    pub fn get_items_containing<S: AsRef<str>>(
        &self,
        column: &str,
        targets: &[S],
    ) -> Result<Vec<&TrackerItem>> {
        let index = self.schema.require(column)?;
        let targets: Vec<String> = targets.iter().map(|t| t.as_ref().to_lowercase()).collect();

        let matches = self
            .items
            .iter()
            .filter(|item| {
                let value = &item.values()[index];
                targets.iter().all(|target| value_contains(value, target))
            })
            .collect();

        Ok(matches)
    }

    /// The candidate closest to `target`, if its closeness beats `threshold`
    ///
    /// Closeness is `1 - compare(target, candidate)`. Columns named in
    /// `ignored` take the candidate's value before comparing, so they never
    /// count against it. Ties keep the first candidate evaluated.
    pub fn get_best_match<'a>(
        &self,
        target: &TrackerItem,
        candidates: &'a [TrackerItem],
        threshold: f64,
        compare: Option<&CompareFn>,
        ignored: &[&str],
    ) -> Result<Option<&'a TrackerItem>> {
        let ignored = ignored
            .iter()
            .map(|column| self.schema.require(column))
            .collect::<Result<Vec<usize>>>()?;

        let mut best_score = threshold;
        let mut best = None;
        let mut compared = target.clone();

        for candidate in candidates {
            for &index in &ignored {
                if let Some(value) = candidate.values().get(index) {
                    compared.set_at(index, value.clone())?;
                }
            }

            let delta = match compare {
                Some(f) => f(&compared, candidate),
                None => self.compare(&compared, candidate),
            };
            let score = closeness(delta);

            if score > best_score {
                best_score = score;
                best = Some(candidate);
            }
        }

        Ok(best)
    }

    /// Delta using this tracker's compare function (or the default)
    pub fn compare(&self, a: &TrackerItem, b: &TrackerItem) -> f64 {
        match &self.compare {
            Some(f) => f(a, b),
            None => default_compare(a, b),
        }
    }

    /// Merge near-duplicates using the configured strategy
    pub fn remove_near_duplicates(
        &mut self,
        compare: Option<&CompareFn>,
        threshold: f64,
        merge: Option<&MergeFn>,
    ) {
        let compare: &CompareFn = match (compare, &self.compare) {
            (Some(f), _) => f,
            (None, Some(f)) => f.as_ref(),
            (None, None) => &default_compare,
        };
        let merge: &MergeFn = match (merge, &self.merge) {
            (Some(f), _) => f,
            (None, Some(f)) => f.as_ref(),
            (None, None) => &default_merge,
        };

        let before = self.items.len();
        let items = std::mem::take(&mut self.items);
        self.items = self.dedup.dedup(items, compare, threshold, merge);

        if self.items.len() != before {
            debug!(
                tracker = %self.name,
                strategy = self.dedup.name(),
                merged = before - self.items.len(),
                "removed near-duplicates"
            );
        }
    }

    /// Merge exact duplicates, keeping the first occurrence
    pub fn remove_duplicates(&mut self, merge: Option<&MergeFn>) {
        let merge: &MergeFn = match (merge, &self.merge) {
            (Some(f), _) => f,
            (None, Some(f)) => f.as_ref(),
            (None, None) => &default_merge,
        };

        let items = std::mem::take(&mut self.items);
        let exact = |a: &TrackerItem, b: &TrackerItem| if a == b { 0.0 } else { 1.0 };
        // Exact equality is its own bucket, so a plain pairwise scan is enough
        self.items = PairwiseScan.dedup(items, &exact, 0.0, merge);
    }

    /// Drop zero-valued seed records
    pub fn remove_empty_items(&mut self) {
        self.items.retain(|item| !item.is_empty());
    }

    /// Largest numeric value in `column`, `None` when there are no items
    pub fn get_max_of_column(&self, column: &str) -> Result<Option<f64>> {
        let index = self.numeric_column(column)?;
        Ok(self
            .items
            .iter()
            .filter_map(|item| item.values()[index].as_f64())
            .reduce(f64::max))
    }

    /// Smallest numeric value in `column`, `None` when there are no items
    pub fn get_min_of_column(&self, column: &str) -> Result<Option<f64>> {
        let index = self.numeric_column(column)?;
        Ok(self
            .items
            .iter()
            .filter_map(|item| item.values()[index].as_f64())
            .reduce(f64::min))
    }

    fn numeric_column(&self, column: &str) -> Result<usize> {
        let index = self.schema.require(column)?;
        match self.schema.column_type(index) {
            Some(ColumnType::Int) | Some(ColumnType::Float) | Some(ColumnType::Bool) => Ok(index),
            Some(ty) => Err(AriaError::Schema(format!(
                "column '{}' is {}, not numeric",
                column, ty
            ))),
            None => Err(AriaError::Schema(format!("no column named '{}'", column))),
        }
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("items", &self.items.len())
            .field("data_file_path", &self.data_file_path)
            .field("dedup", &self.dedup.name())
            .field("allow_duplicates", &self.allow_duplicates)
            .field("allow_near_duplicates", &self.allow_near_duplicates)
            .finish()
    }
}

fn value_contains(value: &Value, target: &str) -> bool {
    match value {
        Value::Seq(elements) => elements
            .iter()
            .any(|element| element.to_lowercase().contains(target)),
        other => other.to_string().to_lowercase().contains(target),
    }
}

fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, content)
}

/// One line of the backing file. Text fields are always quoted, numbers and
/// booleans never are.
fn encode_record(values: &[Value]) -> String {
    let fields: Vec<String> = values
        .iter()
        .map(|value| match value {
            Value::Str(_) | Value::Seq(_) => quote(&value.encode()),
            other => other.encode(),
        })
        .collect();
    fields.join(&FIELD_SEPARATOR.to_string())
}

fn quote(raw: &str) -> String {
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push(QUOTE);
    for ch in raw.chars() {
        if ch == QUOTE {
            quoted.push(QUOTE);
        }
        quoted.push(ch);
    }
    quoted.push(QUOTE);
    quoted
}

/// Split file content into records of unquoted fields
///
/// Quoted fields may contain separators, doubled quotes, and newlines.
/// Blank lines are skipped.
fn parse_records(content: &str) -> std::result::Result<Vec<Vec<String>>, String> {
    let mut records = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line_has_data = false;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == QUOTE {
                if chars.peek() == Some(&QUOTE) {
                    field.push(QUOTE);
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
            continue;
        }

        match ch {
            QUOTE => {
                in_quotes = true;
                line_has_data = true;
            }
            FIELD_SEPARATOR => {
                record.push(std::mem::take(&mut field));
                line_has_data = true;
            }
            '\r' => {}
            '\n' => {
                if line_has_data || !field.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                line_has_data = false;
            }
            other => {
                field.push(other);
                line_has_data = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    if line_has_data || !field.is_empty() {
        record.push(field);
        records.push(record);
    }

    Ok(records)
}
