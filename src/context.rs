/// Ambient context sampling
///
/// A snapshot of where and when the assistant is being used. The refresh task
/// samples one on a fixed interval into shared state read by plugins, and
/// records context changes in the `context` history tracker.

use crate::error::Result;
use crate::tracker::{Schema, Tracker, Value};
use chrono::{DateTime, Datelike, Local, Timelike, Weekday};
use std::env;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Name of the tracker context changes are recorded in
pub const CONTEXT_TRACKER: &str = "context";

/// Latest snapshot, `None` until the first refresh
pub type SharedContext = Arc<RwLock<Option<ContextSnapshot>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOfDay {
    Morning,   // 6am - 12pm
    Afternoon, // 12pm - 6pm
    Evening,   // 6pm - 10pm
    Night,     // 10pm - 6am
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeOfDay::Morning,
            12..=17 => TimeOfDay::Afternoon,
            18..=21 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeOfDay::Morning => write!(f, "morning"),
            TimeOfDay::Afternoon => write!(f, "afternoon"),
            TimeOfDay::Evening => write!(f, "evening"),
            TimeOfDay::Night => write!(f, "night"),
        }
    }
}

/// Project type detected from marker files in the working directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Node,   // package.json
    Rust,   // Cargo.toml
    Python, // requirements.txt, setup.py
    Go,     // go.mod
    Java,   // pom.xml
    Ruby,   // Gemfile
}

impl ProjectType {
    pub fn detect(dir: &Path) -> Option<Self> {
        if dir.join("package.json").exists() {
            Some(ProjectType::Node)
        } else if dir.join("Cargo.toml").exists() {
            Some(ProjectType::Rust)
        } else if dir.join("requirements.txt").exists() || dir.join("setup.py").exists() {
            Some(ProjectType::Python)
        } else if dir.join("go.mod").exists() {
            Some(ProjectType::Go)
        } else if dir.join("pom.xml").exists() {
            Some(ProjectType::Java)
        } else if dir.join("Gemfile").exists() {
            Some(ProjectType::Ruby)
        } else {
            None
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProjectType::Node => "node",
            ProjectType::Rust => "rust",
            ProjectType::Python => "python",
            ProjectType::Go => "go",
            ProjectType::Java => "java",
            ProjectType::Ruby => "ruby",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextSnapshot {
    pub working_directory: String,
    pub time_of_day: TimeOfDay,
    pub day_of_week: Weekday,
    pub project_type: Option<ProjectType>,
    pub taken_at: DateTime<Local>,
}

impl ContextSnapshot {
    /// Sample the current process context
    pub fn capture() -> Result<Self> {
        let dir = env::current_dir()?;
        Ok(Self::capture_at(&dir, Local::now()))
    }

    pub fn capture_at(dir: &Path, now: DateTime<Local>) -> Self {
        Self {
            working_directory: dir.display().to_string(),
            time_of_day: TimeOfDay::from_hour(now.hour()),
            day_of_week: now.weekday(),
            project_type: ProjectType::detect(dir),
            taken_at: now,
        }
    }

    /// What identifies this context in the history tracker
    ///
    /// Time fields are left out; they live in the item's time columns.
    pub fn targets(&self) -> Vec<String> {
        let mut targets = vec![self.working_directory.clone()];
        if let Some(project) = self.project_type {
            targets.push(project.to_string());
        }
        targets
    }
}

impl fmt::Display for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} {})",
            self.working_directory, self.day_of_week, self.time_of_day
        )?;
        if let Some(project) = self.project_type {
            write!(f, ", {} project", project)?;
        }
        Ok(())
    }
}

pub fn shared_context() -> SharedContext {
    Arc::new(RwLock::new(None))
}

/// Latest snapshot, if any
pub fn current(context: &SharedContext) -> Option<ContextSnapshot> {
    context
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub fn publish(context: &SharedContext, snapshot: ContextSnapshot) {
    *context.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
}

/// Folds successive snapshots into the context history tracker
///
/// A new context closes the previous item and opens another, saving at once.
/// An unchanged context bumps the open item's frequency and end time, saving
/// at most once per checkpoint interval.
#[derive(Debug)]
pub struct ContextRecorder {
    checkpoint_secs: f64,
    last_checkpoint: Option<f64>,
}

impl ContextRecorder {
    pub fn new(checkpoint_secs: f64) -> Self {
        Self {
            checkpoint_secs,
            last_checkpoint: None,
        }
    }

    pub fn schema() -> Schema {
        Schema::history()
    }

    /// Record a snapshot taken at `now_secs` (seconds since midnight)
    ///
    /// Returns true when the tracker was saved.
    pub fn record(
        &mut self,
        tracker: &mut Tracker,
        snapshot: &ContextSnapshot,
        now_secs: f64,
    ) -> Result<bool> {
        let targets = snapshot.targets();
        tracker.remove_empty_items();

        let changed = match tracker.last() {
            Some(last) => last.get_seq("targets") != Some(targets.as_slice()),
            None => true,
        };

        if changed {
            if let Some(last) = tracker.items_mut().last_mut() {
                last.set("end_time", now_secs)?;
            }
            let item = tracker.new_item(vec![
                Value::Float(now_secs),
                Value::Float(now_secs),
                Value::Float(1.0),
                Value::Seq(targets),
            ])?;
            tracker.add_item(item)?;
            debug!(context = %snapshot, "context changed");
        } else {
            let due = self
                .last_checkpoint
                .map_or(true, |at| (now_secs - at).abs() >= self.checkpoint_secs);
            if !due {
                return Ok(false);
            }
            if let Some(last) = tracker.items_mut().last_mut() {
                let frequency = last.get_f64("frequency").unwrap_or(0.0) + 1.0;
                last.set("frequency", frequency)?;
                last.set("end_time", now_secs)?;
            }
        }

        tracker.save_data()?;
        self.last_checkpoint = Some(now_secs);
        Ok(true)
    }
}
