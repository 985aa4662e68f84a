/// Shows the ambient context the refresh task last sampled, and reports
/// where the assistant has been used most.

use crate::context::{self, SharedContext, CONTEXT_TRACKER};
use crate::plugin::{Capabilities, Origin, Plugin, PluginInfo};
use crate::query::Query;
use crate::tracker::{manager, TrackerManager};
use std::fmt::Write as _;

const REPORT_LIMIT: usize = 5;

pub struct ContextPlugin {
    info: PluginInfo,
    shared: SharedContext,
}

impl ContextPlugin {
    pub fn new(shared: SharedContext) -> Self {
        Self {
            info: PluginInfo::new("context", "Context")
                .description("Show the current working context")
                .help_line("Sampled in the background every few seconds")
                .example("context", "directory, time of day and project type"),
            shared,
        }
    }
}

impl Plugin for ContextPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::execute_only().with_invocation()
    }

    fn invocation(&self, query: &Query) -> anyhow::Result<bool> {
        Ok(query.content.eq_ignore_ascii_case("context"))
    }

    fn execute(&self, _query: &Query, _origin: Origin) -> anyhow::Result<Option<String>> {
        let text = match context::current(&self.shared) {
            Some(snapshot) => format!("You are in {}", snapshot),
            None => "No context sampled yet.".to_string(),
        };
        Ok(Some(text))
    }

    fn report(&self, trackers: &TrackerManager) -> Option<String> {
        let shared = trackers.history_tracker(CONTEXT_TRACKER).ok()?;
        let tracker = manager::lock(&shared);

        let mut places: Vec<(f64, &str)> = tracker
            .items()
            .iter()
            .filter(|item| !item.is_empty())
            .filter_map(|item| {
                let place = item.get_seq("targets")?.first()?;
                Some((item.get_f64("frequency").unwrap_or(0.0), place.as_str()))
            })
            .collect();
        if places.is_empty() {
            return None;
        }
        places.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut text = String::from("Most used places:");
        for (frequency, place) in places.into_iter().take(REPORT_LIMIT) {
            let _ = write!(text, "\n  {:>4}  {}", frequency as u64, place);
        }
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextSnapshot;
    use chrono::Local;
    use tempfile::TempDir;

    #[test]
    fn test_execute_before_and_after_first_sample() {
        let temp = TempDir::new().unwrap();
        let shared = context::shared_context();
        let plugin = ContextPlugin::new(shared.clone());
        let query = Query::new("context");

        assert!(plugin.invocation(&query).unwrap());
        assert_eq!(
            plugin.execute(&query, Origin::TopLevel).unwrap().as_deref(),
            Some("No context sampled yet.")
        );

        context::publish(&shared, ContextSnapshot::capture_at(temp.path(), Local::now()));
        let text = plugin.execute(&query, Origin::TopLevel).unwrap().unwrap();
        assert!(text.contains(&temp.path().display().to_string()));
    }

    #[test]
    fn test_report_lists_frequent_places() {
        let temp = TempDir::new().unwrap();
        let trackers = TrackerManager::new(temp.path()).unwrap();
        let plugin = ContextPlugin::new(context::shared_context());

        assert_eq!(plugin.report(&trackers), None);

        trackers.run_frequency_tracker(CONTEXT_TRACKER, "/home/sam/src").unwrap();
        trackers.run_frequency_tracker(CONTEXT_TRACKER, "/home/sam/src").unwrap();
        trackers.run_frequency_tracker(CONTEXT_TRACKER, "/tmp").unwrap();

        let report = plugin.report(&trackers).unwrap();
        let src = report.find("/home/sam/src").unwrap();
        let tmp = report.find("/tmp").unwrap();
        assert!(src < tmp);
    }
}
