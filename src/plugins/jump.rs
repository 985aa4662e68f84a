/// Jump: learn where a person goes and take them there from a shorthand
///
/// Every destination lives in a history tracker named after the plugin, so
/// a command made from this template keeps its own list. Nothing is opened;
/// the plugin reports the destination it picked.
///
/// Lookup is two-step: containment narrows the list to destinations that
/// hold every word typed, then a frequency-weighted best match picks one.

use crate::plugin::{Capabilities, Origin, Plugin, PluginInfo};
use crate::query::Query;
use crate::tracker::similarity::{saturate, text_difference};
use crate::tracker::{manager, CompareFn, TrackerItem, TrackerManager, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

const KEYWORDS: &[&str] = &["j", "jump", "goto"];

/// Bid for queries led by a jump keyword
const CONFIDENCE: i64 = 1000;

/// How much a destination's share of the top frequency lowers its delta
const FREQUENCY_WEIGHT: f64 = 0.5;

const REPORT_LIMIT: usize = 5;

pub struct JumpPlugin {
    info: PluginInfo,
    keywords: Vec<String>,
    trackers: Arc<TrackerManager>,
}

impl JumpPlugin {
    pub fn new(trackers: Arc<TrackerManager>) -> Self {
        Self {
            info: PluginInfo::new("jump", "Jump")
                .description("Go to a folder or site you have visited before")
                .help_line("Type any part of a destination; the most used match wins")
                .help_line("An unknown destination is remembered as typed")
                .example("j ~/Documents", "remember and go to ~/Documents")
                .example("j doc", "go to the best match for 'doc'"),
            keywords: KEYWORDS.iter().map(|k| k.to_string()).collect(),
            trackers,
        }
    }

    /// The destination text: everything after the keyword or plugin id
    fn shorthand<'q>(&self, query: &'q Query) -> &'q str {
        let token = query.first_token();
        if token == self.info.id || self.keywords.contains(&token) {
            query.rest()
        } else {
            &query.content
        }
    }

    /// Best known destination for `shorthand`, if any
    pub fn find(&self, shorthand: &str) -> anyhow::Result<Option<String>> {
        let shared = self.trackers.history_tracker(&self.info.id)?;
        let mut tracker = manager::lock(&shared);
        tracker.load_data()?;
        tracker.remove_empty_items();

        let words: Vec<&str> = shorthand.split_whitespace().collect();
        let candidates: Vec<TrackerItem> = tracker
            .get_items_containing("targets", &words)?
            .into_iter()
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let top = tracker
            .get_max_of_column("frequency")?
            .filter(|max| *max > 0.0)
            .unwrap_or(1.0);
        let wanted = shorthand.to_lowercase();
        let compare: &CompareFn = &move |_: &TrackerItem, candidate: &TrackerItem| {
            let destination = first_target(candidate).unwrap_or_default().to_lowercase();
            let frequency = candidate.get_f64("frequency").unwrap_or(0.0);
            saturate(text_difference(&wanted, &destination), 1.0) - FREQUENCY_WEIGHT * frequency / top
        };

        let wanted_item = tracker.new_item(vec![
            Value::Float(0.0),
            Value::Float(0.0),
            Value::Float(0.0),
            Value::from(vec![shorthand]),
        ])?;

        // Every candidate already holds the words; let the best one win outright.
        // Only the destination and its frequency matter, never when it was visited.
        let best = tracker.get_best_match(
            &wanted_item,
            &candidates,
            f64::MIN,
            Some(compare),
            &["start_time", "end_time"],
        )?;
        Ok(best.and_then(first_target).map(str::to_string))
    }
}

fn first_target(item: &TrackerItem) -> Option<&str> {
    item.get_seq("targets")?.first().map(String::as_str)
}

impl Plugin for JumpPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::execute_only().with_confidence()
    }

    fn confidence(&self, query: &Query) -> anyhow::Result<Option<i64>> {
        let claimed = self.keywords.contains(&query.first_token()) && !query.rest().is_empty();
        Ok(claimed.then_some(CONFIDENCE))
    }

    fn execute(&self, query: &Query, _origin: Origin) -> anyhow::Result<Option<String>> {
        let shorthand = self.shorthand(query);
        if shorthand.is_empty() {
            return Ok(Some(format!("Where to? Try '{} <place>'.", self.info.id)));
        }

        let destination = match self.find(shorthand)? {
            Some(known) => known,
            None => shorthand.to_string(),
        };
        let visits = self.trackers.run_frequency_tracker(&self.info.id, &destination)?;
        debug!(plugin = %self.info.id, destination = %destination, visits, "jumped");

        Ok(Some(format!("Jumping to {} (visit #{})", destination, visits as u64)))
    }

    fn report(&self, trackers: &TrackerManager) -> Option<String> {
        let shared = trackers.history_tracker(&self.info.id).ok()?;
        let tracker = manager::lock(&shared);

        let mut destinations: Vec<(f64, &str)> = tracker
            .items()
            .iter()
            .filter_map(|item| Some((item.get_f64("frequency")?, first_target(item)?)))
            .collect();
        if destinations.is_empty() {
            return None;
        }
        destinations.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut text = format!("Most visited ({}):", self.info.id);
        for (frequency, destination) in destinations.into_iter().take(REPORT_LIMIT) {
            let _ = write!(text, "\n  {:>4}  {}", frequency as u64, destination);
        }
        Some(text)
    }

    fn instantiate(&self, new_id: &str) -> Option<Arc<dyn Plugin>> {
        Some(Arc::new(Self {
            info: self.info.renamed(new_id),
            keywords: Vec::new(),
            trackers: Arc::clone(&self.trackers),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (JumpPlugin, Arc<TrackerManager>, TempDir) {
        let temp = TempDir::new().unwrap();
        let trackers = Arc::new(TrackerManager::new(temp.path()).unwrap());
        (JumpPlugin::new(Arc::clone(&trackers)), trackers, temp)
    }

    fn jump(plugin: &JumpPlugin, line: &str) -> String {
        plugin
            .execute(&Query::new(line), Origin::Handler)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_confidence_needs_keyword_and_destination() {
        let (plugin, _, _temp) = setup();

        assert_eq!(plugin.confidence(&Query::new("j docs")).unwrap(), Some(CONFIDENCE));
        assert_eq!(plugin.confidence(&Query::new("goto docs")).unwrap(), Some(CONFIDENCE));
        assert_eq!(plugin.confidence(&Query::new("j")).unwrap(), None);
        assert_eq!(plugin.confidence(&Query::new("jot docs")).unwrap(), None);
    }

    #[test]
    fn test_unknown_destination_is_learned() {
        let (plugin, _, _temp) = setup();

        assert_eq!(jump(&plugin, "j ~/Documents"), "Jumping to ~/Documents (visit #1)");
        assert_eq!(jump(&plugin, "j doc"), "Jumping to ~/Documents (visit #2)");
    }

    #[test]
    fn test_frequent_destination_wins() {
        let (plugin, _, _temp) = setup();

        jump(&plugin, "j ~/src/aria");
        jump(&plugin, "j ~/src/atlas");
        jump(&plugin, "j ~/src/atlas");
        jump(&plugin, "j ~/src/atlas");

        assert_eq!(plugin.find("src").unwrap().as_deref(), Some("~/src/atlas"));
        // Every word must be present
        assert_eq!(plugin.find("src aria").unwrap().as_deref(), Some("~/src/aria"));
        assert_eq!(plugin.find("music").unwrap(), None);
    }

    #[test]
    fn test_report_orders_by_visits() {
        let (plugin, trackers, _temp) = setup();
        assert_eq!(plugin.report(&trackers), None);

        jump(&plugin, "j /tmp");
        jump(&plugin, "j ~/notes");
        jump(&plugin, "j notes");

        let report = plugin.report(&trackers).unwrap();
        assert!(report.find("~/notes").unwrap() < report.find("/tmp").unwrap());
    }

    #[test]
    fn test_instance_keeps_its_own_destinations() {
        let (plugin, trackers, _temp) = setup();
        let work = plugin.instantiate("work").unwrap();

        assert_eq!(work.info().id, "work");
        assert_eq!(work.confidence(&Query::new("j office")).unwrap(), None);

        let feedback = work.execute(&Query::new("work ~/office"), Origin::TopLevel).unwrap();
        assert_eq!(feedback.as_deref(), Some("Jumping to ~/office (visit #1)"));

        assert!(trackers.file_path("work").exists());
        assert_eq!(plugin.find("office").unwrap(), None);
    }
}
