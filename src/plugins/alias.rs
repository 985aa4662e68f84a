/// Alias: short names for longer command lines
///
/// `alias name = command` remembers a shortcut, `@name` runs it by handing
/// the command back to the resolver. A misspelt name falls back to the best
/// fuzzy match among known aliases.

use crate::error::Result;
use crate::plugin::{Capabilities, Origin, Plugin, PluginInfo};
use crate::query::Query;
use crate::resolver::DELEGATION_MARKER;
use crate::tracker::{manager, ColumnType, Schema, SharedTracker, TrackerManager, Value};
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use regex::Regex;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

pub const ALIAS_TRACKER: &str = "alias";

const SIGIL: char = '@';
const DEFINE_PATTERN: &str = r"^alias\s+([\w-]+)\s*=\s*(.+)$";
const REMOVE_PATTERN: &str = r"^unalias\s+([\w-]+)$";

pub struct AliasPlugin {
    info: PluginInfo,
    trackers: Arc<TrackerManager>,
    define: Option<Regex>,
    remove: Option<Regex>,
    matcher: SkimMatcherV2,
}

impl AliasPlugin {
    pub fn new(trackers: Arc<TrackerManager>) -> Self {
        Self {
            info: PluginInfo::new("alias", "Alias")
                .description("Give a command line a short name")
                .help_line("@name runs the aliased command; extra words are appended")
                .example("alias dl = j ~/Downloads", "define @dl")
                .example("@dl", "run 'j ~/Downloads'")
                .example("aliases", "list every alias")
                .example("unalias dl", "forget @dl"),
            trackers,
            define: Regex::new(DEFINE_PATTERN).ok(),
            remove: Regex::new(REMOVE_PATTERN).ok(),
            matcher: SkimMatcherV2::default(),
        }
    }

    /// name, command, and how many times the alias was used
    pub fn schema() -> Result<Schema> {
        Schema::new(vec![
            ("name", ColumnType::Str),
            ("command", ColumnType::Str),
            ("uses", ColumnType::Int),
        ])
    }

    fn tracker(&self) -> anyhow::Result<SharedTracker> {
        Ok(self.trackers.tracker(ALIAS_TRACKER, Self::schema()?)?)
    }

    fn define(&self, name: &str, command: &str) -> anyhow::Result<String> {
        let command = command.trim();
        if command.starts_with(SIGIL) && command[1..].split_whitespace().next() == Some(name) {
            return Ok(format!("@{} can't run itself.", name));
        }

        let shared = self.tracker()?;
        let mut tracker = manager::lock(&shared);
        tracker.load_data()?;
        tracker.remove_empty_items();

        let existing = tracker
            .items()
            .iter()
            .position(|item| item.get_str("name") == Some(name));
        match existing {
            Some(index) => tracker.items_mut()[index].set("command", command)?,
            None => {
                let item = tracker.new_item(vec![
                    Value::from(name),
                    Value::from(command),
                    Value::Int(0),
                ])?;
                tracker.add_item(item)?;
            }
        }
        tracker.save_data()?;

        info!(alias = name, command, "alias saved");
        Ok(format!("@{} now runs '{}'.", name, command))
    }

    fn forget(&self, name: &str) -> anyhow::Result<String> {
        let shared = self.tracker()?;
        let mut tracker = manager::lock(&shared);
        tracker.load_data()?;

        let found = tracker
            .items()
            .iter()
            .find(|item| item.get_str("name") == Some(name))
            .cloned();
        let Some(item) = found else {
            return Ok(format!("No alias named '{}'.", name));
        };

        tracker.remove_item(&item);
        tracker.save_data()?;
        Ok(format!("@{} removed.", name))
    }

    /// Resolve `@name rest...` into the command line it stands for
    fn expand(&self, call: &str) -> anyhow::Result<String> {
        let mut parts = call.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let extra = parts.next().unwrap_or_default().trim();

        let shared = self.tracker()?;
        let mut tracker = manager::lock(&shared);
        tracker.load_data()?;
        tracker.remove_empty_items();

        let names: Vec<&str> = tracker
            .items()
            .iter()
            .map(|item| item.get_str("name").unwrap_or_default())
            .collect();
        let index = names
            .iter()
            .position(|candidate| *candidate == name)
            .or_else(|| self.closest(&names, name));
        let Some(index) = index else {
            return Ok(format!("No alias named '{}'.", name));
        };

        let item = &mut tracker.items_mut()[index];
        let uses = item.get("uses").and_then(Value::as_i64).unwrap_or(0) + 1;
        item.set("uses", Value::Int(uses))?;
        let command = item.get_str("command").unwrap_or_default().to_string();
        tracker.save_data()?;

        let line = if extra.is_empty() {
            command
        } else {
            format!("{} {}", command, extra)
        };
        Ok(format!("{}{}", DELEGATION_MARKER, line))
    }

    /// Index of the fuzzy best match for `name`; ties keep the first
    fn closest(&self, names: &[&str], name: &str) -> Option<usize> {
        let mut best: Option<(usize, i64)> = None;
        for (index, candidate) in names.iter().enumerate() {
            if let Some(score) = self.matcher.fuzzy_match(candidate, name) {
                if best.map_or(true, |(_, top)| score > top) {
                    best = Some((index, score));
                }
            }
        }
        best.map(|(index, _)| index)
    }

    fn list(&self) -> anyhow::Result<String> {
        let shared = self.tracker()?;
        let mut tracker = manager::lock(&shared);
        tracker.load_data()?;

        let mut text = String::new();
        for item in tracker.items().iter().filter(|item| !item.is_empty()) {
            let _ = writeln!(
                text,
                "@{:<12} {}",
                item.get_str("name").unwrap_or_default(),
                item.get_str("command").unwrap_or_default()
            );
        }
        if text.is_empty() {
            return Ok("No aliases yet. Try: alias name = command".to_string());
        }
        Ok(text.trim_end().to_string())
    }
}

impl Plugin for AliasPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::execute_only().with_invocation()
    }

    fn invocation(&self, query: &Query) -> anyhow::Result<bool> {
        let token = query.first_token();
        let call = query.content.starts_with(SIGIL) && query.content.len() > 1;
        Ok(call || matches!(token.as_str(), "alias" | "aliases" | "unalias"))
    }

    fn execute(&self, query: &Query, _origin: Origin) -> anyhow::Result<Option<String>> {
        let content = query.content.as_str();

        if let Some(call) = content.strip_prefix(SIGIL) {
            return self.expand(call).map(Some);
        }
        if content.eq_ignore_ascii_case("aliases") || content.eq_ignore_ascii_case("alias") {
            return self.list().map(Some);
        }
        if let Some(caps) = self.define.as_ref().and_then(|re| re.captures(content)) {
            return self.define(&caps[1], &caps[2]).map(Some);
        }
        if let Some(caps) = self.remove.as_ref().and_then(|re| re.captures(content)) {
            return self.forget(&caps[1]).map(Some);
        }

        Ok(Some("Usage: alias name = command".to_string()))
    }

    fn report(&self, trackers: &TrackerManager) -> Option<String> {
        let shared = trackers.tracker(ALIAS_TRACKER, Self::schema().ok()?).ok()?;
        let tracker = manager::lock(&shared);

        let mut used: Vec<(i64, &str)> = tracker
            .items()
            .iter()
            .filter_map(|item| {
                let uses = item.get("uses").and_then(Value::as_i64)?;
                let name = item.get_str("name").filter(|name| !name.is_empty())?;
                Some((uses, name))
            })
            .collect();
        if used.is_empty() {
            return None;
        }
        used.sort_by(|a, b| b.0.cmp(&a.0));

        let mut text = String::from("Aliases by use:");
        for (uses, name) in used {
            let _ = write!(text, "\n  {:>4}  @{}", uses, name);
        }
        Some(text)
    }
}
