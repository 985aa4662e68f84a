/// Plugin capability surface
///
/// Every command the assistant can run is a `Plugin`. The resolver only ever
/// talks to plugins through this trait, and only calls the optional members
/// a plugin declared in its `Capabilities` when it was registered.

pub mod registry;

pub use registry::{RegisteredPlugin, Registry, SharedRegistry};

use crate::query::Query;
use crate::tracker::TrackerManager;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// Who called a plugin's `execute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Selected by invocation or filename match at the top level
    TopLevel,
    /// Reached through the default `handle` after winning on confidence
    Handler,
    /// Called directly by another plugin
    Plugin,
}

/// Optional members a plugin implements, fixed at registration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub invocation: bool,
    pub confidence: bool,
    pub handler: bool,
}

impl Capabilities {
    /// Execute only, reachable by filename match
    pub fn execute_only() -> Self {
        Self::default()
    }

    pub fn with_invocation(mut self) -> Self {
        self.invocation = true;
        self
    }

    pub fn with_confidence(mut self) -> Self {
        self.confidence = true;
        self
    }

    pub fn with_handler(mut self) -> Self {
        self.handler = true;
        self
    }
}

/// Result of asking a plugin how confident it is about a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityCheck {
    Score(i64),
    Abstain,
    Error(String),
}

/// Descriptive metadata for a plugin
#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub title: String,
    pub version: String,
    pub description: String,
    /// Plugin id → exact version this plugin expects to be registered
    pub requirements: BTreeMap<String, String>,
    /// `(query, what it does)` pairs shown by `help`
    pub example_usage: Vec<(String, String)>,
    pub help: Vec<String>,
}

impl PluginInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            version: "1.0.0".to_string(),
            ..Self::default()
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn requires(mut self, id: impl Into<String>, version: impl Into<String>) -> Self {
        self.requirements.insert(id.into(), version.into());
        self
    }

    pub fn example(mut self, query: impl Into<String>, meaning: impl Into<String>) -> Self {
        self.example_usage.push((query.into(), meaning.into()));
        self
    }

    pub fn help_line(mut self, line: impl Into<String>) -> Self {
        self.help.push(line.into());
        self
    }

    /// Same metadata under a new id, for template clones
    pub fn renamed(&self, id: impl Into<String>) -> Self {
        let mut info = self.clone();
        info.id = id.into();
        info
    }
}

/// A command plugin
///
/// Plugins return `anyhow::Result` so implementations can use `?` on any
/// error type; the resolver turns failures into diagnostics.
pub trait Plugin: Send + Sync {
    fn info(&self) -> &PluginInfo;

    /// Which optional members below this plugin implements
    fn capabilities(&self) -> Capabilities {
        Capabilities::execute_only()
    }

    /// Unconditionally claim a query
    fn invocation(&self, _query: &Query) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Bid for a query nobody claimed; `None` abstains
    fn confidence(&self, _query: &Query) -> anyhow::Result<Option<i64>> {
        Ok(None)
    }

    /// Run after winning the confidence bid
    fn handle(&self, query: &Query, _score: i64) -> anyhow::Result<Option<String>> {
        self.execute(query, Origin::Handler)
    }

    /// Perform the command, optionally returning feedback
    ///
    /// Feedback starting with the delegation marker is run as a new query.
    fn execute(&self, query: &Query, origin: Origin) -> anyhow::Result<Option<String>>;

    fn help(&self) -> String {
        render_help(self.info())
    }

    /// Summary shown by the `report` meta-command
    fn report(&self, _trackers: &TrackerManager) -> Option<String> {
        None
    }

    /// New instance of this plugin under `new_id`, if it can act as a template
    fn instantiate(&self, _new_id: &str) -> Option<Arc<dyn Plugin>> {
        None
    }
}

/// Default help text: title, description, help lines, examples
pub fn render_help(info: &PluginInfo) -> String {
    let mut text = format!("{} ({})", info.title, info.id);
    if !info.description.is_empty() {
        let _ = write!(text, "\n  {}", info.description);
    }
    for line in &info.help {
        let _ = write!(text, "\n  {}", line);
    }
    if !info.example_usage.is_empty() {
        text.push_str("\n  Examples:");
        for (query, meaning) in &info.example_usage {
            let _ = write!(text, "\n    {:<24} {}", query, meaning);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shout {
        info: PluginInfo,
    }

    impl Plugin for Shout {
        fn info(&self) -> &PluginInfo {
            &self.info
        }

        fn execute(&self, query: &Query, origin: Origin) -> anyhow::Result<Option<String>> {
            Ok(Some(format!("{:?}:{}", origin, query.content.to_uppercase())))
        }
    }

    #[test]
    fn test_default_handle_calls_execute() {
        let plugin = Shout {
            info: PluginInfo::new("shout", "Shout"),
        };
        let feedback = plugin.handle(&Query::new("hi"), 5).unwrap();
        assert_eq!(feedback.as_deref(), Some("Handler:HI"));
        assert_eq!(plugin.capabilities(), Capabilities::execute_only());
    }

    #[test]
    fn test_render_help() {
        let info = PluginInfo::new("jump", "Jump")
            .description("Open a folder or site")
            .help_line("Learns from what you open")
            .example("j docs", "open ~/Documents");

        let help = render_help(&info);
        assert!(help.starts_with("Jump (jump)"));
        assert!(help.contains("Open a folder or site"));
        assert!(help.contains("j docs"));
    }

    #[test]
    fn test_renamed_keeps_metadata() {
        let info = PluginInfo::new("jump", "Jump").version("2.1.0").requires("context", "1.0.0");
        let clone = info.renamed("work");
        assert_eq!(clone.id, "work");
        assert_eq!(clone.version, "2.1.0");
        assert_eq!(clone.requirements.get("context").map(String::as_str), Some("1.0.0"));
    }
}
