/// Query resolution pipeline
///
/// Decides which plugin handles a query, runs it, and follows delegation and
/// multi-command chains. Stages, first success wins:
///
/// 1. meta-commands answered by the resolver itself
/// 2. invocation: first enabled plugin (registration order) that claims it
/// 3. confidence: highest positive bid, earliest plugin wins ties
/// 4. filename: leading token is an enabled plugin's id or unique id prefix
/// 5. the leading token names a disabled plugin, otherwise not found

pub mod meta;

pub use meta::{MetaCommand, MetaParser};

use crate::config::ConfigStore;
use crate::error::{AriaError, Result};
use crate::plugin::registry::{self, SharedRegistry};
use crate::plugin::{CapabilityCheck, Origin, Plugin, RegisteredPlugin, Registry};
use crate::query::{Provenance, Query};
use crate::tracker::TrackerManager;
use std::any::Any;
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Feedback starting with this is run as a new query
pub const DELEGATION_MARKER: &str = "run ";

/// Separates independently resolved commands on one line
pub const CHAIN_SEPARATOR: &str = " && ";

/// Delegations followed from a single query before giving up
pub const MAX_DELEGATION_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    MetaCommand(MetaCommand),
    InvocationMatch(String),
    HandlerMatch(String, i64),
    FilenameMatch(String),
    Disabled(String),
    NotFound,
}

impl ResolutionOutcome {
    /// Id of the plugin that was selected, if any
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            ResolutionOutcome::InvocationMatch(id)
            | ResolutionOutcome::HandlerMatch(id, _)
            | ResolutionOutcome::FilenameMatch(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticStage {
    Invocation,
    Confidence,
    Execution,
}

/// A plugin failure that was absorbed instead of aborting resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub plugin: String,
    pub stage: DiagnosticStage,
    pub detail: String,
}

/// The outcome of stages 1–5, before anything has run
pub struct Arbitration {
    pub outcome: ResolutionOutcome,
    pub plugin: Option<Arc<dyn Plugin>>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Everything that happened for one query
#[derive(Debug, Clone)]
pub struct Resolution {
    pub query: Query,
    pub outcome: ResolutionOutcome,
    pub feedback: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Resolution {
    pub fn is_quit(&self) -> bool {
        self.outcome == ResolutionOutcome::MetaCommand(MetaCommand::Quit)
    }

    /// The query a plugin handed off to, if its feedback delegates
    pub fn delegation(&self) -> Option<&str> {
        self.feedback
            .as_deref()
            .and_then(|feedback| feedback.strip_prefix(DELEGATION_MARKER))
            .map(str::trim)
    }

    /// Feedback meant for the person at the prompt
    pub fn message(&self) -> Option<&str> {
        match self.delegation() {
            Some(_) => None,
            None => self.feedback.as_deref(),
        }
    }
}

/// Run stages 1–5 for `query` without executing anything
pub fn arbitrate(query: &Query, registry: &Registry) -> Arbitration {
    let mut diagnostics = Vec::new();

    if let Some(command) = meta::parser().parse(&query.content) {
        return Arbitration {
            outcome: ResolutionOutcome::MetaCommand(command),
            plugin: None,
            diagnostics,
        };
    }

    // Invocation: first match wins
    for entry in registry.enabled().filter(|e| e.capabilities.invocation) {
        match check_invocation(entry, query) {
            Ok(true) => {
                return Arbitration {
                    outcome: ResolutionOutcome::InvocationMatch(entry.id().to_string()),
                    plugin: Some(Arc::clone(&entry.plugin)),
                    diagnostics,
                };
            }
            Ok(false) => {}
            Err(detail) => diagnostics.push(capability_failure(
                entry,
                query,
                DiagnosticStage::Invocation,
                detail,
            )),
        }
    }

    // Confidence: strict > keeps the earliest plugin on a tie, and 0 never wins
    let mut best: Option<(&RegisteredPlugin, i64)> = None;
    for entry in registry.enabled().filter(|e| e.capabilities.confidence) {
        match check_confidence(entry, query) {
            CapabilityCheck::Score(score) => {
                let best_score = best.map_or(0, |(_, s)| s);
                if score > best_score {
                    best = Some((entry, score));
                }
            }
            CapabilityCheck::Abstain => {}
            CapabilityCheck::Error(detail) => diagnostics.push(capability_failure(
                entry,
                query,
                DiagnosticStage::Confidence,
                detail,
            )),
        }
    }
    if let Some((entry, score)) = best {
        return Arbitration {
            outcome: ResolutionOutcome::HandlerMatch(entry.id().to_string(), score),
            plugin: Some(Arc::clone(&entry.plugin)),
            diagnostics,
        };
    }

    let token = query.first_token();

    if let Some(entry) = registry.lookup_enabled(&token) {
        return Arbitration {
            outcome: ResolutionOutcome::FilenameMatch(entry.id().to_string()),
            plugin: Some(Arc::clone(&entry.plugin)),
            diagnostics,
        };
    }

    let outcome = match registry.lookup(&token) {
        Some(entry) if !entry.enabled => ResolutionOutcome::Disabled(entry.id().to_string()),
        _ => ResolutionOutcome::NotFound,
    };

    Arbitration {
        outcome,
        plugin: None,
        diagnostics,
    }
}

fn check_invocation(entry: &RegisteredPlugin, query: &Query) -> std::result::Result<bool, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| entry.plugin.invocation(query))) {
        Ok(Ok(claimed)) => Ok(claimed),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(payload) => Err(panic_detail(payload)),
    }
}

fn check_confidence(entry: &RegisteredPlugin, query: &Query) -> CapabilityCheck {
    match panic::catch_unwind(AssertUnwindSafe(|| entry.plugin.confidence(query))) {
        Ok(Ok(Some(score))) => CapabilityCheck::Score(score),
        Ok(Ok(None)) => CapabilityCheck::Abstain,
        Ok(Err(e)) => CapabilityCheck::Error(format!("{:#}", e)),
        Err(payload) => CapabilityCheck::Error(panic_detail(payload)),
    }
}

fn capability_failure(
    entry: &RegisteredPlugin,
    query: &Query,
    stage: DiagnosticStage,
    detail: String,
) -> Diagnostic {
    let failure = AriaError::CapabilityCheck {
        plugin: entry.id().to_string(),
        query: query.content.clone(),
        detail: detail.clone(),
    };
    warn!("{}", failure);

    Diagnostic {
        plugin: entry.id().to_string(),
        stage,
        detail,
    }
}

fn panic_detail(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

/// How the selected plugin gets called
#[derive(Debug, Clone, Copy)]
enum Call {
    Execute,
    Handle(i64),
}

/// Runs queries against a shared registry
pub struct Resolver {
    registry: SharedRegistry,
    trackers: Arc<TrackerManager>,
    config: Option<Arc<ConfigStore>>,
    debug: bool,
}

impl Resolver {
    pub fn new(registry: SharedRegistry, trackers: Arc<TrackerManager>) -> Self {
        Self {
            registry,
            trackers,
            config: None,
            debug: false,
        }
    }

    /// Persist enable/disable meta-commands to this config
    pub fn with_config(mut self, config: Arc<ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    /// In debug mode plugin failures are returned instead of suppressed
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn trackers(&self) -> &Arc<TrackerManager> {
        &self.trackers
    }

    /// Resolve and run a single query, without following delegation
    ///
    /// Only returns an error in debug mode, when the selected plugin fails.
    pub fn resolve(&self, query: &Query) -> Result<Resolution> {
        // Hold the read lock only while arbitrating; plugins run without it
        let arbitration = {
            let registry = registry::read(&self.registry);
            arbitrate(query, &registry)
        };

        let Arbitration {
            outcome,
            plugin,
            mut diagnostics,
        } = arbitration;

        debug!(query = %query, outcome = ?outcome, "resolved");

        let feedback = match (&outcome, plugin) {
            (ResolutionOutcome::MetaCommand(command), _) => self.run_meta(command),
            (ResolutionOutcome::HandlerMatch(_, score), Some(plugin)) => {
                self.call(plugin, query, Call::Handle(*score), &mut diagnostics)?
            }
            (_, Some(plugin)) => self.call(plugin, query, Call::Execute, &mut diagnostics)?,
            (ResolutionOutcome::Disabled(id), None) => {
                Some(AriaError::PluginDisabled(id.clone()).user_message())
            }
            (_, None) => Some(AriaError::ResolutionNotFound(query.content.clone()).user_message()),
        };

        Ok(Resolution {
            query: query.clone(),
            outcome,
            feedback,
            diagnostics,
        })
    }

    /// Run a line typed by the user
    pub fn run_line(&self, line: &str) -> Result<Vec<Resolution>> {
        self.run_query(Query::new(line))
    }

    /// Run a query, splitting chained commands and following delegation
    ///
    /// Segments run strictly in order. Resolutions are returned in the order
    /// they happened; a quit stops everything after it.
    pub fn run_query(&self, query: Query) -> Result<Vec<Resolution>> {
        let mut resolutions = Vec::new();
        self.run_chain(query, 0, &mut resolutions)?;
        Ok(resolutions)
    }

    fn run_chain(&self, query: Query, depth: usize, out: &mut Vec<Resolution>) -> Result<bool> {
        let mut remaining = query.content.clone();
        let mut provenance = query.provenance;

        loop {
            let (current, rest) = match remaining.split_once(CHAIN_SEPARATOR) {
                Some((current, rest)) => (current.to_string(), Some(rest.to_string())),
                None => (remaining.clone(), None),
            };

            let segment = Query {
                content: current.trim().to_string(),
                provenance,
                ..query.clone()
            };

            if !segment.is_empty() && !self.run_segment(segment, depth, out)? {
                return Ok(false);
            }

            match rest {
                Some(rest) => {
                    remaining = rest;
                    provenance = Provenance::Chained;
                }
                None => return Ok(true),
            }
        }
    }

    /// Returns false once a quit was seen
    fn run_segment(&self, query: Query, depth: usize, out: &mut Vec<Resolution>) -> Result<bool> {
        let resolution = self.resolve(&query)?;
        let quit = resolution.is_quit();
        let next = resolution.delegation().map(str::to_string);
        out.push(resolution);

        if quit {
            return Ok(false);
        }

        let Some(next) = next else {
            return Ok(true);
        };

        if next == query.content {
            warn!(query = %query, "plugin delegated to the same query, not following");
            return Ok(true);
        }
        if depth >= MAX_DELEGATION_DEPTH {
            warn!(query = %query, depth, "delegation too deep, not following");
            return Ok(true);
        }

        let delegated = Query::with_provenance(next, Provenance::Delegated);
        self.run_chain(delegated, depth + 1, out)
    }

    fn call(
        &self,
        plugin: Arc<dyn Plugin>,
        query: &Query,
        how: Call,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<String>> {
        let id = plugin.info().id.clone();
        let handler = plugin.capabilities().handler;

        let invoke = || match how {
            Call::Handle(score) if handler => plugin.handle(query, score),
            Call::Handle(_) => plugin.execute(query, Origin::Handler),
            Call::Execute => plugin.execute(query, Origin::TopLevel),
        };

        if self.debug {
            // Let panics unwind and errors surface so bugs are obvious
            return invoke().map_err(|e| AriaError::PluginExecution {
                plugin: id,
                query: query.content.clone(),
                detail: format!("{:#}", e),
            });
        }

        let detail = match panic::catch_unwind(AssertUnwindSafe(invoke)) {
            Ok(Ok(feedback)) => return Ok(feedback),
            Ok(Err(e)) => format!("{:#}", e),
            Err(payload) => panic_detail(payload),
        };

        let failure = AriaError::PluginExecution {
            plugin: id.clone(),
            query: query.content.clone(),
            detail: detail.clone(),
        };
        error!("{}", failure);
        diagnostics.push(Diagnostic {
            plugin: id,
            stage: DiagnosticStage::Execution,
            detail,
        });

        Ok(None)
    }

    fn run_meta(&self, command: &MetaCommand) -> Option<String> {
        match command {
            MetaCommand::Quit => None,
            MetaCommand::EnablePlugin(id) => Some(self.set_enabled(id, true)),
            MetaCommand::DisablePlugin(id) => Some(self.set_enabled(id, false)),
            MetaCommand::MakeCommand { new_id, template } => {
                let result = registry::write(&self.registry).clone_from_template(new_id, template);
                Some(match result {
                    Ok(()) => format!("Command {} created.", new_id),
                    Err(e) => e.user_message(),
                })
            }
            MetaCommand::Report(target) => Some(self.report(target)),
            MetaCommand::Help(target) => Some(self.help(target.as_deref())),
            MetaCommand::ListPlugins => Some(self.list_plugins()),
        }
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> String {
        let result = {
            let mut registry = registry::write(&self.registry);
            if enabled {
                registry.enable(id)
            } else {
                registry.disable(id)
            }
        };

        let state = if enabled { "enabled" } else { "disabled" };
        match result {
            Ok(true) => {
                if let Some(config) = &self.config {
                    if let Err(e) = config.set_plugin_enabled(id, enabled) {
                        warn!(plugin = id, "could not save plugin state: {}", e);
                    }
                }
                info!(plugin = id, state, "plugin toggled from the prompt");
                format!("Plugin {} {}.", id, state)
            }
            Ok(false) => format!("Plugin {} is already {}.", id, state),
            Err(e) => e.user_message(),
        }
    }

    fn find_plugin(&self, target: &str) -> std::result::Result<Arc<dyn Plugin>, String> {
        let registry = registry::read(&self.registry);
        if let Some(entry) = registry.lookup(target) {
            return Ok(Arc::clone(&entry.plugin));
        }

        let candidates = registry.candidate_ids(target);
        if candidates.is_empty() {
            Err(AriaError::UnknownPlugin(target.to_string()).user_message())
        } else {
            Err(format!("'{}' could be: {}", target, candidates.join(", ")))
        }
    }

    fn report(&self, target: &str) -> String {
        let plugin = match self.find_plugin(target) {
            Ok(plugin) => plugin,
            Err(message) => return message,
        };

        plugin
            .report(&self.trackers)
            .unwrap_or_else(|| format!("{} has nothing to report.", plugin.info().id))
    }

    fn help(&self, target: Option<&str>) -> String {
        match target {
            Some(target) => match self.find_plugin(target) {
                Ok(plugin) => plugin.help(),
                Err(message) => message,
            },
            None => {
                let mut text = String::from("Plugins:");
                for entry in registry::read(&self.registry).enabled() {
                    let _ = write!(text, "\n  {:<12} {}", entry.id(), entry.plugin.info().title);
                }
                text.push_str(
                    "\nAlso: help <plugin>, report <plugin>, enable plugin <id>, \
                     disable plugin <id>, make command <new> from <old>, plugins, quit",
                );
                text
            }
        }
    }

    fn list_plugins(&self) -> String {
        let registry = registry::read(&self.registry);
        let mut text = String::new();
        for entry in registry.iter() {
            let info = entry.plugin.info();
            let state = if entry.enabled { "enabled" } else { "disabled" };
            let _ = writeln!(text, "{:<12} {:<8} {:<9} {}", info.id, info.version, state, info.title);
        }
        text.trim_end().to_string()
    }
}
