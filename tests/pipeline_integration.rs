//! End-to-end resolution with the built-in plugins

use aria_lib::context::shared_context;
use aria_lib::dispatch::{mailbox, Inbox, Timers};
use aria_lib::plugin::{Capabilities, Origin, Plugin, PluginInfo, Registry};
use aria_lib::plugins::{self, PluginEnv};
use aria_lib::resolver::{MetaCommand, Resolution, ResolutionOutcome, Resolver};
use aria_lib::{AriaConfig, ConfigStore, Query, TrackerManager};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Handle;

struct Assistant {
    resolver: Resolver,
    inbox: Inbox,
    _temp: TempDir,
}

fn assistant(config: AriaConfig) -> Assistant {
    let temp = TempDir::new().unwrap();
    let trackers = Arc::new(TrackerManager::new(temp.path().join("data")).unwrap());
    let (outbox, inbox) = mailbox();
    let env = PluginEnv {
        trackers: Arc::clone(&trackers),
        context: shared_context(),
        timers: Timers::new(Handle::current(), outbox),
    };

    let registry = plugins::registry(&env, &config).unwrap();
    let store = Arc::new(ConfigStore::with_config(temp.path().join("config.toml"), config));
    let resolver = Resolver::new(registry.into_shared(), trackers).with_config(store);

    Assistant {
        resolver,
        inbox,
        _temp: temp,
    }
}

fn messages(resolutions: &[Resolution]) -> Vec<String> {
    resolutions
        .iter()
        .filter_map(|r| r.message().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_jump_wins_on_confidence() {
    let aria = assistant(AriaConfig::default());

    let first = aria.resolver.run_line("j ~/Documents/taxes").unwrap();
    assert_eq!(first[0].outcome, ResolutionOutcome::HandlerMatch("jump".to_string(), 1000));

    let again = aria.resolver.run_line("goto taxes").unwrap();
    assert_eq!(messages(&again), vec!["Jumping to ~/Documents/taxes (visit #2)"]);
}

#[tokio::test]
async fn test_chain_runs_left_to_right_with_delegation() {
    let aria = assistant(AriaConfig::default());

    let resolutions = aria
        .resolver
        .run_line("alias hi = echo hello there && @hi && echo done")
        .unwrap();

    assert_eq!(
        messages(&resolutions),
        vec!["@hi now runs 'echo hello there'.", "hello there", "done"]
    );
    assert_eq!(resolutions[1].delegation(), Some("echo hello there"));
}

#[tokio::test]
async fn test_meta_command_beats_greedy_plugin() {
    struct Greedy(PluginInfo);

    impl Plugin for Greedy {
        fn info(&self) -> &PluginInfo {
            &self.0
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::execute_only().with_invocation()
        }
        fn invocation(&self, _query: &Query) -> anyhow::Result<bool> {
            Ok(true)
        }
        fn execute(&self, _query: &Query, _origin: Origin) -> anyhow::Result<Option<String>> {
            Ok(Some("mine".to_string()))
        }
    }

    let temp = TempDir::new().unwrap();
    let mut registry = Registry::new();
    registry
        .register(Arc::new(Greedy(PluginInfo::new("greedy", "Greedy"))))
        .unwrap();
    let trackers = Arc::new(TrackerManager::new(temp.path()).unwrap());
    let resolver = Resolver::new(registry.into_shared(), trackers);

    let resolution = resolver.resolve(&Query::new("enable plugin foo")).unwrap();
    assert_eq!(
        resolution.outcome,
        ResolutionOutcome::MetaCommand(MetaCommand::EnablePlugin("foo".to_string()))
    );
    assert_eq!(resolution.message(), Some("No plugin named 'foo'"));
}

#[tokio::test]
async fn test_unknown_command_then_loop_continues() {
    let aria = assistant(AriaConfig::default());

    let missing = aria.resolver.run_line("zzzznotacommand").unwrap();
    assert_eq!(missing[0].outcome, ResolutionOutcome::NotFound);
    assert_eq!(messages(&missing), vec!["Command not found."]);

    let next = aria.resolver.run_line("echo still here").unwrap();
    assert_eq!(messages(&next), vec!["still here"]);
}

#[tokio::test]
async fn test_disable_and_enable_from_the_prompt() {
    let aria = assistant(AriaConfig::default());

    aria.resolver.run_line("disable plugin echo").unwrap();
    let disabled = aria.resolver.run_line("echo hi").unwrap();
    assert_eq!(disabled[0].outcome, ResolutionOutcome::Disabled("echo".to_string()));
    assert_eq!(
        messages(&disabled),
        vec!["'echo' is disabled. Run 'enable plugin echo' to use it."]
    );

    aria.resolver.run_line("enable plugin echo").unwrap();
    assert_eq!(messages(&aria.resolver.run_line("echo hi").unwrap()), vec!["hi"]);
}

#[tokio::test]
async fn test_config_flags_disable_builtins() {
    let mut config = AriaConfig::default();
    config.plugins.insert("jump".to_string(), false);
    let aria = assistant(config);

    let resolution = aria.resolver.run_line("jump home").unwrap();
    assert_eq!(resolution[0].outcome, ResolutionOutcome::Disabled("jump".to_string()));
}

#[tokio::test]
async fn test_command_made_from_template() {
    let aria = assistant(AriaConfig::default());

    let made = aria.resolver.run_line("make command work from jump").unwrap();
    assert_eq!(messages(&made), vec!["Command work created."]);

    let resolutions = aria.resolver.run_line("work ~/office").unwrap();
    assert_eq!(resolutions[0].outcome, ResolutionOutcome::FilenameMatch("work".to_string()));
    assert_eq!(messages(&resolutions), vec!["Jumping to ~/office (visit #1)"]);

    let report = aria.resolver.run_line("report work").unwrap();
    assert!(messages(&report)[0].contains("~/office"));
}

#[tokio::test]
async fn test_delayed_command_reaches_the_queue() {
    let mut aria = assistant(AriaConfig::default());

    let scheduled = aria.resolver.run_line("in 1s echo later").unwrap();
    assert_eq!(scheduled[0].outcome, ResolutionOutcome::InvocationMatch("timer".to_string()));

    let query = aria.inbox.scheduled.recv().await.unwrap();
    assert_eq!(query.content, "echo later");
    assert_eq!(messages(&aria.resolver.run_query(query).unwrap()), vec!["later"]);
}
