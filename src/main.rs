// aria - type what you want done, a plugin figures out how
//
// This is the main entry point. Parses CLI args, wires the assistant
// together and hands off to the dispatch loop or a one-shot command.

use aria_lib::{
    config::{self, ConfigStore},
    context::{self, ContextSnapshot},
    dispatch::{self, Dispatcher, Inbox, Timers},
    plugin::{registry, Capabilities, PluginInfo, SharedRegistry},
    plugins::{self, PluginEnv},
    Resolver, Result, TrackerManager,
};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const PROMPT: &str = "aria> ";

struct Options {
    debug: bool,
    config_path: PathBuf,
    command: Vec<String>,
}

/// Everything a running assistant is made of
struct Session {
    config: Arc<ConfigStore>,
    env: PluginEnv,
    registry: SharedRegistry,
    resolver: Arc<Resolver>,
    inbox: Inbox,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Grab whatever the user typed
    let args: Vec<String> = env::args().skip(1).collect();

    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            print_usage();
            return Ok(());
        }
    };

    match options.command.first().map(String::as_str) {
        None => handle_interactive(&options).await,
        Some("run") => handle_run(&options, &options.command[1..]).await,
        Some("plugins") => handle_plugins(&options, &options.command[1..]).await,
        Some("version" | "-v" | "--version") => {
            println!("aria v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some("help" | "-h" | "--help") => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            Ok(())
        }
    }
}

fn parse_args(args: &[String]) -> std::result::Result<Options, String> {
    let mut options = Options {
        debug: false,
        config_path: config::default_config_path(),
        command: Vec::new(),
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--debug" => options.debug = true,
            "--config" => {
                i += 1;
                match args.get(i) {
                    Some(path) => options.config_path = PathBuf::from(path),
                    None => return Err("--config needs a path".to_string()),
                }
            }
            arg => options.command.push(arg.to_string()),
        }
        i += 1;
    }

    Ok(options)
}

fn init_logging(debug: bool) {
    let default = if debug {
        "aria=debug,aria_lib=debug"
    } else {
        "aria=info,aria_lib=info"
    };

    // Logs go to stderr so they never mix with command feedback
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

/// Load config, start logging, and build the plugin registry and resolver
fn start_session(options: &Options) -> Result<Session> {
    let config = Arc::new(ConfigStore::load(&options.config_path)?);
    let settings = config.snapshot();
    let debug = options.debug || settings.debug;
    init_logging(debug);

    let trackers = Arc::new(TrackerManager::new(&settings.data_dir)?);
    let (outbox, inbox) = dispatch::mailbox();
    let env = PluginEnv {
        trackers: Arc::clone(&trackers),
        context: context::shared_context(),
        timers: Timers::new(Handle::current(), outbox),
    };

    let registry = plugins::registry(&env, &settings)?;
    // Mismatches are logged by the check; they never stop startup
    registry.check_requirements();
    let registry = registry.into_shared();

    let resolver = Resolver::new(Arc::clone(&registry), trackers)
        .with_config(Arc::clone(&config))
        .with_debug(debug);

    debug!(config = %options.config_path.display(), data = %settings.data_dir.display(), "session ready");

    Ok(Session {
        config,
        env,
        registry,
        resolver: Arc::new(resolver),
        inbox,
    })
}

async fn handle_interactive(options: &Options) -> Result<()> {
    let session = start_session(options)?;
    let settings = session.config.snapshot();

    let mut dispatcher = Dispatcher::new(Arc::clone(&session.resolver), session.inbox).with_prompt(PROMPT);
    dispatcher.add_task(dispatch::spawn_context_refresh(
        Arc::clone(&session.env.context),
        Arc::clone(&session.env.trackers),
        Duration::from_secs(settings.context_refresh_secs.max(1)),
    ));
    dispatcher.add_task(dispatch::spawn_config_watcher(
        Arc::clone(&session.config),
        Arc::clone(&session.registry),
        Duration::from_secs(settings.watch_interval_secs.max(1)),
    ));

    println!("aria v{} - type 'help' to see what I can do, 'quit' to leave", env!("CARGO_PKG_VERSION"));
    info!("interactive session started");

    let outcome = dispatcher.run(tokio::io::stdin(), tokio::io::stdout()).await;
    session.env.timers.cancel_all();
    outcome
}

async fn handle_run(options: &Options, words: &[String]) -> Result<()> {
    if words.is_empty() {
        eprintln!("Usage: aria run <command>");
        return Ok(());
    }

    let session = start_session(options)?;

    // One sample so the context plugin has something to show
    if let Ok(snapshot) = ContextSnapshot::capture() {
        context::publish(&session.env.context, snapshot);
    }

    for resolution in &session.resolver.run_line(&words.join(" "))? {
        if let Some(message) = resolution.message() {
            println!("{}", message);
        }
    }
    Ok(())
}

/// One row of `aria plugins --json`
#[derive(Serialize)]
struct PluginRow<'a> {
    #[serde(flatten)]
    info: &'a PluginInfo,
    capabilities: Capabilities,
    enabled: bool,
}

async fn handle_plugins(options: &Options, args: &[String]) -> Result<()> {
    let as_json = args.iter().any(|arg| arg == "--json");
    let session = start_session(options)?;
    let registry = registry::read(&session.registry);

    if as_json {
        let rows: Vec<PluginRow> = registry
            .iter()
            .map(|entry| PluginRow {
                info: entry.plugin.info(),
                capabilities: entry.capabilities,
                enabled: entry.enabled,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for entry in registry.iter() {
        let info = entry.plugin.info();
        let state = if entry.enabled { "enabled" } else { "disabled" };
        println!("{:<12} {:<8} {:<9} {}", info.id, info.version, state, info.description);
    }

    for mismatch in registry.check_requirements() {
        println!("warning: {}", mismatch.user_message());
    }

    Ok(())
}

fn print_usage() {
    println!(
        r#"aria v{} - Type what you want done

USAGE:
    aria [OPTIONS] [COMMAND]

COMMANDS:
    (none)                 Start the interactive prompt
    run <command>          Run one command line and exit
    plugins [--json]       List plugins and their state
    version                Show version
    help                   Show this help

OPTIONS:
    --debug                Let plugin failures stop aria (verbose logs)
    --config <path>        Use another config file (default: ~/.aria/config.toml)

EXAMPLES:
    aria run echo hello
    aria run "j docs && timer 5m tea"
    aria --debug
"#,
        env!("CARGO_PKG_VERSION")
    );
}
