/// Built-in plugins
///
/// Registration order below is the tie-break order for arbitration.

pub mod alias;
pub mod context;
pub mod echo;
pub mod jump;
pub mod timer;

pub use alias::AliasPlugin;
pub use context::ContextPlugin;
pub use echo::EchoPlugin;
pub use jump::JumpPlugin;
pub use timer::TimerPlugin;

use crate::config::AriaConfig;
use crate::context::SharedContext;
use crate::dispatch::Timers;
use crate::error::Result;
use crate::plugin::{Plugin, Registry};
use crate::tracker::TrackerManager;
use std::sync::Arc;
use tracing::debug;

/// What the built-in plugins need from the running assistant
#[derive(Clone)]
pub struct PluginEnv {
    pub trackers: Arc<TrackerManager>,
    pub context: SharedContext,
    pub timers: Timers,
}

pub fn builtin(env: &PluginEnv) -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(ContextPlugin::new(Arc::clone(&env.context))),
        Arc::new(AliasPlugin::new(Arc::clone(&env.trackers))),
        Arc::new(TimerPlugin::new(env.timers.clone())),
        Arc::new(JumpPlugin::new(Arc::clone(&env.trackers))),
        Arc::new(EchoPlugin::new()),
    ]
}

/// Registry holding every built-in, enabled or not per the config
pub fn registry(env: &PluginEnv, config: &AriaConfig) -> Result<Registry> {
    let mut registry = Registry::new();
    for plugin in builtin(env) {
        let enabled = config.is_plugin_enabled(&plugin.info().id);
        debug!(plugin = %plugin.info().id, enabled, "registering");
        registry.register_with_state(plugin, enabled)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::shared_context;
    use crate::dispatch::mailbox;
    use tempfile::TempDir;
    use tokio::runtime::Handle;

    #[tokio::test]
    async fn test_registry_honours_config_flags() {
        let temp = TempDir::new().unwrap();
        let (outbox, _inbox) = mailbox();
        let env = PluginEnv {
            trackers: Arc::new(TrackerManager::new(temp.path()).unwrap()),
            context: shared_context(),
            timers: Timers::new(Handle::current(), outbox),
        };

        let mut config = AriaConfig::default();
        config.plugins.insert("echo".to_string(), false);

        let registry = registry(&env, &config).unwrap();
        assert_eq!(registry.ids(), vec!["context", "alias", "timer", "jump", "echo"]);
        assert!(!registry.is_enabled("echo"));
        assert!(registry.is_enabled("jump"));
        assert!(registry.check_requirements().is_empty());
    }
}
