// Long-running helpers started alongside the dispatch loop
//
// Each runs until cancelled and only logs its failures; a bad tick never
// stops the task.

use crate::config::ConfigStore;
use crate::context::{self, ContextRecorder, ContextSnapshot, SharedContext, CONTEXT_TRACKER};
use crate::dispatch::task::{pause, BackgroundTask};
use crate::plugin::registry::{self, SharedRegistry};
use crate::tracker::{manager, TrackerManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// How often an unchanged context is written back to disk
const CONTEXT_CHECKPOINT_SECS: f64 = 60.0;

/// Sample the context every `interval`, publish it and record it
pub fn spawn_context_refresh(
    shared: SharedContext,
    trackers: Arc<TrackerManager>,
    interval: Duration,
) -> BackgroundTask {
    BackgroundTask::spawn("context-refresh", move |token| async move {
        let mut recorder = ContextRecorder::new(CONTEXT_CHECKPOINT_SECS);

        loop {
            match ContextSnapshot::capture() {
                Ok(snapshot) => {
                    context::publish(&shared, snapshot.clone());
                    record(&trackers, &mut recorder, &snapshot);
                }
                Err(e) => warn!("Failed to capture context: {}", e),
            }

            if !pause(&token, interval).await {
                break;
            }
        }
        debug!("context refresh stopped");
    })
}

fn record(trackers: &TrackerManager, recorder: &mut ContextRecorder, snapshot: &ContextSnapshot) {
    let shared = match trackers.history_tracker(CONTEXT_TRACKER) {
        Ok(shared) => shared,
        Err(e) => {
            warn!("Failed to open context tracker: {}", e);
            return;
        }
    };

    let mut tracker = manager::lock(&shared);
    if let Err(e) = recorder.record(&mut tracker, snapshot, manager::seconds_since_midnight()) {
        warn!("Failed to record context: {}", e);
    }
}

/// Poll `path` every `interval` and call `on_change` when its modification
/// time moves
///
/// The first reading is the baseline. A file that disappears and comes back
/// counts as a change.
pub fn spawn_file_watcher<F>(
    name: impl Into<String>,
    path: impl Into<PathBuf>,
    interval: Duration,
    on_change: F,
) -> BackgroundTask
where
    F: Fn(&Path) + Send + 'static,
{
    let path = path.into();

    BackgroundTask::spawn(name, move |token| async move {
        let mut last_seen = modified(&path).await;

        while pause(&token, interval).await {
            let current = modified(&path).await;
            if current != last_seen {
                debug!(path = %path.display(), "watched file changed");
                last_seen = current;
                if current.is_some() {
                    on_change(&path);
                }
            }
        }
    })
}

/// Re-apply `[plugins]` flags whenever the config file changes
pub fn spawn_config_watcher(
    config: Arc<ConfigStore>,
    plugins: SharedRegistry,
    interval: Duration,
) -> BackgroundTask {
    let path = config.path().to_path_buf();

    spawn_file_watcher("config-watcher", path, interval, move |path| {
        let fresh = match config.reload() {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!("Keeping previous settings: {}", e);
                return;
            }
        };

        let changed = registry::write(&plugins).apply_enabled_flags(&fresh.plugins);
        if !changed.is_empty() {
            info!(path = %path.display(), plugins = ?changed, "plugin flags reloaded");
        }
    })
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .and_then(|meta| meta.modified())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AriaConfig;
    use crate::plugin::Registry;
    use crate::plugins::EchoPlugin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn bump_mtime(path: &Path) {
        // Push the mtime forward so coarse filesystem clocks still see a change
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
    }

    #[tokio::test]
    async fn test_context_refresh_publishes_and_records() {
        let temp = TempDir::new().unwrap();
        let trackers = Arc::new(TrackerManager::new(temp.path()).unwrap());
        let shared = context::shared_context();

        let task = spawn_context_refresh(
            Arc::clone(&shared),
            Arc::clone(&trackers),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        task.cancel();
        task.join().await;

        assert!(context::current(&shared).is_some());
        assert!(trackers.file_path(CONTEXT_TRACKER).exists());
        let tracker = trackers.history_tracker(CONTEXT_TRACKER).unwrap();
        assert_eq!(manager::lock(&tracker).len(), 1);
    }

    #[tokio::test]
    async fn test_file_watcher_fires_on_change_only() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "debug = false\n").unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let task = spawn_file_watcher("watch", &path, Duration::from_millis(10), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        bump_mtime(&path);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        task.cancel();
        task.join().await;
    }

    #[tokio::test]
    async fn test_config_watcher_reapplies_plugin_flags() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let store = Arc::new(ConfigStore::with_config(&path, AriaConfig::default()));
        AriaConfig::default().save(&path).unwrap();

        let mut plugins = Registry::new();
        plugins.register(Arc::new(EchoPlugin::new())).unwrap();
        let shared = plugins.into_shared();

        let task = spawn_config_watcher(Arc::clone(&store), Arc::clone(&shared), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;

        std::fs::write(&path, "[plugins]\necho = false\n").unwrap();
        bump_mtime(&path);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!registry::read(&shared).is_enabled("echo"));
        assert!(!store.snapshot().is_plugin_enabled("echo"));

        task.cancel();
        task.join().await;
    }
}
