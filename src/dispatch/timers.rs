/// One-shot timers
///
/// A timer either posts a reminder to the prompt or queues a delayed query
/// for the dispatch loop. Every timer is its own background task and can be
/// cancelled by name. Timer tokens are children of one owner token, so
/// `cancel_all` stops every timer at once.

use crate::dispatch::task::{pause, BackgroundTask};
use crate::dispatch::Outbox;
use crate::query::Query;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// What happens when a timer fires
#[derive(Debug, Clone, PartialEq)]
pub enum TimerAction {
    Remind(String),
    Run(Query),
}

struct ActiveTimer {
    serial: u64,
    due: DateTime<Local>,
    task: BackgroundTask,
}

#[derive(Default)]
struct TimerTable {
    owner: CancellationToken,
    next_serial: u64,
    active: BTreeMap<String, ActiveTimer>,
}

/// Starts and tracks timers; cheap to clone
#[derive(Clone)]
pub struct Timers {
    runtime: Handle,
    outbox: Outbox,
    table: Arc<Mutex<TimerTable>>,
}

impl Timers {
    /// Timers spawned on `runtime` that report through `outbox`
    pub fn new(runtime: Handle, outbox: Outbox) -> Self {
        Self {
            runtime,
            outbox,
            table: Arc::new(Mutex::new(TimerTable::default())),
        }
    }

    /// Start a timer; an existing timer with the same name is replaced
    pub fn start(&self, name: &str, delay: Duration, action: TimerAction) -> DateTime<Local> {
        let now = Local::now();
        let due = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(now);

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.next_serial += 1;
        let serial = table.next_serial;

        let outbox = self.outbox.clone();
        let shared = Arc::clone(&self.table);
        let timer_name = name.to_string();

        let token = table.owner.child_token();
        let task = BackgroundTask::spawn_on(&self.runtime, token, format!("timer:{}", name), move |token| async move {
            if !pause(&token, delay).await {
                return;
            }

            match action {
                TimerAction::Remind(message) => {
                    outbox.notify(message);
                }
                TimerAction::Run(query) => {
                    outbox.schedule(query);
                }
            }
            info!(timer = %timer_name, "timer fired");

            let mut table = shared.lock().unwrap_or_else(PoisonError::into_inner);
            // A newer timer may have taken the name since
            if table.active.get(&timer_name).is_some_and(|t| t.serial == serial) {
                table.active.remove(&timer_name);
            }
        });

        if let Some(previous) = table.active.insert(
            name.to_string(),
            ActiveTimer { serial, due, task },
        ) {
            previous.task.cancel();
        }

        due
    }

    /// Cancel a timer by name; false if there was none
    pub fn cancel(&self, name: &str) -> bool {
        let removed = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .remove(name);

        match removed {
            Some(timer) => {
                timer.task.cancel();
                info!(timer = name, "timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Active timers with their due times, soonest first
    pub fn list(&self) -> Vec<(String, DateTime<Local>)> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let mut timers: Vec<_> = table
            .active
            .iter()
            .map(|(name, timer)| (name.clone(), timer.due))
            .collect();
        timers.sort_by_key(|(_, due)| *due);
        timers
    }

    pub fn cancel_all(&self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.owner.cancel();
        table.owner = CancellationToken::new();
        table.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::mailbox;

    #[tokio::test]
    async fn test_reminder_is_delivered() {
        let (outbox, mut inbox) = mailbox();
        let timers = Timers::new(Handle::current(), outbox);

        timers.start("tea", Duration::from_millis(10), TimerAction::Remind("tea is ready".to_string()));
        assert_eq!(timers.list().len(), 1);

        let notice = inbox.notices.recv().await;
        assert_eq!(notice.as_deref(), Some("tea is ready"));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(timers.list().is_empty());
    }

    #[tokio::test]
    async fn test_delayed_query_is_queued() {
        let (outbox, mut inbox) = mailbox();
        let timers = Timers::new(Handle::current(), outbox);

        timers.start("later", Duration::from_millis(5), TimerAction::Run(Query::new("echo later")));

        let query = inbox.scheduled.recv().await.unwrap();
        assert_eq!(query.content, "echo later");
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        let (outbox, mut inbox) = mailbox();
        let timers = Timers::new(Handle::current(), outbox);

        timers.start("nap", Duration::from_millis(20), TimerAction::Remind("wake up".to_string()));
        assert!(timers.cancel("nap"));
        assert!(!timers.cancel("nap"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(inbox.notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_same_name_replaces_timer() {
        let (outbox, mut inbox) = mailbox();
        let timers = Timers::new(Handle::current(), outbox);

        timers.start("t", Duration::from_millis(10), TimerAction::Remind("first".to_string()));
        timers.start("t", Duration::from_millis(20), TimerAction::Remind("second".to_string()));
        assert_eq!(timers.list().len(), 1);

        assert_eq!(inbox.notices.recv().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_cancel_all_stops_every_timer() {
        let (outbox, mut inbox) = mailbox();
        let timers = Timers::new(Handle::current(), outbox);

        timers.start("a", Duration::from_millis(10), TimerAction::Remind("a".to_string()));
        timers.start("b", Duration::from_millis(10), TimerAction::Remind("b".to_string()));
        timers.cancel_all();
        assert!(timers.list().is_empty());

        // New timers still work after a cancel_all
        timers.start("c", Duration::from_millis(20), TimerAction::Remind("c".to_string()));
        assert_eq!(inbox.notices.recv().await.as_deref(), Some("c"));
        assert!(inbox.notices.try_recv().is_err());
    }
}
