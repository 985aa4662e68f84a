/// Dispatch loop
///
/// Reads lines, resolves them, and prints feedback. Timers and other
/// background tasks talk back through the `Outbox`: delayed queries are run
/// once due, notices are printed as they arrive.

pub mod background;
pub mod task;
pub mod timers;

pub use background::{spawn_config_watcher, spawn_context_refresh, spawn_file_watcher};
pub use task::{pause, BackgroundTask, TaskSet};
pub use timers::{TimerAction, Timers};

use crate::error::Result;
use crate::query::Query;
use crate::resolver::{Resolution, Resolver};
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

/// Sending side handed to timers and plugins
#[derive(Debug, Clone)]
pub struct Outbox {
    scheduled: UnboundedSender<Query>,
    notices: UnboundedSender<String>,
}

impl Outbox {
    /// Queue a query; it runs once its `exec_at` has passed
    pub fn schedule(&self, query: Query) {
        if self.scheduled.send(query).is_err() {
            debug!("dispatch loop is gone, dropping scheduled query");
        }
    }

    /// Print a message at the prompt
    pub fn notify(&self, message: impl Into<String>) {
        if self.notices.send(message.into()).is_err() {
            debug!("dispatch loop is gone, dropping notice");
        }
    }
}

/// Receiving side owned by the dispatcher
#[derive(Debug)]
pub struct Inbox {
    pub scheduled: UnboundedReceiver<Query>,
    pub notices: UnboundedReceiver<String>,
}

pub fn mailbox() -> (Outbox, Inbox) {
    let (scheduled_tx, scheduled_rx) = mpsc::unbounded_channel();
    let (notices_tx, notices_rx) = mpsc::unbounded_channel();

    (
        Outbox {
            scheduled: scheduled_tx,
            notices: notices_tx,
        },
        Inbox {
            scheduled: scheduled_rx,
            notices: notices_rx,
        },
    )
}

// Upper bound on one idle wait; the select re-arms after it
const IDLE_WAIT: Duration = Duration::from_secs(3600);

pub struct Dispatcher {
    resolver: Arc<Resolver>,
    inbox: Inbox,
    tasks: TaskSet,
    prompt: Option<String>,
}

impl Dispatcher {
    pub fn new(resolver: Arc<Resolver>, inbox: Inbox) -> Self {
        Self {
            resolver,
            inbox,
            tasks: TaskSet::new(),
            prompt: None,
        }
    }

    /// Print `prompt` before every line read
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Hand a background task to the dispatcher; it is cancelled on exit
    pub fn add_task(&mut self, task: BackgroundTask) {
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &TaskSet {
        &self.tasks
    }

    /// Run until quit or end of input
    ///
    /// In debug mode a failing plugin ends the loop with its error.
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        let mut pending: Vec<Query> = Vec::new();

        info!("dispatch loop started");
        let result = loop {
            if let Err(e) = self.write_prompt(&mut writer).await {
                break Err(e);
            }

            let wait = next_wait(&pending);

            let step = tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.dispatch(Query::new(line), &mut writer).await,
                    Ok(None) => Ok(false),
                    Err(e) => Err(e.into()),
                },
                Some(query) = self.inbox.scheduled.recv() => {
                    if query.is_due(Local::now()) {
                        self.dispatch(query, &mut writer).await
                    } else {
                        debug!(query = %query, due = ?query.exec_at, "holding scheduled query");
                        pending.push(query);
                        Ok(true)
                    }
                }
                Some(notice) = self.inbox.notices.recv() => {
                    write_line(&mut writer, &notice).await.map(|_| true)
                }
                _ = tokio::time::sleep(wait), if !pending.is_empty() => {
                    self.run_due(&mut pending, &mut writer).await
                }
                else => Ok(false),
            };

            match step {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.tasks.cancel_all();
        info!("dispatch loop stopped");
        result
    }

    async fn run_due<W>(&self, pending: &mut Vec<Query>, writer: &mut W) -> Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        let now = Local::now();
        let (mut due, later): (Vec<Query>, Vec<Query>) =
            pending.drain(..).partition(|query| query.is_due(now));
        *pending = later;
        due.sort_by_key(|query| query.exec_at);

        for query in due {
            if !self.dispatch(query, writer).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Resolve one query off the async threads and print its feedback
    ///
    /// Returns false when the query asked to quit.
    async fn dispatch<W>(&self, query: Query, writer: &mut W) -> Result<bool>
    where
        W: AsyncWrite + Unpin,
    {
        if query.is_empty() {
            return Ok(true);
        }

        let resolver = Arc::clone(&self.resolver);
        let outcome = tokio::task::spawn_blocking(move || resolver.run_query(query)).await;

        let resolutions = match outcome {
            Ok(Ok(resolutions)) => resolutions,
            Ok(Err(e)) if self.resolver.is_debug() => return Err(e),
            Ok(Err(e)) => {
                error!("{}", e);
                return Ok(true);
            }
            Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
            Err(join) => {
                warn!("query task did not finish: {}", join);
                return Ok(true);
            }
        };

        for resolution in &resolutions {
            print_resolution(resolution, writer).await?;
        }

        Ok(!resolutions.iter().any(Resolution::is_quit))
    }

    async fn write_prompt<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if let Some(prompt) = &self.prompt {
            writer.write_all(prompt.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok(())
    }
}

/// Time until the earliest pending query is due
fn next_wait(pending: &[Query]) -> Duration {
    pending
        .iter()
        .filter_map(|query| query.exec_at)
        .min()
        .map(|at| (at - Local::now()).to_std().unwrap_or(Duration::ZERO))
        .unwrap_or(IDLE_WAIT)
}

async fn print_resolution<W>(resolution: &Resolution, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if let Some(message) = resolution.message() {
        write_line(writer, message).await?;
    }
    Ok(())
}

async fn write_line<W>(writer: &mut W, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(format!("{}\n", text).as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Registry;
    use crate::plugins::echo::EchoPlugin;
    use crate::tracker::TrackerManager;
    use tempfile::TempDir;
    use tokio_test::io::Builder;

    fn dispatcher(temp: &TempDir) -> (Dispatcher, Outbox) {
        let mut registry = Registry::new();
        registry.register(Arc::new(EchoPlugin::new())).unwrap();

        let trackers = Arc::new(TrackerManager::new(temp.path()).unwrap());
        let resolver = Arc::new(Resolver::new(registry.into_shared(), trackers));
        let (outbox, inbox) = mailbox();
        (Dispatcher::new(resolver, inbox), outbox)
    }

    #[tokio::test]
    async fn test_lines_run_in_order_until_quit() {
        let temp = TempDir::new().unwrap();
        let (mut dispatcher, _outbox) = dispatcher(&temp);

        let reader = Builder::new().read(b"echo one && echo two\nq\n").build();
        let writer = Builder::new().write(b"one\n").write(b"two\n").build();

        dispatcher.run(reader, writer).await.unwrap();
    }

    #[tokio::test]
    async fn test_end_of_input_stops_loop() {
        let temp = TempDir::new().unwrap();
        let (mut dispatcher, _outbox) = dispatcher(&temp);

        let reader = Builder::new().read(b"echo hi\n").build();
        let writer = Builder::new().write(b"hi\n").build();

        dispatcher.run(reader, writer).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_command_is_reported() {
        let temp = TempDir::new().unwrap();
        let (mut dispatcher, _outbox) = dispatcher(&temp);

        let reader = Builder::new().read(b"frobnicate\n").build();
        let writer = Builder::new().write(b"Command not found.\n").build();

        dispatcher.run(reader, writer).await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduled_query_runs_when_due() {
        let temp = TempDir::new().unwrap();
        let (mut dispatcher, outbox) = dispatcher(&temp);

        outbox.schedule(Query::delayed("echo later", chrono::Duration::milliseconds(30)));
        outbox.notify("heads up");

        let reader = Builder::new()
            .wait(Duration::from_millis(100))
            .read(b"quit\n")
            .build();
        let writer = Builder::new().write(b"heads up\n").write(b"later\n").build();

        dispatcher.run(reader, writer).await.unwrap();
    }

    #[tokio::test]
    async fn test_prompt_is_written_before_each_read() {
        let temp = TempDir::new().unwrap();
        let (dispatcher, _outbox) = dispatcher(&temp);
        let mut dispatcher = dispatcher.with_prompt("> ");

        let reader = Builder::new().read(b"echo hi\n").build();
        let writer = Builder::new().write(b"> ").write(b"hi\n").write(b"> ").build();

        dispatcher.run(reader, writer).await.unwrap();
    }

    #[tokio::test]
    async fn test_tasks_are_cancelled_on_exit() {
        let temp = TempDir::new().unwrap();
        let (mut dispatcher, _outbox) = dispatcher(&temp);

        dispatcher.add_task(BackgroundTask::spawn("idle", |token| async move {
            token.cancelled().await;
        }));
        assert_eq!(dispatcher.tasks().len(), 1);

        let reader = Builder::new().build();
        let writer = Builder::new().build();
        dispatcher.run(reader, writer).await.unwrap();

        assert!(dispatcher.tasks().is_empty());
    }
}
