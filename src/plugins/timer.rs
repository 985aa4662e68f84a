/// Timer: reminders and delayed commands
///
/// - `timer <duration> [name]` posts a reminder when it runs out
/// - `in <duration> <command>` runs a command later
/// - `timers` lists what is running, `stop timer <name>` cancels one

use crate::dispatch::{TimerAction, Timers};
use crate::plugin::{Capabilities, Origin, Plugin, PluginInfo};
use crate::query::{Provenance, Query};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

pub struct TimerPlugin {
    info: PluginInfo,
    timers: Timers,
    counter: AtomicU64,
}

#[derive(Debug, PartialEq)]
enum Command<'q> {
    Start { delay: Duration, name: Option<&'q str> },
    Later { delay: Duration, command: &'q str },
    List,
    Stop(&'q str),
}

impl TimerPlugin {
    pub fn new(timers: Timers) -> Self {
        Self {
            info: PluginInfo::new("timer", "Timer")
                .description("Reminders and delayed commands")
                .help_line("Durations look like 90, 45s, 5m, 1h30m")
                .example("timer 5m tea", "remind you in five minutes")
                .example("in 10m echo stretch", "run a command later")
                .example("timers", "list running timers")
                .example("stop timer tea", "cancel a timer"),
            timers,
            counter: AtomicU64::new(0),
        }
    }

    fn next_name(&self) -> String {
        format!("timer-{}", self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

fn parse(content: &str) -> Option<Command<'_>> {
    if content.eq_ignore_ascii_case("timers") {
        return Some(Command::List);
    }
    if let Some(name) = content.strip_prefix("stop timer ") {
        let name = name.trim();
        return (!name.is_empty()).then_some(Command::Stop(name));
    }

    let (word, rest) = content.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    let (amount, tail) = match rest.split_once(char::is_whitespace) {
        Some((amount, tail)) => (amount, Some(tail.trim())),
        None => (rest, None),
    };
    let delay = parse_duration(amount)?;

    match word.to_lowercase().as_str() {
        "timer" => Some(Command::Start { delay, name: tail }),
        "in" => tail
            .filter(|command| !command.is_empty())
            .map(|command| Command::Later { delay, command }),
        _ => None,
    }
}

/// Parse `90`, `45s`, `5m`, `2h`, `1h30m`, `1h5m10s`; zero is rejected
pub fn parse_duration(text: &str) -> Option<Duration> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s?)?$").ok())
        .as_ref()?;

    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }
    let caps = pattern.captures(&text)?;

    let part = |index: usize| -> Option<u64> {
        caps.get(index).map_or(Some(0), |m| m.as_str().parse().ok())
    };
    let seconds = part(1)?
        .checked_mul(3600)?
        .checked_add(part(2)?.checked_mul(60)?)?
        .checked_add(part(3)?)?;

    (seconds > 0).then(|| Duration::from_secs(seconds))
}

fn describe(delay: Duration) -> String {
    let total = delay.as_secs();
    let (hours, minutes, seconds) = (total / 3600, total % 3600 / 60, total % 60);

    let mut text = String::new();
    if hours > 0 {
        let _ = write!(text, "{}h", hours);
    }
    if minutes > 0 {
        let _ = write!(text, "{}m", minutes);
    }
    if seconds > 0 || text.is_empty() {
        let _ = write!(text, "{}s", seconds);
    }
    text
}

impl Plugin for TimerPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::execute_only().with_invocation()
    }

    fn invocation(&self, query: &Query) -> anyhow::Result<bool> {
        Ok(parse(&query.content).is_some())
    }

    fn execute(&self, query: &Query, _origin: Origin) -> anyhow::Result<Option<String>> {
        let Some(command) = parse(&query.content) else {
            return Ok(Some("Usage: timer <duration> [name], e.g. timer 5m tea".to_string()));
        };

        let feedback = match command {
            Command::Start { delay, name } => {
                let name = name.map_or_else(|| self.next_name(), str::to_string);
                let message = format!("Timer '{}' is done.", name);
                let due = self.timers.start(&name, delay, TimerAction::Remind(message));
                format!("Timer '{}' set for {} (at {}).", name, describe(delay), due.format("%H:%M:%S"))
            }
            Command::Later { delay, command } => {
                let name = self.next_name();
                let later = Query::with_provenance(command, Provenance::Scheduled);
                self.timers.start(&name, delay, TimerAction::Run(later));
                format!("Will run '{}' in {} ({}).", command, describe(delay), name)
            }
            Command::List => {
                let running = self.timers.list();
                if running.is_empty() {
                    "No timers running.".to_string()
                } else {
                    let mut text = String::from("Timers:");
                    for (name, due) in running {
                        let _ = write!(text, "\n  {:<12} {}", name, due.format("%H:%M:%S"));
                    }
                    text
                }
            }
            Command::Stop(name) => {
                if self.timers.cancel(name) {
                    format!("Timer '{}' stopped.", name)
                } else {
                    format!("No timer named '{}'.", name)
                }
            }
        };

        Ok(Some(feedback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::mailbox;
    use proptest::prelude::*;
    use tokio::runtime::Handle;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("1H5M10S"), Some(Duration::from_secs(3910)));
        assert_eq!(parse_duration("0"), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5m30"), Some(Duration::from_secs(330)));
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("timers"), Some(Command::List));
        assert_eq!(parse("stop timer tea"), Some(Command::Stop("tea")));
        assert_eq!(
            parse("timer 5m tea"),
            Some(Command::Start {
                delay: Duration::from_secs(300),
                name: Some("tea"),
            })
        );
        assert_eq!(
            parse("in 10s echo hi there"),
            Some(Command::Later {
                delay: Duration::from_secs(10),
                command: "echo hi there",
            })
        );
        // Ordinary sentences starting with "in" are left alone
        assert_eq!(parse("in the morning"), None);
        assert_eq!(parse("in 5m"), None);
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(Duration::from_secs(5400)), "1h30m");
        assert_eq!(describe(Duration::from_secs(45)), "45s");
    }

    #[tokio::test]
    async fn test_timer_lifecycle() {
        let (outbox, mut inbox) = mailbox();
        let plugin = TimerPlugin::new(Timers::new(Handle::current(), outbox));
        let run = |line: &str| plugin.execute(&Query::new(line), Origin::TopLevel).unwrap().unwrap();

        assert!(run("timer 1h tea").starts_with("Timer 'tea' set for 1h"));
        assert!(run("timers").contains("tea"));
        assert_eq!(run("stop timer tea"), "Timer 'tea' stopped.");
        assert_eq!(run("stop timer tea"), "No timer named 'tea'.");
        assert_eq!(run("timers"), "No timers running.");

        assert!(run("in 1 echo later").starts_with("Will run 'echo later' in 1s"));
        let query = inbox.scheduled.recv().await.unwrap();
        assert_eq!(query.content, "echo later");
        assert_eq!(query.provenance, Provenance::Scheduled);
    }

    proptest! {
        #[test]
        fn prop_describe_parses_back(seconds in 1u64..200_000) {
            let delay = Duration::from_secs(seconds);
            prop_assert_eq!(parse_duration(&describe(delay)), Some(delay));
        }
    }
}
