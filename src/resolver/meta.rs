// Meta-commands: the handful of inputs the resolver answers itself
//
// These are checked before any plugin gets a look, so a plugin can never
// shadow "quit" or "enable plugin x". Case never matters; plugin ids are
// lower-cased on the way out.

use regex::{Captures, Regex};
use std::sync::OnceLock;

const QUIT_WORDS: &[&str] = &["q", "quit", "exit"];

// Both spellings the old command maker understood
const MAKE_PATTERNS: &[&str] = &[
    r"(?i)^make command (\w+) from (\w+)$",
    r"(?i)^make (\w+) from command (\w+)$",
];

const ENABLE_PATTERN: &str = r"(?i)^enable plugin (\S+)$";
const DISABLE_PATTERN: &str = r"(?i)^disable plugin (\S+)$";
const REPORT_PATTERN: &str = r"(?i)^report (\S+)$";
const HELP_PATTERN: &str = r"(?i)^help(?: (\S+))?$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaCommand {
    Quit,
    MakeCommand { new_id: String, template: String },
    EnablePlugin(String),
    DisablePlugin(String),
    Report(String),
    /// `help` alone lists plugins, `help <id>` shows one
    Help(Option<String>),
    ListPlugins,
}

pub struct MetaParser {
    make: Vec<Regex>,
    enable: Option<Regex>,
    disable: Option<Regex>,
    report: Option<Regex>,
    help: Option<Regex>,
}

impl MetaParser {
    pub fn new() -> Self {
        // Build the patterns once so we don't recompile them for every line
        Self {
            make: MAKE_PATTERNS
                .iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect(),
            enable: Regex::new(ENABLE_PATTERN).ok(),
            disable: Regex::new(DISABLE_PATTERN).ok(),
            report: Regex::new(REPORT_PATTERN).ok(),
            help: Regex::new(HELP_PATTERN).ok(),
        }
    }

    pub fn parse(&self, input: &str) -> Option<MetaCommand> {
        let input = input.trim();

        if QUIT_WORDS.iter().any(|word| word.eq_ignore_ascii_case(input)) {
            return Some(MetaCommand::Quit);
        }
        if input.eq_ignore_ascii_case("plugins") {
            return Some(MetaCommand::ListPlugins);
        }

        for pattern in &self.make {
            if let Some(caps) = pattern.captures(input) {
                return Some(MetaCommand::MakeCommand {
                    new_id: caps[1].to_lowercase(),
                    template: caps[2].to_lowercase(),
                });
            }
        }

        if let Some(caps) = captures(&self.enable, input) {
            return Some(MetaCommand::EnablePlugin(caps[1].to_lowercase()));
        }
        if let Some(caps) = captures(&self.disable, input) {
            return Some(MetaCommand::DisablePlugin(caps[1].to_lowercase()));
        }
        if let Some(caps) = captures(&self.report, input) {
            return Some(MetaCommand::Report(caps[1].to_lowercase()));
        }
        if let Some(caps) = captures(&self.help, input) {
            return Some(MetaCommand::Help(caps.get(1).map(|m| m.as_str().to_lowercase())));
        }

        None
    }
}

/// Process-wide parser, compiled on first use
pub fn parser() -> &'static MetaParser {
    static PARSER: OnceLock<MetaParser> = OnceLock::new();
    PARSER.get_or_init(MetaParser::new)
}

impl Default for MetaParser {
    fn default() -> Self {
        Self::new()
    }
}

fn captures<'a>(pattern: &Option<Regex>, input: &'a str) -> Option<Captures<'a>> {
    pattern.as_ref().and_then(|re| re.captures(input))
}
