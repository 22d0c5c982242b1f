//! Shared test double for stage tests: a command runner that records
//! every invocation and replays scripted outcomes.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::exec::{CmdOutput, CommandRunner};

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Output(CmdOutput),
    TimedOut,
}

struct Rule {
    pattern: String,
    outcomes: VecDeque<Scripted>,
    last: Scripted,
}

/// Records each call as `"program arg1 arg2 …"`. The first rule whose
/// pattern is a substring of the call line supplies the outcome;
/// unmatched calls succeed with empty output. A rule's last outcome
/// repeats once its queue is exhausted.
#[derive(Default)]
pub(crate) struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    rules: Mutex<Vec<Rule>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, outcome: Scripted) -> Self {
        self.on_seq(pattern, vec![outcome])
    }

    pub fn on_seq(self, pattern: &str, outcomes: Vec<Scripted>) -> Self {
        let last = outcomes
            .last()
            .cloned()
            .unwrap_or(Scripted::Output(CmdOutput::ok("")));
        self.rules.lock().expect("rules lock").push(Rule {
            pattern: pattern.to_string(),
            outcomes: outcomes.into(),
            last,
        });
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Calls whose line contains the given substring.
    pub fn calls_matching(&self, pattern: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }
}

pub(crate) fn ok_stdout(stdout: &str) -> Scripted {
    Scripted::Output(CmdOutput::ok(stdout))
}

pub(crate) fn failed(stderr: &str) -> Scripted {
    Scripted::Output(CmdOutput::failed(1, stderr))
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CmdOutput, ExecError> {
        let line = if args.is_empty() {
            program.to_string()
        } else {
            format!("{program} {}", args.join(" "))
        };
        self.calls.lock().expect("calls lock").push(line.clone());

        let scripted = {
            let mut rules = self.rules.lock().expect("rules lock");
            rules.iter_mut().find(|r| line.contains(&r.pattern)).map(
                |rule| match rule.outcomes.pop_front() {
                    Some(outcome) => outcome,
                    None => rule.last.clone(),
                },
            )
        };

        match scripted {
            None => Ok(CmdOutput::ok("")),
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::TimedOut) => Err(ExecError::TimedOut {
                description: program.to_string(),
                secs: timeout.as_secs(),
            }),
        }
    }
}
