//! Scripted [`ProcessRunner`] for unit tests.

use crate::error::{Result, VmError};
use crate::exec::ProcessRunner;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

enum Reply {
    Ok(String),
    Exit(i32, String),
    Missing,
}

struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
    last: Reply,
}

/// Answers commands whose joined command line contains a pattern.
///
/// Rules match in insertion order. A rule with several replies hands them
/// out in turn and repeats the final one. Unmatched commands succeed with
/// empty output.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(self, pattern: &str, stdout: &str) -> Self {
        self.push(pattern, Vec::new(), Reply::Ok(stdout.to_string()))
    }

    pub fn fail(self, pattern: &str, stderr: &str) -> Self {
        self.exit(pattern, 1, stderr)
    }

    /// Fail with a specific exit code.
    pub fn exit(self, pattern: &str, code: i32, stderr: &str) -> Self {
        self.push(pattern, Vec::new(), Reply::Exit(code, stderr.to_string()))
    }

    pub fn missing(self, pattern: &str) -> Self {
        self.push(pattern, Vec::new(), Reply::Missing)
    }

    /// Reply with each output in turn, then keep repeating the last.
    pub fn sequence(self, pattern: &str, outputs: &[&str]) -> Self {
        let mut replies: Vec<Reply> = outputs.iter().map(|o| Reply::Ok(o.to_string())).collect();
        let last = replies.pop().unwrap_or(Reply::Ok(String::new()));
        self.push(pattern, replies, last)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, pattern: &str) -> bool {
        self.calls().iter().any(|c| c.contains(pattern))
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    fn push(self, pattern: &str, replies: Vec<Reply>, last: Reply) -> Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            replies: replies.into(),
            last,
        });
        self
    }
}

fn answer(reply: &Reply, program: &str, line: &str) -> Result<String> {
    match reply {
        Reply::Ok(out) => Ok(out.clone()),
        Reply::Exit(code, err) => Err(VmError::Command {
            program: program.to_string(),
            args: line.to_string(),
            message: format!("exit status: {code}: {err}"),
        }),
        Reply::Missing => Err(VmError::ToolMissing(program.to_string())),
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let line = format!("{} {}", program, args.join(" "));
        self.calls.lock().unwrap().push(line.clone());

        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if line.contains(&rule.pattern) {
                return match rule.replies.pop_front() {
                    Some(reply) => answer(&reply, program, &line),
                    None => answer(&rule.last, program, &line),
                };
            }
        }
        Ok(String::new())
    }
}
