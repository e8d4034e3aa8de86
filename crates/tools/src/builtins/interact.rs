//! User interaction: the ask_user tool.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use anyhow::Result;
use async_trait::async_trait;

use crate::builtins::require;
use crate::{Tool, ToolOutput, ToolParam, ToolSpec};

/// Asks the operator a question on the terminal.  The blocking read runs on
/// a dedicated thread so it does not stall the runtime.
#[derive(Default)]
pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "ask_user".to_string(),
            description: "Ask the user a question and wait for their answer. Use this for \
                          confirmations the current mode requires."
                .to_string(),
            params: vec![ToolParam::required("prompt", "Question to ask the user")],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let prompt = match require(args, "prompt") {
            Ok(v) => v.to_string(),
            Err(out) => return Ok(out),
        };

        let answer = tokio::task::spawn_blocking(move || -> Result<String> {
            let mut stdout = std::io::stdout();
            write!(stdout, "\n[athena] {prompt}\n> ")?;
            stdout.flush()?;
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            Ok(line.trim().to_string())
        })
        .await??;

        if answer.is_empty() {
            return Ok(ToolOutput::ok("(user gave no answer)"));
        }
        Ok(ToolOutput::ok(format!("User answered: {answer}")))
    }
}
