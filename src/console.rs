//! Interactive approval prompt on the controlling terminal.
use std::io::Write;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::debug;
use wren_tools::{ApprovalDecision, ApprovalHandler, SafetyVerdict};

/// Asks on stderr and reads the answer from stdin.  Concurrent tool calls
/// are prompted one at a time.
pub struct ConsoleApprover<R = BufReader<Stdin>> {
    input: Mutex<R>,
}

impl ConsoleApprover {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> ConsoleApprover<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }
}

/// Map a typed answer to a decision.  Anything unrecognised denies.
pub fn parse_answer(answer: &str) -> ApprovalDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::ApproveOnce,
        "s" | "session" => ApprovalDecision::ApproveSession,
        "a" | "always" => ApprovalDecision::ApproveAlways,
        _ => ApprovalDecision::Deny,
    }
}

fn render(verdict: &SafetyVerdict) -> String {
    let mut out = format!(
        "\n⚠ {} [{:?}] wants to run: {}\n",
        verdict.tool_name, verdict.tier, verdict.reason
    );
    for d in &verdict.details {
        out.push_str(&format!("  - {d}\n"));
    }
    if let Ok(args) = serde_json::to_string_pretty(&verdict.arguments) {
        out.push_str(&format!("  arguments: {args}\n"));
    }
    out.push_str("Allow? [y]es once / [s]ession / [a]lways / [n]o: ");
    out
}

#[async_trait]
impl<R> ApprovalHandler for ConsoleApprover<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn decide(&self, verdict: &SafetyVerdict) -> ApprovalDecision {
        let mut input = self.input.lock().await;
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(render(verdict).as_bytes());
        let _ = stderr.flush();

        let mut line = String::new();
        match input.read_line(&mut line).await {
            Ok(0) => {
                debug!(tool_name = %verdict.tool_name, "stdin closed; denying");
                ApprovalDecision::Deny
            }
            Ok(_) => parse_answer(&line),
            Err(e) => {
                debug!(error = %e, "reading approval answer failed; denying");
                ApprovalDecision::Deny
            }
        }
    }
}
