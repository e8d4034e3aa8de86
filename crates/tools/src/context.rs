//! Shared state handed to every built-in tool, plus the per-request
//! execution gate that enforces the active behavior profile.

use std::sync::{Arc, RwLock};

use athena_exec::{ActionExecutor, RiskLevel};
use athena_memory::{InventoryStore, SecondaryStore};
use athena_triage::{BehaviorProfile, Priority, get_behavior};

/// Outcome of asking the gate for clearance to run a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Run it; the executor is called with confirmation granted.
    Approved,
    /// The behavior profile wants a human in the loop.
    NeedsConfirmation { reason: String },
    /// The command budget for this request is exhausted.
    Paused { executed: u32 },
}

/// Mutable per-request execution policy, reset by the orchestrator before
/// each request.
#[derive(Debug, Clone)]
pub struct ExecutionGate {
    pub behavior: BehaviorProfile,
    pub commands_executed: u32,
    /// Confirmation already granted for this request (e.g. `--confirm`).
    pub preconfirmed: bool,
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self {
            behavior: get_behavior(Priority::P3),
            commands_executed: 0,
            preconfirmed: false,
        }
    }
}

/// Everything the built-in tools need, shared behind one `Arc`.
pub struct ToolContext {
    pub store: Arc<InventoryStore>,
    pub executor: Arc<ActionExecutor>,
    pub secondary: Option<Arc<SecondaryStore>>,
    pub http: reqwest::Client,
    pub web_search_key: Option<String>,
    gate: RwLock<ExecutionGate>,
}

impl ToolContext {
    pub fn new(
        store: Arc<InventoryStore>,
        executor: Arc<ActionExecutor>,
        secondary: Option<Arc<SecondaryStore>>,
    ) -> Self {
        Self {
            store,
            executor,
            secondary,
            http: reqwest::Client::new(),
            web_search_key: None,
            gate: RwLock::new(ExecutionGate::default()),
        }
    }

    pub fn with_web_search_key(mut self, key: Option<String>) -> Self {
        self.web_search_key = key;
        self
    }

    /// Install the behavior profile for the request being processed.
    pub fn reset_gate(&self, behavior: BehaviorProfile, preconfirmed: bool) {
        *self.gate.write().expect("gate lock") = ExecutionGate {
            behavior,
            commands_executed: 0,
            preconfirmed,
        };
    }

    pub fn behavior(&self) -> BehaviorProfile {
        self.gate.read().expect("gate lock").behavior
    }

    /// Ask for clearance to run `command`.  Applies the behavior profile's
    /// confirmation policy and the per-request command budget.
    pub fn clearance(&self, command: &str) -> GateDecision {
        let risk = self.executor.risk_assessor().assess(command);
        let is_write = risk.level != RiskLevel::Low;
        let is_critical = risk.level == RiskLevel::Critical;

        let mut gate = self.gate.write().expect("gate lock");

        if gate.commands_executed >= gate.behavior.max_commands_before_pause {
            return GateDecision::Paused {
                executed: gate.commands_executed,
            };
        }

        let needs_confirmation = gate.behavior.should_confirm(is_write, is_critical);
        let auto_granted = gate.behavior.should_auto_confirm(is_write) || gate.preconfirmed;
        if needs_confirmation && !auto_granted {
            return GateDecision::NeedsConfirmation {
                reason: format!(
                    "Command is {} risk ({}) and the current mode requires confirmation. \
                     Ask the user with ask_user before proceeding.",
                    risk.level.as_str(),
                    risk.reason
                ),
            };
        }

        gate.commands_executed += 1;
        GateDecision::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use athena_triage::{ErrorAnalyzer, Priority, get_behavior};

    async fn context() -> ToolContext {
        let store = Arc::new(InventoryStore::open_in_memory().await.unwrap());
        let executor = Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())));
        ToolContext::new(store, executor, None)
    }

    #[tokio::test]
    async fn p0_gate_auto_confirms_reads_but_not_writes() {
        let ctx = context().await;
        ctx.reset_gate(get_behavior(Priority::P0), false);

        assert_eq!(ctx.clearance("df -h"), GateDecision::Approved);
        // Writes are critical-only in P0, so moderate writes run, critical
        // ones need a human.
        assert_eq!(ctx.clearance("mkdir /tmp/x"), GateDecision::Approved);
        assert!(matches!(
            ctx.clearance("systemctl restart nginx"),
            GateDecision::NeedsConfirmation { .. }
        ));
    }

    #[tokio::test]
    async fn p3_gate_confirms_everything() {
        let ctx = context().await;
        ctx.reset_gate(get_behavior(Priority::P3), false);
        assert!(matches!(
            ctx.clearance("df -h"),
            GateDecision::NeedsConfirmation { .. }
        ));

        // Preconfirmation unlocks it.
        ctx.reset_gate(get_behavior(Priority::P3), true);
        assert_eq!(ctx.clearance("df -h"), GateDecision::Approved);
    }

    #[tokio::test]
    async fn command_budget_pauses() {
        let ctx = context().await;
        ctx.reset_gate(get_behavior(Priority::P0), false);
        for _ in 0..10 {
            assert_eq!(ctx.clearance("uptime"), GateDecision::Approved);
        }
        assert!(matches!(
            ctx.clearance("uptime"),
            GateDecision::Paused { executed: 10 }
        ));
    }
}
