//! Behavior profiles: per-priority execution policy.
//!
//! The exact values are an external contract; tests key off these numbers.

use serde::{Deserialize, Serialize};

use crate::priority::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationMode {
    None,
    CriticalOnly,
    WritesOnly,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Terse,
    Standard,
    Detailed,
}

/// Execution behavior bundle selected by priority.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BehaviorProfile {
    pub max_analysis_time_secs: u64,
    pub use_chain_of_thought: bool,
    pub show_thinking: bool,
    pub parallel_execution: bool,
    pub auto_confirm_reads: bool,
    pub auto_confirm_writes: bool,
    pub max_commands_before_pause: u32,
    pub confirmation_mode: ConfirmationMode,
    pub response_format: ResponseFormat,
    pub include_next_steps: bool,
    pub include_explanations: bool,
}

impl BehaviorProfile {
    /// Whether a command needs interactive confirmation.
    pub fn should_confirm(&self, is_write: bool, is_critical: bool) -> bool {
        match self.confirmation_mode {
            ConfirmationMode::None => false,
            ConfirmationMode::CriticalOnly => is_critical,
            ConfirmationMode::WritesOnly => is_write,
            ConfirmationMode::All => true,
        }
    }

    /// Whether confirmation may be granted automatically.
    pub fn should_auto_confirm(&self, is_write: bool) -> bool {
        if is_write {
            self.auto_confirm_writes
        } else {
            self.auto_confirm_reads
        }
    }
}

/// P0: act fast, minimal friction.
const P0_PROFILE: BehaviorProfile = BehaviorProfile {
    max_analysis_time_secs: 5,
    use_chain_of_thought: false,
    show_thinking: false,
    parallel_execution: true,
    auto_confirm_reads: true,
    auto_confirm_writes: false,
    max_commands_before_pause: 10,
    confirmation_mode: ConfirmationMode::CriticalOnly,
    response_format: ResponseFormat::Terse,
    include_next_steps: true,
    include_explanations: false,
};

/// P1: quick but thoughtful.
const P1_PROFILE: BehaviorProfile = BehaviorProfile {
    max_analysis_time_secs: 30,
    use_chain_of_thought: true,
    show_thinking: false,
    parallel_execution: true,
    auto_confirm_reads: true,
    auto_confirm_writes: false,
    max_commands_before_pause: 8,
    confirmation_mode: ConfirmationMode::CriticalOnly,
    response_format: ResponseFormat::Standard,
    include_next_steps: true,
    include_explanations: false,
};

/// P2: thorough analysis.
const P2_PROFILE: BehaviorProfile = BehaviorProfile {
    max_analysis_time_secs: 120,
    use_chain_of_thought: true,
    show_thinking: true,
    parallel_execution: false,
    auto_confirm_reads: true,
    auto_confirm_writes: false,
    max_commands_before_pause: 5,
    confirmation_mode: ConfirmationMode::WritesOnly,
    response_format: ResponseFormat::Detailed,
    include_next_steps: true,
    include_explanations: true,
};

/// P3: full analysis, careful execution (maintenance mode).
const P3_PROFILE: BehaviorProfile = BehaviorProfile {
    max_analysis_time_secs: 300,
    use_chain_of_thought: true,
    show_thinking: true,
    parallel_execution: false,
    auto_confirm_reads: false,
    auto_confirm_writes: false,
    max_commands_before_pause: 3,
    confirmation_mode: ConfirmationMode::All,
    response_format: ResponseFormat::Detailed,
    include_next_steps: false,
    include_explanations: true,
};

pub fn get_behavior(priority: Priority) -> BehaviorProfile {
    match priority {
        Priority::P0 => P0_PROFILE,
        Priority::P1 => P1_PROFILE,
        Priority::P2 => P2_PROFILE,
        Priority::P3 => P3_PROFILE,
    }
}

/// Human-readable one-liner for the triage banner.
pub fn describe_behavior(priority: Priority) -> String {
    let behavior = get_behavior(priority);
    let mode = match priority {
        Priority::P0 => "FAST MODE: auto-confirming read commands",
        Priority::P1 => "QUICK MODE: auto-confirming reads",
        Priority::P2 => "THOROUGH MODE: confirming write commands",
        Priority::P3 => "CAREFUL MODE: confirming all commands",
    };
    format!(
        "{mode}, max {} commands before pause",
        behavior.max_commands_before_pause
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_table_matches_contract() {
        let cases = [
            (Priority::P0, 5, false, false, true, true, false, 10, ConfirmationMode::CriticalOnly, ResponseFormat::Terse),
            (Priority::P1, 30, true, false, true, true, false, 8, ConfirmationMode::CriticalOnly, ResponseFormat::Standard),
            (Priority::P2, 120, true, true, false, true, false, 5, ConfirmationMode::WritesOnly, ResponseFormat::Detailed),
            (Priority::P3, 300, true, true, false, false, false, 3, ConfirmationMode::All, ResponseFormat::Detailed),
        ];
        for (priority, secs, cot, thinking, parallel, reads, writes, max_cmds, mode, format) in cases {
            let b = get_behavior(priority);
            assert_eq!(b.max_analysis_time_secs, secs, "{priority}");
            assert_eq!(b.use_chain_of_thought, cot, "{priority}");
            assert_eq!(b.show_thinking, thinking, "{priority}");
            assert_eq!(b.parallel_execution, parallel, "{priority}");
            assert_eq!(b.auto_confirm_reads, reads, "{priority}");
            assert_eq!(b.auto_confirm_writes, writes, "{priority}");
            assert_eq!(b.max_commands_before_pause, max_cmds, "{priority}");
            assert_eq!(b.confirmation_mode, mode, "{priority}");
            assert_eq!(b.response_format, format, "{priority}");
        }
    }

    #[test]
    fn confirmation_modes() {
        let p0 = get_behavior(Priority::P0);
        assert!(!p0.should_confirm(true, false));
        assert!(p0.should_confirm(true, true));

        let p2 = get_behavior(Priority::P2);
        assert!(p2.should_confirm(true, false));
        assert!(!p2.should_confirm(false, false));

        let p3 = get_behavior(Priority::P3);
        assert!(p3.should_confirm(false, false));
    }

    #[test]
    fn auto_confirm_follows_flags() {
        let p0 = get_behavior(Priority::P0);
        assert!(p0.should_auto_confirm(false));
        assert!(!p0.should_auto_confirm(true));

        let p3 = get_behavior(Priority::P3);
        assert!(!p3.should_auto_confirm(false));
    }
}
