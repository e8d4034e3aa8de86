//! Command execution: risk assessment, local/SSH execution, credential
//! prompting, redaction, and the auto-correction loop.

mod corrector;
mod credentials;
mod executor;
mod redact;
mod risk;
mod ssh;

pub use corrector::{ActionContext, AutoCorrector, Correction, RetryInfo};
pub use credentials::CredentialPrompter;
pub use executor::{
    ActionExecutor, ActionRequest, EXIT_INTERNAL, ExecOptions, ExecutionResult,
};
pub use redact::redact_sensitive_info;
pub use risk::{Risk, RiskAssessor, RiskLevel};
pub use ssh::{RemoteOutput, SshConnection, SshTarget};
