//! Network maintenance tools.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::builtins::{arg, require, run_gated, shell_quote};
use crate::context::ToolContext;
use crate::{Tool, ToolOutput, ToolParam, ToolSpec};

pub struct AddRouteTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for AddRouteTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "add_route".to_string(),
            description: "Add an IP route on a host.".to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::required("destination", "Destination network, e.g. 10.1.0.0/16"),
                ToolParam::required("gateway", "Gateway address"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let destination = match require(args, "destination") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let gateway = match require(args, "gateway") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let valid = |s: &str| {
            s.chars()
                .all(|c| c.is_ascii_hexdigit() || matches!(c, '.' | ':' | '/'))
        };
        if !valid(destination) || !valid(gateway) {
            return Ok(ToolOutput::fail("invalid destination or gateway"));
        }

        let command = format!("ip route add {destination} via {gateway}");
        Ok(run_gated(&self.ctx, host, &command, 20).await)
    }
}

pub struct AnalyzeSecurityLogsTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for AnalyzeSecurityLogsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "analyze_security_logs".to_string(),
            description: "Scan auth logs on a host for failed logins and suspicious entries."
                .to_string(),
            params: vec![
                ToolParam::required("host", "Target host"),
                ToolParam::optional("pattern", "Extra pattern to search for"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let host = match require(args, "host") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };

        // auth.log on Debian-family, secure on RHEL-family.
        let mut command = "grep -ihE 'failed|invalid|refused|break-in' \
                           /var/log/auth.log /var/log/secure 2>/dev/null | tail -50"
            .to_string();
        if let Some(pattern) = arg(args, "pattern") {
            command = format!(
                "grep -ihF {} /var/log/auth.log /var/log/secure 2>/dev/null | tail -50",
                shell_quote(pattern)
            );
        }
        Ok(run_gated(&self.ctx, host, &command, 30).await)
    }
}
