//! Inventory tools: host listing, scanning, context, audit.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::builtins::{arg, require, run_gated};
use crate::context::ToolContext;
use crate::{Tool, ToolOutput, ToolParam, ToolSpec};

/// Scan results are cached per `(host, scan_type)` with this TTL.
const SCAN_CACHE_TTL_SECS: i64 = 3600;

pub struct ListHostsTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for ListHostsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_hosts".to_string(),
            description: "List known hosts from the inventory, optionally filtered.".to_string(),
            params: vec![
                ToolParam::optional("pattern", "Substring to match on hostname/alias/IP"),
                ToolParam::optional("environment", "Filter by environment (prod, staging, dev)"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let hosts = self
            .ctx
            .store
            .search_hosts(arg(args, "pattern"), arg(args, "environment"), None, None, None, Some(200))
            .await?;
        if hosts.is_empty() {
            return Ok(ToolOutput::ok("No hosts in inventory match the filters."));
        }

        let mut lines = vec![format!("{} host(s):", hosts.len())];
        for host in hosts {
            let mut line = format!("- {}", host.hostname);
            if let Some(ip) = &host.ip_address {
                line.push_str(&format!(" ({ip})"));
            }
            if let Some(env) = &host.environment {
                line.push_str(&format!(" env={env}"));
            }
            if let Some(service) = &host.service {
                line.push_str(&format!(" service={service}"));
            }
            line.push_str(&format!(" status={}", host.status));
            lines.push(line);
        }
        Ok(ToolOutput::ok(lines.join("\n")))
    }
}

pub struct ScanHostTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for ScanHostTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "scan_host".to_string(),
            description: "Collect basic system facts (OS, disk, memory, uptime) from a host. \
                          Results are cached."
                .to_string(),
            params: vec![ToolParam::required("hostname", "Host to scan")],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let hostname = match require(args, "hostname") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };

        if let Some(cached) = self
            .ctx
            .store
            .get_scan_cache_by_hostname(hostname, "basic")
            .await?
        {
            return Ok(ToolOutput::ok(format!(
                "(cached until {})\n{}",
                cached.expires_at,
                cached.data.get("report").and_then(|v| v.as_str()).unwrap_or("")
            )));
        }

        let output = run_gated(
            &self.ctx,
            hostname,
            "uname -a; uptime; df -h /; free -m | head -2",
            30,
        )
        .await;

        if output.success {
            self.ctx
                .store
                .set_scan_cache_by_hostname(
                    hostname,
                    "basic",
                    &json!({"report": output.output}),
                    SCAN_CACHE_TTL_SECS,
                )
                .await?;
        }
        Ok(output)
    }
}

pub struct GetInfrastructureContextTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for GetInfrastructureContextTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_infrastructure_context".to_string(),
            description: "Summarize the known infrastructure: host counts, environments, \
                          relations, local machine context."
                .to_string(),
            params: vec![],
        }
    }

    async fn run(&self, _args: &HashMap<String, String>) -> Result<ToolOutput> {
        let stats = self.ctx.store.get_stats().await?;
        let mut lines = vec![
            format!("Hosts: {}", stats.total_hosts),
            format!(
                "Relations: {} ({} validated)",
                stats.total_relations, stats.validated_relations
            ),
            format!("Cached scans: {}", stats.cached_scans),
        ];
        if !stats.by_environment.is_empty() {
            let envs: Vec<String> = stats
                .by_environment
                .iter()
                .map(|(env, count)| format!("{env}={count}"))
                .collect();
            lines.push(format!("By environment: {}", envs.join(", ")));
        }
        if let Some(context) = self.ctx.store.get_local_context().await? {
            lines.push(format!(
                "Local context: {} categories, scanned_at={}",
                context.categories.len(),
                context.scanned_at.as_deref().unwrap_or("never")
            ));
        }
        Ok(ToolOutput::ok(lines.join("\n")))
    }
}

pub struct AuditHostTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for AuditHostTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "audit_host".to_string(),
            description: "Read-only security audit of a host: logged-in users, recent logins, \
                          listening sockets."
                .to_string(),
            params: vec![ToolParam::required("target", "Host to audit")],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let target = match require(args, "target") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        Ok(run_gated(
            &self.ctx,
            target,
            "who; last -n 5 2>/dev/null | head -6; ss -tlnp 2>/dev/null | head -20",
            30,
        )
        .await)
    }
}

pub struct CheckPermissionsTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for CheckPermissionsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "check_permissions".to_string(),
            description: "Report the effective user and sudo capabilities on a target."
                .to_string(),
            params: vec![ToolParam::required("target", "Host to check")],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let target = match require(args, "target") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        Ok(run_gated(
            &self.ctx,
            target,
            "id; sudo -n -l 2>&1 | head -5",
            20,
        )
        .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use athena_exec::ActionExecutor;
    use athena_memory::{HostInput, InventoryStore};
    use athena_triage::{ErrorAnalyzer, Priority, get_behavior};

    async fn ctx() -> Arc<ToolContext> {
        let store = Arc::new(InventoryStore::open_in_memory().await.unwrap());
        let executor = Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())));
        let ctx = ToolContext::new(store, executor, None);
        ctx.reset_gate(get_behavior(Priority::P1), false);
        Arc::new(ctx)
    }

    #[tokio::test]
    async fn list_hosts_renders_inventory() {
        let ctx = ctx().await;
        let mut input = HostInput::named("web-01");
        input.ip_address = Some("10.0.0.1".to_string());
        input.environment = Some("prod".to_string());
        ctx.store.add_host(&input, None, "test").await.unwrap();

        let tool = ListHostsTool { ctx };
        let output = tool.run(&HashMap::new()).await.unwrap();
        assert!(output.success);
        assert!(output.output.contains("web-01"));
        assert!(output.output.contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn list_hosts_empty_inventory() {
        let ctx = ctx().await;
        let tool = ListHostsTool { ctx };
        let output = tool.run(&HashMap::new()).await.unwrap();
        assert!(output.success);
        assert!(output.output.contains("No hosts"));
    }

    #[tokio::test]
    async fn scan_host_requires_hostname() {
        let ctx = ctx().await;
        let tool = ScanHostTool { ctx };
        let output = tool.run(&HashMap::new()).await.unwrap();
        assert!(!output.success);
        assert!(output.output.contains("hostname"));
    }
}
