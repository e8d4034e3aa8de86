//! Knowledge and skill tools over the secondary store.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use athena_memory::SecondaryStore;

use crate::builtins::{arg, require};
use crate::context::ToolContext;
use crate::{Tool, ToolOutput, ToolParam, ToolSpec};

fn secondary(ctx: &ToolContext) -> Result<&Arc<SecondaryStore>, ToolOutput> {
    ctx.secondary.as_ref().ok_or_else(|| {
        ToolOutput::fail("knowledge store is not available in this configuration")
    })
}

pub struct RecordIncidentTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for RecordIncidentTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "record_incident".to_string(),
            description: "Record a new incident for future reference.".to_string(),
            params: vec![
                ToolParam::required("title", "Short summary of the incident"),
                ToolParam::required("priority", "Priority level (P0-P3)"),
                ToolParam::required("service", "Affected service, e.g. mongodb"),
                ToolParam::required("symptoms", "Comma-separated symptoms"),
                ToolParam::optional("description", "Detailed description"),
                ToolParam::optional("environment", "Environment (default prod)"),
                ToolParam::optional("host", "Affected hostname"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let store = match secondary(&self.ctx) {
            Ok(store) => store,
            Err(out) => return Ok(out),
        };
        let title = match require(args, "title") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let priority = arg(args, "priority").unwrap_or("P2");
        let service = arg(args, "service").unwrap_or("");
        let symptoms: Vec<String> = arg(args, "symptoms")
            .map(|s| s.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect())
            .unwrap_or_default();

        let id = store.record_incident(
            title,
            priority,
            service,
            arg(args, "environment").unwrap_or("prod"),
            arg(args, "host").unwrap_or(""),
            symptoms,
            arg(args, "description").unwrap_or(""),
        )?;
        Ok(ToolOutput::ok(format!("Incident recorded: {id}")))
    }
}

pub struct SearchKnowledgeTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for SearchKnowledgeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_knowledge".to_string(),
            description: "Search past incidents for similar problems and how they were solved."
                .to_string(),
            params: vec![
                ToolParam::required("query", "Symptoms or keywords"),
                ToolParam::optional("service", "Filter by service"),
                ToolParam::optional("limit", "Max results (default 3)"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let store = match secondary(&self.ctx) {
            Ok(store) => store,
            Err(out) => return Ok(out),
        };
        let query = match require(args, "query") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let limit = arg(args, "limit").and_then(|l| l.parse().ok()).unwrap_or(3);
        let incidents = store.find_similar_incidents(query, arg(args, "service"), limit)?;

        if incidents.is_empty() {
            return Ok(ToolOutput::ok("No relevant knowledge found."));
        }

        let mut lines = vec!["Similar past incidents:".to_string()];
        for incident in incidents {
            lines.push(format!(
                "- [{}] {} ({}, {})",
                incident.priority, incident.title, incident.service, incident.environment
            ));
            if !incident.symptoms.is_empty() {
                lines.push(format!("  symptoms: {}", incident.symptoms.join(", ")));
            }
            if let Some(solution) = &incident.solution {
                lines.push(format!("  solution: {solution}"));
            }
            if !incident.commands_executed.is_empty() {
                lines.push(format!("  commands: {}", incident.commands_executed.join(" && ")));
            }
        }
        Ok(ToolOutput::ok(lines.join("\n")))
    }
}

pub struct GetSolutionSuggestionTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for GetSolutionSuggestionTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_solution_suggestion".to_string(),
            description: "Suggest a solution based on the closest resolved past incident."
                .to_string(),
            params: vec![
                ToolParam::required("query", "Current problem description"),
                ToolParam::optional("service", "Filter by service"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let store = match secondary(&self.ctx) {
            Ok(store) => store,
            Err(out) => return Ok(out),
        };
        let query = match require(args, "query") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let incidents = store.find_similar_incidents(query, arg(args, "service"), 5)?;
        let solved = incidents.into_iter().find(|i| i.solution.is_some());

        match solved {
            Some(incident) => Ok(ToolOutput::ok(format!(
                "Closest resolved incident: {}\nSolution: {}{}",
                incident.title,
                incident.solution.unwrap_or_default(),
                if incident.commands_executed.is_empty() {
                    String::new()
                } else {
                    format!("\nCommands used: {}", incident.commands_executed.join(" && "))
                }
            ))),
            None => Ok(ToolOutput::ok(
                "No resolved incident matches; proceed with fresh diagnosis.",
            )),
        }
    }
}

pub struct GraphStatsTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for GraphStatsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "graph_stats".to_string(),
            description: "Statistics about stored knowledge (incidents, skills).".to_string(),
            params: vec![],
        }
    }

    async fn run(&self, _args: &HashMap<String, String>) -> Result<ToolOutput> {
        let store = match secondary(&self.ctx) {
            Ok(store) => store,
            Err(out) => return Ok(out),
        };
        Ok(ToolOutput::ok(format!(
            "incidents={} skills={}",
            store.incident_count()?,
            store.skill_count()?
        )))
    }
}

pub struct RememberSkillTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for RememberSkillTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "remember_skill".to_string(),
            description: "Save a named recipe of steps for reuse.".to_string(),
            params: vec![
                ToolParam::required("name", "Skill name, e.g. rotate-nginx-logs"),
                ToolParam::required("description", "What the skill does"),
                ToolParam::required("steps", "Newline-separated steps or commands"),
            ],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let store = match secondary(&self.ctx) {
            Ok(store) => store,
            Err(out) => return Ok(out),
        };
        let name = match require(args, "name") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        let description = arg(args, "description").unwrap_or("");
        let steps: Vec<String> = arg(args, "steps")
            .map(|s| s.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
            .unwrap_or_default();

        store.remember_skill(name, description, steps)?;
        Ok(ToolOutput::ok(format!("Skill remembered: {name}")))
    }
}

pub struct RecallSkillTool {
    pub ctx: Arc<ToolContext>,
}

#[async_trait]
impl Tool for RecallSkillTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "recall_skill".to_string(),
            description: "Recall a saved skill by name or keyword.".to_string(),
            params: vec![ToolParam::required("query", "Skill name or keyword")],
        }
    }

    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput> {
        let store = match secondary(&self.ctx) {
            Ok(store) => store,
            Err(out) => return Ok(out),
        };
        let query = match require(args, "query") {
            Ok(v) => v,
            Err(out) => return Ok(out),
        };
        match store.recall_skill(query)? {
            Some(skill) => Ok(ToolOutput::ok(format!(
                "{}: {}\nSteps:\n{}",
                skill.name,
                skill.description,
                skill
                    .steps
                    .iter()
                    .enumerate()
                    .map(|(i, s)| format!("{}. {s}", i + 1))
                    .collect::<Vec<_>>()
                    .join("\n")
            ))),
            None => Ok(ToolOutput::ok(format!("No skill found for '{query}'."))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use athena_exec::ActionExecutor;
    use athena_memory::InventoryStore;
    use athena_triage::ErrorAnalyzer;

    async fn ctx_with_secondary() -> Arc<ToolContext> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.redb");
        std::mem::forget(dir);
        let store = Arc::new(InventoryStore::open_in_memory().await.unwrap());
        let executor = Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())));
        let secondary = Arc::new(SecondaryStore::open(path).unwrap());
        Arc::new(ToolContext::new(store, executor, Some(secondary)))
    }

    fn args(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn record_then_search_round_trip() {
        let ctx = ctx_with_secondary().await;

        let record = RecordIncidentTool { ctx: Arc::clone(&ctx) };
        let output = record
            .run(&args(&[
                ("title", "MongoDB down on prod"),
                ("priority", "P0"),
                ("service", "mongodb"),
                ("symptoms", "connection refused, replica lag"),
            ]))
            .await
            .unwrap();
        assert!(output.success);

        let search = SearchKnowledgeTool { ctx: Arc::clone(&ctx) };
        let output = search
            .run(&args(&[("query", "mongodb connection refused")]))
            .await
            .unwrap();
        assert!(output.success);
        assert!(output.output.contains("MongoDB down on prod"));

        let stats = GraphStatsTool { ctx };
        let output = stats.run(&HashMap::new()).await.unwrap();
        assert!(output.output.contains("incidents=1"));
    }

    #[tokio::test]
    async fn skills_round_trip() {
        let ctx = ctx_with_secondary().await;
        let remember = RememberSkillTool { ctx: Arc::clone(&ctx) };
        remember
            .run(&args(&[
                ("name", "flush-dns"),
                ("description", "Flush the resolver cache"),
                ("steps", "resolvectl flush-caches"),
            ]))
            .await
            .unwrap();

        let recall = RecallSkillTool { ctx };
        let output = recall.run(&args(&[("query", "dns")])).await.unwrap();
        assert!(output.output.contains("flush-dns"));
    }

    #[tokio::test]
    async fn missing_secondary_store_degrades() {
        let store = Arc::new(InventoryStore::open_in_memory().await.unwrap());
        let executor = Arc::new(ActionExecutor::new(Arc::new(ErrorAnalyzer::new())));
        let ctx = Arc::new(ToolContext::new(store, executor, None));

        let tool = SearchKnowledgeTool { ctx };
        let output = tool.run(&args(&[("query", "anything")])).await.unwrap();
        assert!(!output.success);
        assert!(output.output.contains("not available"));
    }
}
