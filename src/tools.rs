//! Tool surface for the matching and analysis operations.
//!
//! Each operation exposed to calling agents is a [`Tool`] registered in a
//! [`ToolRegistry`] and dispatched by name from the HTTP server. Tools
//! validate their parameters, invoke the core components through the shared
//! [`ToolContext`], and return a JSON result.
//!
//! The matcher's embedding-comparison loop is the only potentially slow
//! step, so the matching and analysis tools wrap it in the configured
//! timeout.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::feasibility::FeasibilityAnalyzer;
use crate::matcher::EligibilityMatcher;
use crate::models::DemographicsSummary;
use crate::retrieval::{search_trials, TrialFilter};
use crate::store::Store;

/// Shared state handed to every tool execution.
pub struct ToolContext {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub embedder: Arc<dyn Embedder>,
    pub matcher: Arc<EligibilityMatcher>,
    pub analyzer: Arc<FeasibilityAnalyzer>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>, store: Arc<Store>) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let matcher = Arc::new(EligibilityMatcher::from_config(
            embedder.clone(),
            &config.matching,
        ));
        let analyzer = Arc::new(FeasibilityAnalyzer::new(&config.feasibility));

        Ok(Self {
            config,
            store,
            embedder,
            matcher,
            analyzer,
        })
    }

    fn match_timeout(&self) -> Duration {
        Duration::from_secs(self.config.matching.timeout_secs)
    }
}

/// An operation agents can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name, used as the route path (`POST /tools/{name}`).
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// OpenAI function-calling style parameter schema.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry preloaded with the built-in matching and analysis tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTrialsTool));
        registry.register(Box::new(FindEligiblePatientsTool));
        registry.register(Box::new(AnalyzeTrialsTool));
        registry.register(Box::new(GetPatientTool));
        registry.register(Box::new(GetTrialTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Parameter helpers ============

fn required_str(params: &Value, key: &str) -> Result<String> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => bail!("parameter '{}' must not be empty", key),
    }
}

fn required_i64(params: &Value, key: &str) -> Result<i64> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| anyhow::anyhow!("parameter '{}' must be an integer", key))
}

fn optional_i64(params: &Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn optional_str_list(params: &Value, key: &str) -> Result<Vec<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => {
            let mut out = Vec::new();
            for item in items {
                match item.as_str() {
                    Some(s) => out.push(s.to_string()),
                    None => bail!("parameter '{}' must be an array of strings", key),
                }
            }
            Ok(out)
        }
        Some(_) => bail!("parameter '{}' must be an array of strings", key),
    }
}

// ============ search_trials ============

struct SearchTrialsTool;

#[async_trait]
impl Tool for SearchTrialsTool {
    fn name(&self) -> &str {
        "search_trials"
    }

    fn description(&self) -> &str {
        "Semantic search over indexed clinical trials"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Free-text search query" },
                "top_k": { "type": "integer", "description": "Maximum number of trials to return" },
                "phase": { "type": "string", "description": "Filter by trial phase" },
                "status": { "type": "string", "description": "Filter by overall status" },
                "min_enrollment": { "type": "integer", "description": "Minimum enrollment target" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let top_k = optional_i64(&params, "top_k")
            .unwrap_or(ctx.config.retrieval.final_limit)
            .max(1) as usize;

        let filter = TrialFilter {
            phase: optional_str(&params, "phase"),
            status: optional_str(&params, "status"),
            min_enrollment: optional_i64(&params, "min_enrollment"),
        };
        let filter_opt = if filter.is_empty() { None } else { Some(&filter) };

        let hits = search_trials(
            &ctx.store,
            ctx.embedder.as_ref(),
            &query,
            top_k,
            ctx.config.retrieval.candidate_k as usize,
            filter_opt,
        )
        .await?;

        Ok(json!({ "query": query, "trials": hits }))
    }
}

// ============ find_eligible_patients ============

struct FindEligiblePatientsTool;

#[async_trait]
impl Tool for FindEligiblePatientsTool {
    fn name(&self) -> &str {
        "find_eligible_patients"
    }

    fn description(&self) -> &str {
        "Find patients matching an age band and required conditions"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "age_min": { "type": "integer", "description": "Minimum patient age, inclusive" },
                "age_max": { "type": "integer", "description": "Maximum patient age, inclusive" },
                "required_conditions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Conditions every eligible patient must match semantically"
                },
                "limit": { "type": "integer", "description": "Maximum number of patients to return" }
            },
            "required": ["age_min", "age_max"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let age_min = required_i64(&params, "age_min")?;
        let age_max = required_i64(&params, "age_max")?;
        if age_min > age_max {
            bail!("parameter 'age_min' must not exceed 'age_max'");
        }
        let required = optional_str_list(&params, "required_conditions")?;
        let limit = optional_i64(&params, "limit").unwrap_or(10).max(1) as usize;

        let patients = tokio::time::timeout(
            ctx.match_timeout(),
            ctx.matcher
                .find_eligible_patients(&ctx.store, age_min, age_max, &required, limit),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "matching timed out after {}s",
                ctx.config.matching.timeout_secs
            )
        })??;

        let demographics = DemographicsSummary::summarize(&patients);

        Ok(json!({
            "criteria": {
                "age_min": age_min,
                "age_max": age_max,
                "required_conditions": required,
                "limit": limit,
            },
            "demographics_summary": demographics,
            "patients": patients,
        }))
    }
}

// ============ analyze_trials_and_match_patients ============

struct AnalyzeTrialsTool;

#[async_trait]
impl Tool for AnalyzeTrialsTool {
    fn name(&self) -> &str {
        "analyze_trials_and_match_patients"
    }

    fn description(&self) -> &str {
        "Retrieve similar trials, infer criteria, and score recruitment feasibility"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Free-text trial description" },
                "top_k_trials": { "type": "integer", "description": "Size of the retrieved trial sample" },
                "max_patients": { "type": "integer", "description": "Cap on the matched patient set" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let top_k = optional_i64(&params, "top_k_trials").unwrap_or(5).max(1) as usize;
        let max_patients = optional_i64(&params, "max_patients").map(|v| v.max(1) as usize);

        let hits = search_trials(
            &ctx.store,
            ctx.embedder.as_ref(),
            &query,
            top_k,
            ctx.config.retrieval.candidate_k as usize,
            None,
        )
        .await?;

        // Enrich hits with the stored trial rows (studied conditions).
        let ids: Vec<String> = hits.iter().map(|h| h.nct_id.clone()).collect();
        let conditions_by_id: HashMap<String, String> = ctx
            .store
            .trials_by_ids(&ids)
            .await?
            .into_iter()
            .map(|t| (t.nct_id, t.conditions))
            .collect();

        let similar_trials: Vec<Value> = hits
            .iter()
            .map(|hit| {
                json!({
                    "nct_id": hit.nct_id,
                    "score": hit.score,
                    "snippet": hit.snippet,
                    "conditions": conditions_by_id.get(&hit.nct_id),
                    "metadata": hit.metadata,
                })
            })
            .collect();

        let report = tokio::time::timeout(
            ctx.match_timeout(),
            ctx.analyzer
                .analyze(&hits, max_patients, &ctx.matcher, &ctx.store),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "matching timed out after {}s",
                ctx.config.matching.timeout_secs
            )
        })??;

        Ok(json!({
            "inferred_criteria": report.criteria,
            "similar_trials": similar_trials,
            "patient_recruitment": {
                "demographics_summary": report.demographics,
                "matched_patients": report.matched_patients,
                "feasibility": report.feasibility,
            },
        }))
    }
}

// ============ get_patient ============

struct GetPatientTool;

#[async_trait]
impl Tool for GetPatientTool {
    fn name(&self) -> &str {
        "get_patient"
    }

    fn description(&self) -> &str {
        "Fetch a patient's demographics and observed conditions"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patient_id": { "type": "string", "description": "Patient identifier" }
            },
            "required": ["patient_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let patient_id = required_str(&params, "patient_id")?;

        let patient = match ctx.store.get_patient(&patient_id).await? {
            Some(p) => p,
            None => bail!("patient not found: {}", patient_id),
        };

        let conditions = ctx
            .store
            .conditions_for_patients(&[patient_id.clone()])
            .await?
            .remove(&patient_id)
            .unwrap_or_default();

        Ok(json!({ "patient": patient, "conditions": conditions }))
    }
}

// ============ get_trial ============

struct GetTrialTool;

#[async_trait]
impl Tool for GetTrialTool {
    fn name(&self) -> &str {
        "get_trial"
    }

    fn description(&self) -> &str {
        "Fetch a trial's full text and studied conditions"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "nct_id": { "type": "string", "description": "Trial registry identifier" }
            },
            "required": ["nct_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let nct_id = required_str(&params, "nct_id")?;

        let trial = match ctx.store.get_trial(&nct_id).await? {
            Some(t) => t,
            None => bail!("trial not found: {}", nct_id),
        };

        Ok(json!({ "trial": trial }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 5);
        assert!(registry.find("search_trials").is_some());
        assert!(registry.find("find_eligible_patients").is_some());
        assert!(registry.find("analyze_trials_and_match_patients").is_some());
        assert!(registry.find("get_patient").is_some());
        assert!(registry.find("get_trial").is_some());
        assert!(registry.find("unknown").is_none());
    }

    #[test]
    fn test_param_helpers() {
        let params = json!({
            "query": "melanoma",
            "blank": "  ",
            "age_min": 40,
            "required_conditions": ["a", "b"],
        });

        assert_eq!(required_str(&params, "query").unwrap(), "melanoma");
        assert!(required_str(&params, "blank").is_err());
        assert!(required_str(&params, "missing").is_err());
        assert_eq!(required_i64(&params, "age_min").unwrap(), 40);
        assert!(required_i64(&params, "query").is_err());
        assert_eq!(
            optional_str_list(&params, "required_conditions").unwrap(),
            vec!["a", "b"]
        );
        assert!(optional_str_list(&params, "missing").unwrap().is_empty());
        assert!(optional_str_list(&json!({"x": [1]}), "x").is_err());
    }
}
