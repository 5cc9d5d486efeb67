//! Template variables for a node's generation call.
//!
//! The mapping is rebuilt before every generation attempt from the run's
//! history and the current clock; it is never cached across attempts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::types::{CallerIdentity, HistoryEntry, PromptNode};

/// Resolved variables for one generation call.
pub type Variables = BTreeMap<String, String>;

pub const CASCADE_PREVIOUS_RESPONSE: &str = "cascade_previous_response";
pub const CASCADE_PREVIOUS_NAME: &str = "cascade_previous_name";
pub const CASCADE_ALL_RESPONSES: &str = "cascade_all_responses";
pub const CASCADE_LEVEL: &str = "cascade_level";
pub const CASCADE_PROMPT_COUNT: &str = "cascade_prompt_count";
pub const PARENT_NAME: &str = "q.parent.name";

/// A node executed earlier in this run, exposed as `q.ref[<id>].*`.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReference {
    pub node_id: String,
    pub name: String,
    pub response: String,
    pub extracted_json: Option<Value>,
    pub variables: BTreeMap<String, String>,
}

impl NodeReference {
    pub fn new(node: &PromptNode, response: &str, extracted_json: Option<Value>) -> Self {
        Self {
            node_id: node.id.clone(),
            name: node.display_name().to_string(),
            response: response.to_string(),
            extracted_json,
            variables: node.variables.clone(),
        }
    }
}

/// Everything the builder reads. Borrowed from run state.
#[derive(Debug, Clone)]
pub struct VariableInputs<'a> {
    pub history: &'a [HistoryEntry],
    pub references: &'a [NodeReference],
    pub caller: &'a CallerIdentity,
    pub top_level_name: &'a str,
    pub parent_name: Option<&'a str>,
    /// Level of the node about to run.
    pub level: u32,
    /// Runnable nodes in the cascade.
    pub prompt_count: u32,
    pub now: DateTime<Utc>,
}

impl VariableInputs<'_> {
    /// Build the mapping for `node`. Node-scoped stored variables are
    /// applied last and win on key collision.
    pub fn build(&self, node: &PromptNode) -> Variables {
        let mut vars = Variables::new();

        // System
        stamp_clock(&mut vars, self.now);
        vars.insert("q.user.name".into(), self.caller.name.clone());
        vars.insert("q.user.email".into(), self.caller.email.clone());
        vars.insert("q.toplevel.name".into(), self.top_level_name.to_string());
        vars.insert(
            PARENT_NAME.into(),
            self.parent_name.unwrap_or_default().to_string(),
        );

        // Cascade state
        let last = self.history.last();
        vars.insert(
            CASCADE_PREVIOUS_RESPONSE.into(),
            last.map(|h| h.response_text.clone()).unwrap_or_default(),
        );
        vars.insert(
            CASCADE_PREVIOUS_NAME.into(),
            last.map(|h| h.node_name.clone()).unwrap_or_default(),
        );
        vars.insert(
            CASCADE_ALL_RESPONSES.into(),
            all_responses(self.history).to_string(),
        );
        vars.insert(CASCADE_LEVEL.into(), self.level.to_string());
        vars.insert(CASCADE_PROMPT_COUNT.into(), self.prompt_count.to_string());

        // References. Stored variables first so the result fields win.
        for r in self.references {
            for (key, value) in &r.variables {
                vars.insert(format!("q.ref[{}].{key}", r.node_id), value.clone());
            }
            vars.insert(format!("q.ref[{}].name", r.node_id), r.name.clone());
            vars.insert(format!("q.ref[{}].response", r.node_id), r.response.clone());
            if let Some(json) = &r.extracted_json {
                vars.insert(format!("q.ref[{}].json", r.node_id), json.to_string());
            }
        }

        for (key, value) in &node.variables {
            vars.insert(key.clone(), value.clone());
        }
        vars
    }
}

fn all_responses(history: &[HistoryEntry]) -> Value {
    Value::Array(
        history
            .iter()
            .map(|h| {
                json!({
                    "level": h.level,
                    "name": h.node_name,
                    "response": h.response_text,
                })
            })
            .collect(),
    )
}

/// Set `q.today` and `q.now`.
pub fn stamp_clock(vars: &mut Variables, now: DateTime<Utc>) {
    vars.insert("q.today".into(), now.format("%Y-%m-%d").to_string());
    vars.insert("q.now".into(), now.to_rfc3339());
}

/// Variables for an action-created child: the parent's resolved mapping
/// with the clock restamped at `now`, then the child's own stored
/// variables, then `q.parent.name`.
pub fn inherit_variables(
    parent_vars: &Variables,
    child: &PromptNode,
    parent_name: &str,
    now: DateTime<Utc>,
) -> Variables {
    let mut vars = parent_vars.clone();
    stamp_clock(&mut vars, now);
    for (key, value) in &child.variables {
        vars.insert(key.clone(), value.clone());
    }
    vars.insert(PARENT_NAME.into(), parent_name.to_string());
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(level: u32, id: &str, response: &str) -> HistoryEntry {
        HistoryEntry {
            level,
            node_id: id.into(),
            node_name: format!("Node {id}"),
            response_text: response.into(),
            skipped: false,
        }
    }

    fn inputs<'a>(
        history: &'a [HistoryEntry],
        refs: &'a [NodeReference],
        caller: &'a CallerIdentity,
    ) -> VariableInputs<'a> {
        VariableInputs {
            history,
            references: refs,
            caller,
            top_level_name: "Top",
            parent_name: Some("Parent"),
            level: 2,
            prompt_count: 7,
            now: Utc.with_ymd_and_hms(2024, 3, 9, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn empty_history_yields_empty_previous() {
        let caller = CallerIdentity::new("u1", "Ada", "ada@example.com");
        let vars = inputs(&[], &[], &caller).build(&PromptNode::new("n", "N"));
        assert_eq!(vars[CASCADE_PREVIOUS_RESPONSE], "");
        assert_eq!(vars[CASCADE_PREVIOUS_NAME], "");
        assert_eq!(vars[CASCADE_ALL_RESPONSES], "[]");
        assert_eq!(vars["q.today"], "2024-03-09");
        assert_eq!(vars["q.user.name"], "Ada");
        assert_eq!(vars["q.user.email"], "ada@example.com");
        assert_eq!(vars["q.toplevel.name"], "Top");
        assert_eq!(vars[PARENT_NAME], "Parent");
        assert_eq!(vars[CASCADE_LEVEL], "2");
        assert_eq!(vars[CASCADE_PROMPT_COUNT], "7");
    }

    #[test]
    fn all_responses_tracks_history_in_order() {
        let caller = CallerIdentity::default();
        let history = vec![entry(0, "a", "first"), entry(1, "b", "second")];
        let vars = inputs(&history, &[], &caller).build(&PromptNode::new("n", "N"));

        let all: Vec<Value> = serde_json::from_str(&vars[CASCADE_ALL_RESPONSES]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["response"], "first");
        assert_eq!(all[1]["name"], "Node b");
        assert_eq!(all[1]["level"], 1);
        assert_eq!(vars[CASCADE_PREVIOUS_RESPONSE], "second");
        assert_eq!(vars[CASCADE_PREVIOUS_NAME], "Node b");
    }

    #[test]
    fn references_expose_results_and_stored_variables() {
        let caller = CallerIdentity::default();
        let source = PromptNode::new("a", "Alpha")
            .with_variable("tone", "dry")
            .with_variable("response", "shadowed");
        let refs = vec![NodeReference::new(
            &source,
            "alpha says hi",
            Some(serde_json::json!({"k": 1})),
        )];
        let vars = inputs(&[], &refs, &caller).build(&PromptNode::new("n", "N"));
        assert_eq!(vars["q.ref[a].name"], "Alpha");
        assert_eq!(vars["q.ref[a].response"], "alpha says hi");
        assert_eq!(vars["q.ref[a].json"], r#"{"k":1}"#);
        assert_eq!(vars["q.ref[a].tone"], "dry");
    }

    #[test]
    fn node_variables_override_context() {
        let caller = CallerIdentity::new("u1", "Ada", "");
        let history = vec![entry(0, "a", "first")];
        let node = PromptNode::new("n", "N")
            .with_variable(CASCADE_PREVIOUS_RESPONSE, "pinned")
            .with_variable("custom", "x");
        let vars = inputs(&history, &[], &caller).build(&node);
        assert_eq!(vars[CASCADE_PREVIOUS_RESPONSE], "pinned");
        assert_eq!(vars["custom"], "x");
    }

    #[test]
    fn children_inherit_parent_variables() {
        let mut parent_vars = Variables::new();
        parent_vars.insert("shared".into(), "parent".into());
        parent_vars.insert("topic".into(), "parent".into());
        parent_vars.insert(PARENT_NAME.into(), "Grandparent".into());
        parent_vars.insert("q.today".into(), "2024-03-08".into());

        let child = PromptNode::new("c", "Child").with_variable("topic", "child");
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 8, 0, 0).unwrap();
        let vars = inherit_variables(&parent_vars, &child, "Parent", now);
        assert_eq!(vars["shared"], "parent");
        assert_eq!(vars["topic"], "child");
        assert_eq!(vars[PARENT_NAME], "Parent");
        assert_eq!(vars["q.today"], "2024-03-09");
        assert_eq!(vars["q.now"], now.to_rfc3339());
    }
}
