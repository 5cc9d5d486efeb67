//! JSON Schema generation for the public cascade types.
//!
//! This module is only available when the `schemars` feature is enabled.

use std::collections::BTreeMap;

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// Generate JSON Schema for a single type.
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_default()
}

/// Generate all cascade type schemas, keyed by type name.
pub fn all_schemas() -> BTreeMap<String, Value> {
    let mut schemas = BTreeMap::new();

    // types/node.rs
    schemas.insert("NodeType".into(), schema_of::<crate::NodeType>());
    schemas.insert("PromptNode".into(), schema_of::<crate::PromptNode>());
    schemas.insert("PostActionConfig".into(), schema_of::<crate::PostActionConfig>());
    schemas.insert("ChildTemplate".into(), schema_of::<crate::ChildTemplate>());
    schemas.insert("ActionStatus".into(), schema_of::<crate::ActionStatus>());
    schemas.insert("ActionOutcome".into(), schema_of::<crate::ActionOutcome>());
    schemas.insert("ResultUpdate".into(), schema_of::<crate::ResultUpdate>());

    // types/generation.rs
    schemas.insert("GenerationRequest".into(), schema_of::<crate::GenerationRequest>());
    schemas.insert("GenerationOutput".into(), schema_of::<crate::GenerationOutput>());
    schemas.insert("GenerationFailure".into(), schema_of::<crate::GenerationFailure>());
    schemas.insert("GenerationEvent".into(), schema_of::<crate::GenerationEvent>());
    schemas.insert("TokenUsage".into(), schema_of::<crate::TokenUsage>());

    // types/execution.rs
    schemas.insert("RunStatus".into(), schema_of::<crate::RunStatus>());
    schemas.insert("RecoveryDecision".into(), schema_of::<crate::RecoveryDecision>());
    schemas.insert("CascadeProgress".into(), schema_of::<crate::CascadeProgress>());
    schemas.insert("CascadeReport".into(), schema_of::<crate::CascadeReport>());
    schemas.insert("NodeRunReport".into(), schema_of::<crate::NodeRunReport>());
    schemas.insert("RetryPolicy".into(), schema_of::<crate::RetryPolicy>());

    // event.rs, engine/error.rs, executor
    schemas.insert("CascadeEvent".into(), schema_of::<crate::CascadeEvent>());
    schemas.insert("CascadeError".into(), schema_of::<crate::CascadeError>());
    schemas.insert("ExecutorConfig".into(), schema_of::<crate::ExecutorConfig>());

    schemas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_schema_is_an_object() {
        let schemas = all_schemas();
        assert!(schemas.contains_key("CascadeEvent"));
        for (name, schema) in &schemas {
            assert!(schema.is_object(), "{name} schema is not an object");
        }
    }
}
