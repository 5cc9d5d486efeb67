//! Ready-made collaborator implementations.
//!
//! | Concern | Implementation |
//! |---|---|
//! | Prompt store | [`InMemoryPromptStore`] |
//! | Tracing | [`LogTracingRecorder`] |
//! | Post-action | [`CreateChildrenAction`] |
//! | Recovery | [`FixedRecovery`], [`HumanPromptRegistry`] |
//! | Action preview | [`AutoConfirm`], [`HumanPromptRegistry`] |
//! | Observer | [`BroadcastObserver`] |

pub mod create_children;
pub mod in_memory_store;
pub mod observer;
pub mod prompts;
pub mod tracing_recorder;

pub use create_children::{CreateChildrenAction, CREATE_CHILDREN};
pub use in_memory_store::InMemoryPromptStore;
pub use observer::BroadcastObserver;
pub use prompts::{AutoConfirm, FixedRecovery, HumanPromptRegistry, PromptRequest};
pub use tracing_recorder::LogTracingRecorder;
