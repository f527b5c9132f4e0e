//! In-process engine for tracking container mutations reachable through a
//! watched field (see `SPEC_FULL.md` for the full design).
//!
//! The public surface is [`Agent`]: construct one per test, or use
//! [`Agent::global`] for the process-wide singleton a real instrumentation
//! hookup would call into.

pub mod catalog;
pub mod config;
pub mod container_lock;
pub mod error;
pub mod history;
pub mod identity;
pub mod locator;
pub mod model;
pub mod multiset;
pub mod rewriter;
pub mod runtime;
pub mod stack;

pub use catalog::{SeedClass, TrackedCatalog};
pub use config::Config;
pub use container_lock::{ContainerLock, ContainerLockTable};
pub use error::{FieldwatchError, Result};
pub use history::{ContainerModification, FieldModification, HistoryStore};
pub use identity::{IdentityKey, MapEntryKey, ObjectRef};
pub use locator::{FieldKey, FieldLocator};
pub use model::{
    ClassModel, ContainerFamily, FieldSignature, InstrumentationPlan, MethodKind, MethodSignature, StaticClassModel,
};
pub use multiset::{delta, DeltaEntry, Multiset};
pub use rewriter::ClassRewriter;
pub use runtime::{Agent, AgentRuntime};
pub use stack::{NativeStackCapture, StackCapture, StackFrame, SyntheticStackCapture};
