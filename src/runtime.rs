//! The agent's hot-path entry points and external control surface.
//!
//! [`AgentRuntime`] owns every piece of process-wide state (the catalog, the
//! history store, the container lock table, and configuration) and is the
//! thing instrumented bytecode would call into. [`Agent`] is a thin
//! `Arc`-backed handle around it: a passed-around context object behind a
//! tiny wrapper that keeps the singleton flavor while still letting tests
//! build isolated instances instead of sharing [`global`]'s process-wide
//! one.
//!
//! Every hot-path method is wrapped in [`guard`], which catches any panic so
//! a bug in this crate's own bookkeeping can never propagate into
//! instrumented application code: it is logged once and swallowed at the
//! outermost boundary.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use lazy_static::lazy_static;

use crate::catalog::{SeedClass, TrackedCatalog};
use crate::config::Config;
use crate::container_lock::ContainerLockTable;
use crate::error::FieldwatchError;
use crate::history::{ContainerModification, FieldModification, HistoryStore};
use crate::identity::IdentityKey;
use crate::locator::{FieldKey, FieldLocator};
use crate::model::{ClassModel, InstrumentationPlan};
use crate::multiset::{delta, Multiset};
use crate::rewriter::ClassRewriter;
use crate::stack::{NativeStackCapture, StackCapture};

/// Runs `body`, converting any panic into a logged, swallowed
/// [`FieldwatchError::HotPathException`] rather than letting it unwind into
/// the caller.
fn guard<R: Default>(entry_point: &str, body: impl FnOnce() -> R) -> R {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            let error = FieldwatchError::HotPathException {
                entry_point: entry_point.to_owned(),
                reason,
            };
            log::error!("{error}");
            R::default()
        }
    }
}

/// All process-wide engine state: the catalog, history store, lock table,
/// and the shared [`Config`] and [`StackCapture`] used to build records.
pub struct AgentRuntime {
    catalog: TrackedCatalog,
    history: HistoryStore,
    locks: ContainerLockTable,
    config: Config,
    stack_capture: Box<dyn StackCapture>,
}

impl Default for AgentRuntime {
    fn default() -> Self {
        AgentRuntime::new(Box::new(NativeStackCapture::default()))
    }
}

impl AgentRuntime {
    pub fn new(stack_capture: Box<dyn StackCapture>) -> Self {
        AgentRuntime {
            catalog: TrackedCatalog::new(),
            history: HistoryStore::new(),
            locks: ContainerLockTable::new(),
            config: Config::new(),
            stack_capture,
        }
    }

    pub fn catalog(&self) -> &TrackedCatalog {
        &self.catalog
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn locks(&self) -> &ContainerLockTable {
        &self.locks
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn capture_stack(&self, save_stack: bool) -> Vec<crate::stack::StackFrame> {
        if save_stack {
            self.stack_capture.capture()
        } else {
            Vec::new()
        }
    }

    /// Renders `plan` and writes it under `config.dump_dir()`, named per
    /// `Config::dump_file_name`. This crate has no real class bytes behind
    /// the `ClassModel` seam, so the plan's text rendering stands in for
    /// what a real backend would dump. Write failures are logged, not
    /// propagated: a dump is a debugging aid, never load-bearing for the
    /// hot path that produced the plan.
    fn dump_plan(&self, plan: &InstrumentationPlan) {
        let path = self.config.dump_dir().join(Config::dump_file_name(&plan.class_name));
        if let Err(err) = std::fs::write(&path, plan.render()) {
            log::error!("failed to write instrumentation dump to {}: {err}", path.display());
        }
    }

    // ---- hot-path entry points ----

    /// Called at an instrumented field-write site.
    ///
    /// `symbolic_owner` is the class name the bytecode at the write site
    /// names as the field's declaring class, which may be a subclass of
    /// the field's true owner. The steps:
    ///
    /// 1. Resolve the symbolic owner to the field's true declaring class
    ///    through the catalog; if it was never registered, there is
    ///    nothing to do.
    /// 2. If the new value is itself a container, register it (attaching a
    ///    fresh lock the first time it is seen) and ask the rewriter to
    ///    prepare its runtime class and every nestmate reachable from it,
    ///    idempotently.
    /// 3. Append a modification record if the field's key is currently
    ///    tracked, and if so, record this container as a tracker target so
    ///    its own later mutations get captured too.
    #[allow(clippy::too_many_arguments)]
    pub fn capture_field_write(
        &self,
        symbolic_owner: &str,
        field_name: &str,
        owning_object: Option<IdentityKey>,
        new_value: Option<IdentityKey>,
        new_value_model: Option<&dyn ClassModel>,
        resolve: &dyn Fn(&str) -> Option<Box<dyn ClassModel>>,
        save_stack: bool,
    ) {
        guard("captureFieldWrite", || {
            let owner_class = match self.catalog.lookup_owner(symbolic_owner, field_name) {
                Some(owner_class) => owner_class,
                None => return,
            };

            if let (Some(value), Some(model)) = (&new_value, new_value_model) {
                self.locks.lock_for(value);
                let plans = ClassRewriter::new(&self.catalog).rewrite_with_nestmates(model, resolve);
                if self.config.is_debug() {
                    for plan in &plans {
                        self.dump_plan(plan);
                    }
                }
            }

            let locator = match &owning_object {
                Some(owner) => FieldLocator::instance(&owner_class, field_name, owner.clone()),
                None => FieldLocator::static_field(&owner_class, field_name),
            };

            let stack = self.capture_stack(save_stack);
            let appended = self.history.append_field_modification(
                &locator,
                FieldModification {
                    stack,
                    container: new_value.clone(),
                },
            );
            if appended {
                if let Some(container) = new_value {
                    self.history.record_tracker(container, locator.key());
                }
            }
        })
    }

    /// Called by a `Documented`-kind mutator: the method's own return value
    /// already tells us exactly what changed, so no before/after snapshot
    /// is needed.
    pub fn capture_inline(&self, container: &IdentityKey, element: IdentityKey, is_addition: bool, save_stack: bool) {
        guard("captureInline", || {
            if !self.history.has_trackers(container) {
                return;
            }
            let stack = self.capture_stack(save_stack);
            self.history.append_container_modification(
                container,
                ContainerModification {
                    stack,
                    element,
                    is_addition,
                },
            );
        })
    }

    /// Wraps a `Default`-kind mutator call: snapshots `container` before
    /// invoking `call`, diffs against a fresh snapshot after, and records
    /// one [`ContainerModification`] per changed element, all while
    /// holding the container's lock.
    ///
    /// The lock is released even if `snapshot` or `call` panics, so a bug
    /// downstream of this call never leaves the container permanently
    /// locked; the panic itself is still caught and swallowed like every
    /// other hot-path entry point.
    pub fn capture_mutator<T: Default>(
        &self,
        container: &IdentityKey,
        synchronize: bool,
        save_stack: bool,
        snapshot: impl Fn() -> Multiset,
        call: impl FnOnce() -> T,
    ) -> T {
        self.locks.enter(container, synchronize);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let before = snapshot();
            let result = call();
            if self.history.has_trackers(container) {
                let after = snapshot();
                let stack = self.capture_stack(save_stack);
                for entry in delta(&before, &after) {
                    self.history.append_container_modification(
                        container,
                        ContainerModification {
                            stack: stack.clone(),
                            element: entry.element,
                            is_addition: entry.is_addition,
                        },
                    );
                }
            }
            result
        }));
        self.locks.leave(container, synchronize);

        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                log::error!(
                    "{}",
                    FieldwatchError::HotPathException {
                        entry_point: "captureMutator".to_owned(),
                        reason,
                    }
                );
                T::default()
            }
        }
    }

    // ---- external interfaces ----

    pub fn register_field(&self, owner_class: &str, field_name: &str, descriptor: &str, seeds: &[SeedClass]) {
        guard("registerField", || {
            self.catalog.register_field(owner_class, field_name, descriptor, seeds);
        })
    }

    pub fn set_tracking_enabled(&self, owner_class: &str, field_name: &str, enabled: bool) {
        guard("setTrackingEnabled", || {
            self.history
                .set_tracking_enabled(&FieldKey::new(owner_class, field_name), enabled);
        })
    }

    pub fn clear_history(&self, owner_class: &str, field_name: &str) {
        guard("clearHistory", || {
            self.history.clear_history(&FieldKey::new(owner_class, field_name));
        })
    }

    pub fn get_field_modifications(&self, locator: &FieldLocator) -> Vec<FieldModification> {
        guard("getFieldModifications", || self.history.field_modifications(locator))
    }

    pub fn get_container_modifications(&self, container: &IdentityKey) -> Vec<ContainerModification> {
        guard("getContainerModifications", || {
            self.history.container_modifications(container)
        })
    }

    pub fn get_field_stack(&self, locator: &FieldLocator, index: usize) -> Option<Vec<u8>> {
        guard("getFieldStack", || {
            self.history.field_modification_stack_blob(locator, index)
        })
    }

    pub fn get_container_stack(&self, container: &IdentityKey, index: usize) -> Option<Vec<u8>> {
        guard("getContainerStack", || {
            self.history.container_modification_stack_blob(container, index)
        })
    }

    /// A deliberately-not-real "watchpoint": records a field write with a
    /// synthetic stack, for callers (the demo binary, integration tests)
    /// that want to exercise the external API without driving a real
    /// rewrite+bytecode pipeline. Always saves a stack.
    pub fn emulate_field_watchpoint(
        &self,
        symbolic_owner: &str,
        field_name: &str,
        owning_object: Option<IdentityKey>,
        new_value: Option<IdentityKey>,
        new_value_model: Option<&dyn ClassModel>,
        resolve: &dyn Fn(&str) -> Option<Box<dyn ClassModel>>,
    ) {
        self.capture_field_write(
            symbolic_owner,
            field_name,
            owning_object,
            new_value,
            new_value_model,
            resolve,
            true,
        );
    }
}

lazy_static! {
    static ref GLOBAL: Agent = Agent::new();
}

/// A cheap-to-clone handle to an [`AgentRuntime`]. Most callers should use
/// [`global`]; tests and the demo binary construct their own via
/// [`Agent::new`] or [`Agent::with_stack_capture`] to get isolated state.
#[derive(Clone)]
pub struct Agent {
    runtime: Arc<AgentRuntime>,
}

impl Default for Agent {
    fn default() -> Self {
        Agent::new()
    }
}

impl Agent {
    pub fn new() -> Self {
        Agent {
            runtime: Arc::new(AgentRuntime::default()),
        }
    }

    pub fn with_stack_capture(stack_capture: Box<dyn StackCapture>) -> Self {
        Agent {
            runtime: Arc::new(AgentRuntime::new(stack_capture)),
        }
    }

    /// The process-wide singleton: one running instance per instrumented
    /// process.
    pub fn global() -> Agent {
        GLOBAL.clone()
    }

    pub fn runtime(&self) -> &AgentRuntime {
        &self.runtime
    }
}

impl std::ops::Deref for Agent {
    type Target = AgentRuntime;

    fn deref(&self) -> &AgentRuntime {
        &self.runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StaticClassModel;
    use crate::stack::{StackFrame, SyntheticStackCapture};
    use std::sync::Arc as StdArc;

    fn obj(n: i32) -> IdentityKey {
        IdentityKey::new(StdArc::new(n))
    }

    fn agent_with_frames(frames: Vec<StackFrame>) -> Agent {
        Agent::with_stack_capture(Box::new(SyntheticStackCapture::new(frames)))
    }

    fn no_resolve(_: &str) -> Option<Box<dyn ClassModel>> {
        None
    }

    fn self_seed(class_name: &str) -> SeedClass {
        SeedClass {
            symbolic_name: class_name.to_owned(),
            ancestry: vec![class_name.to_owned()],
        }
    }

    fn list_model(name: &str) -> StaticClassModel {
        StaticClassModel::new(name).with_interface("java/util/List")
    }

    #[test]
    fn field_write_is_recorded_only_while_active() {
        let agent = agent_with_frames(vec![]);
        agent.register_field(
            "com/example/Foo",
            "items",
            "Ljava/util/List;",
            &[self_seed("com/example/Foo")],
        );
        let locator = FieldLocator::static_field("com/example/Foo", "items");

        agent.capture_field_write("com/example/Foo", "items", None, Some(obj(1)), None, &no_resolve, false);
        assert!(agent.get_field_modifications(&locator).is_empty());

        agent.set_tracking_enabled("com/example/Foo", "items", true);
        agent.capture_field_write("com/example/Foo", "items", None, Some(obj(1)), None, &no_resolve, false);
        assert_eq!(agent.get_field_modifications(&locator).len(), 1);
    }

    #[test]
    fn an_unregistered_field_write_is_a_noop() {
        let agent = Agent::new();
        agent.set_tracking_enabled("com/example/Foo", "items", true);
        // no register_field call, so lookup_owner has nothing to resolve
        agent.capture_field_write("com/example/Foo", "items", None, Some(obj(1)), None, &no_resolve, false);
        let locator = FieldLocator::static_field("com/example/Foo", "items");
        assert!(agent.get_field_modifications(&locator).is_empty());
    }

    #[test]
    fn inline_capture_is_skipped_when_container_has_no_tracker() {
        let agent = Agent::new();
        let container = obj(1);
        agent.capture_inline(&container, obj(2), true, false);
        assert!(agent.get_container_modifications(&container).is_empty());
    }

    #[test]
    fn field_write_seeds_the_container_as_tracked_then_inline_capture_works() {
        let agent = Agent::new();
        agent.register_field(
            "com/example/Holder",
            "items",
            "Ljava/util/List;",
            &[self_seed("com/example/Holder")],
        );
        agent.set_tracking_enabled("com/example/Holder", "items", true);

        let container = obj(1);
        let owner = obj(100);
        let model = list_model("java/util/ArrayList");
        agent.capture_field_write(
            "com/example/Holder",
            "items",
            Some(owner),
            Some(container.clone()),
            Some(&model),
            &no_resolve,
            false,
        );
        agent.capture_inline(&container, obj(2), true, false);

        let modifications = agent.get_container_modifications(&container);
        assert_eq!(modifications.len(), 1);
        assert!(modifications[0].is_addition);
    }

    #[test]
    fn field_write_with_a_container_value_resolves_and_prepares_its_runtime_class() {
        let agent = Agent::new();
        agent.register_field(
            "com/example/Holder",
            "items",
            "Ljava/util/List;",
            &[self_seed("com/example/Holder")],
        );
        let model = list_model("java/util/ArrayList");

        agent.capture_field_write(
            "com/example/Holder",
            "items",
            None,
            Some(obj(1)),
            Some(&model),
            &no_resolve,
            false,
        );

        assert!(agent.catalog().is_processed("java/util/ArrayList"));
        assert_eq!(
            agent.catalog().known_methods_family("java/util/ArrayList"),
            Some(crate::model::ContainerFamily::List)
        );
    }

    #[test]
    fn capture_mutator_records_one_delta_entry_per_changed_element() {
        let agent = Agent::new();
        agent.register_field(
            "com/example/Holder",
            "items",
            "Ljava/util/List;",
            &[self_seed("com/example/Holder")],
        );
        agent.set_tracking_enabled("com/example/Holder", "items", true);

        let container = obj(1);
        agent.capture_field_write("com/example/Holder", "items", None, Some(container.clone()), None, &no_resolve, false);

        let backing = std::sync::Mutex::new(vec![obj(10)]);
        let result = agent.capture_mutator(
            &container,
            true,
            false,
            || Multiset::from_elements(backing.lock().unwrap().iter().cloned()),
            || {
                backing.lock().unwrap().push(obj(11));
                "added"
            },
        );

        assert_eq!(result, "added");
        let modifications = agent.get_container_modifications(&container);
        assert_eq!(modifications.len(), 1);
        assert!(modifications[0].is_addition);
        assert_eq!(modifications[0].element, obj(11));
    }

    #[test]
    fn clear_history_removes_field_modifications() {
        let agent = Agent::new();
        agent.register_field("com/example/Foo", "items", "Ljava/util/List;", &[self_seed("com/example/Foo")]);
        let locator = FieldLocator::static_field("com/example/Foo", "items");
        agent.set_tracking_enabled("com/example/Foo", "items", true);
        agent.capture_field_write("com/example/Foo", "items", None, None, None, &no_resolve, false);
        assert_eq!(agent.get_field_modifications(&locator).len(), 1);

        agent.clear_history("com/example/Foo", "items");
        assert!(agent.get_field_modifications(&locator).is_empty());
    }

    #[test]
    fn global_returns_the_same_instance_every_call() {
        let a = Agent::global();
        let b = Agent::global();
        assert!(Arc::ptr_eq(&a.runtime, &b.runtime));
    }

    #[test]
    fn a_panicking_hot_path_is_swallowed_not_propagated() {
        let agent = Agent::new();
        let container = obj(1);
        // snapshot panics; capture_mutator must not unwind past this call.
        let result: &str = agent.runtime().capture_mutator(
            &container,
            false,
            false,
            || panic!("boom"),
            || "unreachable",
        );
        assert_eq!(result, "");
    }

    #[test]
    fn capture_field_write_dumps_the_rewritten_plan_when_debug_is_enabled() {
        let agent = Agent::new();
        let dir = std::env::temp_dir().join(format!("fieldwatch-dump-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        agent.config().set_dump_dir(&dir);
        agent.config().set_debug(true);

        agent.register_field(
            "com/example/Holder",
            "items",
            "Ljava/util/List;",
            &[self_seed("com/example/Holder")],
        );
        let model = list_model("com/example/Holder");
        agent.capture_field_write("com/example/Holder", "items", None, Some(obj(1)), Some(&model), &no_resolve, false);

        let dumped = dir.join(Config::dump_file_name("com/example/Holder"));
        assert!(dumped.exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
