//! The registry of tracked fields and prepared container classes.
//!
//! All mutations go through one mutex; reads take a consistent snapshot of
//! whatever they touch under that same lock. The class-hierarchy walks in
//! `prepare_container_class` are expressed against the
//! [`crate::model::ClassModel`] seam, resolved through a caller-supplied
//! lookup closure, since this crate has no real bytecode parser to ask for
//! a class's ancestors itself.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use string_cache::DefaultAtom;

use crate::model::{ClassModel, ContainerFamily};

/// One class the caller wants field-access resolution seeded for: its own
/// symbolic name, and the chain of superclass/interface names the caller
/// has already resolved from it up to (and including) the true field
/// owner, if that owner is reachable at all.
pub struct SeedClass {
    pub symbolic_name: String,
    pub ancestry: Vec<String>,
}

const LIST_ROOT: &str = "java/util/List";
const SET_ROOT: &str = "java/util/Set";
const MAP_ROOT: &str = "java/util/Map";

fn family_for_root(name: &str) -> Option<ContainerFamily> {
    match name {
        LIST_ROOT => Some(ContainerFamily::List),
        SET_ROOT => Some(ContainerFamily::Set),
        MAP_ROOT => Some(ContainerFamily::Map),
        _ => None,
    }
}

/// Breadth-first walk over `model`'s superclass/interface edges looking for
/// a standard-library container root. Returns the discovered family
/// together with every class name visited along the way; these are the
/// ancestors the catalog marks as prepared.
fn find_container_ancestry(
    model: &dyn ClassModel,
    resolve: &dyn Fn(&str) -> Option<Box<dyn ClassModel>>,
) -> Option<(ContainerFamily, Vec<String>)> {
    let root_name = model.name().to_owned();
    if let Some(family) = family_for_root(&root_name) {
        return Some((family, vec![root_name]));
    }

    let mut visited = vec![root_name.clone()];
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(root_name);

    let mut queue: VecDeque<String> = VecDeque::new();
    if let Some(superclass) = model.superclass() {
        queue.push_back(superclass.to_owned());
    }
    queue.extend(model.interfaces().iter().cloned());

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        visited.push(name.clone());
        if let Some(family) = family_for_root(&name) {
            return Some((family, visited));
        }
        if let Some(next) = resolve(&name) {
            if let Some(superclass) = next.superclass() {
                queue.push_back(superclass.to_owned());
            }
            queue.extend(next.interfaces().iter().cloned());
        }
    }
    None
}

#[derive(Default)]
struct CatalogState {
    tracked_fields: HashSet<(DefaultAtom, DefaultAtom)>,
    symbolic_owner: HashMap<(DefaultAtom, DefaultAtom), String>,
    prepared_containers: HashMap<String, ContainerFamily>,
    prepared_nestmates: HashSet<String>,
    /// Every nestmate ever discovered through a prepared container,
    /// retained even after `take_unprocessed_nestmates` drains the pending
    /// queue, so the rewriter can later ask "is this class a nestmate of a
    /// container" regardless of when it was processed.
    container_nestmates: HashSet<String>,
    processed: HashSet<String>,
}

pub struct TrackedCatalog {
    state: Mutex<CatalogState>,
}

impl Default for TrackedCatalog {
    fn default() -> Self {
        TrackedCatalog::new()
    }
}

impl TrackedCatalog {
    pub fn new() -> Self {
        TrackedCatalog {
            state: Mutex::new(CatalogState::default()),
        }
    }

    /// Idempotent: adds `(field_name, descriptor)` to the tracked set, and
    /// for each seed class whose resolved ancestry reaches `owner_class`,
    /// records that seed's symbolic name as resolving to `owner_class`.
    pub fn register_field(&self, owner_class: &str, field_name: &str, descriptor: &str, seeds: &[SeedClass]) {
        let mut state = self.state.lock();
        state
            .tracked_fields
            .insert((DefaultAtom::from(field_name), DefaultAtom::from(descriptor)));
        for seed in seeds {
            if seed.ancestry.iter().any(|ancestor| ancestor == owner_class) {
                state.symbolic_owner.insert(
                    (DefaultAtom::from(seed.symbolic_name.as_str()), DefaultAtom::from(field_name)),
                    owner_class.to_owned(),
                );
            }
        }
    }

    pub fn lookup_owner(&self, declaring_class_symbolic: &str, field_name: &str) -> Option<String> {
        self.state
            .lock()
            .symbolic_owner
            .get(&(DefaultAtom::from(declaring_class_symbolic), DefaultAtom::from(field_name)))
            .cloned()
    }

    pub fn should_rewrite_write(&self, field_name: &str, descriptor: &str) -> bool {
        self.state
            .lock()
            .tracked_fields
            .contains(&(DefaultAtom::from(field_name), DefaultAtom::from(descriptor)))
    }

    /// Walks `model`'s ancestry looking for a standard-library container
    /// root, marks every standard-library ancestor found as prepared with
    /// the discovered family's known-methods table, and queues any
    /// not-yet-processed nestmates for a later rewrite pass. Returns
    /// whether `model` turned out to be a standard-library container at
    /// all.
    pub fn prepare_container_class(
        &self,
        model: &dyn ClassModel,
        resolve: &dyn Fn(&str) -> Option<Box<dyn ClassModel>>,
    ) -> bool {
        let mut state = self.state.lock();
        let found = find_container_ancestry(model, resolve);
        if let Some((family, ancestry)) = &found {
            for class_name in ancestry {
                state.prepared_containers.insert(class_name.clone(), *family);
            }
            for nestmate in model.nestmates() {
                state.container_nestmates.insert(nestmate.clone());
                if !state.processed.contains(nestmate) {
                    state.prepared_nestmates.insert(nestmate.clone());
                }
            }
        }
        found.is_some()
    }

    pub fn known_methods_family(&self, class_name: &str) -> Option<ContainerFamily> {
        self.state.lock().prepared_containers.get(class_name).copied()
    }

    /// Whether `class_name` was ever discovered as a nestmate of a prepared
    /// container, regardless of whether it has since been processed. Used
    /// by the rewriter to decide whether a class plays the field-op-tracker
    /// role.
    pub fn is_container_nestmate(&self, class_name: &str) -> bool {
        self.state.lock().container_nestmates.contains(class_name)
    }

    /// Returns and clears the pending nestmate set, marking each returned
    /// name processed immediately so the fixed point terminates:
    /// `unprocessed - processed` shrinks every pass.
    pub fn take_unprocessed_nestmates(&self) -> Vec<String> {
        let mut state = self.state.lock();
        let pending: Vec<String> = state.prepared_nestmates.drain().collect();
        for name in &pending {
            state.processed.insert(name.clone());
        }
        pending
    }

    /// Marks `class_name` processed, returning whether it was *not*
    /// already (the idempotence check `ClassRewriter` uses before doing
    /// any rewrite work for a class).
    pub fn mark_processed(&self, class_name: &str) -> bool {
        self.state.lock().processed.insert(class_name.to_owned())
    }

    pub fn is_processed(&self, class_name: &str) -> bool {
        self.state.lock().processed.contains(class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StaticClassModel;
    use std::collections::HashMap as StdHashMap;

    #[test]
    fn register_field_is_idempotent_and_resolves_symbolic_owner() {
        let catalog = TrackedCatalog::new();
        let seeds = vec![SeedClass {
            symbolic_name: "com/example/SubList".to_owned(),
            ancestry: vec!["com/example/SubList".to_owned(), "java/util/AbstractList".to_owned()],
        }];
        catalog.register_field("java/util/AbstractList", "modCount", "I", &seeds);
        catalog.register_field("java/util/AbstractList", "modCount", "I", &seeds);
        assert!(catalog.should_rewrite_write("modCount", "I"));
        assert_eq!(
            catalog.lookup_owner("com/example/SubList", "modCount").as_deref(),
            Some("java/util/AbstractList")
        );
    }

    #[test]
    fn unrelated_seed_does_not_resolve() {
        let catalog = TrackedCatalog::new();
        let seeds = vec![SeedClass {
            symbolic_name: "com/example/Other".to_owned(),
            ancestry: vec!["com/example/Other".to_owned()],
        }];
        catalog.register_field("java/util/AbstractList", "modCount", "I", &seeds);
        assert!(catalog.lookup_owner("com/example/Other", "modCount").is_none());
    }

    fn resolver(models: StdHashMap<String, StaticClassModel>) -> impl Fn(&str) -> Option<Box<dyn ClassModel>> {
        move |name| models.get(name).cloned().map(|m| Box::new(m) as Box<dyn ClassModel>)
    }

    #[test]
    fn prepare_container_class_marks_the_whole_standard_library_chain() {
        let catalog = TrackedCatalog::new();
        let mut models = StdHashMap::new();
        models.insert(
            "java/util/AbstractList".to_owned(),
            StaticClassModel::new("java/util/AbstractList").with_interface(LIST_ROOT),
        );
        let array_list = StaticClassModel::new("java/util/ArrayList").with_superclass("java/util/AbstractList");

        let found = catalog.prepare_container_class(&array_list, &resolver(models));
        assert!(found);
        assert_eq!(
            catalog.known_methods_family("java/util/ArrayList"),
            Some(ContainerFamily::List)
        );
        assert_eq!(
            catalog.known_methods_family("java/util/AbstractList"),
            Some(ContainerFamily::List)
        );
    }

    #[test]
    fn non_container_class_is_not_prepared() {
        let catalog = TrackedCatalog::new();
        let models = StdHashMap::new();
        let plain = StaticClassModel::new("com/example/PlainObject");
        let found = catalog.prepare_container_class(&plain, &resolver(models));
        assert!(!found);
        assert_eq!(catalog.known_methods_family("com/example/PlainObject"), None);
    }

    #[test]
    fn take_unprocessed_nestmates_drains_and_marks_processed() {
        let catalog = TrackedCatalog::new();
        let models = StdHashMap::new();
        let container = StaticClassModel::new(LIST_ROOT).with_nestmate("com/example/Outer$Inner");
        catalog.prepare_container_class(&container, &resolver(models));

        let pending = catalog.take_unprocessed_nestmates();
        assert_eq!(pending, vec!["com/example/Outer$Inner".to_owned()]);
        assert!(catalog.is_processed("com/example/Outer$Inner"));
        assert!(catalog.take_unprocessed_nestmates().is_empty());
    }

    #[test]
    fn container_nestmate_is_remembered_after_the_pending_queue_drains() {
        let catalog = TrackedCatalog::new();
        let models = StdHashMap::new();
        let container = StaticClassModel::new(LIST_ROOT).with_nestmate("com/example/Outer$Inner");
        catalog.prepare_container_class(&container, &resolver(models));
        catalog.take_unprocessed_nestmates();

        assert!(catalog.is_container_nestmate("com/example/Outer$Inner"));
        assert!(!catalog.is_container_nestmate("com/example/Unrelated"));
    }
}
