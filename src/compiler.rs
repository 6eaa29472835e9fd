//! The per-domain schema compiler.
//!
//! One [`SchemaCompiler`] serves one owner domain (entities, blocks, ...):
//! it runs the domain's plugins exactly once behind a [`LoadGate`], collects
//! their registrations per owner type, and on first container request per
//! concrete type resolves the inheritance-merged, dependency-sorted schema
//! and compiles it into a cached [`CompiledContainerFactory`].
//!
//! Registration is only legal during the loading window; the first real use
//! of the compiler (from any thread, any call site) triggers the bootstrap.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::component::Component;
use crate::container::{BuildContext, CompiledContainerFactory, Container, ContainerLayout};
use crate::dispatcher::{GatedInit, LoadGate, LoadPhase};
use crate::error::{SchemaError, SchemaResult};
use crate::hierarchy::{OwnerHierarchy, OwnerType};
use crate::key::{AnyKey, ComponentKey};
use crate::registration::{
    check_cycles, check_dependencies_satisfied, sort, QualifiedFactory, RegistrationSet,
};

/// A registration-phase participant for one owner domain.
///
/// Plugins are handed to [`SchemaCompiler::new`] and invoked exactly once,
/// inside the loading window, when the compiler bootstraps.
pub trait OwnerPlugin<A: 'static>: Send + Sync {
    /// Declares this plugin's component registrations.
    fn register(&self, compiler: &SchemaCompiler<A>) -> SchemaResult<()>;
}

struct FnPlugin<F>(F);

impl<A, F> OwnerPlugin<A> for FnPlugin<F>
where
    A: 'static,
    F: Fn(&SchemaCompiler<A>) -> SchemaResult<()> + Send + Sync,
{
    fn register(&self, compiler: &SchemaCompiler<A>) -> SchemaResult<()> {
        (self.0)(compiler)
    }
}

/// Wraps a closure as an [`OwnerPlugin`].
pub fn plugin_fn<A, F>(f: F) -> Box<dyn OwnerPlugin<A>>
where
    A: 'static,
    F: Fn(&SchemaCompiler<A>) -> SchemaResult<()> + Send + Sync + 'static,
{
    Box::new(FnPlugin(f))
}

/// Filter deciding which owner types a predicate registration applies to.
pub type OwnerPredicate = Box<dyn Fn(&OwnerHierarchy, OwnerType) -> bool + Send + Sync>;

struct PredicatedFactory<A: 'static> {
    test: OwnerPredicate,
    key: AnyKey,
    factory: QualifiedFactory<A>,
}

/// Registration and build state behind the compiler's build lock.
struct CompilerInner<A: 'static> {
    by_owner: HashMap<OwnerType, RegistrationSet<A>>,
    predicates: Vec<PredicatedFactory<A>>,
    /// Owner types whose matching predicates have been folded into
    /// `by_owner` already.
    folded: HashSet<OwnerType>,
    /// Structural layout cache: owner types whose merged schemas have the
    /// same ordered keys and implementation types share one layout.
    layouts: HashMap<Vec<(u32, TypeId)>, Arc<ContainerLayout>>,
    /// Owner types whose schema failed to compile. The stored diagnosis is
    /// replayed on every later request; broken builds are never retried.
    poisoned: HashMap<OwnerType, SchemaError>,
}

/// Compiles per-owner-type component registrations into cached container
/// factories.
///
/// # Concurrency
///
/// All methods run on caller threads. The only blocking points are the
/// one-time bootstrap and the per-owner-type first compilation; warmed-up
/// lookups take a read lock only.
pub struct SchemaCompiler<A: 'static> {
    hierarchy: Arc<OwnerHierarchy>,
    plugins: Vec<Box<dyn OwnerPlugin<A>>>,
    gate: LoadGate,
    inner: Mutex<CompilerInner<A>>,
    cache: RwLock<HashMap<OwnerType, Arc<CompiledContainerFactory<A>>>>,
    /// Shared factory for owner types with no registrations anywhere in
    /// their ancestry.
    empty: Arc<CompiledContainerFactory<A>>,
}

impl<A: 'static> SchemaCompiler<A> {
    /// Creates a compiler over `hierarchy` with the domain's plugins.
    ///
    /// `likely_trigger` describes what a caller is probably doing when it
    /// first trips the bootstrap (e.g. `"spawning an entity"`); it is quoted
    /// in the circular-use diagnosis.
    pub fn new(
        hierarchy: Arc<OwnerHierarchy>,
        plugins: Vec<Box<dyn OwnerPlugin<A>>>,
        likely_trigger: &str,
    ) -> Self {
        Self {
            hierarchy,
            plugins,
            gate: LoadGate::new(likely_trigger),
            inner: Mutex::new(CompilerInner {
                by_owner: HashMap::new(),
                predicates: Vec::new(),
                folded: HashSet::new(),
                layouts: HashMap::new(),
                poisoned: HashMap::new(),
            }),
            cache: RwLock::new(HashMap::new()),
            empty: Arc::new(CompiledContainerFactory::empty()),
        }
    }

    /// The owner hierarchy this compiler resolves against.
    pub fn hierarchy(&self) -> &OwnerHierarchy {
        &self.hierarchy
    }

    /// Current bootstrap phase.
    pub fn phase(&self) -> LoadPhase {
        self.gate.phase()
    }

    /// Forces the bootstrap to run now instead of on first container
    /// request. Idempotent; fails fast if a previous bootstrap failed.
    pub fn ensure_initialized(&self) -> SchemaResult<()> {
        self.gate.ensure_initialized(self)
    }

    // -- registration (loading window only) ---------------------------------

    /// Registers a component for one exact owner type.
    ///
    /// `dependencies` name the keys that must be constructed before this
    /// one; the factory will find them bound in its [`BuildContext`].
    ///
    /// Only legal inside the loading window, i.e. from a plugin's
    /// `register`; anywhere else fails with
    /// [`SchemaError::InvalidLifecyclePhase`].
    pub fn register_for<C, F>(
        &self,
        owner: OwnerType,
        key: &ComponentKey<C>,
        dependencies: &[AnyKey],
        factory: F,
    ) -> SchemaResult<()>
    where
        C: Component,
        F: for<'a> Fn(&BuildContext<'a, A>) -> Option<C> + Send + Sync + 'static,
    {
        self.register_qualified(
            owner,
            key.untyped().clone(),
            QualifiedFactory::of::<C, F>(dependencies.to_vec(), factory),
        )
    }

    /// Registers a component for every owner type matching `test`.
    ///
    /// Predicates are evaluated lazily, once per concrete owner type, the
    /// first time that type is resolved; a match behaves exactly as if the
    /// registration had been declared directly on the type.
    pub fn register_for_predicate<C, F, P>(
        &self,
        test: P,
        key: &ComponentKey<C>,
        dependencies: &[AnyKey],
        factory: F,
    ) -> SchemaResult<()>
    where
        C: Component,
        F: for<'a> Fn(&BuildContext<'a, A>) -> Option<C> + Send + Sync + 'static,
        P: Fn(&OwnerHierarchy, OwnerType) -> bool + Send + Sync + 'static,
    {
        self.gate.check_loading("predicate component registration")?;
        let mut inner = self.inner.lock();
        inner.predicates.push(PredicatedFactory {
            test: Box::new(test),
            key: key.untyped().clone(),
            factory: QualifiedFactory::of::<C, F>(dependencies.to_vec(), factory),
        });
        Ok(())
    }

    /// Low-level registration taking a pre-built [`QualifiedFactory`], for
    /// callers that erase types themselves or declare a bespoke
    /// implementation type.
    pub fn register_qualified(
        &self,
        owner: OwnerType,
        key: AnyKey,
        factory: QualifiedFactory<A>,
    ) -> SchemaResult<()> {
        self.gate.check_loading("component registration")?;
        let mut inner = self.inner.lock();
        let set = inner.by_owner.entry(owner).or_default();
        if let Some(existing) = set.get(&key) {
            return Err(SchemaError::DuplicateRegistration {
                key: key.to_string(),
                owner: self.hierarchy.name(owner).to_string(),
                first: existing.impl_name(),
                second: factory.impl_name(),
            });
        }
        set.insert(key, factory);
        Ok(())
    }

    // -- resolution ---------------------------------------------------------

    /// Whether `owner` needs its own compiled schema, as opposed to reusing
    /// its nearest ancestor's.
    ///
    /// True for hierarchy roots (which always carry at least the empty
    /// schema) and for types with own registrations, direct or folded from
    /// a matching predicate.
    pub fn requires_dedicated_schema(&self, owner: OwnerType) -> SchemaResult<bool> {
        self.gate.ensure_initialized(self)?;
        let mut inner = self.inner.lock();
        self.fold_predicates(&mut inner, owner)?;
        Ok(self.requires_dedicated_locked(&inner, owner))
    }

    /// Returns the compiled container factory for `owner`, building and
    /// caching it on first request.
    ///
    /// Triggers the bootstrap if it has not run yet.
    pub fn factory_for(&self, owner: OwnerType) -> SchemaResult<Arc<CompiledContainerFactory<A>>> {
        self.gate.ensure_initialized(self)?;

        // Fast path: already resolved.
        if let Some(factory) = self.cache.read().get(&owner) {
            return Ok(Arc::clone(factory));
        }

        let mut inner = self.inner.lock();
        match self.build_locked(&mut inner, owner) {
            Ok(factory) => Ok(factory),
            Err(cause) => {
                inner.poisoned.entry(owner).or_insert_with(|| cause.clone());
                Err(cause)
            }
        }
    }

    /// Builds a container for one owner instance of type `owner`.
    pub fn build_container(&self, owner: OwnerType, args: &A) -> SchemaResult<Container> {
        self.factory_for(owner)?.create(args)
    }

    // -- internals ----------------------------------------------------------

    fn requires_dedicated_locked(&self, inner: &CompilerInner<A>, owner: OwnerType) -> bool {
        self.hierarchy.is_root(owner)
            || inner.by_owner.get(&owner).is_some_and(|set| !set.is_empty())
    }

    /// Build-or-fetch under the build lock. Ancestor resolution recurses
    /// through this same path, so every ancestor factory is compiled and
    /// cached exactly once no matter how many descendants defer to it.
    fn build_locked(
        &self,
        inner: &mut CompilerInner<A>,
        owner: OwnerType,
    ) -> SchemaResult<Arc<CompiledContainerFactory<A>>> {
        // Another thread may have finished while this one waited for the
        // lock; recursion re-enters here as well.
        if let Some(factory) = self.cache.read().get(&owner) {
            return Ok(Arc::clone(factory));
        }
        if let Some(cause) = inner.poisoned.get(&owner) {
            return Err(cause.clone());
        }

        self.fold_predicates(inner, owner)?;
        for ancestor in self.hierarchy.ancestors(owner).collect::<Vec<_>>() {
            self.fold_predicates(inner, ancestor)?;
        }

        let factory = if !self.requires_dedicated_locked(inner, owner) {
            // Roots always take the dedicated branch, so a parent exists.
            let parent = self.hierarchy.parent(owner).unwrap();
            self.build_locked(inner, parent)?
        } else {
            let mut merged = inner.by_owner.get(&owner).cloned().unwrap_or_default();
            for ancestor in self.hierarchy.ancestors(owner) {
                if let Some(set) = inner.by_owner.get(&ancestor) {
                    merged.merge_defaults(set);
                }
            }

            check_dependencies_satisfied(&merged)?;
            sort(&mut merged)?;

            if merged.is_empty() {
                Arc::clone(&self.empty)
            } else {
                let signature: Vec<(u32, TypeId)> = merged
                    .iter()
                    .map(|(key, factory)| (key.index(), factory.impl_id()))
                    .collect();
                let layout = Arc::clone(
                    inner
                        .layouts
                        .entry(signature)
                        .or_insert_with(|| Arc::new(ContainerLayout::of_sorted(&merged))),
                );
                Arc::new(CompiledContainerFactory::of_sorted(&merged, layout))
            }
        };

        self.cache.write().insert(owner, Arc::clone(&factory));
        log::debug!(
            "resolved container factory for owner type `{}` ({} slots)",
            self.hierarchy.name(owner),
            factory.layout().len()
        );
        Ok(factory)
    }

    /// Applies every predicate registration matching `owner` to its own
    /// registration set, once per owner type.
    ///
    /// Validates before mutating: a duplicate (against a direct
    /// registration or another matching predicate) leaves the set untouched
    /// and reproduces the same error on every later attempt.
    fn fold_predicates(&self, inner: &mut CompilerInner<A>, owner: OwnerType) -> SchemaResult<()> {
        if inner.folded.contains(&owner) {
            return Ok(());
        }

        let CompilerInner {
            by_owner,
            predicates,
            folded,
            ..
        } = inner;

        let mut matched: Vec<(&AnyKey, &QualifiedFactory<A>)> = Vec::new();
        for pred in predicates.iter() {
            if !(pred.test)(&self.hierarchy, owner) {
                continue;
            }
            let direct = by_owner.get(&owner).and_then(|set| set.get(&pred.key));
            let prior = direct.or_else(|| {
                matched
                    .iter()
                    .find(|(key, _)| *key == &pred.key)
                    .map(|(_, factory)| *factory)
            });
            if let Some(existing) = prior {
                return Err(SchemaError::DuplicateRegistration {
                    key: pred.key.to_string(),
                    owner: self.hierarchy.name(owner).to_string(),
                    first: existing.impl_name(),
                    second: pred.factory.impl_name(),
                });
            }
            matched.push((&pred.key, &pred.factory));
        }

        if !matched.is_empty() {
            let set = by_owner.entry(owner).or_default();
            for (key, factory) in matched {
                set.insert(key.clone(), factory.clone());
            }
        }
        folded.insert(owner);
        Ok(())
    }
}

impl<A: 'static> GatedInit for SchemaCompiler<A> {
    fn init(&self) -> SchemaResult<()> {
        for plugin in &self.plugins {
            plugin.register(self)?;
        }

        // Surface per-type cycles at registration time instead of first
        // compilation. Unknown dependencies are skipped here; they may be
        // satisfied by an ancestor level once merged.
        if cfg!(debug_assertions) {
            let inner = self.inner.lock();
            for set in inner.by_owner.values() {
                check_cycles(set)?;
            }
        }
        Ok(())
    }

    fn post_init(&self) {
        let inner = self.inner.lock();
        let total: usize = inner.by_owner.values().map(|set| set.len()).sum();
        log::debug!(
            "schema registration closed: {} factories across {} owner types, {} predicates outstanding",
            total,
            inner.by_owner.len(),
            inner.predicates.len()
        );
    }
}
