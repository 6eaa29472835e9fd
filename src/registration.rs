//! Qualified component factories and the dependency sorter.
//!
//! A [`RegistrationSet`] keeps one [`QualifiedFactory`] per key in insertion
//! order; [`sort`] reorders it so that every entry follows all of its
//! declared dependencies, with insertion order as the stable tie-break for
//! independent entries.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::component::Component;
use crate::container::BuildContext;
use crate::error::{SchemaError, SchemaResult};
use crate::key::AnyKey;

/// Type-erased, shareable component factory.
///
/// Receives a [`BuildContext`] exposing the owner construction argument and
/// every component already bound earlier in the construction order.
/// Returning `None` is a fatal [`SchemaError::NullComponent`].
pub type SharedFactory<A> =
    Arc<dyn for<'a> Fn(&BuildContext<'a, A>) -> Option<Box<dyn Component>> + Send + Sync>;

/// A registered factory qualified with its implementation type and the keys
/// it depends on.
pub struct QualifiedFactory<A: 'static> {
    factory: SharedFactory<A>,
    impl_id: TypeId,
    impl_name: &'static str,
    dependencies: Vec<AnyKey>,
}

impl<A: 'static> QualifiedFactory<A> {
    /// Wraps a typed factory producing components of type `C`.
    pub fn of<C, F>(dependencies: Vec<AnyKey>, factory: F) -> Self
    where
        C: Component,
        F: for<'a> Fn(&BuildContext<'a, A>) -> Option<C> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(move |ctx| {
                factory(ctx).map(|c| Box::new(c) as Box<dyn Component>)
            }),
            impl_id: TypeId::of::<C>(),
            impl_name: std::any::type_name::<C>(),
            dependencies,
        }
    }

    /// Wraps an already type-erased factory with explicit implementation
    /// type metadata.
    pub fn erased(
        dependencies: Vec<AnyKey>,
        impl_id: TypeId,
        impl_name: &'static str,
        factory: SharedFactory<A>,
    ) -> Self {
        Self {
            factory,
            impl_id,
            impl_name,
            dependencies,
        }
    }

    /// The wrapped factory.
    pub fn factory(&self) -> &SharedFactory<A> {
        &self.factory
    }

    /// `TypeId` of the concrete component type this factory produces.
    pub fn impl_id(&self) -> TypeId {
        self.impl_id
    }

    /// Name of the concrete component type this factory produces.
    pub fn impl_name(&self) -> &'static str {
        self.impl_name
    }

    /// Keys that must be constructed before this factory runs.
    pub fn dependencies(&self) -> &[AnyKey] {
        &self.dependencies
    }
}

impl<A: 'static> Clone for QualifiedFactory<A> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            impl_id: self.impl_id,
            impl_name: self.impl_name,
            dependencies: self.dependencies.clone(),
        }
    }
}

impl<A: 'static> fmt::Debug for QualifiedFactory<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QualifiedFactory")
            .field("impl", &self.impl_name)
            .field(
                "dependencies",
                &self
                    .dependencies
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// An insertion-ordered key → factory mapping.
///
/// Backed by a dense `Vec` plus a key → index map, so iteration order is
/// deterministic and lookups stay O(1).
#[derive(Debug)]
pub struct RegistrationSet<A: 'static> {
    entries: Vec<(AnyKey, QualifiedFactory<A>)>,
    by_key: HashMap<AnyKey, usize>,
}

impl<A: 'static> RegistrationSet<A> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set holds no registrations.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a registration exists for `key`.
    pub fn contains(&self, key: &AnyKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// The registration for `key`, if any.
    pub fn get(&self, key: &AnyKey) -> Option<&QualifiedFactory<A>> {
        self.by_key.get(key).map(|&i| &self.entries[i].1)
    }

    /// Appends a registration. Callers are responsible for rejecting
    /// duplicates first (see [`Self::contains`]); duplicate handling differs
    /// between same-level registration (an error) and ancestor merging
    /// (silently shadowed).
    pub fn insert(&mut self, key: AnyKey, factory: QualifiedFactory<A>) {
        debug_assert!(!self.contains(&key), "duplicate insert for `{key}`");
        self.by_key.insert(key.clone(), self.entries.len());
        self.entries.push((key, factory));
    }

    /// Appends every entry of `other` whose key is not yet present.
    ///
    /// This is the inheritance merge: the receiver holds the more specific
    /// level, so its existing entries win.
    pub fn merge_defaults(&mut self, other: &Self) {
        for (key, factory) in other.iter() {
            if !self.contains(key) {
                self.insert(key.clone(), factory.clone());
            }
        }
    }

    /// Iterates entries in their current order.
    pub fn iter(&self) -> impl Iterator<Item = (&AnyKey, &QualifiedFactory<A>)> {
        self.entries.iter().map(|(k, f)| (k, f))
    }
}

impl<A: 'static> Default for RegistrationSet<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> Clone for RegistrationSet<A> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            by_key: self.by_key.clone(),
        }
    }
}

/// Per-entry traversal tag, reset at the start of every sort pass.
#[derive(Clone, Copy, PartialEq, Eq)]
enum SortingState {
    Unvisited,
    Visiting,
    Visited,
}

/// Rejects registrations depending on keys absent from the set.
///
/// Every missing edge is collected, so one failure reports the full list
/// rather than the first hit. Runs before cycle detection: a dependency on
/// a key nobody registered is a different mistake than a cycle among
/// registered keys.
pub fn check_dependencies_satisfied<A>(set: &RegistrationSet<A>) -> SchemaResult<()> {
    let mut missing = Vec::new();
    for (key, factory) in set.iter() {
        for dep in factory.dependencies() {
            if !set.contains(dep) {
                missing.push(format!("for `{key}`: `{dep}`"));
            }
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::UnsatisfiedDependency { missing })
    }
}

/// Reorders the set into dependency order: every entry after all entries it
/// depends on, insertion order preserved among independent entries.
///
/// Fails with [`SchemaError::UnsatisfiedDependency`] if a dependency is
/// absent, or [`SchemaError::CycleDetected`] carrying the offending key
/// chain if the graph is cyclic.
pub fn sort<A>(set: &mut RegistrationSet<A>) -> SchemaResult<()> {
    check_dependencies_satisfied(set)?;
    let order = traversal_order(set, false)?;

    let mut slots: Vec<Option<(AnyKey, QualifiedFactory<A>)>> =
        set.entries.drain(..).map(Some).collect();
    for &i in &order {
        if let Some(entry) = slots[i].take() {
            set.entries.push(entry);
        }
    }
    debug_assert_eq!(set.entries.len(), slots.len());

    set.by_key.clear();
    for (i, (key, _)) in set.entries.iter().enumerate() {
        set.by_key.insert(key.clone(), i);
    }
    Ok(())
}

/// Pre-flight cycle check: runs the sort traversal and discards the order.
///
/// Unknown dependencies are skipped (they may be satisfied by an ancestor
/// level this set has not been merged with yet), so this can run on
/// un-merged per-owner sets right after registration.
pub fn check_cycles<A>(set: &RegistrationSet<A>) -> SchemaResult<()> {
    traversal_order(set, true).map(|_| ())
}

/// Depth-first topological traversal shared by [`sort`] and
/// [`check_cycles`]. Returns entry indices in construction order.
fn traversal_order<A>(
    set: &RegistrationSet<A>,
    skip_missing: bool,
) -> SchemaResult<Vec<usize>> {
    let n = set.entries.len();
    let mut states = vec![SortingState::Unvisited; n];
    let mut path = Vec::new();
    let mut order = Vec::with_capacity(n);
    for i in 0..n {
        visit(set, i, skip_missing, &mut states, &mut path, &mut order)?;
    }
    Ok(order)
}

fn visit<A>(
    set: &RegistrationSet<A>,
    index: usize,
    skip_missing: bool,
    states: &mut [SortingState],
    path: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> SchemaResult<()> {
    match states[index] {
        SortingState::Visited => Ok(()),
        SortingState::Visiting => {
            // Re-encountered while still on the stack: the slice of the
            // current path from this entry onward is the cycle.
            let start = path.iter().position(|&p| p == index).unwrap_or(0);
            let mut chain: Vec<String> = path[start..]
                .iter()
                .map(|&p| set.entries[p].0.to_string())
                .collect();
            chain.push(set.entries[index].0.to_string());
            Err(SchemaError::CycleDetected { path: chain })
        }
        SortingState::Unvisited => {
            states[index] = SortingState::Visiting;
            path.push(index);
            for dep in set.entries[index].1.dependencies() {
                match set.by_key.get(dep) {
                    Some(&j) => visit(set, j, skip_missing, states, path, order)?,
                    None if skip_missing => {}
                    None => {
                        // sort() pre-validates, so this is unreachable from
                        // the public entry points; report it anyway.
                        return Err(SchemaError::UnsatisfiedDependency {
                            missing: vec![format!("for `{}`: `{dep}`", set.entries[index].0)],
                        });
                    }
                }
            }
            path.pop();
            states[index] = SortingState::Visited;
            order.push(index);
            Ok(())
        }
    }
}
