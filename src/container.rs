//! Compiled container layouts and the containers built from them.
//!
//! A [`ContainerLayout`] is the synthesized storage shape for one schema:
//! the dependency-ordered key sequence plus a key → slot index map. Every
//! [`Container`] sharing a schema shares one layout through an `Arc`, so a
//! container is just the layout pointer and a dense slot array; access is
//! one hash lookup on the shared map and an index, with no per-instance
//! hashing state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::component::Component;
use crate::error::{SchemaError, SchemaResult};
use crate::key::{AnyKey, ComponentKey};
use crate::registration::{check_dependencies_satisfied, sort, QualifiedFactory, RegistrationSet, SharedFactory};

/// The storage shape shared by every container of one schema.
pub struct ContainerLayout {
    /// Keys in construction order; slot `i` holds `keys[i]`.
    keys: Vec<AnyKey>,
    /// Implementation type name per slot, for diagnostics.
    impl_names: Vec<&'static str>,
    slot_of: HashMap<AnyKey, usize>,
}

impl ContainerLayout {
    fn new(keys: Vec<AnyKey>, impl_names: Vec<&'static str>) -> Self {
        debug_assert_eq!(keys.len(), impl_names.len());
        let slot_of = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        Self {
            keys,
            impl_names,
            slot_of,
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Builds the layout for an already-sorted registration set.
    pub(crate) fn of_sorted<A>(set: &RegistrationSet<A>) -> Self {
        let mut keys = Vec::with_capacity(set.len());
        let mut impl_names = Vec::with_capacity(set.len());
        for (key, factory) in set.iter() {
            keys.push(key.clone());
            impl_names.push(factory.impl_name());
        }
        Self::new(keys, impl_names)
    }

    /// Keys in construction order.
    pub fn keys(&self) -> &[AnyKey] {
        &self.keys
    }

    /// Slot index of `key`, if the layout holds it.
    pub fn slot_of(&self, key: &AnyKey) -> Option<usize> {
        self.slot_of.get(key).copied()
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the layout has no slots.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for ContainerLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.keys.iter().map(|k| k.to_string()))
            .finish()
    }
}

/// What a component factory sees while its container is under construction.
///
/// Exposes the owner-specific construction argument and every component
/// bound earlier in the construction order, so a factory can retrieve its
/// declared dependencies fully constructed.
pub struct BuildContext<'a, A> {
    args: &'a A,
    layout: &'a ContainerLayout,
    built: &'a [Option<Box<dyn Component>>],
}

impl<'a, A> BuildContext<'a, A> {
    /// The owner-specific construction argument.
    pub fn args(&self) -> &'a A {
        self.args
    }

    /// Borrows an already-constructed component.
    ///
    /// Fails with [`SchemaError::NotProvided`] if the schema does not hold
    /// `key` or its slot has not been filled yet; the latter means the
    /// calling factory did not declare `key` as a dependency.
    pub fn get<C: Component>(&self, key: &ComponentKey<C>) -> SchemaResult<&C> {
        self.try_get(key).ok_or_else(|| SchemaError::NotProvided {
            key: key.name().to_string(),
        })
    }

    /// Borrows an already-constructed component, or `None`.
    pub fn try_get<C: Component>(&self, key: &ComponentKey<C>) -> Option<&C> {
        let slot = self.layout.slot_of(key.untyped())?;
        self.built[slot].as_deref()?.downcast_ref::<C>()
    }

    /// Whether `key` has been constructed and bound already.
    pub fn has(&self, key: &AnyKey) -> bool {
        self.layout
            .slot_of(key)
            .is_some_and(|slot| self.built[slot].is_some())
    }
}

/// The opaque, fixed-shape component storage object.
///
/// The set of held keys is frozen at construction ("append-only at birth");
/// component values stay mutable through [`get_mut`](Container::get_mut).
pub struct Container {
    layout: Arc<ContainerLayout>,
    slots: Box<[Box<dyn Component>]>,
}

impl Container {
    /// Borrows the component guarded by `key`.
    ///
    /// Fails with [`SchemaError::NotProvided`] if this container's schema
    /// does not hold the key, and with [`SchemaError::SchemaConflict`] if
    /// the slot was bound to a different implementation type than `C`.
    pub fn get<C: Component>(&self, key: &ComponentKey<C>) -> SchemaResult<&C> {
        let slot = self.slot(key.untyped())?;
        self.slots[slot]
            .downcast_ref::<C>()
            .ok_or_else(|| self.type_mismatch::<C>(slot))
    }

    /// Mutably borrows the component guarded by `key`.
    ///
    /// Same failure modes as [`get`](Container::get).
    pub fn get_mut<C: Component>(&mut self, key: &ComponentKey<C>) -> SchemaResult<&mut C> {
        let slot = self.slot(key.untyped())?;
        if !self.slots[slot].is::<C>() {
            return Err(self.type_mismatch::<C>(slot));
        }
        // The is::<C>() check above guarantees the downcast succeeds.
        Ok(self.slots[slot].downcast_mut::<C>().unwrap())
    }

    /// Borrows the component guarded by `key`, or `None` when absence is
    /// expected behavior rather than a bug.
    pub fn try_get<C: Component>(&self, key: &ComponentKey<C>) -> Option<&C> {
        let slot = self.layout.slot_of(key.untyped())?;
        self.slots[slot].downcast_ref::<C>()
    }

    /// Borrows the type-erased component guarded by `key`.
    pub fn get_raw(&self, key: &AnyKey) -> SchemaResult<&dyn Component> {
        let slot = self.slot(key)?;
        Ok(&*self.slots[slot])
    }

    /// Whether this container holds `key`.
    pub fn has(&self, key: &AnyKey) -> bool {
        self.layout.slot_of(key).is_some()
    }

    /// Held keys, ordered by construction. Stable across runs for the same
    /// registration inputs, which downstream serializers may rely on.
    pub fn keys(&self) -> &[AnyKey] {
        self.layout.keys()
    }

    /// Number of held components.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the container holds no components.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, key: &AnyKey) -> SchemaResult<usize> {
        self.layout
            .slot_of(key)
            .ok_or_else(|| SchemaError::NotProvided {
                key: key.to_string(),
            })
    }

    fn type_mismatch<C: Component>(&self, slot: usize) -> SchemaError {
        SchemaError::SchemaConflict {
            name: self.layout.keys[slot].to_string(),
            existing: self.layout.impl_names[slot],
            requested: std::any::type_name::<C>(),
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("keys", &*self.layout)
            .finish()
    }
}

/// One slot's construction recipe.
struct SlotInit<A: 'static> {
    key: AnyKey,
    impl_name: &'static str,
    factory: SharedFactory<A>,
}

/// A compiled factory bound to one layout.
///
/// Invokes each slot's component factory in construction order; every
/// factory observes all of its declared dependencies already bound through
/// the [`BuildContext`].
pub struct CompiledContainerFactory<A: 'static> {
    layout: Arc<ContainerLayout>,
    slots: Vec<SlotInit<A>>,
}

impl<A: 'static> CompiledContainerFactory<A> {
    /// Binds an already-sorted registration set to `layout`.
    pub(crate) fn of_sorted(set: &RegistrationSet<A>, layout: Arc<ContainerLayout>) -> Self {
        debug_assert_eq!(set.len(), layout.len());
        let slots = set
            .iter()
            .map(|(key, factory)| SlotInit {
                key: key.clone(),
                impl_name: factory.impl_name(),
                factory: Arc::clone(factory.factory()),
            })
            .collect();
        Self { layout, slots }
    }

    /// The factory for owner types with no registrations anywhere in their
    /// hierarchy.
    pub(crate) fn empty() -> Self {
        Self {
            layout: Arc::new(ContainerLayout::empty()),
            slots: Vec::new(),
        }
    }

    /// The layout every produced container will share.
    pub fn layout(&self) -> &Arc<ContainerLayout> {
        &self.layout
    }

    /// Instantiates a container, running every component factory in
    /// construction order against `args`.
    ///
    /// Fails with [`SchemaError::NullComponent`] if a factory produces no
    /// value; the partially-built components are dropped.
    pub fn create(&self, args: &A) -> SchemaResult<Container> {
        let mut built: Vec<Option<Box<dyn Component>>> =
            (0..self.slots.len()).map(|_| None).collect();

        for (index, slot) in self.slots.iter().enumerate() {
            let ctx = BuildContext {
                args,
                layout: &self.layout,
                built: &built,
            };
            let component =
                (slot.factory)(&ctx).ok_or_else(|| SchemaError::NullComponent {
                    key: slot.key.to_string(),
                    factory: slot.impl_name,
                })?;
            built[index] = Some(component);
        }

        let slots: Box<[Box<dyn Component>]> = built.into_iter().flatten().collect();
        debug_assert_eq!(slots.len(), self.slots.len());
        Ok(Container {
            layout: Arc::clone(&self.layout),
            slots,
        })
    }
}

impl<A: 'static> fmt::Debug for CompiledContainerFactory<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledContainerFactory")
            .field("layout", &*self.layout)
            .finish()
    }
}

/// Builds a one-off [`CompiledContainerFactory`] without an owner
/// hierarchy, for callers that assemble a fixed component set by hand.
///
/// # Example
///
/// ```
/// use slotted::{Component, ComponentRegistry, ContainerFactoryBuilder, Name};
///
/// struct Health(u32);
/// impl Component for Health {}
///
/// let registry = ComponentRegistry::new();
/// let health = registry
///     .get_or_create::<Health>(Name::parse("demo:health").unwrap())
///     .unwrap();
///
/// let factory = ContainerFactoryBuilder::<u32>::new()
///     .component(&health, |ctx| Some(Health(*ctx.args())))
///     .unwrap()
///     .build()
///     .unwrap();
///
/// let container = factory.create(&30).unwrap();
/// assert_eq!(container.get(&health).unwrap().0, 30);
/// ```
#[derive(Debug)]
pub struct ContainerFactoryBuilder<A: 'static> {
    entries: RegistrationSet<A>,
}

impl<A: 'static> ContainerFactoryBuilder<A> {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            entries: RegistrationSet::new(),
        }
    }

    /// Adds a component with no dependencies.
    pub fn component<C, F>(self, key: &ComponentKey<C>, factory: F) -> SchemaResult<Self>
    where
        C: Component,
        F: for<'a> Fn(&BuildContext<'a, A>) -> Option<C> + Send + Sync + 'static,
    {
        self.component_after(key, &[], factory)
    }

    /// Adds a component constructed after every key in `dependencies`.
    pub fn component_after<C, F>(
        mut self,
        key: &ComponentKey<C>,
        dependencies: &[AnyKey],
        factory: F,
    ) -> SchemaResult<Self>
    where
        C: Component,
        F: for<'a> Fn(&BuildContext<'a, A>) -> Option<C> + Send + Sync + 'static,
    {
        let raw = key.untyped();
        if let Some(existing) = self.entries.get(raw) {
            return Err(SchemaError::DuplicateRegistration {
                key: raw.to_string(),
                owner: "<builder>".to_string(),
                first: existing.impl_name(),
                second: std::any::type_name::<C>(),
            });
        }
        self.entries.insert(
            raw.clone(),
            QualifiedFactory::of::<C, F>(dependencies.to_vec(), factory),
        );
        Ok(self)
    }

    /// Validates, sorts, and compiles the accumulated registrations.
    pub fn build(mut self) -> SchemaResult<Arc<CompiledContainerFactory<A>>> {
        if self.entries.is_empty() {
            return Ok(Arc::new(CompiledContainerFactory::empty()));
        }
        check_dependencies_satisfied(&self.entries)?;
        sort(&mut self.entries)?;
        let layout = Arc::new(ContainerLayout::of_sorted(&self.entries));
        Ok(Arc::new(CompiledContainerFactory::of_sorted(
            &self.entries,
            layout,
        )))
    }
}

impl<A: 'static> Default for ContainerFactoryBuilder<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{ComponentRegistry, Name};

    struct Health {
        current: u32,
        max: u32,
    }
    impl Component for Health {}

    struct Regen {
        per_tick: u32,
    }
    impl Component for Regen {}

    #[derive(Debug)]
    struct Args {
        base_health: u32,
    }

    fn registry_and_keys() -> (ComponentRegistry, ComponentKey<Health>, ComponentKey<Regen>) {
        let registry = ComponentRegistry::new();
        let health = registry
            .get_or_create::<Health>(Name::parse("demo:health").unwrap())
            .unwrap();
        let regen = registry
            .get_or_create::<Regen>(Name::parse("demo:regen").unwrap())
            .unwrap();
        (registry, health, regen)
    }

    #[test]
    fn builder_compiles_and_creates() {
        let (_registry, health, regen) = registry_and_keys();
        let health_dep = health.untyped().clone();

        let h = health.clone();
        let factory = ContainerFactoryBuilder::<Args>::new()
            .component_after(&regen, &[health_dep.clone()], move |ctx| {
                // The dependency is observable mid-construction.
                let bound = ctx.get(&h).unwrap();
                Some(Regen {
                    per_tick: bound.max / 10,
                })
            })
            .unwrap()
            .component(&health, |ctx| {
                Some(Health {
                    current: ctx.args().base_health,
                    max: ctx.args().base_health,
                })
            })
            .unwrap()
            .build()
            .unwrap();

        let container = factory.create(&Args { base_health: 100 }).unwrap();
        assert_eq!(container.len(), 2);
        // Dependency order: health first despite regen registering first.
        assert_eq!(container.keys()[0], health_dep);
        assert_eq!(container.get(&health).unwrap().max, 100);
        assert_eq!(container.get(&regen).unwrap().per_tick, 10);
    }

    #[test]
    fn containers_share_one_layout() {
        let (_registry, health, _regen) = registry_and_keys();
        let factory = ContainerFactoryBuilder::<Args>::new()
            .component(&health, |ctx| {
                Some(Health {
                    current: ctx.args().base_health,
                    max: ctx.args().base_health,
                })
            })
            .unwrap()
            .build()
            .unwrap();

        let a = factory.create(&Args { base_health: 1 }).unwrap();
        let b = factory.create(&Args { base_health: 2 }).unwrap();
        assert!(Arc::ptr_eq(&a.layout, &b.layout));
    }

    #[test]
    fn duplicate_component_rejected() {
        let (_registry, health, _regen) = registry_and_keys();
        let err = ContainerFactoryBuilder::<Args>::new()
            .component(&health, |_| {
                Some(Health {
                    current: 0,
                    max: 0,
                })
            })
            .unwrap()
            .component(&health, |_| {
                Some(Health {
                    current: 1,
                    max: 1,
                })
            })
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateRegistration { .. }));
    }

    #[test]
    fn null_component_names_key_and_factory() {
        let (_registry, health, _regen) = registry_and_keys();
        let factory = ContainerFactoryBuilder::<Args>::new()
            .component(&health, |_| None::<Health>)
            .unwrap()
            .build()
            .unwrap();

        let err = factory.create(&Args { base_health: 1 }).unwrap_err();
        match err {
            SchemaError::NullComponent { key, factory } => {
                assert_eq!(key, "demo:health");
                assert!(factory.contains("Health"));
            }
            other => panic!("expected NullComponent, got {other:?}"),
        }
    }

    #[test]
    fn absent_key_is_not_provided() {
        let (_registry, health, regen) = registry_and_keys();
        let factory = ContainerFactoryBuilder::<Args>::new()
            .component(&health, |_| {
                Some(Health {
                    current: 0,
                    max: 0,
                })
            })
            .unwrap()
            .build()
            .unwrap();

        let container = factory.create(&Args { base_health: 0 }).unwrap();
        assert!(matches!(
            container.get(&regen),
            Err(SchemaError::NotProvided { .. })
        ));
        assert!(container.try_get(&regen).is_none());
        assert!(!container.has(regen.untyped()));
    }

    #[test]
    fn get_mut_mutates_in_place() {
        let (_registry, health, _regen) = registry_and_keys();
        let factory = ContainerFactoryBuilder::<Args>::new()
            .component(&health, |_| {
                Some(Health {
                    current: 10,
                    max: 10,
                })
            })
            .unwrap()
            .build()
            .unwrap();

        let mut container = factory.create(&Args { base_health: 0 }).unwrap();
        container.get_mut(&health).unwrap().current = 3;
        assert_eq!(container.get(&health).unwrap().current, 3);
    }

    #[test]
    fn empty_builder_yields_empty_containers() {
        let factory = ContainerFactoryBuilder::<Args>::new().build().unwrap();
        let container = factory.create(&Args { base_health: 0 }).unwrap();
        assert!(container.is_empty());
        assert!(container.keys().is_empty());
    }

    #[test]
    fn builder_cycle_rejected() {
        let (_registry, health, regen) = registry_and_keys();
        let err = ContainerFactoryBuilder::<Args>::new()
            .component_after(&health, &[regen.untyped().clone()], |_| {
                Some(Health {
                    current: 0,
                    max: 0,
                })
            })
            .unwrap()
            .component_after(&regen, &[health.untyped().clone()], |_| {
                Some(Regen { per_tick: 0 })
            })
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::CycleDetected { .. }));
    }
}
