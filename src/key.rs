//! Namespaced names, interned component keys, and the key registry.
//!
//! A [`ComponentRegistry`] interns at most one key per [`Name`] for the life
//! of the process. Keys are handed out as typed [`ComponentKey<C>`] wrappers
//! over a shared [`AnyKey`]; both are cheap reference-counted handles, and
//! two handles for the same name are always the same underlying key.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::component::Component;
use crate::error::{SchemaError, SchemaResult};

/// A namespaced identity: `namespace:path`.
///
/// Both parts are restricted to lowercase ASCII alphanumerics plus `_`, `-`
/// and `.`; the path may additionally contain `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name {
    namespace: String,
    path: String,
}

impl Name {
    /// Creates a validated name from its two parts.
    pub fn new(namespace: &str, path: &str) -> SchemaResult<Self> {
        if namespace.is_empty() || !namespace.bytes().all(valid_namespace_byte) {
            return Err(SchemaError::InvalidName {
                name: format!("{namespace}:{path}"),
                reason: "namespace must be non-empty [a-z0-9_.-]",
            });
        }
        if path.is_empty() || !path.bytes().all(valid_path_byte) {
            return Err(SchemaError::InvalidName {
                name: format!("{namespace}:{path}"),
                reason: "path must be non-empty [a-z0-9_.-/]",
            });
        }
        Ok(Self {
            namespace: namespace.to_string(),
            path: path.to_string(),
        })
    }

    /// Parses a `namespace:path` string.
    pub fn parse(s: &str) -> SchemaResult<Self> {
        match s.split_once(':') {
            Some((ns, path)) => Self::new(ns, path),
            None => Err(SchemaError::InvalidName {
                name: s.to_string(),
                reason: "expected a `namespace:path` pair",
            }),
        }
    }

    /// The namespace part.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The path part.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

fn valid_namespace_byte(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'-' | b'.')
}

fn valid_path_byte(b: u8) -> bool {
    valid_namespace_byte(b) || b == b'/'
}

/// Interned key state shared by every handle for one name.
struct KeyData {
    name: Name,
    /// Dense registration index within the owning registry.
    index: u32,
    type_id: TypeId,
    type_name: &'static str,
}

/// An untyped handle to an interned component key.
///
/// # Identity
///
/// Two `AnyKey`s are equal only if they refer to the same interned key.
/// Since a registry hands out exactly one key per name, equality of keys
/// from the same registry coincides with equality of their names.
#[derive(Clone)]
pub struct AnyKey(Arc<KeyData>);

impl AnyKey {
    /// The key's namespaced name.
    pub fn name(&self) -> &Name {
        &self.0.name
    }

    /// Dense index assigned at interning time, unique within the registry.
    pub fn index(&self) -> u32 {
        self.0.index
    }

    /// `TypeId` of the component type this key guards.
    pub fn type_id(&self) -> TypeId {
        self.0.type_id
    }

    /// Name of the component type this key guards.
    pub fn type_name(&self) -> &'static str {
        self.0.type_name
    }

    /// Recovers the typed form, checking the component type.
    pub fn typed<C: Component>(&self) -> SchemaResult<ComponentKey<C>> {
        if self.0.type_id != TypeId::of::<C>() {
            return Err(SchemaError::SchemaConflict {
                name: self.0.name.to_string(),
                existing: self.0.type_name,
                requested: std::any::type_name::<C>(),
            });
        }
        Ok(ComponentKey {
            raw: self.clone(),
            _marker: PhantomData,
        })
    }
}

impl PartialEq for AnyKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for AnyKey {}

impl Hash for AnyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.index.hash(state);
    }
}

impl fmt::Debug for AnyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyKey")
            .field("name", &self.0.name.to_string())
            .field("type", &self.0.type_name)
            .finish()
    }
}

impl fmt::Display for AnyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.name, f)
    }
}

/// A typed handle to an interned component key.
///
/// Obtained from [`ComponentRegistry::get_or_create`]; guards access to
/// components of type `C` in any container built against the same registry.
pub struct ComponentKey<C: Component> {
    raw: AnyKey,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Component> ComponentKey<C> {
    /// The key's namespaced name.
    pub fn name(&self) -> &Name {
        self.raw.name()
    }

    /// Borrows the untyped form backing this key.
    pub fn untyped(&self) -> &AnyKey {
        &self.raw
    }
}

impl<C: Component> Clone for ComponentKey<C> {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            _marker: PhantomData,
        }
    }
}

impl<C: Component> PartialEq for ComponentKey<C> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<C: Component> Eq for ComponentKey<C> {}

impl<C: Component> Hash for ComponentKey<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<C: Component> fmt::Debug for ComponentKey<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentKey")
            .field("name", &self.raw.name().to_string())
            .field("type", &self.raw.type_name())
            .finish()
    }
}

impl<C: Component> fmt::Display for ComponentKey<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.raw, f)
    }
}

/// The interning key registry.
///
/// An explicitly constructed handle (typically wrapped in an `Arc` and
/// shared between plugins and compilers); there is no hidden global
/// registry, which keeps tests isolated.
///
/// Writers are exclusive; readers run concurrently and only wait while a
/// write is in flight.
pub struct ComponentRegistry {
    table: RwLock<Intern>,
}

#[derive(Default)]
struct Intern {
    /// Keys in registration order.
    keys: Vec<AnyKey>,
    by_name: HashMap<Name, u32>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Intern::default()),
        }
    }

    /// Returns the key interned under `name`, creating it on first request.
    ///
    /// Idempotent: repeated calls with the same name and component type
    /// return the identical key. A repeated call with a different component
    /// type fails with [`SchemaError::SchemaConflict`].
    pub fn get_or_create<C: Component>(&self, name: Name) -> SchemaResult<ComponentKey<C>> {
        let mut table = self.table.write();
        if let Some(&index) = table.by_name.get(&name) {
            return table.keys[index as usize].typed::<C>();
        }
        let index = table.keys.len() as u32;
        let key = AnyKey(Arc::new(KeyData {
            name: name.clone(),
            index,
            type_id: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
        }));
        table.by_name.insert(name, index);
        table.keys.push(key.clone());
        log::debug!("interned component key `{key}`");
        key.typed::<C>()
    }

    /// Looks up an existing key without creating one.
    pub fn get(&self, name: &Name) -> Option<AnyKey> {
        let table = self.table.read();
        table
            .by_name
            .get(name)
            .map(|&index| table.keys[index as usize].clone())
    }

    /// Snapshot of all interned keys, in registration order.
    pub fn keys(&self) -> Vec<AnyKey> {
        self.table.read().keys.clone()
    }

    /// Number of interned keys.
    pub fn len(&self) -> usize {
        self.table.read().keys.len()
    }

    /// Whether no key has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A key reference resolved by name at most once, on first use.
///
/// Lets a plugin refer to another plugin's key without caring which of the
/// two registers first; resolution is deferred until the key is actually
/// needed, by which point registration has completed.
pub struct LazyKey<C: Component> {
    name: Name,
    cell: OnceLock<AnyKey>,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Component> LazyKey<C> {
    /// Creates an unresolved reference to `name`.
    pub fn new(name: Name) -> Self {
        Self {
            name,
            cell: OnceLock::new(),
            _marker: PhantomData,
        }
    }

    /// The name this reference resolves.
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Resolves against `registry`, caching the result.
    ///
    /// Fails with [`SchemaError::NotRegistered`] if no key exists under the
    /// name, and with [`SchemaError::SchemaConflict`] if the registered key
    /// guards a different component type. Failures are not cached; a later
    /// call can succeed once the key exists.
    pub fn get(&self, registry: &ComponentRegistry) -> SchemaResult<ComponentKey<C>> {
        if let Some(raw) = self.cell.get() {
            return raw.typed::<C>();
        }
        let raw = registry
            .get(&self.name)
            .ok_or_else(|| SchemaError::NotRegistered {
                name: self.name.to_string(),
            })?;
        let typed = raw.typed::<C>()?;
        // A racing resolver stores the same interned key; either winner is fine.
        let _ = self.cell.set(raw);
        Ok(typed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Health(#[allow(dead_code)] u32);
    impl Component for Health {}

    struct Mana;
    impl Component for Mana {}

    fn name(s: &str) -> Name {
        Name::parse(s).unwrap()
    }

    #[test]
    fn name_validation() {
        assert!(Name::new("demo", "health").is_ok());
        assert!(Name::new("demo", "sub/path.v2").is_ok());
        assert!(Name::new("", "health").is_err());
        assert!(Name::new("demo", "").is_err());
        assert!(Name::new("Demo", "health").is_err());
        assert!(Name::new("demo", "he alth").is_err());
        assert!(Name::parse("no-colon").is_err());
    }

    #[test]
    fn name_display_roundtrip() {
        let n = name("demo:sub/health");
        assert_eq!(Name::parse(&n.to_string()).unwrap(), n);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let registry = ComponentRegistry::new();
        let a = registry.get_or_create::<Health>(name("demo:health")).unwrap();
        let b = registry.get_or_create::<Health>(name("demo:health")).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn incompatible_type_conflicts() {
        let registry = ComponentRegistry::new();
        registry.get_or_create::<Health>(name("demo:health")).unwrap();
        let err = registry
            .get_or_create::<Mana>(name("demo:health"))
            .unwrap_err();
        assert!(matches!(err, SchemaError::SchemaConflict { .. }));
    }

    #[test]
    fn get_never_creates() {
        let registry = ComponentRegistry::new();
        assert!(registry.get(&name("demo:health")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn keys_snapshot_in_registration_order() {
        let registry = ComponentRegistry::new();
        registry.get_or_create::<Health>(name("demo:health")).unwrap();
        registry.get_or_create::<Mana>(name("demo:mana")).unwrap();
        let keys = registry.keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name().path(), "health");
        assert_eq!(keys[1].name().path(), "mana");
    }

    #[test]
    fn lazy_key_resolves_once() {
        let registry = ComponentRegistry::new();
        let lazy = LazyKey::<Health>::new(name("demo:health"));
        assert!(matches!(
            lazy.get(&registry),
            Err(SchemaError::NotRegistered { .. })
        ));

        let direct = registry.get_or_create::<Health>(name("demo:health")).unwrap();
        let resolved = lazy.get(&registry).unwrap();
        assert_eq!(resolved, direct);
    }

    #[test]
    fn lazy_key_type_mismatch() {
        let registry = ComponentRegistry::new();
        registry.get_or_create::<Health>(name("demo:health")).unwrap();
        let lazy = LazyKey::<Mana>::new(name("demo:health"));
        assert!(matches!(
            lazy.get(&registry),
            Err(SchemaError::SchemaConflict { .. })
        ));
    }
}
