//! Explicit owner-type hierarchy.
//!
//! Owners ("the things components attach to") form a forest of type
//! descriptors supplied by the embedding domain: each [`OwnerType`] is a
//! cheap dense id with a display name and an optional parent. No language
//! inheritance is involved; the compiler only ever walks parent links.

use std::fmt;

/// Handle to one owner type descriptor.
///
/// Obtained from [`OwnerHierarchy::register_root`] or
/// [`OwnerHierarchy::register_subtype`]; only meaningful together with the
/// hierarchy that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerType {
    index: u32,
}

impl OwnerType {
    /// Dense index of this type within its hierarchy.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Debug for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnerType").field(&self.index).finish()
    }
}

struct OwnerNode {
    name: String,
    parent: Option<OwnerType>,
}

/// A forest of owner type descriptors with parent links.
///
/// Built up front by the embedding domain and then handed to the compiler
/// as an immutable, shared structure; the compiler never adds types on its
/// own.
///
/// # Example
///
/// ```
/// use slotted::OwnerHierarchy;
///
/// let mut hierarchy = OwnerHierarchy::new();
/// let entity = hierarchy.register_root("entity");
/// let living = hierarchy.register_subtype("living", entity);
/// let zombie = hierarchy.register_subtype("zombie", living);
///
/// let chain: Vec<_> = hierarchy.ancestors(zombie).collect();
/// assert_eq!(chain, [living, entity]);
/// ```
pub struct OwnerHierarchy {
    nodes: Vec<OwnerNode>,
}

impl OwnerHierarchy {
    /// Creates an empty hierarchy.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Registers a type with no parent.
    pub fn register_root(&mut self, name: &str) -> OwnerType {
        self.push(name, None)
    }

    /// Registers a subtype of `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` does not belong to this hierarchy.
    pub fn register_subtype(&mut self, name: &str, parent: OwnerType) -> OwnerType {
        assert!(
            (parent.index as usize) < self.nodes.len(),
            "parent type is not registered in this hierarchy"
        );
        self.push(name, Some(parent))
    }

    fn push(&mut self, name: &str, parent: Option<OwnerType>) -> OwnerType {
        let ty = OwnerType {
            index: self.nodes.len() as u32,
        };
        self.nodes.push(OwnerNode {
            name: name.to_string(),
            parent,
        });
        ty
    }

    /// Display name of a type.
    pub fn name(&self, ty: OwnerType) -> &str {
        &self.nodes[ty.index as usize].name
    }

    /// Direct parent, or `None` for roots.
    pub fn parent(&self, ty: OwnerType) -> Option<OwnerType> {
        self.nodes[ty.index as usize].parent
    }

    /// Whether a type has no parent.
    pub fn is_root(&self, ty: OwnerType) -> bool {
        self.parent(ty).is_none()
    }

    /// Iterates the ancestor chain from direct parent to root, excluding
    /// `ty` itself.
    pub fn ancestors(&self, ty: OwnerType) -> impl Iterator<Item = OwnerType> + '_ {
        let mut current = self.parent(ty);
        std::iter::from_fn(move || {
            let next = current?;
            current = self.parent(next);
            Some(next)
        })
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no type has been registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for OwnerHierarchy {
    fn default() -> Self {
        Self::new()
    }
}
