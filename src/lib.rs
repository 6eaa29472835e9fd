//! # Slotted
//!
//! Dependency-ordered component containers with compiled fixed-slot
//! layouts.
//!
//! Independent plugins attach typed components to long-lived owner objects
//! (entities, blocks, items, ...) without the owner knowing about them in
//! advance. Each registration declares a key, a factory and a dependency
//! set for one owner type; on first use the accumulated registrations are
//! compiled into a fixed-shape storage layout with deterministic
//! construction order and O(1) per-key access.
//!
//! ## Core Types
//!
//! - [`Name`] / [`ComponentKey`] / [`AnyKey`] — interned, process-unique
//!   component identities
//! - [`ComponentRegistry`] — hands out exactly one key per name
//! - [`OwnerHierarchy`] / [`OwnerType`] — explicit parent-linked forest of
//!   owner type descriptors
//! - [`SchemaCompiler`] — runs plugins once, merges inherited
//!   registrations, sorts by dependencies, caches one compiled factory per
//!   owner type
//! - [`Container`] — the opaque storage object; key set frozen at birth
//! - [`ContainerFactoryBuilder`] — one-off factories without a hierarchy
//!
//! ## Bootstrap
//!
//! - [`LoadGate`] — reentrancy-safe run-exactly-once initialization with
//!   terminal loaded/erred outcomes
//! - [`OwnerPlugin`] — the registration-phase participant interface
//!
//! Every fallible operation returns [`SchemaResult`]; see [`SchemaError`]
//! for the failure taxonomy.
//!
//! See `DESIGN.md` in this repository for architecture decisions.

mod compiler;
mod component;
mod container;
mod dispatcher;
mod error;
mod hierarchy;
mod key;
pub mod registration;

pub use compiler::{plugin_fn, OwnerPlugin, OwnerPredicate, SchemaCompiler};
pub use component::Component;
pub use container::{
    BuildContext, CompiledContainerFactory, Container, ContainerFactoryBuilder, ContainerLayout,
};
pub use dispatcher::{GatedInit, LoadGate, LoadPhase};
pub use error::{SchemaError, SchemaResult};
pub use hierarchy::{OwnerHierarchy, OwnerType};
pub use key::{AnyKey, ComponentKey, ComponentRegistry, LazyKey, Name};
pub use registration::{QualifiedFactory, RegistrationSet, SharedFactory};
