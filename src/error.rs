//! Error taxonomy for schema compilation and container access.
//!
//! Configuration-time errors ([`SchemaConflict`](SchemaError::SchemaConflict),
//! [`DuplicateRegistration`](SchemaError::DuplicateRegistration),
//! [`UnsatisfiedDependency`](SchemaError::UnsatisfiedDependency),
//! [`CycleDetected`](SchemaError::CycleDetected)) surface during plugin
//! startup and permanently poison the dispatcher that observed them.
//! [`NotProvided`](SchemaError::NotProvided) is a per-call lookup failure and
//! poisons nothing.

use thiserror::Error;

use crate::dispatcher::LoadPhase;

/// Errors produced while registering, compiling, or accessing component
/// schemas.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// A namespaced name failed validation.
    #[error("invalid component name `{name}`: {reason}")]
    InvalidName {
        /// The rejected input.
        name: String,
        /// Which rule was violated.
        reason: &'static str,
    },

    /// The same name was registered with two incompatible component types.
    #[error("component key `{name}` requested twice with two different types: `{existing}` and `{requested}`")]
    SchemaConflict {
        /// The contested key name.
        name: String,
        /// Type the key was first created with.
        existing: &'static str,
        /// Type of the conflicting request.
        requested: &'static str,
    },

    /// A by-name lookup found no key.
    #[error("no component key registered under `{name}`")]
    NotRegistered {
        /// The name that was looked up.
        name: String,
    },

    /// The same key was registered twice on the same exact owner type.
    #[error("duplicate factory declarations for `{key}` on owner type `{owner}`: `{second}` and `{first}`")]
    DuplicateRegistration {
        /// The contested key name.
        key: String,
        /// The owner type both declarations target.
        owner: String,
        /// Implementation type of the earlier declaration.
        first: &'static str,
        /// Implementation type of the later declaration.
        second: &'static str,
    },

    /// One or more declared dependencies are absent from the registration
    /// set. Every missing edge is aggregated into a single report.
    #[error("unsatisfied component dependencies: {}", .missing.join("; "))]
    UnsatisfiedDependency {
        /// One `for <key>: <dependency>` entry per missing edge.
        missing: Vec<String>,
    },

    /// The dependency graph has a cycle. The path runs from the cycle's
    /// reentry point back to the origin.
    #[error("circular component dependency: {}", .path.join(" -> "))]
    CycleDetected {
        /// Key names along the offending chain.
        path: Vec<String>,
    },

    /// A component factory produced no value.
    #[error("component factory `{factory}` for `{key}` returned no component")]
    NullComponent {
        /// Key whose slot could not be filled.
        key: String,
        /// Implementation type of the offending factory.
        factory: &'static str,
    },

    /// Schema bootstrap re-entered itself on the same call path.
    #[error("circular loading: a plugin is probably {trigger} at the wrong time")]
    CircularUse {
        /// Description of the operation that likely triggered the bootstrap.
        trigger: String,
    },

    /// An operation restricted to one lifecycle phase was called in another.
    #[error("{caller} called at the wrong time (current phase: {phase})")]
    InvalidLifecyclePhase {
        /// The misused operation.
        caller: String,
        /// Phase the gate was actually in.
        phase: LoadPhase,
    },

    /// A runtime lookup asked a container for a key it does not hold.
    #[error("component `{key}` is not provided by this container")]
    NotProvided {
        /// The absent key's name.
        key: String,
    },
}

/// Convenience alias used by every fallible operation in this crate.
pub type SchemaResult<T> = Result<T, SchemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsatisfied_dependencies_aggregate() {
        let err = SchemaError::UnsatisfiedDependency {
            missing: vec![
                "for `a:x`: `a:y`".to_string(),
                "for `a:z`: `a:w`".to_string(),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("a:y"));
        assert!(msg.contains("a:w"));
    }

    #[test]
    fn cycle_path_display() {
        let err = SchemaError::CycleDetected {
            path: vec!["a:x".to_string(), "a:y".to_string(), "a:x".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "circular component dependency: a:x -> a:y -> a:x"
        );
    }

    #[test]
    fn errors_are_cloneable() {
        // Erred gates re-report the original diagnosis, which requires Clone.
        let err = SchemaError::NotProvided {
            key: "a:x".to_string(),
        };
        assert_eq!(err.clone(), err);
    }
}
