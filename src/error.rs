//! Error types for dependency injection
//!
//! Every failure surfaced by scanning, instance loading and lookup is a
//! [`DiError`] variant. Messages name the offending module, token and the
//! module scope chain so the failing declaration can be located quickly.

use crate::Class;
use thiserror::Error;

/// Errors that can occur while scanning modules or resolving instances
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiError {
    /// An import slot held a forward reference that yielded nothing
    #[error(
        "Cannot scan module {module}: the import at index [{index}] is undefined. \
         Two modules probably import each other before either is fully declared; \
         wrap the reference with `ModuleReference::forward`. Scope [{scope}]"
    )]
    UndefinedModule {
        module: String,
        index: usize,
        scope: String,
    },

    /// An import slot was empty
    #[error(
        "Cannot scan module {module}: the import at index [{index}] is not a valid module \
         reference. Scope [{scope}]"
    )]
    InvalidModule {
        module: String,
        index: usize,
        scope: String,
    },

    /// A provider, controller or exception filter class was used where a module was expected
    #[error(
        "Class {class} is declared as a provider, controller or exception filter and cannot be \
         used as a module. Scope [{scope}]"
    )]
    InvalidClassModule { class: String, scope: String },

    /// An export names something the module neither provides nor imports
    #[error(
        "Cannot export {token} from module {module}: it is not provided by the module nor \
         exported by one of its imports"
    )]
    UnknownExport { token: String, module: String },

    /// Resolution (or module import registration) revisited an element of its own chain
    #[error("A circular dependency has been detected: {context}")]
    CircularDependency { context: String },

    /// A required dependency is not visible from the consuming module
    #[error(
        "Cannot resolve dependencies of {target} ({signature}). Make sure that the argument \
         {dependency} at {position} is available in the {module} context"
    )]
    UnknownDependencies {
        target: String,
        signature: String,
        dependency: String,
        position: String,
        module: String,
    },

    /// Lookup of a token that does not exist (or has no instance) in the context
    #[error("Could not find {token} element (this provider does not exist in the current context)")]
    UnknownElement { token: String },

    /// `get` was used on a request or transient scoped provider
    #[error(
        "{token} is marked as a scoped provider. Request and transient-scoped providers can't \
         be used with `get()`; use `resolve()` instead"
    )]
    InvalidClassScope { token: String },

    /// A module handle or class is not registered in the container
    #[error("Module {module} is not registered in the container")]
    UnknownModule { module: String },

    /// A forward reference handed to the container yielded nothing
    #[error("A forward reference yielded nothing while registering a module. Scope [{scope}]")]
    UndefinedForwardRef { scope: String },

    /// A resolved instance was not of the requested type
    #[error("Instance registered for {token} is not a {expected}")]
    TypeMismatch {
        token: String,
        expected: &'static str,
    },

    /// A constructor, factory or lifecycle hook failed
    #[error("Failed to create {token}: {reason}")]
    CreationFailed { token: String, reason: String },

    /// The container was locked after bootstrap
    #[error("Container is locked - modules and providers cannot be registered after bootstrap")]
    Locked,

    /// Internal error
    #[error("Internal DI error: {0}")]
    Internal(String),
}

impl DiError {
    /// Create an `UnknownElement` error
    #[inline]
    pub fn unknown_element(token: impl ToString) -> Self {
        Self::UnknownElement {
            token: token.to_string(),
        }
    }

    /// Create a `CreationFailed` error
    #[inline]
    pub fn creation_failed(token: impl ToString, reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            token: token.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a `TypeMismatch` error for the requested type `T`
    #[inline]
    pub fn type_mismatch<T: ?Sized + 'static>(token: impl ToString) -> Self {
        Self::TypeMismatch {
            token: token.to_string(),
            expected: std::any::type_name::<T>(),
        }
    }

    /// Create a `CircularDependency` error for a chain of names
    #[inline]
    pub fn circular<I, S>(chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let context = chain
            .into_iter()
            .map(|s| s.as_ref().to_owned())
            .collect::<Vec<_>>()
            .join(" -> ");
        Self::CircularDependency { context }
    }

    /// `true` when a dependency lookup failed because nothing provides the token
    #[inline]
    pub fn is_unknown_dependency(&self) -> bool {
        matches!(self, Self::UnknownDependencies { .. })
    }
}

/// Render a module scope chain as `A -> B -> C`
pub(crate) fn format_scope(scope: &[Class]) -> String {
    scope
        .iter()
        .map(|class| class.name())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_joins_chain() {
        let err = DiError::circular(["A", "B", "A"]);
        assert_eq!(
            err,
            DiError::CircularDependency {
                context: "A -> B -> A".into()
            }
        );
        assert!(err.to_string().contains("A -> B -> A"));
    }

    #[test]
    fn test_unknown_dependencies_message() {
        let err = DiError::UnknownDependencies {
            target: "UserService".into(),
            signature: "?, Cache".into(),
            dependency: "Database".into(),
            position: "index [0]".into(),
            module: "UsersModule".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("UserService (?, Cache)"));
        assert!(msg.contains("Database at index [0]"));
        assert!(msg.contains("UsersModule context"));
        assert!(err.is_unknown_dependency());
    }

    #[test]
    fn test_type_mismatch_names_type() {
        let err = DiError::type_mismatch::<String>("CONFIG");
        assert!(err.to_string().contains("alloc::string::String"));
    }
}
