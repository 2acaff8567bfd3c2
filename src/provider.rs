//! Provider declarations
//!
//! A [`Provider`] tells a module how to produce the instance behind a token:
//! construct a class, hand out a value, run a factory, or alias another token.
//!
//! # Examples
//!
//! ```rust
//! use armature_di::{FactoryDependency, Provider, Scope, Token};
//!
//! #[derive(Debug)]
//! struct Config {
//!     url: String,
//! }
//!
//! let config = Provider::value("CONFIG", Config { url: "postgres://localhost".into() });
//! let pool = Provider::factory(
//!     "POOL",
//!     [FactoryDependency::required("CONFIG")],
//!     |mut args| async move {
//!         let config = args.next::<Config>()?;
//!         Ok(format!("pool for {}", config.url))
//!     },
//! )
//! .with_scope(Scope::Request);
//! let alias = Provider::existing("DB_POOL", "POOL");
//!
//! assert_eq!(config.token(), &Token::from("CONFIG"));
//! assert_eq!(pool.scope(), Some(Scope::Request));
//! assert_eq!(alias.token(), &Token::from("DB_POOL"));
//! ```

use crate::injectable::{Arguments, Class, Dependency, Injectable, Instance};
use crate::scope::Scope;
use crate::token::Token;
use crate::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Type-erased asynchronous factory
pub type FactoryFn = Arc<dyn Fn(Arguments) -> BoxFuture<'static, Result<Instance>> + Send + Sync>;

/// A factory parameter
#[derive(Debug, Clone)]
pub struct FactoryDependency {
    pub dependency: Dependency,
    pub optional: bool,
}

impl FactoryDependency {
    pub fn required(dependency: impl Into<Dependency>) -> Self {
        Self {
            dependency: dependency.into(),
            optional: false,
        }
    }

    pub fn optional(dependency: impl Into<Dependency>) -> Self {
        Self {
            dependency: dependency.into(),
            optional: true,
        }
    }
}

impl From<Token> for FactoryDependency {
    fn from(token: Token) -> Self {
        Self::required(token)
    }
}

impl From<&str> for FactoryDependency {
    fn from(token: &str) -> Self {
        Self::required(token)
    }
}

impl From<Class> for FactoryDependency {
    fn from(class: Class) -> Self {
        Self::required(class)
    }
}

/// How a token is provided
#[derive(Clone)]
pub enum Provider {
    /// Construct `use_class`. A bare class provider has `provide == use_class`.
    Class {
        provide: Token,
        use_class: Class,
        scope: Option<Scope>,
        durable: Option<bool>,
    },
    /// Hand out a ready-made value (always application scoped)
    Value { provide: Token, use_value: Instance },
    /// Await a factory over the `inject` dependencies
    Factory {
        provide: Token,
        use_factory: FactoryFn,
        inject: Vec<FactoryDependency>,
        scope: Option<Scope>,
        durable: Option<bool>,
    },
    /// Resolve to whatever `use_existing` resolves to
    Existing { provide: Token, use_existing: Token },
}

impl Provider {
    /// Bare class provider: `T` provided under its own token
    #[inline]
    pub fn class<T: Injectable>() -> Self {
        let class = Class::of::<T>();
        Self::Class {
            provide: class.token(),
            use_class: class,
            scope: None,
            durable: None,
        }
    }

    /// Provide `provide` by constructing `T`
    #[inline]
    pub fn use_class<T: Injectable>(provide: impl Into<Token>) -> Self {
        Self::Class {
            provide: provide.into(),
            use_class: Class::of::<T>(),
            scope: None,
            durable: None,
        }
    }

    /// Provide `provide` with `value`
    #[inline]
    pub fn value<V: Send + Sync + 'static>(provide: impl Into<Token>, value: V) -> Self {
        Self::Value {
            provide: provide.into(),
            use_value: Arc::new(value),
        }
    }

    /// Provide `provide` with an already shared instance
    #[inline]
    pub fn instance(provide: impl Into<Token>, instance: Instance) -> Self {
        Self::Value {
            provide: provide.into(),
            use_value: instance,
        }
    }

    /// Provide `provide` with the output of an async factory
    pub fn factory<F, Fut, V>(
        provide: impl Into<Token>,
        inject: impl IntoIterator<Item = FactoryDependency>,
        factory: F,
    ) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
        V: Send + Sync + 'static,
    {
        let use_factory: FactoryFn = Arc::new(move |args| {
            let output = factory(args);
            async move { output.await.map(|value| Arc::new(value) as Instance) }.boxed()
        });
        Self::Factory {
            provide: provide.into(),
            use_factory,
            inject: inject.into_iter().collect(),
            scope: None,
            durable: None,
        }
    }

    /// Alias `provide` to `use_existing`
    #[inline]
    pub fn existing(provide: impl Into<Token>, use_existing: impl Into<Token>) -> Self {
        Self::Existing {
            provide: provide.into(),
            use_existing: use_existing.into(),
        }
    }

    /// Override the scope (class and factory providers only)
    pub fn with_scope(mut self, new_scope: Scope) -> Self {
        match &mut self {
            Self::Class { scope, .. } | Self::Factory { scope, .. } => *scope = Some(new_scope),
            Self::Value { .. } | Self::Existing { .. } => {}
        }
        self
    }

    /// Mark request-scoped instances durable (class and factory providers only)
    pub fn durable(mut self) -> Self {
        match &mut self {
            Self::Class { durable, .. } | Self::Factory { durable, .. } => *durable = Some(true),
            Self::Value { .. } | Self::Existing { .. } => {}
        }
        self
    }

    /// The token this provider registers
    #[inline]
    pub fn token(&self) -> &Token {
        match self {
            Self::Class { provide, .. }
            | Self::Value { provide, .. }
            | Self::Factory { provide, .. }
            | Self::Existing { provide, .. } => provide,
        }
    }

    /// The class, if this is a bare class provider
    pub fn bare_class(&self) -> Option<Class> {
        match self {
            Self::Class {
                provide,
                use_class,
                scope: None,
                durable: None,
            } if *provide == use_class.token() => Some(*use_class),
            _ => None,
        }
    }

    /// Effective scope: explicit, else the class declaration, else `None`
    pub fn scope(&self) -> Option<Scope> {
        match self {
            Self::Class {
                scope, use_class, ..
            } => scope.or_else(|| use_class.scope_options().scope),
            Self::Factory { scope, .. } => *scope,
            Self::Value { .. } | Self::Existing { .. } => None,
        }
    }

    /// Effective durability flag
    pub fn is_durable(&self) -> Option<bool> {
        match self {
            Self::Class {
                durable, use_class, ..
            } => durable.or_else(|| use_class.scope_options().durable),
            Self::Factory { durable, .. } => *durable,
            Self::Value { .. } | Self::Existing { .. } => None,
        }
    }

    /// Structural description used to fingerprint dynamic modules
    pub(crate) fn fingerprint(&self) -> String {
        match self {
            Self::Class {
                provide,
                use_class,
                scope,
                durable,
            } => format!(
                "class:{provide:?}:{}:{scope:?}:{durable:?}",
                use_class.type_name()
            ),
            Self::Value { provide, use_value } => {
                format!("value:{provide:?}:{:p}", Arc::as_ptr(use_value))
            }
            Self::Factory {
                provide,
                use_factory,
                inject,
                scope,
                durable,
            } => format!(
                "factory:{provide:?}:{:p}:{}:{scope:?}:{durable:?}",
                Arc::as_ptr(use_factory),
                inject.len()
            ),
            Self::Existing {
                provide,
                use_existing,
            } => format!("existing:{provide:?}:{use_existing:?}"),
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class {
                provide,
                use_class,
                scope,
                ..
            } => f
                .debug_struct("Provider::Class")
                .field("provide", provide)
                .field("use_class", use_class)
                .field("scope", scope)
                .finish(),
            Self::Value { provide, .. } => f
                .debug_struct("Provider::Value")
                .field("provide", provide)
                .finish_non_exhaustive(),
            Self::Factory {
                provide,
                inject,
                scope,
                ..
            } => f
                .debug_struct("Provider::Factory")
                .field("provide", provide)
                .field("inject", inject)
                .field("scope", scope)
                .finish_non_exhaustive(),
            Self::Existing {
                provide,
                use_existing,
            } => f
                .debug_struct("Provider::Existing")
                .field("provide", provide)
                .field("use_existing", use_existing)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InjectableDefinition;

    struct Cache;

    impl Injectable for Cache {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.scope(Scope::Transient);
        }

        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Cache)
        }
    }

    #[test]
    fn test_bare_class_provider() {
        let provider = Provider::class::<Cache>();
        assert_eq!(provider.bare_class(), Some(Class::of::<Cache>()));
        assert_eq!(provider.token(), &Token::of::<Cache>());
        assert_eq!(provider.scope(), Some(Scope::Transient));

        let aliased = Provider::use_class::<Cache>("CACHE");
        assert!(aliased.bare_class().is_none());
    }

    #[test]
    fn test_explicit_scope_wins() {
        let provider = Provider::class::<Cache>().with_scope(Scope::Request).durable();
        assert_eq!(provider.scope(), Some(Scope::Request));
        assert_eq!(provider.is_durable(), Some(true));
        assert!(provider.bare_class().is_none());
    }

    #[test]
    fn test_value_ignores_scope() {
        let provider = Provider::value("PORT", 8080u16).with_scope(Scope::Request);
        assert_eq!(provider.scope(), None);
    }

    #[tokio::test]
    async fn test_factory_boxes_output() {
        let provider = Provider::factory("ANSWER", [], |_| async { Ok(42u32) });
        let Provider::Factory { use_factory, .. } = provider else {
            panic!("expected a factory provider");
        };
        let instance = use_factory(Arguments::new("ANSWER", Vec::new())).await.unwrap();
        assert_eq!(*instance.downcast::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_fingerprint_distinguishes_values() {
        let a = Provider::value("CONFIG", 1u8);
        let b = Provider::value("CONFIG", 1u8);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
    }
}
