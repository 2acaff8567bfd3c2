//! Provider scopes and request context identities
//!
//! A provider's [`Scope`] decides how many instances exist: one per
//! application, one per [`ContextId`], or one per consumer. Request-scoped
//! and transient instances built for a context are owned by that
//! `ContextId`, so dropping the last clone of a context releases them.

use crate::logging::{Logger, log_event};
use crate::token::Token;
use crate::wrapper::InstanceHost;
use crate::{DiError, Instance};
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime of a provider's instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// One instance shared by the whole application
    #[default]
    Default,
    /// One instance per context id
    Request,
    /// One instance per consumer (and context id)
    Transient,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "DEFAULT"),
            Self::Request => write!(f, "REQUEST"),
            Self::Transient => write!(f, "TRANSIENT"),
        }
    }
}

impl FromStr for Scope {
    type Err = DiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "singleton" => Ok(Self::Default),
            "request" => Ok(Self::Request),
            "transient" => Ok(Self::Transient),
            other => Err(DiError::Internal(format!("invalid provider scope: {other}"))),
        }
    }
}

/// Scope declared on an injectable class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeOptions {
    pub scope: Option<Scope>,
    pub durable: Option<bool>,
}

/// Id of the shared, application-wide context
pub const STATIC_CONTEXT_ID: u64 = 1;

/// What a [`ContextIdResolver`] knows about the component being resolved
#[derive(Debug, Clone)]
pub struct HostComponentInfo {
    pub token: Token,
    pub is_tree_durable: bool,
}

/// Redirects resolution of durable subtrees to a long-lived context
pub trait ContextIdResolver: Send + Sync {
    /// The context in which the described component should be resolved.
    /// `None` keeps the context the resolver is attached to; returning a clone
    /// of that context instead would keep it alive forever.
    fn resolve(&self, info: &HostComponentInfo) -> Option<ContextId>;
}

impl<F> ContextIdResolver for F
where
    F: Fn(&HostComponentInfo) -> Option<ContextId> + Send + Sync,
{
    fn resolve(&self, info: &HostComponentInfo) -> Option<ContextId> {
        self(info)
    }
}

/// Attaches a [`ContextIdResolver`] to freshly created request contexts
pub trait ContextIdStrategy: Send + Sync {
    /// Called once per request context. Return `None` to resolve every
    /// component in `context_id` itself.
    fn attach(
        &self,
        context_id: &ContextId,
        request: &Instance,
    ) -> Option<Arc<dyn ContextIdResolver>>;
}

pub(crate) type HostKey = (u64, u64);

struct ContextInner {
    id: u64,
    hosts: DashMap<HostKey, Arc<InstanceHost>, RandomState>,
    resolver: OnceCell<Arc<dyn ContextIdResolver>>,
    payload: OnceCell<Instance>,
}

/// Identity of one logical request.
///
/// Cloning is cheap; all clones share the instances built for the context.
#[derive(Clone)]
pub struct ContextId {
    inner: Arc<ContextInner>,
}

static STATIC_CONTEXT: Lazy<ContextId> = Lazy::new(|| ContextId::with_id(STATIC_CONTEXT_ID));

impl ContextId {
    /// Generate a new unique context id.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(STATIC_CONTEXT_ID + 1);
        Self::with_id(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    fn with_id(id: u64) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                hosts: DashMap::with_capacity_and_hasher_and_shard_amount(
                    0,
                    RandomState::new(),
                    8,
                ),
                resolver: OnceCell::new(),
                payload: OnceCell::new(),
            }),
        }
    }

    /// The application-wide context in which singletons live
    #[inline]
    pub fn static_context() -> Self {
        STATIC_CONTEXT.clone()
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// `true` for the application-wide context
    #[inline]
    pub fn is_static(&self) -> bool {
        self.inner.id == STATIC_CONTEXT_ID
    }

    /// Resolver attached by a [`ContextIdStrategy`]
    #[inline]
    pub fn resolver(&self) -> Option<&Arc<dyn ContextIdResolver>> {
        self.inner.resolver.get()
    }

    /// Attach a resolver. Returns `false` if one is already attached.
    pub fn set_resolver(&self, resolver: Arc<dyn ContextIdResolver>) -> bool {
        self.inner.resolver.set(resolver).is_ok()
    }

    /// Request object this context was created for
    #[inline]
    pub fn payload(&self) -> Option<&Instance> {
        self.inner.payload.get()
    }

    /// Attach the request object this context stands for; ignored if one is
    /// already attached
    pub fn set_payload(&self, payload: Instance) {
        let _ = self.inner.payload.set(payload);
    }

    /// Host for `wrapper_id`, keyed by the consuming wrapper for transients
    pub(crate) fn host(&self, wrapper_id: u64, inquirer_id: u64) -> Arc<InstanceHost> {
        self.inner
            .hosts
            .entry((wrapper_id, inquirer_id))
            .or_insert_with(|| Arc::new(InstanceHost::new()))
            .clone()
    }

    pub(crate) fn replace_host(&self, key: HostKey, host: Arc<InstanceHost>) {
        self.inner.hosts.insert(key, host);
    }

    /// Number of instance hosts created for this context
    #[inline]
    pub fn host_count(&self) -> usize {
        self.inner.hosts.len()
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ContextId {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ContextId {}

impl Hash for ContextId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextId")
            .field("id", &self.inner.id)
            .field("durable_resolver", &self.inner.resolver.get().is_some())
            .finish()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context-{}", self.inner.id)
    }
}

/// Create a fresh request context id
#[inline]
pub fn create_context_id() -> ContextId {
    ContextId::new()
}

/// Creates context ids for incoming requests, applying the configured
/// [`ContextIdStrategy`] if any
#[derive(Clone, Default)]
pub struct ContextIdFactory {
    strategy: Option<Arc<dyn ContextIdStrategy>>,
    logger: Logger,
}

impl ContextIdFactory {
    pub fn new(strategy: Option<Arc<dyn ContextIdStrategy>>, logger: Logger) -> Self {
        Self { strategy, logger }
    }

    /// A plain context id with no request attached
    pub fn create(&self) -> ContextId {
        let context = ContextId::new();
        log_event!(self.logger, debug, context_id = context.id(), "Creating new context id");
        context
    }

    /// A context id carrying `request`, with the strategy's resolver attached
    pub fn get_by_request(&self, request: Instance) -> ContextId {
        let context = ContextId::new();
        let resolver = self
            .strategy
            .as_ref()
            .and_then(|strategy| strategy.attach(&context, &request));
        log_event!(
            self.logger,
            debug,
            context_id = context.id(),
            durable = resolver.is_some(),
            "Creating context id for request"
        );
        if let Some(resolver) = resolver {
            context.set_resolver(resolver);
        }
        context.set_payload(request);
        context
    }
}

impl fmt::Debug for ContextIdFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextIdFactory")
            .field("strategy", &self.strategy.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ids_are_unique() {
        let a = ContextId::new();
        let b = ContextId::new();
        assert_ne!(a, b);
        assert!(!a.is_static());
        assert!(ContextId::static_context().is_static());
        assert_eq!(ContextId::static_context(), ContextId::static_context());
    }

    #[test]
    fn test_hosts_are_shared_between_clones() {
        let ctx = ContextId::new();
        let clone = ctx.clone();
        let a = ctx.host(10, 0);
        let b = clone.host(10, 0);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &ctx.host(10, 11)));
        assert_eq!(ctx.host_count(), 2);
    }

    #[test]
    fn test_scope_parse_and_display() {
        assert_eq!("request".parse::<Scope>().unwrap(), Scope::Request);
        assert_eq!("TRANSIENT".parse::<Scope>().unwrap(), Scope::Transient);
        assert!("weekly".parse::<Scope>().is_err());
        assert_eq!(Scope::default().to_string(), "DEFAULT");
    }

    #[test]
    fn test_factory_attaches_strategy_resolver() {
        struct Tenants(ContextId);

        impl ContextIdStrategy for Tenants {
            fn attach(
                &self,
                _context_id: &ContextId,
                _request: &Instance,
            ) -> Option<Arc<dyn ContextIdResolver>> {
                let durable = self.0.clone();
                Some(Arc::new(move |info: &HostComponentInfo| {
                    info.is_tree_durable.then(|| durable.clone())
                }))
            }
        }

        let tenant = ContextId::new();
        let factory =
            ContextIdFactory::new(Some(Arc::new(Tenants(tenant.clone()))), Logger::disabled());
        let ctx = factory.get_by_request(Arc::new("req-1".to_string()));

        let resolver = ctx.resolver().unwrap();
        let durable = resolver.resolve(&HostComponentInfo {
            token: Token::from("X"),
            is_tree_durable: true,
        });
        assert_eq!(durable, Some(tenant));
        let own = resolver.resolve(&HostComponentInfo {
            token: Token::from("X"),
            is_tree_durable: false,
        });
        assert!(own.is_none());
        assert!(ctx.payload().is_some());
    }
}
