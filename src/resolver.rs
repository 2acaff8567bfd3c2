//! Instance lookup for application code
//!
//! [`InstanceLinksHost`] indexes every provider, controller and enhancer of a
//! bootstrapped container by token. The `get` family looks instances up
//! synchronously and refuses request and transient scoped providers, the
//! `resolve` family builds them in a context.
//!
//! [`ModuleRef`] is the per-module entry point: every module provides one,
//! so any provider can inject the resolver of the module hosting it.

use crate::container::Container;
use crate::injectable::{Injectable, Instance, downcast_instance};
use crate::injector::Injector;
use crate::logging::Logger;
use crate::module::Module;
use crate::provider::Provider;
use crate::scope::{ContextId, Scope};
use crate::token::Token;
use crate::wrapper::InstanceWrapper;
use crate::{DiError, Result};
use ahash::RandomState;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Lookup options for `get` and `resolve`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Only consider the providers of the selected module
    pub strict: bool,
    /// Return every match instead of the last registered one
    pub each: bool,
}

impl GetOptions {
    #[inline]
    pub fn strict() -> Self {
        Self {
            strict: true,
            each: false,
        }
    }

    #[inline]
    pub fn each(mut self) -> Self {
        self.each = true;
        self
    }
}

/// The collection of a module an [`InstanceLink`] points into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Providers,
    Controllers,
    Injectables,
}

/// A token registered in one module
#[derive(Clone)]
pub struct InstanceLink {
    pub token: Token,
    pub wrapper: Arc<InstanceWrapper>,
    pub module: Arc<Module>,
    pub collection: Collection,
}

impl fmt::Debug for InstanceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceLink")
            .field("token", &self.token)
            .field("module", &self.module.name())
            .field("collection", &self.collection)
            .finish()
    }
}

/// Token index over every module of a container
pub struct InstanceLinksHost {
    links: HashMap<Token, Vec<InstanceLink>, RandomState>,
}

impl InstanceLinksHost {
    pub fn new(modules: &[Arc<Module>]) -> Self {
        let mut links: HashMap<Token, Vec<InstanceLink>, RandomState> =
            HashMap::with_hasher(RandomState::new());
        for module in modules {
            let collections = [
                (Collection::Providers, module.providers()),
                (Collection::Injectables, module.injectables()),
                (Collection::Controllers, module.controllers()),
            ];
            for (collection, wrappers) in collections {
                for wrapper in wrappers {
                    links
                        .entry(wrapper.token().clone())
                        .or_default()
                        .push(InstanceLink {
                            token: wrapper.token().clone(),
                            wrapper,
                            module: module.clone(),
                            collection,
                        });
                }
            }
        }
        Self { links }
    }

    /// The last link registered for `token`, restricted to one module if
    /// `module_id` is given
    pub fn get(&self, token: &Token, module_id: Option<u64>) -> Result<&InstanceLink> {
        self.candidates(token, module_id)
            .last()
            .ok_or_else(|| DiError::unknown_element(token.display_name()))
    }

    /// Every link registered for `token`, in registration order
    pub fn get_all(&self, token: &Token, module_id: Option<u64>) -> Result<Vec<&InstanceLink>> {
        let links: Vec<&InstanceLink> = self.candidates(token, module_id).collect();
        if links.is_empty() {
            return Err(DiError::unknown_element(token.display_name()));
        }
        Ok(links)
    }

    fn candidates(&self, token: &Token, module_id: Option<u64>) -> impl Iterator<Item = &InstanceLink> {
        self.links
            .get(token)
            .into_iter()
            .flatten()
            .filter(move |link| module_id.is_none_or(|id| link.module.id() == id))
    }

    /// Number of distinct tokens indexed
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl fmt::Debug for InstanceLinksHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceLinksHost")
            .field("tokens", &self.links.len())
            .finish()
    }
}

// =============================================================================
// Shared lookup routines
// =============================================================================

fn find<'a>(
    links: &'a InstanceLinksHost,
    token: &Token,
    module: Option<&Module>,
    options: GetOptions,
) -> Result<Vec<&'a InstanceLink>> {
    let module_id = if options.strict {
        module.map(Module::id)
    } else {
        None
    };
    if options.each {
        links.get_all(token, module_id)
    } else {
        links.get(token, module_id).map(|link| vec![link])
    }
}

/// Instances of `token` built in the application-wide context
pub(crate) fn get_instances(
    links: &InstanceLinksHost,
    token: &Token,
    module: Option<&Module>,
    options: GetOptions,
) -> Result<Vec<Instance>> {
    find(links, token, module, options)?
        .into_iter()
        .map(|link| {
            let wrapper = &link.wrapper;
            if matches!(wrapper.scope(), Scope::Request | Scope::Transient) {
                return Err(DiError::InvalidClassScope {
                    token: token.display_name(),
                });
            }
            wrapper
                .instance()
                .ok_or_else(|| DiError::unknown_element(token.display_name()))
        })
        .collect()
}

/// Instances of `token` resolved in `context`
pub(crate) async fn resolve_instances(
    links: &InstanceLinksHost,
    injector: &Injector,
    token: &Token,
    module: Option<&Module>,
    context: &ContextId,
    options: GetOptions,
) -> Result<Vec<Instance>> {
    let found = find(links, token, module, options)?;
    try_join_all(
        found
            .into_iter()
            .map(|link| resolve_per_context(injector, link, context.clone())),
    )
    .await
}

async fn resolve_per_context(
    injector: &Injector,
    link: &InstanceLink,
    context: ContextId,
) -> Result<Instance> {
    let wrapper = &link.wrapper;
    if wrapper.is_dependency_tree_static() && !wrapper.is_transient() {
        return wrapper
            .instance()
            .ok_or_else(|| DiError::unknown_element(link.token.display_name()));
    }
    injector
        .load_per_context(wrapper.clone(), link.module.clone(), context)
        .await?
        .ok_or_else(|| DiError::unknown_element(link.token.display_name()))
}

fn single(mut instances: Vec<Instance>, token: &Token) -> Result<Instance> {
    instances
        .pop()
        .ok_or_else(|| DiError::unknown_element(token.display_name()))
}

// =============================================================================
// Module reference
// =============================================================================

/// How a token is scoped, as reported by [`ModuleRef::introspect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrospectionResult {
    pub scope: Scope,
}

/// Resolver bound to one module.
///
/// Lookups are strict by default: only the module's own providers are
/// considered. Pass [`GetOptions::default()`] to search the whole container.
pub struct ModuleRef {
    container: Weak<Container>,
    module: Weak<Module>,
    injector: Injector,
}

impl ModuleRef {
    pub(crate) fn new(container: Weak<Container>, module: Weak<Module>, logger: Logger) -> Self {
        Self {
            container,
            module,
            injector: Injector::new(logger),
        }
    }

    fn container(&self) -> Result<Arc<Container>> {
        self.container
            .upgrade()
            .ok_or_else(|| DiError::Internal("the container has been dropped".to_owned()))
    }

    fn module(&self) -> Result<Arc<Module>> {
        self.module
            .upgrade()
            .ok_or_else(|| DiError::Internal("the module has been dropped".to_owned()))
    }

    /// Instance of `T` from this module
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.get_with(GetOptions::strict())
    }

    pub fn get_with<T: Send + Sync + 'static>(&self, options: GetOptions) -> Result<Arc<T>> {
        let token = Token::of::<T>();
        let instance = self.get_token(&token, options)?;
        downcast_instance(instance, token)
    }

    /// Instance registered under `token`; the last match if several modules
    /// provide it
    pub fn get_token(&self, token: &Token, options: GetOptions) -> Result<Instance> {
        let instances = self.get_all(token, options)?;
        single(instances, token)
    }

    pub fn get_all(&self, token: &Token, options: GetOptions) -> Result<Vec<Instance>> {
        let container = self.container()?;
        let module = self.module()?;
        get_instances(container.instance_links(), token, Some(&module), options)
    }

    /// Resolve `T` in `context`, or in a fresh context if none is given
    pub async fn resolve<T: Send + Sync + 'static>(&self, context: Option<ContextId>) -> Result<Arc<T>> {
        let token = Token::of::<T>();
        let instance = self
            .resolve_token(&token, context, GetOptions::strict())
            .await?;
        downcast_instance(instance, token)
    }

    pub async fn resolve_token(
        &self,
        token: &Token,
        context: Option<ContextId>,
        options: GetOptions,
    ) -> Result<Instance> {
        let instances = self.resolve_all(token, context, options).await?;
        single(instances, token)
    }

    pub async fn resolve_all(
        &self,
        token: &Token,
        context: Option<ContextId>,
        options: GetOptions,
    ) -> Result<Vec<Instance>> {
        let container = self.container()?;
        let module = self.module()?;
        let context = context.unwrap_or_default();
        resolve_instances(
            container.instance_links(),
            &self.injector,
            token,
            Some(&module),
            &context,
            options,
        )
        .await
    }

    /// Build a new `T` against this module's providers without registering it
    pub async fn create<T: Injectable>(&self, context: Option<ContextId>) -> Result<Arc<T>> {
        let module = self.module()?;
        let context = context.unwrap_or_else(ContextId::static_context);
        let token = Token::of::<T>();
        let instance = self
            .injector
            .instantiate_detached(&Provider::class::<T>(), &module, context)
            .await?
            .ok_or_else(|| DiError::unknown_element(token.display_name()))?;
        downcast_instance(instance, token)
    }

    /// Attach `request` to `context`; providers injecting
    /// [`REQUEST`](crate::REQUEST) receive it
    pub fn register_request_by_context_id(&self, request: Instance, context: &ContextId) {
        context.set_payload(request);
    }

    /// Scope of the provider registered under `token`
    pub fn introspect(&self, token: &Token) -> Result<IntrospectionResult> {
        let container = self.container()?;
        let link = container.instance_links().get(token, None)?;
        Ok(IntrospectionResult {
            scope: link.wrapper.scope(),
        })
    }
}

impl fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRef")
            .field(
                "module",
                &self.module.upgrade().map(|module| module.name()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arguments, Class, ModuleClass, ModuleMetadata};

    struct CatsModule;
    impl ModuleClass for CatsModule {
        fn metadata(_: &mut ModuleMetadata) {}
    }

    struct DogsModule;
    impl ModuleClass for DogsModule {
        fn metadata(_: &mut ModuleMetadata) {}
    }

    struct Counter;
    impl Injectable for Counter {
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Counter)
        }
    }

    fn module<M: ModuleClass>() -> Arc<Module> {
        let class = Class::module::<M>();
        Module::new(class.type_name().to_owned(), class, Weak::new(), Logger::disabled())
    }

    #[test]
    fn test_links_pick_last_registration() {
        let cats = module::<CatsModule>();
        let dogs = module::<DogsModule>();
        cats.add_provider(Provider::value("NAME", "cats"), None);
        dogs.add_provider(Provider::value("NAME", "dogs"), None);

        let links = InstanceLinksHost::new(&[cats.clone(), dogs.clone()]);
        let token = Token::from("NAME");

        let last = links.get(&token, None).unwrap();
        assert_eq!(last.module.id(), dogs.id());
        let strict = links.get(&token, Some(cats.id())).unwrap();
        assert_eq!(strict.module.id(), cats.id());
        assert_eq!(links.get_all(&token, None).unwrap().len(), 2);
        assert!(matches!(
            links.get(&Token::from("MISSING"), None),
            Err(DiError::UnknownElement { .. })
        ));
    }

    #[test]
    fn test_get_rejects_scoped_providers() {
        let cats = module::<CatsModule>();
        cats.add_provider(
            Provider::class::<Counter>().with_scope(Scope::Request),
            None,
        );
        let links = InstanceLinksHost::new(&[cats.clone()]);

        let err = get_instances(&links, &Token::of::<Counter>(), None, GetOptions::default())
            .unwrap_err();
        assert!(matches!(err, DiError::InvalidClassScope { .. }));
    }

    #[test]
    fn test_get_unresolved_is_unknown_element() {
        let cats = module::<CatsModule>();
        cats.add_provider(Provider::class::<Counter>(), None);
        let links = InstanceLinksHost::new(&[cats]);

        let err = get_instances(&links, &Token::of::<Counter>(), None, GetOptions::default())
            .unwrap_err();
        assert!(matches!(err, DiError::UnknownElement { .. }));
    }

    #[tokio::test]
    async fn test_resolve_request_scoped_per_context() {
        let cats = module::<CatsModule>();
        cats.add_provider(
            Provider::class::<Counter>().with_scope(Scope::Request),
            None,
        );
        let links = InstanceLinksHost::new(&[cats]);
        let injector = Injector::new(Logger::disabled());
        let token = Token::of::<Counter>();
        let options = GetOptions::default();

        let first = ContextId::new();
        let second = ContextId::new();
        let a = resolve_instances(&links, &injector, &token, None, &first, options)
            .await
            .unwrap();
        let b = resolve_instances(&links, &injector, &token, None, &first, options)
            .await
            .unwrap();
        let c = resolve_instances(&links, &injector, &token, None, &second, options)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a[0], &b[0]));
        assert!(!Arc::ptr_eq(&a[0], &c[0]));
    }

    #[test]
    fn test_get_options() {
        let options = GetOptions::strict().each();
        assert!(options.strict && options.each);
        assert_eq!(GetOptions::default(), GetOptions { strict: false, each: false });
    }
}
