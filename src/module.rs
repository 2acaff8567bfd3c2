//! Modules
//!
//! A module class declares what it imports, provides, controls and exports
//! through [`ModuleClass::metadata`]. A [`DynamicModule`] adds more
//! declarations to a module class at the import site. At scan time every
//! distinct module becomes one [`Module`] entity in the container.
//!
//! ```rust
//! use armature_di::{DynamicModule, ModuleClass, ModuleMetadata, ModuleReference, Provider};
//!
//! struct ConfigModule;
//!
//! impl ConfigModule {
//!     fn for_root(url: &str) -> DynamicModule {
//!         DynamicModule::new::<ConfigModule>()
//!             .provider(Provider::value("DATABASE_URL", url.to_string()))
//!             .export("DATABASE_URL")
//!             .global()
//!     }
//! }
//!
//! impl ModuleClass for ConfigModule {
//!     fn metadata(_: &mut ModuleMetadata) {}
//! }
//!
//! struct AppModule;
//!
//! impl ModuleClass for AppModule {
//!     fn metadata(module: &mut ModuleMetadata) {
//!         module.import(ConfigModule::for_root("postgres://localhost"));
//!     }
//! }
//!
//! let root = ModuleReference::of::<AppModule>();
//! assert!(matches!(root, ModuleReference::Class(_)));
//! ```

use crate::container::Container;
use crate::injectable::{Class, EnhancerSubtype};
use crate::logging::Logger;
use crate::metadata::{MetadataStore, keys};
use crate::provider::Provider;
use crate::resolver::ModuleRef;
use crate::scope::Scope;
use crate::token::{ForwardRef, Token};
use crate::wrapper::InstanceWrapper;
use crate::{DiError, Result};
use ahash::RandomState;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

// =============================================================================
// Declarations
// =============================================================================

/// A module class
pub trait ModuleClass: Send + Sync + 'static {
    /// Declare imports, providers, controllers and exports
    fn metadata(module: &mut ModuleMetadata);
}

pub(crate) fn define_module<M: ModuleClass>() {
    let store = MetadataStore::global();
    let id = TypeId::of::<M>();
    if store.has(id, keys::DEFINED) {
        return;
    }
    let mut metadata = ModuleMetadata::default();
    M::metadata(&mut metadata);
    store.define(id, keys::MODULE_WATERMARK, ());
    store.define(id, keys::MODULE_METADATA, metadata);
    store.define(id, keys::DEFINED, ());
}

impl Class {
    /// Handle to a module class
    #[inline]
    pub fn module<M: ModuleClass>() -> Self {
        Class::with_definition::<M>(define_module::<M>)
    }

    /// Static declarations of a module class, empty for non-modules
    pub(crate) fn module_metadata(&self) -> Arc<ModuleMetadata> {
        self.metadata(keys::MODULE_METADATA).unwrap_or_default()
    }
}

/// An exported token: a provider token or an imported module's class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Export(pub Token);

impl From<Token> for Export {
    fn from(token: Token) -> Self {
        Self(token)
    }
}

impl From<&str> for Export {
    fn from(token: &str) -> Self {
        Self(token.into())
    }
}

impl From<Class> for Export {
    fn from(class: Class) -> Self {
        Self(class.token())
    }
}

impl From<&Provider> for Export {
    fn from(provider: &Provider) -> Self {
        Self(provider.token().clone())
    }
}

impl From<&DynamicModule> for Export {
    fn from(module: &DynamicModule) -> Self {
        Self(module.module.token())
    }
}

/// Declarations of a module
#[derive(Clone, Default)]
pub struct ModuleMetadata {
    /// Import slots; `None` marks an empty slot
    pub imports: Vec<Option<ModuleReference>>,
    pub providers: Vec<Provider>,
    pub controllers: Vec<Class>,
    pub exports: Vec<Export>,
    pub global: bool,
}

impl ModuleMetadata {
    pub fn import(&mut self, module: impl Into<ModuleReference>) -> &mut Self {
        self.imports.push(Some(module.into()));
        self
    }

    /// Push a raw import slot
    pub fn import_slot(&mut self, slot: Option<ModuleReference>) -> &mut Self {
        self.imports.push(slot);
        self
    }

    pub fn provider(&mut self, provider: Provider) -> &mut Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(&mut self, providers: impl IntoIterator<Item = Provider>) -> &mut Self {
        self.providers.extend(providers);
        self
    }

    pub fn controller(&mut self, controller: Class) -> &mut Self {
        self.controllers.push(controller);
        self
    }

    pub fn export(&mut self, export: impl Into<Export>) -> &mut Self {
        self.exports.push(export.into());
        self
    }

    /// Make the module's exports visible to every module
    pub fn global(&mut self) -> &mut Self {
        self.global = true;
        self
    }
}

impl fmt::Debug for ModuleMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleMetadata")
            .field("imports", &self.imports.len())
            .field("providers", &self.providers)
            .field("controllers", &self.controllers)
            .field("exports", &self.exports)
            .field("global", &self.global)
            .finish()
    }
}

/// A module class plus extra declarations supplied where it is imported
#[derive(Clone, Debug)]
pub struct DynamicModule {
    pub module: Class,
    pub metadata: ModuleMetadata,
}

impl DynamicModule {
    pub fn new<M: ModuleClass>() -> Self {
        Self::for_class(Class::module::<M>())
    }

    pub fn for_class(module: Class) -> Self {
        Self {
            module,
            metadata: ModuleMetadata::default(),
        }
    }

    pub fn import(mut self, module: impl Into<ModuleReference>) -> Self {
        self.metadata.import(module);
        self
    }

    pub fn import_slot(mut self, slot: Option<ModuleReference>) -> Self {
        self.metadata.import_slot(slot);
        self
    }

    pub fn provider(mut self, provider: Provider) -> Self {
        self.metadata.provider(provider);
        self
    }

    pub fn providers(mut self, providers: impl IntoIterator<Item = Provider>) -> Self {
        self.metadata.providers(providers);
        self
    }

    pub fn controller(mut self, controller: Class) -> Self {
        self.metadata.controller(controller);
        self
    }

    pub fn export(mut self, export: impl Into<Export>) -> Self {
        self.metadata.export(export);
        self
    }

    pub fn global(mut self) -> Self {
        self.metadata.global();
        self
    }
}

/// Something that denotes a module in an import list
#[derive(Clone)]
pub enum ModuleReference {
    Class(Class),
    Dynamic(DynamicModule),
    /// Evaluated when the scanner reaches it
    Forward(ForwardRef<ModuleReference>),
    /// A dynamic module produced asynchronously
    Deferred(Shared<BoxFuture<'static, DynamicModule>>),
}

impl ModuleReference {
    #[inline]
    pub fn of<M: ModuleClass>() -> Self {
        Self::Class(Class::module::<M>())
    }

    /// A reference evaluated lazily; `thunk` may yield `None` while the
    /// referenced module is not declared yet
    pub fn forward<F>(thunk: F) -> Self
    where
        F: Fn() -> Option<ModuleReference> + Send + Sync + 'static,
    {
        Self::Forward(ForwardRef::new(thunk))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = DynamicModule> + Send + 'static,
    {
        Self::Deferred(future.boxed().shared())
    }

    /// `true` for a forward reference that currently yields nothing
    pub(crate) fn is_undefined(&self) -> bool {
        match self {
            Self::Forward(forward) => match forward.resolve() {
                Some(inner) => inner.is_undefined(),
                None => true,
            },
            _ => false,
        }
    }
}

impl From<Class> for ModuleReference {
    fn from(class: Class) -> Self {
        Self::Class(class)
    }
}

impl From<DynamicModule> for ModuleReference {
    fn from(module: DynamicModule) -> Self {
        Self::Dynamic(module)
    }
}

impl fmt::Debug for ModuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(class) => write!(f, "ModuleReference::Class({})", class.name()),
            Self::Dynamic(module) => {
                write!(f, "ModuleReference::Dynamic({})", module.module.name())
            }
            Self::Forward(_) => f.write_str("ModuleReference::Forward(..)"),
            Self::Deferred(_) => f.write_str("ModuleReference::Deferred(..)"),
        }
    }
}

// =============================================================================
// Module entity
// =============================================================================

type WrapperMap = IndexMap<Token, Arc<InstanceWrapper>, RandomState>;

/// One registered module
pub struct Module {
    id: u64,
    token: String,
    this: Weak<Module>,
    metatype: RwLock<Class>,
    is_global: AtomicBool,
    distance: AtomicU32,
    providers: RwLock<WrapperMap>,
    injectables: RwLock<WrapperMap>,
    controllers: RwLock<WrapperMap>,
    entry_provider_keys: RwLock<IndexSet<Token, RandomState>>,
    imports: RwLock<IndexMap<u64, Weak<Module>, RandomState>>,
    exports: RwLock<IndexSet<Token, RandomState>>,
}

impl Module {
    pub(crate) fn new(
        token: String,
        metatype: Class,
        container: Weak<Container>,
        logger: Logger,
    ) -> Arc<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        Arc::new_cyclic(|this: &Weak<Module>| {
            let module = Self {
                id: COUNTER.fetch_add(1, Ordering::Relaxed),
                token,
                this: this.clone(),
                metatype: RwLock::new(metatype),
                is_global: AtomicBool::new(false),
                distance: AtomicU32::new(1),
                providers: RwLock::new(IndexMap::with_hasher(RandomState::new())),
                injectables: RwLock::new(IndexMap::with_hasher(RandomState::new())),
                controllers: RwLock::new(IndexMap::with_hasher(RandomState::new())),
                entry_provider_keys: RwLock::new(IndexSet::with_hasher(RandomState::new())),
                imports: RwLock::new(IndexMap::with_hasher(RandomState::new())),
                exports: RwLock::new(IndexSet::with_hasher(RandomState::new())),
            };
            let module_ref = ModuleRef::new(container, this.clone(), logger);
            module.add_provider(Provider::value(Token::of::<ModuleRef>(), module_ref), None);
            module
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Structural token the module is registered under
    #[inline]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[inline]
    pub fn metatype(&self) -> Class {
        *self.metatype.read()
    }

    /// Module class name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.metatype().name()
    }

    #[inline]
    pub fn is_global(&self) -> bool {
        self.is_global.load(Ordering::Acquire)
    }

    pub(crate) fn set_global(&self) {
        self.is_global.store(true, Ordering::Release);
        self.distance.store(u32::MAX, Ordering::Release);
    }

    /// Depth in the import graph: 1 for the root module, larger for modules
    /// imported deeper, `u32::MAX` for global modules
    #[inline]
    pub fn distance(&self) -> u32 {
        self.distance.load(Ordering::Acquire)
    }

    pub(crate) fn set_distance(&self, distance: u32) {
        if self.is_global() {
            return;
        }
        self.distance.store(distance, Ordering::Release);
    }

    /// Install a replacement module class under this module's token
    pub(crate) fn reset_metatype(&self, metatype: Class) {
        *self.metatype.write() = metatype;
    }

    // -------------------------------------------------------------------------
    // Providers
    // -------------------------------------------------------------------------

    /// Register a provider, replacing any provider with the same token
    pub fn add_provider(&self, provider: Provider, subtype: Option<EnhancerSubtype>) -> Token {
        let token = provider.token().clone();
        if provider.scope() == Some(Scope::Transient) && self.has_provider(&token) {
            return token;
        }
        if self.is_entry_provider(&provider) {
            self.entry_provider_keys.write().insert(token.clone());
        }
        let wrapper = InstanceWrapper::from_provider(&provider, self.this.clone(), subtype);
        self.providers
            .write()
            .insert(token.clone(), Arc::new(wrapper));
        token
    }

    fn is_entry_provider(&self, provider: &Provider) -> bool {
        matches!(
            provider,
            Provider::Class { provide, use_class, .. }
                if *provide == use_class.token() && use_class.is_entry_provider()
        )
    }

    /// Register an enhancer (guard, interceptor, pipe, filter) and attach it to
    /// the controller or provider it decorates
    pub fn add_injectable(
        &self,
        injectable: Provider,
        subtype: EnhancerSubtype,
        host: Option<Class>,
    ) -> Arc<InstanceWrapper> {
        let token = injectable.token().clone();
        let wrapper = if injectable.bare_class().is_some() {
            let existing = self.injectables.read().get(&token).cloned();
            match existing {
                Some(wrapper) => wrapper,
                None => {
                    let wrapper = Arc::new(InstanceWrapper::from_provider(
                        &injectable,
                        self.this.clone(),
                        Some(subtype),
                    ));
                    self.injectables.write().insert(token, wrapper.clone());
                    wrapper
                }
            }
        } else {
            let wrapper = Arc::new(InstanceWrapper::from_provider(
                &injectable,
                self.this.clone(),
                Some(subtype),
            ));
            self.injectables.write().insert(token, wrapper.clone());
            wrapper
        };

        if let Some(host) = host {
            let host_token = host.token();
            let host_wrapper = self
                .controllers
                .read()
                .get(&host_token)
                .cloned()
                .or_else(|| self.providers.read().get(&host_token).cloned());
            if let Some(host_wrapper) = host_wrapper {
                host_wrapper.add_enhancer_metadata(&wrapper);
            }
        }
        wrapper
    }

    pub fn add_controller(&self, controller: Class) {
        let provider = Provider::Class {
            provide: controller.token(),
            use_class: controller,
            scope: None,
            durable: None,
        };
        let wrapper = InstanceWrapper::from_provider(&provider, self.this.clone(), None);
        self.controllers
            .write()
            .insert(controller.token(), Arc::new(wrapper));
    }

    /// Merge `provider` into the existing provider (or injectable) registered
    /// under `token`, keeping the wrapper's identity
    pub(crate) fn replace(&self, token: &Token, provider: &Provider, is_provider: bool) {
        let collection = if is_provider {
            &self.providers
        } else {
            &self.injectables
        };
        let existing = collection.read().get(token).cloned();
        if let Some(wrapper) = existing {
            wrapper.merge_with(provider);
        }
    }

    // -------------------------------------------------------------------------
    // Imports and exports
    // -------------------------------------------------------------------------

    pub fn add_import(&self, module: &Arc<Module>) {
        self.imports
            .write()
            .entry(module.id())
            .or_insert_with(|| Arc::downgrade(module));
    }

    /// Export a provider token or an imported module
    pub fn add_exported_provider_or_module(&self, export: &Export) -> Result<()> {
        let token = self.validate_exported_provider(&export.0)?;
        self.exports.write().insert(token);
        Ok(())
    }

    /// An export must name one of the module's providers or imported modules
    pub fn validate_exported_provider(&self, token: &Token) -> Result<Token> {
        if self.has_provider(token) {
            return Ok(token.clone());
        }
        let imported = self
            .imports()
            .iter()
            .any(|module| module.metatype().token() == *token);
        if !imported {
            return Err(DiError::UnknownExport {
                token: token.display_name(),
                module: self.name().to_owned(),
            });
        }
        Ok(token.clone())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[inline]
    pub fn has_provider(&self, token: &Token) -> bool {
        self.providers.read().contains_key(token)
    }

    #[inline]
    pub fn has_injectable(&self, token: &Token) -> bool {
        self.injectables.read().contains_key(token)
    }

    #[inline]
    pub fn has_export(&self, token: &Token) -> bool {
        self.exports.read().contains(token)
    }

    pub fn get_provider_by_key(&self, token: &Token) -> Option<Arc<InstanceWrapper>> {
        self.providers.read().get(token).cloned()
    }

    pub fn get_controller_by_key(&self, token: &Token) -> Option<Arc<InstanceWrapper>> {
        self.controllers.read().get(token).cloned()
    }

    pub fn get_injectable_by_key(&self, token: &Token) -> Option<Arc<InstanceWrapper>> {
        self.injectables.read().get(token).cloned()
    }

    /// Providers in registration order
    pub fn providers(&self) -> Vec<Arc<InstanceWrapper>> {
        self.providers.read().values().cloned().collect()
    }

    pub fn provider_tokens(&self) -> Vec<Token> {
        self.providers.read().keys().cloned().collect()
    }

    pub fn injectables(&self) -> Vec<Arc<InstanceWrapper>> {
        self.injectables.read().values().cloned().collect()
    }

    pub fn controllers(&self) -> Vec<Arc<InstanceWrapper>> {
        self.controllers.read().values().cloned().collect()
    }

    /// Providers whose class is marked as an entry provider
    pub fn entry_providers(&self) -> Vec<Arc<InstanceWrapper>> {
        let keys = self.entry_provider_keys.read();
        let providers = self.providers.read();
        keys.iter()
            .filter_map(|token| providers.get(token).cloned())
            .collect()
    }

    /// Imported modules, in import order
    pub fn imports(&self) -> Vec<Arc<Module>> {
        self.imports
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn exports(&self) -> Vec<Token> {
        self.exports.read().iter().cloned().collect()
    }
}

impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Module {}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("token", &self.token)
            .field("global", &self.is_global())
            .field("distance", &self.distance())
            .field("providers", &self.providers.read().len())
            .field("controllers", &self.controllers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arguments, Injectable, InjectableDefinition};

    struct UsersModule;
    impl ModuleClass for UsersModule {
        fn metadata(_: &mut ModuleMetadata) {}
    }

    struct OtherModule;
    impl ModuleClass for OtherModule {
        fn metadata(module: &mut ModuleMetadata) {
            module.global();
        }
    }

    struct UsersService;
    impl Injectable for UsersService {
        fn construct(_: &mut Arguments) -> crate::Result<Self> {
            Ok(UsersService)
        }
    }

    struct UsersController;
    impl Injectable for UsersController {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.controller();
        }
        fn construct(_: &mut Arguments) -> crate::Result<Self> {
            Ok(UsersController)
        }
    }

    struct AuthGuard;
    impl Injectable for AuthGuard {
        fn construct(_: &mut Arguments) -> crate::Result<Self> {
            Ok(AuthGuard)
        }
    }

    fn module<M: ModuleClass>() -> Arc<Module> {
        Module::new(
            Class::module::<M>().type_name().to_owned(),
            Class::module::<M>(),
            Weak::new(),
            Logger::disabled(),
        )
    }

    #[test]
    fn test_new_module_provides_module_ref() {
        let module = module::<UsersModule>();
        assert!(module.has_provider(&Token::of::<ModuleRef>()));
        assert_eq!(module.name(), "UsersModule");
        assert_eq!(module.distance(), 1);
    }

    #[test]
    fn test_add_provider_replaces_same_token() {
        let module = module::<UsersModule>();
        module.add_provider(Provider::class::<UsersService>(), None);
        let first = module.get_provider_by_key(&Token::of::<UsersService>()).unwrap();
        module.add_provider(Provider::class::<UsersService>(), None);
        let second = module.get_provider_by_key(&Token::of::<UsersService>()).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        let count = module
            .provider_tokens()
            .iter()
            .filter(|token| **token == Token::of::<UsersService>())
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_export_validation() {
        let users = module::<UsersModule>();
        users.add_provider(Provider::class::<UsersService>(), None);
        assert!(users
            .add_exported_provider_or_module(&Export::from(Token::of::<UsersService>()))
            .is_ok());
        assert!(users.has_export(&Token::of::<UsersService>()));

        let err = users
            .add_exported_provider_or_module(&Export::from("MISSING"))
            .unwrap_err();
        assert!(matches!(err, DiError::UnknownExport { ref token, .. } if token == "MISSING"));

        let other = module::<OtherModule>();
        users.add_import(&other);
        assert!(users
            .add_exported_provider_or_module(&Export::from(Class::module::<OtherModule>()))
            .is_ok());
    }

    #[test]
    fn test_add_import_is_a_set() {
        let users = module::<UsersModule>();
        let other = module::<OtherModule>();
        users.add_import(&other);
        users.add_import(&other);
        assert_eq!(users.imports().len(), 1);
    }

    #[test]
    fn test_injectable_attaches_to_host() {
        let module = module::<UsersModule>();
        module.add_controller(Class::of::<UsersController>());
        let guard = module.add_injectable(
            Provider::class::<AuthGuard>(),
            EnhancerSubtype::Guard,
            Some(Class::of::<UsersController>()),
        );
        let again = module.add_injectable(
            Provider::class::<AuthGuard>(),
            EnhancerSubtype::Guard,
            None,
        );
        assert!(Arc::ptr_eq(&guard, &again));

        let controller = module
            .get_controller_by_key(&Token::of::<UsersController>())
            .unwrap();
        assert_eq!(controller.enhancers().len(), 1);
        assert_eq!(guard.subtype(), Some(EnhancerSubtype::Guard));
    }

    #[test]
    fn test_global_module_distance() {
        let module = module::<OtherModule>();
        module.set_global();
        module.set_distance(3);
        assert!(module.is_global());
        assert_eq!(module.distance(), u32::MAX);
    }
}
