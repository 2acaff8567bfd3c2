//! Injectable classes
//!
//! A class is a Rust type implementing [`Injectable`]. Its declaration
//! (constructor parameter tokens, optional parameters, property dependencies,
//! scope, enhancers, lifecycle hooks) is written into the
//! [`MetadataStore`](crate::MetadataStore) the first time anything reads the
//! class's metadata.
//!
//! # Example
//!
//! ```rust
//! use armature_di::{Arguments, Injectable, InjectableDefinition, Result, Scope};
//! use std::sync::Arc;
//!
//! struct Database;
//! impl Injectable for Database {
//!     fn construct(_: &mut Arguments) -> Result<Self> {
//!         Ok(Database)
//!     }
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! impl Injectable for UserService {
//!     fn define(def: &mut InjectableDefinition<Self>) {
//!         def.param::<Database>().scope(Scope::Request);
//!     }
//!
//!     fn construct(args: &mut Arguments) -> Result<Self> {
//!         Ok(UserService { db: args.next()? })
//!     }
//! }
//! ```

use crate::hooks::LifecycleHooks;
use crate::metadata::{MetadataStore, keys};
use crate::scope::{Scope, ScopeOptions};
use crate::token::{ForwardRef, Token, short_type_name};
use crate::{DiError, Result};
use indexmap::IndexMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

/// A type-erased, shareable provider instance
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Downcast an instance to `T`, reporting `token` on mismatch
#[inline]
pub fn downcast_instance<T: Send + Sync + 'static>(
    instance: Instance,
    token: impl fmt::Display,
) -> Result<Arc<T>> {
    instance
        .downcast::<T>()
        .map_err(|_| DiError::type_mismatch::<T>(token))
}

// =============================================================================
// Class handle
// =============================================================================

/// Handle to a class: a Rust type plus the routine that records its metadata
#[derive(Clone, Copy)]
pub struct Class {
    id: TypeId,
    type_name: &'static str,
    ensure: fn(),
}

fn already_defined() {}

impl Class {
    /// Handle to an injectable class
    #[inline]
    pub fn of<T: Injectable>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            ensure: define_injectable::<T>,
        }
    }

    #[inline]
    pub(crate) fn with_definition<T: 'static>(ensure: fn()) -> Self {
        Self {
            id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            ensure,
        }
    }

    #[inline]
    pub(crate) fn undefined<T: 'static>() -> Self {
        Self::with_definition::<T>(already_defined)
    }

    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name without the module path
    #[inline]
    pub fn name(&self) -> &'static str {
        short_type_name(self.type_name)
    }

    /// Fully qualified type name
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The class token
    #[inline]
    pub fn token(&self) -> Token {
        Token::Type(self.id, self.type_name)
    }

    /// Record the class declaration if this is the first reference
    #[inline]
    pub(crate) fn ensure_defined(&self) {
        (self.ensure)()
    }

    /// Read class metadata
    #[inline]
    pub fn metadata<V: Any + Send + Sync>(&self, key: &'static str) -> Option<Arc<V>> {
        self.ensure_defined();
        MetadataStore::global().get(self.id, key)
    }

    #[inline]
    pub fn has_metadata(&self, key: &'static str) -> bool {
        self.ensure_defined();
        MetadataStore::global().has(self.id, key)
    }

    pub fn is_injectable(&self) -> bool {
        self.has_metadata(keys::INJECTABLE_WATERMARK)
    }

    pub fn is_controller(&self) -> bool {
        self.has_metadata(keys::CONTROLLER_WATERMARK)
    }

    pub fn is_exception_filter(&self) -> bool {
        self.has_metadata(keys::CATCH_WATERMARK)
    }

    pub fn is_entry_provider(&self) -> bool {
        self.has_metadata(keys::ENTRY_PROVIDER_WATERMARK)
    }

    pub fn is_module(&self) -> bool {
        self.has_metadata(keys::MODULE_WATERMARK)
    }

    /// Declared scope options, default if none were declared
    pub fn scope_options(&self) -> ScopeOptions {
        self.metadata::<ScopeOptions>(keys::SCOPE_OPTIONS)
            .map(|options| *options)
            .unwrap_or_default()
    }

    pub(crate) fn constructor(&self) -> Option<ClassConstructor> {
        self.metadata::<ClassConstructor>(keys::CONSTRUCTOR)
            .map(|ctor| *ctor)
    }

    pub(crate) fn hooks(&self) -> Option<Arc<LifecycleHooks>> {
        self.metadata(keys::LIFECYCLE_HOOKS)
    }

    /// Constructor parameters with self-declared overrides applied
    pub(crate) fn constructor_dependencies(&self) -> Vec<Dependency> {
        let mut params: Vec<Dependency> = self
            .metadata::<Vec<Token>>(keys::PARAMTYPES)
            .map(|tokens| tokens.iter().cloned().map(Dependency::Token).collect())
            .unwrap_or_default();
        if let Some(overrides) = self.metadata::<Vec<(usize, Dependency)>>(keys::SELF_DECLARED_DEPS) {
            for (index, dependency) in overrides.iter() {
                if *index >= params.len() {
                    params.resize_with(*index + 1, || Dependency::Undefined);
                }
                params[*index] = dependency.clone();
            }
        }
        params
    }

    pub(crate) fn optional_dependencies(&self) -> Arc<Vec<usize>> {
        self.metadata(keys::OPTIONAL_DEPS).unwrap_or_default()
    }

    pub(crate) fn property_dependencies(&self) -> Arc<Vec<PropertyDependency>> {
        self.metadata(keys::PROPERTY_DEPS).unwrap_or_default()
    }

    /// Class-level enhancers of one kind
    pub(crate) fn enhancers(&self, subtype: EnhancerSubtype) -> Arc<Vec<EnhancerRef>> {
        self.metadata(subtype.metadata_key()).unwrap_or_default()
    }

    pub(crate) fn methods(&self) -> Arc<IndexMap<&'static str, MethodDefinition>> {
        self.metadata(keys::METHODS).unwrap_or_default()
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Class {}

impl Hash for Class {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Class({})", self.name())
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Class> for Token {
    fn from(class: Class) -> Self {
        class.token()
    }
}

impl From<&Class> for Token {
    fn from(class: &Class) -> Self {
        class.token()
    }
}

// =============================================================================
// Injectable trait
// =============================================================================

/// A class the injector can construct.
///
/// `define` declares constructor parameters and everything else the scanner
/// reads; `construct` receives the resolved parameters in declaration order.
pub trait Injectable: Send + Sync + Sized + 'static {
    /// Declare dependencies, scope and enhancers
    fn define(_definition: &mut InjectableDefinition<Self>) {}

    /// Build an instance from resolved constructor arguments
    fn construct(args: &mut Arguments) -> Result<Self>;

    /// Receive a resolved property dependency before the instance is shared
    fn inject_property(&mut self, key: &'static str, _value: Option<Instance>) -> Result<()> {
        Err(DiError::creation_failed(
            short_type_name(std::any::type_name::<Self>()),
            format!("property `{key}` is declared but not accepted"),
        ))
    }
}

/// Kind of enhancer attached to a controller or provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnhancerSubtype {
    Guard,
    Interceptor,
    Pipe,
    Filter,
}

impl EnhancerSubtype {
    pub const ALL: [EnhancerSubtype; 4] = [Self::Guard, Self::Interceptor, Self::Pipe, Self::Filter];

    /// Metadata key holding class-level enhancers of this kind
    pub fn metadata_key(self) -> &'static str {
        match self {
            Self::Guard => keys::GUARDS,
            Self::Interceptor => keys::INTERCEPTORS,
            Self::Pipe => keys::PIPES,
            Self::Filter => keys::EXCEPTION_FILTERS,
        }
    }

    /// Application-level registration token for this kind
    pub fn application_token(self) -> &'static str {
        match self {
            Self::Guard => crate::token::APP_GUARD,
            Self::Interceptor => crate::token::APP_INTERCEPTOR,
            Self::Pipe => crate::token::APP_PIPE,
            Self::Filter => crate::token::APP_FILTER,
        }
    }

    /// The kind registered by an application-level token, if `token` is one
    pub fn from_application_token(token: &Token) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|subtype| token.is_name(subtype.application_token()))
    }
}

impl fmt::Display for EnhancerSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Guard => "guard",
            Self::Interceptor => "interceptor",
            Self::Pipe => "pipe",
            Self::Filter => "filter",
        };
        f.write_str(name)
    }
}

/// An enhancer declared on a class or method: a class the container
/// instantiates, or a ready-made instance
#[derive(Clone)]
pub enum EnhancerRef {
    Class(Class),
    Instance(Instance),
}

impl EnhancerRef {
    #[inline]
    pub fn class<T: Injectable>() -> Self {
        Self::Class(Class::of::<T>())
    }

    #[inline]
    pub fn instance<T: Send + Sync + 'static>(value: T) -> Self {
        Self::Instance(Arc::new(value))
    }
}

impl From<Class> for EnhancerRef {
    fn from(class: Class) -> Self {
        Self::Class(class)
    }
}

impl fmt::Debug for EnhancerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(class) => write!(f, "EnhancerRef::Class({})", class.name()),
            Self::Instance(_) => f.write_str("EnhancerRef::Instance(..)"),
        }
    }
}

/// Enhancers declared on one handler method
#[derive(Debug, Clone, Default)]
pub struct MethodDefinition {
    guards: Vec<EnhancerRef>,
    interceptors: Vec<EnhancerRef>,
    pipes: Vec<EnhancerRef>,
    filters: Vec<EnhancerRef>,
    param_pipes: Vec<(usize, Vec<EnhancerRef>)>,
}

impl MethodDefinition {
    pub fn use_guards(&mut self, guards: impl IntoIterator<Item = EnhancerRef>) -> &mut Self {
        self.guards.extend(guards);
        self
    }

    pub fn use_interceptors(
        &mut self,
        interceptors: impl IntoIterator<Item = EnhancerRef>,
    ) -> &mut Self {
        self.interceptors.extend(interceptors);
        self
    }

    pub fn use_pipes(&mut self, pipes: impl IntoIterator<Item = EnhancerRef>) -> &mut Self {
        self.pipes.extend(pipes);
        self
    }

    pub fn use_filters(&mut self, filters: impl IntoIterator<Item = EnhancerRef>) -> &mut Self {
        self.filters.extend(filters);
        self
    }

    /// Pipes bound to one handler parameter
    pub fn param_pipes(
        &mut self,
        index: usize,
        pipes: impl IntoIterator<Item = EnhancerRef>,
    ) -> &mut Self {
        self.param_pipes.push((index, pipes.into_iter().collect()));
        self
    }

    pub(crate) fn enhancers(&self, subtype: EnhancerSubtype) -> &[EnhancerRef] {
        match subtype {
            EnhancerSubtype::Guard => &self.guards,
            EnhancerSubtype::Interceptor => &self.interceptors,
            EnhancerSubtype::Pipe => &self.pipes,
            EnhancerSubtype::Filter => &self.filters,
        }
    }

    pub(crate) fn parameter_pipes(&self) -> impl Iterator<Item = &EnhancerRef> {
        self.param_pipes.iter().flat_map(|(_, pipes)| pipes.iter())
    }
}

// =============================================================================
// Dependencies
// =============================================================================

/// One declared dependency
#[derive(Clone)]
pub enum Dependency {
    Token(Token),
    Forward(ForwardRef<Token>),
    /// A parameter whose token could not be determined
    Undefined,
}

impl Dependency {
    /// The token to look up, `None` if it cannot be determined yet
    pub fn token(&self) -> Option<Token> {
        match self {
            Self::Token(token) => Some(token.clone()),
            Self::Forward(forward) => forward.resolve(),
            Self::Undefined => None,
        }
    }

    /// Name used in error messages
    pub(crate) fn describe(&self) -> String {
        match self.token() {
            Some(token) => token.display_name(),
            None => "dependency".to_owned(),
        }
    }
}

impl From<Token> for Dependency {
    fn from(token: Token) -> Self {
        Self::Token(token)
    }
}

impl From<&str> for Dependency {
    fn from(token: &str) -> Self {
        Self::Token(token.into())
    }
}

impl From<Class> for Dependency {
    fn from(class: Class) -> Self {
        Self::Token(class.token())
    }
}

impl From<ForwardRef<Token>> for Dependency {
    fn from(forward: ForwardRef<Token>) -> Self {
        Self::Forward(forward)
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(token) => write!(f, "Dependency({token:?})"),
            Self::Forward(_) => f.write_str("Dependency(forward)"),
            Self::Undefined => f.write_str("Dependency(undefined)"),
        }
    }
}

/// A dependency assigned to a named property after construction
#[derive(Debug, Clone)]
pub struct PropertyDependency {
    pub key: &'static str,
    pub dependency: Dependency,
    pub optional: bool,
}

// =============================================================================
// Definition builder
// =============================================================================

/// Declaration of an injectable class, filled in by [`Injectable::define`]
pub struct InjectableDefinition<T> {
    params: Vec<Token>,
    self_declared: Vec<(usize, Dependency)>,
    optional: Vec<usize>,
    properties: Vec<PropertyDependency>,
    scope: ScopeOptions,
    watermarks: Vec<&'static str>,
    enhancers: Vec<(EnhancerSubtype, EnhancerRef)>,
    methods: IndexMap<&'static str, MethodDefinition>,
    custom: Vec<(&'static str, Instance)>,
    pub(crate) hooks: LifecycleHooks,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Injectable> InjectableDefinition<T> {
    fn new() -> Self {
        Self {
            params: Vec::new(),
            self_declared: Vec::new(),
            optional: Vec::new(),
            properties: Vec::new(),
            scope: ScopeOptions::default(),
            watermarks: Vec::new(),
            enhancers: Vec::new(),
            methods: IndexMap::new(),
            custom: Vec::new(),
            hooks: LifecycleHooks::default(),
            _marker: PhantomData,
        }
    }

    /// Append a constructor parameter of type `D`
    #[inline]
    pub fn param<D: ?Sized + 'static>(&mut self) -> &mut Self {
        self.params.push(Token::of::<D>());
        self
    }

    /// Append a constructor parameter looked up by `token`
    #[inline]
    pub fn param_token(&mut self, token: impl Into<Token>) -> &mut Self {
        self.params.push(token.into());
        self
    }

    /// Override the token of the parameter at `index`
    pub fn inject(&mut self, index: usize, token: impl Into<Token>) -> &mut Self {
        self.self_declared.push((index, Dependency::Token(token.into())));
        self
    }

    /// Override the parameter at `index` with a token evaluated at resolution time
    pub fn inject_forward(&mut self, index: usize, token: ForwardRef<Token>) -> &mut Self {
        self.self_declared.push((index, Dependency::Forward(token)));
        self
    }

    /// Mark the parameter at `index` optional
    pub fn optional(&mut self, index: usize) -> &mut Self {
        self.optional.push(index);
        self
    }

    /// Declare a property dependency
    pub fn property(&mut self, key: &'static str, dependency: impl Into<Dependency>) -> &mut Self {
        self.properties.push(PropertyDependency {
            key,
            dependency: dependency.into(),
            optional: false,
        });
        self
    }

    /// Declare an optional property dependency
    pub fn optional_property(
        &mut self,
        key: &'static str,
        dependency: impl Into<Dependency>,
    ) -> &mut Self {
        self.properties.push(PropertyDependency {
            key,
            dependency: dependency.into(),
            optional: true,
        });
        self
    }

    pub fn scope(&mut self, scope: Scope) -> &mut Self {
        self.scope.scope = Some(scope);
        self
    }

    /// Resolve request-scoped instances in the durable context chosen by the
    /// context id strategy
    pub fn durable(&mut self) -> &mut Self {
        self.scope.durable = Some(true);
        self
    }

    /// Mark the class as a controller
    pub fn controller(&mut self) -> &mut Self {
        self.watermarks.push(keys::CONTROLLER_WATERMARK);
        self
    }

    /// Mark the class as an exception filter
    pub fn catch(&mut self) -> &mut Self {
        self.watermarks.push(keys::CATCH_WATERMARK);
        self
    }

    /// Mark the class as an entry provider; global request-scoped enhancers
    /// attach to entry providers as they do to controllers
    pub fn entry_provider(&mut self) -> &mut Self {
        self.watermarks.push(keys::ENTRY_PROVIDER_WATERMARK);
        self
    }

    pub fn use_guards(&mut self, guards: impl IntoIterator<Item = EnhancerRef>) -> &mut Self {
        self.add_enhancers(EnhancerSubtype::Guard, guards)
    }

    pub fn use_interceptors(
        &mut self,
        interceptors: impl IntoIterator<Item = EnhancerRef>,
    ) -> &mut Self {
        self.add_enhancers(EnhancerSubtype::Interceptor, interceptors)
    }

    pub fn use_pipes(&mut self, pipes: impl IntoIterator<Item = EnhancerRef>) -> &mut Self {
        self.add_enhancers(EnhancerSubtype::Pipe, pipes)
    }

    pub fn use_filters(&mut self, filters: impl IntoIterator<Item = EnhancerRef>) -> &mut Self {
        self.add_enhancers(EnhancerSubtype::Filter, filters)
    }

    fn add_enhancers(
        &mut self,
        subtype: EnhancerSubtype,
        enhancers: impl IntoIterator<Item = EnhancerRef>,
    ) -> &mut Self {
        self.enhancers
            .extend(enhancers.into_iter().map(|enhancer| (subtype, enhancer)));
        self
    }

    /// Declaration of a handler method
    pub fn method(&mut self, name: &'static str) -> &mut MethodDefinition {
        self.methods.entry(name).or_default()
    }

    /// Attach custom metadata, readable through [`Reflector`](crate::Reflector)
    pub fn set_metadata<V: Any + Send + Sync>(&mut self, key: &'static str, value: V) -> &mut Self {
        self.custom.push((key, Arc::new(value)));
        self
    }

    fn commit(self, store: &MetadataStore, id: TypeId) {
        store.define(id, keys::INJECTABLE_WATERMARK, ());
        for watermark in self.watermarks {
            store.define(id, watermark, ());
        }
        store.define(id, keys::PARAMTYPES, self.params);
        store.define(id, keys::SELF_DECLARED_DEPS, self.self_declared);
        store.define(id, keys::OPTIONAL_DEPS, self.optional);
        store.define(id, keys::PROPERTY_DEPS, self.properties);
        store.define(id, keys::SCOPE_OPTIONS, self.scope);
        for subtype in EnhancerSubtype::ALL {
            let list: Vec<EnhancerRef> = self
                .enhancers
                .iter()
                .filter(|(kind, _)| *kind == subtype)
                .map(|(_, enhancer)| enhancer.clone())
                .collect();
            if !list.is_empty() {
                store.define(id, subtype.metadata_key(), list);
            }
        }
        if !self.methods.is_empty() {
            store.define(id, keys::METHODS, self.methods);
        }
        if !self.hooks.is_empty() {
            store.define(id, keys::LIFECYCLE_HOOKS, self.hooks);
        }
        for (key, value) in self.custom {
            store.define_erased(id, key, value);
        }
    }
}

/// Record `T`'s declaration the first time its metadata is needed
pub(crate) fn define_injectable<T: Injectable>() {
    let store = MetadataStore::global();
    let id = TypeId::of::<T>();
    if store.has(id, keys::DEFINED) {
        return;
    }
    let mut definition = InjectableDefinition::<T>::new();
    T::define(&mut definition);
    definition.commit(store, id);
    store.define(
        id,
        keys::CONSTRUCTOR,
        ClassConstructor {
            build: build_instance::<T>,
        },
    );
    store.define(id, keys::DEFINED, ());
}

/// Type-erased constructor stored with the class metadata
#[derive(Clone, Copy)]
pub(crate) struct ClassConstructor {
    pub(crate) build: fn(Arguments, Vec<(&'static str, Option<Instance>)>) -> Result<Instance>,
}

fn build_instance<T: Injectable>(
    mut args: Arguments,
    properties: Vec<(&'static str, Option<Instance>)>,
) -> Result<Instance> {
    let mut value = T::construct(&mut args)?;
    for (key, dependency) in properties {
        value.inject_property(key, dependency)?;
    }
    Ok(Arc::new(value))
}

// =============================================================================
// Arguments
// =============================================================================

/// Resolved constructor (or factory) arguments in declaration order.
///
/// A slot is `None` when an optional dependency was not found, or when the
/// dependency has no instance in the current context.
pub struct Arguments {
    target: String,
    values: Vec<Option<Instance>>,
    cursor: usize,
}

impl Arguments {
    pub(crate) fn new(target: impl Into<String>, values: Vec<Option<Instance>>) -> Self {
        Self {
            target: target.into(),
            values,
            cursor: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The untyped argument at `index`
    #[inline]
    pub fn raw(&self, index: usize) -> Option<&Instance> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Required argument at `index`
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>> {
        self.optional(index)?.ok_or_else(|| {
            DiError::creation_failed(
                &self.target,
                format!("argument at index [{index}] is not available"),
            )
        })
    }

    /// Optional argument at `index`
    pub fn optional<T: Send + Sync + 'static>(&self, index: usize) -> Result<Option<Arc<T>>> {
        match self.raw(index) {
            Some(instance) => downcast_instance::<T>(
                instance.clone(),
                format_args!("argument [{index}] of {}", self.target),
            )
            .map(Some),
            None => Ok(None),
        }
    }

    /// Next required argument
    pub fn next<T: Send + Sync + 'static>(&mut self) -> Result<Arc<T>> {
        let index = self.cursor;
        self.cursor += 1;
        self.get(index)
    }

    /// Next optional argument
    pub fn next_optional<T: Send + Sync + 'static>(&mut self) -> Result<Option<Arc<T>>> {
        let index = self.cursor;
        self.cursor += 1;
        self.optional(index)
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arguments")
            .field("target", &self.target)
            .field("len", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Database {
        url: String,
    }

    impl Injectable for Database {
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Database {
                url: "postgres://localhost".into(),
            })
        }
    }

    struct AuthGuard;

    impl Injectable for AuthGuard {
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(AuthGuard)
        }
    }

    struct UsersController {
        db: Arc<Database>,
        cache: Option<Arc<String>>,
    }

    impl Injectable for UsersController {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.param::<Database>()
                .param_token("CACHE")
                .optional(1)
                .controller()
                .scope(Scope::Request)
                .use_guards([EnhancerRef::class::<AuthGuard>()])
                .set_metadata("roles", vec!["admin"]);
            def.method("find_all")
                .use_interceptors([EnhancerRef::class::<AuthGuard>()]);
        }

        fn construct(args: &mut Arguments) -> Result<Self> {
            Ok(UsersController {
                db: args.next()?,
                cache: args.next_optional()?,
            })
        }
    }

    #[test]
    fn test_definition_recorded_on_first_read() {
        let class = Class::of::<UsersController>();
        assert!(class.is_injectable());
        assert!(class.is_controller());
        assert!(!class.is_exception_filter());
        assert_eq!(class.scope_options().scope, Some(Scope::Request));
        assert_eq!(class.name(), "UsersController");

        let deps = class.constructor_dependencies();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].token(), Some(Token::of::<Database>()));
        assert_eq!(deps[1].token(), Some(Token::from("CACHE")));
        assert_eq!(class.optional_dependencies().as_slice(), &[1]);

        let guards = class.enhancers(EnhancerSubtype::Guard);
        assert_eq!(guards.len(), 1);
        assert!(matches!(guards[0], EnhancerRef::Class(c) if c == Class::of::<AuthGuard>()));
        assert_eq!(class.methods().len(), 1);

        let roles = class.metadata::<Vec<&str>>("roles").unwrap();
        assert_eq!(roles.as_slice(), &["admin"]);
    }

    #[test]
    fn test_self_declared_overrides_param() {
        struct Overridden;
        impl Injectable for Overridden {
            fn define(def: &mut InjectableDefinition<Self>) {
                def.param::<Database>().inject(0, "PRIMARY_DB").inject(2, "EXTRA");
            }
            fn construct(_: &mut Arguments) -> Result<Self> {
                Ok(Overridden)
            }
        }

        let deps = Class::of::<Overridden>().constructor_dependencies();
        assert_eq!(deps.len(), 3);
        assert_eq!(deps[0].token(), Some(Token::from("PRIMARY_DB")));
        assert!(deps[1].token().is_none());
        assert_eq!(deps[2].token(), Some(Token::from("EXTRA")));
    }

    #[test]
    fn test_constructor_builds_instance() {
        let db: Instance = Arc::new(Database { url: "x".into() });
        let ctor = Class::of::<UsersController>().constructor().unwrap();
        let instance = (ctor.build)(
            Arguments::new("UsersController", vec![Some(db.clone()), None]),
            Vec::new(),
        )
        .unwrap();

        let controller = downcast_instance::<UsersController>(instance, "UsersController").unwrap();
        assert!(controller.cache.is_none());
        assert_eq!(controller.db.url, "x");
    }

    #[test]
    fn test_arguments_type_mismatch() {
        let args = Arguments::new("Target", vec![Some(Arc::new(5u32) as Instance), None]);
        assert!(matches!(
            args.get::<String>(0),
            Err(DiError::TypeMismatch { .. })
        ));
        assert!(matches!(
            args.get::<u32>(1),
            Err(DiError::CreationFailed { .. })
        ));
        assert!(args.optional::<u32>(1).unwrap().is_none());
        assert_eq!(*args.get::<u32>(0).unwrap(), 5);
    }

    #[test]
    fn test_undeclared_property_is_rejected() {
        let mut db = Database { url: String::new() };
        assert!(db.inject_property("logger", None).is_err());
        assert!(db.url.is_empty());
    }

    #[test]
    fn test_application_token_subtypes() {
        assert_eq!(
            EnhancerSubtype::from_application_token(&Token::from(crate::APP_PIPE)),
            Some(EnhancerSubtype::Pipe)
        );
        assert_eq!(
            EnhancerSubtype::from_application_token(&Token::from("OTHER")),
            None
        );
    }
}
