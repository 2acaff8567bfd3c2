//! Dependency scanning
//!
//! Builds the module graph of an application in ordered passes:
//!
//! 1. register the internal core module, then walk the import graph from the
//!    root module and register every module reached (applying overrides);
//! 2. reflect each module's imports, providers, controllers, enhancers and
//!    exports into the container;
//! 3. compute module distances from the root;
//! 4. attach request-scoped application enhancers and link global modules.
//!
//! Each pass completes for every module before the next one starts.

use crate::compiler::CompiledModule;
use crate::container::{Container, InternalCoreModule, ModuleInsertion};
use crate::error::format_scope;
use crate::injectable::{Class, EnhancerRef, EnhancerSubtype};
use crate::logging::{Logger, log_event};
use crate::module::{Export, Module, ModuleReference};
use crate::provider::Provider;
use crate::scope::Scope;
use crate::token::Token;
use crate::{DiError, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Replace every import of `module` with `new_module`
#[derive(Clone)]
pub struct ModuleOverride {
    pub module: ModuleReference,
    pub new_module: ModuleReference,
}

impl ModuleOverride {
    pub fn new(module: impl Into<ModuleReference>, new_module: impl Into<ModuleReference>) -> Self {
        Self {
            module: module.into(),
            new_module: new_module.into(),
        }
    }
}

impl fmt::Debug for ModuleOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleOverride")
            .field("module", &self.module)
            .field("new_module", &self.new_module)
            .finish()
    }
}

/// A provider registered under one of the `APP_*` tokens
#[derive(Debug, Clone)]
struct ApplicationProvider {
    module_key: String,
    provider_key: Token,
    subtype: EnhancerSubtype,
    scope: Scope,
}

/// Walks module declarations and fills the [`Container`]
pub struct DependenciesScanner {
    container: Arc<Container>,
    logger: Logger,
    application_providers: Mutex<Vec<ApplicationProvider>>,
}

impl DependenciesScanner {
    pub fn new(container: Arc<Container>, logger: Logger) -> Self {
        Self {
            container,
            logger,
            application_providers: Mutex::new(Vec::new()),
        }
    }

    /// Build the whole module graph reachable from `root`
    pub async fn scan(&self, root: &ModuleReference, overrides: &[ModuleOverride]) -> Result<()> {
        self.register_core_module(overrides).await?;
        let mut registry = Vec::new();
        self.scan_for_modules(root.clone(), Vec::new(), &mut registry, overrides)
            .await?;
        self.scan_modules_for_dependencies().await?;
        self.calculate_modules_distance();
        self.add_scoped_enhancers_metadata();
        self.container.bind_global_scope();

        log_event!(
            self.logger,
            debug,
            modules = self.container.len(),
            "Module graph scanned"
        );
        Ok(())
    }

    async fn register_core_module(&self, overrides: &[ModuleOverride]) -> Result<()> {
        let core: ModuleReference = InternalCoreModule::register(&self.container).into();
        let mut registry = Vec::new();
        let modules = self
            .scan_for_modules(core, Vec::new(), &mut registry, overrides)
            .await?;
        if let Some(core) = modules.into_iter().next() {
            self.container.register_core_module_ref(core);
        }
        Ok(())
    }

    // =========================================================================
    // Module registration
    // =========================================================================

    /// Register the module `reference` denotes and, recursively, its imports.
    ///
    /// `registry` holds the tokens visited by this walk, so modules importing
    /// each other are registered once.
    pub fn scan_for_modules<'a>(
        &'a self,
        reference: ModuleReference,
        scope: Vec<Class>,
        registry: &'a mut Vec<String>,
        overrides: &'a [ModuleOverride],
    ) -> BoxFuture<'a, Result<Vec<Arc<Module>>>> {
        async move {
            let insertion = self
                .insert_or_override_module(&reference, overrides, &scope)
                .await?;

            let compiler = self.container.compiler();
            let original = compiler.compile(&reference, &scope).await?;
            let definition = match self.find_override(&reference, overrides, &scope).await? {
                Some(replacement) => compiler.compile(&replacement.new_module, &scope).await?,
                None => original.clone(),
            };
            registry.push(original.token);
            registry.push(definition.token.clone());

            let name = definition.metatype.name();
            log_event!(self.logger, trace, module = name, "Scanning module");

            let mut inner_scope = scope.clone();
            inner_scope.push(definition.metatype);

            let mut registered = vec![insertion.module];
            for (index, slot) in declared_imports(&definition).into_iter().enumerate() {
                let inner = match slot {
                    Some(inner) if inner.is_undefined() => {
                        return Err(DiError::UndefinedModule {
                            module: name.to_owned(),
                            index,
                            scope: format_scope(&scope),
                        });
                    }
                    Some(inner) => inner,
                    None => {
                        return Err(DiError::InvalidModule {
                            module: name.to_owned(),
                            index,
                            scope: format_scope(&scope),
                        });
                    }
                };
                let inner_token = compiler.compile(&inner, &inner_scope).await?.token;
                if registry.contains(&inner_token) {
                    continue;
                }
                let modules = self
                    .scan_for_modules(inner, inner_scope.clone(), &mut *registry, overrides)
                    .await?;
                registered.extend(modules);
            }
            Ok(registered)
        }
        .boxed()
    }

    async fn insert_or_override_module(
        &self,
        reference: &ModuleReference,
        overrides: &[ModuleOverride],
        scope: &[Class],
    ) -> Result<ModuleInsertion> {
        if let Some(replacement) = self.find_override(reference, overrides, scope).await? {
            return self
                .container
                .replace_module(reference, &replacement.new_module, scope)
                .await;
        }
        self.insert_module(reference, scope).await
    }

    async fn insert_module(&self, reference: &ModuleReference, scope: &[Class]) -> Result<ModuleInsertion> {
        let target = match reference {
            ModuleReference::Forward(forward) => {
                forward
                    .resolve()
                    .ok_or_else(|| DiError::UndefinedForwardRef {
                        scope: format_scope(scope),
                    })?
            }
            other => other.clone(),
        };
        if let ModuleReference::Class(class) = &target {
            if class.is_injectable() || class.is_controller() || class.is_exception_filter() {
                return Err(DiError::InvalidClassModule {
                    class: class.name().to_owned(),
                    scope: format_scope(scope),
                });
            }
        }
        self.container.add_module(&target, scope).await
    }

    async fn find_override<'o>(
        &self,
        reference: &ModuleReference,
        overrides: &'o [ModuleOverride],
        scope: &[Class],
    ) -> Result<Option<&'o ModuleOverride>> {
        if overrides.is_empty() {
            return Ok(None);
        }
        let compiler = self.container.compiler();
        let token = compiler.compile(reference, scope).await?.token;
        for candidate in overrides {
            if compiler.compile(&candidate.module, scope).await?.token == token {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    /// Reflect the declarations of every registered module into the container
    pub async fn scan_modules_for_dependencies(&self) -> Result<()> {
        for module in self.container.get_modules() {
            let token = module.token().to_owned();
            let metatype = module.metatype();
            let context = [metatype];

            self.reflect_imports(metatype, &token, &context).await?;
            self.reflect_providers(metatype, &token)?;
            self.reflect_controllers(metatype, &token)?;
            self.reflect_exports(metatype, &token)?;
        }
        Ok(())
    }

    async fn reflect_imports(&self, metatype: Class, token: &str, context: &[Class]) -> Result<()> {
        let mut imports: Vec<Option<ModuleReference>> = metatype.module_metadata().imports.clone();
        if let Some(dynamic) = self.container.get_dynamic_metadata_by_token(token) {
            imports.extend(dynamic.imports);
        }
        for related in imports.into_iter().flatten() {
            self.insert_import(&related, token, context).await?;
        }
        Ok(())
    }

    async fn insert_import(
        &self,
        related: &ModuleReference,
        token: &str,
        context: &[Class],
    ) -> Result<()> {
        if related.is_undefined() {
            return Err(DiError::circular(context.iter().map(|class| class.name())));
        }
        self.container.add_import(related, token, context).await
    }

    fn reflect_providers(&self, metatype: Class, token: &str) -> Result<()> {
        let mut providers = metatype.module_metadata().providers.clone();
        if let Some(dynamic) = self.container.get_dynamic_metadata_by_token(token) {
            providers.extend(dynamic.providers);
        }
        for provider in providers {
            let class = provider.bare_class();
            self.insert_provider(provider, token)?;
            if let Some(class) = class {
                self.reflect_dynamic_metadata(class, token)?;
            }
        }
        Ok(())
    }

    fn reflect_controllers(&self, metatype: Class, token: &str) -> Result<()> {
        let mut controllers = metatype.module_metadata().controllers.clone();
        if let Some(dynamic) = self.container.get_dynamic_metadata_by_token(token) {
            controllers.extend(dynamic.controllers);
        }
        for controller in controllers {
            self.container.add_controller(controller, token)?;
            self.reflect_dynamic_metadata(controller, token)?;
        }
        Ok(())
    }

    fn reflect_exports(&self, metatype: Class, token: &str) -> Result<()> {
        let mut exports: Vec<Export> = metatype.module_metadata().exports.clone();
        if let Some(dynamic) = self.container.get_dynamic_metadata_by_token(token) {
            exports.extend(dynamic.exports);
        }
        for export in &exports {
            self.container.add_exported_provider_or_module(export, token)?;
        }
        Ok(())
    }

    /// Register the guards, interceptors, pipes and filters declared on
    /// `class` and its methods
    pub fn reflect_dynamic_metadata(&self, class: Class, token: &str) -> Result<()> {
        if !class.is_injectable() {
            return Ok(());
        }
        for subtype in EnhancerSubtype::ALL {
            self.reflect_injectables(class, token, subtype)?;
        }
        self.reflect_param_injectables(class, token)
    }

    fn reflect_injectables(&self, class: Class, token: &str, subtype: EnhancerSubtype) -> Result<()> {
        let methods = class.methods();
        let class_level = class.enhancers(subtype);
        let method_level = methods
            .values()
            .flat_map(|method| method.enhancers(subtype).iter());
        for enhancer in class_level.iter().chain(method_level) {
            self.insert_injectable(enhancer, token, class, subtype)?;
        }
        Ok(())
    }

    fn reflect_param_injectables(&self, class: Class, token: &str) -> Result<()> {
        let methods = class.methods();
        for pipe in methods.values().flat_map(|method| method.parameter_pipes()) {
            self.insert_injectable(pipe, token, class, EnhancerSubtype::Pipe)?;
        }
        Ok(())
    }

    fn insert_injectable(
        &self,
        enhancer: &EnhancerRef,
        token: &str,
        host: Class,
        subtype: EnhancerSubtype,
    ) -> Result<()> {
        // ready-made instances are used as they are
        let EnhancerRef::Class(class) = enhancer else {
            return Ok(());
        };
        let provider = Provider::Class {
            provide: class.token(),
            use_class: *class,
            scope: None,
            durable: None,
        };
        self.container
            .add_injectable(provider, token, subtype, Some(host))?;
        Ok(())
    }

    /// Register `provider` in module `token`. Providers registered under an
    /// `APP_*` token get a unique key and are remembered so they can be
    /// applied application-wide once instantiated.
    pub fn insert_provider(&self, provider: Provider, token: &str) -> Result<Token> {
        let Some(subtype) = EnhancerSubtype::from_application_token(provider.token()) else {
            return self.container.add_provider(provider, token);
        };

        let provider_key = Token::name(format!(
            "{} (UUID: {})",
            subtype.application_token(),
            Uuid::new_v4()
        ));
        let scope = provider.scope().unwrap_or_default();
        let provider = with_token(provider, provider_key.clone(), scope);

        self.application_providers.lock().push(ApplicationProvider {
            module_key: token.to_owned(),
            provider_key: provider_key.clone(),
            subtype,
            scope,
        });

        log_event!(
            self.logger,
            debug,
            token = %provider_key,
            scope = %scope,
            "Registering application {subtype}"
        );

        if is_request_or_transient(scope) {
            self.container
                .add_injectable(provider, token, subtype, None)?;
            return Ok(provider_key);
        }
        self.container
            .add_enhancer_provider(provider, token, Some(subtype))
    }

    // =========================================================================
    // Graph
    // =========================================================================

    /// Assign each non-global module its depth below the root module
    pub fn calculate_modules_distance(&self) {
        let modules = self.container.get_modules();
        let core = self.container.internal_core_module().map(|core| core.id());
        let Some(root) = modules
            .iter()
            .find(|module| Some(module.id()) != core)
        else {
            return;
        };
        root.set_distance(1);
        calculate_distance(root, 2, &mut Vec::new());
    }

    /// Attach request and transient scoped application enhancers to every
    /// controller and entry provider
    pub fn add_scoped_enhancers_metadata(&self) {
        let scoped: Vec<ApplicationProvider> = self
            .application_providers
            .lock()
            .iter()
            .filter(|provider| is_request_or_transient(provider.scope))
            .cloned()
            .collect();

        for provider in scoped {
            let Some(enhancer) = self
                .container
                .get_module_by_key(&provider.module_key)
                .and_then(|module| module.get_injectable_by_key(&provider.provider_key))
            else {
                continue;
            };
            for module in self.container.get_modules() {
                for host in module.controllers().into_iter().chain(module.entry_providers()) {
                    host.add_enhancer_metadata(&enhancer);
                }
            }
        }
    }

    /// Hand instantiated `APP_*` providers to the application configuration
    pub fn apply_application_providers(&self) {
        let config = self.container.application_config();
        let providers = self.application_providers.lock().clone();

        for provider in providers {
            let Some(module) = self.container.get_module_by_key(&provider.module_key) else {
                continue;
            };
            if is_request_or_transient(provider.scope) {
                if let Some(wrapper) = module.get_injectable_by_key(&provider.provider_key) {
                    config.add_global_request_enhancer(provider.subtype, wrapper);
                }
                continue;
            }
            match module
                .get_provider_by_key(&provider.provider_key)
                .and_then(|wrapper| wrapper.instance())
            {
                Some(instance) => config.add_global_enhancer(provider.subtype, instance),
                None => log_event!(
                    self.logger,
                    warn,
                    token = %provider.provider_key,
                    "Application enhancer has no instance in the application context"
                ),
            }
        }
    }
}

impl fmt::Debug for DependenciesScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependenciesScanner")
            .field("container", &self.container)
            .field(
                "application_providers",
                &self.application_providers.lock().len(),
            )
            .finish()
    }
}

fn declared_imports(compiled: &CompiledModule) -> Vec<Option<ModuleReference>> {
    let mut imports = compiled.metatype.module_metadata().imports.clone();
    if let Some(dynamic) = &compiled.dynamic {
        imports.extend(dynamic.imports.iter().cloned());
    }
    imports
}

fn calculate_distance(module: &Arc<Module>, distance: u32, stack: &mut Vec<u64>) {
    if stack.contains(&module.id()) {
        return;
    }
    stack.push(module.id());
    for imported in module.imports() {
        // global modules keep the maximum distance, their imports do not
        if !imported.is_global() && distance > imported.distance() {
            imported.set_distance(distance);
        }
        calculate_distance(&imported, distance + 1, stack);
    }
    stack.pop();
}

#[inline]
fn is_request_or_transient(scope: Scope) -> bool {
    matches!(scope, Scope::Request | Scope::Transient)
}

/// `provider` registered under `token` with an explicit scope
fn with_token(provider: Provider, token: Token, scope: Scope) -> Provider {
    match provider {
        Provider::Class {
            use_class, durable, ..
        } => Provider::Class {
            provide: token,
            use_class,
            scope: Some(scope),
            durable,
        },
        Provider::Value { use_value, .. } => Provider::Value {
            provide: token,
            use_value,
        },
        Provider::Factory {
            use_factory,
            inject,
            durable,
            ..
        } => Provider::Factory {
            provide: token,
            use_factory,
            inject,
            scope: Some(scope),
            durable,
        },
        Provider::Existing { use_existing, .. } => Provider::Existing {
            provide: token,
            use_existing,
        },
    }
}
