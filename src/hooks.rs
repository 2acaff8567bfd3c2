//! Lifecycle hooks
//!
//! Classes opt into hooks by implementing a hook trait and registering it in
//! their definition:
//!
//! ```rust
//! use armature_di::{Arguments, Injectable, InjectableDefinition, OnModuleInit, Result};
//! use async_trait::async_trait;
//!
//! struct Migrations;
//!
//! #[async_trait]
//! impl OnModuleInit for Migrations {
//!     async fn on_module_init(&self) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! impl Injectable for Migrations {
//!     fn define(def: &mut InjectableDefinition<Self>) {
//!         def.on_module_init();
//!     }
//!
//!     fn construct(_: &mut Arguments) -> Result<Self> {
//!         Ok(Migrations)
//!     }
//! }
//! ```
//!
//! Hooks run for instances living in the application-wide context only.

use crate::injectable::{Injectable, InjectableDefinition, Instance, downcast_instance};
use crate::module::Module;
use crate::wrapper::{InstanceWrapper, WrapperKind};
use crate::Result;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use std::sync::Arc;

/// Called once every instance of the host module has been created
#[async_trait]
pub trait OnModuleInit: Send + Sync {
    async fn on_module_init(&self) -> Result<()>;
}

/// Called once every module has been initialized
#[async_trait]
pub trait OnApplicationBootstrap: Send + Sync {
    async fn on_application_bootstrap(&self) -> Result<()>;
}

/// Called when the application context is closing
#[async_trait]
pub trait OnModuleDestroy: Send + Sync {
    async fn on_module_destroy(&self) -> Result<()>;
}

/// Called after every `on_module_destroy`, before connections are closed
#[async_trait]
pub trait BeforeApplicationShutdown: Send + Sync {
    async fn before_application_shutdown(&self, signal: Option<String>) -> Result<()>;
}

/// Called last while the application context is closing
#[async_trait]
pub trait OnApplicationShutdown: Send + Sync {
    async fn on_application_shutdown(&self, signal: Option<String>) -> Result<()>;
}

pub(crate) type HookFn = fn(Instance) -> BoxFuture<'static, Result<()>>;
pub(crate) type SignalHookFn = fn(Instance, Option<String>) -> BoxFuture<'static, Result<()>>;

/// Hooks a class registered, stored with its metadata
#[derive(Clone, Copy, Default)]
pub(crate) struct LifecycleHooks {
    on_module_init: Option<HookFn>,
    on_application_bootstrap: Option<HookFn>,
    on_module_destroy: Option<HookFn>,
    before_application_shutdown: Option<SignalHookFn>,
    on_application_shutdown: Option<SignalHookFn>,
}

impl LifecycleHooks {
    pub(crate) fn is_empty(&self) -> bool {
        self.on_module_init.is_none()
            && self.on_application_bootstrap.is_none()
            && self.on_module_destroy.is_none()
            && self.before_application_shutdown.is_none()
            && self.on_application_shutdown.is_none()
    }

    fn invoke(
        &self,
        phase: LifecyclePhase,
        instance: Instance,
        signal: Option<&str>,
    ) -> Option<BoxFuture<'static, Result<()>>> {
        let signal = signal.map(str::to_owned);
        match phase {
            LifecyclePhase::ModuleInit => self.on_module_init.map(|hook| hook(instance)),
            LifecyclePhase::ApplicationBootstrap => {
                self.on_application_bootstrap.map(|hook| hook(instance))
            }
            LifecyclePhase::ModuleDestroy => self.on_module_destroy.map(|hook| hook(instance)),
            LifecyclePhase::BeforeApplicationShutdown => self
                .before_application_shutdown
                .map(|hook| hook(instance, signal)),
            LifecyclePhase::ApplicationShutdown => self
                .on_application_shutdown
                .map(|hook| hook(instance, signal)),
        }
    }
}

fn module_init<T: Injectable + OnModuleInit>(instance: Instance) -> BoxFuture<'static, Result<()>> {
    async move {
        let this = downcast_instance::<T>(instance, std::any::type_name::<T>())?;
        this.on_module_init().await
    }
    .boxed()
}

fn application_bootstrap<T: Injectable + OnApplicationBootstrap>(
    instance: Instance,
) -> BoxFuture<'static, Result<()>> {
    async move {
        let this = downcast_instance::<T>(instance, std::any::type_name::<T>())?;
        this.on_application_bootstrap().await
    }
    .boxed()
}

fn module_destroy<T: Injectable + OnModuleDestroy>(
    instance: Instance,
) -> BoxFuture<'static, Result<()>> {
    async move {
        let this = downcast_instance::<T>(instance, std::any::type_name::<T>())?;
        this.on_module_destroy().await
    }
    .boxed()
}

fn before_shutdown<T: Injectable + BeforeApplicationShutdown>(
    instance: Instance,
    signal: Option<String>,
) -> BoxFuture<'static, Result<()>> {
    async move {
        let this = downcast_instance::<T>(instance, std::any::type_name::<T>())?;
        this.before_application_shutdown(signal).await
    }
    .boxed()
}

fn application_shutdown<T: Injectable + OnApplicationShutdown>(
    instance: Instance,
    signal: Option<String>,
) -> BoxFuture<'static, Result<()>> {
    async move {
        let this = downcast_instance::<T>(instance, std::any::type_name::<T>())?;
        this.on_application_shutdown(signal).await
    }
    .boxed()
}

impl<T: Injectable> InjectableDefinition<T> {
    /// Run [`OnModuleInit`] after the host module is initialized
    pub fn on_module_init(&mut self) -> &mut Self
    where
        T: OnModuleInit,
    {
        self.hooks.on_module_init = Some(module_init::<T>);
        self
    }

    /// Run [`OnApplicationBootstrap`] after every module is initialized
    pub fn on_application_bootstrap(&mut self) -> &mut Self
    where
        T: OnApplicationBootstrap,
    {
        self.hooks.on_application_bootstrap = Some(application_bootstrap::<T>);
        self
    }

    /// Run [`OnModuleDestroy`] on close
    pub fn on_module_destroy(&mut self) -> &mut Self
    where
        T: OnModuleDestroy,
    {
        self.hooks.on_module_destroy = Some(module_destroy::<T>);
        self
    }

    /// Run [`BeforeApplicationShutdown`] on close
    pub fn before_application_shutdown(&mut self) -> &mut Self
    where
        T: BeforeApplicationShutdown,
    {
        self.hooks.before_application_shutdown = Some(before_shutdown::<T>);
        self
    }

    /// Run [`OnApplicationShutdown`] on close
    pub fn on_application_shutdown(&mut self) -> &mut Self
    where
        T: OnApplicationShutdown,
    {
        self.hooks.on_application_shutdown = Some(application_shutdown::<T>);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecyclePhase {
    ModuleInit,
    ApplicationBootstrap,
    ModuleDestroy,
    BeforeApplicationShutdown,
    ApplicationShutdown,
}

/// Application-wide instances of `wrapper` that may carry hooks
fn hook_instances(wrapper: &InstanceWrapper) -> Vec<Instance> {
    if !wrapper.is_dependency_tree_static() {
        return Vec::new();
    }
    if wrapper.is_transient() {
        wrapper.static_transient_instances()
    } else {
        wrapper.instance().into_iter().collect()
    }
}

/// Run one lifecycle phase for every hooked instance of `module`.
///
/// Non-transient instances run first, then transient ones; hooks within a
/// group run concurrently.
pub(crate) async fn call_module_hook(
    module: &Arc<Module>,
    phase: LifecyclePhase,
    signal: Option<&str>,
) -> Result<()> {
    let wrappers: Vec<Arc<InstanceWrapper>> = module
        .providers()
        .into_iter()
        .chain(module.controllers())
        .chain(module.injectables())
        .collect();

    let (transient, non_transient): (Vec<_>, Vec<_>) =
        wrappers.into_iter().partition(|wrapper| wrapper.is_transient());

    for group in [non_transient, transient] {
        let calls = group.iter().flat_map(|wrapper| {
            let hooks = match wrapper.kind() {
                WrapperKind::Class(class) => class.hooks(),
                _ => None,
            };
            hook_instances(wrapper)
                .into_iter()
                .filter_map(move |instance| {
                    hooks
                        .as_ref()
                        .and_then(|hooks| hooks.invoke(phase, instance, signal))
                })
                .collect::<Vec<_>>()
        });
        try_join_all(calls).await?;
    }
    Ok(())
}
