//! Application-wide enhancer configuration
//!
//! Enhancers registered under `APP_GUARD`, `APP_PIPE`, `APP_INTERCEPTOR` and
//! `APP_FILTER` end up here once the application is bootstrapped: instances
//! of application-scoped enhancers directly, request and transient scoped
//! ones as wrappers to be resolved per context.

use crate::injectable::{EnhancerSubtype, Instance};
use crate::wrapper::InstanceWrapper;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Global enhancers shared by every route of the application
#[derive(Default)]
pub struct ApplicationConfig {
    enhancers: RwLock<Vec<(EnhancerSubtype, Instance)>>,
    request_enhancers: RwLock<Vec<(EnhancerSubtype, Arc<InstanceWrapper>)>>,
}

impl ApplicationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application-scoped global enhancer instance
    pub fn add_global_enhancer(&self, subtype: EnhancerSubtype, instance: Instance) {
        self.enhancers.write().push((subtype, instance));
    }

    /// Global enhancer instances of one kind, in registration order
    pub fn global_enhancers(&self, subtype: EnhancerSubtype) -> Vec<Instance> {
        self.enhancers
            .read()
            .iter()
            .filter(|(kind, _)| *kind == subtype)
            .map(|(_, instance)| instance.clone())
            .collect()
    }

    /// Register a request or transient scoped global enhancer
    pub fn add_global_request_enhancer(&self, subtype: EnhancerSubtype, wrapper: Arc<InstanceWrapper>) {
        self.request_enhancers.write().push((subtype, wrapper));
    }

    /// Request or transient scoped global enhancers of one kind
    pub fn global_request_enhancers(&self, subtype: EnhancerSubtype) -> Vec<Arc<InstanceWrapper>> {
        self.request_enhancers
            .read()
            .iter()
            .filter(|(kind, _)| *kind == subtype)
            .map(|(_, wrapper)| wrapper.clone())
            .collect()
    }

    #[inline]
    pub fn global_guards(&self) -> Vec<Instance> {
        self.global_enhancers(EnhancerSubtype::Guard)
    }

    #[inline]
    pub fn global_pipes(&self) -> Vec<Instance> {
        self.global_enhancers(EnhancerSubtype::Pipe)
    }

    #[inline]
    pub fn global_interceptors(&self) -> Vec<Instance> {
        self.global_enhancers(EnhancerSubtype::Interceptor)
    }

    #[inline]
    pub fn global_filters(&self) -> Vec<Instance> {
        self.global_enhancers(EnhancerSubtype::Filter)
    }
}

impl fmt::Debug for ApplicationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationConfig")
            .field("enhancers", &self.enhancers.read().len())
            .field("request_enhancers", &self.request_enhancers.read().len())
            .finish()
    }
}
