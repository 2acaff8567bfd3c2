#![no_main]

//! Fuzz target for per-context resolution
//!
//! Interleaves context creation, resolution of request, transient and
//! application-wide providers, and request registration, checking the
//! caching guarantees of each scope.

use arbitrary::Arbitrary;
use armature_di::{
    ApplicationContext, Arguments, ContextId, Injectable, InjectableDefinition, ModuleClass,
    ModuleMetadata, Provider, Result, Scope,
};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

struct Shared;

impl Injectable for Shared {
    fn construct(_: &mut Arguments) -> Result<Self> {
        Ok(Shared)
    }
}

struct PerRequest {
    shared: Arc<Shared>,
}

impl Injectable for PerRequest {
    fn define(def: &mut InjectableDefinition<Self>) {
        def.scope(Scope::Request).param::<Shared>();
    }
    fn construct(args: &mut Arguments) -> Result<Self> {
        Ok(PerRequest {
            shared: args.next()?,
        })
    }
}

struct PerUse;

impl Injectable for PerUse {
    fn define(def: &mut InjectableDefinition<Self>) {
        def.scope(Scope::Transient);
    }
    fn construct(_: &mut Arguments) -> Result<Self> {
        Ok(PerUse)
    }
}

struct FuzzModule;

impl ModuleClass for FuzzModule {
    fn metadata(module: &mut ModuleMetadata) {
        module
            .provider(Provider::class::<Shared>())
            .provider(Provider::class::<PerRequest>())
            .provider(Provider::class::<PerUse>());
    }
}

/// Context operations
#[derive(Debug, Arbitrary)]
enum ContextOp {
    CreateContext,
    CreateRequestContext(u32),
    ResolveRequest(u8),
    ResolveTransient(u8),
    ResolveShared(u8),
    GetShared,
    GetRequest,
    DropContext(u8),
}

fuzz_target!(|ops: Vec<ContextOp>| {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let app = runtime
        .block_on(ApplicationContext::create::<FuzzModule>())
        .unwrap();
    let shared = app.get::<Shared>().unwrap();

    let mut contexts: Vec<(ContextId, Option<Arc<PerRequest>>)> = Vec::new();
    let pick = |contexts: &Vec<(ContextId, Option<Arc<PerRequest>>)>, index: u8| {
        (!contexts.is_empty()).then(|| index as usize % contexts.len())
    };

    for op in ops.into_iter().take(100) { // Limit operations to prevent OOM
        match op {
            ContextOp::CreateContext => contexts.push((app.create_context_id(), None)),
            ContextOp::CreateRequestContext(id) => {
                contexts.push((app.context_id_for_request(Arc::new(id)), None));
            }
            ContextOp::ResolveRequest(index) => {
                let Some(index) = pick(&contexts, index) else {
                    continue;
                };
                let (context, seen) = &mut contexts[index];
                let resolved = runtime
                    .block_on(app.resolve::<PerRequest>(Some(context.clone())))
                    .unwrap();
                assert!(Arc::ptr_eq(&resolved.shared, &shared));
                match seen {
                    Some(previous) => assert!(Arc::ptr_eq(previous, &resolved)),
                    None => *seen = Some(resolved),
                }
            }
            ContextOp::ResolveTransient(index) => {
                let context = pick(&contexts, index).map(|index| contexts[index].0.clone());
                let first = runtime
                    .block_on(app.resolve::<PerUse>(context.clone()))
                    .unwrap();
                let second = runtime.block_on(app.resolve::<PerUse>(context)).unwrap();
                assert!(!Arc::ptr_eq(&first, &second));
            }
            ContextOp::ResolveShared(index) => {
                let context = pick(&contexts, index).map(|index| contexts[index].0.clone());
                let resolved = runtime.block_on(app.resolve::<Shared>(context)).unwrap();
                assert!(Arc::ptr_eq(&resolved, &shared));
            }
            ContextOp::GetShared => {
                assert!(Arc::ptr_eq(&app.get::<Shared>().unwrap(), &shared));
            }
            ContextOp::GetRequest => {
                assert!(app.get::<PerRequest>().is_err());
            }
            ContextOp::DropContext(index) => {
                if let Some(index) = pick(&contexts, index) {
                    contexts.swap_remove(index);
                }
            }
        }
    }
});
