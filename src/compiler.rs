//! Module compilation
//!
//! Turns a [`ModuleReference`] into the module class, its dynamic
//! declarations (if any) and the deterministic token the container registers
//! it under.

use crate::injectable::Class;
use crate::module::{DynamicModule, ModuleMetadata, ModuleReference};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use std::fmt::Write;
use std::hash::BuildHasher;

/// A module reference reduced to what the container stores
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub metatype: Class,
    pub dynamic: Option<ModuleMetadata>,
    pub token: String,
}

/// Compiles module references into [`CompiledModule`]s
#[derive(Debug, Default)]
pub struct ModuleCompiler {
    tokens: ModuleTokenFactory,
}

impl ModuleCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve forward references and deferred modules, then derive the token
    pub async fn compile(&self, reference: &ModuleReference, scope: &[Class]) -> Result<CompiledModule> {
        let mut current = reference.clone();
        loop {
            current = match current {
                ModuleReference::Forward(forward) => forward.resolve().ok_or_else(|| {
                    DiError::UndefinedForwardRef {
                        scope: crate::error::format_scope(scope),
                    }
                })?,
                ModuleReference::Deferred(future) => ModuleReference::Dynamic(future.await),
                ModuleReference::Class(class) => return Ok(self.finish(class, None)),
                ModuleReference::Dynamic(DynamicModule { module, metadata }) => {
                    return Ok(self.finish(module, Some(metadata)));
                }
            };
        }
    }

    /// Synchronous variant of [`compile`](Self::compile); deferred modules
    /// that have not completed yet are rejected
    pub fn extract_metadata(&self, reference: &ModuleReference, scope: &[Class]) -> Result<CompiledModule> {
        let mut current = reference.clone();
        loop {
            current = match current {
                ModuleReference::Forward(forward) => forward.resolve().ok_or_else(|| {
                    DiError::UndefinedForwardRef {
                        scope: crate::error::format_scope(scope),
                    }
                })?,
                ModuleReference::Deferred(future) => match future.peek() {
                    Some(module) => ModuleReference::Dynamic(module.clone()),
                    None => {
                        return Err(DiError::Internal(
                            "deferred module has not completed yet".to_owned(),
                        ));
                    }
                },
                ModuleReference::Class(class) => return Ok(self.finish(class, None)),
                ModuleReference::Dynamic(DynamicModule { module, metadata }) => {
                    return Ok(self.finish(module, Some(metadata)));
                }
            };
        }
    }

    fn finish(&self, metatype: Class, dynamic: Option<ModuleMetadata>) -> CompiledModule {
        let token = self.tokens.create(metatype, dynamic.as_ref());
        CompiledModule {
            metatype,
            dynamic,
            token,
        }
    }
}

/// Derives deterministic module tokens.
///
/// A static module is identified by its class. A dynamic module is identified
/// by its class plus a structural fingerprint of the declarations supplied at
/// the import site, so importing the same dynamic module twice yields one
/// module while differently configured imports stay distinct.
#[derive(Debug)]
pub struct ModuleTokenFactory {
    hasher: RandomState,
    cache: DashMap<String, String, RandomState>,
}

impl Default for ModuleTokenFactory {
    fn default() -> Self {
        Self {
            hasher: RandomState::with_seeds(
                0x6172_6d61_7475_7265,
                0x6d6f_6475_6c65_7321,
                0x746f_6b65_6e73_0001,
                0x0000_0000_0000_0003,
            ),
            cache: DashMap::with_hasher(RandomState::new()),
        }
    }
}

impl ModuleTokenFactory {
    pub fn create(&self, metatype: Class, dynamic: Option<&ModuleMetadata>) -> String {
        let key = match dynamic {
            Some(metadata) => format!("{}|{}", metatype.type_name(), fingerprint(metadata)),
            None => metatype.type_name().to_owned(),
        };
        if let Some(token) = self.cache.get(&key) {
            return token.clone();
        }
        let token = format!(
            "{:016x}",
            self.hasher.hash_one((metatype.id(), key.as_str()))
        );
        self.cache.insert(key, token.clone());
        token
    }
}

fn fingerprint(metadata: &ModuleMetadata) -> String {
    let mut out = String::new();
    let _ = write!(out, "global:{};imports:", metadata.global);
    for slot in &metadata.imports {
        match slot {
            Some(ModuleReference::Class(class)) => {
                let _ = write!(out, "{},", class.type_name());
            }
            Some(ModuleReference::Dynamic(module)) => {
                let _ = write!(
                    out,
                    "{}[{}],",
                    module.module.type_name(),
                    fingerprint(&module.metadata)
                );
            }
            Some(ModuleReference::Forward(_)) => out.push_str("forward,"),
            Some(ModuleReference::Deferred(_)) => out.push_str("deferred,"),
            None => out.push_str("none,"),
        }
    }
    out.push_str(";providers:");
    for provider in &metadata.providers {
        let _ = write!(out, "{},", provider.fingerprint());
    }
    out.push_str(";controllers:");
    for controller in &metadata.controllers {
        let _ = write!(out, "{},", controller.type_name());
    }
    out.push_str(";exports:");
    for export in &metadata.exports {
        let _ = write!(out, "{:?},", export.0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ModuleClass, Provider};

    struct ConfigModule;
    impl ModuleClass for ConfigModule {
        fn metadata(_: &mut ModuleMetadata) {}
    }

    struct CacheModule;
    impl ModuleClass for CacheModule {
        fn metadata(_: &mut ModuleMetadata) {}
    }

    fn for_root(url: &str) -> DynamicModule {
        DynamicModule::new::<ConfigModule>()
            .provider(Provider::value("URL", url.to_owned()))
            .export("URL")
    }

    #[tokio::test]
    async fn test_static_tokens_are_stable() {
        let compiler = ModuleCompiler::new();
        let a = compiler
            .compile(&ModuleReference::of::<ConfigModule>(), &[])
            .await
            .unwrap();
        let b = compiler
            .compile(&ModuleReference::of::<ConfigModule>(), &[])
            .await
            .unwrap();
        let c = compiler
            .compile(&ModuleReference::of::<CacheModule>(), &[])
            .await
            .unwrap();
        assert_eq!(a.token, b.token);
        assert_ne!(a.token, c.token);
        assert!(a.dynamic.is_none());
    }

    #[tokio::test]
    async fn test_dynamic_tokens() {
        let compiler = ModuleCompiler::new();
        let module = for_root("postgres://a");
        let first = compiler.compile(&module.clone().into(), &[]).await.unwrap();
        let same = compiler.compile(&module.into(), &[]).await.unwrap();
        let other = compiler
            .compile(&for_root("postgres://b").into(), &[])
            .await
            .unwrap();
        let plain = compiler
            .compile(&ModuleReference::of::<ConfigModule>(), &[])
            .await
            .unwrap();

        assert_eq!(first.token, same.token);
        assert_ne!(first.token, other.token);
        assert_ne!(first.token, plain.token);
        assert_eq!(first.metatype, Class::module::<ConfigModule>());
        assert_eq!(first.dynamic.unwrap().providers.len(), 1);
    }

    #[tokio::test]
    async fn test_forward_and_deferred() {
        let compiler = ModuleCompiler::new();
        let forward = ModuleReference::forward(|| Some(ModuleReference::of::<CacheModule>()));
        let compiled = compiler.compile(&forward, &[]).await.unwrap();
        assert_eq!(compiled.metatype, Class::module::<CacheModule>());

        let deferred = ModuleReference::deferred(async { DynamicModule::new::<CacheModule>() });
        assert!(compiler.extract_metadata(&deferred, &[]).is_err());
        let compiled = compiler.compile(&deferred, &[]).await.unwrap();
        assert!(compiled.dynamic.is_some());
        assert!(compiler.extract_metadata(&deferred, &[]).is_ok());

        let undefined = ModuleReference::forward(|| None);
        assert!(matches!(
            compiler.compile(&undefined, &[]).await,
            Err(DiError::UndefinedForwardRef { .. })
        ));
    }
}
