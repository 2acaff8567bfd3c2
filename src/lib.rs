//! # Armature DI - Module-Scoped Dependency Injection for Rust
//!
//! The dependency injection core of a module-based application framework.
//! Applications are organized in modules that import each other, provide
//! injectable classes, values and factories, and export some of them to
//! their importers.
//!
//! ## Features
//!
//! - 🧩 **Module graph** - Imports, exports, re-exports, global and dynamic modules
//! - 🔒 **Encapsulation** - A provider is only visible to importers when exported
//! - ♻️ **Three scopes** - Application-wide, per request context, per consumer
//! - 🔁 **Cycle detection** - Circular imports and constructor cycles fail with the full chain
//! - 🧵 **Async-safe** - At most one construction in flight per instance and context
//! - 📊 **Observable** - Optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use armature_di::prelude::*;
//!
//! struct Database {
//!     url: Arc<String>,
//! }
//!
//! impl Injectable for Database {
//!     fn define(def: &mut InjectableDefinition<Self>) {
//!         def.param_token("DATABASE_URL");
//!     }
//!     fn construct(args: &mut Arguments) -> Result<Self> {
//!         Ok(Database { url: args.next()? })
//!     }
//! }
//!
//! struct DatabaseModule;
//!
//! impl ModuleClass for DatabaseModule {
//!     fn metadata(module: &mut ModuleMetadata) {
//!         module
//!             .provider(Provider::value("DATABASE_URL", "postgres://localhost".to_string()))
//!             .provider(Provider::class::<Database>())
//!             .export(Token::of::<Database>());
//!     }
//! }
//!
//! struct AppModule;
//!
//! impl ModuleClass for AppModule {
//!     fn metadata(module: &mut ModuleMetadata) {
//!         module.import(ModuleReference::of::<DatabaseModule>());
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let app = ApplicationContext::create::<AppModule>().await?;
//! let db = app.get::<Database>()?;
//! assert_eq!(db.url.as_str(), "postgres://localhost");
//! # Ok::<(), DiError>(())
//! # }).unwrap();
//! ```
//!
//! ## Scopes
//!
//! ```rust
//! use armature_di::prelude::*;
//!
//! struct RequestState;
//!
//! impl Injectable for RequestState {
//!     fn define(def: &mut InjectableDefinition<Self>) {
//!         def.scope(Scope::Request);
//!     }
//!     fn construct(_: &mut Arguments) -> Result<Self> {
//!         Ok(RequestState)
//!     }
//! }
//!
//! struct AppModule;
//!
//! impl ModuleClass for AppModule {
//!     fn metadata(module: &mut ModuleMetadata) {
//!         module.provider(Provider::class::<RequestState>());
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let app = ApplicationContext::create::<AppModule>().await?;
//!
//! // Request scoped providers are built per context, never by `get`
//! assert!(app.get::<RequestState>().is_err());
//!
//! let context = app.create_context_id();
//! let first = app.resolve::<RequestState>(Some(context.clone())).await?;
//! let second = app.resolve::<RequestState>(Some(context)).await?;
//! assert!(Arc::ptr_eq(&first, &second));
//! # Ok::<(), DiError>(())
//! # }).unwrap();
//! ```
//!
//! ## Feature Flags
//!
//! - `logging` (default) - Emit `tracing` events from the scanner, injector and lifecycle
//! - `logging-json` / `logging-pretty` - Install a `tracing-subscriber` formatter via [`logging::builder`]
//! - `derive` - `#[derive(Injectable)]`

mod application;
mod compiler;
mod config;
mod container;
mod error;
mod hooks;
mod injectable;
mod injector;
mod instance_loader;
pub mod logging;
mod metadata;
mod module;
mod provider;
mod resolver;
mod scanner;
mod scope;
mod token;
mod wrapper;

pub use application::*;
pub use compiler::*;
pub use config::*;
pub use container::*;
pub use error::*;
pub use hooks::*;
pub use injectable::*;
pub use injector::*;
pub use instance_loader::*;
pub use logging::Logger;
pub use metadata::*;
pub use module::*;
pub use provider::*;
pub use resolver::*;
pub use scanner::*;
pub use scope::*;
pub use token::*;
pub use wrapper::*;

#[cfg(feature = "derive")]
pub use armature_di_derive::Injectable;

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ApplicationContext, Arguments, Class, ContextId, DiError, DynamicModule, GetOptions,
        Injectable, InjectableDefinition, ModuleClass, ModuleMetadata, ModuleReference, Provider,
        Result, Scope, Token,
    };
    pub use std::sync::Arc;
}
