//! Bootstrap instantiation
//!
//! Links every wrapper to the wrappers it depends on, then builds providers,
//! enhancers and controllers of every module in the application-wide context.
//! Request-scoped subtrees are visited but left unbuilt.

use crate::container::Container;
use crate::injector::Injector;
use crate::logging::{Logger, log_event};
use crate::module::Module;
use crate::scope::ContextId;
use crate::wrapper::InstanceWrapper;
use crate::Result;
use futures::future::try_join_all;
use std::sync::Arc;

pub struct InstanceLoader {
    container: Arc<Container>,
    injector: Arc<Injector>,
    logger: Logger,
}

impl InstanceLoader {
    pub fn new(container: Arc<Container>, injector: Arc<Injector>, logger: Logger) -> Self {
        Self {
            container,
            injector,
            logger,
        }
    }

    /// Instantiate every module's dependencies
    pub async fn create_instances_of_dependencies(&self) -> Result<()> {
        let modules = self.container.get_modules();
        self.create_prototypes(&modules);
        try_join_all(modules.iter().map(|module| self.create_instances(module))).await?;
        Ok(())
    }

    fn create_prototypes(&self, modules: &[Arc<Module>]) {
        for module in modules {
            for wrapper in collections(module) {
                self.injector.link(&wrapper, module);
            }
        }
    }

    async fn create_instances(&self, module: &Arc<Module>) -> Result<()> {
        self.load_all(module, module.providers()).await?;
        self.load_all(module, module.injectables()).await?;
        self.load_all(module, module.controllers()).await?;

        log_event!(
            self.logger,
            info,
            module = module.name(),
            "{} dependencies initialized",
            module.name()
        );
        Ok(())
    }

    async fn load_all(&self, module: &Arc<Module>, wrappers: Vec<Arc<InstanceWrapper>>) -> Result<()> {
        let loads = wrappers.into_iter().map(|wrapper| {
            self.injector.load_instance(
                wrapper,
                module.clone(),
                ContextId::static_context(),
                None,
            )
        });
        try_join_all(loads).await?;
        Ok(())
    }
}

fn collections(module: &Module) -> Vec<Arc<InstanceWrapper>> {
    let mut wrappers = module.providers();
    wrappers.extend(module.injectables());
    wrappers.extend(module.controllers());
    wrappers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApplicationConfig;
    use crate::scanner::DependenciesScanner;
    use crate::{
        Arguments, Class, Injectable, InjectableDefinition, ModuleClass, ModuleMetadata,
        ModuleReference, Provider, Scope, Token,
    };

    struct Clock;
    impl Injectable for Clock {
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Clock)
        }
    }

    struct Session;
    impl Injectable for Session {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.scope(Scope::Request).param::<Clock>();
        }
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Session)
        }
    }

    struct SessionController;
    impl Injectable for SessionController {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.controller().param::<Session>();
        }
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(SessionController)
        }
    }

    struct LoaderModule;
    impl ModuleClass for LoaderModule {
        fn metadata(module: &mut ModuleMetadata) {
            module
                .provider(Provider::class::<Clock>())
                .provider(Provider::class::<Session>())
                .controller(Class::of::<SessionController>());
        }
    }

    #[tokio::test]
    async fn test_static_instances_built_request_scoped_skipped() {
        let container = Container::new(Arc::new(ApplicationConfig::new()), Logger::disabled());
        DependenciesScanner::new(container.clone(), Logger::disabled())
            .scan(&ModuleReference::of::<LoaderModule>(), &[])
            .await
            .unwrap();
        let injector = Arc::new(Injector::new(Logger::disabled()));
        InstanceLoader::new(container.clone(), injector, Logger::disabled())
            .create_instances_of_dependencies()
            .await
            .unwrap();

        let module = container
            .get_module_by_class(Class::module::<LoaderModule>())
            .unwrap();
        let clock = module.get_provider_by_key(&Token::of::<Clock>()).unwrap();
        let session = module.get_provider_by_key(&Token::of::<Session>()).unwrap();
        let controller = module
            .get_controller_by_key(&Token::of::<SessionController>())
            .unwrap();

        assert!(clock.instance().is_some());
        assert!(session.is_resolved());
        assert!(session.instance().is_none());
        assert!(!controller.is_dependency_tree_static());
        assert!(controller.instance().is_none());
    }
}
