//! `#[derive(Injectable)]` against a bootstrapped application

use armature_di::{
    ApplicationContext, DiError, Injectable, ModuleClass, ModuleMetadata, Provider, Scope, Token,
};
use std::sync::Arc;

#[derive(Injectable)]
struct Database;

#[derive(Injectable)]
struct Cache;

#[derive(Injectable)]
struct UserService {
    #[inject]
    db: Arc<Database>,
    #[inject(token = "DATABASE_URL")]
    url: Arc<String>,
    #[inject(optional)]
    cache: Option<Arc<Cache>>,
    request_count: u64,
}

#[derive(Injectable)]
#[injectable(scope = "request")]
struct RequestTracker {
    #[inject]
    users: Arc<UserService>,
}

#[derive(Injectable)]
#[injectable(scope = "transient")]
struct Stamp;

struct AppModule;

impl ModuleClass for AppModule {
    fn metadata(module: &mut ModuleMetadata) {
        module
            .provider(Provider::class::<Database>())
            .provider(Provider::value("DATABASE_URL", "postgres://localhost".to_string()))
            .provider(Provider::class::<UserService>())
            .provider(Provider::class::<RequestTracker>())
            .provider(Provider::class::<Stamp>());
    }
}

#[tokio::test]
async fn test_derived_fields_are_injected() {
    let app = ApplicationContext::create::<AppModule>().await.unwrap();
    let users = app.get::<UserService>().unwrap();

    assert!(Arc::ptr_eq(&users.db, &app.get::<Database>().unwrap()));
    assert_eq!(users.url.as_str(), "postgres://localhost");
    assert!(users.cache.is_none());
    assert_eq!(users.request_count, 0);
}

#[tokio::test]
async fn test_derived_scope() {
    let app = ApplicationContext::create::<AppModule>().await.unwrap();

    assert_eq!(
        app.introspect(&Token::of::<RequestTracker>()).unwrap().scope,
        Scope::Request
    );
    assert!(matches!(
        app.get::<RequestTracker>(),
        Err(DiError::InvalidClassScope { .. })
    ));

    let tracker = app.resolve::<RequestTracker>(None).await.unwrap();
    assert!(Arc::ptr_eq(&tracker.users, &app.get::<UserService>().unwrap()));

    let first = app.resolve::<Stamp>(None).await.unwrap();
    let second = app.resolve::<Stamp>(None).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}
