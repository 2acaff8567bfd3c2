//! Benchmarks for bootstrap and instance lookup

use armature_di::{
    ApplicationContext, Arguments, Injectable, InjectableDefinition, ModuleClass, ModuleMetadata,
    ModuleReference, Provider, Result, Scope, Token,
};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use tokio::runtime::Runtime;

#[allow(dead_code)]
struct Config {
    url: String,
}

impl Injectable for Config {
    fn construct(_: &mut Arguments) -> Result<Self> {
        Ok(Config {
            url: "postgres://localhost".into(),
        })
    }
}

#[allow(dead_code)]
struct Repository {
    config: Arc<Config>,
}

impl Injectable for Repository {
    fn define(def: &mut InjectableDefinition<Self>) {
        def.param::<Config>();
    }
    fn construct(args: &mut Arguments) -> Result<Self> {
        Ok(Repository {
            config: args.next()?,
        })
    }
}

#[allow(dead_code)]
struct RequestContext {
    repository: Arc<Repository>,
}

impl Injectable for RequestContext {
    fn define(def: &mut InjectableDefinition<Self>) {
        def.scope(Scope::Request).param::<Repository>();
    }
    fn construct(args: &mut Arguments) -> Result<Self> {
        Ok(RequestContext {
            repository: args.next()?,
        })
    }
}

struct Counter;

impl Injectable for Counter {
    fn define(def: &mut InjectableDefinition<Self>) {
        def.scope(Scope::Transient);
    }
    fn construct(_: &mut Arguments) -> Result<Self> {
        Ok(Counter)
    }
}

struct DataModule;

impl ModuleClass for DataModule {
    fn metadata(module: &mut ModuleMetadata) {
        module
            .provider(Provider::class::<Config>())
            .provider(Provider::class::<Repository>())
            .export(Token::of::<Repository>());
    }
}

struct AppModule;

impl ModuleClass for AppModule {
    fn metadata(module: &mut ModuleMetadata) {
        module
            .import(ModuleReference::of::<DataModule>())
            .provider(Provider::class::<RequestContext>())
            .provider(Provider::class::<Counter>())
            .provider(Provider::value("PORT", 8080u16));
    }
}

fn runtime() -> Runtime {
    Runtime::new().expect("tokio runtime")
}

fn bench_bootstrap(c: &mut Criterion) {
    let runtime = runtime();
    let mut group = c.benchmark_group("bootstrap");

    group.bench_function("two_modules", |b| {
        b.to_async(&runtime).iter(|| async {
            let app = ApplicationContext::create::<AppModule>().await.unwrap();
            black_box(app)
        })
    });

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let runtime = runtime();
    let app = runtime
        .block_on(ApplicationContext::create::<AppModule>())
        .unwrap();

    let mut group = c.benchmark_group("resolution");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_singleton", |b| {
        b.iter(|| black_box(app.get::<Repository>().unwrap()))
    });

    group.bench_function("get_by_name", |b| {
        let token = Token::from("PORT");
        b.iter(|| black_box(app.get_token(&token, Default::default()).unwrap()))
    });

    group.bench_function("resolve_request_new_context", |b| {
        b.to_async(&runtime).iter(|| async {
            black_box(app.resolve::<RequestContext>(None).await.unwrap())
        })
    });

    let context = app.create_context_id();
    group.bench_function("resolve_request_cached", |b| {
        b.to_async(&runtime).iter(|| async {
            black_box(
                app.resolve::<RequestContext>(Some(context.clone()))
                    .await
                    .unwrap(),
            )
        })
    });

    group.bench_function("resolve_transient", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(app.resolve::<Counter>(None).await.unwrap()) })
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let runtime = runtime();
    let app = runtime
        .block_on(ApplicationContext::create::<AppModule>())
        .unwrap();
    let mut group = c.benchmark_group("concurrent");

    group.bench_function("concurrent_reads_4", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let app = app.clone();
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let _ = app.get::<Repository>().unwrap();
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_bootstrap, bench_resolution, bench_concurrent);
criterion_main!(benches);
