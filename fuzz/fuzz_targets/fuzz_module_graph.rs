#![no_main]

//! Fuzz target for module graph scanning
//!
//! Builds arbitrary acyclic graphs of dynamic modules with value providers,
//! exports and imports, bootstraps them, and checks every provider of a
//! successfully bootstrapped graph that needs no context has an instance.

use arbitrary::Arbitrary;
use armature_di::{
    ApplicationContext, DynamicModule, GetOptions, ModuleClass, ModuleMetadata, Provider, Scope,
    Token,
};
use libfuzzer_sys::fuzz_target;

const NAMES: [&str; 8] = ["A", "B", "C", "D", "E", "F", "G", "H"];

struct GraphModule;

impl ModuleClass for GraphModule {
    fn metadata(_: &mut ModuleMetadata) {}
}

/// One module of the graph
#[derive(Debug, Arbitrary)]
struct Node {
    /// Indexes into `NAMES`
    providers: Vec<(u8, u32)>,
    /// Bitmask over `providers`
    exports: u8,
    /// Imports of later nodes, as offsets from this node
    imports: Vec<u8>,
    global: bool,
}

fuzz_target!(|nodes: Vec<Node>| {
    let nodes: Vec<Node> = nodes.into_iter().take(6).collect(); // Limit graph size
    if nodes.is_empty() {
        return;
    }

    // Build bottom-up so every import is already constructed
    let mut built: Vec<Option<DynamicModule>> = vec![None; nodes.len()];
    let mut provided: Vec<&'static str> = Vec::new();
    for (index, node) in nodes.iter().enumerate().rev() {
        let mut module = DynamicModule::new::<GraphModule>();
        for (slot, (name, value)) in node.providers.iter().take(8).enumerate() {
            let name = NAMES[*name as usize % NAMES.len()];
            module = module.provider(Provider::value(name, *value));
            if node.exports & (1 << slot) != 0 {
                module = module.export(name);
            }
            provided.push(name);
        }
        for offset in node.imports.iter().take(4) {
            let target = index + 1 + *offset as usize;
            if let Some(Some(import)) = built.get(target) {
                module = module.import(import.clone());
            }
        }
        if node.global && index > 0 {
            module = module.global();
        }
        built[index] = Some(module);
    }
    let Some(root) = built.swap_remove(0) else {
        return;
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let Ok(app) = runtime.block_on(ApplicationContext::builder(root).build()) else {
        return;
    };

    for module in app.modules() {
        for wrapper in module.providers() {
            if !wrapper.is_dependency_tree_static() || wrapper.scope() == Scope::Transient {
                continue;
            }
            assert!(wrapper.is_resolved(), "{wrapper:?} unresolved after bootstrap");
        }
    }
    for name in provided {
        // only reachable modules are registered, so a miss is not an error
        if let Ok(all) = app.get_all(&Token::from(name), GetOptions::default().each()) {
            assert!(!all.is_empty());
        }
    }
});
