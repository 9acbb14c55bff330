//! Flow solver integration: rate conservation through declarative graphs

use std::sync::Arc;

use flowsim_components::BehaviorRegistry;
use flowsim_engine::{
    ComponentDecl, Condition, EngineConfig, Expr, FileDecl, FlowStatus, GeneratorSeed,
    InstanceDecl, MethodDecl, Runtime, Stmt, StrategyRegistry, SystemDecl, UsesDecl, Value,
};

fn runtime() -> Runtime {
    Runtime::new(Arc::new(BehaviorRegistry::with_builtins()))
}

fn leaf_component(name: &str) -> ComponentDecl {
    let mut decl = ComponentDecl::declarative(name);
    decl.methods.push(MethodDecl {
        name: "Handle".to_string(),
        body: vec![Stmt::Delay(Expr::float(0.001))],
    });
    decl
}

fn calling_component(name: &str, dep: &str, dep_component: &str) -> ComponentDecl {
    let mut decl = ComponentDecl::declarative(name);
    decl.uses.push(UsesDecl {
        name: dep.to_string(),
        component: dep_component.to_string(),
    });
    decl.methods.push(MethodDecl {
        name: "Handle".to_string(),
        body: vec![Stmt::Call(format!("{}.Handle", dep))],
    });
    decl
}

fn chain_file() -> Arc<FileDecl> {
    let mut file = FileDecl::new("models/chain.fsim");
    file.components.push(leaf_component("Sink"));
    file.components.push(calling_component("Middle", "next", "Sink"));
    file.components.push(calling_component("Front", "next", "Middle"));
    file.systems.push(SystemDecl {
        name: "chain".to_string(),
        instances: vec![
            InstanceDecl::new("c", "Sink"),
            InstanceDecl {
                name: "b".to_string(),
                component: "Middle".to_string(),
                params: vec![],
                bindings: vec![("next".to_string(), "c".to_string())],
            },
            InstanceDecl {
                name: "a".to_string(),
                component: "Front".to_string(),
                params: vec![],
                bindings: vec![("next".to_string(), "b".to_string())],
            },
        ],
    });
    Arc::new(file)
}

#[test]
fn chain_conserves_rate() {
    let runtime = runtime();
    let system = runtime.new_system(chain_file(), "chain").unwrap();
    let strategies = StrategyRegistry::with_defaults();
    let seeds = vec![GeneratorSeed {
        component: "a".to_string(),
        method: "Handle".to_string(),
        rate: 100.0,
    }];

    let result = strategies
        .get("runtime")
        .unwrap()
        .evaluate(&system, &seeds, &EngineConfig::for_tests())
        .unwrap();

    assert_eq!(result.status, FlowStatus::Converged);
    assert!(result.warnings.is_empty());
    for name in ["a", "b", "c"] {
        let rate = result.method_rate(name, "Handle");
        assert!(
            (rate - 100.0).abs() < 1.0,
            "{} expected 100 rps, got {}",
            name,
            rate
        );
    }

    // every contribution was recorded with its positive rate
    assert_eq!(result.edges.len(), 2);
    assert!(result.edges.iter().all(|e| e.rate > 99.0));
}

#[test]
fn fan_out_splits_by_probability() {
    let mut file = FileDecl::new("models/fanout.fsim");
    file.components.push(leaf_component("Sink"));
    let mut front = ComponentDecl::declarative("Front");
    front.uses.push(UsesDecl {
        name: "left".to_string(),
        component: "Sink".to_string(),
    });
    front.uses.push(UsesDecl {
        name: "right".to_string(),
        component: "Sink".to_string(),
    });
    front.methods.push(MethodDecl {
        name: "Handle".to_string(),
        body: vec![Stmt::If {
            condition: Condition::Prob(0.7),
            then_branch: vec![Stmt::Call("left.Handle".to_string())],
            else_branch: vec![Stmt::Call("right.Handle".to_string())],
        }],
    });
    file.components.push(front);
    file.systems.push(SystemDecl {
        name: "fanout".to_string(),
        instances: vec![
            InstanceDecl::new("b", "Sink"),
            InstanceDecl::new("c", "Sink"),
            InstanceDecl {
                name: "a".to_string(),
                component: "Front".to_string(),
                params: vec![],
                bindings: vec![
                    ("left".to_string(), "b".to_string()),
                    ("right".to_string(), "c".to_string()),
                ],
            },
        ],
    });

    let runtime = runtime();
    let system = runtime.new_system(Arc::new(file), "fanout").unwrap();
    let strategies = StrategyRegistry::with_defaults();
    let seeds = vec![GeneratorSeed {
        component: "a".to_string(),
        method: "Handle".to_string(),
        rate: 100.0,
    }];
    let result = strategies
        .get("runtime")
        .unwrap()
        .evaluate(&system, &seeds, &EngineConfig::for_tests())
        .unwrap();

    assert_eq!(result.status, FlowStatus::Converged);
    let b = result.method_rate("b", "Handle");
    let c = result.method_rate("c", "Handle");
    assert!((69.0..=71.0).contains(&b), "left got {}", b);
    assert!((29.0..=31.0).contains(&c), "right got {}", c);
}

fn cascade_file() -> Arc<FileDecl> {
    let mut file = FileDecl::new("models/cascade.fsim");
    file.components.push(ComponentDecl::native("CacheNode", "cache"));
    file.components.push(ComponentDecl::native("DiskNode", "disk"));

    let mut api = ComponentDecl::declarative("Api");
    api.uses.push(UsesDecl {
        name: "cache".to_string(),
        component: "CacheNode".to_string(),
    });
    api.uses.push(UsesDecl {
        name: "db".to_string(),
        component: "DiskNode".to_string(),
    });
    api.methods.push(MethodDecl {
        name: "Lookup".to_string(),
        body: vec![Stmt::If {
            condition: Condition::Call("cache.Read".to_string()),
            then_branch: vec![],
            else_branch: vec![Stmt::Call("db.Read".to_string())],
        }],
    });
    file.components.push(api);

    file.systems.push(SystemDecl {
        name: "prod".to_string(),
        instances: vec![
            InstanceDecl::new("cache", "CacheNode"),
            InstanceDecl::new("db", "DiskNode"),
            InstanceDecl::new("api", "Api"),
        ],
    });
    Arc::new(file)
}

#[test]
fn cache_hit_rate_shields_the_database() {
    let runtime = runtime();
    let system = runtime.new_system(cascade_file(), "prod").unwrap();
    let strategies = StrategyRegistry::with_defaults();
    let seeds = vec![GeneratorSeed {
        component: "api".to_string(),
        method: "Lookup".to_string(),
        rate: 100.0,
    }];
    let result = strategies
        .get("runtime")
        .unwrap()
        .evaluate(&system, &seeds, &EngineConfig::for_tests())
        .unwrap();

    assert_eq!(result.status, FlowStatus::Converged);
    let cache_rate = result.method_rate("cache", "Read");
    let db_rate = result.method_rate("db", "Read");
    assert!((99.0..=101.0).contains(&cache_rate), "cache got {}", cache_rate);
    assert!(
        (15.0..=25.0).contains(&db_rate),
        "db expected the miss share, got {}",
        db_rate
    );
}

#[test]
fn hit_rate_changes_shift_the_miss_traffic() {
    let runtime = runtime();
    let system = runtime.new_system(cascade_file(), "prod").unwrap();
    let cache = system.instance("cache").unwrap();
    cache
        .set_param("HitRate", Value::Float(0.5))
        .unwrap();

    let strategies = StrategyRegistry::with_defaults();
    let seeds = vec![GeneratorSeed {
        component: "api".to_string(),
        method: "Lookup".to_string(),
        rate: 100.0,
    }];
    let result = strategies
        .get("runtime")
        .unwrap()
        .evaluate(&system, &seeds, &EngineConfig::for_tests())
        .unwrap();
    let db_rate = result.method_rate("db", "Read");
    assert!((45.0..=55.0).contains(&db_rate), "db got {}", db_rate);
}

#[test]
fn unknown_generator_target_is_rejected() {
    let runtime = runtime();
    let system = runtime.new_system(chain_file(), "chain").unwrap();
    let strategies = StrategyRegistry::with_defaults();
    let seeds = vec![GeneratorSeed {
        component: "ghost".to_string(),
        method: "Handle".to_string(),
        rate: 1.0,
    }];
    assert!(strategies
        .get("runtime")
        .unwrap()
        .evaluate(&system, &seeds, &EngineConfig::for_tests())
        .is_err());
}

#[test]
fn static_strategy_matches_on_declarative_graphs() {
    let runtime = runtime();
    let system = runtime.new_system(chain_file(), "chain").unwrap();
    let strategies = StrategyRegistry::with_defaults();
    let seeds = vec![GeneratorSeed {
        component: "a".to_string(),
        method: "Handle".to_string(),
        rate: 40.0,
    }];
    let result = strategies
        .get("static")
        .unwrap()
        .evaluate(&system, &seeds, &EngineConfig::for_tests())
        .unwrap();
    assert_eq!(result.strategy, "static");
    assert!((result.method_rate("c", "Handle") - 40.0).abs() < 0.5);
}

#[test]
fn async_hand_offs_carry_traffic_but_not_latency() {
    let mut file = FileDecl::new("models/audit.fsim");
    file.components.push(ComponentDecl::native("DiskNode", "disk"));
    let mut front = ComponentDecl::declarative("Front");
    front.uses.push(UsesDecl {
        name: "audit".to_string(),
        component: "DiskNode".to_string(),
    });
    front.methods.push(MethodDecl {
        name: "Handle".to_string(),
        body: vec![
            Stmt::Delay(Expr::float(0.002)),
            Stmt::Go("audit.Write".to_string()),
        ],
    });
    file.components.push(front);
    file.systems.push(SystemDecl {
        name: "audited".to_string(),
        instances: vec![
            InstanceDecl::new("audit", "DiskNode"),
            InstanceDecl::new("a", "Front"),
        ],
    });

    let runtime = runtime();
    let system = runtime.new_system(Arc::new(file), "audited").unwrap();

    // the audit write receives the full rate
    let strategies = StrategyRegistry::with_defaults();
    let seeds = vec![GeneratorSeed {
        component: "a".to_string(),
        method: "Handle".to_string(),
        rate: 100.0,
    }];
    let result = strategies
        .get("runtime")
        .unwrap()
        .evaluate(&system, &seeds, &EngineConfig::for_tests())
        .unwrap();
    assert!((result.method_rate("audit", "Write") - 100.0).abs() < 1.0);

    // but the caller's latency is just its own delay
    let a = system.instance("a").unwrap();
    let outcomes = runtime.analyze(&system, &a, "Handle").unwrap();
    let mean = flowsim_outcomes::mean_latency(&outcomes);
    assert_eq!(mean, std::time::Duration::from_secs_f64(0.002));
}

#[test]
fn analysis_composes_cache_and_database_outcomes() {
    let runtime = runtime();
    let system = runtime.new_system(cascade_file(), "prod").unwrap();
    let api = system.instance("api").unwrap();

    let outcomes = runtime.analyze(&system, &api, "Lookup").unwrap();
    assert!((outcomes.total_weight() - 1.0).abs() < 1e-6);
    // a miss falls through to the database, so lookups stay available
    assert!(flowsim_outcomes::availability(&outcomes) > 0.99);
    // misses pay the database latency on top of the cache miss
    let p90 = flowsim_outcomes::latency_percentile(&outcomes, 0.9).unwrap();
    assert!(p90 >= std::time::Duration::from_millis(1));
}
