//! Canvas lifecycle integration: parameters, generators, reset, diagram

use std::sync::Arc;
use std::time::Duration;

use flowsim_engine::{
    Aggregation, BinOp, Canvas, ComponentDecl, Condition, EngineConfig, EngineError,
    EngineService, Expr, FileDecl, GeneratorConfig, InstanceDecl, MethodDecl, MetricId,
    MetricQuery, MetricSpec, MetricType, MutationStatus, StaticLoader, Stmt, SystemDecl,
    UsesDecl, Value,
};

fn model() -> FileDecl {
    let mut file = FileDecl::new("models/app.fsim");
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
    file
}

async fn fresh_canvas() -> (EngineService, Arc<Canvas>) {
    let loader = Arc::new(StaticLoader::new());
    loader.insert(model());
    let service = EngineService::new(EngineConfig::for_tests(), loader);
    let canvas = service.create_canvas("main").unwrap();
    canvas.load("models/app.fsim").await.unwrap();
    canvas.use_system("prod").await.unwrap();
    (service, canvas)
}

#[tokio::test]
async fn use_system_requires_a_loaded_file() {
    let loader = Arc::new(StaticLoader::new());
    loader.insert(model());
    let service = EngineService::new(EngineConfig::for_tests(), loader);
    let canvas = service.create_canvas("main").unwrap();

    assert!(matches!(
        canvas.use_system("prod").await,
        Err(EngineError::FailedPrecondition(_))
    ));
    canvas.load("models/app.fsim").await.unwrap();
    assert!(matches!(
        canvas.use_system("staging").await,
        Err(EngineError::NotFound(_))
    ));
    canvas.use_system("prod").await.unwrap();
    assert!(canvas.active_system().await.is_some());
    assert!(!canvas.is_sim_started().await);
}

#[tokio::test]
async fn set_param_returns_the_old_value() {
    let (_service, canvas) = fresh_canvas().await;

    let old = canvas
        .set_param("cache.HitRate", &Expr::float(0.6))
        .await
        .unwrap();
    assert_eq!(old, Value::Float(0.8));
    assert_eq!(
        canvas.get_param("cache.HitRate").await.unwrap(),
        Value::Float(0.6)
    );

    // expressions see the instance's current parameters
    let old = canvas
        .set_param(
            "cache.HitRate",
            &Expr::Bin {
                op: BinOp::Mul,
                lhs: Box::new(Expr::Ref("HitRate".to_string())),
                rhs: Box::new(Expr::float(0.5)),
            },
        )
        .await
        .unwrap();
    assert_eq!(old, Value::Float(0.6));
    assert_eq!(
        canvas.get_param("cache.HitRate").await.unwrap(),
        Value::Float(0.3)
    );

    assert!(matches!(
        canvas.set_param("ghost.HitRate", &Expr::float(0.5)).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn batch_set_rolls_back_on_failure() {
    let (_service, canvas) = fresh_canvas().await;

    let err = canvas
        .batch_set_parameters(&[
            ("cache.HitRate".to_string(), Expr::float(0.25)),
            ("cache.HitRate".to_string(), Expr::float(7.0)), // out of range
        ])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cache.HitRate"));

    // the first write was rolled back
    assert_eq!(
        canvas.get_param("cache.HitRate").await.unwrap(),
        Value::Float(0.8)
    );

    canvas
        .batch_set_parameters(&[
            ("cache.HitRate".to_string(), Expr::float(0.9)),
            ("db.FailureRate".to_string(), Expr::float(0.01)),
        ])
        .await
        .unwrap();
    assert_eq!(
        canvas.get_param("db.FailureRate").await.unwrap(),
        Value::Float(0.01)
    );
}

#[tokio::test]
async fn generator_lifecycle_is_idempotent() {
    let (_service, canvas) = fresh_canvas().await;

    let info = canvas
        .add_generator(GeneratorConfig {
            component: "api".to_string(),
            method: "Lookup".to_string(),
            rate: 20.0,
            duration: None,
        })
        .await
        .unwrap();
    assert!(!info.enabled);
    assert!(!canvas.is_sim_started().await);

    assert_eq!(
        canvas.start_generator(info.id).await.unwrap(),
        MutationStatus::Applied
    );
    assert_eq!(
        canvas.start_generator(info.id).await.unwrap(),
        MutationStatus::AlreadyInState
    );
    assert!(canvas.is_sim_started().await);
    assert!(canvas.simulation_start().is_some());

    assert_eq!(
        canvas.stop_generator(info.id).await.unwrap(),
        MutationStatus::Applied
    );
    assert_eq!(
        canvas.stop_generator(info.id).await.unwrap(),
        MutationStatus::AlreadyInState
    );

    let listed = canvas.list_generators().await;
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].enabled);
    assert!(listed[0].updated_at >= listed[0].created_at);

    canvas.delete_generator(info.id).await.unwrap();
    assert!(matches!(
        canvas.start_generator(info.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn update_generator_restarts_a_running_loop() {
    let (_service, canvas) = fresh_canvas().await;
    let info = canvas
        .add_generator(GeneratorConfig {
            component: "api".to_string(),
            method: "Lookup".to_string(),
            rate: 10.0,
            duration: None,
        })
        .await
        .unwrap();

    // update while stopped only touches the config
    let updated = canvas
        .update_generator(
            info.id,
            flowsim_engine::GeneratorUpdate {
                rate: Some(25.0),
                duration: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.rate, 25.0);
    assert!(updated.updated_at >= info.updated_at);

    canvas.start_generator(info.id).await.unwrap();
    canvas
        .update_generator(
            info.id,
            flowsim_engine::GeneratorUpdate {
                rate: Some(40.0),
                duration: Some(Duration::from_secs(60)),
            },
        )
        .await
        .unwrap();
    let listed = canvas.get_generator(info.id).await.unwrap();
    assert_eq!(listed.rate, 40.0);
    assert!(listed.enabled, "still running after the restart");

    assert!(matches!(
        canvas
            .update_generator(
                info.id,
                flowsim_engine::GeneratorUpdate {
                    rate: Some(-3.0),
                    duration: None,
                }
            )
            .await,
        Err(EngineError::InvalidArgument(_))
    ));
    canvas.stop_all_generators().await.unwrap();
}

#[tokio::test]
async fn generator_validation() {
    let (_service, canvas) = fresh_canvas().await;

    assert!(matches!(
        canvas
            .add_generator(GeneratorConfig {
                component: "api".to_string(),
                method: "Lookup".to_string(),
                rate: 0.0,
                duration: None,
            })
            .await,
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        canvas
            .add_generator(GeneratorConfig {
                component: "api".to_string(),
                method: "Missing".to_string(),
                rate: 5.0,
                duration: None,
            })
            .await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn start_all_and_stop_all_report_counts() {
    let (_service, canvas) = fresh_canvas().await;
    let first = canvas
        .add_generator(GeneratorConfig {
            component: "api".to_string(),
            method: "Lookup".to_string(),
            rate: 10.0,
            duration: None,
        })
        .await
        .unwrap();
    canvas
        .add_generator(GeneratorConfig {
            component: "cache".to_string(),
            method: "Read".to_string(),
            rate: 5.0,
            duration: None,
        })
        .await
        .unwrap();

    canvas.start_generator(first.id).await.unwrap();
    let outcome = canvas.start_all_generators().await.unwrap();
    assert_eq!(outcome.total, 2);
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.already_in_state, 1);
    assert_eq!(outcome.failed, 0);

    let outcome = canvas.stop_all_generators().await.unwrap();
    assert_eq!(outcome.processed, 2);
    let outcome = canvas.stop_all_generators().await.unwrap();
    assert_eq!(outcome.already_in_state, 2);
}

#[tokio::test]
async fn reset_is_idempotent_and_keeps_the_system() {
    let (_service, canvas) = fresh_canvas().await;
    let info = canvas
        .add_generator(GeneratorConfig {
            component: "api".to_string(),
            method: "Lookup".to_string(),
            rate: 10.0,
            duration: None,
        })
        .await
        .unwrap();
    canvas.start_generator(info.id).await.unwrap();

    let spec = MetricSpec {
        id: MetricId::new(),
        component: "api".to_string(),
        methods: vec!["Lookup".to_string()],
        metric_type: MetricType::Count,
        aggregation: Aggregation::Count,
        window: Duration::from_secs(1),
        matcher: None,
    };
    canvas.add_metric(spec).await.unwrap();

    canvas.reset().await.unwrap();
    assert!(!canvas.is_sim_started().await);
    assert!(canvas.simulation_start().is_none());
    assert!(canvas.active_system().await.is_some());
    assert!(canvas.list_metrics().is_empty());
    let listed = canvas.list_generators().await;
    assert!(!listed[0].enabled, "generators stop on reset");

    // reset twice equals reset once
    canvas.reset().await.unwrap();
    assert!(canvas.active_system().await.is_some());
}

#[tokio::test]
async fn diagram_annotates_nodes_with_traffic() {
    let (_service, canvas) = fresh_canvas().await;
    let info = canvas
        .add_generator(GeneratorConfig {
            component: "api".to_string(),
            method: "Lookup".to_string(),
            rate: 100.0,
            duration: None,
        })
        .await
        .unwrap();
    canvas.start_generator(info.id).await.unwrap();

    let diagram = canvas.get_system_diagram().await.unwrap();
    assert_eq!(diagram.system, "prod");
    assert_eq!(diagram.nodes.len(), 3);

    let api = diagram.nodes.iter().find(|n| n.name == "api").unwrap();
    assert!((api.rate - 100.0).abs() < 1.0);
    let db = diagram.nodes.iter().find(|n| n.name == "db").unwrap();
    assert!((15.0..=25.0).contains(&db.rate), "db rate {}", db.rate);

    assert!(diagram
        .edges
        .iter()
        .any(|e| e.from == "api.Lookup" && e.to == "cache.Read" && e.rate > 99.0));

    canvas.stop_all_generators().await.unwrap();
}

#[tokio::test]
async fn utilization_collection_filters_by_instance() {
    let (_service, canvas) = fresh_canvas().await;
    let all = canvas.get_utilization(None).await.unwrap();
    assert!(all.len() >= 2, "native instances report utilization");
    assert!(all.iter().all(|u| u.component_path.is_some()));

    let one = canvas
        .get_utilization(Some(&["cache".to_string()]))
        .await
        .unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].component_path.as_deref(), Some("cache"));

    assert!(canvas
        .get_utilization(Some(&["ghost".to_string()]))
        .await
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn generators_drive_metrics_end_to_end() {
    let (_service, canvas) = fresh_canvas().await;
    let spec = MetricSpec {
        id: MetricId::new(),
        component: "api".to_string(),
        methods: vec!["Lookup".to_string()],
        metric_type: MetricType::Count,
        aggregation: Aggregation::Count,
        window: Duration::from_secs(1),
        matcher: None,
    };
    let metric_id = canvas.add_metric(spec).await.unwrap();

    let info = canvas
        .add_generator(GeneratorConfig {
            component: "api".to_string(),
            method: "Lookup".to_string(),
            rate: 50.0,
            duration: None,
        })
        .await
        .unwrap();
    canvas.start_generator(info.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    canvas.stop_generator(info.id).await.unwrap();

    let result = canvas.query_metrics(metric_id, &MetricQuery::default());
    assert!(result.total_rows >= 4, "got {} windows", result.total_rows);
    let total: f64 = result.points.iter().map(|p| p.value).sum();
    assert!(
        (200.0..=300.0).contains(&total),
        "5s at 50 rps produced {} executions",
        total
    );
}
