//! End-to-end pipeline tests.
//!
//! Each test resolves a sequence through the builder and runs it through
//! the executor, recording what every unit did into a shared log.

use std::sync::Arc;

use http::StatusCode;
use parking_lot::Mutex;
use serde_json::json;
use strata_config::{ConfigLoader, GroupSettings, MiddlewareSettings};
use strata_core::{fixtures, PipelineError, Response};
use strata_middleware::stages::{register_stock_units, Authenticate, ErrorTranslation, StaticTokens};
use strata_middleware::{
    endpoint_fn, BuildError, CancelSignal, Endpoint, Executor, ExecutorOptions, FnMiddleware, Middleware, MiddlewareRegistry, Outcome,
    PipelineBuilder, RouteDeclaration,
};

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

/// Records before, after and terminate.
fn recording(name: &'static str, log: &Log) -> impl Middleware {
    let handle_log = log.clone();
    let terminate_log = log.clone();
    FnMiddleware::new(name, move |ctx, next, _| {
        let log = handle_log.clone();
        Box::pin(async move {
            log.lock().push(format!("{name}:before"));
            let response = next.run(ctx).await?;
            log.lock().push(format!("{name}:after:{}", response.status().as_u16()));
            Ok(response)
        })
    })
    .with_terminate(move |_, _, _| {
        terminate_log.lock().push(format!("{name}:terminate"));
        Box::pin(async { Ok(()) })
    })
}

/// Answers 403 without calling its continuation. Has no terminate hook.
fn denying(name: &'static str, log: &Log) -> impl Middleware {
    let log = log.clone();
    FnMiddleware::new(name, move |_, _, _| {
        log.lock().push(format!("{name}:deny"));
        Box::pin(async { Ok(Response::text(StatusCode::FORBIDDEN, "denied")) })
    })
}

/// Raises an error before calling its continuation.
fn failing(name: &'static str, log: &Log) -> impl Middleware {
    let handle_log = log.clone();
    let terminate_log = log.clone();
    FnMiddleware::new(name, move |_, _, _| {
        handle_log.lock().push(format!("{name}:fail"));
        Box::pin(async { Err(PipelineError::internal("storage offline")) })
    })
    .with_terminate(move |_, _, _| {
        terminate_log.lock().push(format!("{name}:terminate"));
        Box::pin(async { Ok(()) })
    })
}

fn handler(log: &Log) -> impl Endpoint {
    let log = log.clone();
    endpoint_fn(move |_| {
        log.lock().push("handler".to_string());
        Box::pin(async { Ok(Response::text(StatusCode::OK, "done")) })
    })
}

/// global = [a], group g = [b, c]
fn settings() -> MiddlewareSettings {
    let mut settings = MiddlewareSettings::default();
    settings.append_global("a");
    settings.groups.insert("g".into(), GroupSettings::new(["b", "c"]));
    settings
}

fn recording_registry(log: &Log) -> MiddlewareRegistry {
    MiddlewareRegistry::new()
        .with("a", recording("a", log))
        .with("b", recording("b", log))
        .with("c", recording("c", log))
        .with("d", recording("d", log))
}

fn route() -> RouteDeclaration {
    RouteDeclaration::named("r").group("g").unit("d")
}

#[tokio::test]
async fn scenario_full_order_before_and_after() {
    let log = new_log();
    let builder = PipelineBuilder::new(settings(), recording_registry(&log)).unwrap();
    let sequence = builder.build_sequence(&route()).unwrap();
    assert_eq!(sequence.ids(), vec!["a", "b", "c", "d"]);

    let completion = Executor::new(sequence)
        .execute(fixtures::get("/"), &handler(&log))
        .await;
    assert_eq!(completion.outcome(), Outcome::Completed);
    assert_eq!(completion.response().status(), StatusCode::OK);

    let report = completion.terminate().await;
    assert!(report.is_clean());
    assert_eq!(
        entries(&log),
        vec![
            "a:before",
            "b:before",
            "c:before",
            "d:before",
            "handler",
            "d:after:200",
            "c:after:200",
            "b:after:200",
            "a:after:200",
            "a:terminate",
            "b:terminate",
            "c:terminate",
            "d:terminate",
        ]
    );
}

#[tokio::test]
async fn scenario_route_exclusion() {
    let log = new_log();
    let builder = PipelineBuilder::new(settings(), recording_registry(&log)).unwrap();
    let sequence = builder.build_sequence(&route().excluding("c")).unwrap();
    assert_eq!(sequence.ids(), vec!["a", "b", "d"]);

    let (_, report) = Executor::new(sequence).run(fixtures::get("/"), &handler(&log)).await;
    assert_eq!(report.invoked, vec!["a", "b", "d"]);
    assert!(!entries(&log).iter().any(|line| line.starts_with("c:")));
}

#[tokio::test]
async fn scenario_short_circuit() {
    let log = new_log();
    let registry = recording_registry(&log).with("b", denying("b", &log));
    let builder = PipelineBuilder::new(settings(), registry).unwrap();
    let sequence = builder.build_sequence(&route()).unwrap();

    let completion = Executor::new(sequence)
        .execute(fixtures::get("/"), &handler(&log))
        .await;
    assert_eq!(completion.outcome(), Outcome::Completed);
    assert_eq!(completion.response().status(), StatusCode::FORBIDDEN);
    assert_eq!(entries(&log), vec!["a:before", "b:deny", "a:after:403"]);

    // Every hook runs after a completed execution, including units the
    // short-circuit skipped.
    let report = completion.terminate().await;
    assert_eq!(report.invoked, vec!["a", "c", "d"]);
}

#[tokio::test]
async fn scenario_global_duplicate_in_group() {
    let log = new_log();
    let mut settings = MiddlewareSettings::default();
    settings.append_global("a");
    settings.groups.insert("g1".into(), GroupSettings::new(["a", "b"]));
    let builder = PipelineBuilder::new(settings, recording_registry(&log)).unwrap();

    let sequence = builder.build_sequence(&RouteDeclaration::new().group("g1")).unwrap();
    assert_eq!(sequence.ids(), vec!["a", "b"]);

    Executor::new(sequence).run(fixtures::get("/"), &handler(&log)).await;
    assert_eq!(entries(&log).iter().filter(|line| *line == "a:before").count(), 1);
}

#[tokio::test]
async fn scenario_failing_terminate_does_not_stop_later_hooks() {
    let log = new_log();
    let terminate_log = log.clone();
    let e = FnMiddleware::new("e", |ctx, next, _| Box::pin(next.run(ctx))).with_terminate(|_, _, _| {
        Box::pin(async { Err(PipelineError::internal("flush failed")) })
    });
    let f = FnMiddleware::new("f", |ctx, next, _| Box::pin(next.run(ctx))).with_terminate(move |_, _, _| {
        terminate_log.lock().push("f:terminate".to_string());
        Box::pin(async { Ok(()) })
    });

    let builder = PipelineBuilder::new(
        MiddlewareSettings::default(),
        MiddlewareRegistry::new().with("e", e).with("f", f),
    )
    .unwrap();
    let sequence = builder
        .build_sequence(&RouteDeclaration::new().unit("e").unit("f"))
        .unwrap();

    let (response, report) = Executor::new(sequence).run(fixtures::get("/"), &handler(&log)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(report.invoked, vec!["e", "f"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].unit, "e");
    assert!(entries(&log).contains(&"f:terminate".to_string()));
}

#[tokio::test]
async fn failed_execution_terminates_only_entered_units() {
    let log = new_log();
    let registry = recording_registry(&log).with("b", failing("b", &log));
    let builder = PipelineBuilder::new(settings(), registry).unwrap();
    let sequence = builder.build_sequence(&route()).unwrap();

    let completion = Executor::new(sequence)
        .execute(fixtures::json_get("/"), &handler(&log))
        .await;
    assert_eq!(completion.outcome(), Outcome::Failed);
    assert_eq!(completion.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(matches!(completion.error(), Some(PipelineError::Internal { .. })));

    let body: serde_json::Value = serde_json::from_slice(&completion.response().body_bytes()).unwrap();
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    assert_eq!(body["request_id"], completion.context().request_id().to_string());

    let report = completion.terminate().await;
    assert_eq!(report.invoked, vec!["a", "b"]);
    assert_eq!(entries(&log), vec!["a:before", "b:fail", "a:terminate", "b:terminate"]);
}

#[tokio::test]
async fn error_translation_turns_failure_into_response() {
    let log = new_log();
    let mut settings = settings();
    settings.prepend_global("errors");
    let registry = recording_registry(&log)
        .with("errors", ErrorTranslation::new())
        .with("c", failing("c", &log));
    let builder = PipelineBuilder::new(settings, registry).unwrap();
    let sequence = builder.build_sequence(&route()).unwrap();

    let completion = Executor::new(sequence)
        .execute(fixtures::get("/"), &handler(&log))
        .await;
    assert_eq!(completion.outcome(), Outcome::Completed);
    assert_eq!(completion.response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(entries(&log), vec!["a:before", "b:before", "c:fail"]);
}

#[tokio::test]
async fn mutations_flow_both_ways() {
    let outer = FnMiddleware::new("outer", |ctx, next, _| {
        Box::pin(async move {
            ctx.set_attribute("tenant", "acme");
            let response = next.run(ctx).await?;
            let tagged = response.header("x-inner").unwrap_or("missing").to_string();
            Ok(response.with_header("x-outer-saw", tagged))
        })
    });
    let inner = FnMiddleware::new("inner", |ctx, next, _| {
        Box::pin(async move {
            let response = next.run(ctx).await?;
            Ok(response.with_header("x-inner", "yes"))
        })
    });
    let endpoint = endpoint_fn(|ctx| {
        let tenant = ctx.attribute("tenant").cloned();
        Box::pin(async move { Ok(Response::json(StatusCode::OK, &json!({ "tenant": tenant }))) })
    });

    let builder = PipelineBuilder::new(
        MiddlewareSettings::default(),
        MiddlewareRegistry::new().with("outer", outer).with("inner", inner),
    )
    .unwrap();
    let sequence = builder
        .build_sequence(&RouteDeclaration::new().unit("outer").unit("inner"))
        .unwrap();

    let (response, _) = Executor::new(sequence).run(fixtures::get("/"), &endpoint).await;
    assert_eq!(response.header("x-outer-saw"), Some("yes"));
    let body: serde_json::Value = serde_json::from_slice(&response.body_bytes()).unwrap();
    assert_eq!(body["tenant"], "acme");
}

#[tokio::test]
async fn cancellation_skips_remaining_units() {
    let log = new_log();
    let signal = CancelSignal::new();
    let trip = signal.clone();
    let unit_log = log.clone();
    let cancelling = FnMiddleware::new("b", move |ctx, next, _| {
        unit_log.lock().push("b:before".to_string());
        trip.cancel();
        Box::pin(next.run(ctx))
    })
    .with_terminate(|_, _, _| Box::pin(async { Ok(()) }));

    let registry = recording_registry(&log).with("b", cancelling);
    let builder = PipelineBuilder::new(settings(), registry).unwrap();
    let sequence = builder.build_sequence(&route()).unwrap();

    let completion = Executor::new(sequence)
        .execute_with_cancel(fixtures::get("/"), &handler(&log), &signal)
        .await;
    assert_eq!(completion.outcome(), Outcome::Cancelled);
    assert_eq!(completion.response().status().as_u16(), 499);
    assert_eq!(completion.terminate_candidates(), vec!["a", "b"]);

    let report = completion.terminate().await;
    assert_eq!(report.invoked, vec!["a", "b"]);
    assert!(!entries(&log).iter().any(|line| line == "handler" || line.starts_with("c:")));
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let log = new_log();
    let builder = PipelineBuilder::new(settings(), recording_registry(&log)).unwrap();
    let sequence = builder.build_sequence(&route()).unwrap();
    let signal = CancelSignal::new();
    signal.cancel();

    let completion = Executor::new(sequence)
        .execute_with_cancel(fixtures::get("/"), &handler(&log), &signal)
        .await;
    assert_eq!(completion.outcome(), Outcome::Cancelled);

    let report = completion.terminate().await;
    assert!(report.invoked.is_empty());
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn priority_reorders_execution() {
    let log = new_log();
    let mut settings = settings();
    settings.priority = vec!["d".into(), "b".into()];
    let builder = PipelineBuilder::new(settings, recording_registry(&log)).unwrap();

    let sequence = builder.build_sequence(&route()).unwrap();
    assert_eq!(sequence.ids(), vec!["a", "d", "c", "b"]);
}

#[test]
fn cyclic_groups_fail_at_build_time() {
    let mut settings = MiddlewareSettings::default();
    settings.groups.insert("web".into(), GroupSettings::new(["session", "api"]));
    settings.groups.insert("api".into(), GroupSettings::new(["web"]));

    let err = PipelineBuilder::new(settings, MiddlewareRegistry::new()).unwrap_err();
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn undefined_alias_target_fails_at_build_time() {
    let mut settings = MiddlewareSettings::default();
    settings.aliases.insert("auth".into(), "strata.authenticate".into());

    let err = PipelineBuilder::new(settings, MiddlewareRegistry::new()).unwrap_err();
    assert!(matches!(err, BuildError::UnregisteredUnit { ref alias, .. } if alias == "auth"));
}

#[tokio::test]
async fn configured_application_stack() {
    let config = ConfigLoader::new()
        .with_defaults()
        .with_string(
            r#"
            [middleware]
            global = ["request_id", "errors"]

            [middleware.aliases]
            auth = "strata.authenticate"

            [middleware.groups.admin]
            middleware = ["auth", "role:admin"]
            "#,
            "toml",
        )
        .unwrap()
        .load()
        .unwrap();

    let tokens = StaticTokens::new()
        .with("root-token", json!({ "id": 1, "roles": ["admin"] }))
        .with("guest-token", json!({ "id": 2, "roles": ["viewer"] }));
    let mut registry = MiddlewareRegistry::new();
    register_stock_units(&mut registry, ExecutorOptions::default());
    registry.register("strata.authenticate", Authenticate::new(tokens));

    let builder = PipelineBuilder::new(config.middleware, registry).unwrap();
    let routes = vec![
        RouteDeclaration::named("admin.dashboard").group("admin"),
        RouteDeclaration::named("health").excluding("request_id"),
    ];
    let table = builder.compile_routes(&routes).unwrap();
    assert_eq!(
        table["admin.dashboard"].labels(),
        vec!["request_id", "errors", "strata.authenticate", "role:admin"]
    );
    assert_eq!(table["health"].ids(), vec!["errors"]);

    let executor = Executor::new(table["admin.dashboard"].clone());
    let endpoint = endpoint_fn(|_| Box::pin(async { Ok(Response::text(StatusCode::OK, "welcome")) }));

    let (admin, _) = executor
        .run(fixtures::authenticated_get("/admin", "root-token"), &endpoint)
        .await;
    assert_eq!(admin.status(), StatusCode::OK);
    assert!(admin.header("x-request-id").is_some());

    let (guest, _) = executor
        .run(fixtures::authenticated_get("/admin", "guest-token"), &endpoint)
        .await;
    assert_eq!(guest.status(), StatusCode::FORBIDDEN);

    let (anonymous, _) = executor.run(fixtures::json_get("/admin"), &endpoint).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
}
