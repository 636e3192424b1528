//! Unit tests for method routing.

use std::sync::Arc;

use rstest::{fixture, rstest};
use serde_json::{Value, json};

use drover_daemon_types::{ErrorCategory, RpcMethod};

use crate::supervisor::SupervisorError;
use crate::tests::support::{SupervisorWorld, descriptor};

use super::{MethodRouter, Routed};
use crate::dispatch::errors::DispatchError;

struct Harness {
    world: SupervisorWorld,
    router: MethodRouter,
}

impl Harness {
    fn route(&self, method: RpcMethod, params: Value) -> Result<Routed, DispatchError> {
        let router = self.router.clone();
        self.world.run(async move { router.route(method, params).await })
    }

    fn reply(&self, method: RpcMethod, params: Value) -> Value {
        match self.route(method, params) {
            Ok(Routed::Reply(data)) => data,
            other => panic!("expected a reply for {method}, got {other:?}"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.world.shutdown();
    }
}

#[fixture]
fn harness() -> Harness {
    let world = SupervisorWorld::new();
    let router = MethodRouter::new(
        Arc::clone(world.supervisor()),
        "unix:///run/drover/droverd.sock".to_owned(),
    );
    Harness { world, router }
}

#[rstest]
fn ping_answers_pong(harness: Harness) {
    assert_eq!(harness.reply(RpcMethod::Ping, Value::Null), json!({ "pong": true }));
}

#[rstest]
fn version_reports_the_crate_version(harness: Harness) {
    assert_eq!(
        harness.reply(RpcMethod::GetVersion, Value::Null),
        json!(env!("CARGO_PKG_VERSION"))
    );
}

#[rstest]
fn kill_me_requests_shutdown(harness: Harness) {
    let routed = harness.route(RpcMethod::KillMe, Value::Null);
    assert!(matches!(routed, Ok(Routed::Shutdown(data)) if data == json!({ "success": true })));
}

#[rstest]
fn subscribe_keeps_the_topics(harness: Harness) {
    let routed = harness.route(RpcMethod::Subscribe, json!({ "topics": ["log:", "process:event"] }));
    assert!(matches!(
        routed,
        Ok(Routed::Subscribe(topics)) if topics == ["log:", "process:event"]
    ));
}

#[rstest]
fn subscribe_without_topics_receives_everything(harness: Harness) {
    let routed = harness.route(RpcMethod::Subscribe, Value::Null);
    assert!(matches!(routed, Ok(Routed::Subscribe(topics)) if topics.is_empty()));
}

#[rstest]
fn prepare_registers_every_instance(harness: Harness) {
    let mut app = descriptor("web");
    app.instances = 3;
    let params = serde_json::to_value(&app).expect("descriptor encodes");

    let views = harness.reply(RpcMethod::Prepare, params);

    assert_eq!(views.as_array().map(Vec::len), Some(3));
    assert_eq!(
        harness.reply(RpcMethod::GetProcessIdsByName, json!({ "name": "web" })),
        json!([0, 1, 2])
    );
    assert_eq!(
        harness.reply(RpcMethod::GetProcessIdsByNamespace, json!({ "namespace": "default" })),
        json!([0, 1, 2])
    );
}

#[rstest]
fn dump_counts_the_saved_records(harness: Harness) {
    let mut app = descriptor("web");
    app.instances = 2;
    harness.reply(RpcMethod::Prepare, serde_json::to_value(&app).expect("encode"));

    assert_eq!(harness.reply(RpcMethod::Dump, Value::Null), json!({ "count": 2 }));
    assert!(harness.world.state_dir().join("dump.json").is_file());
}

#[rstest]
fn mismatched_params_are_rejected(harness: Harness) {
    let error = harness
        .route(RpcMethod::StopProcessId, json!({ "id": "first" }))
        .expect_err("string id should be rejected");
    assert!(matches!(error, DispatchError::InvalidParams { ref method, .. } if method == "stopProcessId"));
    assert_eq!(error.to_rpc().category, ErrorCategory::Configuration);
}

#[rstest]
fn unknown_ids_surface_supervisor_errors(harness: Harness) {
    let error = harness
        .route(RpcMethod::RestartProcessId, json!({ "id": 9 }))
        .expect_err("unknown id should fail");
    assert!(matches!(
        error,
        DispatchError::Supervisor(SupervisorError::NotFound { .. })
    ));
}

#[rstest]
fn messages_need_a_target(harness: Harness) {
    let error = harness
        .route(RpcMethod::MsgProcess, json!({ "msg": "hello" }))
        .expect_err("untargeted message should fail");
    assert_eq!(error.to_rpc().category, ErrorCategory::Configuration);
}

#[rstest]
fn report_names_the_socket(harness: Harness) {
    let report = harness.reply(RpcMethod::GetReport, Value::Null);
    assert_eq!(
        report.get("socket").and_then(Value::as_str),
        Some("unix:///run/drover/droverd.sock")
    );
}
