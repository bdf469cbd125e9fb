//! Adapter tests against a mocked controller and a mocked generic REST service.

use std::time::Duration;

use envhub_runtime::backend::{ControllerBackend, InstanceBackend, RestBackend};
use envhub_runtime::definition::{Artifact, EnvironmentDefinition};
use envhub_runtime::{InstanceError, InstanceStatus, ListFilter};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn definition() -> EnvironmentDefinition {
    EnvironmentDefinition {
        name: "swebench".into(),
        version: "1.0.0".into(),
        artifacts: vec![Artifact {
            id: "a1".into(),
            kind: "image".into(),
            content: "registry.local/swebench:1.0.0".into(),
        }],
        ..Default::default()
    }
}

fn ok(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"success": true, "code": 0, "data": data}))
}

fn controller(server: &MockServer) -> ControllerBackend {
    ControllerBackend::new(server.uri(), Duration::from_secs(5), "30m").unwrap()
}

mod controller_backend {
    use super::*;

    #[tokio::test]
    async fn create_posts_definition() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pods"))
            .and(body_partial_json(json!({"name": "swebench"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "success": true, "code": 0,
                "data": {"id": "swebench-a1b2c3", "status": "Pending", "ip": ""}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let inst = controller(&server).create(&definition()).await.unwrap();
        assert_eq!(inst.id, "swebench-a1b2c3");
        assert_eq!(inst.status, InstanceStatus::Pending);
    }

    #[tokio::test]
    async fn get_maps_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pods/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "success": false, "code": 404, "message": "pods \"missing\" not found", "data": null
            })))
            .mount(&server)
            .await;

        let err = controller(&server).get("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.message().starts_with("get env instance"));
    }

    #[tokio::test]
    async fn delete_of_absent_instance_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/pods/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "success": false, "code": 404, "message": "not found", "data": null
            })))
            .mount(&server)
            .await;

        controller(&server).delete("gone").await.unwrap();
    }

    #[tokio::test]
    async fn delete_surfaces_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/pods/stuck"))
            .respond_with(ResponseTemplate::new(500).set_body_string("etcd timeout"))
            .mount(&server)
            .await;

        let err = controller(&server).delete("stuck").await.unwrap_err();
        assert!(matches!(err, InstanceError::Upstream(_)));
        assert!(err.message().contains("etcd timeout"));
    }

    #[tokio::test]
    async fn list_passes_owner_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pods"))
            .and(query_param("owner", "t1"))
            .respond_with(ok(json!([
                {"id": "a", "status": "Running", "owner": "t1"},
                {"id": "b", "status": "Pending", "owner": "t1"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let items = controller(&server)
            .list(&ListFilter::for_owner("t1"))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn cleanup_deletes_only_expired_non_terminated() {
        let server = MockServer::start().await;
        // "fresh" is running but unexpired, so the controller never returns it.
        Mock::given(method("GET"))
            .and(path("/pods"))
            .and(query_param("filter", "expired"))
            .respond_with(ok(json!([
                {"id": "terminating", "status": "Terminated", "ttl": "10m"},
                {"id": "stale", "status": "Running", "ttl": "10m"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/pods/stale"))
            .respond_with(ok(json!(true)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/pods/terminating"))
            .respond_with(ok(json!(true)))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/pods/fresh"))
            .respond_with(ok(json!(true)))
            .expect(0)
            .mount(&server)
            .await;

        let report = controller(&server).cleanup().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn cleanup_completes_when_delete_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pods"))
            .and(query_param("filter", "expired"))
            .respond_with(ok(json!([
                {"id": "terminating", "status": "Terminated"},
                {"id": "stale", "status": "Running"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/pods/stale"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "success": false, "code": 500, "message": "boom", "data": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let report = controller(&server).cleanup().await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn warmup_creates_with_default_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pods"))
            .and(body_partial_json(json!({"deployConfig": {"ttl": "30m"}})))
            .respond_with(ok(json!({"id": "swebench-zzzzzz", "status": "Pending"})))
            .expect(1)
            .mount(&server)
            .await;

        controller(&server).warmup(&definition()).await.unwrap();
    }
}

mod rest_backend {
    use super::*;

    fn rest(server: &MockServer) -> RestBackend {
        RestBackend::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn list_uses_env_name_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aenvironment/instance"))
            .and(query_param("envName", "swebench"))
            .respond_with(ok(json!([{"id": "i-1", "status": "Running"}])))
            .expect(1)
            .mount(&server)
            .await;

        let filter = ListFilter {
            env_name: Some("swebench".into()),
            ..Default::default()
        };
        let items = rest(&server).list(&filter).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "i-1");
    }

    #[tokio::test]
    async fn owner_scoped_list_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aenvironment/instance"))
            .respond_with(ok(json!([{"id": "i-1", "status": "Running"}])))
            .expect(0)
            .mount(&server)
            .await;

        let backend = rest(&server);
        assert!(!backend.reports_owner());
        let err = backend.list(&ListFilter::for_owner("t")).await.unwrap_err();
        assert!(matches!(err, InstanceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn null_list_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aenvironment/instance"))
            .respond_with(ok(json!(null)))
            .mount(&server)
            .await;

        let items = rest(&server).list(&ListFilter::default()).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn warmup_and_cleanup_use_action_paths() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/aenvironment/instance/action/warmup"))
            .respond_with(ok(json!(null)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/aenvironment/instance/action/cleanup"))
            .respond_with(ok(json!({"deleted": 3})))
            .expect(1)
            .mount(&server)
            .await;

        let backend = rest(&server);
        backend.warmup(&definition()).await.unwrap();
        let report = backend.cleanup().await.unwrap();
        assert_eq!(report.deleted, 3);
    }

    #[tokio::test]
    async fn success_false_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/aenvironment/instance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false, "code": 409, "message": "exists", "data": null
            })))
            .mount(&server)
            .await;

        let err = rest(&server).create(&definition()).await.unwrap_err();
        assert!(matches!(err, InstanceError::Conflict(_)));
        assert!(err.message().starts_with("create env instance"));
    }

    #[tokio::test]
    async fn times_out_slow_service() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/aenvironment/instance/slow"))
            .respond_with(ok(json!({"id": "slow"})).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let backend = RestBackend::new(server.uri(), Duration::from_millis(200)).unwrap();
        let err = backend.get("slow").await.unwrap_err();
        assert!(matches!(err, InstanceError::Upstream(_)));
    }
}
