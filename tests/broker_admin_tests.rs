//! # Broker Admin Tests
//!
//! The RabbitMQ management client against a mock management API.

mod common;

use common::FakeDatabase;
use std::time::Duration;
use taskcluster_operator::provisioner::{
    BrokerAdmin, CredentialProvisioner, Permissions, ProvisionError, ProvisionerSettings,
    RabbitMqAdmin, ServiceCatalog,
};
use taskcluster_operator::state::PersistedState;
use wiremock::matchers::{basic_auth, body_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn admin(server: &MockServer) -> RabbitMqAdmin {
    common::init_rustls();
    RabbitMqAdmin::new(&server.uri(), "admin", "s3cret", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_ensure_vhost() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/vhosts/prod"))
        .and(basic_auth("admin", "s3cret"))
        .and(body_json(serde_json::json!({ "tracing": false })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    admin(&server).ensure_vhost("prod").await.unwrap();
}

#[tokio::test]
async fn test_default_vhost_is_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/vhosts/%2F"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    admin(&server).ensure_vhost("/").await.unwrap();
}

#[tokio::test]
async fn test_put_user() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/users/prod-taskcluster-queue"))
        .and(body_json(serde_json::json!({ "password": "hunter2", "tags": "" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    admin(&server)
        .put_user("prod-taskcluster-queue", "hunter2")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_grant_permissions() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/permissions/prod/prod-taskcluster-queue"))
        .and(body_json(serde_json::json!({
            "configure": ".*",
            "write": ".*",
            "read": ".*",
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    admin(&server)
        .grant_permissions("prod", "prod-taskcluster-queue", &Permissions::full())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Not_Authorised"))
        .mount(&server)
        .await;

    let err = admin(&server).ensure_vhost("prod").await.unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("failed to create vhost prod"), "{message}");
    assert!(message.contains("401"), "{message}");
    assert!(message.contains("Not_Authorised"), "{message}");
}

#[tokio::test]
async fn test_invalid_endpoint_is_rejected() {
    common::init_rustls();
    assert!(RabbitMqAdmin::new("not a url", "admin", "s3cret", Duration::from_secs(1)).is_err());
}

#[tokio::test]
async fn test_provisioning_pass_against_management_api() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/vhosts/prod"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/api/users/prod-taskcluster-[a-z-]+$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(8)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/api/permissions/prod/prod-taskcluster-[a-z-]+$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(8)
        .mount(&server)
        .await;

    let broker = admin(&server);
    let database = FakeDatabase::default();
    let settings = ProvisionerSettings {
        role_prefix: "tc".to_string(),
        vhost: "prod".to_string(),
        database_timeout: Duration::from_secs(5),
        broker_timeout: Duration::from_secs(5),
    };
    let mut state = PersistedState::default();

    CredentialProvisioner::new(settings, &database, &broker)
        .run(&ServiceCatalog::taskcluster(), &mut state)
        .await
        .unwrap();

    let users: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .filter(|p| p.starts_with("/api/users/"))
        .collect();
    assert!(users.contains(&"/api/users/prod-taskcluster-worker-manager".to_string()));
    assert!(users.contains(&"/api/users/prod-taskcluster-web-server".to_string()));
}

#[tokio::test]
async fn test_slow_broker_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let broker = admin(&server);
    let database = FakeDatabase::default();
    let settings = ProvisionerSettings {
        role_prefix: "tc".to_string(),
        vhost: "prod".to_string(),
        database_timeout: Duration::from_secs(5),
        broker_timeout: Duration::from_millis(100),
    };
    let mut state = PersistedState::default();

    let err = CredentialProvisioner::new(settings, &database, &broker)
        .run(&ServiceCatalog::taskcluster(), &mut state)
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Timeout { .. }));
    assert_eq!(state, PersistedState::default());
}
