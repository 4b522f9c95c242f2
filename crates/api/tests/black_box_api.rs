use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use erpguard_api::app::{AppState, build_app};
use erpguard_api::routing::RouteTable;
use erpguard_auth::{
    Action, ActionFlags, DEFAULT_ISSUER, DocType, JwtSettings, NewFieldPermissionLevel,
    NewPermissionRule, PermissionLevel, Role, RoleCode, SessionClaims, TokenIssuer, TokenType,
};
use erpguard_core::{RoleId, UserId};
use erpguard_infra::{CacheConfig, InMemoryPermissionStore, PermissionCache, PermissionStore};

const SECRET: &str = "black-box-secret";
const ADMIN: i64 = 1;
const CLERK: i64 = 2;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let settings = settings();
        let state = AppState::new(
            &settings,
            Arc::new(seeded_store().await),
            Arc::new(PermissionCache::new(&CacheConfig::default())),
        );
        let app = build_app(state, RouteTable::builtin(), Duration::from_secs(5));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}/api/v1", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn settings() -> JwtSettings {
    JwtSettings {
        secret: SECRET.into(),
        ..JwtSettings::default()
    }
}

fn role(id: i64, code: &'static str) -> Role {
    Role {
        id: RoleId::new(id),
        code: RoleCode::new(code),
        name: code.into(),
        is_system: false,
        enabled: true,
        sort_order: id as i32,
    }
}

fn rule(role_id: i64, doc_type: &str, level: i64, actions: &[Action]) -> NewPermissionRule {
    NewPermissionRule {
        role_id: RoleId::new(role_id),
        doc_type: doc_type.into(),
        permission_level: PermissionLevel::new(level).unwrap(),
        permissions: ActionFlags::default().with(actions),
        only_if_creator: false,
        condition: None,
    }
}

/// Role 1 "admin" manages the permission model; role 2 "clerk" starts with
/// nothing. `Employee` has a public `name` and a level 8 `salary`.
async fn seeded_store() -> InMemoryPermissionStore {
    let store = InMemoryPermissionStore::new();
    store.insert_role(role(1, "admin")).unwrap();
    store.insert_role(role(2, "clerk")).unwrap();
    for user in [ADMIN, CLERK] {
        store.register_user(UserId::new(user)).unwrap();
        store
            .assign_user_role(UserId::new(user), RoleId::new(user))
            .await
            .unwrap();
    }

    for name in ["DocType", "PermissionRule", "Employee"] {
        store.create_doc_type(DocType::new(name, "core")).await.unwrap();
    }
    let manage = [Action::Read, Action::Write, Action::Create, Action::Delete];
    store.create_rule(rule(1, "DocType", 0, &manage)).await.unwrap();
    store.create_rule(rule(1, "PermissionRule", 0, &manage)).await.unwrap();

    for (field, level) in [("name", 0), ("salary", 8)] {
        store
            .create_field_level(NewFieldPermissionLevel {
                doc_type: "Employee".into(),
                field_name: field.into(),
                permission_level: PermissionLevel::new(level).unwrap(),
                field_type: "Data".into(),
            })
            .await
            .unwrap();
    }
    store
}

fn claims(user_id: i64, token_type: TokenType, iat: i64, exp: i64) -> SessionClaims {
    let username = format!("user{user_id}");
    let session_id = format!("session-{user_id}");
    SessionClaims {
        user_id: UserId::new(user_id),
        username: username.clone(),
        email: format!("{username}@example.com"),
        roles: Vec::new(),
        session_id: session_id.clone(),
        token_type,
        exp,
        iat,
        nbf: iat,
        iss: DEFAULT_ISSUER.into(),
        sub: username,
        jti: session_id,
    }
}

fn mint(claims: &SessionClaims) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn access_token(user_id: i64) -> String {
    let now = Utc::now().timestamp();
    mint(&claims(user_id, TokenType::Access, now, now + 600))
}

fn refresh_token(user_id: i64) -> String {
    TokenIssuer::new(&settings())
        .issue_refresh(
            UserId::new(user_id),
            &format!("user{user_id}"),
            &format!("session-{user_id}"),
            Utc::now(),
        )
        .unwrap()
        .token
}

async fn check_read(client: &reqwest::Client, server: &TestServer, user_id: i64) -> bool {
    let res = client
        .post(server.url("/permissions/check"))
        .bearer_auth(access_token(user_id))
        .json(&json!({ "docType": "Employee", "permission": "read" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    body["data"]["hasPermission"].as_bool().unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn missing_token_is_401_with_envelope() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(server.url("/users")).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn expired_and_refresh_tokens_are_rejected_on_protected_routes() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let issued = Utc::now() - ChronoDuration::hours(3);
    let expired = mint(&claims(
        CLERK,
        TokenType::Access,
        issued.timestamp(),
        (issued + ChronoDuration::hours(2)).timestamp(),
    ));

    for token in [expired, refresh_token(CLERK), "not-a-jwt".to_string()] {
        let res = client
            .get(server.url("/permissions/me"))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"]["message"], "authentication required");
    }
}

#[tokio::test]
async fn permission_routes_deny_with_403() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(server.url("/doctypes"))
        .bearer_auth(access_token(CLERK))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    // Authenticated, but the route is not in the permission table.
    let res = client
        .get(server.url("/users"))
        .bearer_auth(access_token(ADMIN))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .get(server.url("/doctypes"))
        .bearer_auth(access_token(ADMIN))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn rule_changes_take_effect_on_the_next_check() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    assert!(!check_read(&client, &server, CLERK).await);

    let res = client
        .post(server.url("/permission-rules"))
        .bearer_auth(access_token(ADMIN))
        .json(&json!({
            "role_id": 2,
            "doc_type": "Employee",
            "permission_level": 0,
            "permissions": { "read": true },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    let rule_id = created["data"]["id"].as_i64().unwrap();

    assert!(check_read(&client, &server, CLERK).await);

    let res = client
        .put(server.url(&format!("/permission-rules/{rule_id}")))
        .bearer_auth(access_token(ADMIN))
        .json(&json!({
            "role_id": 2,
            "doc_type": "Employee",
            "permission_level": 0,
            "permissions": { "write": true },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    assert!(!check_read(&client, &server, CLERK).await);
}

#[tokio::test]
async fn invalid_rule_is_a_validation_error() {
    let server = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(server.url("/permission-rules"))
        .bearer_auth(access_token(ADMIN))
        .json(&json!({
            "role_id": 2,
            "doc_type": "Employee",
            "permission_level": 3,
            "permissions": { "delete": true },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn fields_and_filter_redact_above_the_callers_level() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let clerk = access_token(CLERK);

    let res = client
        .get(server.url("/permissions/level?docType=Employee"))
        .bearer_auth(&clerk)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["permissionLevel"], 0);

    let res = client
        .get(server.url("/permissions/fields?docType=Employee"))
        .bearer_auth(&clerk)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    let fields = body["data"].as_array().unwrap();
    let salary = fields
        .iter()
        .find(|f| f["fieldName"] == "salary")
        .unwrap();
    assert_eq!(salary["canAccess"], false);
    assert_eq!(salary["permissionLevel"], 8);

    let res = client
        .post(server.url("/permissions/filter"))
        .bearer_auth(&clerk)
        .json(&json!({
            "docType": "Employee",
            "documents": [{ "name": "E-1", "salary": 5000, "nickname": "Bo" }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"], json!([{ "name": "E-1", "nickname": "Bo" }]));
}

#[tokio::test]
async fn asking_about_another_user_needs_rule_read() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let request = json!({ "userId": ADMIN, "docType": "DocType", "permission": "read" });

    let res = client
        .post(server.url("/permissions/check"))
        .bearer_auth(access_token(CLERK))
        .json(&request)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(server.url("/permissions/check"))
        .bearer_auth(access_token(ADMIN))
        .json(&json!({ "userId": CLERK, "docType": "DocType", "permission": "read" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["hasPermission"], false);
}

#[tokio::test]
async fn refresh_then_logout_revokes_the_session() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({ "refreshToken": refresh_token(CLERK) }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let access = body["data"]["accessToken"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["tokenType"], "Bearer");

    let res = client
        .get(server.url("/permissions/me"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["roles"], json!(["clerk"]));

    let res = client
        .post(server.url("/auth/logout"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(server.url("/permissions/me"))
        .bearer_auth(&access)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({ "refreshToken": refresh_token(CLERK) }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn access_token_is_not_accepted_for_refresh() {
    let server = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(server.url("/auth/refresh"))
        .json(&json!({ "refreshToken": access_token(CLERK) }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}
