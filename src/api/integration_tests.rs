//! End-to-end tests driving the router with in-memory storage.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::api::create_router;
use crate::auth::TenantScope;
use crate::config::{AppConfig, AuthConfig};
use crate::db::schema::{Role, TenantUpdate, UserCreate};
use crate::db::{DatabaseConfig, QueryBuilder, create_connection, ensure_schema};
use crate::types::TenantId;
use crate::{AppState, Backend};

struct TestApp {
    router: Router,
    state: AppState,
}

struct Reply {
    status: StatusCode,
    body: Value,
    raw: String,
}

impl TestApp {
    async fn new() -> Self {
        let db = create_connection(DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        ensure_schema(&db).await.unwrap();

        let config = AppConfig::new(AuthConfig::new(
            "access-secret-for-tests",
            "refresh-secret-for-tests",
        ));
        let state = Arc::new(Backend::new(config, db).unwrap());
        Self {
            router: create_router(state.clone()),
            state,
        }
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        api_key: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let raw = String::from_utf8(bytes.to_vec()).unwrap();
        let body = serde_json::from_str(&raw).unwrap_or(Value::Null);
        Reply { status, body, raw }
    }

    async fn get(&self, uri: &str, token: &str) -> Reply {
        self.send(Method::GET, uri, Some(token), None, None).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Reply {
        self.send(Method::POST, uri, token, None, Some(body)).await
    }

    /// Register a tenant; returns (access token, tenant id, session body).
    async fn register(&self, name: &str, email: &str) -> (String, TenantId, Value) {
        let reply = self
            .post(
                "/api/auth/register",
                None,
                json!({
                    "tenant_name": name,
                    "tenant_email": format!("contact@{email}"),
                    "admin_name": "Admin",
                    "admin_email": format!("a@{email}"),
                    "secret": "secret1"
                }),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.raw);

        let data = reply.body["data"].clone();
        let token = data["access_token"].as_str().unwrap().to_string();
        let tenant = TenantId::new(data["user"]["tenant_id"].as_str().unwrap());
        (token, tenant, data)
    }

    async fn superadmin(&self) -> String {
        self.state
            .users()
            .create_user(UserCreate {
                tenant_id: None,
                name: "Root".to_string(),
                email: "root@platform.test".to_string(),
                secret: "rootsecret".to_string(),
                role: Role::Superadmin,
            })
            .await
            .unwrap();
        self.login("root@platform.test", "rootsecret").await
    }

    async fn login(&self, email: &str, secret: &str) -> String {
        let reply = self
            .post("/api/auth/login", None, json!({"email": email, "secret": secret}))
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.raw);
        reply.body["data"]["access_token"].as_str().unwrap().to_string()
    }

    /// Create an agent; returns (agent id, api key).
    async fn create_agent(&self, token: &str, name: &str) -> (String, String) {
        let reply = self
            .post(
                "/api/company/agents",
                Some(token),
                json!({"name": name, "base_prompt": "Be brief."}),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.raw);
        (
            reply.body["data"]["id"].as_str().unwrap().to_string(),
            reply.body["data"]["api_key"].as_str().unwrap().to_string(),
        )
    }
}

#[tokio::test]
async fn test_health_and_models_are_public() {
    let app = TestApp::new().await;
    let health = app.send(Method::GET, "/health", None, None, None).await;
    assert_eq!(health.status, StatusCode::OK);
    assert_eq!(health.body["data"]["status"], "healthy");

    let models = app.send(Method::GET, "/api/models", None, None, None).await;
    assert_eq!(models.status, StatusCode::OK);
    assert_eq!(models.body["data"]["default"], "gpt-3.5-turbo");
}

#[tokio::test]
async fn test_register_then_me() {
    let app = TestApp::new().await;
    let (token, tenant, session) = app.register("Acme", "acme.test").await;
    assert!(session["refresh_token"].is_string());
    assert_eq!(session["expires_in"], 900);

    let me = app.get("/api/auth/me", &token).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["success"], true);
    assert_eq!(me.body["data"]["user"]["email"], "a@acme.test");
    assert_eq!(me.body["data"]["user"]["role"], "tenant_admin");
    assert_eq!(me.body["data"]["tenant"]["name"], "Acme");
    assert_eq!(me.body["data"]["tenant"]["id"], tenant.as_str());
    assert!(!me.raw.contains("secret_hash"));
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let app = TestApp::new().await;
    app.register("Acme", "acme.test").await;

    let wrong = app
        .post("/api/auth/login", None, json!({"email": "a@acme.test", "secret": "nope123"}))
        .await;
    let unknown = app
        .post("/api/auth/login", None, json!({"email": "x@acme.test", "secret": "secret1"}))
        .await;

    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.body["message"], "invalid credentials");
    assert_eq!(wrong.body["message"], unknown.body["message"]);

    // Email matching is case-insensitive
    app.login("  A@ACME.test ", "secret1").await;
}

#[tokio::test]
async fn test_malformed_input_gets_error_envelope() {
    let app = TestApp::new().await;

    let missing = app
        .post("/api/auth/login", None, json!({"email": "a@acme.test"}))
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST, "{}", missing.raw);
    assert_eq!(missing.body["success"], false);
    assert_eq!(missing.body["statusCode"], 400);
    assert!(missing.body["message"].as_str().unwrap().contains("secret"));

    let syntax = app
        .dispatch(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/login")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(syntax.status, StatusCode::BAD_REQUEST);
    assert_eq!(syntax.body["success"], false);
    assert_eq!(syntax.body["statusCode"], 400);

    let no_type = app
        .dispatch(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/login")
                .body(Body::from(r#"{"email":"a@acme.test","secret":"secret1"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(no_type.status, StatusCode::BAD_REQUEST);
    assert_eq!(no_type.body["statusCode"], 400);

    let (token, _, _) = app.register("Acme", "acme.test").await;
    let bad_page = app.get("/api/company/agents?page=first", &token).await;
    assert_eq!(bad_page.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad_page.body["success"], false);

    let unknown = app.get("/api/nowhere", &token).await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    assert_eq!(unknown.body["statusCode"], 404);
}

#[tokio::test]
async fn test_missing_or_garbage_token_is_401() {
    let app = TestApp::new().await;
    let none = app.send(Method::GET, "/api/auth/me", None, None, None).await;
    assert_eq!(none.status, StatusCode::UNAUTHORIZED);
    assert_eq!(none.body["statusCode"], 401);

    let garbage = app.get("/api/company/agents", "not-a-token").await;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_duplicate_registration_is_conflict() {
    let app = TestApp::new().await;
    app.register("Acme", "acme.test").await;

    let reply = app
        .post(
            "/api/auth/register",
            None,
            json!({
                "tenant_name": "Other",
                "tenant_email": "contact@other.test",
                "admin_name": "Admin",
                "admin_email": "A@acme.test",
                "secret": "secret1"
            }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);

    let invalid = app
        .post(
            "/api/auth/register",
            None,
            json!({
                "tenant_name": "",
                "tenant_email": "nope",
                "admin_name": "Admin",
                "admin_email": "b@other.test",
                "secret": "123"
            }),
        )
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = invalid.body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"tenant_name"));
    assert!(fields.contains(&"tenant_email"));
    assert!(fields.contains(&"secret"));
}

#[tokio::test]
async fn test_cross_tenant_agent_is_not_found() {
    let app = TestApp::new().await;
    let (acme, _, _) = app.register("Acme", "acme.test").await;
    let (beta, _, _) = app.register("Beta", "beta.test").await;
    let (beta_agent, _) = app.create_agent(&beta, "Beta bot").await;

    let uri = format!("/api/company/agents/{beta_agent}");
    assert_eq!(app.get(&uri, &acme).await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.get(&uri, &beta).await.status, StatusCode::OK);

    let update = app
        .send(Method::PUT, &uri, Some(&acme), None, Some(json!({"name": "Stolen"})))
        .await;
    assert_eq!(update.status, StatusCode::NOT_FOUND);

    let listed = app.get("/api/company/agents", &acme).await;
    assert_eq!(listed.body["data"].as_array().unwrap().len(), 0);
    assert_eq!(listed.body["pagination"]["total_items"], 0);
}

#[tokio::test]
async fn test_deactivated_tenant_blocks_existing_tokens() {
    let app = TestApp::new().await;
    let (acme, tenant, _) = app.register("Acme", "acme.test").await;
    let root = app.superadmin().await;

    assert_eq!(app.get("/api/auth/me", &acme).await.status, StatusCode::OK);

    let reply = app
        .send(
            Method::PUT,
            &format!("/api/admin/tenants/{tenant}"),
            Some(&root),
            None,
            Some(json!({"status": "inactive"})),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK, "{}", reply.raw);

    assert_eq!(app.get("/api/auth/me", &acme).await.status, StatusCode::FORBIDDEN);
    assert_eq!(app.get("/api/auth/me", &root).await.status, StatusCode::OK);

    let login = app
        .post("/api/auth/login", None, json!({"email": "a@acme.test", "secret": "secret1"}))
        .await;
    assert_eq!(login.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_regenerated_key_replaces_old_one() {
    let app = TestApp::new().await;
    let (acme, _, _) = app.register("Acme", "acme.test").await;
    let (agent, old_key) = app.create_agent(&acme, "Bot").await;

    let reply = app
        .post(&format!("/api/company/agents/{agent}/regenerate-key"), Some(&acme), json!({}))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let new_key = reply.body["data"]["api_key"].as_str().unwrap().to_string();
    assert_ne!(new_key, old_key);
    assert_eq!(reply.raw.matches(new_key.as_str()).count(), 1);

    let message = json!({"message": "hello", "customer_id": "+5511999999999"});
    let old = app
        .send(Method::POST, "/api/v1/conversations", None, Some(&old_key), Some(message.clone()))
        .await;
    assert_eq!(old.status, StatusCode::UNAUTHORIZED);

    let new = app
        .send(Method::POST, "/api/v1/conversations", None, Some(&new_key), Some(message))
        .await;
    assert_eq!(new.status, StatusCode::OK, "{}", new.raw);

    // The key is never readable afterwards
    let fetched = app.get(&format!("/api/company/agents/{agent}"), &acme).await;
    assert!(!fetched.raw.contains(&new_key));
    assert!(!fetched.raw.contains("api_key_hash"));
}

#[tokio::test]
async fn test_machine_conversation_flow() {
    let app = TestApp::new().await;
    let (acme, _, _) = app.register("Acme", "acme.test").await;
    let (agent, key) = app.create_agent(&acme, "Bot").await;
    let (_, other_key) = app.create_agent(&acme, "Other").await;

    let first = app
        .send(
            Method::POST,
            "/api/v1/conversations",
            None,
            Some(&key),
            Some(json!({"message": "where is my order?", "customer_id": "c-1", "customer_name": "Bia"})),
        )
        .await;
    assert_eq!(first.status, StatusCode::OK, "{}", first.raw);
    let conversation = first.body["data"]["conversation_id"].as_str().unwrap().to_string();
    assert!(first.body["data"]["reply"].as_str().unwrap().contains("where is my order?"));

    let second = app
        .send(
            Method::POST,
            "/api/v1/conversations",
            None,
            Some(&key),
            Some(json!({"message": "thanks", "conversation_id": conversation})),
        )
        .await;
    assert_eq!(second.status, StatusCode::OK);

    let uri = format!("/api/v1/conversations/{conversation}");
    let fetched = app.send(Method::GET, &uri, None, Some(&key), None).await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.body["data"]["messages"].as_array().unwrap().len(), 4);
    assert_eq!(fetched.body["data"]["total_tokens"], 100);
    assert_eq!(fetched.body["data"]["messages"][1]["metadata"]["tokens_used"], 50);

    let foreign = app.send(Method::GET, &uri, None, Some(&other_key), None).await;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);

    // API keys never open user routes
    let user_route = app
        .send(Method::GET, "/api/company/agents", None, Some(&key), None)
        .await;
    assert_eq!(user_route.status, StatusCode::UNAUTHORIZED);

    let stats = app.get(&format!("/api/company/agents/{agent}"), &acme).await;
    assert_eq!(stats.body["data"]["stats"]["conversations"], 1);
    assert_eq!(stats.body["data"]["stats"]["messages"], 4);

    let dashboard = app.get("/api/company/dashboard", &acme).await;
    assert_eq!(dashboard.body["data"]["total_agents"], 2);
    assert_eq!(dashboard.body["data"]["total_conversations"], 1);
    assert_eq!(dashboard.body["data"]["conversations_today"], 1);
}

#[tokio::test]
async fn test_agent_with_active_conversation_cannot_be_deleted() {
    let app = TestApp::new().await;
    let (acme, _, _) = app.register("Acme", "acme.test").await;
    let (agent, key) = app.create_agent(&acme, "Bot").await;
    let (idle, _) = app.create_agent(&acme, "Idle").await;

    app.send(
        Method::POST,
        "/api/v1/conversations",
        None,
        Some(&key),
        Some(json!({"message": "hi", "customer_id": "c-1"})),
    )
    .await;

    let busy = app
        .send(Method::DELETE, &format!("/api/company/agents/{agent}"), Some(&acme), None, None)
        .await;
    assert_eq!(busy.status, StatusCode::CONFLICT);

    let deleted = app
        .send(Method::DELETE, &format!("/api/company/agents/{idle}"), Some(&acme), None, None)
        .await;
    assert_eq!(deleted.status, StatusCode::OK);
    let gone = app.get(&format!("/api/company/agents/{idle}"), &acme).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_agent_quota_is_enforced() {
    let app = TestApp::new().await;
    let (acme, tenant, _) = app.register("Acme", "acme.test").await;
    QueryBuilder::update_tenant(
        app.state.db(),
        &TenantScope::All,
        &tenant,
        TenantUpdate {
            max_agents: Some(1),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    app.create_agent(&acme, "First").await;
    let second = app
        .post(
            "/api/company/agents",
            Some(&acme),
            json!({"name": "Second", "base_prompt": "Be brief."}),
        )
        .await;
    assert_eq!(second.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_agent_validation_reports_fields() {
    let app = TestApp::new().await;
    let (acme, _, _) = app.register("Acme", "acme.test").await;

    let reply = app
        .post(
            "/api/company/agents",
            Some(&acme),
            json!({
                "name": "Bot",
                "base_prompt": "",
                "whatsapp_number": "12345",
                "settings": {"model": "unknown-model", "temperature": 3.0}
            }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = reply.body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"base_prompt"));
    assert!(fields.contains(&"whatsapp_number"));
    assert!(fields.contains(&"settings.model"));
    assert!(fields.contains(&"settings.temperature"));
}

#[tokio::test]
async fn test_change_secret_revokes_older_tokens() {
    let app = TestApp::new().await;
    let (registered, _, session) = app.register("Acme", "acme.test").await;
    let current = app.login("a@acme.test", "secret1").await;

    let wrong = app
        .post(
            "/api/auth/change-secret",
            Some(&current),
            json!({"current_secret": "wrong1", "new_secret": "secret2"}),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::BAD_REQUEST);

    let changed = app
        .post(
            "/api/auth/change-secret",
            Some(&current),
            json!({"current_secret": "secret1", "new_secret": "secret2"}),
        )
        .await;
    assert_eq!(changed.status, StatusCode::OK, "{}", changed.raw);
    let fresh = changed.body["data"]["access_token"].as_str().unwrap();

    // Tokens minted moments before the change, possibly in the same second
    assert_eq!(app.get("/api/auth/me", &registered).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.get("/api/auth/me", &current).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.get("/api/auth/me", fresh).await.status, StatusCode::OK);

    let stale_refresh = app
        .post("/api/auth/refresh-token", None, json!({"refresh_token": session["refresh_token"]}))
        .await;
    assert_eq!(stale_refresh.status, StatusCode::UNAUTHORIZED);

    let fresh_refresh = app
        .post(
            "/api/auth/refresh-token",
            None,
            json!({"refresh_token": changed.body["data"]["refresh_token"]}),
        )
        .await;
    assert_eq!(fresh_refresh.status, StatusCode::OK);

    app.login("a@acme.test", "secret2").await;
}

#[tokio::test]
async fn test_refresh_and_logout() {
    let app = TestApp::new().await;
    let (_, _, session) = app.register("Acme", "acme.test").await;

    let refreshed = app
        .post(
            "/api/auth/refresh-token",
            None,
            json!({"refresh_token": session["refresh_token"]}),
        )
        .await;
    assert_eq!(refreshed.status, StatusCode::OK);
    assert_ne!(refreshed.body["data"]["access_token"], session["access_token"]);

    // An access token is never accepted as a refresh token
    let crossed = app
        .post(
            "/api/auth/refresh-token",
            None,
            json!({"refresh_token": session["access_token"]}),
        )
        .await;
    assert_eq!(crossed.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_immediately_revokes_session() {
    let app = TestApp::new().await;
    let (access, _, session) = app.register("Acme", "acme.test").await;

    let logout = app.post("/api/auth/logout", Some(&access), json!({})).await;
    assert_eq!(logout.status, StatusCode::OK, "{}", logout.raw);

    let refresh = app
        .post("/api/auth/refresh-token", None, json!({"refresh_token": session["refresh_token"]}))
        .await;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);
    assert_eq!(refresh.body["success"], false);
    assert_eq!(app.get("/api/auth/me", &access).await.status, StatusCode::UNAUTHORIZED);

    // Signing in again starts a new session
    let again = app.login("a@acme.test", "secret1").await;
    assert_eq!(app.get("/api/auth/me", &again).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_role_gates() {
    let app = TestApp::new().await;
    let (acme, _, _) = app.register("Acme", "acme.test").await;
    let root = app.superadmin().await;

    assert_eq!(app.get("/api/admin/tenants", &acme).await.status, StatusCode::FORBIDDEN);
    assert_eq!(app.get("/api/company/agents", &root).await.status, StatusCode::FORBIDDEN);

    let tenants = app.get("/api/admin/tenants", &root).await;
    assert_eq!(tenants.status, StatusCode::OK);
    assert_eq!(tenants.body["data"][0]["stats"]["users"], 1);
    assert_eq!(tenants.body["data"][0]["agents_remaining"], 10);

    // A tenant user may manage agents but not users or company settings
    let created = app
        .post(
            "/api/company/users",
            Some(&acme),
            json!({"name": "Bia", "email": "bia@acme.test", "secret": "secret1"}),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.raw);
    assert_eq!(created.body["data"]["role"], "tenant_user");

    let member = app.login("bia@acme.test", "secret1").await;
    assert_eq!(app.get("/api/company/agents", &member).await.status, StatusCode::OK);
    assert_eq!(app.get("/api/company/users", &member).await.status, StatusCode::FORBIDDEN);
    let config = app
        .send(Method::PUT, "/api/company/config", Some(&member), None, Some(json!({"name": "X"})))
        .await;
    assert_eq!(config.status, StatusCode::FORBIDDEN);

    let escalate = app
        .post(
            "/api/company/users",
            Some(&acme),
            json!({"name": "Eve", "email": "eve@acme.test", "secret": "secret1", "role": "superadmin"}),
        )
        .await;
    assert_eq!(escalate.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_superadmin_secret_reset() {
    let app = TestApp::new().await;
    let (acme, _, session) = app.register("Acme", "acme.test").await;
    let root = app.superadmin().await;
    let uri = format!("/api/admin/users/{}", session["user"]["id"].as_str().unwrap());

    let short = app
        .send(Method::PUT, &uri, Some(&root), None, Some(json!({"secret": "abc"})))
        .await;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);
    assert_eq!(short.body["errors"][0]["field"], "secret");

    let reset = app
        .send(
            Method::PUT,
            &uri,
            Some(&root),
            None,
            Some(json!({"name": "Admin Two", "secret": "fresh-secret"})),
        )
        .await;
    assert_eq!(reset.status, StatusCode::OK, "{}", reset.raw);
    assert_eq!(reset.body["data"]["name"], "Admin Two");
    assert!(!reset.raw.contains("fresh-secret"));
    assert!(reset.body["data"].get("session_epoch").is_none());

    // Existing sessions end and only the new secret signs in
    assert_eq!(app.get("/api/auth/me", &acme).await.status, StatusCode::UNAUTHORIZED);
    let old = app
        .post("/api/auth/login", None, json!({"email": "a@acme.test", "secret": "secret1"}))
        .await;
    assert_eq!(old.status, StatusCode::UNAUTHORIZED);
    app.login("a@acme.test", "fresh-secret").await;
}

#[tokio::test]
async fn test_deactivated_user_is_rejected() {
    let app = TestApp::new().await;
    let (acme, _, session) = app.register("Acme", "acme.test").await;
    let admin_id = session["user"]["id"].as_str().unwrap().to_string();
    let created = app
        .post(
            "/api/company/users",
            Some(&acme),
            json!({"name": "Bia", "email": "bia@acme.test", "secret": "secret1"}),
        )
        .await;
    let bia_id = created.body["data"]["id"].as_str().unwrap().to_string();
    let bia = app.login("bia@acme.test", "secret1").await;

    let own = app
        .send(Method::DELETE, &format!("/api/company/users/{admin_id}"), Some(&acme), None, None)
        .await;
    assert_eq!(own.status, StatusCode::BAD_REQUEST);

    let deactivated = app
        .send(Method::DELETE, &format!("/api/company/users/{bia_id}"), Some(&acme), None, None)
        .await;
    assert_eq!(deactivated.status, StatusCode::OK);

    assert_eq!(app.get("/api/auth/me", &bia).await.status, StatusCode::UNAUTHORIZED);
    let login = app
        .post("/api/auth/login", None, json!({"email": "bia@acme.test", "secret": "secret1"}))
        .await;
    assert_eq!(login.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_cannot_delete_tenant_with_users() {
    let app = TestApp::new().await;
    let (_, tenant, _) = app.register("Acme", "acme.test").await;
    let root = app.superadmin().await;

    let reply = app
        .send(Method::DELETE, &format!("/api/admin/tenants/{tenant}"), Some(&root), None, None)
        .await;
    assert_eq!(reply.status, StatusCode::CONFLICT);

    let empty = app
        .post(
            "/api/admin/tenants",
            Some(&root),
            json!({"name": "Empty", "email": "empty@empty.test", "max_agents": 5}),
        )
        .await;
    assert_eq!(empty.status, StatusCode::CREATED, "{}", empty.raw);
    let id = empty.body["data"]["id"].as_str().unwrap();

    let deleted = app
        .send(Method::DELETE, &format!("/api/admin/tenants/{id}"), Some(&root), None, None)
        .await;
    assert_eq!(deleted.status, StatusCode::OK);
}
