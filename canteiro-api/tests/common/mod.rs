/// Common test utilities for integration tests
///
/// Every context gets a fresh company with an owner, so tests never see each other's
/// rows. Requires `DATABASE_URL` pointing at a disposable PostgreSQL database.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use canteiro_api::{
    app::{build_router, AppState},
    config::Config,
};
use canteiro_shared::{
    auth::jwt::issue_token_pair,
    db::migrations::run_migrations,
    models::{
        company::{Company, CreateCompany},
        membership::{Membership, MembershipRole},
        user::{CreateUser, User},
    },
};
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestContext {
    pub db: PgPool,
    pub app: Router,
    pub company: Company,
    pub user: User,
    pub access_token: String,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let database_url = std::env::var("DATABASE_URL")?;
        let config = Config::for_tests(&database_url);

        let db = PgPool::connect(&config.database.url).await?;
        run_migrations(&db).await?;

        let company = Company::create(
            &db,
            CreateCompany {
                name: format!("Obra Teste {}", Uuid::new_v4()),
                cnpj: None,
            },
        )
        .await?;

        let user = User::create(
            &db,
            CreateUser {
                email: format!("mestre-{}@example.com", Uuid::new_v4()),
                password_hash: "unused".to_string(),
                name: Some("Mestre de Obras".to_string()),
            },
        )
        .await?;

        Membership::create(&db, company.id, user.id, MembershipRole::Owner).await?;

        let tokens = issue_token_pair(user.id, company.id, &config.jwt.secret)?;
        let app = build_router(AppState::new(db.clone(), config));

        Ok(Self {
            db,
            app,
            company,
            user,
            access_token: tokens.access_token,
        })
    }

    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Sends a request with the owner's token and returns the status and JSON body
    pub async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, self.auth_header());

        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, value)
    }

    /// Deletes the company; delivery rows go first because they restrict item deletion
    pub async fn cleanup(&self) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM ppe_deliveries WHERE company_id = $1")
            .bind(self.company.id)
            .execute(&self.db)
            .await?;
        sqlx::query("DELETE FROM companies WHERE id = $1")
            .bind(self.company.id)
            .execute(&self.db)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(self.user.id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

/// Creates an active employee through the API
pub async fn create_employee(ctx: &TestContext, name: &str) -> Uuid {
    let (status, body) = ctx
        .send(
            "POST",
            "/v1/employees",
            Some(serde_json::json!({
                "name": name,
                "cpf": "529.982.247-25",
                "job_title": "Pedreiro",
                "hire_date": "2024-02-01",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    body["id"].as_str().unwrap().parse().unwrap()
}

/// Creates a PPE catalog item through the API
pub async fn create_ppe_item(ctx: &TestContext, name: &str, stock: i32) -> Uuid {
    let (status, body) = ctx
        .send(
            "POST",
            "/v1/ppe/items",
            Some(serde_json::json!({
                "name": name,
                "category": "Proteção da cabeça",
                "ca_number": "31469",
                "stock_quantity": stock,
                "replacement_days": 180,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    body["id"].as_str().unwrap().parse().unwrap()
}

/// Creates a tool, machine or supply through the API
pub async fn create_asset(ctx: &TestContext, kind: &str, name: &str, quantity: i32) -> Uuid {
    let (status, body) = ctx
        .send(
            "POST",
            "/v1/assets",
            Some(serde_json::json!({
                "kind": kind,
                "name": name,
                "code": format!("PAT-{}", &Uuid::new_v4().simple().to_string()[..8]),
                "quantity": quantity,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    body["id"].as_str().unwrap().parse().unwrap()
}

/// Delivers PPE to an employee outside the wizard and returns the delivery row
pub async fn deliver_directly(ctx: &TestContext, employee_id: Uuid, item_id: Uuid, quantity: i32) -> Value {
    let (status, body) = ctx
        .send(
            "POST",
            &format!("/v1/employees/{}/ppe", employee_id),
            Some(serde_json::json!({
                "ppe_item_id": item_id,
                "quantity": quantity,
                "delivered_on": "2025-03-03",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    body
}

/// Walks a wizard session from start to confirm and returns the confirm response
///
/// `items` are scanned labels with their quantities.
pub async fn run_workflow(
    ctx: &TestContext,
    kind: &str,
    employee_id: Uuid,
    items: &[(String, i32)],
    details: Value,
) -> (StatusCode, Value) {
    let (status, session) = ctx
        .send("POST", "/v1/workflows", Some(serde_json::json!({ "kind": kind })))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", session);
    let base = format!("/v1/workflows/{}", session["id"].as_str().unwrap());

    let (status, body) = ctx
        .send(
            "POST",
            &format!("{}/authenticate", base),
            Some(serde_json::json!({ "employee_id": employee_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    for (payload, quantity) in items {
        let (status, body) = ctx
            .send(
                "POST",
                &format!("{}/items", base),
                Some(serde_json::json!({ "payload": payload, "quantity": quantity })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
    }

    let (status, body) = ctx.send("POST", &format!("{}/items/done", base), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, body) = ctx.send("POST", &format!("{}/details", base), Some(details)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    ctx.send("POST", &format!("{}/confirm", base), None).await
}
