/// Integration tests for the Canteiro API
///
/// These run the full router against PostgreSQL:
/// - Direct PPE delivery, returns and stock adjustments
/// - The delivery, return, exchange and application wizards
/// - Cancelling sessions
/// - Vacation decisions, clocking and badge regeneration
///
/// Run with `DATABASE_URL=... cargo test -p canteiro-api -- --ignored`.

mod common;

use axum::http::StatusCode;
use canteiro_shared::{
    models::{
        asset::{Asset, AssetStatus},
        ppe_delivery::{ItemCondition, PpeDelivery},
        ppe_item::PpeItem,
    },
    qr::QrPayload,
};
use common::{
    create_asset, create_employee, create_ppe_item, deliver_directly, run_workflow, TestContext,
};
use serde_json::json;
use uuid::Uuid;

fn id_of(body: &serde_json::Value) -> Uuid {
    body["id"].as_str().unwrap().parse().unwrap()
}

async fn stock_of(ctx: &TestContext, item_id: Uuid) -> i32 {
    PpeItem::find_by_id(&ctx.db, ctx.company.id, item_id)
        .await
        .unwrap()
        .unwrap()
        .stock_quantity
}

async fn delivery(ctx: &TestContext, id: Uuid) -> PpeDelivery {
    PpeDelivery::find_by_id(&ctx.db, ctx.company.id, id)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_direct_delivery_updates_active_ppe_and_stock() {
    let ctx = TestContext::new().await.unwrap();
    let employee_id = create_employee(&ctx, "João Pereira").await;
    let item_id = create_ppe_item(&ctx, "Capacete classe B", 10).await;

    let (status, body) = ctx
        .send(
            "POST",
            &format!("/v1/employees/{}/ppe", employee_id),
            Some(json!({
                "ppe_item_id": item_id,
                "quantity": 2,
                "delivered_on": "2025-03-03",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["quantity"], 2);

    let (status, active) = ctx
        .send("GET", &format!("/v1/employees/{}/ppe", employee_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let active = active.as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["name"], "Capacete classe B");

    let item = PpeItem::find_by_id(&ctx.db, ctx.company.id, item_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.stock_quantity, 8);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_delivery_beyond_stock_is_conflict() {
    let ctx = TestContext::new().await.unwrap();
    let employee_id = create_employee(&ctx, "Maria Souza").await;
    let item_id = create_ppe_item(&ctx, "Luva de vaqueta", 1).await;

    let (status, _) = ctx
        .send(
            "POST",
            &format!("/v1/employees/{}/ppe", employee_id),
            Some(json!({
                "ppe_item_id": item_id,
                "quantity": 5,
                "delivered_on": "2025-03-03",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_delivery_workflow_back_keeps_progress() {
    let ctx = TestContext::new().await.unwrap();
    let employee_id = create_employee(&ctx, "Carlos Lima").await;
    let item_id = create_ppe_item(&ctx, "Óculos de proteção", 5).await;

    let (status, session) = ctx
        .send("POST", "/v1/workflows", Some(json!({ "kind": "delivery" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["step"], "authenticate");
    let base = format!("/v1/workflows/{}", session["id"].as_str().unwrap());

    let (status, session) = ctx
        .send(
            "POST",
            &format!("{}/authenticate", base),
            Some(json!({ "employee_id": employee_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", session);
    assert_eq!(session["state"]["employee"]["method"], "manual");

    let payload = QrPayload::Ppe(item_id).to_string();
    let (status, session) = ctx
        .send(
            "POST",
            &format!("{}/items", base),
            Some(json!({ "payload": payload, "quantity": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", session);

    let (status, session) = ctx.send("POST", &format!("{}/items/done", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["step"], "details");

    let (status, session) = ctx.send("POST", &format!("{}/back", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["step"], "scan_items");
    assert_eq!(session["state"]["employee"]["name"], "Carlos Lima");
    assert_eq!(session["state"]["items"][0]["quantity"], 2);

    ctx.send("POST", &format!("{}/items/done", base), None).await;
    let (status, session) = ctx
        .send("POST", &format!("{}/details", base), Some(json!({ "kind": "delivery" })))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", session);
    assert_eq!(session["step"], "confirm");

    let (status, outcome) = ctx.send("POST", &format!("{}/confirm", base), None).await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    assert_eq!(outcome["session"]["step"], "complete");
    assert_eq!(outcome["deliveries"].as_array().unwrap().len(), 1);

    let item = PpeItem::find_by_id(&ctx.db, ctx.company.id, item_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.stock_quantity, 3);

    // Completed sessions stay as history
    let (status, _) = ctx.send("DELETE", &base, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_cancel_removes_open_session() {
    let ctx = TestContext::new().await.unwrap();

    let (_, session) = ctx
        .send("POST", "/v1/workflows", Some(json!({ "kind": "return" })))
        .await;
    let base = format!("/v1/workflows/{}", session["id"].as_str().unwrap());

    let (status, _) = ctx.send("DELETE", &base, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = ctx.send("GET", &base, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, open) = ctx.send("GET", "/v1/workflows", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(open.as_array().unwrap().is_empty());

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_badge_scanned_as_item_is_rejected() {
    let ctx = TestContext::new().await.unwrap();

    let (_, session) = ctx
        .send("POST", "/v1/workflows", Some(json!({ "kind": "delivery" })))
        .await;
    let base = format!("/v1/workflows/{}", session["id"].as_str().unwrap());

    let badge = QrPayload::badge("a".repeat(64)).to_string();
    let (status, body) = ctx
        .send("POST", &format!("{}/items", base), Some(json!({ "payload": badge })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["field"], "payload");

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_audit_chain_verifies_after_mutations() {
    let ctx = TestContext::new().await.unwrap();
    create_employee(&ctx, "Ana Ribeiro").await;
    create_ppe_item(&ctx, "Bota de segurança", 3).await;

    let (status, body) = ctx.send("GET", "/v1/audit-logs/verify", None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["valid"], true);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_return_workflow_splits_rows_and_restocks_usable_items() {
    let ctx = TestContext::new().await.unwrap();
    let employee_id = create_employee(&ctx, "Pedro Alves").await;
    let item_id = create_ppe_item(&ctx, "Protetor auricular", 10).await;
    let original = id_of(&deliver_directly(&ctx, employee_id, item_id, 5).await);
    assert_eq!(stock_of(&ctx, item_id).await, 5);

    let label = QrPayload::Ppe(item_id).to_string();

    // Worn items go back to stock; the delivered row keeps what was not returned
    let (status, outcome) = run_workflow(
        &ctx,
        "return",
        employee_id,
        &[(label.clone(), 2)],
        json!({ "kind": "return", "condition": "worn" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    let returns = outcome["returns"].as_array().unwrap();
    assert_eq!(returns.len(), 1);
    assert_eq!(returns[0]["quantity"], 2);
    assert_eq!(returns[0]["return_condition"], "worn");
    assert_ne!(returns[0]["id"], json!(original));

    let kept = delivery(&ctx, original).await;
    assert!(kept.is_active());
    assert_eq!(kept.quantity, 3);
    assert_eq!(stock_of(&ctx, item_id).await, 7);

    // Damaged items are written off
    let (status, outcome) = run_workflow(
        &ctx,
        "return",
        employee_id,
        &[(label.clone(), 1)],
        json!({ "kind": "return", "condition": "damaged" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    assert_eq!(delivery(&ctx, original).await.quantity, 2);
    assert_eq!(stock_of(&ctx, item_id).await, 7);

    // More than the employee holds rolls the whole completion back
    let (status, _) = run_workflow(
        &ctx,
        "return",
        employee_id,
        &[(label, 3)],
        json!({ "kind": "return", "condition": "good" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(delivery(&ctx, original).await.quantity, 2);
    assert_eq!(stock_of(&ctx, item_id).await, 7);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_partial_return_of_a_delivery() {
    let ctx = TestContext::new().await.unwrap();
    let employee_id = create_employee(&ctx, "Luana Costa").await;
    let item_id = create_ppe_item(&ctx, "Luva nitrílica", 6).await;
    let original = id_of(&deliver_directly(&ctx, employee_id, item_id, 4).await);
    let uri = format!("/v1/ppe/deliveries/{}/return", original);

    let (status, body) = ctx
        .send("POST", &uri, Some(json!({ "condition": "good", "quantity": 1 })))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["quantity"], 1);
    assert_eq!(body["return_condition"], "good");
    assert_ne!(id_of(&body), original);
    assert_eq!(delivery(&ctx, original).await.quantity, 3);
    assert_eq!(stock_of(&ctx, item_id).await, 3);

    let (status, body) = ctx
        .send("POST", &uri, Some(json!({ "condition": "good", "quantity": 5 })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["field"], "quantity");

    let (status, body) = ctx.send("POST", &uri, Some(json!({ "condition": "lost" }))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(id_of(&body), original);
    let closed = delivery(&ctx, original).await;
    assert!(!closed.is_active());
    assert_eq!(closed.return_condition, Some(ItemCondition::Lost));
    assert_eq!(stock_of(&ctx, item_id).await, 3);

    let (status, _) = ctx.send("POST", &uri, Some(json!({ "condition": "good" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_exchange_returns_before_delivering() {
    let ctx = TestContext::new().await.unwrap();
    let employee_id = create_employee(&ctx, "Rafael Gomes").await;
    let item_id = create_ppe_item(&ctx, "Respirador PFF2", 1).await;
    let worn_out = id_of(&deliver_directly(&ctx, employee_id, item_id, 1).await);
    assert_eq!(stock_of(&ctx, item_id).await, 0);

    let label = QrPayload::Ppe(item_id).to_string();

    // Nothing goes back to stock for a damaged unit, so the replacement cannot be issued
    let (status, body) = run_workflow(
        &ctx,
        "exchange",
        employee_id,
        &[(label.clone(), 1)],
        json!({ "kind": "exchange", "replaced_delivery_ids": [worn_out], "condition": "damaged" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{}", body);
    assert!(delivery(&ctx, worn_out).await.is_active());

    // A worn unit is restocked first and handed straight back out
    let (status, outcome) = run_workflow(
        &ctx,
        "exchange",
        employee_id,
        &[(label, 1)],
        json!({ "kind": "exchange", "replaced_delivery_ids": [worn_out], "condition": "worn" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    assert_eq!(outcome["returns"].as_array().unwrap().len(), 1);
    assert_eq!(outcome["deliveries"].as_array().unwrap().len(), 1);
    assert_eq!(outcome["deliveries"][0]["reason"], "replacement");

    assert!(!delivery(&ctx, worn_out).await.is_active());
    assert_eq!(stock_of(&ctx, item_id).await, 0);

    let (_, active) = ctx
        .send("GET", &format!("/v1/employees/{}/ppe", employee_id), None)
        .await;
    let active = active.as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_ne!(active[0]["delivery_id"], json!(worn_out));

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_application_workflow_consumes_supplies() {
    let ctx = TestContext::new().await.unwrap();
    let employee_id = create_employee(&ctx, "Sérgio Nunes").await;
    let cement = create_asset(&ctx, "supply", "Cimento CP-II 50kg", 10).await;

    let (status, outcome) = run_workflow(
        &ctx,
        "application",
        employee_id,
        &[(QrPayload::Asset(cement).to_string(), 3)],
        json!({ "kind": "application", "work_site": "Bloco B, 2º pavimento" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    let movements = outcome["movements"].as_array().unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0]["kind"], "consumption");
    assert_eq!(movements[0]["quantity"], 3);
    assert_eq!(movements[0]["work_site"], "Bloco B, 2º pavimento");

    let asset = Asset::find_by_id(&ctx.db, ctx.company.id, cement).await.unwrap().unwrap();
    assert_eq!(asset.quantity, 7);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_damaged_tool_returned_goes_to_maintenance() {
    let ctx = TestContext::new().await.unwrap();
    let employee_id = create_employee(&ctx, "Bruno Dias").await;
    let drill = create_asset(&ctx, "tool", "Furadeira de impacto", 1).await;

    let (status, body) = ctx
        .send(
            "POST",
            &format!("/v1/assets/{}/checkout", drill),
            Some(json!({ "employee_id": employee_id })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, outcome) = run_workflow(
        &ctx,
        "return",
        employee_id,
        &[(QrPayload::Asset(drill).to_string(), 1)],
        json!({ "kind": "return", "condition": "damaged" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", outcome);
    assert_eq!(outcome["movements"][0]["kind"], "checkin");

    let asset = Asset::find_by_id(&ctx.db, ctx.company.id, drill).await.unwrap().unwrap();
    assert_eq!(asset.status, AssetStatus::Maintenance);
    assert_eq!(asset.holder_employee_id, None);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_stock_adjustment_rules() {
    let ctx = TestContext::new().await.unwrap();
    let item_id = create_ppe_item(&ctx, "Cinto paraquedista", 5).await;
    let uri = format!("/v1/ppe/items/{}/stock", item_id);

    let (status, body) = ctx.send("POST", &uri, Some(json!({ "delta": 0 }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["field"], "delta");

    let (status, _) = ctx.send("POST", &uri, Some(json!({ "delta": -6 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(stock_of(&ctx, item_id).await, 5);

    let (status, body) = ctx
        .send("POST", &uri, Some(json!({ "delta": 20, "reason": "NF 4471" })))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["stock_quantity"], 25);

    let (status, body) = ctx.send("POST", &uri, Some(json!({ "delta": -25 }))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["stock_quantity"], 0);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_vacation_decisions() {
    let ctx = TestContext::new().await.unwrap();
    let employee_id = create_employee(&ctx, "Fernanda Rocha").await;

    let request = |start: &str, end: &str| {
        json!({ "employee_id": employee_id, "start_date": start, "end_date": end })
    };

    let (status, _) = ctx
        .send("POST", "/v1/vacations", Some(request("2030-07-01", "2030-07-31")))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, first) = ctx
        .send("POST", "/v1/vacations", Some(request("2030-07-01", "2030-07-10")))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", first);
    assert_eq!(first["status"], "requested");
    let first = format!("/v1/vacations/{}", first["id"].as_str().unwrap());

    // Pending requests may overlap each other
    let (status, second) = ctx
        .send("POST", "/v1/vacations", Some(request("2030-07-05", "2030-07-15")))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", second);
    let second = format!("/v1/vacations/{}", second["id"].as_str().unwrap());

    let (status, body) = ctx.send("POST", &format!("{}/approve", first), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "approved");

    let (status, _) = ctx.send("POST", &format!("{}/approve", second), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = ctx
        .send("POST", "/v1/vacations", Some(request("2030-07-08", "2030-07-12")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = ctx.send("POST", &format!("{}/reject", second), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "rejected");

    let (status, _) = ctx.send("POST", &format!("{}/reject", first), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = ctx.send("POST", &format!("{}/approve", second), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = ctx.send("POST", &format!("{}/cancel", first), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "cancelled");

    // The cancelled period is free again
    let (status, _) = ctx
        .send("POST", "/v1/vacations", Some(request("2030-07-08", "2030-07-12")))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_clock_toggles_and_summary() {
    let ctx = TestContext::new().await.unwrap();
    let employee_id = create_employee(&ctx, "Thiago Martins").await;
    let clock = json!({ "employee_id": employee_id });

    let (status, body) = ctx.send("POST", "/v1/timesheets/clock", Some(clock.clone())).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["event"], "clock_in");

    let (status, body) = ctx.send("POST", "/v1/timesheets/clock", Some(clock.clone())).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["event"], "clock_out");
    assert!(!body["entry"]["clock_out"].is_null());

    let (status, body) = ctx.send("POST", "/v1/timesheets/clock", Some(clock)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["event"], "clock_in");

    // Only one open entry per employee
    let (status, _) = ctx
        .send(
            "POST",
            "/v1/timesheets",
            Some(json!({ "employee_id": employee_id, "clock_in": "2025-03-03T07:00:00Z" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, open) = ctx
        .send("GET", &format!("/v1/timesheets?employee_id={}&open=true", employee_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(open["items"].as_array().unwrap().len(), 1);

    let (status, summary) = ctx
        .send("GET", &format!("/v1/timesheets/summary?employee_id={}", employee_id), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", summary);
    assert_eq!(summary["closed_entries"], 1);
    assert_eq!(summary["open_entries"], 1);
    assert_eq!(summary["days_worked"], 1);
    assert!(summary["worked_minutes"].as_i64().unwrap() >= 1);

    let (status, _) = ctx
        .send(
            "GET",
            &format!("/v1/timesheets/summary?employee_id={}&month=2025-13", employee_id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    ctx.cleanup().await.unwrap();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_regenerated_badge_replaces_the_old_one() {
    let ctx = TestContext::new().await.unwrap();
    let employee_id = create_employee(&ctx, "Juliana Freitas").await;

    let (_, employee) = ctx
        .send("GET", &format!("/v1/employees/{}", employee_id), None)
        .await;
    let old_hash = employee["qr_hash"].as_str().unwrap().to_string();

    let (status, badge) = ctx
        .send("POST", &format!("/v1/employees/{}/badge", employee_id), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{}", badge);
    assert_eq!(badge["version"], employee["badge_version"].as_i64().unwrap() + 1);
    let new_hash = badge["qr_hash"].as_str().unwrap().to_string();
    assert_ne!(new_hash, old_hash);

    let (status, body) = ctx
        .send("POST", "/v1/functions/verify-qr-code", Some(json!({ "qrHash": old_hash })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);

    let (status, body) = ctx
        .send(
            "POST",
            "/v1/functions/verify-qr-code",
            Some(json!({ "qrHash": badge["payload"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["employee"]["name"], "Juliana Freitas");

    ctx.cleanup().await.unwrap();
}
