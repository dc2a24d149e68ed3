use std::sync::Arc;

use apr_api::auth::{hash_password, issue_token};
use apr_api::build_router_with_store;
use apr_core::Role;
use apr_storage::{DirectoryRepository, NewAccount, NewBill, NewSector, SectorUpdate, Store};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use tower::ServiceExt;

const ADMIN_RUT: &str = "11111111-1";
const ADMIN_PASSWORD: &str = "agua-segura";
const JUAN_RUT: &str = "12345678-9";

/// Two sectors (one with an active outage), a customer with 27,500 in
/// unpaid bills, and an admin with credentials.
async fn seeded_router() -> Router {
    let store = Arc::new(Store::memory());

    let calm = store
        .create_sector(NewSector {
            name: "Villa Los Heroes".to_string(),
            alert_message: Some("Sin incidentes".to_string()),
        })
        .await
        .unwrap();
    let broken = store
        .create_sector(NewSector {
            name: "Poblacion San Jose".to_string(),
            alert_message: Some("Rotura de matriz en Av. Principal".to_string()),
        })
        .await
        .unwrap();
    store
        .update_sector(
            broken.id,
            SectorUpdate {
                has_outage: Some(true),
                ..SectorUpdate::default()
            },
        )
        .await
        .unwrap();

    let juan = store
        .create_account(NewAccount {
            rut: JUAN_RUT.to_string(),
            full_name: "Juan Perez".to_string(),
            address: "Calle 1 #123".to_string(),
            role: Role::Customer,
            sector_id: calm.id,
            password_hash: None,
        })
        .await
        .unwrap();
    store
        .create_account(NewAccount {
            rut: ADMIN_RUT.to_string(),
            full_name: "Admin APR".to_string(),
            address: "Oficina Central".to_string(),
            role: Role::Admin,
            sector_id: calm.id,
            password_hash: Some(hash_password(ADMIN_PASSWORD)),
        })
        .await
        .unwrap();

    let now = chrono::Utc::now();
    store
        .create_bill(NewBill {
            account_id: juan.id,
            period: "2025-01".to_string(),
            amount: 15000,
            due_at: now - chrono::Duration::days(30),
        })
        .await
        .unwrap();
    store
        .create_bill(NewBill {
            account_id: juan.id,
            period: "2025-02".to_string(),
            amount: 12500,
            due_at: now + chrono::Duration::days(5),
        })
        .await
        .unwrap();

    build_router_with_store(store)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn admin_token(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(post_json(
            "/auth/token",
            json!({ "rut": ADMIN_RUT, "password": ADMIN_PASSWORD }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let parsed = json_body(response).await;
    parsed["access_token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let app = seeded_router().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn service_status_lists_outaged_sectors() {
    let app = seeded_router().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/info/service-status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let parsed = json_body(response).await;
    assert_eq!(parsed["sectors_with_outage"], json!(["Poblacion San Jose"]));
    assert!(parsed["office_hours"].as_str().unwrap().contains("Lunes"));
}

#[tokio::test]
async fn chat_greets_and_logs_the_interaction() {
    let app = seeded_router().await;

    let response = app
        .clone()
        .oneshot(post_json("/chat/interact", json!({ "text": "hola" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = json_body(response).await;
    assert!(parsed["reply"].as_str().unwrap().contains("asistente virtual"));
    let interaction_id = parsed["interaction_id"].as_i64().unwrap();

    let feedback = app
        .oneshot(post_json(
            "/chat/feedback",
            json!({ "interaction_id": interaction_id, "useful": true }),
        ))
        .await
        .unwrap();
    assert_eq!(feedback.status(), StatusCode::OK);
}

#[tokio::test]
async fn chat_balance_uses_the_seeded_debt() {
    let app = seeded_router().await;

    let response = app
        .oneshot(post_json(
            "/chat/interact",
            json!({ "text": "cuanto debo", "rut": JUAN_RUT }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let parsed = json_body(response).await;
    assert!(parsed["reply"].as_str().unwrap().contains("27,500"));
}

#[tokio::test]
async fn feedback_on_unknown_interaction_is_not_found() {
    let app = seeded_router().await;

    let response = app
        .oneshot(post_json(
            "/chat/feedback",
            json!({ "interaction_id": 9999, "useful": false }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn account_profile_and_bills_are_public() {
    let app = seeded_router().await;

    let profile_response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/accounts/{JUAN_RUT}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(profile_response.status(), StatusCode::OK);
    let profile = json_body(profile_response).await;
    assert_eq!(profile["total_debt"], json!(27500));
    assert_eq!(profile["sector"]["name"], json!("Villa Los Heroes"));

    let bills_response = app
        .oneshot(
            Request::builder()
                .uri(format!("/accounts/{JUAN_RUT}/bills"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bills_response.status(), StatusCode::OK);
    let bills = json_body(bills_response).await;
    assert_eq!(bills.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_rut_is_not_found() {
    let app = seeded_router().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/accounts/99999999-9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_routes_require_a_token() {
    let app = seeded_router().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/reports")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn customer_tokens_cannot_reach_admin_routes() {
    let app = seeded_router().await;

    let token = issue_token("dev-apr-secret", JUAN_RUT, "customer", 30).unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/reports")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn customers_cannot_log_in() {
    let app = seeded_router().await;

    let response = app
        .oneshot(post_json(
            "/auth/token",
            json!({ "rut": JUAN_RUT, "password": "lo-que-sea" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_manages_sectors_end_to_end() {
    let app = seeded_router().await;
    let token = admin_token(&app).await;

    let create_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/sectors")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::from(
                    json!({ "name": "El Manzano", "alert_message": null }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create_response.status(), StatusCode::CREATED);
    let created = json_body(create_response).await;
    let sector_id = created["id"].as_i64().unwrap();

    let update_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/sectors/{sector_id}"))
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::from(
                    json!({
                        "has_outage": true,
                        "alert_message": "Mantención programada"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(update_response.status(), StatusCode::OK);

    let status_response = app
        .oneshot(
            Request::builder()
                .uri("/info/service-status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = json_body(status_response).await;
    let outaged = status["sectors_with_outage"].as_array().unwrap();
    assert!(outaged.contains(&json!("El Manzano")));
}

#[tokio::test]
async fn report_flow_from_customer_to_staff_response() {
    let app = seeded_router().await;

    let submit_response = app
        .clone()
        .oneshot(post_json(
            "/reports",
            json!({
                "rut": JUAN_RUT,
                "kind": "corte",
                "description": "No tengo agua desde la mañana"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(submit_response.status(), StatusCode::CREATED);
    let report = json_body(submit_response).await;
    let report_id = report["id"].as_i64().unwrap();

    let token = admin_token(&app).await;
    let list_response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/reports")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(list_response.status(), StatusCode::OK);
    let reports = json_body(list_response).await;
    assert_eq!(reports.as_array().unwrap().len(), 1);

    let respond_response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/reports/{report_id}/respond"))
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::from(
                    json!({ "response": "Cuadrilla enviada al sector" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(respond_response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bulk_import_creates_accounts_and_debt() {
    let app = seeded_router().await;
    let token = admin_token(&app).await;

    let sheet = "\
rut,name,address,sector,debt_amount,debt_period
55555555-5,Pedro Soto,Camino Real #7,El Alto,8000,2025-03
";
    let import_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/import")
                .header("content-type", "text/csv")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::from(sheet))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(import_response.status(), StatusCode::OK);
    let summary = json_body(import_response).await;
    assert_eq!(summary["accounts_created"], json!(1));
    assert_eq!(summary["sectors_created"], json!(1));
    assert_eq!(summary["bills_created"], json!(1));

    let profile_response = app
        .oneshot(
            Request::builder()
                .uri("/accounts/55555555-5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(profile_response.status(), StatusCode::OK);
    let profile = json_body(profile_response).await;
    assert_eq!(profile["total_debt"], json!(8000));
}

#[tokio::test]
async fn import_without_token_is_rejected() {
    let app = seeded_router().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/import")
                .header("content-type", "text/csv")
                .body(Body::from("rut,name,address,sector,debt_amount,debt_period\n"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
