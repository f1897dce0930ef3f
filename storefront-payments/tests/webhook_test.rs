mod common;

use axum::http::StatusCode;
use common::*;
use rust_decimal_macros::dec;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

async fn pending_card_transaction(app: &TestApp, order_id: &str, amount: &str) -> String {
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(card_intent("pi_hook", "requires_payment_method")),
        )
        .mount(&app.card)
        .await;

    let created = app
        .create_payment(Some(CUSTOMER), order_id, "card", amount)
        .await;
    created["transaction_id"].as_str().unwrap().to_string()
}

async fn send_card_event(app: &TestApp, body: String) -> (StatusCode, String, String) {
    let signature = card_signature(&body);
    app.notify("card", &[("Stripe-Signature", signature.as_str())], body)
        .await
}

#[tokio::test]
async fn card_success_event_completes_transaction() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-W1", Some(CUSTOMER), dec!(40.00)).await;
    let transaction_id = pending_card_transaction(&app, "ORD-W1", "40.00").await;

    let (status, content_type, body) = send_card_event(
        &app,
        card_event("payment_intent.succeeded", "pi_hook", &transaction_id, 4000),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/json");
    assert_eq!(body, r#"{"received":true}"#);
    assert_eq!(app.transaction_status(&transaction_id).await, "completed");
    assert!(app.orders.get("ORD-W1").await.unwrap().is_paid());
}

#[tokio::test]
async fn duplicate_and_late_events_do_not_regress_status() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-W2", Some(CUSTOMER), dec!(40.00)).await;
    let transaction_id = pending_card_transaction(&app, "ORD-W2", "40.00").await;

    let succeeded = card_event("payment_intent.succeeded", "pi_hook", &transaction_id, 4000);
    let (status, _, _) = send_card_event(&app, succeeded.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send_card_event(&app, succeeded).await;
    assert_eq!(status, StatusCode::OK);

    let failed = card_event("payment_intent.payment_failed", "pi_hook", &transaction_id, 4000);
    let (status, _, _) = send_card_event(&app, failed).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(app.transaction_status(&transaction_id).await, "completed");
}

#[tokio::test]
async fn bad_card_signature_is_rejected_without_changes() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-W3", Some(CUSTOMER), dec!(40.00)).await;
    let transaction_id = pending_card_transaction(&app, "ORD-W3", "40.00").await;

    let body = card_event("payment_intent.succeeded", "pi_hook", &transaction_id, 4000);
    let forged = format!("t={},v1={}", chrono::Utc::now().timestamp(), "00".repeat(32));

    let (status, _, _) = app
        .notify("card", &[("Stripe-Signature", forged.as_str())], body.clone())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = app.notify("card", &[], body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(app.transaction_status(&transaction_id).await, "pending");
}

#[tokio::test]
async fn unrecognized_events_are_acknowledged() {
    let app = TestApp::spawn().await;

    let body = serde_json::json!({
        "id": "evt_other",
        "type": "customer.created",
        "data": { "object": { "id": "cus_1", "object": "customer" } }
    })
    .to_string();
    let (status, _, ack) = send_card_event(&app, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, r#"{"received":true}"#);

    let unknown = card_event(
        "payment_intent.succeeded",
        "pi_unknown",
        "ffffffffffffffffffffffffffffffff",
        4000,
    );
    let (status, _, _) = send_card_event(&app, unknown).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn amount_mismatch_is_rejected() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-W4", Some(CUSTOMER), dec!(40.00)).await;
    let transaction_id = pending_card_transaction(&app, "ORD-W4", "40.00").await;

    let (status, _, _) = send_card_event(
        &app,
        card_event("payment_intent.succeeded", "pi_hook", &transaction_id, 100),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.transaction_status(&transaction_id).await, "pending");
}

#[tokio::test]
async fn notifications_cannot_cross_providers() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-W5", None, dec!(25.00)).await;
    let created = app.create_payment(None, "ORD-W5", "wallet_a", "25.00").await;
    let transaction_id = created["transaction_id"].as_str().unwrap();

    let (status, _, _) = send_card_event(
        &app,
        card_event("payment_intent.succeeded", "pi_hook", transaction_id, 2500),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.transaction_status(transaction_id).await, "pending");
}

#[tokio::test]
async fn wallet_a_notification_completes_transaction() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-W6", None, dec!(99.99)).await;
    let created = app.create_payment(None, "ORD-W6", "wallet_a", "99.99").await;
    let transaction_id = created["transaction_id"].as_str().unwrap();

    let body = wallet_a_notification(&[
        ("app_id", WALLET_A_APP_ID),
        ("notify_type", "trade_status_sync"),
        ("out_trade_no", transaction_id),
        ("trade_no", "2024010122001400001234567890"),
        ("trade_status", "TRADE_SUCCESS"),
        ("total_amount", "99.99"),
    ]);

    let (status, content_type, ack) = app
        .notify(
            "wallet_a",
            &[("Content-Type", "application/x-www-form-urlencoded")],
            body,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(ack, "success");
    assert_eq!(app.transaction_status(transaction_id).await, "completed");
}

#[tokio::test]
async fn tampered_wallet_a_notification_is_rejected() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-W7", None, dec!(99.99)).await;
    let created = app.create_payment(None, "ORD-W7", "wallet_a", "99.99").await;
    let transaction_id = created["transaction_id"].as_str().unwrap();

    let body = wallet_a_notification(&[
        ("app_id", WALLET_A_APP_ID),
        ("out_trade_no", transaction_id),
        ("trade_status", "TRADE_SUCCESS"),
        ("total_amount", "99.99"),
    ])
    .replace("99.99", "0.01");

    let (status, _, _) = app.notify("wallet_a", &[], body).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.transaction_status(transaction_id).await, "pending");
}

#[tokio::test]
async fn wallet_b_notification_completes_transaction() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-W8", None, dec!(25.00)).await;

    Mock::given(method("POST"))
        .and(path("/pay/unifiedorder"))
        .respond_with(ResponseTemplate::new(200).set_body_string(wallet_b_xml(&[
            ("return_code", "SUCCESS"),
            ("result_code", "SUCCESS"),
            ("appid", WALLET_B_APP_ID),
            ("mch_id", WALLET_B_MCH_ID),
            ("prepay_id", "wx_prepay_w8"),
            ("code_url", "weixin://wxpay/bizpayurl?pr=w8"),
        ])))
        .mount(&app.wallet_b)
        .await;

    let created = app.create_payment(None, "ORD-W8", "wallet_b", "25.00").await;
    let transaction_id = created["transaction_id"].as_str().unwrap();

    let body = wallet_b_xml(&[
        ("return_code", "SUCCESS"),
        ("result_code", "SUCCESS"),
        ("appid", WALLET_B_APP_ID),
        ("mch_id", WALLET_B_MCH_ID),
        ("out_trade_no", transaction_id),
        ("transaction_id", "4200000000202401010000000008"),
        ("total_fee", "2500"),
        ("trade_type", "NATIVE"),
    ]);

    let (status, content_type, ack) = app.notify("wallet_b", &[], body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/xml");
    assert!(ack.contains("<return_code><![CDATA[SUCCESS]]></return_code>"));
    assert_eq!(app.transaction_status(transaction_id).await, "completed");
    assert_eq!(
        app.orders
            .get("ORD-W8")
            .await
            .unwrap()
            .payment_transaction_id
            .as_deref(),
        Some(transaction_id)
    );
}

#[tokio::test]
async fn tampered_wallet_b_notification_is_rejected() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-W9", None, dec!(25.00)).await;

    Mock::given(method("POST"))
        .and(path("/pay/unifiedorder"))
        .respond_with(ResponseTemplate::new(200).set_body_string(wallet_b_xml(&[
            ("return_code", "SUCCESS"),
            ("result_code", "SUCCESS"),
            ("appid", WALLET_B_APP_ID),
            ("mch_id", WALLET_B_MCH_ID),
            ("prepay_id", "wx_prepay_w9"),
            ("code_url", "weixin://wxpay/bizpayurl?pr=w9"),
        ])))
        .mount(&app.wallet_b)
        .await;

    let created = app.create_payment(None, "ORD-W9", "wallet_b", "25.00").await;
    let transaction_id = created["transaction_id"].as_str().unwrap();

    let body = wallet_b_xml(&[
        ("return_code", "SUCCESS"),
        ("result_code", "SUCCESS"),
        ("appid", WALLET_B_APP_ID),
        ("mch_id", WALLET_B_MCH_ID),
        ("out_trade_no", transaction_id),
        ("transaction_id", "4200000000202401010000000009"),
        ("total_fee", "2500"),
        ("trade_type", "NATIVE"),
    ])
    .replace(
        "<total_fee><![CDATA[2500]]></total_fee>",
        "<total_fee><![CDATA[1]]></total_fee>",
    );

    let (status, _, _) = app.notify("wallet_b", &[], body).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.transaction_status(transaction_id).await, "processing");
    let order = app.orders.get("ORD-W9").await.unwrap();
    assert!(!order.is_paid());
    assert!(order.payment_transaction_id.is_none());
}

#[tokio::test]
async fn unknown_provider_is_a_bad_request() {
    let app = TestApp::spawn().await;

    let (status, _, _) = app.notify("paypal", &[], "{}".to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
