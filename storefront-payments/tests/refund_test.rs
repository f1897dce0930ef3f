mod common;

use axum::http::{Method, StatusCode};
use common::*;
use rust_decimal_macros::dec;
use std::time::Duration;
use storefront_payments::services::TransactionLedger;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, ResponseTemplate};

/// Card transaction for `order_id` driven to `completed` through confirmation.
async fn paid_card_transaction(app: &TestApp, order_id: &str, amount: &str) -> String {
    let intent_id = format!("pi_{}", order_id.to_lowercase().replace('-', ""));

    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(body_string_contains(format!("metadata%5Border_id%5D={}", order_id)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(card_intent(&intent_id, "requires_payment_method")),
        )
        .mount(&app.card)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/payment_intents/{}/confirm", intent_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(card_intent(&intent_id, "succeeded")))
        .mount(&app.card)
        .await;

    let created = app
        .create_payment(Some(CUSTOMER), order_id, "card", amount)
        .await;
    let transaction_id = created["transaction_id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/payments/{}/confirm", transaction_id),
            Some(CUSTOMER),
            Some(serde_json::json!({ "payment_method_id": "pm_card_visa" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    transaction_id
}

async fn mount_card_refund(app: &TestApp, refund_status: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "re_123",
            "object": "refund",
            "status": refund_status
        })))
        .mount(&app.card)
        .await;
}

#[tokio::test]
async fn full_refund_by_default() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-R1", Some(CUSTOMER), dec!(40.00)).await;
    let transaction_id = paid_card_transaction(&app, "ORD-R1", "40.00").await;
    mount_card_refund(&app, "succeeded").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/refunds",
            Some(CUSTOMER),
            Some(serde_json::json!({
                "transaction_id": transaction_id,
                "reason": "requested_by_customer"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["transaction_status"], "refunded");
    assert_eq!(body["refund"]["status"], "completed");
    assert_eq!(body["refund"]["provider_refund_id"], "re_123");
    assert_eq!(body["refund"]["amount"], "40.00");
    assert_eq!(app.transaction_status(&transaction_id).await, "refunded");
}

#[tokio::test]
async fn partial_refunds_accumulate_to_refunded() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-R2", Some(CUSTOMER), dec!(40.00)).await;
    let transaction_id = paid_card_transaction(&app, "ORD-R2", "40.00").await;
    mount_card_refund(&app, "succeeded").await;

    let refund = |amount: &str| {
        serde_json::json!({ "transaction_id": transaction_id, "amount": amount })
    };

    let (status, body) = app
        .send(Method::POST, "/refunds", Some(CUSTOMER), Some(refund("15.00")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["transaction_status"], "completed");

    let (status, body) = app
        .send(Method::POST, "/refunds", Some(CUSTOMER), Some(refund("30.00")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("refundable balance"));

    let (status, body) = app
        .send(Method::POST, "/refunds", Some(CUSTOMER), Some(refund("25.00")))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["transaction_status"], "refunded");

    let ledger = app.state.orchestrator.ledger();
    assert_eq!(ledger.refunded_total(&transaction_id).await.unwrap(), dec!(40.00));
    assert_eq!(ledger.list_refunds(&transaction_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_refunds_cannot_exceed_the_paid_amount() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-R8", Some(CUSTOMER), dec!(40.00)).await;
    let transaction_id = paid_card_transaction(&app, "ORD-R8", "40.00").await;

    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(300))
                .set_body_json(serde_json::json!({
                    "id": "re_slow",
                    "object": "refund",
                    "status": "succeeded"
                })),
        )
        .expect(1)
        .mount(&app.card)
        .await;

    let request = serde_json::json!({ "transaction_id": transaction_id, "amount": "30.00" });
    let ((first, _), (second, _)) = tokio::join!(
        app.send(Method::POST, "/refunds", Some(CUSTOMER), Some(request.clone())),
        app.send(Method::POST, "/refunds", Some(CUSTOMER), Some(request)),
    );

    let mut statuses = [first, second];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::BAD_REQUEST]);

    let ledger = app.state.orchestrator.ledger();
    assert_eq!(ledger.refunded_total(&transaction_id).await.unwrap(), dec!(30.00));
    assert_eq!(ledger.list_refunds(&transaction_id).await.unwrap().len(), 1);
    assert_eq!(app.transaction_status(&transaction_id).await, "completed");
}

#[tokio::test]
async fn refund_requires_completed_transaction() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-R3", Some(CUSTOMER), dec!(10.00)).await;
    let created = app
        .create_payment(Some(CUSTOMER), "ORD-R3", "wallet_a", "10.00")
        .await;

    let (status, body) = app
        .send(
            Method::POST,
            "/refunds",
            Some(CUSTOMER),
            Some(serde_json::json!({ "transaction_id": created["transaction_id"] })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("pending"));
    assert_eq!(app.ledger.refund_count().await, 0);
}

#[tokio::test]
async fn non_positive_refund_is_rejected() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-R4", Some(CUSTOMER), dec!(40.00)).await;
    let transaction_id = paid_card_transaction(&app, "ORD-R4", "40.00").await;

    let (status, _) = app
        .send(
            Method::POST,
            "/refunds",
            Some(CUSTOMER),
            Some(serde_json::json!({ "transaction_id": transaction_id, "amount": "0" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.ledger.refund_count().await, 0);
}

#[tokio::test]
async fn only_owner_or_admin_can_refund() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-R5", Some(CUSTOMER), dec!(40.00)).await;
    let transaction_id = paid_card_transaction(&app, "ORD-R5", "40.00").await;
    mount_card_refund(&app, "succeeded").await;
    let request = serde_json::json!({ "transaction_id": transaction_id });

    let (status, _) = app
        .send(Method::POST, "/refunds", Some(OTHER_CUSTOMER), Some(request.clone()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .send_as(Method::POST, "/refunds", Some("ops-1"), true, Some(request))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["transaction_status"], "refunded");
}

#[tokio::test]
async fn gateway_refund_failure_leaves_transaction_completed() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-R6", Some(CUSTOMER), dec!(40.00)).await;
    let transaction_id = paid_card_transaction(&app, "ORD-R6", "40.00").await;
    mount_card_refund(&app, "failed").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/refunds",
            Some(CUSTOMER),
            Some(serde_json::json!({ "transaction_id": transaction_id })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    assert_eq!(app.transaction_status(&transaction_id).await, "completed");

    let refunds = app
        .state
        .orchestrator
        .ledger()
        .list_refunds(&transaction_id)
        .await
        .unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].status.as_str(), "failed");
}

#[tokio::test]
async fn wallet_b_refund_sends_minor_units() {
    let app = TestApp::spawn().await;
    app.add_order("ORD-R7", None, dec!(25.00)).await;

    Mock::given(method("POST"))
        .and(path("/pay/unifiedorder"))
        .respond_with(ResponseTemplate::new(200).set_body_string(wallet_b_xml(&[
            ("return_code", "SUCCESS"),
            ("result_code", "SUCCESS"),
            ("appid", WALLET_B_APP_ID),
            ("mch_id", WALLET_B_MCH_ID),
            ("prepay_id", "wx_prepay_r7"),
            ("code_url", "weixin://wxpay/bizpayurl?pr=r7"),
        ])))
        .mount(&app.wallet_b)
        .await;
    Mock::given(method("POST"))
        .and(path("/pay/orderquery"))
        .respond_with(ResponseTemplate::new(200).set_body_string(wallet_b_xml(&[
            ("return_code", "SUCCESS"),
            ("result_code", "SUCCESS"),
            ("appid", WALLET_B_APP_ID),
            ("mch_id", WALLET_B_MCH_ID),
            ("trade_state", "SUCCESS"),
            ("transaction_id", "4200000000202401010000000007"),
        ])))
        .mount(&app.wallet_b)
        .await;
    Mock::given(method("POST"))
        .and(path("/secapi/pay/refund"))
        .and(body_string_contains("<refund_fee><![CDATA[1000]]></refund_fee>"))
        .and(body_string_contains("<total_fee><![CDATA[2500]]></total_fee>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(wallet_b_xml(&[
            ("return_code", "SUCCESS"),
            ("result_code", "SUCCESS"),
            ("appid", WALLET_B_APP_ID),
            ("mch_id", WALLET_B_MCH_ID),
            ("refund_id", "50000000002024010100000001"),
        ])))
        .expect(1)
        .mount(&app.wallet_b)
        .await;

    let created = app.create_payment(None, "ORD-R7", "wallet_b", "25.00").await;
    let transaction_id = created["transaction_id"].as_str().unwrap();
    let (_, body) = app
        .send(Method::GET, &format!("/payments/{}", transaction_id), None, None)
        .await;
    assert_eq!(body["status"], "completed");

    let (status, body) = app
        .send(
            Method::POST,
            "/refunds",
            None,
            Some(serde_json::json!({ "transaction_id": transaction_id, "amount": "10.00" })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["transaction_status"], "completed");
    assert_eq!(body["refund"]["provider_refund_id"], "50000000002024010100000001");
}
