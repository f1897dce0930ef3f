//! QR wallet gateway (v2 XML API, MD5 signed).
//!
//! Every request and response is a flat `<xml>` document. The signature is
//! `MD5(canonical + "&key=" + api_key)` in uppercase hex, carried in `sign`.

use async_trait::async_trait;
use md5::{Digest, Md5};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use secrecy::ExposeSecret;
use service_core::utils::constant_time_eq;

use super::signing::{canonical_string, from_minor_units, nonce, to_minor_units, Params};
use super::{
    GatewayError, GatewayLookup, GatewayPayment, GatewayPaymentRequest, GatewayRefund,
    GatewayRefundRequest, GatewayStatus, PaymentGateway, WebhookAck, WebhookNotification,
    WebhookOutcome,
};
use crate::config::WalletBConfig;
use crate::models::{PaymentData, ProviderKind, TransactionStatus};

const SUCCESS: &str = "SUCCESS";

pub struct WalletBClient {
    client: Client,
    config: WalletBConfig,
}

impl WalletBClient {
    pub fn new(config: WalletBConfig, client: Client) -> Self {
        Self { client, config }
    }

    fn sign(&self, params: &Params) -> String {
        md5_sign(params, self.config.api_key.expose_secret())
    }

    fn verify(&self, params: &Params) -> bool {
        match params.get("sign") {
            Some(provided) if !provided.is_empty() => {
                constant_time_eq(&self.sign(params), &provided.to_ascii_uppercase())
            }
            _ => false,
        }
    }

    fn base_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("appid".into(), self.config.app_id.clone());
        params.insert("mch_id".into(), self.config.mch_id.clone());
        params.insert("nonce_str".into(), nonce());
        params
    }

    /// Sign, POST as XML and return the verified response fields.
    ///
    /// Communication failures (`return_code != SUCCESS`) are rejections;
    /// `result_code` is left to the caller since some business codes are
    /// expected outcomes.
    async fn call(&self, path: &str, mut params: Params) -> Result<Params, GatewayError> {
        let signature = self.sign(&params);
        params.insert("sign".into(), signature);

        let url = format!("{}{}", self.config.gateway_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(to_xml(&params))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        tracing::debug!(path, status = %status, "Wallet B gateway response received");

        if !status.is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "HTTP {} from wallet B gateway",
                status
            )));
        }

        let reply = from_xml(&body)?;
        if reply.get("return_code").map(String::as_str) != Some(SUCCESS) {
            let message = reply.get("return_msg").cloned().unwrap_or_default();
            tracing::error!(path, message = %message, "Wallet B gateway communication failure");
            return Err(GatewayError::rejected(
                reply.get("return_code").cloned().unwrap_or_else(|| "FAIL".into()),
                message,
            ));
        }
        if !self.verify(&reply) {
            return Err(GatewayError::InvalidResponse(
                "response signature does not verify".to_string(),
            ));
        }

        Ok(reply)
    }
}

#[async_trait]
impl PaymentGateway for WalletBClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WalletB
    }

    async fn create_payment(
        &self,
        request: &GatewayPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        let mut params = self.base_params();
        params.insert("body".into(), request.subject.clone());
        params.insert("out_trade_no".into(), request.transaction_id.clone());
        params.insert("total_fee".into(), to_minor_units(request.amount)?.to_string());
        params.insert("fee_type".into(), request.currency.clone());
        params.insert("spbill_create_ip".into(), self.config.client_ip.clone());
        params.insert("notify_url".into(), self.config.notify_url.clone());
        params.insert("trade_type".into(), "NATIVE".into());
        params.insert("product_id".into(), request.order_id.clone());

        let reply = self.call("/pay/unifiedorder", params).await?;
        if let Some(err) = business_error(&reply) {
            return Err(err);
        }

        let field = |name: &str| {
            reply.get(name).cloned().ok_or_else(|| {
                GatewayError::InvalidResponse(format!("unified order reply lacks {}", name))
            })
        };
        let prepay_id = field("prepay_id")?;
        let code_url = field("code_url")?;

        tracing::info!(
            transaction_id = %request.transaction_id,
            order_id = %request.order_id,
            prepay_id = %prepay_id,
            "Wallet B native order created"
        );

        Ok(GatewayPayment {
            qr_code_url: Some(code_url.clone()),
            payment_data: Some(PaymentData::WalletB {
                prepay_id,
                code_url,
            }),
            status: Some(TransactionStatus::Processing),
            ..Default::default()
        })
    }

    async fn verify_payment(&self, lookup: &GatewayLookup) -> Result<GatewayStatus, GatewayError> {
        let mut params = self.base_params();
        params.insert("out_trade_no".into(), lookup.transaction_id.clone());

        let reply = self.call("/pay/orderquery", params).await?;
        if let Some(err) = business_error(&reply) {
            if reply.get("err_code").map(String::as_str) == Some("ORDERNOTEXIST") {
                return Ok(GatewayStatus {
                    status: TransactionStatus::Pending,
                    provider_transaction_id: lookup.provider_transaction_id.clone(),
                });
            }
            return Err(err);
        }

        let trade_state = reply.get("trade_state").map(String::as_str).unwrap_or_default();
        let status = map_trade_state(trade_state).ok_or_else(|| {
            GatewayError::InvalidResponse(format!("unknown trade state {}", trade_state))
        })?;

        Ok(GatewayStatus {
            status,
            provider_transaction_id: reply
                .get("transaction_id")
                .cloned()
                .or_else(|| lookup.provider_transaction_id.clone()),
        })
    }

    async fn process_refund(
        &self,
        request: &GatewayRefundRequest,
    ) -> Result<GatewayRefund, GatewayError> {
        let mut params = self.base_params();
        params.insert("out_trade_no".into(), request.transaction_id.clone());
        if let Some(transaction_id) = &request.provider_transaction_id {
            params.insert("transaction_id".into(), transaction_id.clone());
        }
        params.insert("out_refund_no".into(), request.refund_id.clone());
        params.insert("total_fee".into(), to_minor_units(request.total_amount)?.to_string());
        params.insert("refund_fee".into(), to_minor_units(request.amount)?.to_string());
        params.insert("refund_fee_type".into(), request.currency.clone());
        if let Some(reason) = &request.reason {
            params.insert("refund_desc".into(), reason.clone());
        }

        let reply = self.call("/secapi/pay/refund", params).await?;
        if let Some(err) = business_error(&reply) {
            return Err(err);
        }

        Ok(GatewayRefund {
            provider_refund_id: reply
                .get("refund_id")
                .cloned()
                .unwrap_or_else(|| request.refund_id.clone()),
        })
    }

    fn handle_webhook(
        &self,
        notification: &WebhookNotification,
    ) -> Result<WebhookOutcome, GatewayError> {
        let params = from_xml(&notification.body)
            .map_err(|e| GatewayError::SignatureMismatch(format!("malformed notification: {}", e)))?;

        if !self.verify(&params) {
            return Err(GatewayError::SignatureMismatch(
                "notification signature does not verify".to_string(),
            ));
        }
        if params.get("appid") != Some(&self.config.app_id)
            || params.get("mch_id") != Some(&self.config.mch_id)
        {
            return Err(GatewayError::SignatureMismatch(
                "notification is for a different merchant".to_string(),
            ));
        }

        let return_code = params.get("return_code").map(String::as_str).unwrap_or_default();
        let result_code = params.get("result_code").map(String::as_str).unwrap_or_default();
        let status = match (return_code, result_code) {
            (SUCCESS, SUCCESS) => Some(TransactionStatus::Completed),
            (SUCCESS, "FAIL") => Some(TransactionStatus::Failed),
            _ => None,
        };

        let amount = params
            .get("total_fee")
            .map(|fee| fee.parse::<i64>().map(from_minor_units))
            .transpose()
            .map_err(|e| GatewayError::InvalidResponse(format!("total_fee: {}", e)))?;

        Ok(WebhookOutcome {
            event: format!("pay.{}", result_code.to_lowercase()),
            transaction_id: params.get("out_trade_no").cloned(),
            provider_transaction_id: params.get("transaction_id").cloned(),
            status,
            amount,
        })
    }

    fn acknowledgement(&self) -> WebhookAck {
        let mut reply = Params::new();
        reply.insert("return_code".into(), SUCCESS.into());
        reply.insert("return_msg".into(), "OK".into());
        WebhookAck {
            content_type: "application/xml",
            body: to_xml(&reply),
        }
    }
}

/// `MD5(canonical&key=secret)`, uppercase hex.
pub fn md5_sign(params: &Params, api_key: &str) -> String {
    let content = format!("{}&key={}", canonical_string(params, &["sign"]), api_key);
    hex::encode_upper(Md5::digest(content.as_bytes()))
}

/// Serialize a flat map as `<xml><k><![CDATA[v]]></k>...</xml>`.
pub fn to_xml(params: &Params) -> String {
    let mut xml = String::from("<xml>");
    for (key, value) in params {
        let value = value.replace("]]>", "]]]]><![CDATA[>");
        xml.push_str(&format!("<{key}><![CDATA[{value}]]></{key}>"));
    }
    xml.push_str("</xml>");
    xml
}

/// Parse the children of the root element into a flat map.
pub fn from_xml(xml: &str) -> Result<Params, GatewayError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut params = Params::new();
    let mut depth = 0usize;
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                depth += 1;
                if depth == 2 {
                    let key = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    params.entry(key.clone()).or_default();
                    current = Some(key);
                }
            }
            Ok(Event::Empty(element)) if depth == 1 => {
                let key = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                params.entry(key).or_default();
            }
            Ok(Event::Text(text)) => {
                if let (2, Some(key)) = (depth, &current) {
                    let value = text
                        .unescape()
                        .map_err(|e| GatewayError::InvalidResponse(format!("XML text: {}", e)))?;
                    params.entry(key.clone()).or_default().push_str(&value);
                }
            }
            Ok(Event::CData(data)) => {
                if let (2, Some(key)) = (depth, &current) {
                    let value = String::from_utf8(data.into_inner().into_owned())
                        .map_err(|e| GatewayError::InvalidResponse(format!("XML CDATA: {}", e)))?;
                    params.entry(key.clone()).or_default().push_str(&value);
                }
            }
            Ok(Event::End(_)) => {
                if depth == 2 {
                    current = None;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(GatewayError::InvalidResponse(format!(
                    "malformed XML at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if depth != 0 {
        return Err(GatewayError::InvalidResponse("unterminated XML document".to_string()));
    }

    Ok(params)
}

fn map_trade_state(trade_state: &str) -> Option<TransactionStatus> {
    match trade_state {
        "SUCCESS" => Some(TransactionStatus::Completed),
        // The QR order exists at the gateway from creation on.
        "NOTPAY" => Some(TransactionStatus::Processing),
        "USERPAYING" => Some(TransactionStatus::Processing),
        "CLOSED" | "REVOKED" => Some(TransactionStatus::Cancelled),
        "PAYERROR" => Some(TransactionStatus::Failed),
        "REFUND" => Some(TransactionStatus::Refunded),
        _ => None,
    }
}

/// Map a `result_code=FAIL` reply to a rejection with a readable message.
fn business_error(reply: &Params) -> Option<GatewayError> {
    if reply.get("result_code").map(String::as_str) == Some(SUCCESS) {
        return None;
    }

    let code = reply.get("err_code").cloned().unwrap_or_else(|| "FAIL".into());
    let message = match code.as_str() {
        "ORDERPAID" => "Order already paid".to_string(),
        "ORDERCLOSED" => "Order already closed".to_string(),
        "ORDERNOTEXIST" => "Order does not exist".to_string(),
        "OUT_TRADE_NO_USED" => "Merchant order number already used".to_string(),
        "SIGNERROR" => "Invalid request signature".to_string(),
        "NOAUTH" => "Merchant is not authorized for this operation".to_string(),
        "NOTENOUGH" => "Insufficient merchant balance".to_string(),
        "PARAM_ERROR" => "Invalid request parameters".to_string(),
        "XML_FORMAT_ERROR" => "Malformed request document".to_string(),
        "SYSTEMERROR" | "BIZERR_NEED_RETRY" => "Gateway system error".to_string(),
        _ => reply.get("err_code_des").cloned().unwrap_or_else(|| code.clone()),
    };
    tracing::error!(code = %code, message = %message, "Wallet B gateway rejected request");
    Some(GatewayError::rejected(code, message))
}
