//! Cross-provider signature properties: a valid payload verifies and
//! yields the fields settlement needs; any single-byte tamper is rejected;
//! verification never panics on malformed input.

use serde_json::json;
use Savora_backend::gateways::providers::{
    MomoConfig, MomoGateway, VnpayConfig, VnpayGateway, ZalopayConfig, ZalopayGateway,
};
use Savora_backend::gateways::signing::{canonical_query, hmac_sha256_hex, hmac_sha512_hex};
use Savora_backend::gateways::{CallbackPayload, PaymentGateway};

fn momo() -> MomoGateway {
    MomoGateway::new(MomoConfig {
        partner_code: "MOMOTEST".to_string(),
        access_key: "accesskey".to_string(),
        secret_key: "momosecret".to_string(),
        ..MomoConfig::default()
    })
    .unwrap()
}

fn vnpay() -> VnpayGateway {
    VnpayGateway::new(VnpayConfig {
        tmn_code: "TESTTMN".to_string(),
        hash_secret: "vnpaysecret".to_string(),
        ..VnpayConfig::default()
    })
    .unwrap()
}

fn zalopay() -> ZalopayGateway {
    ZalopayGateway::new(ZalopayConfig {
        app_id: "2553".to_string(),
        key1: "zalokey1".to_string(),
        key2: "zalokey2".to_string(),
        ..ZalopayConfig::default()
    })
    .unwrap()
}

fn momo_callback(amount: i64, result_code: i64) -> CallbackPayload {
    let raw = format!(
        "accessKey=accesskey&amount={amount}&extraData=&message=Successful.&orderId=intent-1&orderInfo=Order 1&orderType=momo_wallet&partnerCode=MOMOTEST&payType=qr&requestId=intent-1&responseTime=1712214529000&resultCode={result_code}&transId=4088878653"
    );
    let signature = hmac_sha256_hex("momosecret", &raw);
    CallbackPayload::new(json!({
        "partnerCode": "MOMOTEST",
        "orderId": "intent-1",
        "requestId": "intent-1",
        "amount": amount,
        "orderInfo": "Order 1",
        "orderType": "momo_wallet",
        "transId": 4088878653i64,
        "resultCode": result_code,
        "message": "Successful.",
        "payType": "qr",
        "responseTime": 1712214529000i64,
        "extraData": "",
        "signature": signature,
    }))
}

#[test]
fn momo_happy_path_callback_verifies_and_extracts_settlement_fields() {
    // Reference flow: a 100000 VND order paid through Momo, resultCode=0.
    let verification = momo().verify_callback(&momo_callback(100_000, 0));
    assert!(verification.valid);
    assert!(verification.success);
    assert_eq!(verification.amount.unwrap().minor(), 100_000);
    assert_eq!(
        verification.provider_transaction_ref.as_deref(),
        Some("intent-1")
    );
}

#[test]
fn momo_failure_code_verifies_but_reports_failure() {
    let verification = momo().verify_callback(&momo_callback(100_000, 1006));
    assert!(verification.valid);
    assert!(!verification.success);
    assert_eq!(verification.result_code.as_deref(), Some("1006"));
}

#[test]
fn any_single_byte_signature_tamper_is_rejected() {
    let payload = momo_callback(100_000, 0);
    let good = payload.fields["signature"].as_str().unwrap().to_string();

    // Flip each hex digit of the signature in turn.
    for i in 0..good.len() {
        let mut tampered = good.clone().into_bytes();
        tampered[i] = if tampered[i] == b'0' { b'1' } else { b'0' };
        let mut fields = payload.fields.clone();
        fields["signature"] = json!(String::from_utf8(tampered).unwrap());
        let verification = momo().verify_callback(&CallbackPayload::new(fields));
        assert!(!verification.valid, "tamper at byte {i} must be rejected");
    }
}

#[test]
fn vnpay_sorted_query_signature_round_trips() {
    let pairs = vec![
        ("vnp_Amount".to_string(), "10000000".to_string()),
        ("vnp_ResponseCode".to_string(), "00".to_string()),
        ("vnp_TmnCode".to_string(), "TESTTMN".to_string()),
        ("vnp_TxnRef".to_string(), "intent-9".to_string()),
        ("vnp_TransactionNo".to_string(), "14422574".to_string()),
    ];
    let hash = hmac_sha512_hex("vnpaysecret", &canonical_query(&pairs));

    let mut fields = serde_json::Map::new();
    for (k, v) in &pairs {
        fields.insert(k.clone(), json!(v));
    }
    fields.insert("vnp_SecureHash".to_string(), json!(hash));

    let verification = vnpay().verify_callback(&CallbackPayload::new(json!(fields)));
    assert!(verification.valid);
    assert!(verification.success);
    // x100 wire amount decodes back to minor units.
    assert_eq!(verification.amount.unwrap().minor(), 100_000);
    assert_eq!(
        verification.provider_transaction_ref.as_deref(),
        Some("intent-9")
    );

    // Reordering fields must not matter: the signature is over the sorted
    // canonical form.
    let mut reordered = serde_json::Map::new();
    for (k, v) in pairs.iter().rev() {
        reordered.insert(k.clone(), json!(v));
    }
    reordered.insert("vnp_SecureHash".to_string(), json!(fields["vnp_SecureHash"]));
    assert!(vnpay()
        .verify_callback(&CallbackPayload::new(json!(reordered)))
        .valid);
}

#[test]
fn zalopay_mac_over_embedded_data_verifies() {
    let data = json!({
        "app_id": 2553,
        "app_trans_id": "240404_intent-3",
        "app_user": "user-7",
        "amount": 250_000,
        "zp_trans_id": 240404000000123i64,
    })
    .to_string();
    let mac = hmac_sha256_hex("zalokey2", &data);
    let payload = CallbackPayload::new(json!({"data": data, "mac": mac, "type": 1}));

    let verification = zalopay().verify_callback(&payload);
    assert!(verification.valid);
    assert!(verification.success);
    assert_eq!(verification.amount.unwrap().minor(), 250_000);
    assert_eq!(
        verification.provider_transaction_ref.as_deref(),
        Some("240404_intent-3")
    );
}

#[test]
fn verification_is_total_over_garbage_payloads() {
    // Malformed payloads produce valid=false, never a panic or error.
    let garbage = [
        json!({}),
        json!({"signature": "zzz"}),
        json!({"data": "not-json", "mac": "deadbeef"}),
        json!({"vnp_SecureHash": 42}),
        json!([1, 2, 3]),
        json!(null),
    ];
    for fields in garbage {
        let payload = CallbackPayload::new(fields);
        assert!(!momo().verify_callback(&payload).valid);
        assert!(!vnpay().verify_callback(&payload).valid);
        assert!(!zalopay().verify_callback(&payload).valid);
        assert!(!momo().verify_refund(&payload).valid);
        assert!(!vnpay().verify_refund(&payload).valid);
        assert!(!zalopay().verify_refund(&payload).valid);
    }
}
