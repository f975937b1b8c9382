//! Card validation for the mock checkout. No money moves here.

use serde::Serialize;
use uuid::Uuid;

const MIN_CARD_DIGITS: usize = 13;
const MAX_CARD_DIGITS: usize = 19;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub success: bool,
    pub message: String,
    pub transaction_id: Option<String>,
}

fn normalize(card_number: &str) -> String {
    card_number
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect()
}

fn luhn_ok(digits: &str) -> bool {
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

/// Spaces and dashes are ignored. Then 13 to 19 digits passing the Luhn
/// checksum.
pub fn validate_card_number(card_number: &str) -> bool {
    let digits = normalize(card_number);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if !(MIN_CARD_DIGITS..=MAX_CARD_DIGITS).contains(&digits.len()) {
        return false;
    }
    luhn_ok(&digits)
}

fn last_four(card_number: &str) -> String {
    let digits = normalize(card_number);
    let start = digits.len().saturating_sub(4);
    digits.get(start..).unwrap_or_default().to_string()
}

pub fn process_payment(card_number: &str, amount_cents: u64) -> PaymentResult {
    tracing::info!(
        amount_cents,
        card_last4 = %last_four(card_number),
        "processing payment"
    );

    if !validate_card_number(card_number) {
        return PaymentResult {
            success: false,
            message: "Invalid card number".to_string(),
            transaction_id: None,
        };
    }

    let transaction_id = Uuid::new_v4().to_string();
    tracing::info!(%transaction_id, "payment accepted");
    PaymentResult {
        success: true,
        message: "Payment processed successfully".to_string(),
        transaction_id: Some(transaction_id),
    }
}
