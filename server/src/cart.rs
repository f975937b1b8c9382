//! Folding a guest's cart into the signed-in user's cart after login.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: String,
    pub quantity: u32,
}

impl CartLine {
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}

/// Quantities for the same product are summed. The user's lines keep their
/// order; products only the guest had are appended in guest order.
pub fn merge_guest_cart(user_lines: &[CartLine], guest_lines: &[CartLine]) -> Vec<CartLine> {
    let mut merged: Vec<CartLine> = Vec::with_capacity(user_lines.len() + guest_lines.len());
    let mut index: HashMap<&str, usize> = HashMap::new();

    for line in user_lines.iter().chain(guest_lines) {
        match index.get(line.product_id.as_str()) {
            Some(&pos) => {
                merged[pos].quantity = merged[pos].quantity.saturating_add(line.quantity);
            }
            None => {
                index.insert(line.product_id.as_str(), merged.len());
                merged.push(line.clone());
            }
        }
    }
    merged
}
