use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of the remote cart, exactly as the store API returned it.
///
/// The session never edits a snapshot; it replaces it with the next one.
/// The accessors are read-only conveniences and read missing fields as
/// empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart(Value);

impl Cart {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Parse a response body into a snapshot.
    pub fn from_body(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body).map(Self)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn items(&self) -> &[Value] {
        self.array("items")
    }

    /// Find a line item by its cart key.
    pub fn item(&self, key: &str) -> Option<&Value> {
        self.items()
            .iter()
            .find(|item| item.get("key").and_then(Value::as_str) == Some(key))
    }

    /// Total quantity across line items.
    ///
    /// Uses the server's `items_count` when present.
    pub fn items_count(&self) -> u64 {
        self.0
            .get("items_count")
            .and_then(Value::as_u64)
            .unwrap_or_else(|| {
                self.items()
                    .iter()
                    .filter_map(|item| item.get("quantity").and_then(Value::as_u64))
                    .fold(0u64, u64::saturating_add)
            })
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn coupons(&self) -> Vec<&str> {
        self.array("coupons")
            .iter()
            .filter_map(|c| c.get("code").and_then(Value::as_str))
            .collect()
    }

    pub fn payment_methods(&self) -> Vec<&str> {
        self.array("payment_methods")
            .iter()
            .filter_map(Value::as_str)
            .collect()
    }

    pub fn needs_shipping(&self) -> bool {
        self.0
            .get("needs_shipping")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn totals(&self) -> CartTotals {
        self.0
            .get("totals")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn array(&self, field: &str) -> &[Value] {
        self.0
            .get(field)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Cart totals block.
///
/// Amounts are decimal strings in the currency's minor unit; a
/// `currency_minor_unit` of 2 means `"1999"` is 19.99.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    #[serde(default)]
    pub currency_code: String,
    #[serde(default)]
    pub currency_symbol: String,
    #[serde(default)]
    pub currency_minor_unit: u32,
    #[serde(default)]
    pub total_items: Option<String>,
    #[serde(default)]
    pub total_price: Option<String>,
    #[serde(default)]
    pub total_discount: Option<String>,
    #[serde(default)]
    pub total_shipping: Option<String>,
    #[serde(default)]
    pub total_tax: Option<String>,
}

/// Widest minor unit honoured; an `i64` amount has at most 19 digits
const MAX_MINOR_UNIT: u32 = 18;

impl CartTotals {
    /// Render a minor-unit amount as a decimal string.
    ///
    /// Returns `None` if `amount` is not an integer.
    pub fn format_amount(&self, amount: &str) -> Option<String> {
        let raw: i64 = amount.trim().parse().ok()?;
        let scale = self.currency_minor_unit.min(MAX_MINOR_UNIT);
        if scale == 0 {
            return Some(raw.to_string());
        }

        let sign = if raw < 0 { "-" } else { "" };
        let digits = raw.unsigned_abs().to_string();
        let scale = scale as usize;
        let padded = format!("{:0>width$}", digits, width = scale + 1);
        let (whole, frac) = padded.split_at(padded.len() - scale);
        Some(format!("{}{}.{}", sign, whole, frac))
    }

    /// The cart total formatted with its currency code.
    pub fn display_total(&self) -> Option<String> {
        let amount = self.format_amount(self.total_price.as_deref()?)?;
        if self.currency_code.is_empty() {
            Some(amount)
        } else {
            Some(format!("{} {}", amount, self.currency_code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Cart {
        Cart::new(json!({
            "items": [
                {"key": "abc", "id": 12, "quantity": 2},
                {"key": "def", "id": 15, "quantity": 1}
            ],
            "coupons": [{"code": "SPRING10"}],
            "payment_methods": ["stripe", "ppcp-gateway"],
            "needs_shipping": true,
            "totals": {
                "currency_code": "USD",
                "currency_symbol": "$",
                "currency_minor_unit": 2,
                "total_price": "4599",
                "total_discount": "500"
            }
        }))
    }

    #[test]
    fn test_item_accessors() {
        let cart = sample();
        assert_eq!(cart.items().len(), 2);
        assert_eq!(cart.items_count(), 3);
        assert_eq!(
            cart.item("def").and_then(|i| i.get("id")).and_then(Value::as_u64),
            Some(15)
        );
        assert!(cart.item("zzz").is_none());
    }

    #[test]
    fn test_server_items_count_wins() {
        let cart = Cart::new(json!({"items_count": 7, "items": []}));
        assert_eq!(cart.items_count(), 7);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_missing_fields_read_as_empty() {
        let cart = Cart::new(json!({}));
        assert!(cart.items().is_empty());
        assert!(cart.coupons().is_empty());
        assert!(cart.payment_methods().is_empty());
        assert!(!cart.needs_shipping());
        assert_eq!(cart.totals(), CartTotals::default());
    }

    #[test]
    fn test_coupons_and_payment_methods() {
        let cart = sample();
        assert_eq!(cart.coupons(), vec!["SPRING10"]);
        assert_eq!(cart.payment_methods(), vec!["stripe", "ppcp-gateway"]);
        assert!(cart.needs_shipping());
    }

    #[test]
    fn test_format_amount_scales_minor_units() {
        let totals = sample().totals();
        assert_eq!(totals.format_amount("4599").as_deref(), Some("45.99"));
        assert_eq!(totals.format_amount("5").as_deref(), Some("0.05"));
        assert_eq!(totals.format_amount("-250").as_deref(), Some("-2.50"));
        assert_eq!(totals.format_amount("n/a"), None);
        assert_eq!(totals.display_total().as_deref(), Some("45.99 USD"));
    }

    #[test]
    fn test_items_count_saturates_on_huge_quantities() {
        let cart = Cart::new(json!({
            "items": [{"quantity": u64::MAX}, {"quantity": 7}]
        }));
        assert_eq!(cart.items_count(), u64::MAX);
    }

    #[test]
    fn test_format_amount_caps_minor_unit() {
        let totals = CartTotals {
            currency_minor_unit: u32::MAX,
            ..CartTotals::default()
        };
        assert_eq!(
            totals.format_amount("5").as_deref(),
            Some("0.000000000000000005")
        );
    }

    #[test]
    fn test_format_amount_without_minor_unit() {
        let totals = CartTotals {
            currency_code: "JPY".into(),
            total_price: Some("1200".into()),
            ..CartTotals::default()
        };
        assert_eq!(totals.display_total().as_deref(), Some("1200 JPY"));
    }
}
