use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store API routes, relative to the configured base URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CartEndpoint {
    Cart,
    AddItem,
    UpdateItem,
    RemoveItem,
    ApplyCoupon,
    RemoveCoupon,
    UpdateCustomer,
    SelectShippingRate,
    Checkout,
    /// Any other sub-path, e.g. `cart/extensions`
    Custom(String),
}

impl CartEndpoint {
    pub fn path(&self) -> &str {
        match self {
            Self::Cart => "cart",
            Self::AddItem => "cart/add-item",
            Self::UpdateItem => "cart/update-item",
            Self::RemoveItem => "cart/remove-item",
            Self::ApplyCoupon => "cart/apply-coupon",
            Self::RemoveCoupon => "cart/remove-coupon",
            Self::UpdateCustomer => "cart/update-customer",
            Self::SelectShippingRate => "cart/select-shipping-rate",
            Self::Checkout => "checkout",
            Self::Custom(path) => path.trim_start_matches('/'),
        }
    }

    /// Join this route onto a base URL, tolerating a trailing slash.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.path())
    }

    /// Whether a successful response body is a cart snapshot.
    ///
    /// Checkout answers with an order instead.
    pub fn returns_cart(&self) -> bool {
        !matches!(self, Self::Checkout)
    }
}

impl std::fmt::Display for CartEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// One attribute choice for a variable product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationAttribute {
    pub attribute: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AddItemBody {
    pub id: u64,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub variation: Vec<VariationAttribute>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct UpdateItemBody<'a> {
    pub key: &'a str,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ItemKeyBody<'a> {
    pub key: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CouponBody<'a> {
    pub code: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ShippingRateBody<'a> {
    pub package_id: u32,
    pub rate_id: &'a str,
}

pub(crate) fn to_body<T: Serialize>(body: &T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(body)?)
}
