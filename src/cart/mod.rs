mod endpoint;
mod snapshot;

pub(crate) use endpoint::{
    AddItemBody, CouponBody, ItemKeyBody, ShippingRateBody, UpdateItemBody, to_body,
};
pub use endpoint::{CartEndpoint, VariationAttribute};
pub use snapshot::{Cart, CartTotals};
