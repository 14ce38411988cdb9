mod manager;
mod state;
mod sync;

pub use manager::{CART_TOKEN_HEADER, CartSession, NONCE_HEADER, NONCE_RESPONSE_HEADERS};
pub use state::CartState;
pub use sync::SyncHandle;
