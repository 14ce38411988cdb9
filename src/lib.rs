//! Client-side session manager for a WooCommerce Store API cart.
//!
//! A [`CartSession`] holds the latest cart snapshot, the rotating nonce and
//! the durable cart token, routes every mutation through one call contract
//! and keeps sibling sessions in step through a shared [`DurableStore`].

pub mod builder;
pub mod cart;
pub mod config;
pub mod error;
pub mod event;
pub mod session;
pub mod storage;
pub mod transport;

pub use builder::CartSessionBuilder;
pub use cart::{Cart, CartEndpoint, CartTotals, VariationAttribute};
pub use config::StoreConfig;
pub use error::CartError;
pub use event::{Event, EventSender};
pub use session::{
    CART_TOKEN_HEADER, CartSession, CartState, NONCE_HEADER, NONCE_RESPONSE_HEADERS, SyncHandle,
};
pub use storage::{DurableStore, LAST_UPDATE_KEY, MemoryStore, SqliteStore, StorageChange, TOKEN_KEY};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
