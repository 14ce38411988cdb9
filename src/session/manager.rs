use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, anyhow};
use chrono::Utc;
use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::CartState;
use crate::builder::CartSessionBuilder;
use crate::cart::{
    AddItemBody, Cart, CartEndpoint, CouponBody, ItemKeyBody, ShippingRateBody, UpdateItemBody,
    VariationAttribute, to_body,
};
use crate::error::CartError;
use crate::event::{Event, EventSender};
use crate::storage::{DurableStore, LAST_UPDATE_KEY, TOKEN_KEY};
use crate::transport::{HttpRequest, HttpResponse, Method, Transport};

/// Request header carrying the mutation nonce
pub const NONCE_HEADER: &str = "Nonce";

/// Response headers that may carry the rotated nonce, in lookup order
pub const NONCE_RESPONSE_HEADERS: &[&str] = &["Nonce", "X-WC-Store-API-Nonce", "X-WP-Nonce"];

/// Request and response header carrying the cart token
pub const CART_TOKEN_HEADER: &str = "Cart-Token";

/// Shorten a secret for log output.
fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    format!("{}...", prefix)
}

/// Pull a human-readable message out of a failed response.
///
/// Store API errors are JSON objects with a `message` field; anything else
/// falls back to the raw body, then to the status code.
fn error_message(response: &HttpResponse) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(&response.body) {
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    let raw = response.body.trim();
    if raw.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        raw.to_string()
    }
}

/// Decode a successful response body.
///
/// An empty body reads as `null`; routes that answer with a cart must
/// return a JSON object.
fn parse_body(response: &HttpResponse, endpoint: &CartEndpoint) -> Result<Value, CartError> {
    let value: Value = if response.body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&response.body)
            .with_context(|| format!("store API returned invalid JSON for {}", endpoint))?
    };
    if endpoint.returns_cart() && !value.is_object() {
        return Err(CartError::Internal(anyhow!(
            "store API returned a non-object cart for {}",
            endpoint
        )));
    }
    Ok(value)
}

/// Client-side session for one remote cart.
///
/// Holds the latest cart snapshot, the rotating nonce and the cart token,
/// and funnels every mutation through [`call`](Self::call). Construct it
/// with [`CartSession::builder()`] and share it behind an `Arc`.
///
/// # Example
///
/// ```no_run
/// # use cart_session::CartSession;
/// # async fn example() -> Result<(), cart_session::CartError> {
/// let session = CartSession::builder()
///     .base_url("https://shop.example/wp-json/wc/store/v1")
///     .sqlite_store()?
///     .build()?;
///
/// session.initialize().await?;
/// let cart = session.add_item(42, 1, vec![]).await?;
/// println!("{} items", cart.items_count());
/// # Ok(())
/// # }
/// ```
pub struct CartSession {
    pub(crate) id: String,
    base_url: String,
    transport: Box<dyn Transport>,
    pub(crate) store: Arc<dyn DurableStore>,
    pub(crate) events: EventSender,
    state: Mutex<CartState>,
    /// Single-flight gate: one mutation in flight per session
    mutation_gate: tokio::sync::Mutex<()>,
    pub(crate) sync_task: Mutex<Option<AbortHandle>>,
}

impl CartSession {
    pub(crate) fn from_parts(
        base_url: String,
        transport: Box<dyn Transport>,
        store: Arc<dyn DurableStore>,
        events: EventSender,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            base_url,
            transport,
            store,
            events,
            state: Mutex::new(CartState::default()),
            mutation_gate: tokio::sync::Mutex::new(()),
            sync_task: Mutex::new(None),
        }
    }

    /// Create a new builder for configuring a `CartSession`.
    pub fn builder() -> CartSessionBuilder {
        CartSessionBuilder::new()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, CartState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current session state.
    pub fn state(&self) -> CartState {
        self.lock_state().clone()
    }

    pub fn cart(&self) -> Option<Cart> {
        self.lock_state().cart.clone()
    }

    pub fn nonce(&self) -> Option<String> {
        self.lock_state().nonce.clone()
    }

    pub fn cart_token(&self) -> Option<String> {
        self.lock_state().cart_token.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.lock_state().is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.lock_state().error.clone()
    }

    /// Load the persisted token, then fetch the cart and a fresh nonce.
    ///
    /// A rejected token is discarded so the next attempt starts a fresh
    /// cart. No retry happens here.
    pub async fn initialize(&self) -> Result<(), CartError> {
        let token = match self.store.get(TOKEN_KEY).await {
            Ok(token) => token,
            Err(e) => {
                let err = CartError::Storage(format!("failed to read cart token: {:#}", e));
                self.record_failure(&err);
                return Err(err);
            }
        };
        self.lock_state().cart_token = token.clone();

        self.lock_state().begin();
        let outcome = self.fetch_cart(token).await;
        self.finish(outcome.as_ref().err());
        outcome
    }

    async fn fetch_cart(&self, token: Option<String>) -> Result<(), CartError> {
        let url = CartEndpoint::Cart.url(&self.base_url);
        let mut request = HttpRequest::new(Method::Get, url);
        if let Some(ref token) = token {
            request = request.header(CART_TOKEN_HEADER, token.as_str());
        }

        debug!(session = %self.id, has_token = token.is_some(), "fetching cart");

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| CartError::Transport(format!("{:#}", e)))?;

        if !response.is_success() {
            return Err(self.fail_response(&response, token.is_some()).await);
        }

        // Headers are honoured even when the body turns out unusable
        let nonce = response.first_header(NONCE_RESPONSE_HEADERS).map(str::to_string);
        self.lock_state().nonce = nonce.clone();
        if let Some(new_token) = response.header(CART_TOKEN_HEADER) {
            self.persist_token(new_token).await;
        }

        let cart = Cart::new(parse_body(&response, &CartEndpoint::Cart)?);
        let items_count = cart.items_count();
        self.lock_state().cart = Some(cart);

        if nonce.is_none() {
            warn!(session = %self.id, "cart response carried no nonce header");
            return Err(CartError::MissingNonceInResponse);
        }

        info!(session = %self.id, items_count, "cart initialized");
        self.events.emit(Event::CartUpdated { items_count });
        Ok(())
    }

    /// Send a mutation to the store API.
    ///
    /// Requires a nonce; without one this fails before any request is made.
    /// On success the cart snapshot (for cart routes), the nonce and the
    /// token are replaced from the response and other sessions are
    /// signalled. Mutations on one session run one at a time.
    ///
    /// Returns the response body.
    pub async fn call(
        &self,
        endpoint: CartEndpoint,
        method: Method,
        body: Option<Value>,
    ) -> Result<Value, CartError> {
        let _gate = self.mutation_gate.lock().await;

        let (nonce, token) = {
            let state = self.lock_state();
            (state.nonce.clone(), state.cart_token.clone())
        };
        let Some(nonce) = nonce else {
            warn!(session = %self.id, endpoint = %endpoint, "mutation attempted without a nonce");
            let err = CartError::MissingNonce;
            self.record_failure(&err);
            return Err(err);
        };

        self.lock_state().begin();
        let outcome = self.send_mutation(&endpoint, method, body, nonce, token).await;
        self.finish(outcome.as_ref().err());
        outcome
    }

    async fn send_mutation(
        &self,
        endpoint: &CartEndpoint,
        method: Method,
        body: Option<Value>,
        nonce: String,
        token: Option<String>,
    ) -> Result<Value, CartError> {
        let mut request = HttpRequest::new(method, endpoint.url(&self.base_url))
            .header(NONCE_HEADER, nonce.as_str());
        if let Some(ref token) = token {
            request = request.header(CART_TOKEN_HEADER, token.as_str());
        }
        if let Some(body) = body {
            let json = serde_json::to_string(&body).context("failed to serialize request body")?;
            request = request.json_body(json);
        }

        debug!(session = %self.id, %method, endpoint = %endpoint, "sending mutation");

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| CartError::Transport(format!("{:#}", e)))?;

        if !response.is_success() {
            return Err(self.fail_response(&response, token.is_some()).await);
        }

        // The server applied the mutation: keep its nonce and token before
        // looking at the body
        match response.first_header(NONCE_RESPONSE_HEADERS) {
            Some(new_nonce) => self.lock_state().nonce = Some(new_nonce.to_string()),
            None => {
                // Keep the previous nonce; it may still be accepted
                warn!(session = %self.id, endpoint = %endpoint, "mutation response carried no nonce header, keeping previous nonce");
                self.events.emit(Event::Warning {
                    message: format!("{} response carried no nonce; reusing the previous one", endpoint),
                });
            }
        }
        if let Some(new_token) = response.header(CART_TOKEN_HEADER) {
            self.persist_token(new_token).await;
        }

        let value = parse_body(&response, endpoint);
        if let Ok(ref value) = value {
            if endpoint.returns_cart() {
                self.lock_state().cart = Some(Cart::new(value.clone()));
            }
        }
        self.signal_update().await;
        let value = value?;

        let items_count = self
            .lock_state()
            .cart
            .as_ref()
            .map(Cart::items_count)
            .unwrap_or(0);
        info!(session = %self.id, endpoint = %endpoint, items_count, "mutation applied");
        self.events.emit(Event::CartUpdated { items_count });
        Ok(value)
    }

    /// Turn a non-2xx response into an error, discarding a rejected token.
    async fn fail_response(&self, response: &HttpResponse, token_sent: bool) -> CartError {
        let status = response.status;
        let message = error_message(response);

        if token_sent && response.is_auth_failure() {
            warn!(session = %self.id, status, "cart token rejected, discarding it");
            self.discard_token(status).await;
            CartError::Unauthorized { status, message }
        } else {
            warn!(session = %self.id, status, message = %message, "store API request failed");
            CartError::Http { status, message }
        }
    }

    async fn persist_token(&self, token: &str) {
        let changed = {
            let mut state = self.lock_state();
            let changed = state.cart_token.as_deref() != Some(token);
            state.cart_token = Some(token.to_string());
            changed
        };

        if let Err(e) = self.store.set(TOKEN_KEY, token).await {
            warn!(session = %self.id, error = %e, "failed to persist cart token");
            self.events.emit(Event::Warning {
                message: format!("cart token could not be persisted: {}", e),
            });
        }

        if changed {
            debug!(session = %self.id, token = %redact(token), "stored new cart token");
            self.events.emit(Event::TokenIssued);
        }
    }

    async fn discard_token(&self, status: u16) {
        self.lock_state().cart_token = None;
        if let Err(e) = self.store.remove(TOKEN_KEY).await {
            warn!(session = %self.id, error = %e, "failed to remove cart token from storage");
        }
        self.events.emit(Event::TokenDiscarded { status });
    }

    /// Write a fresh update timestamp so other sessions refetch.
    async fn signal_update(&self) {
        let stamp = self
            .lock_state()
            .next_update_stamp(Utc::now().timestamp_millis());

        if let Err(e) = self.store.set(LAST_UPDATE_KEY, &stamp.to_string()).await {
            warn!(session = %self.id, error = %e, "failed to signal cart update");
        }
    }

    fn record_failure(&self, err: &CartError) {
        self.lock_state().error = Some(err.to_string());
        self.events.emit(Event::Error {
            message: err.to_string(),
        });
    }

    fn finish(&self, err: Option<&CartError>) {
        self.lock_state().finish(err.map(ToString::to_string));
        if let Some(err) = err {
            self.events.emit(Event::Error {
                message: err.to_string(),
            });
        }
    }

    async fn cart_call(&self, endpoint: CartEndpoint, body: Value) -> Result<Cart, CartError> {
        let value = self.call(endpoint, Method::Post, Some(body)).await?;
        Ok(Cart::new(value))
    }

    /// Add a product (or one variation of it) to the cart.
    ///
    /// Emits [`Event::CartPanelRequested`] on success.
    pub async fn add_item(
        &self,
        product_id: u64,
        quantity: u32,
        variation: Vec<VariationAttribute>,
    ) -> Result<Cart, CartError> {
        let body = to_body(&AddItemBody {
            id: product_id,
            quantity,
            variation,
        })?;
        let cart = self.cart_call(CartEndpoint::AddItem, body).await?;
        self.events.emit(Event::CartPanelRequested);
        Ok(cart)
    }

    pub async fn update_item(&self, key: &str, quantity: u32) -> Result<Cart, CartError> {
        let body = to_body(&UpdateItemBody { key, quantity })?;
        self.cart_call(CartEndpoint::UpdateItem, body).await
    }

    pub async fn remove_item(&self, key: &str) -> Result<Cart, CartError> {
        let body = to_body(&ItemKeyBody { key })?;
        self.cart_call(CartEndpoint::RemoveItem, body).await
    }

    pub async fn apply_coupon(&self, code: &str) -> Result<Cart, CartError> {
        let body = to_body(&CouponBody { code })?;
        self.cart_call(CartEndpoint::ApplyCoupon, body).await
    }

    pub async fn remove_coupon(&self, code: &str) -> Result<Cart, CartError> {
        let body = to_body(&CouponBody { code })?;
        self.cart_call(CartEndpoint::RemoveCoupon, body).await
    }

    /// Update billing and/or shipping address.
    ///
    /// `customer` is passed through, e.g.
    /// `{"billing_address": {...}, "shipping_address": {...}}`.
    pub async fn update_customer(&self, customer: Value) -> Result<Cart, CartError> {
        self.cart_call(CartEndpoint::UpdateCustomer, customer).await
    }

    pub async fn select_shipping_rate(
        &self,
        package_id: u32,
        rate_id: &str,
    ) -> Result<Cart, CartError> {
        let body = to_body(&ShippingRateBody {
            package_id,
            rate_id,
        })?;
        self.cart_call(CartEndpoint::SelectShippingRate, body).await
    }

    /// Place the order. Returns the order JSON; the cart snapshot is left
    /// as it was.
    pub async fn checkout(&self, payload: Value) -> Result<Value, CartError> {
        self.call(CartEndpoint::Checkout, Method::Post, Some(payload))
            .await
    }

    /// Forget the cart: drop the snapshot and nonce and remove the stored
    /// token. The remote cart is untouched.
    pub async fn reset(&self) -> Result<(), CartError> {
        {
            let mut state = self.lock_state();
            state.cart = None;
            state.nonce = None;
            state.cart_token = None;
            state.error = None;
        }
        self.store
            .remove(TOKEN_KEY)
            .await
            .map_err(|e| CartError::Storage(format!("failed to remove cart token: {:#}", e)))?;
        info!(session = %self.id, "cart session reset");
        Ok(())
    }
}

impl std::fmt::Debug for CartSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartSession")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("transport", &self.transport.name())
            .finish()
    }
}
