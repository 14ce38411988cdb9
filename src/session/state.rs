use crate::cart::Cart;

/// In-memory view of one cart session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartState {
    /// Last snapshot returned by the store API
    pub cart: Option<Cart>,

    /// Nonce required by the next mutation
    pub nonce: Option<String>,

    /// Token addressing the remote cart, mirrored in durable storage
    pub cart_token: Option<String>,

    /// Message of the most recent failed operation
    pub error: Option<String>,

    /// Last update timestamp this session wrote to durable storage
    pub last_written_update: Option<i64>,

    /// Operations currently awaiting a response
    pub(crate) in_flight: usize,
}

impl CartState {
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    pub(crate) fn begin(&mut self) {
        self.in_flight += 1;
        self.error = None;
    }

    pub(crate) fn finish(&mut self, error: Option<String>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.error = error;
    }

    /// Next update timestamp: wall-clock millis, kept strictly above the
    /// previous one this session wrote.
    pub(crate) fn next_update_stamp(&mut self, now_millis: i64) -> i64 {
        let stamp = match self.last_written_update {
            Some(last) if now_millis <= last => last + 1,
            _ => now_millis,
        };
        self.last_written_update = Some(stamp);
        stamp
    }

    /// Whether `value` is the update signal this session wrote last.
    pub(crate) fn is_own_update(&self, value: &str) -> bool {
        match (self.last_written_update, value.trim().parse::<i64>()) {
            (Some(own), Ok(seen)) => own == seen,
            _ => false,
        }
    }
}
