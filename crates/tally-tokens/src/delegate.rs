//! Refill progress callbacks.

use std::time::Duration;

/// Observer of a refill cycle. Every method defaults to a no-op.
pub trait RefillDelegate: Send + Sync {
    fn on_did_refill_unblinded_tokens(&self) {}

    fn on_failed_to_refill_unblinded_tokens(&self) {}

    /// The issuer holds the tokens until `captcha_id` is solved. The next
    /// refill picks the same batch up again.
    fn on_captcha_required_to_refill_unblinded_tokens(&self, _captcha_id: &str) {}

    fn on_will_retry_refilling_unblinded_tokens(&self, _delay: Duration) {}

    fn on_did_retry_refilling_unblinded_tokens(&self) {}
}
