//! Payment-provider port (SPEC_FULL.md §B).
//!
//! spec.md §1 puts "the payment-provider webhook parser" out of scope --
//! this crate never decodes a provider webhook body itself. What it owns
//! are the two outbound calls the purchase and withdrawal sagas need
//! (create a payment intent, issue a payout) plus the already-parsed shape
//! of the late asynchronous events (`PayoutEvent`) §4.8 reacts to; the
//! `/webhooks/stripe` handler (src/api/purchases.rs) is responsible for
//! turning a provider payload into a `PayoutEvent` before it ever reaches
//! this port's callers.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub client_secret: String,
    pub provider_reference: String,
}

#[derive(Debug, Clone)]
pub struct Payout {
    pub provider_reference: String,
}

/// Late asynchronous events from the payment provider that resolve
/// pending-at-provider withdrawals (spec.md §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PayoutEvent {
    Paid { payout_reference: String },
    Failed { payout_reference: String },
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Used by the purchase flow (§6 `/purchases`), out of this spec's core
    /// but needed to stand the HTTP surface up end to end.
    async fn create_intent(
        &self,
        amount_minor: i64,
        reference: &str,
    ) -> anyhow::Result<PaymentIntent>;

    /// Used by the withdrawal-processing saga (spec.md §4.8 step 3).
    async fn issue_payout(&self, amount: Decimal, reference: &str) -> anyhow::Result<Payout>;
}

/// Production adapter over a generic REST payment API, generalizing the
/// teacher's `reqwest`-based scraper clients (e.g. `hashdive_api.rs`) from
/// GET-only market-data polling to authenticated POST calls.
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentProvider {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_intent(
        &self,
        amount_minor: i64,
        reference: &str,
    ) -> anyhow::Result<PaymentIntent> {
        #[derive(Serialize)]
        struct Req<'a> {
            amount: i64,
            reference: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            client_secret: String,
            id: String,
        }

        let resp: Resp = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Req {
                amount: amount_minor,
                reference,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(PaymentIntent {
            client_secret: resp.client_secret,
            provider_reference: resp.id,
        })
    }

    async fn issue_payout(&self, amount: Decimal, reference: &str) -> anyhow::Result<Payout> {
        #[derive(Serialize)]
        struct Req<'a> {
            amount: String,
            reference: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            id: String,
        }

        let resp: Resp = self
            .client
            .post(format!("{}/v1/payouts", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Req {
                amount: amount.to_string(),
                reference,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(Payout {
            provider_reference: resp.id,
        })
    }
}

/// Fake used by withdrawal-saga unit tests; `fail_payouts` lets a test
/// exercise the step-3-failure compensation path (spec.md §4.8 step 6).
#[cfg(any(test, feature = "test-fakes"))]
pub mod fake {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub struct FakePaymentProvider {
        pub fail_payouts: AtomicBool,
    }

    impl Default for FakePaymentProvider {
        fn default() -> Self {
            Self {
                fail_payouts: AtomicBool::new(false),
            }
        }
    }

    impl FakePaymentProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_fail_payouts(&self, fail: bool) {
            self.fail_payouts.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PaymentProvider for FakePaymentProvider {
        async fn create_intent(
            &self,
            _amount_minor: i64,
            reference: &str,
        ) -> anyhow::Result<PaymentIntent> {
            Ok(PaymentIntent {
                client_secret: format!("secret_{reference}"),
                provider_reference: format!("pi_{reference}"),
            })
        }

        async fn issue_payout(&self, _amount: Decimal, reference: &str) -> anyhow::Result<Payout> {
            if self.fail_payouts.load(Ordering::SeqCst) {
                anyhow::bail!("payout provider unavailable");
            }
            Ok(Payout {
                provider_reference: format!("po_{reference}"),
            })
        }
    }
}
