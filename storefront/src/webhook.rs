//! Payment webhook verification and reconciliation.
//!
//! The gateway calls back outside any user session, so the HMAC signature
//! over the raw body is the only authorization check. Once verified, the
//! event is matched to an order by the payment reference stored at intent
//! creation and applied as a plain status assignment, which keeps redelivery
//! idempotent.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::model::PaymentStatus;
use crate::order_storage::OrderStorage;

/// Signature verification for gateway webhook deliveries.
///
/// Scheme: the gateway sends `t=<unix-seconds>,v1=<hex hmac>` and signs
/// `"{t}.{raw body}"` with HMAC-SHA256 under the shared webhook secret.
/// Several `v1` candidates may be present during secret rotation.
pub mod signature {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use crate::error::StoreError;

    type HmacSha256 = Hmac<Sha256>;

    /// How far a delivery's timestamp may drift before it is refused.
    pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

    #[derive(Debug)]
    pub struct SignatureHeader {
        pub timestamp: i64,
        pub candidates: Vec<String>,
    }

    pub fn parse_header(header: &str) -> Result<SignatureHeader, StoreError> {
        let mut timestamp = None;
        let mut candidates = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        StoreError::Authenticity("non-numeric timestamp".to_string())
                    })?)
                }
                "v1" => candidates.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| StoreError::Authenticity("missing timestamp".to_string()))?;
        if candidates.is_empty() {
            return Err(StoreError::Authenticity("missing v1 signature".to_string()));
        }

        Ok(SignatureHeader {
            timestamp,
            candidates,
        })
    }

    /// Compute the hex signature for a payload. Used by tests and local
    /// gateway stubs to produce deliveries this module will accept.
    pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify a delivery against the raw, unmodified request body.
    ///
    /// Rejects stale timestamps, then checks each `v1` candidate with a
    /// constant-time comparison. Any failure means the event must be
    /// discarded without touching state.
    pub fn verify(
        secret: &str,
        header: &str,
        body: &[u8],
        tolerance_secs: i64,
        now_unix: i64,
    ) -> Result<(), StoreError> {
        let parsed = parse_header(header)?;

        if (now_unix - parsed.timestamp).abs() > tolerance_secs {
            return Err(StoreError::Authenticity(
                "timestamp outside tolerance".to_string(),
            ));
        }

        for candidate in &parsed.candidates {
            let Ok(bytes) = hex::decode(candidate) else {
                continue;
            };
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .expect("hmac accepts any key length");
            mac.update(parsed.timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(body);
            if mac.verify_slice(&bytes).is_ok() {
                return Ok(());
            }
        }

        Err(StoreError::Authenticity("no signature matched".to_string()))
    }
}

/// A gateway event envelope. Only the fields the storefront acts on are
/// modelled; everything else in the payload is ignored. The `data` leg is
/// fully optional: the gateway sends many event kinds whose objects carry
/// no `id` at all, and those must still parse and be acknowledged.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub object: EventObject,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventObject {
    /// The charge-intent reference, matched against `orders.payment_reference`.
    /// Only required for the two charge event kinds the storefront handles.
    pub id: Option<String>,
}

impl GatewayEvent {
    /// Parse a verified raw body. A body that does not fit the envelope is
    /// treated like a forged delivery: rejected, nothing mutated.
    pub fn from_body(body: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(body)
            .map_err(|e| StoreError::Authenticity(format!("malformed event payload: {e}")))
    }
}

/// What a verified event asks the ledger to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Charge settled: mark paid and confirm the order.
    ChargeSucceeded { reference: String },
    /// Charge failed: record the failed payment leg only.
    ChargeFailed { reference: String },
    /// Event kinds the storefront does not care about; acknowledged as-is.
    Ignored,
}

pub fn classify(event: &GatewayEvent) -> Reconciliation {
    let reference = event.data.object.id.clone();
    match (event.kind.as_str(), reference) {
        ("payment_intent.succeeded", Some(reference)) => {
            Reconciliation::ChargeSucceeded { reference }
        }
        ("payment_intent.payment_failed", Some(reference)) => {
            Reconciliation::ChargeFailed { reference }
        }
        _ => Reconciliation::Ignored,
    }
}

/// Apply a verified event to the ledger.
///
/// An unmatched reference is logged as an anomaly but still acknowledged,
/// otherwise the gateway would redeliver an event we can never apply.
pub async fn apply_event(storage: &OrderStorage, event: &GatewayEvent) -> Result<(), StoreError> {
    match classify(event) {
        Reconciliation::ChargeSucceeded { reference } => {
            let touched = storage.mark_paid_by_reference(&reference).await?;
            if touched == 0 {
                log_unapplied(storage, event, &reference, PaymentStatus::Paid).await?;
            } else {
                info!("Payment succeeded for reference {}", reference);
            }
        }
        Reconciliation::ChargeFailed { reference } => {
            let touched = storage.mark_failed_by_reference(&reference).await?;
            if touched == 0 {
                log_unapplied(storage, event, &reference, PaymentStatus::Failed).await?;
            } else {
                info!("Payment failed for reference {}", reference);
            }
        }
        Reconciliation::Ignored => {
            debug!("Ignoring event kind {}", event.kind);
        }
    }
    Ok(())
}

/// A charge event matched nothing. Distinguish a reference no order has ever
/// stored (possible integration bug, worth alerting on) from an order whose
/// payment status is already terminal (redelivery noise).
async fn log_unapplied(
    storage: &OrderStorage,
    event: &GatewayEvent,
    reference: &str,
    target: PaymentStatus,
) -> Result<(), StoreError> {
    match storage.payment_status_by_reference(reference).await? {
        None => warn!(
            event_id = %event.id,
            reference = %reference,
            "charge event matched no order"
        ),
        Some(current) if !current.can_transition_to(target) => warn!(
            event_id = %event.id,
            reference = %reference,
            current = current.as_str(),
            "charge event ignored; payment status is terminal"
        ),
        Some(current) => warn!(
            event_id = %event.id,
            reference = %reference,
            current = current.as_str(),
            "charge event not applied"
        ),
    }
    Ok(())
}
