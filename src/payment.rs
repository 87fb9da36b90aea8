// ===============================
// src/payment.rs (settlement confirmation)
// ===============================
//
// A payment provider calls back with (order_id, payment_id, signature). The
// signature is hex(HMAC-SHA256(secret, "{order_id}|{payment_id}")). Only a
// verified callback turns into a recorded settlement; the payment id doubles as
// the settlement's dedup reference.
//
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::CacheBackend;
use crate::domain::{GroupId, MemberId};
use crate::gateway::{GatewayError, MutationGateway, NewSettlement, Recorded};
use crate::metrics::PAYMENT_CONFIRMATIONS;
use crate::money::Amount;
use crate::store::LedgerStore;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment confirmation is not configured")]
    NotConfigured,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("signature is not valid hex")]
    MalformedSignature(#[from] hex::FromHexError),
    #[error(transparent)]
    Ledger(#[from] GatewayError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfirmation {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
    pub group: GroupId,
    pub payer: MemberId,
    pub payee: MemberId,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Amount,
}

fn mac_for(secret: &str, order_id: &str, payment_id: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    mac
}

/// Hex signature a provider would send for this order/payment pair.
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> String {
    hex::encode(mac_for(secret, order_id, payment_id).finalize().into_bytes())
}

/// Constant-time check of a provider signature.
pub fn verify_signature(
    secret: &str,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> Result<(), PaymentError> {
    let expected = hex::decode(signature.trim())?;
    mac_for(secret, order_id, payment_id)
        .verify_slice(&expected)
        .map_err(|_| PaymentError::InvalidSignature)
}

/// Verify the callback and record the settlement through the gateway.
pub async fn confirm<S: LedgerStore, B: CacheBackend>(
    gateway: &MutationGateway<S, B>,
    secret: Option<&str>,
    c: PaymentConfirmation,
) -> Result<Recorded, PaymentError> {
    let res = confirm_inner(gateway, secret, c).await;
    let outcome = match &res {
        Ok(Recorded::New(_)) => "recorded",
        Ok(Recorded::Duplicate(_)) => "duplicate",
        Err(PaymentError::NotConfigured) => "not_configured",
        Err(PaymentError::InvalidSignature) | Err(PaymentError::MalformedSignature(_)) => "bad_signature",
        Err(PaymentError::Ledger(_)) => "rejected",
    };
    PAYMENT_CONFIRMATIONS.with_label_values(&[outcome]).inc();
    res
}

async fn confirm_inner<S: LedgerStore, B: CacheBackend>(
    gateway: &MutationGateway<S, B>,
    secret: Option<&str>,
    c: PaymentConfirmation,
) -> Result<Recorded, PaymentError> {
    let secret = secret.ok_or(PaymentError::NotConfigured)?;
    if let Err(e) = verify_signature(secret, &c.order_id, &c.payment_id, &c.signature) {
        warn!(order = %c.order_id, payment = %c.payment_id, error = %e, "payment signature rejected");
        return Err(e);
    }
    info!(order = %c.order_id, payment = %c.payment_id, "payment signature verified");
    let recorded = gateway
        .record_settlement(NewSettlement {
            group: c.group,
            payer: c.payer,
            payee: c.payee,
            amount: c.amount,
            external_ref: c.payment_id,
        })
        .await?;
    Ok(recorded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BalanceCache, CacheCfg, MemoryBackend};
    use crate::gateway::NewGroup;
    use crate::store::InMemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const SECRET: &str = "whsec_test";

    #[test]
    fn signature_round_trip() {
        let sig = sign(SECRET, "order_1", "pay_1");
        assert_eq!(sig.len(), 64);
        assert!(verify_signature(SECRET, "order_1", "pay_1", &sig).is_ok());
    }

    #[test]
    fn tampered_or_malformed_signature_fails() {
        let sig = sign(SECRET, "order_1", "pay_1");
        assert!(matches!(
            verify_signature(SECRET, "order_1", "pay_2", &sig),
            Err(PaymentError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature("other", "order_1", "pay_1", &sig),
            Err(PaymentError::InvalidSignature)
        ));
        assert!(matches!(
            verify_signature(SECRET, "order_1", "pay_1", "zz"),
            Err(PaymentError::MalformedSignature(_))
        ));
    }

    async fn gateway_with_group() -> (MutationGateway<InMemoryStore, MemoryBackend>, GroupId) {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(BalanceCache::new(MemoryBackend::new(), CacheCfg::default()));
        let gw = MutationGateway::new(store, cache);
        let g = gw
            .create_group(NewGroup {
                name: "flat".into(),
                creator: "A".into(),
                members: vec!["B".into()],
                simplify_debts: true,
            })
            .await
            .unwrap();
        (gw, g.id)
    }

    fn confirmation(group: &GroupId, signature: String) -> PaymentConfirmation {
        PaymentConfirmation {
            order_id: "order_1".into(),
            payment_id: "pay_1".into(),
            signature,
            group: group.clone(),
            payer: "B".into(),
            payee: "A".into(),
            amount: dec!(30),
        }
    }

    #[tokio::test]
    async fn verified_confirmation_records_once() {
        let (gw, g) = gateway_with_group().await;
        let sig = sign(SECRET, "order_1", "pay_1");

        let first = confirm(&gw, Some(SECRET), confirmation(&g, sig.clone())).await.unwrap();
        assert!(matches!(first, Recorded::New(_)));
        assert_eq!(first.transaction().external_ref, "pay_1");

        let again = confirm(&gw, Some(SECRET), confirmation(&g, sig)).await.unwrap();
        assert!(matches!(again, Recorded::Duplicate(_)));
    }

    #[tokio::test]
    async fn unverified_confirmation_writes_nothing() {
        let (gw, g) = gateway_with_group().await;
        let bad = sign("wrong", "order_1", "pay_1");
        assert!(matches!(
            confirm(&gw, Some(SECRET), confirmation(&g, bad)).await,
            Err(PaymentError::InvalidSignature)
        ));
        assert!(matches!(
            confirm(&gw, None, confirmation(&g, String::new())).await,
            Err(PaymentError::NotConfigured)
        ));
        let snap = gw.store().snapshot(&g).await.unwrap().unwrap();
        assert!(snap.settlements.is_empty());
    }
}
