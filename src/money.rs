// ===============================
// src/money.rs
// ===============================
//
// Currency-safe amounts:
// - Amount is a rust_decimal::Decimal, never a binary float.
// - Balances are summed at full precision; rounding to 2 dp happens only when
//   an instruction is emitted or a value is serialized for presentation.
// - SETTLE_EPSILON is the "settled / noise" threshold shared by the simplifier
//   and the gateway's split-sum check.
//
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

pub type Amount = Decimal;

/// Balances within this distance of zero are considered settled.
pub const SETTLE_EPSILON: Amount = dec!(0.01);

/// Fractional digits used for presentation and instruction amounts.
pub const PRESENTATION_DP: u32 = 2;

pub fn round2(a: Amount) -> Amount {
    let mut r = a.round_dp_with_strategy(PRESENTATION_DP, RoundingStrategy::MidpointAwayFromZero);
    // keep "-0.00" out of the output
    if r.is_zero() {
        r.set_sign_positive(true);
    }
    r.rescale(PRESENTATION_DP);
    r
}

/// Fixed 2-digit rendering, e.g. `50` -> `"50.00"`.
pub fn format2(a: Amount) -> String {
    round2(a).to_string()
}

/// Parse a user-facing amount ("12.5", "12.50").
pub fn parse_amount(s: &str) -> Option<Amount> {
    s.trim().parse::<Decimal>().ok()
}

/// Serde codec for presentation amounts: writes `"50.00"`, reads a string or a number.
pub mod serde_2dp {
    use super::{format2, Amount};
    use rust_decimal::prelude::FromPrimitive;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(a: &Amount, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format2(*a))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Amount, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal amount as string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                super::parse_amount(v).ok_or_else(|| E::custom(format!("invalid amount: {v}")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
                Amount::from_f64(v).ok_or_else(|| E::custom(format!("invalid amount: {v}")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                Ok(Amount::from(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount::from(v))
            }
        }

        d.deserialize_any(AmountVisitor)
    }
}
