//! The traded product. Coinbase calls this a `product_id`, e.g. `"BTC-USD"`.
//!
//! Multi-symbol support is a non-goal (see spec.md §1): this crate only ever
//! quotes [`ProductId::BTC_USD`], but the wire-format code is still typed
//! rather than stringly so the feed/exchange modules can't drift on the
//! product string they emit and expect.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProductId(&'static str);

impl ProductId {
    pub const BTC_USD: ProductId = ProductId("BTC-USD");

    pub fn code(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Serialize for ProductId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

// There's exactly one product this crate ever trades; deserializing just
// validates the wire value matches it rather than minting new instances.
impl<'de> Deserialize<'de> for ProductId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == ProductId::BTC_USD.0 {
            Ok(ProductId::BTC_USD)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported product_id `{s}`"
            )))
        }
    }
}
