//! Feed identity: a (source exchange, channel) pair.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Composite identity of a single data feed.
///
/// Channels are not a closed set: the two conventional channel names
/// ([`FeedKey::SEEDED_CHANNELS`]) are created eagerly when an exchange is
/// first observed, but any non-empty channel name is accepted from traffic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeedKey {
    /// Source exchange name (e.g., "okx", "binance").
    pub exchange: String,
    /// Channel within the exchange (e.g., "trade", "inc").
    pub channel: String,
}

impl FeedKey {
    /// Channel names seeded for every newly observed exchange.
    pub const SEEDED_CHANNELS: [&'static str; 2] = ["trade", "inc"];

    /// Build a key from parts, rejecting empty components.
    pub fn new(exchange: impl Into<String>, channel: impl Into<String>) -> Result<Self, FeedKeyError> {
        let exchange = exchange.into();
        let channel = channel.into();
        if exchange.is_empty() {
            return Err(FeedKeyError::MissingExchange);
        }
        if channel.is_empty() {
            return Err(FeedKeyError::MissingChannel);
        }
        Ok(Self { exchange, channel })
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.exchange, self.channel)
    }
}

/// Why a feed identity could not be formed from an ingestion message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedKeyError {
    /// The message had no usable exchange field.
    #[error("message is missing an exchange")]
    MissingExchange,

    /// The message had no usable channel field.
    #[error("message is missing a channel")]
    MissingChannel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_accepts_arbitrary_channel_names() {
        let key = FeedKey::new("okx", "funding-rate").unwrap();
        assert_eq!(key.channel, "funding-rate");
    }

    #[test]
    fn new_rejects_empty_exchange() {
        assert_eq!(
            FeedKey::new("", "trade").unwrap_err(),
            FeedKeyError::MissingExchange
        );
    }

    #[test]
    fn new_rejects_empty_channel() {
        assert_eq!(
            FeedKey::new("okx", "").unwrap_err(),
            FeedKeyError::MissingChannel
        );
    }

    #[test]
    fn display_joins_with_slash() {
        let key = FeedKey::new("okx", "trade").unwrap();
        assert_eq!(key.to_string(), "okx/trade");
    }

    #[test]
    fn keys_order_by_exchange_then_channel() {
        let a = FeedKey::new("binance", "trade").unwrap();
        let b = FeedKey::new("okx", "inc").unwrap();
        assert!(a < b);
    }
}
