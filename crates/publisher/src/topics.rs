//! Topic naming shared by the producer, the sweeper and the consumer.

/// The four order event topics, one per event kind.
pub const ORDER_TOPICS: [&str; 4] = [
    "orders.created",
    "orders.paid",
    "orders.shipped",
    "orders.cancelled",
];

/// Destination for messages the consumer cannot decode.
pub const DEAD_LETTER_TOPIC: &str = "orders.dead-letter";

/// Maps an event kind discriminator to its topic: `orders.<kind-lowercase>`.
pub fn topic_for_event(event_type: &str) -> String {
    format!("orders.{}", event_type.to_ascii_lowercase())
}
