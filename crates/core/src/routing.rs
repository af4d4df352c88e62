//! Event-type to broker channel routing.
//!
//! Routing is ordered prefix matching over the dot-namespaced event type:
//! the first matching rule wins, and anything unmatched lands on the
//! general channel. The map is plain configuration supplied at bus
//! construction, so deployments can reroute domains without code changes.

// ---------------------------------------------------------------------------
// Well-known channel names
// ---------------------------------------------------------------------------

/// Payment lifecycle events (`payment.*`).
pub const CHANNEL_PAYMENT: &str = "events:payment";

/// User account and session events (`user.*`).
pub const CHANNEL_USER: &str = "events:user";

/// Course and learning-path events (`course.*`, `path.*`).
pub const CHANNEL_COURSE: &str = "events:course";

/// Hands-on lab events (`lab.*`).
pub const CHANNEL_LAB: &str = "events:lab";

/// Administrative actions (`admin.*`).
pub const CHANNEL_ADMIN: &str = "events:admin";

/// Platform/system events (`system.*`).
pub const CHANNEL_SYSTEM: &str = "events:system";

/// Fallback channel for unrouted event types.
pub const CHANNEL_GENERAL: &str = "events:general";

/// Prefix marking a channel's dead-letter counterpart.
pub const DLQ_PREFIX: &str = "dlq:";

/// Dead-letter channel name for the given channel.
pub fn dlq_channel_for(channel: &str) -> String {
    format!("{DLQ_PREFIX}{channel}")
}

// ---------------------------------------------------------------------------
// ChannelMap
// ---------------------------------------------------------------------------

/// Ordered prefix routing rules plus a fallback channel.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    /// `(event-type prefix, channel)` pairs, evaluated in order.
    rules: Vec<(String, String)>,
    /// Channel used when no rule matches.
    fallback: String,
}

impl ChannelMap {
    /// Build a map from explicit rules and a fallback channel.
    pub fn new(rules: Vec<(String, String)>, fallback: impl Into<String>) -> Self {
        Self {
            rules,
            fallback: fallback.into(),
        }
    }

    /// Resolve the channel for a dot-namespaced event type.
    ///
    /// First matching prefix wins; rule order is significant.
    pub fn channel_for(&self, event_type: &str) -> &str {
        self.rules
            .iter()
            .find(|(prefix, _)| event_type.starts_with(prefix.as_str()))
            .map_or(self.fallback.as_str(), |(_, channel)| channel.as_str())
    }

    /// The configured fallback channel.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// All channels this map can route to, fallback included.
    ///
    /// Deduplicated, in rule order. Used when pre-subscribing or when
    /// reporting the routing surface.
    pub fn channels(&self) -> Vec<&str> {
        let mut channels: Vec<&str> = Vec::with_capacity(self.rules.len() + 1);
        for (_, channel) in &self.rules {
            if !channels.contains(&channel.as_str()) {
                channels.push(channel.as_str());
            }
        }
        if !channels.contains(&self.fallback.as_str()) {
            channels.push(self.fallback.as_str());
        }
        channels
    }
}

impl Default for ChannelMap {
    /// The standard platform routing table.
    fn default() -> Self {
        Self::new(
            vec![
                ("payment.".to_string(), CHANNEL_PAYMENT.to_string()),
                ("user.".to_string(), CHANNEL_USER.to_string()),
                ("course.".to_string(), CHANNEL_COURSE.to_string()),
                ("path.".to_string(), CHANNEL_COURSE.to_string()),
                ("lab.".to_string(), CHANNEL_LAB.to_string()),
                ("admin.".to_string(), CHANNEL_ADMIN.to_string()),
                ("system.".to_string(), CHANNEL_SYSTEM.to_string()),
            ],
            CHANNEL_GENERAL,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
