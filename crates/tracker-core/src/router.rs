//! Topic routing.
//!
//! A [`TopicTable`] maps inbound topics to a [`TopicKind`]. Different
//! transports see different topic layouts (the broker subscription uses
//! `Tracker/from/<kind>`, older devices publish `Tracker/<kind>`, and the
//! webhook bridge forwards whatever the broker saw), so the table is a value
//! rather than a hard-coded match.

use std::fmt;

/// What a message is about, derived from its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Status,
    Location,
    /// Call status object, or a bare status code.
    Call,
    /// Legacy incoming call topic carrying only the caller number.
    Ringing,
    LedConfig,
    Config,
    Contacts,
    StoredSms,
    ReceivedSms,
    EspNowReceived,
    Notification,
    Logs,
    Connection,
    Disconnection,
    LastWill,
}

impl TopicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicKind::Status => "status",
            TopicKind::Location => "location",
            TopicKind::Call => "callstatus",
            TopicKind::Ringing => "ringing",
            TopicKind::LedConfig => "led_config",
            TopicKind::Config => "config",
            TopicKind::Contacts => "contacts",
            TopicKind::StoredSms => "sms/stored",
            TopicKind::ReceivedSms => "sms/received",
            TopicKind::EspNowReceived => "espnow/received",
            TopicKind::Notification => "notification",
            TopicKind::Logs => "logs",
            TopicKind::Connection => "events/connection",
            TopicKind::Disconnection => "events/disconnection",
            TopicKind::LastWill => "lastwill",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic suffixes understood by the relay.
const DEFAULT_ROUTES: &[(&str, TopicKind)] = &[
    ("status", TopicKind::Status),
    ("location", TopicKind::Location),
    ("callstatus", TopicKind::Call),
    ("call", TopicKind::Call),
    ("ringing", TopicKind::Ringing),
    ("led_config", TopicKind::LedConfig),
    ("config", TopicKind::Config),
    ("contacts", TopicKind::Contacts),
    ("sms/stored", TopicKind::StoredSms),
    ("sms/received", TopicKind::ReceivedSms),
    ("espnow/received", TopicKind::EspNowReceived),
    ("notification", TopicKind::Notification),
    ("logs", TopicKind::Logs),
    ("events/connection", TopicKind::Connection),
    ("events/disconnection", TopicKind::Disconnection),
    ("lastwill", TopicKind::LastWill),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum MatchMode {
    /// `topic == "<prefix>/<suffix>"`.
    Exact { prefix: String },
    /// `topic` ends with `/<suffix>` (or is exactly `<suffix>`).
    Suffix,
}

/// Topic to [`TopicKind`] lookup table.
///
/// # Example
///
/// ```
/// use tracker_core::{TopicKind, TopicTable};
///
/// let broker = TopicTable::exact("Tracker/from");
/// assert_eq!(broker.route("Tracker/from/status"), Some(TopicKind::Status));
/// assert_eq!(broker.route("Tracker/status"), None);
///
/// let webhook = TopicTable::suffix();
/// assert_eq!(webhook.route("Tracker/led_config"), Some(TopicKind::LedConfig));
/// assert_eq!(webhook.route("Tracker/from/config"), Some(TopicKind::Config));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTable {
    mode: MatchMode,
    /// Sorted longest suffix first.
    routes: Vec<(String, TopicKind)>,
}

impl TopicTable {
    /// Table matching `<prefix>/<suffix>` exactly, for a direct broker subscription.
    pub fn exact(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self::with_mode(MatchMode::Exact { prefix })
    }

    /// Table matching on the trailing topic segments, for relayed topics
    /// whose prefix is not known in advance.
    pub fn suffix() -> Self {
        Self::with_mode(MatchMode::Suffix)
    }

    fn with_mode(mode: MatchMode) -> Self {
        let mut table = Self {
            mode,
            routes: Vec::new(),
        };
        for (suffix, kind) in DEFAULT_ROUTES {
            table.insert(suffix, *kind);
        }
        table
    }

    /// Add or replace a route.
    #[must_use]
    pub fn with_route(mut self, suffix: impl Into<String>, kind: TopicKind) -> Self {
        self.insert(&suffix.into(), kind);
        self
    }

    fn insert(&mut self, suffix: &str, kind: TopicKind) {
        let suffix = suffix.trim_matches('/').to_string();
        self.routes.retain(|(existing, _)| *existing != suffix);
        self.routes.push((suffix, kind));
        self.routes
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    }

    /// Classify a topic. `None` means no handler; the caller logs and drops it.
    pub fn route(&self, topic: &str) -> Option<TopicKind> {
        match &self.mode {
            MatchMode::Exact { prefix } => {
                let rest = topic.strip_prefix(prefix.as_str())?.strip_prefix('/')?;
                self.routes
                    .iter()
                    .find(|(suffix, _)| suffix == rest)
                    .map(|(_, kind)| *kind)
            }
            MatchMode::Suffix => self
                .routes
                .iter()
                .find(|(suffix, _)| {
                    topic == suffix
                        || topic
                            .strip_suffix(suffix.as_str())
                            .is_some_and(|head| head.ends_with('/'))
                })
                .map(|(_, kind)| *kind),
        }
    }

    /// Topic filters a broker client should subscribe to for this table.
    pub fn subscriptions(&self) -> Vec<String> {
        match &self.mode {
            MatchMode::Exact { prefix } => self
                .routes
                .iter()
                .map(|(suffix, _)| format!("{prefix}/{suffix}"))
                .collect(),
            MatchMode::Suffix => vec!["#".to_string()],
        }
    }
}
