use crate::event::EventType;

/// Last relayed actor per event type.
///
/// Only immediate repeats are suppressed: `A, B, A` relays all three.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupState {
    last_follower: Option<String>,
    last_subscriber: Option<String>,
}

impl DedupState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, event_type: EventType) -> Option<&str> {
        match event_type {
            EventType::Follow => self.last_follower.as_deref(),
            EventType::Subscribe => self.last_subscriber.as_deref(),
        }
    }

    /// Returns `true` when `actor` equals the last relayed actor for `event_type`.
    pub fn is_repeat(&self, event_type: EventType, actor: &str) -> bool {
        self.last(event_type) == Some(actor)
    }

    /// Records a relayed actor. Call only after the message was emitted.
    pub fn record(&mut self, event_type: EventType, actor: &str) {
        let slot = match event_type {
            EventType::Follow => &mut self.last_follower,
            EventType::Subscribe => &mut self.last_subscriber,
        };
        *slot = Some(actor.to_string());
    }
}
