//! Subscription table owned by the relay actor.

use std::collections::HashMap;
use std::sync::Arc;

use zcmweb_core::Codec;

use super::MessageHandler;
use crate::bridge::SubscriptionHandle;

/// `Unsubscribing` entries still receive messages until the native side
/// acknowledges removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Unsubscribing,
}

pub struct Subscription {
    pub channel: String,
    /// `None` for wildcard subscriptions, which resolve the type per message.
    pub codec: Option<Arc<dyn Codec>>,
    /// Label of the owning connection, if any.
    pub owner: Option<String>,
    pub on_message: MessageHandler,
    pub state: SubscriptionState,
}

#[derive(Default)]
pub struct SubscriptionTable {
    entries: HashMap<SubscriptionHandle, Subscription>,
}

impl SubscriptionTable {
    pub fn insert(&mut self, handle: SubscriptionHandle, sub: Subscription) {
        self.entries.insert(handle, sub);
    }

    pub fn get(&self, handle: SubscriptionHandle) -> Option<&Subscription> {
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: SubscriptionHandle) -> Option<&mut Subscription> {
        self.entries.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: SubscriptionHandle) -> Option<Subscription> {
        self.entries.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
