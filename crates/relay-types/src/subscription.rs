//! Subscription types for Relay
//!
//! A subscription pairs a callback with an optional content filter.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::envelope::Payload;
use crate::error::DeliveryError;

/// Subscriber callback, invoked once per accepted payload
pub type Callback = Arc<dyn Fn(&Payload) -> Result<(), DeliveryError> + Send + Sync>;

/// Content filter; `true` means the subscriber wants the payload
pub type Filter = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Create a new random SubscriptionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered (callback, filter) pair
#[derive(Clone)]
pub struct Subscription {
    /// Unique subscription identifier
    pub id: SubscriptionId,

    /// Display name used in logs
    pub name: Option<String>,

    callback: Callback,
    filter: Option<Filter>,
}

impl Subscription {
    /// Create a subscription that accepts every payload
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Payload) -> Result<(), DeliveryError> + Send + Sync + 'static,
    {
        Self {
            id: SubscriptionId::new(),
            name: None,
            callback: Arc::new(callback),
            filter: None,
        }
    }

    /// Only deliver payloads for which `filter` returns true
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether this subscription has a filter
    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    /// Evaluate the filter; no filter accepts everything
    pub fn accepts(&self, payload: &Payload) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(payload))
    }

    /// Invoke the callback
    pub fn deliver(&self, payload: &Payload) -> Result<(), DeliveryError> {
        (self.callback)(payload)
    }

    /// Name for log output, falling back to the id
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("filtered", &self.is_filtered())
            .finish()
    }
}
