//! The application hook surface: how an embedding program observes local
//! deliveries. Submission is the other half and lives on
//! [`crate::node::Node::submit`].

use crate::bundle::Bundle;
use crate::delivery::DeliveryRecord;
use async_trait::async_trait;

/// Implemented by the embedding application; invoked once per locally
/// delivered bundle, after the delivery record has been written.
///
/// The callback runs on the receive path and must return promptly; kick
/// long work onto a task of your own.
#[async_trait]
pub trait Application: Send + Sync {
    async fn on_delivery(&self, bundle: &Bundle, record: &DeliveryRecord);
}
