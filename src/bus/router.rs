//! Registry of publishers declared under a common prefix.

use std::sync::Arc;

use tracing::debug;

use super::producer::Producer;
use super::publisher::Publisher;

/// Groups publishers so they can be prefixed, nested, and set up together.
///
/// ## Example
///
/// ```
/// # #[cfg(feature = "memory")]
/// # fn main() {
/// use std::sync::Arc;
/// use sourced_bus::bus::{InMemoryBroker, Publisher, Router};
///
/// let mut orders = Router::new("orders.");
/// orders.register(Publisher::builder("created").build());
/// orders.register(Publisher::builder("cancelled").build());
///
/// let mut app = Router::new("shop.");
/// app.include_router(orders);
/// app.setup(Arc::new(InMemoryBroker::new()), Some("shop".into()), "/");
///
/// let created = app.get("shop.orders.created").unwrap();
/// assert!(created.is_connected());
/// # }
/// # #[cfg(not(feature = "memory"))]
/// # fn main() {}
/// ```
#[derive(Debug, Default)]
pub struct Router {
    prefix: String,
    publishers: Vec<Publisher>,
}

impl Router {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            publishers: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Add `publisher` under this router's prefix.
    ///
    /// Returns false, dropping the publisher, if an equal one is already
    /// registered.
    pub fn register(&mut self, mut publisher: Publisher) -> bool {
        if !self.prefix.is_empty() {
            publisher.add_prefix(&self.prefix);
        }
        if self.publishers.contains(&publisher) {
            debug!(routing = %publisher.routing(), "publisher already registered");
            return false;
        }
        self.publishers.push(publisher);
        true
    }

    /// Move every publisher of `router` into this one. Prefixes concatenate.
    pub fn include_router(&mut self, router: Router) {
        for publisher in router.publishers {
            self.register(publisher);
        }
    }

    /// Hand every registered publisher the same producer.
    pub fn setup(
        &mut self,
        producer: Arc<dyn Producer>,
        app_id: Option<String>,
        virtual_host: impl Into<String>,
    ) {
        let virtual_host = virtual_host.into();
        for publisher in &mut self.publishers {
            publisher.setup(Arc::clone(&producer), app_id.clone(), virtual_host.clone());
        }
        debug!(publishers = self.publishers.len(), "router set up");
    }

    /// Look up a publisher by its routing.
    pub fn get(&self, routing: &str) -> Option<&Publisher> {
        self.publishers.iter().find(|p| p.routing() == routing)
    }

    pub fn publishers(&self) -> &[Publisher] {
        &self.publishers
    }

    pub fn into_publishers(self) -> Vec<Publisher> {
        self.publishers
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}
