//! Client extensions.
//!
//! Vendor distributions of Druid add APIs of their own. An extension wraps
//! such an API in a client type built on top of [`DruidClient`]. Extensions
//! are registered explicitly in an [`ExtensionRegistry`] handed to the
//! client; the client creates each extension's client on first request and
//! caches it.
//!
//! ```rust,ignore
//! #[derive(Debug)]
//! struct CatalogExtension;
//!
//! impl ExtensionProvider for CatalogExtension {
//!     fn name(&self) -> &str { "catalog" }
//!     fn summary(&self) -> &str { "Table catalog API" }
//!     fn client_for(&self, client: &DruidClient) -> Result<Arc<dyn Any + Send + Sync>> {
//!         Ok(Arc::new(CatalogClient::new(client.router_transport())))
//!     }
//! }
//!
//! let registry = ExtensionRegistry::new().register(CatalogExtension);
//! let mut client = DruidClient::new(config)?.with_extensions(registry);
//! let catalog: Arc<CatalogClient> = client.extension("catalog")?.unwrap();
//! ```

use crate::client::DruidClient;
use crate::error::Result;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A pluggable client extension.
pub trait ExtensionProvider: Send + Sync + fmt::Debug {
    /// Unique name, used to look the extension up.
    fn name(&self) -> &str;

    /// One-line description.
    fn summary(&self) -> &str;

    /// Service roles the extension adds to the cluster, if any.
    fn roles(&self) -> Vec<String> {
        Vec::new()
    }

    /// Create the extension client for `client`.
    fn client_for(&self, client: &DruidClient) -> Result<Arc<dyn Any + Send + Sync>>;
}

/// Extensions available to a [`DruidClient`].
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    providers: Vec<Arc<dyn ExtensionProvider>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. A provider with the same name replaces the old one.
    pub fn register(mut self, provider: impl ExtensionProvider + 'static) -> Self {
        self.providers.retain(|p| p.name() != provider.name());
        self.providers.push(Arc::new(provider));
        self
    }

    /// Provider by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ExtensionProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Names of the registered extensions, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Roles added by all registered extensions.
    pub fn roles(&self) -> Vec<String> {
        self.providers.iter().flat_map(|p| p.roles()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }
}
