//! Capability discovery.
//!
//! A discovery source is an external service (typically a tool server
//! process) that advertises capabilities at runtime. The registry keeps each
//! connected source so it can be torn down later, and remembers which
//! capabilities came from which source.

use crate::error::DiscoveryError;
use crate::tool::{Capability, CapabilityRegistry, Registered};
use async_trait::async_trait;
use rootcause::Report;
use rootcause::prelude::ResultExt;
use std::sync::{Arc, PoisonError};
use tracing::{info, warn};

/// A connection to an external source of capabilities.
#[async_trait]
pub trait CapabilityDiscovery: Send + Sync {
    /// Name of the source, unique per registry.
    fn name(&self) -> &str;

    /// Lists the capabilities the source currently offers.
    async fn list_available(&self) -> Result<Vec<Arc<dyn Capability>>, Report>;

    /// Closes the connection.
    async fn teardown(&self) -> Result<(), Report>;
}

impl CapabilityRegistry {
    /// Registers every capability offered by `source`.
    ///
    /// Each capability is initialized before any is registered; if listing
    /// or any initialization fails, nothing from this source is registered
    /// and the source is torn down. Source names are unique per registry.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateSource` if a source with the same name is already
    /// connected, otherwise `ListFailed` or `InitFailed`.
    pub async fn register_from(
        &self,
        source: Arc<dyn CapabilityDiscovery>,
    ) -> Result<usize, Report<DiscoveryError>> {
        let source_name = source.name().to_string();
        if self.has_source(&source_name) {
            return Err(DiscoveryError::DuplicateSource {
                source: source_name,
            }
            .into());
        }

        let attached = match self.initialize_from(source.as_ref()).await {
            Ok(capabilities) => self.attach(Arc::clone(&source), capabilities),
            Err(report) => Err(report),
        };
        match attached {
            Ok(count) => {
                info!(source = %source_name, count, "registered discovered capabilities");
                Ok(count)
            }
            Err(report) => {
                if let Err(teardown) = source.teardown().await {
                    warn!(
                        source = %source_name,
                        error = %teardown,
                        "teardown after failed discovery also failed"
                    );
                }
                Err(report)
            }
        }
    }

    fn has_source(&self, name: &str) -> bool {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|source| source.name() == name)
    }

    /// Inserts the capabilities and records the source, unless another
    /// source with the same name was connected in the meantime.
    fn attach(
        &self,
        source: Arc<dyn CapabilityDiscovery>,
        capabilities: Vec<Arc<dyn Capability>>,
    ) -> Result<usize, Report<DiscoveryError>> {
        let source_name = source.name().to_string();
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        if sources.iter().any(|known| known.name() == source_name) {
            return Err(DiscoveryError::DuplicateSource {
                source: source_name,
            }
            .into());
        }

        let count = capabilities.len();
        let mut map = self.write();
        for capability in capabilities {
            map.insert(
                capability.definition().name.clone(),
                Registered {
                    capability,
                    source: Some(source_name.clone()),
                },
            );
        }
        sources.push(source);
        Ok(count)
    }

    async fn initialize_from(
        &self,
        source: &dyn CapabilityDiscovery,
    ) -> Result<Vec<Arc<dyn Capability>>, Report<DiscoveryError>> {
        let capabilities = source
            .list_available()
            .await
            .context(DiscoveryError::ListFailed {
                source: source.name().to_string(),
            })?;
        for capability in &capabilities {
            capability
                .init()
                .await
                .context(DiscoveryError::InitFailed {
                    source: source.name().to_string(),
                    tool: capability.definition().name.clone(),
                })?;
        }
        Ok(capabilities)
    }

    /// Registers capabilities from several sources.
    ///
    /// A failing source is skipped; the others are still registered. The
    /// failures are returned in source order.
    pub async fn register_from_all(
        &self,
        sources: impl IntoIterator<Item = Arc<dyn CapabilityDiscovery>>,
    ) -> Vec<Report<DiscoveryError>> {
        let mut failures = Vec::new();
        for source in sources {
            let name = source.name().to_string();
            if let Err(report) = self.register_from(source).await {
                warn!(source = %name, error = %report, "capability discovery failed");
                failures.push(report);
            }
        }
        failures
    }

    /// Names of the connected discovery sources.
    #[must_use]
    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|source| source.name().to_string())
            .collect()
    }

    /// Tears down every discovery source and unregisters its capabilities.
    ///
    /// All sources are torn down even if some fail.
    ///
    /// # Errors
    ///
    /// Returns the first `TeardownFailed`.
    pub async fn teardown_sources(&self) -> Result<(), Report<DiscoveryError>> {
        let sources = std::mem::take(
            &mut *self
                .sources
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        let mut first_failure = None;
        for source in sources {
            let name = source.name().to_string();
            self.write()
                .retain(|_, registered| registered.source.as_deref() != Some(name.as_str()));

            if let Err(report) = source.teardown().await {
                warn!(source = %name, error = %report, "discovery teardown failed");
                if first_failure.is_none() {
                    first_failure =
                        Some(report.context(DiscoveryError::TeardownFailed { source: name }));
                }
            } else {
                info!(source = %name, "discovery source torn down");
            }
        }

        match first_failure {
            Some(report) => Err(report),
            None => Ok(()),
        }
    }
}
