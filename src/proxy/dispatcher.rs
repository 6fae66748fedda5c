//! Per-request proxy selection and failover

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, instrument, warn};

use crate::error::{Result, RotorError};
use crate::models::PoolEntry;
use crate::proxy::client::{parse_target, ForwardRequest, Forwarded, ProbeClient};
use crate::proxy::context::PoolContext;
use crate::proxy::outcome::Outcome;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Extra attempts after a proxy fault
    pub max_retries: u32,
    /// Leniency escalations allowed while looking for an admitted proxy
    pub max_escalations: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_escalations: 16,
        }
    }
}

/// Routes caller requests through the pool
pub struct Dispatcher {
    context: PoolContext,
    client: Arc<dyn ProbeClient>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        context: PoolContext,
        client: Arc<dyn ProbeClient>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            context,
            client,
            config,
        }
    }

    pub fn context(&self) -> &PoolContext {
        &self.context
    }

    /// Claim the least recently used admitted proxy, loosening the thresholds
    /// when nothing qualifies.
    pub async fn select_proxy(&self) -> Result<PoolEntry> {
        let mut escalations = 0;

        loop {
            let thresholds = self.context.thresholds().current();
            if let Some(entry) = self.context.pool().claim(&thresholds, Utc::now()).await? {
                return Ok(entry);
            }

            if self.context.pool().is_empty().await? {
                return Err(RotorError::NoProxiesAvailable);
            }
            if escalations >= self.config.max_escalations {
                warn!(escalations, "No proxy admitted after escalating leniency");
                return Err(RotorError::NoProxiesAvailable);
            }

            escalations += 1;
            self.context.thresholds().increase_leniency();
        }
    }

    /// Forward a caller's request, failing over to another proxy when the
    /// chosen one is at fault. Only caller errors and pool exhaustion surface;
    /// store failures during selection count as exhaustion.
    #[instrument(skip(self, request), fields(url = %request.target_url))]
    pub async fn dispatch(&self, request: &ForwardRequest) -> Result<Forwarded> {
        parse_target(&request.target_url).map_err(RotorError::CallerRequest)?;

        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            let proxy = match self.select_proxy().await {
                Ok(proxy) => proxy,
                Err(RotorError::NoProxiesAvailable) => return Err(RotorError::NoProxiesAvailable),
                Err(e) => {
                    error!(attempt, "Proxy selection failed: {}", e);
                    return Err(RotorError::NoProxiesAvailable);
                }
            };
            debug!(address = %proxy.address, attempt, "Forwarding through proxy");

            match self.client.forward(&proxy.address, request).await {
                Outcome::Success(forwarded) => {
                    if let Err(e) = self.context.ledger().record_success(&proxy.address).await {
                        warn!("Failed to record success for {}: {}", proxy.address, e);
                    }
                    return Ok(forwarded);
                }
                Outcome::ProxyFault(fault) => {
                    warn!(
                        address = %proxy.address,
                        attempt,
                        error = %fault,
                        "Proxy failed, demoting"
                    );
                    if let Err(e) = self.context.ledger().mark_demoted(&proxy.address).await {
                        warn!("Failed to demote {}: {}", proxy.address, e);
                    }
                }
                Outcome::CallerFault(message) => {
                    return Err(RotorError::CallerRequest(message));
                }
            }
        }

        warn!(attempts, "Retry budget exhausted");
        Err(RotorError::NoProxiesAvailable)
    }
}
