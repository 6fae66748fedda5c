//! Tagged outcome of a probe or a forwarded request

use std::time::Duration;

use thiserror::Error;

/// A failure attributable to the proxy itself
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyFault {
    /// Transport or proxy-layer failure, including timeouts
    #[error("proxy unreachable: {0}")]
    Unreachable(String),

    /// The proxy answered but the payload failed the consistency check
    #[error("proxy returned faulty data: {0}")]
    InvalidData(String),

    /// The proxy exposed itself to the destination
    #[error("transparent proxy: {0}")]
    Transparent(String),
}

/// Result of sending traffic through a proxy
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    ProxyFault(ProxyFault),
    /// The caller's request was unusable; no proxy state should change
    CallerFault(String),
}

/// What the ledger records for a completed probe
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeVerdict {
    Healthy { latency: Duration },
    Faulty(ProxyFault),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_messages() {
        assert_eq!(
            ProxyFault::Unreachable("connection refused".into()).to_string(),
            "proxy unreachable: connection refused"
        );
        assert_eq!(
            ProxyFault::Transparent("Via: 1.1 squid".into()).to_string(),
            "transparent proxy: Via: 1.1 squid"
        );
    }
}
