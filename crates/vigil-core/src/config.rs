use std::rc::Rc;

use crate::host::{Host, ManualHost};

/// Passes a single digest may take before it is declared divergent.
pub const DEFAULT_DIGEST_TTL: usize = 10;

/// Tree-wide settings, fixed when the root scope is created.
#[derive(Clone)]
pub struct ScopeConfig {
    pub digest_ttl: usize,
    pub host: Rc<dyn Host>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            digest_ttl: DEFAULT_DIGEST_TTL,
            host: Rc::new(ManualHost::new()),
        }
    }
}

impl ScopeConfig {
    pub fn with_ttl(mut self, ttl: usize) -> Self {
        self.digest_ttl = ttl.max(1);
        self
    }

    pub fn with_host(mut self, host: Rc<dyn Host>) -> Self {
        self.host = host;
        self
    }
}
