//! Replication context configuration.

use crate::render::RenderOptions;
use std::time::Duration;

/// Configuration for a replication context.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Time-to-live applied at creation and by leases that carry no TTL.
    pub ttl: Duration,

    /// How documents are rendered by dump operations.
    pub render: RenderOptions,

    /// Upper bound on the number of documents a single `dump` may return.
    /// Zero is treated as one.
    pub max_dump_batch: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            render: RenderOptions::default(),
            max_dump_batch: 10_000,
        }
    }
}

impl ContextConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the context TTL.
    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the document rendering options.
    #[must_use]
    pub const fn render(mut self, render: RenderOptions) -> Self {
        self.render = render;
        self
    }

    /// Sets the maximum `dump` batch size.
    #[must_use]
    pub const fn max_dump_batch(mut self, max: usize) -> Self {
        self.max_dump_batch = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderFormat;

    #[test]
    fn default_config() {
        let config = ContextConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(300));
        assert_eq!(config.max_dump_batch, 10_000);
        assert_eq!(config.render.format, RenderFormat::Json);
    }

    #[test]
    fn builder_pattern() {
        let config = ContextConfig::new()
            .ttl(Duration::from_secs(30))
            .max_dump_batch(50)
            .render(RenderOptions::new().format(RenderFormat::Cbor));

        assert_eq!(config.ttl, Duration::from_secs(30));
        assert_eq!(config.max_dump_batch, 50);
        assert_eq!(config.render.format, RenderFormat::Cbor);
    }
}
