//! Consumer-side handler registry keyed by dotted message type.
//!
//! The engine stores typed envelopes and never dispatches on them; consumers
//! that want type-based demultiplexing register handler capabilities here
//! and resolve each received message's type against the registered patterns.
//!
//! Pattern language, most to least specific:
//! - exact dotted type (`vote.cast`)
//! - suffix wildcard (`vote.*`, `pipeline.build.*`), matched against the
//!   longest prefix first
//! - last-segment class (`*.response`)

use std::collections::HashMap;

/// Map from dotted type patterns to handler capabilities
#[derive(Debug, Clone)]
pub struct HandlerRegistry<H> {
    handlers: HashMap<String, H>,
}

impl<H> HandlerRegistry<H> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under an exact type or a wildcard pattern.
    ///
    /// Registering the same pattern again replaces the previous handler.
    pub fn register(&mut self, pattern: impl Into<String>, handler: H) -> &mut Self {
        self.handlers.insert(pattern.into(), handler);
        self
    }

    /// Resolve the handler for a concrete message type.
    ///
    /// Exact match wins; otherwise suffix wildcards are tried from the
    /// longest prefix down, then the `*.segment` class of the final segment.
    pub fn resolve(&self, message_type: &str) -> Option<&H> {
        if let Some(handler) = self.handlers.get(message_type) {
            return Some(handler);
        }

        let mut prefix = message_type;
        while let Some((head, _)) = prefix.rsplit_once('.') {
            if let Some(handler) = self.handlers.get(&format!("{head}.*")) {
                return Some(handler);
            }
            prefix = head;
        }

        if let Some((_, tail)) = message_type.rsplit_once('.') {
            if let Some(handler) = self.handlers.get(&format!("*.{tail}")) {
                return Some(handler);
            }
        }

        None
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<H> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
