//! Per-session name allocation.
//!
//! Primitive names and inter-net channel keys must be unique within one
//! session. The allocator is owned by the session and threaded explicitly
//! through compilation; there are no process-wide counters.

use std::collections::HashMap;

/// Counter-backed allocator for unique, human-readable names.
#[derive(Debug, Default, Clone)]
pub struct NameAllocator {
    counters: HashMap<String, u64>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `"{prefix}#{n}"`, with `n` counting from 1 per prefix.
    pub fn allocate(&mut self, prefix: &str) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        format!("{prefix}#{counter}")
    }

    /// Allocate a key for an inter-net channel.
    pub fn channel_key(&mut self, hint: &str) -> String {
        self.allocate(&format!("netcomm:{hint}"))
    }

    /// Number of names handed out for a prefix so far.
    pub fn issued(&self, prefix: &str) -> u64 {
        self.counters.get(prefix).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_per_prefix() {
        let mut names = NameAllocator::new();
        assert_eq!(names.allocate("Core::DoubleAdd"), "Core::DoubleAdd#1");
        assert_eq!(names.allocate("Core::DoubleAdd"), "Core::DoubleAdd#2");
        assert_eq!(names.allocate("Core::NetTime"), "Core::NetTime#1");
        assert_eq!(names.issued("Core::DoubleAdd"), 2);
    }

    #[test]
    fn channel_keys_do_not_collide_with_primitive_names() {
        let mut names = NameAllocator::new();
        let key = names.channel_key("done");
        assert_eq!(key, "netcomm:done#1");
        assert_eq!(names.allocate("done"), "done#1");
    }
}
