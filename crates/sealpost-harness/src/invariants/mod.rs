//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are protocol properties that must hold after every step of a
//! scenario, whatever sequence of operations led there.
//!
//! # Architecture
//!
//! [`SimServer::snapshot`](crate::SimServer::snapshot) extracts observable
//! state into a [`SystemSnapshot`], then an [`InvariantRegistry`] runs every
//! registered [`Invariant`] against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = server.snapshot(&[&alice, &bob])?;
//! registry.assert_all(&snapshot, "after rotation");
//! ```

mod checks;
mod snapshot;

pub use checks::{
    EditAuditTrail, EnvelopesComplete, GroupKeyAgreement, PreKeysHandedOutOnce,
    ScheduledStaysHidden,
};
pub use snapshot::{GroupSnapshot, SystemSnapshot};

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property that must hold for every reachable snapshot.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the current state.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;

    /// Violation of this invariant.
    fn violation(&self, message: String) -> Violation {
        Violation { invariant: self.name(), message }
    }
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every protocol invariant:
    /// - [`PreKeysHandedOutOnce`]: no prekey id is handed out twice
    /// - [`EnvelopesComplete`]: stored envelopes are well-formed
    /// - [`EditAuditTrail`]: edited messages keep their original
    /// - [`GroupKeyAgreement`]: members open the same group key
    /// - [`ScheduledStaysHidden`]: nothing is pushed before its release
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(PreKeysHandedOutOnce);
        registry.add(EnvelopesComplete);
        registry.add(EditAuditTrail);
        registry.add(GroupKeyAgreement);
        registry.add(ScheduledStaysHidden);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants. Returns every violation found.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation.
    #[allow(clippy::panic, reason = "test assertion helper")]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_invariants() {
        assert_eq!(InvariantRegistry::standard().len(), 5);
    }

    #[test]
    fn empty_snapshot_passes_invariants() {
        assert!(InvariantRegistry::standard().check_all(&SystemSnapshot::default()).is_ok());
    }
}
