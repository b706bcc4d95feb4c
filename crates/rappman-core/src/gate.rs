//! [`AuthGate`] – single interception point for remote control requests.
//!
//! Every `start` / `stop` request entering the
//! [`AppManager`][crate::lifecycle::AppManager] passes through
//! [`AuthGate::evaluate`] first.  Evaluation order is fixed:
//!
//! 1. Local callers are always allowed.
//! 2. If the policy's `local_only` flag is set, every remote caller is
//!    denied unconditionally.
//! 3. Otherwise the requesting hub identity is tested against the policy's
//!    patterns top-to-bottom; the first match allows.
//! 4. A non-empty pattern list with no match denies; an empty pattern list
//!    allows (the open policy).
//!
//! The active policy is replaced atomically with [`AuthGate::set_policy`];
//! the new policy applies to all subsequent evaluations but is not
//! retroactive for requests already past the gate.
//!
//! # Example
//!
//! ```
//! use rappman_core::{AuthGate, Verdict, WhitelistPolicy};
//! use rappman_types::CallerContext;
//!
//! let gate = AuthGate::new(WhitelistPolicy::new(vec!["hub-a*".into()], false));
//!
//! assert_eq!(gate.evaluate(&CallerContext::remote("hub-a-1")), Verdict::Allow);
//! assert_eq!(gate.evaluate(&CallerContext::remote("hub-b-1")), Verdict::Deny);
//! assert_eq!(gate.evaluate(&CallerContext::Local), Verdict::Allow);
//! ```

use std::sync::RwLock;

use rappman_types::CallerContext;
use tracing::debug;

use crate::policy::{GlobMatcher, PatternMatcher, WhitelistPolicy};

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
}

/// Owns the active [`WhitelistPolicy`] and the pattern matcher backend.
pub struct AuthGate {
    policy: RwLock<WhitelistPolicy>,
    matcher: Box<dyn PatternMatcher>,
}

impl AuthGate {
    /// Build a gate with the default glob matcher.
    pub fn new(policy: WhitelistPolicy) -> Self {
        Self::with_matcher(policy, Box::new(GlobMatcher::new()))
    }

    /// Build a gate with a custom pattern backend.
    pub fn with_matcher(policy: WhitelistPolicy, matcher: Box<dyn PatternMatcher>) -> Self {
        Self {
            policy: RwLock::new(policy),
            matcher,
        }
    }

    /// Atomically replace the active policy.
    pub fn set_policy(&self, policy: WhitelistPolicy) {
        let mut guard = match self.policy.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!(patterns = guard.patterns.len(), local_only = policy.local_only, "whitelist policy replaced");
        *guard = policy;
    }

    /// Snapshot of the active policy.
    pub fn policy(&self) -> WhitelistPolicy {
        match self.policy.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Decide whether `caller` may issue a control request.
    pub fn evaluate(&self, caller: &CallerContext) -> Verdict {
        let hub_identity = match caller {
            CallerContext::Local => return Verdict::Allow,
            CallerContext::Remote { hub_identity } => hub_identity,
        };

        let policy = self.policy();
        if policy.local_only {
            debug!(hub = %hub_identity, "remote request denied, local-only mode");
            return Verdict::Deny;
        }
        if policy.patterns.is_empty() {
            return Verdict::Allow;
        }
        for pattern in &policy.patterns {
            if self.matcher.matches(pattern, hub_identity) {
                return Verdict::Allow;
            }
        }
        debug!(hub = %hub_identity, "remote request denied, no whitelist pattern matched");
        Verdict::Deny
    }
}
