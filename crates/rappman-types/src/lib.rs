//! `rappman-types` – shared data model and error taxonomy.
//!
//! Every other crate in the workspace depends on this one.  It defines the
//! rapp catalog entry ([`RappDescriptor`]), the robot's outward identity
//! ([`RobotIdentity`]), the lifecycle state machine vocabulary
//! ([`LifecycleState`], [`LifecycleEvent`]), the caller tagging used for
//! authorization ([`CallerContext`]) and the three error families
//! ([`RegistryError`], [`ControlError`], [`ConnectionError`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A single runnable robot application ("rapp") as described by a catalog.
///
/// Immutable once loaded; the registry never mutates descriptors in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RappDescriptor {
    /// Namespaced identifier, unique within a registry (e.g. `"demo/talker"`).
    pub id: String,
    /// Human-readable name shown to operators.
    #[serde(default)]
    pub display_name: String,
    /// Opaque icon reference.  Never validated or resolved by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Executable entry point handed to the process launcher.
    pub entry_point: String,
    /// Arguments passed to the entry point on launch.
    #[serde(default)]
    pub args: Vec<String>,
    /// Platform capabilities the rapp needs before it can be started.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

/// The robot's outward network identity.
///
/// Created once at startup and immutable for the process lifetime.  When
/// `suffix` is set the advertised name becomes `base-suffix`, which avoids
/// collisions when several robots share a configured base name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotIdentity {
    base_name: String,
    suffix: Option<String>,
}

impl RobotIdentity {
    /// Build an identity from the configured base name.  With
    /// `unique_suffix` enabled a short random token is appended so that two
    /// robots called `"turtle"` end up as `turtle-3f2a91bc` and
    /// `turtle-9c01d4e7` on the hub.
    pub fn new(base_name: impl Into<String>, unique_suffix: bool) -> Self {
        let suffix = if unique_suffix {
            let mut token = Uuid::new_v4().simple().to_string();
            token.truncate(8);
            Some(token)
        } else {
            None
        };
        Self {
            base_name: base_name.into(),
            suffix,
        }
    }

    /// The configured base name, without any suffix.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// The generated suffix token, if uniqueness was requested.
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// The name this robot advertises on the hub.
    pub fn effective_name(&self) -> String {
        match &self.suffix {
            Some(suffix) => format!("{}-{}", self.base_name, suffix),
            None => self.base_name.clone(),
        }
    }
}

impl std::fmt::Display for RobotIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.effective_name())
    }
}

/// Lifecycle state of the (at most one) rapp managed by this robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No rapp associated; the only state from which `start` is accepted.
    Idle,
    /// A launch is in flight.
    Starting,
    /// The child process is alive and advertised.
    Running,
    /// A graceful stop is in flight.
    Stopping,
    /// The child exited abnormally; transient, cleaned up to [`Idle`].
    Failed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Who is asking.  Remote requests carry the identity of the hub they came
/// through and must pass the authorization gate; local requests always may.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerContext {
    Local,
    Remote { hub_identity: String },
}

impl CallerContext {
    pub fn remote(hub_identity: impl Into<String>) -> Self {
        CallerContext::Remote {
            hub_identity: hub_identity.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, CallerContext::Local)
    }
}

/// A state-machine transition, broadcast by the app manager so that the
/// presence controller can keep hub advertisement in step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Starting { rapp: String },
    Running { rapp: String },
    Stopping { rapp: String },
    Stopped { rapp: String },
    Failed { rapp: String },
}

impl Transition {
    /// The rapp the transition concerns.
    pub fn rapp(&self) -> &str {
        match self {
            Transition::Starting { rapp }
            | Transition::Running { rapp }
            | Transition::Stopping { rapp }
            | Transition::Stopped { rapp }
            | Transition::Failed { rapp } => rapp,
        }
    }
}

/// Timestamped wrapper around a [`Transition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub transition: Transition,
}

impl LifecycleEvent {
    pub fn new(transition: Transition) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            transition,
        }
    }
}

/// Catalog load / lookup failures.
///
/// Load errors are fatal at startup: an incomplete catalog could silently
/// block legitimate app starts, so a failed source aborts the whole load.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("catalog source '{path}' could not be read: {detail}")]
    SourceUnreadable { path: String, detail: String },

    #[error("malformed entry in catalog source '{path}': {detail}")]
    MalformedEntry { path: String, detail: String },

    #[error("rapp '{0}' is not in the registry")]
    NotFound(String),
}

/// Request-level outcomes of `start` / `stop`.  All recoverable and returned
/// synchronously to the caller; none of them leaves the state machine in an
/// undefined state.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlError {
    #[error("request denied by whitelist policy")]
    Unauthorized,

    #[error("a rapp is already running [{running}]")]
    AlreadyRunning { running: String },

    #[error("no rapp is running")]
    NotRunning,

    #[error("rapp '{0}' is not installed")]
    NotFound(String),

    #[error("rapp failed to launch: {detail}")]
    Launch { detail: String },
}

/// Hub connectivity failures.  Never silently swallowed: surfaced to the
/// caller and retried by the watch loop on its own cadence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("hub unreachable: {detail}")]
    Unreachable { detail: String },

    #[error("hub operation timed out")]
    Timeout,

    #[error("not connected to a hub")]
    NotConnected,
}
