//! Microphone permission
//!
//! The recorder asks at most once and then sticks with the answer.

use std::sync::Mutex;

/// Platform answer to "may we use the microphone?"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// The user has not been asked yet
    Undetermined,
}

impl PermissionStatus {
    pub fn is_determined(&self) -> bool {
        !matches!(self, PermissionStatus::Undetermined)
    }
}

/// Queries and requests microphone permission
pub trait PermissionProvider: Send + Sync {
    /// Current answer, without prompting
    fn status(&self) -> PermissionStatus;

    /// Prompt the user. Blocks until they answer.
    fn request(&self) -> PermissionStatus;
}

/// Provider with a fixed answer
#[derive(Debug)]
pub struct StaticPermission {
    status: PermissionStatus,
}

impl StaticPermission {
    pub fn new(status: PermissionStatus) -> Self {
        Self { status }
    }

    pub fn granted() -> Self {
        Self::new(PermissionStatus::Granted)
    }

    pub fn denied() -> Self {
        Self::new(PermissionStatus::Denied)
    }
}

impl PermissionProvider for StaticPermission {
    fn status(&self) -> PermissionStatus {
        self.status
    }

    fn request(&self) -> PermissionStatus {
        self.status
    }
}

/// Remembers the first definitive answer from a provider
pub struct PermissionCache {
    cached: Mutex<Option<bool>>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    pub fn cached(&self) -> Option<bool> {
        *self.cached.lock().unwrap()
    }

    /// Resolve permission, prompting at most once per call and never again
    /// after a definitive answer.
    pub fn resolve(&self, provider: &dyn PermissionProvider) -> bool {
        if let Some(answer) = self.cached() {
            return answer;
        }

        let status = match provider.status() {
            PermissionStatus::Undetermined => provider.request(),
            determined => determined,
        };

        let granted = status == PermissionStatus::Granted;
        if status.is_determined() {
            *self.cached.lock().unwrap() = Some(granted);
        }
        granted
    }
}

impl Default for PermissionCache {
    fn default() -> Self {
        Self::new()
    }
}
