use async_trait::async_trait;

use super::command::spawn_child;
use super::{LaunchRequest, Launcher, SpawnError, SpawnedChild};

/// Spawns one ordinary subprocess per instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndependentLauncher;

impl IndependentLauncher {
    /// Builds the launcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launcher for IndependentLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<SpawnedChild, SpawnError> {
        spawn_child(request, None)
    }
}
