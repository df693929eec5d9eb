//! Seams for the external systems replication talks to.

use async_trait::async_trait;

use oracle::OracleError;

/// Creates compute instances and runs commands on them.
///
/// Each call reports success or failure explicitly. A controller without a
/// provisioner runs in preview mode.
#[async_trait]
pub trait InfraProvisioner: Send + Sync {
    /// Request a new instance; returns its id.
    async fn create_instance(&self, name: &str) -> Result<String, OracleError>;

    /// Run a shell script on an existing instance.
    async fn exec(&self, instance_id: &str, script: &str) -> Result<(), OracleError>;
}

/// Registers a replica on an external social directory. Best-effort.
#[async_trait]
pub trait DirectoryRegistrar: Send + Sync {
    /// Returns the registered handle.
    async fn register(&self, handle: &str, bio: &str) -> Result<String, OracleError>;
}
