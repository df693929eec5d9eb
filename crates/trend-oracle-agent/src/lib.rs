//! Replication for the trend oracle.
//!
//! Provides the Conway sandbox client, the provisioning scripts, Moltbook
//! directory registration and the threshold-gated
//! [`ReplicationController`]. Depends on `oracle` for the replica registry
//! and collaborator traits.

pub mod conway;
pub mod directory;
pub mod expansion;
pub mod provisioner;
pub mod scripts;

pub use conway::{ConwayClient, ConwayError};
pub use directory::MoltbookRegistrar;
pub use expansion::{ExpansionConfig, ReplicationController};
pub use provisioner::{DirectoryRegistrar, InfraProvisioner};
