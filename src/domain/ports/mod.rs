//! Domain ports (interfaces) for the arbor kernel.

pub mod agent_repository;
pub mod group_repository;
pub mod identity_repository;
pub mod policy_repository;
pub mod run_launcher;
pub mod run_repository;

pub use agent_repository::AgentRepository;
pub use group_repository::{GroupRepository, GroupSpawnBatch, SpawnedChild};
pub use identity_repository::IdentityRepository;
pub use policy_repository::PolicyRepository;
pub use run_launcher::{NullRunLauncher, RunLauncher};
pub use run_repository::RunRepository;
