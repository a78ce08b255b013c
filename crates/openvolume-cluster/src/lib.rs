//! OpenVolume cluster database
//!
//! One aggregate record describes the cluster: its lifecycle status and
//! every member node. It is stored as JSON under [`DATABASE_KEY`].

pub mod database;
pub mod error;
pub mod types;

pub use database::{ClusterDatabase, DATABASE_KEY, Versioned};
pub use error::{ClusterDbError, ClusterDbResult};
pub use types::{ClusterStatus, Database, Info, Node, NodeStatus};
