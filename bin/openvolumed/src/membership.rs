//! This node's entry in the cluster database
//!
//! Every update is a read-modify-write of the whole record. Updates go
//! through the check-and-set path and are retried a few times on conflict
//! so concurrent daemons do not drop each other's node entries.

use chrono::Utc;
use openvolume_cluster::{
    ClusterDatabase, ClusterDbError, ClusterDbResult, ClusterStatus, Database, Node, NodeStatus,
};
use tracing::{debug, info};

const MAX_ATTEMPTS: usize = 5;

pub struct Membership {
    db: ClusterDatabase,
    node_id: String,
    ip: String,
}

impl Membership {
    pub fn new(db: ClusterDatabase, node_id: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            db,
            node_id: node_id.into(),
            ip: ip.into(),
        }
    }

    /// Mark this node up, bootstrapping the cluster record if needed
    pub fn join(&self) -> ClusterDbResult<()> {
        self.set_status(NodeStatus::Up)?;
        info!(node_id = %self.node_id, ip = %self.ip, "joined cluster");
        Ok(())
    }

    /// Refresh this node's timestamp
    pub fn heartbeat(&self) -> ClusterDbResult<()> {
        self.set_status(NodeStatus::Up)
    }

    pub fn leave(&self) -> ClusterDbResult<()> {
        self.set_status(NodeStatus::Down)?;
        info!(node_id = %self.node_id, "left cluster");
        Ok(())
    }

    fn set_status(&self, status: NodeStatus) -> ClusterDbResult<()> {
        self.update(|db| {
            let mut node = db
                .node(&self.node_id)
                .cloned()
                .unwrap_or_else(|| Node::new(self.node_id.clone(), self.ip.clone()));
            node.ip.clone_from(&self.ip);
            node.status = status;
            node.timestamp = Utc::now();
            db.upsert_node(node);
            if db.cluster.status == ClusterStatus::Initializing {
                db.cluster.status = ClusterStatus::Ok;
            }
        })
    }

    fn update(&self, apply: impl Fn(&mut Database)) -> ClusterDbResult<()> {
        let mut attempt = 1;
        loop {
            let mut current = self.db.read_versioned()?;
            apply(&mut current.db);
            match self.db.write_database_cas(&current.db, current.version) {
                Ok(_) => return Ok(()),
                Err(ClusterDbError::Conflict { .. }) if attempt < MAX_ATTEMPTS => {
                    debug!(attempt, "cluster database conflict, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openvolume_kvdb::{Kvdb, MemKvdb};
    use std::sync::Arc;

    fn membership(kv: Arc<dyn Kvdb>, id: &str) -> Membership {
        Membership::new(ClusterDatabase::new(kv), id, "10.0.0.1")
    }

    #[test]
    fn test_join_bootstraps_cluster() {
        let kv: Arc<dyn Kvdb> = Arc::new(MemKvdb::new());
        membership(kv.clone(), "n1").join().unwrap();

        let db = ClusterDatabase::new(kv).read_database().unwrap();
        assert_eq!(db.cluster.status, ClusterStatus::Ok);
        assert_eq!(db.node("n1").unwrap().status, NodeStatus::Up);
    }

    #[test]
    fn test_two_nodes_keep_each_other() {
        let kv: Arc<dyn Kvdb> = Arc::new(MemKvdb::new());
        let a = membership(kv.clone(), "a");
        let b = membership(kv.clone(), "b");
        a.join().unwrap();
        b.join().unwrap();
        a.leave().unwrap();

        let db = ClusterDatabase::new(kv).read_database().unwrap();
        assert_eq!(db.nodes.len(), 2);
        assert_eq!(db.node("a").unwrap().status, NodeStatus::Down);
        assert_eq!(db.node("b").unwrap().status, NodeStatus::Up);
    }

    #[test]
    fn test_heartbeat_advances_timestamp() {
        let kv: Arc<dyn Kvdb> = Arc::new(MemKvdb::new());
        let m = membership(kv.clone(), "n1");
        m.join().unwrap();
        let cdb = ClusterDatabase::new(kv);
        let before = cdb.read_database().unwrap().node("n1").unwrap().timestamp;
        m.heartbeat().unwrap();
        let after = cdb.read_database().unwrap().node("n1").unwrap().timestamp;
        assert!(after >= before);
    }

    #[test]
    fn test_corrupt_record_is_not_overwritten() {
        let kv: Arc<dyn Kvdb> = Arc::new(MemKvdb::new());
        kv.put(openvolume_cluster::DATABASE_KEY, b"not json", None)
            .unwrap();
        let err = membership(kv.clone(), "n1").join().unwrap_err();
        assert!(matches!(err, ClusterDbError::Decode(_)));
        assert_eq!(
            kv.get(openvolume_cluster::DATABASE_KEY).unwrap().value,
            b"not json"
        );
    }
}
