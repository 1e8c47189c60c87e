#[cfg(test)]
mod tests {
    use crate::testing::utils::{init_tracing, wait_for, wait_for_result};
    use crate::testing::{vnode, TestCluster};
    use crate::types::{ReplicaState, Vnode};
    use bytes::Bytes;
    use std::time::Duration;

    const A: &str = "127.0.0.1:7001";
    const B: &str = "127.0.0.1:7002";
    const C: &str = "127.0.0.1:7003";

    const WAIT: Duration = Duration::from_secs(3);

    fn keys(n: usize) -> Vec<Bytes> {
        (0..n).map(|i| Bytes::from(format!("user:{}", i))).collect()
    }

    async fn three_hosts(replicas: usize) -> (TestCluster, Vec<Vnode>) {
        init_tracing();
        let mut cluster = TestCluster::new(replicas);
        let vnodes = vec![
            vnode(1 << 62, A),
            vnode(1 << 63, B),
            vnode(3 << 62, C),
        ];
        for v in &vnodes {
            cluster.add_host(&v.host).unwrap();
            cluster.add_vnode(v.clone()).await.unwrap();
        }
        (cluster, vnodes)
    }

    #[tokio::test]
    async fn test_write_reaches_master_and_replicas() {
        let (cluster, _) = three_hosts(2).await;
        let key = Bytes::from_static(b"user:42");
        let owner = cluster.owner(&key).await.unwrap();

        // Written through a node that may not be the master.
        cluster.node(A).unwrap().set(key.clone(), "alice").await.unwrap();

        let master = cluster.node(&owner.host).unwrap();
        let found = wait_for_result(
            || {
                let master = master.clone();
                let key = key.clone();
                async move { master.get(&key).await.ok().flatten() }
            },
            |v| v.is_some(),
            WAIT,
        )
        .await;
        assert_eq!(found.flatten(), Some(Bytes::from_static(b"alice")));

        // Both other hosts end up with a complete replica.
        let replica_hosts: Vec<Vnode> = cluster
            .ring()
            .vnodes()
            .into_iter()
            .filter(|v| v.host != owner.host)
            .collect();
        for holder in replica_hosts {
            let table = cluster.node(&holder.host).unwrap();
            let complete = wait_for(
                || {
                    table
                        .status(&holder)
                        .map(|s| s.replicas_complete == 1)
                        .unwrap_or(false)
                },
                WAIT,
            )
            .await;
            assert!(complete, "replica missing on {}", holder);
        }
    }

    #[tokio::test]
    async fn test_master_loss_promotes_first_replica() {
        let (cluster, _) = three_hosts(2).await;
        let key = Bytes::from_static(b"session:7");
        let owner = cluster.owner(&key).await.unwrap();

        let master = cluster.node(&owner.host).unwrap();
        master.set(key.clone(), "token").await.unwrap();

        let (successor, _) = cluster.ring().neighbours(&owner);
        let successor = successor.unwrap();
        let heir = cluster.node(&successor.host).unwrap();
        assert_eq!(
            heir.tables()
                .require(&successor)
                .unwrap()
                .lock()
                .replicas
                .get(&key)
                .map(|r| (r.depth, r.state)),
            Some((0, ReplicaState::Complete))
        );

        cluster.remove_vnode(&owner).await.unwrap();

        assert_eq!(cluster.owner(&key).await.unwrap(), successor);
        assert_eq!(heir.get(&key).await.unwrap(), Some(Bytes::from_static(b"token")));
        let status = heir.status(&successor).unwrap();
        assert_eq!(status.replicas_complete + status.replicas_incomplete, 0);
    }

    #[tokio::test]
    async fn test_join_hands_keys_to_newcomer() {
        init_tracing();
        let mut cluster = TestCluster::new(1);
        let first = vnode(1 << 62, A);
        cluster.add_host(A).unwrap();
        cluster.add_host(B).unwrap();
        cluster.add_vnode(first.clone()).await.unwrap();

        let writer = cluster.node(A).unwrap();
        let keys = keys(32);
        for key in &keys {
            writer.set(key.clone(), "v").await.unwrap();
        }
        assert_eq!(writer.status(&first).unwrap().primary, keys.len());

        let newcomer = vnode(3 << 62, B);
        cluster.add_vnode(newcomer.clone()).await.unwrap();

        // Every key is readable from whichever vnode now masters it.
        for key in &keys {
            let owner = cluster.owner(key).await.unwrap();
            let node = cluster.node(&owner.host).unwrap();
            assert_eq!(node.get(key).await.unwrap(), Some(Bytes::from_static(b"v")));
        }

        // The newcomer confirms each hand-off, emptying the staging table.
        let cleared = wait_for(
            || writer.status(&first).map(|s| s.demoted == 0).unwrap_or(false),
            WAIT,
        )
        .await;
        assert!(cleared);

        let moved = cluster.node(B).unwrap().status(&newcomer).unwrap().primary;
        let kept = writer.status(&first).unwrap().primary;
        assert_eq!(moved + kept, keys.len());
    }

    #[tokio::test]
    async fn test_unreachable_newcomer_gets_keys_on_retry() {
        init_tracing();
        let mut cluster = TestCluster::new(1);
        let first = vnode(1 << 62, A);
        cluster.add_host(A).unwrap();
        cluster.add_host(B).unwrap();
        cluster.add_vnode(first.clone()).await.unwrap();

        let writer = cluster.node(A).unwrap();
        let keys = keys(32);
        for key in &keys {
            writer.set(key.clone(), "v").await.unwrap();
        }

        cluster.client().take_down(B);
        let newcomer = vnode(3 << 62, B);
        cluster.add_vnode(newcomer.clone()).await.unwrap();

        let staged = writer.status(&first).unwrap().demoted;
        let newcomer_node = cluster.node(B).unwrap();
        assert_eq!(newcomer_node.status(&newcomer).unwrap().primary, 0);

        cluster.client().bring_up(B);
        writer.retry_demoted(&first).await;

        let delivered = wait_for(
            || {
                writer.status(&first).map(|s| s.demoted == 0).unwrap_or(false)
                    && newcomer_node
                        .status(&newcomer)
                        .map(|s| s.primary == staged)
                        .unwrap_or(false)
            },
            WAIT,
        )
        .await;
        assert!(delivered);
        assert!(staged > 0);
    }
}
