#[cfg(test)]
mod tests {
    use crate::cluster::{RingEvent, RingEventListener};
    use crate::config::TableConfig;
    use crate::network::handler::RequestHandler;
    use crate::network::wire::SetRequest;
    use crate::ring::between;
    use crate::table::DTable;
    use crate::testing::utils::init_tracing;
    use crate::testing::{vnode, MockRing, RecordedCall, RecordingClient};
    use crate::types::{DemotedItem, ReplicaState, ReplicaValue, RingKey, Value, Vnode};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    const LOCAL: &str = "10.0.0.1:5000";
    const REMOTE_A: &str = "10.0.0.2:5000";
    const REMOTE_B: &str = "10.0.0.3:5000";
    const REMOTE_C: &str = "10.0.0.4:5000";

    struct Node {
        table: DTable,
        ring: Arc<MockRing>,
        client: Arc<RecordingClient>,
        local: Vnode,
    }

    fn node(replicas: usize) -> Node {
        init_tracing();
        let local = vnode(1 << 40, LOCAL);
        let ring = Arc::new(MockRing::new(replicas).with_local(local.clone()));
        let client = Arc::new(RecordingClient::new());
        let table = DTable::new(
            TableConfig::new(LOCAL).with_replicas(replicas),
            ring.clone(),
            ring.clone(),
            client.clone(),
        )
        .unwrap();
        table.register_vnode(&local);
        Node {
            table,
            ring,
            client,
            local,
        }
    }

    fn replica(
        data: &'static [u8],
        depth: usize,
        master: &Vnode,
        chain: Vec<Vnode>,
    ) -> ReplicaValue {
        ReplicaValue {
            data: Bytes::from_static(data),
            timestamp: SystemTime::now(),
            depth,
            state: ReplicaState::Complete,
            master: Some(master.clone()),
            chain,
        }
    }

    /// Two keys ordered by ring position, lowest first.
    fn ordered_keys(a: &'static [u8], b: &'static [u8]) -> (Bytes, Bytes) {
        if RingKey::for_key(a) < RingKey::for_key(b) {
            (Bytes::from_static(a), Bytes::from_static(b))
        } else {
            (Bytes::from_static(b), Bytes::from_static(a))
        }
    }

    #[tokio::test]
    async fn test_promote_takes_over_owned_first_replicas() {
        let n = node(1);
        let master = vnode(1 << 30, REMOTE_A);
        let next = vnode(1 << 50, REMOTE_B);
        n.ring.set_default_owner(n.local.clone());
        n.ring.set_successors(&n.local, vec![next.clone()]);

        let tables = n.table.tables().require(&n.local).unwrap();
        {
            let mut t = tables.lock();
            t.replicas.insert(
                Bytes::from_static(b"first"),
                replica(b"one", 0, &master, vec![n.local.clone()]),
            );
            t.replicas.insert(
                Bytes::from_static(b"second"),
                replica(b"two", 1, &master, vec![next.clone(), n.local.clone()]),
            );
        }

        n.table.promote(&n.local).await;

        let t = tables.lock();
        let promoted = t.primary.get(&b"first"[..]).unwrap();
        assert!(promoted.committed);
        assert!(!promoted.is_replica);
        assert_eq!(promoted.data, Bytes::from_static(b"one"));
        assert!(t.replicas.get(b"first").is_none());

        // Deeper replicas are not promotion candidates.
        assert!(t.replicas.get(b"second").is_some());
        assert!(t.primary.get(&b"second"[..]).is_none());
        drop(t);

        let sets = n.client.sets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].target, next);
        assert_eq!(sets[0].key, Bytes::from_static(b"first"));
        assert!(sets[0].value.is_replica);
    }

    #[tokio::test]
    async fn test_promote_drops_replicas_owned_elsewhere() {
        let n = node(1);
        let master = vnode(1 << 30, REMOTE_A);
        let other = vnode(1 << 35, REMOTE_B);
        n.ring.set_owner(b"moved", other);

        let tables = n.table.tables().require(&n.local).unwrap();
        tables.lock().replicas.insert(
            Bytes::from_static(b"moved"),
            replica(b"v", 0, &master, vec![n.local.clone()]),
        );

        n.table.promote(&n.local).await;

        let t = tables.lock();
        assert!(t.replicas.get(b"moved").is_none());
        assert!(t.primary.get(&b"moved"[..]).is_none());
        assert!(n.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_promote_skips_keys_whose_lookup_fails() {
        let n = node(1);
        let master = vnode(1 << 30, REMOTE_A);
        n.ring.set_default_owner(n.local.clone());
        n.ring.fail_lookup(b"stuck");

        let tables = n.table.tables().require(&n.local).unwrap();
        {
            let mut t = tables.lock();
            t.replicas.insert(
                Bytes::from_static(b"stuck"),
                replica(b"a", 0, &master, vec![n.local.clone()]),
            );
            t.replicas.insert(
                Bytes::from_static(b"fine"),
                replica(b"b", 0, &master, vec![n.local.clone()]),
            );
        }

        n.table.promote(&n.local).await;

        {
            let t = tables.lock();
            assert!(t.replicas.get(b"stuck").is_some());
            assert!(t.primary.get(&b"fine"[..]).is_some());
        }

        // The next pass picks the key up once the ring answers again.
        n.ring.heal_lookup(b"stuck");
        n.table.promote(&n.local).await;
        let t = tables.lock();
        assert!(t.replicas.is_empty());
        assert_eq!(t.primary.len(), 2);
    }

    #[tokio::test]
    async fn test_demote_remote_moves_range_to_new_predecessor() {
        let n = node(3);
        let (low, high) = ordered_keys(b"alpha", b"omega");

        // A local vnode sitting on `high`, a newcomer sitting on `low`.
        let local = Vnode::new(RingKey::for_key(&high), LOCAL);
        let new_pred = Vnode::new(RingKey::for_key(&low), REMOTE_A);
        n.ring.add_local(local.clone());
        n.table.register_vnode(&local);

        let tables = n.table.tables().require(&local).unwrap();
        {
            let mut t = tables.lock();
            t.primary.insert(low.clone(), Value::new(&b"moving"[..]).committed());
            t.primary.insert(high.clone(), Value::new(&b"staying"[..]).committed());
        }
        assert!(between(&local.id, &new_pred.id, &RingKey::for_key(&low), true));
        assert!(!between(&local.id, &new_pred.id, &RingKey::for_key(&high), true));

        n.table.demote(&local, &new_pred).await;

        {
            let t = tables.lock();
            assert!(t.primary.get(&low).is_none());
            assert!(t.primary.get(&high).is_some());
            let staged = t.demoted.get(&low).unwrap();
            assert_eq!(staged.new_master, new_pred);
            assert_eq!(staged.data, Bytes::from_static(b"moving"));
        }

        let sets = n.client.sets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].target, new_pred);
        assert_eq!(sets[0].origin, local);
        assert_eq!(sets[0].key, low);
        assert_eq!(sets[0].replica_count, 3);
        assert!(sets[0].demoting);
        assert!(!sets[0].value.is_replica);
    }

    #[tokio::test]
    async fn test_demote_remote_failure_keeps_item_staged() {
        let n = node(1);
        let key = Bytes::from_static(b"k");
        // A predecessor placed on the key itself always takes it over.
        let new_pred = Vnode::new(RingKey::for_key(&key), REMOTE_A);

        let tables = n.table.tables().require(&n.local).unwrap();
        tables
            .lock()
            .primary
            .insert(key.clone(), Value::new(&b"v"[..]).committed());

        n.client.fail_target(&new_pred);
        n.table.demote(&n.local, &new_pred).await;

        let status = n.table.status(&n.local).unwrap();
        assert_eq!(status.primary, 0);
        assert_eq!(status.demoted, 1);
        assert_eq!(n.client.sets().len(), 1);

        // Not restored on failure; the next event retries it.
        n.client.heal_target(&new_pred);
        n.ring.set_owner(&key, new_pred.clone());
        n.table.retry_demoted(&n.local).await;

        assert_eq!(n.client.sets().len(), 2);
        assert_eq!(n.table.status(&n.local).unwrap().demoted, 1);
    }

    #[tokio::test]
    async fn test_retry_demoted_resends_to_current_owner() {
        let n = node(2);
        let stale = vnode(1 << 20, REMOTE_A);
        let owner = vnode(1 << 25, REMOTE_B);
        n.ring.set_owner(b"k", owner.clone());

        let tables = n.table.tables().require(&n.local).unwrap();
        let value = Value::new(&b"v"[..]);
        tables.lock().demoted.stage(DemotedItem::from_value(
            Bytes::from_static(b"k"),
            &value,
            stale,
        ));

        n.table.retry_demoted(&n.local).await;

        let sets = n.client.sets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].target, owner);
        assert!(sets[0].demoting);
        assert_eq!(sets[0].value.timestamp, value.timestamp);

        // Still staged until the owner confirms, now under the new target.
        let t = tables.lock();
        assert_eq!(t.demoted.get(b"k").unwrap().new_master, owner);
    }

    #[tokio::test]
    async fn test_retry_demoted_restores_when_owner_again() {
        let n = node(1);
        let gone = vnode(1 << 20, REMOTE_A);
        let next = vnode(1 << 50, REMOTE_B);
        n.ring.set_default_owner(n.local.clone());
        n.ring.set_successors(&n.local, vec![next.clone()]);

        let tables = n.table.tables().require(&n.local).unwrap();
        tables.lock().demoted.stage(DemotedItem::from_value(
            Bytes::from_static(b"k"),
            &Value::new(&b"v"[..]),
            gone,
        ));

        n.table.retry_demoted(&n.local).await;

        {
            let t = tables.lock();
            assert!(t.demoted.is_empty());
            assert!(t.primary.get(&b"k"[..]).unwrap().committed);
        }
        let sets = n.client.sets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].target, next);
        assert!(sets[0].value.is_replica);
    }

    #[tokio::test]
    async fn test_restore_keeps_newer_primary() {
        let n = node(1);
        n.ring.set_default_owner(n.local.clone());

        let tables = n.table.tables().require(&n.local).unwrap();
        let old = Value::new(&b"old"[..]);
        let mut newer = Value::new(&b"new"[..]).committed();
        newer.timestamp = old.timestamp + Duration::from_secs(1);
        {
            let mut t = tables.lock();
            t.demoted.stage(DemotedItem::from_value(
                Bytes::from_static(b"k"),
                &old,
                vnode(7, REMOTE_A),
            ));
            t.primary.insert(Bytes::from_static(b"k"), newer);
        }

        n.table.retry_demoted(&n.local).await;

        let t = tables.lock();
        assert!(t.demoted.is_empty());
        assert_eq!(t.primary.get(&b"k"[..]).unwrap().data, Bytes::from_static(b"new"));
    }

    #[tokio::test]
    async fn test_demote_local_rewrites_chain() {
        let n = node(3);
        let new_pred = vnode((1 << 40) - 100, LOCAL);
        n.ring.add_local(new_pred.clone());

        let master = vnode(1 << 10, REMOTE_A);
        let head = vnode(1 << 12, REMOTE_B);
        let tail = vnode(1 << 45, REMOTE_C);
        let chain = vec![head.clone(), n.local.clone(), tail.clone()];

        let tables = n.table.tables().require(&n.local).unwrap();
        tables
            .lock()
            .replicas
            .insert(Bytes::from_static(b"k"), replica(b"v", 1, &master, chain));

        n.table.demote(&n.local, &new_pred).await;

        assert!(tables.lock().replicas.is_empty());
        let moved_tables = n.table.tables().require(&new_pred).unwrap();
        let moved = moved_tables.lock().replicas.get(b"k").cloned().unwrap();
        let expected_chain = vec![head.clone(), new_pred.clone(), tail.clone()];
        assert_eq!(moved.chain, expected_chain);
        assert_eq!(moved.depth, 1);
        assert_eq!(moved.master, Some(master.clone()));

        // Every other chain member hears about the new holder.
        let metas = n.client.set_metas();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].target, head);
        assert_eq!(metas[0].meta.depth, 0);
        assert_eq!(metas[1].target, tail);
        assert_eq!(metas[1].meta.depth, 2);
        for meta in &metas {
            assert_eq!(meta.meta.chain, expected_chain);
            assert_eq!(meta.meta.master, master);
        }
        assert!(n.client.sets().is_empty());
    }

    #[tokio::test]
    async fn test_demote_local_failed_push_marks_incomplete() {
        let n = node(3);
        let new_pred = vnode((1 << 40) - 100, LOCAL);
        n.ring.add_local(new_pred.clone());

        let master = vnode(1 << 10, REMOTE_A);
        let head = vnode(1 << 12, REMOTE_B);
        let tail = vnode(1 << 45, REMOTE_C);

        let tables = n.table.tables().require(&n.local).unwrap();
        tables.lock().replicas.insert(
            Bytes::from_static(b"k"),
            replica(b"v", 1, &master, vec![head.clone(), n.local.clone(), tail.clone()]),
        );

        n.client.fail_target(&head);
        n.table.demote(&n.local, &new_pred).await;

        let moved_tables = n.table.tables().require(&new_pred).unwrap();
        let moved = moved_tables.lock().replicas.get(b"k").cloned().unwrap();
        assert_eq!(moved.state, ReplicaState::Incomplete);

        // The failure does not stop the rest of the chain being told.
        let metas = n.client.set_metas();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[1].target, tail);
        assert_eq!(metas[1].meta.state, ReplicaState::Incomplete);
    }

    #[tokio::test]
    async fn test_redelivery_keeps_single_copy() {
        let n = node(1);
        let master = vnode(1 << 30, REMOTE_A);
        let value = Value::new(&b"v"[..]);

        for _ in 0..2 {
            let req = SetRequest {
                origin: master.clone(),
                target: n.local.clone(),
                key: Bytes::from_static(b"replica"),
                value: value.to_replica(),
                replica_count: 0,
                demoting: false,
                depth: 0,
            };
            RequestHandler::set(&n.table, req).await.unwrap();

            let req = SetRequest {
                origin: master.clone(),
                target: n.local.clone(),
                key: Bytes::from_static(b"primary"),
                value: value.clone(),
                replica_count: 1,
                demoting: false,
                depth: 0,
            };
            RequestHandler::set(&n.table, req).await.unwrap();
        }

        let status = n.table.status(&n.local).unwrap();
        assert_eq!(status.primary, 1);
        assert_eq!(status.replicas_complete + status.replicas_incomplete, 1);
    }

    #[tokio::test]
    async fn test_delegate_ignores_vnodes_without_handler() {
        let n = node(1);
        let stranger = vnode(5, LOCAL);
        n.table.register_vnode(&stranger);
        n.ring.set_default_owner(stranger.clone());

        let tables = n.table.tables().require(&stranger).unwrap();
        tables.lock().replicas.insert(
            Bytes::from_static(b"k"),
            replica(b"v", 0, &vnode(1, REMOTE_A), Vec::new()),
        );

        n.table
            .delegate(&stranger, &vnode(1, REMOTE_A), RingEvent::PredecessorLeft)
            .await;

        assert_eq!(tables.lock().replicas.len(), 1);
        assert_eq!(n.ring.lookup_count(), 0);
    }

    #[tokio::test]
    async fn test_delegate_ignores_successor_events() {
        let n = node(1);
        n.ring.set_default_owner(n.local.clone());
        let tables = n.table.tables().require(&n.local).unwrap();
        tables.lock().replicas.insert(
            Bytes::from_static(b"k"),
            replica(b"v", 0, &vnode(1, REMOTE_A), Vec::new()),
        );

        for event in [
            RingEvent::SuccessorJoined,
            RingEvent::SuccessorLeft,
            RingEvent::ReplicasChanged,
        ] {
            n.table.delegate(&n.local, &vnode(1, REMOTE_A), event).await;
        }

        assert_eq!(tables.lock().replicas.len(), 1);
        assert!(n.client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_predecessor_left_promotes_and_retries_staged() {
        let n = node(1);
        n.ring.set_default_owner(n.local.clone());
        let tables = n.table.tables().require(&n.local).unwrap();
        {
            let mut t = tables.lock();
            t.replicas.insert(
                Bytes::from_static(b"orphan"),
                replica(b"a", 0, &vnode(1, REMOTE_A), Vec::new()),
            );
            t.demoted.stage(DemotedItem::from_value(
                Bytes::from_static(b"staged"),
                &Value::new(&b"b"[..]),
                vnode(1, REMOTE_A),
            ));
        }

        n.table
            .delegate(&n.local, &vnode(1, REMOTE_A), RingEvent::PredecessorLeft)
            .await;

        let status = n.table.status(&n.local).unwrap();
        assert_eq!(status.primary, 2);
        assert_eq!(status.demoted, 0);
        assert_eq!(status.replicas_complete + status.replicas_incomplete, 0);
    }

    #[tokio::test]
    async fn test_predecessor_joined_on_remote_host_sends_keys() {
        let n = node(2);
        let new_pred = vnode(u64::MAX - 1, REMOTE_A);

        // With the local vnode low on the ring and the newcomer near the top,
        // every key hashing above the local vnode moves.
        let tables = n.table.tables().require(&n.local).unwrap();
        let keys: Vec<Bytes> = (0..16)
            .map(|i| Bytes::from(format!("key-{}", i)))
            .collect();
        for key in &keys {
            tables
                .lock()
                .primary
                .insert(key.clone(), Value::new(&b"v"[..]).committed());
        }
        let expected: Vec<Bytes> = keys
            .iter()
            .filter(|k| between(&n.local.id, &new_pred.id, &RingKey::for_key(k), true))
            .cloned()
            .collect();

        RingEventListener::on_event(&n.table, &n.local, &new_pred, RingEvent::PredecessorJoined)
            .await;

        let mut sent: Vec<Bytes> = n
            .client
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                RecordedCall::Set(req) if req.demoting => Some(req.key),
                _ => None,
            })
            .collect();
        sent.sort();
        let mut expected_sorted = expected.clone();
        expected_sorted.sort();
        assert_eq!(sent, expected_sorted);

        let status = n.table.status(&n.local).unwrap();
        assert_eq!(status.demoted, expected.len());
        assert_eq!(status.primary, keys.len() - expected.len());
    }
}
