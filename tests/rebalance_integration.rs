//! Cluster rebalance integration tests.
//!
//! Each test assembles an in-process cluster over the loopback transport
//! and drives full rebalance runs end to end.

#[allow(dead_code)]
mod common;

use common::TestCluster;
use scree::cluster::hrw_target;
use scree::rebalance::Stage;
use scree::storage::marker::was_interrupted;
use scree::transport::{
    BundleArgs, SendPayload, StreamBundle, Transport, TransportHeader, ACK_STREAM, OBJECT_STREAM,
};
use scree::types::{BucketProps, Checksum, ObjectAttrs, Provider};
use scree::xaction::XactKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Convergence
// =============================================================================

#[tokio::test]
async fn test_two_targets_converge() {
    let cluster = TestCluster::new(2, 1).await;
    let a = cluster.tid(0);
    let b = cluster.tid(1);

    // x and z belong on B, y stays on A; all three start on A
    let x = cluster.name_homed_at(&b, "bck", 0);
    let z = cluster.name_homed_at(&b, "bck", 1);
    let y = cluster.name_homed_at(&a, "bck", 0);
    cluster.put(0, "bck", &x, b"x-content");
    cluster.put(0, "bck", &y, b"y-content");
    cluster.put(0, "bck", &z, b"z-content");

    let smap = Arc::clone(&cluster.smap);
    for res in cluster.run_all(&smap, 1).await {
        res.unwrap();
    }

    assert_eq!(cluster.holders("bck", &x), vec![1]);
    assert_eq!(cluster.holders("bck", &z), vec![1]);
    assert_eq!(cluster.holders("bck", &y), vec![0]);

    let a_stats = cluster.targets[0].ctx.stats.snapshot();
    let b_stats = cluster.targets[1].ctx.stats.snapshot();
    assert_eq!(a_stats.tx_count, 2);
    assert_eq!(b_stats.rx_count, 2);
    assert_eq!(a_stats.rx_count, 0);
    assert_eq!(b_stats.tx_count, 0);

    // markers removed, ack tables drained
    for t in &cluster.targets {
        assert!(!was_interrupted(
            &t.ctx.config.node.conf_dir,
            XactKind::GlobalReb
        ));
        assert_eq!(t.manager.pending_acks(), 0);
        assert_eq!(t.manager.status().stage, Stage::Done);
    }
}

#[tokio::test]
async fn test_multiplier_hundred_objects_no_retransmits() {
    let cluster = TestCluster::new_with(3, 1, |config| {
        config.rebalance.multiplier = 3;
    })
    .await;
    let t0 = cluster.tid(0);

    let names = cluster.names_not_homed_at(&t0, "bulk", 100);
    for (i, name) in names.iter().enumerate() {
        cluster.put(0, "bulk", name, format!("payload-{}", i).as_bytes());
    }

    let smap = Arc::clone(&cluster.smap);
    for res in cluster.run_all(&smap, 1).await {
        res.unwrap();
    }

    // exactly 100 sends and 100 receives, no duplicates, no retransmits
    let tx: u64 = cluster
        .targets
        .iter()
        .map(|t| t.ctx.stats.snapshot().tx_count)
        .sum();
    let rx: u64 = cluster
        .targets
        .iter()
        .map(|t| t.ctx.stats.snapshot().rx_count)
        .sum();
    assert_eq!(tx, 100);
    assert_eq!(rx, 100);

    for name in &names {
        let holders = cluster.holders("bulk", name);
        let home = cluster.home_of(&cluster.smap, "bulk", name);
        assert_eq!(holders.len(), 1, "object {} holders {:?}", name, holders);
        assert_eq!(cluster.tid(holders[0]), home);
    }
    for t in &cluster.targets {
        assert_eq!(t.manager.retransmit_count(), 0);
        assert_eq!(t.manager.pending_acks(), 0);
    }
}

// =============================================================================
// Ack loss and retransmit
// =============================================================================

#[tokio::test]
async fn test_lost_acks_resolved_by_head_probe() {
    let cluster = TestCluster::new_with(3, 1, |config| {
        config.rebalance.multiplier = 3;
    })
    .await;
    let t0 = cluster.tid(0);

    let names = cluster.names_not_homed_at(&t0, "bulk", 100);
    for name in &names {
        cluster.put(0, "bulk", name, b"payload");
    }

    // lose the first 5 acknowledgements on the wire
    let dropped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dropped);
    let victim = t0.clone();
    cluster.transport.set_fault(Box::new(move |trname, dst, _| {
        if trname == ACK_STREAM && *dst == victim {
            return counter.fetch_add(1, Ordering::SeqCst) < 5;
        }
        false
    }));

    let smap = Arc::clone(&cluster.smap);
    for res in cluster.run_all(&smap, 1).await {
        res.unwrap();
    }
    cluster.transport.clear_fault();

    // every object is persisted at its home; the HEAD probe drops all five
    // unacknowledged entries without resending
    for name in &names {
        let home = cluster.home_of(&cluster.smap, "bulk", name);
        let holders = cluster.holders("bulk", name);
        assert!(
            holders.iter().any(|&i| cluster.tid(i) == home),
            "object {} missing at home",
            name
        );
    }
    assert_eq!(cluster.targets[0].manager.retransmit_count(), 0);
    assert_eq!(cluster.targets[0].manager.pending_acks(), 0);

    // sources whose ack was lost are not removed locally
    let leftovers = names
        .iter()
        .filter(|name| cluster.holders("bulk", name).contains(&0))
        .count();
    assert_eq!(leftovers, 5);
}

// =============================================================================
// Membership change mid-run
// =============================================================================

#[tokio::test]
async fn test_membership_change_aborts_and_next_generation_converges() {
    let cluster = TestCluster::new(2, 1).await;
    let t1 = cluster.tid(1);

    let names: Vec<String> = (0..8)
        .map(|i| cluster.name_homed_at(&t1, "bck", i))
        .collect();
    for name in &names {
        cluster.put(0, "bck", name, b"data");
    }

    // every ack back to the sender is lost, pinning the run in wait-ack
    let victim = cluster.tid(0);
    cluster
        .transport
        .set_fault(Box::new(move |trname, dst, _| {
            trname == ACK_STREAM && *dst == victim
        }));

    let smap_v1 = Arc::clone(&cluster.smap);
    let m0 = Arc::clone(&cluster.targets[0].manager);
    let m1 = Arc::clone(&cluster.targets[1].manager);
    let run0 = {
        let smap = Arc::clone(&smap_v1);
        let m = Arc::clone(&m0);
        tokio::spawn(async move { m.run_rebalance(smap, 1, None).await })
    };
    let run1 = {
        let smap = Arc::clone(&smap_v1);
        let m = Arc::clone(&m1);
        tokio::spawn(async move { m.run_rebalance(smap, 1, None).await })
    };

    // wait until the sender is draining acks, then publish a newer map
    let mut waited = Duration::ZERO;
    while m0.status().stage < Stage::WaitAck {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
        assert!(waited < Duration::from_secs(5), "sender never reached wait-ack");
    }
    let smap_v2 = Arc::new(cluster.smap.bumped(2));
    cluster.publish(&smap_v2);

    run0.await.unwrap().unwrap();
    run1.await.unwrap().unwrap();

    // the interrupted run leaves its marker in place
    assert!(m0.current_xaction().unwrap().aborted());
    assert!(was_interrupted(
        &cluster.targets[0].ctx.config.node.conf_dir,
        XactKind::GlobalReb
    ));

    // the next generation on the new map converges and cleans up
    cluster.transport.clear_fault();
    for res in cluster.run_all(&smap_v2, 2).await {
        res.unwrap();
    }
    for name in &names {
        assert_eq!(cluster.holders("bck", name), vec![1], "object {}", name);
    }
    assert!(!was_interrupted(
        &cluster.targets[0].ctx.config.node.conf_dir,
        XactKind::GlobalReb
    ));
}

// =============================================================================
// Early receive (arrival before Init)
// =============================================================================

fn early_hdr(cluster: &TestCluster, name: &str, payload: &[u8]) -> TransportHeader {
    TransportHeader {
        bucket: "bck".to_string(),
        name: name.to_string(),
        provider: Provider::Native,
        opaque: cluster.tid(0).to_string(),
        attrs: ObjectAttrs {
            size: payload.len() as u64,
            atime_ns: 12_345,
            version: 1,
            cksum: Some(Checksum::crc32(payload)),
        },
    }
}

#[tokio::test]
async fn test_early_receive_dropped_without_init() {
    let cluster = TestCluster::new(2, 1).await;
    let t1 = cluster.tid(1);
    let name = cluster.name_homed_at(&t1, "bck", 0);
    let payload = b"early-bird";

    let bundle = cluster
        .transport
        .open_bundle(
            &cluster.tid(0),
            Arc::clone(&cluster.smap),
            BundleArgs::new(OBJECT_STREAM),
        )
        .await
        .unwrap();
    bundle
        .send(
            early_hdr(&cluster, &name, payload),
            SendPayload::Bytes(payload.to_vec().into()),
            None,
            &t1,
        )
        .await
        .unwrap();

    // receiver waits min(dest_retry_time, send_file/3) = 250ms, then drains
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(cluster.holders("bck", &name).is_empty());
    bundle.close(true).await;
}

#[tokio::test]
async fn test_early_receive_accepted_once_init_publishes() {
    let cluster = TestCluster::new(2, 1).await;
    let t1 = cluster.tid(1);
    let name = cluster.name_homed_at(&t1, "bck", 0);
    let payload = b"early-bird";

    let bundle = cluster
        .transport
        .open_bundle(
            &cluster.tid(0),
            Arc::clone(&cluster.smap),
            BundleArgs::new(OBJECT_STREAM),
        )
        .await
        .unwrap();
    bundle
        .send(
            early_hdr(&cluster, &name, payload),
            SendPayload::Bytes(payload.to_vec().into()),
            None,
            &t1,
        )
        .await
        .unwrap();

    // Init publishes the membership snapshot within the receiver's wait
    // window; the object is persisted and acknowledged
    let smap = Arc::clone(&cluster.smap);
    for res in cluster.run_all(&smap, 1).await {
        res.unwrap();
    }
    assert_eq!(cluster.holders("bck", &name), vec![1]);
    assert_eq!(cluster.targets[1].ctx.stats.snapshot().rx_count, 1);
    bundle.close(true).await;
}

// =============================================================================
// GFN suppression
// =============================================================================

#[tokio::test]
async fn test_gfn_served_objects_are_not_shipped() {
    let cluster = TestCluster::new(2, 1).await;
    let t1 = cluster.tid(1);

    let shipped = cluster.name_homed_at(&t1, "bck", 0);
    let served = cluster.name_homed_at(&t1, "bck", 1);
    cluster.put(0, "bck", &shipped, b"ship-me");
    // the neighbor already fetched this one through the read path
    cluster.put(0, "bck", &served, b"fetched");
    cluster.put(1, "bck", &served, b"fetched");
    cluster.targets[0]
        .manager
        .gfn_served(&format!("native/bck/{}", served));

    let smap = Arc::clone(&cluster.smap);
    for res in cluster.run_all(&smap, 1).await {
        res.unwrap();
    }

    // only the unserved object travels; the served one is skipped and its
    // source copy stays in place
    assert_eq!(cluster.targets[0].ctx.stats.snapshot().tx_count, 1);
    assert_eq!(cluster.holders("bck", &shipped), vec![1]);
    assert_eq!(cluster.holders("bck", &served), vec![0, 1]);
}

// =============================================================================
// Laws
// =============================================================================

#[tokio::test]
async fn test_rerun_on_same_map_is_idempotent() {
    let cluster = TestCluster::new(2, 1).await;
    let t1 = cluster.tid(1);
    for i in 0..5 {
        let name = cluster.name_homed_at(&t1, "bck", i);
        cluster.put(0, "bck", &name, b"data");
    }

    let smap = Arc::clone(&cluster.smap);
    for res in cluster.run_all(&smap, 1).await {
        res.unwrap();
    }
    let before: Vec<_> = cluster
        .targets
        .iter()
        .map(|t| t.ctx.stats.snapshot())
        .collect();

    // immediately re-run on the identical map: zero sends, zero retransmits
    for res in cluster.run_all(&smap, 2).await {
        res.unwrap();
    }
    for (t, before) in cluster.targets.iter().zip(before) {
        let after = t.ctx.stats.snapshot();
        assert_eq!(after.tx_count, before.tx_count);
        assert_eq!(after.rx_count, before.rx_count);
        assert_eq!(t.manager.retransmit_count(), 0);
    }
}

#[tokio::test]
async fn test_same_generation_is_rejected() {
    let cluster = TestCluster::new(2, 1).await;
    let smap = Arc::clone(&cluster.smap);
    for res in cluster.run_all(&smap, 1).await {
        res.unwrap();
    }
    // re-running the same generation returns immediately with no new run
    let m0 = &cluster.targets[0].manager;
    m0.run_rebalance(Arc::clone(&smap), 1, None).await.unwrap();
    assert_eq!(m0.status().reb_id, 1);
}

// =============================================================================
// EC namespace sub-phase
// =============================================================================

#[tokio::test]
async fn test_ec_namespace_phase_runs_before_data_movement() {
    let cluster = TestCluster::new(2, 1).await;
    for t in &cluster.targets {
        t.ctx.buckets.register(
            "media",
            BucketProps {
                provider: Provider::Native,
                ec_enabled: true,
            },
        );
    }

    // EC metadata on both targets
    for (i, t) in cluster.targets.iter().enumerate() {
        let mpath = &t.ctx.mountpaths.available()[0];
        let dir = mpath.ec_root().join("media");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("clip-{}.s0", i)), b"slice").unwrap();
        std::fs::write(dir.join(format!("clip-{}.s1", i)), b"slice").unwrap();
    }

    // plus one misplaced regular object
    let t1 = cluster.tid(1);
    let name = cluster.name_homed_at(&t1, "media", 0);
    cluster.put(0, "media", &name, b"payload");

    let smap = Arc::clone(&cluster.smap);
    for res in cluster.run_all(&smap, 1).await {
        res.unwrap();
    }

    // the namespace phase completed on every peer and data still moved
    assert_eq!(cluster.holders("media", &name), vec![1]);
    for t in &cluster.targets {
        assert_eq!(t.manager.status().stage, Stage::Done);
    }
}

// =============================================================================
// Placement sanity across the cluster helpers
// =============================================================================

#[tokio::test]
async fn test_holders_and_home_agree_after_convergence() {
    let cluster = TestCluster::new(3, 2).await;
    let mut names = Vec::new();
    for i in 0..30 {
        let name = format!("spread-{}", i);
        cluster.put(i % 3, "bck", &name, b"data");
        names.push(name);
    }

    let smap = Arc::clone(&cluster.smap);
    for res in cluster.run_all(&smap, 1).await {
        res.unwrap();
    }

    for name in &names {
        let uname = format!("native/bck/{}", name);
        let home = hrw_target(&uname, &cluster.smap).unwrap();
        let holders = cluster.holders("bck", name);
        assert_eq!(holders.len(), 1, "object {} holders {:?}", name, holders);
        assert_eq!(cluster.tid(holders[0]), home);
    }
}
