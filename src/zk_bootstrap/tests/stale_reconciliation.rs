mod common;

use common::{ip, Call, SimCluster};
use std::{collections::BTreeSet, time::Duration};
use zk_bootstrap::{
    ensemble::{
        reconcile::{ReconciliationPlan, StaleMemberReconciler},
        BootstrapError, EnsembleMemberSpec, Role, ServicePorts,
    },
    util::poll::PollPolicy,
};

fn policy() -> PollPolicy {
    PollPolicy::bounded(3, Duration::ZERO)
}

fn participants(ids: &[u32]) -> Vec<EnsembleMemberSpec> {
    ids.iter()
        .map(|&id| {
            EnsembleMemberSpec::new(id, ip(id as u8), Role::Participant, ServicePorts::default())
        })
        .collect()
}

#[tokio::test]
async fn test_empty_plan_makes_no_calls() {
    let cluster = SimCluster::new(3);
    let node = cluster.add_instance(1, Some(1));

    StaleMemberReconciler::new(&node, &node, policy())
        .apply(ip(2), &ReconciliationPlan::default())
        .await
        .unwrap();

    assert!(cluster.calls().is_empty());
}

#[tokio::test]
async fn test_clean_registry_only_reads() {
    let cluster = SimCluster::new(3);
    let node = cluster.add_instance(1, Some(1));
    cluster.add_instance(2, Some(2));

    let removed = StaleMemberReconciler::new(&node, &node, policy())
        .reconcile(ip(2), &BTreeSet::from([1, 2, 3]))
        .await
        .unwrap();

    assert!(removed.is_empty());
    assert_eq!(cluster.calls_of(1), vec![Call::ListKeys]);
}

#[tokio::test]
async fn test_removes_from_ensemble_before_registry() {
    let cluster = SimCluster::new(3);
    let node = cluster.add_instance(1, Some(1));
    cluster.add_instance(2, Some(2));
    cluster.add_instance(3, Some(3));
    cluster.add_instance(5, Some(5));
    cluster.set_live_members(participants(&[1, 2, 3, 5]));

    let removed = StaleMemberReconciler::new(&node, &node, policy())
        .reconcile(ip(2), &BTreeSet::from([1, 3]))
        .await
        .unwrap();

    assert_eq!(removed, vec![2, 5]);
    assert_eq!(
        cluster.calls_of(1),
        vec![
            Call::ListKeys,
            Call::ReconfigRemove {
                anchor: ip(2),
                ids: vec![2, 5],
            },
            Call::DeleteKeys(vec!["2".to_string(), "5".to_string()]),
        ]
    );
    assert_eq!(cluster.registry_keys(), BTreeSet::from(["1".to_string(), "3".to_string()]));
    let live: Vec<_> = cluster.state().live_config.members().map(|m| m.id).collect();
    assert_eq!(live, vec![1, 3]);
}

#[tokio::test]
async fn test_retries_and_rereads_after_lost_race() {
    let cluster = SimCluster::new(2);
    let node = cluster.add_instance(1, Some(1));
    cluster.add_instance(4, Some(4));
    cluster.state().failing_removes = 1;

    let removed = StaleMemberReconciler::new(&node, &node, policy())
        .reconcile(ip(2), &BTreeSet::from([1]))
        .await
        .unwrap();

    assert_eq!(removed, vec![4]);
    let list_calls = cluster
        .calls_of(1)
        .into_iter()
        .filter(|call| *call == Call::ListKeys)
        .count();
    assert_eq!(list_calls, 2);
    assert!(!cluster.registry_keys().contains("4"));
}

#[tokio::test]
async fn test_persistent_failure_keeps_registry() {
    let cluster = SimCluster::new(2);
    let node = cluster.add_instance(1, Some(1));
    cluster.add_instance(4, Some(4));
    cluster.state().failing_removes = u32::MAX;

    let err = StaleMemberReconciler::new(&node, &node, policy())
        .reconcile(ip(2), &BTreeSet::from([1]))
        .await
        .unwrap_err();

    match err {
        BootstrapError::ReconciliationFailed { ids, attempts, .. } => {
            assert_eq!(ids, "4");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    // Never released while the ensemble may still count it
    assert!(cluster.registry_keys().contains("4"));
    assert!(!cluster
        .calls_of(1)
        .iter()
        .any(|call| matches!(call, Call::DeleteKeys(_))));
}
