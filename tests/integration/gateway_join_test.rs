//! Join gateway synchronization scenarios

use conflux_core::{FlowNodeState, ProcessInstanceState, TransitionId};
use conflux_expression::Value;
use conflux_test_utils::assertions::{assert_instance_state, assert_no_live_nodes};
use conflux_test_utils::{fixtures, TestEngine};
use std::collections::{BTreeSet, HashMap};

fn transitions(ids: &[&str]) -> BTreeSet<TransitionId> {
    ids.iter().map(|id| TransitionId(id.to_string())).collect()
}

#[tokio::test]
async fn test_parallel_join_fires_once_whatever_the_completion_order() {
    for order in [[1, 2, 3], [3, 1, 2], [2, 3, 1]] {
        let engine = TestEngine::new();
        let instance = engine.deploy_and_start(fixtures::fork_join(3)).await.unwrap();

        for (done, branch) in order.iter().enumerate() {
            engine
                .complete(&instance.id, &format!("branch_{}", branch))
                .await
                .unwrap();
            if done < 2 {
                assert_eq!(
                    engine.state_of(&instance.id, "join").await.unwrap(),
                    FlowNodeState::Waiting
                );
            }
        }

        let joins = engine.nodes_named(&instance.id, "join").await.unwrap();
        assert_eq!(joins.len(), 1, "order {:?}", order);
        assert_eq!(joins[0].state, FlowNodeState::Completed);

        let snapshot = engine.instance(&instance.id).await.unwrap();
        assert_instance_state(&snapshot, ProcessInstanceState::Completed).unwrap();
        let nodes = engine.controller.flow_node_instances(&instance.id).await.unwrap();
        assert_no_live_nodes(&nodes).unwrap();
        assert_eq!(engine.metrics.snapshot().gateways_fired, 1);
    }
}

#[tokio::test]
async fn test_join_keeps_waiting_while_a_branch_is_open() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(3)).await.unwrap();

    engine.complete(&instance.id, "branch_1").await.unwrap();
    engine.complete(&instance.id, "branch_2").await.unwrap();

    assert_eq!(
        engine.state_of(&instance.id, "join").await.unwrap(),
        FlowNodeState::Waiting
    );
    assert!(engine.nodes_named(&instance.id, "end").await.unwrap().is_empty());

    let records = engine.controller.gateway_records(&instance.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].fired);
    assert_eq!(records[0].arrived, transitions(&["t_join_1", "t_join_2"]));

    let snapshot = engine.instance(&instance.id).await.unwrap();
    assert_eq!(snapshot.state, ProcessInstanceState::Started);
}

#[tokio::test]
async fn test_join_history_goes_through_waiting() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(2)).await.unwrap();

    engine.complete(&instance.id, "branch_2").await.unwrap();
    engine.complete(&instance.id, "branch_1").await.unwrap();

    let join = engine.node(&instance.id, "join").await.unwrap();
    let history = engine.event_log.flow_node_history(&join.id).await;
    assert_eq!(history.first(), Some(&FlowNodeState::Waiting));
    assert_eq!(history.last(), Some(&FlowNodeState::Completed));
    assert!(history.contains(&FlowNodeState::Ready));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_fire_the_join_once() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(4)).await.unwrap();

    let mut branches = Vec::new();
    for i in 1..=4 {
        branches.push(engine.node(&instance.id, &format!("branch_{}", i)).await.unwrap().id);
    }

    let controller = &engine.controller;
    let results = futures::future::join_all(
        branches
            .iter()
            .map(|id| controller.complete_flow_node(id, "tester")),
    )
    .await;
    assert!(results.iter().all(|r| r.is_ok()));
    engine.drain().await;

    let joins = engine.nodes_named(&instance.id, "join").await.unwrap();
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].state, FlowNodeState::Completed);
    assert_eq!(engine.nodes_named(&instance.id, "end").await.unwrap().len(), 1);
    assert_eq!(engine.metrics.snapshot().gateways_fired, 1);
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Completed
    );
}

#[tokio::test]
async fn test_inclusive_merge_waits_for_activated_branches_only() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::inclusive_join()).await.unwrap();

    assert_eq!(engine.state_of(&instance.id, "a").await.unwrap(), FlowNodeState::Executing);
    assert_eq!(engine.state_of(&instance.id, "c").await.unwrap(), FlowNodeState::Executing);
    assert!(engine.nodes_named(&instance.id, "b").await.unwrap().is_empty());

    engine.complete(&instance.id, "a").await.unwrap();
    let records = engine.controller.gateway_records(&instance.id).await.unwrap();
    assert_eq!(records[0].required, transitions(&["from_a", "from_c"]));
    assert_eq!(
        engine.state_of(&instance.id, "merge").await.unwrap(),
        FlowNodeState::Waiting
    );

    engine.complete(&instance.id, "c").await.unwrap();
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Completed
    );
}

#[tokio::test]
async fn test_inclusive_merge_with_every_branch_active() {
    let engine = TestEngine::new();
    let id = engine.deploy(fixtures::inclusive_join()).await.unwrap();
    let variables = HashMap::from([("amount".to_string(), Value::Long(500))]);
    let instance = engine.start(&id, variables).await.unwrap();

    engine.complete(&instance.id, "a").await.unwrap();
    engine.complete(&instance.id, "c").await.unwrap();
    assert_eq!(
        engine.state_of(&instance.id, "merge").await.unwrap(),
        FlowNodeState::Waiting
    );

    engine.complete(&instance.id, "b").await.unwrap();
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Completed
    );
}

#[tokio::test]
async fn test_parallel_join_after_exclusive_choice_drops_untaken_branch() {
    for (fast, taken) in [(true, "a"), (false, "b")] {
        let engine = TestEngine::new();
        let id = engine.deploy(fixtures::exclusive_then_parallel()).await.unwrap();
        let variables = HashMap::from([("fast".to_string(), Value::Boolean(fast))]);
        let instance = engine.start(&id, variables).await.unwrap();

        let untaken = if taken == "a" { "b" } else { "a" };
        assert!(engine.nodes_named(&instance.id, untaken).await.unwrap().is_empty());

        engine.complete(&instance.id, taken).await.unwrap();

        assert_eq!(
            engine.state_of(&instance.id, "join").await.unwrap(),
            FlowNodeState::Completed
        );
        assert_eq!(
            engine.instance(&instance.id).await.unwrap().state,
            ProcessInstanceState::Completed
        );
    }
}
