//! Cancel, abort and terminate scenarios

use conflux_core::{CoreError, FlowNodeState, ProcessInstanceState};
use conflux_test_utils::assertions::{assert_no_live_nodes, assert_node_states};
use conflux_test_utils::{fixtures, TestEngine};

#[tokio::test]
async fn test_cancel_while_join_waits() {
    let engine = TestEngine::new();
    let instance = engine
        .deploy_and_start(fixtures::cancel_parallel_merge_gateway())
        .await
        .unwrap();

    engine.complete(&instance.id, "step1").await.unwrap();
    engine.complete(&instance.id, "step2").await.unwrap();
    assert_eq!(
        engine.state_of(&instance.id, "gateway2").await.unwrap(),
        FlowNodeState::Waiting
    );

    let cancelled = engine
        .controller
        .cancel_process_instance(&instance.id)
        .await
        .unwrap();
    engine.drain().await;
    assert_eq!(cancelled.state, ProcessInstanceState::Cancelled);

    let nodes = engine.controller.flow_node_instances(&instance.id).await.unwrap();
    assert_node_states(
        &nodes,
        &[
            ("step1", FlowNodeState::Completed),
            ("gateway1", FlowNodeState::Completed),
            ("step2", FlowNodeState::Completed),
            ("step3", FlowNodeState::Aborted),
            ("gateway2", FlowNodeState::Aborted),
        ],
    )
    .unwrap();
    assert_no_live_nodes(&nodes).unwrap();
    assert!(engine.nodes_named(&instance.id, "step4").await.unwrap().is_empty());

    let records = engine.controller.gateway_records(&instance.id).await.unwrap();
    assert!(records.iter().all(|r| r.discarded && !r.fired));

    // the pending branch can no longer run
    let step3 = engine.node(&instance.id, "step3").await.unwrap();
    let err = engine.controller.execute_flow_node(&step3.id).await.unwrap_err();
    assert!(matches!(err, CoreError::FlowNodeState { .. }));
    let err = engine.complete_id(&step3.id).await.unwrap_err();
    assert!(matches!(err, CoreError::FlowNodeState { .. }));
    engine.drain().await;

    assert!(engine.nodes_named(&instance.id, "step4").await.unwrap().is_empty());
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Cancelled
    );
}

#[tokio::test]
async fn test_cancel_between_claim_and_commit_of_a_completion() {
    let engine = TestEngine::new();
    let instance = engine
        .deploy_and_start(fixtures::cancel_parallel_merge_gateway())
        .await
        .unwrap();
    engine.complete(&instance.id, "step1").await.unwrap();

    let step2 = engine.node(&instance.id, "step2").await.unwrap();
    let ticket = engine
        .controller
        .begin_completion(&step2.id, "tester")
        .await
        .unwrap();
    assert_eq!(ticket.flow_node_id(), &step2.id);

    let cancelling = engine
        .controller
        .cancel_process_instance(&instance.id)
        .await
        .unwrap();
    assert_eq!(cancelling.state, ProcessInstanceState::Cancelling);
    assert_eq!(
        engine.state_of(&instance.id, "step3").await.unwrap(),
        FlowNodeState::Aborted
    );

    let step2 = engine.controller.finish_completion(ticket).await.unwrap();
    assert_eq!(step2.state, FlowNodeState::Completed);
    engine.drain().await;

    assert_eq!(
        engine.state_of(&instance.id, "gateway2").await.unwrap(),
        FlowNodeState::Aborted
    );
    assert!(engine.nodes_named(&instance.id, "step4").await.unwrap().is_empty());
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Cancelled
    );
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_final() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(2)).await.unwrap();

    engine.controller.cancel_process_instance(&instance.id).await.unwrap();
    let again = engine.controller.cancel_process_instance(&instance.id).await.unwrap();
    assert_eq!(again.state, ProcessInstanceState::Cancelled);
    assert_eq!(engine.metrics.snapshot().instances_cancelled, 1);

    let err = engine
        .controller
        .abort_process_instance(&instance.id)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ProcessInstanceState { .. }));

    let branch = engine.node(&instance.id, "branch_1").await.unwrap();
    let err = engine.complete_id(&branch.id).await.unwrap_err();
    assert!(matches!(err, CoreError::FlowNodeState { .. }));
}

#[tokio::test]
async fn test_abort_reaches_aborted() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(3)).await.unwrap();
    engine.complete(&instance.id, "branch_1").await.unwrap();

    let aborted = engine.controller.abort_process_instance(&instance.id).await.unwrap();
    assert_eq!(aborted.state, ProcessInstanceState::Aborted);

    let history = engine.event_log.process_instance_history(&instance.id).await;
    assert_eq!(
        history,
        vec![
            ProcessInstanceState::Created,
            ProcessInstanceState::Initializing,
            ProcessInstanceState::Started,
            ProcessInstanceState::Aborting,
            ProcessInstanceState::Aborted,
        ]
    );
}

#[tokio::test]
async fn test_terminate_end_aborts_competing_branch() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::terminate_flow()).await.unwrap();

    let snapshot = engine.instance(&instance.id).await.unwrap();
    assert_eq!(snapshot.state, ProcessInstanceState::Completed);
    assert!(snapshot.interrupting_event);

    let nodes = engine.controller.flow_node_instances(&instance.id).await.unwrap();
    assert_node_states(
        &nodes,
        &[
            ("fast", FlowNodeState::Completed),
            ("kill", FlowNodeState::Completed),
            ("slow", FlowNodeState::Aborted),
        ],
    )
    .unwrap();
    assert!(engine.nodes_named(&instance.id, "end").await.unwrap().is_empty());
}
