//! A transition the persistence collaborator refuses leaves no trace

use conflux_core::{CoreError, FlowNodeState, ProcessInstanceState};
use conflux_test_utils::{fixtures, TestEngine};
use std::collections::HashMap;

#[tokio::test]
async fn test_refused_completion_changes_nothing() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(2)).await.unwrap();
    let branch = engine.node(&instance.id, "branch_1").await.unwrap();

    let transitions = engine.persistence.transitions();
    let events = engine.event_log.events().await.len();
    let enqueued = engine.dispatcher.enqueued();

    engine.faults.fail_next(1);
    let err = engine
        .controller
        .complete_flow_node(&branch.id, "tester")
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::Persistence("injected failure".into()));

    let in_memory = engine.controller.flow_node_instance(&branch.id).await.unwrap();
    assert_eq!(in_memory.state, FlowNodeState::Executing);
    assert_eq!(in_memory.executed_by, None);

    let stored = engine.persistence.flow_node_instance(&branch.id).await.unwrap();
    assert_eq!(stored.state, FlowNodeState::Executing);
    assert_eq!(engine.persistence.transitions(), transitions);
    assert_eq!(engine.event_log.events().await.len(), events);
    assert_eq!(engine.dispatcher.enqueued(), enqueued);

    // the same completion goes through once persistence recovers
    engine.complete_id(&branch.id).await.unwrap();
    assert_eq!(
        engine.persistence.flow_node_instance(&branch.id).await.unwrap().state,
        FlowNodeState::Completed
    );
}

#[tokio::test]
async fn test_refused_cancel_keeps_instance_running() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(2)).await.unwrap();

    engine.faults.fail_next(1);
    assert!(engine
        .controller
        .cancel_process_instance(&instance.id)
        .await
        .is_err());

    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Started
    );
    assert_eq!(
        engine.persistence.process_instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Started
    );
    assert_eq!(
        engine.state_of(&instance.id, "branch_1").await.unwrap(),
        FlowNodeState::Executing
    );

    let cancelled = engine
        .controller
        .cancel_process_instance(&instance.id)
        .await
        .unwrap();
    assert_eq!(cancelled.state, ProcessInstanceState::Cancelled);
}

#[tokio::test]
async fn test_refused_start_registers_nothing() {
    let engine = TestEngine::new();
    let id = engine.deploy(fixtures::fork_join(2)).await.unwrap();

    engine.faults.fail_next(1);
    assert!(engine.start(&id, HashMap::new()).await.is_err());
    assert_eq!(engine.dispatcher.pending().await, 0);
    assert_eq!(engine.persistence.transitions(), 0);

    let instance = engine.start(&id, HashMap::new()).await.unwrap();
    assert_eq!(
        engine.persistence.process_instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Started
    );
}

#[tokio::test]
async fn test_refused_completion_commit_fails_the_node() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(2)).await.unwrap();
    let branch = engine.node(&instance.id, "branch_1").await.unwrap();

    let ticket = engine
        .controller
        .begin_completion(&branch.id, "tester")
        .await
        .unwrap();
    engine.faults.fail_next(1);
    let err = engine.controller.finish_completion(ticket).await.unwrap_err();
    assert_eq!(err, CoreError::Persistence("injected failure".into()));

    let failed = engine.controller.flow_node_instance(&branch.id).await.unwrap();
    assert_eq!(failed.state, FlowNodeState::Failed);
    assert!(failed
        .failure
        .as_deref()
        .is_some_and(|f| f.contains("injected failure")));
    assert_eq!(
        engine.persistence.flow_node_instance(&branch.id).await.unwrap().state,
        FlowNodeState::Failed
    );
    assert!(engine.nodes_named(&instance.id, "join").await.unwrap().is_empty());

    // the failed node goes through the usual retry
    engine.controller.retry_flow_node(&branch.id).await.unwrap();
    engine.drain().await;
    assert_eq!(
        engine.state_of(&instance.id, "branch_1").await.unwrap(),
        FlowNodeState::Executing
    );
    engine.complete(&instance.id, "branch_1").await.unwrap();
    engine.complete(&instance.id, "branch_2").await.unwrap();
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Completed
    );
}

#[tokio::test]
async fn test_unreleased_claim_can_be_completed_again() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(2)).await.unwrap();
    let branch = engine.node(&instance.id, "branch_1").await.unwrap();

    let ticket = engine
        .controller
        .begin_completion(&branch.id, "tester")
        .await
        .unwrap();
    // the completion and the release of the claim are both refused
    engine.faults.fail_next(2);
    assert!(engine.controller.finish_completion(ticket).await.is_err());
    assert_eq!(
        engine.state_of(&instance.id, "branch_1").await.unwrap(),
        FlowNodeState::Completing
    );

    let completed = engine.complete_id(&branch.id).await.unwrap();
    assert_eq!(completed.state, FlowNodeState::Completed);
    engine.complete(&instance.id, "branch_2").await.unwrap();
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Completed
    );
}

#[tokio::test]
async fn test_live_claim_blocks_a_second_completion() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(2)).await.unwrap();
    let branch = engine.node(&instance.id, "branch_1").await.unwrap();

    let ticket = engine
        .controller
        .begin_completion(&branch.id, "tester")
        .await
        .unwrap();
    let err = engine.complete_id(&branch.id).await.unwrap_err();
    assert!(matches!(err, CoreError::FlowNodeState { .. }));

    engine.controller.finish_completion(ticket).await.unwrap();
    assert_eq!(
        engine.state_of(&instance.id, "branch_1").await.unwrap(),
        FlowNodeState::Completed
    );
}

#[tokio::test]
async fn test_refused_commit_during_cancel_still_reaches_cancelled() {
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
    let cancelling = engine
        .controller
        .cancel_process_instance(&instance.id)
        .await
        .unwrap();
    assert_eq!(cancelling.state, ProcessInstanceState::Cancelling);

    engine.faults.fail_next(1);
    assert!(engine.controller.finish_completion(ticket).await.is_err());
    engine.drain().await;

    assert_eq!(
        engine.state_of(&instance.id, "step2").await.unwrap(),
        FlowNodeState::Aborted
    );
    assert!(engine.nodes_named(&instance.id, "gateway2").await.unwrap().is_empty());
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Cancelled
    );
}

#[tokio::test]
async fn test_cancel_aborts_an_unreleased_claim() {
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
    engine.faults.fail_next(2);
    assert!(engine.controller.finish_completion(ticket).await.is_err());

    let cancelled = engine
        .controller
        .cancel_process_instance(&instance.id)
        .await
        .unwrap();
    assert_eq!(cancelled.state, ProcessInstanceState::Cancelled);
    assert_eq!(
        engine.state_of(&instance.id, "step2").await.unwrap(),
        FlowNodeState::Aborted
    );
    let nodes = engine.controller.flow_node_instances(&instance.id).await.unwrap();
    assert!(nodes.iter().all(|n| !n.is_live()));
}

#[tokio::test]
async fn test_repeated_cancel_clears_an_unreleased_claim() {
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
    let cancelling = engine
        .controller
        .cancel_process_instance(&instance.id)
        .await
        .unwrap();
    assert_eq!(cancelling.state, ProcessInstanceState::Cancelling);

    engine.faults.fail_next(2);
    assert!(engine.controller.finish_completion(ticket).await.is_err());
    assert_eq!(
        engine.state_of(&instance.id, "step2").await.unwrap(),
        FlowNodeState::Completing
    );

    let cancelled = engine
        .controller
        .cancel_process_instance(&instance.id)
        .await
        .unwrap();
    assert_eq!(cancelled.state, ProcessInstanceState::Cancelled);
    assert_eq!(
        engine.state_of(&instance.id, "step2").await.unwrap(),
        FlowNodeState::Aborted
    );
}

#[tokio::test]
async fn test_refused_failure_record_keeps_the_node_recoverable() {
    let engine = TestEngine::new();
    let instance = engine
        .deploy_and_start(fixtures::failing_output_flow())
        .await
        .unwrap();
    let calc = engine.node(&instance.id, "calc").await.unwrap();

    let ticket = engine
        .controller
        .begin_completion(&calc.id, "tester")
        .await
        .unwrap();
    // the output fails and recording FAILED is refused
    engine.faults.fail_next(1);
    let err = engine.controller.finish_completion(ticket).await.unwrap_err();
    assert_eq!(err, CoreError::Persistence("injected failure".into()));
    assert_eq!(
        engine.persistence.flow_node_instance(&calc.id).await.unwrap().state,
        FlowNodeState::Completing
    );

    let err = engine.complete_id(&calc.id).await.unwrap_err();
    assert!(matches!(err, CoreError::DependencyMissing(_)));
    assert_eq!(
        engine.persistence.flow_node_instance(&calc.id).await.unwrap().state,
        FlowNodeState::Failed
    );

    engine.controller.skip_flow_node(&calc.id).await.unwrap();
    engine.drain().await;
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Completed
    );
}
