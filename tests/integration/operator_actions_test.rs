//! Retry, skip, single-node abort and string index updates

use conflux_core::{CoreError, FlowNodeState, ProcessInstanceState};
use conflux_test_utils::{fixtures, TestEngine};

#[tokio::test]
async fn test_failed_output_then_retry_then_skip() {
    let engine = TestEngine::new();
    let instance = engine
        .deploy_and_start(fixtures::failing_output_flow())
        .await
        .unwrap();

    let err = engine.complete(&instance.id, "calc").await.unwrap_err();
    assert!(matches!(err, CoreError::DependencyMissing(_)));

    let calc = engine.node(&instance.id, "calc").await.unwrap();
    assert_eq!(calc.state, FlowNodeState::Failed);
    assert!(calc.failure.is_some());
    assert_eq!(engine.metrics.snapshot().flow_nodes_failed, 1);

    let retried = engine.controller.retry_flow_node(&calc.id).await.unwrap();
    assert_eq!(retried.state, FlowNodeState::Ready);
    assert_eq!(retried.failure, None);
    assert_eq!(retried.executed_by, None);
    engine.drain().await;
    assert_eq!(
        engine.state_of(&instance.id, "calc").await.unwrap(),
        FlowNodeState::Executing
    );

    assert!(engine.complete_id(&calc.id).await.is_err());
    let skipped = engine.controller.skip_flow_node(&calc.id).await.unwrap();
    assert_eq!(skipped.state, FlowNodeState::Skipped);
    engine.drain().await;

    assert_eq!(
        engine.state_of(&instance.id, "end").await.unwrap(),
        FlowNodeState::Completed
    );
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Completed
    );
}

#[tokio::test]
async fn test_operator_actions_check_node_state() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(2)).await.unwrap();
    let branch = engine.node(&instance.id, "branch_1").await.unwrap();

    let err = engine.controller.retry_flow_node(&branch.id).await.unwrap_err();
    assert!(matches!(err, CoreError::FlowNodeState { .. }));

    let err = engine.controller.skip_flow_node(&branch.id).await.unwrap_err();
    assert!(matches!(err, CoreError::FlowNodeState { .. }));

    let err = engine.controller.execute_flow_node(&branch.id).await.unwrap_err();
    assert!(matches!(err, CoreError::FlowNodeState { .. }));
}

#[tokio::test]
async fn test_aborting_a_branch_releases_the_join() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::fork_join(2)).await.unwrap();

    let branch = engine.node(&instance.id, "branch_1").await.unwrap();
    let aborted = engine.controller.abort_flow_node(&branch.id).await.unwrap();
    assert_eq!(aborted.state, FlowNodeState::Aborted);
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Started
    );

    engine.complete(&instance.id, "branch_2").await.unwrap();

    assert_eq!(
        engine.state_of(&instance.id, "join").await.unwrap(),
        FlowNodeState::Completed
    );
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Completed
    );

    let err = engine.controller.abort_flow_node(&branch.id).await.unwrap_err();
    assert!(matches!(err, CoreError::FlowNodeState { .. }));
}

#[tokio::test]
async fn test_string_indexes() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::scripted_flow()).await.unwrap();

    let index = instance.string_index(1).unwrap();
    assert_eq!(index.label, "amount");
    assert_eq!(index.value.as_deref(), Some("21"));

    let updated = engine
        .controller
        .set_string_index(&instance.id, 2, Some("urgent".to_string()))
        .await
        .unwrap();
    assert_eq!(updated.string_index(2).unwrap().value.as_deref(), Some("urgent"));
    assert_eq!(
        engine
            .persistence
            .process_instance(&instance.id)
            .await
            .unwrap()
            .string_index(2)
            .unwrap()
            .value
            .as_deref(),
        Some("urgent")
    );

    let err = engine
        .controller
        .set_string_index(&instance.id, 6, Some("overflow".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidDefinition(_)));

    engine.complete(&instance.id, "approve").await.unwrap();
    assert!(engine
        .controller
        .set_string_index(&instance.id, 1, None)
        .await
        .is_err());
}
