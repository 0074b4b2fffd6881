//! Embedded sub-process scenarios

use conflux_core::{CoreError, FlowNodeState, ParentContainer, ProcessInstanceState};
use conflux_expression::Value;
use conflux_test_utils::assertions::assert_no_live_nodes;
use conflux_test_utils::{fixtures, TestEngine};

#[tokio::test]
async fn test_sub_process_runs_its_own_container() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::sub_process_flow()).await.unwrap();

    let review = engine.node(&instance.id, "review").await.unwrap();
    assert_eq!(review.state, FlowNodeState::Executing);

    let check = engine.node(&instance.id, "check").await.unwrap();
    assert_eq!(check.state, FlowNodeState::Executing);
    assert_eq!(check.parent, ParentContainer::Activity(review.id.clone()));

    let err = engine.complete_id(&review.id).await.unwrap_err();
    assert!(matches!(err, CoreError::FlowNodeState { .. }));

    engine.complete(&instance.id, "check").await.unwrap();

    assert_eq!(
        engine.state_of(&instance.id, "review").await.unwrap(),
        FlowNodeState::Completed
    );
    assert_eq!(
        engine.state_of(&instance.id, "after").await.unwrap(),
        FlowNodeState::Executing
    );

    let variables = engine.controller.variables(&instance.id).await.unwrap();
    assert_eq!(variables.get("checked"), Some(&Value::Boolean(true)));
    assert!(!variables.contains_key("attempts"));
    assert_eq!(
        engine.persistence.variables(&review.id.0).await.get("attempts"),
        Some(&Value::Long(1))
    );

    engine.complete(&instance.id, "after").await.unwrap();
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Completed
    );
}

#[tokio::test]
async fn test_abort_reaches_into_sub_process() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::sub_process_flow()).await.unwrap();

    let aborted = engine.controller.abort_process_instance(&instance.id).await.unwrap();
    assert_eq!(aborted.state, ProcessInstanceState::Aborted);

    assert_eq!(
        engine.state_of(&instance.id, "check").await.unwrap(),
        FlowNodeState::Aborted
    );
    assert_eq!(
        engine.state_of(&instance.id, "review").await.unwrap(),
        FlowNodeState::Aborted
    );
    let nodes = engine.controller.flow_node_instances(&instance.id).await.unwrap();
    assert_no_live_nodes(&nodes).unwrap();
}

#[tokio::test]
async fn test_aborting_the_activity_aborts_its_children() {
    let engine = TestEngine::new();
    let instance = engine.deploy_and_start(fixtures::sub_process_flow()).await.unwrap();
    let review = engine.node(&instance.id, "review").await.unwrap();

    engine.controller.abort_flow_node(&review.id).await.unwrap();
    engine.drain().await;

    assert_eq!(
        engine.state_of(&instance.id, "check").await.unwrap(),
        FlowNodeState::Aborted
    );
    assert!(engine.nodes_named(&instance.id, "after").await.unwrap().is_empty());
    // the aborted branch was the only one left
    assert_eq!(
        engine.instance(&instance.id).await.unwrap().state,
        ProcessInstanceState::Completed
    );
}
