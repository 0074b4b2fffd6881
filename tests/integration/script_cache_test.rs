//! Compiled-script cache lifecycle and engine configuration

use conflux_core::{CoreError, EngineConfig, FlowNodeState, ScriptCacheMode};
use conflux_expression::Value;
use conflux_monitoring::{init_test_logging, MonitoringConfig};
use conflux_test_utils::{fixtures, TestEngine};
use std::collections::HashMap;

#[tokio::test]
async fn test_instances_of_a_definition_share_compiled_scripts() -> anyhow::Result<()> {
    init_test_logging();
    let engine = TestEngine::new();
    let id = engine.deploy(fixtures::scripted_flow()).await?;

    let first = engine.start(&id, HashMap::new()).await?;
    let second = engine
        .start(&id, HashMap::from([("amount".to_string(), Value::Long(5))]))
        .await?;

    assert_eq!(
        engine.controller.variables(&first.id).await?.get("total"),
        Some(&Value::Long(42))
    );
    assert_eq!(
        engine.controller.variables(&second.id).await?.get("total"),
        Some(&Value::Long(10))
    );
    assert_eq!(
        engine.state_of(&first.id, "approve").await?,
        FlowNodeState::Executing
    );

    let stats = engine.script_cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.shells, 1);
    assert_eq!(stats.entries, 1);
    Ok(())
}

#[tokio::test]
async fn test_undeploy_drops_the_definition_shell() -> anyhow::Result<()> {
    let engine = TestEngine::new();
    let id = engine.deploy(fixtures::scripted_flow()).await?;
    let running = engine.start(&id, HashMap::new()).await?;
    assert_eq!(engine.script_cache.stats().shells, 1);

    engine.definitions.undeploy(&id).await?;
    assert_eq!(engine.script_cache.stats().shells, 0);

    let err = engine.start(&id, HashMap::new()).await.unwrap_err();
    assert_eq!(err, CoreError::ProcessDefinitionNotFound(id.0.clone()));

    // instances already running keep their definition
    engine.complete(&running.id, "approve").await?;
    assert_eq!(
        engine.state_of(&running.id, "end").await?,
        FlowNodeState::Completed
    );
    Ok(())
}

#[tokio::test]
async fn test_redeploy_recompiles() -> anyhow::Result<()> {
    let engine = TestEngine::new();
    let id = engine.deploy(fixtures::scripted_flow()).await?;
    engine.start(&id, HashMap::new()).await?;

    engine.deploy(fixtures::scripted_flow()).await?;
    engine.start(&id, HashMap::new()).await?;

    let stats = engine.script_cache.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 0);
    Ok(())
}

#[tokio::test]
async fn test_disabled_cache_compiles_every_time() -> anyhow::Result<()> {
    let config = EngineConfig {
        script_cache: ScriptCacheMode::Disabled,
        ..EngineConfig::default()
    };
    let engine = TestEngine::with_config(config);
    let id = engine.deploy(fixtures::scripted_flow()).await?;
    engine.start(&id, HashMap::new()).await?;
    engine.start(&id, HashMap::new()).await?;

    let stats = engine.script_cache.stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.shells, 0);
    Ok(())
}

#[tokio::test]
async fn test_config_overrides_reach_the_engine() -> anyhow::Result<()> {
    let config = EngineConfig::default().with_overrides(|key| match key {
        "CONFLUX_CHECK_RETURN_TYPES" => Some("true".to_string()),
        "CONFLUX_SYSTEM_ACTOR" => Some("robot".to_string()),
        _ => None,
    });
    assert_eq!(
        MonitoringConfig::from_engine_config(&config).log_filter,
        config.log_filter
    );

    let engine = TestEngine::with_config(config);
    let id = engine.deploy(fixtures::scripted_flow()).await?;
    let instance = engine.start(&id, HashMap::new()).await?;

    let price = engine.node(&instance.id, "price").await?;
    assert_eq!(price.state, FlowNodeState::Completed);
    assert_eq!(price.executed_by.as_deref(), Some("robot"));
    Ok(())
}
