use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use maestro::{
    Agent, CompletionResponse, Conductor, Ensemble, EnsembleRunOptions, ErrorMode,
    ExecutionTrace, Merger, MockProvider, OrchestrationHooks, OrchestratorError, ParallelConfig,
    SequentialConfig, SharedContext, SimpleHandoffHandler, Strategy, ToolCall, Usage,
};

fn echo_agent(name: &str) -> Arc<Agent> {
    let prefix = name.to_string();
    Arc::new(
        Agent::builder()
            .name(name)
            .system_prompt("Echo the input.")
            .provider(Arc::new(MockProvider::from_fn(move |request| {
                let input = request
                    .messages
                    .last()
                    .and_then(|m| m.text())
                    .unwrap_or_default();
                Ok(CompletionResponse::text(format!("{prefix}: {input}"))
                    .with_usage(Usage::new(7, 3, 10)))
            })))
            .build()
            .unwrap(),
    )
}

fn sequential_conductor() -> Conductor {
    Conductor::builder(Strategy::Sequential(SequentialConfig::new()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_context_receives_run_inputs_and_agent_messages() -> Result<()> {
    let ensemble = Ensemble::builder()
        .name("team")
        .agent(echo_agent("a"))
        .default_conductor(sequential_conductor())
        .build()?;

    let result = ensemble.run("hello", EnsembleRunOptions::default()).await?;
    assert_eq!(result.context.get("ensemble:input"), Some(json!("hello")));
    assert_eq!(result.context.get("ensemble:name"), Some(json!("team")));

    let agent_messages = result.context.agent_messages("a");
    assert_eq!(agent_messages.len(), 1);
    assert_eq!(agent_messages[0].text(), Some("a: hello"));
    assert_eq!(result.context.history().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_adopted_context_is_reused() -> Result<()> {
    let context = SharedContext::new();
    context.set("carried", json!("over"));

    let ensemble = Ensemble::builder()
        .name("team")
        .agent(echo_agent("a"))
        .default_conductor(sequential_conductor())
        .build()?;

    let result = ensemble
        .run(
            "hi",
            EnsembleRunOptions {
                context: Some(context.clone()),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(result.context.get("carried"), Some(json!("over")));
    // The handle in the result aliases the adopted context
    assert_eq!(context.get("ensemble:name"), Some(json!("team")));
    Ok(())
}

#[tokio::test]
async fn test_usage_is_summed_element_wise() -> Result<()> {
    let ensemble = Ensemble::builder()
        .name("team")
        .agent(echo_agent("a"))
        .agent(echo_agent("b"))
        .agent(echo_agent("c"))
        .default_conductor(sequential_conductor())
        .build()?;

    let result = ensemble.run("x", EnsembleRunOptions::default()).await?;
    assert_eq!(result.usage, Usage::new(21, 9, 30));
    assert_eq!(
        result.usage.total_tokens,
        result.usage.prompt_tokens + result.usage.completion_tokens
    );

    let summed: u32 = result
        .agent_results
        .values()
        .map(|r| r.usage.total_tokens)
        .sum();
    assert_eq!(result.usage.total_tokens, summed);
    Ok(())
}

#[tokio::test]
async fn test_cancellation_stops_before_next_step() -> Result<()> {
    // A hook trips the cancel signal as soon as the first agent finishes
    struct CancelAfterFirst(CancellationToken);

    #[async_trait::async_trait]
    impl OrchestrationHooks for CancelAfterFirst {
        async fn after_agent(&self, _agent_id: &str, _response: &str) -> Result<()> {
            self.0.cancel();
            Ok(())
        }
    }

    let cancel = CancellationToken::new();
    let trace = ExecutionTrace::new();
    let ensemble = Ensemble::builder()
        .name("team")
        .agent(echo_agent("first"))
        .agent(echo_agent("second"))
        .default_conductor(
            Conductor::builder(Strategy::Sequential(SequentialConfig::new()))
                .hook(Arc::new(CancelAfterFirst(cancel.clone())))
                .build()?,
        )
        .build()?;

    let error = ensemble
        .run(
            "go",
            EnsembleRunOptions {
                cancel: Some(cancel),
                trace: Some(trace.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(error, OrchestratorError::Cancelled));

    // The first step completed; no second step was started
    let steps = trace.steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].agent_id, "first");
    assert!(steps[0].output.is_some());
    assert!(trace.end_time().is_some());
    Ok(())
}

#[tokio::test]
async fn test_pre_cancelled_run_starts_no_steps() -> Result<()> {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let trace = ExecutionTrace::new();

    let ensemble = Ensemble::builder()
        .name("team")
        .agent(echo_agent("a"))
        .default_conductor(sequential_conductor())
        .build()?;

    let error = ensemble
        .run(
            "go",
            EnsembleRunOptions {
                cancel: Some(cancel),
                trace: Some(trace.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(error, OrchestratorError::Cancelled));
    assert!(trace.steps().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_agent_timeout_is_subject_to_error_mode() -> Result<()> {
    // A backend that never answers within the agent deadline
    let stuck = Arc::new(
        Agent::builder()
            .name("stuck")
            .system_prompt("Work.")
            .provider(Arc::new(SleepingProvider))
            .build()
            .unwrap(),
    );

    let conductor = Conductor::builder(Strategy::Parallel(
        ParallelConfig::new().merger(Merger::concatenate()),
    ))
    .agent_timeout(Duration::from_millis(20))
    .error_mode(ErrorMode::Continue)
    .build()?;

    let ensemble = Ensemble::builder()
        .name("team")
        .role(maestro::AgentRole::new("stuck", stuck))
        .agent(echo_agent("fast"))
        .default_conductor(conductor)
        .build()?;

    let result = ensemble.run("go", EnsembleRunOptions::default()).await?;
    assert!(result.response.contains("fast: go"));
    assert!(!result.agent_results.contains_key("stuck"));

    let timed_out = result
        .trace
        .steps()
        .into_iter()
        .find(|s| s.agent_id == "stuck")
        .unwrap();
    assert!(timed_out.error.as_deref().unwrap().contains("Timed out"));
    Ok(())
}

struct SleepingProvider;

#[async_trait::async_trait]
impl maestro::Provider for SleepingProvider {
    async fn complete(
        &self,
        _request: maestro::CompletionRequest,
    ) -> Result<maestro::CompletionResponse> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(CompletionResponse::text("never"))
    }
}

#[tokio::test]
async fn test_failing_hook_recorded_as_step_metadata() -> Result<()> {
    struct Broken;

    #[async_trait::async_trait]
    impl OrchestrationHooks for Broken {
        async fn before_agent(&self, _agent_id: &str, _input: &str) -> Result<()> {
            Err(anyhow::anyhow!("observer exploded"))
        }
    }

    let ensemble = Ensemble::builder()
        .name("team")
        .agent(echo_agent("a"))
        .hook(Arc::new(Broken))
        .default_conductor(sequential_conductor())
        .build()?;

    let result = ensemble.run("go", EnsembleRunOptions::default()).await?;
    // The run succeeded; the hook failure is metadata on the step
    assert_eq!(result.response, "a: go");
    let step = &result.trace.steps()[0];
    assert_eq!(
        step.metadata.as_ref().unwrap()["hook_error:before_agent"],
        "observer exploded"
    );
    Ok(())
}

#[tokio::test]
async fn test_ensemble_hooks_observe_every_step() -> Result<()> {
    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl OrchestrationHooks for Recorder {
        async fn before_agent(&self, agent_id: &str, _input: &str) -> Result<()> {
            self.0.lock().unwrap().push(format!("before:{agent_id}"));
            Ok(())
        }

        async fn after_agent(&self, agent_id: &str, _response: &str) -> Result<()> {
            self.0.lock().unwrap().push(format!("after:{agent_id}"));
            Ok(())
        }
    }

    let recorder = Arc::new(Recorder::default());
    let ensemble = Ensemble::builder()
        .name("team")
        .agent(echo_agent("a"))
        .agent(echo_agent("b"))
        .hook(recorder.clone())
        .default_conductor(sequential_conductor())
        .build()?;

    ensemble.run("go", EnsembleRunOptions::default()).await?;
    let events = recorder.0.lock().unwrap().clone();
    assert_eq!(
        events,
        vec!["before:a", "after:a", "before:b", "after:b"]
    );
    Ok(())
}

#[tokio::test]
async fn test_handoff_through_the_agent_loop() -> Result<()> {
    // The lead agent's backend asks for a handoff to an undeclared
    // target, then finishes; the rejection comes back as a tool message.
    let lead_provider = MockProvider::new(vec![
        CompletionResponse::tool_calls(vec![ToolCall::new(
            "h1",
            "handoff",
            json!({"target_agent": "stranger", "task": "t", "reason": "r"}),
        )]),
        CompletionResponse::text("kept it myself"),
    ]);

    let specialist = echo_agent("specialist");
    let handler = Arc::new(SimpleHandoffHandler::new().with_agent("specialist", specialist));
    let lead = Agent::builder()
        .name("lead")
        .system_prompt("Coordinate.")
        .provider(Arc::new(lead_provider))
        .tool(maestro::handoff_tool(
            "lead",
            vec!["specialist".to_string()],
            handler,
        ))
        .build()?;

    let result = lead.run("do the thing", maestro::RunOptions::default()).await?;
    assert_eq!(result.response, "kept it myself");

    let tool_message = result
        .messages
        .iter()
        .find(|m| m.role() == "tool")
        .unwrap();
    let payload: serde_json::Value = serde_json::from_str(tool_message.text().unwrap())?;
    assert_eq!(payload["success"], false);
    assert_eq!(payload["rejected"], true);
    assert!(payload["error"].as_str().unwrap().contains("Invalid target"));
    Ok(())
}

#[tokio::test]
async fn test_trace_steps_all_terminate() -> Result<()> {
    let ensemble = Ensemble::builder()
        .name("team")
        .agent(echo_agent("a"))
        .agent(echo_agent("b"))
        .default_conductor(sequential_conductor())
        .build()?;

    let result = ensemble.run("x", EnsembleRunOptions::default()).await?;
    for step in result.trace.steps() {
        assert!(step.is_terminated());
        assert!(step.duration_ms.is_some());
    }
    assert!(result.trace.end_time().is_some());
    Ok(())
}
