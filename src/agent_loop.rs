//! The bounded model/tool conversation loop.
//!
//! Each round submits the message list to the reasoning engine. A final
//! answer ends the run; tool-call requests are executed against the tool
//! server, their results (or errors) folded back in as tool messages, and
//! the loop resubmits. The round budget turns "loop until done" into a
//! reportable failure instead of an unbounded run.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};

use crate::engine::{EngineReply, ReasoningEngine, ToolCallRequest};
use crate::errors::{AgentError, AgentResult, McpResult};
use crate::io_struct::ChatMessage;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that provides information about the New England power grid.
You have access to real-time data from ISO New England through tools.

When users ask about the current power grid status, marginal fuel, or generation mix, use the available tools to get real-time data.

Be concise but informative. Explain technical terms when helpful.";

pub const DEFAULT_MAX_ROUNDS: usize = 10;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_rounds: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

/// Tool invocation as the loop sees it. Implemented by the MCP connection;
/// tests script it.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, tool_name: &str, arguments_json: &str) -> McpResult<String>;
}

pub async fn run_agent_loop<E, T>(
    engine: &E,
    tools: &T,
    tool_specs: &[Value],
    transcript: &[ChatMessage],
    config: &LoopConfig,
) -> AgentResult<String>
where
    E: ReasoningEngine + ?Sized,
    T: ToolInvoker + ?Sized,
{
    let mut messages: Vec<Value> = Vec::with_capacity(transcript.len() + 1);
    messages.push(json!({"role": "system", "content": SYSTEM_PROMPT}));
    for turn in transcript {
        messages.push(json!({"role": turn.role, "content": turn.content}));
    }

    for round in 1..=config.max_rounds {
        let reply = engine
            .complete(&messages, tool_specs)
            .await
            .map_err(AgentError::Engine)?;

        match reply {
            EngineReply::Answer(text) => {
                log::debug!("agent loop completed after {} round(s)", round);
                return Ok(text);
            }
            EngineReply::ToolCalls(calls) => {
                log::debug!("round {}: {} tool call(s) requested", round, calls.len());
                messages.push(assistant_tool_calls_message(&calls));
                // Calls within one round are independent; rounds stay
                // strictly sequential.
                let outputs = join_all(calls.iter().map(|call| execute_tool_call(tools, call))).await;
                for (call, output) in calls.iter().zip(outputs) {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": call.call_id,
                        "content": output,
                    }));
                }
            }
        }
    }

    Err(AgentError::RoundBudgetExhausted {
        rounds: config.max_rounds,
    })
}

/// A failed invocation becomes context for the engine, never a run abort;
/// the engine decides whether to retry, switch tools, or apologize.
async fn execute_tool_call<T: ToolInvoker + ?Sized>(tools: &T, call: &ToolCallRequest) -> String {
    match tools.invoke(&call.name, &call.arguments).await {
        Ok(output) => output,
        Err(e) => {
            log::warn!("tool call '{}' failed: {}", call.name, e);
            json!({"error": e.to_string()}).to_string()
        }
    }
}

fn assistant_tool_calls_message(calls: &[ToolCallRequest]) -> Value {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|call| {
            json!({
                "id": call.call_id,
                "type": "function",
                "function": {"name": call.name, "arguments": call.arguments},
            })
        })
        .collect();
    json!({"role": "assistant", "tool_calls": tool_calls})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{EngineError, EngineResult, McpError};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedEngine {
        replies: Mutex<VecDeque<EngineReply>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<Value>>>,
    }

    impl ScriptedEngine {
        fn new(replies: Vec<EngineReply>) -> Self {
            ScriptedEngine {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReasoningEngine for ScriptedEngine {
        async fn complete(
            &self,
            messages: &[Value],
            _tools: &[Value],
        ) -> EngineResult<EngineReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| EngineError::MalformedResponse("script exhausted".to_string()))
        }
    }

    struct RecordingInvoker {
        invocations: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingInvoker {
        fn new(fail: bool) -> Self {
            RecordingInvoker {
                invocations: Mutex::new(Vec::new()),
                fail,
            }
        }

        fn invocation_count(&self) -> usize {
            self.invocations.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ToolInvoker for RecordingInvoker {
        async fn invoke(&self, tool_name: &str, _arguments_json: &str) -> McpResult<String> {
            self.invocations.lock().unwrap().push(tool_name.to_string());
            if self.fail {
                Err(McpError::ToolExecution(format!(
                    "tool '{}': upstream unavailable",
                    tool_name
                )))
            } else {
                Ok(json!({"tool": tool_name, "status": "ok"}).to_string())
            }
        }
    }

    fn status_call() -> ToolCallRequest {
        ToolCallRequest {
            call_id: "call_1".to_string(),
            name: "current_grid_status".to_string(),
            arguments: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn an_immediate_answer_makes_one_engine_call_and_no_invocations() {
        let engine = ScriptedEngine::new(vec![EngineReply::Answer("42 GW".to_string())]);
        let invoker = RecordingInvoker::new(false);

        let answer = run_agent_loop(
            &engine,
            &invoker,
            &[],
            &[ChatMessage::user("what is demand?")],
            &LoopConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(answer, "42 GW");
        assert_eq!(engine.call_count(), 1);
        assert_eq!(invoker.invocation_count(), 0);
    }

    #[tokio::test]
    async fn a_tool_round_then_answer_returns_the_answer() {
        let engine = ScriptedEngine::new(vec![
            EngineReply::ToolCalls(vec![status_call()]),
            EngineReply::Answer("Natural gas is on the margin.".to_string()),
        ]);
        let invoker = RecordingInvoker::new(false);

        let answer = run_agent_loop(
            &engine,
            &invoker,
            &[],
            &[ChatMessage::user("What is the current marginal fuel?")],
            &LoopConfig::default(),
        )
        .await
        .unwrap();

        assert!(!answer.is_empty());
        assert_eq!(engine.call_count(), 2);
        assert_eq!(invoker.invocation_count(), 1);
    }

    #[tokio::test]
    async fn exhausting_the_round_budget_is_a_distinct_failure() {
        let max_rounds = 3;
        let replies = (0..max_rounds)
            .map(|_| EngineReply::ToolCalls(vec![status_call()]))
            .collect();
        let engine = ScriptedEngine::new(replies);
        let invoker = RecordingInvoker::new(false);

        let err = run_agent_loop(
            &engine,
            &invoker,
            &[],
            &[ChatMessage::user("keep digging")],
            &LoopConfig { max_rounds },
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            AgentError::RoundBudgetExhausted { rounds } if rounds == max_rounds
        ));
        assert_eq!(engine.call_count(), max_rounds);
        assert_eq!(invoker.invocation_count(), max_rounds);
    }

    #[tokio::test]
    async fn failed_tool_calls_are_fed_back_as_error_context() {
        let engine = ScriptedEngine::new(vec![
            EngineReply::ToolCalls(vec![status_call()]),
            EngineReply::Answer("The data source is unavailable right now.".to_string()),
        ]);
        let invoker = RecordingInvoker::new(true);

        let answer = run_agent_loop(
            &engine,
            &invoker,
            &[],
            &[ChatMessage::user("grid status?")],
            &LoopConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(answer, "The data source is unavailable right now.");
        assert_eq!(invoker.invocation_count(), 1);

        // The second engine call must have seen the failure as a tool message.
        let seen = engine.seen.lock().unwrap();
        let second = &seen[1];
        let tool_msg = second
            .iter()
            .find(|m| m["role"] == "tool")
            .expect("tool message present");
        assert_eq!(tool_msg["tool_call_id"], "call_1");
        assert!(tool_msg["content"].as_str().unwrap().contains("error"));
    }

    #[tokio::test]
    async fn engine_failures_abort_the_run() {
        let engine = ScriptedEngine::new(vec![]);
        let invoker = RecordingInvoker::new(false);

        let err = run_agent_loop(
            &engine,
            &invoker,
            &[],
            &[ChatMessage::user("hello")],
            &LoopConfig::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AgentError::Engine(_)));
        assert_eq!(invoker.invocation_count(), 0);
    }

    #[tokio::test]
    async fn the_transcript_precedes_the_loop_in_engine_input() {
        let engine = ScriptedEngine::new(vec![EngineReply::Answer("ok".to_string())]);
        let invoker = RecordingInvoker::new(false);
        let transcript = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("second"),
            ChatMessage::user("third"),
        ];

        run_agent_loop(&engine, &invoker, &[], &transcript, &LoopConfig::default())
            .await
            .unwrap();

        let seen = engine.seen.lock().unwrap();
        let messages = &seen[0];
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "first");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "third");
    }
}
