use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use concierge_core::capability::{CapabilityContext, CapabilityError};
use concierge_core::conversation::{Conversation, TerminationReason};
use concierge_core::events::RunEvent;
use concierge_core::ids::RunId;
use concierge_core::messages::{CapabilityCall, CapabilityResult, Message};
use concierge_core::oracle::{Oracle, OracleRequest};

use crate::error::EngineError;
use crate::intent::{IntentAnalysis, IntentAnalyzer, KeywordIntentAnalyzer};
use crate::prompt::{Clock, PromptTemplate, SystemClock};
use crate::registry::CapabilityRegistry;
use crate::routing::{route, RouteDecision};

pub const DEFAULT_STEP_BUDGET: u32 = 25;
pub const BUDGET_EXHAUSTED_MESSAGE: &str = "I need more steps to complete your travel planning \
request. Please let me continue or provide more specific details.";

/// Configuration for the orchestration loop.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Maximum oracle invocations per run. Must be > 0.
    pub step_budget: u32,
    /// Analyze the first user message before the first step.
    pub preflight_intent: bool,
    /// Appended in place of the final step's calls when the budget runs out.
    pub budget_exhausted_message: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            step_budget: DEFAULT_STEP_BUDGET,
            preflight_intent: true,
            budget_exhausted_message: BUDGET_EXHAUSTED_MESSAGE.to_string(),
        }
    }
}

/// What a finished run hands back to the caller.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub conversation: Conversation,
    pub reason: TerminationReason,
    /// Oracle invocations made.
    pub steps: u32,
    pub intent: Option<IntentAnalysis>,
}

enum LoopState {
    AwaitingOracle,
    Routing(Message),
    Executing(Vec<CapabilityCall>),
    Terminated(TerminationReason),
}

/// Drives one run: prompt → oracle → route → execute batch → repeat, within the step budget.
pub struct Orchestrator {
    oracle: Arc<dyn Oracle>,
    registry: Arc<CapabilityRegistry>,
    analyzer: Arc<dyn IntentAnalyzer>,
    prompt: PromptTemplate,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
    event_tx: broadcast::Sender<RunEvent>,
}

impl Orchestrator {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        registry: Arc<CapabilityRegistry>,
        event_tx: broadcast::Sender<RunEvent>,
    ) -> Self {
        Self {
            oracle,
            registry,
            analyzer: Arc::new(KeywordIntentAnalyzer::travel()),
            prompt: PromptTemplate::travel(),
            clock: Arc::new(SystemClock),
            config: RunnerConfig::default(),
            event_tx,
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn IntentAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn send_event(&self, event: RunEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("no event receivers, event dropped");
        }
    }

    /// Validate raw messages into a conversation, then [`Orchestrator::run`].
    pub async fn run_messages(
        self,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        let conversation = Conversation::new(messages)?;
        self.run(conversation, cancel).await
    }

    /// Run to termination. Only an oracle failure is an `Err`; capability
    /// failures are recorded in the conversation.
    #[instrument(
        skip_all,
        fields(run_id = tracing::field::Empty, step_budget = self.config.step_budget)
    )]
    pub async fn run(
        self,
        mut conversation: Conversation,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        if self.config.step_budget == 0 {
            return Err(EngineError::InvalidStepBudget);
        }
        let run_id = RunId::new();
        tracing::Span::current().record("run_id", run_id.as_str());

        let intent = if self.config.preflight_intent {
            Some(self.preflight(&run_id, &conversation))
        } else {
            None
        };

        let mut steps: u32 = 0;
        let mut state = LoopState::AwaitingOracle;
        loop {
            state = match state {
                LoopState::AwaitingOracle => {
                    if cancel.is_cancelled() {
                        LoopState::Terminated(TerminationReason::Cancelled)
                    } else {
                        steps += 1;
                        self.send_event(RunEvent::StepStart {
                            run_id: run_id.clone(),
                            step: steps,
                        });
                        self.await_oracle(&run_id, &mut conversation, steps, cancel)
                            .await?
                    }
                }
                LoopState::Routing(message) => {
                    let decision = route(&message)?;
                    conversation.push(message);
                    match decision {
                        RouteDecision::Terminate => {
                            LoopState::Terminated(TerminationReason::Answered)
                        }
                        RouteDecision::Execute(calls) => LoopState::Executing(calls),
                    }
                }
                LoopState::Executing(calls) => {
                    match self.execute(&run_id, calls, cancel).await {
                        Some(results) => {
                            conversation.extend(results.into_iter().map(Message::ToolResult));
                            LoopState::AwaitingOracle
                        }
                        None => LoopState::Terminated(TerminationReason::Cancelled),
                    }
                }
                LoopState::Terminated(reason) => {
                    info!(reason = %reason, steps, messages = conversation.len(), "run complete");
                    self.send_event(RunEvent::RunComplete {
                        run_id: run_id.clone(),
                        reason,
                        steps,
                    });
                    return Ok(RunOutcome {
                        run_id,
                        conversation,
                        reason,
                        steps,
                        intent,
                    });
                }
            };
        }
    }

    fn preflight(&self, run_id: &RunId, conversation: &Conversation) -> IntentAnalysis {
        let text = conversation.first_user_text().unwrap_or_default();
        let analysis = self.analyzer.analyze(text);
        let categories = analysis.required();
        info!(
            categories = ?categories,
            confidence = analysis.confidence,
            "intent analyzed"
        );
        self.send_event(RunEvent::IntentAnalyzed {
            run_id: run_id.clone(),
            categories,
            confidence: analysis.confidence,
        });
        analysis
    }

    /// One oracle invocation. At the last step a reply that still asks for
    /// calls is replaced by the budget-exhausted message.
    async fn await_oracle(
        &self,
        run_id: &RunId,
        conversation: &mut Conversation,
        step: u32,
        cancel: &CancellationToken,
    ) -> Result<LoopState, EngineError> {
        let request = OracleRequest {
            system_prompt: self.prompt.render(self.clock.now()),
            messages: conversation.messages().to_vec(),
            capabilities: self.registry.definitions(),
        };

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(LoopState::Terminated(TerminationReason::Cancelled));
            }
            reply = self.oracle.invoke(&request) => reply.map_err(|e| {
                error!(
                    step,
                    oracle = self.oracle.name(),
                    kind = e.kind(),
                    error = %e,
                    "oracle failed"
                );
                e
            })?,
        };
        debug!(step, calls = reply.calls.len(), "oracle replied");

        if step >= self.config.step_budget && reply.has_calls() {
            warn!(
                step,
                dropped_calls = reply.calls.len(),
                "step budget exhausted"
            );
            self.send_event(RunEvent::BudgetExhausted {
                run_id: run_id.clone(),
                step,
            });
            conversation.push(Message::assistant_text(
                self.config.budget_exhausted_message.clone(),
            ));
            return Ok(LoopState::Terminated(TerminationReason::BudgetExhausted));
        }

        Ok(LoopState::Routing(Message::Assistant(reply)))
    }

    /// Fan out every call of the step, then join in issue order.
    /// Returns `None` if cancelled before every result arrived.
    async fn execute(
        &self,
        run_id: &RunId,
        calls: Vec<CapabilityCall>,
        cancel: &CancellationToken,
    ) -> Option<Vec<CapabilityResult>> {
        let mut handles = Vec::with_capacity(calls.len());
        for call in &calls {
            let call = call.clone();
            let registry = Arc::clone(&self.registry);
            let tx = self.event_tx.clone();
            let ctx = CapabilityContext {
                run_id: run_id.clone(),
                call_id: call.id.clone(),
                cancel: cancel.child_token(),
            };

            handles.push(tokio::spawn(async move {
                if tx
                    .send(RunEvent::CapabilityStart {
                        run_id: ctx.run_id.clone(),
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                    })
                    .is_err()
                {
                    debug!(capability = %call.name, "no event receivers, capability_start dropped");
                }

                let start = Instant::now();
                let result = registry.invoke(&call, &ctx).await;

                if tx
                    .send(RunEvent::CapabilityEnd {
                        run_id: ctx.run_id.clone(),
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        error: result.error().cloned(),
                        duration_ms: start.elapsed().as_millis() as u64,
                    })
                    .is_err()
                {
                    debug!(capability = %call.name, "no event receivers, capability_end dropped");
                }
                result
            }));
        }

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let join_in_order = async {
            let mut results = Vec::with_capacity(handles.len());
            for (call, handle) in calls.iter().zip(handles) {
                match handle.await {
                    Ok(result) => results.push(result),
                    Err(join_err) => {
                        error!(
                            capability = %call.name,
                            error = %join_err,
                            "capability task failed"
                        );
                        results.push(CapabilityResult::failure(
                            call,
                            CapabilityError::failed(format!("capability task failed: {join_err}")),
                        ));
                    }
                }
            }
            results
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(outstanding = aborts.len(), "run cancelled during capability batch");
                for abort in &aborts {
                    abort.abort();
                }
                None
            }
            results = join_in_order => Some(results),
        }
    }
}
