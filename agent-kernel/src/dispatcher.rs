//! One conversational turn, from user message to persisted reply.
//!
//! A turn moves through fixed phases:
//! `ExtractMessage -> ResolveContext -> FetchHistory -> ComposePrompt ->
//! ResolveToolSet -> InvokeModel -> [ExecuteRequestedFunctions]* ->
//! PersistState -> UpdateHistory -> Return`.
//! Model and tool failures become replies; only cancellation ends a turn
//! without persisting it.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_adapters::fallback::format_results;
use agent_adapters::traits::{
    ChatModel, ChatStream, FunctionCall, FunctionSpec, ModelResponse, PromptMessage,
};
use agent_config::{AgentConfig, UnauthenticatedPolicy};
use agent_memory::{ConversationContext, HistoryEntry, TurnRole};
use agent_policy::current_auth;
use agent_primitives::{CapabilityError, CapabilityResult, Task};
use agent_prompts::{PromptComposer, SystemInstruction, history_from_task};
use agent_tools::ToolSchema;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, future};
use serde_json::{Map, Value, json};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::AppContext;
use crate::error::KernelResult;

/// Reply when the task carries no user text.
pub const NO_MESSAGE_REPLY: &str = "I didn't receive any message to process.";
/// Reply when the model answered with nothing.
pub const EMPTY_RESPONSE_REPLY: &str =
    "I received your message but could not generate a response. Please try again later.";
/// Reply when a requested function was denied.
pub const PERMISSION_DENIED_REPLY: &str =
    "I'm sorry, but you don't have permission to perform that action.";
/// Reply for a cancelled turn.
pub const CANCELLED_REPLY: &str = "The request was cancelled.";

const CONVERSATION_COUNT: &str = "ai_conversation_count";
const PREFERENCES: &str = "ai_preferences";
const COLORS: [&str; 9] = [
    "red", "blue", "green", "yellow", "purple", "orange", "pink", "black", "white",
];

/// Reply used when the model is unavailable.
#[must_use]
pub fn fallback_reply(input: &str) -> String {
    format!(
        "I received your message: '{input}'. However, my AI capabilities are \
         currently unavailable. Please try again later."
    )
}

/// Turn limits and policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Whether the model is consulted at all.
    pub ai_enabled: bool,
    /// Maximum rounds of function execution per turn.
    pub max_function_rounds: u32,
    /// Deadline for each model call.
    pub model_timeout: Duration,
    /// Deadline for each function call.
    pub tool_timeout: Duration,
    /// Tool set offered to unauthenticated callers.
    pub unauthenticated_policy: UnauthenticatedPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

impl DispatcherConfig {
    /// Reads limits from the `ai` and `security` sections.
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            ai_enabled: config.ai.enabled,
            max_function_rounds: config.ai.max_function_rounds,
            model_timeout: Duration::from_secs(config.ai.model_timeout_secs),
            tool_timeout: Duration::from_secs(config.ai.tool_timeout_secs),
            unauthenticated_policy: config.security.auth.unauthenticated_policy,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    ExtractMessage,
    ResolveContext,
    FetchHistory,
    ComposePrompt,
    ResolveToolSet,
    InvokeModel,
    ExecuteRequestedFunctions,
    PersistState,
    UpdateHistory,
    Return,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ExtractMessage => "extract_message",
            Self::ResolveContext => "resolve_context",
            Self::FetchHistory => "fetch_history",
            Self::ComposePrompt => "compose_prompt",
            Self::ResolveToolSet => "resolve_tool_set",
            Self::InvokeModel => "invoke_model",
            Self::ExecuteRequestedFunctions => "execute_requested_functions",
            Self::PersistState => "persist_state",
            Self::UpdateHistory => "update_history",
            Self::Return => "return",
        };
        f.write_str(label)
    }
}

/// Chunks of one streamed reply.
pub type ReplyStream<'a> = BoxStream<'a, String>;

fn single<'a>(reply: String) -> ReplyStream<'a> {
    stream::once(future::ready(reply)).boxed()
}

/// Prompt and tool set of a turn, ready for the model.
struct Prepared {
    conversation: Vec<PromptMessage>,
    functions: Vec<FunctionSpec>,
    offered: BTreeSet<String>,
}

/// A direct reply being forwarded chunk by chunk.
struct StreamedTurn<'a> {
    dispatcher: &'a Dispatcher,
    task: Arc<Task>,
    input: String,
    context_id: String,
    token: CancellationToken,
    chunks: ChatStream,
    reply: String,
    exhausted: bool,
    done: bool,
    _turn: ActiveTurn<'a>,
}

impl StreamedTurn<'_> {
    async fn advance(mut self) -> Option<(String, Self)> {
        while !self.done {
            if self.token.is_cancelled() {
                self.done = true;
                info!(task_id = self.task.id(), "streamed turn cancelled");
                return self
                    .reply
                    .is_empty()
                    .then(|| (CANCELLED_REPLY.to_owned(), self));
            }
            let next = if self.exhausted { None } else { self.chunks.next().await };
            match next {
                Some(Ok(chunk)) => {
                    self.exhausted = chunk.done;
                    if chunk.delta.is_empty() {
                        continue;
                    }
                    self.reply.push_str(&chunk.delta);
                    return Some((chunk.delta, self));
                }
                Some(Err(err)) => {
                    self.done = true;
                    warn!(task_id = self.task.id(), %err, "model stream failed");
                    if !self.reply.is_empty() {
                        return None;
                    }
                    let reply = fallback_reply(&self.input);
                    return Some((reply, self));
                }
                None => {
                    self.done = true;
                    let empty = self.reply.trim().is_empty();
                    if empty {
                        self.reply = EMPTY_RESPONSE_REPLY.to_owned();
                    }
                    let outcome = Outcome::Complete(self.reply.clone());
                    let dispatcher = self.dispatcher;
                    dispatcher
                        .conclude(&self.task, &self.input, &self.context_id, outcome)
                        .await;
                    return empty.then(|| (EMPTY_RESPONSE_REPLY.to_owned(), self));
                }
            }
        }
        None
    }
}

/// How a turn ended before persistence.
enum Outcome {
    /// Persist state and history, then reply.
    Complete(String),
    /// Reply without touching state.
    Abort(String),
}

/// Cancellation tokens of the turns in progress, keyed by task id.
///
/// Each turn gets a distinct serial so a turn ending never removes the token
/// of a newer turn that reused its task id.
#[derive(Debug, Default)]
struct ActiveTurns {
    serial: AtomicU64,
    running: Mutex<HashMap<String, (u64, CancellationToken)>>,
}

impl ActiveTurns {
    fn begin(&self, task_id: &str) -> (ActiveTurn<'_>, CancellationToken) {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self
            .running
            .lock()
            .expect("dispatcher task map poisoned")
            .insert(task_id.to_owned(), (serial, token.clone()));
        if previous.is_some() {
            warn!(task_id, "task id reused while a turn is running");
        }
        let turn = ActiveTurn {
            turns: self,
            task_id: task_id.to_owned(),
            serial,
        };
        (turn, token)
    }

    fn cancel(&self, task_id: &str) -> bool {
        let running = self.running.lock().expect("dispatcher task map poisoned");
        match running.get(task_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .running
            .lock()
            .expect("dispatcher task map poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Removes a turn's cancellation token when it ends, however it ends.
struct ActiveTurn<'a> {
    turns: &'a ActiveTurns,
    task_id: String,
    serial: u64,
}

impl Drop for ActiveTurn<'_> {
    fn drop(&mut self) {
        let Ok(mut running) = self.turns.running.lock() else {
            return;
        };
        if running.get(&self.task_id).is_some_and(|(serial, _)| *serial == self.serial) {
            running.remove(&self.task_id);
        }
    }
}

/// Drives turns against a model, the tool registry and the capability
/// registry.
pub struct Dispatcher {
    app: Arc<AppContext>,
    model: Arc<dyn ChatModel>,
    composer: PromptComposer,
    config: DispatcherConfig,
    active: ActiveTurns,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("model", &self.model.metadata().model())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher configured from the context's `ai` section.
    ///
    /// # Errors
    ///
    /// Returns [`crate::KernelError::Prompt`] for a blank system prompt or a
    /// zero history window.
    pub fn new(app: Arc<AppContext>, model: Arc<dyn ChatModel>) -> KernelResult<Self> {
        let ai = &app.config().ai;
        let instruction = match &ai.system_prompt {
            Some(prompt) => SystemInstruction::builder().content(prompt.clone()).build()?,
            None => SystemInstruction::default(),
        };
        let composer = PromptComposer::new(instruction).with_history_window(ai.history_window)?;
        let config = DispatcherConfig::from_config(app.config());
        Ok(Self {
            app,
            model,
            composer,
            config,
            active: ActiveTurns::default(),
        })
    }

    /// Replaces the turn limits.
    #[must_use]
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Application context the turns run against.
    #[must_use]
    pub fn app(&self) -> &Arc<AppContext> {
        &self.app
    }

    /// Turn limits in effect.
    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Requests cancellation of a running turn. Calls already in flight
    /// finish; no further model or function call is issued.
    ///
    /// Returns whether the task was running.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        let cancelled = self.active.cancel(task_id);
        if cancelled {
            info!(task_id, "cancellation requested");
        }
        cancelled
    }

    /// Ids of the turns in progress.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn active_tasks(&self) -> Vec<String> {
        self.active.ids()
    }

    /// Processes one turn and returns the reply text.
    ///
    /// Callers install authentication with [`agent_policy::with_auth`]
    /// around this future.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub async fn process_task(&self, task: Task) -> String {
        let task = Arc::new(task);
        let (_turn, token) = self.active.begin(task.id());
        let Some((input, context_id)) = self.open_turn(&task).await else {
            return NO_MESSAGE_REPLY.to_owned();
        };
        let outcome = self.respond(&task, &input, &context_id, &token).await;
        self.conclude(&task, &input, &context_id, outcome).await
    }

    /// Processes one turn, streaming the reply as it is generated.
    ///
    /// When no function is offered to the caller the model's chunks are
    /// forwarded as they arrive and the turn is persisted once the stream is
    /// drained. Otherwise the function rounds run first and the final reply
    /// arrives as a single chunk. A stream dropped before its end persists
    /// nothing.
    ///
    /// Authentication is read while this future runs, so install it with
    /// [`agent_policy::with_auth`] around the call; consuming the stream
    /// needs no ambient context.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub async fn process_task_stream(&self, task: Task) -> ReplyStream<'_> {
        let task = Arc::new(task);
        let (turn, token) = self.active.begin(task.id());
        let Some((input, context_id)) = self.open_turn(&task).await else {
            return single(NO_MESSAGE_REPLY.to_owned());
        };
        let prepared = self.prepare(&task, &input, &context_id).await;

        if !prepared.functions.is_empty() || !self.config.ai_enabled || token.is_cancelled() {
            let outcome = self.converse(&task, &input, prepared, &token).await;
            return single(self.conclude(&task, &input, &context_id, outcome).await);
        }

        trace_phase(&task, Phase::InvokeModel);
        let opened = self.model.chat_stream(&prepared.conversation);
        let chunks = match timeout(self.config.model_timeout, opened).await {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(err)) => {
                warn!(task_id = task.id(), %err, "model stream unavailable");
                return single(fallback_reply(&input));
            }
            Err(_) => {
                warn!(task_id = task.id(), "model stream timed out");
                return single(fallback_reply(&input));
            }
        };

        let streamed = StreamedTurn {
            dispatcher: self,
            task,
            input,
            context_id,
            token,
            chunks,
            reply: String::new(),
            exhausted: false,
            done: false,
            _turn: turn,
        };
        stream::unfold(streamed, StreamedTurn::advance).boxed()
    }

    /// Extracts the user text and binds the conversation.
    async fn open_turn(&self, task: &Task) -> Option<(String, String)> {
        trace_phase(task, Phase::ExtractMessage);
        let input = task.latest_user_text().filter(|text| !text.trim().is_empty())?;

        trace_phase(task, Phase::ResolveContext);
        let context_id = task.conversation_id().to_owned();
        if let Some(state) = self.app.state() {
            let user = current_auth().map(|auth| auth.user_id().to_owned());
            if let Err(err) = state.get_or_create(&context_id, user.as_deref()).await {
                warn!(%context_id, %err, "conversation state unavailable");
            }
        }
        Some((input, context_id))
    }

    async fn conclude(
        &self,
        task: &Task,
        input: &str,
        context_id: &str,
        outcome: Outcome,
    ) -> String {
        let reply = match outcome {
            Outcome::Abort(reply) => reply,
            Outcome::Complete(reply) => {
                self.persist(task, input, context_id, &reply).await;
                reply
            }
        };
        trace_phase(task, Phase::Return);
        reply
    }

    async fn persist(&self, task: &Task, input: &str, context_id: &str, reply: &str) {
        if let Some(state) = self.app.state() {
            trace_phase(task, Phase::PersistState);
            let count = persist_state(state, context_id, input).await;
            trace_phase(task, Phase::UpdateHistory);
            update_history(state, context_id, input, reply, count).await;
        }
    }

    async fn respond(
        &self,
        task: &Arc<Task>,
        input: &str,
        context_id: &str,
        token: &CancellationToken,
    ) -> Outcome {
        let prepared = self.prepare(task, input, context_id).await;
        self.converse(task, input, prepared, token).await
    }

    async fn prepare(&self, task: &Task, input: &str, context_id: &str) -> Prepared {
        trace_phase(task, Phase::FetchHistory);
        let history = self.fetch_history(task, context_id).await;

        trace_phase(task, Phase::ComposePrompt);
        let conversation = self.composer.compose(&history, input);

        trace_phase(task, Phase::ResolveToolSet);
        let offered = self.resolve_tool_set();
        let functions: Vec<FunctionSpec> = offered
            .iter()
            .map(|schema| {
                FunctionSpec::new(schema.name(), schema.description(), schema.parameters().clone())
            })
            .collect();
        let offered: BTreeSet<String> =
            offered.iter().map(|schema| schema.name().to_owned()).collect();
        Prepared {
            conversation,
            functions,
            offered,
        }
    }

    async fn converse(
        &self,
        task: &Arc<Task>,
        input: &str,
        prepared: Prepared,
        token: &CancellationToken,
    ) -> Outcome {
        let Prepared {
            mut conversation,
            functions,
            offered,
        } = prepared;

        if !self.config.ai_enabled {
            debug!(task_id = task.id(), "model disabled; replying with fallback");
            return Outcome::Abort(fallback_reply(input));
        }
        if token.is_cancelled() {
            return Outcome::Abort(CANCELLED_REPLY.to_owned());
        }

        trace_phase(task, Phase::InvokeModel);
        let mut response = match self.call_model(&conversation, &functions).await {
            Ok(response) => response,
            Err(err) => {
                warn!(task_id = task.id(), %err, "model unavailable");
                return Outcome::Abort(fallback_reply(input));
            }
        };

        if functions.is_empty() || !response.has_function_calls() {
            if response.content.trim().is_empty() {
                return Outcome::Complete(EMPTY_RESPONSE_REPLY.to_owned());
            }
            return Outcome::Complete(response.content);
        }

        let mut results: Vec<(String, String)> = Vec::new();
        let mut rounds = 0;
        while response.has_function_calls() {
            if rounds == self.config.max_function_rounds {
                warn!(task_id = task.id(), rounds, "function rounds exhausted");
                return Outcome::Complete(joined(&results));
            }
            rounds += 1;

            trace_phase(task, Phase::ExecuteRequestedFunctions);
            let calls = std::mem::take(&mut response.function_calls);
            let mut round_results = Vec::with_capacity(calls.len());
            for call in &calls {
                if token.is_cancelled() {
                    return Outcome::Abort(CANCELLED_REPLY.to_owned());
                }
                match self.execute_call(task, call, &offered).await {
                    Ok(text) => round_results.push((call.name.clone(), text)),
                    Err(CapabilityError::PermissionDenied { subject, missing }) => {
                        warn!(
                            task_id = task.id(),
                            function = %subject,
                            ?missing,
                            "function denied; aborting turn"
                        );
                        return Outcome::Complete(PERMISSION_DENIED_REPLY.to_owned());
                    }
                    Err(CapabilityError::Cancelled) => {
                        return Outcome::Abort(CANCELLED_REPLY.to_owned());
                    }
                    Err(err) => {
                        debug!(task_id = task.id(), function = %call.name, %err, "function failed");
                        round_results.push((call.name.clone(), format!("Error: {err}")));
                    }
                }
            }

            self.feed_back(&mut conversation, response.content, calls, &round_results);
            results.extend(round_results);

            if token.is_cancelled() {
                return Outcome::Abort(CANCELLED_REPLY.to_owned());
            }
            trace_phase(task, Phase::InvokeModel);
            response = match self.call_model(&conversation, &functions).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(task_id = task.id(), %err, "model failed after function execution");
                    return Outcome::Complete(joined(&results));
                }
            };
        }

        if response.content.trim().is_empty() {
            Outcome::Complete(joined(&results))
        } else {
            Outcome::Complete(response.content)
        }
    }

    async fn fetch_history(&self, task: &Task, context_id: &str) -> Vec<HistoryEntry> {
        let Some(state) = self.app.state() else {
            return history_from_task(task);
        };
        match state.get_history(context_id, self.composer.history_window()).await {
            Ok(history) => history,
            Err(err) => {
                warn!(%context_id, %err, "history unavailable; continuing without it");
                Vec::new()
            }
        }
    }

    fn resolve_tool_set(&self) -> Vec<ToolSchema> {
        let tools = self.app.tools();
        let offered = match (current_auth(), self.config.unauthenticated_policy) {
            (Some(auth), _) => {
                let offered = tools.available_for(auth.scopes());
                if offered.is_empty() {
                    debug!(user_id = auth.user_id(), "no tools granted");
                }
                offered
            }
            (None, UnauthenticatedPolicy::FailClosed) => {
                debug!("unauthenticated caller; no tools offered");
                Vec::new()
            }
            (None, UnauthenticatedPolicy::AllowAll) => {
                warn!("unauthenticated caller offered every tool");
                tools.schemas()
            }
        };
        debug!(count = offered.len(), "tool set resolved");
        offered
    }

    async fn call_model(
        &self,
        messages: &[PromptMessage],
        functions: &[FunctionSpec],
    ) -> CapabilityResult<ModelResponse> {
        let call = async {
            if functions.is_empty() {
                self.model.chat(messages).await
            } else {
                self.model.chat_with_functions(messages, functions).await
            }
        };
        match timeout(self.config.model_timeout, call).await {
            Ok(result) => result.map_err(CapabilityError::from),
            Err(_) => Err(CapabilityError::Timeout {
                operation: "model".into(),
            }),
        }
    }

    async fn execute_call(
        &self,
        task: &Arc<Task>,
        call: &FunctionCall,
        offered: &BTreeSet<String>,
    ) -> CapabilityResult<String> {
        let name = call.name.as_str();
        if !offered.contains(name) {
            return Err(CapabilityError::not_found(name));
        }
        let arguments = call.arguments_value();
        let tools = self.app.tools();
        let capabilities = self.app.capabilities();
        let run = async {
            if tools.is_external(name) {
                tools.call_tool(name, arguments).await.map_err(CapabilityError::from)
            } else if let Some(id) = capabilities.resolve_function(name) {
                capabilities.execute_with(&id, Arc::clone(task), arguments).await
            } else if tools.is_local(name) {
                tools.invoke_local(name, arguments).await.map_err(CapabilityError::from)
            } else {
                Err(CapabilityError::not_found(name))
            }
        };
        timeout(self.config.tool_timeout, run)
            .await
            .unwrap_or_else(|_| Err(CapabilityError::Timeout { operation: name.to_owned() }))
    }

    fn feed_back(
        &self,
        conversation: &mut Vec<PromptMessage>,
        content: String,
        calls: Vec<FunctionCall>,
        results: &[(String, String)],
    ) {
        if self.model.supports_function_calling() {
            conversation.push(PromptMessage::assistant(content).with_function_calls(calls));
            conversation.extend(results.iter().map(|(name, result)| {
                PromptMessage::function_result(name.clone(), result.clone())
            }));
        } else {
            conversation.push(PromptMessage::assistant(content));
            conversation.push(PromptMessage::user(format_results(results)));
        }
    }
}

fn trace_phase(task: &Task, phase: Phase) {
    debug!(task_id = task.id(), %phase, "turn phase");
}

fn joined(results: &[(String, String)]) -> String {
    if results.is_empty() {
        EMPTY_RESPONSE_REPLY.to_owned()
    } else {
        format_results(results)
    }
}

/// Colour named in a "favorite"/"prefer" statement about colours.
fn preferred_color(input: &str) -> Option<&'static str> {
    let lower = input.to_lowercase();
    let states_preference = ["favorite", "favourite", "prefer"].iter().any(|w| lower.contains(w));
    if !states_preference || !(lower.contains("color") || lower.contains("colour")) {
        return None;
    }
    COLORS.into_iter().find(|color| lower.contains(color))
}

async fn persist_state(state: &ConversationContext, context_id: &str, input: &str) -> Option<i64> {
    let count = match state.increment_variable(context_id, CONVERSATION_COUNT).await {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(%context_id, %err, "failed to update conversation count");
            None
        }
    };
    if let Some(color) = preferred_color(input) {
        let mut preferences = match state.get_variable(context_id, PREFERENCES).await {
            Ok(Some(Value::Object(map))) => map,
            Ok(_) => Map::new(),
            Err(err) => {
                warn!(%context_id, %err, "failed to read preferences");
                return count;
            }
        };
        preferences.insert("favorite_color".into(), Value::from(color));
        match state.set_variable(context_id, PREFERENCES, Value::Object(preferences)).await {
            Ok(()) => info!(%context_id, color, "preference recorded"),
            Err(err) => warn!(%context_id, %err, "failed to store preferences"),
        }
    }
    count
}

async fn update_history(
    state: &ConversationContext,
    context_id: &str,
    input: &str,
    reply: &str,
    count: Option<i64>,
) {
    let metadata = match json!({"processing": "ai_direct", "count": count}) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (role, content) in [(TurnRole::User, input), (TurnRole::Assistant, reply)] {
        if let Err(err) = state.add_to_history(context_id, role, content, metadata.clone()).await {
            warn!(%context_id, %err, "failed to append history");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_color_preferences() {
        assert_eq!(preferred_color("My favorite color is Blue"), Some("blue"));
        assert_eq!(preferred_color("I prefer the colour green"), Some("green"));
        assert_eq!(preferred_color("I like red"), None);
        assert_eq!(preferred_color("favorite color? no idea"), None);
    }

    #[test]
    fn config_follows_document() {
        let mut document = AgentConfig::default();
        document.ai.max_function_rounds = 2;
        document.ai.tool_timeout_secs = 5;
        let config = DispatcherConfig::from_config(&document);
        assert_eq!(config.max_function_rounds, 2);
        assert_eq!(config.tool_timeout, Duration::from_secs(5));
        assert_eq!(config.unauthenticated_policy, UnauthenticatedPolicy::FailClosed);
    }

    #[test]
    fn joined_results_fall_back_to_empty_reply() {
        assert_eq!(joined(&[]), EMPTY_RESPONSE_REPLY);
        assert_eq!(
            joined(&[("status".into(), "ok".into())]),
            "Function results:\n- status: ok"
        );
    }

    #[test]
    fn finished_turn_keeps_newer_token_for_same_task() {
        let turns = ActiveTurns::default();
        let (first, first_token) = turns.begin("t-1");
        let (second, second_token) = turns.begin("t-1");

        drop(first);
        assert_eq!(turns.ids(), vec!["t-1".to_owned()]);
        assert!(turns.cancel("t-1"));
        assert!(second_token.is_cancelled());
        assert!(!first_token.is_cancelled());

        drop(second);
        assert!(turns.ids().is_empty());
        assert!(!turns.cancel("t-1"));
    }
}
