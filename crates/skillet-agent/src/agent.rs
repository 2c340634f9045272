//! Execution surface — `ChatAgent` and the typed `Agent<I, O>`.
//!
//! Both wrap the same core: an agent repository loaded from disk, a
//! completion client, the skill and tool managers, and a persistent worker
//! thread running a current-thread tokio runtime. MCP subprocesses are
//! spawned on the worker so their I/O outlives any single call; blocking
//! entry points ship their future to the worker and wait.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use skillet_core::config::schema::SkillMetadata;
use skillet_core::{load_agent, AgentConfig};
use skillet_core::types::{AgentResponse, Message, StreamEvent};
use skillet_providers::{CompletionClient, HttpCompletionClient};

use crate::agent_loop::{run_agentic_loop, LoopConfig};
use crate::cleanup::{self, Closeable};
use crate::skills::SkillManager;
use crate::tools::{LocalTool, ToolManager};

/// How long `close()` waits for the worker thread before detaching it.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed skill-usage guidance appended to every system prompt.
const SKILL_GUIDANCE: &str = "## How to Use Skills\n\n\
    When handling a request:\n\
    1. **Plan**: Think about what information you need to gather and what actions you need to take\n\
    2. **Review**: Look at available skills and their tools - refine your plan based on what's possible\n\
    3. **Check loaded skills**: See if already-loaded skills can handle part or all of the request\n\
    4. **Load if needed**: Load additional skill(s) if your loaded skills aren't sufficient\n\
    5. **Execute**: Use the tools to gather information and perform actions\n\
    6. **Iterate**: If results aren't sufficient, revisit your plan and consider other skills/tools";

// ─────────────────────────────────────────────
// Worker runtime
// ─────────────────────────────────────────────

/// A dedicated thread running a current-thread tokio runtime.
///
/// Everything async (MCP handshakes, the loop itself for blocking calls)
/// runs here, so subprocess pipes stay bound to one live reactor for the
/// agent's whole lifetime.
struct Worker {
    handle: tokio::runtime::Handle,
    lifecycle: Mutex<Option<(tokio::sync::oneshot::Sender<()>, std::thread::JoinHandle<()>)>>,
}

impl Worker {
    fn spawn() -> anyhow::Result<Self> {
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("skillet-worker".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = handle_tx.send(Err(err));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                // Park until shutdown; spawned tasks keep running meanwhile.
                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
            })
            .context("failed to spawn agent worker thread")?;

        let handle = handle_rx
            .recv()
            .context("agent worker exited before starting its runtime")?
            .context("failed to build agent worker runtime")?;
        debug!("started agent worker");

        Ok(Self {
            handle,
            lifecycle: Mutex::new(Some((stop_tx, thread))),
        })
    }

    /// Run a future on the worker and wait for its result.
    fn block_on<F>(&self, future: F) -> anyhow::Result<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.recv().map_err(|_| anyhow::anyhow!("agent worker is gone"))
    }

    /// Stop the runtime and join the thread, bounded. Idempotent.
    fn shutdown(&self) {
        let taken = self
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some((stop, thread)) = taken else {
            return;
        };
        let _ = stop.send(());
        let deadline = Instant::now() + WORKER_JOIN_TIMEOUT;
        while !thread.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if thread.is_finished() {
            let _ = thread.join();
            debug!("stopped agent worker");
        } else {
            warn!("agent worker did not stop in time, detaching");
        }
    }
}

// ─────────────────────────────────────────────
// Shared core
// ─────────────────────────────────────────────

/// Structured-output configuration carried by typed agents.
struct OutputSpec {
    response_format: Value,
    prompt_section: String,
}

struct AgentCore {
    config: AgentConfig,
    client: Arc<dyn CompletionClient>,
    skills: tokio::sync::Mutex<SkillManager>,
    /// `None` once closed. Holding the sessions here lets `close()` drop
    /// them instead of waiting for the last handle.
    tools: tokio::sync::Mutex<Option<ToolManager>>,
    output: Option<OutputSpec>,
    worker: Worker,
    closed: AtomicBool,
}

impl AgentCore {
    fn open(
        path: &Path,
        local_tools: Vec<Arc<dyn LocalTool>>,
        output: Option<OutputSpec>,
    ) -> anyhow::Result<Arc<Self>> {
        let config = load_agent(path)?;
        let client: Arc<dyn CompletionClient> =
            Arc::new(HttpCompletionClient::from_settings(&config.llm));
        Self::assemble(config, client, local_tools, output)
    }

    fn assemble(
        config: AgentConfig,
        client: Arc<dyn CompletionClient>,
        local_tools: Vec<Arc<dyn LocalTool>>,
        output: Option<OutputSpec>,
    ) -> anyhow::Result<Arc<Self>> {
        let worker = Worker::spawn()?;

        let mut tools = ToolManager::new(
            config.mcp_servers.clone(),
            config.vars.clone(),
            config.retry.clone(),
        );
        for tool in local_tools {
            tools.register_local(tool);
        }
        // Connect on the worker so stdio children bind to its reactor.
        let tools = worker.block_on(async move {
            tools.initialize().await;
            tools
        })?;

        validate_skill_tools(&config.skills, &tools);
        let skills = SkillManager::from_skills(config.skills.clone());

        let core = Arc::new(Self {
            config,
            client,
            skills: tokio::sync::Mutex::new(skills),
            tools: tokio::sync::Mutex::new(Some(tools)),
            output,
            worker,
            closed: AtomicBool::new(false),
        });
        let weak = Arc::downgrade(&core);
        cleanup::register(weak as Weak<dyn Closeable>);
        Ok(core)
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("agent is closed");
        }
        Ok(())
    }

    /// Instructions, skill summary, usage guidance, then any output-format
    /// section, joined by blank lines.
    fn build_system_prompt(&self, skills: &SkillManager) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.config.instructions.is_empty() {
            parts.push(&self.config.instructions);
        }
        let summary = skills.summary();
        if !summary.is_empty() {
            parts.push(&summary);
        }
        parts.push(SKILL_GUIDANCE);
        if let Some(output) = &self.output {
            parts.push(&output.prompt_section);
        }
        parts.join("\n\n")
    }

    /// One full agent run. Loaded skills persist across runs.
    async fn respond(
        &self,
        messages: Vec<Message>,
        events: Option<UnboundedSender<StreamEvent>>,
    ) -> anyhow::Result<AgentResponse> {
        let mut skills = self.skills.lock().await;
        let tools_guard = self.tools.lock().await;
        let Some(tools) = tools_guard.as_ref() else {
            anyhow::bail!("agent is closed");
        };
        let system_prompt = self.build_system_prompt(&skills);
        let config = LoopConfig {
            max_iterations: self.config.llm.max_iterations,
            response_format: self.output.as_ref().map(|o| o.response_format.clone()),
        };
        let response = run_agentic_loop(
            self.client.as_ref(),
            &mut skills,
            tools,
            &system_prompt,
            &messages,
            &config,
            events.as_ref(),
        )
        .await?;
        Ok(response)
    }
}

impl Closeable for AgentCore {
    /// Stop the worker, then drop the tool manager so MCP subprocesses die
    /// now (`kill_on_drop`) rather than when the last handle drops.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.worker.shutdown();
        // Worker runs went down with the worker. The lock is only still
        // held by an in-flight caller-runtime run; in that case the
        // sessions go when the core drops.
        if let Ok(mut tools) = self.tools.try_lock() {
            drop(tools.take());
        }
        debug!("agent closed");
    }
}

/// Warn about skills that ask for tools the catalog does not have.
fn validate_skill_tools(skills: &[SkillMetadata], tools: &ToolManager) {
    let available = tools.tool_names();
    for skill in skills {
        for tool in &skill.tools {
            if !tools.has_tool(tool) {
                warn!(
                    skill = %skill.name,
                    tool = %tool,
                    available = ?available,
                    "skill requires a tool that is not available"
                );
            }
        }
    }
}

// ─────────────────────────────────────────────
// ChatAgent
// ─────────────────────────────────────────────

/// A conversational agent loaded from an agent repository.
///
/// ```no_run
/// use skillet_agent::ChatAgent;
/// use skillet_core::types::Message;
///
/// let agent = ChatAgent::open("./my-agent")?;
/// let reply = agent.run(&[Message::user("Hello!")])?;
/// agent.close();
/// # anyhow::Ok(())
/// ```
pub struct ChatAgent {
    core: Arc<AgentCore>,
}

impl ChatAgent {
    /// Load an agent from `path` and connect its tools. Fails fast on
    /// configuration errors.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::open_with_tools(path, Vec::new())
    }

    /// Like [`ChatAgent::open`], with in-process tools added to the catalog.
    pub fn open_with_tools(
        path: impl AsRef<Path>,
        local_tools: Vec<Arc<dyn LocalTool>>,
    ) -> anyhow::Result<Self> {
        let core = AgentCore::open(path.as_ref(), local_tools, None)?;
        Ok(Self { core })
    }

    #[cfg(test)]
    fn from_parts(
        config: AgentConfig,
        client: Arc<dyn CompletionClient>,
        local_tools: Vec<Arc<dyn LocalTool>>,
    ) -> anyhow::Result<Self> {
        let core = AgentCore::assemble(config, client, local_tools, None)?;
        Ok(Self { core })
    }

    /// The skills discovered in the repository.
    pub fn skills(&self) -> &[SkillMetadata] {
        &self.core.config.skills
    }

    /// The instructions from `AGENTS.md`.
    pub fn instructions(&self) -> &str {
        &self.core.config.instructions
    }

    /// Run the agent to completion, blocking the calling thread.
    pub fn run(&self, messages: &[Message]) -> anyhow::Result<String> {
        self.core.ensure_open()?;
        let core = Arc::clone(&self.core);
        let messages = messages.to_vec();
        let response = self
            .core
            .worker
            .block_on(async move { core.respond(messages, None).await })??;
        Ok(response.content)
    }

    /// Run the agent to completion on the caller's runtime.
    pub async fn arun(&self, messages: &[Message]) -> anyhow::Result<String> {
        self.core.ensure_open()?;
        let response = self.core.respond(messages.to_vec(), None).await?;
        Ok(response.content)
    }

    /// Run with streaming, returning a blocking iterator of content tokens.
    ///
    /// A loop failure surfaces as the iterator's final `Err` item.
    pub fn stream(&self, messages: &[Message]) -> anyhow::Result<TokenStream> {
        self.core.ensure_open()?;
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (token_tx, token_rx) = std::sync::mpsc::channel::<anyhow::Result<String>>();
        let core = Arc::clone(&self.core);
        let messages = messages.to_vec();

        self.core.worker.handle.spawn(async move {
            let forward = async {
                while let Some(event) = event_rx.recv().await {
                    if let StreamEvent::Content { text } = event {
                        if token_tx.send(Ok(text)).is_err() {
                            break;
                        }
                    }
                }
            };
            // The sender moves into the run future; when it completes the
            // channel closes and the forwarder drains out.
            let run = core.respond(messages, Some(event_tx));
            let (result, ()) = tokio::join!(run, forward);
            if let Err(err) = result {
                let _ = token_tx.send(Err(err));
            }
        });

        Ok(TokenStream { receiver: token_rx })
    }

    /// Run with streaming, returning an async stream of [`StreamEvent`]s.
    pub fn astream(&self, messages: &[Message]) -> anyhow::Result<EventStream> {
        self.core.ensure_open()?;
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let core = Arc::clone(&self.core);
        let messages = messages.to_vec();
        let task = self.core.worker.handle.spawn(async move {
            core.respond(messages, Some(event_tx)).await.map(|_| ())
        });
        Ok(EventStream {
            receiver: event_rx,
            task: Some(task),
        })
    }

    /// Release the worker and all MCP subprocesses. Idempotent; also runs
    /// on drop.
    pub fn close(&self) {
        self.core.close();
    }
}

impl Drop for ChatAgent {
    fn drop(&mut self) {
        self.core.close();
    }
}

// ─────────────────────────────────────────────
// Streaming handles
// ─────────────────────────────────────────────

/// Blocking iterator over content tokens from [`ChatAgent::stream`].
pub struct TokenStream {
    receiver: std::sync::mpsc::Receiver<anyhow::Result<String>>,
}

impl Iterator for TokenStream {
    type Item = anyhow::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}

/// Async stream of [`StreamEvent`]s from [`ChatAgent::astream`].
pub struct EventStream {
    receiver: UnboundedReceiver<StreamEvent>,
    task: Option<tokio::task::JoinHandle<anyhow::Result<()>>>,
}

impl futures::Stream for EventStream {
    type Item = anyhow::Result<StreamEvent>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::future::Future;
        use std::task::Poll;
        let this = self.get_mut();
        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(event))),
            Poll::Ready(None) => {
                // Channel closed; surface the loop's outcome exactly once.
                let Some(task) = this.task.as_mut() else {
                    return Poll::Ready(None);
                };
                match std::pin::Pin::new(task).poll(cx) {
                    Poll::Ready(result) => {
                        this.task = None;
                        match result {
                            Ok(Ok(())) => Poll::Ready(None),
                            Ok(Err(err)) => Poll::Ready(Some(Err(err))),
                            Err(err) => Poll::Ready(Some(Err(anyhow::anyhow!(err)))),
                        }
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// ─────────────────────────────────────────────
// Typed Agent
// ─────────────────────────────────────────────

/// A typed agent with structured input and output.
///
/// The input serializes into the user message; the output schema is both
/// enforced via `response_format` on the final turn and described to the
/// model in an `## Output Format` prompt section.
///
/// ```no_run
/// use schemars::JsonSchema;
/// use serde::{Deserialize, Serialize};
/// use skillet_agent::Agent;
///
/// #[derive(Serialize)]
/// struct Query { question: String }
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Answer { response: String, confidence: f64 }
///
/// let agent: Agent<Query, Answer> = Agent::open("./my-agent")?;
/// let answer = agent.run(&Query { question: "What is ML?".into() })?;
/// # anyhow::Ok(())
/// ```
pub struct Agent<I, O> {
    core: Arc<AgentCore>,
    _io: PhantomData<fn(I) -> O>,
}

impl<I, O> Agent<I, O>
where
    I: Serialize,
    O: DeserializeOwned + schemars::JsonSchema,
{
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::open_with_tools(path, Vec::new())
    }

    pub fn open_with_tools(
        path: impl AsRef<Path>,
        local_tools: Vec<Arc<dyn LocalTool>>,
    ) -> anyhow::Result<Self> {
        let core = AgentCore::open(path.as_ref(), local_tools, Some(output_spec::<O>()?))?;
        Ok(Self {
            core,
            _io: PhantomData,
        })
    }

    #[cfg(test)]
    fn from_parts(
        config: AgentConfig,
        client: Arc<dyn CompletionClient>,
    ) -> anyhow::Result<Self> {
        let core = AgentCore::assemble(config, client, Vec::new(), Some(output_spec::<O>()?))?;
        Ok(Self {
            core,
            _io: PhantomData,
        })
    }

    /// Run with typed input, blocking until the typed output arrives.
    pub fn run(&self, input: &I) -> anyhow::Result<O> {
        self.core.ensure_open()?;
        let payload = format_input(input)?;
        let core = Arc::clone(&self.core);
        let response = self
            .core
            .worker
            .block_on(async move { core.respond(vec![Message::user(payload)], None).await })??;
        parse_output(&response.content)
    }

    /// Async variant of [`Agent::run`].
    pub async fn arun(&self, input: &I) -> anyhow::Result<O> {
        self.core.ensure_open()?;
        let payload = format_input(input)?;
        let response = self
            .core
            .respond(vec![Message::user(payload)], None)
            .await?;
        parse_output(&response.content)
    }

    pub fn close(&self) {
        self.core.close();
    }
}

impl<I, O> Drop for Agent<I, O> {
    fn drop(&mut self) {
        self.core.close();
    }
}

/// Build the `response_format` payload and prompt section for `O`.
fn output_spec<O: schemars::JsonSchema>() -> anyhow::Result<OutputSpec> {
    let schema = serde_json::to_value(schemars::schema_for!(O))?;
    let response_format = json!({
        "type": "json_schema",
        "json_schema": {
            "name": "output",
            "schema": schema,
            "strict": true,
        },
    });
    let pretty = serde_json::to_string_pretty(&schema)?;
    let prompt_section = format!(
        "## Output Format\n\nYou must respond with valid JSON matching this schema:\n```json\n{pretty}\n```"
    );
    Ok(OutputSpec {
        response_format,
        prompt_section,
    })
}

/// Serialize the input for the user message. Plain strings go through
/// unquoted.
fn format_input<I: Serialize>(input: &I) -> anyhow::Result<String> {
    Ok(match serde_json::to_value(input)? {
        Value::String(text) => text,
        other => other.to_string(),
    })
}

fn parse_output<O: DeserializeOwned>(content: &str) -> anyhow::Result<O> {
    serde_json::from_str(content)
        .with_context(|| format!("agent output is not valid JSON for the output schema: {content}"))
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
