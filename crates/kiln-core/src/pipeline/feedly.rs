//! Fetch, label and apply: filters uninteresting news out of a Feedly category.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_abstraction::{AgentSpec, MessagePart, ModelMessage, RuntimeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::{Node, Pipeline, PipelineError, PipelineRun, Result, Transition};
use crate::agents::{AgentConfig, AgentFactory, FieldSpec, PrimitiveType, ProviderCredentials, StructuredType};
use crate::sources::ItemSource;

/// Prompt prefix for a label batch; titles follow as a bullet list.
pub const LABEL_PROMPT: &str = "Label the interestingness of these news titles: \n* ";

/// Label the agent returns for one title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interestingness {
    pub title: String,
    pub uninteresting: bool,
}

impl Interestingness {
    /// Result type token.
    pub const NAME: &'static str = "Interestingness";

    /// Record type registered with the factory.
    pub fn structured_type() -> StructuredType {
        StructuredType::new(
            Self::NAME,
            vec![
                FieldSpec::new("title", PrimitiveType::Str).with_description("The title of the news."),
                FieldSpec::new("uninteresting", PrimitiveType::Bool)
                    .with_description("Whether the news is uninteresting."),
            ],
        )
    }
}

/// Run state. `titles` and `ids` grow together; `uninteresting` catches up
/// during labelling.
pub struct FeedlyState {
    pub titles: Vec<String>,
    pub uninteresting: Vec<bool>,
    pub ids: Vec<String>,
    feedly_token: Zeroizing<String>,
    openai_api_key: Zeroizing<String>,
}

impl FeedlyState {
    /// Creates empty state holding the run's secrets.
    pub fn new(feedly_token: impl Into<String>, openai_api_key: impl Into<String>) -> Self {
        Self {
            titles: Vec::new(),
            uninteresting: Vec::new(),
            ids: Vec::new(),
            feedly_token: Zeroizing::new(feedly_token.into()),
            openai_api_key: Zeroizing::new(openai_api_key.into()),
        }
    }

    /// Drops the secrets and keeps the lists.
    pub fn into_result(mut self) -> FeedlyResult {
        self.take_result()
    }

    /// Moves the lists out, leaving them empty.
    pub fn take_result(&mut self) -> FeedlyResult {
        FeedlyResult {
            titles: std::mem::take(&mut self.titles),
            uninteresting: std::mem::take(&mut self.uninteresting),
            ids: std::mem::take(&mut self.ids),
        }
    }

    fn check_lengths(&self) -> Result<()> {
        if self.titles.len() == self.ids.len() && self.titles.len() == self.uninteresting.len() {
            return Ok(());
        }
        Err(PipelineError::InconsistentState(format!(
            "{} titles, {} labels, {} ids",
            self.titles.len(),
            self.uninteresting.len(),
            self.ids.len()
        )))
    }
}

impl fmt::Debug for FeedlyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedlyState")
            .field("titles", &self.titles)
            .field("uninteresting", &self.uninteresting)
            .field("ids", &self.ids)
            .field("feedly_token", &"<redacted>")
            .field("openai_api_key", &"<redacted>")
            .finish()
    }
}

/// Labelled items, aligned by index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedlyResult {
    pub titles: Vec<String>,
    pub uninteresting: Vec<bool>,
    pub ids: Vec<String>,
}

/// Services the Feedly stages share.
#[derive(Clone)]
pub struct FeedlyDeps {
    source: Arc<dyn ItemSource>,
    factory: Arc<AgentFactory>,
}

impl FeedlyDeps {
    /// Wraps `factory` with the `Interestingness` record type registered.
    pub fn new(source: Arc<dyn ItemSource>, factory: AgentFactory) -> Self {
        Self { source, factory: Arc::new(factory.with_structured_type(Interestingness::structured_type())) }
    }

    /// The factory `Label` builds its agents with.
    pub fn factory(&self) -> &AgentFactory {
        &self.factory
    }
}

impl fmt::Debug for FeedlyDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedlyDeps").field("factory", &self.factory).finish_non_exhaustive()
    }
}

/// Reads items from a category. `label` configures the next stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetch {
    pub max_count: usize,
    pub category: String,
    pub label: Label,
}

impl Default for Fetch {
    fn default() -> Self {
        Self { max_count: 10, category: "AI".to_string(), label: Label::default() }
    }
}

impl Fetch {
    async fn run(self, state: &mut FeedlyState, deps: &FeedlyDeps) -> Result<Label> {
        let items = deps.source.fetch(self.max_count, &self.category, &state.feedly_token).await?;
        for item in items {
            state.titles.push(item.title);
            state.ids.push(item.id);
        }
        info!(category = %self.category, count = state.titles.len(), "Fetched items");
        Ok(self.label)
    }
}

/// Asks the agent to label titles, one batch at a time. `apply` configures
/// the next stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub batch_size: usize,
    pub agent_name: String,
    pub apply: Apply,
}

impl Default for Label {
    fn default() -> Self {
        Self { batch_size: 50, agent_name: "FeedlyPrompt".to_string(), apply: Apply::default() }
    }
}

impl Label {
    /// The prompt sent for one batch.
    pub fn prompt<S: AsRef<str>>(titles: &[S]) -> String {
        let titles: Vec<&str> = titles.iter().map(AsRef::as_ref).collect();
        format!("{LABEL_PROMPT}{}", titles.join("\n* "))
    }

    /// Reads the `uninteresting` flag from every result tool call the model made,
    /// in order.
    ///
    /// # Errors
    /// `Runtime` if a call's arguments are not a label.
    pub fn extract_labels(spec: &AgentSpec, messages: &[ModelMessage]) -> Result<Vec<bool>> {
        let mut labels = Vec::new();
        for message in messages.iter().filter(|m| m.is_response()) {
            for part in message.parts() {
                match part {
                    MessagePart::ToolCall(call) if spec.is_result_tool(&call.tool_name) => {
                        let args = call.args_as_map()?;
                        let label: Interestingness = serde_json::from_value(Value::Object(args))
                            .map_err(|e| RuntimeError::SerializationError(e.to_string()))?;
                        labels.push(label.uninteresting);
                    }
                    MessagePart::ToolCall(_)
                    | MessagePart::SystemPrompt { .. }
                    | MessagePart::UserPrompt { .. }
                    | MessagePart::Text { .. }
                    | MessagePart::ToolReturn { .. }
                    | MessagePart::RetryPrompt { .. } => {}
                }
            }
        }
        Ok(labels)
    }

    async fn run(self, state: &mut FeedlyState, deps: &FeedlyDeps) -> Result<Apply> {
        if self.batch_size == 0 {
            return Err(PipelineError::InconsistentState("batch size must be positive".to_string()));
        }
        if !state.uninteresting.is_empty() {
            return Err(PipelineError::InconsistentState("items are already labelled".to_string()));
        }

        let credentials = ProviderCredentials::new(state.openai_api_key.as_str());
        for (batch, titles) in state.titles.chunks(self.batch_size).enumerate() {
            let mut config = AgentConfig::from_hub(deps.factory.store(), &self.agent_name).await?;
            config.result_type = vec![Interestingness::NAME.to_string()];
            let agent = deps.factory.create_agent(&config, &credentials).await?;

            let result = agent.run(&Self::prompt(titles)).await?;
            let labels = Self::extract_labels(agent.spec(), &result.new_messages)?;
            if labels.len() != titles.len() {
                return Err(PipelineError::MismatchedBatchResult {
                    batch,
                    expected: titles.len(),
                    actual: labels.len(),
                });
            }
            debug!(batch, count = labels.len(), "Labelled batch");
            state.uninteresting.extend(labels);
        }
        info!(
            labelled = state.uninteresting.len(),
            uninteresting = state.uninteresting.iter().filter(|u| **u).count(),
            "Labelled items"
        );
        Ok(self.apply)
    }
}

/// Emits the result, optionally marking uninteresting items read first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Apply {
    pub mark_as_read: bool,
}

impl Apply {
    async fn run(self, state: &mut FeedlyState, deps: &FeedlyDeps) -> Result<FeedlyResult> {
        state.check_lengths()?;
        if self.mark_as_read {
            let ids: Vec<String> = state
                .ids
                .iter()
                .zip(&state.uninteresting)
                .filter(|(_, uninteresting)| **uninteresting)
                .map(|(id, _)| id.clone())
                .collect();
            deps.source.mark_as_read(&ids, &state.feedly_token).await?;
        }
        Ok(state.take_result())
    }
}

/// Stages of the Feedly pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedlyNode {
    Fetch(Fetch),
    Label(Label),
    Apply(Apply),
}

impl FeedlyNode {
    /// Entry node reading `max_count` items from `category`, later stages on defaults.
    pub fn fetch(max_count: usize, category: impl Into<String>) -> Self {
        Self::Fetch(Fetch { max_count, category: category.into(), ..Fetch::default() })
    }
}

#[async_trait]
impl Node for FeedlyNode {
    type State = FeedlyState;
    type Deps = FeedlyDeps;
    type Output = FeedlyResult;

    fn name(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Label(_) => "label",
            Self::Apply(_) => "apply",
        }
    }

    async fn run(self, state: &mut FeedlyState, deps: &FeedlyDeps) -> Result<Transition<Self, FeedlyResult>> {
        match self {
            Self::Fetch(node) => Ok(Transition::Next(Self::Label(node.run(state, deps).await?))),
            Self::Label(node) => Ok(Transition::Next(Self::Apply(node.run(state, deps).await?))),
            Self::Apply(node) => Ok(Transition::End(node.run(state, deps).await?)),
        }
    }
}

/// Runs fetch, label and apply with default label and apply settings.
///
/// # Errors
/// The first stage error.
pub async fn filter_news(
    deps: &FeedlyDeps,
    feedly_token: &str,
    openai_api_key: &str,
    max_count: usize,
    category: &str,
) -> Result<PipelineRun<FeedlyResult>> {
    let fetch = Fetch { max_count, category: category.to_string(), ..Fetch::default() };
    filter_news_with(deps, feedly_token, openai_api_key, fetch).await
}

/// Runs the pipeline from `fetch`, carrying its label and apply settings through.
///
/// # Errors
/// The first stage error.
pub async fn filter_news_with(
    deps: &FeedlyDeps,
    feedly_token: &str,
    openai_api_key: &str,
    fetch: Fetch,
) -> Result<PipelineRun<FeedlyResult>> {
    let mut state = FeedlyState::new(feedly_token, openai_api_key);
    Pipeline::new().run(FeedlyNode::Fetch(fetch), &mut state, deps).await
}
