//! In-unit agent loop.
//!
//! The loop sends the live conversation to the model, validates the reply
//! into a [`ToolCommand`], dispatches it through the [`CapabilityRegistry`],
//! and repeats until the completion capability is invoked. Every turn is recorded
//! in the append-only audit log, and the scratchpad is rewritten after every
//! history mutation so a restarted unit resumes where it stopped.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{COMPLETION_CAPABILITY, CapabilityContext, CapabilityRegistry};
use crate::core::command::ToolCommand;
use crate::core::history::take_overflow;
use crate::core::types::Message;
use crate::io::audit::{AuditEvent, AuditLog, write_session};
use crate::io::llm::LlmClient;
use crate::io::scratchpad::{Scratchpad, load_scratchpad_if_present, write_scratchpad};
use crate::io::workspace::WorkspacePaths;

/// Seed message for a resumed run whose scratchpad holds no live conversation.
const RESUME_NOTICE: &str =
    "Resumed from scratchpad. Earlier messages are archived in the scratchpad history.";

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub task_id: String,
    pub workspace: PathBuf,
    pub max_messages: usize,
}

#[derive(Debug, Error)]
pub enum AgentError {
    /// The model named a capability outside the registry. Fatal to the task.
    #[error("unknown capability '{name}' (known: {known})")]
    UnknownCapability { name: String, known: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutcome {
    pub llm_calls: usize,
    /// Dispatched capability invocations, including the completion call.
    pub turns: usize,
    pub resumed: bool,
    /// Summary passed to the completion capability, if it was a string.
    pub summary: Option<String>,
}

pub struct AgentLoop<'a, L: LlmClient + ?Sized> {
    llm: &'a L,
    capabilities: &'a CapabilityRegistry,
    paths: WorkspacePaths,
    audit: AuditLog,
    max_messages: usize,
    history: Vec<Message>,
    scratchpad: Scratchpad,
    resumed: bool,
}

impl<'a, L: LlmClient + ?Sized> AgentLoop<'a, L> {
    /// Prepare a loop over `config.workspace`.
    ///
    /// An existing scratchpad means a previous run was interrupted: the live
    /// conversation is restored from it and the prompt is not appended again.
    /// Otherwise the prompt file becomes the first user message.
    #[instrument(skip_all, fields(task_id = %config.task_id, workspace = %config.workspace.display()))]
    pub fn new(
        config: &AgentConfig,
        llm: &'a L,
        capabilities: &'a CapabilityRegistry,
    ) -> Result<Self> {
        capabilities.validate()?;
        let paths = WorkspacePaths::new(&config.workspace, &config.task_id);
        let audit = AuditLog::new(&paths.audit_log);

        let mut agent = Self {
            llm,
            capabilities,
            paths,
            audit,
            max_messages: config.max_messages,
            history: Vec::new(),
            scratchpad: Scratchpad::default(),
            resumed: false,
        };

        match load_scratchpad_if_present(&agent.paths.scratchpad)? {
            Some(mut scratchpad) => {
                let mut history = std::mem::take(&mut scratchpad.conversation);
                if history.is_empty() {
                    warn!("scratchpad has no live conversation; resuming from notice");
                    history.push(Message::system(RESUME_NOTICE));
                }
                info!(
                    live = history.len(),
                    archived = scratchpad.history.len(),
                    "resuming from scratchpad"
                );
                agent.scratchpad = scratchpad;
                agent.resumed = true;
                for message in history {
                    agent.push(message);
                }
                agent.persist()?;
            }
            None => {
                let prompt = fs::read_to_string(&agent.paths.prompt)
                    .with_context(|| format!("read prompt {}", agent.paths.prompt.display()))?;
                agent.audit.append(&AuditEvent::User { content: &prompt })?;
                agent.append(Message::user(prompt))?;
            }
        }
        Ok(agent)
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn scratchpad(&self) -> &Scratchpad {
        &self.scratchpad
    }

    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Append one message, move any overflow into the scratchpad, and persist.
    pub fn append(&mut self, message: Message) -> Result<()> {
        self.push(message);
        self.persist()
    }

    fn push(&mut self, message: Message) {
        self.history.push(message);
        let overflow = take_overflow(&mut self.history, self.max_messages);
        if !overflow.is_empty() {
            debug!(moved = overflow.len(), "pruned live history");
            self.scratchpad.history.extend(overflow);
        }
    }

    fn persist(&mut self) -> Result<()> {
        self.scratchpad.conversation.clone_from(&self.history);
        write_scratchpad(&self.paths.scratchpad, &self.scratchpad)
    }

    /// Drive the model until it invokes the completion capability.
    ///
    /// The loop ends on that call even if the capability itself fails; the
    /// missing marker then decides the task. Malformed replies are fed back
    /// as system messages. An unknown
    /// capability name aborts with [`AgentError::UnknownCapability`] and
    /// leaves no session transcript.
    #[instrument(skip_all, fields(resumed = self.resumed))]
    pub fn run(mut self) -> Result<AgentOutcome> {
        let capabilities = self.capabilities;
        let mut llm_calls = 0usize;
        let mut turns = 0usize;
        let summary = loop {
            let response = self.llm.chat(&self.history).context("llm request")?;
            llm_calls += 1;
            self.append(Message::assistant(render(&response)))?;
            self.audit.append(&AuditEvent::Assistant { content: &response })?;

            let command = match ToolCommand::from_response(&response) {
                Ok(command) => command,
                Err(err) => {
                    let message = err.to_string();
                    warn!(error = %message, "model reply rejected");
                    self.append(Message::system(message.clone()))?;
                    self.audit.append(&AuditEvent::Error { content: &message })?;
                    continue;
                }
            };

            let Some(capability) = capabilities.get(&command.capability) else {
                return Err(AgentError::UnknownCapability {
                    name: command.capability,
                    known: capabilities.names().join(", "),
                }
                .into());
            };

            let result = {
                let mut ctx = CapabilityContext {
                    workspace: &self.paths,
                    scratchpad: &mut self.scratchpad,
                };
                capability.invoke(&mut ctx, &command.args)
            };
            turns += 1;
            let completed = command.capability == COMPLETION_CAPABILITY;
            let succeeded = result.is_ok();
            let content = match result {
                Ok(value) => render(&value),
                Err(err) => format!("{err:#}"),
            };
            debug!(capability = %command.capability, "capability returned");
            self.append(Message::system(content.clone()))?;
            self.audit.append(&AuditEvent::Tool {
                capability: &command.capability,
                content: &content,
            })?;

            if completed {
                break command
                    .args
                    .get("summary")
                    .and_then(Value::as_str)
                    .filter(|_| succeeded)
                    .map(str::to_string);
            }
        };

        write_session(&self.paths.session, &self.history)?;
        self.persist()?;
        info!(llm_calls, turns, "agent loop finished");
        Ok(AgentOutcome {
            llm_calls,
            turns,
            resumed: self.resumed,
            summary,
        })
    }
}

/// Strings are kept verbatim; everything else is rendered as compact JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
