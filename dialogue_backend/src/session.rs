//! Caller-side handling of one model response: feed the parser, hand events
//! to sinks, and run the one-shot recovery when nothing was parsed.

use anyhow::Result;
use flume::Sender;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;

use crate::classify::ClassifierRegistry;
use crate::config::DialogueConfig;
use crate::event::DialogueEvent;
use crate::parser::DialogueStreamParser;
use crate::recovery::fallback_reparse;
use crate::store::{conversation_for_event, MessageStore};

/// How a response ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The streaming pass produced events.
    Parsed { events: Vec<DialogueEvent> },
    /// Only the fallback reparse produced events.
    Recovered { events: Vec<DialogueEvent> },
    /// Nothing could be parsed; show the raw text.
    Unparsed { raw: String },
}

impl SessionOutcome {
    pub fn events(&self) -> &[DialogueEvent] {
        match self {
            SessionOutcome::Parsed { events } | SessionOutcome::Recovered { events } => events,
            SessionOutcome::Unparsed { .. } => &[],
        }
    }

    pub fn is_unparsed(&self) -> bool {
        matches!(self, SessionOutcome::Unparsed { .. })
    }
}

/// Receives events as the session produces them.
pub trait EventSink: Send {
    fn on_event(&mut self, event: &DialogueEvent) -> Result<()>;

    fn on_finish(&mut self, _outcome: &SessionOutcome) -> Result<()> {
        Ok(())
    }
}

/// Drives one parser over one response.
pub struct ResponseSession {
    config: DialogueConfig,
    registry: ClassifierRegistry,
    parser: DialogueStreamParser,
    raw: String,
    events: Vec<DialogueEvent>,
    sink: Box<dyn EventSink>,
}

impl ResponseSession {
    pub fn new(config: DialogueConfig, sink: Box<dyn EventSink>) -> Self {
        let registry = ClassifierRegistry::standard(&config);
        Self::with_registry(config, registry, sink)
    }

    pub fn with_registry(
        config: DialogueConfig,
        registry: ClassifierRegistry,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let parser = DialogueStreamParser::with_registry(
            config.user_name.clone(),
            config.parser.clone(),
            registry.clone(),
        );
        Self {
            config,
            registry,
            parser,
            raw: String::new(),
            events: Vec::new(),
            sink,
        }
    }

    /// Feed one chunk. Returns the events it completed after the sink has
    /// seen them.
    pub fn push_chunk(&mut self, chunk: &str) -> Result<Vec<DialogueEvent>> {
        self.raw.push_str(chunk);
        let events = self.parser.push(chunk);
        self.deliver(&events)?;
        Ok(events)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn parser(&self) -> &DialogueStreamParser {
        &self.parser
    }

    /// Flush the parser and settle the outcome. A response with no events gets
    /// exactly one fallback reparse when recovery is enabled.
    pub fn finish(mut self) -> Result<SessionOutcome> {
        let flushed = self.parser.flush();
        self.deliver(&flushed)?;

        let outcome = if !self.events.is_empty() {
            SessionOutcome::Parsed {
                events: std::mem::take(&mut self.events),
            }
        } else {
            let recovered = if self.config.recovery.fallback_reparse {
                tracing::info!(
                    "No events in {} chars of response, attempting fallback reparse",
                    self.raw.chars().count()
                );
                fallback_reparse(&self.raw, &self.config, &self.registry)
            } else {
                Vec::new()
            };

            if recovered.is_empty() {
                tracing::warn!("Response could not be parsed; returning raw text");
                SessionOutcome::Unparsed {
                    raw: std::mem::take(&mut self.raw),
                }
            } else {
                tracing::info!("Fallback reparse recovered {} events", recovered.len());
                self.deliver(&recovered)?;
                SessionOutcome::Recovered {
                    events: std::mem::take(&mut self.events),
                }
            }
        };

        self.sink.on_finish(&outcome)?;
        Ok(outcome)
    }

    fn deliver(&mut self, events: &[DialogueEvent]) -> Result<()> {
        for event in events {
            self.sink.on_event(event)?;
            self.events.push(event.clone());
        }
        Ok(())
    }
}

/// Feed a chunk stream through `session` until it ends, then finish it.
///
/// The first stream error aborts the session and is returned. Dropping the
/// future cancels the session.
pub async fn drive_stream<S>(mut stream: S, mut session: ResponseSession) -> Result<SessionOutcome>
where
    S: Stream<Item = Result<String>> + Unpin,
{
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        session.push_chunk(&chunk)?;
    }
    session.finish()
}

/// Writes events to a [`MessageStore`], routed by [`conversation_for_event`].
pub struct StoreSink {
    store: Arc<dyn MessageStore>,
    current_conversation: String,
}

impl StoreSink {
    pub fn new(store: Arc<dyn MessageStore>, current_conversation: impl Into<String>) -> Self {
        Self {
            store,
            current_conversation: current_conversation.into(),
        }
    }
}

impl EventSink for StoreSink {
    fn on_event(&mut self, event: &DialogueEvent) -> Result<()> {
        let conversation_id = conversation_for_event(event, &self.current_conversation);
        let ids = self.store.append_message(event, &conversation_id)?;
        tracing::debug!(
            "Stored {} event as {} records in {}",
            event.kind(),
            ids.len(),
            conversation_id
        );
        Ok(())
    }

    fn on_finish(&mut self, outcome: &SessionOutcome) -> Result<()> {
        if let SessionOutcome::Unparsed { raw } = outcome {
            self.store
                .record_unparsed(&self.current_conversation, raw)?;
        }
        Ok(())
    }
}

/// Messages for a renderer listening on a channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Event(DialogueEvent),
    Finished(SessionOutcome),
}

/// Forwards events over a `flume` channel. A dropped receiver is not an error.
pub struct ChannelSink {
    tx: Sender<SessionEvent>,
}

impl ChannelSink {
    pub fn new(tx: Sender<SessionEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn on_event(&mut self, event: &DialogueEvent) -> Result<()> {
        let _ = self.tx.send(SessionEvent::Event(event.clone()));
        Ok(())
    }

    fn on_finish(&mut self, outcome: &SessionOutcome) -> Result<()> {
        let _ = self.tx.send(SessionEvent::Finished(outcome.clone()));
        Ok(())
    }
}

/// Sends everything to each inner sink in order; stops at the first error.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn on_event(&mut self, event: &DialogueEvent) -> Result<()> {
        for sink in &mut self.sinks {
            sink.on_event(event)?;
        }
        Ok(())
    }

    fn on_finish(&mut self, outcome: &SessionOutcome) -> Result<()> {
        for sink in &mut self.sinks {
            sink.on_finish(outcome)?;
        }
        Ok(())
    }
}
