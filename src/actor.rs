// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The Session Actor: one task per session, the sole writer
//! of that session's event log, message table, participant table and
//! sandbox record. Every operator and subscriber operation is a command sent
//! over a channel and handled sequentially in [`SessionActor::run`] — this
//! is what gives the at-most-one-processing and total-log-ordering
//! invariants for free, the same way `sven-node`'s `ControlService` serves
//! as the sole owner of its `sessions` map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::crypto::token::RawToken;
use crate::domain::{
    EventFilter, EventType, Message, MessageSource, MessageStatus, Participant,
    ParticipantRole, ReasoningEffort, Session, SessionStatus,
};
use crate::error::OrchestratorError;
use crate::event_log::{Cursor, EventLog};
use crate::hub::SubscriberHub;
use crate::ingress;
use crate::protocol::{SandboxEventRequest, ServerFrame, StateSnapshot};
use crate::queue;
use crate::sandbox::{SandboxClient, SandboxController};
use crate::token_aggregator::{Flushed, TokenAggregator};

const CMD_CHANNEL_CAPACITY: usize = 256;
const REPLAY_TAIL_SIZE: usize = 200;
const BASE_RETRY_BACKOFF: Duration = Duration::from_millis(200);
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);
const RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// How the author of an enqueued prompt is identified. The WebSocket
/// channel already has an authenticated participant from `subscribe`; the
/// operator HTTP surface only has the caller's opaque external id and must
/// resolve (or create) a participant record for it.
pub enum AuthorRef {
    Known(Uuid),
    External(String),
}

pub struct EnqueueInput {
    pub content: String,
    pub author_id: AuthorRef,
    pub source: MessageSource,
    pub attachments: Option<Vec<String>>,
    pub callback_context: Option<serde_json::Value>,
    pub reasoning_effort: Option<String>,
}

pub struct IssueTokenInput {
    pub user_id: String,
    pub github_login: Option<String>,
    pub github_name: Option<String>,
}

pub struct UpsertParticipantInput {
    pub user_id: String,
    pub github_login: Option<String>,
    pub display_name: Option<String>,
}

pub struct MessagesPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub cursor: Option<String>,
}

pub struct EventsPage {
    pub events: Vec<crate::domain::Event>,
    pub has_more: bool,
    pub cursor: Option<String>,
}

pub struct SubscribeResult {
    pub state: StateSnapshot,
    pub replay: Vec<crate::domain::Event>,
    pub frames: mpsc::Receiver<ServerFrame>,
    pub participant_id: Uuid,
}

type Reply<T> = oneshot::Sender<Result<T, OrchestratorError>>;

enum ActorCommand {
    EnqueuePrompt(EnqueueInput, Reply<(Uuid, MessageStatus)>),
    IssueWsToken(IssueTokenInput, Reply<(String, Uuid)>),
    UpsertParticipant(UpsertParticipantInput, Reply<Participant>),
    ListParticipants(Reply<Vec<Participant>>),
    ListMessages {
        status: Option<MessageStatus>,
        limit: usize,
        cursor: Option<String>,
        reply: Reply<MessagesPage>,
    },
    ListEvents {
        category: Option<EventFilter>,
        limit: usize,
        cursor: Option<String>,
        reply: Reply<EventsPage>,
    },
    LoadOlderEvents {
        category: Option<EventFilter>,
        limit: usize,
        before: String,
        reply: Reply<EventsPage>,
    },
    Subscribe {
        client_id: String,
        token: String,
        reply: Reply<SubscribeResult>,
    },
    Unsubscribe {
        client_id: String,
    },
    Typing {
        participant_id: Uuid,
        is_typing: bool,
    },
    TouchLastSeen {
        participant_id: Uuid,
    },
    Stop(Reply<()>),
    Archive(Reply<()>),
    Unarchive(Reply<()>),
    State(Reply<Session>),
    SandboxEvent(SandboxEventRequest, Reply<()>),
    HasInFlightWork(Reply<bool>),
    Reconcile,
    DispatchFinished {
        message_id: Uuid,
        outcome: Result<(), String>,
    },
}

/// A cheap, cloneable front for a running session actor.
#[derive(Clone)]
pub struct ActorHandle {
    session_id: Uuid,
    cmd_tx: mpsc::Sender<ActorCommand>,
}

impl ActorHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ActorCommand,
    ) -> Result<T, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| OrchestratorError::SessionTerminal(self.session_id.to_string()))?;
        rx.await
            .map_err(|_| OrchestratorError::internal(anyhow::anyhow!("actor dropped reply")))?
    }

    pub async fn enqueue_prompt(&self, input: EnqueueInput) -> Result<(Uuid, MessageStatus), OrchestratorError> {
        self.call(|reply| ActorCommand::EnqueuePrompt(input, reply)).await
    }

    pub async fn issue_ws_token(&self, input: IssueTokenInput) -> Result<(String, Uuid), OrchestratorError> {
        self.call(|reply| ActorCommand::IssueWsToken(input, reply)).await
    }

    pub async fn upsert_participant(&self, input: UpsertParticipantInput) -> Result<Participant, OrchestratorError> {
        self.call(|reply| ActorCommand::UpsertParticipant(input, reply)).await
    }

    pub async fn list_participants(&self) -> Result<Vec<Participant>, OrchestratorError> {
        self.call(ActorCommand::ListParticipants).await
    }

    pub async fn list_messages(
        &self,
        status: Option<MessageStatus>,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<MessagesPage, OrchestratorError> {
        self.call(|reply| ActorCommand::ListMessages {
            status,
            limit,
            cursor,
            reply,
        })
        .await
    }

    pub async fn list_events(
        &self,
        category: Option<EventFilter>,
        limit: usize,
        cursor: Option<String>,
    ) -> Result<EventsPage, OrchestratorError> {
        self.call(|reply| ActorCommand::ListEvents {
            category,
            limit,
            cursor,
            reply,
        })
        .await
    }

    pub async fn load_older_events(
        &self,
        category: Option<EventFilter>,
        limit: usize,
        before: String,
    ) -> Result<EventsPage, OrchestratorError> {
        self.call(|reply| ActorCommand::LoadOlderEvents {
            category,
            limit,
            before,
            reply,
        })
        .await
    }

    pub async fn subscribe(&self, client_id: String, token: String) -> Result<SubscribeResult, OrchestratorError> {
        self.call(|reply| ActorCommand::Subscribe {
            client_id,
            token,
            reply,
        })
        .await
    }

    pub async fn unsubscribe(&self, client_id: String) {
        let _ = self.cmd_tx.send(ActorCommand::Unsubscribe { client_id }).await;
    }

    pub async fn typing(&self, participant_id: Uuid, is_typing: bool) {
        let _ = self
            .cmd_tx
            .send(ActorCommand::Typing {
                participant_id,
                is_typing,
            })
            .await;
    }

    /// Fire-and-forget presence bump, called for every inbound subscriber
    /// frame, not just on `subscribe`.
    pub async fn touch_last_seen(&self, participant_id: Uuid) {
        let _ = self
            .cmd_tx
            .send(ActorCommand::TouchLastSeen { participant_id })
            .await;
    }

    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        self.call(ActorCommand::Stop).await
    }

    pub async fn archive(&self) -> Result<(), OrchestratorError> {
        self.call(ActorCommand::Archive).await
    }

    pub async fn unarchive(&self) -> Result<(), OrchestratorError> {
        self.call(ActorCommand::Unarchive).await
    }

    pub async fn state(&self) -> Result<Session, OrchestratorError> {
        self.call(ActorCommand::State).await
    }

    pub async fn sandbox_event(&self, event: SandboxEventRequest) -> Result<(), OrchestratorError> {
        self.call(|reply| ActorCommand::SandboxEvent(event, reply)).await
    }

    /// Whether a message is currently `processing` — used by shutdown
    /// draining to wait out in-flight dispatch before the process exits.
    pub async fn has_in_flight_work(&self) -> Result<bool, OrchestratorError> {
        self.call(ActorCommand::HasInFlightWork).await
    }
}

pub struct SessionActor {
    session: Session,
    participants: Vec<Participant>,
    messages: Vec<Message>,
    event_log: EventLog,
    sandbox: SandboxController,
    hub: SubscriberHub,
    aggregator: TokenAggregator,
    token_flush_rx: mpsc::UnboundedReceiver<Flushed>,
    config: Arc<OrchestratorConfig>,
    sandbox_client: Arc<dyn SandboxClient>,
    cmd_rx: mpsc::Receiver<ActorCommand>,
    cmd_tx: mpsc::Sender<ActorCommand>,
    stop_deadline: Option<Instant>,
}

impl SessionActor {
    pub fn spawn(
        session: Session,
        config: Arc<OrchestratorConfig>,
        sandbox_client: Arc<dyn SandboxClient>,
    ) -> ActorHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
        let (token_tx, token_flush_rx) = mpsc::unbounded_channel();
        let session_id = session.id;
        let actor = SessionActor {
            session,
            participants: Vec::new(),
            messages: Vec::new(),
            event_log: EventLog::new(),
            sandbox: SandboxController::new(),
            hub: SubscriberHub::new(),
            aggregator: TokenAggregator::new(token_tx),
            token_flush_rx,
            config,
            sandbox_client,
            cmd_rx,
            cmd_tx: cmd_tx.clone(),
            stop_deadline: None,
        };
        tokio::spawn(actor.run());
        ActorHandle { session_id, cmd_tx }
    }

    async fn run(mut self) {
        let mut reconcile_tick = tokio::time::interval(RECONCILE_INTERVAL);
        loop {
            tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                Some(flushed) = self.token_flush_rx.recv() => {
                    self.on_token_flushed(flushed);
                }
                _ = reconcile_tick.tick() => {
                    self.reconcile();
                }
                _ = tokio::time::sleep_until(self.aggregator.deadline()) => {
                    self.aggregator.flush();
                }
                else => break,
            }
        }
        info!(session_id = %self.session.id, "session actor exiting");
    }

    fn on_token_flushed(&mut self, flushed: Flushed) {
        let event = crate::domain::Event {
            id: Uuid::new_v4(),
            event_type: EventType::Token,
            data: serde_json::json!({ "text": flushed.text }),
            message_id: Some(flushed.message_id),
            call_id: None,
            created_at: chrono::Utc::now(),
        };
        self.append_and_broadcast(event);
    }

    fn append_and_broadcast(&mut self, event: crate::domain::Event) {
        self.event_log.append(event.clone());
        self.hub.broadcast(ServerFrame::SandboxEvent { event });
    }

    async fn handle_command(&mut self, cmd: ActorCommand) {
        match cmd {
            ActorCommand::EnqueuePrompt(input, reply) => {
                let _ = reply.send(self.enqueue_prompt(input));
                self.try_dispatch();
            }
            ActorCommand::IssueWsToken(input, reply) => {
                let _ = reply.send(self.issue_ws_token(input));
            }
            ActorCommand::UpsertParticipant(input, reply) => {
                let _ = reply.send(Ok(self.upsert_participant(input)));
            }
            ActorCommand::ListParticipants(reply) => {
                let _ = reply.send(Ok(self.participants.clone()));
            }
            ActorCommand::ListMessages {
                status,
                limit,
                cursor,
                reply,
            } => {
                let _ = reply.send(Ok(self.list_messages(status, limit, cursor)));
            }
            ActorCommand::ListEvents {
                category,
                limit,
                cursor,
                reply,
            } => {
                let page = self.event_log.list_forward(category, limit, cursor.as_deref());
                let _ = reply.send(Ok(EventsPage {
                    events: page.events,
                    has_more: page.has_more,
                    cursor: page.cursor,
                }));
            }
            ActorCommand::LoadOlderEvents {
                category,
                limit,
                before,
                reply,
            } => {
                let page = self.event_log.list_before(category, limit, &before);
                let _ = reply.send(Ok(EventsPage {
                    events: page.events,
                    has_more: page.has_more,
                    cursor: page.cursor,
                }));
            }
            ActorCommand::Subscribe {
                client_id,
                token,
                reply,
            } => {
                let _ = reply.send(self.subscribe(client_id, &token));
            }
            ActorCommand::Unsubscribe { client_id } => {
                if let Some(participant_id) = self.hub.unregister(&client_id) {
                    self.hub.broadcast(ServerFrame::ParticipantLeft { participant_id });
                }
            }
            ActorCommand::Typing {
                participant_id,
                is_typing,
            } => {
                self.hub.broadcast(ServerFrame::Typing {
                    participant_id,
                    is_typing,
                });
            }
            ActorCommand::TouchLastSeen { participant_id } => {
                if let Some(p) = self.participants.iter_mut().find(|p| p.id == participant_id) {
                    p.last_seen = chrono::Utc::now();
                }
            }
            ActorCommand::Stop(reply) => {
                let _ = reply.send(self.request_stop().await);
            }
            ActorCommand::Archive(reply) => {
                self.session.status = SessionStatus::Archived;
                self.session.updated_at = chrono::Utc::now();
                let _ = reply.send(Ok(()));
            }
            ActorCommand::Unarchive(reply) => {
                if self.session.status == SessionStatus::Archived {
                    self.session.status = SessionStatus::Active;
                    self.session.updated_at = chrono::Utc::now();
                }
                let _ = reply.send(Ok(()));
            }
            ActorCommand::State(reply) => {
                let _ = reply.send(Ok(self.session.clone()));
            }
            ActorCommand::SandboxEvent(event, reply) => {
                let _ = reply.send(Ok(()));
                self.handle_sandbox_event(event);
            }
            ActorCommand::HasInFlightWork(reply) => {
                let _ = reply.send(Ok(queue::has_processing(&self.messages)));
            }
            ActorCommand::Reconcile => self.reconcile(),
            ActorCommand::DispatchFinished { message_id, outcome } => {
                self.on_dispatch_finished(message_id, outcome);
            }
        }
    }

    fn enqueue_prompt(&mut self, input: EnqueueInput) -> Result<(Uuid, MessageStatus), OrchestratorError> {
        if self.session.status == SessionStatus::Archived {
            return Err(OrchestratorError::SessionTerminal(self.session.id.to_string()));
        }
        let author_participant_id = self.ensure_participant(&input.author_id);
        let reasoning_effort = input
            .reasoning_effort
            .as_deref()
            .and_then(ReasoningEffort::parse)
            .filter(|e| self.session.model.supported_efforts().contains(e));

        let message = Message {
            id: Uuid::new_v4(),
            author_participant_id,
            content: input.content,
            source: input.source,
            status: MessageStatus::Pending,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            attachments: input.attachments,
            callback_context: input.callback_context,
            reasoning_effort,
            error: None,
        };
        let id = message.id;
        let status = message.status;
        self.append_and_broadcast(crate::domain::Event {
            id: Uuid::new_v4(),
            event_type: EventType::UserMessage,
            data: serde_json::json!({ "message_id": id, "content": message.content }),
            message_id: Some(id),
            call_id: None,
            created_at: message.created_at,
        });
        self.messages.push(message);
        Ok((id, status))
    }

    fn issue_ws_token(&mut self, input: IssueTokenInput) -> Result<(String, Uuid), OrchestratorError> {
        let raw = RawToken::generate();
        let raw_str = raw.as_str().to_string();
        let hash = raw.into_stored(&self.config.token_pepper);
        let now = chrono::Utc::now();

        if let Some(existing) = self
            .participants
            .iter_mut()
            .find(|p| p.user_id == input.user_id)
        {
            existing.token_hash = Some(hash);
            existing.token_created_at = Some(now);
            existing.last_seen = now;
            let participant_id = existing.id;
            return Ok((raw_str, participant_id));
        }

        let is_first = self.participants.is_empty();
        let participant = Participant {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            role: if is_first {
                ParticipantRole::Owner
            } else {
                ParticipantRole::Member
            },
            joined_at: now,
            token_hash: Some(hash),
            token_created_at: Some(now),
            last_seen: now,
            github_login: input.github_login,
            display_name: input.github_name,
            avatar: None,
        };
        let participant_id = participant.id;
        self.hub.broadcast(ServerFrame::ParticipantJoined {
            participant: participant.clone(),
        });
        self.participants.push(participant);
        Ok((raw_str, participant_id))
    }

    /// Resolve a prompt's author to a participant id. `Known` is already an
    /// authenticated participant (from a subscribed WebSocket); `External`
    /// is an opaque caller-supplied id (the operator HTTP surface), looked
    /// up or created by `user_id`.
    fn ensure_participant(&mut self, author: &AuthorRef) -> Uuid {
        match author {
            AuthorRef::Known(id) => *id,
            AuthorRef::External(user_id) => {
                self.upsert_participant(UpsertParticipantInput {
                    user_id: user_id.clone(),
                    github_login: None,
                    display_name: None,
                })
                .id
            }
        }
    }

    fn upsert_participant(&mut self, input: UpsertParticipantInput) -> Participant {
        let now = chrono::Utc::now();
        if let Some(existing) = self
            .participants
            .iter_mut()
            .find(|p| p.user_id == input.user_id)
        {
            if input.github_login.is_some() {
                existing.github_login = input.github_login;
            }
            if input.display_name.is_some() {
                existing.display_name = input.display_name;
            }
            existing.last_seen = now;
            return existing.clone();
        }

        let is_first = self.participants.is_empty();
        let participant = Participant {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            role: if is_first {
                ParticipantRole::Owner
            } else {
                ParticipantRole::Member
            },
            joined_at: now,
            token_hash: None,
            token_created_at: None,
            last_seen: now,
            github_login: input.github_login,
            display_name: input.display_name,
            avatar: None,
        };
        self.hub.broadcast(ServerFrame::ParticipantJoined {
            participant: participant.clone(),
        });
        self.participants.push(participant.clone());
        participant
    }

    fn list_messages(&self, status: Option<MessageStatus>, limit: usize, cursor: Option<String>) -> MessagesPage {
        let after = cursor.as_deref().and_then(Cursor::decode);
        let filtered: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| status.map_or(true, |s| m.status == s))
            .filter(|m| match &after {
                Some(c) => (m.created_at, m.id) > (c.created_at, c.id),
                None => true,
            })
            .collect();
        let has_more = filtered.len() > limit;
        let page: Vec<Message> = filtered.into_iter().take(limit).cloned().collect();
        let cursor = page.last().map(|m| {
            Cursor {
                created_at: m.created_at,
                id: m.id,
            }
            .encode()
        });
        MessagesPage {
            messages: page,
            has_more,
            cursor,
        }
    }

    fn subscribe(&mut self, client_id: String, token: &str) -> Result<SubscribeResult, OrchestratorError> {
        let participant = self
            .participants
            .iter_mut()
            .find(|p| {
                p.token_hash
                    .as_ref()
                    .map(|h| h.verify(token, &self.config.token_pepper))
                    .unwrap_or(false)
            })
            .ok_or(OrchestratorError::Unauthorized)?;
        participant.last_seen = chrono::Utc::now();
        let participant_id = participant.id;

        let state = StateSnapshot {
            session: self.session.clone(),
            participants: self.participants.clone(),
        };
        let replay = self.event_log.tail(REPLAY_TAIL_SIZE);
        let frames = self.hub.register(client_id, participant_id);
        Ok(SubscribeResult {
            state,
            replay,
            frames,
            participant_id,
        })
    }

    async fn request_stop(&mut self) -> Result<(), OrchestratorError> {
        if let Some(processing) = self
            .messages
            .iter()
            .find(|m| m.status == MessageStatus::Processing)
            .cloned()
        {
            let _ = self.sandbox_client.stop(self.session.id).await;
            self.stop_deadline = Some(Instant::now() + STOP_GRACE_PERIOD);
            let deadline = self.stop_deadline.unwrap();
            let tx = self.cmd_tx.clone();
            let message_id = processing.id;
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                let _ = tx
                    .send(ActorCommand::DispatchFinished {
                        message_id,
                        outcome: Err("stop grace period elapsed".into()),
                    })
                    .await;
            });
        }
        Ok(())
    }

    fn handle_sandbox_event(&mut self, req: SandboxEventRequest) {
        let messages = &self.messages;
        let outcome = ingress::apply(req, &mut self.sandbox, &mut self.aggregator, |id| {
            messages
                .iter()
                .find(|m| m.id == id)
                .map(|m| m.status.is_terminal())
                .unwrap_or(true)
        });
        match outcome {
            ingress::Outcome::Absorbed => {}
            ingress::Outcome::Appended { event, new_sha } => {
                if let Some(sha) = new_sha {
                    self.session.current_sha = Some(sha);
                    self.session.updated_at = chrono::Utc::now();
                }
                self.append_and_broadcast(event);
            }
            ingress::Outcome::MessageTerminal {
                message_id,
                success,
                error,
                event,
            } => {
                self.append_and_broadcast(event);
                self.finish_message(message_id, success, error);
            }
        }
    }

    fn finish_message(&mut self, message_id: Uuid, success: bool, error: Option<String>) {
        if let Some(m) = self.messages.iter_mut().find(|m| m.id == message_id) {
            if m.status.is_terminal() {
                return;
            }
            let next = if success {
                MessageStatus::Completed
            } else {
                MessageStatus::Failed
            };
            if m.status.can_transition_to(next) {
                m.status = next;
                m.completed_at = Some(chrono::Utc::now());
                m.error = error;
            }
        }
        self.stop_deadline = None;
        self.hub.broadcast(ServerFrame::ProcessingStatus {
            message_id: Some(message_id),
            status: self.messages.iter().find(|m| m.id == message_id).map(|m| m.status).unwrap_or(MessageStatus::Failed),
        });
        self.try_dispatch();
    }

    fn on_dispatch_finished(&mut self, message_id: Uuid, outcome: Result<(), String>) {
        if let Some(m) = self.messages.iter().find(|m| m.id == message_id) {
            if m.status.is_terminal() {
                return;
            }
        }
        match outcome {
            Ok(()) => {
                self.sandbox.start_running();
            }
            Err(reason) => {
                let retryable = self.sandbox.on_unrecoverable_error();
                if retryable {
                    warn!(%message_id, %reason, "sandbox start failed, retrying");
                    self.retry_dispatch(message_id);
                } else {
                    error!(%message_id, %reason, "sandbox unavailable, failing message");
                    self.finish_message(message_id, false, Some("sandbox_unavailable".into()));
                }
            }
        }
    }

    fn retry_dispatch(&mut self, message_id: Uuid) {
        let tx = self.cmd_tx.clone();
        let backoff = BASE_RETRY_BACKOFF;
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = tx
                .send(ActorCommand::DispatchFinished {
                    message_id,
                    outcome: Ok(()),
                })
                .await;
        });
    }

    /// Dispatcher loop body: guard on no message already
    /// processing, pick the oldest pending one, stage it for execution and
    /// hand the sandbox RPC to a background task so this actor keeps
    /// handling other commands while the call is in flight.
    fn try_dispatch(&mut self) {
        if queue::has_processing(&self.messages) {
            return;
        }
        let Some(next_id) = queue::next_pending(&self.messages).map(|m| m.id) else {
            return;
        };
        let message = {
            let m = self.messages.iter_mut().find(|m| m.id == next_id).unwrap();
            m.status = MessageStatus::Processing;
            m.started_at = Some(chrono::Utc::now());
            m.clone()
        };
        self.hub.broadcast(ServerFrame::ProcessingStatus {
            message_id: Some(message.id),
            status: MessageStatus::Processing,
        });
        self.sandbox.start_warming(message.id);
        self.hub.broadcast(ServerFrame::SandboxWarming);

        let client = self.sandbox_client.clone();
        let session_id = self.session.id;
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let result = tokio::time::timeout(Duration::from_secs(30), client.execute(session_id, &message))
                .await
                .map_err(|_| crate::sandbox::SandboxStartError("dispatch deadline exceeded".into()))
                .and_then(|r| r);
            let outcome = result.map_err(|e| e.0);
            let _ = tx
                .send(ActorCommand::DispatchFinished {
                    message_id: message.id,
                    outcome,
                })
                .await;
        });
    }

    fn reconcile(&mut self) {
        let has_pending_work = !self.messages.is_empty()
            && self.messages.iter().any(|m| !m.status.is_terminal());
        let outcome = self.sandbox.reconcile(
            chrono::Utc::now(),
            crate::sandbox::DEFAULT_HEARTBEAT_TIMEOUT,
            has_pending_work,
        );
        if let crate::sandbox::Reconciliation::ForcedStopped { should_restart } = outcome {
            self.hub.broadcast(ServerFrame::SandboxStatus {
                status: self.sandbox.record().status,
            });
            if should_restart {
                self.try_dispatch();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::sandbox::SandboxStartError;

    struct FakeClient;
    #[async_trait::async_trait]
    impl SandboxClient for FakeClient {
        async fn execute(&self, _: Uuid, _: &Message) -> Result<(), SandboxStartError> {
            Ok(())
        }
        async fn stop(&self, _: Uuid) -> Result<(), SandboxStartError> {
            Ok(())
        }
    }

    fn spawn_actor() -> ActorHandle {
        let session = Session {
            id: Uuid::new_v4(),
            repo_owner: "acme".into(),
            repo_name: "widgets".into(),
            status: SessionStatus::Created,
            current_sha: None,
            model: crate::domain::Model::default(),
            reasoning_effort: None,
            title: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        SessionActor::spawn(
            session,
            Arc::new(OrchestratorConfig::default_for_test()),
            Arc::new(FakeClient),
        )
    }

    #[tokio::test]
    async fn enqueue_then_list_messages_round_trips() {
        let handle = spawn_actor();
        let (id, status) = handle
            .enqueue_prompt(EnqueueInput {
                content: "hello".into(),
                author_id: AuthorRef::External("u-test".into()),
                source: MessageSource::Web,
                attachments: None,
                callback_context: None,
                reasoning_effort: None,
            })
            .await
            .unwrap();
        assert_eq!(status, MessageStatus::Pending);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let page = handle.list_messages(None, 10, None).await.unwrap();
        assert!(page.messages.iter().any(|m| m.id == id));
    }

    #[tokio::test]
    async fn archived_session_rejects_enqueue() {
        let handle = spawn_actor();
        handle.archive().await.unwrap();
        let result = handle
            .enqueue_prompt(EnqueueInput {
                content: "hi".into(),
                author_id: AuthorRef::External("u-test".into()),
                source: MessageSource::Web,
                attachments: None,
                callback_context: None,
                reasoning_effort: None,
            })
            .await;
        assert!(matches!(result, Err(OrchestratorError::SessionTerminal(_))));
    }

    #[tokio::test]
    async fn subscribe_rejects_unknown_token() {
        let handle = spawn_actor();
        let result = handle.subscribe("c1".into(), "bogus".into()).await;
        assert!(matches!(result, Err(OrchestratorError::Unauthorized)));
    }

    #[tokio::test]
    async fn issued_token_authenticates_subscribe() {
        let handle = spawn_actor();
        let (token, _participant_id) = handle
            .issue_ws_token(IssueTokenInput {
                user_id: "u1".into(),
                github_login: None,
                github_name: None,
            })
            .await
            .unwrap();
        let result = handle.subscribe("c1".into(), token).await;
        assert!(result.is_ok());
    }
}
