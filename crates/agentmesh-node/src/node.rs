//! The node: packet handling, outbound sends, and lifecycle

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use agentmesh_channels::{
    ChainClient, EvmChannelEngine, EvmEngineConfig, EvmEngineError, LedgerClient,
    LedgerNetworkMode, XrplChannelEngine, XrplEngineConfig, XrplEngineError,
};
use agentmesh_codec::{
    decode_envelope, encode_bytes, encode_envelope, encode_response_payload, ResponsePayload,
};
use agentmesh_dispatch::{
    AiDispatcher, AiDispatcherConfig, BudgetEvent, BudgetStatus, Dispatcher, DirectDispatcher,
    PromptBuilder, TokenBudget,
};
use agentmesh_dvm::{TaskTracker, TrackerConfig};
use agentmesh_eventdb::EventStore;
use agentmesh_llm::{DeterministicModel, LanguageModel, OpenAiCompatConfig, OpenAiCompatModel};
use agentmesh_router::{Route, Router, RouterError};
use agentmesh_skills::{AgentIdentity, DispatchContext, SkillRegistry};
use agentmesh_telemetry::{TelemetryEmitter, TelemetryEvent, TelemetryStore};
use agentmesh_transport::{InboundHandler, PeerTransport, TransportConfig, TransportError};
use agentmesh_types::{
    AgentKeypair, CryptoError, Event, Fulfill, Packet, PeerRecord, Prepare, Reject, WireCode,
    WireError,
};

use crate::config::NodeConfig;
use crate::skills::register_builtin_skills;

/// Node-level failures surfaced to the control plane.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("unknown peer: {peer_id}")]
    UnknownPeer { peer_id: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] agentmesh_eventdb::StoreError),

    #[error(transparent)]
    Telemetry(#[from] agentmesh_telemetry::TelemetryStoreError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] agentmesh_codec::CodecError),

    #[error(transparent)]
    Evm(#[from] EvmEngineError),

    #[error(transparent)]
    Xrpl(#[from] XrplEngineError),

    #[error("skill registration failed: {0}")]
    Skill(#[from] agentmesh_skills::SkillError),

    #[error("response channel dropped for peer {peer_id}")]
    ResponseLost { peer_id: String },
}

#[derive(Default)]
struct NodeCounters {
    packets_received: AtomicU64,
    packets_forwarded: AtomicU64,
    fulfills: AtomicU64,
    rejects: AtomicU64,
}

/// Point-in-time node totals for `/status`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub agent_id: String,
    pub address: String,
    pub pubkey: String,
    pub uptime_secs: i64,
    pub packets_received: u64,
    pub packets_forwarded: u64,
    pub fulfills: u64,
    pub rejects: u64,
    pub events_stored: u64,
    pub evm_channels: usize,
    pub xrpl_channels: usize,
    pub ai_enabled: bool,
    pub budget: BudgetStatus,
}

/// One mesh node. A single owning value; subsystems hang off `Arc`s.
pub struct Node {
    pub config: NodeConfig,
    pub identity: AgentIdentity,
    pub db: EventStore,
    pub telemetry: Arc<TelemetryEmitter>,
    pub telemetry_store: Option<Arc<TelemetryStore>>,
    pub router: Arc<Router>,
    pub registry: Arc<SkillRegistry>,
    pub budget: Arc<TokenBudget>,
    pub evm: Arc<EvmChannelEngine>,
    pub xrpl: Arc<XrplChannelEngine>,
    pub transport: Arc<PeerTransport>,
    pub tracker: Arc<TaskTracker>,
    dispatcher: Dispatcher,
    counters: NodeCounters,
    started_at: chrono::DateTime<Utc>,
}

impl Node {
    /// Build a node from config with the default model selection.
    pub async fn new(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        Self::with_model(config, None).await
    }

    /// Build a node, optionally overriding the language model (tests pass
    /// a scripted model here).
    pub async fn with_model(
        config: NodeConfig,
        model_override: Option<Arc<dyn LanguageModel>>,
    ) -> Result<Arc<Self>, NodeError> {
        let keypair = Arc::new(match &config.privkey {
            Some(secret) => AgentKeypair::from_secret_hex(secret)?,
            None => AgentKeypair::generate(),
        });
        let identity = AgentIdentity {
            agent_id: config.agent_id.clone(),
            address: config.address(),
            keypair: keypair.clone(),
        };
        info!(agent_id = %identity.agent_id, address = %identity.address, "building node");

        let db = match &config.database_path {
            Some(path) => EventStore::connect(path, config.max_events).await?,
            None => match config.max_events {
                Some(limit) => EventStore::in_memory_with_limit(limit).await?,
                None => EventStore::in_memory().await?,
            },
        };

        let telemetry_store = match &config.explorer_db_path {
            Some(path) => Some(Arc::new(TelemetryStore::connect(path).await?)),
            None => None,
        };
        let mut emitter = TelemetryEmitter::new(config.agent_id.clone());
        if let Some(store) = &telemetry_store {
            emitter = emitter.with_store(store.clone());
        }
        let telemetry = Arc::new(emitter);

        let router = Arc::new(Router::new(identity.address.clone()));

        let budget = Arc::new(TokenBudget::new(config.ai.max_tokens_per_hour));
        {
            let sink = telemetry.clone();
            budget.set_observer(Box::new(move |event: &BudgetEvent| {
                sink.emit(match event {
                    BudgetEvent::Usage {
                        prompt,
                        completion,
                        total,
                        used_in_window,
                        remaining,
                    } => TelemetryEvent::AiTokenUsage {
                        prompt: *prompt,
                        completion: *completion,
                        total: *total,
                        used_in_window: *used_in_window,
                        remaining: *remaining,
                    },
                    BudgetEvent::Warning {
                        threshold_pct,
                        used,
                        cap,
                    } => TelemetryEvent::AiBudgetWarning {
                        threshold_pct: *threshold_pct,
                        used: *used,
                        cap: *cap,
                    },
                    BudgetEvent::Exhausted { used, cap } => TelemetryEvent::AiBudgetExhausted {
                        used: *used,
                        cap: *cap,
                    },
                });
            }));
        }

        let (feedback_tx, mut feedback_rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
        let tracker = Arc::new(TaskTracker::new(
            TrackerConfig::default(),
            identity.pubkey(),
            Box::new(move |event| {
                let _ = feedback_tx.send(event);
            }),
        ));

        let mut registry = SkillRegistry::new();
        register_builtin_skills(
            &mut registry,
            router.clone(),
            tracker.clone(),
            config.dvm_required_payment,
        )?;
        let registry = Arc::new(registry);

        let dispatcher = if config.ai.enabled || model_override.is_some() {
            let model: Arc<dyn LanguageModel> = match model_override {
                Some(model) => model,
                None => match &config.ai.api_key {
                    Some(api_key) => Arc::new(OpenAiCompatModel::new(OpenAiCompatConfig {
                        base_url: config.ai.api_base_url.clone(),
                        api_key: Some(api_key.clone()),
                        model: config
                            .ai
                            .model
                            .clone()
                            .unwrap_or_else(|| "gpt-4o-mini".to_string()),
                    })),
                    None => Arc::new(DeterministicModel),
                },
            };
            let prompts = PromptBuilder::new(
                identity.agent_id.clone(),
                identity.address.clone(),
                identity.pubkey(),
            );
            Dispatcher::Ai(AiDispatcher::new(
                registry.clone(),
                prompts,
                budget.clone(),
                model,
                AiDispatcherConfig {
                    enabled: config.ai.enabled,
                    fallback_on_exhaustion: config.ai.fallback_on_exhaustion,
                    max_tokens_per_request: Some(config.ai.max_tokens_per_request),
                    model: config.ai.model.clone(),
                    ..Default::default()
                },
            ))
        } else {
            Dispatcher::Direct(DirectDispatcher::new(registry.clone()))
        };

        let evm = Arc::new(EvmChannelEngine::new(
            EvmEngineConfig::new(
                config.evm.token_network_address.clone().unwrap_or_default(),
                config.evm.token_address.clone().unwrap_or_default(),
            ),
            keypair.clone(),
            telemetry.clone(),
        ));
        let xrpl = Arc::new(XrplChannelEngine::new(
            XrplEngineConfig {
                network_mode: if config.xrpl.is_standalone() {
                    LedgerNetworkMode::Standalone
                } else {
                    LedgerNetworkMode::Live
                },
                ..Default::default()
            },
            keypair.clone(),
            telemetry.clone(),
        ));

        let transport = Arc::new(PeerTransport::new(TransportConfig::default()));

        let node = Arc::new(Self {
            config,
            identity,
            db,
            telemetry,
            telemetry_store,
            router,
            registry,
            budget,
            evm,
            xrpl,
            transport,
            tracker,
            dispatcher,
            counters: NodeCounters::default(),
            started_at: Utc::now(),
        });

        node.transport
            .set_handler(node.clone() as Arc<dyn InboundHandler>)
            .await;
        node.transport.spawn_sweeper();

        // task feedback events route back to their requester
        let feedback_node = node.clone();
        tokio::spawn(async move {
            while let Some(event) = feedback_rx.recv().await {
                feedback_node.route_feedback(event).await;
            }
        });

        Ok(node)
    }

    /// Start accepting inbound peer links on the configured BTP port.
    pub async fn start_listener(&self) -> Result<std::net::SocketAddr, NodeError> {
        Ok(self
            .transport
            .listen(&format!("0.0.0.0:{}", self.config.btp_port))
            .await?)
    }

    /// The node's advertised execution condition, base64.
    pub fn execution_condition(&self) -> String {
        encode_bytes(&self.identity.keypair.condition())
    }

    /// Process one inbound packet and produce the response frame.
    pub async fn process_incoming_packet(&self, packet: Packet, peer_id: &str) -> Packet {
        match packet {
            Packet::Prepare(prepare) => self.process_prepare(prepare, peer_id).await,
            other => {
                debug!(peer_id, packet_type = other.type_label(), "non-prepare frame at handler");
                Packet::reject(WireError::new(WireCode::F99, "expected a prepare"))
            }
        }
    }

    async fn process_prepare(&self, prepare: Prepare, peer_id: &str) -> Packet {
        self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
        let amount = prepare.amount;

        if prepare.is_expired_at(Utc::now()) {
            return self.finish_reject(peer_id, String::new(), amount, WireError::from_code(WireCode::R02));
        }

        let event = match decode_envelope(&prepare.data) {
            Ok(event) => event,
            Err(error) => {
                return self.finish_reject(
                    peer_id,
                    String::new(),
                    amount,
                    WireError::new(WireCode::F01, format!("malformed envelope: {error}")),
                );
            }
        };
        let event_id = event.id.clone();

        // required-payment gate before any dispatch
        if let Some(skill) = self
            .registry
            .skills_for_kind(event.kind)
            .into_iter()
            .find(|skill| skill.kinds.is_some())
        {
            if amount < skill.required_payment {
                return self.finish_reject(
                    peer_id,
                    event_id,
                    amount,
                    WireError::new(
                        WireCode::T04,
                        format!("skill {} requires payment of {}", skill.name, skill.required_payment),
                    ),
                );
            }
        }

        let ctx = DispatchContext {
            event,
            peer_id: peer_id.to_string(),
            amount,
            destination: prepare.destination.clone(),
            expires_at: prepare.expires_at,
            db: self.db.clone(),
            identity: self.identity.clone(),
        };
        let result = self.dispatcher.handle_event(&ctx).await;

        let payload = ResponsePayload {
            event_id: event_id.clone(),
            events: result.response_events.clone(),
        };
        let data = encode_response_payload(&payload).ok();

        if result.success {
            self.counters.fulfills.fetch_add(1, Ordering::Relaxed);
            self.telemetry.emit(TelemetryEvent::PacketReceived {
                peer_id: peer_id.to_string(),
                packet_id: event_id,
                packet_type: "fulfill".into(),
                amount,
                error_code: None,
            });
            Packet::Fulfill(Fulfill {
                fulfillment: encode_bytes(&self.identity.keypair.fulfillment()),
                data,
            })
        } else {
            let error = result
                .error
                .unwrap_or_else(|| WireError::from_code(WireCode::F99));
            let reject = Reject {
                code: error.code.as_str().to_string(),
                message: error.message.clone(),
                data,
            };
            self.counters.rejects.fetch_add(1, Ordering::Relaxed);
            self.telemetry.emit(TelemetryEvent::PacketReceived {
                peer_id: peer_id.to_string(),
                packet_id: event_id,
                packet_type: "reject".into(),
                amount,
                error_code: Some(error.code.as_str().to_string()),
            });
            Packet::Reject(reject)
        }
    }

    fn finish_reject(
        &self,
        peer_id: &str,
        event_id: String,
        amount: u64,
        error: WireError,
    ) -> Packet {
        self.counters.rejects.fetch_add(1, Ordering::Relaxed);
        self.telemetry.emit(TelemetryEvent::PacketReceived {
            peer_id: peer_id.to_string(),
            packet_id: event_id,
            packet_type: "reject".into(),
            amount,
            error_code: Some(error.code.as_str().to_string()),
        });
        Packet::reject(error)
    }

    /// Send one event to one peer inside a prepare, mutate at most one
    /// channel ledger (EVM first, ledger second), and await the response.
    pub async fn send_event(
        &self,
        peer_id: &str,
        event: &Event,
        amount: u64,
    ) -> Result<Packet, NodeError> {
        let peer = self
            .router
            .peer(peer_id)
            .await
            .ok_or_else(|| NodeError::UnknownPeer {
                peer_id: peer_id.to_string(),
            })?;

        // off-chain ledger mutation for the outgoing prepare
        let mut mutated = false;
        if let Some(evm_account) = &peer.evm_address {
            if amount > 0 && self.evm.record_payment(evm_account, amount).await?.is_some() {
                mutated = true;
            }
        }
        if !mutated {
            if let Some(xrp_account) = &peer.xrp_address {
                if amount > 0 {
                    let _ = self.xrpl.record_payment(xrp_account, amount).await?;
                }
            }
        }

        let prepare = Prepare {
            amount,
            destination: peer.address.clone(),
            // condition distribution is out of band; unknown peers get the
            // zero condition and fulfill with their fixed preimage
            execution_condition: encode_bytes(&[0u8; 32]),
            expires_at: Utc::now() + chrono::Duration::seconds(self.config.prepare_ttl_secs),
            data: encode_envelope(event)?,
        };

        self.counters.packets_forwarded.fetch_add(1, Ordering::Relaxed);
        self.telemetry.emit(TelemetryEvent::PacketForwarded {
            peer_id: peer_id.to_string(),
            packet_id: event.id.clone(),
            destination: prepare.destination.clone(),
            amount,
        });

        let receiver = self
            .transport
            .send_prepare(peer_id, &event.id, prepare)
            .await?;
        receiver.await.map_err(|_| NodeError::ResponseLost {
            peer_id: peer_id.to_string(),
        })
    }

    /// Send one event to every follow with a route.
    pub async fn broadcast(&self, event: &Event, amount: u64) -> Vec<(String, Result<Packet, NodeError>)> {
        let mut results = Vec::new();
        for follow in self.router.follows().await {
            let outcome = match self.router.resolve(&follow.ilp_address).await {
                Ok(Route::Peer(peer)) => self.send_event(&peer.peer_id, event, amount).await,
                Ok(Route::Local) => continue,
                Err(error) => Err(error.into()),
            };
            results.push((follow.pubkey.clone(), outcome));
        }
        results
    }

    /// Dial a peer and register it in the directory.
    pub async fn connect_peer(
        &self,
        peer_id: &str,
        url: &str,
        address: Option<String>,
        evm_address: Option<String>,
        xrp_address: Option<String>,
    ) -> Result<(), NodeError> {
        self.transport.connect(peer_id, url).await?;
        let mut record = PeerRecord::new(peer_id, address.unwrap_or_else(|| format!("g.agent.{peer_id}")));
        record.url = Some(url.to_string());
        record.evm_address = evm_address;
        record.xrp_address = xrp_address;
        record.connected = true;
        self.router.upsert_peer(record).await;
        Ok(())
    }

    /// Late-bind the EVM chain client.
    pub async fn configure_evm(&self, client: Arc<dyn ChainClient>) {
        self.evm.configure(client).await;
    }

    /// Late-bind the XRPL ledger client.
    pub async fn configure_xrp(&self, client: Arc<dyn LedgerClient>) {
        self.xrpl.configure(client).await;
    }

    async fn route_feedback(&self, event: Event) {
        let Some(requester) = event.first_tag_value("p").map(str::to_string) else {
            return;
        };
        let Some(follow) = self.router.follow(&requester).await else {
            debug!(requester, "no follow entry for feedback recipient");
            return;
        };
        match self.router.resolve(&follow.ilp_address).await {
            Ok(Route::Peer(peer)) => {
                if let Err(error) = self.send_event(&peer.peer_id, &event, 0).await {
                    warn!(%error, "feedback delivery failed");
                }
            }
            _ => debug!(requester, "no route for feedback recipient"),
        }
    }

    /// Node totals for the control surface.
    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            agent_id: self.identity.agent_id.clone(),
            address: self.identity.address.clone(),
            pubkey: self.identity.pubkey(),
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            packets_forwarded: self.counters.packets_forwarded.load(Ordering::Relaxed),
            fulfills: self.counters.fulfills.load(Ordering::Relaxed),
            rejects: self.counters.rejects.load(Ordering::Relaxed),
            events_stored: self.db.count().await.unwrap_or(0),
            evm_channels: self.evm.channels().await.len(),
            xrpl_channels: self.xrpl.channels().await.len(),
            ai_enabled: self.config.ai.enabled,
            budget: self.budget.status(),
        }
    }

    /// Graceful shutdown: close peer links and release clients.
    pub async fn shutdown(&self) {
        info!("shutting down node");
        self.transport.shutdown().await;
        // telemetry store writes are fire-and-forget; the emitter buffer
        // stays readable until drop
    }
}

#[async_trait]
impl InboundHandler for Node {
    async fn on_prepare(&self, peer_id: &str, prepare: Prepare) -> Packet {
        self.process_incoming_packet(Packet::Prepare(prepare), peer_id)
            .await
    }
}
