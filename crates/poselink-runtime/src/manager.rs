//! The manager process: owns the world graph, arbitrates providers, and
//! fans filtered frame state out to every managed peer.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;

use poselink_core::topics;
use poselink_core::types::{PeerRole, SessionConfig};
use poselink_reality::{
    ForwardTarget, ProviderDescriptor, ProviderHandler, RealityError, RealitySelector,
    SelectorConfig, SelectorEvent, SelectorState,
};
use poselink_session::{ConnectionState, MessageChannel, SessionError, SessionPort};
use poselink_sync::{ApplyResult, ContextEvent, ContextSynchronizer, FrameState, SyncConfig};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Reality(#[from] RealityError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

type FrameSink = Rc<RefCell<VecDeque<FrameState>>>;
type DesireSink = Rc<RefCell<Vec<(String, Option<ProviderDescriptor>)>>>;
/// Unhandled (topic, payload) traffic collected off the provider session.
type ProviderSideSink = Rc<RefCell<Vec<(String, Value)>>>;
/// Unhandled (peer id, topic, payload) traffic collected off peer sessions.
type PeerSideSink = Rc<RefCell<Vec<(String, String, Value)>>>;

fn entity_id(payload: &Value) -> Result<String, String> {
    payload
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| "missing entity id".to_owned())
}

struct PeerLink {
    port: SessionPort,
    subscriptions: Rc<RefCell<HashSet<String>>>,
}

/// One manager endpoint: zero-or-more managed augmenter sessions, the
/// provider selector, and the authoritative synchronizer.
///
/// Single-threaded; everything advances from [`ManagerRuntime::tick`].
pub struct ManagerRuntime {
    synchronizer: ContextSynchronizer,
    selector: RealitySelector,
    peers: HashMap<String, PeerLink>,
    /// Attach order, for deterministic pumping and fan-out.
    peer_order: Vec<String>,
    frames: FrameSink,
    desires: DesireSink,
    provider_side: ProviderSideSink,
    peer_side: PeerSideSink,
    /// Provider side-channel messages addressed to the manager itself.
    provider_inbox: VecDeque<(String, Value)>,
    next_peer: u64,
}

impl ManagerRuntime {
    pub fn new(sync_config: SyncConfig, selector_config: SelectorConfig) -> Self {
        let frames: FrameSink = Rc::default();
        let provider_side: ProviderSideSink = Rc::default();
        let mut selector = RealitySelector::new(selector_config);

        // Every provider session feeds the same frame sink; the tick loop
        // drains it into the synchronizer. Everything outside the frame
        // topic is collected for opaque side-channel routing.
        let frame_sink = Rc::clone(&frames);
        let side_sink = Rc::clone(&provider_side);
        selector.on_provider_session(move |port| {
            let sink = Rc::clone(&frame_sink);
            port.on_notify(topics::REALITY_FRAME_STATE, move |payload| {
                match serde_json::from_value::<FrameState>(payload.clone()) {
                    Ok(state) => sink.borrow_mut().push_back(state),
                    Err(e) => tracing::warn!(error = %e, "undecodable frame state"),
                }
            });
            let sink = Rc::clone(&side_sink);
            port.on_unhandled(move |topic, payload| {
                sink.borrow_mut().push((topic.to_owned(), payload.clone()));
            });
        });

        Self {
            synchronizer: ContextSynchronizer::new(sync_config),
            selector,
            peers: HashMap::new(),
            peer_order: Vec::new(),
            frames,
            desires: Rc::default(),
            provider_side,
            peer_side: Rc::default(),
            provider_inbox: VecDeque::new(),
            next_peer: 1,
        }
    }

    /// Kick off provider selection (connects the configured default when
    /// nothing else is desired yet).
    pub fn start(&mut self) -> Result<(), ManagerError> {
        self.selector.reselect().map_err(Into::into)
    }

    pub fn register_provider(&mut self, kind: impl Into<String>, handler: Box<dyn ProviderHandler>) {
        self.selector.register(kind, handler);
    }

    pub fn synchronizer(&self) -> &ContextSynchronizer {
        &self.synchronizer
    }

    pub fn synchronizer_mut(&mut self) -> &mut ContextSynchronizer {
        &mut self.synchronizer
    }

    pub fn selector_state(&self) -> SelectorState {
        self.selector.state()
    }

    pub fn forward_target(&self) -> ForwardTarget {
        self.selector.forward_target()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn set_desired_provider(
        &mut self,
        desired: Option<ProviderDescriptor>,
    ) -> Result<(), ManagerError> {
        self.selector.set_manager_desired(desired).map_err(Into::into)
    }

    pub fn set_focus(&mut self, peer: Option<&str>) -> Result<(), ManagerError> {
        self.selector.set_focus(peer).map_err(Into::into)
    }

    /// Accept a peer on `channel`: open the manager side of the session and
    /// install the context/reality handlers. Returns the assigned peer id.
    pub fn attach_peer(&mut self, channel: Box<dyn MessageChannel>) -> Result<String, ManagerError> {
        let id = format!("peer-{}", self.next_peer);
        self.next_peer += 1;

        let subscriptions: Rc<RefCell<HashSet<String>>> = Rc::default();
        let mut port = SessionPort::new();

        let subs = Rc::clone(&subscriptions);
        port.on_request(topics::CONTEXT_SUBSCRIBE, move |payload| {
            let entity = entity_id(payload)?;
            subs.borrow_mut().insert(entity);
            Ok(Value::Null)
        });
        let subs = Rc::clone(&subscriptions);
        port.on_request(topics::CONTEXT_UNSUBSCRIBE, move |payload| {
            let entity = entity_id(payload)?;
            subs.borrow_mut().remove(&entity);
            Ok(Value::Null)
        });

        let desires = Rc::clone(&self.desires);
        let peer_id = id.clone();
        port.on_request(topics::REALITY_DESIRED, move |payload| {
            let desired = if payload.is_null() {
                None
            } else {
                let descriptor = serde_json::from_value::<ProviderDescriptor>(payload.clone())
                    .map_err(|e| format!("malformed provider descriptor: {e}"))?;
                Some(descriptor)
            };
            desires.borrow_mut().push((peer_id.clone(), desired));
            Ok(Value::Null)
        });

        let side = Rc::clone(&self.peer_side);
        let peer_id = id.clone();
        port.on_unhandled(move |topic, payload| {
            side.borrow_mut()
                .push((peer_id.clone(), topic.to_owned(), payload.clone()));
        });

        port.open(channel, SessionConfig::new(PeerRole::Manager))?;
        self.selector.add_peer(&id);
        self.peers.insert(
            id.clone(),
            PeerLink {
                port,
                subscriptions,
            },
        );
        self.peer_order.push(id.clone());
        tracing::info!(peer = %id, "peer attached");
        Ok(id)
    }

    /// One tick: drive the provider sessions, pump every peer, apply any
    /// declared provider desires, feed the newest frame state into the
    /// synchronizer, and fan the result out.
    pub fn tick(&mut self) -> Result<Option<ApplyResult>, ManagerError> {
        self.selector.pump()?;

        let mut departed = Vec::new();
        for id in &self.peer_order {
            if let Some(link) = self.peers.get_mut(id) {
                link.port.pump();
                if link.port.state() == ConnectionState::Closed {
                    departed.push(id.clone());
                }
            }
        }
        for id in departed {
            tracing::info!(peer = %id, "peer session closed");
            self.peers.remove(&id);
            self.peer_order.retain(|p| p != &id);
            self.selector.remove_peer(&id)?;
        }

        let declared: Vec<(String, Option<ProviderDescriptor>)> =
            self.desires.borrow_mut().drain(..).collect();
        for (peer, desired) in declared {
            if let Err(e) = self.selector.set_peer_desired(&peer, desired) {
                tracing::warn!(peer = %peer, error = %e, "desired provider rejected");
            }
        }

        self.route_side_channel();

        let inbound: Vec<FrameState> = self.frames.borrow_mut().drain(..).collect();
        for state in inbound {
            if let Err(e) = self.synchronizer.submit_frame_state(state) {
                tracing::warn!(error = %e, "rejected frame state");
            }
        }

        let applied = self.synchronizer.tick();
        if applied.is_some() {
            self.fan_out();
        }
        Ok(applied)
    }

    /// Provider side-channel messages that belong to the manager itself
    /// (nobody declared the current provider desired).
    pub fn drain_provider_messages(&mut self) -> Vec<(String, Value)> {
        self.provider_inbox.drain(..).collect()
    }

    /// Orderly teardown: close every managed peer session and the provider
    /// sessions, so peers see a `session.close` instead of a dropped
    /// channel.
    pub fn shutdown(&mut self) {
        for id in &self.peer_order {
            if let Some(link) = self.peers.get_mut(id) {
                link.port.close();
            }
        }
        self.peers.clear();
        self.peer_order.clear();
        self.selector.shutdown();
        tracing::info!("manager shut down");
    }

    pub fn drain_context_events(&mut self) -> Vec<ContextEvent> {
        self.synchronizer.drain_events()
    }

    pub fn drain_selector_events(&mut self) -> Vec<SelectorEvent> {
        self.selector.drain_events()
    }

    /// Opaque side-channel forwarding between the current provider and the
    /// peer that declared it. Traffic for an undeclared provider lands in
    /// the manager's own inbox; payloads are never inspected.
    fn route_side_channel(&mut self) {
        let from_provider: Vec<(String, Value)> =
            self.provider_side.borrow_mut().drain(..).collect();
        for (topic, payload) in from_provider {
            match self.selector.forward_target() {
                ForwardTarget::Peer(id) => {
                    if let Some(link) = self.peers.get_mut(&id) {
                        link.port.send(&topic, payload);
                    } else {
                        tracing::debug!(peer = %id, %topic, "declaring peer gone, dropping provider message");
                    }
                }
                ForwardTarget::Manager => self.provider_inbox.push_back((topic, payload)),
            }
        }

        let from_peers: Vec<(String, String, Value)> =
            self.peer_side.borrow_mut().drain(..).collect();
        for (peer, topic, payload) in from_peers {
            if self.selector.forward_target() == ForwardTarget::Peer(peer.clone()) {
                if let Some(port) = self.selector.current_port_mut() {
                    port.send(&topic, payload);
                    continue;
                }
            }
            tracing::debug!(peer = %peer, %topic, "no provider side channel for peer message");
        }
    }

    /// Per-subscriber re-serialization: the shared primary set plus each
    /// peer's own subscriptions, never an aliased entities map.
    fn fan_out(&mut self) {
        for id in &self.peer_order {
            let Some(link) = self.peers.get_mut(id) else {
                continue;
            };
            if !link.port.is_connected() {
                continue;
            }
            let subscribed: Vec<String> = link.subscriptions.borrow().iter().cloned().collect();
            let state = self.synchronizer.serialize_for_subscriber(&subscribed);
            match serde_json::to_value(&state) {
                Ok(payload) => {
                    link.port.send(topics::CONTEXT_UPDATE, payload);
                }
                Err(e) => tracing::warn!(peer = %id, error = %e, "frame state serialization failed"),
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
