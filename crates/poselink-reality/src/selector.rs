//! The selection state machine: which provider is current, which one is on
//! its way in, and who gets the provider's side-channel traffic.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use poselink_core::types::{PeerRole, SessionConfig};
use poselink_session::{ConnectionState, SessionPort, loopback_pair};

use crate::error::RealityError;
use crate::provider::{ProviderDescriptor, ProviderHandler};

// ─── State & Events ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorState {
    NoProvider,
    Connecting,
    Active,
}

impl SelectorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoProvider => "no_provider",
            Self::Connecting => "connecting",
            Self::Active => "active",
        }
    }
}

impl std::fmt::Display for SelectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectorEvent {
    /// A new provider finished its handshake and became current. Raised
    /// exactly once per swap.
    ProviderChanged { descriptor: ProviderDescriptor },
    /// The current provider's session closed from the far side.
    ProviderLost,
}

/// Where non-frame provider traffic is routed: to the peer that declared
/// the provider desired, or to the manager itself when nobody did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardTarget {
    Manager,
    Peer(String),
}

// ─── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Fallback when no peer (and not the manager) wants anything.
    pub default_provider: Option<ProviderDescriptor>,
    /// Local configuration announced on every provider session.
    pub session_config: SessionConfig,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            session_config: SessionConfig::new(PeerRole::Manager),
        }
    }
}

// ─── Selector ─────────────────────────────────────────────────────

struct ProviderSession {
    descriptor: ProviderDescriptor,
    /// Peer whose desire put this provider in place; `None` for the
    /// manager's own choice or the configured default.
    owner: Option<String>,
    port: SessionPort,
}

struct PeerEntry {
    id: String,
    desired: Option<ProviderDescriptor>,
}

type SessionHook = Box<dyn FnMut(&mut SessionPort)>;

/// Owns the manager's side of every provider session. Providers swap
/// connect-before-close: the outgoing session stays current until the
/// incoming one's handshake completes, so no tick sees zero (or two)
/// current providers.
pub struct RealitySelector {
    config: SelectorConfig,
    handlers: HashMap<String, Box<dyn ProviderHandler>>,
    peers: Vec<PeerEntry>,
    focused: Option<String>,
    manager_desired: Option<ProviderDescriptor>,
    current: Option<ProviderSession>,
    incoming: Option<ProviderSession>,
    session_hook: Option<SessionHook>,
    events: VecDeque<SelectorEvent>,
}

impl RealitySelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self {
            config,
            handlers: HashMap::new(),
            peers: Vec::new(),
            focused: None,
            manager_desired: None,
            current: None,
            incoming: None,
            session_hook: None,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SelectorState {
        if self.current.is_some() {
            SelectorState::Active
        } else if self.incoming.is_some() {
            SelectorState::Connecting
        } else {
            SelectorState::NoProvider
        }
    }

    pub fn current_descriptor(&self) -> Option<&ProviderDescriptor> {
        self.current.as_ref().map(|s| &s.descriptor)
    }

    /// The manager-side port of the current provider session.
    pub fn current_port_mut(&mut self) -> Option<&mut SessionPort> {
        self.current.as_mut().map(|s| &mut s.port)
    }

    /// Routing verdict for provider traffic outside the frame-state topic.
    pub fn forward_target(&self) -> ForwardTarget {
        match self.current.as_ref().and_then(|s| s.owner.clone()) {
            Some(peer) => ForwardTarget::Peer(peer),
            None => ForwardTarget::Manager,
        }
    }

    pub fn drain_events(&mut self) -> Vec<SelectorEvent> {
        self.events.drain(..).collect()
    }

    // ── registration & desires ───────────────────────────────────

    /// Register (or replace) the handler for a provider type.
    pub fn register(&mut self, kind: impl Into<String>, handler: Box<dyn ProviderHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Hook run on every freshly opened provider session, before any
    /// inbound traffic is pumped. The place to install frame-state handlers.
    pub fn on_provider_session(&mut self, hook: impl FnMut(&mut SessionPort) + 'static) {
        self.session_hook = Some(Box::new(hook));
    }

    /// Track a managed peer. Selection priority (c) follows this
    /// registration order.
    pub fn add_peer(&mut self, id: impl Into<String>) {
        let id = id.into();
        if self.peers.iter().any(|p| p.id == id) {
            return;
        }
        self.peers.push(PeerEntry { id, desired: None });
    }

    /// Forget a departed peer and re-run selection.
    pub fn remove_peer(&mut self, id: &str) -> Result<(), RealityError> {
        self.peers.retain(|p| p.id != id);
        if self.focused.as_deref() == Some(id) {
            self.focused = None;
        }
        self.reselect()
    }

    pub fn set_manager_desired(
        &mut self,
        desired: Option<ProviderDescriptor>,
    ) -> Result<(), RealityError> {
        self.manager_desired = desired;
        self.reselect()
    }

    pub fn set_peer_desired(
        &mut self,
        peer: &str,
        desired: Option<ProviderDescriptor>,
    ) -> Result<(), RealityError> {
        let entry = self
            .peers
            .iter_mut()
            .find(|p| p.id == peer)
            .ok_or_else(|| RealityError::UnknownPeer(peer.to_owned()))?;
        entry.desired = desired;
        self.reselect()
    }

    pub fn set_focus(&mut self, peer: Option<&str>) -> Result<(), RealityError> {
        match peer {
            Some(id) => {
                if !self.peers.iter().any(|p| p.id == id) {
                    return Err(RealityError::UnknownPeer(id.to_owned()));
                }
                self.focused = Some(id.to_owned());
            }
            None => self.focused = None,
        }
        self.reselect()
    }

    // ── selection ────────────────────────────────────────────────

    /// Fixed-priority policy: the manager's own desired provider, else the
    /// focused peer's, else the first registered-type desire in peer
    /// registration order, else the configured default.
    fn choose(&self) -> Option<(ProviderDescriptor, Option<String>)> {
        if let Some(d) = &self.manager_desired {
            return Some((d.clone(), None));
        }
        if let Some(focused) = &self.focused {
            if let Some(entry) = self.peers.iter().find(|p| &p.id == focused) {
                if let Some(d) = &entry.desired {
                    return Some((d.clone(), Some(entry.id.clone())));
                }
            }
        }
        for entry in &self.peers {
            if let Some(d) = &entry.desired {
                if self.handlers.contains_key(&d.kind) {
                    return Some((d.clone(), Some(entry.id.clone())));
                }
            }
        }
        self.config.default_provider.clone().map(|d| (d, None))
    }

    /// Re-run selection against the current desires. Starts a connection
    /// when the winner differs from the current (and incoming) provider;
    /// tears everything down when selection yields nothing.
    pub fn reselect(&mut self) -> Result<(), RealityError> {
        let Some((descriptor, owner)) = self.choose() else {
            if let Some(mut stale) = self.incoming.take() {
                stale.port.close();
            }
            if let Some(mut old) = self.current.take() {
                tracing::debug!("selection yielded nothing, closing current provider");
                old.port.close();
            }
            return Ok(());
        };

        if self
            .current
            .as_ref()
            .is_some_and(|s| s.descriptor == descriptor)
        {
            // Already active; cancel any half-connected replacement.
            if let Some(mut stale) = self.incoming.take() {
                stale.port.close();
            }
            return Ok(());
        }
        if self
            .incoming
            .as_ref()
            .is_some_and(|s| s.descriptor == descriptor)
        {
            return Ok(());
        }

        self.begin_connect(descriptor, owner)
    }

    fn begin_connect(
        &mut self,
        descriptor: ProviderDescriptor,
        owner: Option<String>,
    ) -> Result<(), RealityError> {
        let handler = self
            .handlers
            .get_mut(&descriptor.kind)
            .ok_or_else(|| RealityError::UnsupportedProviderType(descriptor.kind.clone()))?;

        let (near, far) = loopback_pair();
        handler.connect(&descriptor, Box::new(far))?;

        let mut port = SessionPort::new();
        port.open(Box::new(near), self.config.session_config.clone())?;
        if let Some(hook) = self.session_hook.as_mut() {
            hook(&mut port);
        }

        tracing::debug!(kind = %descriptor.kind, "connecting provider");
        if let Some(mut stale) = self.incoming.replace(ProviderSession {
            descriptor,
            owner,
            port,
        }) {
            stale.port.close();
        }
        Ok(())
    }

    // ── pumping ──────────────────────────────────────────────────

    /// Drive both provider sessions: complete a pending swap once the
    /// incoming handshake finishes, and re-enter selection when the current
    /// provider drops.
    pub fn pump(&mut self) -> Result<(), RealityError> {
        let incoming_state = self.incoming.as_mut().map(|incoming| {
            incoming.port.pump();
            incoming.port.state()
        });
        match incoming_state {
            Some(ConnectionState::Connected) => self.complete_swap(),
            Some(ConnectionState::Closed) => {
                tracing::warn!("incoming provider session closed before handshake");
                self.incoming = None;
                self.reselect()?;
            }
            Some(ConnectionState::Opening) | None => {}
        }

        let current_state = self.current.as_mut().map(|current| {
            current.port.pump();
            current.port.state()
        });
        if current_state == Some(ConnectionState::Closed) {
            tracing::warn!("current provider session closed, re-entering selection");
            self.current = None;
            self.events.push_back(SelectorEvent::ProviderLost);
            self.reselect()?;
        }
        Ok(())
    }

    /// Orderly teardown: close every provider session this selector owns,
    /// notifying the far side.
    pub fn shutdown(&mut self) {
        if let Some(mut stale) = self.incoming.take() {
            stale.port.close();
        }
        if let Some(mut current) = self.current.take() {
            current.port.close();
        }
    }

    /// Connect-before-close: the old session closes only now, after the new
    /// one is connected.
    fn complete_swap(&mut self) {
        let Some(fresh) = self.incoming.take() else {
            return;
        };
        let descriptor = fresh.descriptor.clone();
        if let Some(mut old) = self.current.replace(fresh) {
            old.port.close();
        }
        tracing::info!(kind = %descriptor.kind, "provider changed");
        self.events
            .push_back(SelectorEvent::ProviderChanged { descriptor });
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use poselink_session::MessageChannel;

    use super::*;

    /// Opens a viewer-role session on every endpoint it is handed and keeps
    /// the port so the test can drive the provider side.
    struct RecordingHandler {
        ports: Rc<RefCell<Vec<SessionPort>>>,
        connects: Rc<RefCell<Vec<ProviderDescriptor>>>,
    }

    impl ProviderHandler for RecordingHandler {
        fn connect(
            &mut self,
            descriptor: &ProviderDescriptor,
            endpoint: Box<dyn MessageChannel>,
        ) -> Result<(), RealityError> {
            let mut port = SessionPort::new();
            port.open(endpoint, SessionConfig::new(PeerRole::Viewer))?;
            self.ports.borrow_mut().push(port);
            self.connects.borrow_mut().push(descriptor.clone());
            Ok(())
        }
    }

    struct Fixture {
        selector: RealitySelector,
        ports: Rc<RefCell<Vec<SessionPort>>>,
        connects: Rc<RefCell<Vec<ProviderDescriptor>>>,
    }

    impl Fixture {
        fn new(default_provider: Option<ProviderDescriptor>, kinds: &[&str]) -> Self {
            let ports = Rc::new(RefCell::new(Vec::new()));
            let connects = Rc::new(RefCell::new(Vec::new()));
            let mut selector = RealitySelector::new(SelectorConfig {
                default_provider,
                ..SelectorConfig::default()
            });
            for kind in kinds {
                selector.register(
                    *kind,
                    Box::new(RecordingHandler {
                        ports: Rc::clone(&ports),
                        connects: Rc::clone(&connects),
                    }),
                );
            }
            Self {
                selector,
                ports,
                connects,
            }
        }

        /// Pump both sides until nothing is mid-handshake.
        fn settle(&mut self) {
            for _ in 0..4 {
                for port in self.ports.borrow_mut().iter_mut() {
                    port.pump();
                }
                self.selector.pump().expect("selector pump");
            }
        }

        fn provider_changes(&mut self) -> usize {
            self.selector
                .drain_events()
                .into_iter()
                .filter(|e| matches!(e, SelectorEvent::ProviderChanged { .. }))
                .count()
        }
    }

    #[test]
    fn starts_with_no_provider() {
        let fixture = Fixture::new(None, &["sim"]);
        assert_eq!(fixture.selector.state(), SelectorState::NoProvider);
        assert_eq!(fixture.selector.forward_target(), ForwardTarget::Manager);
    }

    #[test]
    fn default_provider_activates() {
        let mut fixture = Fixture::new(Some(ProviderDescriptor::new("sim")), &["sim"]);
        fixture.selector.reselect().expect("reselect");
        assert_eq!(fixture.selector.state(), SelectorState::Connecting);

        fixture.settle();
        assert_eq!(fixture.selector.state(), SelectorState::Active);
        assert_eq!(fixture.provider_changes(), 1);
    }

    #[test]
    fn unsupported_type_is_hard_error() {
        let mut fixture = Fixture::new(None, &["sim"]);
        let result = fixture
            .selector
            .set_manager_desired(Some(ProviderDescriptor::new("hologram")));
        assert!(matches!(
            result,
            Err(RealityError::UnsupportedProviderType(kind)) if kind == "hologram"
        ));
    }

    #[test]
    fn manager_desire_beats_focused_peer() {
        let mut fixture = Fixture::new(None, &["a", "b", "c"]);
        fixture.selector.add_peer("p1");
        fixture
            .selector
            .set_peer_desired("p1", Some(ProviderDescriptor::new("a")))
            .expect("peer desire");
        fixture.selector.set_focus(Some("p1")).expect("focus");
        fixture
            .selector
            .set_manager_desired(Some(ProviderDescriptor::new("c")))
            .expect("manager desire");
        fixture.settle();

        assert_eq!(fixture.connects.borrow().last().expect("connect").kind, "c");
        assert_eq!(fixture.selector.forward_target(), ForwardTarget::Manager);
    }

    #[test]
    fn focused_peer_beats_registration_order() {
        let mut fixture = Fixture::new(None, &["a", "b"]);
        fixture.selector.add_peer("p1");
        fixture.selector.add_peer("p2");
        fixture
            .selector
            .set_peer_desired("p1", Some(ProviderDescriptor::new("a")))
            .expect("p1 desire");
        fixture
            .selector
            .set_peer_desired("p2", Some(ProviderDescriptor::new("b")))
            .expect("p2 desire");
        fixture.selector.set_focus(Some("p2")).expect("focus");
        fixture.settle();

        assert_eq!(fixture.connects.borrow().last().expect("connect").kind, "b");
        assert_eq!(
            fixture.selector.forward_target(),
            ForwardTarget::Peer("p2".to_owned())
        );
    }

    #[test]
    fn registration_order_skips_unsupported_desires() {
        let mut fixture = Fixture::new(None, &["b"]);
        fixture.selector.add_peer("p1");
        fixture.selector.add_peer("p2");
        // p1 wants a type nobody registered; the scan moves on to p2.
        fixture
            .selector
            .set_peer_desired("p1", Some(ProviderDescriptor::new("exotic")))
            .expect("p1 desire");
        fixture
            .selector
            .set_peer_desired("p2", Some(ProviderDescriptor::new("b")))
            .expect("p2 desire");
        fixture.settle();

        assert_eq!(fixture.connects.borrow().last().expect("connect").kind, "b");
    }

    #[test]
    fn unknown_peer_is_an_error() {
        let mut fixture = Fixture::new(None, &["sim"]);
        assert!(matches!(
            fixture.selector.set_peer_desired("ghost", None),
            Err(RealityError::UnknownPeer(_))
        ));
        assert!(matches!(
            fixture.selector.set_focus(Some("ghost")),
            Err(RealityError::UnknownPeer(_))
        ));
    }

    #[test]
    fn failover_closes_old_only_after_new_handshake() {
        let mut fixture = Fixture::new(None, &["one", "two"]);
        fixture
            .selector
            .set_manager_desired(Some(ProviderDescriptor::new("one")))
            .expect("first desire");
        fixture.settle();
        assert_eq!(fixture.selector.state(), SelectorState::Active);
        assert_eq!(fixture.provider_changes(), 1);

        fixture
            .selector
            .set_manager_desired(Some(ProviderDescriptor::new("two")))
            .expect("second desire");
        // The swap has not been pumped: the old provider is still current
        // and still connected.
        assert_eq!(fixture.selector.state(), SelectorState::Active);
        assert!(fixture.ports.borrow()[0].is_connected());

        fixture.settle();
        assert_eq!(fixture.selector.state(), SelectorState::Active);
        assert_eq!(fixture.provider_changes(), 1);
        // The old provider-side port observed the close that followed the
        // completed handshake.
        assert_eq!(fixture.ports.borrow()[0].state(), ConnectionState::Closed);
        assert!(fixture.ports.borrow()[1].is_connected());
    }

    #[test]
    fn provider_close_reenters_selection() {
        let mut fixture = Fixture::new(Some(ProviderDescriptor::new("sim")), &["sim"]);
        fixture.selector.reselect().expect("reselect");
        fixture.settle();
        fixture.selector.drain_events();

        fixture.ports.borrow_mut()[0].close();
        fixture.settle();

        // Lost, then recovered to the default provider on a fresh session.
        let events = fixture.selector.drain_events();
        assert!(events.contains(&SelectorEvent::ProviderLost));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, SelectorEvent::ProviderChanged { .. }))
        );
        assert_eq!(fixture.selector.state(), SelectorState::Active);
        assert_eq!(fixture.connects.borrow().len(), 2);
    }

    #[test]
    fn shutdown_closes_provider_sessions() {
        let mut fixture = Fixture::new(Some(ProviderDescriptor::new("sim")), &["sim"]);
        fixture.selector.reselect().expect("reselect");
        fixture.settle();
        assert_eq!(fixture.selector.state(), SelectorState::Active);

        fixture.selector.shutdown();
        assert_eq!(fixture.selector.state(), SelectorState::NoProvider);

        // The provider side observes the close, not just a dropped channel.
        fixture.ports.borrow_mut()[0].pump();
        assert_eq!(fixture.ports.borrow()[0].state(), ConnectionState::Closed);
    }

    #[test]
    fn empty_selection_recovers_to_no_provider() {
        let mut fixture = Fixture::new(None, &["sim"]);
        fixture
            .selector
            .set_manager_desired(Some(ProviderDescriptor::new("sim")))
            .expect("desire");
        fixture.settle();
        assert_eq!(fixture.selector.state(), SelectorState::Active);

        fixture.selector.set_manager_desired(None).expect("clear");
        assert_eq!(fixture.selector.state(), SelectorState::NoProvider);
        fixture.settle();
        assert_eq!(fixture.ports.borrow()[0].state(), ConnectionState::Closed);
    }
}
