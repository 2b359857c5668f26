//! An augmenter process: one upstream session to its manager, a local graph
//! replica fed from the manager's filtered frame states.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::{Value, json};

use poselink_core::topics;
use poselink_core::types::SessionConfig;
use poselink_graph::EntityGraph;
use poselink_reality::ProviderDescriptor;
use poselink_session::{MessageChannel, PendingReply, SessionError, SessionPort};
use poselink_sync::{ApplyResult, ContextEvent, ContextSynchronizer, FrameState, SyncConfig};

type FrameSink = Rc<RefCell<VecDeque<FrameState>>>;

pub struct AugmenterRuntime {
    port: SessionPort,
    synchronizer: ContextSynchronizer,
    states: FrameSink,
}

impl AugmenterRuntime {
    pub fn new(sync_config: SyncConfig) -> Self {
        Self {
            port: SessionPort::new(),
            synchronizer: ContextSynchronizer::new(sync_config),
            states: Rc::default(),
        }
    }

    /// Open the upstream session and start collecting context updates.
    pub fn connect(
        &mut self,
        channel: Box<dyn MessageChannel>,
        config: SessionConfig,
    ) -> Result<(), SessionError> {
        let sink = Rc::clone(&self.states);
        self.port.on_notify(topics::CONTEXT_UPDATE, move |payload| {
            match serde_json::from_value::<FrameState>(payload.clone()) {
                Ok(state) => sink.borrow_mut().push_back(state),
                Err(e) => tracing::warn!(error = %e, "undecodable context update"),
            }
        });
        self.port.open(channel, config)
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_connected()
    }

    pub fn close(&mut self) {
        self.port.close();
    }

    pub fn port_mut(&mut self) -> &mut SessionPort {
        &mut self.port
    }

    pub fn graph(&self) -> &EntityGraph {
        self.synchronizer.graph()
    }

    pub fn synchronizer(&self) -> &ContextSynchronizer {
        &self.synchronizer
    }

    /// Register interest in an entity id with the manager.
    pub fn subscribe(&mut self, entity: &str) -> PendingReply {
        self.port
            .request(topics::CONTEXT_SUBSCRIBE, json!({ "id": entity }))
    }

    pub fn unsubscribe(&mut self, entity: &str) -> PendingReply {
        self.port
            .request(topics::CONTEXT_UNSUBSCRIBE, json!({ "id": entity }))
    }

    /// Declare (or withdraw, with `None`) the provider this peer would like
    /// the manager to activate.
    pub fn declare_desired_provider(
        &mut self,
        desired: Option<&ProviderDescriptor>,
    ) -> PendingReply {
        let payload = match desired {
            Some(descriptor) => serde_json::to_value(descriptor).unwrap_or(Value::Null),
            None => Value::Null,
        };
        self.port.request(topics::REALITY_DESIRED, payload)
    }

    /// One tick: pump the upstream session, feed collected updates into the
    /// local synchronizer, run it.
    pub fn tick(&mut self) -> Option<ApplyResult> {
        self.port.pump();
        let inbound: Vec<FrameState> = self.states.borrow_mut().drain(..).collect();
        for state in inbound {
            if let Err(e) = self.synchronizer.submit_frame_state(state) {
                tracing::warn!(error = %e, "rejected context update");
            }
        }
        self.synchronizer.tick()
    }

    pub fn drain_context_events(&mut self) -> Vec<ContextEvent> {
        self.synchronizer.drain_events()
    }
}
