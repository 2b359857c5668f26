//! The per-tick synchronizer state machine: ingest at most one frame state
//! per tick, diff against the previous tick, keep the local-origin anchor
//! near the viewer, and fan filtered state out to subscribers.

use std::collections::{HashMap, HashSet, VecDeque};

use glam::DQuat;
use serde::{Deserialize, Serialize};

use poselink_core::types::FrameRef;
use poselink_core::wire::SerializedPose;
use poselink_graph::{EntityGraph, GraphConfig};

use crate::frame_state::{FrameState, FrameStateError};

// ─── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Id of the primary viewer entity (default "user").
    pub viewer_entity: String,
    /// Id of the local-origin anchor entity (default "origin").
    pub origin_entity: String,
    /// Re-center the anchor once the viewer drifts this far from it
    /// (default 10.0).
    pub origin_drift_threshold: f64,
    pub graph: GraphConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            viewer_entity: "user".to_owned(),
            origin_entity: "origin".to_owned(),
            origin_drift_threshold: 10.0,
            graph: GraphConfig::default(),
        }
    }
}

// ─── Events & Results ─────────────────────────────────────────────

/// Tick notifications, stamped with the frame number so late consumers can
/// detect missed ticks. Within one tick, `Update` always precedes `Render`.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    Update { frame_number: u64, time: f64 },
    Render { frame_number: u64, time: f64 },
    LocalOriginChanged { frame_number: u64 },
}

/// Summary of one applied frame state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ApplyResult {
    pub frame_number: u64,
    /// Entities written into the graph from this frame state.
    pub updated: usize,
    /// Previously-updating entities absent this tick, now cleared.
    pub cleared: usize,
}

type DeferredMutation = Box<dyn FnOnce(&mut EntityGraph)>;

// ─── Synchronizer ─────────────────────────────────────────────────

/// Owns the entity graph and the per-tick pose cache exclusively. Not
/// re-entrant: handlers running during a tick must queue graph mutations via
/// [`ContextSynchronizer::defer`] instead of touching the graph directly.
pub struct ContextSynchronizer {
    graph: EntityGraph,
    config: SyncConfig,
    /// At most one snapshot is ingested per tick; a newer submission before
    /// the tick replaces an older one.
    pending: Option<FrameState>,
    /// Ids carried by the snapshot currently being applied.
    seen: HashSet<String>,
    /// Ids that received an update on some previous tick and have not been
    /// cleared since.
    updating: HashSet<String>,
    deferred: VecDeque<DeferredMutation>,
    events: VecDeque<ContextEvent>,
    /// Serialized poses computed this tick, shared across subscribers.
    pose_cache: HashMap<String, Option<SerializedPose>>,
    frame_number: u64,
    time: f64,
    view: serde_json::Value,
}

impl ContextSynchronizer {
    pub fn new(config: SyncConfig) -> Self {
        let graph = EntityGraph::new(config.graph.clone());
        Self {
            graph,
            config,
            pending: None,
            seen: HashSet::new(),
            updating: HashSet::new(),
            deferred: VecDeque::new(),
            events: VecDeque::new(),
            pose_cache: HashMap::new(),
            frame_number: 0,
            time: 0.0,
            view: serde_json::Value::Null,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    /// Direct graph access for setup code running outside a tick.
    pub fn graph_mut(&mut self) -> &mut EntityGraph {
        &mut self.graph
    }

    /// Time carried by the last applied frame state.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Queue a graph mutation for the start of the next tick. The only safe
    /// way to mutate the graph from a handler invoked mid-tick.
    pub fn defer(&mut self, mutation: impl FnOnce(&mut EntityGraph) + 'static) {
        self.deferred.push_back(Box::new(mutation));
    }

    /// Validate and stage an inbound frame state for the next tick. A state
    /// staged while another is already pending replaces it.
    pub fn submit_frame_state(&mut self, state: FrameState) -> Result<(), FrameStateError> {
        state.validate()?;
        if let Some(old) = self.pending.replace(state) {
            tracing::debug!(
                frame_number = old.frame_number,
                "frame state superseded before tick"
            );
        }
        Ok(())
    }

    /// Run one tick: drain deferred mutations, then apply the pending frame
    /// state if one arrived. An absent state is not an error; nothing updates
    /// that tick and no notifications are raised.
    pub fn tick(&mut self) -> Option<ApplyResult> {
        while let Some(mutation) = self.deferred.pop_front() {
            mutation(&mut self.graph);
        }

        let state = self.pending.take()?;
        self.pose_cache.clear();
        self.frame_number = state.frame_number;
        self.time = state.time;
        self.view = state.view;

        self.seen.clear();
        for (id, pose) in &state.entities {
            self.graph
                .update_entity_from_serialized_pose(id, pose, state.time);
            self.seen.insert(id.clone());
            self.updating.insert(id.clone());
        }
        let updated = self.seen.len();

        // Previously-updating ids absent this tick are now unknown.
        let gone: Vec<String> = self
            .updating
            .iter()
            .filter(|id| !self.seen.contains(*id))
            .cloned()
            .collect();
        for id in &gone {
            self.graph.clear_pose(id);
            self.updating.remove(id);
        }

        self.recenter_origin();

        self.events.push_back(ContextEvent::Update {
            frame_number: self.frame_number,
            time: self.time,
        });
        self.events.push_back(ContextEvent::Render {
            frame_number: self.frame_number,
            time: self.time,
        });

        Some(ApplyResult {
            frame_number: self.frame_number,
            updated,
            cleared: gone.len(),
        })
    }

    /// All notifications raised since the last drain, in raise order.
    pub fn drain_events(&mut self) -> Vec<ContextEvent> {
        self.events.drain(..).collect()
    }

    /// Build this tick's filtered frame state for one subscriber: the primary
    /// entity set (viewer and origin) plus the subscribed ids and every
    /// entity along their ancestor-frame chains. Each call returns a fresh
    /// entities map; subscribers never alias each other's state.
    pub fn serialize_for_subscriber(&mut self, subscribed: &[String]) -> FrameState {
        let mut wanted: Vec<String> = vec![
            self.config.viewer_entity.clone(),
            self.config.origin_entity.clone(),
        ];
        for id in subscribed {
            wanted.push(id.clone());
            for frame in self.graph.ancestor_frames(id) {
                if let FrameRef::Entity(ancestor) = frame {
                    wanted.push(ancestor);
                }
            }
        }

        let mut state = FrameState::new(self.frame_number, self.time);
        state.view = self.view.clone();
        for id in wanted {
            if state.entities.contains_key(&id) {
                continue;
            }
            if let Some(pose) = self.cached_serialized_pose(&id) {
                state.entities.insert(id, pose);
            }
        }
        state
    }

    // ── internals ────────────────────────────────────────────────

    fn cached_serialized_pose(&mut self, id: &str) -> Option<SerializedPose> {
        if let Some(cached) = self.pose_cache.get(id) {
            return cached.clone();
        }
        let pose = self.graph.get_serialized_pose(id, self.time, None);
        self.pose_cache.insert(id.to_owned(), pose.clone());
        pose
    }

    /// Keep the local-origin anchor within the drift threshold of the
    /// viewer. Raises a change notification only on actual re-centering.
    fn recenter_origin(&mut self) {
        let origin_frame = FrameRef::entity(&self.config.origin_entity);
        let Some(viewer_offset) =
            self.graph
                .resolve_position(&self.config.viewer_entity, self.time, &origin_frame)
        else {
            // No resolvable origin yet: center it on the viewer if the
            // viewer itself resolves in the fixed frame.
            let Some(viewer_fixed) = self.graph.resolve_position(
                &self.config.viewer_entity,
                self.time,
                &FrameRef::Fixed,
            ) else {
                return;
            };
            self.graph.set_constant_pose(
                &self.config.origin_entity,
                FrameRef::Fixed,
                viewer_fixed,
                DQuat::IDENTITY,
            );
            self.events.push_back(ContextEvent::LocalOriginChanged {
                frame_number: self.frame_number,
            });
            return;
        };

        if viewer_offset.length() <= self.config.origin_drift_threshold {
            return;
        }
        let Some(viewer_fixed) =
            self.graph
                .resolve_position(&self.config.viewer_entity, self.time, &FrameRef::Fixed)
        else {
            return;
        };
        tracing::debug!(
            drift = viewer_offset.length(),
            "re-centering local origin on viewer"
        );
        self.graph.set_constant_pose(
            &self.config.origin_entity,
            FrameRef::Fixed,
            viewer_fixed,
            DQuat::IDENTITY,
        );
        self.events.push_back(ContextEvent::LocalOriginChanged {
            frame_number: self.frame_number,
        });
    }
}

// ─── Tests ────────────────────────────────────────────────────────
