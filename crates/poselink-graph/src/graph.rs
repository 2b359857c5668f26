//! The entity graph: storage, ancestor-chain pose resolution, and the
//! edge-triggered pose-status cache.

use std::collections::{HashMap, HashSet};

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

use poselink_core::types::{FrameRef, PoseStatus};
use poselink_core::wire::SerializedPose;

use crate::entity::Entity;
use crate::property::{
    DEFAULT_FORWARD_HOLD, DEFAULT_SAMPLE_CAP, FrameProperty, PropertyValue,
};

// ─── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Retention cap for sampled properties (default 20).
    pub sample_cap: usize,
    /// Forward-hold extrapolation window in seconds (default 5.0).
    pub forward_hold: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            sample_cap: DEFAULT_SAMPLE_CAP,
            forward_hold: DEFAULT_FORWARD_HOLD,
        }
    }
}

// ─── Pose ─────────────────────────────────────────────────────────

/// Result of resolving an entity into a target frame at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Option<DVec3>,
    pub orientation: Option<DQuat>,
    pub status: PoseStatus,
}

impl Pose {
    pub fn is_resolved(&self) -> bool {
        self.position.is_some() && self.orientation.is_some()
    }
}

// Rigid transform helpers on (translation, rotation) pairs.

fn compose(outer: (DVec3, DQuat), inner: (DVec3, DQuat)) -> (DVec3, DQuat) {
    (outer.0 + outer.1 * inner.0, outer.1 * inner.1)
}

fn invert(t: (DVec3, DQuat)) -> (DVec3, DQuat) {
    let qi = t.1.inverse();
    (-(qi * t.0), qi)
}

const IDENTITY: (DVec3, DQuat) = (DVec3::ZERO, DQuat::IDENTITY);

/// Which pose components a chain hop must supply.
#[derive(Debug, Clone, Copy)]
struct HopNeeds {
    position: bool,
    orientation: bool,
}

// ─── Entity Graph ─────────────────────────────────────────────────

/// Owns all entities by id, plus the per-(entity, frame) status cache used
/// for edge-triggered FOUND/LOST reporting.
///
/// Exclusively owned by its synchronizer; not re-entrant.
#[derive(Debug, Default)]
pub struct EntityGraph {
    entities: HashMap<String, Entity>,
    /// Resolvability observed at the last `get_pose` per (entity, frame).
    status_cache: HashMap<(String, FrameRef), bool>,
    config: GraphConfig,
}

impl EntityGraph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            entities: HashMap::new(),
            status_cache: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    pub fn get_or_create(&mut self, id: &str) -> &mut Entity {
        self.entities
            .entry(id.to_owned())
            .or_insert_with(|| Entity::new(id))
    }

    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    /// Ids in unspecified order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Give an entity a constant pose. Replaces both properties, re-homing
    /// them to `frame`.
    pub fn set_constant_pose(
        &mut self,
        id: &str,
        frame: FrameRef,
        position: DVec3,
        orientation: DQuat,
    ) {
        let entity = self.get_or_create(id);
        entity.position = FrameProperty::constant(frame.clone(), position);
        entity.orientation = FrameProperty::constant(frame, orientation);
    }

    /// Switch an entity's pose to time-sampled storage in `frame`, sized by
    /// the graph config. Subsequent wire updates append samples instead of
    /// overwriting.
    pub fn set_sampled_pose(&mut self, id: &str, frame: FrameRef) {
        let cap = self.config.sample_cap;
        let hold = self.config.forward_hold;
        let entity = self.get_or_create(id);
        entity.position = FrameProperty::sampled(frame.clone(), cap, hold);
        entity.orientation = FrameProperty::sampled(frame, cap, hold);
    }

    /// Make both pose components undefined without deleting the entity.
    /// Absence from a snapshot means "no longer defined", not "gone".
    pub fn clear_pose(&mut self, id: &str) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.position.value = PropertyValue::Undefined;
            entity.orientation.value = PropertyValue::Undefined;
        }
    }

    // ── resolution ───────────────────────────────────────────────

    /// Position of `id` in `target` at `time`; `None` when the frames are
    /// not connected through a common ancestor at that time.
    pub fn resolve_position(&self, id: &str, time: f64, target: &FrameRef) -> Option<DVec3> {
        let needs = HopNeeds {
            position: true,
            orientation: true,
        };
        // The queried entity's own rotation never influences its position.
        let first_needs = HopNeeds {
            position: true,
            orientation: false,
        };
        self.resolve_transform(id, time, target, first_needs, needs)
            .map(|t| t.0)
    }

    /// Orientation of `id` in `target` at `time`.
    pub fn resolve_orientation(&self, id: &str, time: f64, target: &FrameRef) -> Option<DQuat> {
        let needs = HopNeeds {
            position: false,
            orientation: true,
        };
        self.resolve_transform(id, time, target, needs, needs)
            .map(|t| t.1)
    }

    /// Cached-or-recomputed pose with edge-triggered status transitions:
    /// FOUND only when resolvability flips up since the last query on this
    /// (entity, frame) key, LOST only on the reverse flip, KNOWN whenever
    /// currently resolved.
    pub fn get_pose(&mut self, id: &str, time: f64, target: Option<&FrameRef>) -> Pose {
        let frame = target.cloned().unwrap_or_default();
        let position = self.resolve_position(id, time, &frame);
        let orientation = self.resolve_orientation(id, time, &frame);
        let resolved = position.is_some() && orientation.is_some();

        let key = (id.to_owned(), frame);
        let previously = self.status_cache.get(&key).copied().unwrap_or(false);
        self.status_cache.insert(key, resolved);

        let mut status = PoseStatus::NONE;
        if resolved {
            status.insert(PoseStatus::KNOWN);
            if !previously {
                status.insert(PoseStatus::FOUND);
            }
        } else if previously {
            status.insert(PoseStatus::LOST);
        }

        Pose {
            position,
            orientation,
            status,
        }
    }

    /// The entity's ancestor-frame list, nearest to furthest.
    pub fn ancestor_frames(&self, id: &str) -> Vec<FrameRef> {
        match self.entities.get(id) {
            Some(entity) => self
                .frame_chain(entity.position.frame.clone())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// Serialize `id` into `explicit`, or into the first ancestor frame
    /// (nearest to furthest) where both components resolve. Lets peers
    /// exchange poses without agreeing on a shared frame in advance.
    pub fn get_serialized_pose(
        &self,
        id: &str,
        time: f64,
        explicit: Option<&FrameRef>,
    ) -> Option<SerializedPose> {
        let candidates: Vec<FrameRef> = match explicit {
            Some(frame) => vec![frame.clone()],
            None => self.ancestor_frames(id),
        };

        for frame in candidates {
            if let (Some(p), Some(q)) = (
                self.resolve_position(id, time, &frame),
                self.resolve_orientation(id, time, &frame),
            ) {
                return Some(SerializedPose::new(p, q, frame));
            }
        }
        None
    }

    /// Ingest one serialized pose: get-or-create the entity, then mutate the
    /// existing property in place when the encoded frame is unchanged, or
    /// replace it (dropping any stale samples) when the frame moved.
    pub fn update_entity_from_serialized_pose(
        &mut self,
        id: &str,
        pose: &SerializedPose,
        time: f64,
    ) {
        let position = pose.p.vec();
        let orientation = pose.o.quat();
        let frame = pose.r.clone();

        let entity = self.get_or_create(id);

        if entity.position.frame == frame {
            match &mut entity.position.value {
                PropertyValue::Constant(value) => *value = position,
                PropertyValue::Sampled(ring) => ring.push(time, position),
                PropertyValue::Undefined => {
                    entity.position.value = PropertyValue::Constant(position);
                }
            }
        } else {
            entity.position = FrameProperty::constant(frame.clone(), position);
        }

        if entity.orientation.frame == frame {
            match &mut entity.orientation.value {
                PropertyValue::Constant(value) => *value = orientation,
                PropertyValue::Sampled(ring) => ring.push(time, orientation),
                PropertyValue::Undefined => {
                    entity.orientation.value = PropertyValue::Constant(orientation);
                }
            }
        } else {
            entity.orientation = FrameProperty::constant(frame, orientation);
        }
    }

    // ── internals ────────────────────────────────────────────────

    /// Frames from `start` upward: `[start, parent(start), …, root]`.
    /// `None` when the chain loops back on itself.
    fn frame_chain(&self, start: FrameRef) -> Option<Vec<FrameRef>> {
        let mut chain = Vec::new();
        let mut seen: HashSet<FrameRef> = HashSet::new();
        let mut current = start;

        loop {
            if !seen.insert(current.clone()) {
                tracing::warn!(frame = %current, "reference-frame cycle detected");
                return None;
            }
            chain.push(current.clone());
            match &current {
                FrameRef::Fixed => return Some(chain),
                FrameRef::Entity(id) => match self.entities.get(id) {
                    Some(entity) => current = entity.position.frame.clone(),
                    // Dangling frame; the chain ends here.
                    None => return Some(chain),
                },
            }
        }
    }

    /// Up-transform of an entity frame in its parent at `time`, with unneeded
    /// missing components substituted by zero/identity.
    fn hop(&self, frame: &FrameRef, time: f64, needs: HopNeeds) -> Option<(DVec3, DQuat)> {
        let FrameRef::Entity(id) = frame else {
            return None;
        };
        let entity = self.entities.get(id)?;
        let position = match entity.position.resolve(time) {
            Some(p) => p,
            None if !needs.position => DVec3::ZERO,
            None => return None,
        };
        let orientation = match entity.orientation.resolve(time) {
            Some(q) => q,
            None if !needs.orientation => DQuat::IDENTITY,
            None => return None,
        };
        Some((position, orientation))
    }

    /// Product of up-transforms for `chain[0..upto]`, bottom-first.
    fn accumulate(
        &self,
        chain: &[FrameRef],
        upto: usize,
        time: f64,
        first_needs: HopNeeds,
        needs: HopNeeds,
    ) -> Option<(DVec3, DQuat)> {
        let mut acc = IDENTITY;
        for (level, frame) in chain[..upto].iter().enumerate() {
            let hop_needs = if level == 0 { first_needs } else { needs };
            let t = self.hop(frame, time, hop_needs)?;
            acc = compose(t, acc);
        }
        Some(acc)
    }

    /// Pose of `id` expressed in `target` at `time`, via the nearest common
    /// ancestor of the two frame chains.
    fn resolve_transform(
        &self,
        id: &str,
        time: f64,
        target: &FrameRef,
        first_needs: HopNeeds,
        needs: HopNeeds,
    ) -> Option<(DVec3, DQuat)> {
        if !self.entities.contains_key(id) {
            return None;
        }

        // The entity's own frame chain starts with the frame the entity
        // itself defines: its pose in that frame is the identity.
        let entity_chain = self.frame_chain(FrameRef::entity(id))?;
        let target_chain = self.frame_chain(target.clone())?;

        let (entity_upto, target_upto) = entity_chain.iter().enumerate().find_map(|(i, f)| {
            target_chain.iter().position(|g| g == f).map(|j| (i, j))
        })?;

        let entity_to_common =
            self.accumulate(&entity_chain, entity_upto, time, first_needs, needs)?;
        let target_to_common = self.accumulate(&target_chain, target_upto, time, needs, needs)?;

        Some(compose(invert(target_to_common), entity_to_common))
    }
}

// ─── Tests ────────────────────────────────────────────────────────
