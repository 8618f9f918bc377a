//! Per-viewer visibility culling and record encoding
//!
//! Every viewer remembers which entities it has been told about. Each flush
//! compares that set with what is visible now and emits deletions for what
//! left, full snapshots for what is new and dirty-field deltas for the rest.
//! The encoder only reads the world; dirty bits are cleared by the scheduler
//! once every viewer has been served.
//!
//! A viewer's known set only advances when its frame is accepted by the
//! outbound queue. After a dropped frame the viewer is marked stale and its
//! next frame carries full snapshots for everything it keeps.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::game::entity::EntityId;
use crate::game::input::ViewerId;
use crate::game::world::{EntityData, World};
use crate::net::protocol::{EntityRecord, GroupDelta, ViewerFrame};

/// What one viewer watches and what it already knows
#[derive(Debug, Clone)]
pub struct ViewerState {
    pub camera: EntityId,
    pub half_width: f32,
    pub half_height: f32,
    known: FxHashSet<EntityId>,
    /// Set when a frame was lost; cleared by the next delivered frame
    stale: bool,
}

impl ViewerState {
    pub fn new(camera: EntityId, half_width: f32, half_height: f32) -> Self {
        Self {
            camera,
            half_width,
            half_height,
            known: FxHashSet::default(),
            stale: false,
        }
    }

    #[inline]
    pub fn knows(&self, entity: EntityId) -> bool {
        self.known.contains(&entity)
    }

    #[cfg(test)]
    pub(crate) fn is_stale(&self) -> bool {
        self.stale
    }
}

/// Encoded frame waiting for the outbound queue
#[derive(Debug)]
pub struct PendingFrame {
    pub viewer: ViewerId,
    pub frame: ViewerFrame,
    visible: FxHashSet<EntityId>,
}

/// Full snapshot of every group the entity carries
fn snapshot(data: &EntityData) -> Vec<GroupDelta> {
    let mut groups = vec![
        data.relations.snapshot(),
        data.position.snapshot(),
        data.physics.snapshot(),
        data.style.snapshot(),
    ];
    if let Some(health) = data.health.as_ref() {
        groups.push(health.snapshot());
    }
    if let Some(arena) = data.arena.as_ref() {
        groups.push(arena.snapshot());
    }
    groups
}

/// Dirty fields only; empty when nothing changed this tick
fn deltas(data: &EntityData) -> Vec<GroupDelta> {
    [
        data.relations.delta(),
        data.position.delta(),
        data.physics.delta(),
        data.style.delta(),
        data.health.as_ref().and_then(|g| g.delta()),
        data.arena.as_ref().and_then(|g| g.delta()),
    ]
    .into_iter()
    .flatten()
    .collect()
}

#[derive(Default)]
pub struct ProtocolEncoder {
    viewers: BTreeMap<ViewerId, ViewerState>,
}

impl ProtocolEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a viewer. Re-adding an existing viewer resets what it knows.
    pub fn add_viewer(&mut self, viewer: ViewerId, camera: EntityId, half_width: f32, half_height: f32) {
        self.viewers
            .insert(viewer, ViewerState::new(camera, half_width, half_height));
    }

    pub fn remove_viewer(&mut self, viewer: ViewerId) -> Option<ViewerState> {
        self.viewers.remove(&viewer)
    }

    pub fn viewer(&self, viewer: ViewerId) -> Option<&ViewerState> {
        self.viewers.get(&viewer)
    }

    pub fn camera_of(&self, viewer: ViewerId) -> Option<EntityId> {
        self.viewers.get(&viewer).map(|state| state.camera)
    }

    #[inline]
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Entities a viewer should know about this tick: everything in its
    /// rectangle, their live ancestors and the arena
    fn visible_set(world: &World, state: &ViewerState, camera: &EntityData) -> FxHashSet<EntityId> {
        let center = camera.transform.position;
        let mut visible: FxHashSet<EntityId> = world
            .spatial()
            .retrieve(center.x, center.y, state.half_width, state.half_height)
            .into_iter()
            .filter(|entity| world.contains(*entity))
            .collect();
        visible.insert(world.arena_id());

        let mut ancestors = Vec::new();
        for entity in visible.iter() {
            let mut current = *entity;
            while let Some(parent) = world.parent_of(current) {
                if visible.contains(&parent) {
                    break;
                }
                ancestors.push(parent);
                current = parent;
            }
        }
        visible.extend(ancestors);
        visible
    }

    /// Build this tick's frame for one viewer, or `None` when its camera
    /// is dead
    fn encode_viewer(world: &World, viewer: ViewerId, state: &ViewerState) -> Option<PendingFrame> {
        let Some(camera) = world.get(state.camera) else {
            debug!("Viewer {} skipped, camera {} is gone", viewer, state.camera);
            return None;
        };
        let visible = Self::visible_set(world, state, camera);
        let mut records = Vec::new();

        let mut gone: Vec<EntityId> = state
            .known
            .iter()
            .copied()
            .filter(|entity| !visible.contains(entity))
            .collect();
        gone.sort_unstable();
        records.extend(gone.into_iter().map(|entity| EntityRecord::Deletion { entity }));

        let mut fresh: Vec<(usize, EntityId)> = visible
            .iter()
            .copied()
            .filter(|entity| !state.known.contains(entity))
            .map(|entity| (world.depth_of(entity), entity))
            .collect();
        fresh.sort_unstable();
        for (_, entity) in fresh {
            if let Some(data) = world.get(entity) {
                records.push(EntityRecord::Creation {
                    entity,
                    kind: data.kind,
                    groups: snapshot(data),
                });
            }
        }

        let mut kept: Vec<EntityId> = visible
            .iter()
            .copied()
            .filter(|entity| state.known.contains(entity))
            .collect();
        kept.sort_unstable();
        for entity in kept {
            let Some(data) = world.get(entity) else {
                continue;
            };
            let groups = if state.stale { snapshot(data) } else { deltas(data) };
            if !groups.is_empty() {
                records.push(EntityRecord::Update { entity, groups });
            }
        }

        Some(PendingFrame {
            viewer,
            frame: ViewerFrame {
                tick: world.tick(),
                records,
            },
            visible,
        })
    }

    /// Encode one frame per viewer with a live camera, in viewer id order.
    /// Nothing is recorded until each frame goes through [`Self::deliver`].
    pub fn flush(&self, world: &World) -> Vec<PendingFrame> {
        self.viewers
            .iter()
            .filter_map(|(viewer, state)| Self::encode_viewer(world, *viewer, state))
            .collect()
    }

    /// Hand a frame to `send` and commit the viewer's known set only if it
    /// was accepted. A rejected frame leaves the viewer stale.
    pub fn deliver(&mut self, pending: PendingFrame, send: impl FnOnce(ViewerId, ViewerFrame) -> bool) -> bool {
        let PendingFrame { viewer, frame, visible } = pending;
        let sent = send(viewer, frame);
        if let Some(state) = self.viewers.get_mut(&viewer) {
            if sent {
                state.known = visible;
                state.stale = false;
            } else {
                if !state.stale {
                    debug!("Viewer {} missed a frame, resyncing next tick", viewer);
                }
                state.stale = true;
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArenaConfig;
    use crate::game::fields::PositionGroup;
    use crate::game::world::{circle, EntityKind, LogNotifier};
    use crate::net::protocol::FieldValue;

    fn world() -> World {
        let config = ArenaConfig {
            max_entities: 64,
            ..Default::default()
        };
        World::new(config, Box::new(LogNotifier)).unwrap()
    }

    fn shape(world: &mut World, x: f32) -> EntityId {
        world
            .spawn(
                EntityData::new(EntityKind::Shape)
                    .with_position(x, 0.0)
                    .with_physics(circle(20.0))
                    .with_health(10.0),
            )
            .unwrap()
    }

    /// Flush and accept every frame
    fn flush(encoder: &mut ProtocolEncoder, world: &World) -> Vec<(ViewerId, ViewerFrame)> {
        let mut out = Vec::new();
        for pending in encoder.flush(world) {
            encoder.deliver(pending, |viewer, frame| {
                out.push((viewer, frame));
                true
            });
        }
        out
    }

    fn creations(frame: &ViewerFrame) -> Vec<EntityId> {
        frame
            .records
            .iter()
            .filter(|r| matches!(r, EntityRecord::Creation { .. }))
            .map(EntityRecord::entity)
            .collect()
    }

    #[test]
    fn test_first_flush_creates_visible_entities() {
        let mut w = world();
        let camera = shape(&mut w, 0.0);
        let near = shape(&mut w, 100.0);
        let far = shape(&mut w, 5000.0);

        let mut encoder = ProtocolEncoder::new();
        encoder.add_viewer(1, camera, 1000.0, 1000.0);
        let frames = flush(&mut encoder, &w);
        assert_eq!(frames.len(), 1);

        let created = creations(&frames[0].1);
        assert_eq!(created, vec![w.arena_id(), camera, near]);
        assert!(!created.contains(&far));
        let viewer = encoder.viewer(1).unwrap();
        assert!(viewer.knows(near));
        assert!(!viewer.knows(far));
    }

    #[test]
    fn test_creation_carries_full_snapshot() {
        let mut w = world();
        let camera = shape(&mut w, 0.0);
        let mut encoder = ProtocolEncoder::new();
        encoder.add_viewer(1, camera, 500.0, 500.0);
        let frames = flush(&mut encoder, &w);

        let record = frames[0]
            .1
            .records
            .iter()
            .find(|r| r.entity() == camera)
            .unwrap();
        let EntityRecord::Creation { kind, groups, .. } = record else {
            panic!("expected creation");
        };
        assert_eq!(*kind, EntityKind::Shape);
        // Relations, position, physics, style, health
        assert_eq!(groups.len(), 5);
        assert_eq!(groups[1].mask, PositionGroup::FULL_MASK);
    }

    #[test]
    fn test_unchanged_entities_produce_no_updates() {
        let mut w = world();
        let camera = shape(&mut w, 0.0);
        let mut encoder = ProtocolEncoder::new();
        encoder.add_viewer(1, camera, 500.0, 500.0);
        flush(&mut encoder, &w);
        w.clear_dirty();

        let frames = flush(&mut encoder, &w);
        assert!(frames[0].1.is_empty());
    }

    #[test]
    fn test_update_carries_only_dirty_fields() {
        let mut w = world();
        let camera = shape(&mut w, 0.0);
        let mut encoder = ProtocolEncoder::new();
        encoder.add_viewer(1, camera, 500.0, 500.0);
        flush(&mut encoder, &w);
        w.clear_dirty();

        w.get_mut(camera).unwrap().position.set_y(7.0);
        let frames = flush(&mut encoder, &w);
        let records = &frames[0].1.records;
        assert_eq!(records.len(), 1);
        let EntityRecord::Update { entity, groups } = &records[0] else {
            panic!("expected update");
        };
        assert_eq!(*entity, camera);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].mask, 1 << 1);
        assert_eq!(groups[0].field(1), Some(FieldValue::F32(7.0)));
    }

    #[test]
    fn test_leaving_view_emits_deletion() {
        let mut w = world();
        let camera = shape(&mut w, 0.0);
        let other = shape(&mut w, 200.0);
        let mut encoder = ProtocolEncoder::new();
        encoder.add_viewer(1, camera, 500.0, 500.0);
        flush(&mut encoder, &w);
        w.clear_dirty();

        w.free(other);
        let frames = flush(&mut encoder, &w);
        assert_eq!(frames[0].1.records, vec![EntityRecord::Deletion { entity: other }]);
        assert!(!encoder.viewer(1).unwrap().knows(other));
    }

    #[test]
    fn test_parents_are_created_before_children() {
        let mut w = world();
        let camera = shape(&mut w, 0.0);
        let parent = w
            .spawn(EntityData::new(EntityKind::Body).with_position(3000.0, 0.0).with_physics(circle(10.0)))
            .unwrap();
        // Child is in view even though its parent is not
        let child = w
            .spawn(
                EntityData::new(EntityKind::Barrel)
                    .with_parent(parent)
                    .with_position(-2900.0, 0.0)
                    .with_physics(circle(10.0)),
            )
            .unwrap();
        assert!(parent < child);

        let mut encoder = ProtocolEncoder::new();
        encoder.add_viewer(1, camera, 500.0, 500.0);
        let created = creations(&flush(&mut encoder, &w)[0].1);
        let pos = |id| created.iter().position(|e| *e == id).unwrap();
        assert!(pos(parent) < pos(child));
    }

    #[test]
    fn test_dead_camera_skips_viewer() {
        let mut w = world();
        let camera = shape(&mut w, 0.0);
        let other_camera = shape(&mut w, 100.0);
        let mut encoder = ProtocolEncoder::new();
        encoder.add_viewer(1, camera, 500.0, 500.0);
        encoder.add_viewer(2, other_camera, 500.0, 500.0);
        flush(&mut encoder, &w);

        w.free(camera);
        let frames = flush(&mut encoder, &w);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, 2);
        // Skipped viewer keeps its known set for when the camera moves
        assert!(encoder.viewer(1).unwrap().knows(other_camera));
    }

    #[test]
    fn test_rejected_frame_keeps_known_set_and_resyncs() {
        let mut w = world();
        let camera = shape(&mut w, 0.0);
        let mut encoder = ProtocolEncoder::new();
        encoder.add_viewer(1, camera, 500.0, 500.0);
        flush(&mut encoder, &w);
        w.clear_dirty();

        let late = shape(&mut w, 100.0);
        for pending in encoder.flush(&w) {
            assert!(!encoder.deliver(pending, |_, _| false));
        }
        w.clear_dirty();
        let viewer = encoder.viewer(1).unwrap();
        assert!(viewer.is_stale());
        assert!(!viewer.knows(late));

        w.get_mut(late).unwrap().position.set_y(3.0);
        w.clear_dirty();
        let frames = flush(&mut encoder, &w);
        let records = &frames[0].1.records;
        assert!(records
            .iter()
            .any(|r| matches!(r, EntityRecord::Creation { entity, .. } if *entity == late)));
        // Kept entities come back as full snapshots even with clean dirty bits
        let camera_update = records.iter().find(|r| r.entity() == camera).unwrap();
        let EntityRecord::Update { groups, .. } = camera_update else {
            panic!("expected update");
        };
        assert_eq!(groups[1].mask, PositionGroup::FULL_MASK);
        assert!(!encoder.viewer(1).unwrap().is_stale());
        assert!(encoder.viewer(1).unwrap().knows(late));
    }

    #[test]
    fn test_viewer_management() {
        let mut w = world();
        let camera = shape(&mut w, 0.0);
        let mut encoder = ProtocolEncoder::new();
        encoder.add_viewer(4, camera, 10.0, 10.0);
        encoder.add_viewer(2, camera, 10.0, 10.0);
        assert_eq!(encoder.viewer_count(), 2);
        assert_eq!(encoder.camera_of(4), Some(camera));
        assert_eq!(encoder.camera_of(9), None);
        assert!(encoder.remove_viewer(2).is_some());
        assert_eq!(encoder.viewer_count(), 1);
    }
}
