//! Simulation scheduler
//!
//! Owns the world, the per-viewer encoder and both queues, and runs one tick
//! as a single sequential pass:
//!
//! 1. input application
//! 2. AI decisions
//! 3. physics, parent before child
//! 4. spatial index refresh
//! 5. collision
//! 6. lifecycle finalization (the only phase that frees or allocates)
//! 7. network flush, then dirty bits are cleared
//!
//! Network contexts only touch the scheduler through [`InputSender`] and the
//! outbound queue.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use crate::config::ArenaConfig;
use crate::game::blueprints::{self, Loadout};
use crate::game::entity::{EntityId, RegistryError};
use crate::game::input::{Controller, Inputs, ViewerId};
use crate::game::input_buffer::{InputBuffer, InputSender};
use crate::game::systems::arena::{self, ArenaEvent};
use crate::game::systems::collision::{self, CollisionStats};
use crate::game::systems::lifecycle::{self, LifecycleStats};
use crate::game::systems::{ai, physics};
use crate::game::world::{ArenaState, TickPhase, World};
use crate::net::encoder::ProtocolEncoder;
use crate::net::outbound::OutboundSender;

/// Fatal tick failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error("entity capacity exhausted: {0}")]
    Capacity(#[from] RegistryError),
}

/// Why a viewer could not join
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("arena is not accepting players")]
    ArenaClosed,
    #[error("viewer {0} already joined")]
    AlreadyJoined(ViewerId),
    #[error("no room for another tank: {0}")]
    Capacity(#[from] RegistryError),
}

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    pub tick: u64,
    pub inputs_applied: usize,
    pub inputs_rejected: usize,
    pub departures: usize,
    /// Entities removed for a missing field group
    pub invalid_removed: usize,
    pub collisions: CollisionStats,
    pub lifecycle: LifecycleStats,
    pub frames_sent: usize,
    pub frames_dropped: usize,
    pub arena_event: Option<ArenaEvent>,
}

/// Single-writer owner of the simulation
pub struct Scheduler {
    world: World,
    encoder: ProtocolEncoder,
    inputs: InputBuffer,
    outbound: OutboundSender,
}

impl Scheduler {
    /// Create the world and its arena. Notifications go out through `outbound`.
    pub fn new(config: ArenaConfig, outbound: OutboundSender) -> Result<Self, SimulationError> {
        let inputs = InputBuffer::new(config.input_queue_capacity);
        let world = World::new(config, Box::new(outbound.clone()))?;
        let bounds = world.arena_bounds();
        info!(
            "Arena created: {}x{}, capacity {} entities",
            bounds.max.x - bounds.min.x,
            bounds.max.y - bounds.min.y,
            world.config().max_entities
        );
        Ok(Self {
            world,
            encoder: ProtocolEncoder::new(),
            inputs,
            outbound,
        })
    }

    /// Handle for network contexts
    pub fn input_sender(&self) -> InputSender {
        self.inputs.sender()
    }

    #[inline]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Direct world access between ticks
    #[inline]
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    #[inline]
    pub fn encoder(&self) -> &ProtocolEncoder {
        &self.encoder
    }

    #[inline]
    pub fn arena_state(&self) -> ArenaState {
        self.world.arena_state()
    }

    /// Spawn a tank for `viewer` and start streaming frames to it
    pub fn join(&mut self, viewer: ViewerId, loadout: Loadout) -> Result<EntityId, JoinError> {
        if self.world.arena_state() != ArenaState::Open {
            return Err(JoinError::ArenaClosed);
        }
        if self.encoder.viewer(viewer).is_some() {
            return Err(JoinError::AlreadyJoined(viewer));
        }
        let spot = arena::find_spawn_location(&mut self.world);
        let tank = blueprints::spawn_tank(&mut self.world, spot.x, spot.y, Controller::Player(viewer), loadout)?;
        let (half_width, half_height) = (self.world.config().view_half_width, self.world.config().view_half_height);
        self.encoder.add_viewer(viewer, tank, half_width, half_height);
        info!("Viewer {} joined as {} at ({}, {})", viewer, tank, spot.x, spot.y);
        Ok(tank)
    }

    /// Stop streaming to `viewer` and fade out its tank
    pub fn leave(&mut self, viewer: ViewerId) -> bool {
        let Some(state) = self.encoder.remove_viewer(viewer) else {
            return false;
        };
        let animation = self.world.config().deletion_animation_ticks;
        let owned = self
            .world
            .get(state.camera)
            .is_some_and(|data| data.controller == Controller::Player(viewer));
        if owned {
            self.world.request_deletion(state.camera, animation);
        }
        info!("Viewer {} left", viewer);
        true
    }

    /// Stop accepting players; the arena closes once the last one leaves
    pub fn close_arena(&mut self) -> bool {
        arena::close(&mut self.world)
    }

    /// Run one full tick
    pub fn tick(&mut self) -> Result<TickSummary, SimulationError> {
        let mut summary = TickSummary {
            tick: self.world.tick(),
            ..Default::default()
        };

        self.world.enter_phase(TickPhase::Input);
        self.apply_inputs(&mut summary);

        self.world.enter_phase(TickPhase::Ai);
        ai::update(&mut self.world);

        self.world.enter_phase(TickPhase::Physics);
        physics::update(&mut self.world);

        self.world.enter_phase(TickPhase::Spatial);
        self.world.rebuild_spatial();

        self.world.enter_phase(TickPhase::Collision);
        summary.invalid_removed = collision::validate_groups(&mut self.world);
        summary.collisions = collision::resolve(&mut self.world);

        self.world.enter_phase(TickPhase::Lifecycle);
        summary.lifecycle = lifecycle::finalize(&mut self.world).map_err(|e| {
            error!("Tick {} aborted: {}", summary.tick, e);
            SimulationError::from(e)
        })?;
        summary.arena_event = arena::update(&mut self.world);

        self.world.enter_phase(TickPhase::Flush);
        self.flush(&mut summary);

        self.world.set_tick(summary.tick + 1);
        self.world.enter_phase(TickPhase::Idle);
        Ok(summary)
    }

    /// Departures first, then the last valid input per viewer
    fn apply_inputs(&mut self, summary: &mut TickSummary) {
        for viewer in self.inputs.drain_leaves() {
            if self.leave(viewer) {
                summary.departures += 1;
            }
        }

        let mut latest: BTreeMap<ViewerId, Inputs> = BTreeMap::new();
        for message in self.inputs.drain() {
            match message.inputs.validate() {
                Ok(()) => {
                    latest.insert(message.viewer, message.inputs);
                }
                Err(e) => {
                    warn!("Discarding input from viewer {}: {}", message.viewer, e);
                    summary.inputs_rejected += 1;
                }
            }
        }

        for (viewer, inputs) in latest {
            let Some(camera) = self.encoder.camera_of(viewer) else {
                debug!("Input from unknown viewer {}", viewer);
                continue;
            };
            match self.world.get_mut(camera) {
                Some(data) if data.controller == Controller::Player(viewer) => {
                    data.inputs = inputs;
                    summary.inputs_applied += 1;
                }
                _ => debug!("Viewer {} has no controllable camera", viewer),
            }
        }
    }

    /// A dropped frame leaves its viewer stale, so clearing dirty bits
    /// afterwards loses nothing: the next frame resends full snapshots.
    fn flush(&mut self, summary: &mut TickSummary) {
        let outbound = &self.outbound;
        for pending in self.encoder.flush(&self.world) {
            if self.encoder.deliver(pending, |viewer, frame| outbound.send_frame(viewer, frame)) {
                summary.frames_sent += 1;
            } else {
                summary.frames_dropped += 1;
            }
        }
        self.world.clear_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::input_flags;
    use crate::game::entity::EntityRegistry;
    use crate::game::fields::PositionGroup;
    use crate::game::systems::ai::{AiMode, AiState};
    use crate::game::world::{circle, EntityData, EntityKind};
    use crate::net::outbound::OutboundQueue;
    use crate::net::protocol::{decode, encode, ClientMessage, EntityRecord, FieldValue, ServerMessage, ViewerFrame};
    use crate::util::vec2::Vec2;

    fn config() -> ArenaConfig {
        ArenaConfig {
            max_entities: 256,
            arena_width: 4000.0,
            arena_height: 4000.0,
            view_half_width: 1000.0,
            view_half_height: 1000.0,
            ..Default::default()
        }
    }

    fn scheduler_with(config: ArenaConfig) -> (Scheduler, OutboundQueue) {
        let queue = OutboundQueue::new(1024);
        let scheduler = Scheduler::new(config, queue.sender()).unwrap();
        (scheduler, queue)
    }

    /// Decoded frames addressed to `viewer`, oldest first
    fn frames_for(queue: &OutboundQueue, viewer: ViewerId) -> Vec<ViewerFrame> {
        queue
            .drain()
            .into_iter()
            .filter(|m| m.viewer == Some(viewer))
            .filter_map(|m| match decode::<ServerMessage>(&m.payload) {
                Ok(ServerMessage::Frame(frame)) => Some(frame),
                _ => None,
            })
            .collect()
    }

    fn records_about(frame: &ViewerFrame, entity: EntityId) -> Vec<&EntityRecord> {
        frame.records.iter().filter(|r| r.entity() == entity).collect()
    }

    fn shape_at(scheduler: &mut Scheduler, x: f32, y: f32) -> EntityId {
        blueprints::spawn_shape(scheduler.world_mut(), x, y, 4, 20.0, 10.0).unwrap()
    }

    /// Joined viewer with its tank moved to the origin
    fn join_at_origin(scheduler: &mut Scheduler, viewer: ViewerId) -> EntityId {
        let tank = scheduler.join(viewer, Loadout::Basic).unwrap();
        let data = scheduler.world_mut().get_mut(tank).unwrap();
        data.position.set_x(0.0);
        data.position.set_y(0.0);
        scheduler.world_mut().rebuild_spatial();
        tank
    }

    #[test]
    fn test_ids_are_reused_with_new_generation() {
        let mut registry = EntityRegistry::new(4);
        let a = registry.allocate().unwrap();
        assert_eq!(a, EntityId::new(0, 0));
        registry.free(a);
        let b = registry.allocate().unwrap();
        assert_eq!(b, EntityId::new(0, 1));
        assert!(!registry.exists(EntityId::new(0, 0)));
        assert!(registry.exists(EntityId::new(0, 1)));
    }

    #[test]
    fn test_spatial_retrieve_scenario() {
        let (mut s, _queue) = scheduler_with(config());
        let e = s
            .world_mut()
            .spawn(
                EntityData::new(EntityKind::Shape)
                    .with_position(100.0, 100.0)
                    .with_physics(circle(50.0))
                    .with_health(10.0),
            )
            .unwrap();
        s.tick().unwrap();
        assert!(s.world().spatial().retrieve(0.0, 0.0, 300.0, 300.0).contains(&e));
        assert!(!s.world().spatial().retrieve(1000.0, 1000.0, 10.0, 10.0).contains(&e));
    }

    #[test]
    fn test_deletion_countdown_spans_three_ticks() {
        let (mut s, queue) = scheduler_with(config());
        join_at_origin(&mut s, 1);
        let shape = shape_at(&mut s, 300.0, 0.0);
        s.tick().unwrap();
        queue.drain();

        assert!(s.world_mut().request_deletion(shape, 3));
        for _ in 0..3 {
            s.tick().unwrap();
            assert!(s.world().contains(shape));
            let frames = frames_for(&queue, 1);
            let records = records_about(&frames[0], shape);
            assert!(matches!(records.as_slice(), [EntityRecord::Update { .. }]));
        }

        s.tick().unwrap();
        assert!(!s.world().contains(shape));
        let frames = frames_for(&queue, 1);
        let records = records_about(&frames[0], shape);
        assert!(matches!(records.as_slice(), [EntityRecord::Deletion { .. }]));
    }

    #[test]
    fn test_double_write_coalesces_into_one_delta() {
        let (mut s, queue) = scheduler_with(config());
        join_at_origin(&mut s, 1);
        let shape = shape_at(&mut s, 300.0, 0.0);
        s.tick().unwrap();
        queue.drain();

        let data = s.world_mut().get_mut(shape).unwrap();
        data.position.set_y(5.0);
        data.position.set_y(7.0);
        s.tick().unwrap();

        let frames = frames_for(&queue, 1);
        let records = records_about(&frames[0], shape);
        assert_eq!(records.len(), 1);
        let EntityRecord::Update { groups, .. } = records[0] else {
            panic!("expected update");
        };
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group, PositionGroup::ID);
        assert_eq!(groups[0].mask, 1 << 1);
        assert_eq!(groups[0].field(1), Some(FieldValue::F32(7.0)));
    }

    #[test]
    fn test_child_tracks_parent_size_in_same_tick() {
        let (mut s, _queue) = scheduler_with(config());
        let tank = join_at_origin(&mut s, 1);
        let barrel = s.world().get(tank).unwrap().children[0];
        let length = s.world().get(barrel).unwrap().barrel.unwrap().spec.length;

        s.input_sender()
            .try_send(
                1,
                Inputs {
                    flags: input_flags::LEVEL_UP,
                    ..Default::default()
                },
            )
            .unwrap();
        s.tick().unwrap();

        let parent_size = s.world().get(tank).unwrap().physics.values().size;
        assert!(parent_size > 50.0);
        let barrel_size = s.world().get(barrel).unwrap().physics.values().size;
        assert!((barrel_size - length * parent_size / 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_ai_picks_lowest_id_between_equal_targets() {
        let run = || {
            let (mut s, _queue) = scheduler_with(config());
            let bot = s
                .world_mut()
                .spawn(
                    EntityData::new(EntityKind::Body)
                        .with_physics(circle(50.0))
                        .with_health(50.0)
                        .with_controller(Controller::Ai)
                        .with_ai(AiState::new(1000.0)),
                )
                .unwrap();
            let a = shape_at(&mut s, 400.0, 0.0);
            let b = shape_at(&mut s, -400.0, 0.0);
            // First tick leaves Idle and acquires, the second settles on Attack
            s.tick().unwrap();
            s.tick().unwrap();
            let state = s.world().get(bot).unwrap().ai.clone().unwrap();
            (state, a, b)
        };
        let (first, a, _) = run();
        let (second, _, _) = run();
        assert_eq!(first.mode, AiMode::Attack);
        assert_eq!(first.target, Some(a));
        assert_eq!(first.target, second.target);
    }

    #[test]
    fn test_spatial_boxes_match_positions_after_tick() {
        let (mut s, _queue) = scheduler_with(config());
        let tank = join_at_origin(&mut s, 1);
        for i in 0..5 {
            shape_at(&mut s, 200.0 * i as f32 - 400.0, 600.0);
        }
        s.input_sender()
            .try_send(
                1,
                Inputs {
                    movement_angle: 0.3,
                    movement_magnitude: 1.0,
                    ..Default::default()
                },
            )
            .unwrap();
        for _ in 0..3 {
            s.tick().unwrap();
            for id in s.world().live_ids() {
                if id == s.world().arena_id() {
                    continue;
                }
                let data = s.world().get(id).unwrap();
                assert_eq!(s.world().spatial().bounds_of(id), Some(data.bounds()), "{}", id);
            }
        }
        assert!(s.world().get(tank).unwrap().transform.position.x > 0.0);
    }

    #[test]
    fn test_last_valid_input_wins_and_malformed_is_dropped() {
        let (mut s, _queue) = scheduler_with(config());
        let tank = join_at_origin(&mut s, 1);
        let sender = s.input_sender();
        let good = Inputs {
            mouse: Vec2::new(10.0, 0.0),
            ..Default::default()
        };
        let later = Inputs {
            mouse: Vec2::new(0.0, 10.0),
            ..Default::default()
        };
        sender.try_send(1, good).unwrap();
        sender.try_send(1, later).unwrap();
        sender
            .try_send(
                1,
                Inputs {
                    movement_magnitude: f32::NAN,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(sender.submit_frame(1, &[0xFF, 0xFF, 0xFF, 0xFF]).is_err());

        let summary = s.tick().unwrap();
        assert_eq!(summary.inputs_rejected, 1);
        assert_eq!(summary.inputs_applied, 1);
        assert_eq!(s.world().get(tank).unwrap().inputs, later);
    }

    #[test]
    fn test_input_for_another_viewers_body_is_ignored() {
        let (mut s, _queue) = scheduler_with(config());
        let tank = join_at_origin(&mut s, 1);
        s.input_sender()
            .try_send(
                2,
                Inputs {
                    flags: input_flags::SUICIDE,
                    ..Default::default()
                },
            )
            .unwrap();
        let summary = s.tick().unwrap();
        assert_eq!(summary.inputs_applied, 0);
        assert!(!s.world().get(tank).unwrap().is_deleting());
    }

    #[test]
    fn test_dead_camera_skips_viewer() {
        let (mut s, queue) = scheduler_with(config());
        let tank = join_at_origin(&mut s, 1);
        let other = s.join(2, Loadout::Basic).unwrap();
        s.tick().unwrap();
        queue.drain();

        s.world_mut().request_deletion(tank, 0);
        s.tick().unwrap();
        assert!(!s.world().contains(tank));

        let summary = s.tick().unwrap();
        assert_eq!(summary.frames_sent, 1);
        assert!(frames_for(&queue, 1).is_empty());
        assert!(s.world().contains(other));
        assert!(s.encoder().viewer(1).is_some());
    }

    #[test]
    fn test_dropped_frame_is_resent_as_creation() {
        let queue = OutboundQueue::new(1);
        let mut s = Scheduler::new(config(), queue.sender()).unwrap();
        join_at_origin(&mut s, 1);
        assert_eq!(s.tick().unwrap().frames_sent, 1);

        // Queue is still full from the first frame
        let shape = shape_at(&mut s, 200.0, 0.0);
        assert_eq!(s.tick().unwrap().frames_dropped, 1);
        assert!(s.encoder().viewer(1).unwrap().is_stale());
        assert!(!s.encoder().viewer(1).unwrap().knows(shape));
        queue.drain();

        s.world_mut().get_mut(shape).unwrap().position.set_y(5.0);
        assert_eq!(s.tick().unwrap().frames_sent, 1);
        let frames = frames_for(&queue, 1);
        assert_eq!(frames.len(), 1);
        let records = records_about(&frames[0], shape);
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], EntityRecord::Creation { .. }));
        assert!(s.encoder().viewer(1).unwrap().knows(shape));
        assert!(!s.encoder().viewer(1).unwrap().is_stale());
    }

    #[test]
    fn test_missing_group_removes_only_offender() {
        let (mut s, _queue) = scheduler_with(config());
        let broken = s
            .world_mut()
            .spawn(EntityData::new(EntityKind::Body).with_physics(circle(50.0)))
            .unwrap();
        let fine = shape_at(&mut s, 500.0, 500.0);
        let summary = s.tick().unwrap();
        assert_eq!(summary.invalid_removed, 1);
        assert!(!s.world().contains(broken));
        assert!(s.world().contains(fine));
        assert_eq!(s.world().tick(), 1);
    }

    #[test]
    fn test_capacity_exhaustion_is_fatal() {
        // Arena, tank and barrel fill the registry; the first shot cannot spawn
        let (mut s, _queue) = scheduler_with(ArenaConfig {
            max_entities: 3,
            ..config()
        });
        join_at_origin(&mut s, 1);
        s.input_sender()
            .try_send(
                1,
                Inputs {
                    flags: input_flags::LEFT_CLICK,
                    mouse: Vec2::new(100.0, 0.0),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(matches!(s.tick(), Err(SimulationError::Capacity(_))));
    }

    #[test]
    fn test_shooting_spawns_after_lifecycle() {
        let (mut s, queue) = scheduler_with(config());
        let tank = join_at_origin(&mut s, 1);
        s.input_sender()
            .try_send(
                1,
                Inputs {
                    flags: input_flags::LEFT_CLICK,
                    mouse: Vec2::new(100.0, 0.0),
                    ..Default::default()
                },
            )
            .unwrap();
        let before = s.world().len();
        let summary = s.tick().unwrap();
        assert_eq!(summary.lifecycle.spawned, 1);
        assert_eq!(s.world().len(), before + 1);

        let bullet = s.world().live_ids().into_iter().max().unwrap();
        let data = s.world().get(bullet).unwrap();
        assert_eq!(data.kind, EntityKind::Bullet);
        assert_eq!(data.relations.values().owner, Some(tank));

        // Visible the same tick it materialized
        let frames = frames_for(&queue, 1);
        assert!(records_about(frames.last().unwrap(), bullet)
            .iter()
            .any(|r| matches!(r, EntityRecord::Creation { .. })));
    }

    #[test]
    fn test_leave_message_fades_tank_and_closes_arena() {
        let (mut s, queue) = scheduler_with(config());
        let tank = join_at_origin(&mut s, 1);
        assert!(s.close_arena());
        assert_eq!(s.join(2, Loadout::Basic), Err(JoinError::ArenaClosed));

        let leave = encode(&ClientMessage::Leave).unwrap();
        s.input_sender().submit_frame(1, &leave).unwrap();
        let summary = s.tick().unwrap();
        assert_eq!(summary.departures, 1);
        assert!(s.world().get(tank).unwrap().is_deleting());
        assert_eq!(summary.arena_event, Some(ArenaEvent::Closed));
        assert_eq!(s.arena_state(), ArenaState::Closed);

        let notices = queue
            .drain()
            .into_iter()
            .filter(|m| m.viewer.is_none())
            .count();
        assert_eq!(notices, 1);
    }

    #[test]
    fn test_join_twice_is_rejected() {
        let (mut s, _queue) = scheduler_with(config());
        s.join(1, Loadout::Basic).unwrap();
        assert_eq!(s.join(1, Loadout::Basic), Err(JoinError::AlreadyJoined(1)));
    }

    #[test]
    fn test_tick_counter_and_phase_reset() {
        let (mut s, _queue) = scheduler_with(config());
        for expected in 0..3 {
            let summary = s.tick().unwrap();
            assert_eq!(summary.tick, expected);
            assert_eq!(s.world().phase(), TickPhase::Idle);
        }
        assert_eq!(s.world().tick(), 3);
    }
}
