//! Networked field groups with per-field dirty tracking
//!
//! Each group owns a plain values struct plus a dirty bitmask. Setters only
//! mark a bit when the stored value actually changes, so writing a field
//! several times in one tick coalesces into a single delta carrying the last
//! value. Reading `values()` never marks anything. The encoder collects the
//! deltas after the tick and the scheduler clears every mask once all
//! viewers have been served.

use crate::game::entity::EntityId;
use crate::net::protocol::{FieldValue, GroupDelta};

/// Set of changed fields in one group (bit i = field i)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyMask(u32);

impl DirtyMask {
    pub const EMPTY: DirtyMask = DirtyMask(0);

    #[inline]
    pub fn mark(&mut self, bit: u32) {
        self.0 |= 1 << bit;
    }

    #[inline]
    pub fn contains(self, bit: u32) -> bool {
        self.0 & (1 << bit) != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Conversion into the wire representation of a single field
pub trait IntoFieldValue {
    fn into_field_value(self) -> FieldValue;
}

impl IntoFieldValue for f32 {
    fn into_field_value(self) -> FieldValue {
        FieldValue::F32(self)
    }
}

impl IntoFieldValue for u32 {
    fn into_field_value(self) -> FieldValue {
        FieldValue::U32(self)
    }
}

impl IntoFieldValue for Option<EntityId> {
    fn into_field_value(self) -> FieldValue {
        FieldValue::Entity(self)
    }
}

/// Declares a values struct and its dirty-tracking group
///
/// Every field gets an explicit setter name and a fixed wire bit.
macro_rules! field_group {
    (
        $(#[$meta:meta])*
        pub struct $group:ident($values:ident) = $id:literal {
            $( $bit:literal => $field:ident : $ty:ty = $default:expr, $setter:ident; )*
        }
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub struct $values {
            $( pub $field: $ty, )*
        }

        impl Default for $values {
            fn default() -> Self {
                Self { $( $field: $default, )* }
            }
        }

        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        pub struct $group {
            values: $values,
            dirty: DirtyMask,
        }

        impl $group {
            /// Wire id of this group
            pub const ID: u8 = $id;
            /// Mask covering every field of the group
            pub const FULL_MASK: u32 = 0 $( | (1 << $bit) )*;

            /// Group starts clean; creations always carry a full snapshot
            pub fn new(values: $values) -> Self {
                Self { values, dirty: DirtyMask::EMPTY }
            }

            #[inline]
            pub fn values(&self) -> &$values {
                &self.values
            }

            /// Mutate without marking anything dirty. Only valid before the
            /// entity is first observed by a viewer.
            #[inline]
            pub fn values_mut_untracked(&mut self) -> &mut $values {
                &mut self.values
            }

            #[inline]
            pub fn dirty(&self) -> DirtyMask {
                self.dirty
            }

            #[inline]
            pub fn is_dirty(&self) -> bool {
                !self.dirty.is_empty()
            }

            #[inline]
            pub fn clear_dirty(&mut self) {
                self.dirty.clear();
            }

            $(
                #[inline]
                pub fn $setter(&mut self, value: $ty) {
                    if self.values.$field != value {
                        self.values.$field = value;
                        self.dirty.mark($bit);
                    }
                }
            )*

            /// Encode the fields selected by `mask` in bit order
            pub fn encode(&self, mask: u32) -> GroupDelta {
                let mut values = Vec::new();
                $(
                    if mask & (1 << $bit) != 0 {
                        values.push(self.values.$field.into_field_value());
                    }
                )*
                GroupDelta { group: Self::ID, mask: mask & Self::FULL_MASK, values }
            }

            pub fn snapshot(&self) -> GroupDelta {
                self.encode(Self::FULL_MASK)
            }

            /// Changed fields since the last clear, if any
            pub fn delta(&self) -> Option<GroupDelta> {
                self.is_dirty().then(|| self.encode(self.dirty.bits()))
            }
        }
    };
}

/// Adds or-in / xor-out / toggle helpers for a group's packed `flags` field
macro_rules! flag_field {
    ($group:ident) => {
        impl $group {
            /// Or the given bits in
            #[inline]
            pub fn add_flags(&mut self, flags: u32) {
                self.set_flags(self.values.flags | flags);
            }

            /// Xor out whichever of the given bits are currently set
            #[inline]
            pub fn remove_flags(&mut self, flags: u32) {
                let set = self.values.flags & flags;
                if set != 0 {
                    self.set_flags(self.values.flags ^ set);
                }
            }

            #[inline]
            pub fn toggle_flags(&mut self, flags: u32) {
                self.set_flags(self.values.flags ^ flags);
            }

            #[inline]
            pub fn has_flags(&self, flags: u32) -> bool {
                self.values.flags & flags == flags
            }
        }
    };
}

field_group! {
    /// Relationship edges (weak references only)
    pub struct RelationsGroup(Relations) = 0 {
        0 => parent: Option<EntityId> = None, set_parent;
        1 => owner: Option<EntityId> = None, set_owner;
        2 => team: Option<EntityId> = None, set_team;
    }
}

field_group! {
    /// Local transform (relative to the parent when one exists)
    pub struct PositionGroup(Position) = 1 {
        0 => x: f32 = 0.0, set_x;
        1 => y: f32 = 0.0, set_y;
        2 => angle: f32 = 0.0, set_angle;
        3 => flags: u32 = 0, set_flags;
    }
}

field_group! {
    /// Shape and collision response
    pub struct PhysicsGroup(Physics) = 2 {
        0 => sides: u32 = 1, set_sides;
        1 => size: f32 = 0.0, set_size;
        2 => width: f32 = 0.0, set_width;
        3 => flags: u32 = 0, set_flags;
        4 => push_factor: f32 = crate::game::constants::physics::DEFAULT_PUSH_FACTOR, set_push_factor;
        5 => absorption_factor: f32 = 1.0, set_absorption_factor;
    }
}

field_group! {
    pub struct StyleGroup(Style) = 3 {
        0 => flags: u32 = crate::game::constants::style_flags::IS_VISIBLE, set_flags;
        1 => color: u32 = 0, set_color;
        2 => opacity: f32 = 1.0, set_opacity;
        3 => z_index: u32 = 0, set_z_index;
    }
}

field_group! {
    pub struct HealthGroup(Health) = 4 {
        0 => flags: u32 = 0, set_flags;
        1 => health: f32 = 1.0, set_health;
        2 => max_health: f32 = 1.0, set_max_health;
    }
}

field_group! {
    /// Arena bounds, carried only by the arena entity
    pub struct ArenaGroup(ArenaBounds) = 5 {
        0 => flags: u32 = 0, set_flags;
        1 => left_x: f32 = 0.0, set_left_x;
        2 => right_x: f32 = 0.0, set_right_x;
        3 => top_y: f32 = 0.0, set_top_y;
        4 => bottom_y: f32 = 0.0, set_bottom_y;
    }
}

flag_field!(PositionGroup);
flag_field!(PhysicsGroup);
flag_field!(StyleGroup);
flag_field!(HealthGroup);
flag_field!(ArenaGroup);

impl HealthGroup {
    pub fn with_max(max_health: f32) -> Self {
        Self::new(Health {
            flags: 0,
            health: max_health,
            max_health,
        })
    }

    /// Current health as a fraction of max (0 when max is not positive)
    pub fn ratio(&self) -> f32 {
        if self.values.max_health > 0.0 {
            self.values.health / self.values.max_health
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::physics_flags::*;

    #[test]
    fn test_new_group_is_clean() {
        let group = PositionGroup::new(Position {
            x: 5.0,
            ..Default::default()
        });
        assert!(!group.is_dirty());
        assert_eq!(group.delta(), None);
    }

    #[test]
    fn test_setter_marks_only_its_bit() {
        let mut group = PositionGroup::default();
        group.set_y(3.0);
        assert!(group.dirty().contains(1));
        assert!(!group.dirty().contains(0));
        assert_eq!(group.dirty().bits(), 0b10);
    }

    #[test]
    fn test_unchanged_write_is_not_dirty() {
        let mut group = PhysicsGroup::default();
        group.set_sides(1);
        assert!(!group.is_dirty());
    }

    #[test]
    fn test_writes_coalesce_to_final_value() {
        let mut group = PositionGroup::default();
        group.set_x(10.0);
        group.set_x(20.0);
        group.set_x(30.0);

        let delta = group.delta().unwrap();
        assert_eq!(delta.mask, 0b1);
        assert_eq!(delta.values, vec![FieldValue::F32(30.0)]);
    }

    #[test]
    fn test_reading_values_does_not_mark() {
        let mut group = StyleGroup::default();
        let _ = group.values().opacity;
        assert!(!group.is_dirty());
        group.values_mut_untracked().opacity = 0.5;
        assert!(!group.is_dirty());
        assert_eq!(group.values().opacity, 0.5);
    }

    #[test]
    fn test_clear_dirty() {
        let mut group = HealthGroup::with_max(100.0);
        group.set_health(40.0);
        assert!(group.is_dirty());
        group.clear_dirty();
        assert!(!group.is_dirty());
        assert_eq!(group.values().health, 40.0);
    }

    #[test]
    fn test_snapshot_contains_every_field() {
        let group = PhysicsGroup::default();
        let snapshot = group.snapshot();
        assert_eq!(snapshot.group, PhysicsGroup::ID);
        assert_eq!(snapshot.mask, 0b11_1111);
        assert_eq!(snapshot.values.len(), 6);
        assert_eq!(snapshot.values[0], FieldValue::U32(1));
    }

    #[test]
    fn test_relations_encode_entity_refs() {
        let mut group = RelationsGroup::default();
        let owner = EntityId::new(9, 2);
        group.set_owner(Some(owner));
        let delta = group.delta().unwrap();
        assert_eq!(delta.mask, 0b10);
        assert_eq!(delta.values, vec![FieldValue::Entity(Some(owner))]);
    }

    #[test]
    fn test_flag_or_in_and_xor_out() {
        let mut group = PhysicsGroup::default();
        group.add_flags(NO_OWN_TEAM_COLLISION | CAN_ESCAPE_ARENA);
        assert!(group.has_flags(NO_OWN_TEAM_COLLISION));
        assert!(group.has_flags(CAN_ESCAPE_ARENA));
        group.clear_dirty();

        // Removing a bit that is not set must not toggle it on
        group.remove_flags(ONLY_SAME_OWNER_COLLISION);
        assert!(!group.has_flags(ONLY_SAME_OWNER_COLLISION));
        assert!(!group.is_dirty());

        group.remove_flags(CAN_ESCAPE_ARENA);
        assert!(!group.has_flags(CAN_ESCAPE_ARENA));
        assert!(group.has_flags(NO_OWN_TEAM_COLLISION));
        assert!(group.dirty().contains(3));
    }

    #[test]
    fn test_flag_dirty_only_when_toggled() {
        let mut group = PhysicsGroup::default();
        group.add_flags(BASE);
        group.clear_dirty();
        group.add_flags(BASE);
        assert!(!group.is_dirty());
        group.toggle_flags(BASE);
        assert!(group.is_dirty());
        assert!(!group.has_flags(BASE));
    }

    #[test]
    fn test_health_ratio() {
        let mut group = HealthGroup::with_max(80.0);
        group.set_health(20.0);
        assert!((group.ratio() - 0.25).abs() < 1e-6);
        group.set_max_health(0.0);
        assert_eq!(group.ratio(), 0.0);
    }
}
