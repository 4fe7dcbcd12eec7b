// Fixed-step movement integrator shared by the server and client worlds

use super::entity::{Entity, EntityId, Facing};
use super::map::CollisionMap;

/// Advance one entity by one fixed step
///
/// Each active direction flag contributes `speed` pixels on its axis; diagonals
/// are the plain sum (no normalization). The destination is only committed if the
/// map does not block it, otherwise the entity stays put for this step.
pub fn step_entity(entity: &mut Entity, map: &dyn CollisionMap, speed: f32) {
    let mut dx = 0.0;
    let mut dy = 0.0;
    if entity.controls.left {
        dx -= speed;
    }
    if entity.controls.right {
        dx += speed;
    }
    if entity.controls.up {
        dy -= speed;
    }
    if entity.controls.down {
        dy += speed;
    }

    let new_x = entity.x + dx;
    let new_y = entity.y + dy;

    entity.moving = new_x != entity.x || new_y != entity.y;
    if entity.moving {
        if dx < 0.0 {
            entity.facing = Facing::Left;
        } else if dx > 0.0 {
            entity.facing = Facing::Right;
        }
    }

    if !map.is_blocked(new_x, new_y) {
        entity.x = new_x;
        entity.y = new_y;
    }
}

/// Step every entity except `exclude`
pub fn step_all<'a, I>(entities: I, map: &dyn CollisionMap, speed: f32, exclude: Option<EntityId>)
where
    I: IntoIterator<Item = &'a mut Entity>,
{
    for entity in entities {
        if Some(entity.id) == exclude {
            continue;
        }
        step_entity(entity, map, speed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::entity::Controls;
    use crate::world::map::TileMap;
    use proptest::prelude::*;

    fn arena() -> TileMap {
        TileMap::bordered(10, 10, 10).unwrap()
    }

    #[test]
    fn test_diagonal_is_not_normalized() {
        let map = arena();
        let mut entity = Entity::new(1, 50.0, 50.0, 0);
        entity.controls = Controls { right: true, down: true, ..Default::default() };

        step_entity(&mut entity, &map, 3.0);

        assert_eq!((entity.x, entity.y), (53.0, 53.0));
        assert!(entity.moving);
        assert_eq!(entity.facing, Facing::Right);
    }

    #[test]
    fn test_opposite_flags_cancel() {
        let map = arena();
        let mut entity = Entity::new(1, 50.0, 50.0, 0);
        entity.facing = Facing::Left;
        entity.controls = Controls { left: true, right: true, ..Default::default() };

        step_entity(&mut entity, &map, 3.0);

        assert_eq!((entity.x, entity.y), (50.0, 50.0));
        assert!(!entity.moving);
        assert_eq!(entity.facing, Facing::Left);
    }

    #[test]
    fn test_vertical_motion_keeps_facing() {
        let map = arena();
        let mut entity = Entity::new(1, 50.0, 50.0, 0);
        entity.facing = Facing::Left;
        entity.controls = Controls { up: true, ..Default::default() };

        step_entity(&mut entity, &map, 2.0);

        assert_eq!(entity.y, 48.0);
        assert!(entity.moving);
        assert_eq!(entity.facing, Facing::Left);
    }

    #[test]
    fn test_blocked_destination_clamps_silently() {
        let map = arena();
        // one pixel from the left wall (tile 0 spans x 0..10)
        let mut entity = Entity::new(1, 11.0, 50.0, 0);
        entity.controls = Controls { left: true, ..Default::default() };

        step_entity(&mut entity, &map, 3.0);

        assert_eq!((entity.x, entity.y), (11.0, 50.0));
        assert!(entity.moving);
        assert_eq!(entity.facing, Facing::Left);
    }

    #[test]
    fn test_step_all_skips_excluded() {
        let map = arena();
        let mut a = Entity::new(1, 50.0, 50.0, 0);
        let mut b = Entity::new(2, 50.0, 50.0, 0);
        a.controls.right = true;
        b.controls.right = true;

        step_all([&mut a, &mut b], &map, 1.0, Some(2));

        assert_eq!(a.x, 51.0);
        assert_eq!(b.x, 50.0);
    }

    proptest! {
        #[test]
        fn prop_never_lands_on_blocked_tile(
            start_col in 1u32..9,
            start_row in 1u32..9,
            steps in proptest::collection::vec(0u16..16, 1..200),
            speed in 0.5f32..12.0,
        ) {
            let map = TileMap::from_ascii(
                "##########\n\
                 #........#\n\
                 #..##....#\n\
                 #..##..#.#\n\
                 #......#.#\n\
                 #.#......#\n\
                 #.#..###.#\n\
                 #........#\n\
                 #....#...#\n\
                 ##########",
                10,
            ).unwrap();
            let x = start_col as f32 * 10.0 + 5.0;
            let y = start_row as f32 * 10.0 + 5.0;
            prop_assume!(!map.is_blocked(x, y));

            let mut entity = Entity::new(1, x, y, 0);
            for bits in steps {
                entity.controls = Controls::from_bits(bits);
                step_entity(&mut entity, &map, speed);
                prop_assert!(!map.is_blocked(entity.x, entity.y));
            }
        }
    }
}
