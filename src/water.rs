use crate::prelude::*;

/// A water volume. Sliding characters whose floor probe ends inside one stop sliding.
#[derive(Reflect, Component, Default)]
#[require(Sensor, Transform, GlobalTransform)]
#[reflect(Component)]
pub struct Water;

/// Whether `point` lies inside any of the `waters`.
pub(crate) fn contains<'a>(
    waters: impl IntoIterator<Item = (&'a Collider, &'a Position, &'a Rotation)>,
    point: Vec3,
) -> bool {
    waters
        .into_iter()
        .any(|(collider, position, rotation)| collider.contains_point(*position, *rotation, point))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_inside_a_volume() {
        let pool = Collider::cuboid(4.0, 2.0, 4.0);
        let position = Position::new(Vec3::new(0.0, -1.0, 0.0));
        let rotation = Rotation::default();
        let waters = [(&pool, &position, &rotation)];
        assert!(contains(waters, Vec3::new(1.0, -0.5, 1.0)));
        assert!(!contains(waters, Vec3::new(1.0, 0.5, 1.0)));
    }
}
