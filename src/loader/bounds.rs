use glam::{Mat4, Vec3};

/// Axis-aligned bounds of a set of vertices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    /// Bounds containing nothing; the identity for [`BoundingBox::merge`].
    pub const fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Center of the box; the origin for an empty box.
    pub fn center(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            (self.min + self.max) / 2.0
        }
    }

    /// Largest extent across the three axes, floored to 1.0 when the box is
    /// empty, a single point, or too large or small to invert.
    pub fn largest_extent(&self) -> f32 {
        if self.is_empty() {
            return 1.0;
        }
        let extent = (self.max - self.min).max_element();
        if extent > 0.0 && extent.is_finite() && extent.recip().is_finite() {
            extent
        } else {
            1.0
        }
    }

    /// Transform taking mesh coordinates into a unit cube centered on the
    /// origin. Scaling is uniform, so proportions are preserved.
    pub fn normalization_transform(&self) -> Mat4 {
        let scale = Mat4::from_scale(Vec3::splat(1.0 / self.largest_extent()));
        let translate = Mat4::from_translation(-self.center());
        scale * translate
    }
}

impl FromIterator<BoundingBox> for BoundingBox {
    fn from_iter<I: IntoIterator<Item = BoundingBox>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::merge)
    }
}
