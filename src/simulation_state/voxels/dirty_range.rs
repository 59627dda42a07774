use cgmath::{Point3, Vector3};

/// An inclusive box of voxel indices.
///
/// Carve jobs return one of these for the cells they actually changed, and the
/// dispatcher merges them per field until the tool's batch settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirtyRange {
    pub min: Point3<i32>,
    pub max: Point3<i32>,
}

impl DirtyRange {
    pub fn new(min: Point3<i32>, max: Point3<i32>) -> Self {
        DirtyRange { min, max }
    }

    /// A range covering one cell.
    pub fn single(cell: Point3<i32>) -> Self {
        DirtyRange {
            min: cell,
            max: cell,
        }
    }

    /// Every cell of a field with `size` cells per axis.
    pub fn whole(size: Vector3<i32>) -> Self {
        DirtyRange {
            min: Point3::new(0, 0, 0),
            max: Point3::new(size.x - 1, size.y - 1, size.z - 1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grows the range to cover `cell`.
    pub fn include(&mut self, cell: Point3<i32>) {
        self.min = Point3::new(
            self.min.x.min(cell.x),
            self.min.y.min(cell.y),
            self.min.z.min(cell.z),
        );
        self.max = Point3::new(
            self.max.x.max(cell.x),
            self.max.y.max(cell.y),
            self.max.z.max(cell.z),
        );
    }

    /// Bounding union of two ranges.
    pub fn merge(&self, other: &DirtyRange) -> DirtyRange {
        let mut merged = *self;
        merged.include(other.min);
        merged.include(other.max);
        merged
    }

    /// Overlap of two ranges, `None` when they don't meet.
    pub fn intersection(&self, other: &DirtyRange) -> Option<DirtyRange> {
        let range = DirtyRange {
            min: Point3::new(
                self.min.x.max(other.min.x),
                self.min.y.max(other.min.y),
                self.min.z.max(other.min.z),
            ),
            max: Point3::new(
                self.max.x.min(other.max.x),
                self.max.y.min(other.max.y),
                self.max.z.min(other.max.z),
            ),
        };
        (!range.is_empty()).then_some(range)
    }

    pub fn contains(&self, cell: Point3<i32>) -> bool {
        (self.min.x..=self.max.x).contains(&cell.x)
            && (self.min.y..=self.max.y).contains(&cell.y)
            && (self.min.z..=self.max.z).contains(&cell.z)
    }

    /// True if every cell of `self` is also in `other`.
    pub fn is_within(&self, other: &DirtyRange) -> bool {
        other.contains(self.min) && other.contains(self.max)
    }

    pub fn cell_count(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let extent = self.max - self.min;
        (extent.x as usize + 1) * (extent.y as usize + 1) * (extent.z as usize + 1)
    }

    /// Iterates every cell in x, then y, then z order.
    pub fn cells(&self) -> impl Iterator<Item = Point3<i32>> {
        let (min, max) = (self.min, self.max);
        (min.z..=max.z).flat_map(move |z| {
            (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| Point3::new(x, y, z)))
        })
    }
}
