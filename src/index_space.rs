use core::ops::Range;
use serde::Serialize;




/**
 * Represents a rectangular region in a discrete index space of any
 * dimensionality. The index type is signed 64-bit integer, so regions may
 * extend below zero into guard zones.
 */
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct IndexSpace {
    ranges: Vec<Range<i64>>,
}




// ============================================================================
impl IndexSpace {


    pub fn new(ranges: Vec<Range<i64>>) -> Self {
        Self { ranges }
    }


    /**
     * Return an index space starting at zero with the given number of indexes
     * on each axis.
     */
    pub fn from_shape(shape: &[usize]) -> Self {
        Self::new(shape.iter().map(|&n| 0..n as i64).collect())
    }


    /**
     * Return the number of axes.
     */
    pub fn rank(&self) -> usize {
        self.ranges.len()
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn dim(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| (r.end - r.start).max(0) as usize).collect()
    }


    /**
     * Return the number of elements in this index space. A rank-zero space
     * has exactly one element (the empty index).
     */
    pub fn len(&self) -> usize {
        self.dim().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    /**
     * Return the minimum index (inclusive).
     */
    pub fn start(&self) -> Vec<i64> {
        self.ranges.iter().map(|r| r.start).collect()
    }


    /**
     * Return the maximum index (exclusive).
     */
    pub fn end(&self) -> Vec<i64> {
        self.ranges.iter().map(|r| r.end).collect()
    }

    pub fn range(&self, axis: usize) -> &Range<i64> {
        &self.ranges[axis]
    }


    /**
     * Determine whether another index space is a subset of this one.
     */
    pub fn contains_space(&self, other: &Self) -> bool {
        other.rank() == self.rank()
            && self
                .ranges
                .iter()
                .zip(&other.ranges)
                .all(|(s, o)| o.start >= s.start && o.end <= s.end)
    }


    /**
     * Expand this index space by a per-axis number of elements.
     */
    pub fn extend_each(&self, delta: &[i64]) -> Self {
        Self::new(
            self.ranges
                .iter()
                .zip(delta)
                .map(|(r, d)| r.start - d..r.end + d)
                .collect(),
        )
    }


    /**
     * Return this index space translated by the given offset.
     */
    pub fn translate(&self, offset: &[i64]) -> Self {
        Self::new(
            self.ranges
                .iter()
                .zip(offset)
                .map(|(r, o)| r.start + o..r.end + o)
                .collect(),
        )
    }


    /**
     * Determine whether this index space shares any index with another.
     */
    pub fn intersects(&self, other: &Self) -> bool {
        self.rank() == other.rank()
            && !self.is_empty()
            && !other.is_empty()
            && self
                .ranges
                .iter()
                .zip(&other.ranges)
                .all(|(a, b)| a.start < b.end && b.start < a.end)
    }


    /**
     * Return the signed linear stride distance, in the row-major buffer of
     * this index space, of a relative offset.
     */
    pub fn row_major_stride(&self, offset: &[i64]) -> i64 {
        self.ranges.iter().zip(offset).fold(0, |acc, (r, o)| acc * (r.end - r.start) + o)
    }


    /**
     * Return an iterator which traverses the index space in row-major order
     * (C-like; the final index increases fastest).
     */
    pub fn iter(&self) -> impl Iterator<Item = Vec<i64>> + '_ {
        (0..self.len()).map(move |n| self.index_at(n))
    }


    /**
     * Return the n-th index in row-major order.
     */
    pub fn index_at(&self, n: usize) -> Vec<i64> {
        let dim = self.dim();
        let mut index = vec![0; self.rank()];
        let mut rest = n;
        for axis in (0..self.rank()).rev() {
            index[axis] = self.ranges[axis].start + (rest % dim[axis]) as i64;
            rest /= dim[axis];
        }
        index
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::IndexSpace;

    #[test]
    fn traversal_is_row_major() {
        let space = IndexSpace::new(vec![0..2, 0..3]);
        let indexes: Vec<_> = space.iter().collect();
        assert_eq!(indexes.len(), 6);
        assert_eq!(indexes[0], vec![0, 0]);
        assert_eq!(indexes[1], vec![0, 1]);
        assert_eq!(indexes[3], vec![1, 0]);
        assert_eq!(indexes[5], vec![1, 2]);
    }

    #[test]
    fn rank_zero_space_has_one_element() {
        let space = IndexSpace::new(vec![]);
        assert_eq!(space.len(), 1);
        assert_eq!(space.iter().collect::<Vec<_>>(), vec![Vec::<i64>::new()]);
    }

    #[test]
    fn row_major_strides_match_traversal() {
        let space = IndexSpace::new(vec![-1..3, 2..5, 0..2]);
        assert_eq!(space.row_major_stride(&[0, 1, 0]), 2);
        assert_eq!(space.row_major_stride(&[1, 0, 0]), 6);
        assert_eq!(space.row_major_stride(&[-1, 1, 1]), -3);
        assert_eq!(space.index_at(2 + 6), vec![0, 3, 0]);
        assert_eq!(space.index_at(space.len() - 1), vec![2, 4, 1]);
    }

    #[test]
    fn extension_and_containment_work() {
        let space = IndexSpace::from_shape(&[10, 4]);
        let halo = space.extend_each(&[2, 1]);
        assert_eq!(halo.start(), vec![-2, -1]);
        assert_eq!(halo.end(), vec![12, 5]);
        assert!(halo.contains_space(&space));
        assert!(!space.contains_space(&halo));
        assert_eq!(halo.len(), 14 * 6);
    }

    #[test]
    fn translated_spaces_intersect_where_expected() {
        let interior = IndexSpace::from_shape(&[10]);
        let ghost = IndexSpace::new(vec![-1..0]);
        assert!(!interior.intersects(&ghost));
        assert!(interior.translate(&[-1]).intersects(&ghost));
        assert!(!IndexSpace::new(vec![0..0]).intersects(&interior));
    }
}
