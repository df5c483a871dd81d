//! Per-pixel object-id masks and boolean heatmaps.
//!
//! Masks come from the segmentation/identity collaborators; the engine only
//! reads them to paint violation and occlusion regions.

use nalgebra::DMatrix;
use std::collections::BTreeSet;

use crate::error::VoeError;
use crate::voe_history::ObjectId;

/// Mask value for pixels that belong to no object.
pub const BACKGROUND_ID: ObjectId = -1;

/// Per-pixel object ids, `BACKGROUND_ID` where empty.
pub type ObjectMask = DMatrix<ObjectId>;

/// Per-pixel boolean indicator buffer.
pub type Heatmap = DMatrix<bool>;

/// All-false heatmap with the mask's shape.
pub fn empty_heatmap(mask: &ObjectMask) -> Heatmap {
    DMatrix::from_element(mask.nrows(), mask.ncols(), false)
}

/// Background-only mask.
pub fn blank_mask(rows: usize, cols: usize) -> ObjectMask {
    DMatrix::from_element(rows, cols, BACKGROUND_ID)
}

/// Pixels whose mask value equals `id`.
pub fn region(mask: &ObjectMask, id: ObjectId) -> Heatmap {
    mask.map(|v| v == id)
}

fn check_shape(expected: (usize, usize), actual: (usize, usize)) -> Result<(), VoeError> {
    if expected != actual {
        return Err(VoeError::ShapeMismatch { expected, actual });
    }
    Ok(())
}

/// ORs the mask region of `id` into `buffer`. Shapes must already agree.
pub(crate) fn or_region(buffer: &mut Heatmap, mask: &ObjectMask, id: ObjectId) {
    for (cell, &value) in buffer.iter_mut().zip(mask.iter()) {
        *cell |= value == id;
    }
}

/// Number of set pixels.
pub fn pixel_count(heatmap: &Heatmap) -> usize {
    heatmap.iter().filter(|&&v| v).count()
}

/// Flattens per-object boolean masks into one id mask.
///
/// Later masks overwrite earlier ones where they overlap.
pub fn squash_masks(
    rows: usize,
    cols: usize,
    masks: &[(ObjectId, Heatmap)],
) -> Result<ObjectMask, VoeError> {
    let mut flat = blank_mask(rows, cols);
    for (id, m) in masks {
        check_shape((rows, cols), m.shape())?;
        for (cell, &hit) in flat.iter_mut().zip(m.iter()) {
            if hit {
                *cell = *id;
            }
        }
    }
    Ok(flat)
}

/// Splits an id mask into per-object masks, ascending by id.
pub fn separate_object_masks(mask: &ObjectMask) -> Vec<(ObjectId, Heatmap)> {
    let ids: BTreeSet<ObjectId> = mask.iter().copied().filter(|&v| v != BACKGROUND_ID).collect();
    ids.into_iter().map(|id| (id, region(mask, id))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mask() -> ObjectMask {
        DMatrix::from_row_slice(3, 3, &[-1, 1, 1, -1, 2, -1, 3, 3, -1])
    }

    #[test]
    fn test_region_and_count() {
        let mask = sample_mask();
        assert_eq!(pixel_count(&region(&mask, 1)), 2);
        assert_eq!(pixel_count(&region(&mask, 4)), 0);
        assert_eq!(pixel_count(&empty_heatmap(&mask)), 0);
    }

    #[test]
    fn test_separate_then_squash_restores_mask() {
        let mask = sample_mask();
        let parts = separate_object_masks(&mask);
        assert_eq!(parts.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 2, 3]);

        let rebuilt = squash_masks(3, 3, &parts).unwrap();
        assert_eq!(rebuilt, mask);
    }

    #[test]
    fn test_squash_later_masks_win() {
        let all = DMatrix::from_element(2, 2, true);
        let mut corner = DMatrix::from_element(2, 2, false);
        corner[(0, 0)] = true;

        let flat = squash_masks(2, 2, &[(5, all), (9, corner)]).unwrap();
        assert_eq!(flat[(0, 0)], 9);
        assert_eq!(flat[(1, 1)], 5);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let wrong = DMatrix::from_element(1, 4, true);
        let err = squash_masks(2, 2, &[(1, wrong)]).unwrap_err();
        assert_eq!(
            err,
            VoeError::ShapeMismatch {
                expected: (2, 2),
                actual: (1, 4)
            }
        );
    }
}
