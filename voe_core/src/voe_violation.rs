//! Violation taxonomy and heatmap aggregation.
//!
//! Violations form a closed set. Each kind can describe itself and paint
//! itself into a per-pixel heatmap; aggregation is a plain OR fold.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::VoeError;
use crate::masks::{self, Heatmap, ObjectMask};
use crate::voe_history::{ObjectId, Position};

/// A visible object whose position deviates from its prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionViolation {
    pub object_id: ObjectId,
    pub predicted_position: Position,
    pub actual_position: Position,
}

impl PositionViolation {
    /// Euclidean deviation between prediction and observation.
    pub fn error(&self) -> f64 {
        (self.actual_position - self.predicted_position).norm()
    }
}

/// An object that was expected but is missing from the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceViolation {
    pub object_id: ObjectId,
    pub predicted_position: Position,
}

/// A detected violation of expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    Position(PositionViolation),
    Presence(PresenceViolation),
}

impl Violation {
    pub fn position(object_id: ObjectId, predicted: Position, actual: Position) -> Self {
        Self::Position(PositionViolation {
            object_id,
            predicted_position: predicted,
            actual_position: actual,
        })
    }

    pub fn presence(object_id: ObjectId, predicted: Position) -> Self {
        Self::Presence(PresenceViolation {
            object_id,
            predicted_position: predicted,
        })
    }

    pub fn object_id(&self) -> ObjectId {
        match self {
            Self::Position(v) => v.object_id,
            Self::Presence(v) => v.object_id,
        }
    }

    pub fn predicted_position(&self) -> Position {
        match self {
            Self::Position(v) => v.predicted_position,
            Self::Presence(v) => v.predicted_position,
        }
    }

    /// Short kind label for logs and exports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Position(_) => "position",
            Self::Presence(_) => "presence",
        }
    }

    /// Human-readable report line.
    pub fn describe(&self) -> String {
        match self {
            Self::Position(v) => format!(
                "Object {} is at {}, but should be at {}",
                v.object_id,
                format_position(&v.actual_position),
                format_position(&v.predicted_position)
            ),
            Self::Presence(v) => format!(
                "Object {} is not visible, but should be at {}",
                v.object_id,
                format_position(&v.predicted_position)
            ),
        }
    }

    /// ORs this violation's region into `buffer`.
    ///
    /// Presence violations leave the buffer untouched: a missing object has
    /// no mask region.
    pub fn fill_heatmap(&self, buffer: &mut Heatmap, mask: &ObjectMask) -> Result<(), VoeError> {
        if buffer.shape() != mask.shape() {
            return Err(VoeError::ShapeMismatch {
                expected: mask.shape(),
                actual: buffer.shape(),
            });
        }
        self.paint(buffer, mask);
        Ok(())
    }

    fn paint(&self, buffer: &mut Heatmap, mask: &ObjectMask) {
        match self {
            Self::Position(v) => masks::or_region(buffer, mask, v.object_id),
            Self::Presence(_) => {}
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Formats a position as `(x, y, z)` with three decimals.
pub fn format_position(p: &Position) -> String {
    format!("({:.3}, {:.3}, {:.3})", p.x, p.y, p.z)
}

/// Folds violations into one heatmap shaped like `mask`.
///
/// `None` (undeterminable frame) and an empty list both give an all-false map.
pub fn make_voe_heatmap(violations: Option<&[Violation]>, mask: &ObjectMask) -> Heatmap {
    let mut heatmap = masks::empty_heatmap(mask);
    for v in violations.unwrap_or_default() {
        v.paint(&mut heatmap, mask);
    }
    heatmap
}

/// ORs together the mask regions of every occluded object.
pub fn make_occlusion_heatmap(
    occluded: impl IntoIterator<Item = ObjectId>,
    mask: &ObjectMask,
) -> Heatmap {
    let mut heatmap = masks::empty_heatmap(mask);
    for id in occluded {
        masks::or_region(&mut heatmap, mask, id);
    }
    heatmap
}

/// Report lines for every violation, empty for an undeterminable frame.
pub fn describe_all(violations: Option<&[Violation]>) -> Vec<String> {
    violations
        .unwrap_or_default()
        .iter()
        .map(Violation::describe)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::pixel_count;
    use nalgebra::{DMatrix, Vector3};

    fn mask() -> ObjectMask {
        DMatrix::from_row_slice(2, 3, &[1, 1, -1, 2, -1, 2])
    }

    #[test]
    fn test_describe() {
        let v = Violation::position(1, Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(
            v.describe(),
            "Object 1 is at (1.000, 0.000, 0.000), but should be at (0.000, 0.000, 0.000)"
        );

        let v = Violation::presence(4, Vector3::new(0.5, 2.0, -1.0));
        assert_eq!(
            v.to_string(),
            "Object 4 is not visible, but should be at (0.500, 2.000, -1.000)"
        );
    }

    #[test]
    fn test_position_fills_object_region() {
        let mask = mask();
        let mut buffer = crate::masks::empty_heatmap(&mask);
        Violation::position(2, Vector3::zeros(), Vector3::zeros())
            .fill_heatmap(&mut buffer, &mask)
            .unwrap();

        assert_eq!(pixel_count(&buffer), 2);
        assert!(buffer[(1, 0)] && buffer[(1, 2)]);
    }

    #[test]
    fn test_presence_is_noop() {
        let mask = mask();
        let mut buffer = crate::masks::empty_heatmap(&mask);
        Violation::presence(1, Vector3::zeros())
            .fill_heatmap(&mut buffer, &mask)
            .unwrap();
        assert_eq!(pixel_count(&buffer), 0);
    }

    #[test]
    fn test_fill_rejects_wrong_buffer_shape() {
        let mut buffer = DMatrix::from_element(3, 3, false);
        let err = Violation::presence(1, Vector3::zeros())
            .fill_heatmap(&mut buffer, &mask())
            .unwrap_err();
        assert!(matches!(err, VoeError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_heatmap_fold() {
        let mask = mask();
        let viols = vec![
            Violation::position(1, Vector3::zeros(), Vector3::zeros()),
            Violation::presence(2, Vector3::zeros()),
            Violation::position(2, Vector3::zeros(), Vector3::zeros()),
        ];

        let a = make_voe_heatmap(Some(viols.as_slice()), &mask);
        let b = make_voe_heatmap(Some(viols.as_slice()), &mask);
        assert_eq!(a, b);
        assert_eq!(pixel_count(&a), 4);
    }

    #[test]
    fn test_empty_and_absent_give_blank_heatmap() {
        let mask = mask();
        let none = make_voe_heatmap(None, &mask);
        let empty = make_voe_heatmap(Some(&[][..]), &mask);

        assert_eq!(none.shape(), (2, 3));
        assert_eq!(none, empty);
        assert_eq!(pixel_count(&none), 0);
    }

    #[test]
    fn test_occlusion_heatmap() {
        let mask = mask();
        let heat = make_occlusion_heatmap([1, 7], &mask);
        assert_eq!(pixel_count(&heat), 2);
        assert!(heat[(0, 0)] && heat[(0, 1)]);
    }

    #[test]
    fn test_describe_all() {
        assert!(describe_all(None).is_empty());
        let viols = vec![Violation::presence(3, Vector3::zeros())];
        assert_eq!(describe_all(Some(viols.as_slice())).len(), 1);
    }

    #[test]
    fn test_serde_tagging() {
        let v = Violation::presence(3, Vector3::zeros());
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "presence");
        assert_eq!(json["object_id"], 3);

        let back: Violation = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }
}
