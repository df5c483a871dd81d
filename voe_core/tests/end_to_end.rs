//! End-to-end checks through the public API.

use nalgebra::Vector3;
use voe_core::{
    FnPredictor, FrameInput, FramewiseVoe, LastSeenPredictor, Observation, Plausibility, Position,
    PredictorError, QuerySet, SceneSession, TrainingSet, Violation, VoeConfig, BACKGROUND_ID,
};

fn origin() -> Position {
    Vector3::zeros()
}

/// Answers every query with the origin.
fn origin_predictor(
) -> FnPredictor<impl Fn(&TrainingSet, &QuerySet) -> Result<Vec<Position>, PredictorError>> {
    FnPredictor(|_: &TrainingSet, query: &QuerySet| -> Result<Vec<Position>, PredictorError> {
        Ok(vec![Vector3::zeros(); query.len()])
    })
}

#[test]
fn test_stationary_object_then_jump() {
    let mut voe = FramewiseVoe::new(VoeConfig::new(3, 8, 0.5), origin_predictor()).unwrap();

    for t in 0..5 {
        voe.record_obs(t, &[1], &[origin()], &[true], None).unwrap();
    }

    let violations = voe
        .detect(5, &[Vector3::new(1.0, 0.0, 0.0)], &[1])
        .unwrap()
        .expect("prediction available");

    assert_eq!(violations.len(), 1);
    match &violations[0] {
        Violation::Position(v) => {
            assert_eq!(v.object_id, 1);
            assert_eq!(v.predicted_position, origin());
            assert_eq!(v.actual_position, Vector3::new(1.0, 0.0, 0.0));
        }
        other => panic!("expected position violation, got {other:?}"),
    }
}

#[test]
fn test_stationary_object_in_place_is_plausible() {
    let mut voe = FramewiseVoe::new(VoeConfig::new(3, 8, 0.5), origin_predictor()).unwrap();
    for t in 0..5 {
        voe.record_obs(t, &[1], &[origin()], &[true], None).unwrap();
    }

    let violations = voe.detect(5, &[origin()], &[1]).unwrap();
    assert_eq!(violations, Some(vec![]));
}

#[test]
fn test_history_is_bounded_but_counts_survive() {
    let mut voe = FramewiseVoe::new(VoeConfig::new(3, 4, 0.5), LastSeenPredictor).unwrap();
    for t in 0..50 {
        voe.record_obs(t, &[1, 2], &[origin(), origin()], &[true, true], None)
            .unwrap();
    }

    assert_eq!(voe.history().retained_count(), 8);
    assert_eq!(voe.history().total_count(1), 50);
    assert_eq!(voe.training_set().len(), 8);
    assert_eq!(voe.training_set().count_per_id()[&1], 4);
}

#[test]
fn test_scene_session_verdict() {
    let mut session =
        SceneSession::new("e2e", VoeConfig::default(), LastSeenPredictor).unwrap();

    for t in 0..8u64 {
        let x = if t < 6 { 0.0 } else { 3.0 };
        let mut mask = voe_core::masks::blank_mask(2, 2);
        mask[(0, 0)] = 7;
        let input = FrameInput {
            time: t,
            mask,
            observations: vec![Observation::visible(t, 7, Vector3::new(x, 0.0, 0.0))],
            occluded: vec![],
        };
        let report = session.step(&input).unwrap();
        assert_eq!(report.voe_detected, t == 6);
        assert_eq!(report.voe_heatmap[(0, 0)], t == 6);
        assert!(!report.voe_heatmap[(1, 1)]);
    }

    let verdict = session.finish();
    assert_eq!(verdict.plausibility, Plausibility::Implausible);
    assert_eq!(verdict.frames_with_violations, 1);
    assert_eq!(BACKGROUND_ID, -1);
}
