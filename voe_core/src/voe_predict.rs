//! The "PREDICT" Gateway - adapter around the external position predictor
//!
//! The predictor is an opaque strategy: it receives the filtered training
//! history plus one `(time, id)` query per known object and must answer with
//! exactly one position per query. The gateway:
//! - never calls the predictor with an empty training set
//! - turns predictor failures into an undeterminable frame (`Ok(None)`)
//! - rejects answers of the wrong length as a fatal contract breach
//! - marks which answers are backed by training data (`relevance`)

use crossbeam::channel::{self, RecvTimeoutError};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{PredictorError, VoeError};
use crate::voe_filter::TrainingSet;
use crate::voe_history::{FrameTime, ObjectId, Position};

// ============================================================================
// QUERY / ANSWER
// ============================================================================

/// One query per object: "where is `ids[i]` at `times[i]`?"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySet {
    pub times: Vec<FrameTime>,
    pub ids: Vec<ObjectId>,
}

impl QuerySet {
    /// Pairs every id with the same query time.
    pub fn at_time(time: FrameTime, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        let ids: Vec<ObjectId> = ids.into_iter().collect();
        Self {
            times: vec![time; ids.len()],
            ids,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (FrameTime, ObjectId)> + '_ {
        self.times.iter().copied().zip(self.ids.iter().copied())
    }
}

/// Predictor output aligned with its query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub ids: Vec<ObjectId>,
    pub positions: Vec<Position>,

    /// `relevance[i]` is true iff `ids[i]` had training data
    pub relevance: Vec<bool>,
}

impl Prediction {
    /// Predictions that may be compared against observations, in predictor order.
    pub fn relevant(&self) -> impl Iterator<Item = (ObjectId, Position)> + '_ {
        self.ids
            .iter()
            .zip(&self.positions)
            .zip(&self.relevance)
            .filter(|(_, relevant)| **relevant)
            .map(|((&id, &pos), _)| (id, pos))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

// ============================================================================
// PREDICTOR CONTRACT
// ============================================================================

/// External position predictor.
///
/// Implementations must return one position per query, in query order, and
/// must behave as a pure function of their inputs.
pub trait PositionPredictor {
    fn predict(
        &self,
        training: &TrainingSet,
        query: &QuerySet,
    ) -> Result<Vec<Position>, PredictorError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "predictor"
    }
}

impl<P: PositionPredictor + ?Sized> PositionPredictor for Box<P> {
    fn predict(
        &self,
        training: &TrainingSet,
        query: &QuerySet,
    ) -> Result<Vec<Position>, PredictorError> {
        (**self).predict(training, query)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<P: PositionPredictor + ?Sized> PositionPredictor for Arc<P> {
    fn predict(
        &self,
        training: &TrainingSet,
        query: &QuerySet,
    ) -> Result<Vec<Position>, PredictorError> {
        (**self).predict(training, query)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Adapts a closure into a predictor.
pub struct FnPredictor<F>(pub F);

impl<F> PositionPredictor for FnPredictor<F>
where
    F: Fn(&TrainingSet, &QuerySet) -> Result<Vec<Position>, PredictorError>,
{
    fn predict(
        &self,
        training: &TrainingSet,
        query: &QuerySet,
    ) -> Result<Vec<Position>, PredictorError> {
        (self.0)(training, query)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

/// Answer used for queries without any training rows.
fn unbacked() -> Position {
    Vector3::from_element(f64::NAN)
}

/// Groups training rows by id as `(time, position)` lists.
fn rows_by_id(training: &TrainingSet) -> HashMap<ObjectId, Vec<(FrameTime, Position)>> {
    let mut grouped: HashMap<ObjectId, Vec<(FrameTime, Position)>> = HashMap::new();
    for (t, id, p) in training.rows() {
        grouped.entry(id).or_default().push((t, p));
    }
    grouped
}

// ============================================================================
// BUILT-IN PREDICTORS
// ============================================================================

/// Predicts that every object stays where it was last seen.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastSeenPredictor;

impl PositionPredictor for LastSeenPredictor {
    fn predict(
        &self,
        training: &TrainingSet,
        query: &QuerySet,
    ) -> Result<Vec<Position>, PredictorError> {
        let mut last: HashMap<ObjectId, (FrameTime, Position)> = HashMap::new();
        for (t, id, p) in training.rows() {
            // First row wins on equal times
            match last.get(&id) {
                Some((seen, _)) if *seen >= t => {}
                _ => {
                    last.insert(id, (t, p));
                }
            }
        }

        Ok(query
            .ids
            .iter()
            .map(|id| last.get(id).map_or_else(unbacked, |(_, p)| *p))
            .collect())
    }

    fn name(&self) -> &str {
        "last_seen"
    }
}

/// Constant-velocity extrapolation from a least-squares line fit per object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantVelocityPredictor;

impl ConstantVelocityPredictor {
    /// Fits `p(t) = mean + v * (t - t_mean)` and evaluates it at `time`.
    pub fn extrapolate(rows: &[(FrameTime, Position)], time: FrameTime) -> Option<Position> {
        if rows.is_empty() {
            return None;
        }

        let n = rows.len() as f64;
        let t_mean = rows.iter().map(|(t, _)| *t as f64).sum::<f64>() / n;
        let p_mean = rows.iter().fold(Position::zeros(), |acc, (_, p)| acc + p) / n;

        let mut cov: Position = Vector3::zeros();
        let mut var = 0.0;
        for (t, p) in rows {
            let dt = *t as f64 - t_mean;
            cov += (p - p_mean) * dt;
            var += dt * dt;
        }

        // Single sample or a single time: no velocity information
        if var < 1e-12 {
            return Some(p_mean);
        }

        let velocity = cov / var;
        Some(p_mean + velocity * (time as f64 - t_mean))
    }
}

impl PositionPredictor for ConstantVelocityPredictor {
    fn predict(
        &self,
        training: &TrainingSet,
        query: &QuerySet,
    ) -> Result<Vec<Position>, PredictorError> {
        let grouped = rows_by_id(training);

        Ok(query
            .pairs()
            .map(|(time, id)| {
                grouped
                    .get(&id)
                    .and_then(|rows| Self::extrapolate(rows, time))
                    .unwrap_or_else(unbacked)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "constant_velocity"
    }
}

/// Runs an inner predictor on a worker thread with a bounded wait.
///
/// A late, panicking or vanished worker becomes a `PredictorError`, which the
/// gateway turns into an undeterminable frame.
///
/// Threads cannot be cancelled: a worker that misses the deadline keeps
/// running in the background until the inner predictor returns, and its
/// answer is dropped.
pub struct TimeoutPredictor<P> {
    inner: Arc<P>,
    timeout: Duration,
}

impl<P> TimeoutPredictor<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<P> PositionPredictor for TimeoutPredictor<P>
where
    P: PositionPredictor + Send + Sync + 'static,
{
    fn predict(
        &self,
        training: &TrainingSet,
        query: &QuerySet,
    ) -> Result<Vec<Position>, PredictorError> {
        let (tx, rx) = channel::bounded(1);
        let inner = Arc::clone(&self.inner);
        let training = training.clone();
        let query = query.clone();

        std::thread::Builder::new()
            .name("voe-predictor".to_string())
            .spawn(move || {
                // Receiver may already have given up
                let _ = tx.send(inner.predict(&training, &query));
            })
            .map_err(|e| PredictorError::failed(format!("spawn failed: {}", e)))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(PredictorError::Timeout(self.timeout.as_millis() as u64))
            }
            Err(RecvTimeoutError::Disconnected) => Err(PredictorError::Disconnected),
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ============================================================================
// GATEWAY
// ============================================================================

/// Calls the predictor once and aligns its answer with the query.
///
/// Returns `Ok(None)` when there is no training data or the predictor failed
/// or panicked.
pub fn invoke_predictor<P: PositionPredictor + ?Sized>(
    predictor: &P,
    training: &TrainingSet,
    query: &QuerySet,
) -> Result<Option<Prediction>, VoeError> {
    if training.is_empty() {
        debug!("no eligible history, skipping {}", predictor.name());
        return Ok(None);
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| predictor.predict(training, query)));
    let positions = match outcome {
        Ok(Ok(positions)) => positions,
        Ok(Err(e)) => {
            warn!("{} failed, frame undeterminable: {}", predictor.name(), e);
            return Ok(None);
        }
        Err(payload) => {
            warn!(
                "{} panicked, frame undeterminable: {}",
                predictor.name(),
                panic_message(payload.as_ref())
            );
            return Ok(None);
        }
    };

    if positions.len() != query.len() {
        return Err(VoeError::PredictionShape {
            expected: query.len(),
            actual: positions.len(),
        });
    }

    let backed = training.id_set();
    let relevance = query.ids.iter().map(|id| backed.contains(id)).collect();

    Ok(Some(Prediction {
        ids: query.ids.clone(),
        positions,
        relevance,
    }))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::cell::Cell;

    fn training(rows: &[(FrameTime, ObjectId, [f64; 3])]) -> TrainingSet {
        TrainingSet {
            times: rows.iter().map(|r| r.0).collect(),
            ids: rows.iter().map(|r| r.1).collect(),
            positions: rows.iter().map(|r| Vector3::from(r.2)).collect(),
        }
    }

    #[test]
    fn test_empty_training_never_calls_predictor() {
        let calls = Cell::new(0);
        let predictor = FnPredictor(
            |_: &TrainingSet, q: &QuerySet| -> Result<Vec<Position>, PredictorError> {
                calls.set(calls.get() + 1);
                Ok(vec![Vector3::zeros(); q.len()])
            },
        );

        let query = QuerySet::at_time(5, [1, 2]);
        let result = invoke_predictor(&predictor, &TrainingSet::default(), &query).unwrap();
        assert!(result.is_none());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_relevance_mask_marks_backed_ids() {
        let train = training(&[(0, 1, [0.0, 0.0, 0.0]), (1, 1, [0.0, 0.0, 0.0])]);
        let query = QuerySet::at_time(2, [1, 2, 3]);

        let pred = invoke_predictor(&LastSeenPredictor, &train, &query)
            .unwrap()
            .unwrap();
        assert_eq!(pred.ids, vec![1, 2, 3]);
        assert_eq!(pred.relevance, vec![true, false, false]);
        assert_eq!(pred.relevant().count(), 1);
    }

    #[test]
    fn test_shape_mismatch_is_fatal() {
        let train = training(&[(0, 1, [0.0, 0.0, 0.0])]);
        let query = QuerySet::at_time(1, [1, 2]);
        let short = FnPredictor(
            |_: &TrainingSet, _: &QuerySet| -> Result<Vec<Position>, PredictorError> {
                Ok(vec![Vector3::zeros()])
            },
        );

        let err = invoke_predictor(&short, &train, &query).unwrap_err();
        assert_eq!(err, VoeError::PredictionShape { expected: 2, actual: 1 });
        assert!(err.is_predictor_contract());
    }

    #[test]
    fn test_predictor_failure_is_undeterminable() {
        let train = training(&[(0, 1, [0.0, 0.0, 0.0])]);
        let query = QuerySet::at_time(1, [1]);
        let broken = FnPredictor(
            |_: &TrainingSet, _: &QuerySet| -> Result<Vec<Position>, PredictorError> {
                Err(PredictorError::failed("model offline"))
            },
        );

        assert_eq!(invoke_predictor(&broken, &train, &query).unwrap(), None);
    }

    #[test]
    fn test_last_seen_uses_latest_time() {
        let train = training(&[
            (1, 7, [1.0, 0.0, 0.0]),
            (4, 7, [4.0, 0.0, 0.0]),
            (2, 7, [2.0, 0.0, 0.0]),
        ]);
        let out = LastSeenPredictor
            .predict(&train, &QuerySet::at_time(5, [7, 8]))
            .unwrap();
        assert_eq!(out[0], Vector3::new(4.0, 0.0, 0.0));
        assert!(out[1].x.is_nan());
    }

    #[test]
    fn test_constant_velocity_extrapolates() {
        let train = training(&[
            (3, 1, [3.0, 6.0, 0.0]),
            (2, 1, [2.0, 4.0, 0.0]),
            (1, 1, [1.0, 2.0, 0.0]),
        ]);
        let out = ConstantVelocityPredictor
            .predict(&train, &QuerySet::at_time(5, [1]))
            .unwrap();
        assert_relative_eq!(out[0].x, 5.0, epsilon = 1e-9);
        assert_relative_eq!(out[0].y, 10.0, epsilon = 1e-9);
        assert_relative_eq!(out[0].z, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_constant_velocity_single_sample() {
        let rows = [(4, Vector3::new(1.0, 1.0, 1.0))];
        let p = ConstantVelocityPredictor::extrapolate(&rows, 10).unwrap();
        assert_eq!(p, Vector3::new(1.0, 1.0, 1.0));
        assert!(ConstantVelocityPredictor::extrapolate(&[], 10).is_none());
    }

    struct Sleepy(Duration);

    impl PositionPredictor for Sleepy {
        fn predict(
            &self,
            _training: &TrainingSet,
            query: &QuerySet,
        ) -> Result<Vec<Position>, PredictorError> {
            std::thread::sleep(self.0);
            Ok(vec![Vector3::zeros(); query.len()])
        }
    }

    struct Panicky;

    impl PositionPredictor for Panicky {
        fn predict(
            &self,
            _training: &TrainingSet,
            _query: &QuerySet,
        ) -> Result<Vec<Position>, PredictorError> {
            panic!("model crashed");
        }
    }

    #[test]
    fn test_timeout_predictor_fails_fast() {
        let train = training(&[(0, 1, [0.0, 0.0, 0.0])]);
        let query = QuerySet::at_time(1, [1]);
        let slow = TimeoutPredictor::new(Sleepy(Duration::from_millis(500)), Duration::from_millis(20));

        assert_eq!(slow.predict(&train, &query), Err(PredictorError::Timeout(20)));
        assert_eq!(invoke_predictor(&slow, &train, &query).unwrap(), None);
    }

    #[test]
    fn test_timeout_predictor_passes_through() {
        let train = training(&[(0, 1, [2.0, 0.0, 0.0])]);
        let query = QuerySet::at_time(1, [1]);
        let wrapped = TimeoutPredictor::new(LastSeenPredictor, Duration::from_secs(5));

        let out = wrapped.predict(&train, &query).unwrap();
        assert_eq!(out, vec![Vector3::new(2.0, 0.0, 0.0)]);
        assert_eq!(wrapped.name(), "last_seen");
    }

    #[test]
    fn test_timeout_predictor_contains_panics() {
        let train = training(&[(0, 1, [0.0, 0.0, 0.0])]);
        let query = QuerySet::at_time(1, [1]);
        let wrapped = TimeoutPredictor::new(Panicky, Duration::from_secs(5));

        assert_eq!(wrapped.predict(&train, &query), Err(PredictorError::Disconnected));
    }

    #[test]
    fn test_panicking_predictor_is_undeterminable() {
        let train = training(&[(0, 1, [0.0, 0.0, 0.0])]);
        let query = QuerySet::at_time(1, [1]);

        assert_eq!(invoke_predictor(&Panicky, &train, &query).unwrap(), None);

        let owned = FnPredictor(
            |_: &TrainingSet, _: &QuerySet| -> Result<Vec<Position>, PredictorError> {
                panic!("{} exploded", "model")
            },
        );
        assert_eq!(invoke_predictor(&owned, &train, &query).unwrap(), None);
    }
}
