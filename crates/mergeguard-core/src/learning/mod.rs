//! Adaptive learning: the outcome-trained predictor and its retrain loop.

pub mod learner;
pub mod model;
pub mod predictor;

pub use learner::{Learner, RetrainGate, TrainReport};
pub use model::{features, fit, Features, RiskModel, TrainingParams, NEUTRAL_PROBABILITY};
pub use predictor::Predictor;
