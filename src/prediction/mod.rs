pub mod adapter;
pub mod classifier;

pub use adapter::classify;
pub use classifier::{Classifier, ClassifierHandle, LogisticModel, FEATURE_NAMES};
