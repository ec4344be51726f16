pub mod error;
pub mod mesonet;
pub mod model;
pub mod predictor;
pub mod preprocess;
