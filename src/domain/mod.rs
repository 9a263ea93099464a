// Domain layer - Plain data types of the trend engine
pub mod error;
pub mod mode;
pub mod point;
pub mod sample;
pub mod series;
pub mod viewport;
