#![deny(unused_imports)]
#![deny(unused_variables)]

pub mod apply;
pub mod catalog;
pub mod error;
pub mod exec;
pub mod normal_eqn;
pub mod pipeline;
pub mod score;
pub mod solve;
pub mod types;

pub use error::RidgeError;
pub use pipeline::{RidgeReducer, RidgeRegression};
pub use types::AlphaMap;
