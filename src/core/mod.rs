// Core building blocks shared by every module.
pub mod error;
