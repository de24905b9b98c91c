pub mod alerts;
pub mod checkpoints;
pub mod validate;
