// easel-common: shared types and wire contracts for the Easel workspace

pub mod error;
pub mod mutation;
pub mod patch;
pub mod presence;
pub mod protocol;
pub mod types;
