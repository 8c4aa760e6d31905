// Domain layer: grading models and the adapter port. No I/O here.

pub mod model;
pub mod ports;
