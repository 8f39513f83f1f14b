/// Market clock for the replay.
pub mod clock;
pub mod engine;
/// In-memory actuator and bus.
pub mod transport;
pub mod types;
