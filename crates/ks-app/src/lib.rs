//! ks-app: firmware orchestration for the kiuas controller.
//!
//! Wires acquisition, control, authentication and persistence together
//! behind hardware traits, so the same code runs on the board and in the
//! host simulator.

pub mod command;
pub mod config;
pub mod error;
pub mod firmware;
pub mod hardware;
pub mod status;
pub mod store;

pub use command::{Command, CommandIngress, CommandLimits, CommandQueue, command_queue};
pub use config::{KiuasConfig, load_yaml, save_yaml};
pub use error::{AppError, AppResult};
pub use firmware::{Board, Firmware};
pub use hardware::{DoorSwitch, OutputDriver, TemperatureProbe};
pub use status::{ChannelVolts, OutputStatus, StatusReport};
pub use store::{JsonFileStore, MemoryStore, PersistentStore};
