pub mod bus;
pub mod constants;
pub mod cul;
pub mod engine;
pub mod error;
pub mod frame;
pub mod message;
pub mod registry;

// Re-export commonly used types
pub use bus::{Event, EventBus, EventTopic};
pub use cul::{CulConfig, CulHandle, CulLink, CulTransceiver};
pub use engine::{CommandSender, EngineConfig, EngineHandle, MessageEngine};
pub use error::MoritzError;
pub use frame::{MoritzFrame, MsgType};
pub use message::{
    AckState, DeviceType, MoritzPayload, OutgoingMessage, PairMode, SendPayload, ThermostatMode,
    ThermostatStatus,
};
pub use registry::{DeviceRegistry, DeviceSnapshot};
