//! Use Cases
//!
//! Application operations composed from the session layer, the device
//! repository and the LLM backend. The HTTP gateway calls into these.

mod device_management;
mod receive_message;
mod send_message;

pub use device_management::{DeviceManagement, DeviceStatus, DeviceStatusSummary};
pub use receive_message::ReceiveMessage;
pub use send_message::SendMessage;
