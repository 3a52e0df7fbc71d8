use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] BluetoothError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error)]
pub enum BluetoothError {
    #[error("no advertising device matched name filter {filter:?}")]
    DeviceNotFound { filter: String },
    #[error("failed to connect to {address}: {reason}")]
    ConnectFailed { address: String, reason: String },
    #[error("characteristic {uuid} not found on device")]
    CharacteristicMissing { uuid: uuid::Uuid },
    #[error("gatt operation failed: {0}")]
    Gatt(String),
    #[error("device disconnected")]
    Disconnected,
}

#[cfg(feature = "bluez")]
impl From<bluer::Error> for BluetoothError {
    fn from(e: bluer::Error) -> Self {
        BluetoothError::Gatt(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
