//! BlueZ-backed scanner and GATT link (via `bluer`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::gatt::WriteOp;
use bluer::{Adapter, AdapterEvent, Address, Device};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::errors::{BluetoothError, Result};
use crate::locator::{Advertisement, AdvertisementStream, Scanner};
use crate::session::{Connector, GattLink, Notifications};

const CONNECT_TIMEOUT_SECS: u64 = 15;
const SERVICES_TIMEOUT_SECS: u64 = 10;
const SERVICES_POLL_MS: u64 = 100;
/// Notifications buffered between the BlueZ stream and the session.
const NOTIFY_QUEUE_DEPTH: usize = 256;

/// Default adapter of the local BlueZ daemon.
///
/// Acts both as the [`Scanner`] for discovery and the [`Connector`] for
/// sessions.
pub struct BluezTransport {
    _session: bluer::Session,
    adapter: Adapter,
    pub connect_timeout: Duration,
    pub services_timeout: Duration,
}

impl BluezTransport {
    /// Open the default adapter and power it on.
    pub async fn open() -> Result<Self> {
        let session = bluer::Session::new().await.map_err(BluetoothError::from)?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(BluetoothError::from)?;
        adapter
            .set_powered(true)
            .await
            .map_err(BluetoothError::from)?;
        debug!("using adapter {}", adapter.name());

        Ok(Self {
            _session: session,
            adapter,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            services_timeout: Duration::from_secs(SERVICES_TIMEOUT_SECS),
        })
    }
}

#[async_trait]
impl Scanner for BluezTransport {
    async fn scan(&self) -> Result<AdvertisementStream> {
        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(BluetoothError::from)?;
        let adapter = self.adapter.clone();

        let adverts = events.filter_map(move |evt| {
            let adapter = adapter.clone();
            async move {
                let AdapterEvent::DeviceAdded(addr) = evt else {
                    return None;
                };
                let name = match adapter.device(addr) {
                    Ok(device) => device.name().await.ok().flatten(),
                    Err(_) => None,
                };
                Some(Advertisement {
                    address: addr.to_string(),
                    name,
                })
            }
        });
        Ok(Box::pin(adverts))
    }
}

#[async_trait]
impl Connector for BluezTransport {
    type Link = BluezLink;

    async fn connect(&self, address: &str) -> Result<BluezLink> {
        let failed = |reason: String| BluetoothError::ConnectFailed {
            address: address.to_string(),
            reason,
        };

        let addr: Address = address
            .parse()
            .map_err(|_| failed("invalid address".into()))?;
        let device = self
            .adapter
            .device(addr)
            .map_err(|e| failed(e.to_string()))?;

        tokio::time::timeout(self.connect_timeout, device.connect())
            .await
            .map_err(|_| failed(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| failed(e.to_string()))?;

        if !device.is_connected().await.unwrap_or(false) {
            return Err(failed("device reports not connected".into()).into());
        }

        wait_for_services(&device, self.services_timeout)
            .await
            .map_err(|e| failed(e.to_string()))?;
        info!("GATT services resolved: address={}", address);

        Ok(BluezLink {
            device,
            characteristics: HashMap::new(),
            pumps: HashMap::new(),
        })
    }

    async fn abandon(&self, address: &str) -> Result<()> {
        let Ok(addr) = address.parse::<Address>() else {
            return Ok(());
        };
        let device = self.adapter.device(addr).map_err(BluetoothError::from)?;
        // BlueZ may finish a connect we stopped waiting for
        if device.is_connected().await.unwrap_or(false) {
            device.disconnect().await.map_err(BluetoothError::from)?;
            info!("abandoned connection closed: address={}", address);
        }
        Ok(())
    }
}

async fn wait_for_services(device: &Device, timeout: Duration) -> Result<()> {
    let resolved = tokio::time::timeout(timeout, async {
        loop {
            match device.is_services_resolved().await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => return Err(BluetoothError::from(e)),
            }
            tokio::time::sleep(Duration::from_millis(SERVICES_POLL_MS)).await;
        }
    })
    .await;

    match resolved {
        Ok(r) => Ok(r?),
        Err(_) => Err(BluetoothError::Gatt("service discovery timed out".into()).into()),
    }
}

/// Connected device with its notification pumps.
///
/// Each subscription runs a small task that forwards the BlueZ notify stream
/// into a bounded queue; unsubscribing aborts that task, which drops the
/// stream and stops notifications on the device.
pub struct BluezLink {
    device: Device,
    characteristics: HashMap<Uuid, Characteristic>,
    pumps: HashMap<Uuid, JoinHandle<()>>,
}

impl BluezLink {
    async fn characteristic(&mut self, uuid: Uuid) -> Result<Characteristic> {
        if let Some(chr) = self.characteristics.get(&uuid) {
            return Ok(chr.clone());
        }
        for service in self.device.services().await.map_err(BluetoothError::from)? {
            for chr in service
                .characteristics()
                .await
                .map_err(BluetoothError::from)?
            {
                if chr.uuid().await.map_err(BluetoothError::from)? == uuid {
                    self.characteristics.insert(uuid, chr.clone());
                    return Ok(chr);
                }
            }
        }
        Err(BluetoothError::CharacteristicMissing { uuid }.into())
    }
}

#[async_trait]
impl GattLink for BluezLink {
    async fn subscribe(&mut self, characteristic: Uuid) -> Result<Notifications> {
        let chr = self.characteristic(characteristic).await?;
        let values = chr.notify().await.map_err(BluetoothError::from)?;

        let (mut tx, rx) = mpsc::channel(NOTIFY_QUEUE_DEPTH);
        let pump = tokio::spawn(async move {
            futures::pin_mut!(values);
            while let Some(value) = values.next().await {
                if tx.send(value).await.is_err() {
                    break;
                }
            }
        });
        if let Some(old) = self.pumps.insert(characteristic, pump) {
            old.abort();
        }
        Ok(Box::pin(rx))
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<()> {
        match self.pumps.remove(&characteristic) {
            Some(pump) => {
                pump.abort();
                Ok(())
            }
            None => Err(BluetoothError::Gatt(format!("not subscribed to {characteristic}")).into()),
        }
    }

    async fn write_command(&mut self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let chr = self.characteristic(characteristic).await?;
        let req = CharacteristicWriteRequest {
            op_type: WriteOp::Command,
            ..Default::default()
        };
        chr.write_ext(data, &req)
            .await
            .map_err(BluetoothError::from)?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        for (_, pump) in self.pumps.drain() {
            pump.abort();
        }
        if let Err(e) = self.device.disconnect().await {
            warn!("BlueZ disconnect failed: address={}, error={}", self.device.address(), e);
            return Err(BluetoothError::from(e).into());
        }
        Ok(())
    }
}

impl Drop for BluezLink {
    fn drop(&mut self) {
        for (_, pump) in self.pumps.drain() {
            pump.abort();
        }
    }
}
