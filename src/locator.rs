//! Name-based device discovery.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use log::{debug, info};

use crate::errors::{BluetoothError, ClientError, Result};

/// One device seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    pub name: Option<String>,
}

impl Advertisement {
    pub fn new(address: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
        }
    }

    /// Case-insensitive substring match on the advertised name.
    pub fn name_contains(&self, filter: &str) -> bool {
        let filter = filter.to_lowercase();
        self.name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(&filter))
    }
}

pub type AdvertisementStream = Pin<Box<dyn Stream<Item = Advertisement> + Send>>;

/// Source of advertisements. Scanning stops when the stream is dropped.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self) -> Result<AdvertisementStream>;
}

/// Scan for up to `timeout` and return the address of the first device whose
/// name contains `name_filter`.
pub async fn discover<S>(scanner: &S, name_filter: &str, timeout: Duration) -> Result<String>
where
    S: Scanner + ?Sized,
{
    info!(
        "scanning for BLE devices: timeout={:?}, name_filter={:?}",
        timeout, name_filter
    );

    // one deadline covers bringing the scan up and waiting for a match
    let found = tokio::time::timeout(timeout, async {
        let mut adverts = scanner.scan().await?;
        while let Some(adv) = adverts.next().await {
            debug!("advertisement: address={}, name={:?}", adv.address, adv.name);
            if adv.name_contains(name_filter) {
                return Ok(Some(adv));
            }
        }
        Ok::<_, ClientError>(None)
    })
    .await;
    let found = match found {
        Ok(res) => res?,
        Err(_) => None,
    };

    match found {
        Some(adv) => {
            info!(
                "device found: name={:?}, address={}",
                adv.name.as_deref().unwrap_or_default(),
                adv.address
            );
            Ok(adv.address)
        }
        None => Err(BluetoothError::DeviceNotFound {
            filter: name_filter.to_string(),
        }
        .into()),
    }
}
