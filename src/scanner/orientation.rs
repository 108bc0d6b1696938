// SPDX-License-Identifier: GPL-3.0-only

//! Device orientation from iio-sensor-proxy
//!
//! Convertibles and phones report their accelerometer orientation on the
//! system bus. Machines without a sensor simply never send an update.

use super::geometry::InterfaceOrientation;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

const SENSOR_PROXY_BUS_NAME: &str = "net.hadess.SensorProxy";
const SENSOR_PROXY_PATH: &str = "/net/hadess/SensorProxy";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Watch the accelerometer, publishing every orientation change
///
/// The receiver starts at [`InterfaceOrientation::Unknown`].
pub fn watch_orientation(handle: &Handle) -> watch::Receiver<InterfaceOrientation> {
    let (tx, rx) = watch::channel(InterfaceOrientation::Unknown);

    handle.spawn(async move {
        if let Err(e) = follow_accelerometer(&tx).await {
            debug!(error = %e, "No accelerometer orientation available");
        }
    });

    rx
}

async fn follow_accelerometer(tx: &watch::Sender<InterfaceOrientation>) -> Result<(), String> {
    let connection = zbus::Connection::system()
        .await
        .map_err(|e| format!("Failed to connect to system D-Bus: {}", e))?;

    let proxy = zbus::Proxy::new(
        &connection,
        SENSOR_PROXY_BUS_NAME,
        SENSOR_PROXY_PATH,
        SENSOR_PROXY_BUS_NAME,
    )
    .await
    .map_err(|e| format!("Failed to create SensorProxy proxy: {}", e))?;

    let has_sensor: bool = proxy
        .get_property("HasAccelerometer")
        .await
        .map_err(|e| format!("SensorProxy unavailable: {}", e))?;
    if !has_sensor {
        return Err("no accelerometer".to_string());
    }

    proxy
        .call::<_, _, ()>("ClaimAccelerometer", &())
        .await
        .map_err(|e| format!("ClaimAccelerometer failed: {}", e))?;
    info!("Following accelerometer orientation");

    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;
        if tx.is_closed() {
            break;
        }

        let value: String = match proxy.get_property("AccelerometerOrientation").await {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Failed to read orientation");
                continue;
            }
        };

        let orientation = InterfaceOrientation::from_accelerometer(&value);
        tx.send_if_modified(|current| {
            if *current == orientation {
                return false;
            }
            debug!(?orientation, "Device orientation changed");
            *current = orientation;
            true
        });
    }

    let _ = proxy.call::<_, _, ()>("ReleaseAccelerometer", &()).await;
    Ok(())
}
