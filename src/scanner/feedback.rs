// SPDX-License-Identifier: GPL-3.0-only

//! Detection feedback
//!
//! Phones vibrate through feedbackd; everywhere else the terminal bell rings.

use super::types::DecodedResult;
use crate::constants::{APP_ID, dbus};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;
use zbus::zvariant::Value;

/// Called once for every published result
pub type FeedbackHook = Arc<dyn Fn(&DecodedResult) + Send + Sync>;

/// A hook that does nothing
pub fn silent() -> FeedbackHook {
    Arc::new(|_| {})
}

/// Haptic feedback through feedbackd, falling back to the terminal bell
pub fn system(handle: Handle) -> FeedbackHook {
    Arc::new(move |result: &DecodedResult| {
        debug!(symbology = %result.symbology, "Triggering scan feedback");
        handle.spawn(async {
            if let Err(e) = trigger_feedbackd().await {
                debug!(error = %e, "feedbackd unavailable, ringing bell");
                ring_bell();
            }
        });
    })
}

/// Ask feedbackd to play the scan event
async fn trigger_feedbackd() -> Result<u32, String> {
    let connection = zbus::Connection::session()
        .await
        .map_err(|e| format!("Failed to connect to session D-Bus: {}", e))?;

    let proxy = zbus::Proxy::new(
        &connection,
        dbus::FEEDBACKD_BUS_NAME,
        dbus::FEEDBACKD_OBJECT_PATH,
        dbus::FEEDBACKD_INTERFACE,
    )
    .await
    .map_err(|e| format!("Failed to create feedbackd proxy: {}", e))?;

    let hints: HashMap<&str, Value> = HashMap::new();
    // -1 = play the event's default length
    proxy
        .call(
            "TriggerFeedback",
            &(APP_ID, dbus::FEEDBACKD_SCAN_EVENT, hints, -1i32),
        )
        .await
        .map_err(|e| format!("TriggerFeedback failed: {}", e))
}

fn ring_bell() {
    let mut stderr = std::io::stderr();
    let _ = stderr.write_all(b"\x07");
    let _ = stderr.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::types::{RegionOfInterest, Symbology};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_hook_receives_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook: FeedbackHook = Arc::new(move |result| {
            assert_eq!(result.payload, "hello");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result = DecodedResult::new("hello".into(), Symbology::Qr, RegionOfInterest::FULL);
        hook(&result);
        silent()(&result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
