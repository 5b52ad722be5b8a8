//! Per-session state: clock-skew refusal, format negotiation, and the
//! automatic session-expiry timer (spec.md §4.E).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::P2pError;
use crate::format::{self, FormatInfo};

pub struct SessionParams {
    pub local_format_id: u32,
    pub known_formats: Vec<u32>,
    pub first_version_to_know_local: u32,
    pub format_table: HashMap<u32, FormatInfo>,
    pub remote_preferred_format: u32,
    pub local_clock: i64,
    pub remote_clock: i64,
    pub max_clock_skew: Option<i64>,
    pub session_timeout: Option<Duration>,
}

/// A negotiated, time-bounded P2P session (spec.md §4.E).
pub struct Session {
    pub format_id: u32,
    closed: Arc<AtomicBool>,
}

impl Session {
    /// Refuses construction on excessive clock skew (spec.md §4.E), then
    /// negotiates the wire format and — if `session_timeout` is set — spawns
    /// the automatic expiry timer.
    pub fn open(params: SessionParams, now: u64) -> Result<Self, P2pError> {
        if let Some(max_skew) = params.max_clock_skew {
            let diff = params.local_clock - params.remote_clock;
            if diff.abs() > max_skew {
                return Err(P2pError::ClockSkew { diff, max: max_skew });
            }
        }

        let known = params.known_formats.clone();
        let table = params.format_table.clone();
        let format_id = format::negotiate(
            params.local_format_id,
            params.remote_preferred_format,
            |id| known.contains(&id),
            params.first_version_to_know_local,
            move |id| *table.get(&id).unwrap_or(&FormatInfo { id, expires: None }),
            now,
        )?;

        let closed = Arc::new(AtomicBool::new(false));
        if let Some(timeout) = params.session_timeout {
            let closed_for_timer = closed.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if !closed_for_timer.swap(true, Ordering::SeqCst) {
                    debug!("session expired after timeout");
                }
            });
        }

        Ok(Self { format_id, closed })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_params() -> SessionParams {
        SessionParams {
            local_format_id: 1,
            known_formats: vec![0, 1, 2],
            first_version_to_know_local: 0,
            format_table: HashMap::new(),
            remote_preferred_format: 1,
            local_clock: 1000,
            remote_clock: 1000,
            max_clock_skew: Some(5),
            session_timeout: None,
        }
    }

    #[test]
    fn refuses_construction_on_clock_skew() {
        let mut params = base_params();
        params.remote_clock = 900;
        let err = Session::open(params, 0).unwrap_err();
        assert!(matches!(err, P2pError::ClockSkew { .. }));
    }

    #[test]
    fn negotiates_format_on_open() {
        let mut params = base_params();
        params.remote_preferred_format = 2;
        let session = Session::open(params, 0).unwrap();
        assert_eq!(session.format_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn session_times_out_automatically() {
        let mut params = base_params();
        params.session_timeout = Some(Duration::from_secs(1));
        let session = Session::open(params, 0).unwrap();
        assert!(!session.is_closed());
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(session.is_closed());
    }
}
