//! Stream-or-poll supervision shared by the health and server monitors.
//!
//! A monitor is either `Streaming` (push events arrive on its stream) or `Polling`
//! (its timers run one-shot requests while a reconnect timer tries to get the stream
//! back). Exactly one of the two is active at any time; a reconnect attempt in
//! flight never holds up the poll timers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{select_all, BoxFuture};
use futures::FutureExt;
use serde::Serialize;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ControlApi;
use crate::error::ApiError;
use crate::stream::{CancelHandle, EventStream, StreamChannel, StreamEvent, StreamSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MonitorMode {
    /// Initial connect in progress.
    #[default]
    Connecting,
    Streaming,
    Polling,
    /// Torn down, or gave up for lack of credentials.
    Stopped,
}

/// What a monitor plugs into `supervise`.
#[async_trait]
pub(crate) trait Supervised: Send + Sync + 'static {
    fn label(&self) -> &'static str;
    fn channel(&self) -> StreamChannel;
    fn api(&self) -> &dyn ControlApi;
    fn token(&self) -> &CancellationToken;
    fn set_mode(&self, mode: MonitorMode);
    /// Periods of the fallback timers, index-aligned with `on_poll`. Never empty.
    fn poll_periods(&self) -> Vec<Duration>;
    fn reconnect_period(&self) -> Duration;

    async fn on_event(this: &Arc<Self>, ev: StreamEvent);
    async fn on_poll(this: &Arc<Self>, timer: usize);
    /// Credentials missing or rejected; the monitor stops after this.
    fn on_unauthenticated(&self, err: &ApiError);
}

// First tick fires immediately.
pub(crate) fn ticker(period: Duration) -> Interval {
    let mut t = interval(period);
    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
    t
}

// First tick fires after one full period.
pub(crate) fn delayed_ticker(period: Duration) -> Interval {
    let mut t = interval_at(Instant::now() + period, period);
    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
    t
}

async fn connect<M: Supervised + ?Sized>(m: &M) -> Result<EventStream, ApiError> {
    m.api()
        .open_stream(m.channel(), CancelHandle::child_of(m.token()))
        .await
}

/// Drive `m` until its token is cancelled. Callers race this against the token so
/// no await point outlives teardown.
pub(crate) async fn supervise<M: Supervised>(m: Arc<M>) {
    let mut next = connect(&*m).await;
    loop {
        match next {
            Ok(mut stream) => {
                m.set_mode(MonitorMode::Streaming);
                info!(monitor = m.label(), "streaming");
                let seen = drive(&m, &mut stream).await;
                drop(stream);
                if m.token().is_cancelled() {
                    return;
                }
                m.set_mode(MonitorMode::Polling);
                // A stream that delivered something gets one immediate retry.
                next = poll_until_reconnected(&m, seen > 0).await;
            }
            Err(e) if e.is_unauthenticated() => {
                m.on_unauthenticated(&e);
                m.set_mode(MonitorMode::Stopped);
                return;
            }
            Err(e) => {
                warn!(monitor = m.label(), "stream unavailable, polling: {e}");
                m.set_mode(MonitorMode::Polling);
                next = poll_until_reconnected(&m, false).await;
            }
        }
    }
}

// Number of events handled before the stream ended.
async fn drive<M: Supervised>(m: &Arc<M>, stream: &mut EventStream) -> usize {
    let mut seen = 0;
    while let Some(sig) = stream.next().await {
        match sig {
            StreamSignal::Event(ev) => {
                seen += 1;
                M::on_event(m, ev).await;
            }
            StreamSignal::Error(e) => {
                warn!(monitor = m.label(), "stream failed: {e}");
                break;
            }
            StreamSignal::Closed => {
                debug!(monitor = m.label(), "stream closed by remote");
                break;
            }
        }
    }
    seen
}

type Connecting<'a> = BoxFuture<'a, Result<EventStream, ApiError>>;

// Resolves with the attempt's outcome; never resolves while nothing is in flight.
async fn attempt(pending: &mut Option<Connecting<'_>>) -> Result<EventStream, ApiError> {
    match pending {
        Some(f) => f.await,
        None => std::future::pending().await,
    }
}

// Ok(stream) once reconnected; Err only for credential failures. Poll timers keep
// firing while a reconnect attempt is in flight.
async fn poll_until_reconnected<M: Supervised>(
    m: &Arc<M>,
    retry_now: bool,
) -> Result<EventStream, ApiError> {
    let mut timers: Vec<Interval> = m.poll_periods().into_iter().map(ticker).collect();
    let mut reconnect = delayed_ticker(m.reconnect_period());
    let mut pending: Option<Connecting<'_>> = retry_now.then(|| connect(&**m).boxed());
    loop {
        let ticks = timers.iter_mut().map(|t| Box::pin(t.tick()));
        tokio::select! {
            (_, idx, _) = select_all(ticks) => M::on_poll(m, idx).await,
            _ = reconnect.tick() => {
                if pending.is_none() {
                    pending = Some(connect(&**m).boxed());
                }
            }
            r = attempt(&mut pending) => {
                pending = None;
                match r {
                    Ok(stream) => {
                        info!(monitor = m.label(), "stream restored, polling stopped");
                        return Ok(stream);
                    }
                    Err(e) if e.is_unauthenticated() => return Err(e),
                    Err(e) => debug!(monitor = m.label(), "reconnect failed: {e}"),
                }
            }
        }
    }
}
