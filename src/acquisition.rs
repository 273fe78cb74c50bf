//! ==============================================================================
//! acquisition.rs - session-gated polling state machine
//! ==============================================================================
//!
//! purpose:
//!     the heart of the agent. waits until someone holds a session on this
//!     device, then polls the sensor every tick for as long as the session
//!     stays valid.
//!
//! phases:
//!
//!     ┌──────────────────┐  live session   ┌──────────────────────────────┐
//!     │ WaitingForSession│ ──────────────> │ Bound { owner, scope }       │
//!     │ (announce/claim) │ <────────────── │ initializing/active/error/   │
//!     └──────────────────┘  validate fails │ stopped                      │
//!                           (session_lost) └──────────────────────────────┘
//!
//! driver:
//!     step() runs exactly one tick and returns how long to pause before the
//!     next one. run() is just `loop { sleep(step()) }`. the pauses are the
//!     only suspension points besides serial and network io.
//!
//! per tick while bound, in this order:
//!     1. validate the session (before ANY hardware io)
//!     2. disabled via /toggle -> stopped, skip the read
//!     3. open the channel if needed
//!     4. read the register pair, publish, journal, upload, heartbeat
//!
//! nothing in here returns an error to the caller: hardware faults are retried
//! forever, session loss goes back to waiting, upload failures are logged.
//!
//! ==============================================================================

use crate::channel::InstrumentChannel;
use crate::codec;
use crate::config::PollingConfig;
use crate::domain::{DeviceId, OperatingState, PortId};
use crate::journal::Journal;
use crate::session::SessionPolicy;
use crate::status::SharedStatus;
use crate::telemetry::{Binding, Telemetry};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    WaitingForSession,
    Bound(Binding),
}

/// pauses between ticks, see PollingConfig for the defaults
#[derive(Clone, Debug)]
pub struct Timings {
    pub tick: Duration,
    pub error_backoff: Duration,
    pub reconnect_delay: Duration,
    pub session_poll: Duration,
    pub session_lost_pause: Duration,
    pub claim_retry: Duration,
    pub stabilize: Duration,
    pub max_consecutive_errors: u32,
}

impl From<&PollingConfig> for Timings {
    fn from(polling: &PollingConfig) -> Self {
        Self {
            tick: polling.tick(),
            error_backoff: polling.error_backoff(),
            reconnect_delay: polling.reconnect_delay(),
            session_poll: polling.session_poll(),
            session_lost_pause: polling.session_lost_pause(),
            claim_retry: polling.claim_retry(),
            stabilize: polling.stabilize(),
            max_consecutive_errors: polling.max_consecutive_errors,
        }
    }
}

pub struct Acquisition {
    device: DeviceId,
    port: PortId,
    channel: Arc<InstrumentChannel>,
    sessions: Arc<dyn SessionPolicy>,
    status: SharedStatus,
    journal: Option<Journal>,
    telemetry: Option<Telemetry>,
    auto_claim: Option<Binding>,
    timings: Timings,
    show_readings: bool,
    phase: Phase,
    consecutive_errors: u32,
}

impl Acquisition {
    pub fn new(
        device: DeviceId,
        port: PortId,
        channel: Arc<InstrumentChannel>,
        sessions: Arc<dyn SessionPolicy>,
        status: SharedStatus,
        timings: Timings,
    ) -> Self {
        Self {
            device,
            port,
            channel,
            sessions,
            status,
            journal: None,
            telemetry: None,
            auto_claim: None,
            timings,
            show_readings: true,
            phase: Phase::WaitingForSession,
            consecutive_errors: 0,
        }
    }

    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// claim the device for these credentials whenever nobody holds it
    pub fn with_auto_claim(mut self, binding: Binding) -> Self {
        self.auto_claim = Some(binding);
        self
    }

    pub fn show_readings(mut self, show: bool) -> Self {
        self.show_readings = show;
        self
    }

    #[cfg(test)]
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    #[cfg(test)]
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// run forever; only process shutdown ends this
    pub async fn run(mut self) {
        tracing::info!("acquisition started for {} on {}", self.device, self.port);
        loop {
            let pause = self.step().await;
            tokio::time::sleep(pause).await;
        }
    }

    /// one tick of the state machine; returns the pause before the next tick
    pub async fn step(&mut self) -> Duration {
        match self.phase.clone() {
            Phase::WaitingForSession => self.wait_for_session().await,
            Phase::Bound(binding) => self.poll(&binding).await,
        }
    }

    async fn wait_for_session(&mut self) -> Duration {
        if let Some(session) = self.sessions.active_session(&self.device).await {
            let binding = Binding { owner: session.owner_id, scope: session.scope_id };
            tracing::info!(
                "session found for {}: user={}, field={}",
                self.device,
                binding.owner,
                binding.scope
            );
            self.status.begin_session().await;
            self.consecutive_errors = 0;
            self.phase = Phase::Bound(binding);
            return Duration::ZERO;
        }

        self.sessions.announce_waiting(&self.device).await;

        if let Some(claim) = &self.auto_claim {
            tracing::info!("using operator credentials to claim the sensor...");
            self.sessions.claim(&self.device, &claim.owner, &claim.scope).await;
            return self.timings.claim_retry;
        }

        self.timings.session_poll
    }

    async fn poll(&mut self, binding: &Binding) -> Duration {
        // session first: a revoked lease must stop hardware access this tick
        if !self.sessions.validate(&self.device, &binding.owner).await {
            tracing::error!("session lost or invalid - returning to waiting mode");
            self.status.set_state(OperatingState::SessionLost).await;
            self.phase = Phase::WaitingForSession;
            return self.timings.session_lost_pause;
        }

        if !self.status.is_enabled().await {
            self.status.set_state(OperatingState::Stopped).await;
            return self.timings.tick;
        }

        if !self.channel.is_open().await {
            tracing::info!("initializing sensor connection on {}...", self.port);
            if let Err(e) = self.channel.open(&self.port).await {
                tracing::error!("failed to initialize sensor: {}", e);
                self.status.set_state(OperatingState::Error).await;
                return self.timings.reconnect_delay;
            }
            self.consecutive_errors = 0;
            tokio::time::sleep(self.timings.stabilize).await;
        }

        match self.channel.read_pair().await {
            Ok((raw_moisture, raw_temperature)) => {
                self.consecutive_errors = 0;
                let reading = codec::decode(raw_moisture, raw_temperature, Utc::now());

                self.status.publish(reading.clone()).await;

                if let Some(journal) = &self.journal {
                    if let Err(e) = journal.append(&reading).await {
                        tracing::error!("failed to write to csv: {:#}", e);
                    }
                }

                let uploaded = match self.telemetry.as_mut() {
                    Some(telemetry) => telemetry.upload(&self.device, binding, &reading).await,
                    None => true,
                };
                if uploaded {
                    self.sessions.heartbeat(&self.device).await;
                }

                if self.show_readings {
                    tracing::info!(
                        "read: {:.1}% moisture, {:.1}°C",
                        reading.moisture,
                        reading.temperature
                    );
                }
                self.timings.tick
            }
            Err(e) => {
                self.consecutive_errors += 1;
                tracing::error!(
                    "communication error ({}/{}): {}",
                    self.consecutive_errors,
                    self.timings.max_consecutive_errors,
                    e
                );

                if self.consecutive_errors >= self.timings.max_consecutive_errors {
                    tracing::error!("too many errors, reinitializing sensor...");
                    self.channel.discard().await;
                    self.consecutive_errors = 0;
                }

                self.status.set_state(OperatingState::Error).await;
                self.timings.error_backoff
            }
        }
    }
}
