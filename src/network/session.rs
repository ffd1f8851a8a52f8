//! Paced execution of one program over one link.
//!
//! A session moves through `Idle -> Running -> {Paused, Halted, Errored,
//! Disconnected}`:
//!
//! - **Idle**: `@d` directives set the delay; the first other message is the
//!   program source.
//! - **Running**: one step, its events, then the pacing delay. Messages that
//!   arrive meanwhile are handled at once: directives change the delay of
//!   the pause in progress, anything else is queued as input.
//! - **Paused**: a `read` waits for queued or fresh input.
//! - **Halted / Errored**: `@f` or `@e`, then the link is dropped.
//! - **Disconnected**: the link closed; nothing more is sent.

use crate::config::SessionConfig;
use crate::network::message::{Event, Inbound};
use crate::network::transport::Link;
use crate::virtual_machine::assembler::decode;
use crate::virtual_machine::errors::{Fault, ResourceLimit};
use crate::virtual_machine::operand::{MAX_VALUE, in_range};
use crate::virtual_machine::program::Program;
use crate::virtual_machine::state::{MachineState, StateDelta};
use crate::virtual_machine::vm::Machine;
use crate::{debug, info, warn};
use rand_core::{OsRng, RngCore};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Seeded values are drawn from `1..=SEED_MAX`.
const SEED_MAX: u32 = 100;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The program ran to completion and `@f` was sent.
    Halted,
    /// Decoding or execution failed and `@e` was sent.
    Errored,
    /// The client went away.
    Disconnected,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Halted => write!(f, "halted"),
            SessionOutcome::Errored => write!(f, "errored"),
            SessionOutcome::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    /// Deltas fully delivered to the client.
    pub steps: u64,
}

/// Why a run stopped before halting.
enum Stop {
    Disconnected,
    Failed(Fault),
}

impl From<Fault> for Stop {
    fn from(fault: Fault) -> Self {
        Stop::Failed(fault)
    }
}

fn parse_input(text: &str) -> Result<i64, Fault> {
    let trimmed = text.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .filter(|v| in_range(*v))
        .ok_or_else(|| Fault::InvalidInput {
            input: trimmed.to_string(),
            max: MAX_VALUE,
        })
}

fn seed_value() -> i64 {
    i64::from(OsRng.next_u32() % SEED_MAX + 1)
}

/// One client's program run.
pub struct Session {
    link: Link,
    config: SessionConfig,
    delay: Duration,
    inputs: VecDeque<String>,
    steps: u64,
}

impl Session {
    pub fn new(link: Link, config: SessionConfig) -> Self {
        let delay = config.clamp_delay(config.delay);
        Self {
            link,
            config,
            delay,
            inputs: VecDeque::new(),
            steps: 0,
        }
    }

    pub fn peer(&self) -> &str {
        &self.link.peer
    }

    /// Drives the session to its end.
    pub async fn run(mut self) -> SessionReport {
        let outcome = self.drive().await;
        info!(
            "{}: session {} after {} steps",
            self.link.peer, outcome, self.steps
        );
        SessionReport {
            outcome,
            steps: self.steps,
        }
    }

    async fn drive(&mut self) -> SessionOutcome {
        let Some(source) = self.await_source().await else {
            return SessionOutcome::Disconnected;
        };

        let program = match decode(&source) {
            Ok(program) => program,
            Err(e) => {
                info!("{}: decode failed: {e}", self.link.peer);
                return self.fail(Event::decode_error(&e)).await;
            }
        };
        debug!(
            "{}: running {} instructions, delay {:?}",
            self.link.peer,
            program.len(),
            self.delay
        );

        match self.execute(&program).await {
            Ok(()) => SessionOutcome::Halted,
            Err(Stop::Disconnected) => SessionOutcome::Disconnected,
            Err(Stop::Failed(fault)) => {
                info!("{}: run failed: {fault}", self.link.peer);
                self.fail(Event::fault(&fault)).await
            }
        }
    }

    async fn fail(&self, event: Event) -> SessionOutcome {
        match self.send(event).await {
            Ok(()) => SessionOutcome::Errored,
            Err(_) => SessionOutcome::Disconnected,
        }
    }

    /// Idle phase: applies directives until the program source arrives.
    async fn await_source(&mut self) -> Option<String> {
        while let Some(message) = self.link.recv().await {
            match Inbound::parse(&message) {
                Ok(Inbound::Delay(delay)) => self.set_delay(delay),
                Ok(Inbound::Text(source)) => return Some(source),
                Err(e) => warn!("{}: ignoring message: {e}", self.link.peer),
            }
        }
        None
    }

    async fn execute(&mut self, program: &Program) -> Result<(), Stop> {
        let deadline = Instant::now() + self.config.max_run_time;
        let machine = Machine::new(program, self.config.limits);
        let mut state = MachineState::new();

        if self.config.seed_input {
            let seeded = machine.seed(&state, seed_value())?;
            self.emit(&seeded.delta).await?;
            state = seeded.state;
        }

        loop {
            if Instant::now() >= deadline {
                return Err(self.run_time_exceeded().into());
            }

            let stepped = machine.step(&state)?;
            state = stepped.state;
            self.emit(&stepped.delta).await?;
            self.steps += 1;

            if state.is_awaiting_input() {
                let value = self.next_input(deadline).await?;
                let resumed = machine.resume(&state, value)?;
                state = resumed.state;
                self.emit(&resumed.delta).await?;
                self.steps += 1;
            }

            if state.is_halted() {
                return Ok(());
            }
            self.pace(deadline).await?;
        }
    }

    /// Waits out the current delay while handling inbound messages.
    ///
    /// The pause always ends `delay` after it started, with `delay` as of the
    /// latest directive, so lowering it mid-pause releases the next step early.
    async fn pace(&mut self, deadline: Instant) -> Result<(), Stop> {
        let started = Instant::now();
        let wake = sleep_until(started + self.delay);
        tokio::pin!(wake);
        let run_time = self.run_time_exceeded();
        loop {
            if Instant::now() >= started + self.delay {
                return Ok(());
            }
            // timers first, so a flooding client cannot hold back the step
            let message = tokio::select! {
                biased;
                _ = &mut wake => return Ok(()),
                _ = sleep_until(deadline) => return Err(run_time.into()),
                message = self.link.recv() => message,
            };
            match message {
                Some(message) => {
                    self.on_running_message(message);
                    wake.as_mut().reset(started + self.delay);
                }
                None => return Err(Stop::Disconnected),
            }
        }
    }

    /// Paused phase: takes the oldest queued input or waits for a new one.
    async fn next_input(&mut self, deadline: Instant) -> Result<i64, Stop> {
        if let Some(text) = self.inputs.pop_front() {
            return Ok(parse_input(&text)?);
        }

        let limit = self.config.input_timeout;
        let input_deadline = Instant::now() + limit;
        let timed_out = Fault::ResourceLimitExceeded(ResourceLimit::InputTimeout(limit));
        let run_time = self.run_time_exceeded();
        loop {
            let message = tokio::select! {
                biased;
                message = self.link.recv() => message,
                _ = sleep_until(input_deadline) => return Err(timed_out.into()),
                _ = sleep_until(deadline) => return Err(run_time.into()),
            };
            let Some(message) = message else {
                return Err(Stop::Disconnected);
            };
            match Inbound::parse(&message) {
                Ok(Inbound::Delay(delay)) => self.set_delay(delay),
                Ok(Inbound::Text(text)) => return Ok(parse_input(&text)?),
                Err(e) => warn!("{}: ignoring message: {e}", self.link.peer),
            }
        }
    }

    fn on_running_message(&mut self, message: String) {
        match Inbound::parse(&message) {
            Ok(Inbound::Delay(delay)) => self.set_delay(delay),
            Ok(Inbound::Text(text)) => {
                if self.inputs.len() >= self.config.input_queue {
                    warn!(
                        "{}: input queue full, dropping {:?}",
                        self.link.peer,
                        text.trim()
                    );
                } else {
                    self.inputs.push_back(text);
                }
            }
            Err(e) => warn!("{}: ignoring message: {e}", self.link.peer),
        }
    }

    fn set_delay(&mut self, requested: Duration) {
        self.delay = self.config.clamp_delay(requested);
        if self.delay < requested {
            warn!(
                "{}: delay {:?} clamped to {:?}",
                self.link.peer, requested, self.delay
            );
        }
    }

    fn run_time_exceeded(&self) -> Fault {
        Fault::ResourceLimitExceeded(ResourceLimit::RunTime(self.config.max_run_time))
    }

    async fn emit(&self, delta: &StateDelta) -> Result<(), Stop> {
        for event in Event::from_delta(delta) {
            self.send(event).await?;
        }
        Ok(())
    }

    async fn send(&self, event: Event) -> Result<(), Stop> {
        self.link
            .send(event.to_string())
            .await
            .map_err(|_| Stop::Disconnected)
    }
}
