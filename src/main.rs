//! ppe-gate - run one PPE detection session for a worker from the command line.
//!
//! Resolves the worker, starts their zone camera, waits the settle delay and
//! asks the inference service for a verdict. Every state change is printed as
//! a JSON line. Exit code: 0 compliant, 2 non-compliant, 1 on any error.

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use ppe_gate_lib::{
    config::{debug_enabled, GateConfig},
    utils::init_logging,
    Gate, SessionEvent, SessionHandle, SessionId, SessionState,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Check a worker's PPE at their zone camera")]
struct Args {
    /// Worker code as printed on the badge, e.g. TRA-001.
    #[arg(long)]
    code: String,

    /// Company the worker belongs to.
    #[arg(long)]
    company: Option<i64>,

    /// JSON config file. Missing file means built-in defaults.
    #[arg(long, env = "PPE_GATE_CONFIG", default_value = "ppe-gate.json")]
    config: PathBuf,

    /// Override the settle delay between stream start and verification.
    #[arg(long)]
    capture_delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(debug_enabled());

    match run(Args::parse()).await {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = GateConfig::load(&args.config)?;
    if let Some(delay) = args.capture_delay_ms {
        config.capture_delay_ms = delay;
    }

    let gate = Gate::from_config(&config);
    let orchestrator = gate.orchestrator.clone();
    let mut events = orchestrator.subscribe();

    // The session id is not known until `start` returns, so an interrupt
    // during lookup or stream start cancels whatever is in flight. `start`
    // then comes back with the cancelled handle.
    let starting = orchestrator.start(&args.code, args.company);
    tokio::pin!(starting);
    let started = tokio::select! {
        started = &mut starting => started,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted while starting, cancelling");
            orchestrator.shutdown();
            starting.await
        }
    };
    let handle = started.context("could not start detection session")?;
    let guard = orchestrator.guard(&handle.session_id);

    let outcome = follow_session(&gate, &mut events, &handle).await;

    drop(guard);
    orchestrator.drain().await;
    outcome
}

async fn follow_session(
    gate: &Gate,
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    handle: &SessionHandle,
) -> Result<ExitCode> {
    let orchestrator = &gate.orchestrator;
    if let Some(url) = &handle.stream_url {
        info!("live stream: {url}");
    }

    let final_event = tokio::select! {
        event = wait_for_terminal(events, &handle.session_id, handle.state) => event?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling session {}", handle.session_id);
            orchestrator.cancel(&handle.session_id)?;
            None
        }
    };

    let snapshot = match final_event {
        Some(event) => event.snapshot,
        None => orchestrator.current_state(&handle.session_id)?,
    };
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    let code = match (&snapshot.state, &snapshot.result) {
        (SessionState::Completed, Some(result)) if result.compliant => ExitCode::SUCCESS,
        (SessionState::Completed, Some(result)) => {
            if let Some(url) = gate.evidence.url_for_result(result) {
                println!("evidence: {url}");
            }
            ExitCode::from(2)
        }
        _ => ExitCode::from(1),
    };
    Ok(code)
}

/// Prints events for `session_id` until it reaches a terminal state.
async fn wait_for_terminal(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    session_id: &SessionId,
    initial: SessionState,
) -> Result<Option<SessionEvent>> {
    if initial.is_terminal() {
        return Ok(None);
    }

    loop {
        match events.recv().await {
            Ok(event) if &event.session_id == session_id => {
                println!("{}", serde_json::to_string(&event)?);
                if event.state.is_terminal() {
                    return Ok(Some(event));
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!("missed {skipped} session events"),
            Err(RecvError::Closed) => return Ok(None),
        }
    }
}
