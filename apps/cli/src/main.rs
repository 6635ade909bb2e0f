#![deny(warnings)]

//! Headless runner: plays a scripted session end to end and writes the
//! impact report.

use anyhow::{Context, Result};
use sim_ai::{Advice, ScriptedAdvisor};
use sim_core::{load_document, Challenge};
use sim_runtime::{
    ActionOutcome, ActionRequest, AdvanceOutcome, EngineError, Session, SessionConfig, WeekView,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Args {
    config: PathBuf,
    advice: PathBuf,
    report: PathBuf,
}

fn parse_args() -> Args {
    let mut args = Args {
        config: PathBuf::from("assets/session.yaml"),
        advice: PathBuf::from("assets/advice.yaml"),
        report: PathBuf::from("out/impact_report.txt"),
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next().map(PathBuf::from).unwrap_or(args.config),
            "--advice" => args.advice = it.next().map(PathBuf::from).unwrap_or(args.advice),
            "--report" => args.report = it.next().map(PathBuf::from).unwrap_or(args.report),
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }
    args
}

/// The scripted player always picks the first listed approach.
fn decision_text(challenge: Option<&Challenge>) -> String {
    match challenge {
        Some(c) => c
            .possible_approaches
            .first()
            .cloned()
            .unwrap_or_else(|| format!("Address: {}", c.situation)),
        None => "Hold course".to_string(),
    }
}

/// Accept the current recommendations, asking for one revision if they are
/// rejected. `None` means the session is over.
async fn resolve(
    session: &mut Session<ScriptedAdvisor>,
    decision_id: &str,
) -> Result<Option<WeekView>> {
    let outcome = match session
        .act_on_decision(decision_id, ActionRequest::accept_all())
        .await
    {
        Err(EngineError::Validation(violation)) => {
            warn!(%violation, "recommendations rejected, requesting a revision");
            let feedback = Some(format!("Stay within bounds: {violation}"));
            session
                .act_on_decision(decision_id, ActionRequest::request_new(feedback))
                .await?;
            session
                .act_on_decision(decision_id, ActionRequest::accept_all())
                .await
        }
        other => other,
    };
    match outcome {
        Ok(ActionOutcome::Accepted {
            advance: AdvanceOutcome::InProgress(next),
            ..
        }) => Ok(Some(next)),
        Ok(_) => Ok(None),
        Err(err) => {
            session.end_session();
            Err(err.into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args();
    info!(config = %args.config.display(), advice = %args.advice.display(), "starting CLI");

    let config = SessionConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let script: Vec<Advice> = load_document(&args.advice)
        .with_context(|| format!("loading {}", args.advice.display()))?;
    let mut session = Session::open(config, ScriptedAdvisor::from_advice(script))?;

    let mut view = Some(session.start_week()?);
    while let Some(week) = view {
        let text = decision_text(week.challenge.as_ref());
        let analysis = match session.submit_decision(&text).await {
            Ok(analysis) => analysis,
            Err(err) => {
                warn!(week = week.week, %err, "advisory panel failed, ending session");
                session.end_session();
                break;
            }
        };
        println!(
            "Week {} | {} | {} | advisors: {} | dropped keys: {}",
            analysis.week,
            analysis.department,
            text,
            analysis.recommendations.agents.len(),
            analysis.dropped.len()
        );
        view = resolve(&mut session, &analysis.decision_id).await?;
    }

    let status = session.status();
    println!(
        "Session | state: {} | week: {}/{} | decisions: {}",
        status.state,
        status.current_week,
        status.total_weeks,
        session.engine().decision_history().len()
    );
    for (metric, impact) in session.engine().impact() {
        println!(
            "KPI | {metric}: {:.2} -> {:.2} ({:+.2}%)",
            impact.initial, impact.final_value, impact.percent_change
        );
    }
    session.write_report(&args.report)?;
    println!("Report written to {}", args.report.display());

    Ok(())
}
