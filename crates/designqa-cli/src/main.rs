use std::fs;
use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use designqa_contracts::commands::{parse_command, SessionCommand, SESSION_HELP};
use designqa_contracts::errors::{AnalysisFailure, SessionError};
use designqa_contracts::events::{new_session_id, EventWriter};
use designqa_contracts::media::ImageSlot;
use designqa_contracts::models::{ModelSelector, DESIGN_QA_CAPABILITY};
use designqa_contracts::report::{IssueKind, Report};
use designqa_engine::{
    render_overlay, render_text, save_overlay, AnalysisGateway, AnalysisTicket, Completion,
    GatewayConfig, ImageUpload, OverlayStyle, ReportEdit, Session, SessionPhase,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "designqa",
    version,
    about = "Compare a design mockup with a live screenshot"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one analysis and write the report files.
    Analyze(AnalyzeArgs),
    /// Write the default report without calling the analysis service.
    Manual(ManualArgs),
    /// Interactive review session.
    Session(SessionArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    design: PathBuf,
    #[arg(long)]
    live: PathBuf,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ManualArgs {
    #[arg(long)]
    design: PathBuf,
    #[arg(long)]
    live: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
}

const ANALYSIS_THREAD_NAME: &str = "designqa-analysis";
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("designqa error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DESIGNQA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => run_analyze(args),
        Command::Manual(args) => run_manual(args),
        Command::Session(args) => {
            run_session(args)?;
            Ok(0)
        }
    }
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let config = GatewayConfig::from_env();
    let gateway = Arc::new(build_gateway(&config, args.model.as_deref())?);
    let mut session = open_session(&args.out, args.events.as_deref())?;
    upload_path(&mut session, ImageSlot::Design, &args.design)?;
    upload_path(&mut session, ImageSlot::Live, &args.live)?;

    let ticket = session.begin_analysis()?;
    let ticket_id = ticket.id();
    eprintln!("Analyzing with {}...", gateway.model().name);
    let (tx, rx) = mpsc::channel();
    spawn_analysis(Arc::clone(&gateway), ticket, tx)?;

    let started = Instant::now();
    let mut last_progress = Instant::now();
    let outcome = loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(LoopEvent::Analysis { outcome, .. }) => break outcome,
            Ok(_) => continue,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if last_progress.elapsed() >= PROGRESS_INTERVAL {
                    eprintln!("Still analyzing ({}s)...", started.elapsed().as_secs());
                    last_progress = Instant::now();
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                break Err(AnalysisFailure::Request(
                    "analysis worker exited without a result".to_string(),
                ))
            }
        }
    };

    match session.complete_analysis(ticket_id, outcome) {
        Completion::Applied(SessionPhase::Reviewing) => {}
        Completion::Applied(_) => {
            eprintln!(
                "{}",
                session
                    .last_error()
                    .unwrap_or("Analysis failed. Please try again.")
            );
            return Ok(1);
        }
        Completion::Stale => anyhow::bail!("analysis result did not match the running analysis"),
    }
    let written = write_report_files(&session, &args.out)?;
    print_report(&session);
    for path in written {
        println!("wrote {}", path.display());
    }
    Ok(0)
}

fn run_manual(args: ManualArgs) -> Result<i32> {
    let mut session = open_session(&args.out, args.events.as_deref())?;
    upload_path(&mut session, ImageSlot::Design, &args.design)?;
    upload_path(&mut session, ImageSlot::Live, &args.live)?;
    session.create_manually()?;
    let written = write_report_files(&session, &args.out)?;
    for path in written {
        println!("wrote {}", path.display());
    }
    Ok(0)
}

fn open_session(out: &Path, events: Option<&Path>) -> Result<Session> {
    fs::create_dir_all(out).with_context(|| format!("failed creating {}", out.display()))?;
    let events_path = events
        .map(Path::to_path_buf)
        .unwrap_or_else(|| out.join("events.jsonl"));
    Ok(Session::new(EventWriter::new(events_path, new_session_id())))
}

fn build_gateway(config: &GatewayConfig, requested: Option<&str>) -> Result<AnalysisGateway> {
    let selection = ModelSelector::new(None).select(requested, DESIGN_QA_CAPABILITY)?;
    if let (Some(_), Some(reason)) = (selection.requested.as_ref(), selection.fallback_reason.as_ref()) {
        eprintln!("{reason} Using {}.", selection.model.name);
    }
    if selection.model.service == "gemini" && config.api_key.is_none() {
        eprintln!(
            "GEMINI_API_KEY is not set; analysis with {} will fail. Use --model dryrun-qa-1 for an offline run.",
            selection.model.name
        );
    }
    debug!(model = %selection.model.name, config = ?config, "analysis gateway ready");
    Ok(AnalysisGateway::from_config(config, selection.model))
}

fn upload_path(session: &mut Session, slot: ImageSlot, path: &Path) -> Result<SessionPhase> {
    let upload = ImageUpload::from_path(path)?;
    let phase = session
        .upload(slot, upload)
        .with_context(|| format!("{slot} image {} rejected", path.display()))?;
    Ok(phase)
}

fn write_report_files(session: &Session, out: &Path) -> Result<Vec<PathBuf>> {
    let (Some(report), Some(design), Some(live)) = (
        session.report(),
        session.asset(ImageSlot::Design),
        session.asset(ImageSlot::Live),
    ) else {
        anyhow::bail!("no report to write");
    };
    let json_path = out.join("report.json");
    write_report_json(report, &json_path)?;
    let text_path = out.join("report.txt");
    fs::write(&text_path, render_text(report, design, live))
        .with_context(|| format!("failed writing {}", text_path.display()))?;
    let overlay_path = out.join("overlay.png");
    let overlay = render_overlay(live, report, &OverlayStyle::default(), None)?;
    save_overlay(&overlay, &overlay_path)?;
    Ok(vec![json_path, text_path, overlay_path])
}

fn write_report_json(report: &Report, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("failed creating {}", parent.display()))?;
    }
    let body = report.to_json_pretty().context("failed serializing report")?;
    fs::write(path, body + "\n").with_context(|| format!("failed writing {}", path.display()))
}

fn print_report(session: &Session) {
    if let (Some(report), Some(design), Some(live)) = (
        session.report(),
        session.asset(ImageSlot::Design),
        session.asset(ImageSlot::Live),
    ) {
        print!("{}", render_text(report, design, live));
    }
}

enum LoopEvent {
    Input(String),
    InputClosed,
    Analysis {
        ticket: u64,
        outcome: Result<Report, AnalysisFailure>,
    },
}

fn spawn_analysis(
    gateway: Arc<AnalysisGateway>,
    ticket: AnalysisTicket,
    tx: mpsc::Sender<LoopEvent>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(ANALYSIS_THREAD_NAME.to_string())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                gateway.analyze(ticket.design(), ticket.live())
            }))
            .unwrap_or_else(|_| {
                Err(AnalysisFailure::Request("analysis worker panicked".to_string()))
            });
            let _ = tx.send(LoopEvent::Analysis {
                ticket: ticket.id(),
                outcome,
            });
        })
        .context("analysis thread spawn failed")
}

fn spawn_stdin_reader(tx: mpsc::Sender<LoopEvent>) -> Result<()> {
    thread::Builder::new()
        .name("designqa-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(LoopEvent::Input(line)).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "stdin read failed");
                        break;
                    }
                }
            }
            let _ = tx.send(LoopEvent::InputClosed);
        })
        .context("stdin thread spawn failed")?;
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

struct Repl {
    session: Session,
    config: GatewayConfig,
    gateway: Arc<AnalysisGateway>,
    out: PathBuf,
    tx: mpsc::Sender<LoopEvent>,
    analysis_started: Option<Instant>,
    last_progress: Instant,
}

fn run_session(args: SessionArgs) -> Result<()> {
    let config = GatewayConfig::from_env();
    let gateway = Arc::new(build_gateway(&config, args.model.as_deref())?);
    let session = open_session(&args.out, args.events.as_deref())?;
    let (tx, rx) = mpsc::channel();
    spawn_stdin_reader(tx.clone())?;

    let mut repl = Repl {
        session,
        config,
        gateway,
        out: args.out,
        tx,
        analysis_started: None,
        last_progress: Instant::now(),
    };

    println!(
        "Design QA session {} started (model {}). Type /help for commands.",
        repl.session.session_id(),
        repl.gateway.model().name
    );
    prompt()?;

    let mut input_closed = false;
    loop {
        let event = match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                repl.report_progress();
                continue;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        match event {
            LoopEvent::Input(line) => {
                if let Flow::Quit = repl.handle(parse_command(&line))? {
                    break;
                }
                prompt()?;
            }
            LoopEvent::InputClosed => {
                input_closed = true;
                if repl.session.phase() != SessionPhase::Analyzing {
                    break;
                }
                println!("Input closed; waiting for the analysis to finish.");
            }
            LoopEvent::Analysis { ticket, outcome } => {
                repl.finish_analysis(ticket, outcome);
                if input_closed {
                    break;
                }
                prompt()?;
            }
        }
    }
    Ok(())
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

impl Repl {
    fn handle(&mut self, command: SessionCommand) -> Result<Flow> {
        match self.dispatch(command) {
            Ok(flow) => Ok(flow),
            Err(err) => {
                match err.downcast_ref::<SessionError>() {
                    Some(session_err) => println!("{session_err}"),
                    None => println!("error: {err:#}"),
                }
                Ok(Flow::Continue)
            }
        }
    }

    fn dispatch(&mut self, command: SessionCommand) -> Result<Flow> {
        match command {
            SessionCommand::Noop => {}
            SessionCommand::Upload { slot, path } => {
                let phase = upload_path(&mut self.session, slot, Path::new(&path))?;
                if let Some(asset) = self.session.asset(slot) {
                    println!(
                        "{slot} image set to {} ({}x{}). Now {phase}.",
                        asset.name(),
                        asset.width(),
                        asset.height()
                    );
                }
            }
            SessionCommand::Clear { slot } => {
                let phase = self.session.clear(slot)?;
                println!("{slot} image cleared. Now {phase}.");
            }
            SessionCommand::Analyze => self.start_analysis()?,
            SessionCommand::Cancel => {
                let phase = self.session.cancel_analysis()?;
                self.analysis_started = None;
                println!(
                    "Analysis cancelled. Now {phase}. /analyze is available once the abandoned call returns."
                );
            }
            SessionCommand::Manual => {
                self.session.create_manually()?;
                println!("Manual report created (score 100). Add issues with /general or /specific.");
            }
            SessionCommand::Discard => {
                let phase = self.session.discard_report()?;
                println!("Report discarded. Now {phase}.");
            }
            SessionCommand::Reset => {
                self.session.reset()?;
                println!("Session reset.");
            }
            SessionCommand::Dismiss => {
                self.session.dismiss_error();
                println!("Message dismissed.");
            }
            SessionCommand::SetScore(value) => self.apply(ReportEdit::SetScore(value))?,
            SessionCommand::BumpScore(delta) => self.apply(ReportEdit::AdjustScore(delta))?,
            SessionCommand::AddGeneral(text) => self.apply(ReportEdit::AddGeneral(text))?,
            SessionCommand::AddSpecific { anchor, text } => self.apply(ReportEdit::AddSpecific {
                description: text,
                anchor,
            })?,
            SessionCommand::AddSpecificPixels { rect, text } => {
                let Some(rendered) = self.session.asset(ImageSlot::Live).map(|asset| asset.size())
                else {
                    println!("Upload a live screenshot first.");
                    return Ok(Flow::Continue);
                };
                self.apply(ReportEdit::AddSpecificAt {
                    description: text,
                    rect,
                    rendered,
                })?;
            }
            SessionCommand::Edit { kind, index, text } => self.apply(match kind {
                IssueKind::General => ReportEdit::EditGeneral { index, text },
                IssueKind::Specific => ReportEdit::EditSpecific { index, text },
            })?,
            SessionCommand::Move { index, anchor } => {
                self.apply(ReportEdit::MoveSpecific { index, anchor })?
            }
            SessionCommand::Remove { kind, index } => self.apply(match kind {
                IssueKind::General => ReportEdit::RemoveGeneral(index),
                IssueKind::Specific => ReportEdit::RemoveSpecific(index),
            })?,
            SessionCommand::Show => {
                if self.session.report().is_some() {
                    print_report(&self.session);
                } else {
                    println!("No report yet. Now {}.", self.session.phase());
                }
            }
            SessionCommand::Diff => match self.session.editor() {
                Some(editor) if editor.is_modified() => print!("{}", editor.diff()?),
                Some(_) => println!("No edits since the report was created."),
                None => println!("No report yet."),
            },
            SessionCommand::Render { path } => {
                let path = self.output_path(path, "overlay.png");
                let (Some(report), Some(live)) =
                    (self.session.report(), self.session.asset(ImageSlot::Live))
                else {
                    println!("No report to render.");
                    return Ok(Flow::Continue);
                };
                let overlay = render_overlay(live, report, &OverlayStyle::default(), None)?;
                save_overlay(&overlay, &path)?;
                println!("Overlay written to {}", path.display());
            }
            SessionCommand::Export { path } => {
                let path = self.output_path(path, "report.json");
                let Some(report) = self.session.report() else {
                    println!("No report to export.");
                    return Ok(Flow::Continue);
                };
                write_report_json(report, &path)?;
                println!("Report written to {}", path.display());
            }
            SessionCommand::Status => self.print_status(),
            SessionCommand::Help => {
                println!("Commands:");
                for (usage, summary) in SESSION_HELP {
                    println!("  {usage:<42} {summary}");
                }
            }
            SessionCommand::Quit => return Ok(Flow::Quit),
            SessionCommand::SetModel(name) => {
                if self.session.phase() == SessionPhase::Analyzing {
                    println!("Cannot switch models while an analysis is running.");
                    return Ok(Flow::Continue);
                }
                self.gateway = Arc::new(build_gateway(&self.config, Some(&name))?);
                println!("Model set to {}", self.gateway.model().name);
            }
            SessionCommand::Invalid { command, reason } => println!("/{command}: {reason}"),
            SessionCommand::Unknown { command } => {
                println!("Unknown command /{command}. Type /help for commands.")
            }
        }
        Ok(Flow::Continue)
    }

    fn apply(&mut self, edit: ReportEdit) -> Result<()> {
        let report = self.session.edit(edit)?;
        println!(
            "Score {}/100, {} general, {} specific.",
            report.score,
            report.general_issues.len(),
            report.specific_issues.len()
        );
        Ok(())
    }

    fn start_analysis(&mut self) -> Result<()> {
        let ticket = self.session.begin_analysis()?;
        let ticket_id = ticket.id();
        if let Err(err) = spawn_analysis(Arc::clone(&self.gateway), ticket, self.tx.clone()) {
            warn!(error = %err, "could not start analysis worker");
            self.session.complete_analysis(
                ticket_id,
                Err(AnalysisFailure::Request(format!("{err:#}"))),
            );
            return Err(err);
        }
        self.analysis_started = Some(Instant::now());
        self.last_progress = Instant::now();
        println!(
            "Analyzing with {}... (/cancel to abandon)",
            self.gateway.model().name
        );
        Ok(())
    }

    fn finish_analysis(&mut self, ticket: u64, outcome: Result<Report, AnalysisFailure>) {
        let abandoned = self.session.abandoned_ticket() == Some(ticket);
        match self.session.complete_analysis(ticket, outcome) {
            Completion::Applied(SessionPhase::Reviewing) => {
                self.analysis_started = None;
                println!();
                print_report(&self.session);
            }
            Completion::Applied(phase) => {
                self.analysis_started = None;
                println!();
                if let Some(message) = self.session.last_error() {
                    println!("{message}");
                }
                println!("Now {phase}. /analyze to retry or /dismiss to clear the message.");
            }
            Completion::Stale if abandoned => {
                println!();
                println!("The cancelled analysis has returned; /analyze is available again.");
            }
            Completion::Stale => debug!(ticket, "ignored late analysis result"),
        }
    }

    fn report_progress(&mut self) {
        let Some(started) = self.analysis_started else {
            return;
        };
        if self.session.phase() != SessionPhase::Analyzing {
            self.analysis_started = None;
            return;
        }
        if self.last_progress.elapsed() >= PROGRESS_INTERVAL {
            println!("Still analyzing ({}s)...", started.elapsed().as_secs());
            self.last_progress = Instant::now();
        }
    }

    fn print_status(&self) {
        println!("Session {}: {}", self.session.session_id(), self.session.phase());
        for slot in ImageSlot::ALL {
            match self.session.asset(slot) {
                Some(asset) => println!(
                    "  {slot}: {} ({}, {}x{}, {} bytes)",
                    asset.name(),
                    asset.media_type(),
                    asset.width(),
                    asset.height(),
                    asset.byte_len()
                ),
                None => println!("  {slot}: empty"),
            }
        }
        println!("  model: {}", self.gateway.model().name);
        if let Some(editor) = self.session.editor() {
            println!(
                "  report: score {}, {} issues, {} edits",
                editor.report().score,
                editor.report().issue_count(),
                editor.edit_count()
            );
        }
        if let Some(message) = self.session.last_error() {
            println!("  message: {message}");
        }
    }

    fn output_path(&self, requested: Option<String>, default_name: &str) -> PathBuf {
        requested
            .map(PathBuf::from)
            .unwrap_or_else(|| self.out.join(default_name))
    }
}
