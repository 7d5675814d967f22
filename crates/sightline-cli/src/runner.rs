//! The `run` and `check` commands.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use sightline_core::clock::AbortSignal;
use sightline_core::error::{Error, ErrorCode};
use sightline_core::executor::{Executor, RunReport, RunStatus};
use sightline_core::geometry::Size;
use sightline_core::script::{InstructionKind, Program};
use sightline_core::template::TemplateStore;
use sightline_core::vars::{Value, VariableStore};
use tracing::{info, info_span, Span};
use uuid::Uuid;

use crate::args::{CheckArgs, RunArgs, ScriptSource};
use crate::backend;
use crate::paths;
use crate::store::FileVariableStore;

pub const EXIT_OK: i32 = 0;
pub const EXIT_PARSE_ERROR: i32 = 1;
pub const EXIT_FAILED: i32 = 2;
pub const EXIT_ABORTED: i32 = 3;

pub fn exit_code(status: RunStatus) -> i32 {
    match status {
        RunStatus::Completed => EXIT_OK,
        RunStatus::Aborted => EXIT_ABORTED,
        _ => EXIT_FAILED,
    }
}

fn load_script(source: &ScriptSource) -> anyhow::Result<String> {
    if source.inline {
        return Ok(source.script.clone());
    }
    std::fs::read_to_string(&source.script)
        .with_context(|| format!("Failed to read script {}", source.script))
}

#[derive(Serialize)]
struct ParseFailure {
    status: &'static str,
    code: ErrorCode,
    message: String,
    suggestion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
}

fn print_parse_error(error: &Error, json: bool) -> anyhow::Result<()> {
    if json {
        let out = ParseFailure {
            status: "parse_error",
            code: error.code(),
            message: error.to_string(),
            suggestion: error.suggestion(),
            line: match error {
                Error::Parse { line, .. } => Some(*line),
                _ => None,
            },
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        eprintln!("Error: {error}");
        eprintln!("  suggestion: {}", error.suggestion());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct MissingTemplate {
    id: String,
    line: usize,
    message: String,
}

#[derive(Serialize)]
struct CheckSummary<'a> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    instructions: usize,
    defaults: usize,
    missing_templates: &'a [MissingTemplate],
}

/// Load every template a program names literally; ids built from
/// `${name}` references are only known at run time and are skipped.
fn missing_templates(program: &Program, store: &TemplateStore) -> Vec<MissingTemplate> {
    program
        .walk()
        .into_iter()
        .filter_map(|(_, instruction)| {
            let target = match &instruction.kind {
                InstructionKind::Click { target, .. }
                | InstructionKind::Hover { target, .. }
                | InstructionKind::IfFound { target, .. } => target,
                _ => return None,
            };
            let id = target.template.as_literal()?;
            let error = store.load(&id).err()?;
            Some(MissingTemplate {
                id,
                line: instruction.line,
                message: error.to_string(),
            })
        })
        .collect()
}

/// `sightline check`: parse, resolve literal templates and summarize.
pub fn check(args: CheckArgs) -> anyhow::Result<i32> {
    let source = load_script(&args.source)?;
    let program = match Program::parse(&source) {
        Ok(program) => program,
        Err(e) => {
            print_parse_error(&e, args.json)?;
            return Ok(EXIT_PARSE_ERROR);
        }
    };

    let store = TemplateStore::new(paths::templates_dir(args.templates.as_deref()));
    let missing = missing_templates(&program, &store);
    let summary = CheckSummary {
        status: if missing.is_empty() { "ok" } else { "invalid" },
        title: program.metadata().title.as_deref(),
        instructions: program.len(),
        defaults: program.defaults().len(),
        missing_templates: &missing,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        if let Some(title) = summary.title {
            println!("{title}");
        }
        for m in &missing {
            eprintln!("Error: line {}: {}", m.line, m.message);
        }
        println!(
            "{}: {} instructions, {} defaults",
            summary.status, summary.instructions, summary.defaults
        );
    }

    Ok(if missing.is_empty() {
        EXIT_OK
    } else {
        EXIT_PARSE_ERROR
    })
}

/// Everything a run needs, moved onto the blocking worker.
struct Plan {
    id: Uuid,
    program: Program,
    templates: Arc<TemplateStore>,
    backing: Option<FileVariableStore>,
    presets: Vec<(String, String)>,
    screen: Option<PathBuf>,
    logical: Option<Size>,
    abort: AbortSignal,
    span: Span,
}

struct Outcome {
    report: RunReport,
    dry_run: bool,
}

fn execute(plan: Plan) -> anyhow::Result<Outcome> {
    let _enter = plan.span.enter();
    let backend = backend::select(plan.screen.as_deref(), plan.logical)?;

    let mut vars = VariableStore::new();
    if let Some(backing) = plan.backing {
        info!(path = %backing.path().display(), "persisting variables");
        vars = vars.with_backing(Box::new(backing));
    }
    for (name, raw) in plan.presets {
        vars.preset(name, Value::infer(&raw));
    }

    info!(
        instructions = plan.program.len(),
        title = plan.program.metadata().title.as_deref().unwrap_or(""),
        dry_run = backend.dry_run,
        "starting run"
    );
    let mut executor = Executor::new(&plan.program, plan.templates, backend.capture, backend.input)
        .with_clock(backend.clock)
        .with_abort(plan.abort)
        .with_run_id(plan.id.to_string())
        .with_variables(vars);
    let report = executor.run();
    info!(
        status = ?report.status,
        executed = report.executed,
        elapsed_ms = report.elapsed_ms,
        "run finished"
    );

    Ok(Outcome {
        report,
        dry_run: backend.dry_run,
    })
}

#[derive(Serialize)]
struct RunOutput<'a> {
    dry_run: bool,
    #[serde(flatten)]
    report: &'a RunReport,
}

fn render_report(outcome: &Outcome) -> String {
    let report = &outcome.report;
    let id = report.run_id.as_deref().unwrap_or("-");
    let mut out = String::new();
    let mode = if outcome.dry_run { " (dry run)" } else { "" };
    let status = match report.status {
        RunStatus::Completed => "completed",
        RunStatus::Aborted => "aborted",
        _ => "failed",
    };
    let _ = writeln!(
        out,
        "run {id}{mode}: {status} after {} instructions in {} ms",
        report.executed, report.elapsed_ms
    );
    if let Some(failure) = &report.failure {
        let _ = writeln!(
            out,
            "  at instruction {} (line {}, {}): {}",
            failure.index, failure.line, failure.instruction, failure.message
        );
        let _ = writeln!(out, "  suggestion: {}", failure.suggestion);
    }
    out
}

/// `sightline run`. Returns the process exit code.
pub fn run(args: RunArgs) -> anyhow::Result<i32> {
    let source = load_script(&args.source)?;
    let program = match Program::parse(&source) {
        Ok(program) => program,
        Err(e) => {
            print_parse_error(&e, args.json)?;
            return Ok(EXIT_PARSE_ERROR);
        }
    };

    let id = Uuid::new_v4();
    let templates_dir = paths::templates_dir(args.templates.as_deref());
    let backing = if args.persist {
        Some(FileVariableStore::open_default()?)
    } else {
        None
    };

    let abort = AbortSignal::new();
    let plan = Plan {
        id,
        program,
        templates: Arc::new(TemplateStore::new(templates_dir)),
        backing,
        presets: args.vars,
        screen: args.screen,
        logical: args.logical,
        abort: abort.clone(),
        span: info_span!("run", id = %id),
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let joined = runtime.block_on(async move {
        let mut task = tokio::task::spawn_blocking(move || execute(plan));
        tokio::select! {
            joined = &mut task => joined,
            Ok(()) = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, aborting run");
                abort.trigger();
                task.await
            }
            _ = sigterm() => {
                info!("Received SIGTERM, aborting run");
                abort.trigger();
                task.await
            }
        }
    });
    let outcome = joined.context("Run worker panicked")??;

    if args.json {
        let out = RunOutput {
            dry_run: outcome.dry_run,
            report: &outcome.report,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print!("{}", render_report(&outcome));
    }
    Ok(exit_code(outcome.report.status))
}

/// Wait for SIGTERM signal (Unix only).
///
/// If signal registration fails, logs a warning and waits indefinitely.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(
                "Failed to register SIGTERM handler: {}, runs will only respond to SIGINT",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

/// SIGTERM is not available on non-Unix platforms; use a never-completing future.
#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use sightline_core::input::InputEvent;
    use std::path::Path;

    fn checker() -> GrayImage {
        GrayImage::from_fn(12, 12, |x, y| {
            if (x / 3 + y / 3) % 2 == 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    /// A 160x120 screenshot of a 2x display with the template at raw (60, 40).
    fn fixture(dir: &Path) -> PathBuf {
        let mut screen = RgbaImage::from_fn(160, 120, |x, y| {
            let v = (40 + (x + y) * 150 / 280) as u8;
            Rgba([v, v, v, 255])
        });
        for (x, y, Luma([v])) in checker().enumerate_pixels() {
            screen.put_pixel(54 + x, 34 + y, Rgba([*v, *v, *v, 255]));
        }
        let templates = dir.join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        checker().save(templates.join("ok.png")).unwrap();

        let shot = dir.join("shot.png");
        screen.save(&shot).unwrap();
        shot
    }

    fn plan(dir: &Path, src: &str) -> Plan {
        Plan {
            id: Uuid::nil(),
            program: Program::parse(src).unwrap(),
            templates: Arc::new(TemplateStore::new(dir.join("templates"))),
            backing: None,
            presets: Vec::new(),
            screen: Some(fixture(dir)),
            logical: Some(Size::new(80, 60)),
            abort: AbortSignal::new(),
            span: Span::none(),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(RunStatus::Completed), 0);
        assert_eq!(exit_code(RunStatus::Failed), 2);
        assert_eq!(exit_code(RunStatus::Aborted), 3);
    }

    #[test]
    fn test_replay_run_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = execute(plan(tmp.path(), "click ok\ntype \"${user}\"")).unwrap();
        // `user` is undefined, so the run fails after the click.
        assert_eq!(outcome.report.status, RunStatus::Failed);
        assert!(outcome.dry_run);
        let failure = outcome.report.failure.as_ref().unwrap();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.code, ErrorCode::UndefinedVariable);

        let mut with_preset = plan(tmp.path(), "click ok\ntype \"${user}\"");
        with_preset.presets.push(("user".into(), "ada".into()));
        let outcome = execute(with_preset).unwrap();
        assert_eq!(outcome.report.status, RunStatus::Completed);

        let text = render_report(&outcome);
        assert!(text.starts_with(&format!("run {}", Uuid::nil())));
        assert!(text.contains("(dry run): completed after 2 instructions"));
    }

    #[test]
    fn test_replay_timeout_is_instant() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("templates")).unwrap();
        GrayImage::from_fn(8, 8, |x, _| Luma([(x * 30) as u8]))
            .save(tmp.path().join("templates").join("missing.png"))
            .unwrap();
        std::fs::write(
            tmp.path().join("templates").join("missing.json"),
            r#"{"threshold": 0.99}"#,
        )
        .unwrap();

        let started = std::time::Instant::now();
        let outcome = execute(plan(tmp.path(), "click missing timeout=30s")).unwrap();
        assert_eq!(outcome.report.status, RunStatus::Failed);
        assert_eq!(
            outcome.report.failure.as_ref().unwrap().code,
            ErrorCode::MatchTimeout
        );
        assert!(started.elapsed() < std::time::Duration::from_secs(20));

        let text = render_report(&outcome);
        assert!(text.contains("line 1, click"));
        assert!(text.contains("suggestion:"));
    }

    #[test]
    fn test_report_json_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let outcome = execute(plan(tmp.path(), "hover ok")).unwrap();
        let out = RunOutput {
            dry_run: outcome.dry_run,
            report: &outcome.report,
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["run_id"], Uuid::nil().to_string());
        assert_eq!(json["status"], "completed");
        assert_eq!(json["executed"], 1);
        assert_eq!(json["dry_run"], true);
        assert!(json.get("failure").is_none());
    }

    #[test]
    fn test_parse_error_exits_before_running() {
        let args = RunArgs {
            source: ScriptSource {
                script: "repeat 2 {\n  click ok\n".into(),
                inline: true,
            },
            templates: None,
            screen: None,
            logical: None,
            vars: Vec::new(),
            persist: false,
            json: true,
        };
        assert_eq!(run(args).unwrap(), EXIT_PARSE_ERROR);
    }

    #[test]
    fn test_missing_script_file_is_setup_error() {
        let args = CheckArgs {
            source: ScriptSource {
                script: "/definitely/not/here.sl".into(),
                inline: false,
            },
            templates: None,
            json: false,
        };
        assert!(check(args).is_err());
    }

    fn check_args(dir: &Path, script: &str, json: bool) -> CheckArgs {
        CheckArgs {
            source: ScriptSource {
                script: script.into(),
                inline: true,
            },
            templates: Some(dir.join("templates")),
            json,
        }
    }

    #[test]
    fn test_check_inline() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());

        let ok = check_args(dir.path(), "# title: demo\nclick ok", false);
        assert_eq!(check(ok).unwrap(), EXIT_OK);

        let bad = check_args(dir.path(), "frobnicate", true);
        assert_eq!(check(bad).unwrap(), EXIT_PARSE_ERROR);
    }

    #[test]
    fn test_check_reports_missing_templates_by_line() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path());
        let src = "click ok\nrepeat 2 {\n  hover ghost\n}\nclick ${name}\nif found ok {\n  log hi\n}";

        let program = Program::parse(src).unwrap();
        let store = TemplateStore::new(dir.path().join("templates"));
        let missing = missing_templates(&program, &store);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, "ghost");
        assert_eq!(missing[0].line, 3);
        assert!(missing[0].message.contains("ghost"));

        let json = serde_json::to_value(CheckSummary {
            status: "invalid",
            title: None,
            instructions: program.len(),
            defaults: 0,
            missing_templates: &missing,
        })
        .unwrap();
        assert_eq!(json["missing_templates"][0]["line"], 3);
        assert!(json.get("title").is_none());

        assert_eq!(check(check_args(dir.path(), src, false)).unwrap(), EXIT_PARSE_ERROR);
        assert_eq!(check(check_args(dir.path(), src, true)).unwrap(), EXIT_PARSE_ERROR);
        assert_eq!(check(check_args(dir.path(), "click ok", true)).unwrap(), EXIT_OK);
    }

    #[test]
    fn test_recorded_click_lands_in_logical_space() {
        // The dry-run input log is the observable side effect; drive the
        // executor directly with the same backend to inspect it.
        let tmp = tempfile::tempdir().unwrap();
        let shot = fixture(tmp.path());
        let b = backend::replay(&shot, Some(Size::new(80, 60))).unwrap();
        let program = Program::parse("click ok").unwrap();
        let templates = Arc::new(TemplateStore::new(tmp.path().join("templates")));
        let recorder = sightline_core::input::RecordingInput::new();
        let mut executor =
            Executor::new(&program, templates, b.capture, recorder).with_clock(b.clock);
        let report = executor.run();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(
            executor.input().events(),
            &[InputEvent::Click { x: 30.0, y: 20.0 }]
        );
    }
}
