//! Walking a [`Program`] against a live screen.
//!
//! The walk uses an explicit stack of frames rather than recursion, so
//! nesting depth is bounded by memory only. Each frame is a borrowed slice of
//! instructions, a program counter, and how many more passes remain (for
//! `repeat`). Frames opened by `try`, and every frame nested in one, are
//! guarded: a missing template or a match timeout inside them is logged and
//! the walk moves on to the next instruction.
//!
//! Status moves `Ready → Running → {Completed | Failed | Aborted}`. While a
//! visual instruction is pending the status is `Matching` (inside the retry
//! controller) and then `Acting` (dispatching input).

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::capture::CaptureSource;
use crate::clock::{AbortSignal, Clock, SystemClock};
use crate::coords;
use crate::error::{Error, ErrorCode, Result};
use crate::geometry::Point;
use crate::input::InputSimulator;
use crate::retry::{RetryController, RetryOutcome};
use crate::scale::ScaleResolver;
use crate::script::{Instruction, InstructionKind, Program, Target};
use crate::template::TemplateStore;
use crate::vars::VariableStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Ready,
    Running,
    Matching,
    Acting,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Aborted
        )
    }
}

/// Where and why a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    /// Pre-order index of the failing instruction.
    pub index: usize,
    pub line: usize,
    pub instruction: &'static str,
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_score: Option<f64>,
    #[serde(skip)]
    pub error: Error,
}

impl FailureReport {
    fn new(instruction: &Instruction, error: Error) -> Self {
        Self {
            index: instruction.index,
            line: instruction.line,
            instruction: instruction.kind.keyword(),
            code: error.code(),
            message: error.to_string(),
            suggestion: error.suggestion(),
            last_score: error.last_score(),
            error,
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub status: RunStatus,
    /// Instructions dispatched, counting every pass through a repeat body.
    pub executed: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

struct Frame<'p> {
    body: &'p [Instruction],
    pc: usize,
    /// Passes left including the current one.
    remaining: u32,
    /// Inside a `try` block.
    guarded: bool,
}

/// Mutable state of one run.
#[derive(Default)]
pub struct ExecutionContext<'p> {
    pub vars: VariableStore,
    scale: ScaleResolver,
    frames: Vec<Frame<'p>>,
    status: RunStatus,
}

impl<'p> ExecutionContext<'p> {
    fn new(vars: VariableStore) -> Self {
        Self {
            vars,
            ..Self::default()
        }
    }

    /// Frames currently on the stack.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }
}

enum Flow<'p> {
    Next,
    Enter { body: &'p [Instruction], times: u32 },
    Guard { body: &'p [Instruction] },
}

/// Failures a `try` block absorbs.
fn recoverable(error: &Error) -> bool {
    matches!(
        error,
        Error::MatchTimeout { .. } | Error::TemplateNotFound { .. }
    )
}

#[derive(Clone, Copy)]
enum Action {
    Click,
    Move,
}

/// Runs one program with its own context and collaborators.
pub struct Executor<'p, C, I> {
    program: &'p Program,
    templates: Arc<TemplateStore>,
    capture: C,
    input: I,
    clock: Box<dyn Clock + 'p>,
    abort: AbortSignal,
    run_id: Option<String>,
    ctx: ExecutionContext<'p>,
}

impl<'p, C: CaptureSource, I: InputSimulator> Executor<'p, C, I> {
    pub fn new(program: &'p Program, templates: Arc<TemplateStore>, capture: C, input: I) -> Self {
        let mut vars = VariableStore::new();
        vars.set_defaults(program.defaults().clone());
        Self {
            program,
            templates,
            capture,
            input,
            clock: Box::new(SystemClock::new()),
            abort: AbortSignal::new(),
            run_id: None,
            ctx: ExecutionContext::new(vars),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'p) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    /// Tag reports with a caller-chosen identifier.
    pub fn with_run_id(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    /// Use `vars` for this run. The program's declared defaults are installed
    /// as its lowest-priority layer.
    pub fn with_variables(mut self, mut vars: VariableStore) -> Self {
        vars.set_defaults(self.program.defaults().clone());
        self.ctx.vars = vars;
        self
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn status(&self) -> RunStatus {
        self.ctx.status
    }

    pub fn context(&self) -> &ExecutionContext<'p> {
        &self.ctx
    }

    pub fn variables(&self) -> &VariableStore {
        &self.ctx.vars
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    pub fn into_input(self) -> I {
        self.input
    }

    fn transition(&mut self, to: RunStatus) {
        let from = self.ctx.status;
        if from != to {
            debug!(?from, ?to, "status");
            self.ctx.status = to;
        }
    }

    /// Execute the program from the top.
    pub fn run(&mut self) -> RunReport {
        let started = self.clock.now();
        let program = self.program;
        self.ctx.scale.invalidate();
        self.ctx.frames.clear();
        self.ctx.frames.push(Frame {
            body: program.instructions(),
            pc: 0,
            remaining: 1,
            guarded: false,
        });
        self.ctx.status = RunStatus::Ready;
        self.transition(RunStatus::Running);

        let mut executed = 0usize;
        let outcome: std::result::Result<(), (Option<&'p Instruction>, Error)> = loop {
            if self.abort.is_triggered() {
                break Err((None, Error::Aborted));
            }
            let Some(frame) = self.ctx.frames.last_mut() else {
                break Ok(());
            };
            let body: &'p [Instruction] = frame.body;
            if frame.pc >= body.len() {
                if frame.remaining > 1 {
                    frame.remaining -= 1;
                    frame.pc = 0;
                } else {
                    self.ctx.frames.pop();
                }
                continue;
            }
            let instruction = &body[frame.pc];
            let guarded = frame.guarded;
            frame.pc += 1;
            executed += 1;

            debug!(
                index = instruction.index,
                line = instruction.line,
                instruction = instruction.kind.keyword(),
                "dispatch"
            );
            let (body, times, guarded) = match self.step(instruction) {
                Ok(Flow::Next) => continue,
                Ok(Flow::Enter { body, times }) => (body, times, guarded),
                Ok(Flow::Guard { body }) => (body, 1, true),
                Err(e) if guarded && recoverable(&e) => {
                    warn!(
                        index = instruction.index,
                        line = instruction.line,
                        code = %e.code(),
                        "{e}; continuing inside try block"
                    );
                    continue;
                }
                Err(e) => break Err((Some(instruction), e)),
            };
            if times > 0 && !body.is_empty() {
                self.ctx.frames.push(Frame {
                    body,
                    pc: 0,
                    remaining: times,
                    guarded,
                });
            }
        };

        self.ctx.frames.clear();
        let failure = match outcome {
            Ok(()) => {
                self.transition(RunStatus::Completed);
                None
            }
            Err((at, Error::Aborted)) => {
                self.transition(RunStatus::Aborted);
                match at {
                    Some(i) => info!(index = i.index, line = i.line, "run aborted"),
                    None => info!("run aborted"),
                }
                None
            }
            Err((at, error)) => {
                self.transition(RunStatus::Failed);
                at.map(|instruction| {
                    let failure = FailureReport::new(instruction, error);
                    warn!(
                        index = failure.index,
                        line = failure.line,
                        code = %failure.code,
                        "{}",
                        failure.message
                    );
                    failure
                })
            }
        };

        RunReport {
            run_id: self.run_id.clone(),
            status: self.ctx.status,
            executed,
            elapsed_ms: self.clock.now().saturating_sub(started).as_millis() as u64,
            failure,
        }
    }

    fn step(&mut self, instruction: &'p Instruction) -> Result<Flow<'p>> {
        match &instruction.kind {
            InstructionKind::Click {
                target,
                best_effort,
            } => self.visual(instruction, target, *best_effort, Action::Click)?,
            InstructionKind::Hover {
                target,
                best_effort,
            } => self.visual(instruction, target, *best_effort, Action::Move)?,
            InstructionKind::ClickAt { x, y } => {
                let x = x.eval_number(&self.ctx.vars)?;
                let y = y.eval_number(&self.ctx.vars)?;
                let point = Point::new(x, y);
                let at = coords::clamp(point, self.capture.logical_size()?);
                self.act(|input| input.click(at))?;
            }
            InstructionKind::Scroll { direction, amount } => {
                let notches = amount.eval_count(&self.ctx.vars)?;
                let (dx, dy) = direction.delta(i32::try_from(notches).unwrap_or(i32::MAX));
                self.act(|input| input.scroll(dx, dy))?;
            }
            InstructionKind::Wait { duration } => self.wait(*duration)?,
            InstructionKind::Type { text } => {
                let text = text.render(&self.ctx.vars)?;
                self.act(|input| input.type_text(&text))?;
            }
            InstructionKind::Press { key } => {
                let key = key.render(&self.ctx.vars)?;
                self.act(|input| input.press_key(&key))?;
            }
            InstructionKind::Log { message } => {
                let message = message.render(&self.ctx.vars)?;
                info!(line = instruction.line, "{message}");
            }
            InstructionKind::Open { target } => {
                let target = target.render(&self.ctx.vars)?;
                info!(line = instruction.line, target = target.as_str(), "open");
                self.act(|input| input.open(&target))?;
            }
            InstructionKind::Try { body } => {
                return Ok(Flow::Guard {
                    body: body.as_slice(),
                })
            }
            InstructionKind::Repeat { count, body } => {
                let times = count.eval_count(&self.ctx.vars)?;
                return Ok(Flow::Enter {
                    body: body.as_slice(),
                    times,
                });
            }
            InstructionKind::SetVariable { name, value } => {
                let value = value.eval(&self.ctx.vars)?;
                debug!(name = name.as_str(), %value, "set variable");
                self.ctx.vars.set(name, value)?;
            }
            InstructionKind::IfFound {
                target,
                then_body,
                else_body,
            } => {
                let (id, outcome) = self.locate(target)?;
                let found = outcome.result.found;
                debug!(template = id.as_str(), found, score = outcome.result.score, "if found");
                let body = if found { then_body } else { else_body };
                return Ok(Flow::Enter {
                    body: body.as_slice(),
                    times: 1,
                });
            }
            InstructionKind::Abort { reason } => {
                if let Some(reason) = reason {
                    let reason = reason
                        .render(&self.ctx.vars)
                        .unwrap_or_else(|_| reason.to_string());
                    info!(line = instruction.line, "abort: {reason}");
                }
                return Err(Error::Aborted);
            }
        }
        Ok(Flow::Next)
    }

    fn wait(&mut self, duration: Duration) -> Result<()> {
        if self.clock.sleep(duration, &self.abort) {
            Ok(())
        } else {
            Err(Error::Aborted)
        }
    }

    /// Resolve the target's template and poll for it.
    fn locate(&mut self, target: &Target) -> Result<(String, RetryOutcome)> {
        let id = target.template.render(&self.ctx.vars)?;
        let template = self.templates.load(&id)?;

        self.transition(RunStatus::Matching);
        let outcome = RetryController {
            source: &mut self.capture,
            scale: &mut self.ctx.scale,
            clock: &*self.clock,
            abort: &self.abort,
        }
        .find_with_retry(&template, target.policy);
        self.transition(RunStatus::Running);

        Ok((id, outcome?))
    }

    fn visual(
        &mut self,
        instruction: &Instruction,
        target: &Target,
        best_effort: bool,
        action: Action,
    ) -> Result<()> {
        let (id, outcome) = self.locate(target)?;
        let result = &outcome.result;

        if let (true, Some(raw)) = (result.found, result.location) {
            let at = coords::map(raw, outcome.scale, self.capture.logical_size()?);
            debug!(
                template = id.as_str(),
                score = result.score,
                raw_x = raw.x,
                raw_y = raw.y,
                x = at.x,
                y = at.y,
                attempts = outcome.attempts,
                "target located"
            );
            return self.act(|input| match action {
                Action::Click => input.click(at),
                Action::Move => input.move_to(at),
            });
        }

        if best_effort {
            warn!(
                index = instruction.index,
                line = instruction.line,
                template = id.as_str(),
                score = result.score,
                "best-effort target not found, continuing"
            );
            return Ok(());
        }

        Err(Error::MatchTimeout {
            template: id,
            last_score: result.score,
            threshold: result.threshold,
            attempts: outcome.attempts,
            timeout_ms: target.policy.timeout().as_millis() as u64,
        })
    }

    fn act(&mut self, f: impl FnOnce(&mut I) -> Result<()>) -> Result<()> {
        self.transition(RunStatus::Acting);
        let result = f(&mut self.input);
        self.transition(RunStatus::Running);
        result
    }
}
