// Engine Driver
//
// Runs one prompt through the external reasoning engine:
// - Spawns the engine with piped stdio in its own process group
// - Writes the prompt to stdin once and closes it
// - Streams stdout through the line parser, forwarding deltas
// - Races output against the hard deadline, the stall watchdog and cancel
// - Fires exactly one terminal callback per invocation

use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use super::detector;
use super::error::{EngineError, EngineResult};
use super::parser::EventLineParser;
use super::security::{sanitize_line, validate_arguments, validate_working_directory};
use super::watchdog::{deadline_after, StallWatchdog};
use crate::config::EngineConfig;
use crate::models::engine::{
    ConversationId, EngineCompletion, EngineRequest, Invocation, InvocationState, ProtocolEvent,
};
use crate::services::tool_call::extract_tool_call;
use crate::session_store::SessionStore;
use crate::utils::path_resolver;

/// Stdout and stderr read size
const READ_CHUNK_BYTES: usize = 8192;

/// Bytes of redacted stderr kept for error reports
const STDERR_TAIL_BYTES: usize = 4096;

/// Longest unterminated stderr line held before it is flushed as-is
const STDERR_LINE_MAX: usize = 4096;

/// How long a process gets to exit on its own after its result event
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Time between SIGTERM and SIGKILL
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Receives the outcome of an invocation.
///
/// Exactly one of `on_complete`, `on_error` or `on_cancelled` is called per
/// invocation. `on_delta` may be called any number of times before that and
/// always receives the full text accumulated so far.
pub trait EngineObserver: Send + Sync {
    fn on_delta(&self, _accumulated: &str) {}

    fn on_complete(&self, completion: EngineCompletion);

    fn on_error(&self, error: EngineError);

    fn on_cancelled(&self) {}
}

/// State shared between the driver task and every `Canceller`
struct InvocationControl {
    killed: AtomicBool,
    /// Set by whoever fires the terminal callback
    claimed: AtomicBool,
    notify: Notify,
    observer: Arc<dyn EngineObserver>,
}

impl InvocationControl {
    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Claim the single terminal callback for the driver task
    fn claim(&self) -> bool {
        !self.is_killed() && !self.claimed.swap(true, Ordering::SeqCst)
    }

    fn may_emit_delta(&self) -> bool {
        !self.is_killed() && !self.claimed.load(Ordering::SeqCst)
    }
}

/// Cloneable cancel switch for one invocation
#[derive(Clone)]
pub struct Canceller {
    control: Arc<InvocationControl>,
}

impl Canceller {
    /// Cancel the invocation.
    ///
    /// Returns `true` if this call won the terminal callback, in which case
    /// `on_cancelled` has already fired. Returns `false` when the invocation
    /// had already finished or was cancelled before.
    pub fn cancel(&self) -> bool {
        if self.control.killed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.control.notify.notify_one();

        if self.control.claimed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.control.observer.on_cancelled();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_killed()
    }
}

/// Handle to a running invocation
pub struct InvocationHandle {
    id: String,
    conversation_id: ConversationId,
    canceller: Canceller,
    task: JoinHandle<InvocationState>,
}

impl InvocationHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    pub fn cancel(&self) -> bool {
        self.canceller.cancel()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the invocation to reach a terminal state
    pub async fn join(self) -> InvocationState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                log::error!("[EngineDriver] Invocation {} task failed: {}", self.id, e);
                InvocationState::Errored
            }
        }
    }
}

/// Spawns and supervises engine invocations
pub struct EngineDriver {
    config: EngineConfig,
    binary_path: String,
    sessions: Arc<dyn SessionStore>,
}

impl EngineDriver {
    /// Create a driver, resolving the engine binary from configuration
    pub fn new(config: EngineConfig, sessions: Arc<dyn SessionStore>) -> EngineResult<Self> {
        let binary_path = detector::resolve_binary(&config)?;
        Ok(Self::with_binary(config, binary_path, sessions))
    }

    /// Create a driver for an already resolved binary
    pub fn with_binary(
        config: EngineConfig,
        binary_path: impl Into<String>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            config,
            binary_path: binary_path.into(),
            sessions,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn binary_path(&self) -> &str {
        &self.binary_path
    }

    /// Resume token stored by the last completed invocation of a conversation
    pub fn resume_token_for(&self, conversation_id: ConversationId) -> Option<String> {
        self.sessions.get_resume_token(conversation_id)
    }

    /// Start an invocation on the current tokio runtime
    pub fn invoke(&self, request: EngineRequest, observer: Arc<dyn EngineObserver>) -> InvocationHandle {
        let id = Uuid::new_v4().to_string();
        let conversation_id = request.conversation_id;

        let control = Arc::new(InvocationControl {
            killed: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
            notify: Notify::new(),
            observer,
        });

        let run = InvocationRun {
            invocation: Invocation::new(
                id.clone(),
                conversation_id,
                request.resume_token.clone(),
                self.config.max_output_bytes,
            ),
            timeout: request.timeout.unwrap_or_else(|| self.config.timeout()),
            prompt: request.prompt,
            config: self.config.clone(),
            binary_path: self.binary_path.clone(),
            sessions: Arc::clone(&self.sessions),
            control: Arc::clone(&control),
            session_id: None,
            truncation_logged: false,
        };

        log::info!(
            "[EngineDriver] Starting invocation {} for conversation {}{}",
            id,
            conversation_id,
            if request.resume_token.is_some() { " (resuming)" } else { "" }
        );

        let task = tokio::spawn(run.run());

        InvocationHandle {
            id,
            conversation_id,
            canceller: Canceller { control },
            task,
        }
    }
}

/// How the supervision loop ended
enum LoopExit {
    Cancelled,
    TimedOut,
    Stalled,
    /// A result event was handled
    Finished(InvocationState),
    Exited(std::io::Result<ExitStatus>),
}

/// Everything the driver task owns for one invocation
struct InvocationRun {
    invocation: Invocation,
    prompt: String,
    timeout: Duration,
    config: EngineConfig,
    binary_path: String,
    sessions: Arc<dyn SessionStore>,
    control: Arc<InvocationControl>,
    /// Session id announced by a meta event
    session_id: Option<String>,
    truncation_logged: bool,
}

impl InvocationRun {
    async fn run(mut self) -> InvocationState {
        let state = if self.control.is_killed() {
            self.cancelled()
        } else {
            self.execute().await
        };

        log::info!(
            "[EngineDriver] Invocation {} finished: {}",
            self.invocation.id,
            state
        );
        state
    }

    fn build_args(&self) -> Vec<String> {
        let mut args = self.config.args.clone();
        if let Some(token) = &self.invocation.resume_token {
            args.push(self.config.resume_flag.clone());
            args.push(token.clone());
        }
        args
    }

    fn build_command(&self, args: &[String]) -> Command {
        let mut std_cmd = std::process::Command::new(&self.binary_path);
        std_cmd
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("PATH", path_resolver::get_path())
            .envs(&self.config.env);

        if let Some(dir) = &self.config.working_dir {
            std_cmd.current_dir(dir);
        }

        // Own process group so the whole tree can be signalled
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);
        cmd
    }

    async fn execute(&mut self) -> InvocationState {
        let args = self.build_args();
        if let Err(e) = validate_arguments(&args) {
            return self.fail(e, InvocationState::Errored);
        }
        if let Some(dir) = self.config.working_dir.clone() {
            if let Err(e) = validate_working_directory(&dir) {
                return self.fail(e, InvocationState::Errored);
            }
        }

        let mut child = match self.build_command(&args).spawn() {
            Ok(child) => child,
            Err(e) => {
                return self.fail(
                    EngineError::SpawnFailed(format!("{}: {}", self.binary_path, e)),
                    InvocationState::Errored,
                )
            }
        };

        let (Some(stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            terminate(&mut child).await;
            return self.fail(
                EngineError::Io("engine stdio was not captured".to_string()),
                InvocationState::Errored,
            );
        };

        let control = Arc::clone(&self.control);
        let hard_deadline = deadline_after(Instant::now(), self.timeout);
        let stall_window = self.config.stall_window();

        // Prompt goes in whole before any output is read
        let write_limit = stall_window.min(self.timeout);
        let prompt = std::mem::take(&mut self.prompt);
        tokio::select! {
            _ = control.notify.notified() => {
                terminate(&mut child).await;
                return self.cancelled();
            }
            written = tokio::time::timeout(write_limit, write_prompt(stdin, prompt)) => match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    log::warn!("[EngineDriver] Engine closed stdin early: {}", e);
                }
                Ok(Err(e)) => {
                    terminate(&mut child).await;
                    return self.fail(EngineError::StdinWrite(e.to_string()), InvocationState::Errored);
                }
                Err(_) => {
                    terminate(&mut child).await;
                    return if self.timeout <= stall_window {
                        self.fail(self.timed_out_error(), InvocationState::TimedOut)
                    } else {
                        self.fail(self.stalled_error(), InvocationState::Stalled)
                    };
                }
            }
        }

        let mut parser = EventLineParser::new();
        let mut watchdog = StallWatchdog::new(stall_window);
        let mut stderr_tail = String::new();
        let mut stderr_carry = Vec::new();
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        let mut err_buf = vec![0u8; READ_CHUNK_BYTES];
        let mut stdout_open = true;
        let mut stderr_open = true;

        let exit = loop {
            tokio::select! {
                biased;

                _ = control.notify.notified() => break LoopExit::Cancelled,

                _ = sleep_until(hard_deadline) => break LoopExit::TimedOut,

                _ = sleep_until(watchdog.deadline()) => {
                    if watchdog.is_stalled(Instant::now()) {
                        break LoopExit::Stalled;
                    }
                }

                read = stdout.read(&mut buf), if stdout_open => match read {
                    Ok(0) => stdout_open = false,
                    Ok(n) => {
                        watchdog.touch();
                        let events = parser.feed(&buf[..n]);
                        if let Some(state) = self.handle_events(events) {
                            break LoopExit::Finished(state);
                        }
                    }
                    Err(e) => {
                        log::warn!("[EngineDriver] stdout read failed: {}", e);
                        stdout_open = false;
                    }
                },

                // Any stderr bytes count as activity, complete line or not
                read = stderr.read(&mut err_buf), if stderr_open => match read {
                    Ok(0) => {
                        flush_stderr(&mut stderr_carry, &mut stderr_tail);
                        stderr_open = false;
                    }
                    Ok(n) => {
                        watchdog.touch();
                        collect_stderr(&mut stderr_carry, &err_buf[..n], &mut stderr_tail);
                    }
                    Err(e) => {
                        log::debug!("[EngineDriver] stderr read failed: {}", e);
                        flush_stderr(&mut stderr_carry, &mut stderr_tail);
                        stderr_open = false;
                    }
                },

                status = child.wait(), if !stdout_open && !stderr_open => break LoopExit::Exited(status),
            }
        };

        match exit {
            LoopExit::Cancelled => {
                terminate(&mut child).await;
                self.cancelled()
            }
            LoopExit::TimedOut => {
                log::warn!("[EngineDriver] Invocation {} hit hard deadline", self.invocation.id);
                terminate(&mut child).await;
                self.fail(self.timed_out_error(), InvocationState::TimedOut)
            }
            LoopExit::Stalled => {
                log::warn!(
                    "[EngineDriver] Invocation {} stalled after {:?} of silence",
                    self.invocation.id,
                    stall_window
                );
                terminate(&mut child).await;
                self.fail(self.stalled_error(), InvocationState::Stalled)
            }
            LoopExit::Finished(state) => {
                drop(stdout);
                drop(stderr);
                if tokio::time::timeout(EXIT_GRACE, child.wait()).await.is_err() {
                    log::debug!("[EngineDriver] Engine still running after result, terminating");
                    terminate(&mut child).await;
                }
                state
            }
            LoopExit::Exited(status) => {
                let events = parser.finish();
                if let Some(state) = self.handle_events(events) {
                    return state;
                }
                self.handle_exit(status, stderr_tail)
            }
        }
    }

    /// Apply parsed events; returns the final state once a result event is handled
    fn handle_events(&mut self, events: Vec<ProtocolEvent>) -> Option<InvocationState> {
        for event in events {
            match event {
                ProtocolEvent::Delta { text } => self.handle_delta(&text),
                ProtocolEvent::Meta { info } => {
                    log::debug!(
                        "[EngineDriver] Meta event: {}",
                        info.subtype.as_deref().unwrap_or("unknown")
                    );
                    if info.session_id.is_some() {
                        self.session_id = info.session_id;
                    }
                }
                ProtocolEvent::Terminal {
                    resume_token,
                    raw_result,
                    is_error,
                } => return Some(self.handle_terminal(resume_token, raw_result, is_error)),
            }
        }
        None
    }

    fn handle_delta(&mut self, text: &str) {
        if self.invocation.append_delta(text) && self.control.may_emit_delta() {
            self.control.observer.on_delta(self.invocation.accumulated_text());
        }

        if self.invocation.is_truncated() && !self.truncation_logged {
            self.truncation_logged = true;
            log::warn!(
                "[EngineDriver] Invocation {} output exceeded {} bytes, dropping further deltas",
                self.invocation.id,
                self.config.max_output_bytes
            );
        }
    }

    fn handle_terminal(
        &mut self,
        resume_token: Option<String>,
        raw_result: Option<String>,
        is_error: bool,
    ) -> InvocationState {
        let resume_token = resume_token.or_else(|| self.session_id.clone());
        self.store_resume_token(resume_token.as_deref());

        let text = match raw_result.filter(|r| !r.trim().is_empty()) {
            Some(result) => cap_text(result, self.config.max_output_bytes),
            None => self.invocation.accumulated_text().to_string(),
        };

        if is_error {
            let message = if text.trim().is_empty() {
                "no details".to_string()
            } else {
                text
            };
            return self.fail(EngineError::EngineReported(message), InvocationState::Errored);
        }

        if text.trim().is_empty() {
            return self.fail(
                EngineError::EmptyOutput { stderr: String::new() },
                InvocationState::Errored,
            );
        }

        self.complete(text, resume_token, false)
    }

    fn handle_exit(&mut self, status: std::io::Result<ExitStatus>, stderr_tail: String) -> InvocationState {
        let status = match status {
            Ok(status) => status,
            Err(e) => return self.fail(EngineError::Io(e.to_string()), InvocationState::Errored),
        };

        if !self.invocation.accumulated_text().trim().is_empty() {
            log::info!(
                "[EngineDriver] Invocation {} exited ({}) without a result, using streamed text",
                self.invocation.id,
                status
            );
            let resume_token = self.session_id.clone();
            self.store_resume_token(resume_token.as_deref());
            let text = self.invocation.accumulated_text().to_string();
            return self.complete(text, resume_token, true);
        }

        if status.success() {
            self.fail(EngineError::EmptyOutput { stderr: stderr_tail }, InvocationState::Errored)
        } else {
            self.fail(
                EngineError::ExitedWithCode {
                    code: status.code(),
                    stderr: stderr_tail,
                },
                InvocationState::Errored,
            )
        }
    }

    fn store_resume_token(&self, token: Option<&str>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.sessions
                .set_resume_token(self.invocation.conversation_id, token);
        }
    }

    fn complete(&mut self, text: String, resume_token: Option<String>, reconstructed: bool) -> InvocationState {
        if !self.control.claim() {
            return self.cancelled();
        }

        let tool_call = extract_tool_call(&text).into_tool_call();
        if let Some(call) = &tool_call {
            log::info!("[EngineDriver] Invocation {} requested tool {}", self.invocation.id, call.tool);
        }

        self.invocation.finish(InvocationState::Completed);
        self.control.observer.on_complete(EngineCompletion {
            text,
            resume_token,
            tool_call,
            reconstructed,
        });
        InvocationState::Completed
    }

    fn fail(&mut self, error: EngineError, state: InvocationState) -> InvocationState {
        if !self.control.claim() {
            return self.cancelled();
        }

        match error {
            EngineError::SpawnFailed(_) => log::error!(
                "[EngineDriver] Invocation {} failed [{}]: {}",
                self.invocation.id,
                error.code().as_str(),
                error
            ),
            _ => log::warn!(
                "[EngineDriver] Invocation {} failed [{}]: {}",
                self.invocation.id,
                error.code().as_str(),
                error
            ),
        }
        self.invocation.finish(state);
        self.control.observer.on_error(error);
        state
    }

    /// The canceller already fired `on_cancelled`
    fn cancelled(&mut self) -> InvocationState {
        self.invocation.finish(InvocationState::Cancelled);
        InvocationState::Cancelled
    }

    fn timed_out_error(&self) -> EngineError {
        EngineError::TimedOut {
            secs: self.timeout.as_secs(),
        }
    }

    fn stalled_error(&self) -> EngineError {
        EngineError::Stalled {
            secs: self.config.stall_secs,
        }
    }
}

async fn write_prompt(mut stdin: tokio::process::ChildStdin, prompt: String) -> std::io::Result<()> {
    stdin.write_all(prompt.as_bytes()).await?;
    stdin.shutdown().await?;
    Ok(())
}

/// Split complete stderr lines out of `carry` into the redacted tail.
///
/// An unterminated line longer than `STDERR_LINE_MAX` is flushed early so the
/// carry stays bounded.
fn collect_stderr(carry: &mut Vec<u8>, chunk: &[u8], tail: &mut String) {
    carry.extend_from_slice(chunk);

    while let Some(pos) = carry.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = carry.drain(..=pos).collect();
        record_stderr_line(&line[..pos], tail);
    }

    if carry.len() > STDERR_LINE_MAX {
        flush_stderr(carry, tail);
    }
}

/// Record whatever is left in `carry` as one line
fn flush_stderr(carry: &mut Vec<u8>, tail: &mut String) {
    if !carry.is_empty() {
        let line = std::mem::take(carry);
        record_stderr_line(&line, tail);
    }
}

fn record_stderr_line(raw: &[u8], tail: &mut String) {
    let line = String::from_utf8_lossy(raw);
    let clean = sanitize_line(line.trim_end_matches('\r'));
    log::debug!("[EngineDriver] stderr: {}", clean);
    push_tail(tail, &clean);
}

/// Keep the last `STDERR_TAIL_BYTES` of stderr
fn push_tail(tail: &mut String, line: &str) {
    if !tail.is_empty() {
        tail.push('\n');
    }
    tail.push_str(line);

    if tail.len() > STDERR_TAIL_BYTES {
        let mut cut = tail.len() - STDERR_TAIL_BYTES;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}

fn cap_text(mut text: String, max_bytes: usize) -> String {
    if text.len() > max_bytes {
        let mut cut = max_bytes;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

/// SIGTERM the process group, then SIGKILL after a grace period
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let pgid = pid as i32;
            log::info!("[EngineDriver] Sending SIGTERM to process group {}", pgid);
            unsafe {
                libc::kill(-pgid, libc::SIGTERM);
            }

            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
                return;
            }

            log::info!("[EngineDriver] Force killing process group {}", pgid);
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }

    if let Err(e) = child.kill().await {
        log::debug!("[EngineDriver] Process may have already exited: {}", e);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::tool_call::ToolCall;
    use crate::services::engine::test_support::{sh_driver, sh_driver_with, RecordingObserver};
    use crate::session_store::MemorySessionStore;

    async fn run(driver: &EngineDriver, request: EngineRequest) -> (InvocationState, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let handle = driver.invoke(request, observer.clone());
        let state = handle.join().await;
        (state, observer)
    }

    #[tokio::test]
    async fn test_deltas_then_result() {
        let driver = sh_driver(
            r#"echo '{"type":"system","subtype":"init","session_id":"sess-1"}'
echo '{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hel"}}'
echo '{"type":"content_block_delta","delta":{"type":"text_delta","text":"lo"}}'
echo '{"type":"result","result":"Hello","session_id":"sess-42"}'"#,
        );

        let (state, observer) = run(&driver, EngineRequest::new(1, "hi")).await;

        assert_eq!(state, InvocationState::Completed);
        assert_eq!(observer.deltas(), vec!["Hel".to_string(), "Hello".to_string()]);
        let completion = observer.single_completion();
        assert_eq!(completion.text, "Hello");
        assert_eq!(completion.resume_token.as_deref(), Some("sess-42"));
        assert!(completion.tool_call.is_none());
        assert!(!completion.reconstructed);
        assert_eq!(driver.resume_token_for(1).as_deref(), Some("sess-42"));
        assert_eq!(observer.terminal_count(), 1);
    }

    #[tokio::test]
    async fn test_result_with_tool_call() {
        let driver = sh_driver(
            r#"echo '{"type":"result","result":"{\"type\":\"tool_call\",\"tool\":\"notes.add\",\"args\":{\"text\":\"milk\"}}"}'"#,
        );

        let (state, observer) = run(&driver, EngineRequest::new(2, "remember milk")).await;

        assert_eq!(state, InvocationState::Completed);
        let call: ToolCall = observer.single_completion().tool_call.unwrap();
        assert_eq!(call.tool, "notes.add");
        assert_eq!(call.args.get("text").and_then(|v| v.as_str()), Some("milk"));
    }

    #[tokio::test]
    async fn test_prompt_is_written_to_stdin() {
        let driver = sh_driver(r#"p=$(cat); printf '{"type":"result","result":"got %s"}\n' "$p""#);

        let (_, observer) = run(&driver, EngineRequest::new(3, "ping")).await;
        assert_eq!(observer.single_completion().text, "got ping");
    }

    #[tokio::test]
    async fn test_resume_token_is_passed_as_argument() {
        // With `sh -c`, the resume flag lands in $0 and the token in $1
        let driver = sh_driver(r#"cat > /dev/null; printf '{"type":"result","result":"%s %s"}\n' "$0" "$1""#);

        let request = EngineRequest::new(4, "again").with_resume_token(Some("tok-1".to_string()));
        let (_, observer) = run(&driver, request).await;
        assert_eq!(observer.single_completion().text, "--resume tok-1");
    }

    #[tokio::test]
    async fn test_clean_exit_without_output_is_an_error() {
        let driver = sh_driver("cat > /dev/null; exit 0");

        let (state, observer) = run(&driver, EngineRequest::new(5, "hi")).await;

        assert_eq!(state, InvocationState::Errored);
        assert!(matches!(observer.single_error(), EngineError::EmptyOutput { .. }));
        assert!(observer.completions().is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_output() {
        let driver = sh_driver("echo boom >&2; exit 3");

        let (state, observer) = run(&driver, EngineRequest::new(6, "hi")).await;

        assert_eq!(state, InvocationState::Errored);
        match observer.single_error() {
            EngineError::ExitedWithCode { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_exit_with_deltas_is_reconstructed() {
        let driver = sh_driver(
            r#"echo '{"type":"content_block_delta","delta":{"text":"partial "}}'
echo '{"type":"content_block_delta","delta":{"text":"answer"}}'
exit 1"#,
        );

        let (state, observer) = run(&driver, EngineRequest::new(7, "hi")).await;

        assert_eq!(state, InvocationState::Completed);
        let completion = observer.single_completion();
        assert_eq!(completion.text, "partial answer");
        assert!(completion.reconstructed);
    }

    #[tokio::test]
    async fn test_result_without_trailing_newline() {
        let driver = sh_driver(r#"printf '%s' '{"type":"result","result":"tail"}'"#);

        let (state, observer) = run(&driver, EngineRequest::new(8, "hi")).await;

        assert_eq!(state, InvocationState::Completed);
        assert_eq!(observer.single_completion().text, "tail");
    }

    #[tokio::test]
    async fn test_non_json_lines_are_ignored() {
        let driver = sh_driver(
            r#"echo 'warming up...'
echo '{"type":"assistant","message":{}}'
echo '{"type":"result","result":"fine"}'"#,
        );

        let (_, observer) = run(&driver, EngineRequest::new(9, "hi")).await;
        assert_eq!(observer.single_completion().text, "fine");
    }

    #[tokio::test]
    async fn test_engine_reported_error() {
        let driver = sh_driver(r#"echo '{"type":"result","is_error":true,"result":"Credit balance is too low"}'"#);

        let (state, observer) = run(&driver, EngineRequest::new(10, "hi")).await;

        assert_eq!(state, InvocationState::Errored);
        assert_eq!(
            observer.single_error(),
            EngineError::EngineReported("Credit balance is too low".to_string())
        );
    }

    #[tokio::test]
    async fn test_stall_is_reported() {
        let driver = sh_driver_with("sleep 5", |config| {
            config.stall_secs = 1;
        });

        let started = std::time::Instant::now();
        let (state, observer) = run(&driver, EngineRequest::new(11, "hi")).await;

        assert_eq!(state, InvocationState::Stalled);
        assert_eq!(observer.single_error(), EngineError::Stalled { secs: 1 });
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_hard_deadline_despite_output() {
        let driver = sh_driver_with("while true; do echo noise; sleep 0.05; done", |config| {
            config.stall_secs = 5;
        });

        let request = EngineRequest::new(12, "hi").with_timeout(Duration::from_millis(300));
        let (state, observer) = run(&driver, request).await;

        assert_eq!(state, InvocationState::TimedOut);
        assert!(matches!(observer.single_error(), EngineError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_cancel_before_output() {
        let driver = sh_driver("sleep 5");
        let observer = Arc::new(RecordingObserver::default());

        let handle = driver.invoke(EngineRequest::new(13, "hi"), observer.clone());
        assert!(handle.cancel());
        assert!(!handle.cancel());

        let started = std::time::Instant::now();
        assert_eq!(handle.join().await, InvocationState::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(4));

        assert_eq!(observer.cancelled_count(), 1);
        assert!(observer.completions().is_empty());
        assert!(observer.errors().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_streaming_stops_deltas() {
        let driver = sh_driver(
            r#"for i in 1 2 3 4 5 6 7 8 9 10; do
echo '{"type":"content_block_delta","delta":{"text":"x"}}'
sleep 0.2
done
echo '{"type":"result","result":"done"}'"#,
        );
        let observer = Arc::new(RecordingObserver::default());

        let handle = driver.invoke(EngineRequest::new(18, "hi"), observer.clone());
        for _ in 0..100 {
            if !observer.deltas().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!observer.deltas().is_empty(), "no delta arrived before cancelling");

        assert!(handle.cancel());
        assert_eq!(handle.join().await, InvocationState::Cancelled);

        let seen = observer.deltas().len();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(observer.deltas().len(), seen);
        assert!(seen < 10);

        assert_eq!(observer.cancelled_count(), 1);
        assert!(observer.completions().is_empty());
        assert!(observer.errors().is_empty());
    }

    #[tokio::test]
    async fn test_partial_stderr_writes_keep_engine_alive() {
        let driver = sh_driver_with(
            r#"for i in 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20 21 22 23 24 25; do
printf . >&2
sleep 0.1
done
echo '{"type":"result","result":"done"}'"#,
            |config| config.stall_secs = 1,
        );

        let (state, observer) = run(&driver, EngineRequest::new(19, "hi")).await;

        assert_eq!(state, InvocationState::Completed);
        assert_eq!(observer.single_completion().text, "done");
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let driver = sh_driver(r#"echo '{"type":"result","result":"done"}'"#);

        let request = EngineRequest::new(20, "hi").with_timeout(Duration::MAX);
        let (state, observer) = run(&driver, request).await;

        assert_eq!(state, InvocationState::Completed);
        assert_eq!(observer.single_completion().text, "done");
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_a_no_op() {
        let driver = sh_driver(r#"echo '{"type":"result","result":"done"}'"#);
        let observer = Arc::new(RecordingObserver::default());

        let handle = driver.invoke(EngineRequest::new(14, "hi"), observer.clone());
        let canceller = handle.canceller();
        assert_eq!(handle.join().await, InvocationState::Completed);

        assert!(!canceller.cancel());
        assert_eq!(observer.cancelled_count(), 0);
        assert_eq!(observer.terminal_count(), 1);
    }

    #[tokio::test]
    async fn test_output_cap() {
        let driver = sh_driver_with(
            r#"echo '{"type":"content_block_delta","delta":{"text":"Hel"}}'
echo '{"type":"content_block_delta","delta":{"text":"lo"}}'
echo '{"type":"content_block_delta","delta":{"text":" world"}}'
exit 0"#,
            |config| config.max_output_bytes = 4,
        );

        let (_, observer) = run(&driver, EngineRequest::new(15, "hi")).await;

        assert_eq!(observer.deltas(), vec!["Hel".to_string(), "Hell".to_string()]);
        assert_eq!(observer.single_completion().text, "Hell");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let driver = EngineDriver::with_binary(
            EngineConfig::default(),
            "/nonexistent/relay-engine",
            Arc::new(MemorySessionStore::new()),
        );

        let (state, observer) = run(&driver, EngineRequest::new(16, "hi")).await;

        assert_eq!(state, InvocationState::Errored);
        assert!(matches!(observer.single_error(), EngineError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_forbidden_argument_is_rejected() {
        let driver = sh_driver_with("exit 0", |config| {
            config.args.push("--api-key=abc".to_string());
        });

        let (_, observer) = run(&driver, EngineRequest::new(17, "hi")).await;
        assert!(matches!(observer.single_error(), EngineError::SecurityViolation(_)));
    }

    #[test]
    fn test_push_tail_keeps_end() {
        let mut tail = String::new();
        for i in 0..2000 {
            push_tail(&mut tail, &format!("line {}", i));
        }
        assert!(tail.len() <= STDERR_TAIL_BYTES);
        assert!(tail.ends_with("line 1999"));
    }

    #[test]
    fn test_collect_stderr_splits_and_bounds() {
        let mut carry = Vec::new();
        let mut tail = String::new();

        collect_stderr(&mut carry, b"warn: one\r\nwa", &mut tail);
        assert_eq!(tail, "warn: one");
        assert_eq!(carry, b"wa");

        collect_stderr(&mut carry, b"rn: two\n", &mut tail);
        assert_eq!(tail, "warn: one\nwarn: two");
        assert!(carry.is_empty());

        collect_stderr(&mut carry, &vec![b'.'; STDERR_LINE_MAX + 1], &mut tail);
        assert!(carry.is_empty());
        assert!(tail.ends_with("...."));

        collect_stderr(&mut carry, b"partial", &mut tail);
        flush_stderr(&mut carry, &mut tail);
        assert!(tail.ends_with("\npartial"));
    }

    #[test]
    fn test_cap_text_char_boundary() {
        assert_eq!(cap_text("héllo".to_string(), 2), "h");
        assert_eq!(cap_text("abc".to_string(), 10), "abc");
    }
}
