//! 会话集成测试：桩 provider + 假沙箱后端，覆盖完整的一轮对话、审批、反思、中断与沙箱失败

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use bee_shell::core::{AgentError, Failure, SessionConfig, SessionLoop};
use bee_shell::llm::{ModelProvider, ModelResponse, TokenUsage};
use bee_shell::memory::{ConversationState, ErrorKind, ToolCall, ToolOutcome, Turn};
use bee_shell::sandbox::{CommandOutput, ExecutionSandbox, SandboxBackend, SandboxError, SandboxState};
use bee_shell::tools::{LsTool, ShellTool, ToolRegistry, ToolSpec};
use bee_shell::ui::UserInteraction;

/// 按脚本回复的 provider；记录每次收到的对话
#[derive(Default)]
struct StubProvider {
    script: Mutex<VecDeque<Result<ModelResponse, Failure>>>,
    seen: Mutex<Vec<Vec<Turn>>>,
    usage: TokenUsage,
}

impl StubProvider {
    fn new(script: Vec<Result<ModelResponse, Failure>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::default(),
            usage: TokenUsage::default(),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn last_seen(&self) -> Vec<Turn> {
        self.seen.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ModelProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn usage(&self) -> Option<&TokenUsage> {
        Some(&self.usage)
    }

    async fn submit(
        &self,
        conversation: &ConversationState,
        _tools: &[ToolSpec],
    ) -> Result<ModelResponse, Failure> {
        conversation.validate().expect("provider received invalid state");
        self.seen.lock().unwrap().push(conversation.turns().to_vec());
        self.usage.add(5, 1);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(ModelResponse::text("done")))
    }
}

fn shell_call(id: &str, command: &str) -> Result<ModelResponse, Failure> {
    Ok(ModelResponse {
        text: String::new(),
        tool_calls: vec![ToolCall::new(id, "shell", json!({ "command": command }))],
    })
}

/// 假沙箱后端：可配置创建失败、创建与命令耗时，记录执行过的命令
#[derive(Default)]
struct FakeBackend {
    fail_create: bool,
    create_delay: Duration,
    exec_delay: Duration,
    creates: Arc<AtomicUsize>,
    destroys: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SandboxBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create(&self, _workspace: &Path) -> Result<String, SandboxError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.create_delay).await;
        if self.fail_create {
            Err(SandboxError::CreateFailed("docker daemon not reachable".into()))
        } else {
            Ok("fake-1".into())
        }
    }

    async fn is_alive(&self, _identity: &str) -> bool {
        true
    }

    async fn exec(
        &self,
        _identity: &str,
        _workspace: &Path,
        command: &str,
    ) -> Result<CommandOutput, SandboxError> {
        self.commands.lock().unwrap().push(command.to_string());
        tokio::time::sleep(self.exec_delay).await;
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: format!("ran {command}"),
            stderr: String::new(),
        })
    }

    async fn destroy(&self, _identity: &str) -> Result<(), SandboxError> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedUi {
    approve: bool,
    confirms: AtomicUsize,
    notices: Mutex<Vec<String>>,
}

#[async_trait]
impl UserInteraction for ScriptedUi {
    async fn confirm(&self, _description: &str) -> bool {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        self.approve
    }
    async fn read_input(&self) -> Option<String> {
        None
    }
    fn render(&self, _text: &str) {}
    fn notice(&self, text: &str) {
        self.notices.lock().unwrap().push(text.to_string());
    }
}

struct Harness {
    session: SessionLoop,
    provider: Arc<StubProvider>,
    ui: Arc<ScriptedUi>,
    creates: Arc<AtomicUsize>,
    destroys: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<String>>>,
    _dir: tempfile::TempDir,
}

fn harness(
    script: Vec<Result<ModelResponse, Failure>>,
    approve: bool,
    backend: FakeBackend,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("readme.txt"), "hi").unwrap();
    let provider = StubProvider::new(script);
    let ui = Arc::new(ScriptedUi {
        approve,
        ..Default::default()
    });
    let creates = backend.creates.clone();
    let destroys = backend.destroys.clone();
    let commands = backend.commands.clone();

    let mut registry = ToolRegistry::new();
    registry.register(ShellTool::new(30, 1000));
    registry.register(LsTool::new(dir.path()));

    let session = SessionLoop::new(
        SessionConfig::default(),
        provider.clone(),
        registry,
        ExecutionSandbox::new(Box::new(backend), dir.path()),
        ui.clone(),
    );
    Harness {
        session,
        provider,
        ui,
        creates,
        destroys,
        commands,
        _dir: dir,
    }
}

fn last_batch(state: &ConversationState) -> Vec<ToolOutcome> {
    state
        .turns()
        .iter()
        .rev()
        .find_map(|t| match t {
            Turn::ToolResultBatch { results } => {
                Some(results.iter().map(|r| r.outcome.clone()).collect())
            }
            _ => None,
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_shell_turn_end_to_end() {
    let mut h = harness(
        vec![
            shell_call("c1", "touch a.txt"),
            Ok(ModelResponse::text("created a.txt")),
            shell_call("c2", "ls"),
            Ok(ModelResponse::text("listed")),
        ],
        true,
        FakeBackend::default(),
    );

    let text = h.session.submit("create a.txt", CancellationToken::new()).await.unwrap();
    assert_eq!(text, "created a.txt");
    assert_eq!(h.provider.calls(), 2);
    // 第二次提交看到：用户消息、助手工具调用、结果批次
    let seen = h.provider.last_seen();
    assert_eq!(seen.len(), 3);
    assert!(matches!(&seen[2], Turn::ToolResultBatch { results } if results[0].tool_call_id == "c1"));
    assert!(matches!(last_batch(h.session.state())[0], ToolOutcome::Success { .. }));
    assert_eq!(h.ui.confirms.load(Ordering::SeqCst), 1);

    let text = h.session.submit("list", CancellationToken::new()).await.unwrap();
    assert_eq!(text, "listed");
    // 沙箱在会话内只创建一次
    assert_eq!(h.creates.load(Ordering::SeqCst), 1);
    assert_eq!(*h.commands.lock().unwrap(), vec!["touch a.txt", "ls"]);
    assert!(h.session.state().validate().is_ok());
    assert_eq!(h.session.token_usage(), Some((20, 4, 24)));

    h.session.shutdown().await;
    h.session.shutdown().await;
    assert_eq!(h.session.sandbox().state(), SandboxState::Stopped);
}

#[tokio::test]
async fn test_safe_tool_skips_approval() {
    let mut h = harness(
        vec![
            Ok(ModelResponse {
                text: String::new(),
                tool_calls: vec![ToolCall::new("c1", "ls", json!({}))],
            }),
            Ok(ModelResponse::text("one file")),
        ],
        false,
        FakeBackend::default(),
    );
    let text = h.session.submit("what is here", CancellationToken::new()).await.unwrap();
    assert_eq!(text, "one file");
    assert_eq!(h.ui.confirms.load(Ordering::SeqCst), 0);
    assert_eq!(h.creates.load(Ordering::SeqCst), 0);
    match &last_batch(h.session.state())[0] {
        ToolOutcome::Success { payload } => assert_eq!(payload.render(), "readme.txt"),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn test_second_turn_sees_prior_results() {
    let mut h = harness(
        vec![
            Ok(ModelResponse {
                text: String::new(),
                tool_calls: vec![ToolCall::new("c1", "ls", json!({ "path": "." }))],
            }),
            Ok(ModelResponse::text("readme.txt")),
            Ok(ModelResponse::text("it says hi")),
        ],
        false,
        FakeBackend::default(),
    );
    assert_eq!(
        h.session.submit("list files", CancellationToken::new()).await.unwrap(),
        "readme.txt"
    );
    assert_eq!(
        h.session
            .submit("read the first file", CancellationToken::new())
            .await
            .unwrap(),
        "it says hi"
    );

    let seen = h.provider.last_seen();
    assert_eq!(seen.len(), 5);
    assert!(matches!(&seen[0], Turn::UserMessage { text } if text == "list files"));
    assert!(matches!(&seen[2], Turn::ToolResultBatch { results } if results[0].render() == "readme.txt"));
    assert!(matches!(&seen[3], Turn::AssistantMessage { text, tool_calls } if text == "readme.txt" && tool_calls.is_empty()));
    assert!(matches!(&seen[4], Turn::UserMessage { text } if text == "read the first file"));
}

#[tokio::test]
async fn test_denied_call_never_executes() {
    let mut h = harness(
        vec![
            shell_call("c1", "rm -rf build"),
            Ok(ModelResponse::text("ok, I won't")),
        ],
        false,
        FakeBackend::default(),
    );
    let text = h.session.submit("clean up", CancellationToken::new()).await.unwrap();
    assert_eq!(text, "ok, I won't");
    assert_eq!(h.ui.confirms.load(Ordering::SeqCst), 1);
    assert!(h.commands.lock().unwrap().is_empty());
    assert_eq!(h.creates.load(Ordering::SeqCst), 0);
    assert_eq!(last_batch(h.session.state()), vec![ToolOutcome::Denied]);
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reflection_budget_is_bounded() {
    let bad = || {
        Ok(ModelResponse {
            text: String::new(),
            tool_calls: vec![ToolCall::new("c1", "shell", json!({ "cmd": "ls" }))],
        })
    };
    let mut h = harness(vec![bad(), bad(), bad(), bad()], true, FakeBackend::default());

    let err = h.session.submit("list", CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::ReflectionExhausted { attempts: 2, .. }));
    assert_eq!(err.user_message(), "Tool arguments invalid, rephrase the request.");
    assert_eq!(h.provider.calls(), 3);

    let kinds: Vec<ErrorKind> = h
        .session
        .state()
        .turns()
        .iter()
        .filter_map(|t| match t {
            Turn::ToolResultBatch { results } => results[0].error_kind(),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![ErrorKind::MalformedOutput, ErrorKind::MalformedOutput, ErrorKind::Terminal]
    );
    assert!(h.commands.lock().unwrap().is_empty());
    assert!(h.session.state().validate().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_mid_submit_recovers_state() {
    let mut h = harness(
        vec![
            Ok(ModelResponse {
                text: "running both".into(),
                tool_calls: vec![
                    ToolCall::new("c1", "shell", json!({ "command": "sleep 60" })),
                    ToolCall::new("c2", "shell", json!({ "command": "echo after" })),
                ],
            }),
            Ok(ModelResponse::text("fresh start")),
        ],
        true,
        FakeBackend {
            exec_delay: Duration::from_secs(60),
            ..Default::default()
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });
    let err = h.session.submit("run things", cancel).await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));

    let state = h.session.state();
    assert!(state.validate().is_ok());
    let outcomes = last_batch(state);
    assert_eq!(outcomes.len(), 2);
    for outcome in outcomes {
        assert_eq!(
            outcome,
            ToolOutcome::Cancelled {
                reason: "Interrupted by user".into()
            }
        );
    }
    // 第二条命令从未开始
    assert_eq!(*h.commands.lock().unwrap(), vec!["sleep 60"]);

    let text = h.session.submit("again", CancellationToken::new()).await.unwrap();
    assert_eq!(text, "fresh start");
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_during_sandbox_startup_is_not_fatal() {
    let mut h = harness(
        vec![
            shell_call("c1", "ls"),
            shell_call("c2", "ls"),
            Ok(ModelResponse::text("listed")),
        ],
        true,
        FakeBackend {
            create_delay: Duration::from_secs(10),
            ..Default::default()
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });
    let err = h.session.submit("list", cancel).await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled));
    assert_eq!(h.session.sandbox().state(), SandboxState::Starting);

    // 下一轮接着等同一次创建，而不是把沙箱判为不可用
    let text = h.session.submit("list again", CancellationToken::new()).await.unwrap();
    assert_eq!(text, "listed");
    assert_eq!(h.session.sandbox().state(), SandboxState::Running);
    assert_eq!(h.creates.load(Ordering::SeqCst), 1);
    assert_eq!(*h.commands.lock().unwrap(), vec!["ls"]);

    h.session.shutdown().await;
    assert_eq!(h.destroys.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_sandbox_startup_destroys_resource() {
    let mut h = harness(
        vec![shell_call("c1", "ls")],
        true,
        FakeBackend {
            create_delay: Duration::from_secs(10),
            ..Default::default()
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });
    assert!(h.session.submit("list", cancel).await.is_err());

    h.session.shutdown().await;
    assert_eq!(h.creates.load(Ordering::SeqCst), 1);
    assert_eq!(h.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(h.session.sandbox().state(), SandboxState::Stopped);
}

#[tokio::test]
async fn test_sandbox_failure_is_fatal_and_not_recreated() {
    let mut h = harness(
        vec![shell_call("c1", "ls"), shell_call("c2", "ls")],
        true,
        FakeBackend {
            fail_create: true,
            ..Default::default()
        },
    );

    let err = h.session.submit("list", CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::SandboxUnavailable(_)));
    assert!(h.session.state().validate().is_ok());
    assert_eq!(
        h.session.state().last().and_then(|t| match t {
            Turn::ToolResultBatch { results } => results[0].error_kind(),
            _ => None,
        }),
        Some(ErrorKind::ResourceUnavailable)
    );
    assert_eq!(h.session.sandbox().state(), SandboxState::Stopped);

    let err = h.session.submit("list again", CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::SandboxUnavailable(_)));
    assert_eq!(h.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_model_call_is_retried() {
    let mut h = harness(
        vec![
            Err(Failure::http(429, "rate limited").with_retry_after(Duration::from_secs(2))),
            Ok(ModelResponse::text("hello")),
        ],
        true,
        FakeBackend::default(),
    );
    let start = tokio::time::Instant::now();
    let text = h.session.submit("hi", CancellationToken::new()).await.unwrap();
    assert_eq!(text, "hello");
    assert_eq!(h.provider.calls(), 2);
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert!(h.ui.notices.lock().unwrap().iter().any(|n| n.contains("retrying")));
}

#[tokio::test(start_paused = true)]
async fn test_model_rate_limit_exhausts_budget() {
    let limited = || Err(Failure::http(429, "rate limited"));
    let mut h = harness(vec![limited(), limited(), limited(), limited()], true, FakeBackend::default());
    let err = h.session.submit("hi", CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::ProviderExhausted { status: Some(429), .. }));
    assert_eq!(h.provider.calls(), 3);
    assert!(err.user_message().contains("Rate limited"));
    // 对话停在用户消息上，仍然合法
    assert!(matches!(h.session.state().last(), Some(Turn::UserMessage { .. })));
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let mut h = harness(vec![Err(Failure::http(401, "bad key"))], true, FakeBackend::default());
    let err = h.session.submit("hi", CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, AgentError::ProviderRejected { status: Some(401), .. }));
    assert_eq!(h.provider.calls(), 1);
}
