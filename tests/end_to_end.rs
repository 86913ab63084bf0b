//! End-to-end scenarios driven through the public API with a scripted HTTP
//! transport and a recording presentation surface.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{Value, json};
use zsxq_explain::config::{ExplainerSettings, NoteBridgeConfig};
use zsxq_explain::dom_snapshot::DomSnapshot;
use zsxq_explain::export::{ExportError, NoteBridge};
use zsxq_explain::harvest::ContentHarvester;
use zsxq_explain::llm::prompts::{DEFAULT_PROMPT, DISCLAIMER, SUMMARY_PROMPT};
use zsxq_explain::llm::{CompletionError, DecodePolicy, PromptMode};
use zsxq_explain::locator::{ContentLocator, ContentRule, LocateError};
use zsxq_explain::session::{Explainer, SessionError, SessionState};
use zsxq_explain::surface::PresentationSurface;
use zsxq_explain::transport::{
    HttpRequest, HttpTransport, StreamingHttpResponse, TransportError,
};
use zsxq_explain::types::{
    ContentPoint, ModelDescriptor, ProviderCredentials, ProviderKind, Rect,
};

enum Reply {
    Body {
        status: u16,
        chunks: Vec<Vec<u8>>,
        stall: bool,
    },
    Hang,
}

impl Reply {
    fn sse(frames: &[&str]) -> Self {
        Reply::Body {
            status: 200,
            chunks: frames.iter().map(|frame| frame.as_bytes().to_vec()).collect(),
            stall: false,
        }
    }

    fn bytes(status: u16, chunks: Vec<Vec<u8>>) -> Self {
        Reply::Body {
            status,
            chunks,
            stall: false,
        }
    }

    fn stalled(frames: &[&str]) -> Self {
        Reply::Body {
            status: 200,
            chunks: frames.iter().map(|frame| frame.as_bytes().to_vec()).collect(),
            stall: true,
        }
    }
}

#[derive(Default)]
struct MockTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<StreamingHttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Body {
                status,
                chunks,
                stall,
            }) => {
                let body = stream::iter(chunks.into_iter().map(Ok));
                let body = if stall {
                    body.chain(stream::pending()).boxed()
                } else {
                    body.boxed()
                };
                Ok(StreamingHttpResponse { status, body })
            }
            Some(Reply::Hang) => futures_util::future::pending().await,
            None => Err(TransportError::Connect("no reply scripted".into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Loading(String),
    Render(String),
    Error(String, Duration),
    Dismissed,
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
    closed: Mutex<bool>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn renders(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Event::Render(_)))
            .count()
    }
}

impl PresentationSurface for Recorder {
    fn show_loading(&self, model_label: &str) {
        self.events.lock().unwrap().push(Event::Loading(model_label.into()));
    }

    fn render(&self, markdown: &str) {
        self.events.lock().unwrap().push(Event::Render(markdown.into()));
    }

    fn show_error(&self, message: &str, auto_dismiss: Duration) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Error(message.into(), auto_dismiss));
    }

    fn dismiss(&self) {
        *self.closed.lock().unwrap() = true;
        self.events.lock().unwrap().push(Event::Dismissed);
    }

    fn is_open(&self) -> bool {
        !*self.closed.lock().unwrap()
    }
}

fn delta(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "content": text } }] })
    )
}

fn deepseek_settings() -> ExplainerSettings {
    ExplainerSettings {
        deepseek: ProviderCredentials::new("sk-test"),
        selected_model: Some(ModelDescriptor::new("deepseek-chat", ProviderKind::DeepSeek)),
        ..Default::default()
    }
}

#[tokio::test]
async fn explanation_streams_to_done() {
    let frames = [delta("汇率"), delta("是"), delta("..."), "data: [DONE]\n\n".to_string()];
    let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
    let transport = MockTransport::new(vec![Reply::sse(&frames)]);
    let explainer = Explainer::new(deepseek_settings(), Arc::clone(&transport));
    let surface = Arc::new(Recorder::default());

    let report = explainer
        .explain("汇率稳定机制", None, PromptMode::Explain, surface.clone())
        .await;

    assert_eq!(report.state, SessionState::Done);
    assert!(report.done);
    assert_eq!(report.buffer, "汇率是...");

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.url, "https://api.deepseek.com/chat/completions");
    assert_eq!(request.header_value("Authorization"), Some("Bearer sk-test"));
    let body = request.body.as_ref().unwrap();
    assert_eq!(body["model"], "deepseek-chat");
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], DEFAULT_PROMPT);
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["messages"][1]["content"], "汇率稳定机制");

    let events = surface.events();
    assert_eq!(events.first(), Some(&Event::Loading("deepseek-chat".into())));
    assert_eq!(surface.renders(), 3);
    assert_eq!(
        events.last(),
        Some(&Event::Render(format!("汇率是...{DISCLAIMER}")))
    );
}

#[tokio::test]
async fn rejected_key_fails_with_standalone_error() {
    let transport = MockTransport::new(vec![Reply::bytes(
        401,
        vec![br#"{"error":{"message":"Authentication Fails"}}"#.to_vec()],
    )]);
    let explainer = Explainer::new(deepseek_settings(), transport);
    let surface = Arc::new(Recorder::default());

    let report = explainer
        .explain("汇率稳定机制", None, PromptMode::Explain, surface.clone())
        .await;

    assert_eq!(report.state, SessionState::Failed);
    assert!(!report.done);
    assert!(report.buffer.is_empty());
    assert_eq!(
        report.failure,
        Some(SessionError::Completion(CompletionError::Unauthorized {
            status: 401,
            message: "Authentication Fails".into(),
        }))
    );
    assert_eq!(surface.renders(), 0);
    match surface.events().last() {
        Some(Event::Error(message, dismiss)) => {
            assert!(message.contains("Authentication Fails"));
            assert_eq!(*dismiss, Duration::from_secs(5));
        }
        other => panic!("expected a standalone error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unresponsive_endpoint_times_out_after_request_timeout() {
    let transport = MockTransport::new(vec![Reply::Hang]);
    let explainer = Explainer::new(deepseek_settings(), transport);
    let started = tokio::time::Instant::now();

    let report = explainer
        .explain(
            "汇率稳定机制",
            None,
            PromptMode::Explain,
            Arc::new(Recorder::default()),
        )
        .await;

    assert_eq!(
        report.failure,
        Some(SessionError::Completion(CompletionError::Timeout { secs: 120 }))
    );
    assert!(started.elapsed() >= Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn deadline_also_bounds_a_stalled_body() {
    let first = delta("A");
    let transport = MockTransport::new(vec![Reply::stalled(&[first.as_str()])]);
    let mut settings = deepseek_settings();
    settings.request_timeout_secs = 30;
    let explainer = Explainer::new(settings, transport);

    let report = explainer
        .explain("text", None, PromptMode::Explain, Arc::new(Recorder::default()))
        .await;

    let timeout = CompletionError::Timeout { secs: 30 };
    assert_eq!(report.state, SessionState::Failed);
    assert_eq!(report.buffer, format!("A{timeout}"));
}

#[tokio::test]
async fn mid_stream_failure_keeps_partial_text_and_blocks_export() {
    let frames = [
        delta("A"),
        delta("B"),
        "data: {\"error\":{\"message\":\"rate limited\"}}\n\n".to_string(),
    ];
    let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
    let transport = MockTransport::new(vec![Reply::sse(&frames)]);
    let explainer = Explainer::new(deepseek_settings(), transport);
    let surface = Arc::new(Recorder::default());

    let session = explainer.start("text", None, PromptMode::Explain, surface.clone());
    let handle = session.handle();
    let report = session.run().await;

    let err = CompletionError::Remote {
        message: "rate limited".into(),
    };
    assert_eq!(report.buffer, format!("AB{err}"));
    assert_eq!(handle.state(), SessionState::Failed);
    assert!(!handle.is_done());
    assert!(
        !surface
            .events()
            .iter()
            .any(|event| matches!(event, Event::Error(..)))
    );

    let bridge_transport = MockTransport::new(Vec::new());
    let bridge = NoteBridge::new(Arc::clone(&bridge_transport), NoteBridgeConfig::default());
    assert!(matches!(
        bridge.export(&handle).await,
        Err(ExportError::ContentNotReady)
    ));
    assert!(bridge_transport.requests().is_empty());
}

#[tokio::test]
async fn split_frames_and_split_characters_decode_like_whole_ones() {
    let mut payload = delta("汇率稳定").into_bytes();
    payload.extend_from_slice(b"data: [DONE]\n\n");
    // Cut inside the first multi-byte character and inside the `data:` field.
    let cut_a = payload.iter().position(|b| *b >= 0x80).unwrap() + 1;
    let chunks = vec![
        payload[..3].to_vec(),
        payload[3..cut_a].to_vec(),
        payload[cut_a..].to_vec(),
    ];
    let transport = MockTransport::new(vec![Reply::bytes(200, chunks)]);
    let explainer = Explainer::new(deepseek_settings(), transport);

    let report = explainer
        .explain("text", None, PromptMode::Explain, Arc::new(Recorder::default()))
        .await;

    assert_eq!(report.state, SessionState::Done);
    assert_eq!(report.buffer, "汇率稳定");
}

#[tokio::test]
async fn line_framed_streams_without_blank_lines_are_fully_decoded() {
    let line = |text: &str| delta(text).trim_end().to_string();
    let bodies = [
        format!("{}\n{}\ndata: [DONE]\n", line("央行"), line("停止")),
        format!("{}\r\n{}\r\ndata: [DONE]\r\n", line("央行"), line("停止")),
        format!("{}\n\n{}", line("央行"), line("停止")),
    ];

    for body in bodies {
        let bytes = body.into_bytes();
        for size in [bytes.len(), 4, 1] {
            let chunks: Vec<Vec<u8>> = bytes.chunks(size).map(<[u8]>::to_vec).collect();
            let transport = MockTransport::new(vec![Reply::bytes(200, chunks)]);
            let explainer = Explainer::new(deepseek_settings(), transport);

            let report = explainer
                .explain("text", None, PromptMode::Explain, Arc::new(Recorder::default()))
                .await;

            assert_eq!(report.state, SessionState::Done, "chunk size {size}");
            assert_eq!(report.buffer, "央行停止", "chunk size {size}");
            assert_eq!(report.metrics.skipped_frames, 0);
        }
    }
}

#[tokio::test]
async fn malformed_frames_follow_the_decode_policy() {
    let frames = [delta("A"), "data: {not json\n\n".to_string(), delta("B")];
    let frames: Vec<&str> = frames.iter().map(String::as_str).collect();

    let transport = MockTransport::new(vec![Reply::sse(&frames)]);
    let lenient = Explainer::new(deepseek_settings(), transport);
    let report = lenient
        .explain("text", None, PromptMode::Explain, Arc::new(Recorder::default()))
        .await;
    assert_eq!(report.state, SessionState::Done);
    assert_eq!(report.buffer, "AB");
    assert_eq!(report.metrics.skipped_frames, 1);

    let mut settings = deepseek_settings();
    settings.stream_policy = DecodePolicy::Strict;
    let strict = Explainer::new(settings, MockTransport::new(vec![Reply::sse(&frames)]));
    let report = strict
        .explain("text", None, PromptMode::Explain, Arc::new(Recorder::default()))
        .await;
    assert_eq!(report.state, SessionState::Failed);
    assert!(matches!(
        report.failure,
        Some(SessionError::Completion(CompletionError::Protocol { .. }))
    ));
    assert!(report.buffer.starts_with('A'));
}

#[tokio::test]
async fn a_new_session_silences_the_previous_one() {
    let old = delta("old");
    let new_frames = [delta("new"), "data: [DONE]\n\n".to_string()];
    let new_frames: Vec<&str> = new_frames.iter().map(String::as_str).collect();
    let transport = MockTransport::new(vec![
        Reply::stalled(&[old.as_str()]),
        Reply::sse(&new_frames),
    ]);
    let explainer = Explainer::new(deepseek_settings(), transport);
    let first_surface = Arc::new(Recorder::default());
    let second_surface = Arc::new(Recorder::default());

    let first = explainer.start("first", None, PromptMode::Explain, first_surface.clone());
    let first_handle = first.handle();
    let first_run = tokio::spawn(first.run());
    while first_handle.buffer().is_empty() {
        tokio::task::yield_now().await;
    }
    let renders_before = first_surface.renders();

    let second = explainer
        .explain("second", None, PromptMode::Explain, second_surface.clone())
        .await;
    let first_report = first_run.await.unwrap();

    assert_eq!(first_report.state, SessionState::Cancelled);
    assert!(first_report.failure.is_none());
    assert_eq!(first_surface.renders(), renders_before);
    assert_eq!(first_surface.events().last(), Some(&Event::Dismissed));
    assert_eq!(second.state, SessionState::Done);
    assert_eq!(second.buffer, "new");
}

#[tokio::test]
async fn openai_compatible_base_url_is_normalised() {
    let frames = [delta("ok"), "data: [DONE]\n\n".to_string()];
    let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
    let transport = MockTransport::new(vec![Reply::sse(&frames)]);
    let settings = ExplainerSettings {
        openai_compatible: ProviderCredentials::new("sk-proxy")
            .with_base_url("https://proxy.example.com/v1/"),
        selected_model: Some(ModelDescriptor::new("gpt-4o", ProviderKind::OpenAiCompatible)),
        ..Default::default()
    };
    let explainer = Explainer::new(settings, Arc::clone(&transport));

    let report = explainer
        .explain("text", None, PromptMode::Explain, Arc::new(Recorder::default()))
        .await;

    assert_eq!(report.state, SessionState::Done);
    assert_eq!(
        transport.requests()[0].url,
        "https://proxy.example.com/v1/chat/completions"
    );
    assert_eq!(explainer.usage().openai_sessions, 1);
}

#[tokio::test]
async fn located_post_is_explained_and_exported() {
    let mut page = DomSnapshot::new(Rect::new(0.0, 0.0, 1000.0, 800.0));
    let root = page.root();
    let feed = page.add_element(root, "div", &["feed"], Rect::new(0.0, 0.0, 1000.0, 800.0));
    let post = page.add_element(feed, "div", &["content"], Rect::new(100.0, 100.0, 600.0, 200.0));
    let para = page.add_element(post, "p", &[], Rect::new(100.0, 100.0, 600.0, 40.0));
    page.add_text(para, "  央行停止购买国债\n");
    page.add_text(post, "以稳定汇率 ");
    page.set_scroll(0.0, 1000.0);

    let locator = ContentLocator::new(ContentRule::default());
    let located = locator
        .extract(&mut page, ContentPoint::new(150.0, 1110.0))
        .unwrap();
    assert_eq!(located.element, post);
    assert_eq!(located.text, "央行停止购买国债 以稳定汇率");
    assert_eq!(page.highlighted(), vec![post]);

    let miss = locator.extract(&mut page, ContentPoint::new(900.0, 1700.0));
    assert!(matches!(miss, Err(LocateError::NotFound(_))));
    assert!(page.highlighted().is_empty());

    let frames = [delta("解释"), "data: [DONE]\n\n".to_string()];
    let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
    let transport = MockTransport::new(vec![Reply::sse(&frames)]);
    let explainer = Explainer::new(deepseek_settings(), transport);
    let surface = Arc::new(Recorder::default());
    let session = explainer.start(located.text, None, PromptMode::Explain, surface);
    let handle = session.handle();
    session.run().await;

    let bridge_transport = MockTransport::new(vec![Reply::bytes(200, vec![b"null".to_vec()])]);
    let bridge = NoteBridge::new(Arc::clone(&bridge_transport), NoteBridgeConfig::default());
    assert_eq!(bridge.export(&handle).await.unwrap(), Value::Null);

    let sent = bridge_transport.requests();
    let content = sent[0].body.as_ref().unwrap()["args"][1].as_str().unwrap().to_string();
    assert!(content.ends_with("\n解释"));
    assert!(!content.contains(DISCLAIMER.trim()));
}

#[tokio::test]
async fn harvested_blocks_feed_a_summary_session() {
    let mut harvester = ContentHarvester::new();
    harvester.push_all(["第一条", "第二条", "第一条"]);
    assert_eq!(harvester.count(), 2);

    let frames = [delta("总结"), "data: [DONE]\n\n".to_string()];
    let frames: Vec<&str> = frames.iter().map(String::as_str).collect();
    let transport = MockTransport::new(vec![Reply::sse(&frames)]);
    let explainer = Explainer::new(deepseek_settings(), Arc::clone(&transport));

    let report = explainer
        .explain(
            harvester.aggregate(),
            None,
            PromptMode::Summary,
            Arc::new(Recorder::default()),
        )
        .await;

    assert_eq!(report.state, SessionState::Done);
    let body = transport.requests()[0].body.clone().unwrap();
    assert_eq!(body["messages"][0]["content"], SUMMARY_PROMPT);
    assert_eq!(body["messages"][1]["content"], "第一条\n\n第二条");
}
