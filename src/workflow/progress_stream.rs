//! 进度推送会话 - 流程层
//!
//! 一个会话对应一个考试代码的一个阶段：
//! 1. 建立通道
//! 2. 一次性查询当前进度，避免错过通道建立前的事件
//! 3. 依次处理消息，同时运行失效检查和自动完成计时
//! 4. 通道断开时按固定间隔重连
//!
//! 会话结果（完成 / 超时 / 服务端错误）只会送出一次。
//! `close()` 返回后不会再有任何快照或结果送出。

use crate::clients::{ChannelRequest, ExamApi, MessageStream, ProgressTransport};
use crate::config::StreamSettings;
use crate::error::StreamError;
use crate::models::progress::{ProgressMessage, ProgressSnapshot};
use crate::workflow::progress_tracker::{AutoComplete, ProgressTracker};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 会话结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// 收到 completed 或自动完成
    Completed,
    /// 长时间没有消息
    TimedOut { idle: Duration },
    /// 服务端推送了 error_occurred
    Failed { message: String },
}

/// 控制是否还能向外送出
///
/// 送出和关闭都在同一把锁下进行，关闭之后的送出一律丢弃。
#[derive(Clone, Default)]
struct DeliveryGate {
    closed: Arc<Mutex<bool>>,
}

impl DeliveryGate {
    fn deliver(&self, f: impl FnOnce()) -> bool {
        let guard = self.closed.lock().unwrap_or_else(|e| e.into_inner());
        if *guard {
            return false;
        }
        f();
        true
    }

    fn close(&self) {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 进度推送客户端
#[derive(Clone)]
pub struct ProgressStreamClient {
    api: Arc<dyn ExamApi>,
    transport: Arc<dyn ProgressTransport>,
    settings: StreamSettings,
}

impl ProgressStreamClient {
    pub fn new(
        api: Arc<dyn ExamApi>,
        transport: Arc<dyn ProgressTransport>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            api,
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> StreamSettings {
        self.settings
    }

    /// 建立通道并启动会话
    ///
    /// # 参数
    /// - `request`: 考试代码，首次连接时附带考试名称和答案卷数量
    ///
    /// # 返回
    /// 首次建立通道失败时返回错误，之后的断开由会话自行重连
    pub async fn open(&self, request: ChannelRequest) -> Result<ProgressSession, StreamError> {
        let exam_code = request.exam_code.clone();
        let stream = self.transport.open(&request).await?;
        info!("📡 进度通道已建立: {}", exam_code);

        let (snapshot_tx, snapshot_rx) = watch::channel(ProgressSnapshot::default());
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let gate = DeliveryGate::default();

        let runner = SessionRunner {
            exam_code: exam_code.clone(),
            api: Arc::clone(&self.api),
            transport: Arc::clone(&self.transport),
            settings: self.settings,
            gate: gate.clone(),
            snapshot_tx,
            outcome_tx: Some(outcome_tx),
        };
        let task = tokio::spawn(runner.run(stream));

        Ok(ProgressSession {
            exam_code,
            snapshot_rx,
            outcome_rx: Some(outcome_rx),
            gate,
            task: Some(task),
        })
    }
}

/// 一个活动的进度会话
pub struct ProgressSession {
    exam_code: String,
    snapshot_rx: watch::Receiver<ProgressSnapshot>,
    outcome_rx: Option<oneshot::Receiver<StreamOutcome>>,
    gate: DeliveryGate,
    task: Option<JoinHandle<()>>,
}

impl ProgressSession {
    pub fn exam_code(&self) -> &str {
        &self.exam_code
    }

    /// 当前进度
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// 订阅进度变化
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    /// 等待会话结果
    ///
    /// 可以被取消后重新调用；会话关闭后返回 `StreamError::Closed`。
    pub async fn outcome(&mut self) -> Result<StreamOutcome, StreamError> {
        let closed = || StreamError::Closed {
            exam_code: self.exam_code.clone(),
        };
        let Some(rx) = self.outcome_rx.as_mut() else {
            return Err(closed());
        };
        match rx.await {
            Ok(outcome) => {
                self.outcome_rx = None;
                Ok(outcome)
            }
            Err(_) => {
                self.outcome_rx = None;
                Err(closed())
            }
        }
    }

    /// 关闭会话，可重复调用
    pub fn close(&mut self) {
        if self.gate.is_closed() && self.task.is_none() {
            return;
        }
        self.gate.close();
        self.outcome_rx = None;
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("进度会话已关闭: {}", self.exam_code);
        }
    }
}

impl Drop for ProgressSession {
    fn drop(&mut self) {
        self.close();
    }
}

struct SessionRunner {
    exam_code: String,
    api: Arc<dyn ExamApi>,
    transport: Arc<dyn ProgressTransport>,
    settings: StreamSettings,
    gate: DeliveryGate,
    snapshot_tx: watch::Sender<ProgressSnapshot>,
    outcome_tx: Option<oneshot::Sender<StreamOutcome>>,
}

impl SessionRunner {
    async fn run(mut self, stream: MessageStream) {
        let mut tracker = ProgressTracker::new(Instant::now());

        match self.api.get_progress(&self.exam_code).await {
            Ok(Some(payload)) => {
                let applied = tracker.apply(&ProgressMessage::initial(payload), Instant::now());
                if self.after_apply(&tracker, applied.changed, applied.completed, applied.failure) {
                    return;
                }
            }
            Ok(None) => debug!("服务端还没有进度: {}", self.exam_code),
            Err(e) => warn!("⚠️  查询初始进度失败 ({}): {}", self.exam_code, e),
        }

        let mut stream = Some(stream);
        let far_future = Duration::from_secs(86_400 * 365);

        let mut stale_check = time::interval_at(
            Instant::now() + self.settings.stale_check_interval,
            self.settings.stale_check_interval,
        );
        stale_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let auto_complete = time::sleep(far_future);
        tokio::pin!(auto_complete);
        let mut auto_complete_armed = self.armed_from(&tracker, auto_complete.as_mut());

        let reconnect = time::sleep(far_future);
        tokio::pin!(reconnect);
        let mut reconnect_pending = false;

        loop {
            let connected = stream.is_some();
            tokio::select! {
                frame = next_frame(&mut stream), if connected => {
                    match frame {
                        Some(Ok(raw)) => {
                            let Some(message) = ProgressMessage::parse(&raw) else {
                                debug!("忽略无法解析的消息: {}", crate::utils::logging::truncate_text(&raw, 80));
                                continue;
                            };
                            let now = Instant::now();
                            let applied = tracker.apply(&message, now);
                            match applied.auto_complete {
                                AutoComplete::Arm => {
                                    auto_complete.as_mut().reset(now + self.settings.auto_complete_delay);
                                    auto_complete_armed = true;
                                }
                                AutoComplete::Disarm => auto_complete_armed = false,
                                AutoComplete::Keep => {}
                            }
                            if self.after_apply(&tracker, applied.changed, applied.completed, applied.failure) {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("⚠️  {}", e);
                            stream = None;
                        }
                        None => {
                            warn!("⚠️  进度通道断开: {}", self.exam_code);
                            stream = None;
                        }
                    }
                    if stream.is_none() {
                        reconnect.as_mut().reset(Instant::now() + self.settings.reconnect_delay);
                        reconnect_pending = true;
                    }
                }
                () = &mut reconnect, if reconnect_pending => {
                    reconnect_pending = false;
                    match self.transport.open(&ChannelRequest::reopen(&self.exam_code)).await {
                        Ok(s) => {
                            info!("🔄 进度通道已重连: {}", self.exam_code);
                            stream = Some(s);
                        }
                        Err(e) => {
                            warn!("⚠️  重连失败: {}", e);
                            reconnect.as_mut().reset(Instant::now() + self.settings.reconnect_delay);
                            reconnect_pending = true;
                        }
                    }
                }
                () = &mut auto_complete, if auto_complete_armed => {
                    auto_complete_armed = false;
                    if tracker.mark_complete() {
                        info!("✓ index 已达到 total，自动完成: {}", self.exam_code);
                        if self.after_apply(&tracker, true, true, None) {
                            return;
                        }
                    }
                }
                _ = stale_check.tick() => {
                    let now = Instant::now();
                    if tracker.is_stale(now, self.settings.stale_timeout) {
                        let idle = tracker.idle_for(now);
                        let err = StreamError::TimedOut {
                            exam_code: self.exam_code.clone(),
                            idle_secs: idle.as_secs(),
                        };
                        warn!("⏰ {}", err);
                        tracker.mark_timed_out(err.to_string());
                        self.publish(&tracker);
                        self.finish(StreamOutcome::TimedOut { idle });
                        return;
                    }
                }
            }
        }
    }

    /// 初始查询已经达到 total 时立即开始自动完成计时
    fn armed_from(&self, tracker: &ProgressTracker, sleep: std::pin::Pin<&mut time::Sleep>) -> bool {
        if tracker.snapshot().reached_total() && !tracker.is_completed() {
            sleep.reset(Instant::now() + self.settings.auto_complete_delay);
            true
        } else {
            false
        }
    }

    /// 送出快照和结果，返回会话是否结束
    fn after_apply(
        &mut self,
        tracker: &ProgressTracker,
        changed: bool,
        completed: bool,
        failure: Option<String>,
    ) -> bool {
        if changed {
            self.publish(tracker);
        }
        if let Some(message) = failure {
            warn!("❌ 服务端报告错误 ({}): {}", self.exam_code, message);
            self.finish(StreamOutcome::Failed { message });
            return true;
        }
        if completed {
            info!("✅ 阶段完成: {} ({})", self.exam_code, tracker.snapshot());
            self.finish(StreamOutcome::Completed);
            return true;
        }
        false
    }

    fn publish(&self, tracker: &ProgressTracker) {
        let snapshot = tracker.snapshot().clone();
        debug!("进度 {}: {}", self.exam_code, snapshot);
        self.gate.deliver(|| {
            self.snapshot_tx.send_replace(snapshot);
        });
    }

    fn finish(&mut self, outcome: StreamOutcome) {
        if let Some(tx) = self.outcome_tx.take() {
            self.gate.deliver(|| {
                let _ = tx.send(outcome);
            });
        }
    }
}

async fn next_frame(stream: &mut Option<MessageStream>) -> Option<Result<String, StreamError>> {
    match stream.as_mut() {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{InMemoryExamApi, ScriptedTransport};
    use crate::models::progress::{ProgressPayload, ProgressStatus};
    use serde_json::json;

    fn client(api: &InMemoryExamApi, transport: &ScriptedTransport) -> ProgressStreamClient {
        ProgressStreamClient::new(
            Arc::new(api.clone()),
            Arc::new(transport.clone()),
            StreamSettings::default(),
        )
    }

    fn update(index: u64, total: u64) -> serde_json::Value {
        json!({ "type": "recognition_update", "data": { "index": index, "total": total } })
    }

    #[tokio::test(start_paused = true)]
    async fn completed_status_finishes_session() {
        let api = InMemoryExamApi::new();
        let transport = ScriptedTransport::new();
        transport.send_event(update(3, 10));
        transport.send("garbage");
        transport.send_event(json!({ "type": "recognition_update", "data": { "index": 10, "status": "completed" } }));

        let mut session = client(&api, &transport)
            .open(ChannelRequest::first("AB12", "중간", 10))
            .await
            .unwrap();
        assert_eq!(session.outcome().await.unwrap(), StreamOutcome::Completed);

        let snapshot = session.snapshot();
        assert_eq!(snapshot.index, 10);
        assert_eq!(snapshot.total, Some(10));
        assert_eq!(snapshot.status, ProgressStatus::Completed);
        assert_eq!(transport.closed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reaching_total_auto_completes_after_delay() {
        let api = InMemoryExamApi::new();
        let transport = ScriptedTransport::new();
        transport.send_event(update(10, 10));

        let mut session = client(&api, &transport)
            .open(ChannelRequest::reopen("AB12"))
            .await
            .unwrap();
        let started = Instant::now();
        assert_eq!(session.outcome().await.unwrap(), StreamOutcome::Completed);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out_and_closes_once() {
        let api = InMemoryExamApi::new();
        let transport = ScriptedTransport::new();

        let mut session = client(&api, &transport)
            .open(ChannelRequest::reopen("AB12"))
            .await
            .unwrap();
        match session.outcome().await.unwrap() {
            StreamOutcome::TimedOut { idle } => assert!(idle > Duration::from_secs(300)),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(session.snapshot().status, ProgressStatus::Error);
        assert_eq!(transport.closed_count(), 1);

        session.close();
        session.close();
        assert_eq!(transport.closed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_is_reported_with_message() {
        let api = InMemoryExamApi::new();
        let transport = ScriptedTransport::new();
        transport.send_event(json!({ "type": "error_occurred", "data": { "message": "OCR worker crashed" } }));

        let mut session = client(&api, &transport)
            .open(ChannelRequest::reopen("AB12"))
            .await
            .unwrap();
        assert_eq!(
            session.outcome().await.unwrap(),
            StreamOutcome::Failed {
                message: "OCR worker crashed".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn initial_fetch_seeds_the_snapshot() {
        let api = InMemoryExamApi::new();
        api.set_progress(
            "AB12",
            ProgressPayload {
                index: Some(7),
                total: Some(40),
                status: Some("processing".into()),
            },
        );
        let transport = ScriptedTransport::new();

        let session = client(&api, &transport)
            .open(ChannelRequest::reopen("AB12"))
            .await
            .unwrap();
        let mut rx = session.subscribe();
        rx.wait_for(|s| s.index == 7).await.unwrap();
        assert_eq!(session.snapshot().total, Some(40));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_transport_reconnects_without_first_open_params() {
        let api = InMemoryExamApi::new();
        let transport = ScriptedTransport::new();

        let mut session = client(&api, &transport)
            .open(ChannelRequest::first("AB12", "중간", 5))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        transport.drop_connection();
        transport.send_event(json!({ "type": "recognition_update", "data": { "index": 5, "total": 5, "status": "completed" } }));

        assert_eq!(session.outcome().await.unwrap(), StreamOutcome::Completed);
        let opens = transport.opens();
        assert_eq!(opens.len(), 2);
        assert!(opens[0].first_open.is_some());
        assert_eq!(opens[1], ChannelRequest::reopen("AB12"));
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_delivery() {
        let api = InMemoryExamApi::new();
        let transport = ScriptedTransport::new();

        let mut session = client(&api, &transport)
            .open(ChannelRequest::reopen("AB12"))
            .await
            .unwrap();
        let rx = session.subscribe();
        session.close();
        assert!(session.is_closed());

        transport.send_event(update(4, 10));
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.borrow().index, 0);
        assert!(matches!(
            session.outcome().await,
            Err(StreamError::Closed { .. })
        ));
    }
}
