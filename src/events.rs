use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

/// 进度事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StepStart,
    Log,
    Warning,
    /// 等待用户确认是否添加条文说明子目录
    SelectClause,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            step: None,
            progress: None,
            payload: None,
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::new(EventKind::Log, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(EventKind::Warning, message)
    }

    pub fn step(step: u8, progress: u8, message: impl Into<String>) -> Self {
        Self {
            step: Some(step),
            progress: Some(progress),
            ..Self::new(EventKind::StepStart, message)
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// 流水线各里程碑调用的进度钩子，投递方式由调用方决定
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);

    fn log(&self, message: String) {
        self.emit(ProgressEvent::log(message));
    }

    fn warn(&self, message: String) {
        self.emit(ProgressEvent::warning(message));
    }
}

/// 只写日志
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: ProgressEvent) {
        match event.kind {
            EventKind::Warning | EventKind::Error => warn!("{}", event.message),
            _ => info!("{}", event.message),
        }
    }
}

/// 丢弃所有事件
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// 无界通道：流水线从不因观察者缺席而阻塞
impl EventSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // 接收端已关闭时直接丢弃
        let _ = self.send(event);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// 收集事件，供断言使用
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingSink {
        pub fn messages(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.message.clone())
                .collect()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_event_serializes_without_empty_fields() {
        let event = ProgressEvent::step(3, 45, "解析目录并注入书签...");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "step_start");
        assert_eq!(json["step"], 3);
        assert_eq!(json["progress"], 45);
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn channel_sink_keeps_generation_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.log("a".to_string());
        tx.log("b".to_string());
        assert_eq!(rx.try_recv().unwrap().message, "a");
        assert_eq!(rx.try_recv().unwrap().message, "b");
    }

    #[test]
    fn closed_channel_does_not_panic() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
        drop(rx);
        tx.log("nobody listening".to_string());
    }
}
