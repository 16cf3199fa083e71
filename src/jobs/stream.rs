use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::events::ProgressEvent;

/// 无事件时的心跳间隔
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(ProgressEvent),
    Heartbeat,
    /// 流水线已结束，之后不再有事件
    End,
}

impl StreamItem {
    /// server-sent events 的一帧
    pub fn to_sse(&self) -> String {
        let payload = match self {
            StreamItem::Event(event) => serde_json::to_value(event).unwrap_or_else(|_| json!({"kind": "log"})),
            StreamItem::Heartbeat => json!({"kind": "heartbeat"}),
            StreamItem::End => json!({"kind": "end"}),
        };
        format!("data: {}\n\n", payload)
    }
}

/// 观察端：按产生顺序转发事件，静默过久补心跳，发送端全部关闭后给出结束标记
pub struct EventStream {
    rx: UnboundedReceiver<ProgressEvent>,
    heartbeat: Duration,
    ended: bool,
}

impl EventStream {
    pub fn new(rx: UnboundedReceiver<ProgressEvent>) -> Self {
        Self::with_heartbeat(rx, HEARTBEAT_INTERVAL)
    }

    pub fn with_heartbeat(rx: UnboundedReceiver<ProgressEvent>, heartbeat: Duration) -> Self {
        Self {
            rx,
            heartbeat,
            ended: false,
        }
    }

    /// 结束标记之后返回 None
    pub async fn next(&mut self) -> Option<StreamItem> {
        if self.ended {
            return None;
        }
        match tokio::time::timeout(self.heartbeat, self.rx.recv()).await {
            Ok(Some(event)) => Some(StreamItem::Event(event)),
            Ok(None) => {
                self.ended = true;
                Some(StreamItem::End)
            }
            Err(_) => Some(StreamItem::Heartbeat),
        }
    }
}
