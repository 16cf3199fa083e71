use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// 用户对条文说明子目录的选择：选中的目录页（0 起始），None 表示跳过
pub type ClauseDecision = Option<Vec<usize>>;

pub struct DecisionSender(oneshot::Sender<ClauseDecision>);

pub struct DecisionReceiver(oneshot::Receiver<ClauseDecision>);

/// 一次性的人工确认通道
pub fn decision_channel() -> (DecisionSender, DecisionReceiver) {
    let (tx, rx) = oneshot::channel();
    (DecisionSender(tx), DecisionReceiver(rx))
}

impl DecisionSender {
    /// 流水线已不再等待时返回 false
    pub fn send(self, decision: ClauseDecision) -> bool {
        self.0.send(decision).is_ok()
    }
}

impl DecisionReceiver {
    /// 超时、发送端被丢弃、或选择了空列表，都按跳过处理
    pub async fn wait(self, timeout: Duration) -> Option<Vec<usize>> {
        match tokio::time::timeout(timeout, self.0).await {
            Ok(Ok(Some(pages))) if !pages.is_empty() => Some(pages),
            Ok(Ok(_)) => {
                info!("用户选择跳过条文说明子目录");
                None
            }
            Ok(Err(_)) => {
                warn!("确认通道已关闭，跳过条文说明子目录");
                None
            }
            Err(_) => {
                warn!("等待确认超时（{} 秒），跳过条文说明子目录", timeout.as_secs());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decision_is_delivered() {
        let (tx, rx) = decision_channel();
        let waiter = tokio::spawn(rx.wait(Duration::from_secs(5)));
        assert!(tx.send(Some(vec![80, 81])));
        assert_eq!(waiter.await.unwrap(), Some(vec![80, 81]));
    }

    #[tokio::test]
    async fn timeout_means_skip() {
        let (_tx, rx) = decision_channel();
        assert_eq!(rx.wait(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn skip_and_empty_selection_are_equivalent() {
        let (tx, rx) = decision_channel();
        tx.send(Some(Vec::new()));
        assert_eq!(rx.wait(Duration::from_secs(1)).await, None);

        let (tx, rx) = decision_channel();
        tx.send(None);
        assert_eq!(rx.wait(Duration::from_secs(1)).await, None);
    }

    #[tokio::test]
    async fn dropped_sender_means_skip() {
        let (tx, rx) = decision_channel();
        drop(tx);
        assert_eq!(rx.wait(Duration::from_secs(1)).await, None);
    }

    #[tokio::test]
    async fn sending_after_receiver_gone_reports_false() {
        let (tx, rx) = decision_channel();
        drop(rx);
        assert!(!tx.send(None));
    }
}
