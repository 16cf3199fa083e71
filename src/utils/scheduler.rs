use tokio_cron_scheduler::{Job, JobScheduler};
use anyhow::Result;
use tracing::info;
use std::sync::Arc;

use crate::jobs::JobRegistry;

pub struct TaskScheduler {
    scheduler: JobScheduler,
}

impl TaskScheduler {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self { scheduler })
    }

    /// 周期性清理过期任务（默认每 10 分钟一次）
    pub async fn add_registry_cleanup(&self, cron_expr: &str, registry: Arc<JobRegistry>) -> Result<()> {
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                let removed = registry.purge_expired();
                if !removed.is_empty() {
                    info!("清理过期任务 {} 个", removed.len());
                }
            })
        })?;

        self.scheduler.add(job).await?;
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        info!("任务调度器已启动");
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        info!("任务调度器已关闭");
        Ok(())
    }
}
