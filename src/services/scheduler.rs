use super::BackupEngine;
use crate::{config::SchedulerConfig, jobs::JobDispatcher};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

/// 周期任务：到期备份扫描与每日过期清理
#[derive(Clone)]
pub struct SweepScheduler {
    backups: BackupEngine,
    dispatcher: Arc<dyn JobDispatcher>,
    config: SchedulerConfig,
}

impl SweepScheduler {
    pub fn new(
        backups: BackupEngine,
        dispatcher: Arc<dyn JobDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            backups,
            dispatcher,
            config,
        }
    }

    pub fn start(&self) {
        if !self.config.enabled {
            info!("周期调度已禁用");
            return;
        }
        self.start_due_sweep();
        self.start_retention_sweep();
    }

    fn start_due_sweep(&self) {
        info!(
            "到期备份扫描间隔 {} 秒",
            self.config.due_backup_interval_secs
        );
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                this.config.due_backup_interval_secs,
            ));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                match this.backups.due_sweep(this.dispatcher.as_ref()).await {
                    Ok(report) if report.due_count > 0 => info!(
                        "到期备份扫描：到期 {}，已派发 {}，错误 {}",
                        report.due_count,
                        report.triggered.len(),
                        report.errors.len()
                    ),
                    Ok(_) => debug!("到期备份扫描：没有到期的策略"),
                    Err(e) => error!("到期备份扫描失败: {}", e),
                }
            }
        });
    }

    fn start_retention_sweep(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = next_daily_at(now, this.config.retention_hour_utc);
                info!("下次过期备份清理时间: {}", next);
                let wait = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                match this.backups.retention_sweep().await {
                    Ok(report) => info!(
                        "过期备份清理完成：清理 {}，错误 {}",
                        report.cleaned_count,
                        report.errors.len()
                    ),
                    Err(e) => error!("过期备份清理失败: {}", e),
                }
            }
        });
    }
}

/// `now` 之后第一个 `hour:00` UTC
pub fn next_daily_at(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}
