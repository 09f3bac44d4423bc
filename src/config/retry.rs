use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 单类任务的重试策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次执行）
    pub max_retries: u32,
    /// 初始退避时间（秒）
    pub initial_backoff_secs: u64,
    /// 最大退避时间（秒）
    pub max_backoff_secs: u64,
    /// 退避倍率
    pub backoff_multiplier: f64,
    /// 添加随机抖动以避免惊群效应
    pub jitter: bool,
}

impl RetryPolicy {
    pub const fn new(initial_backoff_secs: u64, max_backoff_secs: u64, max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff_secs,
            max_backoff_secs,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// 不自动重试
    pub const fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// 第 `retry` 次重试（从1开始）前的等待时间
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let raw = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(exponent);
        let base_secs = (raw as u64).min(self.max_backoff_secs);

        let delay_secs = if self.jitter {
            add_jitter(base_secs).min(self.max_backoff_secs.max(base_secs))
        } else {
            base_secs
        };
        Duration::from_secs(delay_secs)
    }

    /// 在第 `attempt` 次执行（从1开始）失败后是否还能重试
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    fn validate(&self, name: &str) -> Result<(), String> {
        if self.max_retries > 5 {
            return Err(format!("{} 最大重试次数不应超过5", name));
        }
        if self.max_retries > 0 && self.initial_backoff_secs == 0 {
            return Err(format!("{} 初始退避时间必须大于0", name));
        }
        if self.max_backoff_secs < self.initial_backoff_secs {
            return Err(format!("{} 最大退避时间不能小于初始退避时间", name));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(format!("{} 退避倍率不能小于1", name));
        }
        Ok(())
    }
}

fn add_jitter(base_secs: u64) -> u64 {
    let jitter_range = (base_secs as f64 * 0.1) as u64; // 10% 抖动
    let jitter = rand::random::<f64>() * jitter_range.max(1) as f64;
    base_secs + jitter as u64
}

/// 任务重试分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Deploy,
    Control,
    Destroy,
    Quick,
    Nginx,
    Certificate,
    Git,
    HostCheck,
    HostInfo,
    Install,
    Backup,
}

/// 各类任务的重试策略表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicies {
    pub deploy: RetryPolicy,
    pub control: RetryPolicy,
    pub destroy: RetryPolicy,
    pub quick: RetryPolicy,
    pub nginx: RetryPolicy,
    pub certificate: RetryPolicy,
    pub git: RetryPolicy,
    pub host_check: RetryPolicy,
    pub host_info: RetryPolicy,
    pub install: RetryPolicy,
    pub backup: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            deploy: RetryPolicy::new(30, 300, 3),
            control: RetryPolicy::new(15, 120, 2),
            destroy: RetryPolicy::new(30, 300, 2),
            quick: RetryPolicy::new(10, 60, 2),
            nginx: RetryPolicy::new(15, 120, 2),
            certificate: RetryPolicy::new(30, 300, 3),
            git: RetryPolicy::new(30, 300, 3),
            host_check: RetryPolicy::new(10, 60, 2),
            host_info: RetryPolicy::new(15, 120, 2),
            install: RetryPolicy::new(30, 300, 3),
            // 备份与恢复不是幂等操作，不自动重试
            backup: RetryPolicy::none(),
        }
    }
}

impl RetryPolicies {
    pub fn for_class(&self, class: RetryClass) -> &RetryPolicy {
        match class {
            RetryClass::Deploy => &self.deploy,
            RetryClass::Control => &self.control,
            RetryClass::Destroy => &self.destroy,
            RetryClass::Quick => &self.quick,
            RetryClass::Nginx => &self.nginx,
            RetryClass::Certificate => &self.certificate,
            RetryClass::Git => &self.git,
            RetryClass::HostCheck => &self.host_check,
            RetryClass::HostInfo => &self.host_info,
            RetryClass::Install => &self.install,
            RetryClass::Backup => &self.backup,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.deploy.validate("deploy")?;
        self.control.validate("control")?;
        self.destroy.validate("destroy")?;
        self.quick.validate("quick")?;
        self.nginx.validate("nginx")?;
        self.certificate.validate("certificate")?;
        self.git.validate("git")?;
        self.host_check.validate("host_check")?;
        self.host_info.validate("host_info")?;
        self.install.validate("install")?;
        self.backup.validate("backup")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policies() {
        let policies = RetryPolicies::default();
        assert_eq!(policies.deploy.max_retries, 3);
        assert_eq!(policies.control.initial_backoff_secs, 15);
        assert_eq!(policies.destroy.max_retries, 2);
        assert_eq!(policies.backup.max_retries, 0);
        assert!(policies.validate().is_ok());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut policy = RetryPolicy::new(30, 300, 3);
        policy.jitter = false;

        assert_eq!(policy.backoff(1), Duration::from_secs(30));
        assert_eq!(policy.backoff(2), Duration::from_secs(60));
        assert_eq!(policy.backoff(3), Duration::from_secs(120));
        assert_eq!(policy.backoff(10), Duration::from_secs(300));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(100, 1000, 3);
        for _ in 0..20 {
            let delay = policy.backoff(1).as_secs();
            assert!((100..=110).contains(&delay));
        }
    }

    #[test]
    fn test_allows_retry() {
        let policy = RetryPolicy::new(10, 60, 2);
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!RetryPolicy::none().allows_retry(1));
    }
}
