use super::{ServiceContext, steps};
use crate::{
    error::{AppError, AppResult},
    jobs::JobOutcome,
    models::{Domain, DomainStatus, Host, Instance, SslStatus},
    remote::{RemoteCommand, timeouts},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const NGINX_AVAILABLE: &str = "/etc/nginx/sites-available";
const NGINX_ENABLED: &str = "/etc/nginx/sites-enabled";
const CERTBOT_TIMEOUT: Duration = Duration::from_secs(120);

/// 域名反向代理与证书签发
#[derive(Clone)]
pub struct DomainProvisioner {
    ctx: ServiceContext,
}

impl DomainProvisioner {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    async fn load(&self, domain_id: Uuid) -> AppResult<(Domain, Instance, Host)> {
        let domain = self
            .ctx
            .store
            .get_domain(domain_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("域名 {}", domain_id)))?;
        let instance = self.ctx.instance(domain.instance_id).await?;
        let host = self.ctx.host(instance.host_id).await?;
        Ok((domain, instance, host))
    }

    /// 写入 nginx 站点配置并重载
    pub async fn bind(&self, domain_id: Uuid) -> AppResult<JsonValue> {
        let (domain, instance, host) = self.load(domain_id).await?;
        info!(
            "配置Nginx反向代理: {} -> {}:{}",
            domain.domain_name, host.address, instance.host_port
        );

        match self.bind_steps(&domain, &instance, &host).await {
            Ok(()) => {
                self.ctx
                    .store
                    .set_domain_status(domain.id, DomainStatus::Active)
                    .await?;
                info!("域名 {} 反向代理配置完成", domain.domain_name);
                Ok(json!({ "status": "active", "domain": domain.domain_name }))
            }
            Err(e) => {
                error!("域名 {} 反向代理配置失败: {}", domain.domain_name, e);
                if let Err(write_err) = self
                    .ctx
                    .store
                    .set_domain_status(domain.id, DomainStatus::Failed)
                    .await
                {
                    error!("更新域名 {} 状态出错: {}", domain.id, write_err);
                }
                Err(e)
            }
        }
    }

    async fn bind_steps(&self, domain: &Domain, instance: &Instance, host: &Host) -> AppResult<()> {
        let session = self.ctx.open(host).await?;
        let session = session.as_ref();
        let name = &domain.domain_name;

        steps::run_checked(
            session,
            "安装Nginx",
            &steps::ensure_installed("nginx", &["nginx"]),
            timeouts::PACKAGE,
        )
        .await?;

        let available = format!("{}/{}.conf", NGINX_AVAILABLE, name);
        let enabled = format!("{}/{}.conf", NGINX_ENABLED, name);
        session
            .write_file(&available, &render_vhost(name, instance.host_port))
            .await?;
        steps::run_checked(
            session,
            "启用站点",
            &RemoteCommand::new("ln").args(["-sf", available.as_str(), enabled.as_str()]),
            timeouts::QUICK,
        )
        .await?;

        info!("检查Nginx配置");
        steps::run_checked(
            session,
            "Nginx配置检查",
            &RemoteCommand::new("nginx").arg("-t"),
            timeouts::QUICK,
        )
        .await?;
        steps::run_checked(
            session,
            "重载Nginx",
            &RemoteCommand::new("systemctl").args(["reload", "nginx"]),
            timeouts::QUICK,
        )
        .await?;
        Ok(())
    }

    /// certbot 失败作为业务失败返回，不抛错
    pub async fn issue_certificate(&self, domain_id: Uuid) -> AppResult<JobOutcome> {
        let (domain, _instance, host) = self.load(domain_id).await?;
        let name = &domain.domain_name;
        self.ctx
            .store
            .set_domain_ssl(domain.id, SslStatus::Pending, domain.ssl_expires_at)
            .await?;
        info!("为 {} 签发证书", name);

        match self.certificate_steps(&domain, &host).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("为 {} 签发证书出错: {}", name, e);
                if let Err(write_err) = self
                    .ctx
                    .store
                    .set_domain_ssl(domain.id, SslStatus::Failed, domain.ssl_expires_at)
                    .await
                {
                    error!("更新域名 {} 证书状态出错: {}", domain.id, write_err);
                }
                Err(e)
            }
        }
    }

    async fn certificate_steps(&self, domain: &Domain, host: &Host) -> AppResult<JobOutcome> {
        let name = &domain.domain_name;
        let session = self.ctx.open(host).await?;
        let session = session.as_ref();
        steps::run_checked(
            session,
            "安装Certbot",
            &steps::ensure_installed("certbot", &["certbot", "python3-certbot-nginx"]),
            timeouts::PACKAGE,
        )
        .await?;

        let certbot = steps::run(
            session,
            &RemoteCommand::new("certbot").args([
                "--nginx",
                "-d",
                name.as_str(),
                "--non-interactive",
                "--agree-tos",
                "--register-unsafely-without-email",
            ]),
            CERTBOT_TIMEOUT,
        )
        .await?;
        if !certbot.success() {
            error!("Certbot 为 {} 签发失败: {}", name, certbot.detail());
            self.ctx
                .store
                .set_domain_ssl(domain.id, SslStatus::Failed, domain.ssl_expires_at)
                .await?;
            return Ok(JobOutcome::Failed(json!({
                "error": format!("Certbot失败: {}", certbot.detail()),
            })));
        }

        let cert = format!("/etc/letsencrypt/live/{}/cert.pem", name);
        let enddate = steps::run(
            session,
            &RemoteCommand::new("openssl")
                .args(["x509", "-enddate", "-noout", "-in", cert.as_str()])
                .discard_stderr(),
            timeouts::QUICK,
        )
        .await?;
        let expires_at = parse_cert_expiry(&enddate.stdout);
        if expires_at.is_none() {
            warn!("无法解析 {} 的证书到期时间: {:?}", name, enddate.stdout);
        }

        self.ctx
            .store
            .set_domain_ssl(domain.id, SslStatus::Active, expires_at.or(domain.ssl_expires_at))
            .await?;
        info!("{} 证书签发完成，到期时间 {:?}", name, expires_at);
        Ok(JobOutcome::Success(json!({
            "status": "active",
            "ssl_expires_at": expires_at,
        })))
    }
}

/// 解析 `openssl x509 -enddate` 输出，如 `notAfter=Mar  9 04:05:06 2025 GMT`
pub fn parse_cert_expiry(output: &str) -> Option<DateTime<Utc>> {
    let value = output.trim();
    let value = value.strip_prefix("notAfter=").unwrap_or(value);
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%b %d %H:%M:%S %Y GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn render_vhost(domain_name: &str, upstream_port: u16) -> String {
    let upstream = format!("http://127.0.0.1:{}", upstream_port);
    let forwarded_headers = "        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;";

    format!(
        "server {{
    listen 80;
    server_name {domain_name};

    client_max_body_size 200M;
    proxy_read_timeout 720s;
    proxy_connect_timeout 720s;
    proxy_send_timeout 720s;

    location / {{
        proxy_pass {upstream};
{forwarded_headers}
        proxy_redirect off;
    }}

    location /longpolling {{
        proxy_pass {upstream};
{forwarded_headers}
    }}

    location ~* /web/static/ {{
        proxy_pass {upstream};
        proxy_cache_valid 200 90m;
        proxy_buffering on;
        expires 864000;
    }}
}}
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteError, RemoteLayout, testing::FakeRemote};
    use crate::repositories::memory::MemoryStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryStore>, FakeRemote, Domain, DomainProvisioner) {
        let store = Arc::new(MemoryStore::new());
        let remote = FakeRemote::new();
        let host = Host::for_tests();
        let instance = Instance::for_tests(host.id);
        let now = Utc::now();
        let domain = Domain {
            id: Uuid::new_v4(),
            instance_id: instance.id,
            domain_name: "erp.example.com".to_string(),
            status: DomainStatus::Pending,
            ssl_status: SslStatus::None,
            ssl_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_host(host);
        store.insert_instance(instance);
        store.insert_domain(domain.clone());
        let ctx = ServiceContext::new(store.clone(), Arc::new(remote.clone()), RemoteLayout::default());
        (store, remote, domain, DomainProvisioner::new(ctx))
    }

    #[test]
    fn test_parse_cert_expiry() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 9, 4, 5, 6).unwrap();
        assert_eq!(parse_cert_expiry("notAfter=Mar  9 04:05:06 2025 GMT\n"), Some(expected));
        assert_eq!(parse_cert_expiry("Mar 09 04:05:06 2025 GMT"), Some(expected));
        assert_eq!(parse_cert_expiry(""), None);
        assert_eq!(parse_cert_expiry("unable to load certificate"), None);
    }

    #[test]
    fn test_render_vhost() {
        let vhost = render_vhost("erp.example.com", 8070);
        assert!(vhost.contains("server_name erp.example.com;"));
        assert!(vhost.contains("client_max_body_size 200M;"));
        assert_eq!(vhost.matches("proxy_pass http://127.0.0.1:8070;").count(), 3);
        assert_eq!(vhost.matches("X-Forwarded-Proto $scheme;").count(), 2);
        assert!(vhost.contains("location ~* /web/static/ {"));
    }

    #[tokio::test]
    async fn test_bind_activates_domain() {
        let (store, remote, domain, provisioner) = setup();
        let result = provisioner.bind(domain.id).await.unwrap();
        assert_eq!(result, json!({"status": "active", "domain": "erp.example.com"}));
        assert_eq!(store.domain(domain.id).unwrap().status, DomainStatus::Active);

        let vhost = remote.file("/etc/nginx/sites-available/erp.example.com.conf").unwrap();
        assert!(vhost.contains("proxy_pass http://127.0.0.1:8069;"));
        assert!(remote.ran("ln -sf /etc/nginx/sites-available/erp.example.com.conf"));
        assert!(remote.position("nginx -t").unwrap() < remote.position("systemctl reload nginx").unwrap());
    }

    #[tokio::test]
    async fn test_bind_config_test_failure() {
        let (store, remote, domain, provisioner) = setup();
        remote.fail("nginx -t", 1, "nginx: [emerg] unknown directive");

        let err = provisioner.bind(domain.id).await.unwrap_err();
        assert!(err.to_string().contains("unknown directive"));
        assert_eq!(store.domain(domain.id).unwrap().status, DomainStatus::Failed);
        assert!(!remote.ran("systemctl reload"));
    }

    #[tokio::test]
    async fn test_issue_certificate() {
        let (store, remote, domain, provisioner) = setup();
        remote.on("openssl x509", "notAfter=Jun 30 12:00:00 2026 GMT");

        let outcome = provisioner.issue_certificate(domain.id).await.unwrap();
        let JobOutcome::Success(result) = outcome else {
            panic!("expected success");
        };
        assert_eq!(result["status"], "active");

        let saved = store.domain(domain.id).unwrap();
        assert_eq!(saved.ssl_status, SslStatus::Active);
        assert_eq!(saved.ssl_expires_at, Some(Utc.with_ymd_and_hms(2026, 6, 30, 12, 0, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_certbot_failure_is_reported_not_raised() {
        let (store, remote, domain, provisioner) = setup();
        remote.fail("certbot --nginx", 1, "DNS problem: NXDOMAIN");

        let outcome = provisioner.issue_certificate(domain.id).await.unwrap();
        let JobOutcome::Failed(result) = outcome else {
            panic!("expected business failure");
        };
        assert!(result["error"].as_str().unwrap().contains("NXDOMAIN"));
        assert_eq!(store.domain(domain.id).unwrap().ssl_status, SslStatus::Failed);
        assert!(!remote.ran("openssl"));
        assert_eq!(remote.sessions_opened(), remote.sessions_closed());
    }

    #[tokio::test]
    async fn test_unreachable_host_does_not_leave_ssl_pending() {
        let (store, remote, domain, provisioner) = setup();
        remote.fail_connect(RemoteError::Connect("connection refused".into()));

        let err = provisioner.issue_certificate(domain.id).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(store.domain(domain.id).unwrap().ssl_status, SslStatus::Failed);
    }

    #[tokio::test]
    async fn test_certbot_install_failure_marks_ssl_failed() {
        let (store, remote, domain, provisioner) = setup();
        remote.fail("certbot", 100, "E: Unable to locate package certbot");

        assert!(provisioner.issue_certificate(domain.id).await.is_err());
        assert_eq!(store.domain(domain.id).unwrap().ssl_status, SslStatus::Failed);
    }
}
