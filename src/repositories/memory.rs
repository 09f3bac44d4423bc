//! 测试用的内存存储

use super::OrchestratorStore;
use crate::{
    error::AppResult,
    models::{
        BackupRecord, BackupSchedule, BackupStatus, Domain, DomainStatus, GitRepo, Host,
        HostProbe, HostStatus, Instance, InstanceNames, InstanceStatus, JobRecord, JobStatus,
        NewInstance, SslStatus, StorageType,
    },
};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    hosts: HashMap<Uuid, Host>,
    instances: HashMap<Uuid, Instance>,
    domains: HashMap<Uuid, Domain>,
    schedules: HashMap<Uuid, BackupSchedule>,
    backups: HashMap<Uuid, BackupRecord>,
    repos: HashMap<Uuid, GitRepo>,
    jobs: HashMap<Uuid, JobRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_host(&self, host: Host) {
        self.tables.lock().unwrap().hosts.insert(host.id, host);
    }

    pub fn insert_instance(&self, instance: Instance) {
        self.tables.lock().unwrap().instances.insert(instance.id, instance);
    }

    pub fn insert_domain(&self, domain: Domain) {
        self.tables.lock().unwrap().domains.insert(domain.id, domain);
    }

    pub fn insert_schedule(&self, schedule: BackupSchedule) {
        self.tables.lock().unwrap().schedules.insert(schedule.id, schedule);
    }

    pub fn insert_backup(&self, record: BackupRecord) {
        self.tables.lock().unwrap().backups.insert(record.id, record);
    }

    pub fn insert_repo(&self, repo: GitRepo) {
        self.tables.lock().unwrap().repos.insert(repo.id, repo);
    }

    pub fn host(&self, id: Uuid) -> Option<Host> {
        self.tables.lock().unwrap().hosts.get(&id).cloned()
    }

    pub fn instance(&self, id: Uuid) -> Option<Instance> {
        self.tables.lock().unwrap().instances.get(&id).cloned()
    }

    pub fn domain(&self, id: Uuid) -> Option<Domain> {
        self.tables.lock().unwrap().domains.get(&id).cloned()
    }

    pub fn schedule(&self, id: Uuid) -> Option<BackupSchedule> {
        self.tables.lock().unwrap().schedules.get(&id).cloned()
    }

    pub fn backup(&self, id: Uuid) -> Option<BackupRecord> {
        self.tables.lock().unwrap().backups.get(&id).cloned()
    }

    pub fn backups_of(&self, instance_id: Uuid) -> Vec<BackupRecord> {
        self.tables
            .lock()
            .unwrap()
            .backups
            .values()
            .filter(|b| b.instance_id == instance_id)
            .cloned()
            .collect()
    }

    pub fn repo(&self, id: Uuid) -> Option<GitRepo> {
        self.tables.lock().unwrap().repos.get(&id).cloned()
    }

    pub fn job(&self, id: Uuid) -> Option<JobRecord> {
        self.tables.lock().unwrap().jobs.get(&id).cloned()
    }

    pub fn set_job_updated_at(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(job) = self.tables.lock().unwrap().jobs.get_mut(&id) {
            job.updated_at = at;
        }
    }
}

#[async_trait::async_trait]
impl OrchestratorStore for MemoryStore {
    async fn get_host(&self, id: Uuid) -> AppResult<Option<Host>> {
        Ok(self.host(id))
    }

    async fn update_host_status(
        &self,
        id: Uuid,
        status: HostStatus,
        connected_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        if let Some(host) = self.tables.lock().unwrap().hosts.get_mut(&id) {
            host.status = status;
            if connected_at.is_some() {
                host.last_connected_at = connected_at;
            }
        }
        Ok(())
    }

    async fn save_host_probe(
        &self,
        id: Uuid,
        probe: &HostProbe,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        if let Some(host) = self.tables.lock().unwrap().hosts.get_mut(&id) {
            host.os_version = probe.os_version.clone();
            host.cpu_cores = probe.cpu_cores;
            host.ram_total_bytes = probe.ram_total_bytes;
            host.disk_total_bytes = probe.disk_total_bytes;
            host.docker_version = probe.docker_version.clone();
            host.status = HostStatus::Connected;
            host.last_connected_at = Some(at);
        }
        Ok(())
    }

    async fn set_host_docker_version(&self, id: Uuid, version: &str) -> AppResult<()> {
        if let Some(host) = self.tables.lock().unwrap().hosts.get_mut(&id) {
            host.docker_version = Some(version.to_string());
        }
        Ok(())
    }

    async fn create_instance(
        &self,
        new: &NewInstance,
        names: &InstanceNames,
        addons_path: &str,
    ) -> AppResult<Instance> {
        let now = Utc::now();
        let instance = Instance {
            id: Uuid::new_v4(),
            host_id: new.host_id,
            name: new.name.clone(),
            odoo_version: new.odoo_version.clone(),
            edition: new.edition.clone(),
            container_name: names.container_name.clone(),
            pg_container_name: names.pg_container_name.clone(),
            network_name: names.network_name.clone(),
            host_port: new.host_port,
            status: InstanceStatus::Pending,
            container_id: None,
            odoo_config: new.odoo_config.clone(),
            addons_path: Some(addons_path.to_string()),
            pg_password: new.pg_password.clone(),
            created_at: now,
            updated_at: now,
        };
        self.insert_instance(instance.clone());
        Ok(instance)
    }

    async fn get_instance(&self, id: Uuid) -> AppResult<Option<Instance>> {
        Ok(self.instance(id))
    }

    async fn set_instance_status(&self, id: Uuid, status: InstanceStatus) -> AppResult<()> {
        if let Some(instance) = self.tables.lock().unwrap().instances.get_mut(&id) {
            instance.status = status;
        }
        Ok(())
    }

    async fn mark_instance_running(&self, id: Uuid, container_id: &str) -> AppResult<()> {
        if let Some(instance) = self.tables.lock().unwrap().instances.get_mut(&id) {
            instance.status = InstanceStatus::Running;
            instance.container_id = Some(container_id.to_string());
        }
        Ok(())
    }

    async fn set_instance_config(&self, id: Uuid, overrides_json: &str) -> AppResult<()> {
        if let Some(instance) = self.tables.lock().unwrap().instances.get_mut(&id) {
            instance.odoo_config = Some(overrides_json.to_string());
        }
        Ok(())
    }

    async fn delete_instance(&self, id: Uuid) -> AppResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        let removed = tables.instances.remove(&id).is_some();
        tables.domains.retain(|_, d| d.instance_id != id);
        tables.schedules.retain(|_, s| s.instance_id != id);
        tables.backups.retain(|_, b| b.instance_id != id);
        tables.repos.retain(|_, r| r.instance_id != id);
        Ok(removed)
    }

    async fn get_domain(&self, id: Uuid) -> AppResult<Option<Domain>> {
        Ok(self.domain(id))
    }

    async fn set_domain_status(&self, id: Uuid, status: DomainStatus) -> AppResult<()> {
        if let Some(domain) = self.tables.lock().unwrap().domains.get_mut(&id) {
            domain.status = status;
        }
        Ok(())
    }

    async fn set_domain_ssl(
        &self,
        id: Uuid,
        status: SslStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        if let Some(domain) = self.tables.lock().unwrap().domains.get_mut(&id) {
            domain.ssl_status = status;
            if expires_at.is_some() {
                domain.ssl_expires_at = expires_at;
            }
        }
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> AppResult<Option<BackupSchedule>> {
        Ok(self.schedule(id))
    }

    async fn list_due_schedules(&self, now: DateTime<Utc>) -> AppResult<Vec<BackupSchedule>> {
        let mut due: Vec<_> = self
            .tables
            .lock()
            .unwrap()
            .schedules
            .values()
            .filter(|s| s.is_active && s.next_run_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_at);
        Ok(due)
    }

    async fn list_retention_schedules(&self) -> AppResult<Vec<BackupSchedule>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .schedules
            .values()
            .filter(|s| s.retention_days > 0)
            .cloned()
            .collect())
    }

    async fn set_schedule_next_run(&self, id: Uuid, next_run_at: DateTime<Utc>) -> AppResult<()> {
        if let Some(schedule) = self.tables.lock().unwrap().schedules.get_mut(&id) {
            schedule.next_run_at = Some(next_run_at);
        }
        Ok(())
    }

    async fn create_backup_record(
        &self,
        instance_id: Uuid,
        schedule_id: Option<Uuid>,
        storage_type: StorageType,
        started_at: DateTime<Utc>,
    ) -> AppResult<BackupRecord> {
        let record = BackupRecord {
            id: Uuid::new_v4(),
            instance_id,
            schedule_id,
            file_path: None,
            file_size_bytes: None,
            storage_type,
            status: BackupStatus::Running,
            error_message: None,
            started_at: Some(started_at),
            completed_at: None,
            created_at: started_at,
            updated_at: started_at,
        };
        self.insert_backup(record.clone());
        Ok(record)
    }

    async fn get_backup_record(&self, id: Uuid) -> AppResult<Option<BackupRecord>> {
        Ok(self.backup(id))
    }

    async fn complete_backup(
        &self,
        id: Uuid,
        file_path: &str,
        file_size_bytes: Option<i64>,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        if let Some(record) = self.tables.lock().unwrap().backups.get_mut(&id) {
            record.status = BackupStatus::Success;
            record.file_path = Some(file_path.to_string());
            record.file_size_bytes = file_size_bytes;
            record.completed_at = Some(at);
        }
        Ok(())
    }

    async fn fail_backup(&self, id: Uuid, error: &str, at: DateTime<Utc>) -> AppResult<()> {
        if let Some(record) = self.tables.lock().unwrap().backups.get_mut(&id) {
            record.status = BackupStatus::Failed;
            record.error_message = Some(error.to_string());
            record.completed_at = Some(at);
        }
        Ok(())
    }

    async fn list_expired_backups(
        &self,
        schedule_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> AppResult<Vec<BackupRecord>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .backups
            .values()
            .filter(|b| {
                b.schedule_id == Some(schedule_id)
                    && b.status == BackupStatus::Success
                    && b.created_at < cutoff
                    && b.file_path.is_some()
            })
            .cloned()
            .collect())
    }

    async fn clear_backup_location(&self, id: Uuid) -> AppResult<()> {
        if let Some(record) = self.tables.lock().unwrap().backups.get_mut(&id) {
            record.file_path = None;
            record.file_size_bytes = None;
        }
        Ok(())
    }

    async fn list_backups_in_status(
        &self,
        status: BackupStatus,
        started_before: DateTime<Utc>,
    ) -> AppResult<Vec<BackupRecord>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .backups
            .values()
            .filter(|b| {
                b.status == status && b.started_at.unwrap_or(b.created_at) < started_before
            })
            .cloned()
            .collect())
    }

    async fn get_git_repo(&self, id: Uuid) -> AppResult<Option<GitRepo>> {
        Ok(self.repo(id))
    }

    async fn record_git_deploy(&self, id: Uuid, commit: &str, at: DateTime<Utc>) -> AppResult<()> {
        if let Some(repo) = self.tables.lock().unwrap().repos.get_mut(&id) {
            repo.last_commit_sha = Some(commit.to_string());
            repo.last_deployed_at = Some(at);
        }
        Ok(())
    }

    async fn insert_job(&self, record: &JobRecord) -> AppResult<()> {
        self.tables
            .lock()
            .unwrap()
            .jobs
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> AppResult<Option<JobRecord>> {
        Ok(self.job(id))
    }

    async fn mark_job_running(
        &self,
        id: Uuid,
        attempt: i32,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        match self.tables.lock().unwrap().jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = JobStatus::Running;
                job.attempts = attempt;
                job.started_at = Some(at);
                job.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_job_retrying(
        &self,
        id: Uuid,
        result: &JsonValue,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        if let Some(job) = self.tables.lock().unwrap().jobs.get_mut(&id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Pending;
                job.result = Some(result.clone());
                job.updated_at = at;
            }
        }
        Ok(())
    }

    async fn finish_job(
        &self,
        id: Uuid,
        status: JobStatus,
        result: &JsonValue,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        match tables.jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = status;
                job.result = Some(result.clone());
                job.completed_at = Some(at);
                job.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_jobs(
        &self,
        target_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<JobRecord>, i64)> {
        let mut jobs: Vec<_> = self
            .tables
            .lock()
            .unwrap()
            .jobs
            .values()
            .filter(|j| target_id.is_none() || j.target_id == target_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = jobs.len() as i64;
        let page = jobs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn list_stale_jobs(
        &self,
        status: JobStatus,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<JobRecord>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .jobs
            .values()
            .filter(|j| j.status == status && j.updated_at < before)
            .cloned()
            .collect())
    }
}
