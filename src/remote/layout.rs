/// 远程主机上的实例目录约定
#[derive(Debug, Clone)]
pub struct RemoteLayout {
    root: String,
}

impl RemoteLayout {
    pub fn new<S: Into<String>>(root: S) -> Self {
        let root = root.into();
        let trimmed = root.trim_end_matches('/');
        Self {
            root: if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() },
        }
    }

    pub fn instance(&self, container_name: &str) -> InstancePaths {
        InstancePaths {
            root: format!("{}/{}", self.root, container_name),
        }
    }
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self::new("/opt/cloudtab")
    }
}

/// 单个实例的目录集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    root: String,
}

impl InstancePaths {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn data(&self) -> String {
        format!("{}/data", self.root)
    }

    pub fn filestore(&self) -> String {
        format!("{}/data/filestore", self.root)
    }

    pub fn addons(&self) -> String {
        format!("{}/addons", self.root)
    }

    pub fn config_dir(&self) -> String {
        format!("{}/config", self.root)
    }

    pub fn config_file(&self) -> String {
        format!("{}/config/odoo.conf", self.root)
    }

    pub fn pgdata(&self) -> String {
        format!("{}/pgdata", self.root)
    }

    pub fn backups(&self) -> String {
        format!("{}/backups", self.root)
    }

    pub fn repo(&self) -> String {
        format!("{}/repo", self.root)
    }

    /// destroy 时删除的目录，backups 保留
    pub fn disposable(&self) -> Vec<String> {
        vec![
            self.data(),
            self.addons(),
            self.config_dir(),
            self.pgdata(),
            self.repo(),
        ]
    }
}
