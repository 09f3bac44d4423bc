//! 远程 shell 命令构建器
//!
//! 所有参数逐个经过 shell 转义后再拼接，调用方只提供参数列表，
//! 不直接拼接字符串，主机名、分支名等用户输入不会被解释为 shell 语法。

use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Join {
    And,
    Or,
    Pipe,
}

impl Join {
    fn as_str(self) -> &'static str {
        match self {
            Join::And => "&&",
            Join::Or => "||",
            Join::Pipe => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stderr {
    Keep,
    ToStdout,
    Discard,
}

/// 结构化远程命令
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    env: Vec<(String, String)>,
    program: String,
    args: Vec<String>,
    stdout_to: Option<String>,
    discard_stdout: bool,
    stderr: Stderr,
    chain: Vec<(Join, RemoteCommand)>,
}

impl RemoteCommand {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            env: Vec::new(),
            program: program.into(),
            args: Vec::new(),
            stdout_to: None,
            discard_stdout: false,
            stderr: Stderr::Keep,
            chain: Vec::new(),
        }
    }

    /// `docker <subcommand> ...` 的快捷方式
    pub fn docker<S: Into<String>>(subcommand: S) -> Self {
        Self::new("docker").arg(subcommand)
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// 以 `KEY=value` 前缀设置环境变量
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// 标准输出重定向到远程文件
    pub fn stdout_to<S: Into<String>>(mut self, path: S) -> Self {
        self.stdout_to = Some(path.into());
        self
    }

    pub fn quiet(mut self) -> Self {
        self.discard_stdout = true;
        self.stderr = Stderr::Discard;
        self
    }

    pub fn merge_stderr(mut self) -> Self {
        self.stderr = Stderr::ToStdout;
        self
    }

    pub fn discard_stderr(mut self) -> Self {
        self.stderr = Stderr::Discard;
        self
    }

    pub fn and(mut self, next: RemoteCommand) -> Self {
        self.chain.push((Join::And, next));
        self
    }

    pub fn or(mut self, next: RemoteCommand) -> Self {
        self.chain.push((Join::Or, next));
        self
    }

    pub fn pipe(mut self, next: RemoteCommand) -> Self {
        self.chain.push((Join::Pipe, next));
        self
    }

    /// 忽略失败，整体退出码恒为0
    pub fn or_true(self) -> Self {
        self.or(RemoteCommand::new("true"))
    }

    /// 渲染为可直接交给远程 shell 执行的字符串
    pub fn render(&self) -> String {
        let mut out = self.render_single();
        for (join, next) in &self.chain {
            out.push(' ');
            out.push_str(join.as_str());
            out.push(' ');
            out.push_str(&next.render());
        }
        out
    }

    fn render_single(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(self.args.len() + self.env.len() + 4);
        for (key, value) in &self.env {
            parts.push(format!("{}={}", key, quote(value)));
        }
        parts.push(quote(&self.program).into_owned());
        parts.extend(self.args.iter().map(|a| quote(a).into_owned()));

        if let Some(path) = &self.stdout_to {
            parts.push(format!("> {}", quote(path)));
        } else if self.discard_stdout {
            parts.push("> /dev/null".to_string());
        }
        match self.stderr {
            Stderr::Keep => {}
            Stderr::ToStdout => parts.push("2>&1".to_string()),
            Stderr::Discard => parts.push("2>/dev/null".to_string()),
        }
        parts.join(" ")
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn quote(value: &str) -> Cow<'_, str> {
    shell_escape::unix::escape(Cow::Borrowed(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_arguments_are_not_quoted() {
        let cmd = RemoteCommand::docker("restart").arg("odoo-demo-s1");
        assert_eq!(cmd.render(), "docker restart odoo-demo-s1");
    }

    #[test]
    fn test_hostile_argument_is_quoted() {
        let cmd = RemoteCommand::new("git")
            .args(["checkout", "main; rm -rf /"]);
        assert_eq!(cmd.render(), "git checkout 'main; rm -rf /'");
    }

    #[test]
    fn test_env_prefix_and_redirects() {
        let cmd = RemoteCommand::new("git")
            .env("GIT_SSH_COMMAND", "ssh -o StrictHostKeyChecking=no")
            .args(["-C", "/opt/repo", "pull"])
            .merge_stderr();
        assert_eq!(
            cmd.render(),
            "GIT_SSH_COMMAND='ssh -o StrictHostKeyChecking=no' git -C /opt/repo pull 2>&1"
        );
    }

    #[test]
    fn test_chaining() {
        let cmd = RemoteCommand::new("which")
            .arg("nginx")
            .quiet()
            .or(RemoteCommand::new("apt-get").args(["install", "-y", "nginx"]));
        assert_eq!(
            cmd.render(),
            "which nginx > /dev/null 2>/dev/null || apt-get install -y nginx"
        );

        let cmd = RemoteCommand::docker("network")
            .args(["rm", "net-odoo"])
            .discard_stderr()
            .or_true();
        assert_eq!(cmd.render(), "docker network rm net-odoo 2>/dev/null || true");
    }

    #[test]
    fn test_format_template_is_quoted_verbatim() {
        let cmd = RemoteCommand::docker("inspect").args(["--format", "{{.Id}}", "odoo-a"]);
        assert_eq!(cmd.render(), "docker inspect --format '{{.Id}}' odoo-a");
    }

    #[test]
    fn test_stdout_redirect() {
        let cmd = RemoteCommand::docker("exec")
            .args(["odoo-a-db", "pg_dumpall", "-U", "odoo"])
            .stdout_to("/tmp/odoo-a_dump.sql");
        assert_eq!(
            cmd.render(),
            "docker exec odoo-a-db pg_dumpall -U odoo > /tmp/odoo-a_dump.sql"
        );
    }
}
