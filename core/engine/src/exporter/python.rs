//! Python 子进程调用
//!
//! 导出和量化都交给 Python 生态（Optimum / ONNX Runtime）完成，
//! 这里只负责启动解释器、收集输出、把失败归类。

use std::io::ErrorKind;
use std::process::{Command, Output, Stdio};

use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// stderr 只保留最后这么多行，足够看到 Python traceback 的结尾
const STDERR_TAIL_LINES: usize = 20;

/// 一次子进程调用的结果
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub success: bool,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    fn from_output(output: Output) -> Self {
        Self {
            success: output.status.success(),
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    /// stderr 的最后几行
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self.stderr.lines().collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }

    /// 失败原因的简短描述
    pub fn failure_message(&self) -> String {
        let status = self
            .status
            .map(|code| format!("exit status {code}"))
            .unwrap_or_else(|| "terminated by signal".to_string());
        let tail = self.stderr_tail();
        if tail.is_empty() {
            status
        } else {
            format!("{status}\n{tail}")
        }
    }
}

/// Python 解释器
#[derive(Debug, Clone)]
pub struct PythonRuntime {
    python_cmd: String,
}

impl PythonRuntime {
    pub fn new(python_cmd: impl Into<String>) -> Self {
        Self {
            python_cmd: python_cmd.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.python_cmd
    }

    /// 检查某个模块能否导入；解释器或模块缺失都视为依赖不可用
    pub fn check_module(&self, module: &str, install_hint: &str) -> EngineResult<()> {
        let output = self.run(&["-c".to_string(), format!("import {module}")])?;
        if output.success {
            debug!(module, python = %self.python_cmd, "python module available");
            Ok(())
        } else {
            Err(EngineError::DependencyUnavailable {
                dependency: format!("python module `{module}`"),
                hint: install_hint.to_string(),
            })
        }
    }

    /// `python -m <module> <args...>`
    pub fn run_module(&self, module: &str, args: &[String]) -> EngineResult<ProcessOutput> {
        let mut full = vec!["-m".to_string(), module.to_string()];
        full.extend_from_slice(args);
        self.run(&full)
    }

    /// `python -c <script> <args...>`，脚本通过 sys.argv 取参数
    pub fn run_script(&self, script: &str, args: &[String]) -> EngineResult<ProcessOutput> {
        let mut full = vec!["-c".to_string(), script.to_string()];
        full.extend_from_slice(args);
        self.run(&full)
    }

    fn run(&self, args: &[String]) -> EngineResult<ProcessOutput> {
        debug!(python = %self.python_cmd, ?args, "spawning python");

        let output = Command::new(&self.python_cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    EngineError::DependencyUnavailable {
                        dependency: format!("python interpreter `{}`", self.python_cmd),
                        hint: format!("install Python 3 or point --python at an interpreter ({e})"),
                    }
                }
                _ => EngineError::io(format!("spawning {}", self.python_cmd), e),
            })?;

        Ok(ProcessOutput::from_output(output))
    }
}
