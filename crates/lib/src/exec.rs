//! Subprocess execution strategy: run a handler script under its interpreter with
//! JSON in (stdin or one argv argument) and JSON out (stdout).
//!
//! No shell is used; the interpreter, its fixed args and the script path are passed as
//! a list. Every call is bounded by a timeout, and the child is killed when the call
//! future is dropped (timeout or caller cancellation).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::tools::strategy::{HandlerError, HandlerStrategy, ToolHandler};

/// How the JSON arguments reach the handler process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgDelivery {
    /// Write the JSON document to standard input, then close it.
    #[default]
    Stdin,
    /// Pass the JSON document as the single argument after the script path.
    Argv,
}

/// Interpreter used for one handler language (e.g. `node`, `python3`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interpreter {
    pub program: String,
    /// Fixed arguments placed before the script path.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub delivery: ArgDelivery,
}

impl Interpreter {
    pub fn new(program: impl Into<String>, delivery: ArgDelivery) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            delivery,
        }
    }
}

/// Strategy that spawns one process per call.
pub struct SubprocessStrategy {
    language: String,
    interpreter: Interpreter,
    timeout: Duration,
}

impl SubprocessStrategy {
    pub fn new(language: &str, interpreter: Interpreter, timeout: Duration) -> Self {
        Self {
            language: language.to_string(),
            interpreter,
            timeout,
        }
    }
}

impl HandlerStrategy for SubprocessStrategy {
    fn language(&self) -> &str {
        &self.language
    }

    fn prepare(&self, script: &Path) -> Result<Arc<dyn ToolHandler>, HandlerError> {
        if !script.is_file() {
            return Err(HandlerError::Load(format!(
                "handler script not found: {}",
                script.display()
            )));
        }
        // Absolute, since the child runs with the script's directory as its cwd.
        let script = script
            .canonicalize()
            .map_err(|e| HandlerError::Load(format!("{}: {}", script.display(), e)))?;
        if !bin_on_path(&self.interpreter.program) {
            log::warn!(
                "interpreter {} for {} is not on PATH; calls will fail until it is installed",
                self.interpreter.program,
                script.display()
            );
        }
        Ok(Arc::new(SubprocessHandler {
            interpreter: self.interpreter.clone(),
            script,
            timeout: self.timeout,
        }))
    }

    fn wrap_source(&self, tool_name: &str, code: &str) -> Option<String> {
        let wrapped = match (self.interpreter.program.as_str(), self.interpreter.delivery) {
            (p, ArgDelivery::Stdin) if p.starts_with("node") => wrap_node(tool_name, code),
            (p, ArgDelivery::Stdin) if p.starts_with("python") => wrap_python(tool_name, code),
            (p, ArgDelivery::Stdin) if p == "sh" || p == "bash" => wrap_shell(tool_name, code),
            (p, ArgDelivery::Argv) if p.starts_with("ruby") => wrap_ruby(tool_name, code),
            _ => return None,
        };
        Some(wrapped)
    }
}

/// A prepared script: interpreter + resolved path.
pub struct SubprocessHandler {
    interpreter: Interpreter,
    script: PathBuf,
    timeout: Duration,
}

#[async_trait]
impl ToolHandler for SubprocessHandler {
    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, HandlerError> {
        let payload = serde_json::to_string(&args)
            .map_err(|e| HandlerError::Execution(format!("serializing arguments: {}", e)))?;
        let stdout = run_json_process(&self.interpreter, &self.script, &payload, self.timeout).await?;
        parse_output(&stdout)
    }
}

/// Spawn `interpreter script`, deliver `payload`, wait (bounded) and return stdout.
/// Non-zero exit => `Execution` with the captured stderr.
pub async fn run_json_process(
    interpreter: &Interpreter,
    script: &Path,
    payload: &str,
    timeout: Duration,
) -> Result<String, HandlerError> {
    let mut cmd = Command::new(&interpreter.program);
    cmd.args(&interpreter.args).arg(script);
    if interpreter.delivery == ArgDelivery::Argv {
        cmd.arg(payload);
    }
    if let Some(dir) = script.parent() {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        HandlerError::Execution(format!("failed to start {}: {}", interpreter.program, e))
    })?;
    let stdin = child.stdin.take();
    let delivery = interpreter.delivery;
    let write_input = async move {
        if let Some(mut stdin) = stdin {
            if delivery == ArgDelivery::Stdin {
                // A handler may exit without reading its input; a broken pipe is not an error here.
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    log::debug!("writing handler stdin: {}", e);
                }
            }
        }
    };
    // Output is drained while input is still being written, so a handler that echoes
    // as it reads never stalls on a full stdout pipe.
    let run = async move {
        let ((), output) = tokio::join!(write_input, child.wait_with_output());
        output
    };

    let output = match tokio::time::timeout(timeout, run).await {
        Ok(result) => result.map_err(|e| HandlerError::Execution(format!("waiting for handler: {}", e)))?,
        Err(_) => {
            log::warn!("handler {} timed out after {:?}", script.display(), timeout);
            return Err(HandlerError::Timeout(timeout));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Err(HandlerError::Execution(format!(
            "exit {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}

/// Stdout must hold exactly one JSON value.
fn parse_output(stdout: &str) -> Result<serde_json::Value, HandlerError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(HandlerError::Output("handler produced no output".to_string()));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| HandlerError::Output(format!("handler output is not JSON: {}", e)))
}

/// Returns true if the given binary name is found on PATH (or has path separators and exists).
pub fn bin_on_path(bin: &str) -> bool {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(bin).is_file();
    }
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| {
        if dir.as_os_str().is_empty() {
            return false;
        }
        if dir.join(bin).is_file() {
            return true;
        }
        cfg!(windows) && dir.join(format!("{}.exe", bin)).is_file()
    })
}

fn indent(code: &str, prefix: &str) -> String {
    code.lines()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else {
                format!("{}{}", prefix, l)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn wrap_node(tool_name: &str, code: &str) -> String {
    format!(
        r#"// Handler for {name}. Reads JSON arguments on stdin, writes the JSON result to stdout.
async function handler(args) {{
{body}
}}

let input = '';
process.stdin.setEncoding('utf8');
process.stdin.on('data', (chunk) => {{ input += chunk; }});
process.stdin.on('end', async () => {{
  try {{
    const result = await handler(input.trim() ? JSON.parse(input) : {{}});
    process.stdout.write(JSON.stringify(result === undefined ? null : result));
  }} catch (err) {{
    process.stderr.write(String(err && err.stack ? err.stack : err));
    process.exit(1);
  }}
}});
module.exports = handler;
"#,
        name = tool_name,
        body = indent(code, "  ")
    )
}

fn wrap_python(tool_name: &str, code: &str) -> String {
    format!(
        r#"# Handler for {name}. Reads JSON arguments on stdin, writes the JSON result to stdout.
import json
import sys


def handler(args):
{body}


if __name__ == "__main__":
    raw = sys.stdin.read()
    result = handler(json.loads(raw) if raw.strip() else {{}})
    sys.stdout.write(json.dumps(result))
"#,
        name = tool_name,
        body = indent(code, "    ")
    )
}

fn wrap_shell(tool_name: &str, code: &str) -> String {
    format!(
        "#!/bin/sh\n# Handler for {}. JSON arguments arrive on stdin; print one JSON value.\n{}\n",
        tool_name, code
    )
}

fn wrap_ruby(tool_name: &str, code: &str) -> String {
    format!(
        r#"# Handler for {name}. JSON arguments arrive as the first argument; prints the JSON result.
require 'json'

def handler(args)
{body}
end

$stdout.write(JSON.generate(handler(JSON.parse(ARGV[0] || '{{}}'))))
"#,
        name = tool_name,
        body = indent(code, "  ")
    )
}
