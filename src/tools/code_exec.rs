//! Sandboxed code execution for arithmetic and small computations.
//!
//! Every call gets a fresh Lua 5.4 VM with the filesystem, process, module
//! loading, and debug libraries removed. Nothing survives between calls.
//!
//! # Semantics
//!
//! - `print(...)` writes to the captured output instead of stdout.
//! - A bare expression such as `12345 * 6789` evaluates to its value.
//! - A chunk that ends in `return x` contributes `x` to the output.
//! - Markdown code fences around the input are ignored.
//!
//! # Limits
//!
//! An instruction-count hook aborts scripts that run past the configured
//! timeout, the heap is capped, and output is truncated at
//! `max_output_bytes`.

use async_trait::async_trait;
use mlua::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{strip_code_fences, Tool, ToolError};
use crate::config::CodeExecConfig;

pub const CODE_EXEC_TOOL: &str = "Code_Exec";

const CODE_EXEC_DESCRIPTION: &str = "Useful for performing calculations. Input should be a valid \
Lua expression or snippet, e.g. `12345 * 6789` or `print(string.format(\"%.2f\", 1.5 / 3))`.";

const MEMORY_LIMIT_BYTES: usize = 64 * 1024 * 1024;
const NO_OUTPUT: &str = "(no output)";
const TRUNCATED_MARKER: &str = "\n[output truncated]";

pub struct CodeExecTool {
    timeout_secs: u64,
    max_output_bytes: usize,
}

impl CodeExecTool {
    pub fn new(config: &CodeExecConfig) -> Self {
        Self {
            timeout_secs: config.timeout_secs,
            max_output_bytes: config.max_output_bytes,
        }
    }

    /// Run `code` and return what it printed and returned.
    pub async fn execute(&self, code: &str) -> Result<String, ToolError> {
        let code = strip_code_fences(code).to_string();
        if code.is_empty() {
            return Err(ToolError::invalid_input(CODE_EXEC_TOOL, "no code given"));
        }

        let timeout_secs = self.timeout_secs;
        let max_output = self.max_output_bytes;

        let output = tokio::task::spawn_blocking(move || run_sandboxed(&code, timeout_secs))
            .await
            .map_err(|e| ToolError::execution(CODE_EXEC_TOOL, e.to_string()))?
            .map_err(|e| ToolError::execution(CODE_EXEC_TOOL, e.to_string()))?;

        Ok(truncate_output(output, max_output))
    }
}

#[async_trait]
impl Tool for CodeExecTool {
    fn name(&self) -> &str {
        CODE_EXEC_TOOL
    }

    fn description(&self) -> &str {
        CODE_EXEC_DESCRIPTION
    }

    async fn invoke(&self, input: &str) -> Result<String, ToolError> {
        self.execute(input).await
    }
}

/// Remove globals that reach outside the VM.
fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for name in [
        "os", "io", "loadfile", "dofile", "debug", "require", "package", "load",
    ] {
        globals.set(name, LuaValue::Nil)?;
    }
    Ok(())
}

fn run_sandboxed(code: &str, timeout_secs: u64) -> LuaResult<String> {
    let lua = Lua::new();
    lua.set_memory_limit(MEMORY_LIMIT_BYTES)?;

    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(10_000),
        move |_lua, _debug| {
            if Instant::now() > deadline {
                Err(mlua::Error::RuntimeError(format!(
                    "execution timed out after {} seconds",
                    timeout_secs
                )))
            } else {
                Ok(mlua::VmState::Continue)
            }
        },
    );

    let captured = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&captured);
    let print = lua.create_function(move |lua, args: LuaMultiValue| {
        let line = render_values(lua, args)?;
        let mut out = sink
            .lock()
            .map_err(|_| mlua::Error::RuntimeError("output buffer poisoned".into()))?;
        out.push_str(&line);
        out.push('\n');
        Ok(())
    })?;
    lua.globals().set("print", print)?;
    sandbox_globals(&lua)?;

    // Try the input as an expression first so `2 + 2` yields 4.
    let chunk = match lua.load(format!("return {code}")).set_name("snippet").into_function() {
        Ok(f) => f,
        Err(_) => lua.load(code).set_name("snippet").into_function()?,
    };
    let returned: LuaMultiValue = chunk.call(())?;
    let returned = render_values(&lua, returned)?;

    let mut output = captured
        .lock()
        .map_err(|_| mlua::Error::RuntimeError("output buffer poisoned".into()))?
        .clone();
    if !returned.is_empty() {
        output.push_str(&returned);
    }

    let output = output.trim_end().to_string();
    if output.is_empty() {
        Ok(NO_OUTPUT.to_string())
    } else {
        Ok(output)
    }
}

/// Join values tab-separated using Lua's own `tostring`, skipping a lone nil.
fn render_values(lua: &Lua, values: LuaMultiValue) -> LuaResult<String> {
    if values.iter().all(|v| v.is_nil()) {
        return Ok(String::new());
    }
    let tostring: LuaFunction = lua.globals().get("tostring")?;
    let mut parts = Vec::with_capacity(values.len());
    for value in values {
        let s: String = tostring.call(value)?;
        parts.push(s);
    }
    Ok(parts.join("\t"))
}

fn truncate_output(mut output: String, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output;
    }
    let mut cut = max_bytes;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str(TRUNCATED_MARKER);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> CodeExecTool {
        CodeExecTool::new(&CodeExecConfig {
            timeout_secs: 1,
            max_output_bytes: 64,
        })
    }

    #[tokio::test]
    async fn bare_expression_returns_value() {
        assert_eq!(tool().execute("12345 * 6789").await.unwrap(), "83810205");
        assert_eq!(tool().execute("```lua\n10 / 4\n```").await.unwrap(), "2.5");
    }

    #[tokio::test]
    async fn print_is_captured() {
        let out = tool()
            .execute("local total = 0\nfor i = 1, 3 do total = total + i end\nprint('sum', total)")
            .await
            .unwrap();
        assert_eq!(out, "sum\t6");
    }

    #[tokio::test]
    async fn statements_without_output() {
        assert_eq!(tool().execute("x = 1").await.unwrap(), NO_OUTPUT);
    }

    #[tokio::test]
    async fn runtime_error_is_reported() {
        let err = tool().execute("error('boom')").await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn syntax_error_is_reported() {
        let err = tool().execute("import math\nmath.sqrt(4)").await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[tokio::test]
    async fn dangerous_globals_are_removed() {
        for code in ["os.execute('ls')", "io.open('/etc/passwd')", "require('socket')"] {
            let err = tool().execute(code).await.unwrap_err();
            assert!(err.to_string().contains("nil"), "{code}: {err}");
        }
    }

    #[tokio::test]
    async fn infinite_loop_times_out() {
        let err = tool().execute("while true do end").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn state_does_not_leak_between_calls() {
        let t = tool();
        t.execute("secret = 42").await.unwrap();
        assert_eq!(t.execute("secret").await.unwrap(), NO_OUTPUT);
    }

    #[tokio::test]
    async fn long_output_is_truncated() {
        let out = tool().execute("string.rep('x', 500)").await.unwrap();
        assert!(out.ends_with(TRUNCATED_MARKER));
        assert_eq!(out.len(), 64 + TRUNCATED_MARKER.len());
    }

    #[tokio::test]
    async fn empty_input_is_invalid() {
        let err = tool().execute("```\n```").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }
}
