//! LLM-backed decompilation. This shells out to an external CLI with a
//! prompt built around the disassembly text; the subprocess timeout is
//! enforced here, by the caller, not inside the decoder.

use std::io::Write as _;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Backend names.
pub const BACKEND_CLAUDE: &str = "claude-code";
pub const BACKEND_CODEX: &str = "codex";

/// Settings for LLM decompilation.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: String,
    /// Model name (backend-specific); empty uses the backend default.
    pub model: String,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BACKEND_CLAUDE.to_string(),
            model: String::new(),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Builds the decompilation prompt from disassembly text.
fn build_prompt(disasm: &str, func_name: &str) -> String {
    format!(
        "Decompile this SpiderMonkey bytecode into idiomatic JavaScript.\n\
         \n\
         OUTPUT FORMAT - respond with ONLY this structure:\n\
         /*\n\
         \x20* {func_name}\n\
         \x20*\n\
         \x20* [Concise analysis: what the function does, its inputs/outputs,\n\
         \x20*  any notable patterns (event handlers, initialization, state\n\
         \x20*  machines, etc.)]\n\
         \x20*/\n\
         function {func_name}() {{\n\
         \x20   // idiomatic JavaScript here\n\
         }}\n\
         \n\
         RULES:\n\
         - Output ONLY the comment block + function. No prose outside the code.\n\
         - Write idiomatic JS: use const/let, modern patterns, meaningful names.\n\
         - The comment block IS the analysis. Keep it concise (3-6 lines).\n\
         - Reconstruct control flow naturally. No mechanical 1:1 opcode translation.\n\
         \n\
         Bytecode:\n\
         {disasm}\n"
    )
}

/// Sends disassembly to an LLM backend and returns JavaScript.
pub fn decompile(cfg: &Config, disasm: &str, func_name: &str) -> Result<String, String> {
    let prompt = build_prompt(disasm, func_name);

    let raw = match cfg.backend.as_str() {
        BACKEND_CLAUDE => {
            let mut args = vec!["-p".to_string(), "--no-session-persistence".to_string()];
            if !cfg.model.is_empty() {
                args.push("--model".to_string());
                args.push(cfg.model.clone());
            }
            run_backend("claude", &args, &prompt, cfg.timeout)?
        }
        BACKEND_CODEX => {
            let mut args = vec!["exec".to_string()];
            if !cfg.model.is_empty() {
                args.push("-m".to_string());
                args.push(cfg.model.clone());
            }
            args.push("-".to_string()); // read the prompt from stdin
            run_backend("codex", &args, &prompt, cfg.timeout)?
        }
        other => return Err(format!("unknown backend {other:?}")),
    };

    Ok(strip_markdown_fences(&raw).to_string())
}

/// Runs a backend binary with the prompt on stdin, killing it when the
/// timeout elapses. Output pipes are drained on separate threads so a
/// chatty child cannot deadlock against a full pipe buffer.
fn run_backend(bin: &str, args: &[String], prompt: &str, timeout: Duration) -> Result<String, String> {
    let mut child = Command::new(bin)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("{bin}: {e}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(prompt.as_bytes()).map_err(|e| format!("{bin}: {e}"))?;
    }

    let stdout = child.stdout.take();
    let out_thread = thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout {
            let _ = std::io::Read::read_to_end(&mut pipe, &mut buf);
        }
        buf
    });
    let stderr = child.stderr.take();
    let err_thread = thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr {
            let _ = std::io::Read::read_to_end(&mut pipe, &mut buf);
        }
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("{bin}: timed out after {}s", timeout.as_secs()));
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(format!("{bin}: {e}")),
        }
    };

    let out = out_thread.join().unwrap_or_default();
    let err = err_thread.join().unwrap_or_default();
    if !status.success() {
        return Err(format!("{bin}: exit {status}: {}", String::from_utf8_lossy(&err)));
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Removes ```javascript ... ``` wrappers from LLM output.
pub fn strip_markdown_fences(s: &str) -> &str {
    let mut s = s.trim();

    for prefix in ["```javascript", "```js", "```"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start_matches('\n');
            break;
        }
    }

    if let Some(rest) = s.strip_suffix("```") {
        s = rest.trim_end_matches('\n');
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_markdown_fences("```javascript\ncode\n```"), "code");
        assert_eq!(strip_markdown_fences("```js\ncode\n```"), "code");
        assert_eq!(strip_markdown_fences("```\ncode\n```"), "code");
        assert_eq!(strip_markdown_fences("plain"), "plain");
        assert_eq!(strip_markdown_fences("  \n```\nx\n```\n  "), "x");
    }

    #[test]
    fn prompt_carries_name_and_disasm() {
        let p = build_prompt("00000  nop", "main");
        assert!(p.contains("function main()"));
        assert!(p.contains("00000  nop"));
    }

    #[test]
    fn unknown_backend_rejected() {
        let cfg = Config { backend: "nope".to_string(), ..Config::default() };
        assert!(decompile(&cfg, "", "f").is_err());
    }
}
