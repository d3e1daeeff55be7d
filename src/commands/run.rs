use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use remora::db::CommandRecord;
use remora::{App, Config, Interceptor, RingBuffer};

/// Run a command with stdout teed through the interceptor, then record it.
pub fn execute(command: Vec<String>) -> Result<()> {
    let config = Config::load()?;
    let buffer = Arc::new(RingBuffer::new(config.history.buffer_lines));
    let preview_lines = config.history.preview_lines;
    let app = App::init(config)?;

    let (program, args) = command
        .split_first()
        .context("no command given")?;

    let started = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to launch {program}"))?;

    let mut child_stdout = child.stdout.take().context("child stdout not captured")?;
    let mut interceptor = Interceptor::with_buffer(buffer.clone());
    let tee_result = interceptor.tee(&mut child_stdout, &mut std::io::stdout());

    let status = child.wait().context("failed to wait for child")?;
    tee_result?;

    let mut record = CommandRecord::new(command.join(" "));
    record.exit_code = status.code().unwrap_or(-1);
    record.duration_ms = started.elapsed().as_millis() as i64;
    record.working_dir = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    record.output_preview = buffer.get_lines(preview_lines).join("\n");

    app.capture(&record)?;
    app.shutdown();

    if !status.success() {
        std::process::exit(status.code().unwrap_or(1));
    }
    Ok(())
}
