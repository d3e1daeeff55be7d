use anyhow::Result;
use remora::db::CommandRecord;
use remora::{App, Config};

/// Record a command that already ran (shell hook integration point).
pub fn execute(command: String, exit_code: i32, duration_ms: i64) -> Result<()> {
    let app = App::init(Config::load()?)?;

    let mut record = CommandRecord::new(command);
    record.exit_code = exit_code;
    record.duration_ms = duration_ms;
    record.working_dir = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    let outcome = app.capture(&record)?;
    if outcome.is_new() {
        println!("Recorded command {}", outcome.id());
    } else {
        println!("Command already known, refreshed last-used ({})", outcome.id());
    }

    app.shutdown();
    Ok(())
}
